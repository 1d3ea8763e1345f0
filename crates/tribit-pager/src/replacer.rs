//! Page replacement policies for the frame pool.

use crate::frame::FrameId;
use parking_lot::Mutex;

/// Trait for page replacement algorithms.
pub trait Replacer: Send + Sync {
    /// Records that the given frame was accessed.
    fn record_access(&self, frame_id: FrameId);

    /// Selects a victim frame for eviction among frames accepted by `can_evict`.
    ///
    /// Returns None if no frame is accepted.
    fn evict(&self, can_evict: &dyn Fn(FrameId) -> bool) -> Option<FrameId>;

    /// Forgets any access history for a frame.
    fn remove(&self, frame_id: FrameId);

    /// Returns the number of frames tracked.
    fn capacity(&self) -> usize;
}

/// Clock replacement algorithm implementation.
///
/// The clock hand sweeps a circular array of reference bits. A frame the
/// predicate accepts with a clear reference bit is the victim; a set bit is
/// cleared and the frame gets a second chance. Two full sweeps are enough to
/// find a victim whenever one exists.
pub struct ClockReplacer {
    inner: Mutex<ClockReplacerInner>,
}

struct ClockReplacerInner {
    /// Reference bits for each frame.
    reference_bits: Vec<bool>,
    /// Current clock hand position.
    clock_hand: usize,
}

impl ClockReplacer {
    /// Creates a new clock replacer with the given number of frames.
    pub fn new(num_frames: usize) -> Self {
        Self {
            inner: Mutex::new(ClockReplacerInner {
                reference_bits: vec![false; num_frames],
                clock_hand: 0,
            }),
        }
    }
}

impl Replacer for ClockReplacer {
    fn record_access(&self, frame_id: FrameId) {
        let mut inner = self.inner.lock();
        if let Some(bit) = inner.reference_bits.get_mut(frame_id.0 as usize) {
            *bit = true;
        }
    }

    fn evict(&self, can_evict: &dyn Fn(FrameId) -> bool) -> Option<FrameId> {
        let mut inner = self.inner.lock();
        let num_frames = inner.reference_bits.len();
        if num_frames == 0 {
            return None;
        }

        for _ in 0..(2 * num_frames) {
            let hand = inner.clock_hand;
            inner.clock_hand = (hand + 1) % num_frames;

            let frame_id = FrameId(hand as u32);
            if !can_evict(frame_id) {
                continue;
            }
            if inner.reference_bits[hand] {
                inner.reference_bits[hand] = false;
            } else {
                return Some(frame_id);
            }
        }
        None
    }

    fn remove(&self, frame_id: FrameId) {
        let mut inner = self.inner.lock();
        if let Some(bit) = inner.reference_bits.get_mut(frame_id.0 as usize) {
            *bit = false;
        }
    }

    fn capacity(&self) -> usize {
        self.inner.lock().reference_bits.len()
    }
}
