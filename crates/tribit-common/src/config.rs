//! Configuration structures for tribit.

use crate::error::{Result, TribitError};
use crate::page::PAGE_SIZE;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use sysinfo::System;

/// Smallest frame pool that still leaves room for a bitmap walk plus eviction.
pub const MIN_FRAMES: usize = 8;

/// Page store configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PagerConfig {
    /// Directory holding the page file.
    pub data_dir: PathBuf,
    /// Name of the page file inside `data_dir`.
    pub file_name: String,
    /// Number of in-memory frames (resident pages).
    pub num_frames: usize,
    /// Enable fsync after page write-back.
    pub fsync_enabled: bool,
}

impl Default for PagerConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("./data"),
            file_name: "pages.tbt".to_string(),
            num_frames: 1024, // 4 MB with 4 KB pages
            fsync_enabled: true,
        }
    }
}

impl PagerConfig {
    /// Returns a configuration with the frame pool sized to 25% of available RAM.
    ///
    /// Minimum 1,000 frames so small machines still cache a useful working set.
    pub fn auto_sized() -> Self {
        let mut sys = System::new_all();
        sys.refresh_memory();

        let available_bytes = sys.available_memory() as usize;
        let target_bytes = available_bytes / 4;
        let num_frames = (target_bytes / PAGE_SIZE).max(1_000);

        Self {
            num_frames,
            ..Default::default()
        }
    }

    /// Returns the total frame pool size in bytes.
    pub fn buffer_pool_size_bytes(&self) -> usize {
        self.num_frames * PAGE_SIZE
    }

    /// Returns the full path of the page file.
    pub fn file_path(&self) -> PathBuf {
        self.data_dir.join(&self.file_name)
    }

    /// Checks the configuration for values the page store cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.num_frames < MIN_FRAMES {
            return Err(TribitError::InvalidParameter {
                name: "num_frames".to_string(),
                value: self.num_frames.to_string(),
            });
        }
        if self.file_name.is_empty() {
            return Err(TribitError::ConfigError("empty file_name".to_string()));
        }
        Ok(())
    }
}
