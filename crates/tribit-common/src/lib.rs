//! tribit common types, errors, and utilities.
//!
//! This crate provides shared definitions used by the page store and the
//! bitmap index.

pub mod config;
pub mod error;
pub mod page;

pub use config::PagerConfig;
pub use error::{Result, TribitError};
pub use page::{Page, PageHandle, PAGE_SIZE, PAGE_WORDS};
