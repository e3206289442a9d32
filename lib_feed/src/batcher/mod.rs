//! # Batcher Module
//!
//! Adaptive chunked delivery. Items go in one at a time from any source; they
//! come out as bounded, ordered batches on a cooperative schedule chosen at
//! construction (`FlushMode::Immediate` or `FlushMode::Periodic`).
//!
//! The batcher does not know where items come from. In the news pipeline the
//! transport's message sink feeds it, but nothing here depends on that.

#![warn(missing_docs, rust_2018_idioms, unused_qualifications)]

/// The chunking scheduler itself.
pub mod buffer;
/// Construction-time configuration.
pub mod config;

// --- Public API Re-exports ---
pub use buffer::Batcher;
pub use config::{BatchConfig, FlushMode};
