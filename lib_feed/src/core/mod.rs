//! # Core Vocabulary Module
//!
//! Everything the transport and the batcher agree on without depending on each
//! other. Nothing in here performs I/O.
//!
//! ## Core Components:
//!
//! - **`status`**: the one canonical `ConnectionState` taxonomy.
//! - **`sinks`**: the capabilities through which side effects leave the core
//!   (`StatusSink`, `MessageSink`, `BatchSink`). Closures implement them, so
//!   tests can pass fakes directly.
//! - **`scheduler`**: the host-provided cooperative scheduling capability.
//!   The transport's reconnection wait and the batcher's inter-chunk yield are
//!   the only places the core defers work, and both go through it.
//! - **`errors`**: the crate-wide `FeedError`.

#![warn(missing_docs, rust_2018_idioms, unused_qualifications)]

/// Crate-wide error type.
pub mod errors;
/// Host-provided scheduling capability and its Tokio and manual implementations.
pub mod scheduler;
/// Side-effect capabilities injected into the transport and the batcher.
pub mod sinks;
/// The connection state taxonomy.
pub mod status;

// --- Public API Re-exports ---
pub use errors::FeedError;
pub use scheduler::{ManualScheduler, Scheduler, Task, TaskToken, TokioScheduler, Wake};
pub use sinks::{BatchSink, MessageSink, StatusSink};
pub use status::ConnectionState;
