//! # lib_feed
//!
//! Ingestion core for high-frequency record feeds. Two independent halves live
//! here and are wired together by the host application:
//!
//! - **`transport`**: keeps a logical, always-on WebSocket connection over an
//!   unreliable physical one, decoding every inbound frame into a typed record.
//! - **`batcher`**: absorbs arbitrarily bursty arrivals and hands them to a
//!   consumer in bounded chunks, on a cooperative schedule.
//!
//! Both halves speak the shared vocabulary from **`core`**: the connection
//! state taxonomy, the sink capabilities used to deliver side effects, and the
//! `Scheduler` capability through which every deferred piece of work re-enters.

#![forbid(unsafe_code)]
#![warn(rust_2018_idioms, unused_qualifications)]

#[cfg(feature = "core")]
pub mod core;

#[cfg(feature = "transport")]
pub mod transport;

#[cfg(feature = "batcher")]
pub mod batcher;

// --- Public API Re-exports ---
#[cfg(feature = "core")]
pub use crate::core::{
    BatchSink, ConnectionState, FeedError, ManualScheduler, MessageSink, Scheduler, StatusSink,
    TaskToken, TokioScheduler, Wake,
};

#[cfg(feature = "transport")]
pub use crate::transport::{Backoff, ReconnectPolicy, Transport, TransportConfig};

#[cfg(feature = "batcher")]
pub use crate::batcher::{BatchConfig, Batcher, FlushMode};
