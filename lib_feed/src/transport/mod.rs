//! # Transport Module
//!
//! A resilient, state-aware WebSocket client. It owns at most one physical
//! connection at a time, decodes every inbound frame as a self-contained JSON
//! record, and reconnects on abnormal closure within a bounded budget.
//!
//! ## State machine
//!
//! ```text
//!   Closed --connect()--> Connecting --opened--> Open
//!   Connecting --failed--> Closed, then Connecting (retry) or stays Closed (budget spent)
//!   Open --lost--> Closed, then Connecting (retry) or stays Closed (budget spent)
//!   any --disconnect()--> [Closing] --> Closed   (never retried)
//! ```
//!
//! ## Contained Modules:
//! - **`config`**: `TransportConfig` and `ReconnectPolicy`.
//! - **`ws_transport`**: the `Transport` itself.

#![warn(missing_docs, rust_2018_idioms, unused_qualifications)]

/// Endpoint, handshake and reconnection settings.
pub mod config;
/// The reconnecting connection state machine.
pub mod ws_transport;

// --- Public API Re-exports ---
pub use config::{Backoff, ReconnectPolicy, TransportConfig};
pub use ws_transport::Transport;
