//! # Sink Capabilities
//!
//! The narrow interfaces through which the core hands results to the outside
//! world. Hosts typically forward each call into a single serialized entry
//! point (one channel per store) so that callbacks firing from different
//! tasks never mutate shared state concurrently.
//!
//! Every trait has a blanket implementation for plain closures.

use std::error::Error;

use super::status::ConnectionState;

/// Receives every connection state transition, in the order they occur.
pub trait StatusSink: Send + Sync {
    /// Called once per transition. `detail` carries the failure reason or the
    /// retry schedule when there is one.
    fn on_status(&self, state: ConnectionState, detail: Option<&str>);
}

impl<F> StatusSink for F
where
    F: Fn(ConnectionState, Option<&str>) + Send + Sync,
{
    fn on_status(&self, state: ConnectionState, detail: Option<&str>) {
        self(state, detail)
    }
}

/// Receives every successfully decoded inbound record, in arrival order.
pub trait MessageSink<T>: Send + Sync {
    /// Called once per decoded record.
    fn on_message(&self, item: T);

    /// Called when an inbound frame could not be decoded. The frame has
    /// already been dropped and logged; the connection is unaffected.
    fn on_decode_error(&self, _raw: &str, _error: &dyn Error) {}
}

impl<T, F> MessageSink<T> for F
where
    F: Fn(T) + Send + Sync,
{
    fn on_message(&self, item: T) {
        self(item)
    }
}

/// Consumer of bounded batches emitted by the batcher.
///
/// Never called with an empty batch. An `Err` is logged and the batch counts
/// as delivered; it is not retried.
pub trait BatchSink<T>: Send + Sync {
    /// Delivers one chunk of items, in arrival order.
    fn deliver(&self, items: Vec<T>) -> anyhow::Result<()>;
}

impl<T, F> BatchSink<T> for F
where
    F: Fn(Vec<T>) -> anyhow::Result<()> + Send + Sync,
{
    fn deliver(&self, items: Vec<T>) -> anyhow::Result<()> {
        self(items)
    }
}
