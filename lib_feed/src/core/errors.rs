use thiserror::Error;

/// Errors surfaced synchronously by the feed core.
///
/// Connection and decode failures are not in here: those are recovered
/// locally and reported through `StatusSink` and the log, never returned.
#[derive(Debug, Error)]
pub enum FeedError {
    /// A construction-time configuration value is out of range.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// The component needs a Tokio runtime and none is running on this thread.
    #[error("No Tokio runtime available: {0}")]
    RuntimeUnavailable(#[from] tokio::runtime::TryCurrentError),

    /// `add_item` was called after `destroy`.
    #[error("Batcher has been destroyed; item rejected")]
    BatcherDestroyed,
}
