use std::time::Duration;

use crate::core::errors::FeedError;

/// How the next processing cycle is scheduled after items arrive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FlushMode {
    /// Next tick boundary the host exposes. Minimal added latency for
    /// continuous-rate streams.
    #[default]
    Immediate,
    /// A fixed `flush_interval` later. Rate-limits delivery regardless of how
    /// bursty arrivals are.
    Periodic,
}

/// Construction-time configuration for a `Batcher`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchConfig {
    /// Cap on items delivered per chunk.
    pub max_batch_size: usize,
    /// Wall-clock cap on assembling one chunk before yielding.
    pub max_processing_time: Duration,
    /// Delay before a cycle starts in `FlushMode::Periodic`.
    pub flush_interval: Duration,
    /// Scheduling mode.
    pub mode: FlushMode,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            max_batch_size: 100,
            max_processing_time: Duration::from_millis(8),
            flush_interval: Duration::from_millis(100),
            mode: FlushMode::Immediate,
        }
    }
}

impl BatchConfig {
    /// Immediate-mode configuration with the given chunk caps.
    pub fn immediate(max_batch_size: usize, max_processing_time: Duration) -> Self {
        Self {
            max_batch_size,
            max_processing_time,
            ..Self::default()
        }
    }

    /// Periodic-mode configuration with the given chunk caps and interval.
    pub fn periodic(
        max_batch_size: usize,
        max_processing_time: Duration,
        flush_interval: Duration,
    ) -> Self {
        Self {
            max_batch_size,
            max_processing_time,
            flush_interval,
            mode: FlushMode::Periodic,
        }
    }

    /// Rejects zero caps, and a zero interval in periodic mode.
    pub fn validate(&self) -> Result<(), FeedError> {
        if self.max_batch_size == 0 {
            return Err(FeedError::InvalidConfig(
                "max_batch_size must be greater than zero".to_string(),
            ));
        }
        if self.max_processing_time.is_zero() {
            return Err(FeedError::InvalidConfig(
                "max_processing_time must be greater than zero".to_string(),
            ));
        }
        if self.mode == FlushMode::Periodic && self.flush_interval.is_zero() {
            return Err(FeedError::InvalidConfig(
                "flush_interval must be greater than zero in periodic mode".to_string(),
            ));
        }
        Ok(())
    }
}
