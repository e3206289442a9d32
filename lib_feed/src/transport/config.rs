use std::time::Duration;

use url::Url;

use crate::core::errors::FeedError;

/// How the wait between reconnection attempts grows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Backoff {
    /// Every attempt waits the base delay.
    #[default]
    Fixed,
    /// The base delay doubles with each consecutive attempt, capped at
    /// `max_delay`.
    Exponential {
        /// Upper bound on any single wait.
        max_delay: Duration,
    },
}

/// Reconnection budget and pacing.
///
/// The attempt counter lives in the transport: it increments on each abnormal
/// closure and resets to zero whenever a connection opens.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconnectPolicy {
    /// Base wait between attempts.
    pub delay: Duration,
    /// Consecutive failures tolerated before settling into `Closed`.
    pub max_attempts: u32,
    /// Growth of the wait across attempts.
    pub backoff: Backoff,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self::fixed(Duration::from_millis(3000), 5)
    }
}

impl ReconnectPolicy {
    /// Constant delay between attempts.
    pub fn fixed(delay: Duration, max_attempts: u32) -> Self {
        Self {
            delay,
            max_attempts,
            backoff: Backoff::Fixed,
        }
    }

    /// Doubling delay between attempts, capped at `max_delay`.
    pub fn exponential(delay: Duration, max_delay: Duration, max_attempts: u32) -> Self {
        Self {
            delay,
            max_attempts,
            backoff: Backoff::Exponential { max_delay },
        }
    }

    /// Whether another attempt is allowed after `attempts` consecutive failures.
    pub fn should_retry(&self, attempts: u32) -> bool {
        attempts < self.max_attempts
    }

    /// Wait before the `attempt`-th reconnection (1-based).
    pub fn delay_for(&self, attempt: u32) -> Duration {
        match self.backoff {
            Backoff::Fixed => self.delay,
            Backoff::Exponential { max_delay } => {
                let factor = 1u32
                    .checked_shl(attempt.saturating_sub(1))
                    .unwrap_or(u32::MAX);
                self.delay.saturating_mul(factor).min(max_delay)
            }
        }
    }
}

/// Construction-time configuration for a `Transport`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportConfig {
    /// `ws://` or `wss://` endpoint.
    pub url: String,
    /// Sent once, first, every time the connection opens.
    pub handshake: Option<String>,
    /// Reconnection budget and pacing.
    pub reconnect: ReconnectPolicy,
}

impl TransportConfig {
    /// Configuration with the default reconnect policy and no handshake.
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            handshake: None,
            reconnect: ReconnectPolicy::default(),
        }
    }

    /// Sets the payload sent as soon as each connection opens.
    pub fn with_handshake(mut self, payload: impl Into<String>) -> Self {
        self.handshake = Some(payload.into());
        self
    }

    /// Replaces the reconnect policy.
    pub fn with_reconnect(mut self, policy: ReconnectPolicy) -> Self {
        self.reconnect = policy;
        self
    }

    /// Checks the URL scheme and the reconnect delay.
    pub fn validate(&self) -> Result<(), FeedError> {
        let url = Url::parse(&self.url)
            .map_err(|e| FeedError::InvalidConfig(format!("url '{}': {}", self.url, e)))?;
        if !matches!(url.scheme(), "ws" | "wss") {
            return Err(FeedError::InvalidConfig(format!(
                "url '{}' must use ws:// or wss://",
                self.url
            )));
        }
        if self.reconnect.delay.is_zero() {
            return Err(FeedError::InvalidConfig(
                "reconnect delay must be greater than zero".to_string(),
            ));
        }
        if let Backoff::Exponential { max_delay } = self.reconnect.backoff {
            if max_delay < self.reconnect.delay {
                return Err(FeedError::InvalidConfig(
                    "reconnect max delay must not be below the base delay".to_string(),
                ));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fixed_policy_keeps_delay_and_budget() {
        let policy = ReconnectPolicy::fixed(Duration::from_millis(100), 2);
        assert_eq!(policy.delay_for(1), Duration::from_millis(100));
        assert_eq!(policy.delay_for(7), Duration::from_millis(100));
        assert!(policy.should_retry(0));
        assert!(policy.should_retry(1));
        assert!(!policy.should_retry(2));
    }

    #[test]
    fn zero_attempts_never_retries() {
        let policy = ReconnectPolicy::fixed(Duration::from_millis(100), 0);
        assert!(!policy.should_retry(0));
    }

    #[test]
    fn exponential_policy_doubles_and_caps() {
        let policy = ReconnectPolicy::exponential(
            Duration::from_millis(1000),
            Duration::from_millis(60_000),
            10,
        );
        assert_eq!(policy.delay_for(1), Duration::from_millis(1000));
        assert_eq!(policy.delay_for(2), Duration::from_millis(2000));
        assert_eq!(policy.delay_for(4), Duration::from_millis(8000));
        assert_eq!(policy.delay_for(7), Duration::from_millis(60_000));
        assert_eq!(policy.delay_for(40), Duration::from_millis(60_000));
    }

    #[test]
    fn config_accepts_websocket_urls_only() {
        assert!(TransportConfig::new("ws://localhost:8080").validate().is_ok());
        assert!(TransportConfig::new("wss://feed.example.com/news")
            .validate()
            .is_ok());
        assert!(matches!(
            TransportConfig::new("http://localhost:8080").validate(),
            Err(FeedError::InvalidConfig(_))
        ));
        assert!(TransportConfig::new("not a url").validate().is_err());
    }

    #[test]
    fn config_rejects_zero_delay() {
        let config = TransportConfig::new("ws://localhost:8080")
            .with_reconnect(ReconnectPolicy::fixed(Duration::ZERO, 3));
        assert!(config.validate().is_err());
    }

    #[test]
    fn defaults_follow_feed_settings() {
        let config = TransportConfig::new("ws://localhost:8080").with_handshake("hello");
        assert_eq!(config.handshake.as_deref(), Some("hello"));
        assert_eq!(config.reconnect.delay, Duration::from_millis(3000));
        assert_eq!(config.reconnect.max_attempts, 5);
        assert_eq!(config.reconnect.backoff, Backoff::Fixed);
    }
}
