use anyhow::{Context, Result, bail};
use clap::Parser;
use lib_feed::{BatchConfig, FlushMode, ReconnectPolicy, TransportConfig};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

const DEFAULT_CONFIG_FILE: &str = "server_news.conf";

#[derive(Parser, Deserialize, Serialize, Debug, Clone, Default, PartialEq)]
#[command(about = "News feed ingestion server", version)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    #[arg(long, env = "NEWS_CONFIG_PATH", help = "Path to the JSON configuration file.")]
    pub config_path: Option<PathBuf>,

    #[arg(long, env = "NEWS_LOG_DIR", help = "Directory for log files.")]
    pub log_dir: Option<PathBuf>,

    #[arg(long, env = "NEWS_LOG_LEVEL", help = "Logging level (trace, debug, info, warn, error).")]
    pub log_level: Option<String>,

    #[arg(long, env = "NEWS_WEBSOCKET_URL", help = "Upstream news WebSocket URL.")]
    pub feed_url: Option<String>,

    #[arg(long, env = "NEWS_WEBSOCKET_HANDSHAKE", help = "Payload sent as soon as the feed connection opens. Empty disables it.")]
    pub handshake: Option<String>,

    #[arg(long, env = "NEWS_RECONNECT_DELAY_MS", help = "Delay in milliseconds between reconnect attempts.")]
    pub reconnect_delay_ms: Option<u64>,

    #[arg(long, env = "NEWS_RECONNECT_MAX_DELAY_MS", help = "Enables exponential backoff capped at this many milliseconds.")]
    pub reconnect_max_delay_ms: Option<u64>,

    #[arg(long, env = "NEWS_MAX_RECONNECT_ATTEMPTS", help = "Consecutive failed attempts before giving up.")]
    pub max_reconnect_attempts: Option<u32>,

    #[arg(long, env = "NEWS_MAX_BATCH_SIZE", help = "Maximum news items delivered to the store per chunk.")]
    pub max_batch_size: Option<usize>,

    #[arg(long, env = "NEWS_MAX_PROCESSING_TIME_MS", help = "Time slice in milliseconds for assembling one chunk.")]
    pub max_processing_time_ms: Option<u64>,

    #[arg(long, env = "NEWS_FLUSH_INTERVAL_MS", help = "Delay in milliseconds between cycles in periodic mode.")]
    pub flush_interval_ms: Option<u64>,

    #[arg(long, env = "NEWS_FLUSH_MODE", help = "Batch scheduling mode (immediate, periodic).")]
    pub flush_mode: Option<String>,

    #[arg(long, env = "NEWS_FRAME_INTERVAL_MS", help = "Tick cadence in milliseconds for immediate mode. 0 runs on the next runtime turn.")]
    pub frame_interval_ms: Option<u64>,

    #[arg(long, env = "NEWS_MAX_ITEMS", help = "Maximum number of news items kept in memory.")]
    pub max_news_items: Option<usize>,

    #[arg(long, env = "NEWS_MONITOR_INTERVAL_SECONDS", help = "Interval in seconds between throughput reports.")]
    pub monitor_interval_seconds: Option<u64>,

    #[arg(long, env = "NEWS_INACTIVITY_THRESHOLD_SECONDS", help = "Seconds without news while connected before warning.")]
    pub inactivity_threshold_seconds: Option<u64>,
}

impl Config {
    /// Built-in defaults; the lowest-precedence layer.
    pub fn defaults() -> Config {
        Config {
            config_path: None,
            log_dir: Some(PathBuf::from("./logs")),
            log_level: Some("info".to_string()),
            feed_url: Some("ws://localhost:8080".to_string()),
            handshake: Some("hello".to_string()),
            reconnect_delay_ms: Some(3000),
            reconnect_max_delay_ms: None,
            max_reconnect_attempts: Some(5),
            max_batch_size: Some(100),
            max_processing_time_ms: Some(8),
            flush_interval_ms: Some(100),
            flush_mode: Some("immediate".to_string()),
            frame_interval_ms: Some(16),
            // Stress-test sized.
            max_news_items: Some(100_000),
            monitor_interval_seconds: Some(10),
            inactivity_threshold_seconds: Some(60),
        }
    }

    // Merge two Config structs, where 'other' overrides 'self' for Some values
    fn merge(self, other: Config) -> Config {
        Config {
            config_path: other.config_path.or(self.config_path),
            log_dir: other.log_dir.or(self.log_dir),
            log_level: other.log_level.or(self.log_level),
            feed_url: other.feed_url.or(self.feed_url),
            handshake: other.handshake.or(self.handshake),
            reconnect_delay_ms: other.reconnect_delay_ms.or(self.reconnect_delay_ms),
            reconnect_max_delay_ms: other.reconnect_max_delay_ms.or(self.reconnect_max_delay_ms),
            max_reconnect_attempts: other.max_reconnect_attempts.or(self.max_reconnect_attempts),
            max_batch_size: other.max_batch_size.or(self.max_batch_size),
            max_processing_time_ms: other.max_processing_time_ms.or(self.max_processing_time_ms),
            flush_interval_ms: other.flush_interval_ms.or(self.flush_interval_ms),
            flush_mode: other.flush_mode.or(self.flush_mode),
            frame_interval_ms: other.frame_interval_ms.or(self.frame_interval_ms),
            max_news_items: other.max_news_items.or(self.max_news_items),
            monitor_interval_seconds: other.monitor_interval_seconds.or(self.monitor_interval_seconds),
            inactivity_threshold_seconds: other
                .inactivity_threshold_seconds
                .or(self.inactivity_threshold_seconds),
        }
    }

    pub fn log_dir(&self) -> PathBuf {
        self.log_dir.clone().unwrap_or_else(|| PathBuf::from("./logs"))
    }

    pub fn log_level(&self) -> &str {
        self.log_level.as_deref().unwrap_or("info")
    }

    pub fn max_news_items(&self) -> usize {
        self.max_news_items.unwrap_or(100_000)
    }

    pub fn frame_interval(&self) -> Duration {
        Duration::from_millis(self.frame_interval_ms.unwrap_or(0))
    }

    pub fn monitor_interval(&self) -> Duration {
        Duration::from_secs(self.monitor_interval_seconds.unwrap_or(10).max(1))
    }

    pub fn inactivity_threshold(&self) -> Duration {
        Duration::from_secs(self.inactivity_threshold_seconds.unwrap_or(60))
    }

    pub fn flush_mode(&self) -> Result<FlushMode> {
        match self
            .flush_mode
            .as_deref()
            .unwrap_or("immediate")
            .to_lowercase()
            .as_str()
        {
            "immediate" => Ok(FlushMode::Immediate),
            "periodic" => Ok(FlushMode::Periodic),
            other => bail!("Unknown flush mode '{}' (expected immediate or periodic)", other),
        }
    }

    pub fn transport_config(&self) -> TransportConfig {
        let delay = Duration::from_millis(self.reconnect_delay_ms.unwrap_or(3000));
        let attempts = self.max_reconnect_attempts.unwrap_or(5);
        let policy = match self.reconnect_max_delay_ms {
            Some(max_ms) => ReconnectPolicy::exponential(delay, Duration::from_millis(max_ms), attempts),
            None => ReconnectPolicy::fixed(delay, attempts),
        };

        let url = self
            .feed_url
            .clone()
            .unwrap_or_else(|| "ws://localhost:8080".to_string());
        let config = TransportConfig::new(url).with_reconnect(policy);
        match self.handshake.as_deref() {
            Some(handshake) if !handshake.is_empty() => config.with_handshake(handshake),
            _ => config,
        }
    }

    pub fn batch_config(&self) -> Result<BatchConfig> {
        let config = BatchConfig {
            max_batch_size: self.max_batch_size.unwrap_or(100),
            max_processing_time: Duration::from_millis(self.max_processing_time_ms.unwrap_or(8)),
            flush_interval: Duration::from_millis(self.flush_interval_ms.unwrap_or(100)),
            mode: self.flush_mode()?,
        };
        config.validate().context("Invalid batch configuration")?;
        Ok(config)
    }
}

fn read_config_file(path: &Path) -> Result<Config> {
    let config_str = fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;
    serde_json::from_str::<Config>(&config_str)
        .with_context(|| format!("Failed to parse config file: {}", path.display()))
}

/// Layers defaults, the JSON config file and CLI/environment values, in
/// increasing precedence.
pub fn resolve_config(cli_args: Config) -> Config {
    let mut current_config = Config::defaults();

    let config_file_path = cli_args
        .config_path
        .clone()
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_FILE));

    if config_file_path.exists() {
        match read_config_file(&config_file_path) {
            Ok(file_config) => current_config = current_config.merge(file_config),
            Err(e) => log::warn!("{:#}. Falling back to other sources.", e),
        }
    } else {
        log::info!(
            "Config file not found at {}. Using defaults and environment/CLI variables.",
            config_file_path.display()
        );
    }

    // clap::Parser already folded environment variables into the CLI values.
    current_config.merge(cli_args)
}

pub fn load_config() -> Config {
    // A missing .env file is normal.
    let _ = dotenvy::dotenv();
    resolve_config(Config::parse())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn cli_values_override_file_and_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{ "feedUrl": "ws://file:1", "maxBatchSize": 50, "flushMode": "periodic" }}"#
        )
        .unwrap();

        let cli = Config {
            config_path: Some(file.path().to_path_buf()),
            max_batch_size: Some(25),
            ..Default::default()
        };
        let config = resolve_config(cli);

        assert_eq!(config.feed_url.as_deref(), Some("ws://file:1"));
        assert_eq!(config.max_batch_size, Some(25));
        assert_eq!(config.flush_mode().unwrap(), FlushMode::Periodic);
        assert_eq!(config.max_news_items(), 100_000);
    }

    #[test]
    fn unreadable_file_falls_back_to_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "{{ not json").unwrap();

        let cli = Config {
            config_path: Some(file.path().to_path_buf()),
            ..Default::default()
        };
        let config = resolve_config(cli.clone());
        assert_eq!(config, Config::defaults().merge(cli));
    }

    #[test]
    fn builds_library_configs() {
        let config = Config::defaults();
        let transport = config.transport_config();
        assert_eq!(transport.url, "ws://localhost:8080");
        assert_eq!(transport.handshake.as_deref(), Some("hello"));
        assert_eq!(transport.reconnect, ReconnectPolicy::fixed(Duration::from_millis(3000), 5));

        let batch = config.batch_config().unwrap();
        assert_eq!(batch.max_batch_size, 100);
        assert_eq!(batch.max_processing_time, Duration::from_millis(8));
        assert_eq!(batch.mode, FlushMode::Immediate);
    }

    #[test]
    fn max_delay_switches_to_exponential_backoff() {
        let config = Config {
            reconnect_max_delay_ms: Some(60_000),
            handshake: Some(String::new()),
            ..Config::defaults()
        };
        let transport = config.transport_config();
        assert_eq!(
            transport.reconnect,
            ReconnectPolicy::exponential(Duration::from_millis(3000), Duration::from_millis(60_000), 5)
        );
        assert!(transport.handshake.is_none());
    }

    #[test]
    fn rejects_unknown_mode_and_zero_batch() {
        let config = Config {
            flush_mode: Some("sometimes".to_string()),
            ..Config::defaults()
        };
        assert!(config.batch_config().is_err());

        let config = Config {
            max_batch_size: Some(0),
            ..Config::defaults()
        };
        assert!(config.batch_config().is_err());
    }
}
