use crate::news_logic::config::Config;
use crate::news_logic::model::NewsItem;
use crate::news_logic::store::{self, NewsStore, StoreHandle, StoreStats};
use anyhow::{Context, Result};
use lib_feed::{Batcher, MessageSink, Scheduler, TokioScheduler, Transport};
use std::error::Error;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::watch;
use tokio::task::JoinHandle;

/// Normalises every decoded record and hands it to the batcher.
struct FeedForwarder {
    batcher: Batcher<NewsItem>,
    decode_errors: Arc<AtomicU64>,
}

impl MessageSink<NewsItem> for FeedForwarder {
    fn on_message(&self, item: NewsItem) {
        if let Err(e) = self.batcher.add_item(item.normalize()) {
            log::warn!("Dropping news item: {}", e);
        }
    }

    fn on_decode_error(&self, _raw: &str, _error: &dyn Error) {
        self.decode_errors.fetch_add(1, Ordering::Relaxed);
    }
}

/// Transport -> batcher -> store, wired together.
pub struct NewsPipeline {
    transport: Transport<NewsItem>,
    batcher: Batcher<NewsItem>,
    store: StoreHandle,
    store_task: JoinHandle<NewsStore>,
    stats: watch::Receiver<StoreStats>,
    decode_errors: Arc<AtomicU64>,
}

impl NewsPipeline {
    /// Builds every stage and starts connecting. Must run inside a Tokio
    /// runtime.
    pub fn start(config: &Config) -> Result<Self> {
        let scheduler: Arc<dyn Scheduler> =
            Arc::new(TokioScheduler::new()?.with_frame_interval(config.frame_interval()));

        let news_store = NewsStore::new(config.max_news_items());
        let (stats_tx, stats) = watch::channel(news_store.stats());
        let (store, rx) = store::channel();
        let store_task = tokio::spawn(store::run(news_store, rx, stats_tx));

        let batcher = Batcher::new(
            config.batch_config()?,
            Arc::clone(&scheduler),
            Arc::new(store.clone()),
        )
        .context("Failed to create news batcher")?;

        let decode_errors = Arc::new(AtomicU64::new(0));
        let forwarder = FeedForwarder {
            batcher: batcher.clone(),
            decode_errors: Arc::clone(&decode_errors),
        };
        let transport = Transport::new(
            config.transport_config(),
            scheduler,
            Arc::new(forwarder),
            Arc::new(store.clone()),
        )
        .context("Failed to create news transport")?;

        log::info!(
            "Connecting to news feed at {} (batch size {}, mode {:?}).",
            transport.config().url,
            batcher.config().max_batch_size,
            batcher.config().mode
        );
        transport.connect();

        Ok(Self {
            transport,
            batcher,
            store,
            store_task,
            stats,
            decode_errors,
        })
    }

    pub fn stats(&self) -> watch::Receiver<StoreStats> {
        self.stats.clone()
    }

    pub fn transport(&self) -> &Transport<NewsItem> {
        &self.transport
    }

    /// Items received by the transport but not yet in the store.
    pub fn backlog(&self) -> usize {
        self.batcher.len()
    }

    pub fn decode_errors(&self) -> u64 {
        self.decode_errors.load(Ordering::Relaxed)
    }

    /// Disconnects, delivers whatever the batcher still holds and waits for
    /// the store to apply it.
    pub async fn shutdown(self) -> Result<NewsStore> {
        self.transport.disconnect();
        let flushed = self.batcher.destroy();
        log::info!("Flushed {} buffered news items on shutdown.", flushed);

        self.store.close();
        let store = self
            .store_task
            .await
            .context("News store task failed")?;
        Ok(store)
    }
}
