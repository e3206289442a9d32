use crate::news_logic::model::NewsItem;
use anyhow::anyhow;
use lib_feed::{BatchSink, ConnectionState, StatusSink};
use std::collections::{BTreeSet, VecDeque};
use std::time::Instant;
use tokio::sync::{mpsc, watch};

/// Everything that mutates the store goes through one of these, in order.
#[derive(Debug)]
pub enum StoreCommand {
    Batch(Vec<NewsItem>),
    Status(ConnectionState, Option<String>),
    /// Stop the store loop after everything queued before it.
    Close,
}

/// Point-in-time summary published after every command.
#[derive(Debug, Clone, PartialEq)]
pub struct StoreStats {
    pub stored: usize,
    pub received: u64,
    pub batches: u64,
    pub evicted: u64,
    pub assets: usize,
    pub sources: usize,
    pub keywords: usize,
    pub status: ConnectionState,
    pub status_detail: Option<String>,
    pub last_item_at: Option<Instant>,
}

/// In-memory news state: newest-first items plus the facet sets seen so far.
pub struct NewsStore {
    items: VecDeque<NewsItem>,
    max_items: usize,
    assets: BTreeSet<String>,
    sources: BTreeSet<String>,
    keywords: BTreeSet<String>,
    status: ConnectionState,
    status_detail: Option<String>,
    received: u64,
    batches: u64,
    evicted: u64,
    last_item_at: Option<Instant>,
}

impl NewsStore {
    pub fn new(max_items: usize) -> Self {
        Self {
            items: VecDeque::new(),
            max_items,
            assets: BTreeSet::new(),
            sources: BTreeSet::new(),
            keywords: BTreeSet::new(),
            status: ConnectionState::Closed,
            status_detail: None,
            received: 0,
            batches: 0,
            evicted: 0,
            last_item_at: None,
        }
    }

    pub fn apply(&mut self, command: StoreCommand) {
        match command {
            StoreCommand::Batch(items) => self.ingest(items),
            StoreCommand::Status(status, detail) => self.set_status(status, detail),
            StoreCommand::Close => {}
        }
    }

    /// Each item goes to the front, so the last item of a batch ends up first.
    pub fn ingest(&mut self, items: Vec<NewsItem>) {
        if items.is_empty() {
            return;
        }
        self.batches += 1;
        self.received += items.len() as u64;
        self.last_item_at = Some(Instant::now());

        for item in items {
            self.assets.extend(item.assets.iter().cloned());
            self.sources.insert(item.source.clone());
            self.keywords.extend(item.keywords.iter().cloned());
            self.items.push_front(item);
        }

        if self.items.len() > self.max_items {
            let overflow = self.items.len() - self.max_items;
            self.items.truncate(self.max_items);
            self.evicted += overflow as u64;
        }
    }

    pub fn set_status(&mut self, status: ConnectionState, detail: Option<String>) {
        match &detail {
            Some(detail) => log::info!("News feed {}: {}", status, detail),
            None => log::info!("News feed {}", status),
        }
        self.status = status;
        self.status_detail = detail;
    }

    /// Newest first.
    pub fn items(&self) -> impl Iterator<Item = &NewsItem> {
        self.items.iter()
    }

    pub fn assets(&self) -> &BTreeSet<String> {
        &self.assets
    }

    pub fn sources(&self) -> &BTreeSet<String> {
        &self.sources
    }

    pub fn keywords(&self) -> &BTreeSet<String> {
        &self.keywords
    }

    pub fn status(&self) -> ConnectionState {
        self.status
    }

    pub fn stats(&self) -> StoreStats {
        StoreStats {
            stored: self.items.len(),
            received: self.received,
            batches: self.batches,
            evicted: self.evicted,
            assets: self.assets.len(),
            sources: self.sources.len(),
            keywords: self.keywords.len(),
            status: self.status,
            status_detail: self.status_detail.clone(),
            last_item_at: self.last_item_at,
        }
    }
}

/// Sender side of the store channel, handed to the batcher and the transport.
#[derive(Clone)]
pub struct StoreHandle {
    tx: mpsc::UnboundedSender<StoreCommand>,
}

impl StoreHandle {
    pub fn close(&self) {
        let _ = self.tx.send(StoreCommand::Close);
    }
}

impl BatchSink<NewsItem> for StoreHandle {
    fn deliver(&self, items: Vec<NewsItem>) -> anyhow::Result<()> {
        let count = items.len();
        self.tx
            .send(StoreCommand::Batch(items))
            .map_err(|_| anyhow!("News store is closed; dropped {} items", count))
    }
}

impl StatusSink for StoreHandle {
    fn on_status(&self, state: ConnectionState, detail: Option<&str>) {
        if self
            .tx
            .send(StoreCommand::Status(state, detail.map(str::to_owned)))
            .is_err()
        {
            log::debug!("News store closed; status {} not recorded.", state);
        }
    }
}

pub fn channel() -> (StoreHandle, mpsc::UnboundedReceiver<StoreCommand>) {
    let (tx, rx) = mpsc::unbounded_channel();
    (StoreHandle { tx }, rx)
}

/// Applies commands until `Close` arrives or every handle is gone, then hands
/// the store back.
pub async fn run(
    mut store: NewsStore,
    mut rx: mpsc::UnboundedReceiver<StoreCommand>,
    stats_tx: watch::Sender<StoreStats>,
) -> NewsStore {
    while let Some(command) = rx.recv().await {
        let closing = matches!(command, StoreCommand::Close);
        store.apply(command);
        let _ = stats_tx.send(store.stats());
        if closing {
            break;
        }
    }
    log::info!(
        "News store stopped with {} items ({} received in {} batches).",
        store.items.len(),
        store.received,
        store.batches
    );
    store
}
