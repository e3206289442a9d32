use crate::news_logic::config::Config;
use crate::news_logic::store::StoreStats;
use std::time::{Duration, Instant};
use tokio::sync::{broadcast, watch};
use tokio::time::interval;

/// Whether the feed has been silent for longer than `threshold` while open.
fn is_stalled(stats: &StoreStats, connected_since: Instant, threshold: Duration, now: Instant) -> bool {
    if !stats.status.is_open() {
        return false;
    }
    let last_activity = stats
        .last_item_at
        .map_or(connected_since, |at| at.max(connected_since));
    now.duration_since(last_activity) > threshold
}

pub async fn run(config: Config, stats: watch::Receiver<StoreStats>, mut shutdown: broadcast::Receiver<()>) {
    let period = config.monitor_interval();
    let threshold = config.inactivity_threshold();
    let mut check_interval = interval(period);
    let mut last_received = stats.borrow().received;
    let mut connected_since = Instant::now();
    let mut was_open = false;

    loop {
        tokio::select! {
            _ = shutdown.recv() => {
                log::info!("Monitor service received shutdown signal.");
                break;
            }
            _ = check_interval.tick() => {
                let snapshot = stats.borrow().clone();
                let now = Instant::now();

                if snapshot.status.is_open() && !was_open {
                    connected_since = now;
                }
                was_open = snapshot.status.is_open();

                let delta = snapshot.received.saturating_sub(last_received);
                last_received = snapshot.received;
                log::info!(
                    "Feed {} | {:.1} items/s | stored {} (evicted {}) | {} assets, {} sources, {} keywords",
                    snapshot.status,
                    delta as f64 / period.as_secs_f64(),
                    snapshot.stored,
                    snapshot.evicted,
                    snapshot.assets,
                    snapshot.sources,
                    snapshot.keywords
                );

                if is_stalled(&snapshot, connected_since, threshold, now) {
                    log::warn!(
                        "No news for more than {} seconds while connected.",
                        threshold.as_secs()
                    );
                }
                if !snapshot.status.is_open() {
                    if let Some(detail) = &snapshot.status_detail {
                        log::warn!("Feed not connected: {}", detail);
                    }
                }
            }
        }
    }
}
