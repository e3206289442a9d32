use chrono::{Duration, Utc};
use clap::Parser;
use lib_feed::{
    BatchConfig, Batcher, ConnectionState, ReconnectPolicy, Scheduler, TokioScheduler, Transport,
    TransportConfig,
};
use serde::Deserialize;
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use tokio::time::sleep;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Feed URL
    #[arg(short, long, default_value = "ws://127.0.0.1:8080")]
    url: String,

    /// Payload sent right after connecting
    #[arg(long, default_value = "hello")]
    handshake: String,

    /// Report interval in seconds
    #[arg(short, long, default_value_t = 60)]
    report_interval_seconds: u64,

    /// Maximum items per delivered batch
    #[arg(long, default_value_t = 100)]
    max_batch_size: usize,
}

#[derive(Debug, Deserialize)]
struct FeedRecord {
    source: String,
}

/// Hands one record to the batcher. A rejected record is logged, never
/// dropped silently.
fn forward_record(batcher: &Batcher<FeedRecord>, record: FeedRecord) -> bool {
    match batcher.add_item(record) {
        Ok(()) => true,
        Err(e) => {
            log::warn!("Dropping feed record: {}", e);
            false
        }
    }
}

struct Stats {
    global_timestamps: VecDeque<chrono::DateTime<Utc>>,
    source_timestamps: HashMap<String, VecDeque<chrono::DateTime<Utc>>>,
    batches: u64,
    largest_batch: usize,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    let _ = env_logger::builder().filter_level(log::LevelFilter::Info).try_init();

    let stats = Arc::new(Mutex::new(Stats {
        global_timestamps: VecDeque::new(),
        source_timestamps: HashMap::new(),
        batches: 0,
        largest_batch: 0,
    }));

    // Clone for the reporter task
    let stats_reporter = Arc::clone(&stats);
    let report_interval_seconds = args.report_interval_seconds.max(1);
    tokio::spawn(async move {
        loop {
            sleep(std::time::Duration::from_secs(report_interval_seconds)).await;
            let now = Utc::now();
            let one_minute_ago = now - Duration::minutes(1);

            let mut data = stats_reporter.lock().unwrap();

            // Clean global
            while data.global_timestamps.front().is_some_and(|&t| t < one_minute_ago) {
                data.global_timestamps.pop_front();
            }
            let global_rate = data.global_timestamps.len();

            // Clean per source and collect rates
            let mut rates: Vec<(String, usize)> = Vec::new();
            for (source, dq) in data.source_timestamps.iter_mut() {
                while dq.front().is_some_and(|&t| t < one_minute_ago) {
                    dq.pop_front();
                }
                if !dq.is_empty() {
                    rates.push((source.clone(), dq.len()));
                }
            }

            // Sort DESC by items/min
            rates.sort_by(|a, b| b.1.cmp(&a.1));

            let report = rates
                .iter()
                .map(|(s, r)| format!("{}: {} items/min", s, r))
                .collect::<Vec<_>>()
                .join(", ");

            println!("\n----- 1-Minute Summary -----");
            println!("Global rate: {} items/min", global_rate);
            println!("Batches: {} (largest {})", data.batches, data.largest_batch);
            println!("Sources: {}", if report.is_empty() { "No data" } else { &report });
            println!("----------------------------\n");
        }
    });

    let scheduler: Arc<dyn Scheduler> = Arc::new(TokioScheduler::new()?);

    let stats_sink = Arc::clone(&stats);
    let batcher = Batcher::new(
        BatchConfig {
            max_batch_size: args.max_batch_size,
            ..BatchConfig::default()
        },
        Arc::clone(&scheduler),
        Arc::new(move |items: Vec<FeedRecord>| -> anyhow::Result<()> {
            let now = Utc::now();
            let mut data = stats_sink.lock().unwrap();
            data.batches += 1;
            data.largest_batch = data.largest_batch.max(items.len());
            for item in items {
                data.global_timestamps.push_back(now);
                data.source_timestamps.entry(item.source).or_default().push_back(now);
            }
            Ok(())
        }),
    )?;

    let forward = batcher.clone();
    let transport = Transport::new(
        TransportConfig::new(args.url.clone())
            .with_handshake(args.handshake.clone())
            .with_reconnect(ReconnectPolicy::default()),
        scheduler,
        Arc::new(move |record: FeedRecord| {
            forward_record(&forward, record);
        }),
        Arc::new(|state: ConnectionState, detail: Option<&str>| match detail {
            Some(detail) => println!("Feed {}: {}", state, detail),
            None => println!("Feed {}", state),
        }),
    )?;

    println!("Connecting to {}... Press Ctrl+C to stop.", args.url);
    transport.connect();

    tokio::signal::ctrl_c().await?;
    transport.disconnect();
    let flushed = batcher.destroy();
    println!("Stopped. Flushed {} buffered items.", flushed);
    Ok(())
}
