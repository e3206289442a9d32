//! Local WebSocket news source for exercising `server_news` under load.

use anyhow::Result;
use axum::{
    Router,
    extract::{
        State,
        ws::{CloseFrame, Message, WebSocket, WebSocketUpgrade},
    },
    response::IntoResponse,
    routing::get,
};
use chrono::Utc;
use clap::Parser;
use futures_util::StreamExt;
use rand::rngs::StdRng;
use rand::seq::IndexedRandom;
use rand::{Rng, SeedableRng};
use serde_json::{Value, json};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;

#[path = "news_logic/logger.rs"]
mod logger;

const SOURCES: &[&str] = &["Reuters", "Bloomberg", "CoinDesk", "The Block", "Decrypt", "Cointelegraph"];
const ASSETS: &[&str] = &["BTC", "ETH", "SOL", "XRP", "DOGE", "ADA", "AVAX", "LINK", "DOT"];
const KEYWORDS: &[&str] = &["etf", "regulation", "hack", "listing", "rally", "selloff", "upgrade", "airdrop"];
const VERBS: &[&str] = &["surges", "slides", "steadies", "rebounds", "stalls", "breaks out"];

#[derive(Parser, Debug, Clone)]
#[command(about = "Emits synthetic news items over WebSocket", version)]
struct Args {
    #[arg(long, env = "EMITTER_PORT", default_value_t = 8080)]
    port: u16,

    #[arg(long, env = "EMITTER_RATE", default_value_t = 50, help = "News items per second per connection.")]
    rate: u32,

    #[arg(long, env = "EMITTER_HANDSHAKE", default_value = "hello", help = "Client greeting that is logged; no reply is sent.")]
    handshake: String,

    #[arg(long, env = "EMITTER_MALFORMED_EVERY", help = "Send an undecodable frame every N items.")]
    malformed_every: Option<u64>,

    #[arg(long, env = "EMITTER_DROP_AFTER_SECONDS", help = "Close each connection abnormally after this many seconds.")]
    drop_after_seconds: Option<u64>,

    #[arg(long, env = "EMITTER_LOG_DIR", default_value = "./logs")]
    log_dir: PathBuf,

    #[arg(long, env = "EMITTER_LOG_LEVEL", default_value = "info")]
    log_level: String,
}

struct EmitterState {
    args: Args,
    next_id: AtomicU64,
    clients: AtomicUsize,
}

fn random_item(rng: &mut StdRng, id: u64) -> Value {
    let asset_count = rng.random_range(1..=3);
    // Repeats are intentional; the consumer dedups.
    let assets: Vec<&str> = (0..asset_count)
        .filter_map(|_| ASSETS.choose(rng).copied())
        .collect();
    let keyword_count = rng.random_range(0..=3);
    let keywords: Vec<&str> = (0..keyword_count)
        .filter_map(|_| KEYWORDS.choose(rng).copied())
        .collect();
    let lead = assets.first().copied().unwrap_or("BTC");
    let verb = VERBS.choose(rng).copied().unwrap_or("moves");

    let mut item = json!({
        "id": format!("emitter-{}", id),
        "source": SOURCES.choose(rng).copied().unwrap_or("Wire"),
        "headline": format!("{} {} as traders watch {}", lead, verb, keywords.first().copied().unwrap_or("the tape")),
        "assets": assets,
        "keywords": keywords,
        "timestamp": Utc::now().timestamp_millis(),
    });
    if rng.random_bool(0.3) {
        item["link"] = json!(format!("https://news.example/{}", id));
    }
    if rng.random_bool(0.1) {
        item["priority"] = json!("high");
    }
    item
}

/// Tick period and items per tick for `rate` items per second. Past 1000/s
/// the tick stays between 1ms and 2ms and the period stretches so no rate is lost.
fn emit_schedule(rate: u32) -> (Duration, u32) {
    let rate = rate.max(1);
    let burst = rate.div_ceil(1000);
    (Duration::from_secs_f64(f64::from(burst) / f64::from(rate)), burst)
}

/// The next outbound frame. Clients only ever see news items or, when
/// configured, a deliberately broken item.
fn next_frame(rng: &mut StdRng, sent: u64, malformed_every: Option<u64>, id: u64) -> String {
    match malformed_every {
        Some(every) if every > 0 && sent % every == 0 => "{\"id\": broken".to_string(),
        _ => random_item(rng, id).to_string(),
    }
}

async fn ws_handler(ws: WebSocketUpgrade, State(state): State<Arc<EmitterState>>) -> impl IntoResponse {
    ws.on_upgrade(|socket| handle_socket(socket, state))
}

async fn health_handler() -> impl IntoResponse {
    (axum::http::StatusCode::OK, "OK")
}

async fn handle_socket(mut socket: WebSocket, state: Arc<EmitterState>) {
    let clients = state.clients.fetch_add(1, Ordering::Relaxed) + 1;
    log::info!("Client connected ({} active)", clients);

    let mut rng = StdRng::from_rng(&mut rand::rng());
    let (period, burst) = emit_schedule(state.args.rate);
    let mut ticker = tokio::time::interval(period);
    let drop_after = state.args.drop_after_seconds.map(Duration::from_secs);
    let forced_drop = async {
        match drop_after {
            Some(after) => tokio::time::sleep(after).await,
            None => std::future::pending::<()>().await,
        }
    };
    tokio::pin!(forced_drop);
    let mut sent: u64 = 0;

    loop {
        tokio::select! {
            incoming = socket.next() => {
                match incoming {
                    Some(Ok(Message::Text(text))) => {
                        if text.as_str() == state.args.handshake {
                            log::info!("Handshake received");
                        } else {
                            log::debug!("Ignoring client text: {}", text.as_str());
                        }
                    }
                    Some(Ok(Message::Close(_))) | None | Some(Err(_)) => break,
                    Some(Ok(_)) => {}
                }
            }
            _ = ticker.tick() => {
                let mut failed = false;
                for _ in 0..burst {
                    sent += 1;
                    let id = state.next_id.fetch_add(1, Ordering::Relaxed);
                    let frame = next_frame(&mut rng, sent, state.args.malformed_every, id);
                    if socket.send(Message::Text(frame.into())).await.is_err() {
                        failed = true;
                        break;
                    }
                }
                if failed {
                    break;
                }
            }
            _ = &mut forced_drop => {
                log::info!("Forcing disconnect after {} frames", sent);
                let _ = socket
                    .send(Message::Close(Some(CloseFrame {
                        code: 1012,
                        reason: "Emitter restart".into(),
                    })))
                    .await;
                break;
            }
        }
    }

    let clients = state.clients.fetch_sub(1, Ordering::Relaxed) - 1;
    log::info!("Client disconnected after {} frames ({} active)", sent, clients);
}

#[tokio::main]
async fn main() -> Result<()> {
    let _ = dotenvy::dotenv();
    let args = Args::parse();
    logger::setup_logging("news_emitter", &args.log_dir, &args.log_level)?;

    let addr = SocketAddr::from(([0, 0, 0, 0], args.port));
    log::info!(
        "News emitter listening on {} ({} items/s per client, malformed every {:?}, drop after {:?}s)",
        addr,
        args.rate,
        args.malformed_every,
        args.drop_after_seconds
    );

    let state = Arc::new(EmitterState {
        args,
        next_id: AtomicU64::new(1),
        clients: AtomicUsize::new(0),
    });
    let app = Router::new()
        .route("/", get(ws_handler))
        .route("/health", get(health_handler))
        .with_state(state);

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            log::info!("Ctrl-C received, emitter shutting down.");
        })
        .await?;
    Ok(())
}
