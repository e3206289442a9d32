use anyhow::Result;
use tokio::signal;

mod news_logic;
use news_logic::{config, logger, monitor, pipeline::NewsPipeline};

#[tokio::main]
async fn main() -> Result<()> {
    let config = config::load_config();
    logger::setup_logging("server_news", &config.log_dir(), config.log_level())?;

    let (shutdown_tx, _) = tokio::sync::broadcast::channel(1);
    let pipeline = NewsPipeline::start(&config)?;

    let monitor_handle = tokio::spawn(monitor::run(
        config.clone(),
        pipeline.stats(),
        shutdown_tx.subscribe(),
    ));

    // Wait for shutdown signal
    tokio::select! {
        _ = signal::ctrl_c() => {
            log::info!("Ctrl-C received, initiating shutdown.");
        }
        _ = async {
            #[cfg(unix)]
            {
                match signal::unix::signal(signal::unix::SignalKind::terminate()) {
                    Ok(mut term_signal) => {
                        term_signal.recv().await;
                        log::info!("SIGTERM received, initiating shutdown.");
                    }
                    Err(e) => {
                        log::warn!("Cannot listen for SIGTERM: {}", e);
                        std::future::pending::<()>().await;
                    }
                }
            }
            #[cfg(not(unix))]
            {
                // On non-unix platforms, just wait forever.
                std::future::pending::<()>().await;
            }
        } => {}
    }

    let _ = shutdown_tx.send(());
    let decode_errors = pipeline.decode_errors();
    let store = pipeline.shutdown().await?;
    let _ = monitor_handle.await;

    let stats = store.stats();
    log::info!(
        "Shutdown complete. {} items received, {} kept, {} undecodable frames skipped.",
        stats.received,
        stats.stored,
        decode_errors
    );
    if let Some(latest) = store.items().next() {
        log::info!("Latest headline: [{}] {}", latest.source, latest.headline);
    }
    Ok(())
}
