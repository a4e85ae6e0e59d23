use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use chrono::Utc;
use dotenvy::dotenv;
use tokio::signal;
use tracing::{info, warn, Level};
use tracing_subscriber::EnvFilter;

use rollup::config::Config;
use rollup::http_store::{HttpMetricStore, HttpStoreConfig};
use rollup::permits::PermitGate;
use rollup::runner::Aggregator;
use rollup::time_windows;

#[tokio::main]
async fn main() -> Result<()> {
    let _ = dotenv();
    init_tracing();

    let cfg_path = std::env::args().nth(1).map(PathBuf::from);
    let cfg = Config::load(cfg_path)?;
    info!("starting rollup with config {:?}", cfg);

    let store = Arc::new(HttpMetricStore::new(HttpStoreConfig {
        url: cfg.storage_url.to_string(),
        user: cfg.storage_user.to_string(),
        pass: cfg.storage_pass.to_string(),
        index_prefix: cfg.index_prefix.to_string(),
        timeout: cfg.http_timeout(),
    })?);
    let permits = Arc::new(PermitGate::new(cfg.max_in_flight));
    let aggregator = Aggregator::new(store, permits.clone(), cfg.batch_size);

    // Ctrl-C closes the permit gate: an in-progress dispatch loop fails
    // its next acquire and the run aborts with an interrupt message.
    let shutdown = Arc::new(AtomicBool::new(false));
    {
        let gate = permits.clone();
        let flag = shutdown.clone();
        tokio::spawn(async move {
            if signal::ctrl_c().await.is_ok() {
                info!("shutdown signal received");
                flag.store(true, Ordering::Relaxed);
                gate.close();
            }
        });
    }

    let mut interval = tokio::time::interval(Duration::from_secs(cfg.poll_interval_secs));
    let mut last_aggregated_start: Option<i64> = None;

    while !shutdown.load(Ordering::Relaxed) {
        interval.tick().await;
        if shutdown.load(Ordering::Relaxed) {
            break;
        }

        let hour = time_windows::previous_hour_slice(Utc::now());
        if last_aggregated_start == Some(hour.start_ms) {
            continue;
        }

        match aggregator.run_hour(hour).await {
            Ok(results) => {
                last_aggregated_start = Some(hour.start_ms);
                for (stage, stats) in results {
                    info!(
                        "{stage}: {} schedules, {} batches, {:?}",
                        stats.schedules, stats.batches, stats.elapsed
                    );
                }
            }
            Err(err) => warn!("aggregation of {hour} failed: {err:#}"),
        }
    }

    Ok(())
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_max_level(Level::INFO)
        .init();
}
