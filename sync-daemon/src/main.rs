// ABOUTME: Long-running sync daemon wiring the drivers to the live racing API.
// ABOUTME: Loads config, starts enabled drivers, logs status, stops on Ctrl-C.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use tracing::{info, warn};

use quota_sync::prelude::*;

/// How often the status snapshot is logged.
const STATUS_INTERVAL: Duration = Duration::from_secs(15 * 60);

#[tokio::main]
async fn main() -> Result<()> {
    let _ = dotenvy::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "quota_sync=info,sync_daemon=info".into()),
        )
        .init();

    // explicit QUOTA_SYNC_CONFIG path, otherwise defaults plus env overrides
    let config_path = std::env::var("QUOTA_SYNC_CONFIG").ok().map(PathBuf::from);
    let config = SyncConfig::load(config_path.as_deref())?;
    info!(base_url = %config.api.base_url, "configuration loaded");

    let clock = SystemClock::shared();
    let limiter = Arc::new(config.rate_limiter(clock.clone()));
    let coordinator = Coordinator::new(limiter.clone(), clock.clone(), config.slot_table());
    let api = Arc::new(HttpRacingApi::from_config(&config.api)?);
    let store = MemoryStore::shared();
    let ctx = SyncContext::new(api, store, limiter.clone(), clock);

    let riders = config.rider_sync.enabled.then(|| {
        RiderSyncScheduler::rider_sync(coordinator.clone(), ctx.clone(), &config.rider_sync)
    });
    let events = config.event_sync.enabled.then(|| {
        SmartEventSync::new(coordinator.clone(), ctx.clone(), config.event_sync.clone())
    });
    let results = config.results_sync.enabled.then(|| {
        PeriodicScheduler::results_sync(coordinator.clone(), ctx.clone(), &config.results_sync)
    });

    if let Some(riders) = &riders {
        riders.start().await;
    }
    if let Some(events) = &events {
        events.start().await;
    }
    if let Some(results) = &results {
        results.start().await;
    }
    info!(
        rider_sync = riders.is_some(),
        event_sync = events.is_some(),
        results_sync = results.is_some(),
        "sync daemon started"
    );

    if config.batch_sync.run_on_startup {
        let batch = BatchSync::new(coordinator.clone(), ctx.clone(), &config);
        tokio::spawn(async move {
            let options = BatchOptions {
                force: true,
                ..BatchOptions::default()
            };
            match batch.run(options).await {
                Ok(report) => info!(
                    duration_ms = report.duration_ms,
                    errors = report.errors.len(),
                    "startup batch sync finished"
                ),
                Err(e) => warn!(error = %e, "startup batch sync failed"),
            }
        });
    }

    let mut status_timer = tokio::time::interval(STATUS_INTERVAL);
    loop {
        tokio::select! {
            _ = status_timer.tick() => log_status(&coordinator, &limiter).await,
            signal = tokio::signal::ctrl_c() => {
                if let Err(e) = signal {
                    warn!(error = %e, "failed to listen for shutdown signal");
                }
                break;
            }
        }
    }

    info!("shutting down");
    if let Some(riders) = &riders {
        riders.stop().await;
    }
    if let Some(events) = &events {
        events.stop().await;
    }
    if let Some(results) = &results {
        results.stop().await;
    }
    coordinator.pause().await;
    log_status(&coordinator, &limiter).await;

    Ok(())
}

async fn log_status(coordinator: &Coordinator, limiter: &RateLimiter) {
    let snapshot = serde_json::json!({
        "coordinator": coordinator.get_status().await,
        "rateLimits": limiter.get_status().await,
    });
    info!(status = %snapshot, "sync status");
}
