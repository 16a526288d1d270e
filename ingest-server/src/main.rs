//! ingest-server — price/promotion ingestion workers
//!
//! Long-running service that:
//! - Consumes normalized price/promo snapshots from the work queue
//! - Resolves pointer messages against bulk objects in S3
//! - Reconciles facts into the current-state projection in PostgreSQL
//! - Sweeps expired promotions on an interval

use chrono::Utc;

use ingest_server::config::Config;
use ingest_server::db::{PgStateWriter, StateWriter};
use ingest_server::state::AppState;

type BoxError = Box<dyn std::error::Error + Send + Sync>;

#[tokio::main]
async fn main() -> Result<(), BoxError> {
    // Load .env file
    let _ = dotenvy::dotenv();

    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "ingest_server=info".into()),
        )
        .init();

    let config = Config::from_env()?;
    tracing::info!(queue = %config.queue_url, workers = config.worker_count, "starting ingest-server");

    let state = AppState::new(config).await?;

    // Expired-promo sweep
    let sweep_writer = PgStateWriter::new(state.pool.clone());
    let sweep_interval = state.config.promo_sweep_interval_secs;
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(std::time::Duration::from_secs(sweep_interval));
        loop {
            interval.tick().await;
            match sweep_writer.expire_promos(Utc::now()).await {
                Ok(0) => {}
                Ok(n) => tracing::info!(cleared = n, "expired promotions swept"),
                Err(e) => tracing::warn!(error = %e, "promo sweep failed"),
            }
        }
    });

    // Consumer workers
    let mut handles = Vec::new();
    for i in 0..state.config.worker_count {
        let worker = state.worker();
        handles.push(tokio::spawn(async move {
            if let Err(e) = worker.run().await {
                tracing::error!(worker = i, error = %e, "worker stopped");
            }
        }));
    }

    for handle in handles {
        handle.await?;
    }

    Ok(())
}
