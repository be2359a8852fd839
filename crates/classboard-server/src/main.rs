//! # classboard-server
//!
//! HTTP backend for the Classboard collaborative class-diagram editor.
//!
//! This binary provides:
//! - **Diagram service**: owner/share access control and fine-grained
//!   mutations of the diagram document (classes, attributes, relations)
//! - **User directory** lookups and admin-only user provisioning
//! - **REST API** (axum); caller identity comes from an upstream auth proxy
//! - **Per-client rate limiting** to protect against abuse

mod api;
mod config;
mod diagrams;
mod error;
mod rate_limit;

use std::sync::Arc;

use tracing::info;
use tracing_subscriber::EnvFilter;

use classboard_store::Database;

use crate::api::AppState;
use crate::config::ServerConfig;
use crate::diagrams::DiagramService;
use crate::rate_limit::RateLimiter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // -----------------------------------------------------------------------
    // 1. Initialize tracing (respects RUST_LOG env var)
    // -----------------------------------------------------------------------
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,classboard_server=debug")),
        )
        .init();

    info!("Starting Classboard server v{}", env!("CARGO_PKG_VERSION"));

    // -----------------------------------------------------------------------
    // 2. Load configuration
    // -----------------------------------------------------------------------
    let config = ServerConfig::from_env();
    info!(http_addr = %config.http_addr, instance = %config.instance_name, "Loaded configuration");
    info!(
        admin_enabled = config.admin_token.is_some(),
        rate_limit_per_sec = config.rate_limit_per_sec,
        rate_limit_burst = config.rate_limit_burst,
        "Instance settings"
    );

    // -----------------------------------------------------------------------
    // 3. Open storage (runs migrations)
    // -----------------------------------------------------------------------
    let database = match &config.database_path {
        Some(path) => {
            info!(path = %path.display(), "opening database");
            Database::open_at(path)?
        }
        None => Database::new()?,
    };
    if let Some(path) = database.path() {
        info!(path = %path.display(), "Database ready");
    }

    let rate_limiter = RateLimiter::new(config.rate_limit_per_sec, config.rate_limit_burst);

    let app_state = AppState {
        diagrams: DiagramService::new(database),
        rate_limiter: rate_limiter.clone(),
        config: Arc::new(config.clone()),
    };

    // -----------------------------------------------------------------------
    // 4. Spawn background tasks
    // -----------------------------------------------------------------------

    // Periodic rate limiter cleanup (every 5 minutes, evict buckets idle >10 min)
    let rl = rate_limiter.clone();
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(std::time::Duration::from_secs(300));
        loop {
            interval.tick().await;
            rl.purge_stale(600.0).await;
        }
    });

    // -----------------------------------------------------------------------
    // 5. Run the HTTP API server (blocks until shutdown)
    // -----------------------------------------------------------------------
    tokio::select! {
        result = api::serve(app_state, config.http_addr) => {
            if let Err(e) = result {
                tracing::error!(error = %e, "HTTP server failed");
                return Err(e);
            }
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Received Ctrl+C, shutting down");
        }
    }

    Ok(())
}
