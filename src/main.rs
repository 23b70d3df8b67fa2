//! Offline Cache - sidecar server
//!
//! Serves the cached operation facade over loopback HTTP for a desktop UI.

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Context;
use tokio::signal;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use offline_cache::api::{create_router, AppState};
use offline_cache::persist::{GzipCodec, SqliteBackend};
use offline_cache::{CacheService, Config, HttpRemote};

/// # Startup Sequence
/// 1. Initialize tracing subscriber for logging
/// 2. Load configuration and policy overrides
/// 3. Open the SQLite backend, falling back to memory only
/// 4. Build the service (hydrates cache and queue)
/// 5. Start background tasks and warm the cache
/// 6. Serve HTTP until SIGINT/SIGTERM, then stop background tasks
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "offline_cache=info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting Offline Cache sidecar");

    let config = Config::from_env();
    info!(
        max_entries = config.max_entries,
        default_ttl = config.default_ttl,
        port = config.server_port,
        upstream = %config.upstream_url,
        "Configuration loaded"
    );

    let policy = config.load_policy()?;
    let (ttl, router) = config.policy_tables(&policy);

    let http_client = reqwest::Client::builder()
        .build()
        .context("building HTTP client")?;
    let remote = HttpRemote::new(config.upstream_url.clone(), config.remote_timeout(), http_client);

    let mut builder = CacheService::builder(Arc::new(remote))
        .max_entries(config.max_entries)
        .ttl_policy(ttl)
        .invalidation(router)
        .retry(config.retry_options())
        .queue_max_attempts(config.queue_max_attempts)
        .intervals(config.cleanup_interval(), config.refresh_interval());
    if let Some(warmup) = policy.warmup.clone() {
        builder = builder.warmup(warmup);
    }
    if let Some(critical) = policy.critical.clone() {
        builder = builder.critical(critical);
    }
    if config.compress {
        builder = builder.codec(Arc::new(GzipCodec::default()));
    }

    match &config.db_path {
        Some(path) => match SqliteBackend::open(path) {
            Ok(backend) => {
                info!(path = %path.display(), "Persistent storage opened");
                builder = builder.persistence(Arc::new(backend));
            }
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Persistent storage unavailable, running memory-only");
            }
        },
        None => info!("Persistence disabled, running memory-only"),
    }

    let service = builder.build();
    service.start_background();

    let warm = service.clone();
    tokio::spawn(async move {
        warm.warm_up().await;
    });

    let app = create_router(AppState::new(service.clone()));

    let addr = SocketAddr::from(([127, 0, 0, 1], config.server_port));
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("binding {}", addr))?;
    info!("Server listening on http://{}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("serving HTTP")?;

    service.close();
    info!("Server shutdown complete");
    Ok(())
}

/// Waits for shutdown signal (Ctrl+C or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, initiating shutdown...");
        }
        _ = terminate => {
            info!("Received SIGTERM, initiating shutdown...");
        }
    }
}
