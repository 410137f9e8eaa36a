//! Boredom level service.
//!
//! One number between 0 and 100 that drops by one every decay interval, shared by every replica
//! through a single Redis hash, served over a small JSON API.
//!
//!
//!
//! # Layers
//! - `routes`: axum handlers, JSON in and out
//! - `service`: decay, cache lookups, conditional persistence
//! - `cache`: per-replica shadow copy, TTL or change-feed driven
//! - `store` / `database`: atomic reads and writes against the record
//!
//!
//!
//! # Endpoints
//! - `GET /api/boredom`
//! - `POST /api/boredom/set` with `{"level": 42}`
//! - `POST /api/boredom/reset`
//! - `POST /api/auth/check` with `{"username": "...", "password": "..."}`
//!
//!
//!
//! # Replicas
//!
//! No locks between replicas. Every write is one atomic Redis script, increments commute and the
//! last `level` set wins. Each replica caches independently and can always fall back to Redis.
//!
//! With `CACHE_MODE=push` a background task listens on the change channel and keeps the cache
//! current without a TTL.
//!
//!
//!
//! # Running
//!
//! Against Redis.
//! ```sh
//! ADMIN_USERNAME=admin ADMIN_PASSWORD=secret REDIS_URL=redis://localhost:6379 cargo run
//! ```
//!
//! Single replica, no Redis.
//! ```sh
//! STORE_BACKEND=memory ADMIN_USERNAME=admin ADMIN_PASSWORD=secret cargo run
//! ```
//!
//! Logs follow `RUST_LOG`.
//! ```sh
//! RUST_LOG=boredom_server=debug cargo run
//! ```
use std::{sync::Arc, time::Duration};

use axum::{
    Router,
    http::{Method, header::CONTENT_TYPE},
    routing::{get, post},
};
#[cfg(unix)]
use tokio::signal::unix::{SignalKind, signal};
use tokio::{net::TcpListener, signal::ctrl_c, sync::watch};
use tower_http::cors::CorsLayer;
use tracing::{error, info, warn};
use tracing_subscriber::{EnvFilter, fmt};

pub mod cache;
pub mod clock;
pub mod config;
pub mod database;
pub mod decay;
pub mod error;
pub mod feed;
pub mod model;
pub mod routes;
pub mod service;
pub mod state;
pub mod store;
pub mod utils;

use cache::CacheMode;
use clock::{Clock, SystemClock};
use config::{Config, StoreBackend};
use database::init_redis;
use error::AppError;
use feed::run_change_feed;
use routes::{auth_handler, boredom_handler, reset_handler, set_handler};
use state::State;
use store::{ChangeFeed, MemoryStore, StateStore};

pub async fn start_server() -> Result<(), AppError> {
    fmt().with_env_filter(EnvFilter::from_default_env()).init();

    run()
        .await
        .inspect_err(|e| error!(error = %e, "Server failed"))
}

async fn run() -> Result<(), AppError> {
    info!("Loading config...");
    let config = Config::load()?;

    match config.store_backend {
        StoreBackend::Redis => {
            let store = init_redis(&config).await?;
            serve(config, store, SystemClock).await
        }
        StoreBackend::Memory => {
            warn!("Using in-memory store, state is not shared between replicas");
            let store = MemoryStore::new(&config.record_key);
            serve(config, store, SystemClock).await
        }
    }
}

pub fn router<S, C>(state: Arc<State<S, C>>) -> Router
where
    S: StateStore,
    C: Clock,
{
    let cors = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([CONTENT_TYPE])
        .max_age(Duration::from_secs(60 * 60));

    Router::new()
        .route("/api/boredom", get(boredom_handler::<S, C>))
        .route("/api/boredom/set", post(set_handler::<S, C>))
        .route("/api/boredom/reset", post(reset_handler::<S, C>))
        .route("/api/auth/check", post(auth_handler::<S, C>))
        .layer(cors)
        .with_state(state)
}

async fn serve<S, C>(config: Config, store: S, clock: C) -> Result<(), AppError>
where
    S: StateStore + ChangeFeed + Clone,
    C: Clock + Clone,
{
    info!("Initializing state...");
    let state = State::new(config, store, clock.clone());

    let record = state.service.ensure_record().await?;
    info!(
        level = record.level,
        spikes = record.boredom_spikes,
        "Boredom record ready"
    );

    info!("Starting server...");

    let address = format!("0.0.0.0:{}", state.config.port);
    info!("Binding to {address}");

    let listener = TcpListener::bind(&address).await?;

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let feed_task = (state.config.cache_mode == CacheMode::Push).then(|| {
        info!("Starting change feed...");

        tokio::spawn(run_change_feed(
            state.service.store().clone(),
            state.service.cache().clone(),
            clock,
            state.service.store().record_id().to_string(),
            Duration::from_millis(state.config.feed_retry_ms),
            shutdown_rx,
        ))
    });

    info!("Server running on {address}");

    let served = axum::serve(listener, router(state))
        .with_graceful_shutdown(shutdown_signal())
        .await;

    info!("Server shutting down...");

    // The feed stops whether serving ended cleanly or not.
    let _ = shutdown_tx.send(true);
    if let Some(task) = feed_task
        && let Err(e) = task.await
    {
        warn!(error = %e, "Change feed task ended abnormally");
    }

    served?;
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        match ctrl_c().await {
            Ok(()) => info!("Received Ctrl+C, shutting down"),
            Err(e) => {
                warn!(error = %e, "Failed to install Ctrl+C handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal(SignalKind::terminate()) {
            Ok(mut terminate) => {
                terminate.recv().await;
                info!("Received terminate signal, shutting down");
            }
            Err(e) => {
                warn!(error = %e, "Failed to install signal handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
