//! classboard-back binary entrypoint wiring HTTP, WebSocket, Redis and
//! Postgres layers.

use std::{env, net::SocketAddr, sync::Arc};

use anyhow::Context;
use axum::Router;
use tokio::net::TcpListener;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod config;
mod dto;
mod error;
mod routes;
mod services;
mod state;
mod store;

use config::AppConfig;
use state::AppState;
use store::memory::{MemoryDirectory, MemoryKv};
use store::postgres::PgDirectory;
use store::redis_kv::RedisKv;
use store::{DirectoryStore, KeyValueStore};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();

    let config = AppConfig::from_env();

    let (kv, redis_client): (Arc<dyn KeyValueStore>, Option<redis::Client>) =
        match RedisKv::connect(&config.redis_url).await {
            Ok(redis) => {
                let client = redis.client();
                (Arc::new(redis), Some(client))
            }
            Err(err) => {
                warn!(error = %err, "redis unreachable; falling back to process-local store");
                (MemoryKv::new(), None)
            }
        };

    let directory: Arc<dyn DirectoryStore> = if config.database_url.is_empty() {
        warn!("DATABASE_URL unset; using empty in-memory directory");
        MemoryDirectory::new()
    } else {
        Arc::new(
            PgDirectory::connect(&config.database_url)
                .await
                .context("connecting to the directory database")?,
        )
    };

    let app_state = AppState::new(config.clone(), kv, directory);

    // The push plane needs its own pub/sub connection; without Redis the
    // fabric degrades to polling only.
    if config.ws_enabled {
        match redis_client {
            Some(client) => {
                tokio::spawn(services::subscriber::run(app_state.clone(), client));
            }
            None => warn!("push plane disabled: no redis pub/sub available"),
        }
    }

    let app = build_router(app_state);

    let port = env::var("PORT")
        .ok()
        .and_then(|value| value.parse::<u16>().ok())
        .unwrap_or(8080);

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    info!(%addr, "starting server");

    let listener = TcpListener::bind(addr).await.context("binding server")?;
    axum::serve(listener, app.into_make_service())
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("serving axum")?;

    Ok(())
}

/// Build the top-level router and attach cross-cutting middleware layers.
fn build_router(state: state::SharedState) -> Router<()> {
    routes::router(state)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
}

/// Configure tracing subscribers so logs include spans by default.
fn init_tracing() {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "info,tower_http=debug".into());
    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer())
        .init();
}

/// Wait for Ctrl+C or SIGTERM and shut the server down gracefully.
async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};

        let mut term = signal(SignalKind::terminate()).expect("install SIGTERM handler");
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {},
            _ = term.recv() => {},
        }
    }

    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
}
