/*
 * Responsibility
 * - Load Config → build the Authenticator → assemble the Router
 * - Start background tasks (cache sweep, source reload) and stop them on shutdown
 * - Serve with axum::serve()
 */
use std::{panic, process, time::Duration};

use anyhow::Result;
use axum::{Router, routing::get};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::api;
use crate::api::v1::handlers::health::health;
use crate::config::Config;
use crate::middleware;
use crate::services::auth::build_authenticator;
use crate::state::AppState;

fn init_tracing() {
    // Prefer RUST_LOG if set; otherwise use a sensible default.
    // Ex:
    // RUST_LOG=info,token_gate=debug,tower_http=debug cargo run
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info,tower_http=info"));

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .init();
}

fn init_panic_hook(abort_on_panic: bool) {
    let default_hook = panic::take_hook();

    panic::set_hook(Box::new(move |info| {
        // Surface panics via tracing so they are not lost with stderr.
        tracing::error!(?info, "panic");

        // Development fails fast; production keeps serving.
        if abort_on_panic {
            process::abort();
        } else {
            default_hook(info);
        }
    }))
}

pub async fn run() -> Result<()> {
    init_tracing();
    let config = Config::from_env()?;
    init_panic_hook(!config.app_env.is_production());

    tracing::info!(
        "starting token gate in {:?} mode on {}",
        config.app_env,
        config.addr
    );

    let (auth, sources) = build_authenticator(&config).await?;

    let shutdown = CancellationToken::new();
    let sweeper = auth.cache().spawn_sweeper(
        Duration::from_secs(config.cache_sweep_seconds),
        shutdown.child_token(),
    );
    let refresher = config.source_reload_seconds.map(|secs| {
        sources.spawn_refresh(
            Duration::from_secs(secs),
            auth.keys().clone(),
            auth.revocations().clone(),
            shutdown.child_token(),
        )
    });

    let app = build_router(AppState::new(auth));
    let listener = tokio::net::TcpListener::bind(config.addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    shutdown.cancel();
    sweeper.await?;
    if let Some(refresher) = refresher {
        refresher.await?;
    }
    tracing::info!("token gate stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %err, "failed to listen for shutdown signal");
    }
}

pub fn build_router(state: AppState) -> Router {
    let router = Router::new()
        .route("/health", get(health))
        .nest("/api/v1", api::v1::routes(state.clone()))
        .with_state(state);

    middleware::http::apply(router)
}
