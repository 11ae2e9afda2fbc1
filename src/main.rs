//! ctf-realtime binary entrypoint wiring REST, WebSocket hubs and the score store.

use std::{env, net::SocketAddr, sync::Arc};

use anyhow::Context;
use axum::Router;
use tokio::net::TcpListener;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use ctf_realtime::{
    config::AppConfig,
    dao::score_store::{MemoryScoreStore, ScoreStore},
    routes,
    state::{AppState, SharedState},
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();

    let config = AppConfig::load();
    let store = open_store().await?;
    let app_state = AppState::new(store, config);

    // Build the HTTP router once the shared state is ready.
    let app = build_router(app_state);

    let port = env::var("PORT")
        .or_else(|_| env::var("SERVER_PORT"))
        .ok()
        .and_then(|value| value.parse::<u16>().ok())
        .unwrap_or(8080);

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    info!(%addr, "starting server");

    let listener = TcpListener::bind(addr).await.context("binding server")?;
    let service = app.into_make_service();
    axum::serve(listener, service)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("serving axum")?;

    Ok(())
}

/// Postgres when `DATABASE_URL` is set, the in-memory store otherwise.
#[cfg(feature = "postgres-store")]
async fn open_store() -> anyhow::Result<Arc<dyn ScoreStore>> {
    use ctf_realtime::{
        dao::score_store::postgres::{PgConfig, PgDaoError, PgScoreStore},
        scoring::ExactMatch,
    };

    match PgConfig::from_env() {
        Ok(config) => {
            let store = PgScoreStore::connect(config, Arc::new(ExactMatch))
                .await
                .context("connecting to Postgres")?;
            info!("using Postgres score store");
            Ok(Arc::new(store))
        }
        Err(PgDaoError::MissingEnvVar { var }) => {
            warn!(%var, "no database configured; scores live in memory only");
            Ok(Arc::new(MemoryScoreStore::default()))
        }
        Err(err) => Err(err).context("reading database configuration"),
    }
}

#[cfg(not(feature = "postgres-store"))]
async fn open_store() -> anyhow::Result<Arc<dyn ScoreStore>> {
    warn!("built without postgres-store; scores live in memory only");
    Ok(Arc::new(MemoryScoreStore::default()))
}

/// Build the top-level router and attach cross-cutting middleware layers.
fn build_router(state: SharedState) -> Router<()> {
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

        match signal(SignalKind::terminate()) {
            Ok(mut term) => {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => {},
                    _ = term.recv() => {},
                }
            }
            Err(err) => {
                warn!(error = %err, "failed to install SIGTERM handler; waiting for Ctrl+C only");
                let _ = tokio::signal::ctrl_c().await;
            }
        }
    }

    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
}
