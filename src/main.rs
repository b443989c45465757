//! myshop - Persian storefront backend

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use sqlx::postgres::PgPoolOptions;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use myshop::api::{self, AppState};
use myshop::config::{Config, StoreKind};
use myshop::services::{EmailBackend, LogBackend, SmtpBackend};
use myshop::store::{MemoryStore, PgStore, Store};

const MAINTENANCE_EVERY: Duration = Duration::from_secs(15 * 60);

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Config::from_env().context("invalid configuration")?;

    let store: Arc<dyn Store> = match config.store {
        StoreKind::Postgres => {
            let url = config.database_url.as_deref().context("DATABASE_URL is required")?;
            let db = PgPoolOptions::new().max_connections(10).connect(url).await?;
            sqlx::migrate!("./migrations").run(&db).await?;
            Arc::new(PgStore::new(db))
        }
        StoreKind::Memory => {
            tracing::warn!("using the in-memory store; data is lost on restart");
            Arc::new(MemoryStore::new())
        }
    };

    let nats = match &config.nats_url {
        Some(url) => match async_nats::connect(url.as_str()).await {
            Ok(client) => Some(client),
            Err(e) => {
                tracing::warn!(error = %e, "NATS unavailable, events will only be logged");
                None
            }
        },
        None => None,
    };

    let mail: Arc<dyn EmailBackend> = match &config.smtp_url {
        Some(url) => Arc::new(SmtpBackend::from_url(url).context("invalid SMTP_URL")?),
        None => {
            tracing::warn!("SMTP_URL not set, account mail will only be logged");
            Arc::new(LogBackend)
        }
    };

    let port = config.port;
    let state = api::build_state(config, store, mail, nats);
    tokio::spawn(maintenance(state.clone()));
    let app = api::router(state);

    tracing::info!("🚀 myshop listening on 0.0.0.0:{}", port);
    let listener = tokio::net::TcpListener::bind(format!("0.0.0.0:{}", port)).await?;
    axum::serve(listener, app.into_make_service_with_connect_info::<SocketAddr>()).await?;
    Ok(())
}

/// Expires stale sessions, resyncs special offer flags and drops idle throttle keys.
async fn maintenance(state: AppState) {
    let mut ticker = tokio::time::interval(MAINTENANCE_EVERY);
    loop {
        ticker.tick().await;
        if let Err(e) = state.sessions.cleanup().await {
            tracing::error!(error = %e, "session cleanup failed");
        }
        match state.offers.resync_all().await {
            Ok(changed) if !changed.is_empty() => tracing::info!(products = changed.len(), "special offer flags resynced"),
            Ok(_) => {}
            Err(e) => tracing::error!(error = %e, "special offer resync failed"),
        }
        state.throttle.cart.purge().await;
        state.throttle.checkout.purge().await;
        state.accounts.purge_limits().await;
    }
}
