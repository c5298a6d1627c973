//! Storefront Orders - order lifecycle and pricing service

use anyhow::Result;
use sqlx::postgres::PgPoolOptions;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use storefront_orders::api::{self, AppState};
use storefront_orders::catalog::PgCatalog;
use storefront_orders::config::Config;
use storefront_orders::publisher::EventPublisher;
use storefront_orders::service::OrderService;
use storefront_orders::store::PgOrderStore;

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Config::from_env()?;
    let db = PgPoolOptions::new()
        .max_connections(config.db_max_connections)
        .acquire_timeout(config.store_timeout)
        .connect(&config.database_url)
        .await?;
    sqlx::migrate!("./migrations").run(&db).await?;

    let nats = match &config.nats_url {
        Some(url) => match async_nats::connect(url.as_str()).await {
            Ok(client) => Some(client),
            Err(e) => {
                tracing::warn!(error = %e, "NATS unavailable, order events will not be published");
                None
            }
        },
        None => None,
    };

    let service = OrderService::new(
        Arc::new(PgOrderStore::new(db.clone(), config.store_timeout)),
        Arc::new(PgCatalog::new(db, config.store_timeout)),
        EventPublisher::new(nats, config.nats_subject_prefix.clone()),
    );
    let app = api::router(AppState { service });

    let addr = format!("0.0.0.0:{}", config.port);
    tracing::info!("🚀 Storefront orders listening on {}", addr);
    axum::serve(tokio::net::TcpListener::bind(&addr).await?, app).await?;
    Ok(())
}
