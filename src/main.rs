use std::sync::Arc;

use anyhow::Context;
use encarte_api::api::{self, AppState};
use encarte_api::blob::{BlobStorage, LocalBlobStorage};
use encarte_api::database::PgDocumentStore;
use encarte_api::identity::{IdentityService, PlanCatalog, SharedStore};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env if present so cargo run picks up DATABASE_URL and friends
    let _ = dotenvy::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = encarte_api::config::config();
    tracing::info!("Starting Encarte API in {:?} mode", config.environment);

    let store: SharedStore = Arc::new(
        PgDocumentStore::connect(&config.database)
            .await
            .context("connecting document store")?,
    );

    let catalog = PlanCatalog::load(config.plans.catalog_path.as_deref()).context("loading plan catalog")?;
    tracing::info!("Plan catalog {} with {} plans", catalog.version, catalog.plans.len());

    let blobs: Arc<dyn BlobStorage> = Arc::new(LocalBlobStorage::from_config(&config.blob)?);
    let identity = Arc::new(IdentityService::new(store.clone(), Arc::new(catalog), config.identity.clone()));

    if config.security.jwt_secret.is_empty() {
        tracing::warn!("SECURITY_JWT_SECRET is empty, every /api request will be rejected");
    }
    let state = AppState::new(store, identity, blobs, &config.security);
    let app = api::router(state, &config.api, &config.security);

    let bind_addr = format!("0.0.0.0:{}", config.api.port);
    let listener = tokio::net::TcpListener::bind(&bind_addr)
        .await
        .with_context(|| format!("failed to bind {}", bind_addr))?;

    tracing::info!("Encarte API listening on http://{}", bind_addr);
    axum::serve(listener, app).await.context("server")?;
    Ok(())
}
