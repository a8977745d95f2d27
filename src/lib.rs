pub mod config;
pub mod controllers;
pub mod database;
pub mod error;
pub mod middleware;
pub mod models;
pub mod redis_client;
pub mod services;
pub mod store;

use std::sync::Arc;

use axum::{routing::get, Router};
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::{info, warn};

use config::{Config, StorageBackend};
use middleware::rate_limit::{MemoryRateLimitStore, RateLimitPolicy, RateLimitStore, RateLimiter};
use models::Catalog;
use services::{HoldManager, HoldPolicy, SystemClock};
use store::{HoldStore, MemoryHoldStore};

// Shared state for the whole application
#[derive(Clone)]
pub struct AppState {
    pub holds: HoldManager,
    /// `None` when rate limiting is switched off.
    pub rate_limiter: Option<RateLimiter>,
    pub config: Config,
}

impl AppState {
    /// Connects the configured backends and builds the state.
    pub async fn new(config: Config) -> anyhow::Result<Arc<Self>> {
        let store: Arc<dyn HoldStore> = match config.storage.backend {
            StorageBackend::Memory => {
                let catalog = match &config.storage.catalog_path {
                    Some(path) => Catalog::from_file(path)?,
                    None => {
                        warn!("CATALOG_PATH not set, starting with an empty catalog");
                        Catalog::default()
                    }
                };
                Arc::new(MemoryHoldStore::with_catalog(catalog))
            }
            StorageBackend::Postgres => {
                let url = config
                    .database
                    .url
                    .as_deref()
                    .ok_or_else(|| anyhow::anyhow!("DATABASE_URL must be set for the postgres backend"))?;
                let db = database::Database::connect(url, &config.database).await?;
                db.run_migrations().await?;
                Arc::new(db.hold_store())
            }
        };
        info!("Hold store: {:?}", config.storage.backend);

        let rate_limiter = if config.features.enable_rate_limiting {
            let limits: Arc<dyn RateLimitStore> = match &config.redis.url {
                Some(url) => Arc::new(redis_client::RedisClient::connect(url).await?.rate_limit_store()),
                None => Arc::new(MemoryRateLimitStore::new()),
            };
            Some(RateLimiter::new(limits, RateLimitPolicy::standard(&config.rate_limit)))
        } else {
            info!("Rate limiting disabled");
            None
        };

        let holds = HoldManager::new(store, Arc::new(SystemClock), HoldPolicy::from(&config.holds));
        Ok(Self::from_parts(config, holds, rate_limiter))
    }

    pub fn from_parts(config: Config, holds: HoldManager, rate_limiter: Option<RateLimiter>) -> Arc<Self> {
        Arc::new(Self {
            holds,
            rate_limiter,
            config,
        })
    }
}

pub fn app(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/", get(|| async { "Seat Hold API" }))
        .route("/health", get(|| async { "OK" }))
        .nest("/api", controllers::routes(&state))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
}
