use crate::config::{CacheBackend, Config, StoreBackend};
use crate::store::{MemoryStore, MongoStore, RestStore, Store};
use redis::aio::ConnectionManager;
use std::sync::Arc;

pub mod favorite_service;
pub mod note_service;
pub mod question_service;
pub mod session_cache;
pub mod session_service;
pub mod stats_service;
pub mod sync;

use favorite_service::InFlight;
use session_cache::{MemorySessionCache, RedisSessionCache, SessionCache};
use sync::SyncLedger;

pub struct AppState {
    pub config: Config,
    pub store: Arc<dyn Store>,
    pub cache: Arc<dyn SessionCache>,
    pub sync_ledger: Arc<SyncLedger>,
    pub favorite_toggles: Arc<InFlight>,
}

impl AppState {
    pub async fn new(config: Config) -> anyhow::Result<Self> {
        let store: Arc<dyn Store> = match config.store.backend {
            StoreBackend::Rest => {
                tracing::info!("Using PostgREST store at {}", config.store.rest_url);
                Arc::new(RestStore::new(
                    &config.store.rest_url,
                    &config.store.rest_api_key,
                    config.store.request_timeout(),
                )?
                .with_page_size(config.store.page_size))
            }
            StoreBackend::Mongo => {
                let client = mongodb::Client::with_uri_str(&config.store.mongo_uri).await?;
                tracing::info!("MongoDB connected");
                Arc::new(MongoStore::new(client.database(&config.store.mongo_database)))
            }
            StoreBackend::Memory => {
                tracing::warn!("Using in-memory store, data is lost on restart");
                Arc::new(MemoryStore::new())
            }
        };

        let cache: Arc<dyn SessionCache> = match config.cache.backend {
            CacheBackend::Redis => Arc::new(RedisSessionCache::new(
                connect_redis(&config.cache.redis_uri).await?,
            )),
            CacheBackend::Memory => Arc::new(MemorySessionCache::new()),
        };

        Ok(Self::with_backends(config, store, cache))
    }

    pub fn with_backends(
        config: Config,
        store: Arc<dyn Store>,
        cache: Arc<dyn SessionCache>,
    ) -> Self {
        let sync_ledger = Arc::new(SyncLedger::new(config.cache.session_ttl()));
        Self {
            config,
            store,
            cache,
            sync_ledger,
            favorite_toggles: Arc::new(InFlight::new()),
        }
    }
}

async fn connect_redis(uri: &str) -> anyhow::Result<ConnectionManager> {
    let client = redis::Client::open(uri)?;

    tracing::info!("Attempting to connect to Redis...");

    let redis = tokio::time::timeout(
        std::time::Duration::from_secs(30),
        ConnectionManager::new(client),
    )
    .await
    .map_err(|_| anyhow::anyhow!("Redis connection timeout after 30s"))??;

    tracing::info!("Redis ConnectionManager created, testing with PING...");

    let mut conn = redis.clone();
    tokio::time::timeout(
        std::time::Duration::from_secs(5),
        redis::cmd("PING").query_async::<String>(&mut conn),
    )
    .await
    .map_err(|_| anyhow::anyhow!("Redis PING timeout after 5s"))??;

    tracing::info!("Redis connection established successfully");
    Ok(redis)
}
