use redis::{aio::MultiplexedConnection, Client};
use tracing::info;

use crate::middleware::rate_limit::RedisRateLimitStore;

/// Shared connection for rate-limit counters.
#[derive(Clone)]
pub struct RedisClient {
    pub conn: MultiplexedConnection,
}

impl RedisClient {
    pub async fn connect(redis_url: &str) -> redis::RedisResult<Self> {
        let client = Client::open(redis_url)?;
        let mut conn = client.get_multiplexed_tokio_connection().await?;
        let _: String = redis::cmd("PING").query_async(&mut conn).await?;
        info!("Redis connected");
        Ok(RedisClient { conn })
    }

    pub fn rate_limit_store(&self) -> RedisRateLimitStore {
        RedisRateLimitStore::new(self.conn.clone())
    }
}
