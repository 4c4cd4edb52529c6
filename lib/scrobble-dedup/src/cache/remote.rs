use async_trait::async_trait;
use redis::{aio::MultiplexedConnection, AsyncCommands};
use std::time::Duration;
use tracing::debug;

use super::Cache;
use crate::error::{DedupError, Result};

const RESPONSE_TIMEOUT: Duration = Duration::from_secs(5);
const CONNECTION_TIMEOUT: Duration = Duration::from_secs(10);

/// Shared cache on a Redis server. Keys never expire.
#[derive(Clone)]
pub struct RedisCache {
    connection: MultiplexedConnection,
}

fn cache_error(e: redis::RedisError) -> DedupError {
    DedupError::Cache(format!("redis: {e}"))
}

impl RedisCache {
    /// Connects to `redis://[user:password@]host:port/db` and checks the link.
    pub async fn connect(url: &str) -> Result<Self> {
        let client = redis::Client::open(url).map_err(cache_error)?;
        let mut connection = client
            .get_multiplexed_async_connection_with_timeouts(RESPONSE_TIMEOUT, CONNECTION_TIMEOUT)
            .await
            .map_err(cache_error)?;

        let pong: String = redis::cmd("PING")
            .query_async(&mut connection)
            .await
            .map_err(cache_error)?;
        debug!(reply = %pong, "Redis connection established");

        Ok(Self { connection })
    }
}

#[async_trait]
impl Cache for RedisCache {
    fn name(&self) -> &'static str {
        "redis"
    }

    async fn get(&self, key: &str) -> Result<Option<String>> {
        // A nil reply maps to None, so a miss never surfaces as an error.
        let mut connection = self.connection.clone();
        let value: Option<String> = connection.get(key).await.map_err(cache_error)?;
        Ok(value)
    }

    async fn set(&self, key: &str, value: &str) -> Result<()> {
        let mut connection = self.connection.clone();
        let _: () = connection.set(key, value).await.map_err(cache_error)?;
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<()> {
        let mut connection = self.connection.clone();
        let _: () = connection.del(key).await.map_err(cache_error)?;
        Ok(())
    }

    async fn close(&self) {
        debug!("Closing Redis cache");
    }
}
