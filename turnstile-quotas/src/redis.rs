use turnstile_redis::redis::{self, Script};
use turnstile_redis::{AsyncRedisClient, AsyncRedisConnection, RedisError, RedisScripts};
use turnstile_statsd::metric;

use crate::statsd::QuotaGauges;
use crate::{QuotaKey, QuotaStore, StoreError};

/// A [`QuotaStore`] over Redis or Redis Cluster.
///
/// Increments run as a Lua script, so all counters passed in one call are updated atomically and
/// in one round trip. In cluster deployments, all keys of one call must share a hash slot, which
/// the [`QuotaKeySpace`](crate::QuotaKeySpace) guarantees for the keys of a single user.
///
/// Requires the `redis` feature.
#[derive(Clone, Debug)]
pub struct RedisQuotaStore {
    client: AsyncRedisClient,
    script: &'static Script,
}

impl RedisQuotaStore {
    /// Creates a store over the given client.
    pub fn new(client: AsyncRedisClient) -> Self {
        Self {
            client,
            script: RedisScripts::load_increment_quota(),
        }
    }

    /// Reports the pool state and checks out a connection.
    async fn connection(&self) -> Result<AsyncRedisConnection, StoreError> {
        let stats = self.client.stats();
        metric!(gauge(QuotaGauges::RedisConnections) = u64::from(stats.connections));
        metric!(gauge(QuotaGauges::RedisIdleConnections) = u64::from(stats.idle_connections));

        self.client
            .get_connection()
            .await
            .map_err(StoreError::unavailable)
    }
}

impl QuotaStore for RedisQuotaStore {
    async fn increment_with_expiry(
        &self,
        keys: &[QuotaKey],
        ttl_seconds: u64,
    ) -> Result<Vec<u64>, StoreError> {
        if keys.is_empty() {
            return Ok(Vec::new());
        }

        let mut invocation = self.script.prepare_invoke();
        for key in keys {
            invocation.key(key.as_str());
        }
        invocation.arg(ttl_seconds);

        let mut connection = self.connection().await?;

        invocation
            .invoke_async(&mut connection)
            .await
            .map_err(|e| StoreError::unavailable(RedisError::Redis(e)))
    }

    async fn multi_get(&self, keys: &[QuotaKey]) -> Result<Vec<u64>, StoreError> {
        if keys.is_empty() {
            return Ok(Vec::new());
        }

        let mut command = redis::cmd("MGET");
        for key in keys {
            command.arg(key.as_str());
        }

        let mut connection = self.connection().await?;

        let values: Vec<Option<u64>> = command
            .query_async(&mut connection)
            .await
            .map_err(|e| StoreError::unavailable(RedisError::Redis(e)))?;

        Ok(values.into_iter().map(Option::unwrap_or_default).collect())
    }

    async fn delete(&self, keys: &[QuotaKey]) -> Result<u64, StoreError> {
        if keys.is_empty() {
            return Ok(0);
        }

        let mut command = redis::cmd("DEL");
        for key in keys {
            command.arg(key.as_str());
        }

        let mut connection = self.connection().await?;

        command
            .query_async(&mut connection)
            .await
            .map_err(|e| StoreError::unavailable(RedisError::Redis(e)))
    }
}
