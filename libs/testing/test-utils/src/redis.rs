//! Redis test infrastructure
//!
//! `TestRedis` runs a throwaway Redis container for queue and rate-limit tests.

use redis::aio::MultiplexedConnection;
use redis::{AsyncCommands, Client};
use testcontainers::runners::AsyncRunner;
use testcontainers::{ContainerAsync, ImageExt};
use testcontainers_modules::redis::Redis;

const REDIS_TAG: &str = "8-alpine";

/// Redis container plus a shared connection. The container is removed on drop.
///
/// # Example
///
/// ```no_run
/// use test_utils::TestRedis;
/// use redis::AsyncCommands;
///
/// # async fn example() {
/// let redis = TestRedis::new().await;
/// let mut conn = redis.connection();
///
/// conn.lpush::<_, _, ()>("high:store_raw", "{}").await.unwrap();
/// assert_eq!(redis.list_len("high:store_raw").await, 1);
/// # }
/// ```
pub struct TestRedis {
    #[allow(dead_code)]
    container: ContainerAsync<Redis>,
    connection: MultiplexedConnection,
    pub connection_string: String,
}

impl TestRedis {
    pub async fn new() -> Self {
        let container = Redis::default()
            .with_tag(REDIS_TAG)
            .start()
            .await
            .expect("Failed to start Redis container");

        let host_port = container
            .get_host_port_ipv4(6379)
            .await
            .expect("Failed to get Redis port");

        let connection_string = format!("redis://127.0.0.1:{}", host_port);
        let connection = Client::open(connection_string.clone())
            .expect("Failed to create Redis client")
            .get_multiplexed_async_connection()
            .await
            .expect("Failed to connect to Redis");

        tracing::info!(port = host_port, tag = REDIS_TAG, "Test Redis ready");

        Self {
            container,
            connection,
            connection_string,
        }
    }

    /// Cloned handle for direct inspection from tests.
    pub fn connection(&self) -> MultiplexedConnection {
        self.connection.clone()
    }

    /// URL for building a client under test.
    pub fn connection_string(&self) -> &str {
        &self.connection_string
    }

    /// Length of a list key, 0 when the key is absent.
    pub async fn list_len(&self, key: &str) -> usize {
        let mut conn = self.connection();
        conn.llen(key).await.expect("LLEN failed")
    }

    /// Remaining TTL of a key in seconds (-2 absent, -1 no expiry).
    pub async fn ttl(&self, key: &str) -> i64 {
        let mut conn = self.connection();
        conn.ttl(key).await.expect("TTL failed")
    }

    /// Drop every key so one container can serve several scenarios.
    pub async fn flush(&self) {
        let mut conn = self.connection();
        redis::cmd("FLUSHDB")
            .query_async::<()>(&mut conn)
            .await
            .expect("FLUSHDB failed");
    }
}

impl Drop for TestRedis {
    fn drop(&mut self) {
        tracing::debug!("Cleaning up test Redis container");
    }
}
