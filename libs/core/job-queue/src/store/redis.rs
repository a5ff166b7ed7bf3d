//! Redis-backed coordination store.

use super::CoordinationStore;
use crate::error::QueueResult;
use async_trait::async_trait;
use redis::aio::{ConnectionManager, MultiplexedConnection};
use redis::{AsyncConnectionConfig, Client};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::{debug, info, warn};

/// Shortest BRPOP wait sent to the server.
const MIN_BLOCK_SECS: f64 = 0.01;

/// Connection retry policy used at startup.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Attempts after the first failure
    pub max_retries: u32,
    pub initial_delay: Duration,
    pub max_delay: Duration,
}

impl RetryPolicy {
    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    pub fn with_initial_delay(mut self, delay: Duration) -> Self {
        self.initial_delay = delay;
        self
    }

    /// Delay before retry number `attempt` (1-based), doubling up to `max_delay`.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
        self.initial_delay.saturating_mul(factor).min(self.max_delay)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 5,
            initial_delay: Duration::from_millis(200),
            max_delay: Duration::from_secs(5),
        }
    }
}

/// Redis implementation of [`CoordinationStore`].
///
/// Regular commands share one `ConnectionManager`. BRPOP holds its connection
/// for the whole wait, so blocking pops run on dedicated connections kept in a
/// small free list and never stall the shared one.
#[derive(Clone)]
pub struct RedisStore {
    client: Client,
    manager: ConnectionManager,
    blocking: Arc<Mutex<Vec<MultiplexedConnection>>>,
}

impl RedisStore {
    /// Connect and verify with PING.
    pub async fn connect(url: &str) -> QueueResult<Self> {
        info!("Attempting to connect to Redis at {}", url);

        let client = Client::open(url)?;
        let manager = ConnectionManager::new(client.clone()).await?;
        let store = Self {
            client,
            manager,
            blocking: Arc::new(Mutex::new(Vec::new())),
        };
        store.ping().await?;

        info!("Successfully connected to Redis");
        Ok(store)
    }

    /// Connect, retrying with exponential back-off.
    pub async fn connect_with_retry(url: &str, policy: RetryPolicy) -> QueueResult<Self> {
        let mut attempt = 0;
        loop {
            match Self::connect(url).await {
                Ok(store) => {
                    if attempt > 0 {
                        debug!("Redis connection succeeded after {} retries", attempt);
                    }
                    return Ok(store);
                }
                Err(e) => {
                    attempt += 1;
                    if attempt > policy.max_retries {
                        warn!("Redis connection failed after {} attempts: {}", attempt, e);
                        return Err(e);
                    }
                    let delay = policy.delay_for(attempt);
                    warn!(
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "Redis connection failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }

    /// Shared connection handle for non-blocking commands.
    pub fn connection(&self) -> ConnectionManager {
        self.manager.clone()
    }

    async fn checkout_blocking(&self) -> QueueResult<MultiplexedConnection> {
        let pooled = self.blocking.lock().ok().and_then(|mut idle| idle.pop());
        match pooled {
            Some(conn) => Ok(conn),
            None => {
                // BRPOP replies only after its own timeout, so the client-side
                // response timeout must not fire first.
                let config = AsyncConnectionConfig::new().set_response_timeout(None);
                Ok(self
                    .client
                    .get_multiplexed_async_connection_with_config(&config)
                    .await?)
            }
        }
    }

    fn checkin_blocking(&self, conn: MultiplexedConnection) {
        if let Ok(mut idle) = self.blocking.lock() {
            idle.push(conn);
        }
    }
}

#[async_trait]
impl CoordinationStore for RedisStore {
    async fn ping(&self) -> QueueResult<()> {
        let mut conn = self.connection();
        let _: String = redis::cmd("PING").query_async(&mut conn).await?;
        Ok(())
    }

    async fn lpush(&self, key: &str, value: &str) -> QueueResult<()> {
        let mut conn = self.connection();
        redis::cmd("LPUSH")
            .arg(key)
            .arg(value)
            .query_async::<()>(&mut conn)
            .await?;
        Ok(())
    }

    async fn brpop(
        &self,
        keys: &[String],
        timeout: Duration,
    ) -> QueueResult<Option<(String, String)>> {
        if keys.is_empty() {
            tokio::time::sleep(timeout).await;
            return Ok(None);
        }

        // BRPOP 0 blocks forever.
        let wait = timeout.as_secs_f64().max(MIN_BLOCK_SECS);

        let mut conn = self.checkout_blocking().await?;
        let popped: Option<(String, String)> = redis::cmd("BRPOP")
            .arg(keys)
            .arg(wait)
            .query_async(&mut conn)
            .await?;
        // Only connections that completed a command go back to the free list.
        self.checkin_blocking(conn);
        Ok(popped)
    }

    async fn set_ex(&self, key: &str, value: &str, ttl: Duration) -> QueueResult<()> {
        let mut conn = self.connection();
        redis::cmd("SET")
            .arg(key)
            .arg(value)
            .arg("EX")
            .arg(ttl.as_secs().max(1))
            .query_async::<()>(&mut conn)
            .await?;
        Ok(())
    }

    async fn get(&self, key: &str) -> QueueResult<Option<String>> {
        let mut conn = self.connection();
        let value: Option<String> = redis::cmd("GET").arg(key).query_async(&mut conn).await?;
        Ok(value)
    }

    async fn del(&self, key: &str) -> QueueResult<()> {
        let mut conn = self.connection();
        redis::cmd("DEL").arg(key).query_async::<()>(&mut conn).await?;
        Ok(())
    }

    async fn zadd(&self, key: &str, member: &str, score: f64) -> QueueResult<()> {
        let mut conn = self.connection();
        redis::cmd("ZADD")
            .arg(key)
            .arg(score)
            .arg(member)
            .query_async::<()>(&mut conn)
            .await?;
        Ok(())
    }

    async fn zrangebyscore(&self, key: &str, max: f64) -> QueueResult<Vec<String>> {
        let mut conn = self.connection();
        let members: Vec<String> = redis::cmd("ZRANGEBYSCORE")
            .arg(key)
            .arg("-inf")
            .arg(max)
            .query_async(&mut conn)
            .await?;
        Ok(members)
    }

    async fn zrem(&self, key: &str, member: &str) -> QueueResult<bool> {
        let mut conn = self.connection();
        let removed: i64 = redis::cmd("ZREM")
            .arg(key)
            .arg(member)
            .query_async(&mut conn)
            .await?;
        Ok(removed > 0)
    }

    async fn incr_with_expiry(&self, key: &str, ttl: Duration) -> QueueResult<i64> {
        let mut conn = self.connection();
        // The window key is created with its TTL before the first INCR, inside
        // one MULTI, so a counter never exists without an expiry.
        let (count,): (i64,) = redis::pipe()
            .atomic()
            .cmd("SET")
            .arg(key)
            .arg(0)
            .arg("EX")
            .arg(ttl.as_secs().max(1))
            .arg("NX")
            .ignore()
            .cmd("INCR")
            .arg(key)
            .query_async(&mut conn)
            .await?;
        Ok(count)
    }

    async fn llen(&self, key: &str) -> QueueResult<u64> {
        let mut conn = self.connection();
        let len: u64 = redis::cmd("LLEN").arg(key).query_async(&mut conn).await?;
        Ok(len)
    }

    async fn zcard(&self, key: &str) -> QueueResult<u64> {
        let mut conn = self.connection();
        let len: u64 = redis::cmd("ZCARD").arg(key).query_async(&mut conn).await?;
        Ok(len)
    }

    async fn lrange(&self, key: &str, start: isize, stop: isize) -> QueueResult<Vec<String>> {
        let mut conn = self.connection();
        let values: Vec<String> = redis::cmd("LRANGE")
            .arg(key)
            .arg(start)
            .arg(stop)
            .query_async(&mut conn)
            .await?;
        Ok(values)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
    use tokio::net::{TcpListener, TcpStream};

    /// Minimal RESP2 server: PONG for PING, an empty reply for BRPOP once
    /// its timeout has elapsed, OK for everything else. Records every
    /// BRPOP timeout argument it receives.
    async fn spawn_slow_brpop_server() -> (String, Arc<Mutex<Vec<String>>>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let seen = Arc::new(Mutex::new(Vec::new()));

        let recorder = seen.clone();
        tokio::spawn(async move {
            while let Ok((socket, _)) = listener.accept().await {
                tokio::spawn(serve_connection(socket, recorder.clone()));
            }
        });

        (format!("redis://{}", addr), seen)
    }

    async fn read_command(reader: &mut BufReader<TcpStream>) -> Option<Vec<String>> {
        let mut line = String::new();
        if reader.read_line(&mut line).await.ok()? == 0 {
            return None;
        }
        let count: usize = line.trim_end().strip_prefix('*')?.parse().ok()?;

        let mut args = Vec::with_capacity(count);
        for _ in 0..count {
            line.clear();
            reader.read_line(&mut line).await.ok()?;
            let len: usize = line.trim_end().strip_prefix('$')?.parse().ok()?;
            let mut buf = vec![0u8; len + 2];
            reader.read_exact(&mut buf).await.ok()?;
            buf.truncate(len);
            args.push(String::from_utf8(buf).ok()?);
        }
        Some(args)
    }

    async fn serve_connection(socket: TcpStream, seen: Arc<Mutex<Vec<String>>>) {
        let mut reader = BufReader::new(socket);
        while let Some(args) = read_command(&mut reader).await {
            let reply: &[u8] = match args[0].to_ascii_uppercase().as_str() {
                "PING" => b"+PONG\r\n",
                "BRPOP" => {
                    let wait = args.last().cloned().unwrap_or_default();
                    seen.lock().unwrap().push(wait.clone());
                    let secs: f64 = wait.parse().unwrap_or(0.0);
                    tokio::time::sleep(Duration::from_secs_f64(secs)).await;
                    b"*-1\r\n"
                }
                _ => b"+OK\r\n",
            };
            if reader.get_mut().write_all(reply).await.is_err() {
                return;
            }
        }
    }

    #[tokio::test]
    async fn test_brpop_waits_out_its_full_timeout() {
        let (url, seen) = spawn_slow_brpop_server().await;
        let store = RedisStore::connect(&url).await.unwrap();
        let keys = vec!["high:store_raw".to_string()];

        let started = std::time::Instant::now();
        let popped = tokio::time::timeout(
            Duration::from_secs(5),
            store.brpop(&keys, Duration::from_secs(1)),
        )
        .await
        .unwrap();

        assert_eq!(popped.unwrap(), None);
        assert!(started.elapsed() >= Duration::from_millis(900));
        let sent: Vec<f64> = seen
            .lock()
            .unwrap()
            .iter()
            .map(|wait| wait.parse().unwrap())
            .collect();
        assert_eq!(sent, vec![1.0]);

        // The blocking connection went back to the free list.
        assert_eq!(store.blocking.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_brpop_never_sends_zero_timeout() {
        let (url, seen) = spawn_slow_brpop_server().await;
        let store = RedisStore::connect(&url).await.unwrap();
        let keys = vec!["low:analytics_export".to_string()];

        let popped = tokio::time::timeout(
            Duration::from_secs(5),
            store.brpop(&keys, Duration::ZERO),
        )
        .await
        .unwrap();

        assert_eq!(popped.unwrap(), None);
        let sent: f64 = seen.lock().unwrap()[0].parse().unwrap();
        assert!(sent > 0.0);
    }

    #[test]
    fn test_retry_policy_doubles_until_cap() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.delay_for(1), Duration::from_millis(200));
        assert_eq!(policy.delay_for(2), Duration::from_millis(400));
        assert_eq!(policy.delay_for(3), Duration::from_millis(800));
        assert_eq!(policy.delay_for(10), Duration::from_secs(5));
    }

    #[test]
    fn test_retry_policy_builder() {
        let policy = RetryPolicy::default()
            .with_max_retries(2)
            .with_initial_delay(Duration::from_secs(1));
        assert_eq!(policy.max_retries, 2);
        assert_eq!(policy.delay_for(1), Duration::from_secs(1));
    }

    #[tokio::test]
    #[ignore = "Requires actual Redis"]
    async fn test_connect_to_local_redis() {
        let store = RedisStore::connect("redis://127.0.0.1:6379").await.unwrap();
        store.ping().await.unwrap();
    }
}
