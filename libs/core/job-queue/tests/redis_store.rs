//! RedisStore against a throwaway Redis container.
//!
//! Run with `cargo test -p job-queue --test redis_store -- --ignored`.

use job_queue::{
    CoordinationStore, DELAYED_KEY, JobPriority, JobType, Payload, QueueClient, RateLimitConfig,
    RateLimiter, RedisStore, tracking_key,
};
use std::sync::Arc;
use std::time::Duration;
use test_utils::TestRedis;

async fn store(redis: &TestRedis) -> Arc<RedisStore> {
    Arc::new(RedisStore::connect(redis.connection_string()).await.unwrap())
}

#[tokio::test]
#[ignore = "Requires Docker"]
async fn brpop_honours_key_order_and_timeout() {
    let redis = TestRedis::new().await;
    let store = store(&redis).await;

    store.lpush("low:store_raw", "b").await.unwrap();
    store.lpush("high:store_raw", "a").await.unwrap();

    let keys = vec!["high:store_raw".to_string(), "low:store_raw".to_string()];
    let popped = store.brpop(&keys, Duration::from_secs(1)).await.unwrap();
    assert_eq!(popped, Some(("high:store_raw".to_string(), "a".to_string())));

    store.brpop(&keys, Duration::from_secs(1)).await.unwrap();
    let empty = store.brpop(&keys, Duration::from_secs(1)).await.unwrap();
    assert_eq!(empty, None);
}

#[tokio::test]
#[ignore = "Requires Docker"]
async fn blocking_pop_does_not_stall_other_commands() {
    let redis = TestRedis::new().await;
    let store = store(&redis).await;

    let waiter = {
        let store = store.clone();
        tokio::spawn(async move {
            store
                .brpop(&["high:enrich_trace".to_string()], Duration::from_secs(3))
                .await
        })
    };

    tokio::time::sleep(Duration::from_millis(100)).await;
    let started = std::time::Instant::now();
    store.ping().await.unwrap();
    assert!(started.elapsed() < Duration::from_secs(1));

    store.lpush("high:enrich_trace", "job").await.unwrap();
    let popped = waiter.await.unwrap().unwrap();
    assert_eq!(popped.map(|(_, v)| v), Some("job".to_string()));
}

#[tokio::test]
#[ignore = "Requires Docker"]
async fn sorted_set_and_counter_primitives() {
    let redis = TestRedis::new().await;
    let store = store(&redis).await;

    store.zadd("delayed", "late", 20.0).await.unwrap();
    store.zadd("delayed", "early", 10.0).await.unwrap();
    assert_eq!(
        store.zrangebyscore("delayed", 15.0).await.unwrap(),
        vec!["early".to_string()]
    );
    assert!(store.zrem("delayed", "early").await.unwrap());
    assert!(!store.zrem("delayed", "early").await.unwrap());
    assert_eq!(store.zcard("delayed").await.unwrap(), 1);

    let ttl = Duration::from_secs(60);
    assert_eq!(store.incr_with_expiry("counter", ttl).await.unwrap(), 1);
    assert_eq!(store.incr_with_expiry("counter", ttl).await.unwrap(), 2);
}

#[tokio::test]
#[ignore = "Requires Docker"]
async fn counter_always_carries_its_window_expiry() {
    let redis = TestRedis::new().await;
    let store = store(&redis).await;
    let key = "rate_limit:minute:key-a:28333333";

    store
        .incr_with_expiry(key, Duration::from_secs(60))
        .await
        .unwrap();
    let first = redis.ttl(key).await;
    assert!(first > 0 && first <= 60);

    // Later increments keep the original window instead of extending it.
    store
        .incr_with_expiry(key, Duration::from_secs(3600))
        .await
        .unwrap();
    let second = redis.ttl(key).await;
    assert!(second > 0 && second <= 60);
}

#[tokio::test]
#[ignore = "Requires Docker"]
async fn queue_round_trip_through_redis() {
    let redis = TestRedis::new().await;
    let store = store(&redis).await;
    let client = QueueClient::new(store.clone());

    let job = client
        .enqueue(JobType::StoreRaw, JobPriority::High, Payload::new())
        .await
        .unwrap();
    assert!(client.tracked_job(&job.id).await.unwrap().is_some());
    assert_eq!(redis.list_len("high:store_raw").await, 1);

    let tracking_ttl = redis.ttl(&tracking_key(&job.id)).await;
    assert!(tracking_ttl > 23 * 60 * 60 && tracking_ttl <= 24 * 60 * 60);

    let mut dequeued = client
        .dequeue(&JobType::ALL, Duration::from_secs(1))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(dequeued.id, job.id);

    client.fail_job(&mut dequeued, "transient").await.unwrap();
    assert_eq!(store.zcard(DELAYED_KEY).await.unwrap(), 1);

    let stats = client.get_queue_stats().await;
    assert_eq!(stats.delayed, Some(1));
    assert_eq!(stats.summary().total_pending, 0);
}

#[tokio::test]
#[ignore = "Requires Docker"]
async fn rate_limiter_counts_per_caller() {
    let redis = TestRedis::new().await;
    let store = store(&redis).await;
    let limiter = RateLimiter::new(
        store,
        RateLimitConfig {
            per_minute: 2,
            per_hour: 100,
        },
    );

    assert!(limiter.check("key-a").await.allowed);
    assert!(limiter.check("key-a").await.allowed);
    assert!(!limiter.check("key-a").await.allowed);
    assert!(limiter.check("key-b").await.allowed);

    let status = limiter.status("key-a").await.unwrap();
    assert_eq!(status.minute.used, 3);
    assert_eq!(limiter.reset("key-a").await, 4);
}
