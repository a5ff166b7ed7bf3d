//! In-process coordination store.
//!
//! Mirrors the Redis semantics the queue relies on: lists grow at the head
//! and pop from the tail, strings and counters expire against the injected
//! clock, and sorted sets order by score then member.

use super::CoordinationStore;
use crate::clock::{Clock, SystemClock};
use crate::error::{QueueError, QueueResult};
use async_trait::async_trait;
use chrono::{DateTime, TimeDelta, Utc};
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::Notify;
use tokio::time::Instant;

#[derive(Debug, Default)]
struct State {
    lists: HashMap<String, VecDeque<String>>,
    strings: HashMap<String, Entry>,
    sorted_sets: HashMap<String, HashMap<String, f64>>,
}

#[derive(Debug, Clone)]
struct Entry {
    value: String,
    expires_at: Option<DateTime<Utc>>,
}

impl Entry {
    fn is_live(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_none_or(|at| at > now)
    }
}

/// [`CoordinationStore`] kept entirely in memory. Clones share state.
#[derive(Debug, Clone)]
pub struct MemoryStore {
    state: Arc<Mutex<State>>,
    pushed: Arc<Notify>,
    clock: Arc<dyn Clock>,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }

    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self {
            state: Arc::new(Mutex::new(State::default())),
            pushed: Arc::new(Notify::new()),
            clock,
        }
    }

    fn lock(&self) -> QueueResult<MutexGuard<'_, State>> {
        self.state
            .lock()
            .map_err(|_| QueueError::store("memory store lock poisoned"))
    }

    fn try_pop(&self, keys: &[String]) -> QueueResult<Option<(String, String)>> {
        let mut state = self.lock()?;
        for key in keys {
            if let Some(value) = state.lists.get_mut(key).and_then(VecDeque::pop_back) {
                return Ok(Some((key.clone(), value)));
            }
        }
        Ok(None)
    }

    fn expiry(&self, ttl: Duration) -> DateTime<Utc> {
        TimeDelta::from_std(ttl)
            .ok()
            .and_then(|ttl| self.clock.now().checked_add_signed(ttl))
            .unwrap_or(DateTime::<Utc>::MAX_UTC)
    }
}

#[async_trait]
impl CoordinationStore for MemoryStore {
    async fn ping(&self) -> QueueResult<()> {
        self.lock().map(|_| ())
    }

    async fn lpush(&self, key: &str, value: &str) -> QueueResult<()> {
        self.lock()?
            .lists
            .entry(key.to_string())
            .or_default()
            .push_front(value.to_string());
        self.pushed.notify_waiters();
        Ok(())
    }

    async fn brpop(
        &self,
        keys: &[String],
        timeout: Duration,
    ) -> QueueResult<Option<(String, String)>> {
        let deadline = Instant::now() + timeout;
        loop {
            // Register interest before checking so a push between the check
            // and the wait still wakes us.
            let notified = self.pushed.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if let Some(hit) = self.try_pop(keys)? {
                return Ok(Some(hit));
            }
            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                return self.try_pop(keys);
            }
        }
    }

    async fn set_ex(&self, key: &str, value: &str, ttl: Duration) -> QueueResult<()> {
        let expires_at = Some(self.expiry(ttl));
        self.lock()?.strings.insert(
            key.to_string(),
            Entry {
                value: value.to_string(),
                expires_at,
            },
        );
        Ok(())
    }

    async fn get(&self, key: &str) -> QueueResult<Option<String>> {
        let now = self.clock.now();
        let state = self.lock()?;
        Ok(state
            .strings
            .get(key)
            .filter(|entry| entry.is_live(now))
            .map(|entry| entry.value.clone()))
    }

    async fn del(&self, key: &str) -> QueueResult<()> {
        let mut state = self.lock()?;
        state.strings.remove(key);
        state.lists.remove(key);
        state.sorted_sets.remove(key);
        Ok(())
    }

    async fn zadd(&self, key: &str, member: &str, score: f64) -> QueueResult<()> {
        self.lock()?
            .sorted_sets
            .entry(key.to_string())
            .or_default()
            .insert(member.to_string(), score);
        Ok(())
    }

    async fn zrangebyscore(&self, key: &str, max: f64) -> QueueResult<Vec<String>> {
        let state = self.lock()?;
        let Some(set) = state.sorted_sets.get(key) else {
            return Ok(Vec::new());
        };
        let mut due: Vec<(&String, f64)> = set
            .iter()
            .filter(|(_, score)| **score <= max)
            .map(|(member, score)| (member, *score))
            .collect();
        due.sort_by(|a, b| a.1.total_cmp(&b.1).then_with(|| a.0.cmp(b.0)));
        Ok(due.into_iter().map(|(member, _)| member.clone()).collect())
    }

    async fn zrem(&self, key: &str, member: &str) -> QueueResult<bool> {
        let mut state = self.lock()?;
        Ok(state
            .sorted_sets
            .get_mut(key)
            .and_then(|set| set.remove(member))
            .is_some())
    }

    async fn incr_with_expiry(&self, key: &str, ttl: Duration) -> QueueResult<i64> {
        let now = self.clock.now();
        let expires_at = self.expiry(ttl);
        let mut state = self.lock()?;

        let current = match state.strings.get(key) {
            Some(entry) if entry.is_live(now) => Some(entry.clone()),
            _ => None,
        };
        let (count, expires_at) = match current {
            Some(entry) => {
                let count = entry.value.parse::<i64>().map_err(|_| {
                    QueueError::store(format!("value at {} is not an integer", key))
                })?;
                (count + 1, entry.expires_at)
            }
            None => (1, Some(expires_at)),
        };

        state.strings.insert(
            key.to_string(),
            Entry {
                value: count.to_string(),
                expires_at,
            },
        );
        Ok(count)
    }

    async fn llen(&self, key: &str) -> QueueResult<u64> {
        let state = self.lock()?;
        Ok(state.lists.get(key).map_or(0, |list| list.len() as u64))
    }

    async fn zcard(&self, key: &str) -> QueueResult<u64> {
        let state = self.lock()?;
        Ok(state.sorted_sets.get(key).map_or(0, |set| set.len() as u64))
    }

    async fn lrange(&self, key: &str, start: isize, stop: isize) -> QueueResult<Vec<String>> {
        let state = self.lock()?;
        let Some(list) = state.lists.get(key) else {
            return Ok(Vec::new());
        };

        let len = list.len() as isize;
        let resolve = |idx: isize| if idx < 0 { len + idx } else { idx };
        let start = resolve(start).max(0);
        let stop = resolve(stop).min(len - 1);
        if start > stop {
            return Ok(Vec::new());
        }

        Ok(list
            .iter()
            .skip(start as usize)
            .take((stop - start + 1) as usize)
            .cloned()
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;

    fn keys(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    #[tokio::test]
    async fn test_list_is_fifo_through_lpush_brpop() {
        let store = MemoryStore::new();
        store.lpush("q", "first").await.unwrap();
        store.lpush("q", "second").await.unwrap();

        let popped = store.brpop(&keys(&["q"]), Duration::from_millis(10)).await.unwrap();
        assert_eq!(popped, Some(("q".to_string(), "first".to_string())));
        assert_eq!(store.llen("q").await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_brpop_consults_keys_in_order() {
        let store = MemoryStore::new();
        store.lpush("low", "l").await.unwrap();
        store.lpush("high", "h").await.unwrap();

        let popped = store
            .brpop(&keys(&["high", "low"]), Duration::from_millis(10))
            .await
            .unwrap();
        assert_eq!(popped.unwrap().0, "high");
    }

    #[tokio::test(start_paused = true)]
    async fn test_brpop_times_out_empty() {
        let store = MemoryStore::new();
        let popped = store.brpop(&keys(&["q"]), Duration::from_secs(5)).await.unwrap();
        assert!(popped.is_none());
    }

    #[tokio::test]
    async fn test_brpop_wakes_on_push() {
        let store = MemoryStore::new();
        let producer = store.clone();
        let handle = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            producer.lpush("q", "late").await.unwrap();
        });

        let popped = store.brpop(&keys(&["q"]), Duration::from_secs(2)).await.unwrap();
        assert_eq!(popped.map(|(_, v)| v), Some("late".to_string()));
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn test_set_ex_expires_with_clock() {
        let clock = ManualClock::at_unix(1_000);
        let store = MemoryStore::with_clock(Arc::new(clock.clone()));
        store.set_ex("k", "v", Duration::from_secs(60)).await.unwrap();
        assert_eq!(store.get("k").await.unwrap().as_deref(), Some("v"));

        clock.advance(Duration::from_secs(60));
        assert!(store.get("k").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_incr_sets_expiry_only_on_first_increment() {
        let clock = ManualClock::at_unix(0);
        let store = MemoryStore::with_clock(Arc::new(clock.clone()));
        let ttl = Duration::from_secs(60);

        assert_eq!(store.incr_with_expiry("c", ttl).await.unwrap(), 1);
        clock.advance(Duration::from_secs(30));
        assert_eq!(store.incr_with_expiry("c", ttl).await.unwrap(), 2);

        // Expiry was fixed by the first increment, not pushed out by the second.
        clock.advance(Duration::from_secs(30));
        assert_eq!(store.incr_with_expiry("c", ttl).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_sorted_set_range_and_remove() {
        let store = MemoryStore::new();
        store.zadd("z", "b", 20.0).await.unwrap();
        store.zadd("z", "a", 10.0).await.unwrap();
        store.zadd("z", "c", 30.0).await.unwrap();

        assert_eq!(store.zrangebyscore("z", 20.0).await.unwrap(), vec!["a", "b"]);
        assert!(store.zrem("z", "a").await.unwrap());
        assert!(!store.zrem("z", "a").await.unwrap());
        assert_eq!(store.zcard("z").await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_lrange_handles_negative_indexes() {
        let store = MemoryStore::new();
        for v in ["a", "b", "c"] {
            store.lpush("l", v).await.unwrap();
        }
        assert_eq!(store.lrange("l", 0, -1).await.unwrap(), vec!["c", "b", "a"]);
        assert_eq!(store.lrange("l", 0, 1).await.unwrap(), vec!["c", "b"]);
        assert!(store.lrange("l", 5, 9).await.unwrap().is_empty());
        assert!(store.lrange("missing", 0, -1).await.unwrap().is_empty());
    }
}
