use crate::clock::{Clock, MonotonicClock};
use crate::store::CounterStore;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum MemoryStoreError {
    #[error("value at {key:?} is not an integer")]
    NotAnInteger { key: String },
}

#[derive(Debug, Clone)]
struct Entry {
    value: String,
    // Millis on the store's clock; `None` never expires.
    expires_at: Option<u64>,
}

/// In-process store with Redis-like expiry semantics.
///
/// Clones share the same data, so one store can back several limiters and caches.
#[derive(Debug, Clone)]
pub struct InMemoryStore {
    data: Arc<Mutex<HashMap<String, Entry>>>,
    clock: Arc<dyn Clock>,
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::with_clock(MonotonicClock::default())
    }
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Use `clock` to decide expiry (tests pass a [`crate::clock::ManualClock`]).
    pub fn with_clock<C: Clock + 'static>(clock: C) -> Self {
        Self { data: Arc::new(Mutex::new(HashMap::new())), clock: Arc::new(clock) }
    }

    /// Number of live keys.
    pub fn len(&self) -> usize {
        let now = self.clock.now_millis();
        self.lock().values().filter(|e| is_live(e, now)).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drop expired entries. Reads already ignore them; this only reclaims memory.
    pub fn purge_expired(&self) -> usize {
        let now = self.clock.now_millis();
        let mut data = self.lock();
        let before = data.len();
        data.retain(|_, e| is_live(e, now));
        before - data.len()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, Entry>> {
        // A panic mid-operation cannot leave an entry half-written, so poisoning is ignored.
        self.data.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn deadline(&self, ttl: Duration) -> u64 {
        let ttl = u64::try_from(ttl.as_millis()).unwrap_or(u64::MAX);
        self.clock.now_millis().saturating_add(ttl)
    }
}

fn is_live(entry: &Entry, now: u64) -> bool {
    !matches!(entry.expires_at, Some(at) if at <= now)
}

#[async_trait]
impl CounterStore for InMemoryStore {
    type Error = MemoryStoreError;

    async fn get(&self, key: &str) -> Result<Option<String>, Self::Error> {
        let now = self.clock.now_millis();
        Ok(self.lock().get(key).filter(|e| is_live(e, now)).map(|e| e.value.clone()))
    }

    async fn set(&self, key: &str, value: &str, ttl: Duration) -> Result<(), Self::Error> {
        let expires_at = Some(self.deadline(ttl));
        self.lock().insert(key.to_string(), Entry { value: value.to_string(), expires_at });
        Ok(())
    }

    async fn incr(&self, key: &str) -> Result<i64, Self::Error> {
        let now = self.clock.now_millis();
        let mut data = self.lock();
        let entry = data
            .entry(key.to_string())
            .and_modify(|e| {
                if !is_live(e, now) {
                    *e = Entry { value: "0".into(), expires_at: None };
                }
            })
            .or_insert_with(|| Entry { value: "0".into(), expires_at: None });

        let current: i64 = entry
            .value
            .parse()
            .map_err(|_| MemoryStoreError::NotAnInteger { key: key.to_string() })?;
        let next = current.saturating_add(1);
        entry.value = next.to_string();
        Ok(next)
    }

    async fn expire(&self, key: &str, ttl: Duration) -> Result<(), Self::Error> {
        let now = self.clock.now_millis();
        let deadline = self.deadline(ttl);
        if let Some(entry) = self.lock().get_mut(key).filter(|e| is_live(e, now)) {
            entry.expires_at = Some(deadline);
        }
        Ok(())
    }

    async fn ttl(&self, key: &str) -> Result<Option<Duration>, Self::Error> {
        let now = self.clock.now_millis();
        let data = self.lock();
        let remaining = data
            .get(key)
            .filter(|e| is_live(e, now))
            .and_then(|e| e.expires_at)
            .map(|at| Duration::from_millis(at - now));
        Ok(remaining)
    }
}
