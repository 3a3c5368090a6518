use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use std::time::Duration;

fn to_chrono(duration: Duration) -> chrono::Duration {
    chrono::Duration::from_std(duration).unwrap_or_else(|_| chrono::Duration::weeks(52 * 100))
}

/// Source of "now", injectable so tests can move time.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// A clock that only moves when told to.
#[derive(Debug)]
pub struct ManualClock {
    now: Mutex<DateTime<Utc>>,
}

impl ManualClock {
    pub fn new(start: DateTime<Utc>) -> Self {
        Self {
            now: Mutex::new(start),
        }
    }

    pub fn advance(&self, by: Duration) {
        let mut now = self.now.lock().unwrap_or_else(PoisonError::into_inner);
        *now += to_chrono(by);
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// How one request treats the cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CachePolicy {
    /// Serve a fresh entry if there is one, store what gets fetched.
    #[default]
    Normal,
    /// Always fetch, store the result.
    Refresh,
    /// Always fetch, leave the cache alone.
    Bypass,
}

impl CachePolicy {
    /// `debug` wins over `refresh`.
    pub fn from_flags(debug: bool, refresh: bool) -> Self {
        if debug {
            CachePolicy::Bypass
        } else if refresh {
            CachePolicy::Refresh
        } else {
            CachePolicy::Normal
        }
    }

    pub fn reads_cache(self) -> bool {
        self == CachePolicy::Normal
    }

    pub fn writes_cache(self) -> bool {
        self != CachePolicy::Bypass
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheState {
    Empty,
    Fresh,
    Stale,
}

#[derive(Debug, Clone)]
pub struct CacheEntry<T> {
    pub value: T,
    pub expires_at: DateTime<Utc>,
}

/// In-memory key -> value cache with a fixed time to live.
///
/// Entries are only ever replaced whole. Stale entries are kept but never
/// served. The lock is not held while fetching, so two concurrent misses on
/// the same key both fetch and the last write wins.
pub struct TtlCache<T> {
    ttl: chrono::Duration,
    clock: Arc<dyn Clock>,
    entries: RwLock<HashMap<String, CacheEntry<T>>>,
}

impl<T: Clone> TtlCache<T> {
    pub fn new(ttl: Duration, clock: Arc<dyn Clock>) -> Self {
        Self {
            ttl: to_chrono(ttl),
            clock,
            entries: RwLock::new(HashMap::new()),
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl.to_std().unwrap_or(Duration::MAX)
    }

    /// The value under `key`, if it has not expired.
    pub fn get(&self, key: &str) -> Option<T> {
        let now = self.clock.now();
        let entries = self.entries.read().unwrap_or_else(PoisonError::into_inner);
        entries
            .get(key)
            .filter(|entry| now < entry.expires_at)
            .map(|entry| entry.value.clone())
    }

    pub fn insert(&self, key: &str, value: T) {
        let expires_at = self
            .clock
            .now()
            .checked_add_signed(self.ttl)
            .unwrap_or(DateTime::<Utc>::MAX_UTC);
        let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        entries.insert(key.to_string(), CacheEntry { value, expires_at });
    }

    pub fn state(&self, key: &str) -> CacheState {
        let now = self.clock.now();
        let entries = self.entries.read().unwrap_or_else(PoisonError::into_inner);
        match entries.get(key) {
            None => CacheState::Empty,
            Some(entry) if now < entry.expires_at => CacheState::Fresh,
            Some(_) => CacheState::Stale,
        }
    }

    /// Serve `key` according to `policy`, calling `fetch` on a miss.
    ///
    /// A failed fetch leaves any existing entry untouched and returns the
    /// error; stale data is never served in its place.
    pub async fn get_or_fetch<F, Fut, E>(&self, key: &str, policy: CachePolicy, fetch: F) -> Result<T, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        if policy.reads_cache() {
            if let Some(value) = self.get(key) {
                tracing::debug!(key, "cache hit");
                return Ok(value);
            }
        }

        let value = fetch().await?;

        if policy.writes_cache() {
            self.insert(key, value.clone());
        }
        Ok(value)
    }
}
