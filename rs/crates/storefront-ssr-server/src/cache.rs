//! Crawler response cache.
//!
//! Rendered pages served to link-preview crawlers are kept in memory, keyed
//! by the raw request path including the query string. An entry is fresh
//! while `now - stored_at < ttl`; stale entries are only replaced, never
//! swept, so the map grows with the number of distinct crawled paths.
//! Entries are per process and lost on restart.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::{Duration, Instant};

pub trait Clock: Send + Sync {
    fn now(&self) -> Instant;
}

pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct CachedPage {
    pub html: String,
    pub stored_at: Instant,
}

pub trait PageCache: Send + Sync {
    /// Fresh entry for `key`, if any.
    fn get(&self, key: &str) -> Option<CachedPage>;
    /// Store (or replace) the page for `key`, stamped with the current time.
    fn put(&self, key: String, html: String);
    /// Number of stored entries, fresh or stale.
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

pub struct MemoryPageCache {
    entries: RwLock<HashMap<String, CachedPage>>,
    ttl: Duration,
    clock: Arc<dyn Clock>,
}

impl MemoryPageCache {
    pub fn new(ttl: Duration) -> Self {
        Self::with_clock(ttl, Arc::new(SystemClock))
    }

    pub fn with_clock(ttl: Duration, clock: Arc<dyn Clock>) -> Self {
        MemoryPageCache {
            entries: RwLock::new(HashMap::new()),
            ttl,
            clock,
        }
    }
}

impl PageCache for MemoryPageCache {
    fn get(&self, key: &str) -> Option<CachedPage> {
        let entries = self.entries.read().unwrap_or_else(|e| e.into_inner());
        let entry = entries.get(key)?;
        let age = self.clock.now().saturating_duration_since(entry.stored_at);
        if age < self.ttl {
            Some(entry.clone())
        } else {
            None
        }
    }

    fn put(&self, key: String, html: String) {
        let page = CachedPage { html, stored_at: self.clock.now() };
        self.entries
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(key, page);
    }

    fn len(&self) -> usize {
        self.entries.read().unwrap_or_else(|e| e.into_inner()).len()
    }
}

/// Test clock that only moves when told to.
#[cfg(test)]
pub struct ManualClock {
    now: std::sync::Mutex<Instant>,
}

#[cfg(test)]
impl ManualClock {
    pub fn new() -> Self {
        ManualClock { now: std::sync::Mutex::new(Instant::now()) }
    }

    pub fn advance(&self, by: Duration) {
        *self.now.lock().unwrap() += by;
    }
}

#[cfg(test)]
impl Clock for ManualClock {
    fn now(&self) -> Instant {
        *self.now.lock().unwrap()
    }
}
