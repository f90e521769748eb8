//! # Parameter Cache
//!
//! Concurrent-safe table of the parameters last reported by the autopilot,
//! plus change notification. Entries are created lazily on first value
//! arrival and removed only by [`ParamCache::clear`] ahead of a full refresh,
//! so consumers must tolerate a transient empty state. Callers always get
//! copies, never live references.
//!
//! Two notification channels exist:
//!
//! - an observer registry keyed by parameter name (or `"*"` wildcard),
//!   invoked synchronously on every upsert but defensively: a panicking
//!   listener is caught and logged so it cannot stall the dispatch loop;
//! - a `tokio::sync::watch` revision counter that waiters (stable-count
//!   helpers) block on instead of busy-polling.

use std::collections::HashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use log::{error, trace};
use serde::Serialize;
use tokio::sync::watch;

use crate::link::wire::WireType;

/// Wildcard listener key matching every parameter.
pub const WILDCARD: &str = "*";

/// One cached parameter as last reported by the autopilot.
#[derive(Debug, Clone, Serialize)]
pub struct ParamRecord {
    pub name: String,
    /// Logical value. Integer wire types hold an exact integer here.
    pub value: f64,
    pub wire_type: WireType,
    /// Index of this parameter within the autopilot's full list.
    pub index: u16,
    /// Total parameter count the autopilot reported alongside this value.
    pub total_count: u16,
    pub last_updated: DateTime<Utc>,
}

/// Handle for removing a registered listener.
pub type ListenerId = u64;

type Listener = Arc<dyn Fn(&ParamRecord) + Send + Sync>;

struct CacheInner {
    records: HashMap<String, ParamRecord>,
    listeners: HashMap<String, Vec<(ListenerId, Listener)>>,
    next_listener: ListenerId,
}

pub struct ParamCache {
    inner: Mutex<CacheInner>,
    revision_tx: watch::Sender<u64>,
}

impl ParamCache {
    pub fn new() -> Self {
        let (revision_tx, _) = watch::channel(0u64);
        Self {
            inner: Mutex::new(CacheInner {
                records: HashMap::new(),
                listeners: HashMap::new(),
                next_listener: 1,
            }),
            revision_tx,
        }
    }

    /// Insert or overwrite by name (last write wins) and notify listeners.
    pub fn upsert(&self, record: ParamRecord) {
        let to_notify: Vec<Listener> = {
            let mut inner = self.lock();
            let mut hit: Vec<Listener> = Vec::new();
            for key in [record.name.as_str(), WILDCARD] {
                if let Some(list) = inner.listeners.get(key) {
                    hit.extend(list.iter().map(|(_, l)| Arc::clone(l)));
                }
            }
            trace!("cache upsert {} = {}", record.name, record.value);
            inner.records.insert(record.name.clone(), record.clone());
            hit
        };
        // Listeners run outside the lock so they may call back into the cache.
        for listener in to_notify {
            if catch_unwind(AssertUnwindSafe(|| listener(&record))).is_err() {
                error!("parameter listener panicked for {}", record.name);
            }
        }
        self.revision_tx.send_modify(|r| *r += 1);
    }

    pub fn get(&self, name: &str) -> Option<ParamRecord> {
        self.lock().records.get(name).cloned()
    }

    /// Copy of all entries.
    pub fn snapshot(&self) -> HashMap<String, ParamRecord> {
        self.lock().records.clone()
    }

    /// Empty the table ahead of a full refresh.
    pub fn clear(&self) {
        let removed = {
            let mut inner = self.lock();
            let n = inner.records.len();
            inner.records.clear();
            n
        };
        trace!("cache cleared ({} entries dropped)", removed);
        self.revision_tx.send_modify(|r| *r += 1);
    }

    pub fn len(&self) -> usize {
        self.lock().records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// True once the autopilot-reported total has been fully received, i.e.
    /// the cache holds at least as many entries as any record's total count.
    pub fn list_complete(&self) -> bool {
        let inner = self.lock();
        let total = inner
            .records
            .values()
            .map(|r| r.total_count)
            .max()
            .unwrap_or(0);
        total > 0 && inner.records.len() >= total as usize
    }

    /// Subscribe to the revision counter bumped on every upsert/clear.
    pub fn subscribe(&self) -> watch::Receiver<u64> {
        self.revision_tx.subscribe()
    }

    /// Register a listener for one parameter name, or [`WILDCARD`] for all.
    pub fn add_listener<F>(&self, pattern: &str, listener: F) -> ListenerId
    where
        F: Fn(&ParamRecord) + Send + Sync + 'static,
    {
        let mut inner = self.lock();
        let id = inner.next_listener;
        inner.next_listener += 1;
        inner
            .listeners
            .entry(pattern.to_string())
            .or_default()
            .push((id, Arc::new(listener)));
        id
    }

    pub fn remove_listener(&self, id: ListenerId) {
        let mut inner = self.lock();
        for list in inner.listeners.values_mut() {
            list.retain(|(lid, _)| *lid != id);
        }
        inner.listeners.retain(|_, list| !list.is_empty());
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, CacheInner> {
        // A poisoned cache mutex only means a listener-collection panicked
        // mid-update; the map itself is still consistent.
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl Default for ParamCache {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn record(name: &str, value: f64) -> ParamRecord {
        ParamRecord {
            name: name.to_string(),
            value,
            wire_type: WireType::Real32,
            index: 0,
            total_count: 1,
            last_updated: Utc::now(),
        }
    }

    #[test]
    fn upsert_is_last_write_wins() {
        let cache = ParamCache::new();
        cache.upsert(record("MC_ROLLRATE_P", 0.15));
        cache.upsert(record("MC_ROLLRATE_P", 0.2));
        assert_eq!(cache.len(), 1);
        assert_eq!(cache.get("MC_ROLLRATE_P").unwrap().value, 0.2);
        assert!(cache.get("NOPE").is_none());
    }

    #[test]
    fn clear_empties_table() {
        let cache = ParamCache::new();
        cache.upsert(record("A", 1.0));
        cache.upsert(record("B", 2.0));
        cache.clear();
        assert!(cache.is_empty());
        assert!(cache.snapshot().is_empty());
    }

    #[test]
    fn named_and_wildcard_listeners_fire() {
        let cache = ParamCache::new();
        let named = Arc::new(AtomicUsize::new(0));
        let all = Arc::new(AtomicUsize::new(0));
        let n = Arc::clone(&named);
        cache.add_listener("A", move |_| {
            n.fetch_add(1, Ordering::SeqCst);
        });
        let a = Arc::clone(&all);
        cache.add_listener(WILDCARD, move |_| {
            a.fetch_add(1, Ordering::SeqCst);
        });

        cache.upsert(record("A", 1.0));
        cache.upsert(record("B", 2.0));
        assert_eq!(named.load(Ordering::SeqCst), 1);
        assert_eq!(all.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn panicking_listener_does_not_block_others() {
        let cache = ParamCache::new();
        let counted = Arc::new(AtomicUsize::new(0));
        cache.add_listener(WILDCARD, |_| panic!("bad listener"));
        let c = Arc::clone(&counted);
        cache.add_listener(WILDCARD, move |_| {
            c.fetch_add(1, Ordering::SeqCst);
        });

        cache.upsert(record("A", 1.0));
        assert_eq!(counted.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn remove_listener_stops_delivery() {
        let cache = ParamCache::new();
        let count = Arc::new(AtomicUsize::new(0));
        let c = Arc::clone(&count);
        let id = cache.add_listener(WILDCARD, move |_| {
            c.fetch_add(1, Ordering::SeqCst);
        });
        cache.upsert(record("A", 1.0));
        cache.remove_listener(id);
        cache.upsert(record("A", 2.0));
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn list_complete_tracks_reported_total() {
        let cache = ParamCache::new();
        assert!(!cache.list_complete());
        let mut a = record("A", 1.0);
        a.total_count = 2;
        cache.upsert(a);
        assert!(!cache.list_complete());
        let mut b = record("B", 2.0);
        b.total_count = 2;
        cache.upsert(b);
        assert!(cache.list_complete());
    }

    #[tokio::test]
    async fn watch_revision_bumps_on_upsert() {
        let cache = ParamCache::new();
        let mut rx = cache.subscribe();
        let before = *rx.borrow_and_update();
        cache.upsert(record("A", 1.0));
        rx.changed().await.unwrap();
        assert!(*rx.borrow() > before);
    }
}
