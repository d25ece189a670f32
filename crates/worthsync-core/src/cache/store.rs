use std::collections::HashMap;
use std::sync::{Arc, Mutex, OnceLock, Weak};

use chrono::Utc;
use serde_json::Value;
use tracing::debug;

use crate::error::SyncError;

use super::entry::{Callback, Entry, Snapshot};
use super::lock::mutex_lock;

const SOURCE: &str = "cache::store";

/// Process-wide default store for JSON resources
static GLOBAL: OnceLock<Store<Value>> = OnceLock::new();

struct StoreInner<T> {
    entries: HashMap<String, Entry<T>>,
    next_subscriber_id: u64,
}

/// In-memory map from cache key to entry, owning subscriber notification.
///
/// Cloning is cheap and yields a handle to the same underlying map. Entries
/// are created lazily on first `subscribe`, `begin_fetch` or `invalidate`
/// and live for the lifetime of the store.
///
/// Callbacks always run after the internal lock is released, so a callback
/// may read the store again (or subscribe elsewhere) without deadlocking.
pub struct Store<T> {
    inner: Arc<Mutex<StoreInner<T>>>,
}

impl<T> Clone for Store<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T> Default for Store<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl Store<Value> {
    /// The shared store used when the application does not build its own.
    pub fn global() -> &'static Store<Value> {
        GLOBAL.get_or_init(Store::new)
    }
}

/// Result of `Store::invalidate`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Invalidation {
    pub sequence: u64,
    /// Whether anyone is listening; only then should a refetch be issued.
    pub has_subscribers: bool,
}

/// Subscriber notifications captured under the lock, delivered after it is
/// released.
#[must_use = "notifications are only delivered by calling send()"]
pub(crate) struct Notify<T> {
    snapshot: Snapshot<T>,
    callbacks: Vec<Callback<T>>,
}

impl<T> Notify<T> {
    pub fn send(self) {
        for callback in &self.callbacks {
            callback(&self.snapshot);
        }
    }
}

impl<T> Store<T> {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(StoreInner {
                entries: HashMap::new(),
                next_subscriber_id: 0,
            })),
        }
    }

    /// Current snapshot for `key`, if an entry exists. Never blocks on I/O.
    pub fn get(&self, key: &str) -> Option<Snapshot<T>> {
        let inner = mutex_lock(&self.inner, SOURCE, "get");
        inner.entries.get(key).map(|entry| entry.snapshot(key))
    }

    /// Register `callback` for updates to `key`.
    ///
    /// The callback is invoked once immediately with the current state, then
    /// after every change. Dropping the returned handle unsubscribes.
    pub fn subscribe<F>(&self, key: &str, callback: F) -> Subscription<T>
    where
        F: Fn(&Snapshot<T>) + Send + Sync + 'static,
    {
        let callback: Callback<T> = Arc::new(callback);
        let (id, snapshot) = {
            let mut inner = mutex_lock(&self.inner, SOURCE, "subscribe");
            let id = inner.next_subscriber_id;
            inner.next_subscriber_id += 1;
            let entry = inner.entries.entry(key.to_string()).or_default();
            entry.subscribers.insert(id, Arc::clone(&callback));
            (id, entry.snapshot(key))
        };
        debug!(key = %key, subscriber = id, "Subscribed");
        callback(&snapshot);

        Subscription {
            store: Arc::downgrade(&self.inner),
            key: key.to_string(),
            id: Some(id),
        }
    }

    pub fn subscriber_count(&self, key: &str) -> usize {
        let inner = mutex_lock(&self.inner, SOURCE, "subscriber_count");
        inner
            .entries
            .get(key)
            .map_or(0, |entry| entry.subscribers.len())
    }

    /// Current sequence number for `key`, `None` if the entry does not exist.
    pub fn sequence(&self, key: &str) -> Option<u64> {
        let inner = mutex_lock(&self.inner, SOURCE, "sequence");
        inner.entries.get(key).map(|entry| entry.sequence)
    }

    /// Replace `data` for `key`, clear any error and notify subscribers.
    pub fn set(&self, key: &str, data: T) {
        self.set_shared(key, Arc::new(data));
    }

    pub fn set_shared(&self, key: &str, data: Arc<T>) {
        let notify = {
            let mut inner = mutex_lock(&self.inner, SOURCE, "set");
            let entry = inner.entries.entry(key.to_string()).or_default();
            Self::apply_data(entry, data);
            Self::capture(entry, key)
        };
        notify.send();
    }

    /// Record a failure while keeping the last good `data` visible.
    pub fn set_error(&self, key: &str, error: SyncError) {
        let notify = {
            let mut inner = mutex_lock(&self.inner, SOURCE, "set_error");
            let entry = inner.entries.entry(key.to_string()).or_default();
            Self::apply_error(entry, error);
            Self::capture(entry, key)
        };
        notify.send();
    }

    /// Mark `key` as needing revalidation.
    ///
    /// Bumps the sequence so that any fetch already in flight can no longer
    /// write its result. Issuing the refetch is up to the caller, and only
    /// worthwhile when `has_subscribers` is set.
    pub fn invalidate(&self, key: &str) -> Invalidation {
        let mut inner = mutex_lock(&self.inner, SOURCE, "invalidate");
        let entry = inner.entries.entry(key.to_string()).or_default();
        entry.sequence += 1;
        entry.is_stale = true;
        let invalidation = Invalidation {
            sequence: entry.sequence,
            has_subscribers: !entry.subscribers.is_empty(),
        };
        debug!(
            key = %key,
            sequence = invalidation.sequence,
            has_subscribers = invalidation.has_subscribers,
            "Invalidated"
        );
        invalidation
    }

    /// Tag a new fetch: bump the sequence and mark the entry validating.
    pub(crate) fn begin_fetch(&self, key: &str) -> (u64, Notify<T>) {
        let mut inner = mutex_lock(&self.inner, SOURCE, "begin_fetch");
        let entry = inner.entries.entry(key.to_string()).or_default();
        entry.sequence += 1;
        entry.is_validating = true;
        (entry.sequence, Self::capture(entry, key))
    }

    /// Write `data` under a fresh sequence, superseding any in-flight fetch.
    pub(crate) fn replace(&self, key: &str, data: Arc<T>) -> u64 {
        let (sequence, notify) = {
            let mut inner = mutex_lock(&self.inner, SOURCE, "replace");
            let entry = inner.entries.entry(key.to_string()).or_default();
            entry.sequence += 1;
            Self::apply_data(entry, data);
            (entry.sequence, Self::capture(entry, key))
        };
        notify.send();
        sequence
    }

    /// Apply a fetch result only if no newer fetch or invalidation happened
    /// since it was issued. Returns whether the result was applied.
    pub(crate) fn commit(
        &self,
        key: &str,
        sequence: u64,
        result: Result<Arc<T>, SyncError>,
    ) -> bool {
        let notify = {
            let mut inner = mutex_lock(&self.inner, SOURCE, "commit");
            let Some(entry) = inner.entries.get_mut(key) else {
                return false;
            };
            if entry.sequence != sequence {
                return false;
            }
            match result {
                Ok(data) => Self::apply_data(entry, data),
                Err(error) => Self::apply_error(entry, error),
            }
            Self::capture(entry, key)
        };
        notify.send();
        true
    }

    /// Clear a leftover `is_validating` once no fetch for `key` remains in
    /// flight. Returns the notification to deliver, if the flag was set.
    pub(crate) fn settle(&self, key: &str) -> Option<Notify<T>> {
        let mut inner = mutex_lock(&self.inner, SOURCE, "settle");
        let entry = inner.entries.get_mut(key)?;
        if !entry.is_validating {
            return None;
        }
        entry.is_validating = false;
        debug!(key = %key, sequence = entry.sequence, "No fetch left in flight, settled");
        Some(Self::capture(entry, key))
    }

    fn apply_data(entry: &mut Entry<T>, data: Arc<T>) {
        entry.data = Some(data);
        entry.error = None;
        entry.is_validating = false;
        entry.is_stale = false;
        entry.updated_at = Some(Utc::now());
    }

    fn apply_error(entry: &mut Entry<T>, error: SyncError) {
        entry.error = Some(error);
        entry.is_validating = false;
    }

    fn capture(entry: &Entry<T>, key: &str) -> Notify<T> {
        Notify {
            snapshot: entry.snapshot(key),
            callbacks: entry.subscribers.values().cloned().collect(),
        }
    }
}

/// Handle for one registered callback. Unsubscribes on drop.
#[must_use = "dropping a Subscription unsubscribes immediately"]
pub struct Subscription<T> {
    store: Weak<Mutex<StoreInner<T>>>,
    key: String,
    id: Option<u64>,
}

impl<T> Subscription<T> {
    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn unsubscribe(mut self) {
        self.release();
    }

    fn release(&mut self) {
        let Some(id) = self.id.take() else {
            return;
        };
        let Some(inner) = self.store.upgrade() else {
            return;
        };
        let mut inner = mutex_lock(&inner, SOURCE, "unsubscribe");
        if let Some(entry) = inner.entries.get_mut(&self.key) {
            entry.subscribers.remove(&id);
        }
        debug!(key = %self.key, subscriber = id, "Unsubscribed");
    }
}

impl<T> Drop for Subscription<T> {
    fn drop(&mut self) {
        self.release();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn recorder() -> (Arc<Mutex<Vec<Snapshot<String>>>>, impl Fn(&Snapshot<String>) + Send + Sync) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        (seen, move |snap: &Snapshot<String>| {
            sink.lock().unwrap().push(snap.clone());
        })
    }

    #[test]
    fn test_get_missing_key() {
        let store: Store<String> = Store::new();
        assert!(store.get("/api/dashboard/").is_none());
        assert_eq!(store.subscriber_count("/api/dashboard/"), 0);
    }

    #[test]
    fn test_subscribe_invokes_immediately() {
        let store = Store::new();
        store.set("k", "cached".to_string());

        let (seen, callback) = recorder();
        let _sub = store.subscribe("k", callback);

        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].data.as_deref().map(String::as_str), Some("cached"));
    }

    #[test]
    fn test_subscribe_creates_entry_lazily() {
        let store: Store<String> = Store::new();
        let (seen, callback) = recorder();
        let _sub = store.subscribe("k", callback);
        assert!(store.get("k").is_some());
        assert!(seen.lock().unwrap()[0].data.is_none());
    }

    #[test]
    fn test_set_notifies_all_subscribers() {
        let store = Store::new();
        let (a, cb_a) = recorder();
        let (b, cb_b) = recorder();
        let _sa = store.subscribe("k", cb_a);
        let _sb = store.subscribe("k", cb_b);

        store.set("k", "v1".to_string());

        for seen in [a, b] {
            let seen = seen.lock().unwrap();
            assert_eq!(seen.len(), 2);
            assert_eq!(seen[1].data.as_deref().map(String::as_str), Some("v1"));
        }
    }

    #[test]
    fn test_set_replaces_wholesale() {
        let store = Store::new();
        store.set("k", "old".to_string());
        let before = store.get("k").unwrap().data.unwrap();

        store.set("k", "new".to_string());
        let after = store.get("k").unwrap().data.unwrap();

        assert_eq!(*before, "old");
        assert_eq!(*after, "new");
        assert!(!Arc::ptr_eq(&before, &after));
    }

    #[test]
    fn test_set_error_keeps_data() {
        let store = Store::new();
        store.set("k", "good".to_string());
        store.set_error("k", SyncError::Network("refused".into()));

        let snap = store.get("k").unwrap();
        assert!(snap.is_error());
        assert!(!snap.is_validating);
        assert_eq!(snap.data.as_deref().map(String::as_str), Some("good"));

        store.set("k", "better".to_string());
        assert!(!store.get("k").unwrap().is_error());
    }

    #[test]
    fn test_invalidate_bumps_sequence_and_marks_stale() {
        let store = Store::new();
        store.set("k", "v".to_string());
        let before = store.sequence("k").unwrap();

        let invalidation = store.invalidate("k");
        assert_eq!(invalidation.sequence, before + 1);
        assert!(!invalidation.has_subscribers);

        let snap = store.get("k").unwrap();
        assert!(snap.is_stale);
        assert_eq!(snap.data.as_deref().map(String::as_str), Some("v"));
    }

    #[test]
    fn test_commit_discards_superseded_sequence() {
        let store: Store<String> = Store::new();
        let (first, notify) = store.begin_fetch("k");
        notify.send();
        let (second, notify) = store.begin_fetch("k");
        notify.send();

        assert!(store.commit("k", second, Ok(Arc::new("B".to_string()))));
        assert!(!store.commit("k", first, Ok(Arc::new("A".to_string()))));
        assert_eq!(store.get("k").unwrap().data.as_deref().map(String::as_str), Some("B"));
    }

    #[test]
    fn test_unsubscribe_stops_notifications() {
        let store = Store::new();
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        let sub = store.subscribe("k", move |_: &Snapshot<String>| {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        sub.unsubscribe();
        store.set("k", "v".to_string());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(store.subscriber_count("k"), 0);
    }

    #[test]
    fn test_drop_unsubscribes() {
        let store: Store<String> = Store::new();
        {
            let _sub = store.subscribe("k", |_| {});
            assert_eq!(store.subscriber_count("k"), 1);
        }
        assert_eq!(store.subscriber_count("k"), 0);
    }

    #[test]
    fn test_callback_may_read_store() {
        let store: Store<String> = Store::new();
        let reader = store.clone();
        let seen = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&seen);
        let _sub = store.subscribe("k", move |snap| {
            // Re-entrant read must not deadlock
            let current = reader.get(&snap.key).unwrap();
            assert_eq!(current.sequence, snap.sequence);
            counter.fetch_add(1, Ordering::SeqCst);
        });
        store.set("k", "v".to_string());
        assert_eq!(seen.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_global_store_is_shared() {
        let a = Store::global();
        let b = Store::global();
        a.set("/test/global", Value::from(1));
        assert_eq!(b.get("/test/global").unwrap().data.as_deref(), Some(&Value::from(1)));
    }
}
