use crate::error::CorrelationError;
use camrelay::utils::now;
use std::collections::HashMap;
use std::collections::hash_map::Entry;
use std::hash::Hash;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;
use tokio::sync::oneshot;

/// Default time a caller waits for a device to answer a relayed request.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

struct PendingEntry<V> {
    serial: u64,

    /// Microseconds since the UNIX epoch.
    created_at: u64,
    tx: oneshot::Sender<V>,
}

type EntryMap<K, V> = Mutex<HashMap<K, PendingEntry<V>>>;

fn lock_entries<K, V>(entries: &EntryMap<K, V>) -> MutexGuard<'_, HashMap<K, PendingEntry<V>>> {
    entries.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Matches asynchronous responses to callers blocked on a request.
///
/// A caller registers a key, sends its request, then awaits the returned
/// slot. Whoever receives the response calls `resolve` with the same key.
/// Each entry leaves the map exactly once: through `resolve`, through the
/// timeout in `wait`, or when its slot is dropped unanswered.
///
/// Keys must be unique among in-flight requests; registering a key that is
/// already pending is rejected instead of orphaning the earlier waiter.
pub struct PendingRequests<K, V>
where
    K: Eq + Hash,
{
    entries: Arc<EntryMap<K, V>>,
    next_serial: AtomicU64,
    timeout: Duration,
}

impl<K, V> Default for PendingRequests<K, V>
where
    K: Eq + Hash + Clone,
{
    fn default() -> Self {
        Self::new(DEFAULT_REQUEST_TIMEOUT)
    }
}

impl<K, V> PendingRequests<K, V>
where
    K: Eq + Hash + Clone,
{
    pub fn new(timeout: Duration) -> Self {
        Self {
            entries: Arc::new(Mutex::new(HashMap::new())),
            next_serial: AtomicU64::new(0),
            timeout,
        }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn register(&self, key: K) -> Result<ResponseSlot<K, V>, CorrelationError> {
        let mut entries = lock_entries(&self.entries);

        match entries.entry(key.clone()) {
            Entry::Occupied(_) => Err(CorrelationError::DuplicateKey),
            Entry::Vacant(entry) => {
                let serial = self.next_serial.fetch_add(1, Ordering::Relaxed);
                let (tx, rx) = oneshot::channel();

                entry.insert(PendingEntry {
                    serial,
                    created_at: now(),
                    tx,
                });

                Ok(ResponseSlot {
                    key,
                    serial,
                    rx,
                    entries: Arc::downgrade(&self.entries),
                })
            }
        }
    }

    /// Hands `value` to the waiter registered under `key`.
    ///
    /// Returns `false` if nobody is waiting, including the case where the
    /// waiter already timed out.
    pub fn resolve(&self, key: &K, value: V) -> bool {
        let entry = lock_entries(&self.entries).remove(key);

        match entry {
            Some(entry) => entry.tx.send(value).is_ok(),
            None => false,
        }
    }

    /// Waits for the response to `slot`, up to the configured timeout.
    pub async fn wait(&self, mut slot: ResponseSlot<K, V>) -> Result<V, CorrelationError> {
        match tokio::time::timeout(self.timeout, &mut slot.rx).await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(_)) => Err(CorrelationError::Cancelled),
            Err(_) => {
                if slot.release() {
                    return Err(CorrelationError::TimedOut);
                }

                // `resolve` won the race and already removed the entry.
                slot.rx.try_recv().map_err(|_| CorrelationError::TimedOut)
            }
        }
    }

    pub fn contains(&self, key: &K) -> bool {
        lock_entries(&self.entries).contains_key(key)
    }

    pub fn len(&self) -> usize {
        lock_entries(&self.entries).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Registration time of the entry under `key`, in microseconds since
    /// the UNIX epoch.
    pub fn created_at(&self, key: &K) -> Option<u64> {
        lock_entries(&self.entries)
            .get(key)
            .map(|entry| entry.created_at)
    }
}

/// Receiving half of a registered request.
///
/// Dropping the slot before a response arrives removes its entry, so an
/// abandoned caller never leaves a stale key behind.
pub struct ResponseSlot<K, V>
where
    K: Eq + Hash,
{
    key: K,
    serial: u64,
    rx: oneshot::Receiver<V>,
    entries: Weak<EntryMap<K, V>>,
}

impl<K, V> ResponseSlot<K, V>
where
    K: Eq + Hash,
{
    pub fn key(&self) -> &K {
        &self.key
    }

    /// Removes this slot's entry if it is still the one registered under
    /// the key. Returns whether anything was removed.
    fn release(&self) -> bool {
        let Some(entries) = self.entries.upgrade() else {
            return false;
        };

        let mut entries = lock_entries(&entries);
        let owned = entries
            .get(&self.key)
            .is_some_and(|entry| entry.serial == self.serial);

        if owned {
            entries.remove(&self.key);
        }

        owned
    }
}

impl<K, V> Drop for ResponseSlot<K, V>
where
    K: Eq + Hash,
{
    fn drop(&mut self) {
        self.release();
    }
}
