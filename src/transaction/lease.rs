//! Exclusive Leases
//!
//! In-process mutex keyed by resource id. A lease is held for the whole
//! check-then-commit sequence it protects and released on drop. Acquisition is
//! bounded: a caller that cannot get the lease within the timeout receives
//! `Concurrency` and must re-read state before deciding to retry, since the
//! current holder may already have committed.

use std::fmt::{self, Debug};
use std::hash::Hash;
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::{debug, warn};

use super::error::TransactionError;

type LeaseTable<K> = DashMap<K, Arc<Mutex<()>>>;

/// Drop `key`'s entry if only the table still references its mutex.
/// Holders and waiters each keep a clone, so a referenced entry survives.
fn remove_idle<K: Eq + Hash>(table: &LeaseTable<K>, key: &K) {
    table.remove_if(key, |_, mutex| Arc::strong_count(mutex) == 1);
}

/// Held lease; releases on drop and removes its table entry once idle
pub struct Lease<K: Eq + Hash> {
    key: K,
    guard: Option<OwnedMutexGuard<()>>,
    table: Arc<LeaseTable<K>>,
}

impl<K: Eq + Hash> Lease<K> {
    pub fn key(&self) -> &K {
        &self.key
    }
}

impl<K: Eq + Hash> Drop for Lease<K> {
    fn drop(&mut self) {
        // Guard first: it owns one reference to the mutex
        self.guard.take();
        remove_idle(&self.table, &self.key);
    }
}

impl<K: Eq + Hash + Debug> Debug for Lease<K> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Lease").field("key", &self.key).finish()
    }
}

/// Keyed lease table. Entries exist only while a lease is held or awaited.
pub struct LeaseManager<K: Eq + Hash> {
    leases: Arc<LeaseTable<K>>,
    timeout: Duration,
}

impl<K> LeaseManager<K>
where
    K: Eq + Hash + Clone + Debug,
{
    pub fn new(timeout: Duration) -> Self {
        Self {
            leases: Arc::new(DashMap::new()),
            timeout,
        }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Acquire the lease on `key`, waiting at most the configured timeout
    pub async fn acquire(&self, key: &K) -> Result<Lease<K>, TransactionError> {
        // Clone the Arc so the shard lock is released before awaiting
        let mutex = self
            .leases
            .entry(key.clone())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();

        // The lock future owns `mutex`; it is gone once this returns
        let acquired = tokio::time::timeout(self.timeout, mutex.lock_owned()).await;
        match acquired {
            Ok(guard) => {
                debug!(key = ?key, "Lease acquired");
                Ok(Lease {
                    key: key.clone(),
                    guard: Some(guard),
                    table: Arc::clone(&self.leases),
                })
            }
            Err(_) => {
                // The holder may have released while we waited
                remove_idle(&self.leases, key);
                warn!(key = ?key, timeout_ms = self.timeout.as_millis() as u64, "Lease not acquired");
                Err(TransactionError::Concurrency(format!(
                    "lease on {:?} not acquired within {}ms",
                    key,
                    self.timeout.as_millis()
                )))
            }
        }
    }

    /// Whether someone currently holds the lease on `key`
    pub fn is_held(&self, key: &K) -> bool {
        self.leases
            .get(key)
            .map(|m| m.try_lock().is_err())
            .unwrap_or(false)
    }

    /// Keys currently held or awaited
    pub fn len(&self) -> usize {
        self.leases.len()
    }

    pub fn is_empty(&self) -> bool {
        self.leases.is_empty()
    }
}
