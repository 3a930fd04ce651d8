//! TTL cache used to suppress duplicate chain events.

use dashmap::DashMap;
use std::hash::Hash;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

use crate::observability::metrics;

#[derive(Debug, Clone, Copy)]
struct Entry {
    deadline: Instant,
    generation: u64,
}

/// A concurrent set whose keys expire after a TTL.
///
/// `store` arms an expiry timer for the key; `load` reports membership and
/// pushes the expiry out by another TTL window. Timers run on the tokio
/// runtime, so `store` must be called from within one.
#[derive(Clone)]
pub struct DedupCache<K> {
    inner: Arc<DashMap<K, Entry>>,
    generation: Arc<AtomicU64>,
    ttl: Duration,
}

impl<K> DedupCache<K>
where
    K: Eq + Hash + Clone + Send + Sync + 'static,
{
    pub fn new(ttl: Duration) -> Self {
        Self {
            inner: Arc::new(DashMap::new()),
            generation: Arc::new(AtomicU64::new(0)),
            ttl,
        }
    }

    /// Insert `key`, replacing any previous expiry.
    pub fn store(&self, key: K) {
        let generation = self.generation.fetch_add(1, Ordering::Relaxed);
        let deadline = Instant::now() + self.ttl;
        self.inner.insert(key.clone(), Entry { deadline, generation });
        metrics::record_dedup_cache_size(self.inner.len());

        let inner = Arc::clone(&self.inner);
        tokio::spawn(async move {
            let mut wake_at = deadline;
            loop {
                tokio::time::sleep_until(wake_at).await;
                let current = match inner.get(&key) {
                    Some(entry) if entry.generation == generation => *entry,
                    // Replaced; the newer store owns expiry.
                    _ => return,
                };
                if current.deadline > Instant::now() {
                    wake_at = current.deadline;
                    continue;
                }
                inner.remove_if(&key, |_, e| e.generation == generation && e.deadline <= Instant::now());
                metrics::record_dedup_cache_size(inner.len());
                return;
            }
        });
    }

    /// Whether `key` is live. A hit extends its TTL window.
    pub fn load(&self, key: &K) -> bool {
        match self.inner.get_mut(key) {
            Some(mut entry) => {
                let now = Instant::now();
                if entry.deadline <= now {
                    return false;
                }
                entry.deadline = now + self.ttl;
                true
            }
            None => false,
        }
    }

    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }
}

impl<K> std::fmt::Debug for DedupCache<K>
where
    K: Eq + Hash,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DedupCache")
            .field("entries", &self.inner.len())
            .field("ttl", &self.ttl)
            .finish()
    }
}
