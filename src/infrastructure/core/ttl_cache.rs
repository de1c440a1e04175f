use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tracing::debug;

struct Entry<T> {
    payload: T,
    inserted_at: Instant,
}

/// Coarse-grained TTL cache for whole-market snapshots, keyed by source.
///
/// Failed or empty refreshes are cached too (as the empty payload) so a
/// flapping upstream is not hammered by every symbol in the same batch.
/// At most one refresh per key is in flight; concurrent readers wait for
/// it instead of issuing their own.
pub struct SnapshotCache<T> {
    entries: Mutex<HashMap<String, Entry<T>>>,
    flights: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl<T: Clone + Default> SnapshotCache<T> {
    pub fn new() -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            flights: Mutex::new(HashMap::new()),
        }
    }

    /// Return the cached payload if younger than `ttl`, otherwise run
    /// `refresh` (single-flight per key) and cache whatever comes back;
    /// `None` is stored as the empty payload.
    pub async fn get_or_fill<F, Fut>(&self, key: &str, ttl: Duration, refresh: F) -> T
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Option<T>>,
    {
        if let Some(hit) = self.fresh(key, ttl).await {
            return hit;
        }

        let flight = {
            let mut flights = self.flights.lock().await;
            flights
                .entry(key.to_string())
                .or_insert_with(|| Arc::new(Mutex::new(())))
                .clone()
        };
        let _guard = flight.lock().await;

        // Another caller may have refreshed while we waited for the lock.
        if let Some(hit) = self.fresh(key, ttl).await {
            return hit;
        }

        let payload = match refresh().await {
            Some(p) => p,
            None => {
                debug!("SnapshotCache [{}]: refresh empty, caching placeholder", key);
                T::default()
            }
        };

        let mut entries = self.entries.lock().await;
        entries.insert(
            key.to_string(),
            Entry {
                payload: payload.clone(),
                inserted_at: Instant::now(),
            },
        );
        payload
    }

    async fn fresh(&self, key: &str, ttl: Duration) -> Option<T> {
        let entries = self.entries.lock().await;
        entries
            .get(key)
            .filter(|e| e.inserted_at.elapsed() < ttl)
            .map(|e| e.payload.clone())
    }

    pub async fn invalidate(&self, key: &str) {
        self.entries.lock().await.remove(key);
    }
}

impl<T: Clone + Default> Default for SnapshotCache<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test]
    async fn caches_within_ttl() {
        let cache: SnapshotCache<Vec<u32>> = SnapshotCache::new();
        let calls = AtomicUsize::new(0);

        for _ in 0..3 {
            let got = cache
                .get_or_fill("em", Duration::from_secs(60), || async {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Some(vec![1, 2, 3])
                })
                .await;
            assert_eq!(got, vec![1, 2, 3]);
        }

        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn refreshes_after_expiry() {
        let cache: SnapshotCache<Vec<u32>> = SnapshotCache::new();
        let calls = AtomicUsize::new(0);

        let ttl = Duration::from_millis(20);
        cache
            .get_or_fill("em", ttl, || async {
                calls.fetch_add(1, Ordering::SeqCst);
                Some(vec![1])
            })
            .await;
        tokio::time::sleep(Duration::from_millis(30)).await;
        cache
            .get_or_fill("em", ttl, || async {
                calls.fetch_add(1, Ordering::SeqCst);
                Some(vec![2])
            })
            .await;

        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn failed_refresh_is_cached_as_empty() {
        let cache: SnapshotCache<Vec<u32>> = SnapshotCache::new();
        let calls = AtomicUsize::new(0);

        let first = cache
            .get_or_fill("em", Duration::from_secs(60), || async {
                calls.fetch_add(1, Ordering::SeqCst);
                None
            })
            .await;
        assert!(first.is_empty());

        // The placeholder suppresses a second refresh inside the TTL.
        let second = cache
            .get_or_fill("em", Duration::from_secs(60), || async {
                calls.fetch_add(1, Ordering::SeqCst);
                Some(vec![9])
            })
            .await;
        assert!(second.is_empty());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn single_flight_under_concurrency() {
        let cache: Arc<SnapshotCache<Vec<u32>>> = Arc::new(SnapshotCache::new());
        let calls = Arc::new(AtomicUsize::new(0));

        let mut handles = Vec::new();
        for _ in 0..8 {
            let cache = cache.clone();
            let calls = calls.clone();
            handles.push(tokio::spawn(async move {
                cache
                    .get_or_fill("em", Duration::from_secs(60), || async move {
                        calls.fetch_add(1, Ordering::SeqCst);
                        tokio::time::sleep(Duration::from_millis(20)).await;
                        Some(vec![7])
                    })
                    .await
            }));
        }

        for h in handles {
            assert_eq!(h.await.unwrap(), vec![7]);
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
