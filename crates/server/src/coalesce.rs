//! Single-flight execution of keyed work.
//!
//! The first caller for a key becomes the leader: its work runs on a spawned
//! task so it finishes even if the leader's own request goes away. Callers
//! arriving while the work is in flight subscribe to the same result instead
//! of starting their own.

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use std::future::Future;
use std::hash::Hash;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::broadcast;

type InFlight<K, V> = Arc<DashMap<K, broadcast::Sender<V>>>;

/// How a caller took part in a flight.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    /// Started the work.
    Leader,
    /// Joined work already in flight.
    Follower,
}

/// Coalesces concurrent work per key.
pub struct SingleFlight<K, V> {
    in_flight: InFlight<K, V>,
    coalesced: AtomicU64,
}

impl<K, V> SingleFlight<K, V>
where
    K: Eq + Hash + Clone + Send + Sync + 'static,
    V: Clone + Send + 'static,
{
    pub fn new() -> Self {
        Self {
            in_flight: Arc::new(DashMap::new()),
            coalesced: AtomicU64::new(0),
        }
    }

    /// Run `work` for `key` unless it is already running, and wait for the
    /// shared result. The value is `None` if the work task died without
    /// producing one.
    pub async fn run<F, Fut>(&self, key: K, work: F) -> (Option<V>, Role)
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = V> + Send + 'static,
    {
        let (mut rx, leader) = match self.in_flight.entry(key.clone()) {
            Entry::Occupied(entry) => (entry.get().subscribe(), false),
            Entry::Vacant(entry) => {
                let (tx, rx) = broadcast::channel(1);
                entry.insert(tx);
                (rx, true)
            }
        };

        if leader {
            let landing = Landing {
                in_flight: self.in_flight.clone(),
                key: Some(key),
            };
            let fut = work();
            tokio::spawn(async move {
                let value = fut.await;
                landing.complete(value);
            });
        } else {
            self.coalesced.fetch_add(1, Ordering::Relaxed);
        }

        let role = if leader { Role::Leader } else { Role::Follower };
        (rx.recv().await.ok(), role)
    }

    /// Number of keys with work in flight.
    pub fn in_flight(&self) -> usize {
        self.in_flight.len()
    }

    /// How many callers joined existing work rather than starting it.
    pub fn coalesced(&self) -> u64 {
        self.coalesced.load(Ordering::Relaxed)
    }
}

impl<K, V> Default for SingleFlight<K, V>
where
    K: Eq + Hash + Clone + Send + Sync + 'static,
    V: Clone + Send + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}

/// Clears the in-flight entry when the work ends. If the task unwinds before
/// completing, dropping the sender wakes every waiter with an error.
struct Landing<K: Eq + Hash, V> {
    in_flight: InFlight<K, V>,
    key: Option<K>,
}

impl<K: Eq + Hash, V> Landing<K, V> {
    fn complete(mut self, value: V) {
        if let Some(key) = self.key.take()
            && let Some((_, tx)) = self.in_flight.remove(&key)
        {
            // Entry is gone before the send, so a late caller starts fresh
            // work instead of subscribing to a finished channel.
            let _ = tx.send(value);
        }
    }
}

impl<K: Eq + Hash, V> Drop for Landing<K, V> {
    fn drop(&mut self) {
        if let Some(key) = self.key.take() {
            self.in_flight.remove(&key);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    #[tokio::test]
    async fn test_concurrent_callers_share_one_run() {
        let flights = Arc::new(SingleFlight::<String, u32>::new());
        let runs = Arc::new(AtomicUsize::new(0));

        let mut tasks = Vec::new();
        for _ in 0..10 {
            let flights = flights.clone();
            let runs = runs.clone();
            tasks.push(tokio::spawn(async move {
                flights
                    .run("k".to_string(), move || async move {
                        runs.fetch_add(1, Ordering::SeqCst);
                        tokio::time::sleep(Duration::from_millis(50)).await;
                        7
                    })
                    .await
            }));
        }

        let mut leaders = 0;
        for task in tasks {
            let (value, role) = task.await.unwrap();
            assert_eq!(value, Some(7));
            if role == Role::Leader {
                leaders += 1;
            }
        }
        assert_eq!(leaders, 1);
        assert_eq!(runs.load(Ordering::SeqCst), 1);
        assert_eq!(flights.coalesced(), 9);
        assert_eq!(flights.in_flight(), 0);
    }

    #[tokio::test]
    async fn test_sequential_calls_run_again() {
        let flights = SingleFlight::<&'static str, u32>::new();
        assert_eq!(flights.run("k", || async { 1 }).await, (Some(1), Role::Leader));
        assert_eq!(flights.run("k", || async { 2 }).await, (Some(2), Role::Leader));
    }

    #[tokio::test]
    async fn test_panicking_work_releases_waiters() {
        let flights = SingleFlight::<&'static str, u32>::new();
        let (value, _) = flights
            .run("k", || async {
                let exploded = true;
                assert!(!exploded, "fetch exploded");
                0
            })
            .await;
        assert_eq!(value, None);
        assert_eq!(flights.in_flight(), 0);
    }
}
