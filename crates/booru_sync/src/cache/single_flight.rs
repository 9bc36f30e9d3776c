//! Per-key de-duplication of concurrent async work.

use std::collections::HashMap;
use std::future::Future;
use std::hash::Hash;
use std::sync::{Arc, Mutex};

use tokio::sync::OnceCell;

/// Runs at most one initializer per key at a time.
///
/// Callers racing on the same key share the first successful result. When
/// the running initializer fails, the next waiter runs its own.
pub struct SingleFlight<K, V> {
    inflight: Mutex<HashMap<K, Arc<OnceCell<V>>>>,
}

impl<K, V> Default for SingleFlight<K, V> {
    fn default() -> Self {
        Self {
            inflight: Mutex::new(HashMap::new()),
        }
    }
}

impl<K, V> SingleFlight<K, V>
where
    K: Eq + Hash + Clone,
    V: Clone,
{
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn run<F, Fut, E>(&self, key: K, init: F) -> Result<V, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<V, E>>,
    {
        let cell = {
            let mut inflight = self.inflight.lock().unwrap_or_else(|e| e.into_inner());
            Arc::clone(inflight.entry(key.clone()).or_default())
        };

        let result = cell.get_or_try_init(init).await.cloned();

        let mut inflight = self.inflight.lock().unwrap_or_else(|e| e.into_inner());
        // Keep a failed cell only while another caller is still waiting on it
        let idle = cell.initialized() || Arc::strong_count(&cell) == 2;
        if idle
            && inflight
                .get(&key)
                .is_some_and(|current| Arc::ptr_eq(current, &cell))
        {
            inflight.remove(&key);
        }

        result
    }

    /// Number of keys with work in flight.
    pub fn in_flight(&self) -> usize {
        self.inflight.lock().unwrap_or_else(|e| e.into_inner()).len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[tokio::test(start_paused = true)]
    async fn test_concurrent_callers_share_one_initializer() {
        let flights: Arc<SingleFlight<i64, u32>> = Arc::new(SingleFlight::new());
        let calls = Arc::new(AtomicUsize::new(0));

        let tasks: Vec<_> = (0..10)
            .map(|_| {
                let flights = Arc::clone(&flights);
                let calls = Arc::clone(&calls);
                tokio::spawn(async move {
                    flights
                        .run(7, || async move {
                            calls.fetch_add(1, Ordering::SeqCst);
                            tokio::time::sleep(Duration::from_millis(50)).await;
                            Ok::<_, String>(99)
                        })
                        .await
                })
            })
            .collect();

        for task in tasks {
            assert_eq!(task.await.unwrap(), Ok(99));
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(flights.in_flight(), 0);
    }

    #[tokio::test]
    async fn test_failed_initializer_lets_next_caller_retry() {
        let flights: SingleFlight<&'static str, u32> = SingleFlight::new();

        let first = flights
            .run("k", || async { Err::<u32, _>("boom".to_string()) })
            .await;
        assert_eq!(first, Err("boom".to_string()));

        let second = flights.run("k", || async { Ok::<_, String>(5) }).await;
        assert_eq!(second, Ok(5));
        assert_eq!(flights.in_flight(), 0);
    }
}
