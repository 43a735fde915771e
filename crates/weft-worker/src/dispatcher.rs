//! Per-agent concurrency guard.
//!
//! A map from agent name to a bounded permit pool. `submit` waits for a
//! permit, runs the future, and releases the permit on every exit path
//! (the owned permit is dropped even if the future panics and unwinds).
//! Agents without an entry run unbounded.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use tokio::sync::Semaphore;

pub struct Dispatcher {
    permits: HashMap<String, Arc<Semaphore>>,
}

impl Dispatcher {
    /// Build from per-agent permit counts. A zero count is clamped to one.
    pub fn new(limits: HashMap<String, usize>) -> Self {
        let permits = limits
            .into_iter()
            .map(|(agent, n)| (agent, Arc::new(Semaphore::new(n.max(1)))))
            .collect();
        Self { permits }
    }

    /// No bounds at all.
    pub fn unbounded() -> Self {
        Self {
            permits: HashMap::new(),
        }
    }

    /// Run `fut` under the agent's permit bound, waiting if exhausted.
    pub async fn submit<F, T>(&self, agent: &str, fut: F) -> T
    where
        F: Future<Output = T>,
    {
        let _permit = match self.permits.get(agent) {
            Some(sem) => Some(
                Arc::clone(sem)
                    .acquire_owned()
                    .await
                    .expect("dispatcher semaphore closed"),
            ),
            None => None,
        };
        fut.await
    }

    /// Currently available permits for an agent (`None` = unbounded).
    pub fn available(&self, agent: &str) -> Option<usize> {
        self.permits.get(agent).map(|s| s.available_permits())
    }
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[tokio::test]
    async fn concurrency_never_exceeds_the_permit_bound() {
        let mut limits = HashMap::new();
        limits.insert("rag".to_string(), 2);
        let dispatcher = Arc::new(Dispatcher::new(limits));

        let current = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        let mut handles = Vec::new();
        for _ in 0..10 {
            let d = Arc::clone(&dispatcher);
            let current = Arc::clone(&current);
            let peak = Arc::clone(&peak);
            handles.push(tokio::spawn(async move {
                d.submit("rag", async {
                    let now = current.fetch_add(1, Ordering::SeqCst) + 1;
                    peak.fetch_max(now, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(10)).await;
                    current.fetch_sub(1, Ordering::SeqCst);
                })
                .await;
            }));
        }
        for h in handles {
            h.await.unwrap();
        }

        assert!(peak.load(Ordering::SeqCst) <= 2, "permit bound violated");
        assert_eq!(dispatcher.available("rag"), Some(2));
    }

    #[tokio::test]
    async fn unknown_agent_runs_unbounded() {
        let dispatcher = Dispatcher::unbounded();
        let out = dispatcher.submit("anything", async { 42 }).await;
        assert_eq!(out, 42);
        assert_eq!(dispatcher.available("anything"), None);
    }

    #[tokio::test]
    async fn permit_released_after_completion() {
        let mut limits = HashMap::new();
        limits.insert("one".to_string(), 1);
        let dispatcher = Dispatcher::new(limits);

        dispatcher.submit("one", async {}).await;
        dispatcher.submit("one", async {}).await;
        assert_eq!(dispatcher.available("one"), Some(1));
    }
}
