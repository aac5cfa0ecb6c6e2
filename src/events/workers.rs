use super::context::EventId;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::Notify;
use tokio::time::Instant;
use tracing::{debug, warn};

/// Identity of one in-flight action worker
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct WorkerId(u64);

impl fmt::Display for WorkerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "worker-{}", self.0)
    }
}

#[derive(Debug, Clone)]
pub struct WorkerInfo {
    pub event_id: Option<EventId>,
    pub label: String,
}

/// Process-wide set of in-flight action workers.
///
/// Workers are registered before they are spawned and leave the set when they
/// finish; every removal wakes barrier waiters.
#[derive(Default)]
pub struct WorkerSet {
    next_id: AtomicU64,
    workers: Mutex<HashMap<WorkerId, WorkerInfo>>,
    changed: Notify,
}

impl WorkerSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, event_id: Option<&EventId>, label: &str) -> WorkerId {
        let id = WorkerId(self.next_id.fetch_add(1, Ordering::Relaxed) + 1);
        self.workers.lock().insert(
            id,
            WorkerInfo {
                event_id: event_id.cloned(),
                label: label.to_string(),
            },
        );
        debug!("Registered {} ({})", id, label);
        id
    }

    pub fn remove(&self, id: WorkerId) {
        if self.workers.lock().remove(&id).is_some() {
            debug!("{} finished", id);
            self.changed.notify_waiters();
        }
    }

    pub fn contains(&self, id: WorkerId) -> bool {
        self.workers.lock().contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.workers.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Workers still running on behalf of an event
    pub fn for_event(&self, event_id: &str) -> Vec<WorkerId> {
        self.workers
            .lock()
            .iter()
            .filter(|(_, info)| info.event_id.as_deref() == Some(event_id))
            .map(|(id, _)| *id)
            .collect()
    }

    /// Wait until `done` holds over the set, or until `timeout` elapses
    async fn wait_until(
        &self,
        timeout: Duration,
        done: impl Fn(&HashMap<WorkerId, WorkerInfo>) -> bool,
    ) -> bool {
        let deadline = Instant::now() + timeout;
        loop {
            let notified = self.changed.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if done(&self.workers.lock()) {
                return true;
            }
            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                return done(&self.workers.lock());
            }
        }
    }

    /// Completion barrier: wait for every listed worker to leave the set
    pub async fn wait_for(&self, ids: &[WorkerId], timeout: Duration) -> bool {
        if ids.is_empty() {
            return true;
        }
        let finished = self
            .wait_until(timeout, |workers| ids.iter().all(|id| !workers.contains_key(id)))
            .await;
        if !finished {
            let pending: Vec<String> = ids
                .iter()
                .filter(|id| self.contains(**id))
                .map(|id| id.to_string())
                .collect();
            warn!(
                "Completion barrier timed out after {:?}; still running: {}",
                timeout,
                pending.join(", ")
            );
        }
        finished
    }

    /// Wait for the whole set to drain
    pub async fn wait_empty(&self, timeout: Duration) -> bool {
        self.wait_until(timeout, |workers| workers.is_empty()).await
    }
}

/// Removes a worker from its set when dropped, however the worker ends
pub struct WorkerGuard<'a> {
    set: &'a WorkerSet,
    id: WorkerId,
    done: bool,
}

impl<'a> WorkerGuard<'a> {
    pub fn new(set: &'a WorkerSet, id: WorkerId) -> Self {
        Self {
            set,
            id,
            done: false,
        }
    }

    pub fn id(&self) -> WorkerId {
        self.id
    }

    /// Leave the set now
    pub fn finish(&mut self) {
        if !self.done {
            self.done = true;
            self.set.remove(self.id);
        }
    }
}

impl Drop for WorkerGuard<'_> {
    fn drop(&mut self) {
        self.finish();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[tokio::test]
    async fn test_barrier_waits_for_listed_workers() {
        let set = Arc::new(WorkerSet::new());
        let event = "2024-01-01T00:00:00.000000".to_string();
        let a = set.register(Some(&event), "a");
        let b = set.register(Some(&event), "b");
        let unrelated = set.register(None, "other");

        let waiter = {
            let set = Arc::clone(&set);
            tokio::spawn(async move { set.wait_for(&[a, b], Duration::from_secs(5)).await })
        };

        tokio::time::sleep(Duration::from_millis(20)).await;
        set.remove(a);
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!waiter.is_finished());
        set.remove(b);

        assert!(waiter.await.unwrap());
        assert!(set.contains(unrelated));
    }

    #[tokio::test]
    async fn test_barrier_times_out() {
        let set = WorkerSet::new();
        let stuck = set.register(None, "stuck");
        assert!(!set.wait_for(&[stuck], Duration::from_millis(30)).await);
    }

    #[tokio::test]
    async fn test_guard_removes_on_drop() {
        let set = WorkerSet::new();
        let id = set.register(None, "guarded");
        {
            let _guard = WorkerGuard::new(&set, id);
            assert!(set.contains(id));
        }
        assert!(set.is_empty());
        assert!(set.wait_empty(Duration::from_millis(10)).await);
    }

    #[test]
    fn test_for_event_filters() {
        let set = WorkerSet::new();
        let event = "e1".to_string();
        let a = set.register(Some(&event), "a");
        set.register(None, "b");
        assert_eq!(set.for_event("e1"), vec![a]);
    }
}
