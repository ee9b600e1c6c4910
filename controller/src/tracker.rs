//! Tracks the drains running in this process.
//!
//! The tracker holds at most one handle per node. A handle is the receiving end of a one-shot channel which the
//! spawned drain fills exactly once. The map lock only guards insertion and removal; drains run unlocked.
use models::drain_request::DrainRequest;
use models::node::DrainError;

use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, PoisonError, RwLock};
use tokio::sync::{oneshot, Mutex};
use tokio::time::{timeout_at, Duration, Instant};
use tracing::{event, Level};

/// The result a drain reports once it is done.
pub type DrainOutcome = Result<(), DrainError>;

/// Identifies a node across all managed clusters.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct DrainKey {
    pub cluster_id: String,
    pub node_name: String,
}

impl DrainKey {
    pub fn new(cluster_id: &str, node_name: &str) -> Self {
        DrainKey {
            cluster_id: cluster_id.to_string(),
            node_name: node_name.to_string(),
        }
    }

    pub fn for_request(request: &DrainRequest) -> Self {
        Self::new(&request.spec.cluster_id, &request.spec.node_name)
    }
}

impl fmt::Display for DrainKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.cluster_id, self.node_name)
    }
}

#[derive(Default)]
struct HandleState {
    receiver: Option<oneshot::Receiver<DrainOutcome>>,
    /// An outcome which was taken from the channel but could not be acted on.
    requeued: Option<DrainOutcome>,
}

/// The in-memory record of a single running (or finished but unconsumed) drain.
pub struct DrainHandle {
    key: DrainKey,
    started_at: DateTime<Utc>,
    state: Mutex<HandleState>,
}

impl fmt::Debug for DrainHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DrainHandle")
            .field("key", &self.key)
            .field("started_at", &self.started_at)
            .finish()
    }
}

impl DrainHandle {
    fn new(key: DrainKey, receiver: oneshot::Receiver<DrainOutcome>) -> Self {
        DrainHandle {
            key,
            started_at: Utc::now(),
            state: Mutex::new(HandleState {
                receiver: Some(receiver),
                requeued: None,
            }),
        }
    }

    pub fn key(&self) -> &DrainKey {
        &self.key
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    /// Puts a consumed outcome back so that the next poll returns it again.
    pub async fn requeue(&self, outcome: DrainOutcome) {
        self.state.lock().await.requeued = Some(outcome);
    }

    async fn poll(&self, max_wait: Duration) -> DrainPoll {
        let deadline = Instant::now() + max_wait;

        let mut state = match timeout_at(deadline, self.state.lock()).await {
            Ok(state) => state,
            // Another reconcile is polling this handle.
            Err(_) => return DrainPoll::Pending,
        };

        if let Some(outcome) = state.requeued.take() {
            return DrainPoll::Finished(outcome);
        }

        let interrupted = || {
            DrainPoll::Finished(Err(DrainError::Interrupted {
                node_name: self.key.node_name.clone(),
            }))
        };
        let receiver = match state.receiver.as_mut() {
            Some(receiver) => receiver,
            None => return interrupted(),
        };

        match timeout_at(deadline, receiver).await {
            Err(_) => DrainPoll::Pending,
            Ok(Ok(outcome)) => {
                state.receiver = None;
                DrainPoll::Finished(outcome)
            }
            // The drain task went away without reporting.
            Ok(Err(_)) => {
                state.receiver = None;
                interrupted()
            }
        }
    }
}

/// The sending half handed to a drain task.
#[derive(Debug)]
pub struct DrainCompletion {
    key: DrainKey,
    sender: oneshot::Sender<DrainOutcome>,
}

impl DrainCompletion {
    /// Reports the drain outcome. Dropping a completion without calling this reports `DrainError::Interrupted`.
    pub fn complete(self, outcome: DrainOutcome) {
        // The receiver is gone if the entry was removed while draining.
        if self.sender.send(outcome).is_err() {
            event!(
                Level::DEBUG,
                key = %self.key,
                "Drain finished after its entry was removed; outcome discarded."
            );
        }
    }
}

#[derive(Debug)]
pub enum TryStart {
    /// A new entry was registered. The caller must launch the drain and report through `completion`.
    Started {
        handle: Arc<DrainHandle>,
        completion: DrainCompletion,
    },
    /// A drain for this node is already tracked.
    AlreadyRunning(Arc<DrainHandle>),
}

#[derive(Debug)]
pub enum DrainPoll {
    /// The drain has not reported within the allotted wait.
    Pending,
    Finished(DrainOutcome),
}

/// Process-wide map from node to in-flight drain.
#[derive(Debug, Default)]
pub struct DrainTracker {
    drains: RwLock<HashMap<DrainKey, Arc<DrainHandle>>>,
}

impl DrainTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a drain for `key` unless one is already tracked.
    pub fn try_start(&self, key: &DrainKey) -> TryStart {
        let mut drains = self.drains.write().unwrap_or_else(PoisonError::into_inner);
        if let Some(handle) = drains.get(key) {
            return TryStart::AlreadyRunning(handle.clone());
        }

        let (sender, receiver) = oneshot::channel();
        let handle = Arc::new(DrainHandle::new(key.clone(), receiver));
        drains.insert(key.clone(), handle.clone());

        TryStart::Started {
            handle,
            completion: DrainCompletion {
                key: key.clone(),
                sender,
            },
        }
    }

    pub fn get(&self, key: &DrainKey) -> Option<Arc<DrainHandle>> {
        self.drains
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(key)
            .cloned()
    }

    pub fn contains(&self, key: &DrainKey) -> bool {
        self.drains
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.drains
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Waits up to `max_wait` for the drain behind `handle` to report.
    pub async fn poll(&self, handle: &DrainHandle, max_wait: Duration) -> DrainPoll {
        handle.poll(max_wait).await
    }

    /// Removes whatever entry is tracked for `key`.
    pub fn remove(&self, key: &DrainKey) -> Option<Arc<DrainHandle>> {
        self.drains
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(key)
    }

    /// Removes the entry for the handle's key, but only if it is still this handle.
    pub fn release(&self, handle: &Arc<DrainHandle>) -> bool {
        let mut drains = self.drains.write().unwrap_or_else(PoisonError::into_inner);
        match drains.get(handle.key()) {
            Some(current) if Arc::ptr_eq(current, handle) => {
                drains.remove(handle.key());
                true
            }
            _ => false,
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use std::sync::Barrier;
    use std::thread;

    fn key(node_name: &str) -> DrainKey {
        DrainKey::new("cluster-a", node_name)
    }

    fn start(tracker: &DrainTracker, key: &DrainKey) -> (Arc<DrainHandle>, DrainCompletion) {
        match tracker.try_start(key) {
            TryStart::Started { handle, completion } => (handle, completion),
            TryStart::AlreadyRunning(_) => panic!("drain for {} already running", key),
        }
    }

    #[test]
    fn test_concurrent_try_start_starts_once() {
        const THREADS: usize = 16;
        let tracker = DrainTracker::new();
        let barrier = Barrier::new(THREADS);
        let key = key("worker-1");

        let started: usize = thread::scope(|scope| {
            let workers: Vec<_> = (0..THREADS)
                .map(|_| {
                    scope.spawn(|| {
                        barrier.wait();
                        matches!(tracker.try_start(&key), TryStart::Started { .. })
                    })
                })
                .collect();
            workers
                .into_iter()
                .map(|worker| worker.join().unwrap() as usize)
                .sum()
        });

        assert_eq!(started, 1);
        assert_eq!(tracker.len(), 1);
    }

    #[test]
    fn test_keys_include_cluster() {
        let tracker = DrainTracker::new();
        start(&tracker, &DrainKey::new("cluster-a", "worker-1"));
        start(&tracker, &DrainKey::new("cluster-b", "worker-1"));
        assert_eq!(tracker.len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_poll_pending_then_finished() {
        let tracker = DrainTracker::new();
        let (handle, completion) = start(&tracker, &key("worker-1"));

        let before = Instant::now();
        assert!(matches!(
            tracker.poll(&handle, Duration::from_secs(5)).await,
            DrainPoll::Pending
        ));
        assert!(before.elapsed() >= Duration::from_secs(5));

        completion.complete(Ok(()));
        assert!(matches!(
            tracker.poll(&handle, Duration::from_secs(5)).await,
            DrainPoll::Finished(Ok(()))
        ));
        assert!(tracker.contains(&key("worker-1")));

        assert!(tracker.release(&handle));
        assert!(tracker.is_empty());
    }

    #[tokio::test]
    async fn test_dropped_completion_is_interrupted() {
        let tracker = DrainTracker::new();
        let (handle, completion) = start(&tracker, &key("worker-1"));
        drop(completion);

        match tracker.poll(&handle, Duration::from_secs(1)).await {
            DrainPoll::Finished(Err(err)) => assert!(err.is_transient()),
            other => panic!("unexpected poll result: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_requeue() {
        let tracker = DrainTracker::new();
        let (handle, completion) = start(&tracker, &key("worker-1"));
        completion.complete(Err(DrainError::Timeout {
            node_name: "worker-1".to_string(),
            timeout: Duration::from_secs(300),
        }));

        let outcome = match tracker.poll(&handle, Duration::from_secs(1)).await {
            DrainPoll::Finished(outcome) => outcome,
            DrainPoll::Pending => panic!("drain should have finished"),
        };
        handle.requeue(outcome).await;

        assert!(matches!(
            tracker.poll(&handle, Duration::from_secs(1)).await,
            DrainPoll::Finished(Err(DrainError::Timeout { .. }))
        ));
    }

    #[test]
    fn test_started_at() {
        let tracker = DrainTracker::new();
        let before = Utc::now();
        let (handle, _completion) = start(&tracker, &key("worker-1"));

        assert!(handle.started_at() >= before);
        assert!(handle.started_at() <= Utc::now());
    }

    #[test]
    fn test_completion_after_removal() {
        let tracker = DrainTracker::new();
        let (handle, completion) = start(&tracker, &key("worker-1"));
        tracker.remove(handle.key());
        drop(handle);

        completion.complete(Ok(()));
        assert!(tracker.is_empty());
    }

    #[test]
    fn test_release_only_removes_current_handle() {
        let tracker = DrainTracker::new();
        let (stale, _stale_completion) = start(&tracker, &key("worker-1"));
        tracker.remove(&key("worker-1"));
        let (_current, _completion) = start(&tracker, &key("worker-1"));

        assert!(!tracker.release(&stale));
        assert!(tracker.contains(&key("worker-1")));
    }
}
