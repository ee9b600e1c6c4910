//! Drives `DrainRequest`s to a terminal condition.
//!
//! `ensure_created` is invoked for every change and resync of a request and must return promptly. Drains are
//! spawned onto the runtime and observed through the `DrainTracker`; the only wait inside a reconcile is the bounded
//! poll of an in-flight drain.
use crate::cluster_access::ClusterAccess;
use crate::error::{self, Result};
use crate::statemachine::{determine_drain_state, DrainState};
use crate::tracker::{DrainHandle, DrainKey, DrainOutcome, DrainPoll, DrainTracker, TryStart};
use models::drain_request::{timed_out, DrainConditionType, DrainRequest, DrainRequestClient};
use models::node::{drain_node, DrainSettings};
use models::recorder::EventRecorder;

use chrono::Utc;
use kube::{Resource, ResourceExt};
use snafu::{ensure, ResultExt};
use std::sync::Arc;
use tokio::time::Duration;
use tracing::{event, instrument, Instrument, Level};

// Defines how long a single reconcile waits for an in-flight drain to report.
const DEFAULT_POLL_WAIT: Duration = Duration::from_secs(5);

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ReconcilerSettings {
    /// Upper bound on the wait for an in-flight drain during one reconcile.
    pub poll_wait: Duration,
    /// Requests older than this are marked timed out instead of starting a drain. Never applied to a drain which
    /// is already running.
    pub max_request_age: Option<Duration>,
    pub drain: DrainSettings,
}

impl Default for ReconcilerSettings {
    fn default() -> Self {
        ReconcilerSettings {
            poll_wait: DEFAULT_POLL_WAIT,
            max_request_age: None,
            drain: DrainSettings::default(),
        }
    }
}

impl ReconcilerSettings {
    fn validate(&self) -> Result<()> {
        ensure!(
            !self.poll_wait.is_zero(),
            error::InvalidSettingsSnafu {
                reason: "poll wait must be positive"
            }
        );
        ensure!(
            !self.drain.worker.timeout.is_zero() && !self.drain.control_plane.timeout.is_zero(),
            error::InvalidSettingsSnafu {
                reason: "drain timeouts must be positive"
            }
        );
        ensure!(
            self.drain.concurrent_evictions > 0,
            error::InvalidSettingsSnafu {
                reason: "at least one concurrent eviction is required"
            }
        );
        ensure!(
            !self.drain.deletion_check_interval.is_zero(),
            error::InvalidSettingsSnafu {
                reason: "deletion check interval must be positive"
            }
        );
        ensure!(
            !self.drain.eviction_retry_interval.is_zero(),
            error::InvalidSettingsSnafu {
                reason: "eviction retry interval must be positive"
            }
        );
        Ok(())
    }
}

/// What the caller should expect after `ensure_created` returns.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum DrainProgress {
    /// A terminal condition is recorded.
    Finished,
    /// A drain is running. Reconcile again soon.
    InProgress,
    /// The workload cluster could not be reached. Reconcile again later.
    Deferred,
}

pub struct DrainReconciler<A: ClusterAccess, P: DrainRequestClient> {
    cluster_access: A,
    request_client: P,
    recorder: Arc<dyn EventRecorder>,
    tracker: Arc<DrainTracker>,
    settings: ReconcilerSettings,
}

impl<A: ClusterAccess, P: DrainRequestClient> DrainReconciler<A, P> {
    pub fn new(
        cluster_access: A,
        request_client: P,
        recorder: Arc<dyn EventRecorder>,
        tracker: Arc<DrainTracker>,
        settings: ReconcilerSettings,
    ) -> Result<Self> {
        settings.validate()?;
        Ok(DrainReconciler {
            cluster_access,
            request_client,
            recorder,
            tracker,
            settings,
        })
    }

    pub fn tracker(&self) -> &Arc<DrainTracker> {
        &self.tracker
    }

    pub fn settings(&self) -> &ReconcilerSettings {
        &self.settings
    }

    /// Starts, observes or finalizes the drain for the request's node.
    #[instrument(skip(self, request), fields(request = %request.name_any(), node = %request.spec.node_name), err)]
    pub async fn ensure_created(&self, request: &DrainRequest) -> Result<DrainProgress> {
        let key = DrainKey::for_request(request);

        match determine_drain_state(request, self.tracker.get(&key)) {
            DrainState::Drained | DrainState::TimedOut => {
                event!(Level::DEBUG, "Drain already has an outcome.");
                Ok(DrainProgress::Finished)
            }
            DrainState::NotStarted => self.start_drain(request, key).await,
            DrainState::InProgress(handle) => self.observe_drain(request, handle).await,
        }
    }

    async fn start_drain(&self, request: &DrainRequest, key: DrainKey) -> Result<DrainProgress> {
        if let (Some(max_age), Some(created)) = (self.settings.max_request_age, request.creation_time()) {
            if timed_out(created, Utc::now(), max_age) {
                event!(
                    Level::WARN,
                    "Request is older than {}s; not starting a drain.",
                    max_age.as_secs()
                );
                return self
                    .record_outcome(request, DrainConditionType::Timeout)
                    .await
                    .map(|_| DrainProgress::Finished);
            }
        }

        let spec = &request.spec;
        let client = match self
            .cluster_access
            .resolve(&spec.cluster_id, &spec.cluster_endpoint)
            .await
        {
            Ok(client) => client,
            Err(err) if err.is_transient() => {
                event!(
                    Level::WARN,
                    error = %err,
                    "Workload cluster is not available; will retry."
                );
                return Ok(DrainProgress::Deferred);
            }
            Err(err) => {
                return Err(err).context(error::ResolveClusterSnafu {
                    cluster_id: &spec.cluster_id,
                })
            }
        };

        let completion = match self.tracker.try_start(&key) {
            TryStart::Started { completion, .. } => completion,
            TryStart::AlreadyRunning(_) => {
                event!(Level::DEBUG, "Drain was started by a concurrent reconcile.");
                return Ok(DrainProgress::InProgress);
            }
        };

        let node_name = spec.node_name.clone();
        let recorder = self.recorder.clone();
        let target = request.object_ref(&());
        let drain_settings = self.settings.drain.clone();
        let span = tracing::info_span!("drain", cluster_id = %key.cluster_id, node = %key.node_name);

        event!(Level::INFO, "Starting drain.");
        tokio::spawn(
            async move {
                let outcome = drain_node(
                    client.as_ref(),
                    &node_name,
                    recorder.as_ref(),
                    &target,
                    &drain_settings,
                )
                .await;
                completion.complete(outcome);
            }
            .instrument(span),
        );

        Ok(DrainProgress::InProgress)
    }

    async fn observe_drain(
        &self,
        request: &DrainRequest,
        handle: Arc<DrainHandle>,
    ) -> Result<DrainProgress> {
        let outcome = match self.tracker.poll(&handle, self.settings.poll_wait).await {
            DrainPoll::Pending => return Ok(DrainProgress::InProgress),
            DrainPoll::Finished(outcome) => outcome,
        };
        let drain_secs = (Utc::now() - handle.started_at()).num_seconds();

        let condition = match &outcome {
            Ok(()) => DrainConditionType::Drained,
            Err(err) if err.is_transient() => {
                event!(
                    Level::WARN,
                    error = %err,
                    drain_secs,
                    "Drain stopped on a transient error; it will be restarted."
                );
                self.tracker.release(&handle);
                return Ok(DrainProgress::Deferred);
            }
            Err(err) => {
                event!(Level::ERROR, error = %err, drain_secs, "Drain did not complete.");
                DrainConditionType::Timeout
            }
        };

        event!(Level::INFO, %condition, drain_secs, "Drain finished.");
        match self.record_outcome(request, condition).await {
            Ok(()) => {
                self.tracker.release(&handle);
                Ok(DrainProgress::Finished)
            }
            Err(err) => {
                // Keep the outcome for the next reconcile.
                self.requeue(&handle, outcome).await;
                Err(err)
            }
        }
    }

    async fn requeue(&self, handle: &DrainHandle, outcome: DrainOutcome) {
        event!(
            Level::WARN,
            key = %handle.key(),
            "Status update failed; drain outcome kept for the next reconcile."
        );
        handle.requeue(outcome).await;
    }

    async fn record_outcome(
        &self,
        request: &DrainRequest,
        condition: DrainConditionType,
    ) -> Result<()> {
        let updated = request.with_condition(condition, Utc::now());
        self.request_client
            .update_status(&updated)
            .await
            .context(error::UpdateStatusSnafu {
                name: request.name_any(),
            })?;
        event!(Level::INFO, %condition, "Recorded drain outcome.");
        Ok(())
    }

    /// Deletes the request's node from the workload cluster and forgets any tracked drain.
    ///
    /// A missing node and an unavailable workload cluster both count as success.
    #[instrument(skip(self, request), fields(request = %request.name_any(), node = %request.spec.node_name), err)]
    pub async fn ensure_deleted(&self, request: &DrainRequest) -> Result<()> {
        let spec = &request.spec;
        self.tracker.remove(&DrainKey::for_request(request));

        let client = match self
            .cluster_access
            .resolve(&spec.cluster_id, &spec.cluster_endpoint)
            .await
        {
            Ok(client) => client,
            Err(err) if err.is_transient() => {
                event!(
                    Level::INFO,
                    error = %err,
                    "Workload cluster is not available; not deleting node."
                );
                return Ok(());
            }
            Err(err) => {
                return Err(err).context(error::ResolveClusterSnafu {
                    cluster_id: &spec.cluster_id,
                })
            }
        };

        match client.delete_node(&spec.node_name).await {
            Ok(()) => event!(Level::INFO, "Deleted node from workload cluster."),
            Err(err) if err.is_not_found() => {
                event!(Level::INFO, "Node is already gone from workload cluster.")
            }
            Err(err) if err.is_transient() => event!(
                Level::INFO,
                error = %err,
                "Workload cluster is not available; not deleting node."
            ),
            Err(err) => {
                return Err(err).context(error::DeleteNodeSnafu {
                    cluster_id: &spec.cluster_id,
                    node_name: &spec.node_name,
                })
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::cluster_access::{ClusterAccessError, MockClusterAccess};
    use k8s_openapi::api::core::v1::Node;
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::Time;
    use kube::api::ObjectMeta;
    use kube::error::ErrorResponse;
    use models::drain_request::{DrainRequestError, DrainRequestSpec, MockDrainRequestClient};
    use models::node::{MockWorkloadClusterClient, WorkloadClientError, WorkloadClusterClient};
    use models::recorder::NoopRecorder;
    use std::sync::atomic::{AtomicUsize, Ordering};

    const CLUSTER_ID: &str = "cluster-a";

    fn request(node_name: &str) -> DrainRequest {
        let mut request = DrainRequest::new(
            node_name,
            DrainRequestSpec {
                cluster_id: CLUSTER_ID.to_string(),
                cluster_endpoint: "https://10.0.0.1:6443".to_string(),
                node_name: node_name.to_string(),
            },
        );
        request.metadata.namespace = Some("default".to_string());
        request.metadata.creation_timestamp = Some(Time(Utc::now()));
        request
    }

    fn worker(name: &str) -> Node {
        Node {
            metadata: ObjectMeta {
                name: Some(name.to_string()),
                ..Default::default()
            },
            ..Default::default()
        }
    }

    fn node_not_found(name: &str) -> WorkloadClientError {
        WorkloadClientError::NotFound {
            kind: "Node",
            name: name.to_string(),
        }
    }

    fn budget_error(pod_name: &str) -> WorkloadClientError {
        WorkloadClientError::DisruptionBudget {
            pod_name: pod_name.to_string(),
            source: kube::Error::Api(ErrorResponse {
                status: "Failure".to_string(),
                message: "Cannot evict pod as it would violate the pod's disruption budget."
                    .to_string(),
                reason: "TooManyRequests".to_string(),
                code: 429,
            }),
        }
    }

    fn unavailable(action: &str) -> WorkloadClientError {
        WorkloadClientError::Unavailable {
            action: action.to_string(),
            source: kube::Error::Api(ErrorResponse {
                status: "Failure".to_string(),
                message: "unavailable".to_string(),
                reason: "ServiceUnavailable".to_string(),
                code: 503,
            }),
        }
    }

    fn web_pod() -> k8s_openapi::api::core::v1::Pod {
        k8s_openapi::api::core::v1::Pod {
            metadata: ObjectMeta {
                name: Some("web-0".to_string()),
                namespace: Some("default".to_string()),
                uid: Some("web-0-uid".to_string()),
                ..Default::default()
            },
            ..Default::default()
        }
    }

    /// A cluster access which always resolves to the given workload client.
    fn access_to(workload: MockWorkloadClusterClient) -> MockClusterAccess {
        let workload: Arc<dyn WorkloadClusterClient> = Arc::new(workload);
        let mut access = MockClusterAccess::new();
        access
            .expect_resolve()
            .returning(move |_, _| Ok(workload.clone()));
        access
    }

    /// A workload cluster in which the node was cordoned away concurrently.
    fn node_vanishes_on_cordon() -> MockWorkloadClusterClient {
        let mut workload = MockWorkloadClusterClient::new();
        workload
            .expect_get_node()
            .returning(|name| Ok(worker(name)));
        workload
            .expect_cordon_node()
            .returning(|name| Err(node_not_found(name)));
        workload
    }

    fn reconciler(
        access: MockClusterAccess,
        request_client: MockDrainRequestClient,
        settings: ReconcilerSettings,
    ) -> DrainReconciler<MockClusterAccess, MockDrainRequestClient> {
        DrainReconciler::new(
            access,
            request_client,
            Arc::new(NoopRecorder),
            Arc::new(DrainTracker::new()),
            settings,
        )
        .unwrap()
    }

    async fn reconcile_until_finished(
        reconciler: &DrainReconciler<MockClusterAccess, MockDrainRequestClient>,
        request: &DrainRequest,
    ) {
        for _ in 0..200 {
            if reconciler.ensure_created(request).await.unwrap() == DrainProgress::Finished {
                return;
            }
        }
        panic!("drain never finished");
    }

    #[test]
    fn test_invalid_settings_fail_construction() {
        let settings = ReconcilerSettings {
            poll_wait: Duration::from_secs(0),
            ..Default::default()
        };
        let result = DrainReconciler::new(
            MockClusterAccess::new(),
            MockDrainRequestClient::new(),
            Arc::new(NoopRecorder),
            Arc::new(DrainTracker::new()),
            settings,
        );
        assert!(matches!(result, Err(error::Error::InvalidSettings { .. })));
    }

    #[test]
    fn test_zero_eviction_retry_interval_fails_construction() {
        let mut settings = ReconcilerSettings::default();
        settings.drain.eviction_retry_interval = Duration::from_secs(0);
        let result = DrainReconciler::new(
            MockClusterAccess::new(),
            MockDrainRequestClient::new(),
            Arc::new(NoopRecorder),
            Arc::new(DrainTracker::new()),
            settings,
        );
        assert!(matches!(result, Err(error::Error::InvalidSettings { .. })));
    }

    #[tokio::test]
    async fn test_terminal_request_is_noop() {
        let mut access = MockClusterAccess::new();
        access.expect_resolve().never();
        let mut request_client = MockDrainRequestClient::new();
        request_client.expect_update_status().never();
        let reconciler = reconciler(access, request_client, ReconcilerSettings::default());

        for condition in [DrainConditionType::Drained, DrainConditionType::Timeout] {
            let finished = request("worker-1").with_condition(condition, Utc::now());
            assert_eq!(
                reconciler.ensure_created(&finished).await.unwrap(),
                DrainProgress::Finished
            );
            assert!(reconciler.tracker().is_empty());
        }
    }

    #[tokio::test]
    async fn test_not_started_launches_drain() {
        let mut workload = MockWorkloadClusterClient::new();
        workload
            .expect_get_node()
            .returning(|name| Err(node_not_found(name)));
        let mut request_client = MockDrainRequestClient::new();
        request_client.expect_update_status().never();
        let reconciler = reconciler(
            access_to(workload),
            request_client,
            ReconcilerSettings::default(),
        );

        let progress = reconciler.ensure_created(&request("worker-1")).await.unwrap();

        assert_eq!(progress, DrainProgress::InProgress);
        assert!(reconciler
            .tracker()
            .contains(&DrainKey::new(CLUSTER_ID, "worker-1")));
    }

    #[tokio::test]
    async fn test_node_missing_during_cordon_records_drained() {
        let mut request_client = MockDrainRequestClient::new();
        request_client
            .expect_update_status()
            .withf(|request| request.has_drained_condition() && !request.has_timeout_condition())
            .times(1)
            .returning(|_| Ok(()));
        let reconciler = reconciler(
            access_to(node_vanishes_on_cordon()),
            request_client,
            ReconcilerSettings::default(),
        );
        let request = request("worker-1");

        assert_eq!(
            reconciler.ensure_created(&request).await.unwrap(),
            DrainProgress::InProgress
        );
        reconcile_until_finished(&reconciler, &request).await;

        assert!(!reconciler
            .tracker()
            .contains(&DrainKey::new(CLUSTER_ID, "worker-1")));
    }

    #[tokio::test(start_paused = true)]
    async fn test_budget_blocked_drain_records_timeout() {
        let mut workload = MockWorkloadClusterClient::new();
        workload
            .expect_get_node()
            .returning(|name| Ok(worker(name)));
        workload.expect_cordon_node().returning(|_| Ok(()));
        workload
            .expect_list_pods_on_node()
            .returning(|_| Ok(vec![web_pod()]));
        workload
            .expect_evict_pod()
            .returning(|_, name, _| Err(budget_error(name)));

        let mut request_client = MockDrainRequestClient::new();
        request_client
            .expect_update_status()
            .withf(|request| request.has_timeout_condition() && !request.has_drained_condition())
            .times(1)
            .returning(|_| Ok(()));
        let reconciler = reconciler(
            access_to(workload),
            request_client,
            ReconcilerSettings::default(),
        );

        reconcile_until_finished(&reconciler, &request("worker-1")).await;
        assert!(reconciler.tracker().is_empty());
    }

    #[tokio::test]
    async fn test_failed_status_write_is_retried() {
        let writes = Arc::new(AtomicUsize::new(0));
        let mut request_client = MockDrainRequestClient::new();
        let attempts = writes.clone();
        request_client
            .expect_update_status()
            .withf(|request| request.has_drained_condition())
            .times(2)
            .returning(move |request| {
                if attempts.fetch_add(1, Ordering::SeqCst) == 0 {
                    Err(DrainRequestError::MissingNamespace {
                        name: request.name_any(),
                    })
                } else {
                    Ok(())
                }
            });
        let reconciler = reconciler(
            access_to(node_vanishes_on_cordon()),
            request_client,
            ReconcilerSettings::default(),
        );
        let request = request("worker-1");
        let key = DrainKey::new(CLUSTER_ID, "worker-1");

        reconciler.ensure_created(&request).await.unwrap();
        let mut failed = false;
        for _ in 0..200 {
            match reconciler.ensure_created(&request).await {
                Err(error::Error::UpdateStatus { .. }) => {
                    failed = true;
                    break;
                }
                Ok(DrainProgress::InProgress) => continue,
                other => panic!("unexpected reconcile result: {:?}", other),
            }
        }
        assert!(failed);
        assert!(reconciler.tracker().contains(&key));

        assert_eq!(
            reconciler.ensure_created(&request).await.unwrap(),
            DrainProgress::Finished
        );
        assert!(!reconciler.tracker().contains(&key));
        assert_eq!(writes.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_unreachable_cluster_defers() {
        let mut access = MockClusterAccess::new();
        access.expect_resolve().times(1).returning(|cluster_id, _| {
            Err(ClusterAccessError::Unreachable {
                cluster_id: cluster_id.to_string(),
                reason: "connection refused".to_string(),
            })
        });
        let mut request_client = MockDrainRequestClient::new();
        request_client.expect_update_status().never();
        let reconciler = reconciler(access, request_client, ReconcilerSettings::default());

        assert_eq!(
            reconciler.ensure_created(&request("worker-1")).await.unwrap(),
            DrainProgress::Deferred
        );
        assert!(reconciler.tracker().is_empty());
    }

    #[tokio::test]
    async fn test_credential_timeout_defers() {
        let mut access = MockClusterAccess::new();
        access.expect_resolve().times(1).returning(|cluster_id, _| {
            Err(ClusterAccessError::CredentialTimeout {
                cluster_id: cluster_id.to_string(),
                timeout: Duration::from_secs(10),
            })
        });
        let reconciler = reconciler(
            access,
            MockDrainRequestClient::new(),
            ReconcilerSettings::default(),
        );

        assert_eq!(
            reconciler.ensure_created(&request("worker-1")).await.unwrap(),
            DrainProgress::Deferred
        );
    }

    #[tokio::test]
    async fn test_transient_drain_failure_restarts_drain() {
        let mut workload = MockWorkloadClusterClient::new();
        workload
            .expect_get_node()
            .returning(|name| Ok(worker(name)));
        workload
            .expect_cordon_node()
            .returning(|_| Err(unavailable("cordon Node")));
        let mut request_client = MockDrainRequestClient::new();
        request_client.expect_update_status().never();
        let reconciler = reconciler(
            access_to(workload),
            request_client,
            ReconcilerSettings::default(),
        );
        let request = request("worker-1");

        reconciler.ensure_created(&request).await.unwrap();
        let mut deferred = false;
        for _ in 0..200 {
            match reconciler.ensure_created(&request).await.unwrap() {
                DrainProgress::Deferred => {
                    deferred = true;
                    break;
                }
                DrainProgress::InProgress => continue,
                DrainProgress::Finished => panic!("transient failure must not be recorded"),
            }
        }
        assert!(deferred);
        assert!(reconciler.tracker().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_unreachable_during_eviction_defers() {
        let evictions = Arc::new(AtomicUsize::new(0));
        let mut workload = MockWorkloadClusterClient::new();
        workload
            .expect_get_node()
            .returning(|name| Ok(worker(name)));
        workload.expect_cordon_node().returning(|_| Ok(()));
        workload
            .expect_list_pods_on_node()
            .returning(|_| Ok(vec![web_pod()]));
        let attempts = evictions.clone();
        workload.expect_evict_pod().returning(move |_, _, _| {
            attempts.fetch_add(1, Ordering::SeqCst);
            Err(unavailable("evict Pod"))
        });
        let mut request_client = MockDrainRequestClient::new();
        request_client.expect_update_status().never();
        let reconciler = reconciler(
            access_to(workload),
            request_client,
            ReconcilerSettings::default(),
        );
        let request = request("worker-1");

        assert_eq!(
            reconciler.ensure_created(&request).await.unwrap(),
            DrainProgress::InProgress
        );
        let mut deferred = false;
        for _ in 0..200 {
            match reconciler.ensure_created(&request).await.unwrap() {
                DrainProgress::Deferred => {
                    deferred = true;
                    break;
                }
                DrainProgress::InProgress => continue,
                DrainProgress::Finished => panic!("unreachable workload cluster must not time out the drain"),
            }
        }
        assert!(deferred);
        assert!(reconciler.tracker().is_empty());
        assert!(evictions.load(Ordering::SeqCst) > 1);
    }

    #[tokio::test]
    async fn test_request_past_age_ceiling_times_out_without_draining() {
        let mut access = MockClusterAccess::new();
        access.expect_resolve().never();
        let mut request_client = MockDrainRequestClient::new();
        request_client
            .expect_update_status()
            .withf(|request| request.has_timeout_condition())
            .times(1)
            .returning(|_| Ok(()));
        let settings = ReconcilerSettings {
            max_request_age: Some(Duration::from_secs(3600)),
            ..Default::default()
        };
        let reconciler = reconciler(access, request_client, settings);

        let mut old = request("worker-1");
        old.metadata.creation_timestamp =
            Some(Time(Utc::now() - chrono::Duration::hours(2)));

        assert_eq!(
            reconciler.ensure_created(&old).await.unwrap(),
            DrainProgress::Finished
        );
        assert!(reconciler.tracker().is_empty());
    }

    #[tokio::test]
    async fn test_ensure_deleted_missing_node() {
        let mut workload = MockWorkloadClusterClient::new();
        workload
            .expect_delete_node()
            .withf(|name| name.to_string() == "worker-1")
            .times(1)
            .returning(|name| Err(node_not_found(name)));
        let reconciler = reconciler(
            access_to(workload),
            MockDrainRequestClient::new(),
            ReconcilerSettings::default(),
        );
        let key = DrainKey::new(CLUSTER_ID, "worker-1");
        let _running = reconciler.tracker().try_start(&key);
        assert!(reconciler.tracker().contains(&key));

        reconciler.ensure_deleted(&request("worker-1")).await.unwrap();

        assert!(!reconciler.tracker().contains(&key));
    }

    #[tokio::test]
    async fn test_ensure_deleted_unreachable_cluster() {
        let mut access = MockClusterAccess::new();
        access.expect_resolve().times(1).returning(|cluster_id, _| {
            Err(ClusterAccessError::Unreachable {
                cluster_id: cluster_id.to_string(),
                reason: "connection refused".to_string(),
            })
        });
        let reconciler = reconciler(
            access,
            MockDrainRequestClient::new(),
            ReconcilerSettings::default(),
        );

        assert!(reconciler.ensure_deleted(&request("worker-1")).await.is_ok());
    }
}
