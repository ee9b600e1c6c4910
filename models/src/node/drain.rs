//! Provides an implementation for draining Pods from a Kubernetes Node, similar to `kubectl drain`.
//!
//! Draining in Kubernetes is done client side, and is a combination of "cordoning" a Node by marking it as
//! unschedulable, followed by evicting (or deleting) Pods from the Node. Workload Pods are evicted before Pods in the
//! system namespace, and the whole drain runs under a wall-clock timeout which depends on the Node's role.
use super::{
    classify::{EvictionPlan, PodClass},
    client::WorkloadClusterClient,
    error::{self, DrainError, EvictionError},
    evict::{self, EvictionContext, EvictionMode},
    NodeRole,
};
use crate::recorder::EventRecorder;

use futures::{stream, StreamExt};
use k8s_openapi::api::core::v1::{ObjectReference, Pod};
use kube::ResourceExt;
use snafu::ResultExt;
use tokio::time::{timeout, Duration};
use tracing::{event, instrument, Level};

// Maximum number of Pods to evict concurrently. Waiting for Pods to be deleted is included in this limitation.
const CONCURRENT_EVICTIONS: usize = 5;

// When waiting for a PodDisruptionBudget to be satisfied we stall for a fixed rate between eviction attempts.
// `kubectl drain` similarly waits 5 seconds between eviction attempts.
const EVICTION_RETRY_INTERVAL: Duration = Duration::from_secs(5);

// After evictions are created, we wait for the Pods to be deleted by Kubernetes.
const DELETION_CHECK_INTERVAL: Duration = Duration::from_millis(500);
const DELETION_TIMEOUT: Duration = Duration::from_secs(120);

const WORKER_DRAIN_TIMEOUT: Duration = Duration::from_secs(300);
const CONTROL_PLANE_DRAIN_TIMEOUT: Duration = Duration::from_secs(60);
const CONTROL_PLANE_GRACE_PERIOD: Duration = Duration::from_secs(30);

// Bounds the initial Node lookup, which runs before the role's timeout is known.
const NODE_LOOKUP_TIMEOUT: Duration = Duration::from_secs(10);

// Bounds the listing of leftover Pods after a drain has timed out.
const LEFTOVER_LISTING_TIMEOUT: Duration = Duration::from_secs(10);

/// Drain parameters which depend on the role of the Node.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DrainProfile {
    /// Overrides each Pod's own termination grace period when set.
    pub grace_period: Option<Duration>,
    /// Wall-clock limit for the cordon and all evictions.
    pub timeout: Duration,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DrainSettings {
    pub worker: DrainProfile,
    pub control_plane: DrainProfile,
    pub eviction_mode: EvictionMode,
    pub eviction_retry_interval: Duration,
    pub deletion_check_interval: Duration,
    pub deletion_timeout: Duration,
    pub concurrent_evictions: usize,
}

impl Default for DrainSettings {
    fn default() -> Self {
        DrainSettings {
            worker: DrainProfile {
                grace_period: None,
                timeout: WORKER_DRAIN_TIMEOUT,
            },
            control_plane: DrainProfile {
                grace_period: Some(CONTROL_PLANE_GRACE_PERIOD),
                timeout: CONTROL_PLANE_DRAIN_TIMEOUT,
            },
            eviction_mode: EvictionMode::default(),
            eviction_retry_interval: EVICTION_RETRY_INTERVAL,
            deletion_check_interval: DELETION_CHECK_INTERVAL,
            deletion_timeout: DELETION_TIMEOUT,
            concurrent_evictions: CONCURRENT_EVICTIONS,
        }
    }
}

impl DrainSettings {
    pub fn profile(&self, role: NodeRole) -> &DrainProfile {
        match role {
            NodeRole::ControlPlane => &self.control_plane,
            NodeRole::Worker => &self.worker,
        }
    }
}

/// Cordons and drains a node of all evictable pods.
///
/// A Node which no longer exists is considered drained. By default, we ignore:
/// * DaemonSet Pods - The DaemonSet controller will not respect node cordons, so we don't battle it.
/// * Control-plane static and Mirror Pods - These are restarted by the kubelet and cannot be controlled.
/// * Pods which were already evicted.
///
/// Evictions blocked by a PodDisruptionBudget are retried until the drain's timeout elapses, in which case a
/// `DrainError::Timeout` is returned. If the workload cluster stops answering while Pods are evicted, the transient
/// `DrainError::EvictPodsUnavailable` is returned instead. Events describing the outcome are recorded against `target`.
#[instrument(skip(client, recorder, target, settings), err)]
pub async fn drain_node(
    client: &dyn WorkloadClusterClient,
    node_name: &str,
    recorder: &dyn EventRecorder,
    target: &ObjectReference,
    settings: &DrainSettings,
) -> Result<(), DrainError> {
    let node = match timeout(NODE_LOOKUP_TIMEOUT, client.get_node(node_name)).await {
        Ok(Ok(node)) => node,
        Ok(Err(err)) if err.is_not_found() => {
            event!(Level::INFO, "Node '{}' no longer exists; nothing to drain.", node_name);
            recorder
                .info(
                    target,
                    "DrainSucceeded",
                    &format!("node {} no longer exists", node_name),
                )
                .await;
            return Ok(());
        }
        Ok(Err(err)) => return Err(err).context(error::NodeLookupSnafu { node_name }),
        Err(_) => {
            return error::NodeLookupTimeoutSnafu {
                node_name,
                timeout: NODE_LOOKUP_TIMEOUT,
            }
            .fail()
        }
    };

    let role = NodeRole::from_node(&node);
    let profile = settings.profile(role);
    event!(
        Level::INFO,
        %role,
        timeout_secs = profile.timeout.as_secs(),
        "Draining node '{}'.",
        node_name
    );

    let ctx = EvictionContext {
        client,
        recorder,
        target,
        settings,
        grace_override: profile.grace_period,
    };

    match timeout(profile.timeout, cordon_and_evict(ctx, node_name)).await {
        Ok(Ok(())) => {
            recorder
                .info(target, "DrainSucceeded", &format!("drained node {}", node_name))
                .await;
            Ok(())
        }
        Ok(Err(err)) if err.is_transient() => {
            event!(Level::WARN, "Drain of node '{}' will be retried: '{}'", node_name, err);
            Err(err)
        }
        Ok(Err(err)) => {
            // Cordon failures have already been reported.
            if !matches!(err, DrainError::Cordon { .. }) {
                recorder
                    .warn(
                        target,
                        "DrainFailed",
                        &format!("failed to drain node {}: {}", node_name, err),
                    )
                    .await;
            }
            Err(err)
        }
        Err(_) => {
            let leftover = leftover_pods(client, node_name).await;
            event!(
                Level::ERROR,
                ?leftover,
                "Node '{}' was not drained within {}s.",
                node_name,
                profile.timeout.as_secs()
            );
            recorder
                .warn(
                    target,
                    "DrainTimedOut",
                    &format!(
                        "node {} was not drained within {}s, pods not evicted: {}",
                        node_name,
                        profile.timeout.as_secs(),
                        leftover.join(", ")
                    ),
                )
                .await;
            error::TimeoutSnafu {
                node_name,
                timeout: profile.timeout,
            }
            .fail()
        }
    }
}

async fn cordon_and_evict(ctx: EvictionContext<'_>, node_name: &str) -> Result<(), DrainError> {
    match ctx.client.cordon_node(node_name).await {
        Ok(()) => {}
        Err(err) if err.is_not_found() => {
            event!(Level::INFO, "Node '{}' disappeared before it was cordoned.", node_name);
            return Ok(());
        }
        Err(err) => {
            ctx.recorder
                .warn(
                    ctx.target,
                    "CordonFailed",
                    &format!("failed to cordon node {}: {}", node_name, err),
                )
                .await;
            return Err(err).context(error::CordonSnafu { node_name });
        }
    }

    let pods = ctx
        .client
        .list_pods_on_node(node_name)
        .await
        .context(error::FindTargetPodsSnafu { node_name })?;
    let plan = EvictionPlan::from_pods(pods);
    event!(
        Level::INFO,
        workload = plan.workload.len(),
        system = plan.system.len(),
        skipped = plan.skipped,
        "Evicting pods from node '{}'.",
        node_name
    );
    if plan.is_empty() {
        return Ok(());
    }

    // System Pods only start once every workload eviction has finished.
    let mut failed = evict_all(ctx, plan.workload).await;
    failed.extend(evict_all(ctx, plan.system).await);

    if failed.is_empty() {
        return Ok(());
    }

    // Retriable evictions only fail once the workload cluster stayed unavailable through every retry.
    let unavailable = failed.iter().all(|(_, err)| err.should_retry());
    let pod_names: Vec<String> = failed.into_iter().map(|(pod_name, _)| pod_name).collect();
    if unavailable {
        error::EvictPodsUnavailableSnafu {
            node_name,
            pod_names,
        }
        .fail()
    } else {
        error::EvictPodsSnafu {
            node_name,
            pod_names,
        }
        .fail()
    }
}

/// Evicts the given Pods concurrently, returning the Pods which could not be evicted along with the reason.
async fn evict_all(ctx: EvictionContext<'_>, pods: Vec<Pod>) -> Vec<(String, EvictionError)> {
    stream::iter(pods)
        .map(move |pod| async move {
            match evict::evict_and_wait(ctx, &pod).await {
                Ok(()) => None,
                Err(err) => {
                    event!(Level::ERROR, "Giving up on Pod '{}': '{}'", pod.name_any(), err);
                    Some((
                        format!("{}/{}", evict::pod_namespace(&pod), pod.name_any()),
                        err,
                    ))
                }
            }
        })
        .buffer_unordered(ctx.settings.concurrent_evictions.max(1))
        .filter_map(|failed| async move { failed })
        .collect()
        .await
}

/// Names of the evictable Pods still on the node.
async fn leftover_pods(client: &dyn WorkloadClusterClient, node_name: &str) -> Vec<String> {
    match timeout(LEFTOVER_LISTING_TIMEOUT, client.list_pods_on_node(node_name)).await {
        Ok(Ok(pods)) => pods
            .iter()
            .filter(|pod| super::classify(pod).is_evictable())
            .map(|pod| format!("{}/{}", evict::pod_namespace(pod), pod.name_any()))
            .collect(),
        Ok(Err(err)) => {
            event!(Level::WARN, "Unable to list remaining Pods on node '{}': '{}'", node_name, err);
            Vec::new()
        }
        Err(_) => Vec::new(),
    }
}
