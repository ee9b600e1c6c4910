//! Eviction of a single Pod, including the wait for the Pod to actually go away.
use super::{
    client::WorkloadClusterClient,
    drain::DrainSettings,
    error::{EvictionError, WorkloadClientError},
};
use crate::recorder::EventRecorder;

use k8s_openapi::api::core::v1::{ObjectReference, Pod};
use kube::ResourceExt;
use serde::Deserialize;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::time::{sleep, Duration, Instant};
use tokio_retry::{
    strategy::{jitter, ExponentialBackoff},
    RetryIf,
};
use tracing::{event, instrument, Level};

/// Grace period for Pods which do not set a positive `terminationGracePeriodSeconds`.
pub const DEFAULT_GRACE_PERIOD: Duration = Duration::from_secs(60);

// Some errors while attempting evictions result in retries with exponential backoff.
// These values configure how long to delay between tries.
const RETRY_BASE_DELAY: Duration = Duration::from_millis(100);
const RETRY_MAX_DELAY: Duration = Duration::from_secs(20);
const NUM_RETRIES: usize = 10;

/// How Pods are removed from a node.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum EvictionMode {
    /// Use the Eviction API, which respects PodDisruptionBudgets.
    #[default]
    Evict,
    /// Delete Pods directly.
    Delete,
}

/// Wrapper struct to provide retry configurations for evictions.
struct RetryStrategy {}
impl RetryStrategy {
    fn retry_strategy() -> impl Iterator<Item = Duration> {
        ExponentialBackoff::from_millis(RETRY_BASE_DELAY.as_millis() as u64)
            .max_delay(RETRY_MAX_DELAY)
            .map(jitter)
            .take(NUM_RETRIES)
    }
}

impl tokio_retry::Condition<EvictionError> for RetryStrategy {
    fn should_retry(&mut self, error: &EvictionError) -> bool {
        error.should_retry()
    }
}

/// Returns the grace period to use when removing `pod`.
///
/// An explicit override wins. Otherwise the Pod's own termination grace period is used if it is positive.
pub fn grace_period_for(pod: &Pod, grace_override: Option<Duration>) -> Duration {
    grace_override.unwrap_or_else(|| {
        pod.spec
            .as_ref()
            .and_then(|spec| spec.termination_grace_period_seconds)
            .filter(|seconds| *seconds > 0)
            .map(|seconds| Duration::from_secs(seconds as u64))
            .unwrap_or(DEFAULT_GRACE_PERIOD)
    })
}

/// Everything an eviction needs besides the Pod itself.
#[derive(Clone, Copy)]
pub(crate) struct EvictionContext<'a> {
    pub(crate) client: &'a dyn WorkloadClusterClient,
    pub(crate) recorder: &'a dyn EventRecorder,
    pub(crate) target: &'a ObjectReference,
    pub(crate) settings: &'a DrainSettings,
    pub(crate) grace_override: Option<Duration>,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub(crate) enum DeletionOutcome {
    /// The Pod is gone, or was replaced by a new Pod of the same name.
    Deleted,
    /// The Pod was still present when the wait ended.
    Lingering,
}

/// Evicts the Pod, then waits a bounded time for it to disappear.
///
/// A Pod which lingers past the wait is reported but does not fail the eviction.
pub(crate) async fn evict_and_wait(ctx: EvictionContext<'_>, pod: &Pod) -> Result<(), EvictionError> {
    evict_pod(ctx, pod).await?;

    if wait_for_deletion(ctx, pod).await == DeletionOutcome::Lingering {
        ctx.recorder
            .warn(
                ctx.target,
                "PodStuckEvicting",
                &format!(
                    "pod {}/{} was not deleted within {:.0}s of its eviction",
                    pod_namespace(pod),
                    pod.name_any(),
                    ctx.settings.deletion_timeout.as_secs_f64()
                ),
            )
            .await;
    }
    Ok(())
}

/// Create an eviction (or deletion) for the desired Pod.
///
/// A 429 (TOO_MANY_REQUESTS) response from the eviction subresource, or a "Cannot evict pod" message, means we must
/// wait to allow a PodDisruptionBudget to be satisfied. Those evictions are retried at a fixed interval for as long
/// as the caller lets this future run. Connection failures and server timeouts are retried with exponential backoff.
#[instrument(skip(ctx, pod), fields(pod = %pod.name_any()), err)]
pub(crate) async fn evict_pod(ctx: EvictionContext<'_>, pod: &Pod) -> Result<(), EvictionError> {
    let namespace = pod_namespace(pod);
    let pod_name = pod.name_any();
    let grace_period = grace_period_for(pod, ctx.grace_override);
    let budget_reported = AtomicBool::new(false);

    RetryIf::spawn(
        RetryStrategy::retry_strategy(),
        || async {
            loop {
                event!(Level::INFO, "Attempting to evict pod {}", &pod_name);
                let result = match ctx.settings.eviction_mode {
                    EvictionMode::Evict => {
                        ctx.client
                            .evict_pod(&namespace, &pod_name, grace_period)
                            .await
                    }
                    EvictionMode::Delete => {
                        ctx.client
                            .delete_pod(&namespace, &pod_name, grace_period)
                            .await
                    }
                };

                match result {
                    Ok(()) => {
                        event!(Level::INFO, "Successfully evicted Pod '{}'", pod_name);
                        return Ok(());
                    }
                    Err(err) if err.is_not_found() => {
                        event!(Level::INFO, "Pod '{}' is already gone.", pod_name);
                        return Ok(());
                    }
                    Err(err) if err.is_disruption_budget() => {
                        event!(
                            Level::WARN,
                            "Eviction of Pod '{}' is blocked by a disruption budget: '{}'. Retrying in {:.2}s.",
                            pod_name,
                            err,
                            ctx.settings.eviction_retry_interval.as_secs_f64()
                        );
                        if !budget_reported.swap(true, Ordering::SeqCst) {
                            ctx.recorder
                                .warn(
                                    ctx.target,
                                    "EvictionBlocked",
                                    &format!(
                                        "eviction of pod {}/{} is blocked by a disruption budget",
                                        namespace, pod_name
                                    ),
                                )
                                .await;
                        }
                        sleep(ctx.settings.eviction_retry_interval).await;
                        continue;
                    }
                    Err(err @ WorkloadClientError::Unavailable { .. }) => {
                        event!(Level::ERROR, "Eviction failed: '{}'. Retrying...", err);
                        return Err(EvictionError::RetriableEviction {
                            source: err,
                            pod_name: pod_name.clone(),
                        });
                    }
                    Err(err) => {
                        event!(
                            Level::ERROR,
                            "Error when evicting Pod '{}': '{}'.",
                            pod_name,
                            err
                        );
                        return Err(EvictionError::NonRetriableEviction {
                            source: err,
                            pod_name: pod_name.clone(),
                        });
                    }
                }
            }
        },
        RetryStrategy {},
    )
    .await
}

/// Wait for the given Pod to be deleted, or replaced by a Pod with a different UID.
#[instrument(skip(ctx, pod), fields(pod = %pod.name_any()))]
pub(crate) async fn wait_for_deletion(ctx: EvictionContext<'_>, pod: &Pod) -> DeletionOutcome {
    let start_time = Instant::now();
    let namespace = pod_namespace(pod);
    let pod_name = pod.name_any();
    let check_interval = ctx.settings.deletion_check_interval;

    loop {
        match ctx.client.get_pod(&namespace, &pod_name).await {
            Err(err) if err.is_not_found() => {
                event!(Level::INFO, "Pod {} deleted.", pod_name);
                return DeletionOutcome::Deleted;
            }
            Ok(current) if current.uid() != pod.uid() => {
                event!(Level::INFO, "Pod {} was replaced by a new Pod.", pod_name);
                return DeletionOutcome::Deleted;
            }
            Ok(_) => {
                event!(
                    Level::DEBUG,
                    "Pod '{}' not yet deleted. Waiting {}s.",
                    pod_name,
                    check_interval.as_secs_f64()
                );
            }
            Err(err) => {
                event!(
                    Level::ERROR,
                    "Could not determine if Pod '{}' has been deleted: '{}'. Waiting {}s.",
                    pod_name,
                    err,
                    check_interval.as_secs_f64()
                );
            }
        }

        if start_time.elapsed() >= ctx.settings.deletion_timeout {
            event!(
                Level::WARN,
                "Pod '{}' was not deleted in the time allocated ({:.2}s).",
                pod_name,
                ctx.settings.deletion_timeout.as_secs_f64()
            );
            return DeletionOutcome::Lingering;
        }
        sleep(check_interval).await;
    }
}

pub(crate) fn pod_namespace(pod: &Pod) -> String {
    pod.namespace().unwrap_or_else(|| "default".to_string())
}
