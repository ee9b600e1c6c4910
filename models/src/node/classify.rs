//! Decides which Pods on a node a drain evicts, and in which batch.
use crate::constants::{MIRROR_POD_ANNOTATION, SYSTEM_NAMESPACE};

use k8s_openapi::api::core::v1::Pod;
use kube::ResourceExt;

/// Control-plane static Pods. The kubelet restarts these regardless of scheduling state.
const CRITICAL_POD_PREFIXES: &[&str] = &[
    "k8s-api-healthz",
    "k8s-api-server",
    "k8s-controller-manager",
    "k8s-scheduler",
];

const EVICTED_REASON: &str = "Evicted";

#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub enum PodClass {
    /// Control-plane static or mirror Pod. Never evicted.
    Critical,
    /// Owned by a DaemonSet, which ignores cordons and would recreate it. Never evicted.
    DaemonSet,
    /// Already evicted once. Never evicted again.
    AlreadyEvicted,
    /// Lives in the system namespace. Evicted after all workload Pods.
    System,
    /// Everything else. Evicted first.
    Workload,
}

impl PodClass {
    pub fn is_evictable(&self) -> bool {
        matches!(self, Self::System | Self::Workload)
    }
}

/// Classifies a Pod. Checks run in order and the first match wins, so every Pod receives exactly one class.
pub fn classify(pod: &Pod) -> PodClass {
    if is_critical(pod) {
        PodClass::Critical
    } else if is_daemonset_member(pod) {
        PodClass::DaemonSet
    } else if is_evicted(pod) {
        PodClass::AlreadyEvicted
    } else if pod.metadata.namespace.as_deref() == Some(SYSTEM_NAMESPACE) {
        PodClass::System
    } else {
        PodClass::Workload
    }
}

fn is_critical(pod: &Pod) -> bool {
    let name = pod.name_any();
    CRITICAL_POD_PREFIXES
        .iter()
        .any(|prefix| name.starts_with(prefix))
        || pod.annotations().contains_key(MIRROR_POD_ANNOTATION)
}

fn is_daemonset_member(pod: &Pod) -> bool {
    pod.owner_references()
        .iter()
        .any(|reference| reference.controller == Some(true) && reference.kind == "DaemonSet")
}

fn is_evicted(pod: &Pod) -> bool {
    pod.status
        .as_ref()
        .and_then(|status| status.reason.as_deref())
        == Some(EVICTED_REASON)
}

/// The Pods of a node split into eviction batches. Workload Pods are evicted before system Pods.
#[derive(Clone, Debug, Default)]
pub struct EvictionPlan {
    pub workload: Vec<Pod>,
    pub system: Vec<Pod>,
    /// Number of Pods left in place.
    pub skipped: usize,
}

impl EvictionPlan {
    pub fn from_pods<I: IntoIterator<Item = Pod>>(pods: I) -> Self {
        let mut plan = EvictionPlan::default();
        for pod in pods {
            match classify(&pod) {
                PodClass::Workload => plan.workload.push(pod),
                PodClass::System => plan.system.push(pod),
                PodClass::Critical | PodClass::DaemonSet | PodClass::AlreadyEvicted => {
                    plan.skipped += 1
                }
            }
        }
        plan
    }

    pub fn is_empty(&self) -> bool {
        self.workload.is_empty() && self.system.is_empty()
    }
}
