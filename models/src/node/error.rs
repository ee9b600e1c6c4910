//! Errors raised while talking to a workload cluster and while draining one of its nodes.
use super::K8S_POD_KIND;
use kube::error::ErrorResponse;
use snafu::Snafu;
use std::time::Duration;

pub type Result<T> = std::result::Result<T, WorkloadClientError>;

const STATUS_CODE_404_NOT_FOUND: u16 = 404;
const STATUS_CODE_408_TIMEOUT: u16 = 408;
const STATUS_CODE_429_TOO_MANY_REQUESTS: u16 = 429;
const STATUS_CODE_500_INTERNAL_SERVER_ERROR: u16 = 500;
const STATUS_CODE_502_BAD_GATEWAY: u16 = 502;
const STATUS_CODE_503_SERVICE_UNAVAILABLE: u16 = 503;
const STATUS_CODE_504_GATEWAY_TIMEOUT: u16 = 504;

// The eviction subresource answers with this message when a PodDisruptionBudget forbids the eviction.
const DISRUPTION_BUDGET_MESSAGE: &str = "Cannot evict pod";

/// Errors returned by a `WorkloadClusterClient`.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum WorkloadClientError {
    #[snafu(display("{} '{}' was not found in the workload cluster", kind, name))]
    NotFound { kind: &'static str, name: String },

    #[snafu(display("Workload cluster API is unavailable while attempting to {}: '{}'", action, source))]
    Unavailable { action: String, source: kube::Error },

    #[snafu(display("Eviction of Pod '{}' is blocked by a disruption budget: '{}'", pod_name, source))]
    DisruptionBudget { pod_name: String, source: kube::Error },

    #[snafu(display("Workload cluster request failed while attempting to {}: '{}'", action, source))]
    Request { action: String, source: kube::Error },
}

impl WorkloadClientError {
    /// Sorts a `kube::Error` into the kinds the drain logic cares about.
    ///
    /// Throttling (429) outside the eviction subresource is reported as `Unavailable`.
    pub fn from_kube(
        source: kube::Error,
        kind: &'static str,
        name: &str,
        action: impl Into<String>,
    ) -> Self {
        if is_404_not_found_error(&source) {
            WorkloadClientError::NotFound {
                kind,
                name: name.to_string(),
            }
        } else if is_transient_error(&source) {
            WorkloadClientError::Unavailable {
                action: action.into(),
                source,
            }
        } else {
            WorkloadClientError::Request {
                action: action.into(),
                source,
            }
        }
    }

    /// Like `from_kube`, for errors returned by the eviction subresource of Pod `pod_name`.
    pub fn from_eviction(source: kube::Error, pod_name: &str, action: impl Into<String>) -> Self {
        if !is_404_not_found_error(&source) && is_disruption_budget_error(&source) {
            WorkloadClientError::DisruptionBudget {
                pod_name: pod_name.to_string(),
                source,
            }
        } else {
            Self::from_kube(source, K8S_POD_KIND, pod_name, action)
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }

    pub fn is_disruption_budget(&self) -> bool {
        matches!(self, Self::DisruptionBudget { .. })
    }

    /// Whether retrying the same call later may succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Unavailable { .. } | Self::DisruptionBudget { .. })
    }
}

pub fn is_404_not_found_error(err: &kube::Error) -> bool {
    matches!(
        err,
        kube::Error::Api(ErrorResponse {
            code: STATUS_CODE_404_NOT_FOUND,
            ..
        })
    )
}

pub fn is_disruption_budget_error(err: &kube::Error) -> bool {
    match err {
        kube::Error::Api(ErrorResponse {
            code: STATUS_CODE_429_TOO_MANY_REQUESTS,
            ..
        }) => true,
        kube::Error::Api(ErrorResponse { message, .. }) => {
            message.contains(DISRUPTION_BUDGET_MESSAGE)
        }
        _ => false,
    }
}

/// Errors which indicate the workload cluster could not be reached, could not answer in time, or is throttling us.
pub fn is_transient_error(err: &kube::Error) -> bool {
    match err {
        kube::Error::Api(ErrorResponse {
            code:
                STATUS_CODE_408_TIMEOUT
                | STATUS_CODE_429_TOO_MANY_REQUESTS
                | STATUS_CODE_502_BAD_GATEWAY
                | STATUS_CODE_503_SERVICE_UNAVAILABLE
                | STATUS_CODE_504_GATEWAY_TIMEOUT,
            ..
        }) => true,

        kube::Error::Api(ErrorResponse {
            code: STATUS_CODE_500_INTERNAL_SERVER_ERROR,
            reason,
            ..
        }) => reason == "ServerTimeout",

        kube::Error::HyperError(_) | kube::Error::Service(_) => true,

        _ => false,
    }
}

/// Errors raised while evicting a single Pod.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum EvictionError {
    #[snafu(display("Unable to create eviction for Pod '{}': '{}'", pod_name, source))]
    /// An error occurred while attempting to evict a Pod. This may result in an attempt to retry the eviction.
    RetriableEviction {
        source: WorkloadClientError,
        pod_name: String,
    },

    #[snafu(display("Unable to create eviction for Pod '{}': '{}'", pod_name, source))]
    /// A fatal error occurred while attempting to evict a Pod. This will not be retried.
    NonRetriableEviction {
        source: WorkloadClientError,
        pod_name: String,
    },
}

impl EvictionError {
    pub fn should_retry(&self) -> bool {
        match self {
            Self::RetriableEviction { .. } => true,
            Self::NonRetriableEviction { .. } => false,
        }
    }
}

/// Errors returned by a node drain.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum DrainError {
    #[snafu(display("Unable to look up Node '{}': '{}'", node_name, source))]
    NodeLookup {
        source: WorkloadClientError,
        node_name: String,
    },

    #[snafu(display("Unable to cordon Node '{}': '{}'", node_name, source))]
    Cordon {
        source: WorkloadClientError,
        node_name: String,
    },

    #[snafu(display("Unable to find drainable Pods for Node '{}': '{}'", node_name, source))]
    FindTargetPods {
        source: WorkloadClientError,
        node_name: String,
    },

    #[snafu(display("Unable to look up Node '{}' within {:.2}s", node_name, timeout.as_secs_f64()))]
    NodeLookupTimeout { node_name: String, timeout: Duration },

    #[snafu(display("Unable to evict Pods {:?} from Node '{}'", pod_names, node_name))]
    EvictPods {
        node_name: String,
        pod_names: Vec<String>,
    },

    #[snafu(display(
        "Workload cluster API became unavailable while evicting Pods {:?} from Node '{}'",
        pod_names,
        node_name
    ))]
    EvictPodsUnavailable {
        node_name: String,
        pod_names: Vec<String>,
    },

    #[snafu(display(
        "Node '{}' was not drained in the time allocated ({:.2}s).",
        node_name,
        timeout.as_secs_f64()
    ))]
    Timeout { node_name: String, timeout: Duration },

    #[snafu(display("Drain of Node '{}' stopped without reporting an outcome.", node_name))]
    Interrupted { node_name: String },
}

impl DrainError {
    /// Transient failures are not a drain outcome; the drain should be attempted again later.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::NodeLookup { source, .. }
            | Self::Cordon { source, .. }
            | Self::FindTargetPods { source, .. } => source.is_transient(),
            Self::NodeLookupTimeout { .. }
            | Self::EvictPodsUnavailable { .. }
            | Self::Interrupted { .. } => true,
            Self::EvictPods { .. } | Self::Timeout { .. } => false,
        }
    }
}
