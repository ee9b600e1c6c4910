use crate::cluster_access::ClusterAccessError;
use models::drain_request::DrainRequestError;
use models::node::WorkloadClientError;

use snafu::Snafu;

/// The crate-wide result type.
pub type Result<T> = std::result::Result<T, Error>;

/// The crate-wide error type.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum Error {
    #[snafu(display("Invalid drain settings: {}", reason))]
    InvalidSettings { reason: String },

    #[snafu(display("Unable to resolve a client for cluster '{}': '{}'", cluster_id, source))]
    ResolveCluster {
        source: ClusterAccessError,
        cluster_id: String,
    },

    #[snafu(display("Failed to update status of DrainRequest '{}': '{}'", name, source))]
    UpdateStatus {
        source: DrainRequestError,
        name: String,
    },

    #[snafu(display("Unable to delete Node '{}' from cluster '{}': '{}'", node_name, cluster_id, source))]
    DeleteNode {
        source: WorkloadClientError,
        cluster_id: String,
        node_name: String,
    },

    #[snafu(display("Error in finalizer handling: '{}'", source))]
    Finalizer {
        source: Box<kube::runtime::finalizer::Error<Error>>,
    },
}
