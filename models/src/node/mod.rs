//! Access to the nodes and pods of a workload cluster, and the drain procedure built on it.
mod classify;
mod client;
mod drain;
mod error;
mod evict;

pub use self::classify::{classify, EvictionPlan, PodClass};
pub use self::client::*;
pub use self::drain::{drain_node, DrainProfile, DrainSettings};
pub use self::error::{is_transient_error, DrainError, EvictionError, WorkloadClientError};
pub use self::evict::{grace_period_for, EvictionMode};

use crate::constants::{CONTROL_PLANE_ROLE_LABEL, MASTER_ROLE_LABEL};

use k8s_openapi::api::core::v1::Node;
use kube::ResourceExt;
use std::fmt;

// We can't use these consts inside macros, but we do provide constants for use in error messages and events.
pub const K8S_NODE_KIND: &str = "Node";
pub const K8S_POD_KIND: &str = "Pod";

/// The role a node plays in its cluster. Control-plane nodes are drained on a shorter schedule.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum NodeRole {
    ControlPlane,
    Worker,
}

impl NodeRole {
    pub fn from_node(node: &Node) -> Self {
        let labels = node.labels();
        if labels.contains_key(CONTROL_PLANE_ROLE_LABEL) || labels.contains_key(MASTER_ROLE_LABEL) {
            NodeRole::ControlPlane
        } else {
            NodeRole::Worker
        }
    }
}

impl fmt::Display for NodeRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ControlPlane => write!(f, "control-plane"),
            Self::Worker => write!(f, "worker"),
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use kube::api::ObjectMeta;
    use maplit::btreemap;

    fn node_with_labels(labels: std::collections::BTreeMap<String, String>) -> Node {
        Node {
            metadata: ObjectMeta {
                name: Some("node".to_string()),
                labels: Some(labels),
                ..Default::default()
            },
            ..Default::default()
        }
    }

    #[test]
    fn test_node_role() {
        let test_cases = vec![
            (btreemap! {}, NodeRole::Worker),
            (
                btreemap! { "node-role.kubernetes.io/worker".to_string() => "".to_string() },
                NodeRole::Worker,
            ),
            (
                btreemap! { CONTROL_PLANE_ROLE_LABEL.to_string() => "".to_string() },
                NodeRole::ControlPlane,
            ),
            (
                btreemap! { MASTER_ROLE_LABEL.to_string() => "true".to_string() },
                NodeRole::ControlPlane,
            ),
        ];

        for (labels, expected) in test_cases {
            assert_eq!(NodeRole::from_node(&node_with_labels(labels)), expected);
        }
    }
}
