/// Helper macro to avoid retyping the base domain-like name of our system when creating further
/// string constants from it. When given no parameters, this returns the base domain-like name of
/// the system. When given a string literal parameter it adds `/parameter` to the end.
#[macro_export]
macro_rules! drainer_domain {
    () => {
        "drainer.nodepool.dev"
    };
    ($s:literal) => {
        concat!(drainer_domain!(), "/", $s)
    };
}

pub const API_VERSION: &str = drainer_domain!("v1");

/// Finalizer placed on every `DrainRequest` so that node deletion runs before the object goes away.
pub const DRAIN_REQUEST_FINALIZER: &str = drainer_domain!("finalizer");

// Node role labels. Either marks a control-plane node.
pub const CONTROL_PLANE_ROLE_LABEL: &str = "node-role.kubernetes.io/control-plane";
pub const MASTER_ROLE_LABEL: &str = "node-role.kubernetes.io/master";

// Pods in this namespace are evicted after all other pods.
pub const SYSTEM_NAMESPACE: &str = "kube-system";

pub const MIRROR_POD_ANNOTATION: &str = "kubernetes.io/config.mirror";

/// Secrets holding the kubeconfig of a workload cluster are named `<cluster id><suffix>`.
pub const KUBECONFIG_SECRET_SUFFIX: &str = "-kubeconfig";
pub const KUBECONFIG_SECRET_KEY: &str = "value";
