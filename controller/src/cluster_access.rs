//! Builds clients for workload clusters.
//!
//! Each workload cluster's kubeconfig lives in a Secret in the controller's namespace. A fresh client is built on
//! every resolution so that rotated credentials are picked up.
use models::constants::{KUBECONFIG_SECRET_KEY, KUBECONFIG_SECRET_SUFFIX};
use models::node::{is_transient_error, K8SWorkloadClusterClient, WorkloadClusterClient};

use async_trait::async_trait;
use k8s_openapi::api::core::v1::Secret;
use kube::config::{KubeConfigOptions, Kubeconfig};
use kube::Api;
use snafu::{OptionExt, ResultExt, Snafu};
use std::convert::TryFrom;
use std::sync::Arc;
use tokio::time::{timeout, Duration};
use tracing::{event, instrument, Level};

#[cfg(test)]
use mockall::{mock, predicate::*};

#[async_trait]
pub trait ClusterAccess: Send + Sync {
    /// Returns a client for the given workload cluster.
    ///
    /// `Unreachable` and `CredentialTimeout` failures are transient; see `ClusterAccessError::is_transient`.
    async fn resolve(
        &self,
        cluster_id: &str,
        endpoint: &str,
    ) -> Result<Arc<dyn WorkloadClusterClient>, ClusterAccessError>;
}

#[cfg(test)]
mock! {
    pub ClusterAccess {}
    #[async_trait]
    impl ClusterAccess for ClusterAccess {
        async fn resolve(
            &self,
            cluster_id: &str,
            endpoint: &str,
        ) -> Result<Arc<dyn WorkloadClusterClient>, ClusterAccessError>;
    }
}

#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum ClusterAccessError {
    #[snafu(display(
        "Timed out after {:.2}s fetching credentials for cluster '{}'",
        timeout.as_secs_f64(),
        cluster_id
    ))]
    CredentialTimeout { cluster_id: String, timeout: Duration },

    #[snafu(display("Unable to fetch credentials Secret '{}': '{}'", secret_name, source))]
    CredentialLookup {
        source: kube::Error,
        secret_name: String,
    },

    #[snafu(display("Secret '{}' has no '{}' entry", secret_name, KUBECONFIG_SECRET_KEY))]
    MissingKubeconfig { secret_name: String },

    #[snafu(display("Kubeconfig in Secret '{}' is not valid UTF-8: '{}'", secret_name, source))]
    KubeconfigEncoding {
        source: std::str::Utf8Error,
        secret_name: String,
    },

    #[snafu(display("Unable to load kubeconfig for cluster '{}': '{}'", cluster_id, source))]
    Kubeconfig {
        source: kube::config::KubeconfigError,
        cluster_id: String,
    },

    #[snafu(display("Invalid endpoint '{}' for cluster '{}': '{}'", endpoint, cluster_id, source))]
    Endpoint {
        source: http::uri::InvalidUri,
        cluster_id: String,
        endpoint: String,
    },

    #[snafu(display("Unable to create client for cluster '{}': '{}'", cluster_id, source))]
    ClientCreate {
        source: kube::Error,
        cluster_id: String,
    },

    #[snafu(display("API of cluster '{}' is not available: {}", cluster_id, reason))]
    Unreachable { cluster_id: String, reason: String },

    #[snafu(display("API of cluster '{}' rejected the connection probe: '{}'", cluster_id, source))]
    Probe {
        source: kube::Error,
        cluster_id: String,
    },
}

impl ClusterAccessError {
    /// Transient failures should be retried later instead of being reported.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::Unreachable { .. } | Self::CredentialTimeout { .. }
        )
    }
}

/// Resolves workload cluster clients from kubeconfig Secrets.
#[derive(Clone)]
pub struct SecretClusterAccess {
    k8s_client: kube::Client,
    namespace: String,
    timeout: Duration,
}

impl SecretClusterAccess {
    pub fn new(k8s_client: kube::Client, namespace: &str, timeout: Duration) -> Self {
        SecretClusterAccess {
            k8s_client,
            namespace: namespace.to_string(),
            timeout,
        }
    }

    async fn kubeconfig(&self, cluster_id: &str) -> Result<Kubeconfig, ClusterAccessError> {
        let secret_name = format!("{}{}", cluster_id, KUBECONFIG_SECRET_SUFFIX);
        let secrets: Api<Secret> = Api::namespaced(self.k8s_client.clone(), &self.namespace);

        let secret = timeout(self.timeout, secrets.get(&secret_name))
            .await
            .map_err(|_| ClusterAccessError::CredentialTimeout {
                cluster_id: cluster_id.to_string(),
                timeout: self.timeout,
            })?
            .context(CredentialLookupSnafu {
                secret_name: &secret_name,
            })?;

        let kubeconfig = secret
            .data
            .as_ref()
            .and_then(|data| data.get(KUBECONFIG_SECRET_KEY))
            .context(MissingKubeconfigSnafu {
                secret_name: &secret_name,
            })?;
        let kubeconfig = std::str::from_utf8(&kubeconfig.0).context(KubeconfigEncodingSnafu {
            secret_name: &secret_name,
        })?;

        Kubeconfig::from_yaml(kubeconfig).context(KubeconfigSnafu { cluster_id })
    }
}

#[async_trait]
impl ClusterAccess for SecretClusterAccess {
    #[instrument(skip(self), err)]
    async fn resolve(
        &self,
        cluster_id: &str,
        endpoint: &str,
    ) -> Result<Arc<dyn WorkloadClusterClient>, ClusterAccessError> {
        let kubeconfig = self.kubeconfig(cluster_id).await?;
        let mut config =
            kube::Config::from_custom_kubeconfig(kubeconfig, &KubeConfigOptions::default())
                .await
                .context(KubeconfigSnafu { cluster_id })?;

        if !endpoint.is_empty() {
            config.cluster_url = endpoint
                .parse::<http::Uri>()
                .context(EndpointSnafu {
                    cluster_id,
                    endpoint,
                })?;
        }
        config.connect_timeout = Some(self.timeout);

        let client = kube::Client::try_from(config).context(ClientCreateSnafu { cluster_id })?;

        match timeout(self.timeout, client.apiserver_version()).await {
            Ok(Ok(version)) => {
                event!(
                    Level::DEBUG,
                    cluster_id,
                    version = %version.git_version,
                    "Connected to workload cluster."
                );
            }
            Ok(Err(err)) if is_transient_error(&err) => {
                return UnreachableSnafu {
                    cluster_id,
                    reason: err.to_string(),
                }
                .fail();
            }
            Ok(Err(err)) => return Err(err).context(ProbeSnafu { cluster_id }),
            Err(_) => {
                return UnreachableSnafu {
                    cluster_id,
                    reason: format!("no answer within {:.2}s", self.timeout.as_secs_f64()),
                }
                .fail();
            }
        }

        Ok(Arc::new(K8SWorkloadClusterClient::new(client)))
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_transient_errors() {
        let timeout = ClusterAccessError::CredentialTimeout {
            cluster_id: "cluster-a".to_string(),
            timeout: Duration::from_secs(10),
        };
        assert!(timeout.is_transient());

        let unreachable = ClusterAccessError::Unreachable {
            cluster_id: "cluster-a".to_string(),
            reason: "connection refused".to_string(),
        };
        assert!(unreachable.is_transient());

        let missing = ClusterAccessError::MissingKubeconfig {
            secret_name: "cluster-a-kubeconfig".to_string(),
        };
        assert!(!missing.is_transient());
    }
}
