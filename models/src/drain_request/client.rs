use super::{
    error::{self, Result},
    DrainRequest, DrainRequestStatus, K8S_DRAIN_REQUEST_KIND,
};
use crate::constants;

use async_trait::async_trait;
use kube::api::{Api, Patch, PatchParams};
use kube::ResourceExt;
use serde::{Deserialize, Serialize};
use snafu::{OptionExt, ResultExt};
use std::sync::Arc;
use tracing::instrument;

#[cfg(any(feature = "mockall", test))]
use mockall::{mock, predicate::*};

#[async_trait]
/// A trait providing an interface to persist `DrainRequest` status. This is provided as a trait
/// in order to allow mocks to be used for testing purposes.
pub trait DrainRequestClient: Clone + Sized + Send + Sync {
    /// Writes the `.status` of the given request, as carried by the request itself.
    /// Writing the same status twice is harmless.
    async fn update_status(&self, request: &DrainRequest) -> Result<()>;
}

#[cfg(any(feature = "mockall", test))]
mock! {
    /// A Mock DrainRequestClient for use in tests.
    pub DrainRequestClient {}
    #[async_trait]
    impl DrainRequestClient for DrainRequestClient {
        async fn update_status(&self, request: &DrainRequest) -> Result<()>;
    }

    impl Clone for DrainRequestClient {
        fn clone(&self) -> Self;
    }
}

#[async_trait]
impl<T> DrainRequestClient for Arc<T>
where
    T: DrainRequestClient,
{
    async fn update_status(&self, request: &DrainRequest) -> Result<()> {
        (**self).update_status(request).await
    }
}

#[derive(Clone)]
/// Concrete implementation of the `DrainRequestClient` trait. This implementation will almost
/// certainly be used in any case that isn't a unit test.
pub struct K8SDrainRequestClient {
    k8s_client: kube::client::Client,
}

impl K8SDrainRequestClient {
    pub fn new(k8s_client: kube::client::Client) -> Self {
        K8SDrainRequestClient { k8s_client }
    }
}

#[derive(Debug, Serialize, Deserialize)]
/// A helper struct used to serialize and send patches to the k8s API to modify the status of a DrainRequest.
struct DrainRequestStatusPatch {
    #[serde(rename = "apiVersion")]
    api_version: String,
    kind: String,
    status: DrainRequestStatus,
}

impl Default for DrainRequestStatusPatch {
    fn default() -> Self {
        DrainRequestStatusPatch {
            api_version: constants::API_VERSION.to_string(),
            kind: K8S_DRAIN_REQUEST_KIND.to_string(),
            status: DrainRequestStatus::default(),
        }
    }
}

#[async_trait]
impl DrainRequestClient for K8SDrainRequestClient {
    #[instrument(skip(self, request), fields(name = %request.name_any()), err)]
    async fn update_status(&self, request: &DrainRequest) -> Result<()> {
        let name = request.name_any();
        let namespace = request
            .namespace()
            .context(error::MissingNamespaceSnafu { name: name.clone() })?;

        let status_patch = DrainRequestStatusPatch {
            status: request.status.clone().unwrap_or_default(),
            ..Default::default()
        };
        let status_patch =
            serde_json::to_value(status_patch).context(error::CreateK8SPatchSnafu)?;

        let api: Api<DrainRequest> = Api::namespaced(self.k8s_client.clone(), &namespace);
        api.patch_status(&name, &PatchParams::default(), &Patch::Merge(&status_patch))
            .await
            .context(error::UpdateDrainRequestStatusSnafu { namespace, name })?;

        Ok(())
    }
}
