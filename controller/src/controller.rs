use crate::cluster_access::ClusterAccess;
use crate::error::{self, Result};
use crate::reconciler::{DrainProgress, DrainReconciler};
use models::constants::DRAIN_REQUEST_FINALIZER;
use models::drain_request::{DrainRequest, DrainRequestClient};

use futures::StreamExt;
use kube::api::Api;
use kube::runtime::controller::{Action, Controller};
use kube::runtime::finalizer::{finalizer, Event as FinalizerEvent};
use kube::runtime::watcher;
use kube::ResourceExt;
use std::sync::Arc;
use tokio::time::Duration;
use tracing::{event, instrument, Level};

/// The DrainRequestController watches `DrainRequest` objects and hands each change to the `DrainReconciler`.
///
/// Requests carry a finalizer so that the Node is removed from its workload cluster before the request itself goes
/// away. Reconciles never block on a drain; an in-flight drain is revisited after the poll wait.
pub struct DrainRequestController<A: ClusterAccess, P: DrainRequestClient> {
    requests: Api<DrainRequest>,
    reconciler: DrainReconciler<A, P>,
    resync_interval: Duration,
}

impl<A, P> DrainRequestController<A, P>
where
    A: ClusterAccess + 'static,
    P: DrainRequestClient + 'static,
{
    pub fn new(
        k8s_client: kube::Client,
        namespace: &str,
        reconciler: DrainReconciler<A, P>,
        resync_interval: Duration,
    ) -> Self {
        DrainRequestController {
            requests: Api::namespaced(k8s_client, namespace),
            reconciler,
            resync_interval,
        }
    }

    /// Runs the controller until the watch stream ends.
    pub async fn run(self) {
        let requests = self.requests.clone();
        Controller::new(requests, watcher::Config::default())
            .run(reconcile::<A, P>, error_policy::<A, P>, Arc::new(self))
            .for_each(|result| async move {
                match result {
                    Ok((request, action)) => event!(
                        Level::TRACE,
                        request = %request.name,
                        ?action,
                        "Reconciled DrainRequest."
                    ),
                    Err(err) => event!(Level::WARN, error = %err, "DrainRequest reconcile failed."),
                }
            })
            .await;
    }

    fn requeue_action(&self, progress: DrainProgress) -> Action {
        requeue_action(
            progress,
            self.reconciler.settings().poll_wait,
            self.resync_interval,
        )
    }
}

fn requeue_action(progress: DrainProgress, poll_wait: Duration, resync_interval: Duration) -> Action {
    match progress {
        DrainProgress::Finished => Action::await_change(),
        DrainProgress::InProgress => Action::requeue(poll_wait),
        DrainProgress::Deferred => Action::requeue(resync_interval),
    }
}

#[instrument(skip(request, ctx), fields(request = %request.name_any()), err)]
async fn reconcile<A, P>(
    request: Arc<DrainRequest>,
    ctx: Arc<DrainRequestController<A, P>>,
) -> Result<Action>
where
    A: ClusterAccess + 'static,
    P: DrainRequestClient + 'static,
{
    finalizer(&ctx.requests, DRAIN_REQUEST_FINALIZER, request, |event| async {
        match event {
            FinalizerEvent::Apply(request) => ctx
                .reconciler
                .ensure_created(&request)
                .await
                .map(|progress| ctx.requeue_action(progress)),
            FinalizerEvent::Cleanup(request) => ctx
                .reconciler
                .ensure_deleted(&request)
                .await
                .map(|_| Action::await_change()),
        }
    })
    .await
    .map_err(|source| error::Error::Finalizer {
        source: Box::new(source),
    })
}

fn error_policy<A, P>(
    request: Arc<DrainRequest>,
    err: &error::Error,
    ctx: Arc<DrainRequestController<A, P>>,
) -> Action
where
    A: ClusterAccess + 'static,
    P: DrainRequestClient + 'static,
{
    event!(
        Level::WARN,
        request = %request.name_any(),
        error = %err,
        "Retrying DrainRequest after {}s.",
        ctx.resync_interval.as_secs()
    );
    Action::requeue(ctx.resync_interval)
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_requeue_action() {
        let poll_wait = Duration::from_secs(5);
        let resync = Duration::from_secs(60);

        assert_eq!(
            requeue_action(DrainProgress::Finished, poll_wait, resync),
            Action::await_change()
        );
        assert_eq!(
            requeue_action(DrainProgress::InProgress, poll_wait, resync),
            Action::requeue(poll_wait)
        );
        assert_eq!(
            requeue_action(DrainProgress::Deferred, poll_wait, resync),
            Action::requeue(resync)
        );
    }
}
