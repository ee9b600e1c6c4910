use controller::cluster_access::SecretClusterAccess;
use controller::config::{config_error, ControllerConfig};
use controller::reconciler::DrainReconciler;
use controller::tracker::DrainTracker;
use controller::{error as reconcile_error, DrainRequestController};
use models::drain_request::K8SDrainRequestClient;
use models::recorder::KubeEventRecorder;
use models::telemetry;

use snafu::ResultExt;
use std::env;
use std::fs;
use std::sync::Arc;
use tracing::{event, Level};

// By default, errors resulting in termination of the controller are written to this file,
// which is the location kubernetes uses by default to surface termination-causing errors.
const TERMINATION_LOG: &str = "/dev/termination-log";

/// The module-wide result type.
type Result<T> = std::result::Result<T, controller_error::Error>;

#[tokio::main]
async fn main() {
    let termination_log = env::var("TERMINATION_LOG").unwrap_or(TERMINATION_LOG.to_string());

    if let Err(error) = run_controller().await {
        event!(Level::ERROR, %error, "drain request controller failed.");
        if let Err(write_error) = fs::write(&termination_log, format!("{}", error)) {
            event!(Level::ERROR, %write_error, "Could not write k8s termination log.");
        }
        std::process::exit(1);
    }
}

async fn run_controller() -> Result<()> {
    telemetry::init_telemetry_from_env().context(controller_error::TelemetryInitSnafu)?;

    let config = ControllerConfig::from_environment().context(controller_error::ConfigSnafu)?;
    event!(Level::INFO, ?config, "Loaded controller configuration.");

    let k8s_client = kube::client::Client::try_default()
        .await
        .context(controller_error::ClientCreateSnafu)?;

    let reconciler = DrainReconciler::new(
        SecretClusterAccess::new(
            k8s_client.clone(),
            &config.namespace,
            config.cluster_access_timeout,
        ),
        K8SDrainRequestClient::new(k8s_client.clone()),
        Arc::new(KubeEventRecorder::new(
            k8s_client.clone(),
            &config.controller_name,
        )),
        Arc::new(DrainTracker::new()),
        config.reconciler.clone(),
    )
    .context(controller_error::ReconcilerSnafu)?;

    DrainRequestController::new(
        k8s_client,
        &config.namespace,
        reconciler,
        config.resync_interval,
    )
    .run()
    .await;

    event!(Level::ERROR, "DrainRequest watch ended.");
    controller_error::ControllerExitedSnafu.fail()
}

pub mod controller_error {
    use super::{config_error, reconcile_error};
    use models::telemetry;
    use snafu::Snafu;

    #[derive(Debug, Snafu)]
    #[snafu(visibility(pub))]
    pub enum Error {
        #[snafu(display("Error configuring telemetry: '{}'", source))]
        TelemetryInit {
            source: telemetry::error::TelemetryConfigError,
        },

        #[snafu(display("Invalid controller configuration: '{}'", source))]
        Config { source: config_error::Error },

        #[snafu(display("Unable to create Kubernetes client: '{}'", source))]
        ClientCreate { source: kube::Error },

        #[snafu(display("Unable to create drain reconciler: '{}'", source))]
        Reconciler { source: reconcile_error::Error },

        #[snafu(display("The DrainRequest controller exited unexpectedly"))]
        ControllerExited,
    }
}
