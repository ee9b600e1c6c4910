//! Reads the controller's settings from its environment.
use crate::reconciler::ReconcilerSettings;
use models::node::{DrainProfile, DrainSettings, EvictionMode};

use snafu::{OptionExt, ResultExt};
use std::env;
use tokio::time::Duration;

const NAMESPACE_ENV_VAR: &str = "MY_NAMESPACE";
const CONTROLLER_NAME_ENV_VAR: &str = "CONTROLLER_NAME";
const DRAIN_POLL_WAIT_ENV_VAR: &str = "DRAIN_POLL_WAIT_SECONDS";
const RESYNC_INTERVAL_ENV_VAR: &str = "RESYNC_INTERVAL_SECONDS";
const WORKER_DRAIN_TIMEOUT_ENV_VAR: &str = "WORKER_DRAIN_TIMEOUT_SECONDS";
const CONTROL_PLANE_DRAIN_TIMEOUT_ENV_VAR: &str = "CONTROL_PLANE_DRAIN_TIMEOUT_SECONDS";
const CONTROL_PLANE_GRACE_PERIOD_ENV_VAR: &str = "CONTROL_PLANE_GRACE_PERIOD_SECONDS";
const EVICTION_RETRY_INTERVAL_ENV_VAR: &str = "EVICTION_RETRY_INTERVAL_SECONDS";
const MAX_CONCURRENT_EVICTIONS_ENV_VAR: &str = "MAX_CONCURRENT_EVICTIONS";
const EVICTION_MODE_ENV_VAR: &str = "EVICTION_MODE";
const MAX_REQUEST_AGE_ENV_VAR: &str = "MAX_REQUEST_AGE_SECONDS";
const CLUSTER_ACCESS_TIMEOUT_ENV_VAR: &str = "CLUSTER_ACCESS_TIMEOUT_SECONDS";

const DEFAULT_CONTROLLER_NAME: &str = "drainer-controller";
const DEFAULT_RESYNC_INTERVAL: Duration = Duration::from_secs(60);
const DEFAULT_CLUSTER_ACCESS_TIMEOUT: Duration = Duration::from_secs(10);

type Result<T> = std::result::Result<T, config_error::Error>;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ControllerConfig {
    /// Namespace holding the `DrainRequest`s and the workload cluster credentials.
    pub namespace: String,
    /// Reported as the source of emitted Kubernetes Events.
    pub controller_name: String,
    /// Requeue delay after an error or an unreachable workload cluster.
    pub resync_interval: Duration,
    pub cluster_access_timeout: Duration,
    pub reconciler: ReconcilerSettings,
}

impl ControllerConfig {
    pub fn from_environment() -> Result<Self> {
        Self::from_lookup(|name| env::var(name).ok())
    }

    fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let namespace = lookup(NAMESPACE_ENV_VAR).context(config_error::MissingVariableSnafu {
            variable: NAMESPACE_ENV_VAR,
        })?;
        let defaults = ReconcilerSettings::default();
        let drain_defaults = defaults.drain;

        let eviction_mode = match lookup(EVICTION_MODE_ENV_VAR) {
            Some(value) => serde_plain::from_str::<EvictionMode>(&value).context(
                config_error::InvalidEvictionModeSnafu {
                    value: value.clone(),
                },
            )?,
            None => drain_defaults.eviction_mode,
        };

        let drain = DrainSettings {
            worker: DrainProfile {
                grace_period: drain_defaults.worker.grace_period,
                timeout: seconds_or(&lookup, WORKER_DRAIN_TIMEOUT_ENV_VAR, drain_defaults.worker.timeout)?,
            },
            control_plane: DrainProfile {
                grace_period: Some(seconds_or(
                    &lookup,
                    CONTROL_PLANE_GRACE_PERIOD_ENV_VAR,
                    drain_defaults
                        .control_plane
                        .grace_period
                        .unwrap_or_default(),
                )?),
                timeout: seconds_or(
                    &lookup,
                    CONTROL_PLANE_DRAIN_TIMEOUT_ENV_VAR,
                    drain_defaults.control_plane.timeout,
                )?,
            },
            eviction_mode,
            eviction_retry_interval: seconds_or(
                &lookup,
                EVICTION_RETRY_INTERVAL_ENV_VAR,
                drain_defaults.eviction_retry_interval,
            )?,
            concurrent_evictions: match lookup(MAX_CONCURRENT_EVICTIONS_ENV_VAR) {
                Some(value) => value.trim().parse().context(config_error::InvalidNumberSnafu {
                    variable: MAX_CONCURRENT_EVICTIONS_ENV_VAR,
                    value: value.clone(),
                })?,
                None => drain_defaults.concurrent_evictions,
            },
            ..drain_defaults
        };

        let max_request_age = match lookup(MAX_REQUEST_AGE_ENV_VAR) {
            Some(value) => Some(parse_seconds(MAX_REQUEST_AGE_ENV_VAR, &value)?),
            None => defaults.max_request_age,
        };

        Ok(ControllerConfig {
            namespace,
            controller_name: lookup(CONTROLLER_NAME_ENV_VAR)
                .unwrap_or_else(|| DEFAULT_CONTROLLER_NAME.to_string()),
            resync_interval: seconds_or(&lookup, RESYNC_INTERVAL_ENV_VAR, DEFAULT_RESYNC_INTERVAL)?,
            cluster_access_timeout: seconds_or(
                &lookup,
                CLUSTER_ACCESS_TIMEOUT_ENV_VAR,
                DEFAULT_CLUSTER_ACCESS_TIMEOUT,
            )?,
            reconciler: ReconcilerSettings {
                poll_wait: seconds_or(&lookup, DRAIN_POLL_WAIT_ENV_VAR, defaults.poll_wait)?,
                max_request_age,
                drain,
            },
        })
    }
}

fn seconds_or<F>(lookup: &F, variable: &'static str, default: Duration) -> Result<Duration>
where
    F: Fn(&str) -> Option<String>,
{
    lookup(variable)
        .map(|value| parse_seconds(variable, &value))
        .unwrap_or(Ok(default))
}

fn parse_seconds(variable: &'static str, value: &str) -> Result<Duration> {
    value
        .trim()
        .parse::<u64>()
        .map(Duration::from_secs)
        .context(config_error::InvalidNumberSnafu { variable, value })
}

pub mod config_error {
    use snafu::Snafu;
    use std::num::ParseIntError;

    #[derive(Debug, Snafu)]
    #[snafu(visibility(pub))]
    pub enum Error {
        #[snafu(display("Required environment variable '{}' is not set", variable))]
        MissingVariable { variable: String },

        #[snafu(display(
            "Environment variable '{}' must be a whole number, got '{}': {}",
            variable,
            value,
            source
        ))]
        InvalidNumber {
            variable: String,
            value: String,
            source: ParseIntError,
        },

        #[snafu(display(
            "EVICTION_MODE must be one of 'evict' or 'delete', got '{}': {}",
            value,
            source
        ))]
        InvalidEvictionMode {
            value: String,
            source: serde_plain::Error,
        },
    }
}
