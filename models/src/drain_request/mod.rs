//! The `DrainRequest` custom resource.
//!
//! A `DrainRequest` names a node in a workload cluster which is about to be removed. The controller cordons and
//! drains that node, then records the outcome as a terminal condition in the request's status.
mod client;
mod error;

pub use self::client::*;
pub use self::error::Error as DrainRequestError;
use self::error::Result;

use chrono::{DateTime, Utc};
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use snafu::ResultExt;
use std::fmt;
use std::time::Duration;

pub const K8S_DRAIN_REQUEST_KIND: &str = "DrainRequest";

const CONDITION_STATUS_TRUE: &str = "True";

/// The outcomes a drain can be recorded with. Both are terminal.
#[derive(Copy, Clone, Serialize, Deserialize, Debug, Eq, PartialEq, Hash, JsonSchema)]
pub enum DrainConditionType {
    /// The node was cordoned and every evictable pod left it, or the node no longer exists.
    Drained,
    /// The drain did not finish in the time allotted. The node may still host pods.
    Timeout,
}

impl fmt::Display for DrainConditionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Drained => write!(f, "Drained"),
            Self::Timeout => write!(f, "Timeout"),
        }
    }
}

/// `DrainRequestSpec` identifies the node to drain and the cluster it belongs to.
#[derive(Clone, CustomResource, Serialize, Deserialize, Debug, Default, Eq, PartialEq, JsonSchema)]
#[kube(
    derive = "Default",
    derive = "PartialEq",
    group = "drainer.nodepool.dev",
    kind = "DrainRequest",
    namespaced,
    plural = "drainrequests",
    shortname = "dr",
    singular = "drainrequest",
    status = "DrainRequestStatus",
    version = "v1",
    printcolumn = r#"{"name":"Cluster", "type":"string", "jsonPath":".spec.cluster_id"}"#,
    printcolumn = r#"{"name":"Node", "type":"string", "jsonPath":".spec.node_name"}"#,
    printcolumn = r#"{"name":"Outcome", "type":"string", "jsonPath":".status.conditions[-1:].type"}"#,
    printcolumn = r#"{"name":"Age", "type":"date", "jsonPath":".metadata.creationTimestamp"}"#
)]
pub struct DrainRequestSpec {
    /// Identifies the workload cluster. Also used to locate the cluster's credentials.
    pub cluster_id: String,
    /// API server address of the workload cluster. Overrides the address found in the cluster's credentials.
    pub cluster_endpoint: String,
    /// Name of the node to drain.
    pub node_name: String,
}

/// `DrainRequestStatus` holds the conditions appended by the controller.
#[derive(Clone, Debug, Default, Serialize, Deserialize, Eq, PartialEq, JsonSchema)]
pub struct DrainRequestStatus {
    #[serde(default)]
    pub conditions: Vec<DrainCondition>,
}

#[derive(Clone, Debug, Serialize, Deserialize, Eq, PartialEq, JsonSchema)]
pub struct DrainCondition {
    #[serde(rename = "type")]
    pub type_: DrainConditionType,
    pub status: String,
    /// RFC 3339 timestamp at which the condition was observed.
    last_transition_time: String,
}

impl DrainCondition {
    pub fn new(type_: DrainConditionType, observed_at: DateTime<Utc>) -> Self {
        DrainCondition {
            type_,
            status: CONDITION_STATUS_TRUE.to_string(),
            last_transition_time: observed_at.to_rfc3339(),
        }
    }

    /// JsonSchema cannot appropriately handle DateTime objects. This accessor returns the transition timestamp
    /// as a DateTime.
    pub fn last_transition_time(&self) -> Result<DateTime<Utc>> {
        DateTime::parse_from_rfc3339(&self.last_transition_time)
            // Convert `DateTime<FixedOffset>` into `DateTime<Utc>`
            .map(|ts| ts.into())
            .context(error::TimestampFormatSnafu)
    }

    fn is_set(&self) -> bool {
        self.status == CONDITION_STATUS_TRUE
    }
}

impl DrainRequestStatus {
    /// Returns the terminal condition recorded in this status, if any.
    pub fn terminal_condition(&self) -> Option<DrainConditionType> {
        self.conditions
            .iter()
            .find(|condition| condition.is_set())
            .map(|condition| condition.type_)
    }

    /// Appends a condition unless a terminal condition is already present.
    ///
    /// Returns whether the condition was appended.
    pub fn add_condition(&mut self, type_: DrainConditionType, observed_at: DateTime<Utc>) -> bool {
        if self.terminal_condition().is_some() {
            return false;
        }
        self.conditions.push(DrainCondition::new(type_, observed_at));
        true
    }
}

impl DrainRequest {
    pub fn has_condition(&self, type_: DrainConditionType) -> bool {
        self.status.as_ref().map_or(false, |status| {
            status
                .conditions
                .iter()
                .any(|condition| condition.type_ == type_ && condition.is_set())
        })
    }

    pub fn has_drained_condition(&self) -> bool {
        self.has_condition(DrainConditionType::Drained)
    }

    pub fn has_timeout_condition(&self) -> bool {
        self.has_condition(DrainConditionType::Timeout)
    }

    /// Returns the terminal condition recorded for this request, if any.
    pub fn terminal_condition(&self) -> Option<DrainConditionType> {
        self.status
            .as_ref()
            .and_then(DrainRequestStatus::terminal_condition)
    }

    /// The time at which the API server created this object.
    pub fn creation_time(&self) -> Option<DateTime<Utc>> {
        self.metadata
            .creation_timestamp
            .as_ref()
            .map(|timestamp| timestamp.0)
    }

    /// Returns a copy of this request whose status carries the given condition.
    pub fn with_condition(&self, type_: DrainConditionType, observed_at: DateTime<Utc>) -> Self {
        let mut request = self.clone();
        request
            .status
            .get_or_insert_with(DrainRequestStatus::default)
            .add_condition(type_, observed_at);
        request
    }
}

/// Returns whether a deadline of `timeout` measured from `started` has passed at `now`.
///
/// The deadline itself counts as timed out.
pub fn timed_out(started: DateTime<Utc>, now: DateTime<Utc>, timeout: Duration) -> bool {
    chrono::Duration::from_std(timeout)
        .ok()
        .and_then(|timeout| started.checked_add_signed(timeout))
        .map_or(false, |deadline| deadline <= now)
}

#[cfg(test)]
mod test {
    use super::*;
    use chrono::TimeZone;
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::Time;
    use kube::api::ObjectMeta;

    fn at(seconds: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(1_700_000_000 + seconds, 0).unwrap()
    }

    #[test]
    fn test_timed_out_boundary() {
        let test_cases = vec![
            (at(10), at(19), Duration::from_secs(10), false),
            (at(10), at(20), Duration::from_secs(10), true),
            (at(10), at(21), Duration::from_secs(10), true),
            (at(10), at(10), Duration::from_secs(0), true),
            (at(10), at(0), Duration::from_secs(u64::MAX), false),
        ];

        for (started, now, timeout, expected) in test_cases {
            assert_eq!(timed_out(started, now, timeout), expected);
            // Same inputs, same answer.
            assert_eq!(timed_out(started, now, timeout), expected);
        }
    }

    #[test]
    fn test_terminal_condition_is_sticky() {
        let mut status = DrainRequestStatus::default();
        assert_eq!(status.terminal_condition(), None);

        assert!(status.add_condition(DrainConditionType::Drained, at(0)));
        assert!(!status.add_condition(DrainConditionType::Timeout, at(1)));
        assert!(!status.add_condition(DrainConditionType::Drained, at(2)));

        assert_eq!(status.conditions.len(), 1);
        assert_eq!(
            status.terminal_condition(),
            Some(DrainConditionType::Drained)
        );
        assert_eq!(status.conditions[0].last_transition_time().unwrap(), at(0));
    }

    #[test]
    fn test_with_condition() {
        let request = DrainRequest {
            metadata: ObjectMeta {
                name: Some("worker-1".to_string()),
                creation_timestamp: Some(Time(at(0))),
                ..Default::default()
            },
            spec: DrainRequestSpec {
                cluster_id: "cluster-a".to_string(),
                cluster_endpoint: "https://10.0.0.1:6443".to_string(),
                node_name: "worker-1".to_string(),
            },
            status: None,
        };
        assert!(!request.has_drained_condition());
        assert_eq!(request.creation_time(), Some(at(0)));

        let timed_out = request.with_condition(DrainConditionType::Timeout, at(5));
        assert!(timed_out.has_timeout_condition());
        assert!(!timed_out.has_drained_condition());
        assert_eq!(
            timed_out.terminal_condition(),
            Some(DrainConditionType::Timeout)
        );
    }

    #[test]
    fn test_condition_serialization() {
        let condition = DrainCondition::new(DrainConditionType::Drained, at(0));
        let value = serde_json::to_value(&condition).unwrap();
        assert_eq!(value["type"], "Drained");
        assert_eq!(value["status"], "True");
    }
}
