//! Kubernetes events for drain progress.
//!
//! Events are diagnostics. Publishing is best-effort and never fails the caller.
use async_trait::async_trait;
use k8s_openapi::api::core::v1::ObjectReference;
use kube::runtime::events::{Event, EventType, Recorder, Reporter};
use tracing::{event, Level};

#[cfg(any(feature = "mockall", test))]
use mockall::{mock, predicate::*};

// The API server rejects event notes above 1KB.
const MAX_NOTE_LENGTH: usize = 1024;
const TRUNCATION_MARKER: &str = "...";

#[async_trait]
pub trait EventRecorder: Send + Sync {
    async fn info(&self, target: &ObjectReference, reason: &str, message: &str);
    async fn warn(&self, target: &ObjectReference, reason: &str, message: &str);
}

#[cfg(any(feature = "mockall", test))]
mock! {
    /// A Mock EventRecorder for use in tests.
    pub EventRecorder {}
    #[async_trait]
    impl EventRecorder for EventRecorder {
        async fn info(&self, target: &ObjectReference, reason: &str, message: &str);
        async fn warn(&self, target: &ObjectReference, reason: &str, message: &str);
    }
}

/// Publishes Kubernetes `Event`s against the target object.
#[derive(Clone)]
pub struct KubeEventRecorder {
    k8s_client: kube::Client,
    reporter: Reporter,
}

impl KubeEventRecorder {
    pub fn new(k8s_client: kube::Client, controller_name: &str) -> Self {
        KubeEventRecorder {
            k8s_client,
            reporter: Reporter {
                controller: controller_name.to_string(),
                instance: std::env::var("HOSTNAME").ok(),
            },
        }
    }

    fn publish(&self, target: &ObjectReference, type_: EventType, reason: &str, message: &str) {
        let recorder = Recorder::new(
            self.k8s_client.clone(),
            self.reporter.clone(),
            target.clone(),
        );
        let event = Event {
            type_,
            reason: reason.to_string(),
            note: Some(event_note(message)),
            action: reason.to_string(),
            secondary: None,
        };
        let target_name = target.name.clone().unwrap_or_default();

        // Publishing happens off the caller's path.
        tokio::spawn(async move {
            if let Err(err) = recorder.publish(event).await {
                event!(
                    Level::DEBUG,
                    target = %target_name,
                    error = %err,
                    "Failed to publish Kubernetes event."
                );
            }
        });
    }
}

#[async_trait]
impl EventRecorder for KubeEventRecorder {
    async fn info(&self, target: &ObjectReference, reason: &str, message: &str) {
        event!(Level::INFO, reason, message);
        self.publish(target, EventType::Normal, reason, message);
    }

    async fn warn(&self, target: &ObjectReference, reason: &str, message: &str) {
        event!(Level::WARN, reason, message);
        self.publish(target, EventType::Warning, reason, message);
    }
}

/// Discards events. Useful when no event sink is configured.
#[derive(Clone, Copy, Debug, Default)]
pub struct NoopRecorder;

#[async_trait]
impl EventRecorder for NoopRecorder {
    async fn info(&self, _target: &ObjectReference, _reason: &str, _message: &str) {}
    async fn warn(&self, _target: &ObjectReference, _reason: &str, _message: &str) {}
}

/// Capitalizes the message and trims it to the size the API server accepts.
fn event_note(message: &str) -> String {
    let mut chars = message.chars();
    let note = match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect::<String>(),
        None => String::new(),
    };

    if note.len() <= MAX_NOTE_LENGTH {
        return note;
    }
    let mut boundary = MAX_NOTE_LENGTH - TRUNCATION_MARKER.len();
    while !note.is_char_boundary(boundary) {
        boundary -= 1;
    }
    format!("{}{}", &note[..boundary], TRUNCATION_MARKER)
}
