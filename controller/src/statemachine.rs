use models::drain_request::DrainRequest;

use tracing::instrument;

/// Where a `DrainRequest` stands, as far as this process can tell.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum DrainState<H> {
    /// The request records a successful drain. Nothing left to do.
    Drained,
    /// The request records a timed-out drain. Nothing left to do.
    TimedOut,
    /// No outcome is recorded and no drain is tracked for the node.
    NotStarted,
    /// A drain is tracked for the node, through the contained handle.
    InProgress(H),
}

/// Derives the state of a request from its persisted conditions and the tracked drain, if any.
///
/// Recorded outcomes take precedence over tracker state, so a terminal request never drains again.
#[instrument(skip(request, tracked), fields(request = %request.metadata.name.as_deref().unwrap_or_default()))]
pub fn determine_drain_state<H>(request: &DrainRequest, tracked: Option<H>) -> DrainState<H> {
    if request.has_drained_condition() {
        DrainState::Drained
    } else if request.has_timeout_condition() {
        DrainState::TimedOut
    } else {
        match tracked {
            Some(handle) => DrainState::InProgress(handle),
            None => DrainState::NotStarted,
        }
    }
}
