pub mod constants;
pub mod drain_request;
pub mod node;
pub mod recorder;
pub mod telemetry;
