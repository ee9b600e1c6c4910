pub mod cluster_access;
pub mod config;
mod controller;
pub mod error;
pub mod reconciler;
pub mod statemachine;
pub mod tracker;

pub use crate::controller::DrainRequestController;
