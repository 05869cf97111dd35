//! Tunekit Server
//!
//! The HTTP control surface over the pipeline's [`JobSupervisor`]:
//! start a run, poll its status, check liveness.
//!
//! [`JobSupervisor`]: tunekit_pipeline::JobSupervisor

pub mod cli;
pub mod routes;
pub mod telemetry;

pub use routes::{AppState, router};
