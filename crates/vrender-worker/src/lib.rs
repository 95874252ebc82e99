//! Render router worker.
//!
//! This crate provides:
//! - Environment configuration for HTTP render backends
//! - A JSON-lines runner feeding requests through the orchestrator

pub mod config;
pub mod error;
pub mod runner;

pub use config::WorkerConfig;
pub use error::{WorkerError, WorkerResult};
pub use runner::{build_orchestrator, RequestRunner, RunSummary};
