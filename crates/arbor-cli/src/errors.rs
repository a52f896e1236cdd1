//! Error types for the CLI runtime.

use std::io;
use std::sync::Arc;

use arbor_config::ConfigValidationError;
use arbor_core::{HttpError, LaunchError, TelemetryError};
use thiserror::Error;

#[derive(Debug, Error)]
pub(crate) enum CliError {
    #[error("failed to load configuration: {0}")]
    LoadConfiguration(Arc<ortho_config::OrthoError>),
    #[error("invalid configuration: {0}")]
    InvalidConfiguration(#[from] ConfigValidationError),
    #[error("{0}")]
    CliUsage(clap::Error),
    #[error("failed to initialise telemetry: {0}")]
    Telemetry(#[from] TelemetryError),
    #[error("invalid launch parameters: {0}")]
    Launch(#[from] LaunchError),
    #[error("failed to build HTTP transport: {0}")]
    Http(#[from] HttpError),
    #[error("failed to start the async runtime: {0}")]
    Runtime(io::Error),
    #[error("failed to read input: {0}")]
    ReadInput(io::Error),
    #[error("failed to serialise engine output: {0}")]
    SerialiseOutput(serde_json::Error),
    #[error("failed to write engine output: {0}")]
    WriteOutput(io::Error),
}
