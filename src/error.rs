//! Error types for scenario-harness operations.
//!
//! Defines the error types for the subsystems that do not own one locally:
//! - Scenario loading and validation
//! - Session analysis
//! - Post-deployment verification
//! - The run / improve pipeline
//!
//! The runner (`runner::RunnerError`) and the run store
//! (`storage::DatabaseError`) keep their errors next to their code.

use std::path::PathBuf;

use thiserror::Error;

/// Errors that can occur while loading or validating a scenario definition.
#[derive(Debug, Error)]
pub enum ScenarioError {
    #[error("Failed to read scenario file '{path}': {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse scenario file '{path}': {message}")]
    Parse { path: String, message: String },

    #[error("Missing required field '{field}' in scenario '{scenario}'")]
    MissingField { scenario: String, field: String },

    #[error("Invalid duration '{0}': expected forms like '90s', '15m' or '1h30m'")]
    InvalidDuration(String),

    #[error("Invalid regex pattern '{pattern}' for regression '{rule}': {message}")]
    InvalidPattern {
        rule: String,
        pattern: String,
        message: String,
    },

    #[error("Duplicate {kind} name '{name}' in scenario '{scenario}'")]
    DuplicateName {
        scenario: String,
        kind: &'static str,
        name: String,
    },

    #[error("Verification step '{step}' ({action}) is missing '{param}'")]
    MissingStepParameter {
        step: String,
        action: String,
        param: &'static str,
    },

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("YAML parsing error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors that can occur while analyzing a session.
#[derive(Debug, Error)]
pub enum AnalyzerError {
    #[error("Event log not found: {0}")]
    EventLogMissing(PathBuf),

    #[error("Failed to open event log '{path}': {source}")]
    EventLogUnreadable {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid classification pattern '{pattern}': {message}")]
    InvalidPattern { pattern: String, message: String },

    #[error("Regression pattern error: {0}")]
    Regex(#[from] regex::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors raised by the verifier itself (not by individual steps).
#[derive(Debug, Error)]
pub enum VerifierError {
    #[error("No endpoint could be resolved for verification")]
    EndpointUnavailable,

    #[error("WebDriver request failed: {0}")]
    WebDriver(String),

    #[error("WebDriver session could not be created: {0}")]
    SessionCreation(String),

    #[error("Element not found for selector '{0}'")]
    ElementNotFound(String),

    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Screenshot decoding failed: {0}")]
    Screenshot(#[from] base64::DecodeError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors from the run / improve pipeline.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("Runner error: {0}")]
    Runner(#[from] crate::runner::RunnerError),

    #[error("Analyzer error: {0}")]
    Analyzer(#[from] AnalyzerError),

    #[error("Storage error: {0}")]
    Storage(#[from] crate::storage::DatabaseError),

    #[error("Verifier error: {0}")]
    Verifier(#[from] VerifierError),

    #[error("Failed to render remediation instruction: {0}")]
    Remediation(#[from] tera::Error),

    #[error("Rebuild command '{command}' failed: {message}")]
    RebuildFailed { command: String, message: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
