//! scenario-harness: scenario-driven quality harness for agent CLIs.
//!
//! This library replays scripted multi-turn prompts against an opaque agent
//! process, supervises each prompt for completion, stuck loops and idle time,
//! scores the resulting session against declared limits, optionally verifies
//! the deployed artifact, and persists results for trend analysis.

// Core modules
pub mod analyzer;
pub mod cli;
pub mod config;
pub mod error;
pub mod metrics;
pub mod pipeline;
pub mod runner;
pub mod scenario;
pub mod storage;
pub mod verifier;

// Re-export commonly used types
pub use analyzer::{Analysis, AnalysisInput, Analyzer, Run};
pub use config::{ConfigError, HarnessConfig};
pub use error::{AnalyzerError, PipelineError, ScenarioError, VerifierError};
pub use pipeline::{HarnessPipeline, ImprovementLoop, RunReport};
pub use runner::{ScenarioExecution, ScenarioRunner};
pub use scenario::Scenario;
pub use storage::RunStore;
