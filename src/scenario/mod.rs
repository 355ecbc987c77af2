//! Scenario model.
//!
//! A scenario is a declarative file describing the prompts to replay against
//! the agent process, the limits its session is scored against, the failure
//! signatures to watch for, and the checks to run against the deployed result.
//!
//! # Example
//!
//! ```ignore
//! use scenario_harness::scenario::Scenario;
//!
//! let scenario = Scenario::load(Path::new("scenarios/web-app.yaml"))?;
//! for step in scenario.prompt_steps() {
//!     println!("{} (resume: {})", step.prompt.text, step.is_resumption);
//! }
//! ```

pub mod loader;
pub mod types;

pub use loader::{discover_scenarios, format_duration, parse_duration};
pub use types::{
    Prompt, PromptStep, RegressionRule, Scenario, ScoringConfig, SuccessCriteria,
    VerificationAction, VerificationStep, DEFAULT_SCENARIO_TIMEOUT, ENDPOINT_PLACEHOLDER,
};
