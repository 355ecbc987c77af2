//! Run and improvement pipelines.
//!
//! # Architecture
//!
//! - **Orchestrator**: one pass of runner → analyzer → verifier → run store
//! - **Improve**: repeats the orchestrator up to a bound, feeding a
//!   remediation instruction back to the agent after each failed pass
//! - **Remediation**: renders that instruction and applies it to the agent's
//!   assets (write file, run rebuild command)
//!
//! # Pipeline Flow
//!
//! 1. **Execution**: prompts are replayed against the agent in a fresh
//!    working directory
//! 2. **Analysis**: the session's event log and transcript are scored
//! 3. **Endpoint discovery**: the deployed URL is resolved when verification
//!    or `endpoint_responds` criteria need it
//! 4. **Verification**: scripted checks run against the endpoint
//! 5. **Storage**: the run and its sub-records are persisted atomically
//!
//! # Example
//!
//! ```rust,ignore
//! use scenario_harness::config::HarnessConfig;
//! use scenario_harness::pipeline::{HarnessPipeline, ImprovementLoop};
//!
//! let pipeline = HarnessPipeline::new(HarnessConfig::from_env()?).await?;
//! let outcome = ImprovementLoop::new(&pipeline).run(&scenario).await?;
//! println!("passed: {} after {} iterations", outcome.passed, outcome.iterations.len());
//! ```

pub mod improve;
pub mod orchestrator;
pub mod remediation;

pub use improve::{ImprovementLoop, ImprovementOutcome, IterationSummary};
pub use orchestrator::{CriterionCheck, HarnessPipeline, RunReport, SCREENSHOT_DIR};
pub use remediation::{render_remediation, Remediator, REMEDIATION_FILE};
