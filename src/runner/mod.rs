//! Process supervisor for the agent under test.
//!
//! Runs the prompts of a scenario one after another against the agent
//! executable, inside a fresh working directory per execution.
//!
//! # Architecture
//!
//! ```text
//! Scenario → ScenarioRunner ─┬─ spawn agent (prompt, --continue after the first)
//!                            ├─ OutputRelay      console → transcript, stuck-loop detection
//!                            ├─ idle_watchdog    no output for the idle period
//!                            ├─ watch_event_log  task-complete marker in events.jsonl
//!                            └─ per-prompt / scenario deadlines
//!                          first signal wins → kill → join monitors → next prompt
//! ```
//!
//! After the last prompt the most recently modified session directory is
//! taken as the session to analyze.
//!
//! # Example
//!
//! ```ignore
//! use scenario_harness::runner::{AgentCommand, RunnerConfig, ScenarioRunner};
//!
//! let config = RunnerConfig::new(AgentCommand::new("agent"))
//!     .with_idle_timeout(Duration::from_secs(120));
//! let execution = ScenarioRunner::new(config).run(&scenario).await?;
//! println!("session {}", execution.session_dir.display());
//! ```

pub mod agent;
pub mod config;
pub mod executor;
pub mod monitor;
pub mod session;
pub mod supervisor;

pub use agent::AgentCommand;
pub use config::{default_session_root, RunnerConfig};
pub use executor::{missing_files, PromptOutcome, RunnerError, ScenarioExecution, ScenarioRunner};
pub use monitor::StuckDetector;
pub use session::{latest_session_dir, EventLogTailer, EVENT_LOG_FILE, TASK_COMPLETE_EVENT};
pub use supervisor::Termination;
