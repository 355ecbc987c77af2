//! Scenario executor - runs every prompt of a scenario in one working directory.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::time::Instant;
use tracing::{debug, error, info, warn};
use walkdir::WalkDir;

use super::config::RunnerConfig;
use super::session::{latest_session_dir, EventLogTailer};
use super::supervisor::{deadline_after, supervise, Termination};
use crate::metrics::MetricsCollector;
use crate::scenario::{Scenario, SuccessCriteria};

/// Name of the agent's working directory inside an execution root.
pub const WORKSPACE_DIR: &str = "workspace";
/// Name of the console transcript inside an execution root.
pub const TRANSCRIPT_FILE: &str = "console.log";

/// What happened to a single prompt.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PromptOutcome {
    /// Zero-based prompt index.
    pub index: usize,
    /// Whether the resume flag was passed.
    pub resumed: bool,
    /// How the process ended.
    pub termination: Termination,
    /// Wall-clock time spent on the prompt.
    pub elapsed: Duration,
    /// Expected files that were not found afterwards.
    pub missing_files: Vec<String>,
}

impl PromptOutcome {
    /// True if the prompt ended cleanly and every expected file exists.
    pub fn succeeded(&self) -> bool {
        self.termination.is_clean() && self.missing_files.is_empty()
    }
}

/// Everything the runner produced for one scenario execution.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScenarioExecution {
    /// Scenario name.
    pub scenario: String,
    /// Name of the session directory. The analyzed run takes its session id
    /// from the event log and falls back to this name.
    pub session_dir_name: String,
    /// Session directory holding the event log.
    pub session_dir: PathBuf,
    /// Execution root (kept after the run for inspection).
    pub root: PathBuf,
    /// Agent working directory.
    pub workspace: PathBuf,
    /// Console transcript of all prompts.
    pub transcript: PathBuf,
    /// Per-prompt outcomes, in order.
    pub prompts: Vec<PromptOutcome>,
    /// Prompts never started because the scenario deadline passed.
    pub skipped_prompts: usize,
    /// Start of the first prompt.
    pub started_at: DateTime<Utc>,
    /// Total wall-clock time.
    pub elapsed: Duration,
}

impl ScenarioExecution {
    /// Whether the scenario-level timeout cut the sequence short.
    pub fn timed_out(&self) -> bool {
        self.skipped_prompts > 0
            || self
                .prompts
                .iter()
                .any(|p| p.termination == Termination::ScenarioTimeout)
    }
}

/// Runs scenarios against the agent process.
pub struct ScenarioRunner {
    config: RunnerConfig,
    metrics: MetricsCollector,
}

impl ScenarioRunner {
    /// Creates a new runner with the given configuration.
    pub fn new(config: RunnerConfig) -> Self {
        Self {
            config,
            metrics: MetricsCollector::new(),
        }
    }

    /// Returns the runner configuration.
    pub fn config(&self) -> &RunnerConfig {
        &self.config
    }

    /// Executes every prompt of `scenario` in a fresh working directory.
    pub async fn run(&self, scenario: &Scenario) -> Result<ScenarioExecution, RunnerError> {
        self.run_with_preamble(scenario, None).await
    }

    /// Like [`run`](Self::run), with `preamble` prepended to the first prompt.
    pub async fn run_with_preamble(
        &self,
        scenario: &Scenario,
        preamble: Option<&str>,
    ) -> Result<ScenarioExecution, RunnerError> {
        let root = self.create_execution_root(&scenario.name)?;
        let workspace = root.join(WORKSPACE_DIR);
        let transcript = root.join(TRANSCRIPT_FILE);
        fs::create_dir_all(&workspace).map_err(|source| RunnerError::WorkDir {
            path: workspace.clone(),
            source,
        })?;

        info!(
            scenario = %scenario.name,
            prompts = scenario.prompts.len(),
            root = %root.display(),
            "Starting scenario"
        );

        let started_at = Utc::now();
        let start = Instant::now();
        let deadline = deadline_after(start, scenario.timeout);
        let mut outcomes = Vec::with_capacity(scenario.prompts.len());
        let mut skipped = 0;

        for step in scenario.prompt_steps() {
            if Instant::now() >= deadline {
                skipped = scenario.prompts.len() - step.index;
                warn!(
                    scenario = %scenario.name,
                    skipped,
                    "Scenario timeout reached, aborting remaining prompts"
                );
                break;
            }

            let text = match (step.index, preamble) {
                (0, Some(pre)) if !pre.trim().is_empty() => {
                    format!("{}\n\n{}", pre.trim(), step.prompt.text)
                }
                _ => step.prompt.text.clone(),
            };

            info!(
                scenario = %scenario.name,
                prompt = step.index + 1,
                resumed = step.is_resumption,
                "Sending prompt"
            );

            let tailer = EventLogTailer::new(&self.config.session_root);
            let prompt_start = Instant::now();
            let child = self
                .config
                .agent
                .command(&text, step.is_resumption, &workspace)
                .spawn()
                .map_err(|e| {
                    RunnerError::Spawn(format!("failed to start '{}': {}", self.config.agent, e))
                })?;

            let termination =
                supervise(child, tailer, &self.config, &transcript, deadline).await?;
            let elapsed = prompt_start.elapsed();
            self.metrics.record_prompt(&termination, elapsed);

            let missing_files = step
                .prompt
                .success_criteria
                .as_ref()
                .map(|c| missing_files(&workspace, c))
                .unwrap_or_default();

            if termination.is_clean() {
                info!(prompt = step.index + 1, reason = %termination, ?elapsed, "Prompt finished");
            } else {
                warn!(
                    prompt = step.index + 1,
                    reason = %termination,
                    ?elapsed,
                    "Prompt did not complete cleanly, continuing"
                );
            }
            for file in &missing_files {
                warn!(prompt = step.index + 1, file = %file, "Expected file not found");
            }

            let scenario_timed_out = termination == Termination::ScenarioTimeout;
            outcomes.push(PromptOutcome {
                index: step.index,
                resumed: step.is_resumption,
                termination,
                elapsed,
                missing_files,
            });

            if scenario_timed_out {
                skipped = scenario.prompts.len() - step.index - 1;
                warn!(scenario = %scenario.name, skipped, "Scenario timeout reached during prompt");
                break;
            }
        }

        let session_dir = latest_session_dir(&self.config.session_root).ok_or_else(|| {
            error!(
                root = %self.config.session_root.display(),
                "No session directory found after running scenario"
            );
            RunnerError::SessionNotFound(self.config.session_root.clone())
        })?;
        let session_dir_name = session_dir
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default();

        let elapsed = start.elapsed();
        info!(
            scenario = %scenario.name,
            session = %session_dir_name,
            ?elapsed,
            "Scenario finished"
        );

        Ok(ScenarioExecution {
            scenario: scenario.name.clone(),
            session_dir_name,
            session_dir,
            root,
            workspace,
            transcript,
            prompts: outcomes,
            skipped_prompts: skipped,
            started_at,
            elapsed,
        })
    }

    /// Creates `<work_root>/<scenario>-XXXXXX`, kept after the run.
    fn create_execution_root(&self, scenario: &str) -> Result<PathBuf, RunnerError> {
        let work_root = &self.config.work_root;
        fs::create_dir_all(work_root).map_err(|source| RunnerError::WorkDir {
            path: work_root.clone(),
            source,
        })?;

        let dir = tempfile::Builder::new()
            .prefix(&format!("{}-", sanitize(scenario)))
            .tempdir_in(work_root)
            .map_err(|source| RunnerError::WorkDir {
                path: work_root.clone(),
                source,
            })?;
        let root = dir.keep();
        debug!("Created execution root {}", root.display());
        Ok(root)
    }
}

/// Replaces characters that are awkward in directory names.
fn sanitize(name: &str) -> String {
    name.chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '-' })
        .collect()
}

/// Returns the expected files not present in `workspace`.
///
/// A file counts as present at its exact relative path, or, failing that,
/// anywhere in the tree under the same file name.
pub fn missing_files(workspace: &Path, criteria: &SuccessCriteria) -> Vec<String> {
    criteria
        .files_exist
        .iter()
        .filter(|expected| !file_present(workspace, expected))
        .cloned()
        .collect()
}

fn file_present(workspace: &Path, expected: &str) -> bool {
    if workspace.join(expected).exists() {
        return true;
    }

    let Some(name) = Path::new(expected).file_name() else {
        return false;
    };

    WalkDir::new(workspace)
        .into_iter()
        .filter_map(Result::ok)
        .any(|entry| entry.file_type().is_file() && entry.file_name() == name)
}

/// Error types for the runner.
///
/// Only environment failures are errors; a prompt that exits badly, loops or
/// times out is reported through [`Termination`].
#[derive(Debug, thiserror::Error)]
pub enum RunnerError {
    #[error("Failed to prepare working directory {path}: {source}")]
    WorkDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to start agent process: {0}")]
    Spawn(String),

    #[error("Failed to open transcript {path}: {source}")]
    Transcript {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("No session directory found under {0}")]
    SessionNotFound(PathBuf),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runner::AgentCommand;
    use tempfile::TempDir;

    #[test]
    fn test_sanitize() {
        assert_eq!(sanitize("web app/v2"), "web-app-v2");
        assert_eq!(sanitize("ok_name-1"), "ok_name-1");
    }

    #[test]
    fn test_missing_files() {
        let temp = TempDir::new().unwrap();
        fs::create_dir_all(temp.path().join("src/app")).unwrap();
        fs::write(temp.path().join("package.json"), "{}").unwrap();
        fs::write(temp.path().join("src/app/main.bicep"), "").unwrap();

        let criteria = SuccessCriteria {
            files_exist: vec![
                "package.json".to_string(),
                "infra/main.bicep".to_string(),
                "README.md".to_string(),
            ],
            ..Default::default()
        };

        assert_eq!(missing_files(temp.path(), &criteria), vec!["README.md"]);
    }

    #[test]
    fn test_create_execution_root() {
        let temp = TempDir::new().unwrap();
        let config = RunnerConfig::new(AgentCommand::new("agent")).with_work_root(temp.path());
        let runner = ScenarioRunner::new(config);

        let root = runner.create_execution_root("my scenario").unwrap();
        assert!(root.is_dir());
        assert!(root.starts_with(temp.path()));
        assert!(root
            .file_name()
            .unwrap()
            .to_string_lossy()
            .starts_with("my-scenario-"));
    }

    #[test]
    fn test_prompt_outcome_succeeded() {
        let outcome = PromptOutcome {
            index: 0,
            resumed: false,
            termination: Termination::TaskComplete,
            elapsed: Duration::from_secs(1),
            missing_files: vec!["a.txt".to_string()],
        };
        assert!(!outcome.succeeded());
    }
}
