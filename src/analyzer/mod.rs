//! Session analysis and scoring.
//!
//! Reads a finished session's event log once, derives behavioral metrics,
//! counts regression signatures in the console transcript and scores the
//! result against the scenario's limits.
//!
//! # Example
//!
//! ```ignore
//! use scenario_harness::analyzer::{Analyzer, AnalysisInput};
//!
//! let analyzer = Analyzer::new(AnalyzerConfig::default())?;
//! let analysis = analyzer.analyze(&scenario, &AnalysisInput::from(&execution))?;
//! println!("{}", analysis.run.summary());
//! ```

pub mod events;
pub mod metrics;
pub mod run;
pub mod scoring;

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::{DateTime, Utc};
use tracing::{debug, info};

use crate::error::AnalyzerError;
use crate::runner::session::event_log_path;
use crate::runner::ScenarioExecution;
use crate::scenario::Scenario;

pub use events::{read_events, AgentEvent, EventKind, ReadStats};
pub use metrics::{count_regressions, AnalyzerConfig, Classifier, MetricsExtractor, SessionMetrics};
pub use run::{RegressionResult, Run, StepOutcome};
pub use scoring::{score, Contribution, ContributionKind, Scorecard};

/// Where to find a session's artifacts.
#[derive(Debug, Clone)]
pub struct AnalysisInput {
    /// Session directory name, used when the log announces no session id.
    pub session_id: String,
    /// Structured event log.
    pub event_log: PathBuf,
    /// Console transcript, if one was recorded.
    pub transcript: Option<PathBuf>,
    /// Start of the execution; the first event timestamp when unknown.
    pub started_at: Option<DateTime<Utc>>,
    /// Runner wall-clock time, used when the log has no timestamps.
    pub elapsed: Option<Duration>,
    /// Source revision tag.
    pub revision: Option<String>,
}

impl AnalysisInput {
    /// Input for an existing session directory, without a transcript.
    pub fn from_session_dir(session_dir: &Path) -> Self {
        Self {
            session_id: session_dir
                .file_name()
                .map(|n| n.to_string_lossy().to_string())
                .unwrap_or_default(),
            event_log: event_log_path(session_dir),
            transcript: None,
            started_at: None,
            elapsed: None,
            revision: None,
        }
    }

    /// Adds a console transcript.
    pub fn with_transcript(mut self, path: impl Into<PathBuf>) -> Self {
        self.transcript = Some(path.into());
        self
    }

    /// Sets the revision tag.
    pub fn with_revision(mut self, revision: Option<String>) -> Self {
        self.revision = revision;
        self
    }
}

impl From<&ScenarioExecution> for AnalysisInput {
    fn from(execution: &ScenarioExecution) -> Self {
        Self {
            session_id: execution.session_dir_name.clone(),
            event_log: event_log_path(&execution.session_dir),
            transcript: Some(execution.transcript.clone()),
            started_at: Some(execution.started_at),
            elapsed: Some(execution.elapsed),
            revision: None,
        }
    }
}

/// Result of analyzing one session.
#[derive(Debug, Clone)]
pub struct Analysis {
    /// The record to persist.
    pub run: Run,
    /// Per-contribution score breakdown.
    pub scorecard: Scorecard,
    /// Raw session metrics (endpoint candidates, assistant text, ...).
    pub metrics: SessionMetrics,
}

/// Turns sessions into scored [`Run`]s.
#[derive(Debug, Clone)]
pub struct Analyzer {
    classifier: Classifier,
}

impl Analyzer {
    pub fn new(config: AnalyzerConfig) -> Result<Self, AnalyzerError> {
        Ok(Self {
            classifier: Classifier::new(config)?,
        })
    }

    /// Extracts metrics from an event log in a single streaming pass.
    pub fn extract_metrics(&self, event_log: &Path) -> Result<SessionMetrics, AnalyzerError> {
        let mut extractor = MetricsExtractor::new(&self.classifier);
        let stats = read_events(event_log, |event| extractor.observe(&event))?;

        let mut metrics = extractor.finish();
        metrics.events = stats.events;
        metrics.skipped_lines = stats.skipped;
        if stats.skipped > 0 {
            debug!(
                log = %event_log.display(),
                skipped = stats.skipped,
                "Skipped malformed event log lines"
            );
        }
        Ok(metrics)
    }

    /// Analyzes a session against `scenario` and builds its [`Run`].
    pub fn analyze(
        &self,
        scenario: &Scenario,
        input: &AnalysisInput,
    ) -> Result<Analysis, AnalyzerError> {
        let metrics = self.extract_metrics(&input.event_log)?;

        let transcript = match &input.transcript {
            Some(path) => read_transcript(path)?,
            None => String::new(),
        };
        let text = if transcript.trim().is_empty() {
            metrics.assistant_text.as_str()
        } else {
            transcript.as_str()
        };
        let regressions = count_regressions(scenario.regressions(), text)?;

        let duration_secs = metrics
            .duration()
            .or(input.elapsed)
            .map(|d| d.as_secs_f64())
            .unwrap_or(0.0);

        let scorecard = score(&scenario.scoring, &metrics, duration_secs, &regressions);

        let skills = scenario
            .scoring
            .must_invoke_skills
            .iter()
            .map(|s| (s.clone(), metrics.skills_invoked.contains(s)))
            .collect();

        let run = Run {
            id: None,
            scenario: scenario.name.clone(),
            session_id: metrics
                .session_id
                .clone()
                .unwrap_or_else(|| input.session_id.clone()),
            revision: input.revision.clone(),
            started_at: input
                .started_at
                .or(metrics.first_event_at)
                .unwrap_or_else(Utc::now),
            duration_secs,
            turns: metrics.turns,
            deploy_calls: metrics.deploy_calls,
            infra_edits: metrics.infra_edits,
            delegated: metrics.delegated,
            deployed: metrics.deployed,
            score: scorecard.composite(),
            passed: scorecard.passed(),
            skills,
            regressions,
            verification: Default::default(),
        };

        info!(
            scenario = %run.scenario,
            session_id = %run.session_id,
            score = run.score,
            passed = run.passed,
            turns = run.turns,
            "Analyzed session"
        );

        Ok(Analysis {
            run,
            scorecard,
            metrics,
        })
    }
}

fn read_transcript(path: &Path) -> Result<String, AnalyzerError> {
    match fs::read(path) {
        Ok(bytes) => Ok(String::from_utf8_lossy(&bytes).into_owned()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(String::new()),
        Err(e) => Err(e.into()),
    }
}
