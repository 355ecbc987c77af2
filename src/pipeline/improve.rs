//! Bounded run → analyze → remediate loop.

use std::path::PathBuf;

use serde::Serialize;
use tracing::{info, warn};

use super::orchestrator::{HarnessPipeline, RunReport};
use super::remediation::{render_remediation, Remediator};
use crate::error::PipelineError;
use crate::scenario::Scenario;

/// Summary of one loop iteration.
#[derive(Debug, Clone, Serialize)]
pub struct IterationSummary {
    /// 1-based iteration number.
    pub iteration: u32,
    pub run_id: i64,
    pub session_id: String,
    pub score: f64,
    pub passed: bool,
    /// Instruction produced after this iteration, when it failed and another
    /// iteration followed.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub remediation: Option<String>,
    /// Where the instruction was written, if an assets directory is set.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub remediation_file: Option<PathBuf>,
}

/// Result of [`ImprovementLoop::run`].
#[derive(Debug, Clone, Serialize)]
pub struct ImprovementOutcome {
    pub scenario: String,
    pub iterations: Vec<IterationSummary>,
    pub passed: bool,
}

impl ImprovementOutcome {
    /// Score of the final iteration.
    pub fn final_score(&self) -> Option<f64> {
        self.iterations.last().map(|i| i.score)
    }
}

/// Repeats the pipeline until a run passes or the bound is reached.
pub struct ImprovementLoop<'a> {
    pipeline: &'a HarnessPipeline,
    remediator: Remediator,
    max_iterations: u32,
}

impl<'a> ImprovementLoop<'a> {
    /// Creates a loop using the pipeline's configured bound, assets
    /// directory and rebuild command.
    pub fn new(pipeline: &'a HarnessPipeline) -> Self {
        let config = pipeline.config();
        Self {
            remediator: Remediator::new(config.assets_dir.clone(), config.rebuild_command.clone()),
            max_iterations: config.max_iterations.max(1),
            pipeline,
        }
    }

    pub fn with_max_iterations(mut self, iterations: u32) -> Self {
        self.max_iterations = iterations.max(1);
        self
    }

    pub fn with_remediator(mut self, remediator: Remediator) -> Self {
        self.remediator = remediator;
        self
    }

    /// Runs `scenario` up to the iteration bound, stopping at the first pass.
    pub async fn run(&self, scenario: &Scenario) -> Result<ImprovementOutcome, PipelineError> {
        let mut iterations = Vec::new();
        let mut preamble: Option<String> = None;

        for iteration in 1..=self.max_iterations {
            info!(
                scenario = %scenario.name,
                iteration,
                max = self.max_iterations,
                "Starting improvement iteration"
            );

            let report = self
                .pipeline
                .run_once(scenario, preamble.as_deref())
                .await?;
            let mut summary = summarize(iteration, &report);

            if report.passed() {
                info!(scenario = %scenario.name, iteration, score = summary.score, "Scenario passed");
                iterations.push(summary);
                return Ok(ImprovementOutcome {
                    scenario: scenario.name.clone(),
                    iterations,
                    passed: true,
                });
            }

            if iteration < self.max_iterations {
                let text = render_remediation(&scenario.name, &report.analysis, iteration)?;
                summary.remediation_file = self.remediator.apply(&text).await?;
                summary.remediation = Some(text.clone());
                preamble = Some(text);
                warn!(
                    scenario = %scenario.name,
                    iteration,
                    score = summary.score,
                    "Run failed, retrying with remediation"
                );
            }
            iterations.push(summary);
        }

        warn!(
            scenario = %scenario.name,
            iterations = self.max_iterations,
            "Scenario did not pass within the iteration bound"
        );
        Ok(ImprovementOutcome {
            scenario: scenario.name.clone(),
            iterations,
            passed: false,
        })
    }
}

fn summarize(iteration: u32, report: &RunReport) -> IterationSummary {
    IterationSummary {
        iteration,
        run_id: report.run_id,
        session_id: report.run().session_id.clone(),
        score: report.run().score,
        passed: report.passed(),
        remediation: None,
        remediation_file: None,
    }
}
