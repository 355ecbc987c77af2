//! Single-pass pipeline: run → analyze → verify → persist.

use tracing::{info, warn};

use crate::analyzer::{Analysis, AnalysisInput, Analyzer, Run};
use crate::config::HarnessConfig;
use crate::error::PipelineError;
use crate::metrics::MetricsCollector;
use crate::runner::{ScenarioExecution, ScenarioRunner};
use crate::scenario::Scenario;
use crate::storage::RunStore;
use crate::verifier::{
    endpoint_responds, outcomes, EndpointResolver, StepResult, Verifier, WebDriverClient,
};

/// Directory under the execution root receiving screenshots.
pub const SCREENSHOT_DIR: &str = "screenshots";

/// Result of checking one prompt's success criterion.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CriterionCheck {
    /// Zero-based prompt index.
    pub prompt: usize,
    /// `files_exist:<path>`, `deployed` or `endpoint_responds`.
    pub criterion: String,
    pub passed: bool,
}

/// Everything produced by one pass of the pipeline.
#[derive(Debug)]
pub struct RunReport {
    /// Store id of the persisted run.
    pub run_id: i64,
    /// Analysis, with the run's id and verification outcomes filled in.
    pub analysis: Analysis,
    pub execution: ScenarioExecution,
    pub endpoint: Option<String>,
    pub verification: Vec<StepResult>,
    pub criteria: Vec<CriterionCheck>,
}

impl RunReport {
    pub fn run(&self) -> &Run {
        &self.analysis.run
    }

    pub fn passed(&self) -> bool {
        self.analysis.run.passed
    }
}

/// Coordinates the runner, analyzer, verifier and run store.
pub struct HarnessPipeline {
    config: HarnessConfig,
    runner: ScenarioRunner,
    analyzer: Analyzer,
    store: RunStore,
    endpoints: EndpointResolver,
    metrics: MetricsCollector,
}

impl HarnessPipeline {
    /// Opens the run store and builds the pipeline components.
    pub async fn new(config: HarnessConfig) -> Result<Self, PipelineError> {
        let store = RunStore::open(&config.db_path).await?;
        Self::with_store(config, store)
    }

    /// Builds the pipeline around an already opened store.
    pub fn with_store(config: HarnessConfig, store: RunStore) -> Result<Self, PipelineError> {
        Ok(Self {
            runner: ScenarioRunner::new(config.runner_config()),
            analyzer: Analyzer::new(config.analyzer_config())?,
            endpoints: EndpointResolver::new(config.endpoint_command.clone()),
            metrics: MetricsCollector::new(),
            store,
            config,
        })
    }

    pub fn config(&self) -> &HarnessConfig {
        &self.config
    }

    pub fn store(&self) -> &RunStore {
        &self.store
    }

    /// Executes, analyzes, verifies and stores one run of `scenario`.
    ///
    /// `preamble` is prepended to the first prompt. Only environment and
    /// persistence failures are errors; a run is recorded otherwise.
    pub async fn run_once(
        &self,
        scenario: &Scenario,
        preamble: Option<&str>,
    ) -> Result<RunReport, PipelineError> {
        self.metrics.inc_runs_in_progress();
        let result = self.execute(scenario, preamble).await;
        self.metrics.dec_runs_in_progress();

        if let Ok(report) = &result {
            self.metrics.record_run(report.run());
        }
        result
    }

    async fn execute(
        &self,
        scenario: &Scenario,
        preamble: Option<&str>,
    ) -> Result<RunReport, PipelineError> {
        let execution = self.runner.run_with_preamble(scenario, preamble).await?;

        let input = AnalysisInput::from(&execution).with_revision(self.config.revision.clone());
        let mut analysis = self.analyzer.analyze(scenario, &input)?;

        let needs_endpoint = scenario.has_verification()
            || scenario
                .prompts
                .iter()
                .filter_map(|p| p.success_criteria.as_ref())
                .any(|c| c.endpoint_responds);
        let endpoint = if needs_endpoint {
            self.endpoints
                .resolve(&execution.workspace, &analysis.metrics.endpoints)
                .await
        } else {
            None
        };

        let verification = if scenario.has_verification() {
            self.verify(scenario, &execution, endpoint.as_deref())
                .await?
        } else {
            Vec::new()
        };
        analysis.run.verification = outcomes(&verification);

        let criteria = self
            .check_criteria(scenario, &execution, &analysis.run, endpoint.as_deref())
            .await;

        let run_id = self.store.insert_run(&analysis.run).await?;
        analysis.run.id = Some(run_id);

        info!(run_id, summary = %analysis.run.summary(), "Run recorded");
        Ok(RunReport {
            run_id,
            analysis,
            execution,
            endpoint,
            verification,
            criteria,
        })
    }

    async fn verify(
        &self,
        scenario: &Scenario,
        execution: &ScenarioExecution,
        endpoint: Option<&str>,
    ) -> Result<Vec<StepResult>, PipelineError> {
        if endpoint.is_none() {
            warn!(scenario = %scenario.name, "No endpoint resolved; endpoint steps will fail");
        }

        let mut verifier = Verifier::new(execution.root.join(SCREENSHOT_DIR))?;
        if let Some(url) = &self.config.webdriver_url {
            match WebDriverClient::connect(url).await {
                Ok(client) => verifier = verifier.with_driver(Box::new(client)),
                Err(e) => warn!(webdriver = %url, error = %e, "Browser unavailable, HTTP checks only"),
            }
        }

        let results = verifier.run(&scenario.verification, endpoint).await;
        verifier.finish().await;

        let failed = results.iter().filter(|r| !r.passed).count();
        info!(
            scenario = %scenario.name,
            steps = results.len(),
            failed,
            "Verification finished"
        );
        Ok(results)
    }

    async fn check_criteria(
        &self,
        scenario: &Scenario,
        execution: &ScenarioExecution,
        run: &Run,
        endpoint: Option<&str>,
    ) -> Vec<CriterionCheck> {
        let mut checks = Vec::new();
        let mut responds: Option<bool> = None;

        for outcome in &execution.prompts {
            let Some(criteria) = scenario
                .prompts
                .get(outcome.index)
                .and_then(|p| p.success_criteria.as_ref())
            else {
                continue;
            };

            for file in &criteria.files_exist {
                checks.push(CriterionCheck {
                    prompt: outcome.index,
                    criterion: format!("files_exist:{}", file),
                    passed: !outcome.missing_files.contains(file),
                });
            }
            if criteria.deployed {
                checks.push(CriterionCheck {
                    prompt: outcome.index,
                    criterion: "deployed".to_string(),
                    passed: run.deployed,
                });
            }
            if criteria.endpoint_responds {
                let passed = match responds {
                    Some(passed) => passed,
                    None => {
                        let probed = match endpoint {
                            Some(url) => endpoint_responds(url).await,
                            None => false,
                        };
                        responds = Some(probed);
                        probed
                    }
                };
                checks.push(CriterionCheck {
                    prompt: outcome.index,
                    criterion: "endpoint_responds".to_string(),
                    passed,
                });
            }
        }

        for check in checks.iter().filter(|c| !c.passed) {
            warn!(
                prompt = check.prompt + 1,
                criterion = %check.criterion,
                "Success criterion not met"
            );
        }
        checks
    }
}
