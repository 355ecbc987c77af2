//! Recording interface between harness types and the Prometheus series.

use std::time::Duration;

use super::prometheus::{
    PROMPTS_TOTAL, PROMPT_DURATION, RUNS_IN_PROGRESS, RUNS_TOTAL, RUN_SCORE,
    VERIFICATION_STEPS_TOTAL,
};
use crate::analyzer::Run;
use crate::runner::Termination;

fn result_label(passed: bool) -> &'static str {
    if passed {
        "pass"
    } else {
        "fail"
    }
}

/// Records harness activity into the global registry.
///
/// Every method is a no-op until `init_metrics()` has been called.
///
/// # Example
///
/// ```ignore
/// use scenario_harness::metrics::{init_metrics, MetricsCollector};
///
/// init_metrics()?;
/// let collector = MetricsCollector::new();
/// collector.record_prompt(&Termination::TaskComplete, Duration::from_secs(42));
/// collector.record_run(&analysis.run);
/// ```
#[derive(Debug, Clone, Default)]
pub struct MetricsCollector;

impl MetricsCollector {
    pub fn new() -> Self {
        Self
    }

    /// Counts a finished prompt under its termination cause.
    pub fn record_prompt(&self, termination: &Termination, elapsed: Duration) {
        let label = termination.label();
        if let Some(total) = PROMPTS_TOTAL.get() {
            total.with_label_values(&[label]).inc();
        }
        if let Some(duration) = PROMPT_DURATION.get() {
            duration
                .with_label_values(&[label])
                .observe(elapsed.as_secs_f64());
        }

        tracing::trace!(termination = label, ?elapsed, "Recorded prompt metric");
    }

    /// Counts an analyzed run and observes its composite score.
    pub fn record_run(&self, run: &Run) {
        let result = result_label(run.passed);
        if let Some(total) = RUNS_TOTAL.get() {
            total.with_label_values(&[run.scenario.as_str(), result]).inc();
        }
        if let Some(histogram) = RUN_SCORE.get() {
            histogram.observe(run.score);
        }

        tracing::trace!(scenario = %run.scenario, result, score = run.score, "Recorded run metric");
    }

    /// Counts one verification step by action and outcome.
    pub fn record_verification_step(&self, action: &str, passed: bool) {
        if let Some(total) = VERIFICATION_STEPS_TOTAL.get() {
            total
                .with_label_values(&[action, result_label(passed)])
                .inc();
        }
    }

    pub fn inc_runs_in_progress(&self) {
        if let Some(gauge) = RUNS_IN_PROGRESS.get() {
            gauge.inc();
        }
    }

    pub fn dec_runs_in_progress(&self) {
        if let Some(gauge) = RUNS_IN_PROGRESS.get() {
            gauge.dec();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analyzer::run::tests::sample_run;
    use crate::metrics::{export_metrics, init_metrics};

    #[test]
    fn test_record_prompt_by_termination() {
        let _ = init_metrics();
        let collector = MetricsCollector::new();

        collector.record_prompt(&Termination::Exited { code: Some(0) }, Duration::from_secs(12));
        collector.record_prompt(
            &Termination::StuckLoop {
                line: "Retrying...".to_string(),
                repeats: 5,
            },
            Duration::from_secs(300),
        );

        let text = export_metrics();
        assert!(text.contains("harness_prompt_duration_seconds"));
        assert!(text.contains("termination=\"stuck_loop\""));
    }

    #[test]
    fn test_record_run() {
        let _ = init_metrics();
        MetricsCollector::new().record_run(&sample_run("metrics-1"));

        let text = export_metrics();
        assert!(text.contains("harness_runs_total"));
        assert!(text.contains("scenario=\"web-app\""));
        assert!(text.contains("harness_run_score"));
    }

    #[test]
    fn test_gauge_and_steps_do_not_panic() {
        let _ = init_metrics();
        let collector = MetricsCollector::new();
        collector.inc_runs_in_progress();
        collector.dec_runs_in_progress();
        collector.record_verification_step("navigate", false);
    }
}
