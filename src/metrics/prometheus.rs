//! Prometheus metrics registration and export.
//!
//! This module defines all Prometheus metrics used by the harness and provides
//! functions for initializing, registering, and exporting metrics.

use prometheus::{
    CounterVec, Encoder, Gauge, Histogram, HistogramOpts, HistogramVec, Opts, Registry,
    TextEncoder,
};
use std::sync::OnceLock;

/// Global Prometheus registry for all harness metrics.
pub static REGISTRY: OnceLock<Registry> = OnceLock::new();

/// Total prompts executed, labeled by how the agent process was terminated.
pub static PROMPTS_TOTAL: OnceLock<CounterVec> = OnceLock::new();

/// Prompt execution duration in seconds, labeled by termination.
pub static PROMPT_DURATION: OnceLock<HistogramVec> = OnceLock::new();

/// Total analyzed runs, labeled by scenario and result (pass/fail).
pub static RUNS_TOTAL: OnceLock<CounterVec> = OnceLock::new();

/// Distribution of composite run scores.
pub static RUN_SCORE: OnceLock<Histogram> = OnceLock::new();

/// Total verification steps executed, labeled by action and result.
pub static VERIFICATION_STEPS_TOTAL: OnceLock<CounterVec> = OnceLock::new();

/// Number of scenario executions currently in flight.
pub static RUNS_IN_PROGRESS: OnceLock<Gauge> = OnceLock::new();

/// Initialize all metrics and register them with the registry.
///
/// Safe to call more than once; later calls leave the first registry in place.
///
/// # Errors
///
/// Returns a `prometheus::Error` if metric registration fails, typically due to
/// duplicate metric names or invalid metric configurations.
pub fn init_metrics() -> Result<(), prometheus::Error> {
    let registry = Registry::new();

    let prompts_total = CounterVec::new(
        Opts::new("harness_prompts_total", "Total prompts executed"),
        &["termination"],
    )?;

    let prompt_duration = HistogramVec::new(
        HistogramOpts::new(
            "harness_prompt_duration_seconds",
            "Prompt execution duration in seconds",
        )
        .buckets(vec![10.0, 30.0, 60.0, 120.0, 300.0, 600.0, 900.0, 1800.0]),
        &["termination"],
    )?;

    let runs_total = CounterVec::new(
        Opts::new("harness_runs_total", "Total analyzed scenario runs"),
        &["scenario", "result"],
    )?;

    let run_score = Histogram::with_opts(
        HistogramOpts::new("harness_run_score", "Distribution of composite run scores")
            .buckets(vec![10.0, 20.0, 30.0, 40.0, 50.0, 60.0, 70.0, 80.0, 90.0, 100.0]),
    )?;

    let verification_steps_total = CounterVec::new(
        Opts::new(
            "harness_verification_steps_total",
            "Total verification steps executed",
        ),
        &["action", "result"],
    )?;

    let runs_in_progress = Gauge::new(
        "harness_runs_in_progress",
        "Number of scenario executions currently in flight",
    )?;

    registry.register(Box::new(prompts_total.clone()))?;
    registry.register(Box::new(prompt_duration.clone()))?;
    registry.register(Box::new(runs_total.clone()))?;
    registry.register(Box::new(run_score.clone()))?;
    registry.register(Box::new(verification_steps_total.clone()))?;
    registry.register(Box::new(runs_in_progress.clone()))?;

    // If any of these fail, metrics were already initialized (idempotent)
    let _ = REGISTRY.set(registry);
    let _ = PROMPTS_TOTAL.set(prompts_total);
    let _ = PROMPT_DURATION.set(prompt_duration);
    let _ = RUNS_TOTAL.set(runs_total);
    let _ = RUN_SCORE.set(run_score);
    let _ = VERIFICATION_STEPS_TOTAL.set(verification_steps_total);
    let _ = RUNS_IN_PROGRESS.set(runs_in_progress);

    tracing::debug!("Prometheus metrics initialized");

    Ok(())
}

/// Export all registered metrics in Prometheus text format.
///
/// If the registry has not been initialized or encoding fails, the returned
/// text is a single comment line describing the problem.
pub fn export_metrics() -> String {
    let Some(registry) = REGISTRY.get() else {
        return "# Metrics not initialized. Call init_metrics() first.\n".to_string();
    };

    let encoder = TextEncoder::new();
    let metric_families = registry.gather();

    let mut buffer = Vec::new();
    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        return format!("# Error encoding metrics: {}\n", e);
    }

    String::from_utf8(buffer)
        .unwrap_or_else(|e| format!("# Error converting metrics to UTF-8: {}\n", e))
}
