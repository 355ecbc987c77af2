//! Metrics module for Prometheus-based monitoring.
//!
//! Counts prompts by termination cause, records prompt durations, and tracks
//! run results and composite scores per scenario.
//!
//! # Example
//!
//! ```ignore
//! use scenario_harness::metrics::{init_metrics, export_metrics, MetricsCollector};
//!
//! init_metrics()?;
//! MetricsCollector::new().record_run(&analysis.run);
//! std::fs::write("harness.prom", export_metrics())?;
//! ```

pub mod collectors;
pub mod prometheus;

pub use collectors::MetricsCollector;
pub use prometheus::{export_metrics, init_metrics};

pub use prometheus::{
    PROMPTS_TOTAL, PROMPT_DURATION, REGISTRY, RUNS_IN_PROGRESS, RUNS_TOTAL, RUN_SCORE,
    VERIFICATION_STEPS_TOTAL,
};
