//! Remediation instructions for failed runs.
//!
//! A failed run's scorecard is turned into a corrective instruction aimed at
//! the agent's own instruction/skill assets. The instruction is written into
//! the assets directory, an optional rebuild command picks it up, and the same
//! text is prepended to the next iteration's first prompt.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use serde::Serialize;
use tera::{Context, Tera};
use tokio::process::Command;
use tracing::{info, warn};

use crate::analyzer::{Analysis, ContributionKind};
use crate::error::PipelineError;

/// File written into the assets directory.
pub const REMEDIATION_FILE: &str = "harness-remediation.md";

const REBUILD_TIMEOUT: Duration = Duration::from_secs(30 * 60);

const TEMPLATE: &str = r#"# Harness feedback: {{ scenario }}

The previous attempt (iteration {{ iteration }}) scored {{ score }}/100 and did not meet the scenario's limits. Apply the following corrections on the next attempt.
{% if metrics %}
## Limits exceeded
{% for m in metrics %}
- Keep {{ m.label }} at or below {{ m.limit }} (last attempt: {{ m.observed }}).
{%- endfor %}
{% endif %}
{%- if delegation %}
## Delegation
- Hand independent sub-tasks to a sub-agent instead of doing all the work in the main session.
{% endif %}
{%- if skills %}
## Skills not used
{% for skill in skills %}
- Invoke the `{{ skill }}` skill when its task comes up.
{%- endfor %}
{% endif %}
{%- if regressions %}
## Known failure modes
{% for r in regressions %}
- Avoid "{{ r.name }}": seen {{ r.occurrences }} times, allowed {{ r.limit }}.
{%- endfor %}
{% endif %}
{%- if steps %}
## Verification failures
{% for s in steps %}
- Step "{{ s.name }}" failed: {{ s.details }}
{%- endfor %}
{% endif %}"#;

#[derive(Debug, Serialize)]
struct MetricMiss {
    label: String,
    observed: String,
    limit: String,
}

#[derive(Debug, Serialize)]
struct RegressionMiss {
    name: String,
    occurrences: u32,
    limit: u32,
}

#[derive(Debug, Serialize)]
struct StepMiss {
    name: String,
    details: String,
}

fn metric_label(name: &str) -> &str {
    match name {
        "duration_minutes" => "the session duration in minutes",
        "turns" => "the number of turns",
        "deploy_calls" => "the number of deploy commands",
        "infra_edits" => "the number of infrastructure file edits",
        other => other,
    }
}

fn format_number(value: f64) -> String {
    if value.fract() == 0.0 {
        format!("{:.0}", value)
    } else {
        format!("{:.1}", value)
    }
}

/// Renders the corrective instruction for a failed analysis.
pub fn render_remediation(
    scenario: &str,
    analysis: &Analysis,
    iteration: u32,
) -> Result<String, tera::Error> {
    let mut metrics = Vec::new();
    let mut skills = Vec::new();
    let mut regressions = Vec::new();
    let mut delegation = false;

    for c in analysis.scorecard.failures() {
        match c.kind {
            ContributionKind::Metric => metrics.push(MetricMiss {
                label: metric_label(&c.name).to_string(),
                observed: format_number(c.observed),
                limit: format_number(c.limit),
            }),
            ContributionKind::Delegation => delegation = true,
            ContributionKind::Skill => skills.push(c.name.clone()),
            ContributionKind::Regression => {
                if let Some(result) = analysis.run.regressions.get(&c.name) {
                    regressions.push(RegressionMiss {
                        name: c.name.clone(),
                        occurrences: result.occurrences,
                        limit: result.limit,
                    });
                }
            }
        }
    }

    let steps: Vec<StepMiss> = analysis
        .run
        .verification
        .iter()
        .filter(|(_, outcome)| !outcome.passed)
        .map(|(name, outcome)| StepMiss {
            name: name.clone(),
            details: outcome.details.clone(),
        })
        .collect();

    let mut context = Context::new();
    context.insert("scenario", scenario);
    context.insert("iteration", &iteration);
    context.insert("score", &format!("{:.1}", analysis.run.score));
    context.insert("metrics", &metrics);
    context.insert("delegation", &delegation);
    context.insert("skills", &skills);
    context.insert("regressions", &regressions);
    context.insert("steps", &steps);

    let rendered = Tera::one_off(TEMPLATE, &context, false)?;
    Ok(rendered.trim().to_string() + "\n")
}

/// Applies remediation text to the agent's configuration surface.
#[derive(Debug, Clone, Default)]
pub struct Remediator {
    assets_dir: Option<PathBuf>,
    rebuild_command: Option<String>,
}

impl Remediator {
    pub fn new(assets_dir: Option<PathBuf>, rebuild_command: Option<String>) -> Self {
        Self {
            assets_dir,
            rebuild_command: rebuild_command.filter(|c| !c.trim().is_empty()),
        }
    }

    /// Writes the instruction into the assets directory and runs the rebuild
    /// command. Returns the written file, if any.
    pub async fn apply(&self, text: &str) -> Result<Option<PathBuf>, PipelineError> {
        let written = match &self.assets_dir {
            Some(dir) => {
                tokio::fs::create_dir_all(dir).await?;
                let path = dir.join(REMEDIATION_FILE);
                tokio::fs::write(&path, text).await?;
                info!(path = %path.display(), "Wrote remediation instruction");
                Some(path)
            }
            None => None,
        };

        if let Some(command) = &self.rebuild_command {
            self.rebuild(command).await?;
        }

        Ok(written)
    }

    async fn rebuild(&self, command: &str) -> Result<(), PipelineError> {
        let failed = |message: String| PipelineError::RebuildFailed {
            command: command.to_string(),
            message,
        };

        info!(command = %command, "Rebuilding agent");
        let mut cmd = Command::new("sh");
        cmd.arg("-c")
            .arg(command)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(dir) = self.assets_dir.as_deref().filter(|d| d.is_dir()) {
            cmd.current_dir(dir);
        }

        let child = cmd.spawn().map_err(|e| failed(e.to_string()))?;
        let output = tokio::time::timeout(REBUILD_TIMEOUT, child.wait_with_output())
            .await
            .map_err(|_| failed(format!("timed out after {:?}", REBUILD_TIMEOUT)))?
            .map_err(|e| failed(e.to_string()))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            warn!(command = %command, status = %output.status, "Rebuild failed");
            return Err(failed(format!("{}: {}", output.status, tail(&stderr, 20))));
        }
        Ok(())
    }

    pub fn assets_dir(&self) -> Option<&Path> {
        self.assets_dir.as_deref()
    }
}

fn tail(text: &str, lines: usize) -> String {
    let all: Vec<&str> = text.lines().collect();
    all[all.len().saturating_sub(lines)..].join("\n")
}
