//! The persisted record of one scenario execution.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Outcome of one regression rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegressionResult {
    /// Matches found in the transcript.
    pub occurrences: u32,
    /// Declared `max_occurrences`.
    pub limit: u32,
    /// `occurrences <= limit`.
    pub passed: bool,
}

impl RegressionResult {
    pub fn new(occurrences: u32, limit: u32) -> Self {
        Self {
            occurrences,
            limit,
            passed: occurrences <= limit,
        }
    }
}

/// Outcome of one verification step.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepOutcome {
    pub passed: bool,
    #[serde(default)]
    pub details: String,
}

/// One recorded execution of a scenario, with derived metrics and verdict.
///
/// Created by the analyzer; only ever written to and read from the run store
/// afterwards.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Run {
    /// Store-assigned id; absent until persisted and never exported.
    #[serde(default, skip_serializing)]
    pub id: Option<i64>,
    /// Scenario name.
    pub scenario: String,
    /// Session identifier supplied by the agent's own logging.
    pub session_id: String,
    /// Optional source revision of the agent under test.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub revision: Option<String>,
    /// Start of the execution.
    pub started_at: DateTime<Utc>,
    /// Session duration in seconds.
    pub duration_secs: f64,
    pub turns: u32,
    pub deploy_calls: u32,
    pub infra_edits: u32,
    pub delegated: bool,
    pub deployed: bool,
    /// Composite score in [0, 100].
    pub score: f64,
    pub passed: bool,
    /// Required skill name → invoked.
    #[serde(default)]
    pub skills: BTreeMap<String, bool>,
    /// Regression rule name → outcome.
    #[serde(default)]
    pub regressions: BTreeMap<String, RegressionResult>,
    /// Verification step name → outcome.
    #[serde(default)]
    pub verification: BTreeMap<String, StepOutcome>,
}

impl Run {
    /// Duration in minutes.
    pub fn duration_minutes(&self) -> f64 {
        self.duration_secs / 60.0
    }

    /// Number of verification steps that failed.
    pub fn failed_steps(&self) -> usize {
        self.verification.values().filter(|s| !s.passed).count()
    }

    /// Skills that were required but not invoked.
    pub fn missing_skills(&self) -> impl Iterator<Item = &str> {
        self.skills
            .iter()
            .filter(|(_, invoked)| !**invoked)
            .map(|(name, _)| name.as_str())
    }

    /// One-line summary for logs and listings.
    pub fn summary(&self) -> String {
        format!(
            "{} [{}] score {:.1} {} ({} turns, {:.1} min)",
            self.scenario,
            self.session_id,
            self.score,
            if self.passed { "PASS" } else { "FAIL" },
            self.turns,
            self.duration_minutes()
        )
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    pub(crate) fn sample_run(session_id: &str) -> Run {
        let mut skills = BTreeMap::new();
        skills.insert("deploy-helper".to_string(), true);
        skills.insert("diagnostics".to_string(), false);

        let mut regressions = BTreeMap::new();
        regressions.insert("auth-loop".to_string(), RegressionResult::new(3, 2));

        let mut verification = BTreeMap::new();
        verification.insert(
            "home".to_string(),
            StepOutcome {
                passed: true,
                details: "status 200".to_string(),
            },
        );

        Run {
            id: None,
            scenario: "web-app".to_string(),
            session_id: session_id.to_string(),
            revision: Some("abc123".to_string()),
            started_at: DateTime::parse_from_rfc3339("2026-03-01T12:00:00Z")
                .unwrap()
                .with_timezone(&Utc),
            duration_secs: 754.5,
            turns: 20,
            deploy_calls: 1,
            infra_edits: 0,
            delegated: true,
            deployed: true,
            score: 62.5,
            passed: false,
            skills,
            regressions,
            verification,
        }
    }

    #[test]
    fn test_regression_result() {
        assert!(RegressionResult::new(2, 2).passed);
        assert!(!RegressionResult::new(3, 2).passed);
    }

    #[test]
    fn test_run_helpers() {
        let run = sample_run("s1");
        assert_eq!(run.missing_skills().collect::<Vec<_>>(), vec!["diagnostics"]);
        assert_eq!(run.failed_steps(), 0);
        assert!(run.summary().contains("FAIL"));
        assert!((run.duration_minutes() - 12.575).abs() < 1e-9);
    }

    #[test]
    fn test_run_json_omits_id() {
        let mut run = sample_run("s1");
        run.id = Some(7);
        let json = serde_json::to_value(&run).unwrap();
        assert!(json.get("id").is_none());
        assert_eq!(json["regressions"]["auth-loop"]["occurrences"], 3);
    }
}
