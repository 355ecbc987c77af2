//! Scenario data types.
//!
//! A scenario is loaded once per execution and never mutated afterwards.

use std::time::Duration;

use regex::Regex;
use serde::{Deserialize, Serialize};

use super::loader::duration_serde;

/// Placeholder substituted with the resolved deployment endpoint at
/// verification time.
pub const ENDPOINT_PLACEHOLDER: &str = "{{endpoint}}";

/// Default overall timeout when a scenario does not declare one.
pub const DEFAULT_SCENARIO_TIMEOUT: Duration = Duration::from_secs(60 * 60);

/// A declarative, ordered sequence of prompts plus scoring, regression and
/// verification rules.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Scenario {
    /// Unique scenario name, used as the key in the run store.
    pub name: String,
    /// Human-readable description.
    #[serde(default)]
    pub description: String,
    /// Upper bound for the whole multi-prompt sequence.
    #[serde(default = "default_timeout", with = "duration_serde")]
    pub timeout: Duration,
    /// Prompts, executed strictly in order.
    pub prompts: Vec<Prompt>,
    /// Scoring limits (and regression rules).
    #[serde(default)]
    pub scoring: ScoringConfig,
    /// Post-deployment checks.
    #[serde(default)]
    pub verification: Vec<VerificationStep>,
}

fn default_timeout() -> Duration {
    DEFAULT_SCENARIO_TIMEOUT
}

impl Scenario {
    /// Returns the regression rules declared under `scoring.regressions`.
    pub fn regressions(&self) -> &[RegressionRule] {
        &self.scoring.regressions
    }

    /// Iterates over the prompts together with their position in the session.
    ///
    /// Every prompt after the first resumes the session established by the
    /// previous one.
    pub fn prompt_steps(&self) -> impl Iterator<Item = PromptStep<'_>> {
        self.prompts.iter().enumerate().map(|(index, prompt)| PromptStep {
            index,
            prompt,
            is_resumption: index > 0,
        })
    }

    /// Whether the scenario declares any verification steps.
    pub fn has_verification(&self) -> bool {
        !self.verification.is_empty()
    }
}

/// A single instruction sent to the agent process.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Prompt {
    /// Instruction text passed to the agent.
    pub text: String,
    /// Optional expectations checked after the prompt finishes.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub success_criteria: Option<SuccessCriteria>,
}

/// A prompt in execution order.
#[derive(Debug, Clone, Copy)]
pub struct PromptStep<'a> {
    /// Zero-based position in the scenario.
    pub index: usize,
    /// The prompt itself.
    pub prompt: &'a Prompt,
    /// True for every prompt after the first.
    pub is_resumption: bool,
}

/// Expectations attached to a prompt.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SuccessCriteria {
    /// Files (relative to the workspace) that should exist afterwards.
    #[serde(default, alias = "files")]
    pub files_exist: Vec<String>,
    /// Whether a successful deployment is expected.
    #[serde(default)]
    pub deployed: bool,
    /// Whether the deployed endpoint is expected to answer HTTP requests.
    #[serde(default)]
    pub endpoint_responds: bool,
}

impl SuccessCriteria {
    /// Returns true if nothing is expected.
    pub fn is_empty(&self) -> bool {
        self.files_exist.is_empty() && !self.deployed && !self.endpoint_responds
    }
}

/// Named numeric limits plus delegation, skill and regression requirements.
///
/// A limit left unset is excluded from scoring entirely.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ScoringConfig {
    /// Maximum wall-clock duration of the session, in minutes.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_duration_minutes: Option<f64>,
    /// Maximum number of agent turns.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_turns: Option<u32>,
    /// Maximum number of privileged deploy-style actions.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_deploy_calls: Option<u32>,
    /// Maximum number of infrastructure-file edits.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_infra_edits: Option<u32>,
    /// Whether the agent must delegate to a sub-agent at least once.
    #[serde(default)]
    pub must_delegate: bool,
    /// Skills the agent is required to invoke.
    #[serde(default)]
    pub must_invoke_skills: Vec<String>,
    /// Known failure signatures.
    #[serde(default)]
    pub regressions: Vec<RegressionRule>,
}

/// A known failure signature to watch for in agent output.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegressionRule {
    /// Rule name, unique within the scenario.
    pub name: String,
    /// Regular expression matched against the transcript.
    pub pattern: String,
    /// Maximum tolerated number of matches.
    #[serde(default)]
    pub max_occurrences: u32,
}

impl RegressionRule {
    /// Creates a new rule.
    pub fn new(name: impl Into<String>, pattern: impl Into<String>, max_occurrences: u32) -> Self {
        Self {
            name: name.into(),
            pattern: pattern.into(),
            max_occurrences,
        }
    }

    /// Compiles the rule's pattern.
    pub fn compile(&self) -> Result<Regex, regex::Error> {
        Regex::new(&self.pattern)
    }
}

/// Kind of browser-style verification action.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VerificationAction {
    Navigate,
    Click,
    Type,
    Wait,
    #[serde(alias = "assert-visible")]
    AssertVisible,
    #[serde(alias = "assert-nonempty")]
    AssertNonempty,
    Screenshot,
}

impl std::fmt::Display for VerificationAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            VerificationAction::Navigate => "navigate",
            VerificationAction::Click => "click",
            VerificationAction::Type => "type",
            VerificationAction::Wait => "wait",
            VerificationAction::AssertVisible => "assert_visible",
            VerificationAction::AssertNonempty => "assert_nonempty",
            VerificationAction::Screenshot => "screenshot",
        };
        write!(f, "{}", name)
    }
}

/// A scripted post-deployment check.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VerificationStep {
    /// Step name, unique within the scenario.
    pub name: String,
    /// What to do.
    pub action: VerificationAction,
    /// CSS selector for element actions.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub selector: Option<String>,
    /// Target URL for `navigate`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    /// Text to type, expected body content, wait milliseconds or screenshot file.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
    /// Expected HTTP status for `navigate` (200 when unset).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status_code: Option<u16>,
}

impl VerificationStep {
    /// Returns a copy with every endpoint placeholder replaced.
    pub fn with_endpoint(&self, endpoint: &str) -> Self {
        let endpoint = endpoint.trim_end_matches('/');
        let substitute = |s: &Option<String>| {
            s.as_ref()
                .map(|v| v.replace(ENDPOINT_PLACEHOLDER, endpoint))
        };
        Self {
            url: substitute(&self.url),
            value: substitute(&self.value),
            ..self.clone()
        }
    }

    /// Whether any field references the endpoint placeholder.
    pub fn references_endpoint(&self) -> bool {
        [&self.url, &self.value]
            .iter()
            .any(|v| v.as_deref().is_some_and(|s| s.contains(ENDPOINT_PLACEHOLDER)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn step(action: VerificationAction) -> VerificationStep {
        VerificationStep {
            name: "s".to_string(),
            action,
            selector: None,
            url: None,
            value: None,
            status_code: None,
        }
    }

    #[test]
    fn test_prompt_steps_resumption() {
        let scenario = Scenario {
            name: "demo".to_string(),
            description: String::new(),
            timeout: DEFAULT_SCENARIO_TIMEOUT,
            prompts: vec![
                Prompt {
                    text: "first".to_string(),
                    success_criteria: None,
                },
                Prompt {
                    text: "second".to_string(),
                    success_criteria: None,
                },
            ],
            scoring: ScoringConfig::default(),
            verification: Vec::new(),
        };

        let steps: Vec<_> = scenario.prompt_steps().collect();
        assert!(!steps[0].is_resumption);
        assert!(steps[1].is_resumption);
        assert_eq!(steps[1].index, 1);
    }

    #[test]
    fn test_with_endpoint_substitution() {
        let mut s = step(VerificationAction::Navigate);
        s.url = Some("{{endpoint}}/health".to_string());
        assert!(s.references_endpoint());

        let resolved = s.with_endpoint("https://app.example.com/");
        assert_eq!(resolved.url.as_deref(), Some("https://app.example.com/health"));
        assert!(!resolved.references_endpoint());
    }

    #[test]
    fn test_action_aliases() {
        let a: VerificationAction = serde_yaml::from_str("assert-visible").unwrap();
        assert_eq!(a, VerificationAction::AssertVisible);
        let b: VerificationAction = serde_yaml::from_str("assert_nonempty").unwrap();
        assert_eq!(b, VerificationAction::AssertNonempty);
        assert_eq!(VerificationAction::Screenshot.to_string(), "screenshot");
    }

    #[test]
    fn test_regression_rule_compile() {
        let rule = RegressionRule::new("loop", "(?i)retrying", 1);
        let re = rule.compile().unwrap();
        assert_eq!(re.find_iter("Retrying... retrying").count(), 2);
        assert!(RegressionRule::new("bad", "(", 0).compile().is_err());
    }
}
