//! Scenario loading, validation and discovery.

use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use tracing::debug;

use super::types::{Scenario, VerificationAction};
use crate::error::ScenarioError;

impl Scenario {
    /// Loads and validates a scenario from a YAML file.
    pub fn load(path: &Path) -> Result<Self, ScenarioError> {
        let content = fs::read_to_string(path).map_err(|source| ScenarioError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let scenario = Self::from_yaml_str(&content, &path.display().to_string())?;
        debug!(scenario = %scenario.name, path = %path.display(), "Loaded scenario");
        Ok(scenario)
    }

    /// Parses and validates a scenario from YAML text.
    ///
    /// `origin` is only used in error messages.
    pub fn from_yaml_str(content: &str, origin: &str) -> Result<Self, ScenarioError> {
        let scenario: Scenario =
            serde_yaml::from_str(content).map_err(|e| ScenarioError::Parse {
                path: origin.to_string(),
                message: e.to_string(),
            })?;
        scenario.validate()?;
        Ok(scenario)
    }

    /// Checks the structural rules a scenario must satisfy.
    pub fn validate(&self) -> Result<(), ScenarioError> {
        if self.name.trim().is_empty() {
            return Err(ScenarioError::MissingField {
                scenario: "<unnamed>".to_string(),
                field: "name".to_string(),
            });
        }

        if self.prompts.is_empty() {
            return Err(ScenarioError::MissingField {
                scenario: self.name.clone(),
                field: "prompts".to_string(),
            });
        }

        if let Some(idx) = self.prompts.iter().position(|p| p.text.trim().is_empty()) {
            return Err(ScenarioError::Validation(format!(
                "prompt {} of scenario '{}' has empty text",
                idx + 1,
                self.name
            )));
        }

        if self.timeout.is_zero() {
            return Err(ScenarioError::Validation(format!(
                "timeout of scenario '{}' must be greater than 0",
                self.name
            )));
        }

        if let Some(minutes) = self.scoring.max_duration_minutes {
            if !minutes.is_finite() || minutes < 0.0 {
                return Err(ScenarioError::Validation(format!(
                    "max_duration_minutes must be a non-negative number, got {}",
                    minutes
                )));
            }
        }

        let mut skills = HashSet::new();
        for skill in &self.scoring.must_invoke_skills {
            if !skills.insert(skill.as_str()) {
                return Err(ScenarioError::DuplicateName {
                    scenario: self.name.clone(),
                    kind: "skill",
                    name: skill.clone(),
                });
            }
        }

        let mut rule_names = HashSet::new();
        for rule in self.regressions() {
            if !rule_names.insert(rule.name.as_str()) {
                return Err(ScenarioError::DuplicateName {
                    scenario: self.name.clone(),
                    kind: "regression",
                    name: rule.name.clone(),
                });
            }
            rule.compile().map_err(|e| ScenarioError::InvalidPattern {
                rule: rule.name.clone(),
                pattern: rule.pattern.clone(),
                message: e.to_string(),
            })?;
        }

        let mut step_names = HashSet::new();
        for step in &self.verification {
            if !step_names.insert(step.name.as_str()) {
                return Err(ScenarioError::DuplicateName {
                    scenario: self.name.clone(),
                    kind: "verification step",
                    name: step.name.clone(),
                });
            }

            let missing = |param: &'static str| ScenarioError::MissingStepParameter {
                step: step.name.clone(),
                action: step.action.to_string(),
                param,
            };

            match step.action {
                VerificationAction::Navigate if step.url.is_none() => return Err(missing("url")),
                VerificationAction::Click
                | VerificationAction::AssertVisible
                | VerificationAction::AssertNonempty
                    if step.selector.is_none() =>
                {
                    return Err(missing("selector"))
                }
                VerificationAction::Type if step.selector.is_none() => {
                    return Err(missing("selector"))
                }
                VerificationAction::Type if step.value.is_none() => return Err(missing("value")),
                _ => {}
            }
        }

        Ok(())
    }
}

/// Finds scenario files (`*.yaml`, `*.yml`) directly inside `dir`, sorted by path.
pub fn discover_scenarios(dir: &Path) -> Result<Vec<PathBuf>, ScenarioError> {
    let mut paths = Vec::new();
    for entry in fs::read_dir(dir)? {
        let path = entry?.path();
        let is_yaml = path
            .extension()
            .and_then(|e| e.to_str())
            .is_some_and(|e| e == "yaml" || e == "yml");
        if path.is_file() && is_yaml {
            paths.push(path);
        }
    }
    paths.sort();
    Ok(paths)
}

/// Parses durations such as `90s`, `15m`, `2h` or `1h30m`.
///
/// A bare number is read as seconds.
pub fn parse_duration(input: &str) -> Result<Duration, ScenarioError> {
    let s = input.trim();
    if s.is_empty() {
        return Err(ScenarioError::InvalidDuration(input.to_string()));
    }

    if let Ok(secs) = s.parse::<u64>() {
        return Ok(Duration::from_secs(secs));
    }

    let mut total = 0u64;
    let mut digits = String::new();
    for ch in s.chars() {
        if ch.is_ascii_digit() {
            digits.push(ch);
            continue;
        }
        let multiplier = match ch {
            's' => 1,
            'm' => 60,
            'h' => 3600,
            'd' => 86_400,
            _ => return Err(ScenarioError::InvalidDuration(input.to_string())),
        };
        let value: u64 = digits
            .parse()
            .map_err(|_| ScenarioError::InvalidDuration(input.to_string()))?;
        total = value
            .checked_mul(multiplier)
            .and_then(|secs| total.checked_add(secs))
            .ok_or_else(|| ScenarioError::InvalidDuration(input.to_string()))?;
        digits.clear();
    }

    if !digits.is_empty() {
        return Err(ScenarioError::InvalidDuration(input.to_string()));
    }

    Ok(Duration::from_secs(total))
}

/// Formats a duration in the same notation `parse_duration` accepts.
pub fn format_duration(duration: Duration) -> String {
    let secs = duration.as_secs();
    let (h, m, s) = (secs / 3600, (secs % 3600) / 60, secs % 60);
    let mut out = String::new();
    if h > 0 {
        out.push_str(&format!("{}h", h));
    }
    if m > 0 {
        out.push_str(&format!("{}m", m));
    }
    if s > 0 || out.is_empty() {
        out.push_str(&format!("{}s", s));
    }
    out
}

/// Serde adapter for duration strings.
pub(crate) mod duration_serde {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Seconds(u64),
        Text(String),
    }

    pub fn serialize<S: Serializer>(d: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&super::format_duration(*d))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        match Raw::deserialize(deserializer)? {
            Raw::Seconds(secs) => Ok(Duration::from_secs(secs)),
            Raw::Text(text) => super::parse_duration(&text).map_err(serde::de::Error::custom),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    const SAMPLE: &str = r#"
name: web-app
description: Build and deploy
timeout: 45m
prompts:
  - text: Create a web app
    success_criteria:
      files_exist: [package.json]
  - text: Deploy it
scoring:
  max_duration_minutes: 30
  max_turns: 40
  max_deploy_calls: 2
  max_infra_edits: 5
  must_delegate: true
  must_invoke_skills: [deploy-helper]
  regressions:
    - name: auth-loop
      pattern: "(?i)login required"
      max_occurrences: 2
verification:
  - name: home
    action: navigate
    url: "{{endpoint}}/"
    status_code: 200
  - name: header
    action: assert-visible
    selector: h1
"#;

    #[test]
    fn test_parse_full_scenario() {
        let scenario = Scenario::from_yaml_str(SAMPLE, "sample").unwrap();
        assert_eq!(scenario.name, "web-app");
        assert_eq!(scenario.timeout, Duration::from_secs(45 * 60));
        assert_eq!(scenario.prompts.len(), 2);
        assert_eq!(
            scenario.prompts[0]
                .success_criteria
                .as_ref()
                .map(|c| c.files_exist.clone()),
            Some(vec!["package.json".to_string()])
        );
        assert_eq!(scenario.scoring.max_turns, Some(40));
        assert_eq!(scenario.scoring.max_duration_minutes, Some(30.0));
        assert!(scenario.scoring.must_delegate);
        assert_eq!(scenario.regressions().len(), 1);
        assert_eq!(scenario.regressions()[0].max_occurrences, 2);
        assert_eq!(scenario.verification.len(), 2);
        assert_eq!(scenario.verification[1].action, VerificationAction::AssertVisible);
    }

    #[test]
    fn test_minimal_scenario_defaults() {
        let scenario =
            Scenario::from_yaml_str("name: tiny\nprompts:\n  - text: hello\n", "tiny").unwrap();
        assert_eq!(scenario.timeout, super::super::DEFAULT_SCENARIO_TIMEOUT);
        assert!(scenario.scoring.max_turns.is_none());
        assert!(scenario.regressions().is_empty());
        assert!(!scenario.has_verification());
    }

    #[test]
    fn test_rejects_missing_prompts() {
        let err = Scenario::from_yaml_str("name: empty\nprompts: []\n", "empty").unwrap_err();
        assert!(matches!(err, ScenarioError::MissingField { ref field, .. } if field == "prompts"));
    }

    #[test]
    fn test_rejects_invalid_regex() {
        let yaml = "name: x\nprompts:\n  - text: hi\nscoring:\n  regressions:\n    - name: bad\n      pattern: \"(unclosed\"\n";
        let err = Scenario::from_yaml_str(yaml, "x").unwrap_err();
        assert!(matches!(err, ScenarioError::InvalidPattern { ref rule, .. } if rule == "bad"));
    }

    #[test]
    fn test_rejects_duplicate_regression_names() {
        let yaml = "name: x\nprompts:\n  - text: hi\nscoring:\n  regressions:\n    - {name: a, pattern: foo}\n    - {name: a, pattern: bar}\n";
        let err = Scenario::from_yaml_str(yaml, "x").unwrap_err();
        assert!(matches!(err, ScenarioError::DuplicateName { .. }));
    }

    #[test]
    fn test_rejects_duplicate_skills() {
        let yaml = "name: x\nprompts:\n  - text: hi\nscoring:\n  must_invoke_skills: [deploy, lint, deploy]\n";
        let err = Scenario::from_yaml_str(yaml, "x").unwrap_err();
        assert!(matches!(
            err,
            ScenarioError::DuplicateName { kind: "skill", ref name, .. } if name == "deploy"
        ));
    }

    #[test]
    fn test_rejects_step_without_selector() {
        let yaml = "name: x\nprompts:\n  - text: hi\nverification:\n  - {name: c, action: click}\n";
        let err = Scenario::from_yaml_str(yaml, "x").unwrap_err();
        assert!(matches!(
            err,
            ScenarioError::MissingStepParameter { param: "selector", .. }
        ));
    }

    #[test]
    fn test_parse_duration_forms() {
        assert_eq!(parse_duration("90s").unwrap(), Duration::from_secs(90));
        assert_eq!(parse_duration("15m").unwrap(), Duration::from_secs(900));
        assert_eq!(parse_duration("1h30m").unwrap(), Duration::from_secs(5400));
        assert_eq!(parse_duration("120").unwrap(), Duration::from_secs(120));
        assert!(parse_duration("").is_err());
        assert!(parse_duration("10x").is_err());
        assert!(parse_duration("5m3").is_err());
    }

    #[test]
    fn test_parse_duration_overflow() {
        assert!(matches!(
            parse_duration("9999999999999999999h"),
            Err(ScenarioError::InvalidDuration(_))
        ));
        assert!(parse_duration("18446744073709551615s1s").is_err());
    }

    #[test]
    fn test_format_duration() {
        assert_eq!(format_duration(Duration::from_secs(5400)), "1h30m");
        assert_eq!(format_duration(Duration::from_secs(45)), "45s");
        assert_eq!(format_duration(Duration::ZERO), "0s");
    }

    #[test]
    fn test_load_and_discover() {
        let temp = TempDir::new().unwrap();
        fs::write(temp.path().join("b.yaml"), SAMPLE).unwrap();
        fs::write(temp.path().join("a.yml"), "name: a\nprompts:\n  - text: hi\n").unwrap();
        fs::write(temp.path().join("notes.txt"), "ignored").unwrap();

        let found = discover_scenarios(temp.path()).unwrap();
        assert_eq!(found.len(), 2);
        assert!(found[0].ends_with("a.yml"));

        let scenario = Scenario::load(&found[1]).unwrap();
        assert_eq!(scenario.name, "web-app");
    }
}
