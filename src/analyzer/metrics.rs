//! Behavioral metrics extracted from one agent session.

use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::time::Duration;

use chrono::{DateTime, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::events::{AgentEvent, EventKind};
use super::run::RegressionResult;
use crate::error::AnalyzerError;
use crate::scenario::RegressionRule;

/// Default pattern identifying a deploy-style shell command.
pub const DEFAULT_DEPLOY_PATTERN: &str = r"\b(azd (up|deploy)|deploy)\b";
/// Default pattern identifying an infrastructure file path.
pub const DEFAULT_INFRA_PATTERN: &str = r"\.(bicep|tf|tfvars)$|(^|/)infra/";

const URL_PATTERN: &str = r#"https://[^\s"'<>()\[\]{}`]+"#;

/// How tool calls are classified into the scored action counts.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalyzerConfig {
    /// Tools that run shell commands.
    pub shell_tools: Vec<String>,
    /// Tools that write files.
    pub edit_tools: Vec<String>,
    /// Tools that hand work to a sub-agent.
    pub delegation_tools: Vec<String>,
    /// Tools that invoke a named skill.
    pub skill_tools: Vec<String>,
    /// Regex over a shell command marking it as a deploy call.
    pub deploy_pattern: String,
    /// Regex over an edited path marking it as an infrastructure edit.
    pub infra_pattern: String,
}

impl Default for AnalyzerConfig {
    fn default() -> Self {
        let list = |items: &[&str]| -> Vec<String> {
            items.iter().map(|s| s.to_string()).collect()
        };
        Self {
            shell_tools: list(&["bash", "shell", "powershell"]),
            edit_tools: list(&["edit", "create", "write", "str_replace_editor"]),
            delegation_tools: list(&["task"]),
            skill_tools: list(&["skill"]),
            deploy_pattern: DEFAULT_DEPLOY_PATTERN.to_string(),
            infra_pattern: DEFAULT_INFRA_PATTERN.to_string(),
        }
    }
}

impl AnalyzerConfig {
    /// Sets the deploy command pattern.
    pub fn with_deploy_pattern(mut self, pattern: impl Into<String>) -> Self {
        self.deploy_pattern = pattern.into();
        self
    }

    /// Sets the infrastructure path pattern.
    pub fn with_infra_pattern(mut self, pattern: impl Into<String>) -> Self {
        self.infra_pattern = pattern.into();
        self
    }
}

/// Compiled form of [`AnalyzerConfig`].
#[derive(Debug, Clone)]
pub struct Classifier {
    config: AnalyzerConfig,
    deploy: Regex,
    infra: Regex,
    url: Regex,
}

impl Classifier {
    pub fn new(config: AnalyzerConfig) -> Result<Self, AnalyzerError> {
        let compile = |pattern: &str| {
            Regex::new(pattern).map_err(|e| AnalyzerError::InvalidPattern {
                pattern: pattern.to_string(),
                message: e.to_string(),
            })
        };
        Ok(Self {
            deploy: compile(&config.deploy_pattern)?,
            infra: compile(&config.infra_pattern)?,
            url: compile(URL_PATTERN)?,
            config,
        })
    }

    fn is_shell(&self, tool: &str) -> bool {
        contains_tool(&self.config.shell_tools, tool)
    }

    fn is_edit(&self, tool: &str) -> bool {
        contains_tool(&self.config.edit_tools, tool)
    }

    fn is_delegation(&self, tool: &str) -> bool {
        contains_tool(&self.config.delegation_tools, tool)
    }

    fn is_skill(&self, tool: &str) -> bool {
        contains_tool(&self.config.skill_tools, tool)
    }

    /// Whether a shell command is a deploy call.
    pub fn is_deploy_command(&self, command: &str) -> bool {
        self.deploy.is_match(command)
    }

    /// Whether a path is an infrastructure file.
    pub fn is_infra_path(&self, path: &str) -> bool {
        self.infra.is_match(&path.replace('\\', "/"))
    }

    /// HTTPS URLs mentioned in `text`, trailing punctuation removed.
    pub fn urls(&self, text: &str) -> Vec<String> {
        self.url
            .find_iter(text)
            .map(|m| m.as_str().trim_end_matches(['.', ',', ';', ':']).to_string())
            .collect()
    }
}

fn contains_tool(tools: &[String], tool: &str) -> bool {
    tools.iter().any(|t| t.eq_ignore_ascii_case(tool))
}

/// Quantities derived from a session's event log.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SessionMetrics {
    /// Session id announced by the agent, if any.
    pub session_id: Option<String>,
    /// First event timestamp.
    pub first_event_at: Option<DateTime<Utc>>,
    /// Last event timestamp.
    pub last_event_at: Option<DateTime<Utc>>,
    /// Number of agent turns.
    pub turns: u32,
    /// Number of deploy-style shell calls.
    pub deploy_calls: u32,
    /// Number of infrastructure-file edits.
    pub infra_edits: u32,
    /// Whether any sub-agent delegation happened.
    pub delegated: bool,
    /// Whether a deploy call completed successfully.
    pub deployed: bool,
    /// Skills invoked, by name.
    pub skills_invoked: BTreeSet<String>,
    /// HTTPS URLs seen in deploy results, in order of appearance.
    pub endpoints: Vec<String>,
    /// Whether the completion marker was logged.
    pub task_completed: bool,
    /// Concatenated assistant messages.
    pub assistant_text: String,
    /// Events parsed.
    pub events: usize,
    /// Malformed lines skipped.
    pub skipped_lines: usize,
}

impl SessionMetrics {
    /// Elapsed time between the first and last timestamped events.
    pub fn duration(&self) -> Option<Duration> {
        let (first, last) = (self.first_event_at?, self.last_event_at?);
        (last - first).to_std().ok()
    }
}

/// Single-pass accumulator turning events into [`SessionMetrics`].
pub struct MetricsExtractor<'a> {
    classifier: &'a Classifier,
    metrics: SessionMetrics,
    pending_deploys: HashSet<String>,
}

impl<'a> MetricsExtractor<'a> {
    pub fn new(classifier: &'a Classifier) -> Self {
        Self {
            classifier,
            metrics: SessionMetrics::default(),
            pending_deploys: HashSet::new(),
        }
    }

    /// Feeds one event.
    pub fn observe(&mut self, event: &AgentEvent) {
        if let Some(ts) = event.time() {
            let m = &mut self.metrics;
            m.first_event_at = Some(m.first_event_at.map_or(ts, |f| f.min(ts)));
            m.last_event_at = Some(m.last_event_at.map_or(ts, |l| l.max(ts)));
        }

        match event.kind() {
            EventKind::SessionStart => {
                if let Some(id) = event.data_str("sessionId") {
                    self.metrics.session_id = Some(id.to_string());
                }
            }
            EventKind::TurnStart => self.metrics.turns += 1,
            EventKind::AssistantMessage => {
                if let Some(content) = event.data_str("content") {
                    self.metrics.assistant_text.push_str(content);
                    self.metrics.assistant_text.push('\n');
                }
            }
            EventKind::ToolStart => self.observe_tool_start(event),
            EventKind::ToolComplete => self.observe_tool_complete(event),
            EventKind::SubagentStarted => self.metrics.delegated = true,
            EventKind::SkillInvoked => {
                if let Some(name) = event.data_str("name").or_else(|| event.data_str("skill")) {
                    self.metrics.skills_invoked.insert(name.to_string());
                }
            }
            EventKind::TaskComplete => self.metrics.task_completed = true,
            EventKind::Other => {}
        }
    }

    fn observe_tool_start(&mut self, event: &AgentEvent) {
        let Some(tool) = event.data_str("toolName") else {
            return;
        };
        let args = event.arguments();
        let arg = |key: &str| args.get(key).and_then(Value::as_str);

        if self.classifier.is_shell(tool) {
            if let Some(command) = arg("command") {
                if self.classifier.is_deploy_command(command) {
                    self.metrics.deploy_calls += 1;
                    if let Some(id) = event.data_str("toolCallId") {
                        self.pending_deploys.insert(id.to_string());
                    }
                }
            }
        } else if self.classifier.is_edit(tool) {
            let path = arg("path").or_else(|| arg("file_path"));
            if path.is_some_and(|p| self.classifier.is_infra_path(p)) {
                self.metrics.infra_edits += 1;
            }
        } else if self.classifier.is_delegation(tool) {
            self.metrics.delegated = true;
        } else if self.classifier.is_skill(tool) {
            if let Some(name) = arg("skill").or_else(|| arg("name")) {
                self.metrics.skills_invoked.insert(name.to_string());
            }
        }
    }

    fn observe_tool_complete(&mut self, event: &AgentEvent) {
        let Some(id) = event.data_str("toolCallId") else {
            return;
        };
        if !self.pending_deploys.remove(id) {
            return;
        }

        let success = event
            .data
            .get("success")
            .and_then(Value::as_bool)
            .unwrap_or(false);
        if success {
            self.metrics.deployed = true;
        }

        if let Some(text) = event.result_text() {
            for url in self.classifier.urls(text) {
                if !self.metrics.endpoints.contains(&url) {
                    self.metrics.endpoints.push(url);
                }
            }
        }
    }

    /// Finishes the pass.
    pub fn finish(self) -> SessionMetrics {
        self.metrics
    }
}

/// Counts matches of every rule across `text`.
pub fn count_regressions(
    rules: &[RegressionRule],
    text: &str,
) -> Result<BTreeMap<String, RegressionResult>, AnalyzerError> {
    let mut results = BTreeMap::new();
    for rule in rules {
        let pattern = rule.compile()?;
        let occurrences = pattern.find_iter(text).count() as u32;
        results.insert(
            rule.name.clone(),
            RegressionResult::new(occurrences, rule.max_occurrences),
        );
    }
    Ok(results)
}
