//! Harness configuration.
//!
//! Defaults, overridden by `HARNESS_*` environment variables, overridden in
//! turn by CLI flags. Component configs ([`RunnerConfig`], [`AgentCommand`])
//! are derived from the result.

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

use crate::analyzer::AnalyzerConfig;
use crate::runner::config::{
    DEFAULT_IDLE_TIMEOUT, DEFAULT_POLL_INTERVAL, DEFAULT_PROMPT_TIMEOUT, DEFAULT_STUCK_LINE_MAX,
    DEFAULT_STUCK_REPEAT,
};
use crate::runner::{default_session_root, AgentCommand, RunnerConfig};

/// Default improvement iterations.
pub const DEFAULT_MAX_ITERATIONS: u32 = 3;
/// Default run store location.
pub const DEFAULT_DB_PATH: &str = "./harness-runs.db";
/// Default agent executable.
pub const DEFAULT_AGENT_BIN: &str = "copilot";

/// Errors that can occur during configuration operations.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// An environment variable has an invalid value.
    #[error("Invalid value for {key}: {message}")]
    InvalidValue { key: String, message: String },

    /// Configuration validation failed.
    #[error("Configuration validation failed: {0}")]
    ValidationFailed(String),
}

/// Configuration for the whole harness.
#[derive(Debug, Clone)]
pub struct HarnessConfig {
    // Agent process
    /// Agent executable.
    pub agent_bin: String,
    /// Arguments placed before the prompt.
    pub agent_args: Vec<String>,
    /// Flag preceding the prompt text; `None` passes the prompt positionally.
    pub prompt_flag: Option<String>,
    /// Flag that continues the previous session.
    pub resume_flag: Option<String>,

    // Runner
    /// Directory the agent writes session directories into.
    pub session_root: PathBuf,
    /// Parent of per-execution working directories.
    pub work_root: PathBuf,
    pub idle_timeout: Duration,
    pub prompt_timeout: Duration,
    pub stuck_repeat: usize,
    pub stuck_line_max: usize,
    pub poll_interval: Duration,
    /// Relay agent console output to stdout.
    pub echo_output: bool,

    // Analysis
    /// Override for the deploy command pattern.
    pub deploy_pattern: Option<String>,
    /// Override for the infrastructure path pattern.
    pub infra_pattern: Option<String>,

    // Storage
    pub db_path: PathBuf,
    /// Source revision recorded on each run.
    pub revision: Option<String>,

    // Verification
    /// W3C WebDriver server; element steps fail without one.
    pub webdriver_url: Option<String>,
    /// Command printing `KEY=VALUE` environment values of the deployment.
    pub endpoint_command: Option<String>,

    // Improvement loop
    pub max_iterations: u32,
    /// Command that rebuilds the agent after its assets change.
    pub rebuild_command: Option<String>,
    /// The agent's instruction/skill assets directory.
    pub assets_dir: Option<PathBuf>,
}

impl Default for HarnessConfig {
    fn default() -> Self {
        Self {
            agent_bin: DEFAULT_AGENT_BIN.to_string(),
            agent_args: Vec::new(),
            prompt_flag: Some(crate::runner::agent::DEFAULT_PROMPT_FLAG.to_string()),
            resume_flag: Some(crate::runner::agent::DEFAULT_RESUME_FLAG.to_string()),

            session_root: default_session_root(),
            work_root: std::env::temp_dir().join("scenario-harness"),
            idle_timeout: DEFAULT_IDLE_TIMEOUT,
            prompt_timeout: DEFAULT_PROMPT_TIMEOUT,
            stuck_repeat: DEFAULT_STUCK_REPEAT,
            stuck_line_max: DEFAULT_STUCK_LINE_MAX,
            poll_interval: DEFAULT_POLL_INTERVAL,
            echo_output: true,

            deploy_pattern: None,
            infra_pattern: None,

            db_path: PathBuf::from(DEFAULT_DB_PATH),
            revision: None,

            webdriver_url: None,
            endpoint_command: None,

            max_iterations: DEFAULT_MAX_ITERATIONS,
            rebuild_command: None,
            assets_dir: None,
        }
    }
}

impl HarnessConfig {
    /// Creates a new configuration with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates configuration from environment variables.
    ///
    /// # Environment Variables
    ///
    /// - `HARNESS_AGENT_BIN`: agent executable (default: copilot)
    /// - `HARNESS_AGENT_ARGS`: whitespace-separated leading arguments
    /// - `HARNESS_PROMPT_FLAG`: prompt flag, empty for positional (default: -p)
    /// - `HARNESS_RESUME_FLAG`: resume flag, empty for none (default: --continue)
    /// - `HARNESS_SESSION_DIR`: session-state directory (default: ~/.agent/session-state)
    /// - `HARNESS_WORK_ROOT`: parent of execution directories
    /// - `HARNESS_DB_PATH`: SQLite file (default: ./harness-runs.db)
    /// - `HARNESS_IDLE_TIMEOUT_SECS`: idle timeout (default: 180)
    /// - `HARNESS_PROMPT_TIMEOUT_SECS`: per-prompt timeout (default: 900)
    /// - `HARNESS_STUCK_REPEAT`: stuck-loop repeat threshold (default: 5)
    /// - `HARNESS_STUCK_LINE_MAX`: stuck-loop line length threshold (default: 80)
    /// - `HARNESS_POLL_INTERVAL_MS`: event log poll interval (default: 500)
    /// - `HARNESS_ECHO_OUTPUT`: relay agent output to stdout (default: true)
    /// - `HARNESS_DEPLOY_PATTERN` / `HARNESS_INFRA_PATTERN`: classifier overrides
    /// - `HARNESS_REVISION`: revision tag stored on runs
    /// - `HARNESS_WEBDRIVER_URL`: WebDriver server for verification
    /// - `HARNESS_ENDPOINT_COMMAND`: endpoint discovery command
    /// - `HARNESS_MAX_ITERATIONS`: improvement iterations (default: 3)
    /// - `HARNESS_REBUILD_COMMAND`: agent rebuild command
    /// - `HARNESS_ASSETS_DIR`: agent instruction/skill assets directory
    pub fn from_env() -> Result<Self, ConfigError> {
        let config = Self::default().apply_env(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    /// Applies overrides from `lookup`, a variable-name → value source.
    pub fn apply_env<F>(mut self, lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(val) = lookup("HARNESS_AGENT_BIN") {
            self.agent_bin = val;
        }
        if let Some(val) = lookup("HARNESS_AGENT_ARGS") {
            self.agent_args = val.split_whitespace().map(str::to_string).collect();
        }
        if let Some(val) = lookup("HARNESS_PROMPT_FLAG") {
            self.prompt_flag = non_empty(val);
        }
        if let Some(val) = lookup("HARNESS_RESUME_FLAG") {
            self.resume_flag = non_empty(val);
        }

        if let Some(val) = lookup("HARNESS_SESSION_DIR") {
            self.session_root = PathBuf::from(val);
        }
        if let Some(val) = lookup("HARNESS_WORK_ROOT") {
            self.work_root = PathBuf::from(val);
        }
        if let Some(val) = lookup("HARNESS_IDLE_TIMEOUT_SECS") {
            self.idle_timeout =
                Duration::from_secs(parse_env_value(&val, "HARNESS_IDLE_TIMEOUT_SECS")?);
        }
        if let Some(val) = lookup("HARNESS_PROMPT_TIMEOUT_SECS") {
            self.prompt_timeout =
                Duration::from_secs(parse_env_value(&val, "HARNESS_PROMPT_TIMEOUT_SECS")?);
        }
        if let Some(val) = lookup("HARNESS_STUCK_REPEAT") {
            self.stuck_repeat = parse_env_value(&val, "HARNESS_STUCK_REPEAT")?;
        }
        if let Some(val) = lookup("HARNESS_STUCK_LINE_MAX") {
            self.stuck_line_max = parse_env_value(&val, "HARNESS_STUCK_LINE_MAX")?;
        }
        if let Some(val) = lookup("HARNESS_POLL_INTERVAL_MS") {
            self.poll_interval =
                Duration::from_millis(parse_env_value(&val, "HARNESS_POLL_INTERVAL_MS")?);
        }
        if let Some(val) = lookup("HARNESS_ECHO_OUTPUT") {
            self.echo_output = parse_env_bool(&val, "HARNESS_ECHO_OUTPUT")?;
        }

        if let Some(val) = lookup("HARNESS_DEPLOY_PATTERN") {
            self.deploy_pattern = non_empty(val);
        }
        if let Some(val) = lookup("HARNESS_INFRA_PATTERN") {
            self.infra_pattern = non_empty(val);
        }

        if let Some(val) = lookup("HARNESS_DB_PATH") {
            self.db_path = PathBuf::from(val);
        }
        if let Some(val) = lookup("HARNESS_REVISION") {
            self.revision = non_empty(val);
        }

        if let Some(val) = lookup("HARNESS_WEBDRIVER_URL") {
            self.webdriver_url = non_empty(val);
        }
        if let Some(val) = lookup("HARNESS_ENDPOINT_COMMAND") {
            self.endpoint_command = non_empty(val);
        }

        if let Some(val) = lookup("HARNESS_MAX_ITERATIONS") {
            self.max_iterations = parse_env_value(&val, "HARNESS_MAX_ITERATIONS")?;
        }
        if let Some(val) = lookup("HARNESS_REBUILD_COMMAND") {
            self.rebuild_command = non_empty(val);
        }
        if let Some(val) = lookup("HARNESS_ASSETS_DIR") {
            self.assets_dir = non_empty(val).map(PathBuf::from);
        }

        Ok(self)
    }

    /// Validates the configuration values.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.agent_bin.trim().is_empty() {
            return Err(ConfigError::ValidationFailed(
                "agent_bin cannot be empty".to_string(),
            ));
        }

        if self.idle_timeout.is_zero() {
            return Err(ConfigError::ValidationFailed(
                "idle_timeout must be greater than 0".to_string(),
            ));
        }

        if self.prompt_timeout.is_zero() {
            return Err(ConfigError::ValidationFailed(
                "prompt_timeout must be greater than 0".to_string(),
            ));
        }

        if self.stuck_repeat < 2 {
            return Err(ConfigError::ValidationFailed(
                "stuck_repeat must be at least 2".to_string(),
            ));
        }

        if self.stuck_line_max == 0 {
            return Err(ConfigError::ValidationFailed(
                "stuck_line_max must be greater than 0".to_string(),
            ));
        }

        if self.poll_interval.is_zero() {
            return Err(ConfigError::ValidationFailed(
                "poll_interval must be greater than 0".to_string(),
            ));
        }

        if self.max_iterations == 0 {
            return Err(ConfigError::ValidationFailed(
                "max_iterations must be greater than 0".to_string(),
            ));
        }

        if self.db_path.as_os_str().is_empty() {
            return Err(ConfigError::ValidationFailed(
                "db_path cannot be empty".to_string(),
            ));
        }

        Ok(())
    }

    /// Agent invocation template.
    pub fn agent_command(&self) -> AgentCommand {
        AgentCommand::new(&self.agent_bin)
            .with_args(self.agent_args.iter().cloned())
            .with_prompt_flag(self.prompt_flag.clone())
            .with_resume_flag(self.resume_flag.clone())
    }

    /// Runner configuration derived from these settings.
    pub fn runner_config(&self) -> RunnerConfig {
        RunnerConfig::new(self.agent_command())
            .with_session_root(&self.session_root)
            .with_work_root(&self.work_root)
            .with_idle_timeout(self.idle_timeout)
            .with_prompt_timeout(self.prompt_timeout)
            .with_stuck_repeat(self.stuck_repeat)
            .with_stuck_line_max(self.stuck_line_max)
            .with_poll_interval(self.poll_interval)
            .with_echo(self.echo_output)
    }

    /// Analyzer configuration derived from these settings.
    pub fn analyzer_config(&self) -> AnalyzerConfig {
        let mut config = AnalyzerConfig::default();
        if let Some(pattern) = &self.deploy_pattern {
            config = config.with_deploy_pattern(pattern.clone());
        }
        if let Some(pattern) = &self.infra_pattern {
            config = config.with_infra_pattern(pattern.clone());
        }
        config
    }

    /// Builder method to set the agent executable.
    pub fn with_agent_bin(mut self, bin: impl Into<String>) -> Self {
        self.agent_bin = bin.into();
        self
    }

    /// Builder method to set the session-state directory.
    pub fn with_session_root(mut self, dir: impl Into<PathBuf>) -> Self {
        self.session_root = dir.into();
        self
    }

    /// Builder method to set the working-directory root.
    pub fn with_work_root(mut self, dir: impl Into<PathBuf>) -> Self {
        self.work_root = dir.into();
        self
    }

    /// Builder method to set the database path.
    pub fn with_db_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.db_path = path.into();
        self
    }

    /// Builder method to set the revision tag.
    pub fn with_revision(mut self, revision: Option<String>) -> Self {
        self.revision = revision;
        self
    }

    /// Builder method to set the improvement iteration bound.
    pub fn with_max_iterations(mut self, iterations: u32) -> Self {
        self.max_iterations = iterations;
        self
    }
}

fn non_empty(value: String) -> Option<String> {
    if value.trim().is_empty() {
        None
    } else {
        Some(value)
    }
}

/// Parse an environment variable value.
fn parse_env_value<T: std::str::FromStr>(value: &str, key: &str) -> Result<T, ConfigError> {
    value.trim().parse().map_err(|_| ConfigError::InvalidValue {
        key: key.to_string(),
        message: format!("could not parse '{}'", value),
    })
}

/// Parse an environment variable as a boolean.
fn parse_env_bool(value: &str, key: &str) -> Result<bool, ConfigError> {
    match value.to_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Ok(true),
        "false" | "0" | "no" | "off" => Ok(false),
        _ => Err(ConfigError::InvalidValue {
            key: key.to_string(),
            message: format!("expected boolean value, got '{}'", value),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_default_config() {
        let config = HarnessConfig::default();
        assert_eq!(config.idle_timeout, Duration::from_secs(180));
        assert_eq!(config.prompt_timeout, Duration::from_secs(900));
        assert_eq!(config.stuck_repeat, 5);
        assert_eq!(config.stuck_line_max, 80);
        assert_eq!(config.max_iterations, 3);
        assert_eq!(config.db_path, PathBuf::from("./harness-runs.db"));
        assert!(config.session_root.ends_with(".agent/session-state"));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_apply_env_overrides() {
        let config = HarnessConfig::default()
            .apply_env(env(&[
                ("HARNESS_AGENT_BIN", "/opt/agent"),
                ("HARNESS_AGENT_ARGS", "--yolo  --model x"),
                ("HARNESS_PROMPT_FLAG", ""),
                ("HARNESS_IDLE_TIMEOUT_SECS", "30"),
                ("HARNESS_STUCK_REPEAT", "3"),
                ("HARNESS_ECHO_OUTPUT", "off"),
                ("HARNESS_REVISION", "abc123"),
                ("HARNESS_ASSETS_DIR", "/opt/agent/assets"),
            ]))
            .unwrap();

        assert_eq!(config.agent_bin, "/opt/agent");
        assert_eq!(config.agent_args, vec!["--yolo", "--model", "x"]);
        assert_eq!(config.prompt_flag, None);
        assert_eq!(config.resume_flag.as_deref(), Some("--continue"));
        assert_eq!(config.idle_timeout, Duration::from_secs(30));
        assert_eq!(config.stuck_repeat, 3);
        assert!(!config.echo_output);
        assert_eq!(config.revision.as_deref(), Some("abc123"));
        assert_eq!(config.assets_dir, Some(PathBuf::from("/opt/agent/assets")));
    }

    #[test]
    fn test_apply_env_invalid_number() {
        let err = HarnessConfig::default()
            .apply_env(env(&[("HARNESS_PROMPT_TIMEOUT_SECS", "soon")]))
            .unwrap_err();
        assert!(err.to_string().contains("HARNESS_PROMPT_TIMEOUT_SECS"));
    }

    #[test]
    fn test_validation_failures() {
        let mut config = HarnessConfig::default();
        config.stuck_repeat = 1;
        assert!(config.validate().is_err());

        let config = HarnessConfig::default().with_max_iterations(0);
        assert!(config.validate().is_err());

        let config = HarnessConfig::default().with_agent_bin(" ");
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_runner_config_derivation() {
        let config = HarnessConfig::default()
            .with_agent_bin("agent")
            .with_work_root("/tmp/w");
        let runner = config.runner_config();
        assert_eq!(runner.agent.program, "agent");
        assert_eq!(runner.work_root, PathBuf::from("/tmp/w"));
        assert_eq!(runner.idle_timeout, config.idle_timeout);
    }

    #[test]
    fn test_parse_env_bool() {
        assert!(parse_env_bool("yes", "K").unwrap());
        assert!(!parse_env_bool("0", "K").unwrap());
        assert!(parse_env_bool("maybe", "K").is_err());
    }
}
