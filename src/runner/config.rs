//! Configuration for scenario execution.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::agent::AgentCommand;

/// Default console silence tolerated before the agent is considered idle.
pub const DEFAULT_IDLE_TIMEOUT: Duration = Duration::from_secs(180);
/// Default hard ceiling on a single prompt.
pub const DEFAULT_PROMPT_TIMEOUT: Duration = Duration::from_secs(900);
/// Default number of identical consecutive short lines that counts as a loop.
pub const DEFAULT_STUCK_REPEAT: usize = 5;
/// Lines with at least this many characters reset the loop counter.
pub const DEFAULT_STUCK_LINE_MAX: usize = 80;
/// Default event log polling interval.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(500);

/// Returns `$HOME/.agent/session-state`, or a relative fallback without a home directory.
pub fn default_session_root() -> PathBuf {
    dirs::home_dir()
        .map(|home| home.join(".agent").join("session-state"))
        .unwrap_or_else(|| PathBuf::from(".agent/session-state"))
}

/// Configuration for running a scenario against the agent process.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunnerConfig {
    /// How to invoke the agent.
    pub agent: AgentCommand,
    /// Directory holding one subdirectory per agent session.
    pub session_root: PathBuf,
    /// Parent of the per-execution working directories.
    pub work_root: PathBuf,
    /// Console silence tolerated before the process is killed.
    pub idle_timeout: Duration,
    /// Hard ceiling on a single prompt.
    pub prompt_timeout: Duration,
    /// Consecutive identical short lines that trigger stuck-loop detection.
    pub stuck_repeat: usize,
    /// Length (in characters) at which a line stops counting as short.
    pub stuck_line_max: usize,
    /// Event log polling interval.
    pub poll_interval: Duration,
    /// Whether agent output is echoed to the harness's own stdout.
    pub echo_output: bool,
}

impl RunnerConfig {
    /// Creates a configuration with defaults for the given agent.
    pub fn new(agent: AgentCommand) -> Self {
        Self {
            agent,
            session_root: default_session_root(),
            work_root: std::env::temp_dir().join("scenario-harness"),
            idle_timeout: DEFAULT_IDLE_TIMEOUT,
            prompt_timeout: DEFAULT_PROMPT_TIMEOUT,
            stuck_repeat: DEFAULT_STUCK_REPEAT,
            stuck_line_max: DEFAULT_STUCK_LINE_MAX,
            poll_interval: DEFAULT_POLL_INTERVAL,
            echo_output: true,
        }
    }

    /// Sets the session-state directory.
    pub fn with_session_root(mut self, dir: impl Into<PathBuf>) -> Self {
        self.session_root = dir.into();
        self
    }

    /// Sets the parent of the working directories.
    pub fn with_work_root(mut self, dir: impl Into<PathBuf>) -> Self {
        self.work_root = dir.into();
        self
    }

    /// Sets the idle timeout.
    pub fn with_idle_timeout(mut self, timeout: Duration) -> Self {
        self.idle_timeout = timeout;
        self
    }

    /// Sets the per-prompt timeout.
    pub fn with_prompt_timeout(mut self, timeout: Duration) -> Self {
        self.prompt_timeout = timeout;
        self
    }

    /// Sets the stuck-loop repeat threshold.
    pub fn with_stuck_repeat(mut self, repeat: usize) -> Self {
        self.stuck_repeat = repeat;
        self
    }

    /// Sets the short-line length threshold.
    pub fn with_stuck_line_max(mut self, chars: usize) -> Self {
        self.stuck_line_max = chars;
        self
    }

    /// Sets the event log polling interval.
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Enables or disables echoing agent output.
    pub fn with_echo(mut self, echo: bool) -> Self {
        self.echo_output = echo;
        self
    }
}
