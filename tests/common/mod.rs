//! Shared fixtures for the integration tests: a scratch layout and a fake
//! agent implemented as a POSIX shell script.

#![allow(dead_code)]

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use scenario_harness::config::HarnessConfig;
use scenario_harness::scenario::Scenario;
use tempfile::TempDir;

/// Sets up (or resumes) a session directory and defines an `event` helper
/// that appends `{"type", "timestamp", "data"}` lines to its event log.
///
/// The script sees the harness's argument vector: `--continue` first on
/// resumed prompts, then `-p <prompt>`.
const AGENT_PRELUDE: &str = r#"#!/bin/sh
SESSION_ROOT='@SESSION_ROOT@'
ARGS_LOG='@ARGS_LOG@'
printf '%s\n' "$*" >> "$ARGS_LOG"
DIR=''
if [ "$1" = "--continue" ]; then
  DIR=$(ls -td "$SESSION_ROOT"/*/ 2>/dev/null | head -n 1)
fi
if [ -z "$DIR" ]; then
  DIR="$SESSION_ROOT/session-$$"
  mkdir -p "$DIR"
fi
LOG="$DIR/events.jsonl"
event() {
  printf '{"type":"%s","timestamp":"%s","data":%s}\n' "$1" "$(date -u +%Y-%m-%dT%H:%M:%SZ)" "$2" >> "$LOG"
}
"#;

/// Scratch directories for one test.
pub struct Sandbox {
    pub temp: TempDir,
    pub session_root: PathBuf,
    pub work_root: PathBuf,
    pub db_path: PathBuf,
    pub args_log: PathBuf,
    pub agent: PathBuf,
}

impl Sandbox {
    /// Creates the layout and writes an agent whose behavior is `body`.
    pub fn new(body: &str) -> Self {
        let temp = TempDir::new().unwrap();
        let session_root = temp.path().join("sessions");
        let work_root = temp.path().join("work");
        fs::create_dir_all(&session_root).unwrap();
        fs::create_dir_all(&work_root).unwrap();

        let args_log = temp.path().join("agent-args.log");
        let agent = temp.path().join("fake-agent.sh");
        let script = AGENT_PRELUDE
            .replace("@SESSION_ROOT@", &session_root.to_string_lossy())
            .replace("@ARGS_LOG@", &args_log.to_string_lossy())
            + body;
        fs::write(&agent, script).unwrap();

        Self {
            db_path: temp.path().join("runs.db"),
            temp,
            session_root,
            work_root,
            args_log,
            agent,
        }
    }

    /// Configuration pointing the harness at the fake agent and scratch dirs.
    pub fn config(&self) -> HarnessConfig {
        let mut config = HarnessConfig::default()
            .with_agent_bin("sh")
            .with_session_root(&self.session_root)
            .with_work_root(&self.work_root)
            .with_db_path(&self.db_path);
        config.agent_args = vec![self.agent.to_string_lossy().to_string()];
        config.echo_output = false;
        config.poll_interval = Duration::from_millis(50);
        config.idle_timeout = Duration::from_secs(10);
        config.prompt_timeout = Duration::from_secs(30);
        config
    }

    /// Everything the agent was invoked with, one invocation per line.
    pub fn args_log(&self) -> String {
        fs::read_to_string(&self.args_log).unwrap_or_default()
    }

    pub fn path(&self) -> &Path {
        self.temp.path()
    }
}

pub fn scenario(yaml: &str) -> Scenario {
    Scenario::from_yaml_str(yaml, "test.yaml").unwrap()
}
