//! How the opaque agent executable is invoked.

use std::path::Path;
use std::process::Stdio;

use serde::{Deserialize, Serialize};
use tokio::process::Command;

/// Default flag used to pass the prompt text.
pub const DEFAULT_PROMPT_FLAG: &str = "-p";

/// Default flag that asks the agent to continue its previous session.
pub const DEFAULT_RESUME_FLAG: &str = "--continue";

/// Command line template for the agent process.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentCommand {
    /// Executable name or path.
    pub program: String,
    /// Fixed arguments placed before the prompt.
    pub args: Vec<String>,
    /// Flag preceding the prompt text; `None` passes the prompt positionally.
    pub prompt_flag: Option<String>,
    /// Flag added for every prompt after the first; `None` disables it.
    pub resume_flag: Option<String>,
    /// Extra environment variables.
    pub env: Vec<(String, String)>,
}

impl AgentCommand {
    /// Creates a command template with the default prompt and resume flags.
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            prompt_flag: Some(DEFAULT_PROMPT_FLAG.to_string()),
            resume_flag: Some(DEFAULT_RESUME_FLAG.to_string()),
            env: Vec::new(),
        }
    }

    /// Adds a fixed argument.
    pub fn with_arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    /// Replaces the fixed arguments.
    pub fn with_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args = args.into_iter().map(Into::into).collect();
        self
    }

    /// Sets the prompt flag (`None` for a positional prompt).
    pub fn with_prompt_flag(mut self, flag: Option<String>) -> Self {
        self.prompt_flag = flag;
        self
    }

    /// Sets the resume flag (`None` to never pass one).
    pub fn with_resume_flag(mut self, flag: Option<String>) -> Self {
        self.resume_flag = flag;
        self
    }

    /// Adds an environment variable.
    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }

    /// Argument vector for one prompt.
    pub fn arguments(&self, prompt: &str, is_resumption: bool) -> Vec<String> {
        let mut argv = self.args.clone();
        if is_resumption {
            if let Some(flag) = &self.resume_flag {
                argv.push(flag.clone());
            }
        }
        if let Some(flag) = &self.prompt_flag {
            argv.push(flag.clone());
        }
        argv.push(prompt.to_string());
        argv
    }

    /// Builds the process for one prompt, with piped console streams and no stdin.
    pub fn command(&self, prompt: &str, is_resumption: bool, cwd: &Path) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.args(self.arguments(prompt, is_resumption))
            .current_dir(cwd)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        for (key, value) in &self.env {
            cmd.env(key, value);
        }

        cmd
    }
}

impl std::fmt::Display for AgentCommand {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.program)?;
        for arg in &self.args {
            write!(f, " {}", arg)?;
        }
        Ok(())
    }
}
