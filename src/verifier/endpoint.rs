//! Deployed endpoint discovery.

use std::path::Path;
use std::process::Stdio;
use std::time::Duration;

use tokio::process::Command;
use tracing::{debug, warn};

const QUERY_TIMEOUT: Duration = Duration::from_secs(60);

/// Key fragments that mark an environment value as the app endpoint.
const ENDPOINT_KEYS: &[&str] = &["URI", "URL", "ENDPOINT"];

/// Finds the URL of whatever the agent deployed.
///
/// Runs an optional environment query command (e.g. `azd env get-values`)
/// in the workspace and picks an `http(s)` value from its `KEY=VALUE`
/// output; falls back to URLs seen in the session's deploy results.
#[derive(Debug, Clone, Default)]
pub struct EndpointResolver {
    command: Option<String>,
    timeout: Option<Duration>,
}

impl EndpointResolver {
    pub fn new(command: Option<String>) -> Self {
        Self {
            command: command.filter(|c| !c.trim().is_empty()),
            timeout: None,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Resolves the endpoint, or `None` when nothing looks like one.
    pub async fn resolve(&self, workspace: &Path, candidates: &[String]) -> Option<String> {
        if let Some(command) = &self.command {
            match self.query(command, workspace).await {
                Ok(output) => {
                    if let Some(url) = pick_endpoint(&parse_env_values(&output)) {
                        debug!(endpoint = %url, "Endpoint resolved from environment query");
                        return Some(url);
                    }
                }
                Err(e) => warn!(command = %command, error = %e, "Endpoint query failed"),
            }
        }

        let fallback = candidates.first().cloned();
        if let Some(url) = &fallback {
            debug!(endpoint = %url, "Endpoint taken from session events");
        }
        fallback
    }

    async fn query(&self, command: &str, workspace: &Path) -> std::io::Result<String> {
        let child = Command::new("sh")
            .arg("-c")
            .arg(command)
            .current_dir(workspace)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()?;

        let output = tokio::time::timeout(
            self.timeout.unwrap_or(QUERY_TIMEOUT),
            child.wait_with_output(),
        )
        .await
        .map_err(|_| std::io::Error::new(std::io::ErrorKind::TimedOut, "query timed out"))??;

        if !output.status.success() {
            return Err(std::io::Error::other(format!(
                "exited with {}",
                output.status
            )));
        }
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

/// Parses `KEY=VALUE` lines, unquoting values. Other lines are ignored.
pub fn parse_env_values(output: &str) -> Vec<(String, String)> {
    output
        .lines()
        .filter_map(|line| {
            let line = line.trim();
            let line = line.strip_prefix("export ").unwrap_or(line);
            let (key, value) = line.split_once('=')?;
            let key = key.trim();
            if key.is_empty() || key.starts_with('#') {
                return None;
            }
            let value = value.trim();
            let value = value
                .strip_prefix('"')
                .and_then(|v| v.strip_suffix('"'))
                .or_else(|| value.strip_prefix('\'').and_then(|v| v.strip_suffix('\'')))
                .unwrap_or(value);
            Some((key.to_string(), value.to_string()))
        })
        .collect()
}

/// First `http(s)` value, preferring keys that name an endpoint.
pub fn pick_endpoint(values: &[(String, String)]) -> Option<String> {
    let is_url = |v: &str| v.starts_with("https://") || v.starts_with("http://");
    let named = |k: &str| {
        let k = k.to_ascii_uppercase();
        ENDPOINT_KEYS.iter().any(|frag| k.contains(frag))
    };

    values
        .iter()
        .find(|(k, v)| named(k) && is_url(v))
        .or_else(|| values.iter().find(|(_, v)| is_url(v)))
        .map(|(_, v)| v.clone())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_env_values() {
        let output = "AZURE_LOCATION=\"eastus\"\n# comment\nexport SERVICE_WEB_URI='https://web.example.net'\ngarbage\nEMPTY=\n";
        let values = parse_env_values(output);
        assert_eq!(
            values,
            vec![
                ("AZURE_LOCATION".to_string(), "eastus".to_string()),
                (
                    "SERVICE_WEB_URI".to_string(),
                    "https://web.example.net".to_string()
                ),
                ("EMPTY".to_string(), String::new()),
            ]
        );
    }

    #[test]
    fn test_pick_prefers_named_keys() {
        let values = vec![
            ("DOCS".to_string(), "https://docs.example.net".to_string()),
            ("API_ENDPOINT".to_string(), "https://api.example.net".to_string()),
        ];
        assert_eq!(
            pick_endpoint(&values).as_deref(),
            Some("https://api.example.net")
        );

        let unnamed = vec![("X".to_string(), "http://x.local".to_string())];
        assert_eq!(pick_endpoint(&unnamed).as_deref(), Some("http://x.local"));
        assert_eq!(pick_endpoint(&[]), None);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_resolve_from_command() {
        let dir = tempfile::TempDir::new().unwrap();
        let resolver =
            EndpointResolver::new(Some("echo 'WEB_URL=https://app.example.net'".to_string()));
        let url = resolver
            .resolve(dir.path(), &["https://fallback.example.net".to_string()])
            .await;
        assert_eq!(url.as_deref(), Some("https://app.example.net"));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_resolve_falls_back_to_candidates() {
        let dir = tempfile::TempDir::new().unwrap();
        let resolver = EndpointResolver::new(Some("exit 3".to_string()));
        let url = resolver
            .resolve(dir.path(), &["https://fallback.example.net".to_string()])
            .await;
        assert_eq!(url.as_deref(), Some("https://fallback.example.net"));

        assert_eq!(EndpointResolver::default().resolve(dir.path(), &[]).await, None);
    }
}
