//! One prompt's process lifecycle: spawn, race the monitors, terminate, join.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::fs::OpenOptions;
use tokio::process::Child;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use super::config::RunnerConfig;
use super::executor::RunnerError;
use super::monitor::{idle_watchdog, watch_event_log, OutputRelay, StuckDetector};
use super::session::EventLogTailer;

/// How long the output relay may keep draining after the process is gone.
const DRAIN_GRACE: Duration = Duration::from_secs(2);
/// How long a stopped monitor may take to finish.
const JOIN_GRACE: Duration = Duration::from_secs(2);
/// Stand-in for deadlines too far away to represent.
const FAR_FUTURE: Duration = Duration::from_secs(86_400 * 365 * 30);

/// `start + limit`, saturating to a far-future instant instead of overflowing.
pub(crate) fn deadline_after(start: Instant, limit: Duration) -> Instant {
    start
        .checked_add(limit)
        .unwrap_or_else(|| start + FAR_FUTURE)
}

/// Why a prompt's agent process stopped.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Termination {
    /// The process exited on its own.
    Exited { code: Option<i32> },
    /// The event log carried the task-complete marker.
    TaskComplete,
    /// The same short console line repeated too many times.
    StuckLoop { line: String, repeats: usize },
    /// No console output for the idle period.
    IdleTimeout { idle: Duration },
    /// The per-prompt ceiling elapsed.
    PromptTimeout { limit: Duration },
    /// The scenario-wide deadline elapsed.
    ScenarioTimeout,
}

impl Termination {
    /// Short stable label, used in metrics and logs.
    pub fn label(&self) -> &'static str {
        match self {
            Termination::Exited { .. } => "exited",
            Termination::TaskComplete => "task_complete",
            Termination::StuckLoop { .. } => "stuck_loop",
            Termination::IdleTimeout { .. } => "idle_timeout",
            Termination::PromptTimeout { .. } => "prompt_timeout",
            Termination::ScenarioTimeout => "scenario_timeout",
        }
    }

    /// True when the prompt finished cleanly: a zero exit or the completion marker.
    pub fn is_clean(&self) -> bool {
        matches!(
            self,
            Termination::Exited { code: Some(0) } | Termination::TaskComplete
        )
    }

    /// True when the harness had to kill the process.
    pub fn was_killed(&self) -> bool {
        !matches!(self, Termination::Exited { .. })
    }
}

impl std::fmt::Display for Termination {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Termination::Exited { code: Some(code) } => write!(f, "exited with code {}", code),
            Termination::Exited { code: None } => write!(f, "exited by signal"),
            Termination::TaskComplete => write!(f, "task complete"),
            Termination::StuckLoop { line, repeats } => {
                write!(f, "stuck loop ({} repeats of {:?})", repeats, line)
            }
            Termination::IdleTimeout { idle } => write!(f, "idle for {:?}", idle),
            Termination::PromptTimeout { limit } => write!(f, "prompt timeout after {:?}", limit),
            Termination::ScenarioTimeout => write!(f, "scenario timeout"),
        }
    }
}

/// Runs one already-spawned agent process until the first termination signal.
///
/// `tailer` must be created before the process is spawned so that nothing the
/// agent appends is mistaken for earlier content. Console output is appended
/// to `transcript`. The process is killed unless it exited on its own, and
/// every monitor task is stopped and joined before returning.
pub async fn supervise(
    mut child: Child,
    tailer: EventLogTailer,
    config: &RunnerConfig,
    transcript: &Path,
    scenario_deadline: Instant,
) -> Result<Termination, RunnerError> {
    let transcript_file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(transcript)
        .await
        .map_err(|source| RunnerError::Transcript {
            path: transcript.to_path_buf(),
            source,
        })?;

    let stdout = child
        .stdout
        .take()
        .ok_or_else(|| RunnerError::Spawn("agent stdout was not captured".to_string()))?;
    let stderr = child
        .stderr
        .take()
        .ok_or_else(|| RunnerError::Spawn("agent stderr was not captured".to_string()))?;

    let (signal_tx, mut signal_rx) = mpsc::channel::<Termination>(4);
    let (stop_tx, stop_rx) = watch::channel(false);
    let (activity_tx, activity_rx) = watch::channel(Instant::now());

    let relay = OutputRelay::new(
        transcript_file,
        config.echo_output,
        StuckDetector::new(config.stuck_repeat, config.stuck_line_max),
        activity_tx,
        signal_tx.clone(),
    );
    let mut relay_handle = tokio::spawn(relay.run(stdout, stderr, stop_rx.clone()));
    let watchdog_handle = tokio::spawn(idle_watchdog(
        config.idle_timeout,
        activity_rx,
        stop_rx.clone(),
        signal_tx.clone(),
    ));
    let tail_handle = tokio::spawn(watch_event_log(
        tailer,
        config.poll_interval,
        stop_rx,
        signal_tx,
    ));

    let prompt_deadline = deadline_after(Instant::now(), config.prompt_timeout);

    let termination = tokio::select! {
        status = child.wait() => match status {
            Ok(status) => Termination::Exited { code: status.code() },
            Err(e) => {
                warn!("Failed to wait for agent process: {}", e);
                Termination::Exited { code: None }
            }
        },
        Some(signal) = signal_rx.recv() => signal,
        _ = tokio::time::sleep_until(prompt_deadline) => Termination::PromptTimeout {
            limit: config.prompt_timeout,
        },
        _ = tokio::time::sleep_until(scenario_deadline) => Termination::ScenarioTimeout,
    };

    if termination.was_killed() {
        info!(reason = %termination, "Killing agent process");
        if let Err(e) = child.kill().await {
            warn!("Failed to kill agent process: {}", e);
        }
    }

    // let the relay drain what the process wrote before exiting
    let drained = tokio::time::timeout(DRAIN_GRACE, &mut relay_handle).await;

    let _ = stop_tx.send(true);
    match drained {
        Ok(Ok(())) => {}
        Ok(Err(e)) => warn!("Monitor output relay failed: {}", e),
        Err(_) => {
            debug!("Output relay still open after grace period, stopping it");
            join_monitor("output relay", relay_handle).await;
        }
    }
    join_monitor("idle watchdog", watchdog_handle).await;
    join_monitor("event log tailer", tail_handle).await;

    Ok(termination)
}

async fn join_monitor(name: &str, mut handle: JoinHandle<()>) {
    match tokio::time::timeout(JOIN_GRACE, &mut handle).await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => warn!("Monitor {} failed: {}", name, e),
        Err(_) => {
            warn!("Monitor {} did not stop in time, aborting it", name);
            handle.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_termination_labels() {
        assert_eq!(Termination::TaskComplete.label(), "task_complete");
        assert_eq!(
            Termination::IdleTimeout {
                idle: Duration::from_secs(1)
            }
            .label(),
            "idle_timeout"
        );
        assert_eq!(Termination::ScenarioTimeout.label(), "scenario_timeout");
    }

    #[test]
    fn test_termination_clean() {
        assert!(Termination::Exited { code: Some(0) }.is_clean());
        assert!(Termination::TaskComplete.is_clean());
        assert!(!Termination::Exited { code: Some(1) }.is_clean());
        assert!(!Termination::StuckLoop {
            line: "x".to_string(),
            repeats: 5
        }
        .is_clean());
    }

    #[test]
    fn test_termination_killed() {
        assert!(!Termination::Exited { code: Some(3) }.was_killed());
        assert!(Termination::PromptTimeout {
            limit: Duration::from_secs(1)
        }
        .was_killed());
    }

    #[test]
    fn test_deadline_after_saturates() {
        let now = Instant::now();
        assert_eq!(deadline_after(now, Duration::from_secs(5)), now + Duration::from_secs(5));
        assert_eq!(deadline_after(now, Duration::MAX), now + FAR_FUTURE);
        assert!(deadline_after(now, Duration::from_secs(u64::MAX)) > now);
    }

    #[test]
    fn test_termination_display() {
        assert_eq!(
            Termination::Exited { code: Some(2) }.to_string(),
            "exited with code 2"
        );
        assert!(Termination::StuckLoop {
            line: "Retrying".to_string(),
            repeats: 5
        }
        .to_string()
        .contains("5 repeats"));
    }
}
