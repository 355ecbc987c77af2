//! Concurrent monitors raced against the agent process during one prompt.
//!
//! Each monitor owns its state, listens on a shared stop channel, and reports
//! at most one [`Termination`] through the signal channel. The supervisor
//! takes whichever signal arrives first.

use std::time::Duration;

use tokio::fs::File;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio::sync::{mpsc, watch};
use tokio::time::Instant;
use tracing::{debug, warn};

use super::session::{is_task_complete, EventLogTailer};
use super::supervisor::{deadline_after, Termination};

/// Detects an agent repeating the same short line over and over.
#[derive(Debug, Clone)]
pub struct StuckDetector {
    repeat: usize,
    line_max: usize,
    last: Option<String>,
    count: usize,
}

impl StuckDetector {
    /// `repeat` consecutive identical lines shorter than `line_max` characters trigger detection.
    pub fn new(repeat: usize, line_max: usize) -> Self {
        Self {
            repeat,
            line_max,
            last: None,
            count: 0,
        }
    }

    /// Feeds one console line. Returns true exactly once per streak, on the
    /// line that completes it.
    ///
    /// Blank lines are ignored. Lines at or above the length threshold count
    /// as progress and reset the streak.
    pub fn observe(&mut self, line: &str) -> bool {
        let line = line.trim();
        if line.is_empty() {
            return false;
        }

        if line.chars().count() >= self.line_max {
            self.last = None;
            self.count = 0;
            return false;
        }

        if self.last.as_deref() == Some(line) {
            self.count += 1;
        } else {
            self.last = Some(line.to_string());
            self.count = 1;
        }

        self.repeat > 0 && self.count == self.repeat
    }

    /// Length of the current streak.
    pub fn streak(&self) -> usize {
        self.count
    }
}

#[derive(Debug, Clone, Copy)]
enum Stream {
    Stdout,
    Stderr,
}

/// Relays the agent's console streams to the transcript (and optionally the
/// harness's own console) while feeding stuck-loop detection and the idle clock.
pub struct OutputRelay {
    transcript: File,
    echo: bool,
    detector: StuckDetector,
    activity: watch::Sender<Instant>,
    signals: mpsc::Sender<Termination>,
    fired: bool,
    transcript_ok: bool,
}

impl OutputRelay {
    pub fn new(
        transcript: File,
        echo: bool,
        detector: StuckDetector,
        activity: watch::Sender<Instant>,
        signals: mpsc::Sender<Termination>,
    ) -> Self {
        Self {
            transcript,
            echo,
            detector,
            activity,
            signals,
            fired: false,
            transcript_ok: true,
        }
    }

    /// Relays until both streams reach end-of-file or a stop is requested.
    pub async fn run<O, E>(mut self, mut stdout: O, mut stderr: E, mut stop: watch::Receiver<bool>)
    where
        O: AsyncRead + Unpin,
        E: AsyncRead + Unpin,
    {
        let mut out_buf = vec![0u8; 8192];
        let mut err_buf = vec![0u8; 8192];
        let mut out_line = Vec::new();
        let mut err_line = Vec::new();
        let (mut out_open, mut err_open) = (true, true);

        while out_open || err_open {
            tokio::select! {
                read = stdout.read(&mut out_buf), if out_open => match read {
                    Ok(0) => out_open = false,
                    Ok(n) => self.handle(&out_buf[..n], &mut out_line, Stream::Stdout).await,
                    Err(e) => {
                        warn!("Error reading agent stdout: {}", e);
                        out_open = false;
                    }
                },
                read = stderr.read(&mut err_buf), if err_open => match read {
                    Ok(0) => err_open = false,
                    Ok(n) => self.handle(&err_buf[..n], &mut err_line, Stream::Stderr).await,
                    Err(e) => {
                        warn!("Error reading agent stderr: {}", e);
                        err_open = false;
                    }
                },
                _ = stop.changed() => break,
            }
        }

        for pending in [&out_line, &err_line] {
            if !pending.is_empty() {
                self.observe_line(&String::from_utf8_lossy(pending)).await;
            }
        }

        if let Err(e) = self.transcript.flush().await {
            warn!("Failed to flush transcript: {}", e);
        }
    }

    async fn handle(&mut self, chunk: &[u8], line_buf: &mut Vec<u8>, stream: Stream) {
        // any byte counts as activity
        self.activity.send_replace(Instant::now());

        if self.transcript_ok {
            if let Err(e) = self.transcript.write_all(chunk).await {
                warn!("Failed to write transcript, disabling it for this prompt: {}", e);
                self.transcript_ok = false;
            }
        }

        if self.echo {
            let written = match stream {
                Stream::Stdout => tokio::io::stdout().write_all(chunk).await,
                Stream::Stderr => tokio::io::stderr().write_all(chunk).await,
            };
            if let Err(e) = written {
                debug!("Failed to echo agent output: {}", e);
            }
        }

        line_buf.extend_from_slice(chunk);
        while let Some(pos) = line_buf.iter().position(|&b| b == b'\n') {
            let raw: Vec<u8> = line_buf.drain(..=pos).collect();
            let line = String::from_utf8_lossy(&raw).into_owned();
            self.observe_line(&line).await;
        }
    }

    async fn observe_line(&mut self, line: &str) {
        let line = line.trim_end();
        debug!(target: "agent", "{}", line);

        if self.detector.observe(line) && !self.fired {
            self.fired = true;
            let _ = self
                .signals
                .send(Termination::StuckLoop {
                    line: line.trim().to_string(),
                    repeats: self.detector.streak(),
                })
                .await;
        }
    }
}

/// Fires [`Termination::IdleTimeout`] once no console output has been seen for `idle`.
pub async fn idle_watchdog(
    idle: Duration,
    mut activity: watch::Receiver<Instant>,
    mut stop: watch::Receiver<bool>,
    signals: mpsc::Sender<Termination>,
) {
    let mut relay_alive = true;
    loop {
        let deadline = deadline_after(*activity.borrow_and_update(), idle);
        tokio::select! {
            _ = tokio::time::sleep_until(deadline) => {
                if deadline_after(*activity.borrow(), idle) <= Instant::now() {
                    let _ = signals.send(Termination::IdleTimeout { idle }).await;
                    return;
                }
            }
            changed = activity.changed(), if relay_alive => {
                if changed.is_err() {
                    // output closed; the last activity time stays authoritative
                    relay_alive = false;
                }
            }
            _ = stop.changed() => return,
        }
    }
}

/// Polls the event log and fires [`Termination::TaskComplete`] when the marker appears.
pub async fn watch_event_log(
    mut tailer: EventLogTailer,
    interval: Duration,
    mut stop: watch::Receiver<bool>,
    signals: mpsc::Sender<Termination>,
) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    let mut warned = false;

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                match tailer.poll() {
                    Ok(lines) => {
                        if lines.iter().any(|l| is_task_complete(l)) {
                            debug!(
                                log = ?tailer.current_log(),
                                "Task-complete marker found in event log"
                            );
                            let _ = signals.send(Termination::TaskComplete).await;
                            return;
                        }
                    }
                    Err(e) if !warned => {
                        warn!("Failed to read event log: {}", e);
                        warned = true;
                    }
                    Err(_) => {}
                }
            }
            _ = stop.changed() => return,
        }
    }
}
