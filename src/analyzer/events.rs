//! Agent event log records.
//!
//! Each line of `events.jsonl` is a JSON object of the form
//! `{"type": "...", "timestamp": "<RFC3339>", "data": {...}}`.

use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::Value;
use tracing::debug;

use crate::error::AnalyzerError;

/// Event types the analyzer understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    SessionStart,
    TurnStart,
    AssistantMessage,
    ToolStart,
    ToolComplete,
    SubagentStarted,
    SkillInvoked,
    TaskComplete,
    Other,
}

impl EventKind {
    fn from_type(kind: &str) -> Self {
        match kind {
            "session.start" => EventKind::SessionStart,
            "assistant.turn_start" => EventKind::TurnStart,
            "assistant.message" => EventKind::AssistantMessage,
            "tool.execution_start" => EventKind::ToolStart,
            "tool.execution_complete" => EventKind::ToolComplete,
            "subagent.started" => EventKind::SubagentStarted,
            "skill.invoked" => EventKind::SkillInvoked,
            "session.task_complete" => EventKind::TaskComplete,
            _ => EventKind::Other,
        }
    }
}

/// One parsed event log entry.
#[derive(Debug, Clone, Deserialize)]
pub struct AgentEvent {
    /// Raw event type.
    #[serde(rename = "type")]
    pub event_type: String,
    /// RFC3339 timestamp as written by the agent.
    #[serde(default)]
    pub timestamp: Option<String>,
    /// Event payload.
    #[serde(default)]
    pub data: Value,
}

impl AgentEvent {
    /// Parses one log line.
    pub fn parse(line: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(line)
    }

    pub fn kind(&self) -> EventKind {
        EventKind::from_type(&self.event_type)
    }

    /// Parsed timestamp; `None` when absent or malformed.
    pub fn time(&self) -> Option<DateTime<Utc>> {
        self.timestamp
            .as_deref()
            .and_then(|t| DateTime::parse_from_rfc3339(t).ok())
            .map(|t| t.with_timezone(&Utc))
    }

    /// String field of `data`.
    pub fn data_str(&self, key: &str) -> Option<&str> {
        self.data.get(key).and_then(Value::as_str)
    }

    /// Tool call arguments; arguments serialized as a JSON string are decoded.
    pub fn arguments(&self) -> Value {
        match self.data.get("arguments") {
            Some(Value::String(raw)) => serde_json::from_str(raw).unwrap_or(Value::Null),
            Some(v) => v.clone(),
            None => Value::Null,
        }
    }

    /// Text of a tool result (`data.result.content` or `data.result`).
    pub fn result_text(&self) -> Option<&str> {
        let result = self.data.get("result")?;
        result
            .get("content")
            .and_then(Value::as_str)
            .or_else(|| result.as_str())
    }
}

/// Counters from one pass over an event log.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReadStats {
    /// Lines parsed into events.
    pub events: usize,
    /// Malformed lines that were skipped.
    pub skipped: usize,
}

/// Streams every well-formed event of the log at `path` into `on_event`.
///
/// Malformed lines are skipped; a missing or unreadable file is an error.
pub fn read_events<F>(path: &Path, mut on_event: F) -> Result<ReadStats, AnalyzerError>
where
    F: FnMut(AgentEvent),
{
    if !path.exists() {
        return Err(AnalyzerError::EventLogMissing(path.to_path_buf()));
    }
    let file = File::open(path).map_err(|source| AnalyzerError::EventLogUnreadable {
        path: path.to_path_buf(),
        source,
    })?;

    let mut stats = ReadStats::default();
    let mut reader = BufReader::new(file);
    let mut buf = Vec::new();
    let mut line_no = 0usize;

    loop {
        buf.clear();
        if reader.read_until(b'\n', &mut buf)? == 0 {
            break;
        }
        line_no += 1;

        let line = String::from_utf8_lossy(&buf);
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        match AgentEvent::parse(line) {
            Ok(event) => {
                stats.events += 1;
                on_event(event);
            }
            Err(e) => {
                debug!(line = line_no, "Skipping malformed event: {}", e);
                stats.skipped += 1;
            }
        }
    }

    Ok(stats)
}
