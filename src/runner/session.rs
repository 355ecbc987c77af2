//! Agent session directories and incremental event log tailing.

use std::collections::HashMap;
use std::fs::{self, File};
use std::io::{self, Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use std::time::SystemTime;

/// File name of the structured event log inside a session directory.
pub const EVENT_LOG_FILE: &str = "events.jsonl";

/// Event type the agent writes when it considers the current prompt finished.
pub const TASK_COMPLETE_EVENT: &str = "session.task_complete";

/// Returns the event log path of a session directory.
pub fn event_log_path(session_dir: &Path) -> PathBuf {
    session_dir.join(EVENT_LOG_FILE)
}

/// Most recent modification time of a session, looking at both the directory
/// and its event log (appends do not touch the directory's mtime).
fn session_mtime(dir: &Path) -> Option<SystemTime> {
    let dir_time = fs::metadata(dir).and_then(|m| m.modified()).ok();
    let log_time = fs::metadata(event_log_path(dir))
        .and_then(|m| m.modified())
        .ok();
    dir_time.max(log_time)
}

/// Finds the most recently modified session directory under `root`.
///
/// Returns `None` when `root` does not exist or holds no subdirectories.
pub fn latest_session_dir(root: &Path) -> Option<PathBuf> {
    let entries = fs::read_dir(root).ok()?;
    entries
        .filter_map(Result::ok)
        .map(|e| e.path())
        .filter(|p| p.is_dir())
        .filter_map(|p| session_mtime(&p).map(|t| (t, p)))
        .max_by(|a, b| a.0.cmp(&b.0).then_with(|| a.1.cmp(&b.1)))
        .map(|(_, p)| p)
}

/// Returns true if an event log line carries the task-complete marker.
pub fn is_task_complete(line: &str) -> bool {
    serde_json::from_str::<serde_json::Value>(line)
        .ok()
        .and_then(|v| v.get("type").and_then(|t| t.as_str()).map(|t| t == TASK_COMPLETE_EVENT))
        .unwrap_or(false)
}

/// Reads newly appended lines from the event log of the most recently
/// modified session.
///
/// Logs that already existed when the tailer was created are read from their
/// length at that moment, so a resumed session's earlier entries are never
/// reprocessed. The read position is kept per log, so switching between
/// sessions never replays a line. A missing log is not an error: the agent
/// may not have created its session directory yet.
#[derive(Debug)]
pub struct EventLogTailer {
    session_root: PathBuf,
    cursors: HashMap<PathBuf, LogCursor>,
    current: Option<PathBuf>,
}

#[derive(Debug, Default)]
struct LogCursor {
    offset: u64,
    partial: Vec<u8>,
}

impl EventLogTailer {
    /// Snapshots the current length of every existing event log under `session_root`.
    pub fn new(session_root: impl Into<PathBuf>) -> Self {
        let session_root = session_root.into();
        let mut cursors = HashMap::new();
        if let Ok(entries) = fs::read_dir(&session_root) {
            for entry in entries.filter_map(Result::ok) {
                let log = event_log_path(&entry.path());
                if let Ok(meta) = fs::metadata(&log) {
                    cursors.insert(
                        log,
                        LogCursor {
                            offset: meta.len(),
                            partial: Vec::new(),
                        },
                    );
                }
            }
        }

        Self {
            session_root,
            cursors,
            current: None,
        }
    }

    /// Path of the log currently being followed, if any.
    pub fn current_log(&self) -> Option<&Path> {
        self.current.as_deref()
    }

    /// Returns the complete lines appended since the previous poll.
    pub fn poll(&mut self) -> io::Result<Vec<String>> {
        let Some(dir) = latest_session_dir(&self.session_root) else {
            return Ok(Vec::new());
        };
        let path = event_log_path(&dir);
        if self.current.as_ref() != Some(&path) {
            self.current = Some(path.clone());
        }

        let mut file = match File::open(&path) {
            Ok(f) => f,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e),
        };
        let len = file.metadata()?.len();
        let cursor = self.cursors.entry(path).or_default();

        if len < cursor.offset {
            // truncated or replaced
            cursor.offset = 0;
            cursor.partial.clear();
        }
        if len == cursor.offset {
            return Ok(Vec::new());
        }

        file.seek(SeekFrom::Start(cursor.offset))?;
        let mut buf = Vec::with_capacity((len - cursor.offset) as usize);
        file.take(len - cursor.offset).read_to_end(&mut buf)?;
        cursor.offset += buf.len() as u64;
        cursor.partial.extend_from_slice(&buf);

        let mut lines = Vec::new();
        while let Some(pos) = cursor.partial.iter().position(|&b| b == b'\n') {
            let raw: Vec<u8> = cursor.partial.drain(..=pos).collect();
            let line = String::from_utf8_lossy(&raw).trim_end().to_string();
            if !line.is_empty() {
                lines.push(line);
            }
        }
        Ok(lines)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::TempDir;

    fn append(path: &Path, text: &str) {
        let mut f = fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .unwrap();
        f.write_all(text.as_bytes()).unwrap();
    }

    #[test]
    fn test_latest_session_dir_missing_root() {
        let temp = TempDir::new().unwrap();
        assert!(latest_session_dir(&temp.path().join("nope")).is_none());
        assert!(latest_session_dir(temp.path()).is_none());
    }

    #[test]
    fn test_latest_session_dir_prefers_recent_log() {
        let temp = TempDir::new().unwrap();
        let old = temp.path().join("old");
        let new = temp.path().join("new");
        fs::create_dir(&old).unwrap();
        std::thread::sleep(std::time::Duration::from_millis(50));
        fs::create_dir(&new).unwrap();
        assert_eq!(latest_session_dir(temp.path()), Some(new.clone()));

        std::thread::sleep(std::time::Duration::from_millis(50));
        append(&event_log_path(&old), "{}\n");

        assert_eq!(latest_session_dir(temp.path()), Some(old));
    }

    #[test]
    fn test_is_task_complete() {
        assert!(is_task_complete(r#"{"type":"session.task_complete","data":{}}"#));
        assert!(!is_task_complete(r#"{"type":"assistant.turn_start"}"#));
        assert!(!is_task_complete("not json session.task_complete"));
    }

    #[test]
    fn test_tailer_tolerates_missing_log() {
        let temp = TempDir::new().unwrap();
        let mut tailer = EventLogTailer::new(temp.path().join("sessions"));
        assert!(tailer.poll().unwrap().is_empty());

        let session = temp.path().join("sessions").join("abc");
        fs::create_dir_all(&session).unwrap();
        assert!(tailer.poll().unwrap().is_empty());

        append(&event_log_path(&session), "{\"type\":\"a\"}\n");
        assert_eq!(tailer.poll().unwrap(), vec!["{\"type\":\"a\"}"]);
    }

    #[test]
    fn test_tailer_reads_only_new_bytes() {
        let temp = TempDir::new().unwrap();
        let session = temp.path().join("s1");
        fs::create_dir_all(&session).unwrap();
        let log = event_log_path(&session);

        let mut tailer = EventLogTailer::new(temp.path());
        append(&log, "one\ntwo\n");
        assert_eq!(tailer.poll().unwrap(), vec!["one", "two"]);
        assert!(tailer.poll().unwrap().is_empty());

        append(&log, "thr");
        assert!(tailer.poll().unwrap().is_empty());
        append(&log, "ee\n");
        assert_eq!(tailer.poll().unwrap(), vec!["three"]);
        assert_eq!(tailer.current_log(), Some(log.as_path()));
    }

    #[test]
    fn test_tailer_keeps_position_across_session_switches() {
        let temp = TempDir::new().unwrap();
        let first = temp.path().join("first");
        let second = temp.path().join("second");
        fs::create_dir_all(&first).unwrap();
        let first_log = event_log_path(&first);

        let mut tailer = EventLogTailer::new(temp.path());
        append(&first_log, "a\n");
        assert_eq!(tailer.poll().unwrap(), vec!["a"]);

        std::thread::sleep(std::time::Duration::from_millis(50));
        fs::create_dir_all(&second).unwrap();
        append(&event_log_path(&second), "b\n");
        assert_eq!(tailer.poll().unwrap(), vec!["b"]);

        std::thread::sleep(std::time::Duration::from_millis(50));
        append(&first_log, "c\n");
        assert_eq!(tailer.poll().unwrap(), vec!["c"]);
        assert_eq!(tailer.current_log(), Some(first_log.as_path()));
    }

    #[test]
    fn test_tailer_skips_existing_content() {
        let temp = TempDir::new().unwrap();
        let session = temp.path().join("resumed");
        fs::create_dir_all(&session).unwrap();
        let log = event_log_path(&session);
        append(&log, "{\"type\":\"session.task_complete\"}\n");

        let mut tailer = EventLogTailer::new(temp.path());
        assert!(tailer.poll().unwrap().is_empty());

        append(&log, "fresh\n");
        assert_eq!(tailer.poll().unwrap(), vec!["fresh"]);
    }
}
