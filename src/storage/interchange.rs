//! JSON import/export of run history.
//!
//! The interchange format is a pretty-printed JSON array of runs, oldest
//! first, without store ids. Importing skips runs whose session id is already
//! stored, so re-importing an export is a no-op.

use std::collections::HashSet;
use std::fs;
use std::path::Path;

use tracing::{debug, info};

use super::database::{DatabaseError, RunStore};
use crate::analyzer::Run;

/// Counts reported by [`import_json`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ImportSummary {
    pub imported: usize,
    pub skipped: usize,
}

/// Writes every stored run to `path`. Returns the number written.
pub async fn export_json(store: &RunStore, path: &Path) -> Result<usize, DatabaseError> {
    let runs = store.all_runs().await?;
    let json = serde_json::to_string_pretty(&runs)?;

    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }
    fs::write(path, json)?;

    info!(path = %path.display(), runs = runs.len(), "Exported runs");
    Ok(runs.len())
}

/// Reads an interchange file without touching the store.
pub fn read_runs(path: &Path) -> Result<Vec<Run>, DatabaseError> {
    let content = fs::read_to_string(path)?;
    let runs: Vec<Run> = serde_json::from_str(&content)?;
    Ok(runs)
}

/// Imports runs from `path`, skipping session ids already present.
///
/// Each run is inserted in its own transaction; an error midway leaves the
/// runs imported so far in place.
pub async fn import_json(store: &RunStore, path: &Path) -> Result<ImportSummary, DatabaseError> {
    let runs = read_runs(path)?;
    let mut summary = ImportSummary::default();
    let mut seen = HashSet::new();

    for mut run in runs {
        if !seen.insert(run.session_id.clone()) || store.session_exists(&run.session_id).await? {
            debug!(session_id = %run.session_id, "Skipping already stored run");
            summary.skipped += 1;
            continue;
        }
        run.id = None;
        store.insert_run(&run).await?;
        summary.imported += 1;
    }

    info!(
        path = %path.display(),
        imported = summary.imported,
        skipped = summary.skipped,
        "Imported runs"
    );
    Ok(summary)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analyzer::run::tests::sample_run;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_export_import_round_trip() {
        let dir = TempDir::new().unwrap();
        let source = RunStore::open(&dir.path().join("a.db")).await.unwrap();
        source.insert_run(&sample_run("s1")).await.unwrap();
        source.insert_run(&sample_run("s2")).await.unwrap();

        let file = dir.path().join("out").join("runs.json");
        assert_eq!(export_json(&source, &file).await.unwrap(), 2);
        assert!(!fs::read_to_string(&file).unwrap().contains("\"id\""));

        let target = RunStore::open(&dir.path().join("b.db")).await.unwrap();
        let summary = import_json(&target, &file).await.unwrap();
        assert_eq!(summary, ImportSummary { imported: 2, skipped: 0 });

        let mut exported = source.all_runs().await.unwrap();
        let mut imported = target.all_runs().await.unwrap();
        for run in exported.iter_mut().chain(imported.iter_mut()) {
            run.id = None;
        }
        assert_eq!(exported, imported);
    }

    #[tokio::test]
    async fn test_reimport_is_noop() {
        let dir = TempDir::new().unwrap();
        let store = RunStore::open(&dir.path().join("a.db")).await.unwrap();
        store.insert_run(&sample_run("s1")).await.unwrap();

        let file = dir.path().join("runs.json");
        export_json(&store, &file).await.unwrap();

        let summary = import_json(&store, &file).await.unwrap();
        assert_eq!(summary, ImportSummary { imported: 0, skipped: 1 });
        assert_eq!(store.count_runs().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_duplicates_within_file_are_skipped() {
        let dir = TempDir::new().unwrap();
        let file = dir.path().join("runs.json");
        let runs = vec![sample_run("dup"), sample_run("dup"), sample_run("other")];
        fs::write(&file, serde_json::to_string(&runs).unwrap()).unwrap();

        let store = RunStore::open(&dir.path().join("a.db")).await.unwrap();
        let summary = import_json(&store, &file).await.unwrap();
        assert_eq!(summary, ImportSummary { imported: 2, skipped: 1 });
    }

    #[tokio::test]
    async fn test_malformed_file_is_error() {
        let dir = TempDir::new().unwrap();
        let file = dir.path().join("runs.json");
        fs::write(&file, "{not json").unwrap();

        let store = RunStore::open(&dir.path().join("a.db")).await.unwrap();
        assert!(matches!(
            import_json(&store, &file).await,
            Err(DatabaseError::Serialization(_))
        ));
    }
}
