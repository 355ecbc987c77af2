//! Database schema constants.
//!
//! This module contains the SQLite schema of the run store.

/// One row per analyzed scenario execution.
pub const CREATE_RUNS_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS runs (
    id              INTEGER PRIMARY KEY AUTOINCREMENT,
    scenario        TEXT    NOT NULL,
    session_id      TEXT    NOT NULL,
    revision        TEXT,
    started_at      TEXT    NOT NULL,
    duration_secs   REAL    NOT NULL,
    turns           INTEGER NOT NULL,
    deploy_calls    INTEGER NOT NULL,
    infra_edits     INTEGER NOT NULL,
    delegated       INTEGER NOT NULL,
    deployed        INTEGER NOT NULL,
    score           REAL    NOT NULL,
    passed          INTEGER NOT NULL,
    created_at      TEXT    NOT NULL DEFAULT (datetime('now'))
)
"#;

/// Required skill → invoked flag, per run.
pub const CREATE_RUN_SKILLS_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS run_skills (
    run_id          INTEGER NOT NULL REFERENCES runs(id) ON DELETE CASCADE,
    skill           TEXT    NOT NULL,
    invoked         INTEGER NOT NULL,
    PRIMARY KEY (run_id, skill)
)
"#;

/// Regression rule outcome, per run.
pub const CREATE_RUN_REGRESSIONS_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS run_regressions (
    run_id          INTEGER NOT NULL REFERENCES runs(id) ON DELETE CASCADE,
    name            TEXT    NOT NULL,
    occurrences     INTEGER NOT NULL,
    max_occurrences INTEGER NOT NULL,
    passed          INTEGER NOT NULL,
    PRIMARY KEY (run_id, name)
)
"#;

/// Verification step outcome, per run.
pub const CREATE_RUN_VERIFICATIONS_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS run_verifications (
    run_id          INTEGER NOT NULL REFERENCES runs(id) ON DELETE CASCADE,
    step            TEXT    NOT NULL,
    passed          INTEGER NOT NULL,
    details         TEXT    NOT NULL DEFAULT '',
    PRIMARY KEY (run_id, step)
)
"#;

/// Run listing per scenario, newest first.
pub const CREATE_RUNS_SCENARIO_INDEX: &str =
    "CREATE INDEX IF NOT EXISTS idx_runs_scenario_started ON runs(scenario, started_at)";

/// Run listing across scenarios.
pub const CREATE_RUNS_STARTED_INDEX: &str =
    "CREATE INDEX IF NOT EXISTS idx_runs_started_at ON runs(started_at)";

/// Duplicate-session lookups during import.
pub const CREATE_RUNS_SESSION_INDEX: &str =
    "CREATE INDEX IF NOT EXISTS idx_runs_session_id ON runs(session_id)";

/// Table names in the schema.
pub mod tables {
    pub const RUNS: &str = "runs";
    pub const RUN_SKILLS: &str = "run_skills";
    pub const RUN_REGRESSIONS: &str = "run_regressions";
    pub const RUN_VERIFICATIONS: &str = "run_verifications";
}
