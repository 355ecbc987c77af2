//! SQLite run store.
//!
//! Provides connection setup, transactional run insertion and the list/get
//! queries used by the CLI and the improvement loop.

use std::collections::BTreeMap;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::sqlite::{
    SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions, SqliteRow,
    SqliteSynchronous,
};
use sqlx::Row;
use thiserror::Error;

use super::migrations::{MigrationError, MigrationRunner};
use crate::analyzer::{RegressionResult, Run, StepOutcome};

const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// Errors that can occur during database operations.
#[derive(Debug, Error)]
pub enum DatabaseError {
    /// Failed to open the database file.
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    /// Query execution failed.
    #[error("Query failed: {0}")]
    QueryFailed(#[from] sqlx::Error),

    /// Record not found.
    #[error("Not found: {0}")]
    NotFound(String),

    /// JSON interchange could not be encoded or decoded.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Migration failed.
    #[error("Migration error: {0}")]
    Migration(#[from] MigrationError),

    /// Interchange file I/O failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Query filter for [`RunStore::list_runs`].
#[derive(Debug, Clone, Default)]
pub struct RunFilter {
    /// Restrict to one scenario.
    pub scenario: Option<String>,
    /// Maximum number of runs returned.
    pub limit: Option<u32>,
    /// Load skills, regressions and verification outcomes too.
    pub with_details: bool,
}

impl RunFilter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn scenario(mut self, scenario: impl Into<String>) -> Self {
        self.scenario = Some(scenario.into());
        self
    }

    pub fn limit(mut self, limit: u32) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn with_details(mut self, with_details: bool) -> Self {
        self.with_details = with_details;
        self
    }
}

/// Aggregate figures for one scenario.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScenarioStats {
    pub scenario: String,
    pub runs: u32,
    pub passed: u32,
    pub average_score: f64,
    pub best_score: f64,
    pub latest_started_at: Option<DateTime<Utc>>,
}

impl ScenarioStats {
    /// Share of passing runs, in [0, 1].
    pub fn pass_rate(&self) -> f64 {
        if self.runs == 0 {
            0.0
        } else {
            f64::from(self.passed) / f64::from(self.runs)
        }
    }
}

/// Durable run history backed by a single SQLite file.
#[derive(Clone)]
pub struct RunStore {
    pool: SqlitePool,
}

impl RunStore {
    /// Opens (creating if needed) the store at `path` and applies the schema.
    pub async fn open(path: &Path) -> Result<Self, DatabaseError> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let opts = SqliteConnectOptions::from_str(&format!("sqlite://{}", path.display()))
            .map_err(|e| DatabaseError::ConnectionFailed(e.to_string()))?
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal)
            .busy_timeout(BUSY_TIMEOUT)
            .foreign_keys(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(4)
            .connect_with(opts)
            .await
            .map_err(|e| DatabaseError::ConnectionFailed(format!("{}: {}", path.display(), e)))?;

        let store = Self { pool };
        store.run_migrations().await?;

        tracing::info!(path = %path.display(), "Run store opened");
        Ok(store)
    }

    /// Creates a store from an existing pool. The schema is not applied.
    pub fn from_pool(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Applies pending schema migrations.
    pub async fn run_migrations(&self) -> Result<(), DatabaseError> {
        MigrationRunner::new(self.pool.clone())
            .run_migrations()
            .await?;
        Ok(())
    }

    /// Persists a run and its sub-records atomically, returning the new id.
    pub async fn insert_run(&self, run: &Run) -> Result<i64, DatabaseError> {
        let mut tx = self.pool.begin().await?;

        let result = sqlx::query(
            r#"
            INSERT INTO runs (
                scenario, session_id, revision, started_at, duration_secs,
                turns, deploy_calls, infra_edits, delegated, deployed, score, passed
            )
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)
            "#,
        )
        .bind(&run.scenario)
        .bind(&run.session_id)
        .bind(&run.revision)
        .bind(run.started_at)
        .bind(run.duration_secs)
        .bind(i64::from(run.turns))
        .bind(i64::from(run.deploy_calls))
        .bind(i64::from(run.infra_edits))
        .bind(run.delegated)
        .bind(run.deployed)
        .bind(run.score)
        .bind(run.passed)
        .execute(&mut *tx)
        .await?;
        let run_id = result.last_insert_rowid();

        for (skill, invoked) in &run.skills {
            sqlx::query("INSERT INTO run_skills (run_id, skill, invoked) VALUES (?1, ?2, ?3)")
                .bind(run_id)
                .bind(skill)
                .bind(*invoked)
                .execute(&mut *tx)
                .await?;
        }

        for (name, outcome) in &run.regressions {
            sqlx::query(
                r#"
                INSERT INTO run_regressions (run_id, name, occurrences, max_occurrences, passed)
                VALUES (?1, ?2, ?3, ?4, ?5)
                "#,
            )
            .bind(run_id)
            .bind(name)
            .bind(i64::from(outcome.occurrences))
            .bind(i64::from(outcome.limit))
            .bind(outcome.passed)
            .execute(&mut *tx)
            .await?;
        }

        for (step, outcome) in &run.verification {
            sqlx::query(
                "INSERT INTO run_verifications (run_id, step, passed, details) VALUES (?1, ?2, ?3, ?4)",
            )
            .bind(run_id)
            .bind(step)
            .bind(outcome.passed)
            .bind(&outcome.details)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;

        tracing::debug!(
            run_id = run_id,
            scenario = %run.scenario,
            session_id = %run.session_id,
            "Run stored"
        );
        Ok(run_id)
    }

    /// Whether a run with this session id is already stored.
    pub async fn session_exists(&self, session_id: &str) -> Result<bool, DatabaseError> {
        let row: Option<(i64,)> = sqlx::query_as("SELECT id FROM runs WHERE session_id = ?1 LIMIT 1")
            .bind(session_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.is_some())
    }

    /// Fetches one run with all of its sub-records.
    pub async fn get_run(&self, id: i64) -> Result<Run, DatabaseError> {
        let row = sqlx::query(&format!("{} WHERE id = ?1", SELECT_RUNS))
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| DatabaseError::NotFound(format!("run {}", id)))?;

        let mut run = run_from_row(&row)?;
        self.load_details(id, &mut run).await?;
        Ok(run)
    }

    /// Lists runs newest first.
    pub async fn list_runs(&self, filter: &RunFilter) -> Result<Vec<Run>, DatabaseError> {
        let mut sql = SELECT_RUNS.to_string();
        if filter.scenario.is_some() {
            sql.push_str(" WHERE scenario = ?1");
        }
        sql.push_str(" ORDER BY started_at DESC, id DESC");
        if let Some(limit) = filter.limit {
            sql.push_str(&format!(" LIMIT {}", limit));
        }

        let mut query = sqlx::query(&sql);
        if let Some(scenario) = &filter.scenario {
            query = query.bind(scenario);
        }
        let rows = query.fetch_all(&self.pool).await?;

        let mut runs = Vec::with_capacity(rows.len());
        for row in &rows {
            let mut run = run_from_row(row)?;
            if filter.with_details {
                if let Some(id) = run.id {
                    self.load_details(id, &mut run).await?;
                }
            }
            runs.push(run);
        }
        Ok(runs)
    }

    /// Every stored run with details, oldest first.
    pub async fn all_runs(&self) -> Result<Vec<Run>, DatabaseError> {
        let mut runs = self
            .list_runs(&RunFilter::new().with_details(true))
            .await?;
        runs.reverse();
        Ok(runs)
    }

    /// Per-scenario aggregates, ordered by scenario name.
    pub async fn scenario_stats(&self) -> Result<Vec<ScenarioStats>, DatabaseError> {
        let rows = sqlx::query(
            r#"
            SELECT scenario,
                   COUNT(*)                 AS runs,
                   SUM(passed)              AS passed,
                   AVG(score)               AS average_score,
                   MAX(score)               AS best_score,
                   MAX(started_at)          AS latest
            FROM runs
            GROUP BY scenario
            ORDER BY scenario
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|row| -> Result<ScenarioStats, DatabaseError> {
                let latest: Option<String> = row.try_get("latest")?;
                Ok(ScenarioStats {
                    scenario: row.try_get("scenario")?,
                    runs: count(row.try_get("runs")?),
                    passed: count(row.try_get("passed")?),
                    average_score: row.try_get("average_score")?,
                    best_score: row.try_get("best_score")?,
                    latest_started_at: latest.as_deref().and_then(parse_timestamp),
                })
            })
            .collect()
    }

    /// Total number of stored runs.
    pub async fn count_runs(&self) -> Result<u64, DatabaseError> {
        let (n,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM runs")
            .fetch_one(&self.pool)
            .await?;
        Ok(u64::try_from(n).unwrap_or(0))
    }

    async fn load_details(&self, run_id: i64, run: &mut Run) -> Result<(), DatabaseError> {
        let skills = sqlx::query("SELECT skill, invoked FROM run_skills WHERE run_id = ?1")
            .bind(run_id)
            .fetch_all(&self.pool)
            .await?;
        run.skills = skills
            .iter()
            .map(|row| -> Result<(String, bool), sqlx::Error> {
                Ok((row.try_get("skill")?, row.try_get("invoked")?))
            })
            .collect::<Result<_, _>>()?;

        let regressions = sqlx::query(
            "SELECT name, occurrences, max_occurrences, passed FROM run_regressions WHERE run_id = ?1",
        )
        .bind(run_id)
        .fetch_all(&self.pool)
        .await?;
        run.regressions = regressions
            .iter()
            .map(|row| -> Result<(String, RegressionResult), sqlx::Error> {
                Ok((
                    row.try_get("name")?,
                    RegressionResult {
                        occurrences: count(row.try_get("occurrences")?),
                        limit: count(row.try_get("max_occurrences")?),
                        passed: row.try_get("passed")?,
                    },
                ))
            })
            .collect::<Result<_, _>>()?;

        let steps =
            sqlx::query("SELECT step, passed, details FROM run_verifications WHERE run_id = ?1")
                .bind(run_id)
                .fetch_all(&self.pool)
                .await?;
        run.verification = steps
            .iter()
            .map(|row| -> Result<(String, StepOutcome), sqlx::Error> {
                Ok((
                    row.try_get("step")?,
                    StepOutcome {
                        passed: row.try_get("passed")?,
                        details: row.try_get("details")?,
                    },
                ))
            })
            .collect::<Result<_, _>>()?;

        Ok(())
    }
}

const SELECT_RUNS: &str = r#"
    SELECT id, scenario, session_id, revision, started_at, duration_secs,
           turns, deploy_calls, infra_edits, delegated, deployed, score, passed
    FROM runs"#;

fn run_from_row(row: &SqliteRow) -> Result<Run, DatabaseError> {
    Ok(Run {
        id: Some(row.try_get("id")?),
        scenario: row.try_get("scenario")?,
        session_id: row.try_get("session_id")?,
        revision: row.try_get("revision")?,
        started_at: row.try_get("started_at")?,
        duration_secs: row.try_get("duration_secs")?,
        turns: count(row.try_get("turns")?),
        deploy_calls: count(row.try_get("deploy_calls")?),
        infra_edits: count(row.try_get("infra_edits")?),
        delegated: row.try_get("delegated")?,
        deployed: row.try_get("deployed")?,
        score: row.try_get("score")?,
        passed: row.try_get("passed")?,
        skills: BTreeMap::new(),
        regressions: BTreeMap::new(),
        verification: BTreeMap::new(),
    })
}

fn count(value: i64) -> u32 {
    u32::try_from(value.max(0)).unwrap_or(u32::MAX)
}

fn parse_timestamp(text: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(text)
        .ok()
        .or_else(|| DateTime::parse_from_str(text, "%Y-%m-%d %H:%M:%S%.f%:z").ok())
        .map(|dt| dt.with_timezone(&Utc))
}
