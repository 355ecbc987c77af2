//! Versioned schema migrations.
//!
//! Each migration is a numbered group of statements applied in a single
//! transaction. Applied versions are recorded in `_migrations`, so opening an
//! existing store only runs what it is missing.

use sqlx::SqlitePool;
use thiserror::Error;
use tracing::{debug, info};

use super::schema;

/// Errors that can occur during migration operations.
#[derive(Debug, Error)]
pub enum MigrationError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// A statement of a migration failed; nothing of that migration was kept.
    #[error("Migration {version} ({name}) failed: {message}")]
    MigrationFailed {
        version: u32,
        name: &'static str,
        message: String,
    },

    /// The store was written by a newer harness.
    #[error("Store schema version {found} is newer than supported version {supported}")]
    UnsupportedVersion { found: u32, supported: u32 },
}

/// One schema step.
#[derive(Debug, Clone, Copy)]
pub struct Migration {
    pub version: u32,
    pub name: &'static str,
    pub statements: &'static [&'static str],
}

/// Every migration, in version order.
pub const MIGRATIONS: &[Migration] = &[
    Migration {
        version: 1,
        name: "create_runs",
        statements: &[
            schema::CREATE_RUNS_TABLE,
            schema::CREATE_RUN_SKILLS_TABLE,
            schema::CREATE_RUN_REGRESSIONS_TABLE,
        ],
    },
    Migration {
        version: 2,
        name: "create_run_verifications",
        statements: &[schema::CREATE_RUN_VERIFICATIONS_TABLE],
    },
    Migration {
        version: 3,
        name: "index_runs",
        statements: &[
            schema::CREATE_RUNS_SCENARIO_INDEX,
            schema::CREATE_RUNS_STARTED_INDEX,
            schema::CREATE_RUNS_SESSION_INDEX,
        ],
    },
];

/// Highest version this build knows how to create.
pub fn latest_version() -> u32 {
    MIGRATIONS.last().map_or(0, |m| m.version)
}

/// Applies [`MIGRATIONS`] to a pool.
pub struct MigrationRunner {
    pool: SqlitePool,
}

impl MigrationRunner {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Applies every migration newer than the store's version and returns how
    /// many were applied.
    pub async fn run_migrations(&self) -> Result<usize, MigrationError> {
        self.ensure_migrations_table().await?;

        let current = self.current_version().await?;
        let supported = latest_version();
        if current > supported {
            return Err(MigrationError::UnsupportedVersion {
                found: current,
                supported,
            });
        }

        let mut applied = 0;
        for migration in MIGRATIONS.iter().filter(|m| m.version > current) {
            self.apply(migration).await?;
            applied += 1;
        }

        if applied > 0 {
            info!(from = current, to = supported, "Run store schema migrated");
        }
        Ok(applied)
    }

    /// Highest applied version, 0 for a fresh store.
    pub async fn current_version(&self) -> Result<u32, MigrationError> {
        self.ensure_migrations_table().await?;
        let version: Option<i64> = sqlx::query_scalar("SELECT MAX(version) FROM _migrations")
            .fetch_one(&self.pool)
            .await?;
        Ok(version.map_or(0, |v| v as u32))
    }

    async fn ensure_migrations_table(&self) -> Result<(), MigrationError> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS _migrations (
                version     INTEGER PRIMARY KEY,
                name        TEXT NOT NULL,
                applied_at  TEXT NOT NULL DEFAULT (datetime('now'))
            )
            "#,
        )
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn apply(&self, migration: &Migration) -> Result<(), MigrationError> {
        let failed = |e: sqlx::Error| MigrationError::MigrationFailed {
            version: migration.version,
            name: migration.name,
            message: e.to_string(),
        };

        let mut tx = self.pool.begin().await?;
        for sql in migration.statements {
            sqlx::query(sql).execute(&mut *tx).await.map_err(failed)?;
        }
        sqlx::query("INSERT INTO _migrations (version, name) VALUES (?1, ?2)")
            .bind(i64::from(migration.version))
            .bind(migration.name)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;

        debug!(version = migration.version, name = migration.name, "Applied migration");
        Ok(())
    }

    /// Applied migrations, oldest first.
    pub async fn list_applied_migrations(&self) -> Result<Vec<AppliedMigration>, MigrationError> {
        self.ensure_migrations_table().await?;
        let rows: Vec<AppliedMigration> =
            sqlx::query_as("SELECT version, name, applied_at FROM _migrations ORDER BY version")
                .fetch_all(&self.pool)
                .await?;
        Ok(rows)
    }
}

/// Row of `_migrations`.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct AppliedMigration {
    pub version: i64,
    pub name: String,
    /// SQLite `datetime('now')` text.
    pub applied_at: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};

    async fn pool(dir: &tempfile::TempDir) -> SqlitePool {
        let opts = SqliteConnectOptions::new()
            .filename(dir.path().join("m.db"))
            .create_if_missing(true);
        SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(opts)
            .await
            .unwrap()
    }

    #[test]
    fn test_versions_are_increasing() {
        let versions: Vec<u32> = MIGRATIONS.iter().map(|m| m.version).collect();
        assert!(versions.windows(2).all(|w| w[0] < w[1]));
        assert_eq!(latest_version(), 3);
        // runs must exist before the tables referencing it
        assert!(MIGRATIONS[0].statements[0].contains("CREATE TABLE IF NOT EXISTS runs"));
    }

    #[tokio::test]
    async fn test_migrations_apply_once() {
        let dir = tempfile::TempDir::new().unwrap();
        let runner = MigrationRunner::new(pool(&dir).await);

        assert_eq!(runner.current_version().await.unwrap(), 0);
        assert_eq!(runner.run_migrations().await.unwrap(), MIGRATIONS.len());
        assert_eq!(runner.run_migrations().await.unwrap(), 0);
        assert_eq!(runner.current_version().await.unwrap(), latest_version());

        let applied = runner.list_applied_migrations().await.unwrap();
        let names: Vec<&str> = applied.iter().map(|m| m.name.as_str()).collect();
        assert_eq!(names, vec!["create_runs", "create_run_verifications", "index_runs"]);
    }

    #[tokio::test]
    async fn test_newer_store_is_rejected() {
        let dir = tempfile::TempDir::new().unwrap();
        let pool = pool(&dir).await;
        let runner = MigrationRunner::new(pool.clone());
        runner.run_migrations().await.unwrap();

        sqlx::query("INSERT INTO _migrations (version, name) VALUES (99, 'future')")
            .execute(&pool)
            .await
            .unwrap();

        let err = runner.run_migrations().await.unwrap_err();
        assert!(matches!(
            err,
            MigrationError::UnsupportedVersion { found: 99, .. }
        ));
    }
}
