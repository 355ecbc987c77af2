//! SQLite run history.
//!
//! This module provides durable storage for analyzed runs and their
//! sub-records (required skills, regression outcomes, verification steps).
//!
//! # Overview
//!
//! - **Database**: the [`RunStore`], a SQLite file opened in WAL mode
//! - **Interchange**: JSON export/import with session-id deduplication
//! - **Migrations**: schema management and versioning
//!
//! # Usage
//!
//! ```rust,ignore
//! use scenario_harness::storage::{RunFilter, RunStore};
//!
//! let store = RunStore::open(Path::new("runs.db")).await?;
//! let id = store.insert_run(&analysis.run).await?;
//!
//! let recent = store
//!     .list_runs(&RunFilter::new().scenario("web-app").limit(10))
//!     .await?;
//! ```

pub mod database;
pub mod interchange;
pub mod migrations;
pub mod schema;

pub use database::{DatabaseError, RunFilter, RunStore, ScenarioStats};
pub use interchange::{export_json, import_json, read_runs, ImportSummary};
pub use migrations::{latest_version, AppliedMigration, Migration, MigrationError, MigrationRunner, MIGRATIONS};
