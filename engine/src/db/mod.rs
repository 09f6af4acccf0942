//! Audit trail storage
//!
//! One SQLite file (`<data_dir>/luna.db`) holding every goal the engine ran and
//! the step graph behind it. Schema changes are numbered migrations applied in
//! order and tracked through `PRAGMA user_version`.

use anyhow::{Context, Result};
use sqlx::sqlite::{
    SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions, SqliteSynchronous,
};
use sqlx::ConnectOptions;
use std::path::Path;
use tracing::{debug, info};

pub mod steps;

pub use steps::{GoalRecord, StepRepository, StoredStep};

/// Numbered schema migrations, oldest first
const MIGRATIONS: &[(i64, &str, &str)] = &[(
    1,
    "001_initial.sql",
    include_str!("../../migrations/001_initial.sql"),
)];

pub struct Database {
    pool: SqlitePool,
}

impl Database {
    /// Open the audit database at `db_path`, creating the file, its parent
    /// directory and any missing schema
    pub async fn new(db_path: &Path) -> Result<Self> {
        info!("Opening audit database at {}", db_path.display());

        if let Some(parent) = db_path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }

        // Step rows reference their goal; cascades need foreign keys on every connection
        let options = SqliteConnectOptions::new()
            .filename(db_path)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal)
            .foreign_keys(true)
            .disable_statement_logging();

        let pool = SqlitePoolOptions::new()
            .max_connections(4)
            .connect_with(options)
            .await
            .with_context(|| format!("Failed to open audit database {}", db_path.display()))?;

        let db = Self { pool };
        db.migrate().await?;
        Ok(db)
    }

    async fn migrate(&self) -> Result<()> {
        let current: i64 = sqlx::query_scalar("PRAGMA user_version")
            .fetch_one(&self.pool)
            .await
            .context("Failed to read schema version")?;

        for (version, name, sql) in MIGRATIONS.iter().filter(|(v, _, _)| *v > current) {
            info!("Applying migration {}", name);
            let mut tx = self.pool.begin().await?;
            sqlx::raw_sql(sql)
                .execute(&mut *tx)
                .await
                .with_context(|| format!("Migration {} failed", name))?;
            // PRAGMA does not accept bound parameters
            sqlx::query(&format!("PRAGMA user_version = {}", version))
                .execute(&mut *tx)
                .await?;
            tx.commit().await?;
        }

        debug!("Audit schema at version {}", self.schema_version().await?);
        Ok(())
    }

    pub async fn schema_version(&self) -> Result<i64> {
        sqlx::query_scalar("PRAGMA user_version")
            .fetch_one(&self.pool)
            .await
            .context("Failed to read schema version")
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Repository over the goal and step tables
    pub fn steps(&self) -> StepRepository {
        StepRepository::new(self.pool.clone())
    }

    /// Checkpoint the WAL into the main file and close the pool
    pub async fn close(self) -> Result<()> {
        sqlx::query("PRAGMA wal_checkpoint(TRUNCATE)")
            .execute(&self.pool)
            .await
            .context("Failed to checkpoint WAL")?;
        self.pool.close().await;
        debug!("Audit database closed");
        Ok(())
    }
}
