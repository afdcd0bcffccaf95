use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use sqlx::migrate::{AppliedMigration, Migrate, MigrateError, Migration, Migrator};
use sqlx::PgConnection;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use super::plan::{self, LedgerEntry, LocalMigration, Step};
use super::{local_migrations, MigrationRunner, RunReport};
use crate::command::MigrationCommand;
use crate::error::{DbError, RunError};
use crate::tenant::SchemaName;

pub const DEFAULT_LOCK_WAIT: Duration = Duration::from_secs(30);
const LOCK_POLL_INTERVAL: Duration = Duration::from_millis(100);

// Session-level advisory lock keyed on database and schema.
const TRY_LOCK_SQL: &str =
    "SELECT pg_try_advisory_lock(hashtext(current_database() || '.' || $1))";
const UNLOCK_SQL: &str = "SELECT pg_advisory_unlock(hashtext(current_database() || '.' || $1))";

/// Runs commands with `sqlx::migrate`, reading scripts from a directory on
/// every call so new files are picked up without a restart.
#[derive(Debug, Clone)]
pub struct SqlxRunner {
    migrations_dir: PathBuf,
    locking: bool,
    lock_wait: Duration,
}

impl SqlxRunner {
    pub fn new(migrations_dir: impl Into<PathBuf>) -> Self {
        Self {
            migrations_dir: migrations_dir.into(),
            locking: true,
            lock_wait: DEFAULT_LOCK_WAIT,
        }
    }

    /// Toggle the per-schema advisory lock around mutating commands.
    pub fn with_locking(mut self, locking: bool) -> Self {
        self.locking = locking;
        self
    }

    /// How long to wait for another session's lock on the same schema. A
    /// zero wait only tries once.
    pub fn with_lock_wait(mut self, lock_wait: Duration) -> Self {
        self.lock_wait = lock_wait;
        self
    }

    pub fn migrations_dir(&self) -> &Path {
        &self.migrations_dir
    }

    pub async fn load(&self) -> Result<Migrator, RunError> {
        Migrator::new(self.migrations_dir.as_path())
            .await
            .map_err(|e| RunError::Source(format!("{}: {}", self.migrations_dir.display(), e)))
    }

    async fn lock_schema(
        &self,
        conn: &mut PgConnection,
        schema: &SchemaName,
    ) -> Result<(), RunError> {
        let started = Instant::now();
        loop {
            let acquired: bool = sqlx::query_scalar(TRY_LOCK_SQL)
                .bind(schema.as_str())
                .fetch_one(&mut *conn)
                .await
                .map_err(DbError::from)?;
            if acquired {
                debug!(schema = %schema, "acquired schema migration lock");
                return Ok(());
            }

            let waited = started.elapsed();
            if waited >= self.lock_wait {
                return Err(RunError::Locked(schema.to_string()));
            }
            tokio::time::sleep(LOCK_POLL_INTERVAL.min(self.lock_wait - waited)).await;
        }
    }

    async fn unlock_schema(
        &self,
        conn: &mut PgConnection,
        schema: &SchemaName,
    ) -> Result<(), RunError> {
        let released: bool = sqlx::query_scalar(UNLOCK_SQL)
            .bind(schema.as_str())
            .fetch_one(&mut *conn)
            .await
            .map_err(DbError::from)?;
        if !released {
            warn!(schema = %schema, "schema migration lock was not held");
        }
        Ok(())
    }

    async fn execute(
        &self,
        conn: &mut PgConnection,
        migrator: &Migrator,
        local: &[LocalMigration],
        command: &MigrationCommand,
        report: &mut RunReport,
    ) -> Result<(), RunError> {
        conn.ensure_migrations_table().await?;
        if let Some(version) = conn.dirty_version().await? {
            return Err(MigrateError::Dirty(version).into());
        }

        let ledger = ledger_entries(conn.list_applied_migrations().await?);
        let steps = plan::plan(command, local, &ledger)?;
        if steps.is_empty() {
            info!("no migrations to run");
        }

        for step in steps {
            match step {
                Step::Apply(version) => {
                    let migration = find(migrator, version, false)?;
                    let elapsed = conn
                        .apply(migration)
                        .await
                        .map_err(|e| step_failed("applying", migration, e))?;
                    info!(version, description = %migration.description, ?elapsed, "applied migration");
                    report.applied.push(version);
                }
                Step::Revert(version) => {
                    let migration = find(migrator, version, true)?;
                    let elapsed = conn
                        .revert(migration)
                        .await
                        .map_err(|e| step_failed("reverting", migration, e))?;
                    info!(version, description = %migration.description, ?elapsed, "reverted migration");
                    report.reverted.push(version);
                }
            }
        }

        let ledger = ledger_entries(conn.list_applied_migrations().await?);
        report.version = plan::current_version(&ledger);
        Ok(())
    }
}

#[async_trait]
impl MigrationRunner<PgConnection> for SqlxRunner {
    async fn run(
        &self,
        conn: &mut PgConnection,
        schema: &SchemaName,
        command: &MigrationCommand,
    ) -> Result<RunReport, RunError> {
        let migrator = self.load().await?;
        let local = local_migrations(&migrator);
        debug!(dir = %self.migrations_dir.display(), count = local.len(), "loaded migrations");

        let mut report = RunReport::new(command);

        if command.is_read_only() {
            let ledger = read_ledger(conn).await?;
            report.version = plan::current_version(&ledger);
            match command {
                MigrationCommand::Status => report.migrations = plan::status(&local, &ledger),
                MigrationCommand::Validate => {
                    plan::check_ledger(&local, &ledger)?;
                    report.migrations = plan::status(&local, &ledger);
                }
                _ => {}
            }
        } else {
            if self.locking {
                self.lock_schema(conn, schema).await?;
            }
            let result = self
                .execute(conn, &migrator, &local, command, &mut report)
                .await;
            if self.locking {
                if let Err(err) = self.unlock_schema(conn, schema).await {
                    warn!(error = %err, "failed to release schema migration lock");
                    if result.is_ok() {
                        return Err(err);
                    }
                }
            }
            result?;
        }

        report.finished_at = Utc::now();
        Ok(report)
    }
}

/// Read the ledger without creating it; a schema that was never migrated has
/// no ledger table yet.
async fn read_ledger(conn: &mut PgConnection) -> Result<Vec<LedgerEntry>, RunError> {
    let table = sqlx::query_scalar::<_, Option<String>>(
        "SELECT to_regclass('_sqlx_migrations')::text",
    )
    .fetch_one(&mut *conn)
    .await
    .map_err(DbError::from)?;

    if table.is_none() {
        debug!("no ledger table in schema yet");
        return Ok(Vec::new());
    }
    if let Some(version) = conn.dirty_version().await? {
        return Err(MigrateError::Dirty(version).into());
    }

    Ok(ledger_entries(conn.list_applied_migrations().await?))
}

fn ledger_entries(applied: Vec<AppliedMigration>) -> Vec<LedgerEntry> {
    applied
        .into_iter()
        .map(|m| LedgerEntry {
            version: m.version,
            checksum: m.checksum.to_vec(),
        })
        .collect()
}

fn find(migrator: &Migrator, version: i64, down: bool) -> Result<&Migration, RunError> {
    migrator
        .iter()
        .find(|m| m.version == version && m.migration_type.is_down_migration() == down)
        .ok_or_else(|| RunError::ExecutionFailed(format!("migration {} not found", version)))
}

fn step_failed(action: &str, migration: &Migration, err: MigrateError) -> RunError {
    RunError::ExecutionFailed(format!(
        "{} migration {} ({}): {}",
        action, migration.version, migration.description, err
    ))
}
