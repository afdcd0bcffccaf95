//! Migration runner adapter.
//!
//! The actual migration machinery (file loading, the `_sqlx_migrations`
//! ledger, applying and reverting scripts) belongs to `sqlx::migrate`.
//! This module scopes a connection to a tenant schema, translates commands
//! into runner calls and runner failures into [`RunError`].

pub mod plan;
pub mod sqlx_runner;

use std::collections::HashSet;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::migrate::Migrator;

use crate::command::MigrationCommand;
use crate::database::TenantConnection;
use crate::error::{DbError, RunError};
use crate::tenant::SchemaName;

pub use self::plan::{LedgerEntry, LocalMigration, MigrationStatus};
pub use self::sqlx_runner::SqlxRunner;

/// What a successful run did.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RunReport {
    pub command: String,
    pub applied: Vec<i64>,
    pub reverted: Vec<i64>,
    /// Latest applied version once the command finished.
    pub version: Option<i64>,
    /// Per-migration listing, filled in by `status` and `validate`.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub migrations: Vec<MigrationStatus>,
    pub finished_at: DateTime<Utc>,
}

impl RunReport {
    pub fn new(command: &MigrationCommand) -> Self {
        Self {
            command: command.to_string(),
            applied: Vec::new(),
            reverted: Vec::new(),
            version: None,
            migrations: Vec::new(),
            finished_at: Utc::now(),
        }
    }
}

/// Runs one command against a connection already scoped to `schema`.
#[async_trait]
pub trait MigrationRunner<C: TenantConnection>: Send + Sync {
    async fn run(
        &self,
        conn: &mut C,
        schema: &SchemaName,
        command: &MigrationCommand,
    ) -> Result<RunReport, RunError>;
}

/// Point unqualified names on `conn` at the tenant's schema.
pub async fn scope_to_schema<C>(conn: &mut C, schema: &SchemaName) -> Result<(), DbError>
where
    C: TenantConnection,
{
    conn.execute(&format!("SET search_path TO {}", schema.quoted()))
        .await
}

/// Flatten the runner's up/down pairs into one entry per version.
pub fn local_migrations(migrator: &Migrator) -> Vec<LocalMigration> {
    let reversible: HashSet<i64> = migrator
        .iter()
        .filter(|m| m.migration_type.is_down_migration())
        .map(|m| m.version)
        .collect();

    migrator
        .iter()
        .filter(|m| !m.migration_type.is_down_migration())
        .map(|m| LocalMigration {
            version: m.version,
            description: m.description.to_string(),
            checksum: m.checksum.to_vec(),
            reversible: reversible.contains(&m.version),
        })
        .collect()
}
