//! Decides which migrations a command touches, given the migration directory
//! and the ledger. Pure; the runner executes the resulting steps.

use std::collections::{BTreeMap, HashMap};

use serde::Serialize;
use thiserror::Error;

use crate::command::MigrationCommand;
use crate::error::RunError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalMigration {
    pub version: i64,
    pub description: String,
    pub checksum: Vec<u8>,
    /// Whether a down script exists for this version.
    pub reversible: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LedgerEntry {
    pub version: i64,
    pub checksum: Vec<u8>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    Apply(i64),
    Revert(i64),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MigrationStatus {
    pub version: i64,
    pub description: String,
    pub applied: bool,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PlanError {
    #[error("migration {0} was previously applied but is missing from the migrations directory")]
    Missing(i64),

    #[error("migration {0} was previously applied but has been modified")]
    Modified(i64),

    #[error("migration {0} has no down script and cannot be reverted")]
    Irreversible(i64),

    #[error("no migrations to revert")]
    NothingApplied,
}

impl From<PlanError> for RunError {
    fn from(err: PlanError) -> Self {
        RunError::ExecutionFailed(err.to_string())
    }
}

/// Every ledger entry must match a local migration byte for byte.
pub fn check_ledger(local: &[LocalMigration], ledger: &[LedgerEntry]) -> Result<(), PlanError> {
    let by_version: HashMap<i64, &LocalMigration> =
        local.iter().map(|m| (m.version, m)).collect();

    for entry in ledger {
        match by_version.get(&entry.version) {
            None => return Err(PlanError::Missing(entry.version)),
            Some(m) if m.checksum != entry.checksum => {
                return Err(PlanError::Modified(entry.version))
            }
            Some(_) => {}
        }
    }
    Ok(())
}

pub fn plan(
    command: &MigrationCommand,
    local: &[LocalMigration],
    ledger: &[LedgerEntry],
) -> Result<Vec<Step>, PlanError> {
    if command.is_read_only() {
        return Ok(Vec::new());
    }
    check_ledger(local, ledger)?;

    let steps = match *command {
        MigrationCommand::Up => pending(local, ledger).map(Step::Apply).collect(),
        MigrationCommand::UpByOne => pending(local, ledger).take(1).map(Step::Apply).collect(),
        MigrationCommand::UpTo(target) => pending(local, ledger)
            .filter(|v| *v <= target)
            .map(Step::Apply)
            .collect(),
        MigrationCommand::Down => {
            let latest = current_version(ledger).ok_or(PlanError::NothingApplied)?;
            revert(local, [latest])?
        }
        MigrationCommand::DownTo(target) => {
            revert(local, applied_desc(ledger).filter(|v| *v > target))?
        }
        MigrationCommand::Reset => revert(local, applied_desc(ledger))?,
        MigrationCommand::Redo => {
            let latest = current_version(ledger).ok_or(PlanError::NothingApplied)?;
            let mut steps = revert(local, [latest])?;
            steps.push(Step::Apply(latest));
            steps
        }
        MigrationCommand::Status | MigrationCommand::Version | MigrationCommand::Validate => {
            Vec::new()
        }
    };

    Ok(steps)
}

pub fn status(local: &[LocalMigration], ledger: &[LedgerEntry]) -> Vec<MigrationStatus> {
    let mut rows: BTreeMap<i64, MigrationStatus> = local
        .iter()
        .map(|m| {
            (
                m.version,
                MigrationStatus {
                    version: m.version,
                    description: m.description.clone(),
                    applied: false,
                },
            )
        })
        .collect();

    for entry in ledger {
        rows.entry(entry.version)
            .or_insert_with(|| MigrationStatus {
                version: entry.version,
                description: "(missing from migrations directory)".to_string(),
                applied: true,
            })
            .applied = true;
    }

    rows.into_values().collect()
}

pub fn current_version(ledger: &[LedgerEntry]) -> Option<i64> {
    ledger.iter().map(|e| e.version).max()
}

fn pending<'a>(
    local: &'a [LocalMigration],
    ledger: &'a [LedgerEntry],
) -> impl Iterator<Item = i64> + 'a {
    let mut versions: Vec<i64> = local
        .iter()
        .map(|m| m.version)
        .filter(|v| !ledger.iter().any(|e| e.version == *v))
        .collect();
    versions.sort_unstable();
    versions.into_iter()
}

fn applied_desc(ledger: &[LedgerEntry]) -> impl Iterator<Item = i64> {
    let mut versions: Vec<i64> = ledger.iter().map(|e| e.version).collect();
    versions.sort_unstable_by(|a, b| b.cmp(a));
    versions.into_iter()
}

fn revert(
    local: &[LocalMigration],
    versions: impl IntoIterator<Item = i64>,
) -> Result<Vec<Step>, PlanError> {
    versions
        .into_iter()
        .map(|version| {
            match local.iter().find(|m| m.version == version) {
                Some(m) if m.reversible => Ok(Step::Revert(version)),
                Some(_) => Err(PlanError::Irreversible(version)),
                None => Err(PlanError::Missing(version)),
            }
        })
        .collect()
}
