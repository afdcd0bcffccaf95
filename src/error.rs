use std::time::Duration;

use sqlx::migrate::MigrateError;
use thiserror::Error;

/// Errors raised by a database connection, already classified by cause.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DbError {
    #[error("database unreachable: {0}")]
    Unreachable(String),

    #[error("permission denied: {0}")]
    PermissionDenied(String),

    #[error("statement failed: {0}")]
    Statement(String),
}

impl From<sqlx::Error> for DbError {
    fn from(err: sqlx::Error) -> Self {
        match &err {
            sqlx::Error::Database(db) => match db.code().as_deref() {
                // 42501 insufficient_privilege, class 28 invalid authorization
                Some(code) if code == "42501" || code.starts_with("28") => {
                    Self::PermissionDenied(db.message().to_string())
                }
                _ => Self::Statement(db.message().to_string()),
            },
            sqlx::Error::Io(_)
            | sqlx::Error::Tls(_)
            | sqlx::Error::PoolTimedOut
            | sqlx::Error::PoolClosed
            | sqlx::Error::WorkerCrashed => Self::Unreachable(err.to_string()),
            _ => Self::Statement(err.to_string()),
        }
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProvisionError {
    #[error("invalid schema identifier: {0}")]
    InvalidIdentifier(String),

    #[error("cannot reach database: {0}")]
    Connectivity(String),

    #[error("missing privilege to create schema: {0}")]
    Permission(String),

    #[error("schema creation failed: {0}")]
    Statement(String),
}

impl From<DbError> for ProvisionError {
    fn from(err: DbError) -> Self {
        match err {
            DbError::Unreachable(msg) => Self::Connectivity(msg),
            DbError::PermissionDenied(msg) => Self::Permission(msg),
            DbError::Statement(msg) => Self::Statement(msg),
        }
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RunError {
    #[error("unknown migration command: {0}")]
    UnknownCommand(String),

    #[error("invalid arguments for {command}: {reason}")]
    InvalidArguments { command: String, reason: String },

    #[error("cannot load migrations: {0}")]
    Source(String),

    #[error("migration failed: {0}")]
    ExecutionFailed(String),

    /// Another session holds the schema's migration lock.
    #[error("schema {0} is locked by another migration")]
    Locked(String),
}

impl From<MigrateError> for RunError {
    fn from(err: MigrateError) -> Self {
        Self::ExecutionFailed(err.to_string())
    }
}

impl From<DbError> for RunError {
    fn from(err: DbError) -> Self {
        Self::ExecutionFailed(err.to_string())
    }
}

/// The failure half of a `MigrationOutcome`.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DispatchError {
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error(transparent)]
    Provision(#[from] ProvisionError),

    #[error("connection error: {0}")]
    Connection(DbError),

    #[error(transparent)]
    Run(RunError),

    #[error("a migration for tenant {0} is already in progress")]
    TenantBusy(String),

    #[error("request did not complete within {0:?}")]
    TimedOut(Duration),
}

impl From<RunError> for DispatchError {
    fn from(err: RunError) -> Self {
        match err {
            RunError::Locked(schema) => Self::TenantBusy(schema),
            other => Self::Run(other),
        }
    }
}

/// Coarse classification of a failed dispatch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutcomeKind {
    InvalidRequest,
    InvalidIdentifier,
    Connectivity,
    Permission,
    ProvisionFailed,
    ConnectionError,
    UnknownCommand,
    InvalidArguments,
    SourceError,
    ExecutionFailed,
    TenantBusy,
    TimedOut,
}

impl DispatchError {
    pub fn kind(&self) -> OutcomeKind {
        match self {
            Self::InvalidRequest(_) => OutcomeKind::InvalidRequest,
            Self::Provision(ProvisionError::InvalidIdentifier(_)) => OutcomeKind::InvalidIdentifier,
            Self::Provision(ProvisionError::Connectivity(_)) => OutcomeKind::Connectivity,
            Self::Provision(ProvisionError::Permission(_)) => OutcomeKind::Permission,
            Self::Provision(ProvisionError::Statement(_)) => OutcomeKind::ProvisionFailed,
            Self::Connection(_) => OutcomeKind::ConnectionError,
            Self::Run(RunError::UnknownCommand(_)) => OutcomeKind::UnknownCommand,
            Self::Run(RunError::InvalidArguments { .. }) => OutcomeKind::InvalidArguments,
            Self::Run(RunError::Source(_)) => OutcomeKind::SourceError,
            Self::Run(RunError::ExecutionFailed(_)) => OutcomeKind::ExecutionFailed,
            Self::Run(RunError::Locked(_)) => OutcomeKind::TenantBusy,
            Self::TenantBusy(_) => OutcomeKind::TenantBusy,
            Self::TimedOut(_) => OutcomeKind::TimedOut,
        }
    }

    /// True when the caller sent something that can never succeed as-is.
    pub fn is_client_error(&self) -> bool {
        matches!(
            self.kind(),
            OutcomeKind::InvalidRequest
                | OutcomeKind::InvalidIdentifier
                | OutcomeKind::UnknownCommand
                | OutcomeKind::InvalidArguments
        )
    }
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Configuration error: {0}")]
    Load(#[from] config::ConfigError),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}
