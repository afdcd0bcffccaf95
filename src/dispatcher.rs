//! Tenant migration dispatcher.
//!
//! One call to [`Dispatcher::dispatch`] walks a request through
//! `Validating -> Provisioning -> Scoping -> Running` and yields exactly one
//! [`MigrationOutcome`]. Steps never run out of order, nothing is retried,
//! and every connection opened along the way is closed before the outcome is
//! returned (or dropped, if the request is cancelled or times out).

use std::time::Duration;

use serde::Deserialize;
use tracing::{debug, info, info_span, warn, Instrument};
use uuid::Uuid;

use crate::command::MigrationCommand;
use crate::config::AppConfig;
use crate::database::{ConnectionTarget, Connector, TenantConnection};
use crate::error::{DispatchError, ProvisionError};
use crate::locks::TenantLocks;
use crate::provisioner;
use crate::runner::{self, MigrationRunner, RunReport};
use crate::tenant::SchemaName;

pub type MigrationOutcome = Result<RunReport, DispatchError>;

/// Body of a migration request.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct MigrationRequest {
    pub name: String,
    pub command: String,
    #[serde(default)]
    pub dbstring: Option<String>,
    #[serde(default)]
    pub args: Vec<String>,
}

/// Settings the dispatcher is constructed with.
#[derive(Debug, Clone, Default)]
pub struct DispatcherConfig {
    /// Used when a request carries no connection string.
    pub default_dbstring: Option<String>,
    /// How long a request waits for another run on the same tenant.
    pub lock_wait: Duration,
    pub request_timeout: Option<Duration>,
}

impl From<&AppConfig> for DispatcherConfig {
    fn from(config: &AppConfig) -> Self {
        Self {
            default_dbstring: config.database_url.clone(),
            lock_wait: Duration::from_secs(config.lock_wait_secs),
            request_timeout: config.request_timeout_secs.map(Duration::from_secs),
        }
    }
}

/// A request that passed validation.
#[derive(Debug, Clone)]
pub struct MigrationJob {
    pub schema: SchemaName,
    pub command: MigrationCommand,
    pub target: ConnectionTarget,
}

pub struct Dispatcher<C, R> {
    connector: C,
    runner: R,
    config: DispatcherConfig,
    locks: TenantLocks,
}

impl<C, R> Dispatcher<C, R>
where
    C: Connector,
    R: MigrationRunner<C::Connection>,
{
    pub fn new(connector: C, runner: R, config: DispatcherConfig) -> Self {
        Self {
            connector,
            runner,
            config,
            locks: TenantLocks::new(),
        }
    }

    pub fn config(&self) -> &DispatcherConfig {
        &self.config
    }

    pub fn locks(&self) -> &TenantLocks {
        &self.locks
    }

    pub async fn dispatch(&self, request: MigrationRequest) -> MigrationOutcome {
        let span = info_span!(
            "dispatch",
            run_id = %Uuid::new_v4(),
            tenant = %request.name,
            command = %request.command,
        );

        async move {
            let outcome = self.dispatch_inner(request).await;
            match &outcome {
                Ok(report) => info!(
                    applied = report.applied.len(),
                    reverted = report.reverted.len(),
                    version = ?report.version,
                    "migration completed"
                ),
                Err(err) if err.is_client_error() => warn!(error = %err, "migration rejected"),
                Err(err) => warn!(error = %err, kind = ?err.kind(), "migration failed"),
            }
            outcome
        }
        .instrument(span)
        .await
    }

    /// Run `command` for every schema in `tenants`, one after the other,
    /// continuing past failures.
    pub async fn dispatch_all(
        &self,
        tenants: &[String],
        command: &str,
        args: &[String],
        dbstring: Option<&str>,
    ) -> Vec<(String, MigrationOutcome)> {
        let mut outcomes = Vec::with_capacity(tenants.len());
        for tenant in tenants {
            let request = MigrationRequest {
                name: tenant.clone(),
                command: command.to_string(),
                dbstring: dbstring.map(str::to_string),
                args: args.to_vec(),
            };
            outcomes.push((tenant.clone(), self.dispatch(request).await));
        }
        outcomes
    }

    async fn dispatch_inner(&self, request: MigrationRequest) -> MigrationOutcome {
        let job = self.validate(&request)?;
        let _guard = self.locks.acquire(&job.schema, self.config.lock_wait).await?;

        match self.config.request_timeout {
            Some(limit) => tokio::time::timeout(limit, self.execute(&job))
                .await
                .unwrap_or(Err(DispatchError::TimedOut(limit))),
            None => self.execute(&job).await,
        }
    }

    /// Check a request without touching the database.
    pub fn validate(&self, request: &MigrationRequest) -> Result<MigrationJob, DispatchError> {
        debug!("validating request");

        let schema = SchemaName::parse(&request.name)?;

        if request.command.trim().is_empty() {
            return Err(DispatchError::InvalidRequest("command is required".to_string()));
        }
        let command = MigrationCommand::parse(&request.command, &request.args)?;

        let dbstring = request
            .dbstring
            .as_deref()
            .filter(|s| !s.trim().is_empty())
            .or(self.config.default_dbstring.as_deref())
            .ok_or_else(|| DispatchError::InvalidRequest("dbstring is required".to_string()))?;
        let target = ConnectionTarget::parse(dbstring).map_err(DispatchError::InvalidRequest)?;

        Ok(MigrationJob {
            schema,
            command,
            target,
        })
    }

    async fn execute(&self, job: &MigrationJob) -> MigrationOutcome {
        self.provision(job).await?;

        let mut conn = self.scope(job).await?;
        debug!(command = %job.command, "running migrations");
        let result = self.runner.run(&mut conn, &job.schema, &job.command).await;
        release(conn).await;

        result.map_err(DispatchError::from)
    }

    async fn provision(&self, job: &MigrationJob) -> Result<(), DispatchError> {
        debug!(target = %job.target, "provisioning schema");
        let mut conn = self
            .connector
            .connect(&job.target)
            .await
            .map_err(ProvisionError::from)?;

        let result = provisioner::create_schema(&mut conn, &job.schema).await;
        release(conn).await;

        Ok(result?)
    }

    async fn scope(&self, job: &MigrationJob) -> Result<C::Connection, DispatchError> {
        debug!("scoping connection to tenant schema");
        let mut conn = self
            .connector
            .connect(&job.target)
            .await
            .map_err(DispatchError::Connection)?;

        if let Err(err) = runner::scope_to_schema(&mut conn, &job.schema).await {
            release(conn).await;
            return Err(DispatchError::Connection(err));
        }
        Ok(conn)
    }
}

async fn release<T: TenantConnection>(conn: T) {
    if let Err(err) = conn.close().await {
        warn!(error = %err, "failed to close connection cleanly");
    }
}
