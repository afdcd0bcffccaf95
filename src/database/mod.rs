pub mod tenants;

use std::fmt;
use std::str::FromStr;

use async_trait::async_trait;
use sqlx::postgres::{PgConnectOptions, PgConnection};

use crate::error::DbError;

/// A single database connection the dispatcher can issue statements on.
#[async_trait]
pub trait TenantConnection: Send {
    /// Execute one or more statements, discarding any rows.
    async fn execute(&mut self, sql: &str) -> Result<(), DbError>;

    /// Gracefully terminate the connection.
    async fn close(self) -> Result<(), DbError>
    where
        Self: Sized;
}

/// Opens connections for a request.
#[async_trait]
pub trait Connector: Send + Sync {
    type Connection: TenantConnection;

    async fn connect(&self, target: &ConnectionTarget) -> Result<Self::Connection, DbError>;
}

/// A parsed PostgreSQL connection string. Never prints the password.
#[derive(Clone)]
pub struct ConnectionTarget {
    options: PgConnectOptions,
}

impl ConnectionTarget {
    pub fn parse(dbstring: &str) -> Result<Self, String> {
        let options = PgConnectOptions::from_str(dbstring.trim())
            .map_err(|e| format!("invalid connection string: {}", e))?;
        Ok(Self { options })
    }

    pub fn options(&self) -> &PgConnectOptions {
        &self.options
    }
}

impl fmt::Display for ConnectionTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "postgres://{}@{}:{}/{}",
            self.options.get_username(),
            self.options.get_host(),
            self.options.get_port(),
            self.options.get_database().unwrap_or_default()
        )
    }
}

impl fmt::Debug for ConnectionTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("ConnectionTarget")
            .field(&self.to_string())
            .finish()
    }
}

/// Opens a fresh `PgConnection` per call; nothing is pooled across requests.
#[derive(Debug, Clone, Copy, Default)]
pub struct PgConnector;

#[async_trait]
impl Connector for PgConnector {
    type Connection = PgConnection;

    async fn connect(&self, target: &ConnectionTarget) -> Result<PgConnection, DbError> {
        let conn = <PgConnection as sqlx::Connection>::connect_with(target.options()).await?;
        Ok(conn)
    }
}

#[async_trait]
impl TenantConnection for PgConnection {
    async fn execute(&mut self, sql: &str) -> Result<(), DbError> {
        sqlx::Executor::execute(&mut *self, sqlx::raw_sql(sql)).await?;
        Ok(())
    }

    async fn close(self) -> Result<(), DbError> {
        <PgConnection as sqlx::Connection>::close(self).await?;
        Ok(())
    }
}
