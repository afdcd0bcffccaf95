//! Schema provisioning: make sure a tenant's schema exists.

use tracing::debug;

use crate::database::TenantConnection;
use crate::error::ProvisionError;
use crate::tenant::SchemaName;

/// Create the schema named `schema` unless it already exists.
///
/// The name is validated against the identifier grammar before any SQL is
/// issued. Calling this repeatedly with the same name is harmless.
pub async fn ensure_schema<C>(conn: &mut C, schema: &str) -> Result<SchemaName, ProvisionError>
where
    C: TenantConnection,
{
    let schema = SchemaName::parse(schema)?;
    create_schema(conn, &schema).await?;
    Ok(schema)
}

pub async fn create_schema<C>(conn: &mut C, schema: &SchemaName) -> Result<(), ProvisionError>
where
    C: TenantConnection,
{
    debug!(schema = %schema, "ensuring schema exists");
    conn.execute(&format!("CREATE SCHEMA IF NOT EXISTS {}", schema.quoted()))
        .await?;
    Ok(())
}
