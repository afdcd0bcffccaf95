//! Tenant registry lookups used by batch migration.

use serde::Serialize;
use sqlx::{FromRow, PgConnection};

use crate::error::DbError;

/// A row of `public.tenant_client`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, FromRow)]
pub struct TenantClient {
    pub id: i64,
    pub schema_name: String,
}

pub async fn list_tenants(conn: &mut PgConnection) -> Result<Vec<TenantClient>, DbError> {
    let tenants = sqlx::query_as::<_, TenantClient>(
        r#"
        SELECT id::bigint AS id, schema_name
        FROM public.tenant_client
        WHERE schema_name IS NOT NULL
        ORDER BY id
        "#,
    )
    .fetch_all(&mut *conn)
    .await?;

    Ok(tenants)
}
