//! Tenant schema identifiers.
//!
//! A tenant name doubles as the PostgreSQL schema that isolates the tenant's
//! tables, so it is checked against a strict identifier grammar before it is
//! rendered into any statement.

use std::fmt;
use std::sync::LazyLock;

use regex::Regex;
use serde::Serialize;

use crate::error::ProvisionError;

/// PostgreSQL truncates identifiers longer than `NAMEDATALEN - 1` bytes.
pub const MAX_IDENTIFIER_LEN: usize = 63;

static IDENTIFIER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*$").expect("identifier pattern is valid"));

/// A validated, lower-cased schema name.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct SchemaName(String);

impl SchemaName {
    pub fn parse(raw: &str) -> Result<Self, ProvisionError> {
        if raw.is_empty() {
            return Err(ProvisionError::InvalidIdentifier(
                "tenant name is empty".to_string(),
            ));
        }
        if raw.len() > MAX_IDENTIFIER_LEN {
            return Err(ProvisionError::InvalidIdentifier(format!(
                "{:?} is longer than {} characters",
                raw, MAX_IDENTIFIER_LEN
            )));
        }
        if !IDENTIFIER.is_match(raw) {
            return Err(ProvisionError::InvalidIdentifier(format!(
                "{:?} must start with a letter or underscore and contain only letters, digits and underscores",
                raw
            )));
        }

        // Unquoted identifiers fold to lower case in PostgreSQL.
        let name = raw.to_ascii_lowercase();
        if name.starts_with("pg_") {
            return Err(ProvisionError::InvalidIdentifier(format!(
                "{:?} uses the reserved pg_ prefix",
                raw
            )));
        }

        Ok(Self(name))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Double-quoted form for interpolation into DDL.
    pub fn quoted(&self) -> String {
        format!("\"{}\"", self.0)
    }
}

impl fmt::Display for SchemaName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl std::str::FromStr for SchemaName {
    type Err = ProvisionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}
