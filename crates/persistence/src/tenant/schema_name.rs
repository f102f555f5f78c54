//! Schema name validation and derivation.
//!
//! Every identifier that ends up inside string-built SQL (`CREATE SCHEMA`,
//! `SET LOCAL search_path`, schema-qualified table names) must first pass
//! [`is_valid_schema_name`]. The only way to obtain a [`SchemaName`] is
//! through that check, and the [`crate::sql`] builders accept nothing else.
//!
//! Invalid names are refused outright. There is no quoting fallback for
//! names that fail the check.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::TenantError;

/// Maximum identifier length accepted by PostgreSQL (NAMEDATALEN - 1).
pub const MAX_SCHEMA_NAME_LEN: usize = 63;

/// Prefix prepended to lowercased tenant codes to form schema names.
pub const TENANT_SCHEMA_PREFIX: &str = "tenant_";

/// Name of the shared schema holding the tenant registry.
pub const PUBLIC_SCHEMA: &str = "public";

/// Returns true iff `name` is non-empty, at most 63 bytes and matches
/// `^[A-Za-z_][A-Za-z0-9_]*$`.
pub fn is_valid_schema_name(name: &str) -> bool {
    if name.is_empty() || name.len() > MAX_SCHEMA_NAME_LEN {
        return false;
    }

    let mut bytes = name.bytes();
    let first_ok = bytes
        .next()
        .is_some_and(|b| b.is_ascii_alphabetic() || b == b'_');

    first_ok && bytes.all(|b| b.is_ascii_alphanumeric() || b == b'_')
}

/// A schema name that passed [`is_valid_schema_name`].
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct SchemaName(String);

impl SchemaName {
    /// Validates `name` and wraps it.
    ///
    /// # Errors
    ///
    /// Returns [`TenantError::InvalidSchemaName`] when the name is rejected.
    pub fn parse(name: impl Into<String>) -> Result<Self, TenantError> {
        let name = name.into();
        if is_valid_schema_name(&name) {
            Ok(Self(name))
        } else {
            Err(TenantError::InvalidSchemaName { name })
        }
    }

    /// The default shared schema.
    pub fn public() -> Self {
        Self(PUBLIC_SCHEMA.to_string())
    }

    /// Returns the name as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Consumes the wrapper and returns the inner string.
    pub fn into_inner(self) -> String {
        self.0
    }
}

impl fmt::Display for SchemaName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for SchemaName {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for SchemaName {
    type Error = TenantError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(value)
    }
}

impl TryFrom<&str> for SchemaName {
    type Error = TenantError;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        Self::parse(value)
    }
}

impl<'de> Deserialize<'de> for SchemaName {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let raw = String::deserialize(deserializer)?;
        SchemaName::parse(raw).map_err(serde::de::Error::custom)
    }
}

/// Rewrites an arbitrary string into a valid lowercase schema name.
///
/// Characters outside `[a-z0-9_]` become `_`, a leading character that is
/// not a lowercase letter or `_` gets a `_` prefix, and the result is cut to
/// [`MAX_SCHEMA_NAME_LEN`] bytes.
pub fn sanitize_schema_name(raw: &str) -> String {
    let mut out: String = raw
        .chars()
        .map(|c| {
            if c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_' {
                c
            } else {
                '_'
            }
        })
        .collect();

    let needs_prefix = out
        .chars()
        .next()
        .is_none_or(|c| !(c.is_ascii_lowercase() || c == '_'));
    if needs_prefix {
        out.insert(0, '_');
    }

    // Only ASCII remains, so byte truncation lands on a char boundary.
    out.truncate(MAX_SCHEMA_NAME_LEN);
    out
}

/// Derives the schema name for a tenant code: `tenant_` + lowercase(code),
/// sanitized and truncated.
pub fn derive_schema_name(tenant_code: &str) -> SchemaName {
    let raw = format!("{}{}", TENANT_SCHEMA_PREFIX, tenant_code.to_lowercase());
    SchemaName(sanitize_schema_name(&raw))
}
