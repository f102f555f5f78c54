//! Tenant records and provisioning inputs.

// Record fields mirror their column names
#![allow(missing_docs)]

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio_postgres::Row;

use super::context::TenantInfo;
use super::schema_name::{SchemaName, derive_schema_name};
use crate::error::{StorageResult, TenantError, ValidationError, internal_error};

/// Exact length of a hospital code.
pub const HOSPITAL_CODE_LEN: usize = 8;
/// Maximum length of a hospital display name.
pub const HOSPITAL_NAME_MAX: usize = 150;
/// Maximum length of a tenant code.
pub const TENANT_CODE_MAX: usize = 32;
/// Minimum admin username length.
pub const ADMIN_USERNAME_MIN: usize = 5;
/// Minimum admin password length.
pub const ADMIN_PASSWORD_MIN: usize = 6;
/// Zero-padding width of the numeric part of an HN.
pub const HN_DIGITS: usize = 8;
/// Prefix of the admin staff code; the tenant code follows it.
pub const ADMIN_STAFF_CODE_PREFIX: &str = "ADM";
/// Subdomains that never name a tenant.
pub const RESERVED_SUBDOMAINS: [&str; 2] = ["www", "api"];

/// One isolated hospital instance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tenant {
    pub id: i64,
    pub tenant_code: String,
    pub name: String,
    pub schema_name: String,
    pub subdomain: String,
    pub is_active: bool,
    pub hospital_name: String,
    pub hospital_code: String,
    pub address: Option<String>,
    /// Last HN sequence value handed out. Starts at 0, never decreases.
    pub hn_running: u64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Column list matching [`Tenant::from_row`].
pub(crate) const TENANT_COLUMNS: &str = "id, tenant_code, name, schema_name, subdomain, is_active, \
     hospital_name, hospital_code, address, hn_running, created_at, updated_at";

impl Tenant {
    pub(crate) fn from_row(row: &Row) -> StorageResult<Self> {
        let hn_running: i64 = row.try_get("hn_running")?;
        let hn_running = u64::try_from(hn_running)
            .map_err(|_| internal_error(format!("negative hn_running: {}", hn_running)))?;

        Ok(Self {
            id: row.try_get("id")?,
            tenant_code: row.try_get("tenant_code")?,
            name: row.try_get("name")?,
            schema_name: row.try_get("schema_name")?,
            subdomain: row.try_get("subdomain")?,
            is_active: row.try_get("is_active")?,
            hospital_name: row.try_get("hospital_name")?,
            hospital_code: row.try_get("hospital_code")?,
            address: row.try_get("address")?,
            hn_running,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
        })
    }

    /// Re-validates the stored schema name.
    pub fn schema(&self) -> Result<SchemaName, TenantError> {
        SchemaName::parse(self.schema_name.as_str())
    }

    /// Builds the request-scoped view of this tenant.
    pub fn info(&self) -> Result<TenantInfo, TenantError> {
        Ok(TenantInfo {
            tenant_id: self.id,
            tenant_code: self.tenant_code.clone(),
            schema_name: self.schema()?,
            subdomain: self.subdomain.clone(),
            hospital_code: self.hospital_code.clone(),
        })
    }

    /// HN for `value` under this tenant's hospital code.
    pub fn hn(&self, value: u64) -> String {
        format_hn(&self.hospital_code, value)
    }
}

/// Formats a patient HN: `<hospital_code>-<value padded to 8 digits>`.
pub fn format_hn(hospital_code: &str, value: u64) -> String {
    format!("{}-{:0width$}", hospital_code, value, width = HN_DIGITS)
}

/// Input for provisioning a tenant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewTenant {
    pub tenant_code: String,
    pub name: String,
    pub subdomain: String,
    pub hospital_name: String,
    pub hospital_code: String,
    #[serde(default)]
    pub address: Option<String>,
}

impl NewTenant {
    /// Schema the tenant will be provisioned into.
    pub fn schema_name(&self) -> SchemaName {
        derive_schema_name(&self.tenant_code)
    }

    /// Staff code given to the initial admin.
    pub fn admin_staff_code(&self) -> String {
        format!("{}{}", ADMIN_STAFF_CODE_PREFIX, self.tenant_code)
    }

    /// Checks every field without touching storage.
    pub fn validate(&self) -> Result<(), ValidationError> {
        validate_tenant_code(&self.tenant_code)?;

        if self.name.trim().is_empty() {
            return Err(ValidationError::invalid("name", "must not be empty"));
        }

        validate_subdomain(&self.subdomain)?;

        let name_len = self.hospital_name.chars().count();
        if !(1..=HOSPITAL_NAME_MAX).contains(&name_len) {
            return Err(ValidationError::invalid(
                "hospital_name",
                format!("must be 1 to {} characters", HOSPITAL_NAME_MAX),
            ));
        }

        if self.hospital_code.chars().count() != HOSPITAL_CODE_LEN {
            return Err(ValidationError::invalid(
                "hospital_code",
                format!("must be exactly {} characters", HOSPITAL_CODE_LEN),
            ));
        }

        Ok(())
    }
}

/// Tenant codes: 1 to 32 ASCII letters, digits, `_` or `-`.
pub fn validate_tenant_code(code: &str) -> Result<(), ValidationError> {
    if code.is_empty() || code.len() > TENANT_CODE_MAX {
        return Err(ValidationError::invalid(
            "tenant_code",
            format!("must be 1 to {} characters", TENANT_CODE_MAX),
        ));
    }
    if !code
        .bytes()
        .all(|b| b.is_ascii_alphanumeric() || b == b'_' || b == b'-')
    {
        return Err(ValidationError::invalid(
            "tenant_code",
            "may only contain letters, digits, '_' and '-'",
        ));
    }
    Ok(())
}

/// Subdomains: a single lowercase DNS label that is not reserved.
pub fn validate_subdomain(subdomain: &str) -> Result<(), ValidationError> {
    let valid_label = !subdomain.is_empty()
        && subdomain.len() <= 63
        && !subdomain.starts_with('-')
        && !subdomain.ends_with('-')
        && subdomain
            .bytes()
            .all(|b| b.is_ascii_lowercase() || b.is_ascii_digit() || b == b'-');

    if !valid_label {
        return Err(ValidationError::invalid(
            "subdomain",
            "must be a lowercase DNS label (a-z, 0-9, '-')",
        ));
    }
    if RESERVED_SUBDOMAINS.contains(&subdomain) {
        return Err(ValidationError::invalid(
            "subdomain",
            format!("'{}' is reserved", subdomain),
        ));
    }
    Ok(())
}

/// Credentials for the initial admin staff row.
#[derive(Clone, PartialEq, Eq)]
pub struct AdminCredentials {
    pub username: String,
    pub password: String,
    pub email: String,
    pub first_name: String,
    pub last_name: String,
    pub phone_number: Option<String>,
}

impl AdminCredentials {
    /// Credentials with the default admin display name and no phone number.
    pub fn new(
        username: impl Into<String>,
        password: impl Into<String>,
        email: impl Into<String>,
    ) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
            email: email.into(),
            first_name: "Admin".to_string(),
            last_name: "User".to_string(),
            phone_number: None,
        }
    }

    /// Checks every field without touching storage.
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.username.chars().count() < ADMIN_USERNAME_MIN {
            return Err(ValidationError::invalid(
                "admin_username",
                format!("must be at least {} characters", ADMIN_USERNAME_MIN),
            ));
        }
        if self.password.chars().count() < ADMIN_PASSWORD_MIN {
            return Err(ValidationError::invalid(
                "admin_password",
                format!("must be at least {} characters", ADMIN_PASSWORD_MIN),
            ));
        }
        if self.email.trim().is_empty() || !self.email.contains('@') {
            return Err(ValidationError::invalid(
                "admin_email",
                "must be an email address",
            ));
        }
        Ok(())
    }
}

impl fmt::Debug for AdminCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AdminCredentials")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .field("email", &self.email)
            .finish_non_exhaustive()
    }
}
