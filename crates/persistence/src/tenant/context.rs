//! Request-scoped tenant context.
//!
//! A [`TenantContext`] is attached to a single inbound request once its host
//! has been resolved. It is never persisted and never shared across requests.

use serde::Serialize;

use super::schema_name::SchemaName;
use crate::error::TenantError;

/// The tenant a request resolved to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TenantInfo {
    /// Surrogate id of the tenant row.
    pub tenant_id: i64,
    /// External tenant code.
    pub tenant_code: String,
    /// Validated schema backing the tenant.
    pub schema_name: SchemaName,
    /// Subdomain the tenant answers on.
    pub subdomain: String,
    /// Eight-character hospital code used as the HN prefix.
    pub hospital_code: String,
}

/// Tenant binding for the lifetime of one request.
///
/// Either the shared (public) context, reached only through a reserved
/// subdomain or a host without one, or a resolved tenant.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct TenantContext {
    tenant: Option<TenantInfo>,
}

impl TenantContext {
    /// The shared context with no tenant bound.
    pub fn public() -> Self {
        Self { tenant: None }
    }

    /// A context bound to `tenant`.
    pub fn for_tenant(tenant: TenantInfo) -> Self {
        Self {
            tenant: Some(tenant),
        }
    }

    /// Returns true when no tenant is bound.
    pub fn is_public(&self) -> bool {
        self.tenant.is_none()
    }

    /// Returns the bound tenant, if any.
    pub fn tenant(&self) -> Option<&TenantInfo> {
        self.tenant.as_ref()
    }

    /// Returns the bound tenant or [`TenantError::Required`].
    pub fn require(&self) -> Result<&TenantInfo, TenantError> {
        self.tenant.as_ref().ok_or(TenantError::Required)
    }

    /// Schema of the bound tenant.
    pub fn schema_name(&self) -> Option<&SchemaName> {
        self.tenant.as_ref().map(|t| &t.schema_name)
    }

    /// Id of the bound tenant.
    pub fn tenant_id(&self) -> Option<i64> {
        self.tenant.as_ref().map(|t| t.tenant_id)
    }
}
