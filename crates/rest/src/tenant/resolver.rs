//! Host header to tenant resolution.

use std::collections::HashSet;
use std::sync::Arc;

use his_persistence::StorageResult;
use his_persistence::error::TenantError;
use his_persistence::tenant::{RESERVED_SUBDOMAINS, TenantContext, TenantDirectory, TenantInfo};
use tracing::debug;

/// Extracts the tenant subdomain from a `Host` header value.
///
/// The port is stripped first. `localhost` and `127.0.0.1` carry no
/// subdomain; `a.b.c...` yields `a`; `a.localhost` yields `a`; anything else
/// yields `None`.
///
/// ```
/// use his_rest::tenant::extract_subdomain;
///
/// assert_eq!(extract_subdomain("bangkok.his.example.com:8080"), Some("bangkok"));
/// assert_eq!(extract_subdomain("bangkok.localhost"), Some("bangkok"));
/// assert_eq!(extract_subdomain("example.com"), None);
/// ```
pub fn extract_subdomain(host: &str) -> Option<&str> {
    let host = match host.rfind(':') {
        Some(idx) => &host[..idx],
        None => host,
    };

    if host == "localhost" || host == "127.0.0.1" {
        return None;
    }

    let labels: Vec<&str> = host.split('.').collect();
    let subdomain = match labels.as_slice() {
        [first, _, _, ..] => *first,
        [first, "localhost"] => *first,
        _ => return None,
    };

    (!subdomain.is_empty()).then_some(subdomain)
}

/// Maps an inbound host to the tenant context of the request.
///
/// Reserved subdomains and hosts without a subdomain resolve to the shared
/// context. Any other subdomain must name an active tenant; there is no
/// fallback to the shared schema.
#[derive(Clone)]
pub struct RequestTenantResolver {
    directory: Arc<dyn TenantDirectory>,
    reserved: HashSet<String>,
}

impl std::fmt::Debug for RequestTenantResolver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RequestTenantResolver")
            .field("reserved", &self.reserved)
            .finish_non_exhaustive()
    }
}

impl RequestTenantResolver {
    /// A resolver over `directory` with the given reserved subdomains.
    pub fn new<I, S>(directory: Arc<dyn TenantDirectory>, reserved: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            directory,
            reserved: reserved.into_iter().map(Into::into).collect(),
        }
    }

    /// A resolver reserving `www` and `api`.
    pub fn with_default_reserved(directory: Arc<dyn TenantDirectory>) -> Self {
        Self::new(directory, RESERVED_SUBDOMAINS)
    }

    /// Returns true when `subdomain` is served from the shared schema.
    pub fn is_reserved(&self, subdomain: &str) -> bool {
        subdomain.is_empty() || self.reserved.contains(subdomain)
    }

    /// Resolves the context for a request with the given `Host` header.
    pub async fn resolve(&self, host: Option<&str>) -> StorageResult<TenantContext> {
        let subdomain = match host.and_then(extract_subdomain) {
            Some(sub) if !self.is_reserved(sub) => sub,
            other => {
                debug!(subdomain = ?other, "Resolved to shared context");
                return Ok(TenantContext::public());
            }
        };

        let tenant = self
            .directory
            .find_by_subdomain(subdomain)
            .await?
            .ok_or_else(|| TenantError::NotFound {
                key: subdomain.to_string(),
            })?;

        if !tenant.is_active {
            return Err(TenantError::Inactive {
                key: subdomain.to_string(),
            }
            .into());
        }

        let info = tenant.info()?;
        debug!(subdomain, schema = %info.schema_name, tenant_id = info.tenant_id, "Resolved tenant");
        Ok(TenantContext::for_tenant(info))
    }

    /// Like [`resolve`](Self::resolve) but refuses the shared context.
    pub async fn resolve_required(&self, host: Option<&str>) -> StorageResult<TenantInfo> {
        let ctx = self.resolve(host).await?;
        Ok(ctx.require()?.clone())
    }
}
