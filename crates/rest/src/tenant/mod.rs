//! Subdomain-based tenant resolution.
//!
//! A request names its tenant only through the `Host` header:
//!
//! - `bangkok.his.example.com` and `bangkok.localhost` name tenant `bangkok`
//! - `localhost`, `127.0.0.1` and two-label hosts name no tenant
//! - reserved subdomains (`www`, `api` by default) name no tenant
//!
//! Requests without a tenant run in the shared context. A subdomain that is
//! not reserved must resolve to an active tenant, otherwise the request fails.

mod resolver;

pub use resolver::{RequestTenantResolver, extract_subdomain};
