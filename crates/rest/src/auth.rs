//! Bearer tokens carrying a tenant schema claim.
//!
//! Tokens are HS256 JWTs. Each one names the schema it was issued for; a
//! request that resolves to a different tenant is refused so a token cannot
//! be replayed across tenants.

use axum::http::{HeaderMap, header::AUTHORIZATION};
use chrono::{Duration, Utc};
use his_persistence::error::TenantError;
use his_persistence::records::Staff;
use his_persistence::tenant::{TenantContext, TenantInfo};
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation, decode, encode};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Claims of an issued token.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Claims {
    /// Subject: the username.
    pub sub: String,
    /// Staff row id inside the tenant schema.
    pub user_id: i32,
    /// Login name.
    pub username: String,
    /// Administrative flag.
    pub is_admin: bool,
    /// Tenant the token was issued for.
    pub tenant_id: i64,
    /// Schema the token was issued for.
    pub schema_name: String,
    /// Expiry (seconds since the epoch).
    pub exp: i64,
    /// Issue time (seconds since the epoch).
    pub iat: i64,
}

/// Token errors.
#[derive(Debug, Error)]
pub enum AuthError {
    /// No `Authorization` header.
    #[error("authorization header required")]
    MissingHeader,

    /// The header is not `Bearer <token>`.
    #[error("invalid authorization header format")]
    MalformedHeader,

    /// Bad signature, malformed token or expired.
    #[error("invalid or expired token")]
    InvalidToken(#[source] jsonwebtoken::errors::Error),

    /// Signing failed.
    #[error("failed to sign token: {0}")]
    Encode(#[source] jsonwebtoken::errors::Error),
}

/// Signing and verification keys plus the token lifetime.
#[derive(Clone)]
pub struct JwtKeys {
    encoding: EncodingKey,
    decoding: DecodingKey,
    ttl: Duration,
}

impl std::fmt::Debug for JwtKeys {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JwtKeys")
            .field("ttl", &self.ttl)
            .finish_non_exhaustive()
    }
}

impl JwtKeys {
    /// Keys derived from `secret`; tokens live for `ttl`.
    pub fn new(secret: &str, ttl: Duration) -> Self {
        Self {
            encoding: EncodingKey::from_secret(secret.as_bytes()),
            decoding: DecodingKey::from_secret(secret.as_bytes()),
            ttl,
        }
    }

    /// Issues a token for `staff` bound to `tenant`'s schema.
    pub fn issue(&self, staff: &Staff, tenant: &TenantInfo) -> Result<String, AuthError> {
        let now = Utc::now();
        let claims = Claims {
            sub: staff.username.clone(),
            user_id: staff.id,
            username: staff.username.clone(),
            is_admin: staff.is_admin,
            tenant_id: tenant.tenant_id,
            schema_name: tenant.schema_name.to_string(),
            exp: (now + self.ttl).timestamp(),
            iat: now.timestamp(),
        };
        self.encode(&claims)
    }

    /// Signs arbitrary claims.
    pub fn encode(&self, claims: &Claims) -> Result<String, AuthError> {
        encode(&Header::new(Algorithm::HS256), claims, &self.encoding).map_err(AuthError::Encode)
    }

    /// Verifies signature and expiry.
    pub fn decode(&self, token: &str) -> Result<Claims, AuthError> {
        let validation = Validation::new(Algorithm::HS256);
        decode::<Claims>(token, &self.decoding, &validation)
            .map(|data| data.claims)
            .map_err(AuthError::InvalidToken)
    }
}

/// The token of an `Authorization: Bearer <token>` header.
pub fn bearer_token(headers: &HeaderMap) -> Result<&str, AuthError> {
    let value = headers
        .get(AUTHORIZATION)
        .ok_or(AuthError::MissingHeader)?
        .to_str()
        .map_err(|_| AuthError::MalformedHeader)?;

    let mut parts = value.split(' ');
    match (parts.next(), parts.next(), parts.next()) {
        (Some("Bearer"), Some(token), None) if !token.is_empty() => Ok(token),
        _ => Err(AuthError::MalformedHeader),
    }
}

/// Refuses a token issued for a schema other than the one the request resolved to.
///
/// Only checked when both sides name a schema.
pub fn ensure_schema_matches(claims: &Claims, ctx: &TenantContext) -> Result<(), TenantError> {
    match ctx.schema_name() {
        Some(resolved) if !claims.schema_name.is_empty() && claims.schema_name != resolved.as_str() => {
            Err(TenantError::SchemaMismatch {
                claimed: claims.schema_name.clone(),
                resolved: resolved.to_string(),
            })
        }
        _ => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;
    use his_persistence::tenant::SchemaName;

    fn keys() -> JwtKeys {
        JwtKeys::new("test-secret", Duration::hours(1))
    }

    fn claims(schema: &str) -> Claims {
        let now = Utc::now().timestamp();
        Claims {
            sub: "admin1".to_string(),
            user_id: 1,
            username: "admin1".to_string(),
            is_admin: true,
            tenant_id: 7,
            schema_name: schema.to_string(),
            exp: now + 3600,
            iat: now,
        }
    }

    fn context(schema: &str) -> TenantContext {
        TenantContext::for_tenant(TenantInfo {
            tenant_id: 7,
            tenant_code: "HOSP001".to_string(),
            schema_name: SchemaName::parse(schema).unwrap(),
            subdomain: "bangkok".to_string(),
            hospital_code: "HOSP0001".to_string(),
        })
    }

    #[test]
    fn test_encode_decode() {
        let keys = keys();
        let token = keys.encode(&claims("tenant_hosp001")).unwrap();
        let decoded = keys.decode(&token).unwrap();
        assert_eq!(decoded.schema_name, "tenant_hosp001");
        assert!(decoded.is_admin);
    }

    #[test]
    fn test_decode_rejects_other_secret() {
        let token = keys().encode(&claims("tenant_hosp001")).unwrap();
        let other = JwtKeys::new("other-secret", Duration::hours(1));
        assert!(matches!(other.decode(&token), Err(AuthError::InvalidToken(_))));
    }

    #[test]
    fn test_decode_rejects_expired() {
        let keys = keys();
        let mut expired = claims("tenant_hosp001");
        expired.exp = Utc::now().timestamp() - 3600;
        let token = keys.encode(&expired).unwrap();
        assert!(matches!(keys.decode(&token), Err(AuthError::InvalidToken(_))));
    }

    #[test]
    fn test_bearer_token() {
        let mut headers = HeaderMap::new();
        assert!(matches!(bearer_token(&headers), Err(AuthError::MissingHeader)));

        headers.insert(AUTHORIZATION, HeaderValue::from_static("Basic abc"));
        assert!(matches!(bearer_token(&headers), Err(AuthError::MalformedHeader)));

        headers.insert(AUTHORIZATION, HeaderValue::from_static("Bearer a b"));
        assert!(matches!(bearer_token(&headers), Err(AuthError::MalformedHeader)));

        headers.insert(AUTHORIZATION, HeaderValue::from_static("Bearer abc.def.ghi"));
        assert_eq!(bearer_token(&headers).unwrap(), "abc.def.ghi");
    }

    #[test]
    fn test_schema_claim_must_match() {
        let ctx = context("tenant_hosp001");
        assert!(ensure_schema_matches(&claims("tenant_hosp001"), &ctx).is_ok());

        let err = ensure_schema_matches(&claims("tenant_hosp002"), &ctx).unwrap_err();
        assert_eq!(
            err,
            TenantError::SchemaMismatch {
                claimed: "tenant_hosp002".to_string(),
                resolved: "tenant_hosp001".to_string(),
            }
        );
    }

    #[test]
    fn test_schema_claim_ignored_without_tenant() {
        assert!(ensure_schema_matches(&claims("tenant_hosp001"), &TenantContext::public()).is_ok());
        assert!(ensure_schema_matches(&claims(""), &context("tenant_hosp001")).is_ok());
    }
}
