//! Tenant types and context for multi-tenancy support
//!
//! A tenant is only ever established from trusted, server-side context: a
//! header injected by the authenticating gateway in front of the runtime, or a
//! tenant pinned in configuration for single-tenant deployments. Request
//! payloads never contribute to tenant resolution.

use http::HeaderMap;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::{Error, Result};

/// Header the runtime's inbound auth layer populates with the caller's tenant.
pub const DEFAULT_TENANT_HEADER: &str = "x-amzn-bedrock-agentcore-runtime-custom-tenant-id";

/// Maximum accepted length of a tenant identifier.
pub const MAX_TENANT_ID_LEN: usize = 128;

static TENANT_ID_PATTERN: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[A-Za-z0-9._-]+$").unwrap());

/// Opaque identifier of a tenant's document partition.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct TenantId(String);

impl TenantId {
    /// Parse and validate a tenant ID
    pub fn parse(s: &str) -> Result<Self> {
        let trimmed = s.trim();
        if trimmed.is_empty() {
            return Err(Error::InvalidTenant("tenant ID is empty".to_string()));
        }
        if trimmed.len() > MAX_TENANT_ID_LEN {
            return Err(Error::InvalidTenant(format!(
                "tenant ID exceeds {} characters",
                MAX_TENANT_ID_LEN
            )));
        }
        if !TENANT_ID_PATTERN.is_match(trimmed) {
            return Err(Error::InvalidTenant(format!(
                "tenant ID '{}' contains unsupported characters",
                trimmed
            )));
        }
        Ok(Self(trimmed.to_string()))
    }

    /// Get the string value
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TenantId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for TenantId {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl TryFrom<String> for TenantId {
    type Error = Error;

    fn try_from(value: String) -> Result<Self> {
        Self::parse(&value)
    }
}

impl From<TenantId> for String {
    fn from(value: TenantId) -> Self {
        value.0
    }
}

/// Where the trusted tenant identifier comes from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum TenantSource {
    /// A header set by the authenticating layer in front of the runtime
    Header {
        #[serde(default = "default_tenant_header")]
        name: String,
    },
    /// A single tenant pinned by deployment configuration
    Static { tenant_id: String },
}

impl Default for TenantSource {
    fn default() -> Self {
        TenantSource::Header {
            name: default_tenant_header(),
        }
    }
}

fn default_tenant_header() -> String {
    DEFAULT_TENANT_HEADER.to_string()
}

/// The tenant an invocation runs on behalf of.
///
/// Only [`TenantResolver`] can produce one, so holding a `TenantContext`
/// means the tenant came from trusted context.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TenantContext {
    tenant_id: TenantId,
    origin: &'static str,
}

impl TenantContext {
    /// Get the tenant ID
    pub fn tenant_id(&self) -> &TenantId {
        &self.tenant_id
    }

    /// Describes how the tenant was resolved ("header" or "static")
    pub fn origin(&self) -> &'static str {
        self.origin
    }
}

/// Resolves the tenant for an inbound request, failing closed.
#[derive(Debug, Clone)]
pub struct TenantResolver {
    source: TenantSource,
    static_tenant: Option<TenantId>,
}

impl TenantResolver {
    /// Create a resolver, validating a static tenant up front
    pub fn new(source: TenantSource) -> Result<Self> {
        let static_tenant = match &source {
            TenantSource::Static { tenant_id } => Some(TenantId::parse(tenant_id)?),
            TenantSource::Header { name } => {
                http::HeaderName::from_bytes(name.as_bytes()).map_err(|e| {
                    Error::Config(format!("Invalid tenant header name '{}': {}", name, e))
                })?;
                None
            }
        };
        Ok(Self {
            source,
            static_tenant,
        })
    }

    /// The configured tenant source
    pub fn source(&self) -> &TenantSource {
        &self.source
    }

    /// Resolve the tenant from trusted request headers.
    ///
    /// # Errors
    /// - `Error::TenantRequired` if the trusted header is absent or blank
    /// - `Error::InvalidTenant` if the value is not a valid tenant ID
    pub fn resolve(&self, headers: &HeaderMap) -> Result<TenantContext> {
        if let Some(tenant_id) = &self.static_tenant {
            return Ok(TenantContext {
                tenant_id: tenant_id.clone(),
                origin: "static",
            });
        }

        let TenantSource::Header { name } = &self.source else {
            return Err(Error::Internal(
                "static tenant source without a tenant".to_string(),
            ));
        };

        let value = headers
            .get(name.as_str())
            .ok_or_else(|| Error::TenantRequired(format!("missing trusted header '{}'", name)))?;

        let value = value.to_str().map_err(|_| {
            Error::InvalidTenant(format!("trusted header '{}' is not valid UTF-8", name))
        })?;

        if value.trim().is_empty() {
            return Err(Error::TenantRequired(format!(
                "trusted header '{}' is empty",
                name
            )));
        }

        Ok(TenantContext {
            tenant_id: TenantId::parse(value)?,
            origin: "header",
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn headers_with(name: &str, value: &str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(
            http::HeaderName::from_bytes(name.as_bytes()).unwrap(),
            value.parse().unwrap(),
        );
        headers
    }

    #[test]
    fn test_tenant_id_parse() {
        let id = TenantId::parse("tenant-a").unwrap();
        assert_eq!(id.as_str(), "tenant-a");
        assert_eq!(id.to_string(), "tenant-a");
    }

    #[test]
    fn test_tenant_id_trims_whitespace() {
        let id = TenantId::parse("  acme.corp_1  ").unwrap();
        assert_eq!(id.as_str(), "acme.corp_1");
    }

    #[test]
    fn test_tenant_id_rejects_invalid() {
        assert!(TenantId::parse("").is_err());
        assert!(TenantId::parse("   ").is_err());
        assert!(TenantId::parse("tenant a").is_err());
        assert!(TenantId::parse("tenant/a").is_err());
        assert!(TenantId::parse(&"x".repeat(MAX_TENANT_ID_LEN + 1)).is_err());
        assert!(TenantId::parse(&"x".repeat(MAX_TENANT_ID_LEN)).is_ok());
    }

    #[test]
    fn test_tenant_id_serde_validates() {
        let ok: TenantId = serde_json::from_str("\"tenant-a\"").unwrap();
        assert_eq!(ok.as_str(), "tenant-a");

        let bad: std::result::Result<TenantId, _> = serde_json::from_str("\"bad tenant\"");
        assert!(bad.is_err());
    }

    #[test]
    fn test_resolve_from_header() {
        let resolver = TenantResolver::new(TenantSource::default()).unwrap();
        let ctx = resolver
            .resolve(&headers_with(DEFAULT_TENANT_HEADER, "tenant-a"))
            .unwrap();
        assert_eq!(ctx.tenant_id().as_str(), "tenant-a");
        assert_eq!(ctx.origin(), "header");
    }

    #[test]
    fn test_resolve_missing_header_fails_closed() {
        let resolver = TenantResolver::new(TenantSource::default()).unwrap();
        let err = resolver.resolve(&HeaderMap::new()).unwrap_err();
        assert!(matches!(err, Error::TenantRequired(_)));
    }

    #[test]
    fn test_resolve_blank_header_fails_closed() {
        let resolver = TenantResolver::new(TenantSource::default()).unwrap();
        let err = resolver
            .resolve(&headers_with(DEFAULT_TENANT_HEADER, "   "))
            .unwrap_err();
        assert!(matches!(err, Error::TenantRequired(_)));
    }

    #[test]
    fn test_resolve_malformed_header() {
        let resolver = TenantResolver::new(TenantSource::default()).unwrap();
        let err = resolver
            .resolve(&headers_with(DEFAULT_TENANT_HEADER, "a;b"))
            .unwrap_err();
        assert!(matches!(err, Error::InvalidTenant(_)));
    }

    #[test]
    fn test_resolve_ignores_other_headers() {
        let resolver = TenantResolver::new(TenantSource::default()).unwrap();
        let err = resolver
            .resolve(&headers_with("x-tenant-id", "tenant-b"))
            .unwrap_err();
        assert!(matches!(err, Error::TenantRequired(_)));
    }

    #[test]
    fn test_resolve_custom_header() {
        let resolver = TenantResolver::new(TenantSource::Header {
            name: "x-verified-tenant".to_string(),
        })
        .unwrap();
        let ctx = resolver
            .resolve(&headers_with("x-verified-tenant", "tenant-c"))
            .unwrap();
        assert_eq!(ctx.tenant_id().as_str(), "tenant-c");
    }

    #[test]
    fn test_static_tenant_ignores_headers() {
        let resolver = TenantResolver::new(TenantSource::Static {
            tenant_id: "tenant-a".to_string(),
        })
        .unwrap();
        let ctx = resolver
            .resolve(&headers_with(DEFAULT_TENANT_HEADER, "tenant-b"))
            .unwrap();
        assert_eq!(ctx.tenant_id().as_str(), "tenant-a");
        assert_eq!(ctx.origin(), "static");
    }

    #[test]
    fn test_invalid_static_tenant_rejected_at_construction() {
        let result = TenantResolver::new(TenantSource::Static {
            tenant_id: "not valid".to_string(),
        });
        assert!(result.is_err());
    }

    #[test]
    fn test_invalid_header_name_rejected_at_construction() {
        let result = TenantResolver::new(TenantSource::Header {
            name: "bad header".to_string(),
        });
        assert!(matches!(result, Err(Error::Config(_))));
    }

    #[test]
    fn test_tenant_source_deserialize() {
        let source: TenantSource =
            serde_json::from_str(r#"{"type": "static", "tenant_id": "tenant-a"}"#).unwrap();
        assert_eq!(
            source,
            TenantSource::Static {
                tenant_id: "tenant-a".to_string()
            }
        );

        let source: TenantSource = serde_json::from_str(r#"{"type": "header"}"#).unwrap();
        assert_eq!(source, TenantSource::default());
    }
}
