//! Inbound routing: subdomain to running instance to protocol response.

use serde::{Deserialize, Serialize};
use std::sync::Arc;

use super::registry::InstanceRegistry;
use crate::protocol::{JsonRpcRequest, JsonRpcResponse};
use crate::types::{Result, TenantId};

/// Body returned when no server exists for a subdomain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotFoundResponse {
    pub error: String,
    pub code: u16,
    pub message: String,
}

impl NotFoundResponse {
    pub fn new(subdomain: &str, base_domain: &str) -> Self {
        Self {
            error: "Server not found".to_string(),
            code: 404,
            message: format!("No MCP server found at {}.{}", subdomain, base_domain),
        }
    }
}

/// Result of routing one request.
#[derive(Debug, Clone, PartialEq)]
pub enum RouteOutcome {
    Handled(JsonRpcResponse),
    /// A notification was delivered; there is nothing to send back.
    Accepted,
    NotFound(NotFoundResponse),
}

/// Resolves tenants and forwards requests to their instances.
#[derive(Debug, Clone)]
pub struct InboundRouter {
    registry: Arc<InstanceRegistry>,
    base_domain: String,
}

impl InboundRouter {
    pub fn new(registry: Arc<InstanceRegistry>, base_domain: impl Into<String>) -> Self {
        Self {
            registry,
            base_domain: base_domain.into(),
        }
    }

    pub fn base_domain(&self) -> &str {
        &self.base_domain
    }

    pub fn registry(&self) -> &Arc<InstanceRegistry> {
        &self.registry
    }

    /// Route a request addressed to `subdomain`.
    ///
    /// A subdomain that is not a valid tenant id is simply not found.
    /// `Err` is returned only when the configuration source failed.
    pub async fn route(&self, subdomain: &str, request: JsonRpcRequest) -> Result<RouteOutcome> {
        let not_found = || RouteOutcome::NotFound(NotFoundResponse::new(subdomain, &self.base_domain));

        let Ok(tenant) = TenantId::from_string(subdomain.to_string()) else {
            tracing::debug!(subdomain, "invalid_subdomain");
            return Ok(not_found());
        };

        match self.registry.lookup_or_create(&tenant).await? {
            Some(instance) => {
                tracing::debug!(tenant = %tenant, method = %request.method, "routing_request");
                Ok(match instance.server().handle(request).await {
                    Some(response) => RouteOutcome::Handled(response),
                    None => RouteOutcome::Accepted,
                })
            }
            None => Ok(not_found()),
        }
    }

    /// Extract the tenant label from a `Host` header value.
    ///
    /// `acme.toolhost.local:8787` under base domain `toolhost.local` yields
    /// `acme`. Nested labels and the bare base domain yield `None`.
    pub fn tenant_from_host(&self, host: &str) -> Option<String> {
        let host = host.trim().trim_end_matches('.');
        let host = match host.rsplit_once(':') {
            Some((name, port)) if port.chars().all(|c| c.is_ascii_digit()) => name,
            _ => host,
        };
        let host = host.to_ascii_lowercase();
        let suffix = format!(".{}", self.base_domain.to_ascii_lowercase());
        let label = host.strip_suffix(&suffix)?;
        if label.is_empty() || label.contains('.') {
            return None;
        }
        Some(label.to_string())
    }
}
