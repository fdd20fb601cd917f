//! Tenant configuration model.
//!
//! Wire format is the camelCase JSON produced by the admin surface, e.g.
//!
//! ```json
//! {
//!   "subdomain": "weather",
//!   "name": "Weather Tools",
//!   "tools": [{
//!     "name": "forecast", "description": "...", "type": "http",
//!     "endpoint": "https://api.example.com/forecast", "price": 10
//!   }],
//!   "pricing": { "payoutAddress": "0xabc", "platformFeePercentage": 20 }
//! }
//! ```

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashSet;
use thiserror::Error;

use crate::types::TenantId;

// =============================================================================
// Tenant configuration
// =============================================================================

/// Everything needed to build one tenant's hosted server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HostedServerConfig {
    pub subdomain: TenantId,
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub tools: Vec<ToolDescriptor>,
    #[serde(default)]
    pub prompts: Vec<PromptDescriptor>,
    #[serde(default)]
    pub resources: Vec<ResourceDescriptor>,
    #[serde(default)]
    pub pricing: Pricing,
    #[serde(default)]
    pub total_calls: u64,
    #[serde(default)]
    pub calls_this_month: u64,
}

impl HostedServerConfig {
    /// Find a tool by name.
    pub fn tool(&self, name: &str) -> Option<&ToolDescriptor> {
        self.tools.iter().find(|t| t.name == name)
    }

    /// Report configuration problems. Empty means the config is clean.
    ///
    /// Problems do not block instance creation: each broken tool fails its
    /// own dispatch instead.
    pub fn validate(&self) -> Vec<String> {
        let mut problems = Vec::new();
        let mut seen = HashSet::new();

        if self.name.trim().is_empty() {
            problems.push("Server name cannot be empty".to_string());
        }

        for tool in &self.tools {
            if !seen.insert(tool.name.as_str()) {
                problems.push(format!("Duplicate tool name: {}", tool.name));
            }
            if let Err(e) = tool.strategy() {
                problems.push(format!("Tool '{}': {}", tool.name, e));
            }
        }

        if let Some(pct) = self.pricing.platform_fee_percentage {
            if !(0.0..=100.0).contains(&pct) {
                problems.push(format!("Platform fee percentage out of range: {}", pct));
            }
        }

        let has_paid_tool = self.tools.iter().any(|t| t.enabled && t.price > 0);
        if has_paid_tool && self.pricing.payout_address.is_empty() {
            problems.push("Paid tools configured without a payout address".to_string());
        }

        for resource in &self.resources {
            if resource.kind == ResourceKind::Dynamic && resource.endpoint.is_none() {
                problems.push(format!("Resource '{}': dynamic resource missing endpoint", resource.name));
            }
        }

        problems
    }
}

/// Creator payout settings.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Pricing {
    /// Address that receives the creator share.
    #[serde(default)]
    pub payout_address: String,
    /// Platform fee in percent (0..=100). `None` uses the runtime default.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub platform_fee_percentage: Option<f64>,
}

// =============================================================================
// Tools
// =============================================================================

/// Declarative definition of one callable tool.
///
/// `kind` and the payload fields are kept as written so a misconfigured tool
/// can still be registered and report its problem when called; the typed
/// view is [`ToolDescriptor::strategy`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolDescriptor {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default = "empty_object_schema")]
    pub input_schema: Value,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub endpoint: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub proxy_target: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
    /// Price in the currency's minor unit. 0 = free.
    #[serde(default)]
    pub price: u64,
}

/// How a tool call is carried out.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutionStrategy<'a> {
    /// POST the arguments as JSON to `endpoint`.
    Http { endpoint: &'a str },
    /// Forward the call to another hosted instance.
    Proxy { target: &'a str },
    /// Run `source` in the code sandbox.
    Code { source: &'a str },
}

impl ExecutionStrategy<'_> {
    pub fn name(&self) -> &'static str {
        match self {
            ExecutionStrategy::Http { .. } => "http",
            ExecutionStrategy::Proxy { .. } => "proxy",
            ExecutionStrategy::Code { .. } => "code",
        }
    }
}

/// A tool descriptor that cannot be executed as written.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ToolConfigError {
    #[error("Unknown tool type: {0}")]
    UnsupportedType(String),
    #[error("{kind} tool missing {field}")]
    MissingPayload {
        kind: &'static str,
        field: &'static str,
    },
}

impl ToolDescriptor {
    /// Resolve the execution strategy, checking the type-specific payload.
    pub fn strategy(&self) -> Result<ExecutionStrategy<'_>, ToolConfigError> {
        fn present(field: &Option<String>) -> Option<&str> {
            field.as_deref().filter(|s| !s.trim().is_empty())
        }

        match self.kind.as_str() {
            "http" => present(&self.endpoint)
                .map(|endpoint| ExecutionStrategy::Http { endpoint })
                .ok_or(ToolConfigError::MissingPayload {
                    kind: "HTTP",
                    field: "endpoint",
                }),
            "proxy" => present(&self.proxy_target)
                .map(|target| ExecutionStrategy::Proxy { target })
                .ok_or(ToolConfigError::MissingPayload {
                    kind: "Proxy",
                    field: "target",
                }),
            "code" => present(&self.code)
                .map(|source| ExecutionStrategy::Code { source })
                .ok_or(ToolConfigError::MissingPayload {
                    kind: "Code",
                    field: "implementation",
                }),
            other => Err(ToolConfigError::UnsupportedType(other.to_string())),
        }
    }

    pub fn is_paid(&self) -> bool {
        self.price > 0
    }
}

fn empty_object_schema() -> Value {
    serde_json::json!({ "type": "object" })
}

fn default_enabled() -> bool {
    true
}

// =============================================================================
// Prompts and resources
// =============================================================================

/// Prompt template. `{{key}}` placeholders are filled from call arguments.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PromptDescriptor {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub template: String,
    /// When set, the template is fetched from here on every request.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub endpoint: Option<String>,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResourceKind {
    Static,
    Dynamic,
}

/// Readable resource: static content or fetched from an endpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceDescriptor {
    pub name: String,
    pub uri: String,
    #[serde(default)]
    pub description: String,
    #[serde(default = "default_mime_type")]
    pub mime_type: String,
    #[serde(rename = "type")]
    pub kind: ResourceKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub endpoint: Option<String>,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

fn default_mime_type() -> String {
    "text/plain".to_string()
}

/// Replace every `{{key}}` with its argument. Unknown placeholders stay.
pub fn render_template<'a>(
    template: &str,
    args: impl IntoIterator<Item = (&'a String, &'a String)>,
) -> String {
    let mut rendered = template.to_string();
    for (key, value) in args {
        rendered = rendered.replace(&format!("{{{{{}}}}}", key), value);
    }
    rendered
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::collections::HashMap;

    fn tool(kind: &str) -> ToolDescriptor {
        ToolDescriptor {
            name: "t".to_string(),
            description: String::new(),
            input_schema: json!({"type": "object"}),
            enabled: true,
            kind: kind.to_string(),
            endpoint: None,
            proxy_target: None,
            code: None,
            price: 0,
        }
    }

    #[test]
    fn test_parse_camel_case_config() {
        let config: HostedServerConfig = serde_json::from_value(json!({
            "subdomain": "weather",
            "name": "Weather",
            "tools": [{
                "name": "forecast",
                "type": "proxy",
                "proxyTarget": "upstream",
                "price": 10,
            }],
            "resources": [{
                "name": "readme", "uri": "docs://readme", "type": "static", "content": "hi"
            }],
            "pricing": {"payoutAddress": "0xabc", "platformFeePercentage": 20},
            "totalCalls": 4,
        }))
        .unwrap();

        assert_eq!(config.subdomain.as_str(), "weather");
        let forecast = config.tool("forecast").unwrap();
        assert!(forecast.enabled);
        assert!(forecast.is_paid());
        assert_eq!(
            forecast.strategy().unwrap(),
            ExecutionStrategy::Proxy { target: "upstream" }
        );
        assert_eq!(config.resources[0].mime_type, "text/plain");
        assert_eq!(config.total_calls, 4);
        assert_eq!(config.calls_this_month, 0);
    }

    #[test]
    fn test_negative_price_rejected_at_parse() {
        let parsed: Result<ToolDescriptor, _> =
            serde_json::from_value(json!({"name": "x", "type": "http", "price": -1}));
        assert!(parsed.is_err());
    }

    #[test]
    fn test_strategy_requires_payload() {
        assert_eq!(
            tool("http").strategy().unwrap_err().to_string(),
            "HTTP tool missing endpoint"
        );
        assert_eq!(
            tool("proxy").strategy().unwrap_err().to_string(),
            "Proxy tool missing target"
        );
        assert_eq!(
            tool("code").strategy().unwrap_err().to_string(),
            "Code tool missing implementation"
        );

        let mut blank = tool("http");
        blank.endpoint = Some("  ".to_string());
        assert!(blank.strategy().is_err());
    }

    #[test]
    fn test_strategy_unsupported_type() {
        assert_eq!(
            tool("grpc").strategy().unwrap_err(),
            ToolConfigError::UnsupportedType("grpc".to_string())
        );
    }

    #[test]
    fn test_validate_reports_problems() {
        let mut paid = tool("code");
        paid.code = Some("return 1".to_string());
        paid.price = 5;
        let config = HostedServerConfig {
            subdomain: TenantId::from_string("acme".to_string()).unwrap(),
            name: "Acme".to_string(),
            description: String::new(),
            tools: vec![paid.clone(), paid, tool("ftp")],
            prompts: vec![],
            resources: vec![],
            pricing: Pricing {
                payout_address: String::new(),
                platform_fee_percentage: Some(150.0),
            },
            total_calls: 0,
            calls_this_month: 0,
        };

        let problems = config.validate();
        assert!(problems.iter().any(|p| p.contains("Duplicate tool name")));
        assert!(problems.iter().any(|p| p.contains("Unknown tool type: ftp")));
        assert!(problems.iter().any(|p| p.contains("out of range")));
        assert!(problems.iter().any(|p| p.contains("payout address")));
    }

    #[test]
    fn test_render_template() {
        let args: HashMap<String, String> = [
            ("name".to_string(), "Ada".to_string()),
            ("lang".to_string(), "Rust".to_string()),
        ]
        .into_iter()
        .collect();

        let out = render_template("Hi {{name}}, {{name}} writes {{lang}} {{unknown}}", &args);
        assert_eq!(out, "Hi Ada, Ada writes Rust {{unknown}}");
    }
}
