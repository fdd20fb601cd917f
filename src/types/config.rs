//! Configuration structures.
//!
//! Configuration is loaded from a TOML file and environment overrides.

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use super::errors::{Error, Result};

/// Global runtime configuration.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    /// Server configuration.
    #[serde(default)]
    pub server: ServerConfig,

    /// Observability configuration.
    #[serde(default)]
    pub observability: ObservabilityConfig,

    /// Instance registry configuration.
    #[serde(default)]
    pub registry: RegistryConfig,

    /// Code sandbox configuration.
    #[serde(default)]
    pub sandbox: SandboxConfig,

    /// Outbound HTTP configuration.
    #[serde(default)]
    pub outbound: OutboundConfig,

    /// Payment gate configuration.
    #[serde(default)]
    pub payment: PaymentConfig,
}

impl Config {
    /// Load configuration from a TOML file. Missing sections use defaults.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)?;
        toml::from_str(&raw).map_err(|e| {
            Error::validation(format!("invalid config file {}: {}", path.display(), e))
        })
    }

    /// Apply `TOOLHOST_*` environment overrides.
    pub fn apply_env(&mut self) {
        if let Ok(addr) = std::env::var("TOOLHOST_LISTEN_ADDR") {
            self.server.listen_addr = addr;
        }
        if let Ok(domain) = std::env::var("TOOLHOST_BASE_DOMAIN") {
            self.server.base_domain = domain;
        }
    }
}

/// Server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// HTTP bind address.
    pub listen_addr: String,

    /// Parent domain under which tenants live as subdomains.
    pub base_domain: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_addr: "127.0.0.1:8787".to_string(),
            base_domain: "toolhost.local".to_string(),
        }
    }
}

/// Observability configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Tracing log level (trace, debug, info, warn, error).
    pub log_level: String,

    /// Enable JSON log formatting.
    pub json_logs: bool,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            json_logs: false,
        }
    }
}

/// Instance registry configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RegistryConfig {
    /// How long a constructed instance stays cached.
    #[serde(with = "humantime_serde")]
    pub instance_ttl: Duration,

    /// Maximum number of live instances per process.
    pub max_instances: usize,

    /// How often expired instances are pruned in the background.
    #[serde(with = "humantime_serde")]
    pub prune_interval: Duration,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            instance_ttl: Duration::from_secs(30 * 60),
            max_instances: 1000,
            prune_interval: Duration::from_secs(60),
        }
    }
}

/// Code sandbox configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SandboxConfig {
    /// Interpreter executable. Receives the request envelope on stdin.
    pub program: String,

    /// Interpreter arguments. Empty means the embedded harness for `node`.
    pub args: Vec<String>,

    /// Wall-clock deadline per execution.
    #[serde(with = "humantime_serde")]
    pub timeout: Duration,

    /// Maximum concurrent sandboxed executions per process.
    pub max_concurrent: usize,

    /// Cap on captured stdout/stderr bytes.
    pub max_output_bytes: usize,

    /// Node permission-model flag passed to the embedded harness
    /// (`--permission` on node 22 and later). Empty disables it.
    pub permission_flag: String,

    /// V8 old-space heap cap for the embedded harness, in megabytes.
    pub max_heap_mb: u32,
}

impl Default for SandboxConfig {
    fn default() -> Self {
        Self {
            program: "node".to_string(),
            args: Vec::new(),
            timeout: Duration::from_secs(5),
            max_concurrent: 16,
            max_output_bytes: 1024 * 1024,
            permission_flag: "--experimental-permission".to_string(),
            max_heap_mb: 128,
        }
    }
}

/// Outbound HTTP configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OutboundConfig {
    /// Deadline for each outbound HTTP call.
    #[serde(with = "humantime_serde")]
    pub request_timeout: Duration,

    /// User-Agent header for outbound calls.
    pub user_agent: String,
}

impl Default for OutboundConfig {
    fn default() -> Self {
        Self {
            request_timeout: Duration::from_secs(30),
            user_agent: concat!("toolhost/", env!("CARGO_PKG_VERSION")).to_string(),
        }
    }
}

/// Payment gate configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PaymentConfig {
    /// Currency quoted in payment-required responses.
    pub currency: String,

    /// Settlement network identifier (CAIP-2).
    pub network: String,

    /// Platform fee used when a tenant's pricing omits one (0..=100).
    pub default_platform_fee_percentage: f64,
}

impl Default for PaymentConfig {
    fn default() -> Self {
        Self {
            currency: "USDC".to_string(),
            network: "eip155:8453".to_string(),
            default_platform_fee_percentage: 20.0,
        }
    }
}
