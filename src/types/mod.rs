//! Core types for the hosting runtime.
//!
//! This module provides foundational types used throughout the system:
//! - **IDs**: Strongly-typed identifiers (TenantId, RequestId, CallId)
//! - **Errors**: Application error types with thiserror derives
//! - **Config**: Configuration structures for server, registry, sandbox and payments

mod config;
mod errors;
mod ids;

pub use config::{
    Config, ObservabilityConfig, OutboundConfig, PaymentConfig, RegistryConfig, SandboxConfig,
    ServerConfig,
};
pub use errors::{Error, Result};
pub use ids::{CallId, RequestId, TenantId};
