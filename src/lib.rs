//! # Toolhost Core - Multi-Tenant Hosted Tool Runtime
//!
//! Hosts many tenants' tool servers in one process. Each tenant is a
//! subdomain with a declarative configuration of tools, prompts and
//! resources. The runtime provides:
//! - Lazy construction and TTL caching of per-tenant server instances
//! - Payment-gated tool dispatch with a fee split quote
//! - HTTP, proxy and sandboxed-code execution strategies
//! - Per-instance usage counters
//! - An HTTP front door routing by `Host` header or path
//!
//! ## Architecture
//!
//! ```text
//!   HTTP request → InboundRouter → InstanceRegistry ──miss──→ ConfigLoader
//!                                       │
//!                                 RunningInstance (McpServer)
//!                                       │ tools/call
//!                                 ToolDispatcher ── payment gate
//!                                   │     │     │
//!                                 HTTP  Proxy  CodeSandbox
//! ```

// Enforce strict safety at compile time
#![deny(unsafe_code)]
#![warn(missing_debug_implementations)]
#![warn(rust_2018_idioms)]

pub mod cache;
pub mod hosting;
pub mod protocol;
pub mod server;
pub mod types;

// Internal utilities
pub mod observability;

pub use types::{Config, Error, Result};
