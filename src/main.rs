//! Toolhost runtime - main entry point.
//!
//! Loads tenant configurations from a directory of `<subdomain>.json` files
//! and serves them over HTTP until interrupted.

use clap::Parser;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use toolhost_core::hosting::{
    InboundRouter, InstanceRegistry, JsonDirConfigStore, OutboundClient, ProcessSandbox,
    ToolDispatcher,
};
use toolhost_core::server::HttpServer;
use toolhost_core::Config;

#[derive(Debug, Parser)]
#[command(name = "toolhost-runtime", version, about = "Multi-tenant hosted tool runtime")]
struct Args {
    /// TOML configuration file.
    #[arg(long, env = "TOOLHOST_CONFIG")]
    config: Option<PathBuf>,

    /// Directory holding `<subdomain>.json` tenant configurations.
    #[arg(long, env = "TOOLHOST_TENANTS_DIR", default_value = "tenants")]
    tenants: PathBuf,

    /// Override the listen address.
    #[arg(long)]
    listen: Option<String>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    // Load configuration
    let mut config = match &args.config {
        Some(path) => Config::from_file(path)?,
        None => Config::default(),
    };
    config.apply_env();
    if let Some(listen) = args.listen {
        config.server.listen_addr = listen;
    }

    // Initialize observability
    toolhost_core::observability::init_tracing(&config.observability);

    let outbound = OutboundClient::new(&config.outbound, config.server.base_domain.clone())?;
    let sandbox = Arc::new(ProcessSandbox::new(config.sandbox.clone()));
    let dispatcher = Arc::new(ToolDispatcher::new(outbound, sandbox, config.payment.clone()));
    let loader = Arc::new(JsonDirConfigStore::new(args.tenants.clone()));
    let registry = InstanceRegistry::new(config.registry.clone(), loader, dispatcher);
    let maintenance = registry.start().await;

    let router = Arc::new(InboundRouter::new(
        registry.clone(),
        config.server.base_domain.clone(),
    ));
    let addr: SocketAddr = config.server.listen_addr.parse()?;
    let server = Arc::new(HttpServer::new(router, addr));

    tracing::info!(
        tenants_dir = %args.tenants.display(),
        base_domain = %config.server.base_domain,
        "toolhost runtime starting on {}",
        addr
    );

    let mut serving = {
        let server = server.clone();
        tokio::spawn(async move { server.serve().await })
    };

    tokio::select! {
        result = tokio::signal::ctrl_c() => {
            result?;
            tracing::info!("shutdown signal received");
            server.shutdown();
            serving.await??;
        }
        result = &mut serving => {
            result??;
        }
    }

    registry.shutdown().await;
    maintenance.await?;
    Ok(())
}
