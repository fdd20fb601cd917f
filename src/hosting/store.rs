//! Tenant configuration sources.
//!
//! The registry only sees [`ConfigLoader`]. A durable database adapter plugs
//! in behind the same trait.

use async_trait::async_trait;
use std::collections::HashMap;
use std::path::PathBuf;
use tokio::sync::RwLock;

use super::model::HostedServerConfig;
use crate::types::{Error, Result, TenantId};

/// Fetches a tenant's configuration by subdomain.
///
/// `Ok(None)` means the tenant does not exist; `Err` means the source could
/// not answer.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ConfigLoader: Send + Sync {
    async fn load(&self, tenant: &TenantId) -> Result<Option<HostedServerConfig>>;
}

/// In-memory store, filled by an admin surface or tests.
#[derive(Debug, Default)]
pub struct InMemoryConfigStore {
    configs: RwLock<HashMap<TenantId, HostedServerConfig>>,
}

impl InMemoryConfigStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_configs(configs: impl IntoIterator<Item = HostedServerConfig>) -> Self {
        let map = configs
            .into_iter()
            .map(|c| (c.subdomain.clone(), c))
            .collect();
        Self {
            configs: RwLock::new(map),
        }
    }

    /// Insert or replace a tenant's configuration.
    pub async fn upsert(&self, config: HostedServerConfig) {
        self.configs
            .write()
            .await
            .insert(config.subdomain.clone(), config);
    }

    pub async fn remove(&self, tenant: &TenantId) -> Option<HostedServerConfig> {
        self.configs.write().await.remove(tenant)
    }

    pub async fn len(&self) -> usize {
        self.configs.read().await.len()
    }
}

#[async_trait]
impl ConfigLoader for InMemoryConfigStore {
    async fn load(&self, tenant: &TenantId) -> Result<Option<HostedServerConfig>> {
        Ok(self.configs.read().await.get(tenant).cloned())
    }
}

/// Directory of `<subdomain>.json` files, read on every load.
#[derive(Debug, Clone)]
pub struct JsonDirConfigStore {
    dir: PathBuf,
}

impl JsonDirConfigStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    fn path_for(&self, tenant: &TenantId) -> PathBuf {
        self.dir.join(format!("{}.json", tenant.as_str()))
    }
}

#[async_trait]
impl ConfigLoader for JsonDirConfigStore {
    async fn load(&self, tenant: &TenantId) -> Result<Option<HostedServerConfig>> {
        let path = self.path_for(tenant);
        let raw = match tokio::fs::read_to_string(&path).await {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(Error::Io(e)),
        };

        let config: HostedServerConfig = serde_json::from_str(&raw).map_err(|e| {
            Error::configuration(format!("invalid tenant config {}: {}", path.display(), e))
        })?;

        if &config.subdomain != tenant {
            return Err(Error::configuration(format!(
                "tenant config {} declares subdomain '{}'",
                path.display(),
                config.subdomain
            )));
        }

        for problem in config.validate() {
            tracing::warn!(tenant = %tenant, problem = %problem, "tenant_config_problem");
        }

        Ok(Some(config))
    }
}
