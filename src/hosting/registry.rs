//! Instance registry: lazily builds, caches and expires per-tenant servers.
//!
//! Lookups hit a TTL cache first. On a miss the tenant's configuration is
//! loaded and a [`RunningInstance`] is built. Concurrent misses for the same
//! tenant share one build; the second caller waits and then finds the cached
//! instance. Usage counters live on the instance and are lost with it.

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use futures::FutureExt;
use serde::Serialize;
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::{oneshot, Mutex};
use tokio::time::interval;

use super::dispatcher::{ToolDispatcher, UsageRecorder};
use super::model::{
    render_template, HostedServerConfig, PromptDescriptor, ResourceDescriptor, ResourceKind,
    ToolDescriptor,
};
use super::store::ConfigLoader;
use crate::cache::TtlCache;
use crate::protocol::{
    McpServer, PromptHandler, ResourceHandler, ResourceMetadata, ServerInfo, ToolHandler,
};
use crate::types::{Error, RegistryConfig, Result, TenantId};

/// Version advertised by every hosted instance.
const HOSTED_SERVER_VERSION: &str = "1.0.0";

/// Shortest period the background prune loop runs at.
const MIN_PRUNE_INTERVAL: Duration = Duration::from_secs(1);

// =============================================================================
// Running instance
// =============================================================================

/// Usage counters of a live instance at one point in time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UsageSnapshot {
    pub total_calls: u64,
    pub calls_this_month: u64,
    pub created_at: DateTime<Utc>,
    pub last_access: DateTime<Utc>,
}

/// A tenant's constructed server plus its usage counters.
pub struct RunningInstance {
    tenant: TenantId,
    server: McpServer,
    config: Arc<HostedServerConfig>,
    total_calls: AtomicU64,
    calls_this_month: AtomicU64,
    created_at: DateTime<Utc>,
    last_access_ms: AtomicI64,
}

impl fmt::Debug for RunningInstance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RunningInstance")
            .field("tenant", &self.tenant)
            .field("server", &self.server)
            .field("usage", &self.usage())
            .finish()
    }
}

impl RunningInstance {
    fn new(server: McpServer, config: Arc<HostedServerConfig>) -> Self {
        let now = Utc::now();
        Self {
            tenant: config.subdomain.clone(),
            total_calls: AtomicU64::new(config.total_calls),
            calls_this_month: AtomicU64::new(config.calls_this_month),
            server,
            config,
            created_at: now,
            last_access_ms: AtomicI64::new(now.timestamp_millis()),
        }
    }

    pub fn tenant(&self) -> &TenantId {
        &self.tenant
    }

    pub fn server(&self) -> &McpServer {
        &self.server
    }

    /// Configuration the instance was built from. Counters are as loaded.
    pub fn config(&self) -> &HostedServerConfig {
        &self.config
    }

    /// Configuration with the live counters applied.
    pub fn config_snapshot(&self) -> HostedServerConfig {
        let mut config = (*self.config).clone();
        config.total_calls = self.total_calls.load(Ordering::Relaxed);
        config.calls_this_month = self.calls_this_month.load(Ordering::Relaxed);
        config
    }

    pub fn usage(&self) -> UsageSnapshot {
        let last_ms = self.last_access_ms.load(Ordering::Relaxed);
        UsageSnapshot {
            total_calls: self.total_calls.load(Ordering::Relaxed),
            calls_this_month: self.calls_this_month.load(Ordering::Relaxed),
            created_at: self.created_at,
            last_access: Utc
                .timestamp_millis_opt(last_ms)
                .single()
                .unwrap_or(self.created_at),
        }
    }

    fn touch(&self) {
        self.last_access_ms
            .store(Utc::now().timestamp_millis(), Ordering::Relaxed);
    }

    fn record_call(&self) {
        self.total_calls.fetch_add(1, Ordering::Relaxed);
        self.calls_this_month.fetch_add(1, Ordering::Relaxed);
        self.touch();
    }
}

// =============================================================================
// Registry
// =============================================================================

/// Registry counters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RegistryStats {
    pub live_instances: usize,
    pub max_instances: usize,
}

/// Process-wide cache of running tenant instances.
pub struct InstanceRegistry {
    cache: Mutex<TtlCache<TenantId, Arc<RunningInstance>>>,
    creation_locks: Mutex<HashMap<TenantId, Arc<Mutex<()>>>>,
    loader: Arc<dyn ConfigLoader>,
    dispatcher: Arc<ToolDispatcher>,
    config: RegistryConfig,
    stop_tx: Mutex<Option<oneshot::Sender<()>>>,
}

impl fmt::Debug for InstanceRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InstanceRegistry")
            .field("config", &self.config)
            .field("dispatcher", &self.dispatcher)
            .finish()
    }
}

impl InstanceRegistry {
    /// Build the registry and bind it as the dispatcher's usage sink.
    pub fn new(
        config: RegistryConfig,
        loader: Arc<dyn ConfigLoader>,
        dispatcher: Arc<ToolDispatcher>,
    ) -> Arc<Self> {
        Arc::new_cyclic(|weak: &Weak<InstanceRegistry>| {
            let usage: Weak<dyn UsageRecorder> = weak.clone();
            dispatcher.bind_usage(usage);
            Self {
                cache: Mutex::new(TtlCache::new(config.instance_ttl, config.max_instances)),
                creation_locks: Mutex::new(HashMap::new()),
                loader,
                dispatcher,
                config,
                stop_tx: Mutex::new(None),
            }
        })
    }

    /// Return the live instance for `tenant`, building it on first use.
    ///
    /// `Ok(None)`: the tenant does not exist. `Err`: its configuration could
    /// not be loaded.
    pub async fn lookup_or_create(&self, tenant: &TenantId) -> Result<Option<Arc<RunningInstance>>> {
        if let Some(instance) = self.cached(tenant).await {
            return Ok(Some(instance));
        }

        let gate = {
            let mut locks = self.creation_locks.lock().await;
            locks.entry(tenant.clone()).or_default().clone()
        };

        let result = {
            let _guard = gate.lock().await;
            self.create_locked(tenant).await
        };

        {
            let mut locks = self.creation_locks.lock().await;
            // Map + this handle: nobody else is waiting.
            if Arc::strong_count(&gate) <= 2 {
                locks.remove(tenant);
            }
        }

        result
    }

    async fn cached(&self, tenant: &TenantId) -> Option<Arc<RunningInstance>> {
        let instance = self.cache.lock().await.get(tenant).cloned()?;
        instance.touch();
        tracing::debug!(tenant = %tenant, "instance_cache_hit");
        Some(instance)
    }

    async fn create_locked(&self, tenant: &TenantId) -> Result<Option<Arc<RunningInstance>>> {
        // Another caller may have finished the build while we waited.
        if let Some(instance) = self.cached(tenant).await {
            return Ok(Some(instance));
        }

        let config = self.loader.load(tenant).await.map_err(|e| {
            tracing::error!(tenant = %tenant, error = %e, "config_load_failed");
            Error::unavailable(format!("configuration for '{}' unavailable: {}", tenant, e))
        })?;

        let Some(config) = config else {
            tracing::debug!(tenant = %tenant, "tenant_not_found");
            return Ok(None);
        };

        let instance = Arc::new(self.build_instance(Arc::new(config)));
        self.cache
            .lock()
            .await
            .set(tenant.clone(), instance.clone(), Some(self.config.instance_ttl));

        tracing::info!(
            tenant = %tenant,
            tools = instance.server().tool_names().len(),
            prompts = instance.server().prompt_names().len(),
            resources = instance.server().resource_uris().len(),
            "instance_created"
        );
        Ok(Some(instance))
    }

    fn build_instance(&self, config: Arc<HostedServerConfig>) -> RunningInstance {
        let mut server = McpServer::new(ServerInfo {
            name: config.name.clone(),
            version: HOSTED_SERVER_VERSION.to_string(),
            description: Some(config.description.clone()).filter(|d| !d.is_empty()),
        });

        for tool in config.tools.iter().filter(|t| t.enabled) {
            let handler = self.tool_handler(&config, tool);
            if let Err(e) =
                server.register_tool(&tool.name, &tool.description, tool.input_schema.clone(), handler)
            {
                tracing::warn!(tenant = %config.subdomain, tool = %tool.name, error = %e, "tool_registration_failed");
            }
        }

        for prompt in config.prompts.iter().filter(|p| p.enabled) {
            let handler = self.prompt_handler(prompt);
            if let Err(e) = server.register_prompt(&prompt.name, &prompt.description, handler) {
                tracing::warn!(tenant = %config.subdomain, prompt = %prompt.name, error = %e, "prompt_registration_failed");
            }
        }

        for resource in config.resources.iter().filter(|r| r.enabled) {
            let metadata = ResourceMetadata {
                mime_type: Some(resource.mime_type.clone()),
                description: Some(resource.description.clone()).filter(|d| !d.is_empty()),
            };
            let handler = self.resource_handler(resource);
            if let Err(e) = server.register_resource(&resource.name, &resource.uri, metadata, handler) {
                tracing::warn!(tenant = %config.subdomain, resource = %resource.name, error = %e, "resource_registration_failed");
            }
        }

        RunningInstance::new(server, config)
    }

    fn tool_handler(&self, config: &Arc<HostedServerConfig>, tool: &ToolDescriptor) -> ToolHandler {
        let dispatcher = self.dispatcher.clone();
        let config = config.clone();
        let tool = Arc::new(tool.clone());
        Arc::new(move |args: Value| {
            let dispatcher = dispatcher.clone();
            let config = config.clone();
            let tool = tool.clone();
            async move {
                dispatcher
                    .dispatch(&config.subdomain, &config.pricing, &tool, args)
                    .await
                    .into_call_result()
            }
            .boxed()
        })
    }

    fn prompt_handler(&self, prompt: &PromptDescriptor) -> PromptHandler {
        let outbound = self.dispatcher.outbound().clone();
        let template = prompt.template.clone();
        let endpoint = prompt.endpoint.clone();
        Arc::new(move |args: HashMap<String, String>| {
            let outbound = outbound.clone();
            let template = template.clone();
            let endpoint = endpoint.clone();
            async move {
                let template = match endpoint {
                    Some(url) => outbound
                        .fetch_text(&url)
                        .await
                        .map_err(|e| Error::transport(format!("prompt fetch failed: {}", e)))?,
                    None => template,
                };
                Ok(render_template(&template, &args))
            }
            .boxed()
        })
    }

    fn resource_handler(&self, resource: &ResourceDescriptor) -> ResourceHandler {
        let outbound = self.dispatcher.outbound().clone();
        let kind = resource.kind;
        let content = resource.content.clone().unwrap_or_default();
        let endpoint = resource.endpoint.clone();
        Arc::new(move || {
            let outbound = outbound.clone();
            let content = content.clone();
            let endpoint = endpoint.clone();
            async move {
                match (kind, endpoint) {
                    (ResourceKind::Static, _) => Ok(content),
                    (ResourceKind::Dynamic, Some(url)) => outbound
                        .fetch_text(&url)
                        .await
                        .map_err(|e| Error::transport(format!("resource fetch failed: {}", e))),
                    (ResourceKind::Dynamic, None) => Ok(String::new()),
                }
            }
            .boxed()
        })
    }

    /// Count one successful call against the tenant's live instance.
    pub async fn record_call(&self, tenant: &TenantId) {
        let instance = self.cache.lock().await.get(tenant).cloned();
        match instance {
            Some(instance) => {
                instance.record_call();
                tracing::debug!(tenant = %tenant, total_calls = instance.usage().total_calls, "tool_call_tracked");
            }
            None => tracing::debug!(tenant = %tenant, "usage_untracked_no_instance"),
        }
    }

    /// Drop a tenant's instance; the next lookup rebuilds it.
    pub async fn evict(&self, tenant: &TenantId) -> bool {
        let removed = self.cache.lock().await.delete(tenant).is_some();
        if removed {
            tracing::info!(tenant = %tenant, "instance_evicted");
        }
        removed
    }

    /// Live counters of a cached instance, if any.
    pub async fn instance_usage(&self, tenant: &TenantId) -> Option<UsageSnapshot> {
        self.cache
            .lock()
            .await
            .get(tenant)
            .map(|instance| instance.usage())
    }

    pub async fn stats(&self) -> RegistryStats {
        let cache = self.cache.lock().await;
        RegistryStats {
            live_instances: cache.len(),
            max_instances: cache.max_size(),
        }
    }

    /// Remove expired instances now.
    pub async fn prune(&self) -> usize {
        let removed = self.cache.lock().await.prune();
        if removed > 0 {
            tracing::debug!(removed, "instances_pruned");
        }
        removed
    }

    /// Start the background prune loop.
    pub async fn start(self: &Arc<Self>) -> tokio::task::JoinHandle<()> {
        let registry = Arc::downgrade(self);
        let period = self.config.prune_interval;
        if period < MIN_PRUNE_INTERVAL {
            tracing::warn!(
                configured_ms = period.as_millis() as u64,
                "prune_interval_clamped"
            );
        }
        let period = period.max(MIN_PRUNE_INTERVAL);
        let (stop_tx, mut stop_rx) = oneshot::channel();
        if let Some(previous) = self.stop_tx.lock().await.replace(stop_tx) {
            let _ = previous.send(());
        }

        tokio::spawn(async move {
            let mut ticker = interval(period);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        match registry.upgrade() {
                            Some(registry) => {
                                registry.prune().await;
                            }
                            None => break,
                        }
                    }
                    _ = &mut stop_rx => {
                        tracing::info!("registry_maintenance_stopped");
                        break;
                    }
                }
            }
        })
    }

    /// Stop background maintenance and drop every cached instance.
    pub async fn shutdown(&self) {
        if let Some(tx) = self.stop_tx.lock().await.take() {
            let _ = tx.send(());
        }
        let mut cache = self.cache.lock().await;
        let dropped = cache.len();
        cache.clear();
        tracing::info!(dropped, "instance_registry_shutdown");
    }
}

#[async_trait]
impl UsageRecorder for InstanceRegistry {
    async fn record_call(&self, tenant: &TenantId) {
        InstanceRegistry::record_call(self, tenant).await;
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hosting::sandbox::{CodeSandbox, SandboxError};
    use crate::hosting::store::{InMemoryConfigStore, MockConfigLoader};
    use crate::hosting::strategies::OutboundClient;
    use crate::protocol::{CallToolResult, JsonRpcRequest};
    use crate::types::{OutboundConfig, PaymentConfig};
    use serde_json::json;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    struct EchoSandbox;

    #[async_trait]
    impl CodeSandbox for EchoSandbox {
        async fn execute(&self, _code: &str, args: &Value) -> std::result::Result<Value, SandboxError> {
            Ok(args.clone())
        }
    }

    fn tenant(s: &str) -> TenantId {
        TenantId::from_string(s.to_string()).unwrap()
    }

    fn dispatcher() -> Arc<ToolDispatcher> {
        let outbound = OutboundClient::new(&OutboundConfig::default(), "toolhost.local").unwrap();
        Arc::new(ToolDispatcher::new(
            outbound,
            Arc::new(EchoSandbox),
            PaymentConfig::default(),
        ))
    }

    fn config(subdomain: &str) -> HostedServerConfig {
        serde_json::from_value(json!({
            "subdomain": subdomain,
            "name": "Acme",
            "tools": [
                {"name": "echo", "type": "code", "code": "return args"},
                {"name": "hidden", "type": "code", "code": "return 1", "enabled": false},
                {"name": "broken", "type": "code", "code": "return 1", "inputSchema": {"type": 12}},
                {"name": "paid", "type": "code", "code": "return args", "price": 10},
            ],
            "prompts": [{"name": "greet", "template": "Hello {{name}}"}],
            "resources": [
                {"name": "readme", "uri": "docs://readme", "type": "static", "content": "read me"},
                {"name": "live", "uri": "docs://live", "type": "dynamic"},
            ],
            "pricing": {"payoutAddress": "0xcreator"},
            "totalCalls": 5,
        }))
        .unwrap()
    }

    fn registry_with(configs: Vec<HostedServerConfig>) -> Arc<InstanceRegistry> {
        InstanceRegistry::new(
            RegistryConfig::default(),
            Arc::new(InMemoryConfigStore::with_configs(configs)),
            dispatcher(),
        )
    }

    fn call(name: &str, arguments: Value) -> JsonRpcRequest {
        JsonRpcRequest::new("tools/call", Some(json!({"name": name, "arguments": arguments})), 1)
    }

    #[tokio::test]
    async fn test_lookup_returns_same_instance() {
        let registry = registry_with(vec![config("acme")]);
        let first = registry.lookup_or_create(&tenant("acme")).await.unwrap().unwrap();
        let second = registry.lookup_or_create(&tenant("acme")).await.unwrap().unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(registry.stats().await.live_instances, 1);
    }

    #[tokio::test]
    async fn test_unknown_tenant_is_none() {
        let registry = registry_with(vec![]);
        assert!(registry.lookup_or_create(&tenant("ghost")).await.unwrap().is_none());
        assert_eq!(registry.stats().await.live_instances, 0);
    }

    #[tokio::test]
    async fn test_registration_isolates_bad_items() {
        let registry = registry_with(vec![config("acme")]);
        let instance = registry.lookup_or_create(&tenant("acme")).await.unwrap().unwrap();
        assert_eq!(
            instance.server().tool_names(),
            vec!["echo".to_string(), "paid".to_string()]
        );
        assert_eq!(instance.server().prompt_names(), vec!["greet".to_string()]);
        assert_eq!(instance.server().resource_uris().len(), 2);
    }

    #[tokio::test]
    async fn test_successful_call_increments_counters() {
        let registry = registry_with(vec![config("acme")]);
        let instance = registry.lookup_or_create(&tenant("acme")).await.unwrap().unwrap();

        let resp = instance.server().handle_request(call("echo", json!({"a": 1}))).await;
        let result: CallToolResult = serde_json::from_value(resp.result.unwrap()).unwrap();
        assert!(!result.is_error);

        let usage = registry.instance_usage(&tenant("acme")).await.unwrap();
        assert_eq!(usage.total_calls, 6);
        assert_eq!(usage.calls_this_month, 1);
        assert_eq!(instance.config_snapshot().total_calls, 6);
        assert_eq!(instance.config().total_calls, 5);
    }

    #[tokio::test]
    async fn test_payment_required_does_not_count() {
        let registry = registry_with(vec![config("acme")]);
        let instance = registry.lookup_or_create(&tenant("acme")).await.unwrap().unwrap();

        let resp = instance.server().handle_request(call("paid", json!({}))).await;
        let result: CallToolResult = serde_json::from_value(resp.result.unwrap()).unwrap();
        assert!(result.is_error);
        assert_eq!(result.structured_content.unwrap()["payment"]["amount"], 10);
        assert_eq!(instance.usage().total_calls, 5);
    }

    #[tokio::test]
    async fn test_prompt_and_resources_render() {
        let registry = registry_with(vec![config("acme")]);
        let instance = registry.lookup_or_create(&tenant("acme")).await.unwrap().unwrap();

        let resp = instance
            .server()
            .handle_request(JsonRpcRequest::new(
                "prompts/get",
                Some(json!({"name": "greet", "arguments": {"name": "Ada"}})),
                1,
            ))
            .await;
        assert_eq!(resp.result.unwrap()["messages"][0]["content"]["text"], "Hello Ada");

        for (uri, text) in [("docs://readme", "read me"), ("docs://live", "")] {
            let resp = instance
                .server()
                .handle_request(JsonRpcRequest::new("resources/read", Some(json!({"uri": uri})), 2))
                .await;
            assert_eq!(resp.result.unwrap()["contents"][0]["text"], text);
        }
    }

    #[tokio::test]
    async fn test_evict_forces_rebuild() {
        let registry = registry_with(vec![config("acme")]);
        let first = registry.lookup_or_create(&tenant("acme")).await.unwrap().unwrap();
        assert!(registry.evict(&tenant("acme")).await);
        assert!(!registry.evict(&tenant("acme")).await);

        let second = registry.lookup_or_create(&tenant("acme")).await.unwrap().unwrap();
        assert!(!Arc::ptr_eq(&first, &second));
    }

    #[tokio::test]
    async fn test_concurrent_misses_build_once() {
        let loads = Arc::new(AtomicUsize::new(0));
        let mut loader = MockConfigLoader::new();
        let counter = loads.clone();
        loader.expect_load().returning(move |t| {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(Some(config(t.as_str())))
        });

        let registry = InstanceRegistry::new(RegistryConfig::default(), Arc::new(loader), dispatcher());
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let registry = registry.clone();
                tokio::spawn(async move { registry.lookup_or_create(&tenant("acme")).await })
            })
            .collect();

        let mut instances = Vec::new();
        for handle in handles {
            instances.push(handle.await.unwrap().unwrap().unwrap());
        }
        assert!(instances.windows(2).all(|w| Arc::ptr_eq(&w[0], &w[1])));
        assert_eq!(loads.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_loader_error_is_unavailable() {
        let mut loader = MockConfigLoader::new();
        loader
            .expect_load()
            .returning(|_| Err(Error::internal("db down")));
        let registry = InstanceRegistry::new(RegistryConfig::default(), Arc::new(loader), dispatcher());

        let err = registry.lookup_or_create(&tenant("acme")).await.unwrap_err();
        assert!(matches!(err, Error::Unavailable(_)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_instances_expire_after_ttl() {
        let registry = InstanceRegistry::new(
            RegistryConfig {
                instance_ttl: Duration::from_secs(60),
                ..RegistryConfig::default()
            },
            Arc::new(InMemoryConfigStore::with_configs(vec![config("acme")])),
            dispatcher(),
        );
        let first = registry.lookup_or_create(&tenant("acme")).await.unwrap().unwrap();

        tokio::time::advance(Duration::from_secs(61)).await;
        assert_eq!(registry.prune().await, 1);

        let second = registry.lookup_or_create(&tenant("acme")).await.unwrap().unwrap();
        assert!(!Arc::ptr_eq(&first, &second));
    }

    #[tokio::test(start_paused = true)]
    async fn test_background_prune_and_shutdown() {
        let registry = InstanceRegistry::new(
            RegistryConfig {
                instance_ttl: Duration::from_secs(5),
                prune_interval: Duration::from_secs(1),
                ..RegistryConfig::default()
            },
            Arc::new(InMemoryConfigStore::with_configs(vec![config("acme"), config("beta")])),
            dispatcher(),
        );
        let handle = registry.start().await;

        registry.lookup_or_create(&tenant("acme")).await.unwrap();
        tokio::time::sleep(Duration::from_secs(7)).await;
        assert_eq!(registry.stats().await.live_instances, 0);

        registry.lookup_or_create(&tenant("beta")).await.unwrap();
        registry.shutdown().await;
        assert_eq!(registry.stats().await.live_instances, 0);
        handle.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_zero_prune_interval_is_clamped() {
        let registry = InstanceRegistry::new(
            RegistryConfig {
                instance_ttl: Duration::from_secs(2),
                prune_interval: Duration::ZERO,
                ..RegistryConfig::default()
            },
            Arc::new(InMemoryConfigStore::with_configs(vec![config("acme")])),
            dispatcher(),
        );
        let handle = registry.start().await;

        registry.lookup_or_create(&tenant("acme")).await.unwrap();
        tokio::time::sleep(Duration::from_secs(4)).await;
        assert!(!handle.is_finished());
        assert_eq!(registry.stats().await.live_instances, 0);

        registry.shutdown().await;
        handle.await.unwrap();
    }
}
