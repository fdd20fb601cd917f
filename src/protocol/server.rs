//! In-process tool-protocol server.
//!
//! Holds registered tools, prompts and resources and answers JSON-RPC
//! requests against them. Transport is someone else's job: callers hand a
//! parsed [`JsonRpcRequest`] to [`McpServer::handle`].

use futures::future::BoxFuture;
use futures::FutureExt;
use serde::Serialize;
use serde_json::{json, Value};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use super::jsonrpc::{CallToolResult, JsonRpcRequest, JsonRpcResponse};
use super::{
    INTERNAL_ERROR, INVALID_PARAMS, INVALID_REQUEST, JSONRPC_VERSION, METHOD_NOT_FOUND,
    PROTOCOL_VERSION,
};
use crate::types::{Error, Result};

/// Tool handler: receives call arguments, always produces a tool result.
pub type ToolHandler = Arc<dyn Fn(Value) -> BoxFuture<'static, CallToolResult> + Send + Sync>;

/// Prompt handler: receives string arguments, renders the prompt text.
pub type PromptHandler =
    Arc<dyn Fn(HashMap<String, String>) -> BoxFuture<'static, Result<String>> + Send + Sync>;

/// Resource handler: produces the resource body.
pub type ResourceHandler = Arc<dyn Fn() -> BoxFuture<'static, Result<String>> + Send + Sync>;

/// Identity advertised by `initialize`.
#[derive(Debug, Clone, Serialize)]
pub struct ServerInfo {
    pub name: String,
    pub version: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

/// Metadata attached to a registered resource.
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceMetadata {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mime_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

struct RegisteredTool {
    description: String,
    input_schema: Value,
    validator: Option<jsonschema::Validator>,
    handler: ToolHandler,
}

struct RegisteredPrompt {
    description: String,
    handler: PromptHandler,
}

struct RegisteredResource {
    name: String,
    metadata: ResourceMetadata,
    handler: ResourceHandler,
}

/// Tool-protocol server for one tenant.
pub struct McpServer {
    info: ServerInfo,
    tools: BTreeMap<String, RegisteredTool>,
    prompts: BTreeMap<String, RegisteredPrompt>,
    /// Keyed by URI.
    resources: BTreeMap<String, RegisteredResource>,
}

impl fmt::Debug for McpServer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("McpServer")
            .field("info", &self.info)
            .field("tools", &self.tools.keys().collect::<Vec<_>>())
            .field("prompts", &self.prompts.keys().collect::<Vec<_>>())
            .field("resources", &self.resources.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl McpServer {
    pub fn new(info: ServerInfo) -> Self {
        Self {
            info,
            tools: BTreeMap::new(),
            prompts: BTreeMap::new(),
            resources: BTreeMap::new(),
        }
    }

    pub fn info(&self) -> &ServerInfo {
        &self.info
    }

    /// Register a callable tool. Fails on empty/duplicate names or an
    /// uncompilable input schema.
    pub fn register_tool(
        &mut self,
        name: &str,
        description: &str,
        input_schema: Value,
        handler: ToolHandler,
    ) -> Result<()> {
        if name.is_empty() {
            return Err(Error::validation("Tool name cannot be empty"));
        }
        if self.tools.contains_key(name) {
            return Err(Error::validation(format!("Tool already registered: {}", name)));
        }

        let validator = if schema_is_trivial(&input_schema) {
            None
        } else {
            Some(jsonschema::validator_for(&input_schema).map_err(|e| {
                Error::validation(format!("Invalid input schema for tool '{}': {}", name, e))
            })?)
        };

        self.tools.insert(
            name.to_string(),
            RegisteredTool {
                description: description.to_string(),
                input_schema,
                validator,
                handler,
            },
        );
        Ok(())
    }

    pub fn register_prompt(
        &mut self,
        name: &str,
        description: &str,
        handler: PromptHandler,
    ) -> Result<()> {
        if name.is_empty() {
            return Err(Error::validation("Prompt name cannot be empty"));
        }
        if self.prompts.contains_key(name) {
            return Err(Error::validation(format!("Prompt already registered: {}", name)));
        }
        self.prompts.insert(
            name.to_string(),
            RegisteredPrompt {
                description: description.to_string(),
                handler,
            },
        );
        Ok(())
    }

    pub fn register_resource(
        &mut self,
        name: &str,
        uri: &str,
        metadata: ResourceMetadata,
        handler: ResourceHandler,
    ) -> Result<()> {
        if uri.is_empty() {
            return Err(Error::validation(format!("Resource '{}' has no uri", name)));
        }
        if self.resources.contains_key(uri) {
            return Err(Error::validation(format!("Resource already registered: {}", uri)));
        }
        self.resources.insert(
            uri.to_string(),
            RegisteredResource {
                name: name.to_string(),
                metadata,
                handler,
            },
        );
        Ok(())
    }

    pub fn tool_names(&self) -> Vec<String> {
        self.tools.keys().cloned().collect()
    }

    pub fn prompt_names(&self) -> Vec<String> {
        self.prompts.keys().cloned().collect()
    }

    pub fn resource_uris(&self) -> Vec<String> {
        self.resources.keys().cloned().collect()
    }

    /// Process one inbound message. Notifications are executed but get no
    /// reply; an envelope with the wrong `jsonrpc` tag is always answered.
    pub async fn handle(&self, request: JsonRpcRequest) -> Option<JsonRpcResponse> {
        if request.jsonrpc != JSONRPC_VERSION || !request.is_notification() {
            return Some(self.handle_request(request).await);
        }
        tracing::debug!(method = %request.method, "notification_received");
        let _ = self.handle_request(request).await;
        None
    }

    /// Answer one JSON-RPC request.
    pub async fn handle_request(&self, request: JsonRpcRequest) -> JsonRpcResponse {
        let id = request.id.clone().unwrap_or(Value::Null);
        if request.jsonrpc != JSONRPC_VERSION {
            return JsonRpcResponse::failure(
                id,
                INVALID_REQUEST,
                format!("Invalid Request: jsonrpc must be \"{}\"", JSONRPC_VERSION),
            );
        }
        let outcome = match request.method.as_str() {
            "initialize" => Ok(self.initialize_result()),
            "ping" => Ok(json!({})),
            m if m.starts_with("notifications/") => Ok(Value::Null),
            "tools/list" => Ok(self.list_tools()),
            "tools/call" => self.call_tool(&request.params_or_empty()).await,
            "prompts/list" => Ok(self.list_prompts()),
            "prompts/get" => self.get_prompt(&request.params_or_empty()).await,
            "resources/list" => Ok(self.list_resources()),
            "resources/read" => self.read_resource(&request.params_or_empty()).await,
            other => Err((METHOD_NOT_FOUND, format!("Method not found: {}", other))),
        };

        match outcome {
            Ok(result) => JsonRpcResponse::success(id, result),
            Err((code, message)) => JsonRpcResponse::failure(id, code, message),
        }
    }

    fn initialize_result(&self) -> Value {
        json!({
            "protocolVersion": PROTOCOL_VERSION,
            "capabilities": {
                "tools": {},
                "prompts": {},
                "resources": {},
            },
            "serverInfo": {
                "name": self.info.name,
                "version": self.info.version,
            },
            "instructions": self.info.description,
        })
    }

    fn list_tools(&self) -> Value {
        let tools: Vec<Value> = self
            .tools
            .iter()
            .map(|(name, tool)| {
                json!({
                    "name": name,
                    "description": tool.description,
                    "inputSchema": tool.input_schema,
                })
            })
            .collect();
        json!({ "tools": tools })
    }

    async fn call_tool(&self, params: &Value) -> std::result::Result<Value, (i64, String)> {
        let name = params
            .get("name")
            .and_then(Value::as_str)
            .ok_or((INVALID_PARAMS, "Missing required field: name".to_string()))?;
        let tool = self
            .tools
            .get(name)
            .ok_or_else(|| (INVALID_PARAMS, format!("Unknown tool: {}", name)))?;

        let args = params
            .get("arguments")
            .cloned()
            .unwrap_or_else(|| Value::Object(serde_json::Map::new()));
        if !args.is_object() {
            return Err((INVALID_PARAMS, "Tool arguments must be a JSON object".to_string()));
        }

        if let Some(validator) = &tool.validator {
            let checked = without_reserved_keys(&args);
            let errors: Vec<String> = validator
                .iter_errors(&checked)
                .map(|e| e.to_string())
                .collect();
            if !errors.is_empty() {
                return Err((
                    INVALID_PARAMS,
                    format!("Invalid arguments for tool '{}': {}", name, errors.join("; ")),
                ));
            }
        }

        // A panicking handler fails this call only.
        let result = AssertUnwindSafe((tool.handler)(args)).catch_unwind().await;
        match result {
            Ok(result) => serde_json::to_value(result)
                .map_err(|e| (INTERNAL_ERROR, format!("Serialization error: {}", e))),
            Err(_) => {
                tracing::error!(tool = name, "tool handler panicked");
                Err((INTERNAL_ERROR, format!("Tool '{}' failed unexpectedly", name)))
            }
        }
    }

    fn list_prompts(&self) -> Value {
        let prompts: Vec<Value> = self
            .prompts
            .iter()
            .map(|(name, prompt)| json!({ "name": name, "description": prompt.description }))
            .collect();
        json!({ "prompts": prompts })
    }

    async fn get_prompt(&self, params: &Value) -> std::result::Result<Value, (i64, String)> {
        let name = params
            .get("name")
            .and_then(Value::as_str)
            .ok_or((INVALID_PARAMS, "Missing required field: name".to_string()))?;
        let prompt = self
            .prompts
            .get(name)
            .ok_or_else(|| (INVALID_PARAMS, format!("Unknown prompt: {}", name)))?;

        let arguments: HashMap<String, String> = params
            .get("arguments")
            .and_then(Value::as_object)
            .map(|map| {
                map.iter()
                    .map(|(k, v)| (k.clone(), value_as_plain_string(v)))
                    .collect()
            })
            .unwrap_or_default();

        let text = (prompt.handler)(arguments)
            .await
            .map_err(|e| (e.jsonrpc_code(), e.to_string()))?;

        Ok(json!({
            "description": prompt.description,
            "messages": [{
                "role": "user",
                "content": { "type": "text", "text": text },
            }],
        }))
    }

    fn list_resources(&self) -> Value {
        let resources: Vec<Value> = self
            .resources
            .iter()
            .map(|(uri, resource)| {
                let mut entry = json!({ "name": resource.name, "uri": uri });
                if let Some(mime) = &resource.metadata.mime_type {
                    entry["mimeType"] = json!(mime);
                }
                if let Some(description) = &resource.metadata.description {
                    entry["description"] = json!(description);
                }
                entry
            })
            .collect();
        json!({ "resources": resources })
    }

    async fn read_resource(&self, params: &Value) -> std::result::Result<Value, (i64, String)> {
        let uri = params
            .get("uri")
            .and_then(Value::as_str)
            .ok_or((INVALID_PARAMS, "Missing required field: uri".to_string()))?;
        let resource = self
            .resources
            .get(uri)
            .ok_or_else(|| (INVALID_PARAMS, format!("Unknown resource: {}", uri)))?;

        let text = (resource.handler)()
            .await
            .map_err(|e| (e.jsonrpc_code(), e.to_string()))?;

        let mut content = json!({ "uri": uri, "text": text });
        if let Some(mime) = &resource.metadata.mime_type {
            content["mimeType"] = json!(mime);
        }
        Ok(json!({ "contents": [content] }))
    }
}

/// Empty / absent schemas accept anything and are not compiled.
fn schema_is_trivial(schema: &Value) -> bool {
    match schema {
        Value::Null => true,
        Value::Object(map) => map.is_empty(),
        _ => false,
    }
}

/// Underscore-prefixed argument keys are transport metadata (payment proofs
/// and the like) and are exempt from schema validation.
fn without_reserved_keys(args: &Value) -> Value {
    match args.as_object() {
        Some(map) => Value::Object(
            map.iter()
                .filter(|(k, _)| !k.starts_with('_'))
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect(),
        ),
        None => args.clone(),
    }
}

fn value_as_plain_string(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn server() -> McpServer {
        McpServer::new(ServerInfo {
            name: "Test".to_string(),
            version: "1.0.0".to_string(),
            description: None,
        })
    }

    fn echo_handler() -> ToolHandler {
        Arc::new(|args: Value| async move { CallToolResult::from_value(&args) }.boxed())
    }

    fn call(name: &str, arguments: Value) -> JsonRpcRequest {
        JsonRpcRequest::new(
            "tools/call",
            Some(json!({"name": name, "arguments": arguments})),
            1,
        )
    }

    #[tokio::test]
    async fn test_register_and_call_tool() {
        let mut s = server();
        s.register_tool("echo", "Echo", json!({}), echo_handler()).unwrap();

        let resp = s.handle_request(call("echo", json!({"x": 1}))).await;
        let result: CallToolResult = serde_json::from_value(resp.result.unwrap()).unwrap();
        assert!(!result.is_error);
        assert_eq!(result.text(), "{\"x\":1}");
    }

    #[test]
    fn test_duplicate_tool_rejected() {
        let mut s = server();
        s.register_tool("echo", "Echo", json!({}), echo_handler()).unwrap();
        assert!(s.register_tool("echo", "Again", json!({}), echo_handler()).is_err());
        assert_eq!(s.tool_names(), vec!["echo".to_string()]);
    }

    #[test]
    fn test_invalid_schema_rejected() {
        let mut s = server();
        let err = s
            .register_tool("bad", "Bad", json!({"type": 12}), echo_handler())
            .unwrap_err();
        assert!(err.to_string().contains("Invalid input schema"));
    }

    #[tokio::test]
    async fn test_arguments_validated_against_schema() {
        let mut s = server();
        let schema = json!({
            "type": "object",
            "properties": {"city": {"type": "string"}},
            "required": ["city"],
            "additionalProperties": false,
        });
        s.register_tool("weather", "Weather", schema, echo_handler()).unwrap();

        let resp = s.handle_request(call("weather", json!({"city": 3}))).await;
        assert_eq!(resp.error.unwrap().code, INVALID_PARAMS);

        // Reserved keys pass even with additionalProperties: false.
        let resp = s
            .handle_request(call("weather", json!({"city": "Oslo", "_paymentProof": "0xabc"})))
            .await;
        assert!(resp.result.is_some());
    }

    #[tokio::test]
    async fn test_unknown_tool_and_method() {
        let s = server();
        let resp = s.handle_request(call("missing", json!({}))).await;
        assert_eq!(resp.error.unwrap().code, INVALID_PARAMS);

        let resp = s
            .handle_request(JsonRpcRequest::new("bogus/method", None, 2))
            .await;
        assert_eq!(resp.error.unwrap().code, METHOD_NOT_FOUND);
    }

    #[tokio::test]
    async fn test_panicking_handler_is_isolated() {
        let mut s = server();
        let handler: ToolHandler = Arc::new(|_args: Value| {
            async move {
                if true {
                    panic!("handler bug");
                }
                CallToolResult::error_text("unreachable")
            }
            .boxed()
        });
        s.register_tool("boom", "Boom", json!({}), handler).unwrap();

        let resp = s.handle_request(call("boom", json!({}))).await;
        assert_eq!(resp.error.unwrap().code, INTERNAL_ERROR);

        // Server still answers afterwards.
        let resp = s.handle_request(JsonRpcRequest::new("ping", None, 3)).await;
        assert!(resp.result.is_some());
    }

    #[tokio::test]
    async fn test_prompts_and_resources() {
        let mut s = server();
        let prompt: PromptHandler = Arc::new(|args: HashMap<String, String>| {
            async move { Ok(format!("Hello {}", args.get("name").cloned().unwrap_or_default())) }
                .boxed()
        });
        s.register_prompt("greet", "Greeting", prompt).unwrap();

        let resource: ResourceHandler = Arc::new(|| async { Ok("body".to_string()) }.boxed());
        s.register_resource(
            "readme",
            "docs://readme",
            ResourceMetadata {
                mime_type: Some("text/plain".to_string()),
                description: None,
            },
            resource,
        )
        .unwrap();

        let resp = s
            .handle_request(JsonRpcRequest::new(
                "prompts/get",
                Some(json!({"name": "greet", "arguments": {"name": "Ada"}})),
                1,
            ))
            .await;
        let result = resp.result.unwrap();
        assert_eq!(result["messages"][0]["content"]["text"], "Hello Ada");

        let resp = s
            .handle_request(JsonRpcRequest::new(
                "resources/read",
                Some(json!({"uri": "docs://readme"})),
                2,
            ))
            .await;
        let result = resp.result.unwrap();
        assert_eq!(result["contents"][0]["text"], "body");
        assert_eq!(result["contents"][0]["mimeType"], "text/plain");

        let resp = s
            .handle_request(JsonRpcRequest::new("resources/list", None, 3))
            .await;
        assert_eq!(resp.result.unwrap()["resources"][0]["name"], "readme");
    }

    #[tokio::test]
    async fn test_notifications_get_no_reply() {
        let calls = Arc::new(std::sync::atomic::AtomicUsize::new(0));
        let counter = calls.clone();
        let handler: ToolHandler = Arc::new(move |_args: Value| {
            counter.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
            async move { CallToolResult::from_value(&json!("done")) }.boxed()
        });
        let mut s = server();
        s.register_tool("tick", "Tick", json!({}), handler).unwrap();

        let reply = s
            .handle(JsonRpcRequest::notification("notifications/initialized", None))
            .await;
        assert!(reply.is_none());

        let reply = s
            .handle(JsonRpcRequest::notification(
                "tools/call",
                Some(json!({"name": "tick", "arguments": {}})),
            ))
            .await;
        assert!(reply.is_none());
        assert_eq!(calls.load(std::sync::atomic::Ordering::SeqCst), 1);

        let reply = s.handle(JsonRpcRequest::new("ping", None, 9)).await.unwrap();
        assert_eq!(reply.id, json!(9));
    }

    #[tokio::test]
    async fn test_wrong_version_is_invalid_request() {
        let s = server();
        let mut request = JsonRpcRequest::new("ping", None, 4);
        request.jsonrpc = "1.0".to_string();
        let reply = s.handle(request).await.unwrap();
        assert_eq!(reply.error.unwrap().code, INVALID_REQUEST);

        let mut request = JsonRpcRequest::notification("notifications/initialized", None);
        request.jsonrpc = String::new();
        let reply = s.handle(request).await.unwrap();
        assert_eq!(reply.id, Value::Null);
        assert_eq!(reply.error.unwrap().code, INVALID_REQUEST);
    }
}
