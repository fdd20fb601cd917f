//! Outbound execution strategies: plain HTTP tools and instance-to-instance
//! proxy calls, plus the text fetches used by dynamic prompts/resources.
//!
//! Every request carries the configured deadline. Nothing is retried here.

use serde_json::{json, Value};
use thiserror::Error;

use crate::protocol::JSONRPC_VERSION;
use crate::types::{Error, OutboundConfig, RequestId, Result};

/// Why an outbound call produced no usable result.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    #[error("returned {0}")]
    Status(u16),
    #[error("request failed: {0}")]
    Request(String),
    #[error("timed out")]
    Timeout,
    #[error("malformed response: {0}")]
    Malformed(String),
    #[error("peer error {code}: {message}")]
    Peer { code: i64, message: String },
}

impl From<reqwest::Error> for TransportError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            TransportError::Timeout
        } else if e.is_decode() {
            TransportError::Malformed(e.to_string())
        } else {
            TransportError::Request(e.to_string())
        }
    }
}

/// Shared outbound HTTP client. Cheap to clone.
#[derive(Debug, Clone)]
pub struct OutboundClient {
    http: reqwest::Client,
    base_domain: String,
}

impl OutboundClient {
    pub fn new(config: &OutboundConfig, base_domain: impl Into<String>) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .user_agent(config.user_agent.clone())
            .build()
            .map_err(|e| Error::internal(format!("failed to build HTTP client: {}", e)))?;
        Ok(Self {
            http,
            base_domain: base_domain.into(),
        })
    }

    /// POST `args` as JSON to `endpoint`; the parsed body is the result.
    pub async fn call_http(
        &self,
        endpoint: &str,
        args: &Value,
    ) -> std::result::Result<Value, TransportError> {
        let response = self.http.post(endpoint).json(args).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(TransportError::Status(status.as_u16()));
        }
        Ok(response.json::<Value>().await?)
    }

    /// Forward a tool call to another hosted instance.
    ///
    /// The peer tool is addressed by `tool_name`. A body without a `result`
    /// member is taken as the result itself.
    pub async fn call_proxy(
        &self,
        target: &str,
        tool_name: &str,
        args: &Value,
    ) -> std::result::Result<Value, TransportError> {
        let url = self.proxy_url(target);
        let request = json!({
            "jsonrpc": JSONRPC_VERSION,
            "method": "tools/call",
            "params": { "name": tool_name, "arguments": args },
            "id": RequestId::new().as_str(),
        });

        let response = self.http.post(&url).json(&request).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(TransportError::Status(status.as_u16()));
        }
        let body = response.json::<Value>().await?;
        unwrap_proxy_body(body)
    }

    /// GET `url` and return the body as text.
    pub async fn fetch_text(&self, url: &str) -> std::result::Result<String, TransportError> {
        let response = self.http.get(url).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(TransportError::Status(status.as_u16()));
        }
        Ok(response.text().await?)
    }

    /// URLs pass through; anything else is a peer subdomain.
    pub fn proxy_url(&self, target: &str) -> String {
        if target.starts_with("http://") || target.starts_with("https://") {
            target.to_string()
        } else {
            format!("https://{}.{}/mcp", target, self.base_domain)
        }
    }
}

fn unwrap_proxy_body(body: Value) -> std::result::Result<Value, TransportError> {
    let Value::Object(mut map) = body else {
        return Ok(body);
    };

    match map.remove("result") {
        Some(result) if !result.is_null() => return Ok(result),
        Some(null) => {
            map.insert("result".to_string(), null);
        }
        None => {}
    }

    if let Some(error) = map.get("error").filter(|e| e.is_object()) {
        let code = error.get("code").and_then(Value::as_i64).unwrap_or(0);
        let message = error
            .get("message")
            .and_then(Value::as_str)
            .unwrap_or("unknown error")
            .to_string();
        return Err(TransportError::Peer { code, message });
    }

    Ok(Value::Object(map))
}
