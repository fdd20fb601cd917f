//! HTTP front door: accepts JSON-RPC over HTTP and hands it to the router.
//!
//! Routes:
//! - `POST /mcp`: tenant taken from the `Host` header (`{tenant}.{base_domain}`)
//! - `POST /t/{tenant}/mcp`: tenant taken from the path
//! - `GET /healthz`: liveness plus live instance count

use axum::body::Bytes;
use axum::extract::{Path, State};
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::json;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

use crate::hosting::{InboundRouter, NotFoundResponse, RouteOutcome};
use crate::protocol::{JsonRpcRequest, JsonRpcResponse, PARSE_ERROR};
use crate::types::Error;

/// Build the axum application around `router`.
pub fn app(router: Arc<InboundRouter>) -> Router {
    Router::new()
        .route("/mcp", post(mcp_by_host))
        .route("/t/{tenant}/mcp", post(mcp_by_path))
        .route("/healthz", get(healthz))
        .with_state(router)
}

/// HTTP server wrapping the inbound router.
#[derive(Debug)]
pub struct HttpServer {
    router: Arc<InboundRouter>,
    addr: SocketAddr,
    cancel: CancellationToken,
}

impl HttpServer {
    pub fn new(router: Arc<InboundRouter>, addr: SocketAddr) -> Self {
        Self {
            router,
            addr,
            cancel: CancellationToken::new(),
        }
    }

    /// Run the server until cancelled or a fatal error occurs.
    pub async fn serve(&self) -> std::io::Result<()> {
        let listener = TcpListener::bind(self.addr).await?;
        self.serve_on(listener).await
    }

    /// Run on an already-bound listener.
    pub async fn serve_on(&self, listener: TcpListener) -> std::io::Result<()> {
        tracing::info!(
            addr = %listener.local_addr()?,
            base_domain = %self.router.base_domain(),
            "HTTP server listening"
        );
        let cancel = self.cancel.clone();
        axum::serve(listener, app(self.router.clone()))
            .with_graceful_shutdown(async move {
                cancel.cancelled().await;
                tracing::info!("HTTP server shutting down");
            })
            .await
    }

    /// Signal the server to stop accepting and drain.
    pub fn shutdown(&self) {
        self.cancel.cancel();
    }

    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }
}

async fn mcp_by_host(
    State(router): State<Arc<InboundRouter>>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let host = headers
        .get(header::HOST)
        .and_then(|h| h.to_str().ok())
        .unwrap_or_default();

    match router.tenant_from_host(host) {
        Some(tenant) => handle(&router, &tenant, &body).await,
        None => {
            let label = host.split(|c: char| c == '.' || c == ':').next().unwrap_or_default();
            let body = NotFoundResponse::new(label, router.base_domain());
            (StatusCode::NOT_FOUND, Json(body)).into_response()
        }
    }
}

async fn mcp_by_path(
    State(router): State<Arc<InboundRouter>>,
    Path(tenant): Path<String>,
    body: Bytes,
) -> Response {
    handle(&router, &tenant, &body).await
}

async fn healthz(State(router): State<Arc<InboundRouter>>) -> Response {
    let stats = router.registry().stats().await;
    Json(json!({ "status": "ok", "instances": stats.live_instances })).into_response()
}

async fn handle(router: &InboundRouter, tenant: &str, body: &[u8]) -> Response {
    let request: JsonRpcRequest = match serde_json::from_slice(body) {
        Ok(request) => request,
        Err(e) => {
            let resp = JsonRpcResponse::failure(
                serde_json::Value::Null,
                PARSE_ERROR,
                format!("Parse error: {}", e),
            );
            return (StatusCode::BAD_REQUEST, Json(resp)).into_response();
        }
    };

    match router.route(tenant, request).await {
        Ok(RouteOutcome::Handled(resp)) => (StatusCode::OK, Json(resp)).into_response(),
        Ok(RouteOutcome::Accepted) => StatusCode::ACCEPTED.into_response(),
        Ok(RouteOutcome::NotFound(body)) => (StatusCode::NOT_FOUND, Json(body)).into_response(),
        Err(e) => error_response(&e),
    }
}

fn error_response(e: &Error) -> Response {
    let status =
        StatusCode::from_u16(e.http_status()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    let body = json!({ "error": e.to_string(), "code": status.as_u16() });
    (status, Json(body)).into_response()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_response_status() {
        let resp = error_response(&Error::unavailable("config store down"));
        assert_eq!(resp.status(), StatusCode::SERVICE_UNAVAILABLE);

        let resp = error_response(&Error::internal("bug"));
        assert_eq!(resp.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }
}
