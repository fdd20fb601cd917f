//! Tool dispatch: payment gate, strategy execution, usage accounting.
//!
//! One invocation moves `Received -> PaymentCheck -> Executing` and ends in
//! `Succeeded` or `Failed`. Free tools skip `PaymentCheck`. Only `Succeeded`
//! reports usage.

use async_trait::async_trait;
use serde_json::Value;
use std::fmt;
use std::sync::{Arc, OnceLock, Weak};
use thiserror::Error;
use tracing::Instrument;

use super::model::{ExecutionStrategy, Pricing, ToolConfigError, ToolDescriptor};
use super::payment::{take_payment_proof, PaymentRequired};
use super::sandbox::{CodeSandbox, SandboxError};
use super::strategies::{OutboundClient, TransportError};
use crate::protocol::CallToolResult;
use crate::types::{CallId, PaymentConfig, TenantId};

// =============================================================================
// Outcome types
// =============================================================================

/// Lifecycle of one tool invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InvocationState {
    Received,
    PaymentCheck,
    Executing,
    Succeeded,
    Failed,
}

impl fmt::Display for InvocationState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            InvocationState::Received => "received",
            InvocationState::PaymentCheck => "payment_check",
            InvocationState::Executing => "executing",
            InvocationState::Succeeded => "succeeded",
            InvocationState::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// Why an invocation failed.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ToolFailure {
    #[error("Payment required")]
    PaymentRequired(PaymentRequired),

    #[error("Unsupported tool type: {0}")]
    UnsupportedType(String),

    #[error("{0}")]
    Configuration(String),

    #[error("HTTP tool failed: {0}")]
    Http(TransportError),

    #[error("Proxy tool failed: {0}")]
    Proxy(TransportError),

    #[error("{0}")]
    Sandbox(SandboxError),
}

impl From<ToolConfigError> for ToolFailure {
    fn from(e: ToolConfigError) -> Self {
        match e {
            ToolConfigError::UnsupportedType(kind) => ToolFailure::UnsupportedType(kind),
            other => ToolFailure::Configuration(other.to_string()),
        }
    }
}

/// Terminal result of one invocation.
#[derive(Debug, Clone, PartialEq)]
pub enum ToolOutcome {
    Succeeded(Value),
    Failed(ToolFailure),
}

impl ToolOutcome {
    pub fn state(&self) -> InvocationState {
        match self {
            ToolOutcome::Succeeded(_) => InvocationState::Succeeded,
            ToolOutcome::Failed(_) => InvocationState::Failed,
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, ToolOutcome::Succeeded(_))
    }

    /// Render as a protocol tool result. Payment-required keeps its
    /// structured payload; other failures become error text.
    pub fn into_call_result(self) -> CallToolResult {
        match self {
            ToolOutcome::Succeeded(value) => CallToolResult::from_value(&value),
            ToolOutcome::Failed(ToolFailure::PaymentRequired(payload)) => {
                match serde_json::to_value(&payload) {
                    Ok(value) => CallToolResult::error_structured(value),
                    Err(e) => CallToolResult::error_text(format!("Payment required: {}", e)),
                }
            }
            ToolOutcome::Failed(failure) => CallToolResult::error_text(failure.to_string()),
        }
    }
}

// =============================================================================
// Usage reporting
// =============================================================================

/// Receives one report per successful invocation.
#[async_trait]
pub trait UsageRecorder: Send + Sync {
    async fn record_call(&self, tenant: &TenantId);
}

// =============================================================================
// Dispatcher
// =============================================================================

/// Executes tool calls for every hosted instance in the process.
pub struct ToolDispatcher {
    outbound: OutboundClient,
    sandbox: Arc<dyn CodeSandbox>,
    payment: PaymentConfig,
    usage: OnceLock<Weak<dyn UsageRecorder>>,
}

impl fmt::Debug for ToolDispatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ToolDispatcher")
            .field("outbound", &self.outbound)
            .field("payment", &self.payment)
            .field("usage_bound", &self.usage.get().is_some())
            .finish()
    }
}

impl ToolDispatcher {
    pub fn new(
        outbound: OutboundClient,
        sandbox: Arc<dyn CodeSandbox>,
        payment: PaymentConfig,
    ) -> Self {
        Self {
            outbound,
            sandbox,
            payment,
            usage: OnceLock::new(),
        }
    }

    /// Attach the usage sink. Only the first binding takes effect.
    pub fn bind_usage(&self, recorder: Weak<dyn UsageRecorder>) {
        if self.usage.set(recorder).is_err() {
            tracing::warn!("usage recorder already bound");
        }
    }

    pub fn outbound(&self) -> &OutboundClient {
        &self.outbound
    }

    /// Run one tool call to completion.
    ///
    /// The reserved payment-proof argument is always stripped before the
    /// tool sees `args`.
    pub async fn dispatch(
        &self,
        tenant: &TenantId,
        pricing: &Pricing,
        tool: &ToolDescriptor,
        args: Value,
    ) -> ToolOutcome {
        let call_id = CallId::new();
        let span = tracing::info_span!(
            "tool_call",
            tenant = %tenant,
            tool = %tool.name,
            call_id = %call_id
        );
        self.run(tenant, pricing, tool, args).instrument(span).await
    }

    async fn run(
        &self,
        tenant: &TenantId,
        pricing: &Pricing,
        tool: &ToolDescriptor,
        mut args: Value,
    ) -> ToolOutcome {
        self.transition(InvocationState::Received);
        let proof = take_payment_proof(&mut args);

        if tool.is_paid() {
            self.transition(InvocationState::PaymentCheck);
            match proof {
                None => {
                    let fee = pricing
                        .platform_fee_percentage
                        .unwrap_or(self.payment.default_platform_fee_percentage);
                    let payload = PaymentRequired::new(
                        tool.price,
                        fee,
                        pricing.payout_address.clone(),
                        self.payment.currency.clone(),
                        self.payment.network.clone(),
                    );
                    tracing::info!(amount = tool.price, "payment_required");
                    return self.finish(ToolOutcome::Failed(ToolFailure::PaymentRequired(payload)));
                }
                Some(proof) => {
                    tracing::info!(
                        amount = tool.price,
                        payment_proof = %proof.redacted(),
                        "payment_proof_received"
                    );
                }
            }
        }

        self.transition(InvocationState::Executing);
        let outcome = match tool.strategy() {
            Ok(strategy) => match self.execute(strategy, &tool.name, &args).await {
                Ok(value) => ToolOutcome::Succeeded(value),
                Err(failure) => ToolOutcome::Failed(failure),
            },
            Err(e) => ToolOutcome::Failed(e.into()),
        };

        if outcome.is_success() {
            self.report_usage(tenant).await;
        }
        self.finish(outcome)
    }

    async fn execute(
        &self,
        strategy: ExecutionStrategy<'_>,
        tool_name: &str,
        args: &Value,
    ) -> Result<Value, ToolFailure> {
        tracing::debug!(strategy = strategy.name(), "executing");
        match strategy {
            ExecutionStrategy::Http { endpoint } => self
                .outbound
                .call_http(endpoint, args)
                .await
                .map_err(ToolFailure::Http),
            ExecutionStrategy::Proxy { target } => self
                .outbound
                .call_proxy(target, tool_name, args)
                .await
                .map_err(ToolFailure::Proxy),
            ExecutionStrategy::Code { source } => self
                .sandbox
                .execute(source, args)
                .await
                .map_err(ToolFailure::Sandbox),
        }
    }

    async fn report_usage(&self, tenant: &TenantId) {
        match self.usage.get().and_then(Weak::upgrade) {
            Some(recorder) => recorder.record_call(tenant).await,
            None => tracing::debug!("no usage recorder bound"),
        }
    }

    fn transition(&self, state: InvocationState) {
        tracing::debug!(state = %state, "invocation_state");
    }

    fn finish(&self, outcome: ToolOutcome) -> ToolOutcome {
        match &outcome {
            ToolOutcome::Succeeded(_) => {
                tracing::debug!(state = %outcome.state(), "invocation_state");
            }
            ToolOutcome::Failed(failure) => {
                tracing::warn!(state = %outcome.state(), error = %failure, "tool_call_failed");
            }
        }
        outcome
    }
}

// =============================================================================
// Tests
// =============================================================================
