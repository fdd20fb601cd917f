//! Multi-tenant hosting runtime.
//!
//! - **model**: tenant configuration and tool descriptors
//! - **store**: where tenant configurations come from
//! - **payment**: fee split and payment-required payloads
//! - **sandbox**: isolated execution of code tools
//! - **strategies**: outbound HTTP and proxy calls
//! - **dispatcher**: per-call state machine tying the above together
//! - **registry**: cache of running instances, one per tenant
//! - **router**: subdomain to instance to response

pub mod dispatcher;
pub mod model;
pub mod payment;
pub mod registry;
pub mod router;
pub mod sandbox;
pub mod store;
pub mod strategies;

pub use dispatcher::{InvocationState, ToolDispatcher, ToolFailure, ToolOutcome, UsageRecorder};
pub use model::{
    render_template, ExecutionStrategy, HostedServerConfig, Pricing, PromptDescriptor,
    ResourceDescriptor, ResourceKind, ToolConfigError, ToolDescriptor,
};
pub use payment::{
    calculate_payout, take_payment_proof, PaymentProof, PaymentRequired, PaymentTerms, Payout,
    PAYMENT_PROOF_ARG,
};
pub use registry::{InstanceRegistry, RegistryStats, RunningInstance, UsageSnapshot};
pub use router::{InboundRouter, NotFoundResponse, RouteOutcome};
pub use sandbox::{CodeSandbox, ProcessSandbox, SandboxError};
pub use store::{ConfigLoader, InMemoryConfigStore, JsonDirConfigStore};
pub use strategies::{OutboundClient, TransportError};
