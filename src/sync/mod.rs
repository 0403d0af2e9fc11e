// ABOUTME: Pipeline driver: page-level backoff, reconciliation and the endpoint loop
// ABOUTME: Re-exports the orchestrator and its configuration

pub mod orchestrator;
pub mod reconciler;
pub mod retry;

pub use orchestrator::{
    adjust_concurrency, EndpointOutcome, EndpointStats, Orchestrator, OrchestratorConfig,
    RunSummary,
};
pub use reconciler::{partition, Partition, ReconcileError, ReconcileOutcome, Reconciler};
pub use retry::{with_backoff, BackoffPolicy};
