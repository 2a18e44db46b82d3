//! Stackflow engine
//!
//! Turns an instantiated stack into a dependency graph, diffs it
//! against recorded state into an ordered plan, and executes the plan
//! against a provisioning backend with bounded concurrency, retries and
//! per-node state persistence.

pub mod backend;
pub mod binder;
pub mod error;
pub mod executor;
pub mod fingerprint;
pub mod graph;
pub mod node;
pub mod outputs;
pub mod plan;
pub mod state;

// Re-exports
pub use backend::{BackendResponse, ProvisioningBackend, ResolvedNode, RetryConfig};
pub use error::{EngineError, Result};
pub use executor::{Executor, ExecutorConfig, RunReport};
pub use graph::{build_graph, ResourceGraph};
pub use node::{Attr, AttrValue, NodeId, RefPhase, Reference, ResourceNode, Segment};
pub use outputs::{resolve_output, resolve_outputs};
pub use plan::{build_destroy_plan, build_plan, Action, ActionType, Plan, PlanSummary};
pub use state::{StateDocument, StateLock, StateRecord, StateStore, STATE_DIR, STATE_VERSION};
