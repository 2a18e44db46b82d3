//! Provisioning backend abstraction
//!
//! The executor talks to infrastructure through this trait. A backend
//! receives nodes with every reference already resolved to a concrete
//! value and returns the provider id plus any runtime attributes.

use crate::error::Result;
use crate::node::NodeId;
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::time::Duration;

/// A node with all attribute values fully resolved
#[derive(Debug, Clone)]
pub struct ResolvedNode {
    pub id: NodeId,
    pub resource_type: String,
    pub attributes: BTreeMap<String, serde_json::Value>,
    pub tags: BTreeMap<String, String>,

    /// Present on update/replace: the id recorded from the last apply
    pub provider_id: Option<String>,
}

/// What a backend reports after a successful apply
#[derive(Debug, Clone)]
pub struct BackendResponse {
    pub provider_id: String,

    /// Runtime attributes only the backend knows (endpoints, addresses)
    pub attributes: BTreeMap<String, serde_json::Value>,
}

/// Creates, updates and destroys concrete resources
#[async_trait]
pub trait ProvisioningBackend: Send + Sync {
    /// Create or update a resource to match the resolved node
    async fn apply(&self, node: &ResolvedNode) -> Result<BackendResponse>;

    /// Destroy the resource with the given provider id
    async fn destroy(&self, node_id: &NodeId, provider_id: &str) -> Result<()>;
}

/// Retry behavior for transient backend failures
#[derive(Debug, Clone)]
pub struct RetryConfig {
    pub max_attempts: u32,
    pub initial_delay: Duration,
    pub max_delay: Duration,
    pub backoff_multiplier: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
            backoff_multiplier: 2.0,
        }
    }
}

impl RetryConfig {
    /// Delay before the given retry attempt (1-based), capped at max_delay
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let factor = self.backoff_multiplier.powi(attempt.saturating_sub(1) as i32);
        let delay = self.initial_delay.mul_f64(factor);
        delay.min(self.max_delay)
    }
}
