//! Local provisioning backend
//!
//! Provisions nothing real: resources are rows in a JSON catalog under
//! the project's engine directory. Useful for trying out stacks,
//! demos and integration tests. Provider ids are deterministic, so
//! repeated applies of the same node converge on the same resource.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use stackflow_engine::backend::{BackendResponse, ProvisioningBackend, ResolvedNode};
use stackflow_engine::error::{EngineError, Result};
use stackflow_engine::node::NodeId;
use stackflow_engine::state::STATE_DIR;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tokio::sync::Mutex;
use tracing::debug;

const CATALOG_FILE: &str = "local-backend.json";

/// One provisioned row in the local catalog
#[derive(Debug, Clone, Serialize, Deserialize)]
struct CatalogEntry {
    resource_type: String,
    attributes: BTreeMap<String, serde_json::Value>,
    tags: BTreeMap<String, String>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

/// Backend that stores resources in a local JSON file
pub struct LocalBackend {
    path: PathBuf,
    guard: Mutex<()>,
}

impl LocalBackend {
    pub fn new(project_root: &Path) -> Self {
        Self {
            path: project_root.join(STATE_DIR).join(CATALOG_FILE),
            guard: Mutex::new(()),
        }
    }

    /// Deterministic provider id for a node
    fn provider_id(node: &ResolvedNode) -> String {
        let digest = blake3::hash(node.id.to_string().as_bytes()).to_hex();
        format!("{}-{}", node.resource_type, &digest[..8])
    }

    fn load_catalog(&self) -> Result<BTreeMap<String, CatalogEntry>> {
        if !self.path.exists() {
            return Ok(BTreeMap::new());
        }
        let content = std::fs::read_to_string(&self.path)?;
        serde_json::from_str(&content).map_err(|e| {
            EngineError::terminal(format!(
                "local catalog {} is corrupt: {e}",
                self.path.display()
            ))
        })
    }

    fn save_catalog(&self, catalog: &BTreeMap<String, CatalogEntry>) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let tmp = self.path.with_extension("json.tmp");
        std::fs::write(&tmp, serde_json::to_string_pretty(catalog)?)?;
        std::fs::rename(&tmp, &self.path)?;
        Ok(())
    }
}

#[async_trait]
impl ProvisioningBackend for LocalBackend {
    async fn apply(&self, node: &ResolvedNode) -> Result<BackendResponse> {
        let _guard = self.guard.lock().await;

        let provider_id = node
            .provider_id
            .clone()
            .unwrap_or_else(|| Self::provider_id(node));

        let mut catalog = self.load_catalog()?;
        let now = Utc::now();
        let created_at = catalog
            .get(&provider_id)
            .map(|e| e.created_at)
            .unwrap_or(now);

        catalog.insert(
            provider_id.clone(),
            CatalogEntry {
                resource_type: node.resource_type.clone(),
                attributes: node.attributes.clone(),
                tags: node.tags.clone(),
                created_at,
                updated_at: now,
            },
        );
        self.save_catalog(&catalog)?;

        debug!(node = %node.id, provider_id = %provider_id, "provisioned locally");

        let mut attributes = node.attributes.clone();
        attributes.insert(
            "endpoint".to_string(),
            serde_json::json!(format!("local://{provider_id}")),
        );
        Ok(BackendResponse {
            provider_id,
            attributes,
        })
    }

    async fn destroy(&self, node_id: &NodeId, provider_id: &str) -> Result<()> {
        let _guard = self.guard.lock().await;

        let mut catalog = self.load_catalog()?;
        if catalog.remove(provider_id).is_none() {
            // Already gone; destroy is idempotent.
            debug!(node = %node_id, provider_id, "already absent");
            return Ok(());
        }
        self.save_catalog(&catalog)?;
        debug!(node = %node_id, provider_id, "destroyed");
        Ok(())
    }
}
