//! Versioned state store
//!
//! Records what has actually been provisioned: one record per node with
//! its provider id, resolved attributes, the canonical config snapshot
//! and the fingerprint it was applied from. Saves go through a temp
//! file plus rename, keeping the previous state as a backup. A lock
//! file serializes runs against the same project.

use crate::error::{EngineError, Result};
use crate::node::NodeId;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Current state file format version
pub const STATE_VERSION: u32 = 1;

/// Directory under the project root holding engine files
pub const STATE_DIR: &str = ".stackflow";

const STATE_FILE: &str = "state.json";
const BACKUP_FILE: &str = "state.json.backup";
const LOCK_FILE: &str = "lock.json";

/// A lock older than this is considered abandoned and reclaimed
const STALE_LOCK_AGE_HOURS: i64 = 1;

/// One provisioned resource as last applied
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StateRecord {
    pub resource_type: String,

    /// Identifier assigned by the provisioning backend
    pub provider_id: String,

    /// Canonical config snapshot from the applying plan
    pub config: serde_json::Value,

    /// Last-applied attribute values: the fully resolved inputs merged
    /// with whatever runtime attributes the backend reported
    pub attributes: BTreeMap<String, serde_json::Value>,

    /// Fingerprint of the config this record was applied from
    pub fingerprint: String,

    /// Dependency edges at apply time, used to order destroys
    #[serde(default)]
    pub depends_on: Vec<String>,

    pub applied_at: DateTime<Utc>,
}

/// The whole persisted state document
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StateDocument {
    pub version: u32,

    /// Monotonic save counter
    #[serde(default)]
    pub serial: u64,

    pub updated_at: DateTime<Utc>,

    pub resources: BTreeMap<String, StateRecord>,
}

impl Default for StateDocument {
    fn default() -> Self {
        Self {
            version: STATE_VERSION,
            serial: 0,
            updated_at: Utc::now(),
            resources: BTreeMap::new(),
        }
    }
}

impl StateDocument {
    pub fn record(&self, id: &NodeId) -> Option<&StateRecord> {
        self.resources.get(&id.to_string())
    }

    pub fn upsert(&mut self, id: &NodeId, record: StateRecord) {
        self.resources.insert(id.to_string(), record);
    }

    pub fn remove(&mut self, id: &NodeId) -> Option<StateRecord> {
        self.resources.remove(&id.to_string())
    }

    /// Attribute of a recorded resource, checking backend-reported
    /// attributes first and the config snapshot second
    pub fn attribute(&self, id: &NodeId, name: &str) -> Option<serde_json::Value> {
        let record = self.record(id)?;
        if name == "id" {
            return Some(serde_json::Value::String(record.provider_id.clone()));
        }
        if let Some(value) = record.attributes.get(name) {
            return Some(value.clone());
        }
        record
            .config
            .get("attrs")
            .and_then(|attrs| attrs.get(name))
            .cloned()
    }
}

/// Reads and writes the state document under a project root
#[derive(Debug, Clone)]
pub struct StateStore {
    dir: PathBuf,
}

impl StateStore {
    pub fn new(project_root: &Path) -> Self {
        Self {
            dir: project_root.join(STATE_DIR),
        }
    }

    pub fn state_path(&self) -> PathBuf {
        self.dir.join(STATE_FILE)
    }

    fn backup_path(&self) -> PathBuf {
        self.dir.join(BACKUP_FILE)
    }

    fn lock_path(&self) -> PathBuf {
        self.dir.join(LOCK_FILE)
    }

    /// Load the current state; a missing file is an empty document
    pub fn load(&self) -> Result<StateDocument> {
        let path = self.state_path();
        if !path.exists() {
            debug!(path = %path.display(), "no state file, starting empty");
            return Ok(StateDocument::default());
        }

        let content = std::fs::read_to_string(&path)?;
        let doc: StateDocument = serde_json::from_str(&content)
            .map_err(|e| EngineError::State(format!("failed to parse {}: {e}", path.display())))?;

        if doc.version > STATE_VERSION {
            return Err(EngineError::State(format!(
                "state file version {} is newer than supported version {STATE_VERSION}; upgrade the tool",
                doc.version
            )));
        }

        Ok(doc)
    }

    /// Persist the document atomically, keeping the previous file as backup
    pub fn save(&self, doc: &mut StateDocument) -> Result<()> {
        std::fs::create_dir_all(&self.dir)?;

        doc.version = STATE_VERSION;
        doc.serial += 1;
        doc.updated_at = Utc::now();

        let path = self.state_path();
        if path.exists() {
            std::fs::copy(&path, self.backup_path())?;
        }

        let tmp = self.dir.join(format!("{STATE_FILE}.tmp"));
        let content = serde_json::to_string_pretty(doc)?;
        std::fs::write(&tmp, content)?;
        std::fs::rename(&tmp, &path)?;

        debug!(serial = doc.serial, resources = doc.resources.len(), "state saved");
        Ok(())
    }

    /// Acquire the project lock; released when the guard drops
    pub fn lock(&self) -> Result<StateLock> {
        std::fs::create_dir_all(&self.dir)?;
        let path = self.lock_path();

        if path.exists() {
            let holder: LockInfo = std::fs::read_to_string(&path)
                .ok()
                .and_then(|c| serde_json::from_str(&c).ok())
                .unwrap_or_default();

            let age = Utc::now() - holder.acquired_at;
            if age < Duration::hours(STALE_LOCK_AGE_HOURS) {
                return Err(EngineError::LockHeld(format!(
                    "another run (pid {}) holds the lock since {}",
                    holder.pid, holder.acquired_at
                )));
            }
            warn!(pid = holder.pid, "reclaiming stale lock");
            std::fs::remove_file(&path)?;
        }

        let info = LockInfo {
            pid: std::process::id(),
            acquired_at: Utc::now(),
        };
        std::fs::write(&path, serde_json::to_string_pretty(&info)?)?;
        Ok(StateLock { path })
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct LockInfo {
    pid: u32,
    acquired_at: DateTime<Utc>,
}

impl Default for LockInfo {
    fn default() -> Self {
        Self {
            pid: 0,
            acquired_at: Utc::now(),
        }
    }
}

/// RAII guard removing the lock file on drop
#[derive(Debug)]
pub struct StateLock {
    path: PathBuf,
}

impl Drop for StateLock {
    fn drop(&mut self) {
        if let Err(e) = std::fs::remove_file(&self.path) {
            warn!(path = %self.path.display(), error = %e, "failed to remove lock file");
        }
    }
}
