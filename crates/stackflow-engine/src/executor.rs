//! Plan executor
//!
//! Walks the plan's batches: delete levels first, then apply levels.
//! Nodes inside a batch run concurrently up to the configured limit;
//! state is persisted after every node so an interrupted run can be
//! resumed. A node whose dependency failed is blocked, not attempted.

use crate::backend::{ProvisioningBackend, ResolvedNode, RetryConfig};
use crate::error::{EngineError, Result};
use crate::fingerprint;
use crate::graph::ResourceGraph;
use crate::node::{AttrValue, NodeId, Segment};
use crate::plan::{ActionType, Plan};
use crate::state::{StateDocument, StateRecord, StateStore};
use chrono::Utc;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{Mutex, Semaphore};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

/// Tunables for one run
#[derive(Debug, Clone)]
pub struct ExecutorConfig {
    /// Maximum nodes in flight at once
    pub concurrency: usize,

    /// Per-node backend operation timeout
    pub node_timeout: Duration,

    pub retry: RetryConfig,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            concurrency: 4,
            node_timeout: Duration::from_secs(60),
            retry: RetryConfig::default(),
        }
    }
}

/// Outcome of one run
#[derive(Debug, Clone, Default)]
pub struct RunReport {
    pub succeeded: Vec<NodeId>,
    pub failed: Vec<(NodeId, String)>,
    pub blocked: Vec<NodeId>,
    pub cancelled: bool,
    pub duration_ms: u128,
}

impl RunReport {
    pub fn is_clean(&self) -> bool {
        self.failed.is_empty() && self.blocked.is_empty() && !self.cancelled
    }

    /// Convert a dirty report into the corresponding error
    pub fn into_result(self) -> Result<RunReport> {
        if self.cancelled {
            return Err(EngineError::Cancelled);
        }
        if !self.failed.is_empty() {
            return Err(EngineError::PartialApply {
                succeeded: self.succeeded.iter().map(|n| n.to_string()).collect(),
                failed: self
                    .failed
                    .iter()
                    .map(|(n, e)| format!("{n}: {e}"))
                    .collect(),
                blocked: self.blocked.iter().map(|n| n.to_string()).collect(),
            });
        }
        Ok(self)
    }
}

/// Runs a plan against a provisioning backend
pub struct Executor {
    backend: Arc<dyn ProvisioningBackend>,
    store: StateStore,
    config: ExecutorConfig,
    cancel: CancellationToken,
}

impl Executor {
    pub fn new(backend: Arc<dyn ProvisioningBackend>, store: StateStore) -> Self {
        Self {
            backend,
            store,
            config: ExecutorConfig::default(),
            cancel: CancellationToken::new(),
        }
    }

    pub fn with_config(mut self, config: ExecutorConfig) -> Self {
        self.config = config;
        self
    }

    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Execute every batch of the plan; the lock is held for the duration
    #[instrument(skip_all)]
    pub async fn run(&self, plan: &Plan, graph: &ResourceGraph) -> Result<RunReport> {
        let _lock = self.store.lock()?;
        let started = Instant::now();

        let state = Arc::new(Mutex::new(self.store.load()?));
        let mut report = RunReport::default();
        let mut unavailable: BTreeSet<NodeId> = BTreeSet::new();

        // Recorded dependents, used to hold back a dependency's delete
        // when destroying one of its dependents failed.
        let dependents = {
            let doc = state.lock().await;
            recorded_dependents(&doc)
        };
        let mut undeletable: BTreeSet<NodeId> = BTreeSet::new();

        for batch in &plan.delete_batches {
            if self.cancel.is_cancelled() {
                report.cancelled = true;
                break;
            }
            self.run_delete_batch(batch, &state, &mut report, &mut undeletable, &dependents)
                .await;
        }

        if !report.cancelled {
            for batch in &plan.apply_batches {
                if self.cancel.is_cancelled() {
                    report.cancelled = true;
                    break;
                }
                self.run_apply_batch(batch, plan, graph, &state, &mut report, &mut unavailable)
                    .await;
            }
        }

        report.duration_ms = started.elapsed().as_millis();
        info!(
            succeeded = report.succeeded.len(),
            failed = report.failed.len(),
            blocked = report.blocked.len(),
            cancelled = report.cancelled,
            "run finished"
        );
        Ok(report)
    }

    async fn run_delete_batch(
        &self,
        batch: &[NodeId],
        state: &Arc<Mutex<StateDocument>>,
        report: &mut RunReport,
        undeletable: &mut BTreeSet<NodeId>,
        dependents: &BTreeMap<NodeId, Vec<NodeId>>,
    ) {
        let semaphore = Arc::new(Semaphore::new(self.config.concurrency));
        let mut handles = Vec::with_capacity(batch.len());

        for id in batch {
            // A dependency outlives its dependents: if one of them could
            // not be destroyed, this node must stay too.
            if dependents
                .get(id)
                .is_some_and(|deps| deps.iter().any(|d| undeletable.contains(d)))
            {
                debug!(node = %id, "delete blocked, a dependent failed to destroy");
                report.blocked.push(id.clone());
                undeletable.insert(id.clone());
                continue;
            }

            let provider_id = {
                let doc = state.lock().await;
                doc.record(id).map(|r| r.provider_id.clone())
            };
            let Some(provider_id) = provider_id else {
                // Already absent; nothing was changed.
                debug!(node = %id, "no state record, skipping delete");
                continue;
            };

            let backend = Arc::clone(&self.backend);
            let semaphore = Arc::clone(&semaphore);
            let state = Arc::clone(state);
            let store = self.store.clone();
            let retry = self.config.retry.clone();
            let timeout = self.config.node_timeout;
            let id = id.clone();

            handles.push(tokio::spawn(async move {
                let _permit = semaphore.acquire().await;
                debug!(node = %id, "destroying");
                let result = with_retry(&retry, timeout, &id, || {
                    backend.destroy(&id, &provider_id)
                })
                .await;

                match result {
                    Ok(()) => {
                        let mut doc = state.lock().await;
                        doc.remove(&id);
                        if let Err(e) = store.save(&mut doc) {
                            return (id, Err(e));
                        }
                        (id, Ok(()))
                    }
                    Err(e) => (id, Err(e)),
                }
            }));
        }

        for handle in handles {
            match handle.await {
                Ok((id, Ok(()))) => report.succeeded.push(id),
                Ok((id, Err(e))) => {
                    report.failed.push((id.clone(), e.to_string()));
                    undeletable.insert(id);
                }
                Err(e) => warn!(error = %e, "destroy task panicked"),
            }
        }
    }

    #[allow(clippy::too_many_arguments)]
    async fn run_apply_batch(
        &self,
        batch: &[NodeId],
        plan: &Plan,
        graph: &ResourceGraph,
        state: &Arc<Mutex<StateDocument>>,
        report: &mut RunReport,
        unavailable: &mut BTreeSet<NodeId>,
    ) {
        let semaphore = Arc::new(Semaphore::new(self.config.concurrency));
        let mut handles = Vec::with_capacity(batch.len());

        for id in batch {
            let Some(node) = graph.get(id) else { continue };

            if node.depends_on.iter().any(|dep| unavailable.contains(dep)) {
                debug!(node = %id, "blocked by failed dependency");
                report.blocked.push(id.clone());
                unavailable.insert(id.clone());
                continue;
            }

            let action = plan
                .action_for(id)
                .map(|a| a.action_type)
                .unwrap_or(ActionType::NoOp);

            let resolved = {
                let doc = state.lock().await;
                resolve_node(node, &doc, action)
            };
            let resolved = match resolved {
                Ok(r) => r,
                Err(e) => {
                    report.failed.push((id.clone(), e.to_string()));
                    unavailable.insert(id.clone());
                    continue;
                }
            };

            // Seed the record with the resolved inputs so later runs can
            // serve them to dependents; backend attributes merge on top.
            let record_template = StateRecord {
                resource_type: node.resource_type.clone(),
                provider_id: String::new(),
                config: fingerprint::canonical_config(node),
                attributes: resolved.attributes.clone(),
                fingerprint: fingerprint::fingerprint(node),
                depends_on: node.depends_on.iter().map(|d| d.to_string()).collect(),
                applied_at: Utc::now(),
            };

            let backend = Arc::clone(&self.backend);
            let semaphore = Arc::clone(&semaphore);
            let state = Arc::clone(state);
            let store = self.store.clone();
            let retry = self.config.retry.clone();
            let timeout = self.config.node_timeout;
            let id = id.clone();

            handles.push(tokio::spawn(async move {
                let _permit = semaphore.acquire().await;
                debug!(node = %id, action = %action, "applying");

                // Replace tears down the old resource first.
                if action == ActionType::Replace {
                    if let Some(old_id) = resolved.provider_id.clone() {
                        let destroy = with_retry(&retry, timeout, &id, || {
                            backend.destroy(&id, &old_id)
                        })
                        .await;
                        if let Err(e) = destroy {
                            return (id, Err(e));
                        }
                        let mut doc = state.lock().await;
                        doc.remove(&id);
                        if let Err(e) = store.save(&mut doc) {
                            return (id, Err(e));
                        }
                    }
                }

                let target = if action == ActionType::Replace {
                    ResolvedNode {
                        provider_id: None,
                        ..resolved
                    }
                } else {
                    resolved
                };

                let response =
                    with_retry(&retry, timeout, &id, || backend.apply(&target)).await;

                match response {
                    Ok(response) => {
                        let mut record = record_template;
                        record.provider_id = response.provider_id;
                        record.attributes.extend(response.attributes);
                        record.applied_at = Utc::now();

                        let mut doc = state.lock().await;
                        doc.upsert(&id, record);
                        if let Err(e) = store.save(&mut doc) {
                            return (id, Err(e));
                        }
                        (id, Ok(()))
                    }
                    Err(e) => (id, Err(e)),
                }
            }));
        }

        for handle in handles {
            match handle.await {
                Ok((id, Ok(()))) => report.succeeded.push(id),
                Ok((id, Err(e))) => {
                    report.failed.push((id.clone(), e.to_string()));
                    unavailable.insert(id);
                }
                Err(e) => warn!(error = %e, "apply task panicked"),
            }
        }
    }
}

/// Recorded dependency edges inverted: dependency -> recorded dependents
fn recorded_dependents(state: &StateDocument) -> BTreeMap<NodeId, Vec<NodeId>> {
    let mut dependents: BTreeMap<NodeId, Vec<NodeId>> = BTreeMap::new();
    for (key, record) in &state.resources {
        let Ok(dependent) = crate::plan::parse_state_key(key) else {
            continue;
        };
        for dep_key in &record.depends_on {
            if let Ok(dep) = crate::plan::parse_state_key(dep_key) {
                dependents.entry(dep).or_default().push(dependent.clone());
            }
        }
    }
    dependents
}

/// Run an operation with timeout and exponential backoff on retryable errors
async fn with_retry<T, F, Fut>(
    retry: &RetryConfig,
    timeout: Duration,
    id: &NodeId,
    mut op: F,
) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<T>>,
{
    let mut attempt = 1;
    loop {
        let outcome = match tokio::time::timeout(timeout, op()).await {
            Ok(result) => result,
            Err(_) => Err(EngineError::Timeout(id.to_string())),
        };

        match outcome {
            Ok(value) => return Ok(value),
            Err(e) if attempt < retry.max_attempts && is_transient(&e) => {
                let delay = retry.delay_for_attempt(attempt);
                warn!(node = %id, attempt, error = %e, delay_ms = delay.as_millis() as u64, "retrying");
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            Err(e) => return Err(e),
        }
    }
}

fn is_transient(e: &EngineError) -> bool {
    e.is_retryable() || matches!(e, EngineError::Timeout(_))
}

/// Substitute every dynamic reference from recorded state
fn resolve_node(
    node: &crate::node::ResourceNode,
    state: &StateDocument,
    action: ActionType,
) -> Result<ResolvedNode> {
    let mut attributes = BTreeMap::new();
    for (name, attr) in &node.attrs {
        let value = match &attr.value {
            AttrValue::Literal(v) => v.clone(),
            AttrValue::Template(segments) => resolve_template(&node.id, segments, state)?,
        };
        attributes.insert(name.clone(), value);
    }

    let provider_id = match action {
        ActionType::Create => None,
        _ => state.record(&node.id).map(|r| r.provider_id.clone()),
    };

    Ok(ResolvedNode {
        id: node.id.clone(),
        resource_type: node.resource_type.clone(),
        attributes,
        tags: node.tags.clone(),
        provider_id,
    })
}

fn resolve_template(
    id: &NodeId,
    segments: &[Segment],
    state: &StateDocument,
) -> Result<serde_json::Value> {
    // A whole-value reference keeps the referenced value's type.
    if let [Segment::Ref(reference)] = segments {
        return state
            .attribute(&reference.node_id(), &reference.attribute)
            .ok_or_else(|| missing_ref(id, reference));
    }

    let mut out = String::new();
    for segment in segments {
        match segment {
            Segment::Text(t) => out.push_str(t),
            Segment::Ref(reference) => {
                let value = state
                    .attribute(&reference.node_id(), &reference.attribute)
                    .ok_or_else(|| missing_ref(id, reference))?;
                out.push_str(&crate::binder::render_scalar(&value));
            }
        }
    }
    Ok(serde_json::Value::String(out))
}

fn missing_ref(id: &NodeId, reference: &crate::node::Reference) -> EngineError {
    EngineError::Reference(format!(
        "{id}: attribute '{reference}' is not available in state"
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::BackendResponse;
    use crate::binder::bind_value;
    use crate::node::{Attr, ResourceNode};
    use crate::plan::{build_plan, Plan};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicU32, Ordering};
    use tempfile::TempDir;

    /// In-memory backend with per-node failure, hang and destroy-failure knobs
    #[derive(Default)]
    struct FakeBackend {
        fail_node: Option<NodeId>,
        failures_left: AtomicU32,
        fail_destroy: Option<NodeId>,
        hang_node: Option<NodeId>,
        applied: Mutex<Vec<ResolvedNode>>,
        destroyed: Mutex<Vec<NodeId>>,
    }

    impl FakeBackend {
        fn new() -> Self {
            Self::default()
        }

        fn failing(node: NodeId, times: u32) -> Self {
            Self {
                fail_node: Some(node),
                failures_left: AtomicU32::new(times),
                ..Self::default()
            }
        }

        fn failing_destroy(node: NodeId) -> Self {
            Self {
                fail_destroy: Some(node),
                ..Self::default()
            }
        }

        fn hanging(node: NodeId) -> Self {
            Self {
                hang_node: Some(node),
                ..Self::default()
            }
        }
    }

    #[async_trait]
    impl ProvisioningBackend for FakeBackend {
        async fn apply(&self, node: &ResolvedNode) -> Result<BackendResponse> {
            if self.hang_node.as_ref() == Some(&node.id) {
                tokio::time::sleep(Duration::from_secs(3600)).await;
            }
            if self.fail_node.as_ref() == Some(&node.id) {
                let left = self.failures_left.load(Ordering::SeqCst);
                if left > 0 {
                    self.failures_left.store(left - 1, Ordering::SeqCst);
                    return Err(EngineError::retryable("simulated transient failure"));
                }
            }
            self.applied.lock().await.push(node.clone());
            let mut attributes = BTreeMap::new();
            attributes.insert(
                "endpoint".to_string(),
                serde_json::json!(format!("https://{}.local", node.id)),
            );
            Ok(BackendResponse {
                provider_id: format!("{}-{}", node.resource_type, node.id),
                attributes,
            })
        }

        async fn destroy(&self, node_id: &NodeId, _provider_id: &str) -> Result<()> {
            if self.fail_destroy.as_ref() == Some(node_id) {
                return Err(EngineError::terminal("simulated destroy failure"));
            }
            self.destroyed.lock().await.push(node_id.clone());
            Ok(())
        }
    }

    fn node(id: NodeId, attrs: &[(&str, serde_json::Value)]) -> ResourceNode {
        let mut map = BTreeMap::new();
        for (name, value) in attrs {
            map.insert(
                name.to_string(),
                Attr {
                    value: bind_value(&id, value).unwrap(),
                    immutable: false,
                },
            );
        }
        ResourceNode {
            id,
            resource_type: "object_storage".to_string(),
            attrs: map,
            tags: BTreeMap::new(),
            depends_on: BTreeSet::new(),
        }
    }

    fn graph_of(nodes: Vec<ResourceNode>) -> ResourceGraph {
        let mut map = BTreeMap::new();
        for mut n in nodes {
            let deps: Vec<NodeId> = n
                .references()
                .iter()
                .map(|r| r.node_id())
                .filter(|d| d != &n.id)
                .collect();
            n.depends_on.extend(deps);
            map.insert(n.id.clone(), n);
        }
        ResourceGraph { nodes: map }
    }

    fn fast_config() -> ExecutorConfig {
        ExecutorConfig {
            concurrency: 4,
            node_timeout: Duration::from_secs(5),
            retry: RetryConfig {
                max_attempts: 3,
                initial_delay: Duration::from_millis(1),
                max_delay: Duration::from_millis(5),
                backoff_multiplier: 2.0,
            },
        }
    }

    #[tokio::test]
    async fn test_apply_persists_state_per_node() {
        let dir = TempDir::new().unwrap();
        let store = StateStore::new(dir.path());
        let graph = graph_of(vec![
            node(
                NodeId::new("storage", "bucket"),
                &[("name", serde_json::json!("assets"))],
            ),
            node(
                NodeId::new("storage", "table"),
                &[("source", serde_json::json!("${storage.bucket.endpoint}"))],
            ),
        ]);
        let plan = build_plan(&graph, &StateDocument::default()).unwrap();

        let backend = Arc::new(FakeBackend::new());
        let executor = Executor::new(backend.clone(), store.clone()).with_config(fast_config());
        let report = executor.run(&plan, &graph).await.unwrap();

        assert!(report.is_clean());
        assert_eq!(report.succeeded.len(), 2);

        let doc = store.load().unwrap();
        assert_eq!(doc.resources.len(), 2);

        // The dynamic reference resolved to the bucket's runtime endpoint.
        let applied = backend.applied.lock().await.clone();
        assert_eq!(applied[0].id, NodeId::new("storage", "bucket"));
        assert_eq!(
            applied[1].attributes["source"],
            serde_json::json!("https://storage.bucket.local")
        );
        let table = doc.record(&NodeId::new("storage", "table")).unwrap();
        assert!(table.provider_id.starts_with("object_storage-"));
    }

    #[tokio::test]
    async fn test_chained_dynamic_reference_resolves_through_state() {
        let dir = TempDir::new().unwrap();
        let store = StateStore::new(dir.path());
        // relay.url is itself a template; handler references relay.url.
        let graph = graph_of(vec![
            node(
                NodeId::new("storage", "bucket"),
                &[("name", serde_json::json!("assets"))],
            ),
            node(
                NodeId::new("storage", "relay"),
                &[("url", serde_json::json!("x-${storage.bucket.endpoint}"))],
            ),
            node(
                NodeId::new("compute", "handler"),
                &[("target", serde_json::json!("${storage.relay.url}"))],
            ),
        ]);
        let plan = build_plan(&graph, &StateDocument::default()).unwrap();

        let backend = Arc::new(FakeBackend::new());
        let executor = Executor::new(backend.clone(), store.clone()).with_config(fast_config());
        let report = executor.run(&plan, &graph).await.unwrap();
        assert!(report.is_clean());

        let applied = backend.applied.lock().await.clone();
        let handler = applied
            .iter()
            .find(|n| n.id == NodeId::new("compute", "handler"))
            .unwrap();
        assert_eq!(
            handler.attributes["target"],
            serde_json::json!("x-https://storage.bucket.local")
        );

        // The record serves the applied value, not the symbolic template.
        let doc = store.load().unwrap();
        let url = doc
            .attribute(&NodeId::new("storage", "relay"), "url")
            .unwrap();
        assert!(!url.to_string().contains("${"), "unresolved: {url}");
    }

    #[tokio::test]
    async fn test_transient_failure_is_retried() {
        let dir = TempDir::new().unwrap();
        let store = StateStore::new(dir.path());
        let id = NodeId::new("storage", "bucket");
        let graph = graph_of(vec![node(
            id.clone(),
            &[("name", serde_json::json!("assets"))],
        )]);
        let plan = build_plan(&graph, &StateDocument::default()).unwrap();

        let backend = Arc::new(FakeBackend::failing(id.clone(), 2));
        let executor = Executor::new(backend, store).with_config(fast_config());
        let report = executor.run(&plan, &graph).await.unwrap();

        assert!(report.is_clean());
        assert_eq!(report.succeeded, vec![id]);
    }

    #[tokio::test]
    async fn test_exhausted_retries_fail_and_block_dependents() {
        let dir = TempDir::new().unwrap();
        let store = StateStore::new(dir.path());
        let bucket = NodeId::new("storage", "bucket");
        let graph = graph_of(vec![
            node(bucket.clone(), &[("name", serde_json::json!("assets"))]),
            node(
                NodeId::new("storage", "table"),
                &[("source", serde_json::json!("${storage.bucket.endpoint}"))],
            ),
            node(
                NodeId::new("queue", "events"),
                &[("name", serde_json::json!("events"))],
            ),
        ]);
        let plan = build_plan(&graph, &StateDocument::default()).unwrap();

        let backend = Arc::new(FakeBackend::failing(bucket.clone(), 99));
        let executor = Executor::new(backend, store.clone()).with_config(fast_config());
        let report = executor.run(&plan, &graph).await.unwrap();

        assert_eq!(report.failed.len(), 1);
        assert_eq!(report.failed[0].0, bucket);
        assert_eq!(report.blocked, vec![NodeId::new("storage", "table")]);
        // The independent node still applied.
        assert!(report.succeeded.contains(&NodeId::new("queue", "events")));

        let err = report.into_result().unwrap_err();
        assert!(matches!(err, EngineError::PartialApply { .. }));
    }

    #[tokio::test]
    async fn test_destroy_removes_state_records() {
        let dir = TempDir::new().unwrap();
        let store = StateStore::new(dir.path());
        let graph = graph_of(vec![node(
            NodeId::new("storage", "bucket"),
            &[("name", serde_json::json!("assets"))],
        )]);
        let plan = build_plan(&graph, &StateDocument::default()).unwrap();

        let backend = Arc::new(FakeBackend::new());
        let executor = Executor::new(backend.clone(), store.clone()).with_config(fast_config());
        executor.run(&plan, &graph).await.unwrap();

        let state = store.load().unwrap();
        let destroy = crate::plan::build_destroy_plan(&state).unwrap();
        let empty = ResourceGraph {
            nodes: BTreeMap::new(),
        };
        let report = executor.run(&destroy, &empty).await.unwrap();

        assert!(report.is_clean());
        assert!(store.load().unwrap().resources.is_empty());
        assert_eq!(
            backend.destroyed.lock().await.clone(),
            vec![NodeId::new("storage", "bucket")]
        );
    }

    #[tokio::test]
    async fn test_failed_destroy_blocks_dependency_delete() {
        let dir = TempDir::new().unwrap();
        let store = StateStore::new(dir.path());
        let bucket = NodeId::new("storage", "bucket");
        let table = NodeId::new("storage", "table");
        let graph = graph_of(vec![
            node(bucket.clone(), &[("name", serde_json::json!("assets"))]),
            node(
                table.clone(),
                &[("source", serde_json::json!("${storage.bucket.endpoint}"))],
            ),
        ]);
        let plan = build_plan(&graph, &StateDocument::default()).unwrap();

        let backend = Arc::new(FakeBackend::failing_destroy(table.clone()));
        let executor = Executor::new(backend.clone(), store.clone()).with_config(fast_config());
        executor.run(&plan, &graph).await.unwrap();

        let destroy = crate::plan::build_destroy_plan(&store.load().unwrap()).unwrap();
        let empty = ResourceGraph {
            nodes: BTreeMap::new(),
        };
        let report = executor.run(&destroy, &empty).await.unwrap();

        // The table could not be destroyed, so the bucket it points at
        // must survive and be reported as blocked.
        assert_eq!(report.failed.len(), 1);
        assert_eq!(report.failed[0].0, table.clone());
        assert_eq!(report.blocked, vec![bucket.clone()]);
        assert!(backend.destroyed.lock().await.is_empty());

        let doc = store.load().unwrap();
        assert!(doc.record(&table).is_some());
        assert!(doc.record(&bucket).is_some());
    }

    #[tokio::test]
    async fn test_hung_backend_times_out_after_retries() {
        let dir = TempDir::new().unwrap();
        let store = StateStore::new(dir.path());
        let id = NodeId::new("storage", "bucket");
        let graph = graph_of(vec![node(
            id.clone(),
            &[("name", serde_json::json!("assets"))],
        )]);
        let plan = build_plan(&graph, &StateDocument::default()).unwrap();

        let config = ExecutorConfig {
            node_timeout: Duration::from_millis(20),
            ..fast_config()
        };
        let backend = Arc::new(FakeBackend::hanging(id.clone()));
        let executor = Executor::new(backend, store.clone()).with_config(config);
        let report = executor.run(&plan, &graph).await.unwrap();

        assert_eq!(report.failed.len(), 1);
        assert_eq!(report.failed[0].0, id.clone());
        assert!(report.failed[0].1.contains("Timeout"));
        assert!(store.load().unwrap().record(&id).is_none());
    }

    #[tokio::test]
    async fn test_delete_without_record_is_not_counted() {
        let dir = TempDir::new().unwrap();
        let store = StateStore::new(dir.path());
        let plan = Plan {
            actions: Vec::new(),
            delete_batches: vec![vec![NodeId::new("storage", "bucket")]],
            apply_batches: Vec::new(),
        };
        let empty = ResourceGraph {
            nodes: BTreeMap::new(),
        };

        let executor =
            Executor::new(Arc::new(FakeBackend::new()), store).with_config(fast_config());
        let report = executor.run(&plan, &empty).await.unwrap();

        assert!(report.is_clean());
        assert!(report.succeeded.is_empty());
    }

    #[tokio::test]
    async fn test_cancellation_stops_between_batches() {
        let dir = TempDir::new().unwrap();
        let store = StateStore::new(dir.path());
        let graph = graph_of(vec![node(
            NodeId::new("storage", "bucket"),
            &[("name", serde_json::json!("assets"))],
        )]);
        let plan = build_plan(&graph, &StateDocument::default()).unwrap();

        let cancel = CancellationToken::new();
        cancel.cancel();
        let executor = Executor::new(Arc::new(FakeBackend::new()), store)
            .with_config(fast_config())
            .with_cancellation(cancel);
        let report = executor.run(&plan, &graph).await.unwrap();

        assert!(report.cancelled);
        assert!(report.succeeded.is_empty());
    }

    #[tokio::test]
    async fn test_rerun_after_apply_is_noop() {
        let dir = TempDir::new().unwrap();
        let store = StateStore::new(dir.path());
        let graph = graph_of(vec![node(
            NodeId::new("storage", "bucket"),
            &[("name", serde_json::json!("assets"))],
        )]);
        let plan = build_plan(&graph, &StateDocument::default()).unwrap();

        let executor =
            Executor::new(Arc::new(FakeBackend::new()), store.clone()).with_config(fast_config());
        executor.run(&plan, &graph).await.unwrap();

        let replan = build_plan(&graph, &store.load().unwrap()).unwrap();
        assert!(!replan.has_changes());
    }
}
