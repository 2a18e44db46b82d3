use colored::Colorize;
use stackflow_backend_local::LocalBackend;
use stackflow_engine::executor::Executor;
use stackflow_engine::graph::ResourceGraph;
use stackflow_engine::plan::build_destroy_plan;
use stackflow_engine::state::StateStore;
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

pub async fn handle(yes: bool, cancel: CancellationToken) -> anyhow::Result<i32> {
    let root = stackflow_core::find_project_root()?;
    let store = StateStore::new(&root);
    let state = store.load()?;

    if state.resources.is_empty() {
        println!("{}", "Nothing to destroy.".green());
        return Ok(0);
    }

    let plan = build_destroy_plan(&state)?;
    super::print_plan(&plan);

    if !yes && !super::confirm("Destroy all of the above?")? {
        println!("Aborted.");
        return Ok(1);
    }
    println!();

    let backend = Arc::new(LocalBackend::new(&root));
    let executor = Executor::new(backend, store).with_cancellation(cancel);
    let empty = ResourceGraph {
        nodes: BTreeMap::new(),
    };
    let report = executor.run(&plan, &empty).await?;
    Ok(super::print_report(&report))
}
