use colored::Colorize;
use stackflow_engine::graph::build_graph;
use stackflow_engine::plan::build_plan;
use stackflow_engine::state::StateStore;

/// Exit code 2 signals pending changes, 0 means converged
pub async fn handle(args: &crate::StackArgs) -> anyhow::Result<i32> {
    let loaded = super::load(args)?;
    let graph = build_graph(&loaded.instance)?;

    let store = StateStore::new(&loaded.root);
    let state = store.load()?;
    let plan = build_plan(&graph, &state)?;

    println!(
        "{} {} ({} resource(s))",
        "Stack:".bold(),
        loaded.config.name.cyan(),
        graph.len()
    );
    println!();
    super::print_plan(&plan);

    Ok(if plan.has_changes() { 2 } else { 0 })
}
