use colored::Colorize;
use stackflow_backend_local::LocalBackend;
use stackflow_engine::executor::Executor;
use stackflow_engine::graph::build_graph;
use stackflow_engine::outputs::resolve_outputs;
use stackflow_engine::plan::build_plan;
use stackflow_engine::state::StateStore;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

pub async fn handle(
    args: &crate::StackArgs,
    yes: bool,
    cancel: CancellationToken,
) -> anyhow::Result<i32> {
    let loaded = super::load(args)?;
    let graph = build_graph(&loaded.instance)?;

    let store = StateStore::new(&loaded.root);
    let plan = build_plan(&graph, &store.load()?)?;

    println!("{} {}", "Stack:".bold(), loaded.config.name.cyan());
    println!();
    super::print_plan(&plan);

    if !plan.has_changes() {
        return Ok(0);
    }

    if !yes && !super::confirm("Apply these changes?")? {
        println!("Aborted.");
        return Ok(1);
    }
    println!();

    let backend = Arc::new(LocalBackend::new(&loaded.root));
    let executor = Executor::new(backend, store.clone()).with_cancellation(cancel);
    let report = executor.run(&plan, &graph).await?;
    let code = super::print_report(&report);

    if code == 0 && !loaded.instance.outputs.is_empty() {
        let state = store.load()?;
        let outputs = resolve_outputs(&loaded.instance.outputs, &state)?;
        println!();
        println!("{}", "Outputs:".bold());
        for (name, value) in &outputs {
            println!("  {} = {}", name.cyan(), render(value));
        }
    }

    Ok(code)
}

fn render(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}
