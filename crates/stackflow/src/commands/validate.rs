use colored::Colorize;
use stackflow_engine::graph::build_graph;

pub async fn handle(args: &crate::StackArgs) -> anyhow::Result<i32> {
    println!("{}", "Validating stack document...".blue());

    let loaded = match super::load(args) {
        Ok(loaded) => loaded,
        Err(e) => {
            eprintln!();
            eprintln!("{}", "✗ Configuration error".red().bold());
            eprintln!("  {e}");
            return Ok(1);
        }
    };

    let graph = match build_graph(&loaded.instance) {
        Ok(graph) => graph,
        Err(e) => {
            eprintln!();
            eprintln!("{}", "✗ Graph error".red().bold());
            eprintln!("  {e}");
            return Ok(1);
        }
    };

    println!("{}", "✓ Stack document is valid".green().bold());
    println!();
    println!("Summary:");
    println!("  stack: {}", loaded.config.name.cyan());
    println!("  variables: {}", loaded.variables.len());
    println!("  groups: {}", loaded.instance.groups.len());
    println!("  resources: {}", graph.len());
    for (id, node) in &graph.nodes {
        let deps = if node.depends_on.is_empty() {
            String::new()
        } else {
            let names: Vec<String> = node.depends_on.iter().map(|d| d.to_string()).collect();
            format!("  <- {}", names.join(", "))
        };
        println!("    - {} ({}){}", id.to_string().cyan(), node.resource_type, deps);
    }
    println!("  outputs: {}", loaded.instance.outputs.len());

    Ok(0)
}
