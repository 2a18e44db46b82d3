pub mod apply;
pub mod destroy;
pub mod output;
pub mod plan;
pub mod validate;

use crate::StackArgs;
use colored::Colorize;
use stackflow_core::catalog::StackInstance;
use stackflow_core::loader::LoadOptions;
use stackflow_core::model::StackConfig;
use stackflow_core::variables::Variables;
use stackflow_engine::plan::{ActionType, Plan};
use std::collections::BTreeMap;
use std::io::Write;
use std::path::PathBuf;

/// Everything a command needs after loading the project
pub struct LoadedStack {
    pub root: PathBuf,
    pub config: StackConfig,
    pub instance: StackInstance,
    pub variables: Variables,
}

/// Locate the project root and load the stack with CLI variable inputs
pub fn load(args: &StackArgs) -> anyhow::Result<LoadedStack> {
    let root = stackflow_core::find_project_root()?;
    let options = LoadOptions {
        values_file: args.values.clone(),
        overrides: parse_overrides(&args.vars)?,
    };
    let (config, instance, variables) = stackflow_core::load_stack(&root, &options)?;
    Ok(LoadedStack {
        root,
        config,
        instance,
        variables,
    })
}

/// Parse repeated `--var NAME=VALUE` flags
pub fn parse_overrides(vars: &[String]) -> anyhow::Result<BTreeMap<String, String>> {
    let mut overrides = BTreeMap::new();
    for var in vars {
        let (name, value) = var.split_once('=').ok_or_else(|| {
            anyhow::anyhow!("invalid --var '{var}': expected NAME=VALUE")
        })?;
        overrides.insert(name.to_string(), value.to_string());
    }
    Ok(overrides)
}

/// Print the plan's actions and summary
pub fn print_plan(plan: &Plan) {
    for action in &plan.actions {
        let (symbol, line) = match action.action_type {
            ActionType::Create => ("+".green().bold(), format!("{}", action.node_id).green()),
            ActionType::Update => ("~".yellow().bold(), format!("{}", action.node_id).yellow()),
            ActionType::Replace => ("±".magenta().bold(), format!("{}", action.node_id).magenta()),
            ActionType::Delete => ("-".red().bold(), format!("{}", action.node_id).red()),
            ActionType::NoOp => continue,
        };
        match &action.detail {
            Some(detail) => println!("  {symbol} {line} ({})  [{detail}]", action.resource_type),
            None => println!("  {symbol} {line} ({})", action.resource_type),
        }
    }

    println!();
    if plan.has_changes() {
        println!("Plan: {}", plan.summary());
    } else {
        println!("{}", "No changes. Stack matches recorded state.".green());
    }
}

/// Ask for confirmation on the terminal; `--yes` skips this
pub fn confirm(prompt: &str) -> anyhow::Result<bool> {
    print!("{prompt} [y/N]: ");
    std::io::stdout().flush()?;
    let mut answer = String::new();
    std::io::stdin().read_line(&mut answer)?;
    Ok(matches!(answer.trim(), "y" | "Y" | "yes"))
}

/// Print the run outcome; returns the process exit code
pub fn print_report(report: &stackflow_engine::executor::RunReport) -> i32 {
    if !report.succeeded.is_empty() {
        println!(
            "{} {} change(s) in {}ms",
            "Completed".green().bold(),
            report.succeeded.len(),
            report.duration_ms
        );
    }
    for (id, error) in &report.failed {
        eprintln!("  {} {id}: {error}", "failed".red().bold());
    }
    for id in &report.blocked {
        eprintln!("  {} {id}: dependency failed", "blocked".yellow());
    }
    if report.cancelled {
        eprintln!("{}", "Run cancelled; state reflects completed work.".yellow());
    }
    if report.is_clean() {
        0
    } else {
        1
    }
}
