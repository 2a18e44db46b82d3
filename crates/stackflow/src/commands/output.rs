use colored::Colorize;
use stackflow_engine::outputs::{resolve_output, resolve_outputs};
use stackflow_engine::state::StateStore;

pub async fn handle(name: Option<&str>, json: bool, args: &crate::StackArgs) -> anyhow::Result<i32> {
    let loaded = super::load(args)?;
    let store = StateStore::new(&loaded.root);
    let state = store.load()?;

    match name {
        Some(name) => {
            let Some(spec) = loaded.instance.outputs.iter().find(|o| o.name == name) else {
                eprintln!("{} output '{}' is not declared", "✗".red().bold(), name);
                return Ok(1);
            };
            let value = resolve_output(spec, &state)?;
            if json {
                println!("{}", serde_json::to_string_pretty(&value)?);
            } else {
                println!("{}", render(&value));
            }
        }
        None => {
            let outputs = resolve_outputs(&loaded.instance.outputs, &state)?;
            if json {
                println!("{}", serde_json::to_string_pretty(&outputs)?);
            } else {
                for (name, value) in &outputs {
                    println!("{} = {}", name.cyan(), render(value));
                }
            }
        }
    }
    Ok(0)
}

fn render(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}
