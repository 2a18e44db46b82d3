mod commands;

use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "stack")]
#[command(version)]
#[command(about = "Declare a serverless stack once, converge it every run", long_about = None)]
struct Cli {
    /// Verbose output (debug-level logs)
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

/// Variable inputs shared by commands that read the stack document
#[derive(Args, Clone)]
struct StackArgs {
    /// Set a variable (NAME=VALUE, repeatable)
    #[arg(long = "var", value_name = "NAME=VALUE")]
    vars: Vec<String>,

    /// Values file (defaults to stack.values.kdl next to stack.kdl)
    #[arg(long, value_name = "FILE")]
    values: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Show what an apply would change
    Plan {
        #[command(flatten)]
        stack: StackArgs,
    },
    /// Converge real resources to the declared stack
    Apply {
        #[command(flatten)]
        stack: StackArgs,
        /// Skip the confirmation prompt
        #[arg(short, long)]
        yes: bool,
    },
    /// Tear down everything recorded in state
    Destroy {
        /// Skip the confirmation prompt
        #[arg(short, long)]
        yes: bool,
    },
    /// Print stack outputs from the last apply
    Output {
        /// Output name (all outputs when omitted)
        name: Option<String>,
        /// Print as JSON
        #[arg(long)]
        json: bool,

        #[command(flatten)]
        stack: StackArgs,
    },
    /// Check the stack document without touching state
    Validate {
        #[command(flatten)]
        stack: StackArgs,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    if cli.verbose {
        tracing_subscriber::fmt()
            .with_env_filter(
                tracing_subscriber::EnvFilter::from_default_env()
                    .add_directive(tracing::Level::DEBUG.into()),
            )
            .init();
    } else {
        tracing_subscriber::fmt::init();
    }

    let cancel = tokio_util::sync::CancellationToken::new();
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                eprintln!("\ninterrupted, finishing the current batch...");
                cancel.cancel();
            }
        });
    }

    let code = match cli.command {
        Commands::Plan { stack } => commands::plan::handle(&stack).await?,
        Commands::Apply { stack, yes } => commands::apply::handle(&stack, yes, cancel).await?,
        Commands::Destroy { yes } => commands::destroy::handle(yes, cancel).await?,
        Commands::Output { name, json, stack } => {
            commands::output::handle(name.as_deref(), json, &stack).await?
        }
        Commands::Validate { stack } => commands::validate::handle(&stack).await?,
    };

    if code != 0 {
        std::process::exit(code);
    }
    Ok(())
}
