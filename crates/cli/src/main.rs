//! agentflow command-line client.
//!
//! Drives the pipeline controller, the model registry and the evaluator
//! poller against a remote agent service. Lifecycle events are printed as
//! they arrive; diagnostics go to stderr through `tracing`.

mod app;
mod commands;
mod prompt;
mod render;

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use crate::app::App;
use crate::commands::eval::EvalCommand;
use crate::commands::history::HistoryCommand;
use crate::commands::models::ModelsCommand;
use crate::commands::run::RunArgs;

#[derive(Parser)]
#[command(name = "agentflow")]
#[command(version, about = "Client-side orchestration for the agent pipeline service")]
struct Cli {
    /// Project root holding the `.agentflow/` directory
    #[arg(long, global = true, default_value = ".")]
    root: PathBuf,

    /// Override `service.base_url` from the config file
    #[arg(long, global = true, env = "AGENTFLOW_BASE_URL")]
    base_url: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Send a text through parse, reason, generate and validate
    Run(RunArgs),

    /// Show recorded pipeline runs
    History {
        #[command(subcommand)]
        command: Option<HistoryCommand>,
    },

    /// Inspect and edit the model registry
    Models {
        #[command(subcommand)]
        command: ModelsCommand,
    },

    /// Start and follow batch evaluator runs
    Eval {
        #[command(subcommand)]
        command: EvalCommand,
    },
}

fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

#[tokio::main]
async fn main() -> color_eyre::Result<()> {
    color_eyre::install()?;
    init_tracing();

    let cli = Cli::parse();
    let app = App::load(&cli.root, cli.base_url).await?;

    match cli.command {
        Commands::Run(args) => commands::run::execute(&app, args).await,
        Commands::History { command } => {
            commands::history::execute(&app, command.unwrap_or_default())
        }
        Commands::Models { command } => commands::models::execute(&app, command).await,
        Commands::Eval { command } => commands::eval::execute(&app, command).await,
    }
}
