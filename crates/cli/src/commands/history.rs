//! `agentflow history`

use clap::Subcommand;
use colored::Colorize;

use crate::app::App;
use crate::render;

#[derive(Subcommand, Default)]
pub enum HistoryCommand {
    /// List recorded runs, newest first
    #[default]
    List,

    /// Show the full snapshot of one recorded run
    Show {
        /// Position in the listing, starting at 1
        index: usize,
    },

    /// Delete all recorded runs
    Clear,
}

pub fn execute(app: &App, command: HistoryCommand) -> color_eyre::Result<()> {
    let mut history = app.history()?;

    match command {
        HistoryCommand::List => {
            if history.is_empty() {
                println!("No runs recorded yet.");
                return Ok(());
            }
            for (i, item) in history.items().iter().enumerate() {
                render::print_history_row(i + 1, item);
            }
        }
        HistoryCommand::Show { index } => {
            let item = index
                .checked_sub(1)
                .and_then(|i| history.items().get(i))
                .ok_or_else(|| {
                    color_eyre::eyre::eyre!(
                        "no history entry {index}; {} recorded",
                        history.len()
                    )
                })?;
            println!(
                "{} {}",
                "Recorded".dimmed(),
                item.recorded_at.format("%Y-%m-%d %H:%M:%S")
            );
            println!("{} {}\n", "Input:".bold(), item.run.input_text);
            render::print_run(&item.run);
        }
        HistoryCommand::Clear => {
            let removed = history.len();
            history.clear()?;
            println!("Removed {removed} history entr{}.", if removed == 1 { "y" } else { "ies" });
        }
    }
    Ok(())
}
