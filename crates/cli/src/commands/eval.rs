//! `agentflow eval`
//!
//! Each invocation opens the persisted evaluator dashboard. Only `watch`,
//! `resume` and a following `start` poll the run. Leaving such a session
//! while the run is still being polled suspends it on the service and the
//! next following session resumes it. The other commands leave the run as
//! they found it.

use std::sync::Arc;

use af_core::evaluator::{EvaluatorError, EvaluatorPoller};
use af_protocol::evaluator_models::EvaluatorStatus;
use clap::Subcommand;
use color_eyre::eyre::eyre;
use colored::Colorize;
use tokio::sync::mpsc;

use crate::app::App;
use crate::render;

#[derive(Subcommand)]
pub enum EvalCommand {
    /// Start a batch run and follow it
    Start {
        /// Evaluator kind to run (defaults to the last one used)
        evaluator: Option<String>,

        /// Number of items to evaluate
        #[arg(long, short = 'n')]
        limit: Option<u32>,

        /// Model for the run (defaults to the selected model)
        #[arg(long, short = 'm')]
        model: Option<String>,

        /// Return right after starting and leave the run going on the service
        #[arg(long)]
        detach: bool,
    },

    /// Follow the current run until it settles; Ctrl-C suspends it
    Watch,

    /// Show the last known state without polling
    Status,

    /// Pause the current run on the service
    Suspend,

    /// Resume a suspended run and follow it
    Resume,

    /// Stop the current run
    Stop,

    /// Print the full record of one processed item
    Record { index: u32 },

    /// Forget the last finished run
    Clear,
}

impl EvalCommand {
    /// Whether the command picks polling back up from storage.
    fn follows_run(&self) -> bool {
        matches!(self, EvalCommand::Watch | EvalCommand::Resume)
    }
}

/// How to leave the dashboard once a command is done.
#[derive(Debug)]
enum Leave {
    /// Suspend a run this session was still polling.
    Close,
    /// Stop polling but keep the run going on the service.
    Detach,
}

pub async fn execute(app: &App, command: EvalCommand) -> color_eyre::Result<()> {
    let (events_tx, events_rx) = mpsc::unbounded_channel();
    let printer = render::spawn_printer(events_rx);
    let service = Arc::clone(&app.service);
    let store = Arc::clone(&app.store);
    let interval = app.config.evaluator.poll_interval();
    let poller = if command.follows_run() {
        EvaluatorPoller::open(service, store, interval, events_tx).await?
    } else {
        EvaluatorPoller::open_passive(service, store, interval, events_tx)?
    };

    let result = dispatch(app, &poller, command).await;

    // Either way the event channel closes once the poller is gone.
    match &result {
        Ok(Leave::Detach) => poller.detach(),
        _ => poller.close().await,
    }
    let _ = printer.await;
    result.map(|_| ())
}

async fn dispatch(app: &App, poller: &EvaluatorPoller, command: EvalCommand) -> color_eyre::Result<Leave> {
    match command {
        EvalCommand::Start {
            evaluator,
            limit,
            model,
            detach,
        } => {
            let dashboard = poller.dashboard().await;
            let evaluator = evaluator
                .or(dashboard.selected_evaluator)
                .ok_or(EvaluatorError::NoEvaluatorSelected)?;
            let limit = limit
                .or_else(|| dashboard.item_limits.get(&evaluator).copied())
                .unwrap_or(app.config.evaluator.default_item_limit);

            let registry = app.registry().await?;
            let model = match model {
                Some(model) => Some(model),
                None => registry.selected_default(app.store.as_ref())?,
            };
            let config = model.as_deref().map(|m| registry.model_config(m));

            let run = poller.start(&evaluator, limit, config.as_ref()).await?;
            if detach {
                println!("Started run {}. Follow it with `agentflow eval watch`.", run.run_id);
                return Ok(Leave::Detach);
            }
            watch(poller).await
        }
        EvalCommand::Watch => {
            if poller.run_state().await.is_none() {
                println!("No evaluator run recorded.");
                return Ok(Leave::Close);
            }
            watch(poller).await
        }
        EvalCommand::Status => {
            match poller.run_state().await {
                Some(run) => render::print_evaluator_run(&run),
                None => println!("No evaluator run recorded."),
            }
            Ok(Leave::Close)
        }
        EvalCommand::Suspend => {
            if poller.suspend(false).await? {
                println!("Run suspended. Resume with `agentflow eval resume`.");
            } else {
                println!("No running evaluator run to suspend.");
            }
            Ok(Leave::Close)
        }
        EvalCommand::Resume => {
            // Opening the dashboard already resumed an automatically suspended run.
            if !poller.take_resumed() {
                poller.resume().await?;
            }
            watch(poller).await
        }
        EvalCommand::Stop => {
            poller.stop().await?;
            Ok(Leave::Close)
        }
        EvalCommand::Record { index } => {
            let record = poller.view_record(index).await?;
            println!("{}", render::pretty(&record));
            Ok(Leave::Close)
        }
        EvalCommand::Clear => {
            match poller.clear().await? {
                Some(run) => println!("Cleared run {}.", run.run_id),
                None => println!("No evaluator run recorded."),
            }
            Ok(Leave::Close)
        }
    }
}

/// Wait for the polling timer to settle the run, or suspend it on Ctrl-C.
async fn watch(poller: &EvaluatorPoller) -> color_eyre::Result<Leave> {
    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    while poller.is_polling() {
        tokio::select! {
            signal = &mut ctrl_c => {
                signal?;
                tracing::info!("interrupt received, suspending evaluator run");
                poller.suspend(true).await?;
                println!(
                    "\n{}",
                    "Run suspended. Resume with `agentflow eval resume`.".yellow()
                );
                break;
            }
            _ = tokio::time::sleep(std::time::Duration::from_millis(200)) => {}
        }
    }

    let run = poller
        .run_state()
        .await
        .ok_or_else(|| eyre!("the evaluator run disappeared while watching"))?;
    println!();
    render::print_evaluator_run(&run);
    if run.status == EvaluatorStatus::Failed {
        return Err(eyre!(
            "evaluator run {} failed: {}",
            run.run_id,
            run.error.as_deref().unwrap_or("no detail")
        ));
    }
    Ok(Leave::Close)
}
