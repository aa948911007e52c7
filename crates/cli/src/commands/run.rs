//! `agentflow run`

use std::collections::BTreeMap;

use af_core::cancel::CANCELLED_BY_USER;
use af_core::engine::PipelineController;
use af_core::models::ModelRegistry;
use af_protocol::model_models::{ModelSelections, SelectionMode};
use af_protocol::pipeline_models::{PipelineRun, ProgressionMode, RunStatus};
use clap::Args;
use color_eyre::eyre::{eyre, WrapErr};
use colored::Colorize;
use tokio::sync::mpsc;

use crate::app::App;
use crate::{prompt, render};

#[derive(Args)]
pub struct RunArgs {
    /// Input text; read from stdin when omitted
    text: Option<String>,

    /// Model for every agent (defaults to the selected model)
    #[arg(long, short = 'm')]
    model: Option<String>,

    /// Per-agent model as `agent=model` (parser, reasoner, generator, validator)
    #[arg(long = "agent-model", value_parser = parse_agent_model)]
    agent_models: Vec<(String, String)>,

    /// Sampling temperature (defaults to `pipeline.default_temperature`)
    #[arg(long, short = 't')]
    temperature: Option<f64>,

    /// Run all four stages without pausing at the checkpoint
    #[arg(long, conflicts_with = "manual")]
    auto: bool,

    /// Pause after the reason stage
    #[arg(long)]
    manual: bool,

    /// Answer prompts automatically: continue at the checkpoint, never regenerate
    #[arg(long, short = 'y')]
    yes: bool,
}

fn parse_agent_model(value: &str) -> Result<(String, String), String> {
    let (agent, model) = value
        .split_once('=')
        .ok_or_else(|| format!("expected agent=model, got `{value}`"))?;
    let (agent, model) = (agent.trim(), model.trim());
    if agent.is_empty() || model.is_empty() {
        return Err(format!("expected agent=model, got `{value}`"));
    }
    Ok((agent.to_string(), model.to_string()))
}

impl RunArgs {
    fn progression_mode(&self, configured: ProgressionMode) -> ProgressionMode {
        if self.auto {
            ProgressionMode::Auto
        } else if self.manual {
            ProgressionMode::Manual
        } else {
            configured
        }
    }

    fn selections(&self, default_model: Option<String>) -> ModelSelections {
        let default_model = self.model.clone().or(default_model);
        if self.agent_models.is_empty() {
            return ModelSelections {
                mode: SelectionMode::Single,
                default_model,
                per_agent: BTreeMap::new(),
            };
        }
        ModelSelections {
            mode: SelectionMode::PerAgent,
            default_model,
            per_agent: self.agent_models.iter().cloned().collect(),
        }
    }
}

async fn read_input(text: Option<String>) -> color_eyre::Result<String> {
    if let Some(text) = text {
        return Ok(text);
    }
    let mut input = String::new();
    tokio::io::AsyncReadExt::read_to_string(&mut tokio::io::stdin(), &mut input)
        .await
        .wrap_err("failed to read input text from stdin")?;
    Ok(input)
}

pub async fn execute(app: &App, args: RunArgs) -> color_eyre::Result<()> {
    let input = read_input(args.text.clone()).await?;
    let registry = app.registry().await?;
    let selections = args.selections(registry.selected_default(app.store.as_ref())?);
    let mode = args.progression_mode(app.config.pipeline.progression_mode);
    let temperature = args
        .temperature
        .unwrap_or(app.config.pipeline.default_temperature);

    let (events_tx, events_rx) = mpsc::unbounded_channel();
    let printer = render::spawn_printer(events_rx);
    let mut controller = PipelineController::new(
        app.service.clone(),
        app.history()?,
        app.config.pipeline.max_attempts,
        events_tx,
    );

    let cancel = controller.cancel_handle();
    // First Ctrl-C cancels the run, a second one exits.
    let interrupt = tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_err() {
            return;
        }
        tracing::info!("interrupt received, cancelling run");
        cancel.cancel(CANCELLED_BY_USER);
        if tokio::signal::ctrl_c().await.is_ok() {
            std::process::exit(130);
        }
    });

    let result = drive(&mut controller, &input, &selections, temperature, mode, &registry, &args).await;

    interrupt.abort();
    drop(controller);
    let _ = printer.await;

    let run = result?;
    println!();
    render::print_run(&run);
    Ok(())
}

async fn drive(
    controller: &mut PipelineController,
    input: &str,
    selections: &ModelSelections,
    temperature: f64,
    mode: ProgressionMode,
    registry: &ModelRegistry,
    args: &RunArgs,
) -> color_eyre::Result<PipelineRun> {
    let mut run = controller
        .run(input, selections, temperature, mode, registry)
        .await?;

    loop {
        match run.status {
            RunStatus::PausedAtCheckpoint => {
                let proceed = args.yes || prompt::confirm("Continue to generate and validate?", true).await?;
                // A Ctrl-C while the prompt was open only marked the token.
                if let Some(cancelled) = controller.apply_pending_cancel()? {
                    return Ok(cancelled);
                }
                if !proceed {
                    println!(
                        "{}",
                        "Stopped at the checkpoint; the snapshot is kept in history.".dimmed()
                    );
                    return Ok(run);
                }
                run = controller.continue_after_checkpoint().await?;
            }
            RunStatus::Completed if run.validation_failure().is_some() => {
                if run.attempt_number >= controller.max_attempts() {
                    println!(
                        "{}",
                        format!(
                            "Validation failed after {} attempt(s); no attempts left.",
                            run.attempt_number
                        )
                        .yellow()
                    );
                    return Ok(run);
                }
                if args.yes || !prompt::confirm("Validation failed. Regenerate with feedback?", false).await? {
                    return Ok(run);
                }
                run = controller.regenerate().await?;
            }
            RunStatus::Running => {
                return Err(eyre!("run {} returned while still running", run.id));
            }
            _ => return Ok(run),
        }
    }
}
