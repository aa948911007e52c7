//! Terminal rendering of events, runs and evaluator state.

use af_protocol::evaluator_models::{EvaluatorRunState, EvaluatorStatus};
use af_protocol::history_models::HistoryItem;
use af_protocol::ipc::Event;
use af_protocol::pipeline_models::{PipelineRun, RunStatus, Stage, StageState};
use colored::{ColoredString, Colorize};
use tokio::sync::mpsc::UnboundedReceiver;
use tokio::task::JoinHandle;

/// Print every event until all senders are gone.
pub fn spawn_printer(mut rx: UnboundedReceiver<Event>) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(event) = rx.recv().await {
            if let Some(line) = event_line(&event) {
                println!("{line}");
            }
        }
    })
}

/// One line for an event, or `None` for events that are only logged.
pub fn event_line(event: &Event) -> Option<String> {
    let line = match event {
        Event::RunStarted { attempt, .. } => {
            format!("{} attempt {attempt}", "▶".cyan())
        }
        Event::StageStarted { stage, .. } => format!("  {} {stage}...", "•".dimmed()),
        Event::StageCompleted {
            stage, duration_ms, ..
        } => format!("  {} {stage} ({duration_ms} ms)", "✓".green()),
        Event::StageFailed { stage, error, .. } => {
            format!("  {} {stage}: {error}", "✗".red())
        }
        Event::StageCancelled { stage, .. } => format!("  {} {stage} cancelled", "■".yellow()),
        Event::CheckpointReached { .. } => format!("{} checkpoint reached", "⏸".yellow()),
        Event::RunCompleted { valid, .. } => match valid {
            Some(true) => format!("{}", "Run completed: output is valid".green().bold()),
            Some(false) => format!("{}", "Run completed: validation failed".yellow().bold()),
            None => format!("{}", "Run completed".green().bold()),
        },
        Event::RunFailed { error, .. } => format!("{} {error}", "Run failed:".red().bold()),
        Event::RunCancelled { reason, .. } => {
            format!("{} {reason}", "Run cancelled:".yellow().bold())
        }
        Event::EvaluatorStarted {
            run_id,
            evaluator_kind,
        } => format!("{} {evaluator_kind} run {run_id}", "▶".cyan()),
        Event::PollTick {
            cursor, items_seen, ..
        } => format!(
            "  {} cursor {cursor}, {items_seen} item(s)",
            "↻".dimmed()
        ),
        Event::EvaluatorStatusChanged { status, notify, .. } => {
            if !notify {
                return None;
            }
            format!("{} {}", "Evaluator".bold(), evaluator_status(*status))
        }
        Event::EvaluatorResumed { run_id } => {
            format!("{} resumed polling run {run_id}", "↻".cyan())
        }
        Event::ProtocolViolation { detail } => {
            format!("{} {detail}", "protocol violation:".red())
        }
        Event::RegistryMirrorFailed { model_id, error } => format!(
            "{} {model_id} was saved locally but not on the service: {error}",
            "warning:".yellow()
        ),
        Event::HistoryRecorded { .. } => return None,
    };
    Some(line)
}

pub fn run_status(status: RunStatus) -> ColoredString {
    match status {
        RunStatus::Running => "running".cyan(),
        RunStatus::PausedAtCheckpoint => "paused at checkpoint".yellow(),
        RunStatus::Completed => "completed".green(),
        RunStatus::Failed => "failed".red(),
        RunStatus::Cancelled => "cancelled".yellow(),
    }
}

pub fn evaluator_status(status: EvaluatorStatus) -> ColoredString {
    match status {
        EvaluatorStatus::Idle => "idle".dimmed(),
        EvaluatorStatus::Running => "running".cyan(),
        EvaluatorStatus::Suspended => "suspended".yellow(),
        EvaluatorStatus::Cancelled => "cancelled".yellow(),
        EvaluatorStatus::Completed => "completed".green(),
        EvaluatorStatus::Failed => "failed".red(),
    }
}

fn stage_marker(state: StageState) -> ColoredString {
    match state {
        StageState::Idle => "·".dimmed(),
        StageState::Processing => "…".cyan(),
        StageState::Completed => "✓".green(),
        StageState::Error => "✗".red(),
        StageState::Cancelled => "■".yellow(),
    }
}

/// Stage strip such as `✓ parser  ✓ reasoner  · generator  · validator`.
pub fn stage_strip(run: &PipelineRun) -> String {
    Stage::ALL
        .iter()
        .map(|stage| format!("{} {stage}", stage_marker(run.stage_states.get(*stage))))
        .collect::<Vec<_>>()
        .join("  ")
}

/// Truncate `text` to `max` characters for single-line listings.
pub fn excerpt(text: &str, max: usize) -> String {
    let single_line = text.split_whitespace().collect::<Vec<_>>().join(" ");
    if single_line.chars().count() <= max {
        return single_line;
    }
    let cut: String = single_line.chars().take(max.saturating_sub(1)).collect();
    format!("{cut}…")
}

pub fn print_run(run: &PipelineRun) {
    println!(
        "{} {}  attempt {}  {}",
        "Run".bold(),
        run.id,
        run.attempt_number,
        run_status(run.status)
    );
    println!("  {}", stage_strip(run));
    if let Some(error) = &run.error {
        println!("  {} {error}", "error:".red());
    }

    for stage in Stage::ALL {
        let Some(output) = run.stage_outputs.get(stage) else {
            continue;
        };
        let duration = run
            .metrics
            .get(&stage)
            .map(|ms| format!(" ({ms} ms)"))
            .unwrap_or_default();
        println!("\n{}{}", stage.to_string().bold(), duration.dimmed());
        println!("{}", pretty(output));
    }
}

pub fn print_history_row(index: usize, item: &HistoryItem) {
    println!(
        "{:>3}  {}  {:<22}  attempt {}  {}",
        index,
        item.recorded_at.format("%Y-%m-%d %H:%M:%S"),
        run_status(item.status()).to_string(),
        item.run.attempt_number,
        excerpt(&item.run.input_text, 48)
    );
}

pub fn print_evaluator_run(run: &EvaluatorRunState) {
    println!(
        "{} {} ({})  {}",
        "Evaluator run".bold(),
        run.run_id,
        run.evaluator_kind,
        evaluator_status(run.status)
    );
    println!(
        "  cursor {}  items {}/{}  model {}",
        run.cursor,
        run.progress.items.len(),
        run.item_limit,
        run.model.as_deref().unwrap_or("service default")
    );
    let tokens = run.progress.tokens;
    println!(
        "  tokens {} prompt / {} completion / {} total",
        tokens.prompt_tokens, tokens.completion_tokens, tokens.total_tokens
    );
    if run.auto_suspended {
        println!("  {}", "suspended automatically when the last session ended".dimmed());
    }
    if let Some(error) = &run.error {
        println!("  {} {error}", "error:".red());
    }

    for (index, item) in &run.progress.items {
        let stages = item
            .stage_statuses
            .iter()
            .map(|(stage, status)| format!("{stage}={status}"))
            .collect::<Vec<_>>()
            .join(" ");
        let record = if item.record_available { " [record]" } else { "" };
        println!("  #{index:<4} {stages}{}", record.dimmed());
    }

    if let Some(table) = &run.metrics_table {
        println!("\n{}", "Metrics".bold());
        println!("{}", pretty(table));
    }
}

pub fn pretty(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::String(text) => text.clone(),
        other => serde_json::to_string_pretty(other).unwrap_or_else(|_| other.to_string()),
    }
}
