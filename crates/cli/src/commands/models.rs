//! `agentflow models`

use af_core::models::{Connectivity, MirrorOutcome};
use af_protocol::model_models::{CustomModel, ModelConnection, ProviderKind};
use clap::{Subcommand, ValueEnum};
use colored::Colorize;

use crate::app::App;

/// Backend family of a user-defined model.
#[derive(Clone, Copy, Debug, ValueEnum)]
pub enum ProviderArg {
    Openai,
    OpenaiCompatible,
    Anthropic,
    Ollama,
    Vllm,
}

impl From<ProviderArg> for ProviderKind {
    fn from(arg: ProviderArg) -> Self {
        match arg {
            ProviderArg::Openai => ProviderKind::Openai,
            ProviderArg::OpenaiCompatible => ProviderKind::OpenaiCompatible,
            ProviderArg::Anthropic => ProviderKind::Anthropic,
            ProviderArg::Ollama => ProviderKind::Ollama,
            ProviderArg::Vllm => ProviderKind::Vllm,
        }
    }
}

#[derive(Subcommand)]
pub enum ModelsCommand {
    /// List built-in providers and user-defined models
    List,

    /// Create or replace a user-defined model
    Add {
        /// Registry identifier used to select the model
        id: String,

        #[arg(long, value_enum)]
        provider: ProviderArg,

        /// Endpoint of the model server
        #[arg(long)]
        base_url: String,

        /// Model name as the server knows it
        #[arg(long)]
        model_id: String,

        #[arg(long)]
        display_name: Option<String>,

        #[arg(long, env = "AGENTFLOW_MODEL_API_KEY", hide_env_values = true)]
        api_key: Option<String>,

        #[arg(long)]
        context_length: Option<u32>,

        #[arg(long)]
        temperature_default: Option<f64>,
    },

    /// Delete a user-defined model
    Remove { id: String },

    /// Make a model the default for new runs
    Select { model: String },
}

pub async fn execute(app: &App, command: ModelsCommand) -> color_eyre::Result<()> {
    let mut registry = app.registry().await?;
    let store = app.store.as_ref();
    let sync = app.config.registry.sync;

    match command {
        ModelsCommand::List => {
            if let Connectivity::Unreachable(reason) = registry.connectivity() {
                println!(
                    "{} service unreachable ({reason}); showing local models only\n",
                    "offline:".yellow()
                );
            }
            let selected = registry.selected_default(store)?;

            for provider in &registry.catalog().providers {
                let availability = if provider.available {
                    String::new()
                } else {
                    format!(" {}", "(unavailable)".dimmed())
                };
                println!("{}{availability}", provider.name.bold());
                for model in &provider.models {
                    println!("  {}", mark_selected(model, selected.as_deref()));
                }
            }

            println!("{}", "custom".bold());
            if registry.custom_models().is_empty() {
                println!("  {}", "none".dimmed());
            }
            for model in registry.custom_models() {
                let name = if model.display_name.is_empty() {
                    String::new()
                } else {
                    format!(" \"{}\"", model.display_name)
                };
                println!(
                    "  {}{name}  {} {} @ {}",
                    mark_selected(&model.id, selected.as_deref()),
                    serde_json::to_string(&model.connection.provider_type)?.trim_matches('"'),
                    model.connection.model_id,
                    model.connection.base_url
                );
            }
        }
        ModelsCommand::Add {
            id,
            provider,
            base_url,
            model_id,
            display_name,
            api_key,
            context_length,
            temperature_default,
        } => {
            let model = CustomModel {
                id: id.clone(),
                display_name: display_name.unwrap_or_default(),
                connection: ModelConnection {
                    provider_type: provider.into(),
                    base_url,
                    model_id,
                    api_key,
                    context_length,
                    temperature_default,
                },
                updated_at: None,
            };
            let outcome = registry
                .upsert_custom_model(model, store, app.service.as_ref(), sync, None)
                .await?;
            report("Saved", &id, &outcome);
        }
        ModelsCommand::Remove { id } => {
            let outcome = registry
                .remove_custom_model(&id, store, app.service.as_ref(), sync, None)
                .await?;
            report("Removed", &id, &outcome);
        }
        ModelsCommand::Select { model } => {
            let known = registry.catalog().contains(&model) || registry.find_custom(&model).is_some();
            if !known && registry.is_online() {
                println!(
                    "{} {model} is not in the catalog or the registry",
                    "warning:".yellow()
                );
            }
            registry.select_default(store, &model)?;
            println!("Default model set to {}", model.bold());
        }
    }
    Ok(())
}

fn mark_selected(model: &str, selected: Option<&str>) -> String {
    if selected == Some(model) {
        format!("{} {}", model.green(), "(default)".dimmed())
    } else {
        model.to_string()
    }
}

fn report(action: &str, id: &str, outcome: &MirrorOutcome) {
    match outcome {
        MirrorOutcome::Mirrored => println!("{action} {id}"),
        MirrorOutcome::Skipped => println!("{action} {id} {}", "(local only)".dimmed()),
        MirrorOutcome::Failed(e) => println!(
            "{action} {id} locally; {} {e}",
            "service update failed:".yellow()
        ),
    }
}
