//! Contentflow CLI - run and inspect content workflows

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};

use contentflow_core::completion::client_from_settings;
use contentflow_core::config::EngineConfig;
use contentflow_core::workflow::{
    InMemoryWorkflowStore, WorkflowEngine, WorkflowStatus, WorkflowType,
};

#[derive(Parser)]
#[command(name = "contentflow")]
#[command(about = "Contentflow workflow engine CLI", long_about = None)]
#[command(version)]
struct Cli {
    /// Path to a configuration file (overrides contentflow.toml)
    #[arg(long, global = true, env = "CONTENTFLOW_CONFIG_PATH")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a workflow to completion and print the record
    Run {
        /// Workflow type (content_generation, strategy_generation,
        /// performance_analysis, engagement_optimization)
        #[arg(short = 't', long = "type")]
        workflow_type: String,

        /// Owner identifier
        #[arg(short, long)]
        owner: String,

        /// Subject (business/profile) identifier
        #[arg(short, long)]
        subject: String,

        /// Input payload as inline JSON
        #[arg(long, conflicts_with = "input_file")]
        input: Option<String>,

        /// Input payload from a JSON file
        #[arg(long)]
        input_file: Option<PathBuf>,
    },
    /// List workflow types and their pipeline stages
    Pipelines,
    /// Version information
    Version,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Version => {
            println!("contentflow {}", env!("CARGO_PKG_VERSION"));
            println!("contentflow-core {}", contentflow_core::VERSION);
        }
        Commands::Pipelines => {
            let config = load_config(cli.config.as_deref())?;
            let engine = build_engine(config)?;
            for workflow_type in WorkflowType::ALL {
                let stages = engine
                    .pipeline(workflow_type)
                    .map(|p| p.stage_names().join(" -> "))
                    .unwrap_or_default();
                println!("{}: {}", workflow_type, stages);
            }
        }
        Commands::Run {
            workflow_type,
            owner,
            subject,
            input,
            input_file,
        } => {
            let workflow_type: WorkflowType = workflow_type
                .parse()
                .context("Unknown workflow type")?;

            let input = match (input, input_file) {
                (Some(raw), _) => {
                    serde_json::from_str(&raw).context("Invalid inline input JSON")?
                }
                (None, Some(path)) => {
                    let raw = std::fs::read_to_string(&path)
                        .with_context(|| format!("Failed to read {}", path.display()))?;
                    serde_json::from_str(&raw).context("Invalid input file JSON")?
                }
                (None, None) => serde_json::Value::Object(Default::default()),
            };

            let config = load_config(cli.config.as_deref())?;
            let engine = build_engine(config)?;

            let record = engine
                .start_workflow(workflow_type, &owner, &subject, input)
                .await?;
            println!("{}", serde_json::to_string_pretty(&record)?);

            // Scripts need the outcome without parsing the record.
            let code = exit_code(record.status);
            if code != 0 {
                std::process::exit(code);
            }
        }
    }

    Ok(())
}

fn exit_code(status: WorkflowStatus) -> i32 {
    match status {
        WorkflowStatus::Completed => 0,
        WorkflowStatus::Failed => 1,
        WorkflowStatus::Cancelled => 2,
        WorkflowStatus::Pending | WorkflowStatus::InProgress => 3,
    }
}


fn load_config(path: Option<&std::path::Path>) -> Result<EngineConfig> {
    let config = match path {
        Some(path) => EngineConfig::from_file(path)?,
        None => EngineConfig::load()?,
    };
    Ok(config)
}

fn build_engine(config: EngineConfig) -> Result<WorkflowEngine> {
    let client = client_from_settings(&config.completion)?;
    let store = InMemoryWorkflowStore::shared();
    Ok(WorkflowEngine::new(config, store, client))
}
