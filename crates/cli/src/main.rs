//! Taskloom CLI: the main entry point.
//!
//! Commands:
//! - `agent`: Run a task through the ReAct tool loop
//! - `plan`: Plan a task, execute each step, synthesize an answer
//! - `workflow`: Run or validate a workflow definition file
//! - `tools`: List the built-in tools
//! - `actions`: List the built-in workflow actions
//! - `config`: Show the effective configuration

use std::path::PathBuf;

use clap::{Parser, Subcommand};

mod commands;

#[derive(Parser)]
#[command(
    name = "taskloom",
    about = "Taskloom: tool-using agents, plan-and-execute, and workflow orchestration",
    version,
    author
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Answer a task with the reason-then-act tool loop
    Agent {
        /// The task to solve
        task: String,

        /// Extra context placed before the task
        #[arg(short, long)]
        context: Option<String>,

        /// Override the configured model
        #[arg(short, long)]
        model: Option<String>,

        /// Upper bound on model calls
        #[arg(long)]
        max_iterations: Option<u32>,

        /// Print progress events as they happen
        #[arg(short, long)]
        stream: bool,
    },

    /// Decompose a task into steps and execute them in order
    Plan {
        /// The task to solve
        task: String,

        /// Override the configured model
        #[arg(short, long)]
        model: Option<String>,

        /// How many times a failed step may trigger a new plan
        #[arg(long)]
        max_replans: Option<u32>,

        /// Print progress events as they happen
        #[arg(short, long)]
        stream: bool,
    },

    /// Run or validate workflow definitions
    Workflow {
        #[command(subcommand)]
        command: WorkflowCommands,
    },

    /// List built-in tools by category
    Tools,

    /// List built-in workflow actions
    Actions,

    /// Show the effective configuration (API key redacted)
    Config {
        /// Print the default configuration instead
        #[arg(long)]
        default: bool,
    },
}

#[derive(Subcommand)]
enum WorkflowCommands {
    /// Execute a workflow definition file (TOML or JSON)
    Run {
        file: PathBuf,

        /// Input payload as a JSON object
        #[arg(short, long)]
        payload: Option<String>,

        /// Start the run in the background and poll it; Ctrl-C cancels
        #[arg(short, long)]
        detach: bool,
    },

    /// Check a definition file without running it
    Validate { file: PathBuf },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // Initialize tracing
    let filter = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(filter)),
        )
        .with_target(false)
        .init();

    match cli.command {
        Commands::Agent {
            task,
            context,
            model,
            max_iterations,
            stream,
        } => commands::agent::run(task, context, model, max_iterations, stream).await?,
        Commands::Plan {
            task,
            model,
            max_replans,
            stream,
        } => commands::plan::run(task, model, max_replans, stream).await?,
        Commands::Workflow { command } => match command {
            WorkflowCommands::Run {
                file,
                payload,
                detach,
            } => commands::workflow::run(file, payload, detach).await?,
            WorkflowCommands::Validate { file } => commands::workflow::validate(file).await?,
        },
        Commands::Tools => commands::tools::run().await?,
        Commands::Actions => commands::actions::run().await?,
        Commands::Config { default } => commands::config_cmd::show(default).await?,
    }

    Ok(())
}
