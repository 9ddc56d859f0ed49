//! Orchestra CLI - pipeline orchestrator for agent workflows
//!
//! Main entry point for the `orchestra` command-line tool.

use clap::{Parser, Subcommand};

mod commands;
mod secrets;

#[derive(Parser)]
#[command(name = "orchestra")]
#[command(about = "Orchestra - durable agent pipeline orchestrator", long_about = None)]
#[command(version = env!("CARGO_PKG_VERSION"))]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Parse and validate a DOT pipeline file
    Compile {
        /// Path to the .dot pipeline
        pipeline: std::path::PathBuf,
    },

    /// Execute a DOT pipeline in a fresh session
    Run {
        /// Path to the .dot pipeline
        pipeline: std::path::PathBuf,
    },

    /// Resume a paused session from its latest checkpoint
    Resume {
        /// Session display id or context id
        session_id: String,
    },

    /// Fork a session at a prior turn or checkpoint and continue there
    Replay {
        /// Session display id or context id
        session_id: String,
        /// Agent turn id to replay from
        #[arg(long, conflicts_with = "checkpoint")]
        turn: Option<String>,
        /// Checkpoint turn id to replay from
        #[arg(long)]
        checkpoint: Option<String>,
    },

    /// List sessions with derived status
    Status,

    /// Remove stale session branches and orphaned worktrees
    Cleanup {
        /// Remove branches older than N days
        #[arg(long, default_value_t = 7)]
        older_than: i64,
    },

    /// Verify context-store connectivity
    Doctor,
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let result = match cli.command {
        Commands::Compile { pipeline } => commands::compile::compile(&pipeline),
        Commands::Run { pipeline } => commands::run::run(&pipeline),
        Commands::Resume { session_id } => commands::resume::resume(&session_id),
        Commands::Replay { session_id, turn, checkpoint } => {
            commands::replay::replay(&session_id, turn.as_deref(), checkpoint.as_deref())
        }
        Commands::Status => commands::status::status(),
        Commands::Cleanup { older_than } => commands::cleanup::cleanup(older_than),
        Commands::Doctor => commands::doctor::doctor(),
    };

    if let Err(e) = result {
        eprintln!("Error: {}", secrets::redact(&format!("{e:#}")));
        std::process::exit(1);
    }
}
