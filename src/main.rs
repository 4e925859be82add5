//! Slovo agent runtime entry point.
//!
//! `slovo serve` runs the HTTP API; `slovo console` opens an interactive
//! REPL against the same orchestrator. Both wire the memory stack, the
//! tool subsystem and the language-model providers from environment
//! configuration, degrading gracefully when a backing service is absent.

mod console;
mod runtime;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing::info;
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

use slovo_api::ApiServer;
use slovo_core::Settings;

#[derive(Parser)]
#[command(name = "slovo", about = "Slovo voice assistant agent runtime")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the HTTP API server.
    Serve,
    /// Run the interactive console.
    Console {
        /// Conversation id to use (default: random).
        #[arg(long)]
        conversation_id: Option<String>,
        /// Enable the memory stack (requires Redis/Qdrant/PostgreSQL).
        #[arg(long)]
        memory: bool,
        /// Enable the tool subsystem (requires PostgreSQL and Docker).
        #[arg(long)]
        tools: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let settings = Settings::from_env()?;

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(settings.log_level.clone()));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    info!(version = %settings.version, "Starting Slovo agent runtime");

    let cli = Cli::parse();
    match cli.command {
        Command::Serve => {
            let runtime = runtime::Runtime::build(&settings, true, true).await;
            let server = ApiServer::new(
                settings,
                runtime.orchestrator.clone(),
                runtime.memory.clone(),
            );
            server.start().await
        }
        Command::Console {
            conversation_id,
            memory,
            tools,
        } => {
            let runtime = runtime::Runtime::build(&settings, memory, tools).await;
            let conversation_id =
                conversation_id.unwrap_or_else(|| Uuid::new_v4().to_string());
            console::run_console(runtime, conversation_id).await
        }
    }
}
