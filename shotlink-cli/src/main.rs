//! Shotlink — tracker ↔ pipeline hierarchy sync CLI.
//!
//! # Usage
//!
//! ```text
//! shotlink sync <project-code> [--from tracking|pipeline] [--state DIR] [--config FILE] [--json]
//! shotlink event <project-code> --event-type Shotgun_Shot_Change --id N [--field NAME]
//!                [--state DIR] [--config FILE]
//! shotlink pipeline-event <project-code> --topic entity.folder.renamed --id PIPELINE_ID
//!                [--tracking-type TYPE --tracking-id N] [--state DIR] [--config FILE]
//! ```
//!
//! All commands operate on YAML snapshots of the two backends, by default
//! under `~/.shotlink/projects/<project-code>/`.

mod commands;

use anyhow::Result;
use clap::{Parser, Subcommand};

use commands::{event::EventArgs, pipeline_event::PipelineEventArgs, sync::SyncArgs};

// ---------------------------------------------------------------------------
// CLI entry point
// ---------------------------------------------------------------------------

#[derive(Parser, Debug)]
#[command(
    name = "shotlink",
    version,
    about = "Keep a pipeline hierarchy and a production tracker in sync",
    long_about = None,
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Match a whole project from one side into the other.
    Sync(SyncArgs),

    /// Replay a single tracking change event.
    Event(EventArgs),

    /// Replay a single pipeline change event into tracking.
    PipelineEvent(PipelineEventArgs),
}

// ---------------------------------------------------------------------------
// Main
// ---------------------------------------------------------------------------

fn main() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();
    match cli.command {
        Commands::Sync(args) => args.run(),
        Commands::Event(args) => args.run(),
        Commands::PipelineEvent(args) => args.run(),
    }
}

/// Logs go to stderr; `RUST_LOG` overrides the default `info` level.
fn init_tracing() {
    use tracing_subscriber::{fmt, EnvFilter};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .try_init();
}
