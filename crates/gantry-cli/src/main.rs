//! Gantry CLI tool.

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

mod commands;
mod manifest;

#[derive(Parser)]
#[command(name = "gantry")]
#[command(about = "Gantry build runner CLI", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run one build of the manifest's project and wait for it
    Run {
        /// Path to the project manifest
        #[arg(long, env = "GANTRY_MANIFEST", default_value = "gantry.kdl")]
        manifest: String,

        /// Branch to build
        #[arg(long, default_value = "main")]
        branch: String,

        /// Exact commit to build instead of the branch head
        #[arg(long)]
        revision: Option<String>,

        /// Title for the build record
        #[arg(long)]
        title: Option<String>,

        /// Author recorded on the build
        #[arg(long, env = "GANTRY_AUTHOR", default_value = "local")]
        author: String,

        /// Label attached to the build; repeat for several
        #[arg(long = "tag")]
        tags: Vec<String>,

        /// Per-build time budget in seconds
        #[arg(long)]
        timeout_secs: Option<u64>,

        /// Print the finished build record as JSON
        #[arg(long)]
        json: bool,
    },
    /// Validate a project manifest
    Validate {
        /// Path to the manifest file
        #[arg(default_value = "gantry.kdl")]
        path: String,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("gantry=info")),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Run {
            manifest,
            branch,
            revision,
            title,
            author,
            tags,
            timeout_secs,
            json,
        } => {
            commands::run(commands::RunOptions {
                manifest,
                branch,
                revision,
                title,
                author,
                tags,
                timeout_secs,
                json,
            })
            .await?;
        }
        Commands::Validate { path } => {
            commands::validate(&path)?;
        }
    }

    Ok(())
}
