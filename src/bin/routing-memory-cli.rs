//! Command-line interface for inspecting the routing memory core directly,
//! without a running gateway process.

use anyhow::Result;
use clap::{Parser, Subcommand};
use routing_memory::config::MemoryConfig;
use routing_memory::domain_types::UserHash;
use routing_memory::memory::MemoryManager;
use routing_memory::time_provider::production_time_provider;

/// Inspect and maintain a routing-memory data directory.
#[derive(Parser)]
#[command(version = env!("CARGO_PKG_VERSION"))]
struct Args {
    /// Base directory containing the `memory/` tree.
    #[arg(long, default_value = "./data")]
    base_dir: std::path::PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Show routing history for a user (or everyone, with `--all`).
    History {
        /// The `sha256:...` hashed user identifier.
        #[arg(long)]
        user: Option<String>,
        /// Show history across every user instead of one.
        #[arg(long)]
        all: bool,
        /// Maximum number of entries to show, most recent first.
        #[arg(long, default_value_t = 20)]
        limit: usize,
    },
    /// Recompute and print the analytics summary.
    Analytics,
    /// List documented provider quirks.
    Quirks,
    /// Print aggregate store statistics.
    Stats,
}

#[tokio::main]
async fn main() -> Result<()> {
    routing_memory::observability::init_tracing()?;

    let args = Args::parse();
    let config = MemoryConfig { enabled: true, base_dir: args.base_dir, ..Default::default() };
    let mut manager = MemoryManager::new(config, production_time_provider()).await?;

    match args.command {
        Command::History { user, all, limit } => {
            let decisions = if all {
                manager.get_all_history(Some(limit)).await?
            } else {
                let user = user.ok_or_else(|| anyhow::anyhow!("--user is required unless --all is given"))?;
                let hash = UserHash::try_new(user)?;
                manager.get_history(&hash, Some(limit)).await?
            };
            for d in decisions {
                println!(
                    "{} {} -> {} ({}, {}ms){}",
                    d.timestamp.to_rfc3339(),
                    d.request.intent,
                    d.routing.selected_model,
                    if d.outcome.success { "ok" } else { "failed" },
                    d.outcome.response_time_ms,
                    d.outcome.error.as_ref().map(|e| format!(": {e}")).unwrap_or_default(),
                );
            }
        }
        Command::Analytics => {
            let summary = manager.compute_analytics().await?;
            match summary {
                Some(summary) => println!("{}", serde_json::to_string_pretty(&summary)?),
                None => println!("analytics disabled (memory manager not enabled)"),
            }
        }
        Command::Quirks => {
            for quirk in manager.get_all_quirks().await {
                println!("[{}] {}: {}", quirk.severity, quirk.provider, quirk.issue);
            }
        }
        Command::Stats => {
            let stats = manager.get_stats().await?;
            println!("{stats:#?}");
        }
    }

    manager.close().await?;
    Ok(())
}
