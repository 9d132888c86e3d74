//! Fourtrack CLI
//!
//! Offline tools for saved sessions: bounce, inspect and pre-render.

use anyhow::{Context, Result};
use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;

use fourtrack::cli::{commands, Cli, Commands};
use fourtrack::model::RegionId;

fn main() -> Result<()> {
    let cli = Cli::parse();

    let default_level = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)))
        .with_writer(std::io::stderr)
        .init();

    info!("Fourtrack v{}", env!("CARGO_PKG_VERSION"));

    let config = commands::load_config(cli.config.as_deref()).context("loading engine configuration")?;

    match cli.command {
        Commands::Bounce {
            session,
            sources,
            out,
            name,
        } => {
            commands::bounce(&config, &session, &sources, &out, name.as_deref())
                .with_context(|| format!("bouncing {}", session.display()))?;
        }
        Commands::Inspect { session } => {
            commands::inspect(&session).with_context(|| format!("inspecting {}", session.display()))?;
        }
        Commands::Prerender {
            session,
            sources,
            track,
            region,
            out,
        } => {
            commands::prerender(&config, &session, &sources, track, RegionId(region), &out)
                .with_context(|| format!("pre-rendering region {}", region))?;
        }
    }
    Ok(())
}
