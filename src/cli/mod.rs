//! CLI Module
//!
//! Command-line interface for offline work on saved sessions.

pub mod commands;

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use uuid::Uuid;

/// Fourtrack - four-track recorder tools
#[derive(Parser, Debug)]
#[command(name = "fourtrack")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Engine configuration file (JSON)
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Render a session to a 16-bit stereo WAV
    #[command(name = "bounce")]
    Bounce {
        /// Session JSON file
        session: PathBuf,

        /// Directory that source handles resolve against
        #[arg(short, long)]
        sources: PathBuf,

        /// Output WAV file
        #[arg(short, long)]
        out: PathBuf,

        /// Name recorded in the mix descriptor
        #[arg(short, long)]
        name: Option<String>,
    },

    /// Print tracks and regions of a session
    #[command(name = "inspect")]
    Inspect {
        /// Session JSON file
        session: PathBuf,
    },

    /// Write one region's pre-rendered audio to a WAV
    #[command(name = "prerender")]
    Prerender {
        /// Session JSON file
        session: PathBuf,

        /// Directory that source handles resolve against
        #[arg(short, long)]
        sources: PathBuf,

        /// Track index (0-3)
        #[arg(short, long)]
        track: usize,

        /// Region id
        #[arg(short, long)]
        region: Uuid,

        /// Output WAV file
        #[arg(short, long)]
        out: PathBuf,
    },
}
