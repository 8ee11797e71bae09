//! CLI argument definitions using clap
//!
//! Commands:
//! - murmur start --config <path>
//! - murmur check-config --config <path>

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// murmur - Self-hostable real-time subscription server for group chat
#[derive(Parser, Debug)]
#[command(name = "murmur")]
#[command(version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Start the subscription server
    Start {
        /// Path to configuration file
        #[arg(long, default_value = "./murmur.json")]
        config: PathBuf,
    },

    /// Validate a configuration file and exit
    CheckConfig {
        /// Path to configuration file
        #[arg(long, default_value = "./murmur.json")]
        config: PathBuf,
    },
}

impl Cli {
    /// Parse command line arguments
    pub fn parse_args() -> Self {
        Cli::parse()
    }
}
