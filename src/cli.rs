//! Command-line interface for moor
//!
//! Uses clap with derive for type-safe CLI parsing

use clap::{CommandFactory, Parser, Subcommand};
use clap_complete::Shell;
use std::path::PathBuf;

/// moor - pin applications to network interfaces
#[derive(Parser)]
#[command(name = "moor")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Configuration file path
    #[arg(short, long, default_value = "/etc/moor.toml")]
    pub config: PathBuf,

    /// Enable verbose output
    #[arg(short, long)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

/// Available commands
#[derive(Subcommand)]
pub enum Commands {
    /// List network interfaces
    List {
        /// Include interfaces that are administratively down
        #[arg(short, long)]
        all: bool,

        /// Output in JSON format
        #[arg(long)]
        json: bool,
    },

    /// Show the system's DNS servers
    Dns {
        /// Output in JSON format
        #[arg(long)]
        json: bool,
    },

    /// Install policy routing for every eligible interface
    Setup {
        /// Set up a single interface instead of all eligible ones
        #[arg(short, long)]
        iface: Option<String>,

        /// Show what would be done without making changes
        #[arg(long)]
        dry_run: bool,
    },

    /// Bind an application to an interface and launch it
    Bind {
        /// Path or command of the application
        #[arg(short, long)]
        app: String,

        /// Interface to pin the application's traffic to
        #[arg(short, long)]
        iface: String,
    },

    /// Remove all managed routing tables and their rules
    Clear,

    /// Reset everything moor created (tables, veths, namespaces)
    Reset,

    /// Generate shell completion scripts
    Completion {
        /// Shell to generate completion for
        #[arg(value_enum)]
        shell: Shell,
    },
}

impl Cli {
    /// Parse CLI arguments
    pub fn parse_args() -> Self {
        Self::parse()
    }

    /// Generate shell completion scripts
    pub fn generate_completion(shell: Shell) {
        let mut cmd = Self::command();
        clap_complete::generate(shell, &mut cmd, "moor", &mut std::io::stdout());
    }
}
