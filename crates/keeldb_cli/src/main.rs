//! KeelDB CLI
//!
//! Command-line tools for KeelDB log files.
//!
//! # Commands
//!
//! - `inspect` - Display log statistics and metadata
//! - `verify` - Check every line of a log
//! - `dump` - Print log entries for debugging
//! - `serve` - Serve a log over HTTP for followers
//! - `follow` - Replicate a remote log into a local file

mod commands;

use clap::{Parser, Subcommand};
use std::net::SocketAddr;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

/// KeelDB command-line log tools.
#[derive(Parser)]
#[command(name = "keeldb")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to the log file
    #[arg(global = true, short, long)]
    path: Option<PathBuf>,

    /// Enable verbose output
    #[arg(global = true, short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Display log statistics and metadata
    Inspect {
        /// Count mutations per kind
        #[arg(short, long)]
        mutations: bool,

        /// Output format (text, json)
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// Check every line of a log and report all problems found
    Verify {
        /// Expected signature line
        #[arg(short, long)]
        signature: Option<String>,
    },

    /// Print log entries for debugging
    Dump {
        /// Maximum number of entries to print
        #[arg(short, long)]
        limit: Option<usize>,

        /// Start from this entry index
        #[arg(short, long, default_value = "0")]
        from: u64,

        /// Output format (text, json)
        #[arg(long, default_value = "text")]
        format: String,
    },

    /// Serve a log over HTTP until interrupted
    Serve {
        /// Address to listen on
        #[arg(short, long, default_value = "127.0.0.1:7070")]
        bind: SocketAddr,

        /// Idle head interval in milliseconds
        #[arg(long, default_value = "1000")]
        head_interval_ms: u64,
    },

    /// Replicate a remote log into the local file until interrupted
    Follow {
        /// Base URL of the master's log server
        #[arg(short, long)]
        master: String,

        /// Maximum consecutive reconnect attempts (0 retries forever)
        #[arg(long, default_value = "0")]
        max_attempts: u32,
    },

    /// Show version information
    Version,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // Initialize logging
    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("info")
    };
    tracing_subscriber::fmt().with_env_filter(filter).init();

    match cli.command {
        Commands::Inspect { mutations, format } => {
            let path = cli.path.ok_or("Log path required for inspect")?;
            commands::inspect::run(&path, mutations, &format)?;
        }
        Commands::Verify { signature } => {
            let path = cli.path.ok_or("Log path required for verify")?;
            commands::verify::run(&path, signature.as_deref())?;
        }
        Commands::Dump {
            limit,
            from,
            format,
        } => {
            let path = cli.path.ok_or("Log path required for dump")?;
            commands::dump::run(&path, from, limit, &format)?;
        }
        Commands::Serve {
            bind,
            head_interval_ms,
        } => {
            let path = cli.path.ok_or("Log path required for serve")?;
            commands::serve::run(&path, bind, head_interval_ms)?;
        }
        Commands::Follow {
            master,
            max_attempts,
        } => {
            let path = cli.path.ok_or("Log path required for follow")?;
            commands::follow::run(&path, &master, max_attempts)?;
        }
        Commands::Version => {
            println!("KeelDB CLI v{}", env!("CARGO_PKG_VERSION"));
            println!("KeelDB Core v{}", keeldb_core::VERSION);
        }
    }

    Ok(())
}
