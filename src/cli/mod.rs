//! CLI parser and dispatch.

mod commands;
mod helpers;

use std::path::PathBuf;

use anyhow::Context;
use chrono::NaiveDate;
use clap::{Parser, Subcommand, ValueEnum};

use pubnotice::Config;

#[derive(Parser)]
#[command(name = "pubnotice")]
#[command(about = "Daily extraction of legal notices from public notice portals")]
#[command(version)]
pub struct Cli {
    /// Config file path (overrides auto-discovery)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

/// Check if verbose mode is enabled (for early logging setup).
pub fn is_verbose() -> bool {
    std::env::args().any(|arg| arg == "-v" || arg == "--verbose")
}

/// Where notices are read from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Source {
    /// Minnesota public notice portal (browser engine)
    MnPublicNotice,
    /// Star Tribune foreclosure classifieds (plain HTTP)
    StarTribune,
}

#[derive(Subcommand)]
enum Commands {
    /// Run one extraction pass and write a CSV
    Run {
        #[arg(value_enum)]
        source: Source,
        /// Day to search (YYYY-MM-DD). Defaults to yesterday.
        #[arg(long)]
        date: Option<NaiveDate>,
        /// Search keywords, comma-separated (overrides config)
        #[arg(long, value_delimiter = ',')]
        keywords: Option<Vec<String>>,
        /// Output directory (overrides config)
        #[arg(short, long)]
        output_dir: Option<PathBuf>,
        /// Show the browser window
        #[arg(long)]
        headed: bool,
        /// Do not rotate the VPN relay
        #[arg(long)]
        no_vpn: bool,
    },

    /// Check API keys and VPN availability
    Check,
}

/// Run the CLI.
pub async fn run() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => Config::load_from_path(path)
            .await
            .map_err(anyhow::Error::msg)
            .with_context(|| format!("loading {}", path.display()))?,
        None => Config::load().await,
    };

    match cli.command {
        Commands::Run {
            source,
            date,
            keywords,
            output_dir,
            headed,
            no_vpn,
        } => {
            let options = commands::run::RunOptions {
                source,
                date,
                keywords,
                output_dir,
                headed,
                no_vpn,
            };
            commands::run::cmd_run(config, options).await
        }
        Commands::Check => commands::check::cmd_check(&config).await,
    }
}
