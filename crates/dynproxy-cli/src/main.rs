//! dynproxy command-line tool
//!
//! Loads a JSON type manifest, synthesizes the proxies it declares and
//! prints or saves the generated types for inspection.
//!
//! Logging goes to stderr and honors `RUST_LOG`; `--verbose` raises the
//! default level to `debug`.

mod commands;
mod manifest;

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "dynproxy")]
#[command(about = "Synthesize and inspect runtime proxy types", long_about = None)]
#[command(version)]
struct Cli {
    /// Log generation decisions (equivalent to RUST_LOG=debug)
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Scope configuration file (.toml or .json); overrides the manifest's
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print the generated proxy types
    Inspect {
        /// Type manifest (JSON)
        manifest: PathBuf,
        /// Only proxies for this target type
        #[arg(long)]
        only: Option<String>,
        /// Write one listing per proxy type into this directory
        #[arg(short, long)]
        out_dir: Option<PathBuf>,
    },

    /// Generate every declared proxy and report failures
    Check {
        /// Type manifest (JSON)
        manifest: PathBuf,
    },
}

fn init_tracing(verbose: bool) {
    let default_level = if verbose { "debug" } else { "warn" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);
    let config = cli.config.as_deref();

    match cli.command {
        Commands::Inspect {
            manifest,
            only,
            out_dir,
        } => commands::inspect::execute(&manifest, config, only.as_deref(), out_dir.as_deref()),
        Commands::Check { manifest } => commands::check::execute(&manifest, config),
    }
}
