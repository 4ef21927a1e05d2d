//! tessera CLI - multiplexed image stacks and filters

use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod commands;

use commands::EngineArgs;

#[derive(Parser)]
#[command(name = "tessera")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Write an all-ones stack as a tile set directory
    Synthetic {
        /// Output directory
        #[arg(short, long)]
        output: PathBuf,
        /// Number of rounds
        #[arg(long, default_value = "2")]
        rounds: usize,
        /// Number of channels
        #[arg(long, default_value = "3")]
        chs: usize,
        /// Number of z-planes
        #[arg(long, default_value = "4")]
        zplanes: usize,
        /// Tile height in pixels
        #[arg(long, default_value = "30")]
        height: usize,
        /// Tile width in pixels
        #[arg(long, default_value = "20")]
        width: usize,
    },
    /// Describe a tile set directory
    Info {
        /// Input directory
        #[arg(short, long)]
        input: PathBuf,
    },
    /// Run a registered filter over a tile set
    Filter {
        /// Filter name (see `tessera filters`)
        name: String,
        /// Input directory
        #[arg(short, long)]
        input: PathBuf,
        /// Output directory
        #[arg(short, long)]
        output: PathBuf,
        /// Filter parameters as JSON
        #[arg(long, default_value = "{}")]
        params: String,
        #[command(flatten)]
        engine: EngineArgs,
    },
    /// Maximum projection over grouping axes
    MaxProj {
        /// Input directory
        #[arg(short, long)]
        input: PathBuf,
        /// Output directory
        #[arg(short, long)]
        output: PathBuf,
        /// Axes to project, comma separated (e.g. "r,c")
        #[arg(long, value_delimiter = ',', required = true)]
        axes: Vec<String>,
    },
    /// List registered filters
    Filters,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize tracing
    let filter = match cli.verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };

    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| filter.into()))
        .with(tracing_subscriber::fmt::layer())
        .init();

    match cli.command {
        Commands::Synthetic { output, rounds, chs, zplanes, height, width } => {
            commands::synthetic::execute(&output, [rounds, chs, zplanes], (height, width))
        }
        Commands::Info { input } => commands::info::execute(&input),
        Commands::Filter { name, input, output, params, engine } => {
            commands::filter::execute(&name, &input, &output, &params, &engine, cli.verbose > 1)
        }
        Commands::MaxProj { input, output, axes } => {
            commands::max_proj::execute(&input, &output, &axes)
        }
        Commands::Filters => commands::filters::execute(),
    }
}
