//! Command-line driver for the persistence core.
//!
//! ```bash
//! # Run the parent/child scenario and print statistics as JSON
//! orm-tool demo --children 3 --batch-size 5
//!
//! # Export the demo mapping as a schema file
//! orm-tool schema --output schema.json
//! ```

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use orm_core::mapping::MappingSchema;
use orm_core::{BatchFetchStyle, OrmConfig};
use tracing_subscriber::EnvFilter;

mod demo;

/// Runs unit-of-work scenarios against the in-memory driver.
#[derive(Parser, Debug)]
#[command(name = "orm-tool")]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// JSON configuration file for the session factory
    #[arg(long, short = 'c', global = true, env = "ORM_CONFIG")]
    config: Option<PathBuf>,

    /// Log session activity at debug level
    #[arg(long, short = 'v', global = true)]
    verbose: bool,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Persist a parent/child graph, reload it and report round-trips
    Demo {
        /// Number of root nodes to create
        #[arg(long, default_value_t = 5)]
        nodes: usize,

        /// Elements owned by each node
        #[arg(long, default_value_t = 3)]
        children: usize,

        /// Batch size for lazy collections and proxies
        #[arg(long)]
        batch_size: Option<usize>,

        /// Pad partial batches up to the batch size
        #[arg(long)]
        padded: bool,
    },

    /// Write the demo mapping as a JSON schema
    Schema {
        /// Output file (stdout when omitted)
        #[arg(long, short = 'o')]
        output: Option<PathBuf>,
    },
}

fn init_tracing(verbose: bool) {
    let default = if verbose { "debug" } else { "warn" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn load_config(path: Option<&PathBuf>) -> Result<OrmConfig> {
    match path {
        Some(path) => OrmConfig::from_file(path)
            .with_context(|| format!("Failed to load configuration from {}", path.display())),
        None => Ok(OrmConfig::default()),
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let mut config = load_config(cli.config.as_ref())?;
    match cli.command {
        Commands::Demo {
            nodes,
            children,
            batch_size,
            padded,
        } => {
            if let Some(size) = batch_size {
                config.default_batch_size = size;
            }
            if padded {
                config.batch_fetch_style = BatchFetchStyle::Padded;
            }
            let report = demo::run(config, nodes, children)?;
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
        Commands::Schema { output } => {
            let schema = MappingSchema::from_registry(&demo::registry(None)?);
            match output {
                Some(path) => {
                    schema
                        .save(&path)
                        .with_context(|| format!("Failed to write schema to {}", path.display()))?;
                    tracing::info!("Schema written to {}", path.display());
                }
                None => println!("{}", serde_json::to_string_pretty(&schema)?),
            }
        }
    }
    Ok(())
}
