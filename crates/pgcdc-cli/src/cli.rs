use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "pgcdc")]
#[command(about = "Change-data-capture runtime for PostgreSQL logical replication")]
#[command(version)]
pub struct Cli {
    /// Environment to load (loads .env.{ENV} instead of .env)
    #[arg(short, long, global = true)]
    pub env: Option<String>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Load a YAML configuration and start the Runner
    Start {
        /// Path to the slots/database configuration file
        config: PathBuf,
    },
}
