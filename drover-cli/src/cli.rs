use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// Drover - disaster recovery for CNPG-backed applications
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Abort the run after this many seconds (cleanup still runs)
    #[arg(long, global = true)]
    pub timeout: Option<u64>,

    /// Override the namespace from the config document
    #[arg(short, long, global = true)]
    pub namespace: Option<String>,

    #[command(subcommand)]
    pub mode: Mode,
}

#[derive(Subcommand, Debug)]
pub enum Mode {
    /// Snapshot every database through a clone, dump it, and snapshot the volumes
    Backup {
        /// Application config document (YAML)
        #[arg(short, long, env = "DROVER_CONFIG")]
        config: PathBuf,
    },

    /// Restore every database from its dump on the dump volume
    Restore {
        /// Application config document (YAML)
        #[arg(short, long, env = "DROVER_CONFIG")]
        config: PathBuf,
    },

    /// Parse and validate a config document without touching the cluster
    CheckConfig {
        /// Application config document (YAML)
        #[arg(short, long, env = "DROVER_CONFIG")]
        config: PathBuf,
    },
}
