//! # CLI Interface
//!
//! Defines the command-line argument structure for `amparo-node` using
//! `clap` derive. Supports four subcommands: `run`, `init`, `status`,
//! and `version`.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

use amparo_ledger::config::{DEFAULT_API_PORT, DEFAULT_METRICS_PORT};

/// AMPARO relief-ledger node.
///
/// Runs the fund custody and voucher redemption core: the command API for
/// zones, vendors, vouchers, and proofs; the event monitor; the fraud
/// analyzer; and the Prometheus metrics endpoint.
#[derive(Parser, Debug)]
#[command(
    name = "amparo-node",
    about = "AMPARO relief-ledger node",
    version,
    propagate_version = true
)]
pub struct AmparoNodeCli {
    /// Subcommand to execute.
    #[command(subcommand)]
    pub command: Commands,
}

/// Top-level subcommands for the AMPARO node binary.
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Start the node.
    Run(RunArgs),
    /// Initialize a data directory with a default authority bootstrap.
    Init(InitArgs),
    /// Query the status of a running node via its API endpoint.
    Status(StatusArgs),
    /// Print version information and exit.
    Version,
}

/// Arguments for the `run` subcommand.
#[derive(Parser, Debug)]
pub struct RunArgs {
    /// Path to the node data directory (authority bootstrap lives here).
    ///
    /// Created on first run if it does not exist.
    #[arg(long, short = 'd', env = "AMPARO_DATA_DIR", default_value = "~/.amparo")]
    pub data_dir: PathBuf,

    /// Port for the command/query API.
    #[arg(long, env = "AMPARO_API_PORT", default_value_t = DEFAULT_API_PORT)]
    pub api_port: u16,

    /// Port for the Prometheus metrics endpoint.
    #[arg(long, env = "AMPARO_METRICS_PORT", default_value_t = DEFAULT_METRICS_PORT)]
    pub metrics_port: u16,

    /// Identity granted the full capability set when no authority
    /// bootstrap file is present in the data directory.
    #[arg(long, env = "AMPARO_ADMIN_ACTOR", default_value = "relief-admin")]
    pub admin_actor: String,

    /// Log output format: "pretty" or "json".
    #[arg(long, env = "AMPARO_LOG_FORMAT", default_value = "pretty")]
    pub log_format: String,
}

/// Arguments for the `init` subcommand.
#[derive(Parser, Debug)]
pub struct InitArgs {
    /// Path to the data directory to initialize.
    #[arg(long, short = 'd', env = "AMPARO_DATA_DIR", default_value = "~/.amparo")]
    pub data_dir: PathBuf,

    /// Identity written into the authority bootstrap with the full
    /// capability set.
    #[arg(long, default_value = "relief-admin")]
    pub admin_actor: String,
}

/// Arguments for the `status` subcommand.
#[derive(Parser, Debug)]
pub struct StatusArgs {
    /// API endpoint of the running node.
    #[arg(long, default_value = "http://127.0.0.1:8741")]
    pub api_url: String,
}
