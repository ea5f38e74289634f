// src/cli/config_args.rs
use clap::{Args, Subcommand};

/// Configuration management parameters.
#[derive(Args, Debug)]
pub struct ConfigArgs {
    /// Configuration operation to perform
    #[command(subcommand)]
    pub action: ConfigAction,
}

/// Supported configuration operations.
#[derive(Subcommand, Debug)]
pub enum ConfigAction {
    /// Set a configuration value by dot-separated key path
    Set {
        /// Key path, e.g. broker.url
        key: String,
        /// New value
        value: String,
    },
    /// Read a configuration value by dot-separated key path
    Get {
        /// Key path, e.g. scheduler.weigher
        key: String,
    },
    /// Print the full effective configuration
    List,
    /// Print the user configuration file path
    Path,
}
