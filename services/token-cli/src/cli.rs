//! Command-line interface

use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Debug, Parser)]
#[command(
    name = "mangadex-token",
    about = "MangaDex OAuth token lifecycle",
    version
)]
pub struct Cli {
    /// Path to the TOML config file
    #[arg(
        long,
        global = true,
        env = "CONFIG_PATH",
        default_value = "mangadex-token.toml"
    )]
    pub config: PathBuf,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, PartialEq, Eq, Subcommand)]
pub enum Command {
    /// Run the password grant and store the pair under CALLER_KEY.
    Login {
        caller_key: String,
        username: String,
        #[arg(long, env = "MANGADEX_PASSWORD", hide_env_values = true)]
        password: String,
    },
    /// Show the stored pair's expiry.
    Status { caller_key: String },
    /// Print an Authorization header, refreshing the pair if it is due.
    Header { caller_key: String },
}
