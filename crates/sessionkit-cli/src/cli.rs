//! CLI argument definitions.

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

use crate::commands::{request, watch, whoami};

/// Session layer CLI for a subscription service.
#[derive(Parser, Debug)]
#[command(name = "sessionkit")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Output logs as JSON
    #[arg(long, global = true)]
    pub json_logs: bool,

    #[command(flatten)]
    pub connect: ConnectArgs,

    #[command(subcommand)]
    pub command: Commands,
}

/// Where the service is and how to authenticate against it.
#[derive(Args, Debug)]
pub struct ConnectArgs {
    /// Service base URL
    #[arg(long, env = "SESSIONKIT_URL", global = true)]
    pub url: Option<String>,

    /// JSON client configuration file; `--url` overrides its base_url
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Account username
    #[arg(long, env = "SESSIONKIT_USERNAME", global = true)]
    pub username: Option<String>,

    /// Account password
    #[arg(long, env = "SESSIONKIT_PASSWORD", hide_env_values = true, global = true)]
    pub password: Option<String>,

    /// Host initialization data forwarded with every request
    #[arg(long, env = "SESSIONKIT_INIT_DATA", hide_env_values = true, global = true)]
    pub init_data: Option<String>,

    /// Session file left by an older client; imported once, then deleted
    #[arg(long, global = true)]
    pub legacy_session: Option<PathBuf>,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Send an authenticated request
    Request(request::RequestArgs),

    /// Stream real-time notifications
    Watch(watch::WatchArgs),

    /// Display the active session
    Whoami(whoami::WhoamiArgs),
}
