use clap::{Args, Parser, Subcommand};
use clap_complete::Shell;
use std::path::PathBuf;

use crate::orchestrator::role::Role;

#[derive(Debug, Parser)]
#[command(
    name = "pekit",
    version,
    about = "Run a Puppet Enterprise master and agent in local Docker containers"
)]
pub struct Cli {
    #[command(flatten)]
    pub global: GlobalOpts,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Args)]
pub struct GlobalOpts {
    /// Use a specific config file
    #[arg(short = 'f', long = "file", global = true, env = "PEKIT_CONFIG")]
    pub config_file: Option<PathBuf>,

    /// Log at debug level (RUST_LOG takes precedence)
    #[arg(short, long, global = true)]
    pub verbose: bool,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Start the engine: supervise both containers until Ctrl+C
    Up {
        /// Do not serve the control API
        #[arg(long)]
        no_dashboard: bool,
    },
    /// Show engine, container and console status
    Status,
    /// List local and downloadable images for both roles
    Images,
    /// Download an image for a role (Ctrl+C cancels)
    Pull {
        role: Role,
        /// Full image reference, e.g. geoffwilliams/pe_agent_demo:2016.4.0
        image: String,
    },
    /// Delete a local image
    Rmi { role: Role, image: String },
    /// Start the container if it is stopped, stop it if it is running
    Toggle { role: Role },
    /// Provision the agent against the master now
    Provision {
        /// Only install the agent software; skip signing and the first run
        #[arg(long)]
        agent_only: bool,
    },
    /// Trigger a management run inside a container
    Run { role: Role },
    /// Remove certificates so the agent can be provisioned again
    CleanCerts,
    /// Check that the engine, registry and ports are usable
    Doctor,
    /// Validate the configuration file
    Validate,
    /// Generate shell completions
    Completions {
        /// Shell to generate completions for
        shell: Shell,
    },
}
