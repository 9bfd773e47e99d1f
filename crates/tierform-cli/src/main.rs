//! tierform: provision a three-tier workspace stack.
//!
//! # Usage
//!
//! ```text
//! tierform init --name demo
//! tierform plan
//! tierform apply
//! tierform status
//! tierform monitor --duration 2m
//! tierform outputs
//! tierform destroy
//! ```

use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};

mod commands;

use commands::Workspace;

#[derive(Parser)]
#[command(
    name = "tierform",
    about = "tierform: dependency-ordered provisioning of an authenticated three-tier stack",
    version,
    propagate_version = true
)]
struct Cli {
    /// Stack configuration file.
    #[arg(short, long, global = true, default_value = "tierform.toml")]
    config: PathBuf,

    /// Directory holding the state store and the simulator snapshot.
    #[arg(long, global = true, default_value = ".tierform")]
    state_dir: PathBuf,

    /// Log output format.
    #[arg(long, global = true, value_enum, default_value_t = LogFormat::Text)]
    log_format: LogFormat,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

#[derive(Subcommand)]
enum Commands {
    /// Write a starter tierform.toml
    Init {
        /// Stack name; also seeds the login domain prefix.
        #[arg(short, long)]
        name: String,
        /// Overwrite an existing file.
        #[arg(long)]
        force: bool,
    },
    /// Show what apply would do, wave by wave
    Plan {
        /// Output format: text or json
        #[arg(short, long, default_value = "text")]
        format: String,
    },
    /// Create or update every resource in dependency order
    Apply {
        #[arg(short, long, default_value = "text")]
        format: String,
    },
    /// Delete every recorded resource, dependents first
    Destroy {
        #[arg(short, long, default_value = "text")]
        format: String,
    },
    /// Recorded resources and recent runs
    Status {
        /// Number of runs to list.
        #[arg(long, default_value = "5")]
        runs: usize,
    },
    /// Health-check the service tasks registered in the target group
    Monitor {
        /// Stop after this long (e.g. 90s); runs until interrupted if unset.
        #[arg(short, long)]
        duration: Option<String>,
    },
    /// Stack outputs: entry point URL, admin username, secret ids
    Outputs {
        #[arg(short, long, default_value = "text")]
        format: String,
    },
    /// Probe an HTTP endpoint with the configured health thresholds
    Probe {
        /// Target address (host:port).
        address: String,
        /// Number of probes; 0 runs until interrupted.
        #[arg(short = 'n', long, default_value = "0")]
        count: u32,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info,tierform=debug"));
    let subscriber = tracing_subscriber::fmt().with_env_filter(filter);
    match cli.log_format {
        LogFormat::Text => subscriber.init(),
        LogFormat::Json => subscriber.json().init(),
    }

    let workspace = Workspace::new(cli.config, cli.state_dir);

    match cli.command {
        Commands::Init { name, force } => commands::init::init(&workspace, &name, force),
        Commands::Plan { format } => commands::plan::plan(&workspace, &format),
        Commands::Apply { format } => {
            commands::apply::apply(&workspace, &format, commands::cancel_on_ctrl_c()).await
        }
        Commands::Destroy { format } => {
            commands::destroy::destroy(&workspace, &format, commands::cancel_on_ctrl_c()).await
        }
        Commands::Status { runs } => commands::status::status(&workspace, runs),
        Commands::Monitor { duration } => {
            commands::targets::monitor(&workspace, duration.as_deref(), commands::cancel_on_ctrl_c()).await
        }
        Commands::Outputs { format } => commands::outputs::outputs(&workspace, &format),
        Commands::Probe { address, count } => {
            commands::probe::probe(&workspace, &address, count, commands::cancel_on_ctrl_c()).await
        }
    }
}
