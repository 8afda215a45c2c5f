mod commands;
mod utils;

use clap::{Parser, Subcommand, ValueEnum};
use cloudplane_config::Config;
use cloudplane_provider::Provider;
use colored::Colorize;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "cloudplane")]
#[command(about = "Drive cloud objects toward their declared state", long_about = None)]
struct Cli {
    /// Config file (defaults to $CLOUDPLANE_CONFIG, ./cloudplane.yaml, ~/.config/cloudplane)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show the remote object behind an id
    Read {
        kind: Kind,
        id: String,
        /// Print the declared-model view instead of the raw object
        #[arg(short, long)]
        model: bool,
    },
    /// Create an object from a YAML or JSON spec
    Create {
        kind: Kind,
        /// Spec file
        #[arg(short, long)]
        spec: PathBuf,
    },
    /// Move an existing object to a new spec
    Update {
        kind: Kind,
        id: String,
        /// Desired spec file
        #[arg(short, long)]
        spec: PathBuf,
        /// Previously applied spec (read from the object if omitted)
        #[arg(short, long)]
        prior: Option<PathBuf>,
    },
    /// Delete an object
    Delete {
        kind: Kind,
        id: String,
        /// Also purge objects that would otherwise stay in the recycle bin
        #[arg(short, long)]
        force: bool,
        /// Detach the object from its host first
        #[arg(long)]
        detach: bool,
    },
    /// List objects matching filters
    List {
        kind: Kind,
        /// Filter as NAME=VALUE[,VALUE...] (repeatable)
        #[arg(short = 'F', long = "filter", value_name = "NAME=VALUES")]
        filters: Vec<String>,
        /// Concurrent page fetches
        #[arg(short, long, default_value = "4")]
        workers: usize,
        /// Write the result to a JSON file instead of stdout
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Show version information
    Version,
}

impl Commands {
    fn kind(&self) -> Option<Kind> {
        match self {
            Commands::Read { kind, .. }
            | Commands::Create { kind, .. }
            | Commands::Update { kind, .. }
            | Commands::Delete { kind, .. }
            | Commands::List { kind, .. } => Some(*kind),
            Commands::Version => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum Kind {
    Disk,
    Snapshot,
    DiskBackup,
    LiveDomain,
    ClusterAgent,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // stdout carries command output, logs go to stderr
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let Some(kind) = cli.command.kind() else {
        println!("cloudplane {}", env!("CARGO_PKG_VERSION"));
        return Ok(());
    };

    let config = match Config::load(cli.config.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("{}", "✗ Configuration error".red().bold());
            eprintln!("  {}", e);
            std::process::exit(1);
        }
    };
    let provider = Provider::new(config);

    match kind {
        Kind::Disk => commands::run(&provider, provider.disks(), cli.command).await,
        Kind::Snapshot => commands::run(&provider, provider.snapshots(), cli.command).await,
        Kind::DiskBackup => commands::run(&provider, provider.disk_backups(), cli.command).await,
        Kind::LiveDomain => commands::run(&provider, provider.live_domains(), cli.command).await,
        Kind::ClusterAgent => {
            commands::run(&provider, provider.cluster_agents(), cli.command).await
        }
    }
}
