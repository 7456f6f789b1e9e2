use clap::Parser;
use std::path::PathBuf;

use warden::{load_config, ConfigOverrides, NodeId, WardenConfig, WardenOrchestrator, WardenResult};
use warden_core::observability::init_tracing;

#[derive(Parser)]
#[command(name = "warden")]
#[command(about = "System controller role election and node failover daemon", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(clap::Subcommand)]
enum Commands {
    /// Run the controller daemon
    Run {
        /// Configuration file (TOML)
        #[arg(long)]
        config: Option<PathBuf>,

        /// Cluster node id of this controller, decimal or 0x-prefixed hex
        #[arg(long)]
        node_id: Option<NodeId>,

        /// Node id of the peer system controller
        #[arg(long)]
        peer_director: Option<NodeId>,
    },
    /// Configuration utilities
    Config {
        #[command(subcommand)]
        command: ConfigCommands,
    },
}

#[derive(clap::Subcommand)]
enum ConfigCommands {
    /// Print the effective configuration as TOML
    Show {
        #[arg(long)]
        config: Option<PathBuf>,
    },
    /// Check a configuration file
    Validate { file: PathBuf },
}

#[tokio::main]
async fn main() -> WardenResult<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Run {
            config,
            node_id,
            peer_director,
        } => {
            let overrides = ConfigOverrides {
                node_id,
                peer_director,
            };
            let config = load_config(config.as_deref(), overrides)?;
            init_tracing(&config.logging)?;
            run(config).await?;
        }
        Commands::Config { command } => match command {
            ConfigCommands::Show { config } => {
                let config = load_config(config.as_deref(), ConfigOverrides::default())?;
                print!("{}", config.to_toml_string()?);
            }
            ConfigCommands::Validate { file } => {
                let config = WardenConfig::from_file(&file)?;
                match config.validate() {
                    Ok(()) => println!("{}: configuration is valid", file.display()),
                    Err(e) => {
                        eprintln!("{}: {}", file.display(), e);
                        std::process::exit(1);
                    }
                }
            }
        },
    }

    Ok(())
}

async fn run(config: WardenConfig) -> WardenResult<()> {
    let mut orchestrator = WardenOrchestrator::new(config)?;
    orchestrator.start().await?;

    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for shutdown signal: {}", e);
    }
    tracing::info!("Shutdown requested");

    orchestrator.stop().await
}
