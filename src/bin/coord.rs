//! Coordinator binary

use clap::{Parser, Subcommand};
use fedcoord::common::{parse_peer, Config, PeerConfig};
use fedcoord::Coordinator;
use std::net::SocketAddr;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "fedcoord-coord")]
#[command(version = fedcoord::VERSION)]
#[command(about = "Federated training coordinator replica with Raft consensus")]
struct Cli {
    /// Config file (without extension), e.g. `fedcoord` for fedcoord.toml
    #[arg(long, global = true, default_value = "fedcoord")]
    config: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start a coordinator replica
    Serve {
        /// Raft id of this replica
        #[arg(long)]
        id: Option<u64>,

        /// Bind address for the node-facing HTTP API
        #[arg(long)]
        bind: Option<SocketAddr>,

        /// Bind address for raft gRPC traffic
        #[arg(long)]
        raft: Option<SocketAddr>,

        /// Other replicas as id=host:port (comma-separated)
        #[arg(long, value_delimiter = ',')]
        peers: Vec<String>,

        /// Start an election immediately
        #[arg(long)]
        campaign: bool,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config = Config::load_from(&cli.config)?;

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| config.log_level.clone().into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("fedcoord {}", fedcoord::BUILD_INFO);

    match cli.command {
        Commands::Serve {
            id,
            bind,
            raft,
            peers,
            campaign,
        } => {
            // File and environment first, CLI flags win
            let mut coord_config = config.coordinator;
            if let Some(id) = id {
                coord_config.replica_id = id;
            }
            if let Some(bind) = bind {
                coord_config.bind_addr = bind;
            }
            if let Some(raft) = raft {
                coord_config.raft_addr = raft;
            }
            if !peers.is_empty() {
                coord_config.peers = peers
                    .iter()
                    .map(|p| parse_peer(p))
                    .collect::<Result<Vec<PeerConfig>, _>>()?;
            }
            if campaign {
                coord_config.campaign_on_start = true;
            }

            Coordinator::new(coord_config).serve().await?;
        }
    }

    Ok(())
}
