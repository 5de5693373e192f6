//! Collage nodes: coordinator, participant, and a client to submit collages

mod config;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use config::{COORDINATOR_ID, COORDINATOR_LOG, NodeConfig, PARTICIPANT_LOG};
use proven_common::{TransactionId, partition_sources};
use proven_coordinator::{Coordinator, CoordinatorConfig, CoordinatorLog, DirectorySink};
use proven_engine::{EngineConfig, MessageHandler, PeerDirectory, TcpTransport, Transport, serve};
use proven_participant::{
    ConsoleApprover, DirectoryStore, Participant, ParticipantConfig, ParticipantLog,
};
use proven_protocol::BuildRequest;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "proven-collage")]
#[command(about = "Atomic collage assembly over two-phase commit", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the coordinator
    Server {
        /// Port to listen on
        port: u16,
    },

    /// Run a participant owning the images in the working directory
    Node {
        /// Port to listen on
        port: u16,

        /// Participant identifier
        id: String,
    },

    /// Ask a running coordinator to commit a collage
    Submit {
        /// Coordinator port on this host
        port: u16,

        /// Name of the collage to produce
        collage: String,

        /// File holding the collage image
        image: PathBuf,

        /// Sources as participant:image
        #[arg(required = true)]
        sources: Vec<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    // Logs go to stderr so approval prompts on stdout stay readable
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .try_init();

    let cli = Cli::parse();
    match cli.command {
        Commands::Server { port } => run_server(NodeConfig::from_env(port, COORDINATOR_ID)?).await,
        Commands::Node { port, id } => run_node(NodeConfig::from_env(port, id)?).await,
        Commands::Submit {
            port,
            collage,
            image,
            sources,
        } => submit(port, collage, image, sources).await,
    }
}

async fn run_server(config: NodeConfig) -> Result<()> {
    let log_path = config.log_path(COORDINATOR_LOG);
    let log = CoordinatorLog::open_file(&log_path)
        .with_context(|| format!("Cannot open log {}", log_path.display()))?;
    let sink = DirectorySink::new(&config.data_dir).context("Cannot open data directory")?;

    let coordinator = Arc::new(Coordinator::new(
        CoordinatorConfig::default().with_node_id(config.node_id.clone()),
        Arc::new(TcpTransport::new(config.peers.clone())),
        log,
        Arc::new(sink),
    ));

    // Bind first so replies to recovered transactions have somewhere to go
    let listener = bind(&config).await?;
    let recovered = coordinator.recover().context("Recovery failed")?;
    tracing::info!("Resuming {} transactions", recovered.len());

    tracing::info!(
        "Coordinator {} listening on {}",
        coordinator.node_id(),
        config.listen_addr()
    );
    run_until_shutdown(listener, coordinator).await
}

async fn run_node(config: NodeConfig) -> Result<()> {
    if config.peers.resolve(COORDINATOR_ID).is_none() {
        tracing::warn!(
            "No address for {} in {}; replies cannot be sent",
            COORDINATOR_ID,
            config::PEERS_ENV
        );
    }

    let log_path = config.log_path(PARTICIPANT_LOG);
    let log = ParticipantLog::open_file(&log_path)
        .with_context(|| format!("Cannot open log {}", log_path.display()))?;

    let participant = Arc::new(Participant::new(
        ParticipantConfig::new(config.node_id.clone()),
        Arc::new(TcpTransport::new(config.peers.clone())),
        Arc::new(DirectoryStore::new(&config.data_dir)),
        Arc::new(ConsoleApprover::new()),
        log,
    ));
    participant.recover().context("Recovery failed")?;

    let listener = bind(&config).await?;
    tracing::info!(
        "Participant {} listening on {}",
        participant.node_id(),
        config.listen_addr()
    );
    run_until_shutdown(listener, participant).await
}

async fn bind(config: &NodeConfig) -> Result<TcpListener> {
    TcpListener::bind(config.listen_addr())
        .await
        .with_context(|| format!("Cannot listen on {}", config.listen_addr()))
}

async fn run_until_shutdown(listener: TcpListener, handler: Arc<dyn MessageHandler>) -> Result<()> {
    tokio::select! {
        result = serve(listener, handler, EngineConfig::default()) => {
            result.context("Listener failed")
        }
        signal = tokio::signal::ctrl_c() => {
            signal.context("Cannot wait for shutdown signal")?;
            tracing::info!("Shutting down");
            Ok(())
        }
    }
}

async fn submit(port: u16, collage: String, image: PathBuf, sources: Vec<String>) -> Result<()> {
    let collage = TransactionId::parse(&collage).map_err(anyhow::Error::msg)?;
    partition_sources(&sources)?;

    let image = std::fs::read(&image)
        .with_context(|| format!("Cannot read image {}", image.display()))?;
    let request = BuildRequest {
        collage: collage.clone(),
        image,
        sources,
    };

    let peers = PeerDirectory::new().with_peer(COORDINATOR_ID, format!("127.0.0.1:{}", port));
    TcpTransport::new(peers)
        .send(COORDINATOR_ID, request.into_message())
        .await
        .context("Cannot reach coordinator")?;

    tracing::info!("Submitted collage {}", collage);
    Ok(())
}
