//! Process-level configuration

use anyhow::{Context, Result};
use proven_engine::PeerDirectory;
use std::env;
use std::net::{Ipv4Addr, SocketAddr};
use std::path::{Path, PathBuf};

/// Environment variable holding the peer address book (`id=host:port,...`)
pub const PEERS_ENV: &str = "COLLAGE_PEERS";

/// Identifier participants send their replies to
pub const COORDINATOR_ID: &str = "Server";

/// Log file names inside the data directory
pub const COORDINATOR_LOG: &str = "coordinator.log";
pub const PARTICIPANT_LOG: &str = "participant.log";

/// Settings for one node process
#[derive(Debug, Clone)]
pub struct NodeConfig {
    pub listen_port: u16,
    pub node_id: String,

    /// Directory holding the log and the images
    pub data_dir: PathBuf,

    pub peers: PeerDirectory,
}

impl NodeConfig {
    pub fn new(listen_port: u16, node_id: impl Into<String>) -> Self {
        Self {
            listen_port,
            node_id: node_id.into(),
            data_dir: PathBuf::from("."),
            peers: PeerDirectory::new(),
        }
    }

    /// Configuration from the working directory and `COLLAGE_PEERS`
    pub fn from_env(listen_port: u16, node_id: impl Into<String>) -> Result<Self> {
        let data_dir = env::current_dir().context("Cannot read working directory")?;
        let peers = env::var(PEERS_ENV).ok();
        Self::new(listen_port, node_id)
            .with_data_dir(data_dir)
            .with_peer_list(peers.as_deref())
    }

    pub fn with_data_dir(mut self, dir: impl AsRef<Path>) -> Self {
        self.data_dir = dir.as_ref().to_path_buf();
        self
    }

    /// Add peers from an `id=host:port,...` list, if there is one
    pub fn with_peer_list(mut self, list: Option<&str>) -> Result<Self> {
        if let Some(list) = list {
            self.peers = PeerDirectory::parse(list)
                .with_context(|| format!("Invalid {}", PEERS_ENV))?;
        }
        Ok(self)
    }

    pub fn listen_addr(&self) -> SocketAddr {
        SocketAddr::from((Ipv4Addr::UNSPECIFIED, self.listen_port))
    }

    pub fn log_path(&self, file_name: &str) -> PathBuf {
        self.data_dir.join(file_name)
    }
}
