//! TCP transport for running nodes as separate processes
//!
//! Each node listens on its own port. A message is sent as one
//! length-prefixed JSON frame over a short-lived connection; peers are found
//! through a static [`PeerDirectory`].

use crate::transport::deliver_with_retry;
use crate::{EngineConfig, EngineError, Message, MessageHandler, Result, Transport};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

/// Largest frame accepted from the wire (collage images included)
pub const MAX_FRAME_LEN: usize = 64 * 1024 * 1024;

/// Static address book mapping node IDs to `host:port`
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PeerDirectory {
    peers: HashMap<String, String>,
}

impl PeerDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse `id=host:port` entries separated by commas
    pub fn parse(s: &str) -> Result<Self> {
        let mut peers = HashMap::new();
        for entry in s.split(',').map(str::trim).filter(|e| !e.is_empty()) {
            let (id, addr) = entry
                .split_once('=')
                .filter(|(id, addr)| !id.is_empty() && addr.contains(':'))
                .ok_or_else(|| EngineError::InvalidPeer(entry.to_string()))?;
            peers.insert(id.trim().to_string(), addr.trim().to_string());
        }
        Ok(Self { peers })
    }

    pub fn with_peer(mut self, id: impl Into<String>, addr: impl Into<String>) -> Self {
        self.peers.insert(id.into(), addr.into());
        self
    }

    pub fn resolve(&self, id: &str) -> Option<&str> {
        self.peers.get(id).map(|s| s.as_str())
    }
}

/// Transport that sends each message over a fresh TCP connection
pub struct TcpTransport {
    peers: PeerDirectory,
}

impl TcpTransport {
    pub fn new(peers: PeerDirectory) -> Self {
        Self { peers }
    }
}

#[async_trait]
impl Transport for TcpTransport {
    async fn send(&self, destination: &str, message: Message) -> Result<()> {
        let addr = self
            .peers
            .resolve(destination)
            .ok_or_else(|| EngineError::UnknownPeer(destination.to_string()))?;

        let mut stream = TcpStream::connect(addr).await?;
        write_frame(&mut stream, &message).await?;
        stream.shutdown().await?;
        Ok(())
    }
}

/// Write one length-prefixed frame
pub async fn write_frame<W>(writer: &mut W, message: &Message) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    let bytes = serde_json::to_vec(message)?;
    if bytes.len() > MAX_FRAME_LEN {
        return Err(EngineError::FrameTooLarge(bytes.len()));
    }
    writer.write_u32(bytes.len() as u32).await?;
    writer.write_all(&bytes).await?;
    writer.flush().await?;
    Ok(())
}

/// Read one frame, or `None` once the peer has closed the connection
pub async fn read_frame<R>(reader: &mut R) -> Result<Option<Message>>
where
    R: AsyncRead + Unpin,
{
    let len = match reader.read_u32().await {
        Ok(len) => len as usize,
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(e.into()),
    };
    if len > MAX_FRAME_LEN {
        return Err(EngineError::FrameTooLarge(len));
    }

    let mut buf = vec![0u8; len];
    reader.read_exact(&mut buf).await?;
    Ok(Some(serde_json::from_slice(&buf)?))
}

/// Accept connections forever, delivering every frame to `handler`
pub async fn serve(
    listener: TcpListener,
    handler: Arc<dyn MessageHandler>,
    config: EngineConfig,
) -> Result<()> {
    loop {
        let (stream, peer) = listener.accept().await?;
        let handler = handler.clone();
        let config = config.clone();
        tokio::spawn(async move {
            if let Err(e) = handle_connection(stream, handler, config).await {
                tracing::warn!("Connection from {} failed: {}", peer, e);
            }
        });
    }
}

async fn handle_connection(
    mut stream: TcpStream,
    handler: Arc<dyn MessageHandler>,
    config: EngineConfig,
) -> Result<()> {
    while let Some(message) = read_frame(&mut stream).await? {
        let handler = handler.clone();
        let config = config.clone();
        tokio::spawn(async move {
            deliver_with_retry(&handler, message, &config).await;
        });
    }
    Ok(())
}
