//! TCP member transport: length-prefixed JSON frames.
//!
//! Outbound messages are encoded by [`TcpChannel`] and queued; a single
//! [`SendWorker`] drains the queue in order over one connection per peer, so
//! each peer sees this node's messages in the order they were queued.
//! Inbound, every accepted connection gets its own receive loop feeding the
//! dispatcher one frame at a time.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use bytes::Bytes;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{broadcast, mpsc};

use farm_core::message::{ClusterMessage, MemberId};
use farm_services::{ChannelError, ClusterChannel, MessageDispatcher, SendTarget};

/// Largest frame accepted from a peer.
pub const MAX_FRAME: usize = 16 * 1024 * 1024;

/// How long one peer may hold up the send worker while connecting.
pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(3);

type Outbound = (SendTarget, Bytes);

pub struct TcpChannel {
    local: MemberId,
    peers: Vec<MemberId>,
    outbound: mpsc::UnboundedSender<Outbound>,
}

impl TcpChannel {
    pub fn new(local: MemberId, peers: Vec<MemberId>) -> (Self, mpsc::UnboundedReceiver<Outbound>) {
        let (outbound, rx) = mpsc::unbounded_channel();
        (
            Self {
                local,
                peers,
                outbound,
            },
            rx,
        )
    }
}

impl ClusterChannel for TcpChannel {
    fn local_member(&self) -> MemberId {
        self.local.clone()
    }

    fn members(&self) -> Vec<MemberId> {
        self.peers.clone()
    }

    fn send(&self, msg: &ClusterMessage, target: &SendTarget) -> Result<(), ChannelError> {
        if let SendTarget::Member { name } = target {
            if !self.peers.contains(name) {
                return Err(ChannelError::UnknownMember(name.clone()));
            }
        }
        let frame = Bytes::from(msg.to_bytes()?);
        self.outbound
            .send((target.clone(), frame))
            .map_err(|_| ChannelError::Closed)
    }
}

pub async fn write_frame<W: AsyncWrite + Unpin>(stream: &mut W, frame: &[u8]) -> std::io::Result<()> {
    stream.write_u32(frame.len() as u32).await?;
    stream.write_all(frame).await?;
    stream.flush().await
}

/// Read one frame. `Ok(None)` on a clean end of stream.
pub async fn read_frame<R: AsyncRead + Unpin>(stream: &mut R) -> std::io::Result<Option<Vec<u8>>> {
    let len = match stream.read_u32().await {
        Ok(len) => len as usize,
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(e),
    };
    if len > MAX_FRAME {
        return Err(std::io::Error::new(
            std::io::ErrorKind::InvalidData,
            format!("frame of {len} bytes exceeds limit of {MAX_FRAME}"),
        ));
    }
    let mut frame = vec![0u8; len];
    stream.read_exact(&mut frame).await?;
    Ok(Some(frame))
}

pub struct SendWorker {
    peers: Vec<(MemberId, String)>,
    rx: mpsc::UnboundedReceiver<Outbound>,
    shutdown: broadcast::Receiver<()>,
    connections: HashMap<MemberId, TcpStream>,
    connect_timeout: Duration,
}

impl SendWorker {
    pub fn new(
        peers: Vec<(MemberId, String)>,
        rx: mpsc::UnboundedReceiver<Outbound>,
        shutdown: broadcast::Receiver<()>,
    ) -> Self {
        Self {
            peers,
            rx,
            shutdown,
            connections: HashMap::new(),
            connect_timeout: CONNECT_TIMEOUT,
        }
    }

    #[cfg(test)]
    fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    pub async fn run(mut self) -> Result<()> {
        loop {
            tokio::select! {
                _ = self.shutdown.recv() => {
                    tracing::info!("send worker shutting down");
                    return Ok(());
                }

                msg = self.rx.recv() => {
                    let (target, frame) = match msg {
                        Some(m) => m,
                        None => {
                            tracing::info!("outbound queue dropped, send worker exiting");
                            return Ok(());
                        }
                    };
                    self.send_to_targets(&target, &frame).await;
                }
            }
        }
    }

    async fn send_to_targets(&mut self, target: &SendTarget, frame: &[u8]) {
        let targets: Vec<(MemberId, String)> = match target {
            SendTarget::Broadcast => self.peers.clone(),
            SendTarget::Member { name } => self
                .peers
                .iter()
                .filter(|(member, _)| member == name)
                .cloned()
                .collect(),
        };

        if targets.is_empty() {
            tracing::debug!(?target, "no target members found");
            return;
        }

        for (member, addr) in targets {
            if let Err(e) = self.send_frame(&member, &addr, frame).await {
                tracing::warn!(member = %member, %addr, error = %e, "frame send failed");
            }
        }
    }

    /// Write on the cached connection; on failure reconnect once and retry.
    async fn send_frame(&mut self, member: &MemberId, addr: &str, frame: &[u8]) -> Result<()> {
        if let Some(stream) = self.connections.get_mut(member) {
            match write_frame(stream, frame).await {
                Ok(()) => return Ok(()),
                Err(e) => {
                    tracing::debug!(member = %member, error = %e, "cached connection failed, reconnecting");
                    self.connections.remove(member);
                }
            }
        }

        let mut stream = tokio::time::timeout(self.connect_timeout, TcpStream::connect(addr))
            .await
            .with_context(|| format!("timed out connecting to {member} at {addr}"))?
            .with_context(|| format!("failed to connect to {member} at {addr}"))?;
        stream.set_nodelay(true).ok();
        write_frame(&mut stream, frame)
            .await
            .with_context(|| format!("failed to write frame to {member}"))?;
        tracing::debug!(member = %member, %addr, "connected to member");
        self.connections.insert(member.clone(), stream);
        Ok(())
    }
}

/// Accept member connections and spawn a receive loop for each.
pub async fn listener_loop(
    listener: TcpListener,
    dispatcher: Arc<MessageDispatcher>,
    mut shutdown: broadcast::Receiver<()>,
) -> Result<()> {
    tracing::info!(addr = %listener.local_addr()?, "member listener starting");
    loop {
        tokio::select! {
            _ = shutdown.recv() => {
                tracing::info!("member listener shutting down");
                return Ok(());
            }

            accepted = listener.accept() => {
                let (stream, peer_addr) = match accepted {
                    Ok(a) => a,
                    Err(e) => {
                        tracing::warn!(error = %e, "accept failed");
                        continue;
                    }
                };
                let dispatcher = dispatcher.clone();
                tokio::spawn(async move {
                    if let Err(e) = receive_loop(stream, peer_addr, dispatcher).await {
                        tracing::warn!(%peer_addr, error = %e, "receive loop terminated");
                    }
                });
            }
        }
    }
}

async fn receive_loop(
    mut stream: TcpStream,
    peer_addr: SocketAddr,
    dispatcher: Arc<MessageDispatcher>,
) -> Result<()> {
    tracing::debug!(%peer_addr, "member connected");
    while let Some(frame) = read_frame(&mut stream)
        .await
        .with_context(|| format!("failed to read frame from {peer_addr}"))?
    {
        let outcome = dispatcher.on_bytes(&frame).await;
        tracing::trace!(%peer_addr, ?outcome, "frame handled");
    }
    tracing::debug!(%peer_addr, "member disconnected");
    Ok(())
}
