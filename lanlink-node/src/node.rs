//! Node runtime: socket, background tasks, public operations.

use std::collections::HashMap;
use std::net::{Ipv4Addr, SocketAddr};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use lanlink_core::dedup::SeenIds;
use lanlink_core::protocol::{fresh_id, Message};
use lanlink_core::registry::PeerRegistry;
use lanlink_core::transfer::InboundTransfer;
use lanlink_core::wire;
use tokio::net::UdpSocket;
use tokio::sync::{broadcast, watch, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::config::NodeConfig;
use crate::dispatcher;
use crate::reliable::{self, PendingSends, SendError};
use crate::sendfile::{self, SendFileError};

/// Events surfaced to the application layer; the UI renders these.
#[derive(Debug, Clone)]
pub enum NodeEvent {
    PeerDiscovered { name: String, addr: SocketAddr },
    PeerExpired { name: String },
    MessageReceived { from: SocketAddr, text: String },
    FileReceived { path: PathBuf, from: SocketAddr },
}

/// One row of `list_peers`.
#[derive(Debug, Clone)]
pub struct PeerInfo {
    pub name: String,
    pub addr: SocketAddr,
    /// Time since the peer's last heartbeat.
    pub age: Duration,
}

/// Shared state behind the public handle. One lock per table; none is held
/// across a socket write.
pub(crate) struct NodeInner {
    pub(crate) name: String,
    pub(crate) config: NodeConfig,
    pub(crate) socket: UdpSocket,
    pub(crate) registry: Mutex<PeerRegistry>,
    pub(crate) seen: Mutex<SeenIds>,
    pub(crate) transfers: Mutex<HashMap<String, InboundTransfer>>,
    pub(crate) pending: PendingSends,
    pub(crate) events: broadcast::Sender<NodeEvent>,
}

impl NodeInner {
    pub(crate) fn emit(&self, event: NodeEvent) {
        // No subscriber is fine; events are advisory.
        let _ = self.events.send(event);
    }
}

/// Handle to a running node.
pub struct Node {
    inner: Arc<NodeInner>,
    shutdown: watch::Sender<bool>,
    tasks: Vec<JoinHandle<()>>,
}

impl Node {
    /// Bind the datagram socket and launch the four background tasks:
    /// dispatcher, heartbeat broadcaster, liveness sweep, retransmission
    /// sweep. Failure to bind is the only fatal startup error.
    pub async fn start(name: &str, port: u16, config: NodeConfig) -> std::io::Result<Node> {
        let socket = UdpSocket::bind((Ipv4Addr::UNSPECIFIED, port)).await?;
        socket.set_broadcast(true)?;
        let local = socket.local_addr()?;
        let (events, _) = broadcast::channel(256);
        let inner = Arc::new(NodeInner {
            name: name.to_string(),
            config,
            socket,
            registry: Mutex::new(PeerRegistry::new(name)),
            seen: Mutex::new(SeenIds::new()),
            transfers: Mutex::new(HashMap::new()),
            pending: PendingSends::new(),
            events,
        });
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let tasks = vec![
            tokio::spawn(dispatcher::run(inner.clone(), shutdown_rx.clone())),
            tokio::spawn(heartbeat_loop(inner.clone(), shutdown_rx.clone())),
            tokio::spawn(liveness_loop(inner.clone(), shutdown_rx.clone())),
            tokio::spawn(reliable::run_sweep(inner.clone(), shutdown_rx)),
        ];
        info!(name, port = local.port(), "node started");
        Ok(Node {
            inner,
            shutdown: shutdown_tx,
            tasks,
        })
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// Actual bound address; useful when started with port 0.
    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.inner.socket.local_addr()
    }

    /// Subscribe to application-surface events.
    pub fn subscribe(&self) -> broadcast::Receiver<NodeEvent> {
        self.inner.events.subscribe()
    }

    /// Live peers with the age of their last heartbeat, sorted by name.
    pub async fn list_peers(&self) -> Vec<PeerInfo> {
        let now = Instant::now();
        let mut peers: Vec<PeerInfo> = self
            .inner
            .registry
            .lock()
            .await
            .snapshot()
            .into_iter()
            .map(|rec| PeerInfo {
                name: rec.name,
                addr: rec.addr,
                age: now.duration_since(rec.last_seen),
            })
            .collect();
        peers.sort_by(|a, b| a.name.cmp(&b.name));
        peers
    }

    /// Send a short text message and wait for the acknowledgment (or a
    /// terminal failure after the retry bound).
    pub async fn send_message(&self, peer: &str, text: &str) -> Result<(), SendError> {
        let msg = Message::Talk {
            id: fresh_id(&self.inner.name),
            text: text.to_string(),
        };
        reliable::send_reliable(&self.inner, peer, msg).await
    }

    /// Transfer a file: announce, stream acknowledged chunks, finalize with a
    /// content digest.
    pub async fn send_file(&self, peer: &str, path: &Path) -> Result<(), SendFileError> {
        sendfile::send_file(&self.inner, peer, path, None).await
    }

    /// Like `send_file`, reporting `(chunks_sent, chunks_total)` after each
    /// acknowledged chunk.
    pub async fn send_file_with_progress(
        &self,
        peer: &str,
        path: &Path,
        progress: impl Fn(u32, u32) + Send + Sync,
    ) -> Result<(), SendFileError> {
        sendfile::send_file(&self.inner, peer, path, Some(&progress)).await
    }

    /// Signal all background tasks to exit, abandon unresolved sends, and
    /// wait for the tasks. No network activity happens after this returns.
    pub async fn shutdown(mut self) {
        let _ = self.shutdown.send(true);
        self.inner.pending.abandon_all().await;
        for task in self.tasks.drain(..) {
            let _ = task.await;
        }
        info!(name = %self.inner.name, "node stopped");
    }
}

/// Broadcast presence across the configured port span, then sleep. The first
/// broadcast goes out immediately so fresh nodes are discovered fast.
async fn heartbeat_loop(inner: Arc<NodeInner>, mut shutdown: watch::Receiver<bool>) {
    let mut tick = tokio::time::interval(inner.config.heartbeat_interval());
    loop {
        tokio::select! {
            _ = shutdown.changed() => break,
            _ = tick.tick() => {}
        }
        let msg = Message::Heartbeat {
            id: fresh_id(&inner.name),
            name: inner.name.clone(),
        };
        let datagram = match wire::encode_datagram(&msg) {
            Ok(d) => d,
            Err(e) => {
                debug!(error = %e, "heartbeat encode failed");
                continue;
            }
        };
        for port in inner.config.port_span() {
            let dest = SocketAddr::new(inner.config.broadcast_addr, port);
            if let Err(e) = inner.socket.send_to(&datagram, dest).await {
                debug!(error = %e, %dest, "heartbeat send failed");
            }
        }
    }
}

/// Evict peers that have gone silent and tell the application about them.
async fn liveness_loop(inner: Arc<NodeInner>, mut shutdown: watch::Receiver<bool>) {
    let mut tick = tokio::time::interval(inner.config.liveness_sweep_interval());
    loop {
        tokio::select! {
            _ = shutdown.changed() => break,
            _ = tick.tick() => {}
        }
        let evicted = inner
            .registry
            .lock()
            .await
            .sweep_stale(Instant::now(), inner.config.liveness_timeout());
        for rec in evicted {
            info!(peer = %rec.name, "peer removed after silence");
            inner.emit(NodeEvent::PeerExpired { name: rec.name });
        }
    }
}
