//! Reliable delivery: pending unicast sends, retransmission, ack resolution.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use lanlink_core::protocol::Message;
use lanlink_core::wire::{self, WireEncodeError};
use tokio::sync::{oneshot, watch, Mutex};
use tracing::{debug, warn};

use crate::node::NodeInner;

/// Failure modes of a reliable unicast, surfaced to the caller.
#[derive(Debug, thiserror::Error)]
pub enum SendError {
    #[error("peer not found")]
    PeerUnknown,
    #[error("no acknowledgment after {attempts} attempts")]
    AckTimeout { attempts: u32 },
    #[error("peer rejected the message: {0}")]
    Rejected(String),
    #[error("node shut down before the send resolved")]
    Closed,
    #[error(transparent)]
    Encode(#[from] WireEncodeError),
}

/// How a pending send ended.
#[derive(Debug)]
pub(crate) enum Resolution {
    Acked,
    Nacked(String),
    TimedOut { attempts: u32 },
}

/// Pending sends are keyed by message id plus the chunk sequence number when
/// acknowledgment is per chunk.
type AckKey = (String, Option<u32>);

struct PendingSend {
    /// Encoded datagram, resent verbatim on every retry.
    payload: Vec<u8>,
    dest: SocketAddr,
    last_sent: Instant,
    attempts: u32,
    done: oneshot::Sender<Resolution>,
}

/// Table of sends awaiting acknowledgment. The dispatcher resolves entries
/// when acks arrive; the sweep retransmits and expires the rest.
pub(crate) struct PendingSends {
    entries: Mutex<HashMap<AckKey, PendingSend>>,
}

impl PendingSends {
    pub(crate) fn new() -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
        }
    }

    pub(crate) async fn register(
        &self,
        key: AckKey,
        payload: Vec<u8>,
        dest: SocketAddr,
        now: Instant,
    ) -> oneshot::Receiver<Resolution> {
        let (tx, rx) = oneshot::channel();
        self.entries.lock().await.insert(
            key,
            PendingSend {
                payload,
                dest,
                last_sent: now,
                attempts: 1,
                done: tx,
            },
        );
        rx
    }

    /// Resolve a pending send from a received Ack or Nack. Returns false when
    /// nothing matched; unmatched acks are normal (heartbeat acks, late
    /// retransmissions) and are not errors.
    pub(crate) async fn resolve(&self, id: &str, seq: Option<u32>, resolution: Resolution) -> bool {
        let entry = self.entries.lock().await.remove(&(id.to_string(), seq));
        match entry {
            Some(pending) => {
                let _ = pending.done.send(resolution);
                true
            }
            None => false,
        }
    }

    /// One pass of the retransmission sweep. Entries older than
    /// `retry_timeout` are either expired (attempt bound reached, waiter told
    /// of the timeout) or returned for verbatim retransmission.
    pub(crate) async fn sweep(
        &self,
        now: Instant,
        retry_timeout: Duration,
        retry_bound: u32,
    ) -> Vec<(Vec<u8>, SocketAddr)> {
        let mut entries = self.entries.lock().await;
        let due: Vec<AckKey> = entries
            .iter()
            .filter(|(_, p)| now.duration_since(p.last_sent) >= retry_timeout)
            .map(|(key, _)| key.clone())
            .collect();
        let mut resend = Vec::new();
        for key in due {
            let exhausted = entries
                .get(&key)
                .is_some_and(|p| p.attempts >= retry_bound);
            if exhausted {
                if let Some(pending) = entries.remove(&key) {
                    debug!(id = %key.0, attempts = pending.attempts, "send exhausted its retries");
                    let _ = pending.done.send(Resolution::TimedOut {
                        attempts: pending.attempts,
                    });
                }
            } else if let Some(pending) = entries.get_mut(&key) {
                pending.attempts += 1;
                pending.last_sent = now;
                resend.push((pending.payload.clone(), pending.dest));
            }
        }
        resend
    }

    /// Drop every entry. Waiters observe a closed channel; nothing is retried
    /// or reported after shutdown.
    pub(crate) async fn abandon_all(&self) {
        self.entries.lock().await.clear();
    }

    #[cfg(test)]
    async fn len(&self) -> usize {
        self.entries.lock().await.len()
    }
}

impl Default for PendingSends {
    fn default() -> Self {
        Self::new()
    }
}

/// Send `msg` to the named peer and wait for the outcome. The destination is
/// resolved first; an unknown peer fails immediately with nothing sent.
pub(crate) async fn send_reliable(
    inner: &NodeInner,
    peer: &str,
    msg: Message,
) -> Result<(), SendError> {
    let dest = inner
        .registry
        .lock()
        .await
        .resolve(peer)
        .ok_or(SendError::PeerUnknown)?;
    send_reliable_to(inner, dest, msg).await
}

/// Unicast with acknowledgment tracking. Replies (Ack/Nack) are sent without
/// registering a pending entry; nothing waits for an ack of an ack.
pub(crate) async fn send_reliable_to(
    inner: &NodeInner,
    dest: SocketAddr,
    msg: Message,
) -> Result<(), SendError> {
    let payload = wire::encode_datagram(&msg)?;
    if msg.is_reply() {
        if let Err(e) = inner.socket.send_to(&payload, dest).await {
            warn!(error = %e, %dest, "reply send failed");
        }
        return Ok(());
    }
    let key = ack_key(&msg);
    let rx = inner
        .pending
        .register(key, payload.clone(), dest, Instant::now())
        .await;
    if let Err(e) = inner.socket.send_to(&payload, dest).await {
        // The entry stays registered; the sweep retransmits it.
        debug!(error = %e, %dest, "initial transmission failed");
    }
    match rx.await {
        Ok(Resolution::Acked) => Ok(()),
        Ok(Resolution::Nacked(reason)) => Err(SendError::Rejected(reason)),
        Ok(Resolution::TimedOut { attempts }) => Err(SendError::AckTimeout { attempts }),
        Err(_) => Err(SendError::Closed),
    }
}

fn ack_key(msg: &Message) -> AckKey {
    let seq = match msg {
        Message::Chunk { seq, .. } => Some(*seq),
        _ => None,
    };
    (msg.id().to_string(), seq)
}

/// Retransmission sweep task: runs until shutdown, resending overdue entries
/// and expiring the exhausted ones. Socket writes happen outside the table
/// lock.
pub(crate) async fn run_sweep(inner: Arc<NodeInner>, mut shutdown: watch::Receiver<bool>) {
    let mut tick = tokio::time::interval(inner.config.retry_sweep_interval());
    tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
    loop {
        tokio::select! {
            _ = shutdown.changed() => break,
            _ = tick.tick() => {}
        }
        let resend = inner
            .pending
            .sweep(
                Instant::now(),
                inner.config.retry_timeout(),
                inner.config.retry_bound,
            )
            .await;
        for (payload, dest) in resend {
            if let Err(e) = inner.socket.send_to(&payload, dest).await {
                debug!(error = %e, %dest, "retransmission failed");
            }
        }
    }
}
