//! Inbound dispatcher: the single consumer of the socket. Decodes each
//! datagram and routes it by kind; malformed or unexpected input drops the
//! datagram, never the loop.

use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;

use lanlink_core::protocol::Message;
use lanlink_core::registry::HeartbeatOutcome;
use lanlink_core::transfer::{ChunkAccept, InboundTransfer};
use lanlink_core::wire::{self, MAX_DATAGRAM_LEN};
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::node::{NodeEvent, NodeInner};
use crate::reliable::Resolution;

pub(crate) async fn run(inner: Arc<NodeInner>, mut shutdown: watch::Receiver<bool>) {
    let mut buf = vec![0u8; MAX_DATAGRAM_LEN];
    loop {
        let (len, from) = tokio::select! {
            _ = shutdown.changed() => break,
            recv = inner.socket.recv_from(&mut buf) => match recv {
                Ok(pair) => pair,
                Err(e) => {
                    warn!(error = %e, "socket receive failed");
                    continue;
                }
            }
        };
        match wire::decode_datagram(&buf[..len]) {
            Ok(msg) => handle_message(&inner, msg, from).await,
            Err(e) => debug!(%from, error = %e, "dropping malformed datagram"),
        }
    }
}

async fn handle_message(inner: &NodeInner, msg: Message, from: SocketAddr) {
    match msg {
        Message::Heartbeat { id, name } => {
            let outcome = inner
                .registry
                .lock()
                .await
                .record_heartbeat(&name, from, Instant::now());
            match outcome {
                HeartbeatOutcome::SelfHeartbeat => return,
                HeartbeatOutcome::Discovered => {
                    info!(peer = %name, %from, "peer discovered");
                    inner.emit(NodeEvent::PeerDiscovered { name, addr: from });
                }
                HeartbeatOutcome::Rebound => {
                    info!(peer = %name, %from, "peer changed address");
                }
                HeartbeatOutcome::Refreshed => {}
            }
            reply_ack(inner, &id, None, from).await;
        }
        Message::Talk { id, text } => {
            let fresh = inner.seen.lock().await.insert("talk", &id);
            if fresh {
                info!(%from, "message received");
                inner.emit(NodeEvent::MessageReceived { from, text });
            }
            // A retried Talk is acknowledged again even when already processed.
            reply_ack(inner, &id, None, from).await;
        }
        Message::File {
            id,
            file_name,
            size,
        } => {
            if size > inner.config.max_transfer_size {
                warn!(%from, size, "rejecting oversized transfer");
                reply_nack(inner, &id, None, "too large", from).await;
                return;
            }
            let mut transfers = inner.transfers.lock().await;
            // A re-announce of a known id re-acks without resetting state.
            transfers
                .entry(id.clone())
                .or_insert_with(|| InboundTransfer::new(id.clone(), file_name, size, from));
            drop(transfers);
            reply_ack(inner, &id, None, from).await;
        }
        Message::Chunk { id, seq, data } => {
            let accepted = {
                let mut transfers = inner.transfers.lock().await;
                match transfers.get_mut(&id) {
                    // Never announced or already finalized: ignore silently.
                    None => return,
                    Some(transfer) => transfer.accept_chunk(seq, data),
                }
            };
            match accepted {
                ChunkAccept::OutOfRange => {}
                // Duplicates are re-acked so the sender's retry can resolve.
                ChunkAccept::Stored | ChunkAccept::Duplicate => {
                    reply_ack(inner, &id, Some(seq), from).await;
                }
            }
        }
        Message::End { id, hash } => {
            let transfer = inner.transfers.lock().await.remove(&id);
            let Some(transfer) = transfer else { return };
            finalize_transfer(inner, transfer, &id, &hash, from).await;
        }
        Message::Ack { id, seq } => {
            if !inner.pending.resolve(&id, seq, Resolution::Acked).await {
                // Heartbeat acks and late retransmissions land here.
                debug!(%id, "ack with no pending send");
            }
        }
        Message::Nack { id, seq, reason } => {
            if !inner
                .pending
                .resolve(&id, seq, Resolution::Nacked(reason.clone()))
                .await
            {
                debug!(%id, %reason, "nack with no pending send");
            }
        }
    }
}

/// Verify a completed transfer and persist it. Success and failure both end
/// the transfer; the sender learns which from the reply.
async fn finalize_transfer(
    inner: &NodeInner,
    transfer: InboundTransfer,
    id: &str,
    declared_hash: &str,
    from: SocketAddr,
) {
    if !transfer.is_complete() {
        debug!(
            %id,
            received = transfer.received(),
            expected = transfer.expected_chunks(),
            "finalizing an incomplete transfer"
        );
    }
    let file_name = safe_file_name(transfer.file_name());
    let data = match transfer.finish(declared_hash) {
        Ok(data) => data,
        Err(e) => {
            warn!(%id, error = %e, "transfer failed verification");
            reply_nack(inner, id, None, "hash mismatch", from).await;
            return;
        }
    };
    let path = inner
        .config
        .download_dir
        .join(format!("received_{}", file_name));
    match tokio::fs::write(&path, &data).await {
        Ok(()) => {
            info!(%id, path = %path.display(), bytes = data.len(), "file received");
            inner.emit(NodeEvent::FileReceived { path, from });
            reply_ack(inner, id, None, from).await;
        }
        Err(e) => {
            warn!(%id, error = %e, "failed to persist received file");
            reply_nack(inner, id, None, "storage failure", from).await;
        }
    }
}

/// Strip any path components from an announced file name.
fn safe_file_name(announced: &str) -> String {
    Path::new(announced)
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "download".to_string())
}

async fn reply_ack(inner: &NodeInner, id: &str, seq: Option<u32>, to: SocketAddr) {
    send_reply(
        inner,
        Message::Ack {
            id: id.to_string(),
            seq,
        },
        to,
    )
    .await;
}

async fn reply_nack(inner: &NodeInner, id: &str, seq: Option<u32>, reason: &str, to: SocketAddr) {
    send_reply(
        inner,
        Message::Nack {
            id: id.to_string(),
            seq,
            reason: reason.to_string(),
        },
        to,
    )
    .await;
}

async fn send_reply(inner: &NodeInner, msg: Message, to: SocketAddr) {
    match wire::encode_datagram(&msg) {
        Ok(datagram) => {
            if let Err(e) = inner.socket.send_to(&datagram, to).await {
                debug!(error = %e, %to, "reply send failed");
            }
        }
        Err(e) => debug!(error = %e, "reply encode failed"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn announced_names_lose_their_directories() {
        assert_eq!(safe_file_name("doc.txt"), "doc.txt");
        assert_eq!(safe_file_name("a/b/doc.txt"), "doc.txt");
        assert_eq!(safe_file_name("../../etc/passwd"), "passwd");
        assert_eq!(safe_file_name(".."), "download");
        assert_eq!(safe_file_name(""), "download");
    }
}
