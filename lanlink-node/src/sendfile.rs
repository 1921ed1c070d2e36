//! Sender-side file transfer: announce, stream chunks one at a time,
//! finalize with a content digest.

use std::path::Path;

use lanlink_core::integrity::StreamingHash;
use lanlink_core::protocol::{fresh_id, Message};
use lanlink_core::transfer::{chunk_count, CHUNK_SIZE};
use tokio::fs::File;
use tokio::io::AsyncReadExt;
use tracing::{debug, info};

use crate::node::NodeInner;
use crate::reliable::{self, SendError};

/// Failure modes of a file transfer, in phase order.
#[derive(Debug, thiserror::Error)]
pub enum SendFileError {
    #[error("transfer announce failed: {0}")]
    Announce(#[source] SendError),
    #[error("chunk {seq} failed: {source}")]
    Chunk {
        seq: u32,
        #[source]
        source: SendError,
    },
    #[error("receiver rejected the transfer: {reason}")]
    IntegrityRejected { reason: String },
    #[error("no acknowledgment for the transfer finalize")]
    FinalizeTimeout,
    #[error("transfer finalize failed: {0}")]
    Finalize(#[source] SendError),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

pub(crate) type ProgressFn<'a> = Option<&'a (dyn Fn(u32, u32) + Send + Sync)>;

/// Three ordered phases, each a barrier on the previous: announce the file,
/// send every chunk with exactly one in flight, then declare the digest.
pub(crate) async fn send_file(
    inner: &NodeInner,
    peer: &str,
    path: &Path,
    progress: ProgressFn<'_>,
) -> Result<(), SendFileError> {
    let meta = tokio::fs::metadata(path).await?;
    if !meta.is_file() {
        return Err(
            std::io::Error::new(std::io::ErrorKind::InvalidInput, "not a regular file").into(),
        );
    }
    let size = meta.len();
    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .ok_or_else(|| {
            std::io::Error::new(std::io::ErrorKind::InvalidInput, "path has no file name")
        })?;
    let id = fresh_id(&inner.name);
    let total = chunk_count(size);
    info!(peer, file = %file_name, size, chunks = total, "starting file transfer");

    reliable::send_reliable(
        inner,
        peer,
        Message::File {
            id: id.clone(),
            file_name,
            size,
        },
    )
    .await
    .map_err(SendFileError::Announce)?;

    let mut file = File::open(path).await?;
    let mut buf = vec![0u8; CHUNK_SIZE as usize];
    for seq in 0..total {
        let n = read_chunk(&mut file, &mut buf).await?;
        let msg = Message::Chunk {
            id: id.clone(),
            seq,
            data: buf[..n].to_vec(),
        };
        reliable::send_reliable(inner, peer, msg)
            .await
            .map_err(|source| SendFileError::Chunk { seq, source })?;
        debug!(seq, total, "chunk acknowledged");
        if let Some(report) = progress {
            report(seq + 1, total);
        }
    }

    // Digest from a second read of the file: it covers what is on disk, not
    // what was buffered for sending.
    let hash = hash_file(path).await?;
    match reliable::send_reliable(inner, peer, Message::End { id, hash }).await {
        Ok(()) => {
            info!(peer, "file transfer complete");
            Ok(())
        }
        Err(SendError::Rejected(reason)) => Err(SendFileError::IntegrityRejected { reason }),
        Err(SendError::AckTimeout { .. }) => Err(SendFileError::FinalizeTimeout),
        Err(e) => Err(SendFileError::Finalize(e)),
    }
}

/// Fill `buf` from the file, tolerating short reads. Returns the bytes read,
/// less than the buffer only at end of file.
async fn read_chunk(file: &mut File, buf: &mut [u8]) -> std::io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        let n = file.read(&mut buf[filled..]).await?;
        if n == 0 {
            break;
        }
        filled += n;
    }
    Ok(filled)
}

async fn hash_file(path: &Path) -> std::io::Result<String> {
    let mut file = File::open(path).await?;
    let mut hasher = StreamingHash::new();
    let mut buf = vec![0u8; CHUNK_SIZE as usize];
    loop {
        let n = file.read(&mut buf).await?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(hasher.finish())
}
