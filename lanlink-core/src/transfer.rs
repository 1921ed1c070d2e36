//! Receiver-side transfer state: accumulate chunks, reassemble, verify.

use std::collections::HashMap;
use std::net::SocketAddr;

use crate::integrity;

/// Fixed protocol chunk size. Never sent on the wire: sender and receiver
/// each derive the chunk count from the announced file size, so both ends
/// must use the same constant.
pub const CHUNK_SIZE: u64 = 4096;

/// Number of chunks a transfer of `size` bytes splits into.
pub fn chunk_count(size: u64) -> u32 {
    ((size + CHUNK_SIZE - 1) / CHUNK_SIZE) as u32
}

/// What happened to an offered chunk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChunkAccept {
    /// New sequence number; payload stored.
    Stored,
    /// Already held; the retransmission is acknowledged but not re-stored.
    Duplicate,
    /// Sequence number at or past the expected count; dropped silently.
    OutOfRange,
}

/// State for one announced inbound transfer. Created on a FILE announce,
/// destroyed at END whether verification succeeds or fails.
pub struct InboundTransfer {
    transfer_id: String,
    file_name: String,
    total_size: u64,
    expected_chunks: u32,
    chunks: HashMap<u32, Vec<u8>>,
    sender: SocketAddr,
}

impl InboundTransfer {
    pub fn new(
        transfer_id: impl Into<String>,
        file_name: impl Into<String>,
        total_size: u64,
        sender: SocketAddr,
    ) -> Self {
        Self {
            transfer_id: transfer_id.into(),
            file_name: file_name.into(),
            total_size,
            expected_chunks: chunk_count(total_size),
            chunks: HashMap::new(),
            sender,
        }
    }

    /// Store one chunk. Idempotent per sequence number; out-of-range numbers
    /// never grow the map past `expected_chunks` entries.
    pub fn accept_chunk(&mut self, seq: u32, data: Vec<u8>) -> ChunkAccept {
        if seq >= self.expected_chunks {
            return ChunkAccept::OutOfRange;
        }
        if self.chunks.contains_key(&seq) {
            return ChunkAccept::Duplicate;
        }
        self.chunks.insert(seq, data);
        ChunkAccept::Stored
    }

    pub fn is_complete(&self) -> bool {
        self.chunks.len() as u32 == self.expected_chunks
    }

    pub fn received(&self) -> u32 {
        self.chunks.len() as u32
    }

    pub fn expected_chunks(&self) -> u32 {
        self.expected_chunks
    }

    pub fn transfer_id(&self) -> &str {
        &self.transfer_id
    }

    pub fn file_name(&self) -> &str {
        &self.file_name
    }

    pub fn total_size(&self) -> u64 {
        self.total_size
    }

    pub fn sender(&self) -> SocketAddr {
        self.sender
    }

    /// Reassemble in ascending sequence order and check the content digest
    /// against the one the sender declared. Consumes the transfer: success
    /// and failure are both terminal.
    pub fn finish(self, declared_hash: &str) -> Result<Vec<u8>, IntegrityError> {
        let mut seqs: Vec<u32> = self.chunks.keys().copied().collect();
        seqs.sort_unstable();
        let mut data = Vec::with_capacity(self.total_size as usize);
        for seq in seqs {
            data.extend_from_slice(&self.chunks[&seq]);
        }
        let computed = integrity::hash_bytes(&data);
        if computed != declared_hash {
            return Err(IntegrityError::HashMismatch {
                declared: declared_hash.to_string(),
                computed,
            });
        }
        Ok(data)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum IntegrityError {
    #[error("content hash mismatch: declared {declared}, computed {computed}")]
    HashMismatch { declared: String, computed: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sender() -> SocketAddr {
        "127.0.0.1:5000".parse().unwrap()
    }

    fn pattern(len: usize) -> Vec<u8> {
        (0..len).map(|i| (i % 251) as u8).collect()
    }

    fn chunks_of(data: &[u8]) -> Vec<(u32, Vec<u8>)> {
        data.chunks(CHUNK_SIZE as usize)
            .enumerate()
            .map(|(i, c)| (i as u32, c.to_vec()))
            .collect()
    }

    #[test]
    fn chunk_count_edges() {
        assert_eq!(chunk_count(0), 0);
        assert_eq!(chunk_count(1), 1);
        assert_eq!(chunk_count(CHUNK_SIZE), 1);
        assert_eq!(chunk_count(CHUNK_SIZE + 1), 2);
        assert_eq!(chunk_count(10_000), 3);
    }

    #[test]
    fn reassembles_regardless_of_arrival_order() {
        let data = pattern(10_000);
        let hash = integrity::hash_bytes(&data);
        let mut chunks = chunks_of(&data);
        chunks.reverse();

        let mut transfer = InboundTransfer::new("t1", "doc.txt", data.len() as u64, sender());
        for (seq, payload) in chunks {
            assert_eq!(transfer.accept_chunk(seq, payload), ChunkAccept::Stored);
        }
        assert!(transfer.is_complete());
        assert_eq!(transfer.finish(&hash).unwrap(), data);
    }

    #[test]
    fn duplicate_chunks_are_not_double_counted() {
        let data = pattern(CHUNK_SIZE as usize * 2);
        let mut transfer = InboundTransfer::new("t1", "doc.txt", data.len() as u64, sender());
        let chunks = chunks_of(&data);

        assert_eq!(
            transfer.accept_chunk(0, chunks[0].1.clone()),
            ChunkAccept::Stored
        );
        assert_eq!(
            transfer.accept_chunk(0, chunks[0].1.clone()),
            ChunkAccept::Duplicate
        );
        assert_eq!(transfer.received(), 1);
        assert!(!transfer.is_complete());
    }

    #[test]
    fn out_of_range_sequence_rejected() {
        let mut transfer = InboundTransfer::new("t1", "doc.txt", 10_000, sender());
        assert_eq!(transfer.expected_chunks(), 3);
        assert_eq!(
            transfer.accept_chunk(3, vec![0u8; 16]),
            ChunkAccept::OutOfRange
        );
        assert_eq!(
            transfer.accept_chunk(u32::MAX, vec![0u8; 16]),
            ChunkAccept::OutOfRange
        );
        assert_eq!(transfer.received(), 0);
    }

    #[test]
    fn corrupted_payload_fails_verification() {
        let data = pattern(6000);
        let hash = integrity::hash_bytes(&data);
        let mut transfer = InboundTransfer::new("t1", "doc.txt", data.len() as u64, sender());
        for (seq, mut payload) in chunks_of(&data) {
            if seq == 1 {
                payload[0] ^= 0xff;
            }
            transfer.accept_chunk(seq, payload);
        }
        let err = transfer.finish(&hash).unwrap_err();
        assert!(matches!(err, IntegrityError::HashMismatch { .. }));
    }

    #[test]
    fn empty_file_completes_with_empty_digest() {
        let transfer = InboundTransfer::new("t1", "empty.txt", 0, sender());
        assert_eq!(transfer.expected_chunks(), 0);
        assert!(transfer.is_complete());
        let data = transfer.finish(&integrity::hash_bytes(b"")).unwrap();
        assert!(data.is_empty());
    }
}
