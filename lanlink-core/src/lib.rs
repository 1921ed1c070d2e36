//! LanLink protocol core: wire codec, peer registry, transfer state.
//! I/O-free; the node crate owns the socket and the background tasks.

pub mod dedup;
pub mod integrity;
pub mod protocol;
pub mod registry;
pub mod transfer;
pub mod wire;

pub use protocol::{fresh_id, Message};
pub use registry::{HeartbeatOutcome, PeerRecord, PeerRegistry};
pub use transfer::{chunk_count, ChunkAccept, InboundTransfer, CHUNK_SIZE};
pub use wire::{decode_datagram, encode_datagram, WireDecodeError, WireEncodeError};
