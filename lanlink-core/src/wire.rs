//! Datagram codec: one message per datagram, bincode-encoded.

use crate::protocol::Message;

/// Max encoded datagram. Chunk payloads are 4 KiB, so real traffic stays far
/// below this; the cap bounds what a hostile sender can make us allocate.
pub const MAX_DATAGRAM_LEN: usize = 64 * 1024;

/// Encode a message into a single datagram payload.
pub fn encode_datagram(msg: &Message) -> Result<Vec<u8>, WireEncodeError> {
    let payload = bincode::serialize(msg).map_err(WireEncodeError::Encode)?;
    if payload.len() > MAX_DATAGRAM_LEN {
        return Err(WireEncodeError::TooLarge);
    }
    Ok(payload)
}

/// Error encoding a message (bincode or size limit).
#[derive(Debug, thiserror::Error)]
pub enum WireEncodeError {
    #[error("encode error: {0}")]
    Encode(#[from] bincode::Error),
    #[error("datagram too large")]
    TooLarge,
}

/// Decode one received datagram. Malformed input is an error, never a panic;
/// the receive loop drops the datagram and carries on.
pub fn decode_datagram(bytes: &[u8]) -> Result<Message, WireDecodeError> {
    if bytes.len() > MAX_DATAGRAM_LEN {
        return Err(WireDecodeError::TooLarge);
    }
    bincode::deserialize(bytes).map_err(WireDecodeError::Decode)
}

/// Error decoding a datagram (size limit or bincode failure).
#[derive(Debug, thiserror::Error)]
pub enum WireDecodeError {
    #[error("datagram too large")]
    TooLarge,
    #[error("decode error: {0}")]
    Decode(#[from] bincode::Error),
}
