//! LanLink wire protocol: message kinds exchanged between nodes.

use serde::{Deserialize, Serialize};

/// All wire message types. One UDP datagram carries exactly one encoded message.
/// Encoding is bincode (see the wire module); chunk payloads are raw bytes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Message {
    /// Presence broadcast: advertise this node by name.
    Heartbeat { id: String, name: String },
    /// Short text message, delivered at most once to the application.
    Talk { id: String, text: String },
    /// Announce a file transfer: original file name and total size in bytes.
    File {
        id: String,
        file_name: String,
        size: u64,
    },
    /// One block of file data. `seq` counts from zero.
    Chunk { id: String, seq: u32, data: Vec<u8> },
    /// Transfer complete: hex sha-256 of the whole file.
    End { id: String, hash: String },
    /// Confirm receipt. `seq` is set only when acknowledging a single chunk.
    Ack { id: String, seq: Option<u32> },
    /// Reject. `seq` as for Ack; `reason` is rendered to the user as-is.
    Nack {
        id: String,
        seq: Option<u32>,
        reason: String,
    },
}

impl Message {
    /// Envelope id carried by every kind.
    pub fn id(&self) -> &str {
        match self {
            Message::Heartbeat { id, .. }
            | Message::Talk { id, .. }
            | Message::File { id, .. }
            | Message::Chunk { id, .. }
            | Message::End { id, .. }
            | Message::Ack { id, .. }
            | Message::Nack { id, .. } => id,
        }
    }

    /// True for Ack/Nack: replies are never themselves acknowledged.
    pub fn is_reply(&self) -> bool {
        matches!(self, Message::Ack { .. } | Message::Nack { .. })
    }

    /// Short kind tag for logs and dedup keying.
    pub fn kind(&self) -> &'static str {
        match self {
            Message::Heartbeat { .. } => "heartbeat",
            Message::Talk { .. } => "talk",
            Message::File { .. } => "file",
            Message::Chunk { .. } => "chunk",
            Message::End { .. } => "end",
            Message::Ack { .. } => "ack",
            Message::Nack { .. } => "nack",
        }
    }
}

/// New message/transfer id: sender name plus a random component, so ids from
/// different nodes cannot collide and repeats from one node are distinct.
pub fn fresh_id(name: &str) -> String {
    format!("{}-{}", name, uuid::Uuid::new_v4().simple())
}
