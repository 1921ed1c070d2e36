//! LanLink node runtime: socket ownership, background tasks, public operations.
//! Protocol state machines live in `lanlink-core`; this crate wires them to
//! a UDP socket and a tokio runtime.

pub mod config;
pub mod dispatcher;
pub mod node;
pub mod reliable;
pub mod sendfile;

pub use config::NodeConfig;
pub use node::{Node, NodeEvent, PeerInfo};
pub use reliable::SendError;
pub use sendfile::SendFileError;
