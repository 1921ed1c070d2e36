//! Peer registry: who is on the network, where, and when last heard from.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::time::{Duration, Instant};

/// How long a peer may stay silent before the sweep drops it.
pub const DEFAULT_LIVENESS_TIMEOUT: Duration = Duration::from_secs(10);

/// One known peer. Keyed by name; the address is whatever the most recent
/// heartbeat arrived from.
#[derive(Debug, Clone)]
pub struct PeerRecord {
    pub name: String,
    pub addr: SocketAddr,
    pub last_seen: Instant,
}

/// What a heartbeat did to the registry. Callers log discovery and rebinding.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeartbeatOutcome {
    /// First time this name was seen.
    Discovered,
    /// Known peer, same address.
    Refreshed,
    /// Known peer announcing from a new address; the record was overwritten.
    /// Expected when a peer changed networks, not an error.
    Rebound,
    /// Our own broadcast echoed back; discarded.
    SelfHeartbeat,
}

/// Name -> address/liveness mapping. Time is passed in by the caller so the
/// sweep and the tests control the clock the same way.
pub struct PeerRegistry {
    local_name: String,
    peers: HashMap<String, PeerRecord>,
}

impl PeerRegistry {
    pub fn new(local_name: impl Into<String>) -> Self {
        Self {
            local_name: local_name.into(),
            peers: HashMap::new(),
        }
    }

    /// Upsert a peer record from a received heartbeat.
    pub fn record_heartbeat(
        &mut self,
        name: &str,
        addr: SocketAddr,
        now: Instant,
    ) -> HeartbeatOutcome {
        if name == self.local_name {
            return HeartbeatOutcome::SelfHeartbeat;
        }
        let outcome = match self.peers.get(name) {
            None => HeartbeatOutcome::Discovered,
            Some(rec) if rec.addr != addr => HeartbeatOutcome::Rebound,
            Some(_) => HeartbeatOutcome::Refreshed,
        };
        self.peers.insert(
            name.to_string(),
            PeerRecord {
                name: name.to_string(),
                addr,
                last_seen: now,
            },
        );
        outcome
    }

    /// Drop every record older than `timeout`. Returns the evicted records so
    /// the caller can log them and notify the application.
    pub fn sweep_stale(&mut self, now: Instant, timeout: Duration) -> Vec<PeerRecord> {
        let stale: Vec<String> = self
            .peers
            .iter()
            .filter(|(_, rec)| now.duration_since(rec.last_seen) > timeout)
            .map(|(name, _)| name.clone())
            .collect();
        stale
            .iter()
            .filter_map(|name| self.peers.remove(name))
            .collect()
    }

    /// Address of a live peer, if known.
    pub fn resolve(&self, name: &str) -> Option<SocketAddr> {
        self.peers.get(name).map(|rec| rec.addr)
    }

    /// Read-only view for listing.
    pub fn snapshot(&self) -> Vec<PeerRecord> {
        self.peers.values().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.peers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.peers.is_empty()
    }
}
