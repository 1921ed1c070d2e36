//! Load node configuration from file and environment.

use std::net::{IpAddr, Ipv4Addr};
use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;

/// Node tunables. File: ~/.config/lanlink/config.toml or /etc/lanlink/config.toml.
/// Env overrides: LANLINK_BROADCAST_ADDR, LANLINK_PORT_SPAN_START, LANLINK_DOWNLOAD_DIR.
/// The node name and bind port are runtime arguments, not configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct NodeConfig {
    /// Address heartbeats are broadcast to (default 255.255.255.255).
    #[serde(default = "default_broadcast_addr")]
    pub broadcast_addr: IpAddr,
    /// First port of the span heartbeats are sent to (default 5000).
    #[serde(default = "default_port_span_start")]
    pub port_span_start: u16,
    /// Number of consecutive ports covered by each broadcast (default 10).
    #[serde(default = "default_port_span_len")]
    pub port_span_len: u16,
    /// Interval between presence broadcasts in ms (default 5000).
    #[serde(default = "default_heartbeat_interval_ms")]
    pub heartbeat_interval_ms: u64,
    /// Silence after which a peer is dropped, in ms (default 10000).
    #[serde(default = "default_liveness_timeout_ms")]
    pub liveness_timeout_ms: u64,
    /// Cadence of the staleness sweep in ms (default 1000).
    #[serde(default = "default_liveness_sweep_interval_ms")]
    pub liveness_sweep_interval_ms: u64,
    /// Cadence of the retransmission sweep in ms (default 100).
    #[serde(default = "default_retry_sweep_interval_ms")]
    pub retry_sweep_interval_ms: u64,
    /// Age at which an unacknowledged send is retransmitted, in ms (default 1000).
    #[serde(default = "default_retry_timeout_ms")]
    pub retry_timeout_ms: u64,
    /// Total transmissions before a send fails terminally (default 3).
    #[serde(default = "default_retry_bound")]
    pub retry_bound: u32,
    /// Largest announced file size this node accepts, in bytes (default 100 MiB).
    #[serde(default = "default_max_transfer_size")]
    pub max_transfer_size: u64,
    /// Directory received files are written to (default current directory).
    #[serde(default = "default_download_dir")]
    pub download_dir: PathBuf,
}

fn default_broadcast_addr() -> IpAddr {
    IpAddr::V4(Ipv4Addr::BROADCAST)
}
fn default_port_span_start() -> u16 {
    5000
}
fn default_port_span_len() -> u16 {
    10
}
fn default_heartbeat_interval_ms() -> u64 {
    5000
}
fn default_liveness_timeout_ms() -> u64 {
    10_000
}
fn default_liveness_sweep_interval_ms() -> u64 {
    1000
}
fn default_retry_sweep_interval_ms() -> u64 {
    100
}
fn default_retry_timeout_ms() -> u64 {
    1000
}
fn default_retry_bound() -> u32 {
    3
}
fn default_max_transfer_size() -> u64 {
    100 * 1024 * 1024
}
fn default_download_dir() -> PathBuf {
    PathBuf::from(".")
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            broadcast_addr: default_broadcast_addr(),
            port_span_start: default_port_span_start(),
            port_span_len: default_port_span_len(),
            heartbeat_interval_ms: default_heartbeat_interval_ms(),
            liveness_timeout_ms: default_liveness_timeout_ms(),
            liveness_sweep_interval_ms: default_liveness_sweep_interval_ms(),
            retry_sweep_interval_ms: default_retry_sweep_interval_ms(),
            retry_timeout_ms: default_retry_timeout_ms(),
            retry_bound: default_retry_bound(),
            max_transfer_size: default_max_transfer_size(),
            download_dir: default_download_dir(),
        }
    }
}

impl NodeConfig {
    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_millis(self.heartbeat_interval_ms)
    }

    pub fn liveness_timeout(&self) -> Duration {
        Duration::from_millis(self.liveness_timeout_ms)
    }

    pub fn liveness_sweep_interval(&self) -> Duration {
        Duration::from_millis(self.liveness_sweep_interval_ms)
    }

    pub fn retry_sweep_interval(&self) -> Duration {
        Duration::from_millis(self.retry_sweep_interval_ms)
    }

    pub fn retry_timeout(&self) -> Duration {
        Duration::from_millis(self.retry_timeout_ms)
    }

    /// Ports the heartbeat broadcaster targets.
    pub fn port_span(&self) -> impl Iterator<Item = u16> {
        let start = self.port_span_start;
        (0..self.port_span_len).map(move |i| start.saturating_add(i))
    }
}

/// Load config: defaults, then config file (if present), then env vars.
pub fn load() -> NodeConfig {
    let mut c = load_file().unwrap_or_default();
    if let Ok(s) = std::env::var("LANLINK_BROADCAST_ADDR") {
        if let Ok(a) = s.parse::<IpAddr>() {
            c.broadcast_addr = a;
        }
    }
    if let Ok(s) = std::env::var("LANLINK_PORT_SPAN_START") {
        if let Ok(p) = s.parse::<u16>() {
            c.port_span_start = p;
        }
    }
    if let Ok(s) = std::env::var("LANLINK_DOWNLOAD_DIR") {
        c.download_dir = PathBuf::from(s);
    }
    c
}

fn config_paths() -> Vec<PathBuf> {
    let mut out = Vec::new();
    if let Some(home) = std::env::var_os("HOME").map(PathBuf::from) {
        out.push(home.join(".config/lanlink/config.toml"));
    }
    out.push(PathBuf::from("/etc/lanlink/config.toml"));
    out
}

fn load_file() -> Option<NodeConfig> {
    for p in config_paths() {
        if p.exists() {
            if let Ok(s) = std::fs::read_to_string(&p) {
                if let Ok(c) = toml::from_str::<NodeConfig>(&s) {
                    return Some(c);
                }
            }
            break;
        }
    }
    None
}
