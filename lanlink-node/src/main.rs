//! LanLink daemon: bind a node and drive it from a line-oriented shell.

use std::path::PathBuf;

use anyhow::Context;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing_subscriber::EnvFilter;

use lanlink_node::{config, Node, NodeEvent};

const VERSION: &str = env!("CARGO_PKG_VERSION");

fn main() -> anyhow::Result<()> {
    let args: Vec<String> = std::env::args().skip(1).collect();
    if args.iter().any(|a| a == "--version" || a == "-V") {
        println!("lanlink-node {}", VERSION);
        return Ok(());
    }
    let (name, port) = match args.as_slice() {
        [name, port] => (
            name.clone(),
            port.parse::<u16>().context("port must be an integer")?,
        ),
        _ => {
            eprintln!("usage: lanlink-node <name> <port>");
            std::process::exit(2);
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cfg = config::load();
    let rt = tokio::runtime::Runtime::new()?;
    rt.block_on(run(name, port, cfg))
}

async fn run(name: String, port: u16, cfg: config::NodeConfig) -> anyhow::Result<()> {
    let node = Node::start(&name, port, cfg)
        .await
        .context("failed to bind socket")?;

    let mut events = node.subscribe();
    tokio::spawn(async move {
        while let Ok(event) = events.recv().await {
            match event {
                NodeEvent::MessageReceived { from, text } => {
                    println!("message from {}: {}", from, text)
                }
                NodeEvent::FileReceived { path, from } => {
                    println!("file from {} saved as {}", from, path.display())
                }
                NodeEvent::PeerDiscovered { name, addr } => {
                    println!("peer {} joined from {}", name, addr)
                }
                NodeEvent::PeerExpired { name } => println!("peer {} left", name),
            }
        }
    });

    println!("commands: peers | talk <name> <text> | sendfile <name> <path> | quit");
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            line = lines.next_line() => {
                let Some(line) = line? else { break };
                if !handle_command(&node, line.trim()).await {
                    break;
                }
            }
        }
    }
    node.shutdown().await;
    Ok(())
}

/// Run one shell command. Returns false when the session should end.
async fn handle_command(node: &Node, line: &str) -> bool {
    let mut parts = line.split_whitespace();
    match parts.next() {
        None => true,
        Some("quit") | Some("exit") => false,
        Some("peers") => {
            let peers = node.list_peers().await;
            if peers.is_empty() {
                println!("no active peers");
            }
            for p in peers {
                println!(
                    "{}  {}  last heartbeat {:.1}s ago",
                    p.name,
                    p.addr,
                    p.age.as_secs_f64()
                );
            }
            true
        }
        Some("talk") => {
            let Some(peer) = parts.next() else {
                println!("usage: talk <name> <text>");
                return true;
            };
            let words: Vec<&str> = parts.collect();
            if words.is_empty() {
                println!("usage: talk <name> <text>");
                return true;
            }
            match node.send_message(peer, &words.join(" ")).await {
                Ok(()) => println!("delivered to {}", peer),
                Err(e) => println!("send failed: {}", e),
            }
            true
        }
        Some("sendfile") => {
            let (Some(peer), Some(path)) = (parts.next(), parts.next()) else {
                println!("usage: sendfile <name> <path>");
                return true;
            };
            let path = PathBuf::from(path);
            let outcome = node
                .send_file_with_progress(peer, &path, |sent, total| {
                    println!("sent chunk {}/{}", sent, total);
                })
                .await;
            match outcome {
                Ok(()) => println!("transfer complete"),
                Err(e) => println!("transfer failed: {}", e),
            }
            true
        }
        Some(other) => {
            println!("unknown command: {}", other);
            true
        }
    }
}
