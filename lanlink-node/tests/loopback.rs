//! Two-node scenarios on the loopback interface. Heartbeats are directed at
//! 127.0.0.1 across a small port span so nodes find each other without real
//! broadcast.

use std::net::{IpAddr, Ipv4Addr};
use std::path::Path;
use std::sync::Mutex;
use std::time::Duration;

use lanlink_node::{Node, NodeConfig, NodeEvent, SendError, SendFileError};

fn loopback_config(span_start: u16, span_len: u16, download_dir: &Path) -> NodeConfig {
    NodeConfig {
        broadcast_addr: IpAddr::V4(Ipv4Addr::LOCALHOST),
        port_span_start: span_start,
        port_span_len: span_len,
        heartbeat_interval_ms: 200,
        liveness_timeout_ms: 2000,
        liveness_sweep_interval_ms: 100,
        retry_sweep_interval_ms: 50,
        retry_timeout_ms: 300,
        retry_bound: 3,
        max_transfer_size: 100 * 1024 * 1024,
        download_dir: download_dir.to_path_buf(),
    }
}

async fn wait_until<F, Fut>(mut condition: F, deadline: Duration) -> bool
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = bool>,
{
    let start = tokio::time::Instant::now();
    while start.elapsed() < deadline {
        if condition().await {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    false
}

async fn knows_peer(node: &Node, peer: &str) -> bool {
    node.list_peers().await.iter().any(|p| p.name == peer)
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn peers_discover_each_other() {
    let dir = tempfile::tempdir().unwrap();
    let alice = Node::start("alice", 47000, loopback_config(47000, 2, dir.path()))
        .await
        .unwrap();
    let bob = Node::start("bob", 47001, loopback_config(47000, 2, dir.path()))
        .await
        .unwrap();

    assert!(wait_until(|| knows_peer(&bob, "alice"), Duration::from_secs(5)).await);
    assert!(wait_until(|| knows_peer(&alice, "bob"), Duration::from_secs(5)).await);

    // A node never lists itself.
    assert!(!knows_peer(&alice, "alice").await);

    let peers = bob.list_peers().await;
    let alice_row = peers.iter().find(|p| p.name == "alice").unwrap();
    assert!(alice_row.age < Duration::from_secs(2));

    alice.shutdown().await;
    bob.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn silent_peer_is_evicted() {
    let dir = tempfile::tempdir().unwrap();
    let alice = Node::start("alice", 47010, loopback_config(47010, 2, dir.path()))
        .await
        .unwrap();
    let bob = Node::start("bob", 47011, loopback_config(47010, 2, dir.path()))
        .await
        .unwrap();

    assert!(wait_until(|| knows_peer(&alice, "bob"), Duration::from_secs(5)).await);
    bob.shutdown().await;

    // Liveness timeout is 2s in the test config.
    assert!(
        wait_until(
            || async { !knows_peer(&alice, "bob").await },
            Duration::from_secs(5)
        )
        .await
    );
    alice.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn message_is_delivered_and_acknowledged() {
    let dir = tempfile::tempdir().unwrap();
    let alice = Node::start("alice", 47020, loopback_config(47020, 2, dir.path()))
        .await
        .unwrap();
    let bob = Node::start("bob", 47021, loopback_config(47020, 2, dir.path()))
        .await
        .unwrap();
    let mut events = bob.subscribe();

    assert!(wait_until(|| knows_peer(&alice, "bob"), Duration::from_secs(5)).await);
    alice.send_message("bob", "hello over there").await.unwrap();

    let mut delivered = None;
    while let Ok(Ok(event)) =
        tokio::time::timeout(Duration::from_secs(5), events.recv()).await
    {
        if let NodeEvent::MessageReceived { text, .. } = event {
            delivered = Some(text);
            break;
        }
    }
    assert_eq!(delivered.as_deref(), Some("hello over there"));

    alice.shutdown().await;
    bob.shutdown().await;
}

#[tokio::test]
async fn unknown_peer_fails_without_sending() {
    let dir = tempfile::tempdir().unwrap();
    let alice = Node::start("alice", 47030, loopback_config(47030, 1, dir.path()))
        .await
        .unwrap();
    let err = alice.send_message("ghost", "anyone?").await.unwrap_err();
    assert!(matches!(err, SendError::PeerUnknown));
    alice.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn send_times_out_after_the_retry_bound() {
    let dir = tempfile::tempdir().unwrap();
    let alice = Node::start("alice", 47040, loopback_config(47040, 2, dir.path()))
        .await
        .unwrap();
    let bob = Node::start("bob", 47041, loopback_config(47040, 2, dir.path()))
        .await
        .unwrap();

    assert!(wait_until(|| knows_peer(&alice, "bob"), Duration::from_secs(5)).await);
    // Bob leaves but is still in Alice's registry until the liveness timeout.
    bob.shutdown().await;

    let err = alice.send_message("bob", "still there?").await.unwrap_err();
    match err {
        SendError::AckTimeout { attempts } => assert_eq!(attempts, 3),
        other => panic!("expected AckTimeout, got {:?}", other),
    }
    alice.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn file_roundtrip_is_byte_identical() {
    let alice_dir = tempfile::tempdir().unwrap();
    let bob_dir = tempfile::tempdir().unwrap();
    let alice = Node::start("alice", 47050, loopback_config(47050, 2, alice_dir.path()))
        .await
        .unwrap();
    let bob = Node::start("bob", 47051, loopback_config(47050, 2, bob_dir.path()))
        .await
        .unwrap();

    // 10000 bytes -> 3 chunks of 4096.
    let content: Vec<u8> = (0..10_000u32).map(|i| (i % 251) as u8).collect();
    let source = alice_dir.path().join("doc.bin");
    std::fs::write(&source, &content).unwrap();

    assert!(wait_until(|| knows_peer(&alice, "bob"), Duration::from_secs(5)).await);

    let progress = Mutex::new(Vec::new());
    alice
        .send_file_with_progress("bob", &source, |sent, total| {
            progress.lock().unwrap().push((sent, total));
        })
        .await
        .unwrap();
    assert_eq!(*progress.lock().unwrap(), [(1, 3), (2, 3), (3, 3)]);

    // The finalize ack is sent after persistence, so the file exists by now.
    let received = bob_dir.path().join("received_doc.bin");
    assert_eq!(std::fs::read(&received).unwrap(), content);

    alice.shutdown().await;
    bob.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn empty_file_transfers_cleanly() {
    let alice_dir = tempfile::tempdir().unwrap();
    let bob_dir = tempfile::tempdir().unwrap();
    let alice = Node::start("alice", 47060, loopback_config(47060, 2, alice_dir.path()))
        .await
        .unwrap();
    let bob = Node::start("bob", 47061, loopback_config(47060, 2, bob_dir.path()))
        .await
        .unwrap();

    let source = alice_dir.path().join("empty.txt");
    std::fs::write(&source, b"").unwrap();

    assert!(wait_until(|| knows_peer(&alice, "bob"), Duration::from_secs(5)).await);
    alice.send_file("bob", &source).await.unwrap();

    let received = bob_dir.path().join("received_empty.txt");
    assert_eq!(std::fs::read(&received).unwrap(), b"");

    alice.shutdown().await;
    bob.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn oversized_announce_is_rejected_before_any_chunk() {
    let alice_dir = tempfile::tempdir().unwrap();
    let bob_dir = tempfile::tempdir().unwrap();
    let alice = Node::start("alice", 47070, loopback_config(47070, 2, alice_dir.path()))
        .await
        .unwrap();
    let mut small = loopback_config(47070, 2, bob_dir.path());
    small.max_transfer_size = 1000;
    let bob = Node::start("bob", 47071, small).await.unwrap();

    let source = alice_dir.path().join("big.bin");
    std::fs::write(&source, vec![0u8; 5000]).unwrap();

    assert!(wait_until(|| knows_peer(&alice, "bob"), Duration::from_secs(5)).await);
    let err = alice.send_file("bob", &source).await.unwrap_err();
    match err {
        SendFileError::Announce(SendError::Rejected(reason)) => {
            assert_eq!(reason, "too large")
        }
        other => panic!("expected a rejected announce, got {:?}", other),
    }
    assert!(!bob_dir.path().join("received_big.bin").exists());

    alice.shutdown().await;
    bob.shutdown().await;
}
