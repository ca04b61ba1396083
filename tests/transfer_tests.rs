//! End-to-end tests for the file-transfer protocol.
//!
//! Each test spins up a real server and client in-process, talking UDP over
//! the loopback interface.  The server runs as a background tokio task and is
//! aborted when the test finishes; timings are shrunk via the config structs
//! so the suite stays fast.

use std::cell::Cell;
use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;

use tokio::task::JoinHandle;

use udp_fetch::client;
use udp_fetch::receiver::{ReceiverConfig, TransferError};
use udp_fetch::sender::SenderConfig;
use udp_fetch::server::FileServer;

/// Server timings tuned for loopback tests.
fn fast_sender() -> SenderConfig {
    SenderConfig {
        retransmit_timeout: Duration::from_millis(100),
        max_retries: 10,
        linger_window: Duration::from_secs(2),
    }
}

/// A sender that never retransmits on its own within the test window, so
/// every recovered segment is attributable to the client's RESEND path.
fn resend_only_sender() -> SenderConfig {
    SenderConfig {
        retransmit_timeout: Duration::from_secs(60),
        max_retries: 10,
        linger_window: Duration::from_secs(60),
    }
}

fn fast_receiver(loss: u8) -> ReceiverConfig {
    ReceiverConfig {
        gap_scan_interval: Duration::from_millis(100),
        max_resend_batch: 64,
        idle_timeout: Duration::from_secs(10),
        loss_pct: loss,
    }
}

/// Deterministic, non-repeating-enough content for byte-equality checks.
fn patterned(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i.wrapping_mul(31) % 251) as u8).collect()
}

/// Bind a server on an ephemeral loopback port, serving `root`.
async fn start_server(root: &Path, config: SenderConfig) -> (SocketAddr, JoinHandle<()>) {
    let server = FileServer::bind(
        "127.0.0.1:0".parse().unwrap(),
        root.to_path_buf(),
        config,
    )
    .await
    .expect("bind failed");
    let addr = server.local_addr();
    let handle = tokio::spawn(async move {
        let _ = server.run().await;
    });
    (addr, handle)
}

/// Fetch `name` into a temp file and return its contents.
async fn fetch_bytes(
    server: SocketAddr,
    name: &str,
    config: ReceiverConfig,
) -> Result<Vec<u8>, TransferError> {
    let dir = tempfile::tempdir().unwrap();
    let out = dir.path().join("out.bin");
    client::fetch(server, name, config, || std::fs::File::create(&out)).await?;
    Ok(std::fs::read(&out).unwrap())
}

// ---------------------------------------------------------------------------
// Test 1: zero-byte file — one empty DATA with LAST
// ---------------------------------------------------------------------------

#[tokio::test]
async fn zero_byte_file_transfers_cleanly() {
    let root = tempfile::tempdir().unwrap();
    std::fs::write(root.path().join("empty.dat"), b"").unwrap();
    let (addr, server) = start_server(root.path(), fast_sender()).await;

    let dir = tempfile::tempdir().unwrap();
    let out = dir.path().join("out.bin");
    let report = client::fetch(addr, "empty.dat", fast_receiver(0), || {
        std::fs::File::create(&out)
    })
    .await
    .expect("transfer failed");

    assert_eq!(report.total_segs, 1);
    assert_eq!(report.bytes, 0);
    assert_eq!(std::fs::read(&out).unwrap(), b"");

    server.abort();
}

// ---------------------------------------------------------------------------
// Test 2: multi-segment transfer, no loss — byte-identical output
// ---------------------------------------------------------------------------

#[tokio::test]
async fn multi_segment_round_trip() {
    // 300 full segments plus a partial tail at MAX_PAYLOAD = 1024.
    let data = patterned(300 * 1024 + 217);
    let root = tempfile::tempdir().unwrap();
    std::fs::write(root.path().join("blob.bin"), &data).unwrap();
    let (addr, server) = start_server(root.path(), fast_sender()).await;

    let dir = tempfile::tempdir().unwrap();
    let out = dir.path().join("out.bin");
    let report = client::fetch(addr, "blob.bin", fast_receiver(0), || {
        std::fs::File::create(&out)
    })
    .await
    .expect("transfer failed");

    assert_eq!(report.total_segs, 301);
    assert_eq!(report.bytes, data.len() as u64);
    assert_eq!(std::fs::read(&out).unwrap(), data);

    server.abort();
}

// ---------------------------------------------------------------------------
// Test 3: lossy link — recovery is driven by the client's RESEND requests
// ---------------------------------------------------------------------------

#[tokio::test]
async fn lossy_transfer_recovers_via_resend() {
    let data = patterned(64 * 1024);
    let root = tempfile::tempdir().unwrap();
    std::fs::write(root.path().join("lossy.bin"), &data).unwrap();
    // The server will not retransmit on its own: every hole must be found by
    // the receiver's gap scan and filled through RESEND.
    let (addr, server) = start_server(root.path(), resend_only_sender()).await;

    // DATA datagrams that reached the receive boundary, whatever became of
    // them: the transfer's footprint on the wire.
    fn wire_datagrams(report: &udp_fetch::report::TransferReport) -> u64 {
        report.counters.stored + report.counters.duplicates + report.counters.injected_drops
    }

    // No-loss baseline over the same server and file.
    let dir = tempfile::tempdir().unwrap();
    let baseline_out = dir.path().join("baseline.bin");
    let baseline = client::fetch(addr, "lossy.bin", fast_receiver(0), || {
        std::fs::File::create(&baseline_out)
    })
    .await
    .expect("baseline transfer failed");
    assert_eq!(std::fs::read(&baseline_out).unwrap(), data);

    let out = dir.path().join("out.bin");
    let report = client::fetch(addr, "lossy.bin", fast_receiver(20), || {
        std::fs::File::create(&out)
    })
    .await
    .expect("transfer failed");

    assert_eq!(std::fs::read(&out).unwrap(), data);
    // 64 segments at 20% loss: some drops and at least one RESEND round are
    // a statistical certainty.
    assert!(report.counters.injected_drops > 0, "loss injection never fired");
    assert!(report.counters.resend_requests > 0, "no RESEND was needed");
    // Every injected drop forces a retransmission, so the lossy run costs
    // strictly more wire traffic than the clean one.
    assert!(
        wire_datagrams(&report) > wire_datagrams(&baseline),
        "lossy run ({} DATA datagrams) should exceed the no-loss baseline ({})",
        wire_datagrams(&report),
        wire_datagrams(&baseline)
    );

    server.abort();
}

// ---------------------------------------------------------------------------
// Test 4: unknown file — ERR comes back, nothing is written
// ---------------------------------------------------------------------------

#[tokio::test]
async fn unknown_file_yields_server_error_and_no_sink() {
    let root = tempfile::tempdir().unwrap();
    let (addr, server) = start_server(root.path(), fast_sender()).await;

    let opened = Cell::new(false);
    let result = client::fetch(addr, "missing.dat", fast_receiver(0), || {
        opened.set(true);
        Ok(Vec::<u8>::new())
    })
    .await;

    match result {
        Err(TransferError::ServerRejected(msg)) => {
            assert!(msg.contains("missing.dat"), "unexpected diagnostic: {msg}")
        }
        other => panic!("expected ServerRejected, got {other:?}"),
    }
    assert!(!opened.get(), "sink must not be opened on failure");

    server.abort();
}

// ---------------------------------------------------------------------------
// Test 5: path traversal — refused before touching the filesystem
// ---------------------------------------------------------------------------

#[tokio::test]
async fn traversal_request_is_refused() {
    let root = tempfile::tempdir().unwrap();
    std::fs::write(root.path().join("real.dat"), b"data").unwrap();
    let (addr, server) = start_server(root.path(), fast_sender()).await;

    let result = fetch_bytes(addr, "../real.dat", fast_receiver(0)).await;
    match result {
        Err(TransferError::ServerRejected(msg)) => {
            assert!(msg.contains("forbidden"), "unexpected diagnostic: {msg}")
        }
        other => panic!("expected ServerRejected, got {other:?}"),
    }

    server.abort();
}

// ---------------------------------------------------------------------------
// Test 6: two clients, two files, one server — sessions stay isolated
// ---------------------------------------------------------------------------

#[tokio::test]
async fn concurrent_clients_are_isolated() {
    let data_a = patterned(40 * 1024);
    let data_b: Vec<u8> = patterned(55 * 1024).iter().map(|b| b ^ 0xFF).collect();
    let root = tempfile::tempdir().unwrap();
    std::fs::write(root.path().join("a.bin"), &data_a).unwrap();
    std::fs::write(root.path().join("b.bin"), &data_b).unwrap();
    let (addr, server) = start_server(root.path(), fast_sender()).await;

    let (got_a, got_b) = tokio::join!(
        fetch_bytes(addr, "a.bin", fast_receiver(0)),
        fetch_bytes(addr, "b.bin", fast_receiver(0)),
    );

    assert_eq!(got_a.expect("client A failed"), data_a);
    assert_eq!(got_b.expect("client B failed"), data_b);

    server.abort();
}
