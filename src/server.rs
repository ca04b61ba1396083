//! Server side: datagram dispatcher and per-session workers.
//!
//! # Architecture
//!
//! ```text
//!                    ┌────────────────────────────┐
//!   UDP datagrams ──▶│  dispatcher (run loop)     │
//!                    │  decode → route by addr    │
//!                    └──────┬──────────┬──────────┘
//!                           │ REQ      │ ACK / RESEND
//!                           ▼          ▼
//!                    spawn worker   session inbox (mpsc)
//!                           │          │
//!                    ┌──────▼──────────▼──────────┐
//!                    │ session worker (one/client)│
//!                    │  Segmenter + SendSession   │──▶ DATA / ERR out
//!                    └────────────────────────────┘
//! ```
//!
//! The dispatcher owns the routing table and never awaits anything per
//! datagram: one decode, then either a non-blocking channel send or a task
//! spawn (new sessions and rejection replies run on their own tasks), so a
//! slow session can never stall inbound traffic.  Each worker owns its
//! session state exclusively and talks to the world through the shared
//! socket (datagram writes are atomic) and its single-producer inbox.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use thiserror::Error;
use tokio::sync::mpsc;

use crate::packet::{parse_get, parse_resend, Packet, PacketType};
use crate::segment::Segmenter;
use crate::sender::{SendError, SendSession, SenderConfig, SessionStatus};
use crate::socket::{PacketSocket, SocketError};

/// Datagrams a session inbox can hold before the dispatcher starts dropping.
/// Sized for the ACK flood a pipelined send provokes; overflow is recovered
/// by retransmission like any other loss.
const INBOX_CAPACITY: usize = 1024;

/// Segments sent back-to-back before yielding, so the dispatcher and sibling
/// sessions stay live under a long burst.
const BURST_LEN: usize = 32;

// ---------------------------------------------------------------------------
// Error types
// ---------------------------------------------------------------------------

/// Why a request was refused; the rendered message becomes the ERR payload.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RequestError {
    #[error("'{0}' not found")]
    UnknownFile(String),
    #[error("forbidden path '{0}'")]
    ForbiddenPath(String),
}

/// Why a session worker stopped early.  Logged, never sent to the peer.
#[derive(Debug, Error)]
enum SessionError {
    #[error(transparent)]
    Socket(#[from] SocketError),
    #[error(transparent)]
    Send(#[from] SendError),
    #[error("linger window elapsed with {unacked} segment(s) unacked")]
    Incomplete { unacked: usize },
    #[error("peer aborted: {0}")]
    PeerAborted(String),
    #[error("dispatcher shut down")]
    DispatcherGone,
}

// ---------------------------------------------------------------------------
// FileServer
// ---------------------------------------------------------------------------

/// One listening endpoint serving files under a root directory.
pub struct FileServer {
    socket: Arc<PacketSocket>,
    root: PathBuf,
    config: SenderConfig,
}

impl FileServer {
    /// Bind the serving socket.  `root` is the directory request names are
    /// resolved against.
    pub async fn bind(
        addr: SocketAddr,
        root: impl Into<PathBuf>,
        config: SenderConfig,
    ) -> std::io::Result<Self> {
        let socket = Arc::new(PacketSocket::bind(addr).await?);
        Ok(Self {
            socket,
            root: root.into(),
            config,
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.socket.local_addr
    }

    /// Run the dispatcher until the socket fails.
    ///
    /// Inbound datagrams are decoded and routed: traffic for a live session
    /// goes to its inbox, a fresh `GET /` spawns a worker, everything else is
    /// dropped.  Worker completions come back over `done` so the routing
    /// table stays tight.
    pub async fn run(self) -> std::io::Result<()> {
        let mut sessions: HashMap<SocketAddr, mpsc::Sender<Packet>> = HashMap::new();
        let (done_tx, mut done_rx) = mpsc::channel::<SocketAddr>(INBOX_CAPACITY);

        log::info!(
            "[server] listening on {}, serving '{}'",
            self.socket.local_addr,
            self.root.display()
        );

        loop {
            tokio::select! {
                received = self.socket.recv_raw() => {
                    let (buf, addr) = received?;
                    let pkt = match Packet::decode(&buf) {
                        Ok(pkt) => pkt,
                        Err(e) => {
                            log::debug!("[server] undecodable datagram from {addr}: {e}");
                            continue;
                        }
                    };

                    if let Some(inbox) = sessions.get(&addr) {
                        // Never block inbound routing on a session's backlog.
                        if inbox.try_send(pkt).is_err() {
                            log::debug!("[server] inbox unavailable, dropping datagram from {addr}");
                        }
                        continue;
                    }

                    self.handle_new_peer(pkt, addr, &mut sessions, &done_tx);
                }
                Some(addr) = done_rx.recv() => {
                    sessions.remove(&addr);
                }
            }
        }
    }

    /// First datagram from an unknown address: only a well-formed
    /// `GET /<name>` opens a session, anything else is dropped.
    ///
    /// Runs on the dispatcher task, so it must not await; the rejection
    /// reply goes out on a throwaway task.
    fn handle_new_peer(
        &self,
        pkt: Packet,
        addr: SocketAddr,
        sessions: &mut HashMap<SocketAddr, mpsc::Sender<Packet>>,
        done_tx: &mpsc::Sender<SocketAddr>,
    ) {
        if pkt.header.kind != PacketType::Request {
            log::debug!("[server] {addr}: {:?} without a session; dropped", pkt.header.kind);
            return;
        }
        let Some(name) = parse_get(&pkt.payload) else {
            log::debug!("[server] {addr}: malformed request; dropped");
            return;
        };

        if let Err(refused) = validate_name(name) {
            log::warn!("[server] {addr}: {refused}");
            let socket = Arc::clone(&self.socket);
            tokio::spawn(async move {
                let _ = socket
                    .send_packet(&Packet::error(&refused.to_string()), addr)
                    .await;
            });
            return;
        }

        let (inbox_tx, inbox_rx) = mpsc::channel(INBOX_CAPACITY);
        sessions.insert(addr, inbox_tx);
        tokio::spawn(session_task(
            Arc::clone(&self.socket),
            addr,
            name.to_owned(),
            self.root.join(name),
            self.config.clone(),
            inbox_rx,
            done_tx.clone(),
        ));
    }
}

/// Reject names that escape the serving root: absolute paths and any `..`
/// component.  The name is otherwise taken as-is, relative to the root.
fn validate_name(name: &str) -> Result<(), RequestError> {
    if name.starts_with('/') || name.split('/').any(|part| part == "..") {
        return Err(RequestError::ForbiddenPath(name.to_owned()));
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Session worker
// ---------------------------------------------------------------------------

/// One worker per accepted request: loads the file, runs the send engine,
/// reports back to the dispatcher when the session ends.
async fn session_task(
    socket: Arc<PacketSocket>,
    peer: SocketAddr,
    name: String,
    path: PathBuf,
    config: SenderConfig,
    mut inbox: mpsc::Receiver<Packet>,
    done: mpsc::Sender<SocketAddr>,
) {
    // Distinguishes sessions from the same address in the logs.
    let nonce: u32 = rand::random();

    match tokio::fs::read(&path).await {
        Ok(data) => {
            log::info!(
                "[session {nonce:08x}] {peer}: sending '{name}' ({} bytes)",
                data.len()
            );
            match serve(&socket, peer, nonce, &data, &config, &mut inbox).await {
                Ok(()) => log::info!("[session {nonce:08x}] {peer}: '{name}' delivered"),
                Err(e) => log::warn!("[session {nonce:08x}] {peer}: '{name}' failed: {e}"),
            }
        }
        Err(e) => {
            log::warn!("[session {nonce:08x}] {peer}: cannot read '{name}': {e}");
            let refused = RequestError::UnknownFile(name);
            let _ = socket
                .send_packet(&Packet::error(&refused.to_string()), peer)
                .await;
        }
    }

    let _ = done.send(peer).await;
}

/// The send engine proper: pipelined initial send, then an event loop over
/// the inbox (ACK / RESEND / peer abort) and the retransmit timer, until the
/// session completes or the linger window runs out.
async fn serve(
    socket: &PacketSocket,
    peer: SocketAddr,
    nonce: u32,
    data: &[u8],
    config: &SenderConfig,
    inbox: &mut mpsc::Receiver<Packet>,
) -> Result<(), SessionError> {
    let seg = Segmenter::new(data);
    let total = seg.total_segs();
    let mut session = SendSession::new(total, config.clone());

    // Initial pipelined send: every segment in order, no ACK waits.
    let all: Vec<u32> = (0..total).collect();
    send_segments(socket, peer, &seg, &mut session, &all).await?;
    log::debug!("[session {nonce:08x}] initial send of {total} segment(s) done");

    let tick_period = (config.retransmit_timeout / 2).max(Duration::from_millis(10));
    let mut tick = tokio::time::interval(tick_period);

    loop {
        match session.status(Instant::now()) {
            SessionStatus::Complete => return Ok(()),
            SessionStatus::IncompleteDelivery { unacked } => {
                return Err(SessionError::Incomplete { unacked })
            }
            SessionStatus::Active => {}
        }

        tokio::select! {
            maybe_pkt = inbox.recv() => {
                let Some(pkt) = maybe_pkt else {
                    return Err(SessionError::DispatcherGone);
                };
                handle_inbound(socket, peer, nonce, &seg, &mut session, pkt).await?;
            }
            _ = tick.tick() => {
                let due = session.due_for_retransmit(Instant::now())?;
                if !due.is_empty() {
                    log::debug!(
                        "[session {nonce:08x}] timeout, retransmitting {} segment(s)",
                        due.len()
                    );
                    send_segments(socket, peer, &seg, &mut session, &due).await?;
                }
            }
        }
    }
}

/// One datagram from the session's inbox.
async fn handle_inbound(
    socket: &PacketSocket,
    peer: SocketAddr,
    nonce: u32,
    seg: &Segmenter<'_>,
    session: &mut SendSession,
    pkt: Packet,
) -> Result<(), SessionError> {
    match pkt.header.kind {
        PacketType::Ack => {
            if session.on_ack(pkt.header.seq, Instant::now()) {
                log::debug!(
                    "[session {nonce:08x}] ← ACK seq={} ({} outstanding)",
                    pkt.header.seq,
                    session.unacked()
                );
            }
        }
        PacketType::Request => {
            // Mid-transfer REQs are RESENDs; anything else is noise.
            if let Some(seqs) = parse_resend(&pkt.payload) {
                log::info!(
                    "[session {nonce:08x}] ← RESEND for {} segment(s)",
                    seqs.len()
                );
                let targets = session.on_resend_request(&seqs, Instant::now());
                send_segments(socket, peer, seg, session, &targets).await?;
            } else {
                log::debug!("[session {nonce:08x}] unexpected REQ mid-transfer; ignored");
            }
        }
        PacketType::Error => {
            let msg = String::from_utf8_lossy(&pkt.payload).into_owned();
            return Err(SessionError::PeerAborted(msg));
        }
        PacketType::Data => {
            log::debug!("[session {nonce:08x}] DATA from peer; ignored");
        }
    }
    Ok(())
}

/// (Re)transmit a run of segments, stamping each send time and yielding
/// every [`BURST_LEN`] packets.
async fn send_segments(
    socket: &PacketSocket,
    peer: SocketAddr,
    seg: &Segmenter<'_>,
    session: &mut SendSession,
    seqs: &[u32],
) -> Result<(), SocketError> {
    for (i, &seq) in seqs.iter().enumerate() {
        if let Some(payload) = seg.payload(seq) {
            socket
                .send_packet(
                    &Packet::data(seq, seg.total_segs(), seg.is_last(seq), payload.to_vec()),
                    peer,
                )
                .await?;
            session.record_sent(seq, Instant::now());
        }
        if (i + 1) % BURST_LEN == 0 {
            tokio::task::yield_now().await;
        }
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn name_validation_blocks_escapes() {
        assert!(validate_name("data.bin").is_ok());
        assert!(validate_name("sub/dir/data.bin").is_ok());
        assert!(validate_name("/etc/passwd").is_err());
        assert!(validate_name("../secret").is_err());
        assert!(validate_name("sub/../../secret").is_err());
    }
}
