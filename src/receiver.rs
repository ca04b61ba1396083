//! Receive-side session state machine.
//!
//! [`ReceiveSession`] owns everything between "a datagram arrived" and "the
//! reassembled file is ready": packet validation, idempotent buffering,
//! ACK decisions, gap detection with rate-limited RESEND requests, and the
//! idle-timeout abort.  The caller drives it from an event loop:
//!
//! - for every inbound datagram, call [`ReceiveSession::on_packet`] and send
//!   whatever ACK it asks for;
//! - on a timer, call [`ReceiveSession::progress_tick`] and send whatever
//!   RESEND it asks for;
//! - once [`ReceiveSession::is_complete`], take the payload and write it to
//!   the sink.
//!
//! # Phases
//!
//! ```text
//!  AwaitingFirst ──first valid DATA──▶ Receiving ──last gap filled──▶ Complete
//!        │                                 │
//!        └──────── idle timeout ───────────┴──▶ TransferStalled
//! ```
//!
//! Loss injection (`--loss`) lives here too: with probability `loss_pct/100`
//! an inbound datagram is discarded before any processing, simulating a lossy
//! link at the receive boundary so the RESEND path can be exercised on a
//! reliable network.
//!
//! This module only manages state; all socket I/O is the caller's
//! responsibility (same pattern as [`crate::sender`]).

use std::time::{Duration, Instant};

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use thiserror::Error;

use crate::packet::{Packet, PacketType, MAX_PAYLOAD};
use crate::segment::{InsertOutcome, Reassembler, ReassemblyError};

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

/// Receive-side tuning knobs.
#[derive(Debug, Clone)]
pub struct ReceiverConfig {
    /// Quiet period after which the missing set is computed and requested.
    pub gap_scan_interval: Duration,
    /// Most sequence numbers named in a single RESEND request.
    pub max_resend_batch: usize,
    /// Abort the transfer after this long without a new segment.
    pub idle_timeout: Duration,
    /// Artificial inbound loss, integer percent in `[0, 100]`.
    pub loss_pct: u8,
}

impl Default for ReceiverConfig {
    fn default() -> Self {
        Self {
            gap_scan_interval: Duration::from_millis(500),
            max_resend_batch: 64,
            idle_timeout: Duration::from_secs(10),
            loss_pct: 0,
        }
    }
}

// ---------------------------------------------------------------------------
// Error, phase, and step types
// ---------------------------------------------------------------------------

/// Terminal receive-side faults, surfaced to the driver.
#[derive(Debug, Error)]
pub enum TransferError {
    /// No new segment arrived within the idle timeout.
    #[error("transfer stalled: no progress within {0:?}")]
    Stalled(Duration),
    /// The server answered with an ERR packet.
    #[error("server error: {0}")]
    ServerRejected(String),
    /// The segment store was poisoned (conflicting duplicate payload).
    #[error(transparent)]
    Reassembly(#[from] ReassemblyError),
    /// Sending a packet failed.
    #[error(transparent)]
    Socket(#[from] crate::socket::SocketError),
    /// Socket or sink I/O failed.
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Receiver life-cycle phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// No DATA seen yet; the total is unknown.
    AwaitingFirst,
    /// Total known, missing set non-empty.
    Receiving,
    /// Missing set empty; payload ready for the sink.
    Complete,
}

/// What the caller should do with the datagram just processed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PacketStep {
    /// Dropped: injected loss, decode failure, or a packet that carries no
    /// obligation (stray ACK/REQ, malformed DATA).
    Ignored,
    /// Acknowledge segment `seq` — new arrivals and duplicates alike, so a
    /// lost ACK can never wedge the sender.
    Ack(u32),
}

/// Diagnostic counters; feed [`crate::report::TransferReport`].
#[derive(Debug, Clone, Copy, Default)]
pub struct Counters {
    /// Distinct segments stored.
    pub stored: u64,
    /// Valid DATA re-deliveries (re-ACKed, not stored).
    pub duplicates: u64,
    /// Datagrams dropped for decode or validation failures.
    pub invalid: u64,
    /// Datagrams discarded by artificial loss injection.
    pub injected_drops: u64,
    /// RESEND requests issued.
    pub resend_requests: u64,
}

// ---------------------------------------------------------------------------
// ReceiveSession
// ---------------------------------------------------------------------------

/// Receive-side state for one requested file.
pub struct ReceiveSession {
    phase: Phase,
    /// Learned from the first valid DATA packet.
    total: Option<u32>,
    /// Present from the first valid DATA until the payload is taken.
    reassembler: Option<Reassembler>,
    /// Last time a *new* segment was stored (or session start).
    last_progress: Instant,
    last_resend: Option<Instant>,
    rng: StdRng,
    config: ReceiverConfig,
    pub counters: Counters,
}

impl ReceiveSession {
    pub fn new(config: ReceiverConfig, now: Instant) -> Self {
        Self::with_rng(config, now, StdRng::from_entropy())
    }

    /// Construct with a caller-supplied RNG so loss injection is
    /// reproducible in tests.
    pub fn with_rng(config: ReceiverConfig, now: Instant, rng: StdRng) -> Self {
        Self {
            phase: Phase::AwaitingFirst,
            total: None,
            reassembler: None,
            last_progress: now,
            last_resend: None,
            rng,
            config,
            counters: Counters::default(),
        }
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn is_complete(&self) -> bool {
        self.phase == Phase::Complete
    }

    /// Total segments, once learned from the first DATA packet.
    pub fn total_segs(&self) -> Option<u32> {
        self.total
    }

    /// Process one inbound datagram.
    ///
    /// Invalid packets are dropped silently apart from a counter; the only
    /// fatal outcomes are a server ERR and a poisoned segment store.
    pub fn on_packet(&mut self, datagram: &[u8], now: Instant) -> Result<PacketStep, TransferError> {
        // Simulated lossy link: discard before any processing.
        if self.config.loss_pct > 0 && self.rng.gen_range(1..=100) <= self.config.loss_pct {
            self.counters.injected_drops += 1;
            log::debug!("[client] injected drop ({} so far)", self.counters.injected_drops);
            return Ok(PacketStep::Ignored);
        }

        let pkt = match Packet::decode(datagram) {
            Ok(pkt) => pkt,
            Err(e) => {
                self.counters.invalid += 1;
                log::debug!("[client] dropping undecodable datagram: {e}");
                return Ok(PacketStep::Ignored);
            }
        };

        match pkt.header.kind {
            PacketType::Data => self.on_data(pkt, now),
            PacketType::Error => {
                let msg = String::from_utf8_lossy(&pkt.payload).into_owned();
                Err(TransferError::ServerRejected(msg))
            }
            // A client never expects REQ or ACK; drop without comment.
            PacketType::Request | PacketType::Ack => Ok(PacketStep::Ignored),
        }
    }

    fn on_data(&mut self, pkt: Packet, now: Instant) -> Result<PacketStep, TransferError> {
        let seq = pkt.header.seq;
        let total = pkt.header.total;

        if total == 0 || pkt.payload.len() > MAX_PAYLOAD {
            self.counters.invalid += 1;
            return Ok(PacketStep::Ignored);
        }
        if let Some(known) = self.total {
            // Every DATA packet of one transfer carries the same total.
            if total != known {
                self.counters.invalid += 1;
                log::warn!("[client] DATA with total {total}, expected {known}; dropped");
                return Ok(PacketStep::Ignored);
            }
        }
        if seq >= total {
            self.counters.invalid += 1;
            return Ok(PacketStep::Ignored);
        }

        if self.total.is_none() {
            self.total = Some(total);
            self.reassembler = Some(Reassembler::new(total));
            self.phase = Phase::Receiving;
            log::info!("[client] expecting {total} segment(s)");
        }

        // After completion the store is gone, but stragglers and duplicates
        // still deserve the (idempotent) final ACK.
        let Some(re) = self.reassembler.as_mut() else {
            self.counters.duplicates += 1;
            return Ok(PacketStep::Ack(seq));
        };

        match re.insert(seq, &pkt.payload)? {
            InsertOutcome::Stored => {
                self.counters.stored += 1;
                self.last_progress = now;
                if re.is_complete() {
                    self.phase = Phase::Complete;
                }
            }
            InsertOutcome::Duplicate => {
                self.counters.duplicates += 1;
            }
        }
        Ok(PacketStep::Ack(seq))
    }

    /// Periodic driver callback: gap scanning, RESEND pacing, idle abort.
    ///
    /// Returns the missing sequence numbers to request (at most
    /// `max_resend_batch`, at most once per `gap_scan_interval`), or `None`
    /// when there is nothing to do right now.
    pub fn progress_tick(&mut self, now: Instant) -> Result<Option<Vec<u32>>, TransferError> {
        if self.phase == Phase::Complete {
            return Ok(None);
        }
        if now.duration_since(self.last_progress) >= self.config.idle_timeout {
            return Err(TransferError::Stalled(self.config.idle_timeout));
        }

        let Some(re) = self.reassembler.as_ref() else {
            return Ok(None); // total unknown: nothing to enumerate yet
        };
        if now.duration_since(self.last_progress) < self.config.gap_scan_interval {
            return Ok(None);
        }
        if let Some(last) = self.last_resend {
            if now.duration_since(last) < self.config.gap_scan_interval {
                return Ok(None);
            }
        }

        let missing = re.missing(self.config.max_resend_batch);
        if missing.is_empty() {
            return Ok(None);
        }
        self.last_resend = Some(now);
        self.counters.resend_requests += 1;
        log::info!(
            "[client] requesting resend of {} segment(s), first {}",
            missing.len(),
            missing[0]
        );
        Ok(Some(missing))
    }

    /// The reassembled byte stream.  Yields `Some` exactly once, and only
    /// after the session reached [`Phase::Complete`].
    pub fn take_payload(&mut self) -> Option<Vec<u8>> {
        if self.phase != Phase::Complete {
            return None;
        }
        self.reassembler.take().and_then(Reassembler::assemble)
    }
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------
