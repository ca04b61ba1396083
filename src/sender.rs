//! Send-side session state machine.
//!
//! [`SendSession`] tracks, for one transfer, which segments remain
//! unacknowledged, when each was last transmitted, and how often — plus the
//! linger window that opens once the final segment has been sent.  The caller
//! drives it from an event loop:
//!
//! - after transmitting segment `seq`, call [`SendSession::record_sent`];
//! - on an inbound ACK, call [`SendSession::on_ack`];
//! - on an inbound RESEND, filter the request through
//!   [`SendSession::on_resend_request`] and retransmit what it returns;
//! - periodically, call [`SendSession::due_for_retransmit`] and retransmit
//!   what it returns, then poll [`SendSession::status`] to learn whether the
//!   session is finished.
//!
//! The linger window measures terminal-phase *silence*: it is armed when the
//! final segment first hits the wire and refreshed by every inbound ACK or
//! RESEND, so a busy transfer can run long past the window's length, while a
//! peer that goes quiet with segments outstanding ends the session with
//! [`SessionStatus::IncompleteDelivery`].
//!
//! This module only manages state; all socket I/O is the caller's
//! responsibility (same pattern as [`crate::receiver`]).

use std::time::{Duration, Instant};

use thiserror::Error;

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

/// Send-side tuning knobs.
#[derive(Debug, Clone)]
pub struct SenderConfig {
    /// An unacked segment is retransmitted once this long has passed since
    /// its previous transmission.
    pub retransmit_timeout: Duration,
    /// Retransmissions allowed per segment before the peer is declared gone.
    pub max_retries: u32,
    /// Once the final segment has been sent, how long the session survives
    /// without hearing anything from the peer.
    pub linger_window: Duration,
}

impl Default for SenderConfig {
    fn default() -> Self {
        Self {
            retransmit_timeout: Duration::from_millis(500),
            max_retries: 10,
            linger_window: Duration::from_secs(5),
        }
    }
}

// ---------------------------------------------------------------------------
// Error and status types
// ---------------------------------------------------------------------------

/// Terminal send-side faults.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SendError {
    /// A segment exhausted its retransmission budget without an ACK.
    #[error("segment {seq} unacked after {tx_count} transmissions")]
    PeerUnreachable { seq: u32, tx_count: u32 },
}

/// Where the session stands, as reported by [`SendSession::status`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionStatus {
    /// Segments remain unacked and the linger window (if open) has not
    /// elapsed: keep serving ACKs, RESENDs, and retransmissions.
    Active,
    /// Every segment has been acknowledged.
    Complete,
    /// The linger window elapsed with segments still unacked.
    IncompleteDelivery { unacked: usize },
}

// ---------------------------------------------------------------------------
// SendSession
// ---------------------------------------------------------------------------

/// Per-segment bookkeeping.
#[derive(Debug, Clone, Copy, Default)]
struct Slot {
    acked: bool,
    /// Total transmissions so far (initial send included).
    tx_count: u32,
    last_sent: Option<Instant>,
}

/// Send-side state for one (client, file) session.
#[derive(Debug)]
pub struct SendSession {
    slots: Vec<Slot>,
    unacked: usize,
    /// Set when the LAST segment is first transmitted; pushed forward by
    /// inbound session activity.
    linger_from: Option<Instant>,
    config: SenderConfig,
}

impl SendSession {
    pub fn new(total_segs: u32, config: SenderConfig) -> Self {
        assert!(total_segs > 0, "a transfer has at least one segment");
        Self {
            slots: vec![Slot::default(); total_segs as usize],
            unacked: total_segs as usize,
            linger_from: None,
            config,
        }
    }

    pub fn total_segs(&self) -> u32 {
        self.slots.len() as u32
    }

    pub fn unacked(&self) -> usize {
        self.unacked
    }

    /// Record that segment `seq` was just written to the wire.
    ///
    /// The first transmission of the final segment opens the linger window.
    pub fn record_sent(&mut self, seq: u32, now: Instant) {
        let last = self.slots.len() - 1;
        if let Some(slot) = self.slots.get_mut(seq as usize) {
            slot.tx_count += 1;
            slot.last_sent = Some(now);
        }
        if seq as usize == last && self.linger_from.is_none() {
            self.linger_from = Some(now);
        }
    }

    /// Process an ACK for `seq`.  Returns `true` when it acknowledges a
    /// previously-unacked segment; duplicates and out-of-range ACKs are
    /// ignored (but still count as peer activity for the linger clock).
    pub fn on_ack(&mut self, seq: u32, now: Instant) -> bool {
        self.touch(now);
        match self.slots.get_mut(seq as usize) {
            Some(slot) if !slot.acked => {
                slot.acked = true;
                self.unacked -= 1;
                true
            }
            _ => false,
        }
    }

    /// Filter a RESEND request down to the segments worth retransmitting.
    ///
    /// Out-of-range sequence numbers are silently dropped.  In-range segments
    /// are returned even if our books say they were ACKed — the peer is
    /// telling us it does not have them, and a spurious retransmission is
    /// harmless (the receiver re-ACKs duplicates).
    pub fn on_resend_request(&mut self, requested: &[u32], now: Instant) -> Vec<u32> {
        self.touch(now);
        requested
            .iter()
            .copied()
            .filter(|&seq| (seq as usize) < self.slots.len())
            .collect()
    }

    /// Inbound session activity pushes the linger deadline forward.
    fn touch(&mut self, now: Instant) {
        if self.linger_from.is_some() {
            self.linger_from = Some(now);
        }
    }

    /// Segments overdue for retransmission at `now`.
    ///
    /// Fails with [`SendError::PeerUnreachable`] once an overdue segment has
    /// already used up `max_retries` retransmissions.
    pub fn due_for_retransmit(&self, now: Instant) -> Result<Vec<u32>, SendError> {
        let mut due = Vec::new();
        for (seq, slot) in self.slots.iter().enumerate() {
            if slot.acked {
                continue;
            }
            let Some(last_sent) = slot.last_sent else {
                continue; // initial send still in progress
            };
            if now.duration_since(last_sent) < self.config.retransmit_timeout {
                continue;
            }
            if slot.tx_count > self.config.max_retries {
                return Err(SendError::PeerUnreachable {
                    seq: seq as u32,
                    tx_count: slot.tx_count,
                });
            }
            due.push(seq as u32);
        }
        Ok(due)
    }

    /// Whether the session is finished, and how.
    pub fn status(&self, now: Instant) -> SessionStatus {
        if self.unacked == 0 {
            return SessionStatus::Complete;
        }
        if let Some(from) = self.linger_from {
            if now.duration_since(from) >= self.config.linger_window {
                return SessionStatus::IncompleteDelivery {
                    unacked: self.unacked,
                };
            }
        }
        SessionStatus::Active
    }
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn cfg() -> SenderConfig {
        SenderConfig {
            retransmit_timeout: Duration::from_millis(100),
            max_retries: 3,
            linger_window: Duration::from_millis(400),
        }
    }

    #[test]
    fn acks_drain_the_unacked_set() {
        let now = Instant::now();
        let mut s = SendSession::new(3, cfg());
        assert_eq!(s.unacked(), 3);
        assert!(s.on_ack(1, now));
        assert!(!s.on_ack(1, now)); // duplicate
        assert!(!s.on_ack(99, now)); // out of range
        assert!(s.on_ack(0, now));
        assert!(s.on_ack(2, now));
        assert_eq!(s.unacked(), 0);
        assert_eq!(s.status(now), SessionStatus::Complete);
    }

    #[test]
    fn retransmit_fires_only_after_the_timeout() {
        let mut s = SendSession::new(2, cfg());
        let t0 = Instant::now();
        s.record_sent(0, t0);
        s.record_sent(1, t0);

        assert_eq!(s.due_for_retransmit(t0).unwrap(), Vec::<u32>::new());
        let later = t0 + Duration::from_millis(150);
        assert_eq!(s.due_for_retransmit(later).unwrap(), vec![0, 1]);

        // An ACK removes a segment from consideration.
        s.on_ack(0, later);
        assert_eq!(s.due_for_retransmit(later).unwrap(), vec![1]);
    }

    #[test]
    fn record_sent_resets_the_per_segment_clock() {
        let mut s = SendSession::new(1, cfg());
        let t0 = Instant::now();
        s.record_sent(0, t0);
        let t1 = t0 + Duration::from_millis(150);
        assert_eq!(s.due_for_retransmit(t1).unwrap(), vec![0]);
        s.record_sent(0, t1); // retransmitted
        assert_eq!(s.due_for_retransmit(t1 + Duration::from_millis(50)).unwrap(), Vec::<u32>::new());
    }

    #[test]
    fn unsent_segments_are_never_due() {
        let s = SendSession::new(4, cfg());
        // Nothing recorded yet: the initial pipelined send owns these.
        assert_eq!(s.due_for_retransmit(Instant::now()).unwrap(), Vec::<u32>::new());
    }

    #[test]
    fn exhausted_retries_raise_peer_unreachable() {
        let mut s = SendSession::new(1, cfg());
        let mut now = Instant::now();
        // Initial send plus max_retries retransmissions.
        for _ in 0..=cfg().max_retries {
            s.record_sent(0, now);
            now += Duration::from_millis(150);
        }
        assert_eq!(
            s.due_for_retransmit(now),
            Err(SendError::PeerUnreachable { seq: 0, tx_count: 4 })
        );
    }

    #[test]
    fn resend_request_drops_out_of_range_only() {
        let now = Instant::now();
        let mut s = SendSession::new(5, cfg());
        s.on_ack(2, now);
        assert_eq!(s.on_resend_request(&[0, 2, 4, 5, 700], now), vec![0, 2, 4]);
    }

    #[test]
    fn linger_window_opens_on_last_segment_and_expires() {
        let mut s = SendSession::new(2, cfg());
        let t0 = Instant::now();
        s.record_sent(0, t0);
        assert_eq!(s.status(t0 + Duration::from_secs(10)), SessionStatus::Active);

        let mut s = SendSession::new(2, cfg());
        s.record_sent(0, t0);
        s.record_sent(1, t0); // LAST first transmitted: linger armed
        assert_eq!(s.status(t0 + Duration::from_millis(100)), SessionStatus::Active);
        assert_eq!(
            s.status(t0 + Duration::from_millis(500)),
            SessionStatus::IncompleteDelivery { unacked: 2 }
        );
    }

    #[test]
    fn peer_activity_extends_the_linger_window() {
        let mut s = SendSession::new(3, cfg());
        let t0 = Instant::now();
        for seq in 0..3 {
            s.record_sent(seq, t0);
        }
        // An ACK trickles in late; the silence clock restarts from it.
        let t1 = t0 + Duration::from_millis(300);
        s.on_ack(0, t1);
        assert_eq!(s.status(t0 + Duration::from_millis(500)), SessionStatus::Active);
        assert_eq!(
            s.status(t1 + Duration::from_millis(400)),
            SessionStatus::IncompleteDelivery { unacked: 2 }
        );
    }

    #[test]
    fn full_ack_set_beats_the_linger_deadline() {
        let mut s = SendSession::new(2, cfg());
        let t0 = Instant::now();
        s.record_sent(0, t0);
        s.record_sent(1, t0);
        s.on_ack(0, t0);
        s.on_ack(1, t0);
        // Complete wins even after the linger deadline.
        assert_eq!(s.status(t0 + Duration::from_secs(60)), SessionStatus::Complete);
    }
}
