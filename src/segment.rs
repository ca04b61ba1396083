//! Splitting a byte stream into sequence-numbered segments, and putting the
//! pieces back together on the far side.
//!
//! [`Segmenter`] serves random access by sequence number so the same code
//! path backs both the initial pipelined send and later RESEND service.
//! [`Reassembler`] buffers out-of-order arrivals keyed by sequence number,
//! reports the missing set, and yields the original byte stream once every
//! segment in `[0, total)` is present.
//!
//! Neither type performs I/O and neither knows about packets or timers.

use std::collections::BTreeMap;

use thiserror::Error;

use crate::packet::MAX_PAYLOAD;

// ---------------------------------------------------------------------------
// Segmenter
// ---------------------------------------------------------------------------

/// Read-only view of a byte source, sliced into fixed-size segments.
///
/// Segment `i` covers `bytes[i·P .. min((i+1)·P, N)]` with `P` the payload
/// size and `N` the source length.  A zero-byte source still yields exactly
/// one (empty) segment so the receiver learns the total and the LAST flag.
#[derive(Debug)]
pub struct Segmenter<'a> {
    data: &'a [u8],
    payload_size: usize,
    total: u32,
}

impl<'a> Segmenter<'a> {
    /// Slice `data` into [`MAX_PAYLOAD`]-sized segments.
    pub fn new(data: &'a [u8]) -> Self {
        Self::with_payload_size(data, MAX_PAYLOAD)
    }

    /// Slice `data` into `payload_size`-sized segments.  Exposed so tests can
    /// exercise many-segment transfers with small inputs.
    pub fn with_payload_size(data: &'a [u8], payload_size: usize) -> Self {
        assert!(payload_size > 0, "payload_size must be non-zero");
        let total = data.len().div_ceil(payload_size).max(1) as u32;
        Self {
            data,
            payload_size,
            total,
        }
    }

    /// Number of segments this source produces (always ≥ 1).
    pub fn total_segs(&self) -> u32 {
        self.total
    }

    /// Payload bytes of segment `seq`, or `None` when out of range.
    pub fn payload(&self, seq: u32) -> Option<&'a [u8]> {
        if seq >= self.total {
            return None;
        }
        let start = seq as usize * self.payload_size;
        let end = (start + self.payload_size).min(self.data.len());
        // A zero-byte source has one segment with start == end == 0.
        Some(&self.data[start.min(self.data.len())..end])
    }

    /// Whether `seq` is the final segment (carries the LAST flag).
    pub fn is_last(&self, seq: u32) -> bool {
        seq + 1 == self.total
    }
}

// ---------------------------------------------------------------------------
// Reassembler
// ---------------------------------------------------------------------------

/// Faults detected while reassembling.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ReassemblyError {
    /// A segment arrived with a sequence number at or beyond the total.
    #[error("segment {seq} outside transfer of {total} segments")]
    SeqOutOfRange { seq: u32, total: u32 },
    /// The same sequence number arrived twice with different bytes.  There is
    /// no way to tell which copy is authentic, so the transfer is poisoned.
    #[error("segment {seq} re-delivered with conflicting bytes")]
    InconsistentPayload { seq: u32 },
}

/// Outcome of a (successful) insert.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsertOutcome {
    /// First sighting of this sequence number; payload buffered.
    Stored,
    /// Identical bytes were already buffered; arrival ignored.
    Duplicate,
}

/// Receive-side segment store for one transfer of a known total length.
#[derive(Debug)]
pub struct Reassembler {
    total: u32,
    segments: BTreeMap<u32, Vec<u8>>,
}

impl Reassembler {
    pub fn new(total: u32) -> Self {
        assert!(total > 0, "a transfer has at least one segment");
        Self {
            total,
            segments: BTreeMap::new(),
        }
    }

    pub fn total_segs(&self) -> u32 {
        self.total
    }

    /// Insert one segment idempotently.
    ///
    /// Repeats with identical bytes report [`InsertOutcome::Duplicate`];
    /// repeats with different bytes are fatal.
    pub fn insert(&mut self, seq: u32, payload: &[u8]) -> Result<InsertOutcome, ReassemblyError> {
        if seq >= self.total {
            return Err(ReassemblyError::SeqOutOfRange {
                seq,
                total: self.total,
            });
        }
        match self.segments.get(&seq) {
            Some(existing) if existing == payload => Ok(InsertOutcome::Duplicate),
            Some(_) => Err(ReassemblyError::InconsistentPayload { seq }),
            None => {
                self.segments.insert(seq, payload.to_vec());
                Ok(InsertOutcome::Stored)
            }
        }
    }

    /// Number of distinct segments buffered so far.
    pub fn received(&self) -> u32 {
        self.segments.len() as u32
    }

    /// True when every sequence number in `[0, total)` has been stored.
    pub fn is_complete(&self) -> bool {
        self.segments.len() as u32 == self.total
    }

    /// Sequence numbers not yet stored, in increasing order, capped at `limit`.
    pub fn missing(&self, limit: usize) -> Vec<u32> {
        let mut gaps = Vec::new();
        let mut expected = 0u32;
        for &seq in self.segments.keys() {
            for gap in expected..seq {
                gaps.push(gap);
                if gaps.len() == limit {
                    return gaps;
                }
            }
            expected = seq + 1;
        }
        for gap in expected..self.total {
            gaps.push(gap);
            if gaps.len() == limit {
                break;
            }
        }
        gaps
    }

    /// Concatenate all segments in sequence order.
    ///
    /// Returns `None` unless the transfer is complete, so a partial stream
    /// can never reach the sink.
    pub fn assemble(self) -> Option<Vec<u8>> {
        if !self.is_complete() {
            return None;
        }
        let size = self.segments.values().map(Vec::len).sum();
        let mut out = Vec::with_capacity(size);
        for payload in self.segments.into_values() {
            out.extend_from_slice(&payload);
        }
        Some(out)
    }
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------
