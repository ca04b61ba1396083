//! Per-transfer statistics returned by the client driver.

use std::fmt;
use std::time::Duration;

use crate::receiver::Counters;

/// Summary of one completed download, built from the receiver engine's
/// diagnostic counters.  The enclosing tool decides how to present it; the
/// [`fmt::Display`] impl renders a one-line digest for logs.
#[derive(Debug, Clone)]
pub struct TransferReport {
    /// Requested file name.
    pub name: String,
    /// Segments in the transfer.
    pub total_segs: u32,
    /// Bytes delivered to the sink.
    pub bytes: u64,
    /// Wall-clock duration from request to sink flush.
    pub elapsed: Duration,
    /// Receive-side diagnostic counters.
    pub counters: Counters,
}

impl TransferReport {
    pub fn new(name: &str, total_segs: u32, bytes: u64, elapsed: Duration, counters: Counters) -> Self {
        Self {
            name: name.to_owned(),
            total_segs,
            bytes,
            elapsed,
            counters,
        }
    }
}

impl fmt::Display for TransferReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "'{}': {} bytes in {} segment(s), {:.2}s ({} duplicate, {} dropped, {} injected, {} resend request(s))",
            self.name,
            self.bytes,
            self.total_segs,
            self.elapsed.as_secs_f64(),
            self.counters.duplicates,
            self.counters.invalid,
            self.counters.injected_drops,
            self.counters.resend_requests,
        )
    }
}
