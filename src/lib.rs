//! `udp-fetch` — reliable, exactly-once file transfer over plain UDP.
//!
//! The wire delivers fixed-size datagrams that may be lost, duplicated,
//! reordered, or corrupted; this crate turns that into an ordered,
//! CRC-checked delivery of a named byte stream.
//!
//! # Architecture
//!
//! ```text
//!  client                                server
//!  ┌───────────┐  REQ "GET /name"   ┌────────────┐
//!  │  client   │───────────────────▶│ dispatcher │── spawns ──┐
//!  │  driver   │                    └────────────┘            ▼
//!  └────┬──────┘       DATA seq=0..total          ┌────────────────────┐
//!       │       ◀──────────────────────────────── │  session worker    │
//!  ┌────▼──────┐        ACK per segment           │ Segmenter          │
//!  │ receiver  │ ───────────────────────────────▶ │ + SendSession      │
//!  │  engine   │        RESEND missing            └────────────────────┘
//!  └────┬──────┘ ───────────────────────────────▶
//!       ▼ reassembled bytes
//!     sink
//! ```
//!
//! Each module has a single responsibility:
//! - [`packet`]   — wire format: 18-byte header, CRC32, request grammar
//! - [`segment`]  — slicing a byte source / reassembling out-of-order pieces
//! - [`sender`]   — send-side state: unacked set, retransmit timers, linger
//! - [`receiver`] — receive-side state: buffering, ACKs, gap scan, loss injection
//! - [`socket`]   — async packet-oriented UDP wrapper
//! - [`server`]   — dispatcher + one worker per client session
//! - [`client`]   — request, drive the receiver, write the sink
//! - [`report`]   — per-transfer statistics

pub mod client;
pub mod packet;
pub mod receiver;
pub mod report;
pub mod segment;
pub mod sender;
pub mod server;
pub mod socket;
