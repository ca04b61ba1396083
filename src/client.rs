//! Client side: issue the request, drive the receiver engine to completion,
//! deliver the bytes to a sink.
//!
//! The driver is a single receive loop multiplexed with a progress timer
//! (`tokio::select!`).  All protocol decisions live in
//! [`crate::receiver::ReceiveSession`]; this module just moves datagrams and
//! obeys the engine's instructions (send this ACK, request those segments,
//! give up).

use std::io::Write;
use std::net::SocketAddr;
use std::time::{Duration, Instant};

use crate::packet::Packet;
use crate::receiver::{PacketStep, ReceiveSession, ReceiverConfig, TransferError};
use crate::report::TransferReport;
use crate::socket::PacketSocket;

/// Split a `host:port/name` target into its endpoint and file-name halves.
///
/// The name part may itself contain slashes (`host:port/sub/dir/file`).
pub fn parse_target(target: &str) -> Option<(&str, &str)> {
    let (endpoint, name) = target.split_once('/')?;
    if endpoint.is_empty() || name.is_empty() || !endpoint.contains(':') {
        return None;
    }
    Some((endpoint, name))
}

/// Download `name` from `server` and hand the reassembled bytes to a sink.
///
/// The sink is opened lazily, once the transfer has actually succeeded, so a
/// refused or failed download leaves nothing behind.  Bytes are written in a
/// single ordered pass — no seeking, no truncation.
pub async fn fetch<W, F>(
    server: SocketAddr,
    name: &str,
    config: ReceiverConfig,
    open_sink: F,
) -> Result<TransferReport, TransferError>
where
    W: Write,
    F: FnOnce() -> std::io::Result<W>,
{
    let started = Instant::now();
    let socket = PacketSocket::bind(SocketAddr::from(([0, 0, 0, 0], 0))).await?;

    log::info!("[client] requesting '{name}' from {server}");
    socket.send_packet(&Packet::request(name), server).await?;

    let tick_period = (config.gap_scan_interval / 2).max(Duration::from_millis(10));
    let mut tick = tokio::time::interval(tick_period);
    let mut session = ReceiveSession::new(config, Instant::now());

    let bytes = loop {
        tokio::select! {
            received = socket.recv_raw() => {
                let (buf, addr) = received?;
                if addr != server {
                    log::debug!("[client] datagram from unrelated {addr}; dropped");
                    continue;
                }
                match session.on_packet(&buf, Instant::now())? {
                    PacketStep::Ack(seq) => {
                        socket.send_packet(&Packet::ack(seq), server).await?;
                    }
                    PacketStep::Ignored => {}
                }
                if session.is_complete() {
                    if let Some(bytes) = session.take_payload() {
                        break bytes;
                    }
                }
            }
            _ = tick.tick() => {
                if let Some(missing) = session.progress_tick(Instant::now())? {
                    socket.send_packet(&Packet::resend(&missing), server).await?;
                }
            }
        }
    };

    let mut sink = open_sink()?;
    sink.write_all(&bytes)?;
    sink.flush()?;

    let report = TransferReport::new(
        name,
        session.total_segs().unwrap_or(0),
        bytes.len() as u64,
        started.elapsed(),
        session.counters,
    );
    log::info!("[client] transfer complete: {report}");
    Ok(report)
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn target_parsing() {
        assert_eq!(
            parse_target("127.0.0.1:5000/file.dat"),
            Some(("127.0.0.1:5000", "file.dat"))
        );
        assert_eq!(
            parse_target("example.com:9/sub/dir/file"),
            Some(("example.com:9", "sub/dir/file"))
        );
        assert_eq!(parse_target("no-port/file"), None);
        assert_eq!(parse_target("host:5000"), None);
        assert_eq!(parse_target("host:5000/"), None);
        assert_eq!(parse_target("/file"), None);
    }
}
