//! Async UDP socket abstraction.
//!
//! [`PacketSocket`] is a thin wrapper around `tokio::net::UdpSocket` that
//! sends [`crate::packet::Packet`]s and receives raw datagrams.  Receiving
//! stays at the byte level on purpose: the dispatcher and the receiver engine
//! decide for themselves what to do with undecodable traffic (drop and
//! count), which a typed `recv` would decide for them.
//!
//! All methods take `&self`, so one socket can be shared behind an `Arc` by
//! the dispatcher and every session worker; datagram writes are atomic per
//! `send_to` and need no extra locking.

use std::net::SocketAddr;

use thiserror::Error;
use tokio::net::UdpSocket;

use crate::packet::{Packet, PacketError, MAX_DATAGRAM};

/// Errors that can arise from socket operations.
#[derive(Debug, Error)]
pub enum SocketError {
    /// Underlying I/O error from the OS.
    #[error("socket I/O error: {0}")]
    Io(#[from] std::io::Error),
    /// The outbound packet could not be encoded.
    #[error("packet encode error: {0}")]
    Encode(#[from] PacketError),
}

/// An async, packet-oriented UDP socket.
#[derive(Debug)]
pub struct PacketSocket {
    /// Address this socket is bound to (resolved after the OS assigns an
    /// ephemeral port).
    pub local_addr: SocketAddr,
    inner: UdpSocket,
}

impl PacketSocket {
    /// Bind a new socket to `local_addr`.
    ///
    /// Passing port 0 lets the OS choose an ephemeral port.
    pub async fn bind(local_addr: SocketAddr) -> std::io::Result<Self> {
        let inner = UdpSocket::bind(local_addr).await?;
        let local_addr = inner.local_addr()?;
        Ok(Self { local_addr, inner })
    }

    /// Encode `packet` and send it as a single UDP datagram to `dest`.
    pub async fn send_packet(&self, packet: &Packet, dest: SocketAddr) -> Result<(), SocketError> {
        let bytes = packet.encode()?;
        self.inner.send_to(&bytes, dest).await?;
        Ok(())
    }

    /// Receive the next datagram as raw bytes, together with its sender.
    ///
    /// The buffer is sized so any well-formed packet (header + u16 payload)
    /// arrives untruncated; an oversized datagram is cut off by the OS and
    /// will fail packet decoding downstream.
    pub async fn recv_raw(&self) -> std::io::Result<(Vec<u8>, SocketAddr)> {
        let mut buf = vec![0u8; MAX_DATAGRAM];
        let (n, addr) = self.inner.recv_from(&mut buf).await?;
        buf.truncate(n);
        Ok((buf, addr))
    }
}
