//! A thin wrapper over `tokio::net::UdpSocket`, bound through `socket2` so
//! non-blocking mode and buffer sizing are explicit rather than relying on
//! `tokio`'s defaults.

use std::io;
use std::net::SocketAddr;

use socket2::{Domain, Protocol, SockRef, Socket, Type};
use tokio::net::UdpSocket;

use crate::proto::Packet;

/// Outcome of a single receive attempt.
#[derive(Debug)]
pub enum RecvOutcome {
    /// Nothing was queued (non-blocking attempt only).
    Empty,
    /// A datagram arrived but failed to decode as a [`Packet`]; logged
    /// and dropped by the caller.
    Garbage(SocketAddr),
    /// A datagram arrived and decoded successfully.
    Packet(Packet, SocketAddr),
}

#[derive(Debug)]
pub struct RudpSocket {
    socket: UdpSocket,
}

impl RudpSocket {
    /// Binds a new UDP socket to `addr`. `addr`'s port may be `0` to let
    /// the OS assign an ephemeral port (used by the sender and by tests).
    pub fn bind(addr: SocketAddr) -> io::Result<Self> {
        let domain = match addr {
            SocketAddr::V4(_) => Domain::IPV4,
            SocketAddr::V6(_) => Domain::IPV6,
        };

        let socket = Socket::new(domain, Type::DGRAM, Some(Protocol::UDP))?;
        socket.set_nonblocking(true)?;
        socket.bind(&addr.into())?;

        let socket = UdpSocket::from_std(socket.into())?;
        Ok(Self { socket })
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.socket.local_addr()
    }

    pub async fn send_packet(&self, packet: &Packet, addr: SocketAddr) -> io::Result<usize> {
        let buf = packet.encode();
        self.socket.send_to(&buf, addr).await
    }

    /// Receives a single datagram and decodes it, awaiting if none is
    /// queued yet.
    pub async fn recv_packet(&self, buf: &mut [u8]) -> io::Result<RecvOutcome> {
        let (len, addr) = self.socket.recv_from(buf).await?;
        Ok(match Packet::decode(&buf[..len]) {
            Ok(packet) => RecvOutcome::Packet(packet, addr),
            Err(_) => RecvOutcome::Garbage(addr),
        })
    }

    /// Non-blocking receive attempt: returns [`RecvOutcome::Empty`]
    /// immediately if no datagram is queued, instead of awaiting one. Used
    /// by the sender's "drain ACKs" step and the receiver's main loop,
    /// both of which poll rather than block.
    pub fn try_recv_packet(&self, buf: &mut [u8]) -> io::Result<RecvOutcome> {
        match self.socket.try_recv_from(buf) {
            Ok((len, addr)) => Ok(match Packet::decode(&buf[..len]) {
                Ok(packet) => RecvOutcome::Packet(packet, addr),
                Err(_) => RecvOutcome::Garbage(addr),
            }),
            Err(err) if err.kind() == io::ErrorKind::WouldBlock => Ok(RecvOutcome::Empty),
            Err(err) => Err(err),
        }
    }

    #[inline]
    fn as_socket(&self) -> SockRef<'_> {
        SockRef::from(&self.socket)
    }

    pub fn set_recv_buffer_size(&self, size: usize) -> io::Result<()> {
        self.as_socket().set_recv_buffer_size(size)
    }
}
