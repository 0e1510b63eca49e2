//! Datagram channel abstraction and its UDP implementation.
//!
//! [`Channel`] is the only view the engines have of the network: send one
//! encoded [`Packet`] to a peer, or wait for the next raw datagram.  Decoding
//! happens in the engines so a malformed datagram can be dropped there
//! instead of failing the receive.  Timeouts are applied by the caller.
//!
//! [`Socket`] is a thin wrapper around `tokio::net::UdpSocket`; the fault
//! injecting [`crate::simulator::Simulator`] is the other implementation.

use std::future::Future;
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;

use tokio::net::UdpSocket;

use crate::packet::{Packet, MAX_DATAGRAM};

/// An unreliable, message-oriented transport.
pub trait Channel {
    /// Encode `packet` and send it as one datagram to `dest`.
    fn send_to(
        &self,
        packet: &Packet,
        dest: SocketAddr,
    ) -> impl Future<Output = io::Result<()>> + Send;

    /// Wait for the next datagram; returns `(bytes, sender_address)`.
    fn recv_from(&self) -> impl Future<Output = io::Result<(Vec<u8>, SocketAddr)>> + Send;

    fn local_addr(&self) -> io::Result<SocketAddr>;
}

impl<C: Channel + Send + Sync> Channel for Arc<C> {
    fn send_to(
        &self,
        packet: &Packet,
        dest: SocketAddr,
    ) -> impl Future<Output = io::Result<()>> + Send {
        (**self).send_to(packet, dest)
    }

    fn recv_from(&self) -> impl Future<Output = io::Result<(Vec<u8>, SocketAddr)>> + Send {
        (**self).recv_from()
    }

    fn local_addr(&self) -> io::Result<SocketAddr> {
        (**self).local_addr()
    }
}

/// An async, packet-oriented UDP socket.
///
/// All methods are `&self` so the socket can be shared across tasks.
#[derive(Debug)]
pub struct Socket {
    /// Address this socket is bound to (filled in after OS assigns ephemeral port).
    pub local_addr: SocketAddr,
    inner: UdpSocket,
}

impl Socket {
    /// Bind a new socket to `local_addr`.
    ///
    /// Passing `0.0.0.0:0` lets the OS choose an ephemeral port.
    pub async fn bind(local_addr: SocketAddr) -> io::Result<Self> {
        let inner = UdpSocket::bind(local_addr).await?;
        let local_addr = inner.local_addr()?;
        Ok(Self { local_addr, inner })
    }
}

impl Channel for Socket {
    async fn send_to(&self, packet: &Packet, dest: SocketAddr) -> io::Result<()> {
        let bytes = packet.encode();
        self.inner.send_to(&bytes, dest).await?;
        Ok(())
    }

    /// Datagrams longer than [`MAX_DATAGRAM`] are truncated by the OS.
    async fn recv_from(&self) -> io::Result<(Vec<u8>, SocketAddr)> {
        let mut buf = vec![0u8; MAX_DATAGRAM];
        let (n, addr) = self.inner.recv_from(&mut buf).await?;
        buf.truncate(n);
        Ok((buf, addr))
    }

    fn local_addr(&self) -> io::Result<SocketAddr> {
        Ok(self.local_addr)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::packet::flags;

    #[tokio::test]
    async fn packets_cross_loopback_intact() {
        let a = Socket::bind("127.0.0.1:0".parse().unwrap()).await.unwrap();
        let b = Socket::bind("127.0.0.1:0".parse().unwrap()).await.unwrap();
        let pkt = Packet::control(3, 4, flags::SYN);
        a.send_to(&pkt, b.local_addr).await.unwrap();
        let (bytes, from) = b.recv_from().await.unwrap();
        assert_eq!(from, a.local_addr);
        assert_eq!(Packet::decode(&bytes).unwrap(), pkt);
    }

    #[tokio::test]
    async fn shared_socket_is_a_channel() {
        let a = Arc::new(Socket::bind("127.0.0.1:0".parse().unwrap()).await.unwrap());
        let b = Socket::bind("127.0.0.1:0".parse().unwrap()).await.unwrap();
        Channel::send_to(&a, &Packet::data(1, b"hi".to_vec()), b.local_addr)
            .await
            .unwrap();
        let (bytes, _) = b.recv_from().await.unwrap();
        assert_eq!(&bytes[6..], b"hi");
        assert_eq!(Channel::local_addr(&a).unwrap(), a.local_addr);
    }
}
