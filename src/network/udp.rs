//! Packet transports
//!
//! The tick hands every finished packet to a [`PacketTransport`]. Sends are
//! fire-and-forget and must never wait: a full socket buffer drops the
//! packet rather than stalling the worker.

use std::io;
use std::net::SocketAddr;
use std::sync::Arc;

use bytes::Bytes;
use crossbeam_channel::{bounded, Receiver, Sender, TrySendError};
use socket2::{Domain, Protocol, Socket, Type};
use tokio::net::UdpSocket;
use tracing::{debug, info};

use crate::constants::MAX_PACKET_SIZE;
use crate::error::{NetworkError, Result};

/// Non-blocking sink for outgoing packets
pub trait PacketTransport: Send + Sync {
    fn send_packet(&self, packet: &[u8]) -> io::Result<()>;
}

/// Create a non-blocking UDP socket bound to `bind_addr`
pub fn create_socket(bind_addr: SocketAddr, send_buffer_size: usize) -> Result<Socket> {
    let domain = if bind_addr.is_ipv4() {
        Domain::IPV4
    } else {
        Domain::IPV6
    };

    let socket = Socket::new(domain, Type::DGRAM, Some(Protocol::UDP))
        .map_err(|e| NetworkError::BindFailed(e.to_string()))?;

    socket
        .set_send_buffer_size(send_buffer_size)
        .map_err(|e| NetworkError::BindFailed(e.to_string()))?;
    socket
        .set_nonblocking(true)
        .map_err(|e| NetworkError::BindFailed(e.to_string()))?;
    socket
        .bind(&bind_addr.into())
        .map_err(|e| NetworkError::BindFailed(format!("{}: {}", bind_addr, e)))?;

    debug!(%bind_addr, send_buffer_size, "UDP socket created");
    Ok(socket)
}

/// UDP transport connected to one voice endpoint
pub struct UdpTransport {
    socket: Arc<UdpSocket>,
    endpoint: SocketAddr,
}

impl UdpTransport {
    /// Bind and connect. Must be called from within the runtime.
    pub async fn connect(
        bind_addr: SocketAddr,
        endpoint: SocketAddr,
        send_buffer_size: usize,
    ) -> Result<Self> {
        let socket = create_socket(bind_addr, send_buffer_size)?;
        let socket = UdpSocket::from_std(socket.into())?;
        socket
            .connect(endpoint)
            .await
            .map_err(|e| NetworkError::ConnectionFailed(format!("{}: {}", endpoint, e)))?;

        // try_send only succeeds once the reactor has seen the socket writable
        socket
            .writable()
            .await
            .map_err(|e| NetworkError::ConnectionFailed(format!("{}: {}", endpoint, e)))?;

        info!(
            local = %socket.local_addr()?,
            %endpoint,
            "voice transport connected"
        );

        Ok(Self {
            socket: Arc::new(socket),
            endpoint,
        })
    }

    /// Get the underlying socket
    pub fn socket(&self) -> &Arc<UdpSocket> {
        &self.socket
    }

    /// Get the voice endpoint this transport sends to
    pub fn endpoint(&self) -> SocketAddr {
        self.endpoint
    }

    /// Get the local address the socket is bound to
    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.socket.local_addr()?)
    }
}

impl PacketTransport for UdpTransport {
    fn send_packet(&self, packet: &[u8]) -> io::Result<()> {
        if packet.len() > MAX_PACKET_SIZE {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                NetworkError::PacketTooLarge(packet.len()),
            ));
        }
        self.socket.try_send(packet).map(|_| ())
    }
}

/// In-memory transport; packets come out of the paired receiver
#[derive(Clone)]
pub struct ChannelTransport {
    tx: Sender<Bytes>,
}

/// Create a bounded in-memory transport
pub fn channel_transport(capacity: usize) -> (ChannelTransport, Receiver<Bytes>) {
    let (tx, rx) = bounded(capacity);
    (ChannelTransport { tx }, rx)
}

impl PacketTransport for ChannelTransport {
    fn send_packet(&self, packet: &[u8]) -> io::Result<()> {
        self.tx
            .try_send(Bytes::copy_from_slice(packet))
            .map_err(|e| match e {
                TrySendError::Full(_) => io::Error::new(io::ErrorKind::WouldBlock, "channel full"),
                TrySendError::Disconnected(_) => {
                    io::Error::new(io::ErrorKind::BrokenPipe, "receiver dropped")
                }
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_channel_transport() {
        let (transport, rx) = channel_transport(1);
        transport.send_packet(&[1, 2, 3]).unwrap();

        let err = transport.send_packet(&[4]).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::WouldBlock);
        assert_eq!(&rx.try_recv().unwrap()[..], &[1, 2, 3]);

        drop(rx);
        let err = transport.send_packet(&[5]).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::BrokenPipe);
    }

    #[tokio::test]
    async fn test_udp_transport_loopback() {
        let receiver = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let endpoint = receiver.local_addr().unwrap();

        let transport = UdpTransport::connect("127.0.0.1:0".parse().unwrap(), endpoint, 64 * 1024)
            .await
            .unwrap();
        assert_eq!(transport.endpoint(), endpoint);

        // first sends go straight out, no discovery round trip beforehand
        transport.send_packet(b"voice").unwrap();
        transport.send_packet(b"again").unwrap();

        let mut buf = [0u8; 64];
        let (len, from) = receiver.recv_from(&mut buf).await.unwrap();
        assert_eq!(&buf[..len], b"voice");
        assert_eq!(from, transport.local_addr().unwrap());
        let (len, _) = receiver.recv_from(&mut buf).await.unwrap();
        assert_eq!(&buf[..len], b"again");
    }

    #[tokio::test]
    async fn test_oversized_packet_rejected() {
        let receiver = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let transport = UdpTransport::connect(
            "127.0.0.1:0".parse().unwrap(),
            receiver.local_addr().unwrap(),
            64 * 1024,
        )
        .await
        .unwrap();

        let err = transport.send_packet(&vec![0u8; MAX_PACKET_SIZE + 1]).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidInput);
    }
}
