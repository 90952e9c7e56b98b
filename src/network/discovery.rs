//! External address discovery
//!
//! The voice server echoes our public address back when sent a discovery
//! request over the media socket:
//!
//! ```text
//! | type (u16) | length (u16) | ssrc (u32) | address (64, NUL padded) | port (u16) |
//! ```
//!
//! All integers are big-endian. Requests carry type `0x0001`, responses
//! `0x0002`; `length` counts everything after itself (70).

use std::net::{IpAddr, SocketAddr};
use std::time::Duration;

use bytes::{Buf, BufMut, BytesMut};
use tokio::net::UdpSocket;
use tracing::debug;

use crate::error::{NetworkError, Result};

pub const DISCOVERY_PACKET_LEN: usize = 74;

const REQUEST_TYPE: u16 = 0x0001;
const RESPONSE_TYPE: u16 = 0x0002;
const BODY_LEN: u16 = 70;
const ADDRESS_LEN: usize = 64;

/// Build a discovery request for `ssrc`
pub fn request(ssrc: u32) -> BytesMut {
    let mut buf = BytesMut::with_capacity(DISCOVERY_PACKET_LEN);
    buf.put_u16(REQUEST_TYPE);
    buf.put_u16(BODY_LEN);
    buf.put_u32(ssrc);
    buf.put_bytes(0, ADDRESS_LEN + 2);
    buf
}

/// Build the server's answer; used by tests and local relays
pub fn response(ssrc: u32, addr: SocketAddr) -> BytesMut {
    let mut buf = BytesMut::with_capacity(DISCOVERY_PACKET_LEN);
    buf.put_u16(RESPONSE_TYPE);
    buf.put_u16(BODY_LEN);
    buf.put_u32(ssrc);

    let ip = addr.ip().to_string();
    let ip = &ip.as_bytes()[..ip.len().min(ADDRESS_LEN - 1)];
    buf.put_slice(ip);
    buf.put_bytes(0, ADDRESS_LEN - ip.len());
    buf.put_u16(addr.port());
    buf
}

/// Parse a discovery response, checking it answers `ssrc`
pub fn parse_response(packet: &[u8], ssrc: u32) -> Result<SocketAddr> {
    if packet.len() < DISCOVERY_PACKET_LEN {
        return Err(NetworkError::InvalidDiscoveryResponse.into());
    }

    let mut buf = packet;
    let kind = buf.get_u16();
    let len = buf.get_u16();
    let echoed = buf.get_u32();
    if kind != RESPONSE_TYPE || len != BODY_LEN || echoed != ssrc {
        return Err(NetworkError::InvalidDiscoveryResponse.into());
    }

    let address = &buf[..ADDRESS_LEN];
    let end = address.iter().position(|&b| b == 0).unwrap_or(ADDRESS_LEN);
    let ip: IpAddr = std::str::from_utf8(&address[..end])
        .ok()
        .and_then(|s| s.parse().ok())
        .ok_or(NetworkError::InvalidDiscoveryResponse)?;

    buf.advance(ADDRESS_LEN);
    let port = buf.get_u16();

    Ok(SocketAddr::new(ip, port))
}

/// Ask the connected voice server for our external address
///
/// Runs on the control path before polling starts; the socket must already
/// be connected to the voice endpoint.
pub async fn discover_address(socket: &UdpSocket, ssrc: u32, timeout: Duration) -> Result<SocketAddr> {
    socket
        .send(&request(ssrc))
        .await
        .map_err(|e| NetworkError::SendFailed(e.to_string()))?;

    let mut buf = [0u8; DISCOVERY_PACKET_LEN];
    let len = tokio::time::timeout(timeout, socket.recv(&mut buf))
        .await
        .map_err(|_| NetworkError::Timeout)??;

    let addr = parse_response(&buf[..len], ssrc)?;
    debug!(ssrc, external = %addr, "external address discovered");
    Ok(addr)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_layout() {
        let packet = request(0xDEADBEEF);
        assert_eq!(packet.len(), DISCOVERY_PACKET_LEN);
        assert_eq!(&packet[..8], &[0x00, 0x01, 0x00, 0x46, 0xDE, 0xAD, 0xBE, 0xEF]);
        assert!(packet[8..].iter().all(|&b| b == 0));
    }

    #[test]
    fn test_parse_response() {
        let addr: SocketAddr = "203.0.113.7:50004".parse().unwrap();
        let packet = response(42, addr);
        assert_eq!(packet.len(), DISCOVERY_PACKET_LEN);
        assert_eq!(parse_response(&packet, 42).unwrap(), addr);
    }

    #[test]
    fn test_parse_rejects_bad_responses() {
        let addr: SocketAddr = "203.0.113.7:50004".parse().unwrap();
        let packet = response(42, addr);

        assert!(parse_response(&packet[..40], 42).is_err());
        assert!(parse_response(&packet, 43).is_err());
        assert!(parse_response(&request(42), 42).is_err());

        let mut garbage = packet.clone();
        garbage[8..12].copy_from_slice(b"nope");
        assert!(parse_response(&garbage, 42).is_err());
    }

    #[tokio::test]
    async fn test_discover_over_loopback() {
        let server = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let client = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        client.connect(server.local_addr().unwrap()).await.unwrap();

        let relay = tokio::spawn(async move {
            let mut buf = [0u8; DISCOVERY_PACKET_LEN];
            let (len, from) = server.recv_from(&mut buf).await.unwrap();
            assert_eq!(len, DISCOVERY_PACKET_LEN);
            server.send_to(&response(7, from), from).await.unwrap();
        });

        let addr = discover_address(&client, 7, Duration::from_secs(2)).await.unwrap();
        assert_eq!(addr, client.local_addr().unwrap());
        relay.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_discover_times_out() {
        let server = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let client = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        client.connect(server.local_addr().unwrap()).await.unwrap();

        let err = discover_address(&client, 7, Duration::from_millis(500))
            .await
            .unwrap_err();
        assert!(matches!(err, crate::error::Error::Network(NetworkError::Timeout)));
    }
}
