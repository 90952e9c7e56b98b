//! Network subsystem for UDP voice transport

pub mod discovery;
pub mod udp;

pub use discovery::{discover_address, DISCOVERY_PACKET_LEN};
pub use udp::{channel_transport, create_socket, ChannelTransport, PacketTransport, UdpTransport};
