//! Control-plane messages the voice transport consumes and produces
//!
//! Only the fields the transport depends on are modelled here: the session
//! description delivered before polling starts, the speaking notification sent
//! back on every speaking edge, and the connection events that make a provider
//! resend its current speaking mask.

use std::fmt;
use std::net::SocketAddr;

use serde::ser::SerializeStruct;
use serde::{Deserialize, Serialize, Serializer};

use crate::codec::opus;

/// Gateway opcode of the speaking notification
pub const OP_SPEAKING: u8 = 5;

/// Speaking mask bits
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SpeakingFlags(u32);

impl SpeakingFlags {
    pub const NONE: Self = Self(0);
    pub const MICROPHONE: Self = Self(1 << 0);
    pub const SOUNDSHARE: Self = Self(1 << 1);
    pub const PRIORITY: Self = Self(1 << 2);

    pub const fn from_bits(bits: u32) -> Self {
        Self(bits & 0b111)
    }

    pub const fn bits(self) -> u32 {
        self.0
    }

    pub const fn is_speaking(self) -> bool {
        self.0 != 0
    }

    pub const fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }
}

impl Default for SpeakingFlags {
    fn default() -> Self {
        Self::MICROPHONE
    }
}

impl std::ops::BitOr for SpeakingFlags {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

/// Body of the speaking notification
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SpeakingUpdate {
    pub speaking: SpeakingFlags,
    pub delay: u32,
    pub ssrc: u32,
}

/// Outbound control-plane command
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GatewayCommand {
    Speaking(SpeakingUpdate),
}

impl GatewayCommand {
    pub fn speaking(mask: SpeakingFlags, ssrc: u32) -> Self {
        GatewayCommand::Speaking(SpeakingUpdate {
            speaking: mask,
            delay: 0,
            ssrc,
        })
    }

    pub fn op(&self) -> u8 {
        match self {
            GatewayCommand::Speaking(_) => OP_SPEAKING,
        }
    }
}

impl Serialize for GatewayCommand {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut state = serializer.serialize_struct("GatewayCommand", 2)?;
        state.serialize_field("op", &self.op())?;
        match self {
            GatewayCommand::Speaking(update) => state.serialize_field("d", update)?,
        }
        state.end()
    }
}

/// Inbound control-plane event routed to a connection
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ConnectionEvent {
    UserConnected { user_id: u64, ssrc: Option<u32> },
    UserDisconnected { user_id: u64 },
}

fn default_payload_type() -> u8 {
    opus::PAYLOAD_TYPE
}

/// Session parameters delivered once per session before polling starts
#[derive(Clone, Deserialize)]
pub struct SessionDescription {
    /// Voice server UDP endpoint
    pub endpoint: SocketAddr,
    /// Synchronization source assigned by the voice server
    pub ssrc: u32,
    /// Session secret
    pub secret_key: Vec<u8>,
    /// Encryption modes the voice server offers
    pub modes: Vec<String>,
    /// Payload type of the negotiated codec
    #[serde(default = "default_payload_type")]
    pub payload_type: u8,
}

impl fmt::Debug for SessionDescription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionDescription")
            .field("endpoint", &self.endpoint)
            .field("ssrc", &self.ssrc)
            .field("secret_key", &"[REDACTED]")
            .field("modes", &self.modes)
            .field("payload_type", &self.payload_type)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_speaking_command_json() {
        let cmd = GatewayCommand::speaking(SpeakingFlags::MICROPHONE, 42);
        let json = serde_json::to_value(&cmd).unwrap();
        assert_eq!(
            json,
            serde_json::json!({ "op": 5, "d": { "speaking": 1, "delay": 0, "ssrc": 42 } })
        );
    }

    #[test]
    fn test_speaking_flags() {
        let mask = SpeakingFlags::MICROPHONE | SpeakingFlags::PRIORITY;
        assert_eq!(mask.bits(), 5);
        assert!(mask.contains(SpeakingFlags::PRIORITY));
        assert!(!mask.contains(SpeakingFlags::SOUNDSHARE));
        assert!(!SpeakingFlags::NONE.is_speaking());
        assert_eq!(SpeakingFlags::from_bits(0xFF).bits(), 0b111);
    }

    #[test]
    fn test_session_description_redacts_secret() {
        let desc: SessionDescription = serde_json::from_value(serde_json::json!({
            "endpoint": "127.0.0.1:50000",
            "ssrc": 7,
            "secret_key": [1, 2, 3],
            "modes": ["xsalsa20_poly1305"]
        }))
        .unwrap();

        assert_eq!(desc.payload_type, opus::PAYLOAD_TYPE);
        let printed = format!("{:?}", desc);
        assert!(printed.contains("[REDACTED]"));
        assert!(!printed.contains("[1, 2, 3]"));
    }

    #[test]
    fn test_connection_event_json() {
        let event: ConnectionEvent = serde_json::from_str(
            r#"{ "type": "user_connected", "user_id": 9, "ssrc": null }"#,
        )
        .unwrap();
        assert_eq!(
            event,
            ConnectionEvent::UserConnected {
                user_id: 9,
                ssrc: None
            }
        );
    }
}
