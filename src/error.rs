//! Error types for the voice node

use thiserror::Error;

/// Main error type for the node
#[derive(Error, Debug)]
pub enum Error {
    #[error("Codec error: {0}")]
    Codec(#[from] CodecError),

    #[error("Crypto error: {0}")]
    Crypto(#[from] CryptoError),

    #[error("Session error: {0}")]
    Session(#[from] SessionError),

    #[error("Network error: {0}")]
    Network(#[from] NetworkError),

    #[error("Frame source error: {0}")]
    Source(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Codec lookup errors
#[derive(Error, Debug)]
pub enum CodecError {
    #[error("Unknown payload type: {0:#04x}")]
    UnknownPayloadType(u8),

    #[error("Frame too large: {0} bytes")]
    FrameTooLarge(usize),

    #[error("Malformed DCA stream: {0}")]
    MalformedDca(String),
}

/// Encryption mode errors
#[derive(Error, Debug)]
pub enum CryptoError {
    #[error("Unsupported encryption mode: {0}")]
    UnsupportedMode(String),

    #[error("Invalid secret key length: {0} bytes")]
    InvalidKeyLength(usize),
}

/// Session negotiation and lifecycle errors
#[derive(Error, Debug)]
pub enum SessionError {
    #[error("No common encryption mode (offered: {0:?})")]
    NoCommonEncryptionMode(Vec<String>),

    #[error("Session already exists for guild {0}")]
    AlreadyExists(u64),

    #[error("Session not found for guild {0}")]
    NotFound(u64),

    #[error("Connection has been disposed")]
    Disposed,
}

/// Network errors
#[derive(Error, Debug)]
pub enum NetworkError {
    #[error("Socket bind failed: {0}")]
    BindFailed(String),

    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    #[error("Send failed: {0}")]
    SendFailed(String),

    #[error("Invalid packet format")]
    InvalidPacket,

    #[error("Invalid discovery response")]
    InvalidDiscoveryResponse,

    #[error("Packet too large: {0} bytes")]
    PacketTooLarge(usize),

    #[error("Timeout")]
    Timeout,
}

/// Result type alias for the node
pub type Result<T> = std::result::Result<T, Error>;
