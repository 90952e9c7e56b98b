//! Wire formats: voice packet header and control-plane messages

pub mod gateway;
pub mod rtp;

pub use gateway::{
    ConnectionEvent, GatewayCommand, SessionDescription, SpeakingFlags, SpeakingUpdate,
};
pub use rtp::{RtpHeader, HEADER_LEN};
