//! Opus descriptor
//!
//! The voice transport only carries pre-encoded Opus frames; encoding happens
//! upstream of the node.

use super::Codec;

/// Payload type the voice server expects for Opus
pub const PAYLOAD_TYPE: u8 = 0x78;

/// Frame duration in milliseconds
pub const FRAME_DURATION_MS: u32 = 20;

/// Opus always clocks RTP at 48 kHz
pub const SAMPLE_RATE: u32 = 48_000;

/// Samples per 20 ms frame at 48 kHz
pub const FRAME_SIZE: u32 = 960;

/// Opus encoding of 20 ms of digital silence
pub const SILENCE_FRAME: [u8; 3] = [0xF8, 0xFF, 0xFE];

/// Largest Opus frame we accept from a source
pub const MAX_FRAME_SIZE: usize = 1275;

pub static OPUS: Codec = Codec {
    name: "opus",
    payload_type: PAYLOAD_TYPE,
    frame_interval_ms: FRAME_DURATION_MS,
    sample_rate: SAMPLE_RATE,
    samples_per_frame: FRAME_SIZE,
    silence_frame: &SILENCE_FRAME,
};
