//! Codec descriptors
//!
//! A [`Codec`] is a static description of one payload type: how often a frame
//! is due, how many samples each frame advances the RTP clock, and which bytes
//! make up an explicit silence frame. Descriptors are immutable and shared by
//! every connection through a [`CodecTable`].

pub mod opus;

use std::time::Duration;

use crate::error::CodecError;

pub use opus::OPUS;

/// Static description of a payload type
#[derive(Debug, PartialEq, Eq)]
pub struct Codec {
    /// Human readable codec name
    pub name: &'static str,
    /// RTP payload type id
    pub payload_type: u8,
    /// Wall-clock period between frames
    pub frame_interval_ms: u32,
    /// Clock rate the RTP timestamp runs at
    pub sample_rate: u32,
    /// RTP timestamp advance per frame
    pub samples_per_frame: u32,
    /// Bytes sent verbatim for each frame of a silence burst
    pub silence_frame: &'static [u8],
}

impl Codec {
    /// Frame interval as a [`Duration`]
    pub fn frame_interval(&self) -> Duration {
        Duration::from_millis(self.frame_interval_ms as u64)
    }

    /// Whether `samples_per_frame` matches `frame_interval_ms` at `sample_rate`
    pub fn is_consistent(&self) -> bool {
        self.sample_rate as u64 * self.frame_interval_ms as u64
            == self.samples_per_frame as u64 * 1000
    }
}

/// Read-only table of supported codecs, looked up by payload type
#[derive(Debug)]
pub struct CodecTable {
    codecs: Vec<&'static Codec>,
}

impl CodecTable {
    pub fn new(codecs: Vec<&'static Codec>) -> Self {
        Self { codecs }
    }

    /// Look up a codec by its payload type
    pub fn get(&self, payload_type: u8) -> Result<&'static Codec, CodecError> {
        self.codecs
            .iter()
            .copied()
            .find(|c| c.payload_type == payload_type)
            .ok_or(CodecError::UnknownPayloadType(payload_type))
    }

    pub fn len(&self) -> usize {
        self.codecs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.codecs.is_empty()
    }
}

impl Default for CodecTable {
    fn default() -> Self {
        Self::new(vec![&OPUS])
    }
}
