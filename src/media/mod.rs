//! Frame providers
//!
//! A [`FrameProvider`] is asked once per tick whether it has something to send
//! and, if so, writes one raw codec payload into the poller's buffer. Upstream
//! audio sources plug in underneath through the narrower [`FrameSource`] SPI
//! and get the silence burst and speaking-state handling of
//! [`OpusAudioFrameProvider`] for free.
//!
//! Nothing in this module may block: any fetching or decoding has to happen
//! ahead of time, off the tick path (see [`FrameQueue`]).

pub mod buffer;
pub mod dca;
pub mod opus_provider;

use bytes::BytesMut;

use crate::codec::Codec;
use crate::error::Result;

pub use buffer::{create_shared_queue, FrameQueue, QueueFrameSource, SharedFrameQueue};
pub use dca::DcaReader;
pub use opus_provider::{OpusAudioFrameProvider, SILENCE_FRAME_COUNT};

/// Per-tick source of codec payloads, driven by a frame poller
pub trait FrameProvider: Send {
    /// Whether a frame should be sent for `codec` this tick
    fn can_send_frame(&mut self, codec: &Codec) -> bool;

    /// Write one payload into `buf` and advance `timestamp` by the codec's
    /// `samples_per_frame`. The timestamp advances on every call, whether or
    /// not anything was written.
    ///
    /// The returned flag reports that the packet was already fully handled
    /// upstream; pollers only log it.
    fn retrieve(&mut self, codec: &Codec, buf: &mut BytesMut, timestamp: &mut u32) -> Result<bool>;

    /// Release anything the provider holds on the connection. Idempotent.
    fn dispose(&mut self);
}

/// Upstream audio source SPI
///
/// Implementations must not block. Leaving `buf` untouched from
/// `retrieve_opus_frame` means "no frame this tick"; so does an error, which
/// is logged and anything partially written discarded.
pub trait FrameSource: Send {
    fn can_provide(&mut self) -> bool;

    fn retrieve_opus_frame(&mut self, buf: &mut BytesMut) -> Result<()>;
}

/// Advance an RTP timestamp by one frame of `codec`
pub fn advance_timestamp(timestamp: &mut u32, codec: &Codec) {
    *timestamp = timestamp.wrapping_add(codec.samples_per_frame);
}
