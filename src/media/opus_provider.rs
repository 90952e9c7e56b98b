//! Silence-aware Opus frame provider
//!
//! Wraps a [`FrameSource`] and adds what the voice protocol expects around
//! it: a burst of explicit silence frames whenever a talk spurt ends, and
//! speaking notifications on every talk/silence edge.
//!
//! Two independent mechanisms drive the speaking flag:
//!
//! * the silence countdown, a frame counter armed whenever the source stops
//!   providing; every silence frame clears the flag directly;
//! * a wall-clock debounce: the flag only follows the per-call "written"
//!   result when at least one frame interval has passed since the previous
//!   call, so back-to-back retrieves do not flap it.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use bytes::{BufMut, BytesMut};
use tokio::time::Instant;
use tracing::{debug, trace, warn};

use super::{advance_timestamp, FrameProvider, FrameSource};
use crate::codec::{opus, Codec};
use crate::connection::{ConnectionHandle, Subscription};
use crate::error::Result;
use crate::protocol::{ConnectionEvent, SpeakingFlags};

/// Silence frames sent after a talk spurt ends
pub const SILENCE_FRAME_COUNT: u32 = 5;

pub struct OpusAudioFrameProvider<S> {
    source: S,
    connection: ConnectionHandle,
    speaking_mask: SpeakingFlags,
    counter: u32,
    last_provide: bool,
    last_speaking: bool,
    last_frame_polled: Option<Instant>,
    speaking: Arc<AtomicBool>,
    user_connected: Subscription,
}

impl<S: FrameSource> OpusAudioFrameProvider<S> {
    /// Provider announcing plain microphone speech
    pub fn new(connection: &ConnectionHandle, source: S) -> Self {
        Self::with_mask(connection, source, SpeakingFlags::MICROPHONE)
    }

    /// Provider announcing `speaking_mask` while frames flow
    pub fn with_mask(connection: &ConnectionHandle, source: S, speaking_mask: SpeakingFlags) -> Self {
        let speaking = Arc::new(AtomicBool::new(false));

        // a listener joining mid-spurt needs the current mask again
        let user_connected = {
            let speaking = speaking.clone();
            let handle = connection.clone();
            connection.on_event(move |event| {
                if let ConnectionEvent::UserConnected { user_id, .. } = event {
                    if speaking.load(Ordering::Acquire) {
                        debug!(user_id, "resending speaking state");
                        handle.update_speaking_state(speaking_mask);
                    }
                }
            })
        };

        Self {
            source,
            connection: connection.clone(),
            speaking_mask,
            counter: 0,
            last_provide: false,
            last_speaking: false,
            last_frame_polled: None,
            speaking,
            user_connected,
        }
    }

    /// Get the wrapped source
    pub fn source(&self) -> &S {
        &self.source
    }

    /// Get the wrapped source mutably
    pub fn source_mut(&mut self) -> &mut S {
        &mut self.source
    }

    /// Whether the last notification sent was "speaking"
    pub fn is_speaking(&self) -> bool {
        self.speaking.load(Ordering::Acquire)
    }

    /// Silence frames still owed for the current burst
    pub fn silence_frames_remaining(&self) -> u32 {
        self.counter
    }

    fn set_speaking(&mut self, state: bool) {
        self.speaking.store(state, Ordering::Release);
        if state != self.last_speaking {
            self.last_speaking = state;
            let mask = if state {
                self.speaking_mask
            } else {
                SpeakingFlags::NONE
            };
            self.connection.update_speaking_state(mask);
        }
    }
}

impl<S: FrameSource> FrameProvider for OpusAudioFrameProvider<S> {
    fn can_send_frame(&mut self, codec: &Codec) -> bool {
        if codec.payload_type != opus::PAYLOAD_TYPE {
            return false;
        }

        if self.counter > 0 {
            return true;
        }

        let provide = self.source.can_provide();
        if self.last_provide != provide {
            self.last_provide = provide;
            if !provide {
                self.counter = SILENCE_FRAME_COUNT;
                return true;
            }
        }

        provide
    }

    fn retrieve(&mut self, codec: &Codec, buf: &mut BytesMut, timestamp: &mut u32) -> Result<bool> {
        if codec.payload_type != opus::PAYLOAD_TYPE {
            advance_timestamp(timestamp, codec);
            return Ok(false);
        }

        if self.counter > 0 {
            self.counter -= 1;
            buf.put_slice(codec.silence_frame);
            if self.is_speaking() {
                self.set_speaking(false);
            }

            trace!(remaining = self.counter, "silence frame");
            advance_timestamp(timestamp, codec);
            return Ok(false);
        }

        let start = buf.len();
        if let Err(e) = self.source.retrieve_opus_frame(buf) {
            // a failing source reads as "nothing this tick"
            warn!(ssrc = self.connection.ssrc(), "frame source failed: {}", e);
            buf.truncate(start);
        }
        advance_timestamp(timestamp, codec);

        let written = buf.len() != start;
        if written && !self.is_speaking() {
            self.set_speaking(true);
        }

        if !written {
            self.counter = SILENCE_FRAME_COUNT;
        }

        let now = Instant::now();
        let change_talking = match self.last_frame_polled {
            Some(last) => now.duration_since(last) >= codec.frame_interval(),
            None => true,
        };

        self.last_frame_polled = Some(now);
        if change_talking {
            self.set_speaking(written);
        }

        Ok(false)
    }

    fn dispose(&mut self) {
        if self.user_connected.cancel() {
            debug!(ssrc = self.connection.ssrc(), "frame provider disposed");
        }
    }
}
