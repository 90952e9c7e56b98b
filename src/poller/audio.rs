//! Audio tick body: retrieve, packetize, seal, send

use std::sync::Arc;

use bytes::BytesMut;
use tracing::{trace, warn};

use super::FrameTick;
use crate::codec::Codec;
use crate::constants::MAX_PACKET_SIZE;
use crate::crypto::{EncryptionMode, SecretKey};
use crate::media::FrameProvider;
use crate::network::PacketTransport;
use crate::protocol::{RtpHeader, HEADER_LEN};

/// Per-connection RTP counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SequenceTimestamp {
    pub sequence: u16,
    pub timestamp: u32,
}

impl SequenceTimestamp {
    pub fn new(sequence: u16, timestamp: u32) -> Self {
        Self {
            sequence,
            timestamp,
        }
    }

    pub fn advance_sequence(&mut self) {
        self.sequence = self.sequence.wrapping_add(1);
    }

    pub fn advance_timestamp(&mut self, samples: u32) {
        self.timestamp = self.timestamp.wrapping_add(samples);
    }
}

/// Send statistics
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PipelineStats {
    pub packets_sent: u64,
    pub bytes_sent: u64,
    pub retrieve_failures: u64,
    pub seal_failures: u64,
    pub send_failures: u64,
}

/// Everything one connection's tick touches
///
/// Owned by exactly one connection and only ever accessed under that
/// connection's lock; the encryption mode's scratch buffers live here.
pub struct AudioPipeline {
    codec: &'static Codec,
    ssrc: u32,
    mode: Option<Box<dyn EncryptionMode>>,
    key: Option<SecretKey>,
    provider: Option<Box<dyn FrameProvider>>,
    transport: Arc<dyn PacketTransport>,
    counters: SequenceTimestamp,
    frame: BytesMut,
    packet: BytesMut,
    stats: PipelineStats,
}

impl AudioPipeline {
    pub fn new(
        codec: &'static Codec,
        ssrc: u32,
        mode: Box<dyn EncryptionMode>,
        key: SecretKey,
        transport: Arc<dyn PacketTransport>,
    ) -> Self {
        Self {
            codec,
            ssrc,
            mode: Some(mode),
            key: Some(key),
            provider: None,
            transport,
            counters: SequenceTimestamp::default(),
            frame: BytesMut::with_capacity(MAX_PACKET_SIZE),
            packet: BytesMut::with_capacity(MAX_PACKET_SIZE),
            stats: PipelineStats::default(),
        }
    }

    /// Start from specific counter values
    pub fn with_counters(mut self, counters: SequenceTimestamp) -> Self {
        self.counters = counters;
        self
    }

    pub fn counters(&self) -> SequenceTimestamp {
        self.counters
    }

    pub fn stats(&self) -> PipelineStats {
        self.stats
    }

    pub fn mode_name(&self) -> Option<&'static str> {
        self.mode.as_ref().map(|m| m.name())
    }

    pub fn has_provider(&self) -> bool {
        self.provider.is_some()
    }

    /// Install a new provider, disposing the previous one
    pub fn set_provider(&mut self, provider: Option<Box<dyn FrameProvider>>) {
        if let Some(mut old) = std::mem::replace(&mut self.provider, provider) {
            old.dispose();
        }
    }

    pub fn set_key(&mut self, key: SecretKey) {
        self.key = Some(key);
    }

    /// Dispose the provider and drop the secret and scratch buffers
    pub fn release(&mut self) {
        self.set_provider(None);
        self.key = None;
        self.mode = None;
    }
}

impl FrameTick for AudioPipeline {
    fn tick(&mut self) {
        let (Some(provider), Some(mode), Some(key)) =
            (self.provider.as_mut(), self.mode.as_mut(), self.key.as_ref())
        else {
            return;
        };

        if !provider.can_send_frame(self.codec) {
            return;
        }

        self.frame.clear();
        let timestamp = self.counters.timestamp;
        if let Err(e) = provider.retrieve(self.codec, &mut self.frame, &mut self.counters.timestamp) {
            self.stats.retrieve_failures += 1;
            warn!(ssrc = self.ssrc, "frame retrieval failed: {}", e);
            return;
        }

        if self.frame.is_empty() {
            return;
        }

        self.packet.clear();
        RtpHeader::new(self.codec.payload_type, self.counters.sequence, timestamp, self.ssrc)
            .write_to(&mut self.packet);

        if !mode.seal(&self.frame, &mut self.packet, key) {
            self.stats.seal_failures += 1;
            warn!(ssrc = self.ssrc, len = self.frame.len(), "failed to seal frame");
            return;
        }
        debug_assert!(self.packet.len() >= HEADER_LEN + self.frame.len());

        self.counters.advance_sequence();

        match self.transport.send_packet(&self.packet) {
            Ok(()) => {
                self.stats.packets_sent += 1;
                self.stats.bytes_sent += self.packet.len() as u64;
                trace!(
                    ssrc = self.ssrc,
                    sequence = self.counters.sequence.wrapping_sub(1),
                    timestamp,
                    "sent frame"
                );
            }
            Err(e) => {
                self.stats.send_failures += 1;
                warn!(ssrc = self.ssrc, "failed to send packet: {}", e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::{opus, OPUS};
    use crate::crypto::{XSalsa20Poly1305Mode, TAG_LEN};
    use crate::error::{Error, Result};
    use crate::media::advance_timestamp;
    use crate::network::{channel_transport, ChannelTransport};
    use bytes::{BufMut, Bytes};
    use crossbeam_channel::Receiver;
    use proptest::prelude::*;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicBool, Ordering};

    const KEY: [u8; 32] = [5u8; 32];

    /// Provider replaying a fixed script of payloads; `None` = skip tick
    struct Script {
        steps: VecDeque<Option<Result<Vec<u8>>>>,
        disposed: Arc<AtomicBool>,
    }

    impl FrameProvider for Script {
        fn can_send_frame(&mut self, _codec: &Codec) -> bool {
            match self.steps.front() {
                Some(Some(_)) => true,
                Some(None) => {
                    self.steps.pop_front();
                    false
                }
                None => false,
            }
        }

        fn retrieve(&mut self, codec: &Codec, buf: &mut BytesMut, timestamp: &mut u32) -> Result<bool> {
            advance_timestamp(timestamp, codec);
            match self.steps.pop_front() {
                Some(Some(Ok(bytes))) => {
                    buf.put_slice(&bytes);
                    Ok(false)
                }
                Some(Some(Err(e))) => Err(e),
                _ => Ok(false),
            }
        }

        fn dispose(&mut self) {
            self.disposed.store(true, Ordering::SeqCst);
        }
    }

    fn pipeline(
        steps: Vec<Option<Result<Vec<u8>>>>,
    ) -> (AudioPipeline, Receiver<Bytes>, Arc<AtomicBool>) {
        let (transport, rx): (ChannelTransport, _) = channel_transport(64);
        let disposed = Arc::new(AtomicBool::new(false));
        let mut pipeline = AudioPipeline::new(
            &OPUS,
            0x1234,
            Box::new(XSalsa20Poly1305Mode::new()),
            SecretKey::new(KEY),
            Arc::new(transport),
        );
        pipeline.set_provider(Some(Box::new(Script {
            steps: steps.into(),
            disposed: disposed.clone(),
        })));
        (pipeline, rx, disposed)
    }

    fn open(packet: &[u8]) -> Vec<u8> {
        let mut plain = BytesMut::new();
        assert!(XSalsa20Poly1305Mode::new().open(packet, &mut plain, &SecretKey::new(KEY)));
        plain.to_vec()
    }

    #[test]
    fn test_packets_carry_header_and_ciphertext() {
        let (mut pipeline, rx, _) = pipeline(vec![
            Some(Ok(vec![1, 2, 3])),
            Some(Ok(opus::SILENCE_FRAME.to_vec())),
        ]);
        pipeline.tick();
        pipeline.tick();

        let first = rx.try_recv().unwrap();
        let header = RtpHeader::parse(&first).unwrap();
        assert_eq!(header, RtpHeader::new(0x78, 0, 0, 0x1234));
        assert_eq!(first.len(), HEADER_LEN + 3 + TAG_LEN);
        assert_eq!(open(&first), vec![1, 2, 3]);

        let second = rx.try_recv().unwrap();
        let header = RtpHeader::parse(&second).unwrap();
        assert_eq!(header.sequence, 1);
        assert_eq!(header.timestamp, 960);
        assert_eq!(open(&second), opus::SILENCE_FRAME.to_vec());

        assert_eq!(pipeline.counters(), SequenceTimestamp::new(2, 1920));
        assert_eq!(pipeline.stats().packets_sent, 2);
    }

    #[test]
    fn test_skipped_tick_leaves_counters() {
        let (mut pipeline, rx, _) = pipeline(vec![None, Some(Ok(vec![9]))]);
        pipeline.tick();
        assert_eq!(pipeline.counters(), SequenceTimestamp::default());
        assert!(rx.try_recv().is_err());

        pipeline.tick();
        assert_eq!(pipeline.counters(), SequenceTimestamp::new(1, 960));
    }

    #[test]
    fn test_empty_frame_advances_timestamp_only() {
        let (mut pipeline, rx, _) = pipeline(vec![Some(Ok(vec![])), Some(Ok(vec![4]))]);
        pipeline.tick();
        assert_eq!(pipeline.counters(), SequenceTimestamp::new(0, 960));
        assert!(rx.try_recv().is_err());

        pipeline.tick();
        let header = RtpHeader::parse(&rx.try_recv().unwrap()).unwrap();
        assert_eq!((header.sequence, header.timestamp), (0, 960));
    }

    #[test]
    fn test_failed_retrieve_keeps_polling() {
        let (mut pipeline, rx, _) = pipeline(vec![
            Some(Err(Error::Source("decoder hiccup".into()))),
            Some(Ok(vec![1])),
        ]);
        pipeline.tick();
        assert_eq!(pipeline.stats().retrieve_failures, 1);
        assert!(rx.try_recv().is_err());

        pipeline.tick();
        assert!(rx.try_recv().is_ok());
        assert_eq!(pipeline.counters().sequence, 1);
    }

    #[test]
    fn test_seal_failure_skips_send() {
        let (mut pipeline, rx, _) = pipeline(vec![
            Some(Ok(vec![0u8; opus::MAX_FRAME_SIZE + 1])),
            Some(Ok(vec![1])),
        ]);
        pipeline.tick();
        assert_eq!(pipeline.stats().seal_failures, 1);
        assert_eq!(pipeline.counters().sequence, 0);
        assert!(rx.try_recv().is_err());

        pipeline.tick();
        let header = RtpHeader::parse(&rx.try_recv().unwrap()).unwrap();
        assert_eq!(header.sequence, 0);
    }

    #[test]
    fn test_send_failure_is_counted() {
        let (mut pipeline, rx, _) = pipeline(vec![Some(Ok(vec![1])), Some(Ok(vec![2]))]);
        drop(rx);
        pipeline.tick();
        pipeline.tick();
        assert_eq!(pipeline.stats().send_failures, 2);
        assert_eq!(pipeline.counters().sequence, 2);
    }

    #[test]
    fn test_release_disposes_provider_and_stops_ticks() {
        let (mut pipeline, rx, disposed) = pipeline(vec![Some(Ok(vec![1])), Some(Ok(vec![2]))]);
        pipeline.release();
        assert!(disposed.load(Ordering::SeqCst));
        assert!(!pipeline.has_provider());
        assert!(pipeline.mode_name().is_none());

        pipeline.tick();
        assert!(rx.try_recv().is_err());

        pipeline.release();
    }

    #[test]
    fn test_counters_wrap() {
        let (pipeline, rx, _) = pipeline(vec![Some(Ok(vec![1])), Some(Ok(vec![2]))]);
        let mut pipeline = pipeline.with_counters(SequenceTimestamp::new(u16::MAX, u32::MAX - 100));
        pipeline.tick();
        pipeline.tick();

        let first = RtpHeader::parse(&rx.try_recv().unwrap()).unwrap();
        let second = RtpHeader::parse(&rx.try_recv().unwrap()).unwrap();
        assert_eq!(first.sequence, u16::MAX);
        assert_eq!(second.sequence, 0);
        assert_eq!(first.timestamp, u32::MAX - 100);
        assert_eq!(second.timestamp, 859);
    }

    proptest! {
        #[test]
        fn prop_counters_step_and_wrap(
            sequence in any::<u16>(),
            timestamp in any::<u32>(),
            samples in 1u32..=5760,
            steps in 1usize..200,
        ) {
            let mut counters = SequenceTimestamp::new(sequence, timestamp);
            for _ in 0..steps {
                let before = counters;
                counters.advance_sequence();
                counters.advance_timestamp(samples);
                prop_assert_eq!(counters.sequence, ((before.sequence as u32 + 1) % 65_536) as u16);
                prop_assert_eq!(
                    counters.timestamp,
                    ((before.timestamp as u64 + samples as u64) % (1u64 << 32)) as u32
                );
            }
        }
    }
}
