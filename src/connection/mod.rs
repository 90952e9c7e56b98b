//! Media connections
//!
//! A [`MediaConnection`] is one voice session: it negotiates codec and
//! encryption mode once from the session description, then owns the frame
//! provider, the poller driving it and the session secret until disposed.

pub mod events;
pub mod handle;

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{error, info};
use uuid::Uuid;

use crate::codec::Codec;
use crate::context::NodeContext;
use crate::crypto::{EncryptionMode, SecretKey};
use crate::error::{Result, SessionError};
use crate::media::{FrameProvider, FrameSource, OpusAudioFrameProvider};
use crate::network::{discover_address, PacketTransport, UdpTransport};
use crate::poller::{AudioPipeline, FramePoller, IntervalPoller, PipelineStats, SequenceTimestamp};
use crate::protocol::{ConnectionEvent, SessionDescription, SpeakingFlags};

pub use events::{EventBus, Subscription};
pub use handle::{CommandSender, ConnectionHandle};

pub struct MediaConnection {
    handle: ConnectionHandle,
    codec: &'static Codec,
    mode_name: &'static str,
    speaking_mask: SpeakingFlags,
    external_addr: Option<SocketAddr>,
    pipeline: Arc<Mutex<AudioPipeline>>,
    poller: IntervalPoller<AudioPipeline>,
    disposed: AtomicBool,
}

/// Pick codec, mode and key for a session
fn negotiate(
    ctx: &NodeContext,
    session: &SessionDescription,
) -> Result<(&'static Codec, Box<dyn EncryptionMode>, SecretKey)> {
    let codec = ctx.codecs().get(session.payload_type)?;
    let key = SecretKey::try_from(session.secret_key.as_slice())?;
    let mode = ctx
        .encryption()
        .negotiate(&session.modes, &ctx.voice().encryption_modes)?;
    Ok((codec, mode, key))
}

impl MediaConnection {
    /// Set up a session over an existing transport. Nothing is polled until
    /// [`start_frame_polling`](Self::start_frame_polling).
    pub fn establish(
        ctx: &NodeContext,
        guild_id: u64,
        session: &SessionDescription,
        transport: Arc<dyn PacketTransport>,
        commands: CommandSender,
    ) -> Result<Self> {
        let (codec, mode, key) = negotiate(ctx, session).map_err(|e| {
            error!(guild_id, ?session, "session negotiation failed: {}", e);
            e
        })?;
        let mode_name = mode.name();

        let handle = ConnectionHandle::new(guild_id, session.ssrc, ctx.runtime().clone(), commands);
        let pipeline = Arc::new(Mutex::new(AudioPipeline::new(
            codec,
            session.ssrc,
            mode,
            key,
            transport,
        )));
        let poller = IntervalPoller::new(ctx.runtime().clone(), codec.frame_interval(), pipeline.clone());

        info!(
            session = %handle.id(),
            guild_id,
            ssrc = session.ssrc,
            codec = codec.name,
            mode = mode_name,
            "media connection established"
        );

        Ok(Self {
            handle,
            codec,
            mode_name,
            speaking_mask: ctx.voice().speaking_mask,
            external_addr: None,
            pipeline,
            poller,
            disposed: AtomicBool::new(false),
        })
    }

    /// Open a UDP transport to the session endpoint, run IP discovery if
    /// configured, then [`establish`](Self::establish).
    pub async fn connect(
        ctx: &NodeContext,
        bind_addr: SocketAddr,
        guild_id: u64,
        session: &SessionDescription,
        commands: CommandSender,
    ) -> Result<Self> {
        let voice = ctx.voice();
        let transport = UdpTransport::connect(bind_addr, session.endpoint, voice.send_buffer_size).await?;

        let external_addr = if voice.ip_discovery {
            Some(discover_address(transport.socket(), session.ssrc, voice.discovery_timeout()).await?)
        } else {
            None
        };

        let mut connection = Self::establish(ctx, guild_id, session, Arc::new(transport), commands)?;
        connection.external_addr = external_addr;
        Ok(connection)
    }

    /// Session id
    pub fn id(&self) -> Uuid {
        self.handle.id()
    }

    /// Handle shared with the frame provider
    pub fn handle(&self) -> &ConnectionHandle {
        &self.handle
    }

    /// Guild this session belongs to
    pub fn guild_id(&self) -> u64 {
        self.handle.guild_id()
    }

    /// Synchronization source written into every header
    pub fn ssrc(&self) -> u32 {
        self.handle.ssrc()
    }

    /// Codec the session was negotiated for
    pub fn codec(&self) -> &'static Codec {
        self.codec
    }

    /// Name of the negotiated encryption mode
    pub fn mode_name(&self) -> &'static str {
        self.mode_name
    }

    /// Address the voice server sees us at, if discovery ran
    pub fn external_addr(&self) -> Option<SocketAddr> {
        self.external_addr
    }

    /// Replace the frame provider, disposing the previous one
    pub fn set_frame_provider(&self, provider: Box<dyn FrameProvider>) -> Result<()> {
        if self.is_disposed() {
            let mut provider = provider;
            provider.dispose();
            return Err(SessionError::Disposed.into());
        }
        self.pipeline.lock().set_provider(Some(provider));
        Ok(())
    }

    /// Wrap `source` in a silence-aware Opus provider and install it
    pub fn set_frame_source<S: FrameSource + 'static>(&self, source: S) -> Result<()> {
        let provider = OpusAudioFrameProvider::with_mask(&self.handle, source, self.speaking_mask);
        self.set_frame_provider(Box::new(provider))
    }

    /// Start paced sending. Fails once disposed.
    pub fn start_frame_polling(&self) -> Result<()> {
        if self.is_disposed() {
            return Err(SessionError::Disposed.into());
        }
        self.poller.start();
        Ok(())
    }

    /// Stop paced sending; returns after any in-flight tick
    pub fn stop_frame_polling(&self) {
        self.poller.stop();
    }

    /// Check if the poller is running
    pub fn is_polling(&self) -> bool {
        self.poller.is_polling()
    }

    /// Forward a speaking notification to the control plane
    pub fn update_speaking_state(&self, mask: SpeakingFlags) {
        self.handle.update_speaking_state(mask);
    }

    /// Route a control-plane event to this connection's listeners
    pub fn dispatch(&self, event: ConnectionEvent) -> usize {
        self.handle.dispatch(event)
    }

    /// Swap in a new session secret
    pub fn update_key(&self, secret: &[u8]) -> Result<()> {
        let key = SecretKey::try_from(secret)?;
        self.pipeline.lock().set_key(key);
        Ok(())
    }

    /// Snapshot of send statistics
    pub fn stats(&self) -> PipelineStats {
        self.pipeline.lock().stats()
    }

    /// Current sequence number and timestamp
    pub fn counters(&self) -> SequenceTimestamp {
        self.pipeline.lock().counters()
    }

    /// Stop polling, dispose the provider and drop the secret. Idempotent.
    pub fn dispose(&self) {
        if self.disposed.swap(true, Ordering::AcqRel) {
            return;
        }

        self.poller.dispose();
        let stats = {
            let mut pipeline = self.pipeline.lock();
            pipeline.release();
            pipeline.stats()
        };

        info!(
            session = %self.handle.id(),
            guild_id = self.handle.guild_id(),
            packets = stats.packets_sent,
            "media connection disposed"
        );
    }

    /// Check if the connection has been disposed
    pub fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::Acquire)
    }
}

impl Drop for MediaConnection {
    fn drop(&mut self) {
        self.dispose();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::opus;
    use crate::config::VoiceConfig;
    use crate::crypto::XSalsa20Poly1305Mode;
    use crate::error::{CodecError, CryptoError, Error};
    use crate::media::{create_shared_queue, QueueFrameSource};
    use crate::network::channel_transport;
    use crate::protocol::{GatewayCommand, RtpHeader};
    use bytes::{Bytes, BytesMut};
    use crossbeam_channel::Receiver;
    use std::time::Duration;
    use tokio::runtime::Handle;
    use tokio::sync::mpsc;

    const SECRET: [u8; 32] = [9u8; 32];

    fn session(modes: &[&str]) -> SessionDescription {
        SessionDescription {
            endpoint: "127.0.0.1:50000".parse().unwrap(),
            ssrc: 1234,
            secret_key: SECRET.to_vec(),
            modes: modes.iter().map(|m| m.to_string()).collect(),
            payload_type: opus::PAYLOAD_TYPE,
        }
    }

    struct Fixture {
        connection: MediaConnection,
        packets: Receiver<Bytes>,
        commands: mpsc::UnboundedReceiver<GatewayCommand>,
    }

    fn establish(session: &SessionDescription) -> Result<Fixture> {
        let ctx = NodeContext::with_defaults(Handle::current(), VoiceConfig::default());
        let (transport, packets) = channel_transport(64);
        let (tx, commands) = mpsc::unbounded_channel();
        let connection = MediaConnection::establish(&ctx, 7, session, Arc::new(transport), tx)?;
        Ok(Fixture {
            connection,
            packets,
            commands,
        })
    }

    #[tokio::test]
    async fn test_negotiates_preferred_mode() {
        let fixture = establish(&session(&["xsalsa20_poly1305", "xsalsa20_poly1305_suffix"])).unwrap();
        assert_eq!(fixture.connection.mode_name(), "xsalsa20_poly1305_suffix");
        assert_eq!(fixture.connection.codec().payload_type, opus::PAYLOAD_TYPE);
        assert!(!fixture.connection.is_polling());
    }

    #[tokio::test]
    async fn test_negotiation_failures() {
        let err = establish(&session(&["aead_aes256_gcm_rtpsize"])).err().unwrap();
        assert!(matches!(err, Error::Session(SessionError::NoCommonEncryptionMode(_))));

        let mut short_key = session(&["xsalsa20_poly1305"]);
        short_key.secret_key.truncate(16);
        let err = establish(&short_key).err().unwrap();
        assert!(matches!(err, Error::Crypto(CryptoError::InvalidKeyLength(16))));

        let mut unknown_codec = session(&["xsalsa20_poly1305"]);
        unknown_codec.payload_type = 0x60;
        let err = establish(&unknown_codec).err().unwrap();
        assert!(matches!(err, Error::Codec(CodecError::UnknownPayloadType(0x60))));
    }

    #[tokio::test(start_paused = true)]
    async fn test_streams_queue_then_silence_burst() {
        let mut fixture = establish(&session(&["xsalsa20_poly1305"])).unwrap();
        let queue = create_shared_queue(8);
        for i in 0..3u8 {
            queue.push(Bytes::from(vec![i; 32])).unwrap();
        }

        fixture.connection.set_frame_source(QueueFrameSource::new(queue)).unwrap();
        fixture.connection.start_frame_polling().unwrap();
        tokio::time::sleep(Duration::from_millis(250)).await;
        fixture.connection.stop_frame_polling();

        let key = SecretKey::new(SECRET);
        let mut mode = XSalsa20Poly1305Mode::new();
        let packets: Vec<Bytes> = fixture.packets.try_iter().collect();
        assert_eq!(packets.len(), 8);

        for (n, packet) in packets.iter().enumerate() {
            let header = RtpHeader::parse(packet).unwrap();
            assert_eq!(header.sequence, n as u16);
            assert_eq!(header.timestamp, n as u32 * 960);
            assert_eq!(header.ssrc, 1234);

            let mut plain = BytesMut::new();
            assert!(mode.open(packet, &mut plain, &key));
            if n < 3 {
                assert_eq!(&plain[..], &[n as u8; 32][..]);
            } else {
                assert_eq!(&plain[..], opus::SILENCE_FRAME);
            }
        }

        let mut masks = Vec::new();
        while let Ok(GatewayCommand::Speaking(update)) = fixture.commands.try_recv() {
            assert_eq!(update.ssrc, 1234);
            masks.push(update.speaking.bits());
        }
        assert_eq!(masks, vec![1, 0]);
        assert_eq!(fixture.connection.stats().packets_sent, 8);
    }

    #[tokio::test(start_paused = true)]
    async fn test_dispose_is_idempotent() {
        let fixture = establish(&session(&["xsalsa20_poly1305"])).unwrap();
        let queue = create_shared_queue(8);
        fixture.connection.set_frame_source(QueueFrameSource::new(queue.clone())).unwrap();
        fixture.connection.start_frame_polling().unwrap();
        tokio::time::sleep(Duration::from_millis(5)).await;

        fixture.connection.dispose();
        fixture.connection.dispose();
        assert!(fixture.connection.is_disposed());
        assert!(!fixture.connection.is_polling());

        queue.push(Bytes::from_static(&[1, 2, 3])).unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(fixture.packets.try_recv().is_err());

        assert!(matches!(
            fixture.connection.start_frame_polling(),
            Err(Error::Session(SessionError::Disposed))
        ));
        assert!(fixture
            .connection
            .set_frame_source(QueueFrameSource::new(queue))
            .is_err());
    }

    #[tokio::test]
    async fn test_update_speaking_state_forwards() {
        let mut fixture = establish(&session(&["xsalsa20_poly1305"])).unwrap();
        fixture.connection.update_speaking_state(SpeakingFlags::SOUNDSHARE);

        let GatewayCommand::Speaking(update) = fixture.commands.try_recv().unwrap();
        assert_eq!(update.speaking, SpeakingFlags::SOUNDSHARE);
        assert_eq!(update.delay, 0);
        assert_eq!(update.ssrc, 1234);
    }

    #[tokio::test]
    async fn test_update_key_checks_length() {
        let fixture = establish(&session(&["xsalsa20_poly1305"])).unwrap();
        assert!(fixture.connection.update_key(&[1u8; 32]).is_ok());
        assert!(fixture.connection.update_key(&[1u8; 31]).is_err());
    }
}
