//! Node-wide shared state
//!
//! The only things connections share: the worker pool, the codec table, the
//! mode registry and the voice settings. Passed explicitly to whatever
//! creates connections.

use std::sync::Arc;

use tokio::runtime::Handle;

use crate::codec::CodecTable;
use crate::config::VoiceConfig;
use crate::crypto::EncryptionRegistry;

pub struct NodeContext {
    runtime: Handle,
    codecs: CodecTable,
    encryption: EncryptionRegistry,
    voice: VoiceConfig,
}

impl NodeContext {
    pub fn new(
        runtime: Handle,
        codecs: CodecTable,
        encryption: EncryptionRegistry,
        voice: VoiceConfig,
    ) -> Arc<Self> {
        Arc::new(Self {
            runtime,
            codecs,
            encryption,
            voice,
        })
    }

    /// Default codecs and modes on `runtime`
    pub fn with_defaults(runtime: Handle, voice: VoiceConfig) -> Arc<Self> {
        Self::new(runtime, CodecTable::default(), EncryptionRegistry::default(), voice)
    }

    /// Scheduling pool every poller runs on
    pub fn runtime(&self) -> &Handle {
        &self.runtime
    }

    pub fn codecs(&self) -> &CodecTable {
        &self.codecs
    }

    pub fn encryption(&self) -> &EncryptionRegistry {
        &self.encryption
    }

    pub fn voice(&self) -> &VoiceConfig {
        &self.voice
    }
}
