//! # Voice Node
//!
//! Paced, encrypted Opus delivery over a chat platform's UDP voice transport.
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────────┐
//! │                                 VOICE NODE                                   │
//! │                                                                              │
//! │   control plane ──► SessionDescription { endpoint, ssrc, secret, modes }    │
//! │                                     │                                        │
//! │                                     ▼                                        │
//! │  ┌─────────────────────────────────────────────────────────────────────┐    │
//! │  │                    VoiceNode (node) - one per guild                  │    │
//! │  │  ┌──────────────────────────────────────────────────────────────┐   │    │
//! │  │  │  MediaConnection (connection)                                 │   │    │
//! │  │  │    negotiate codec + encryption mode + secret, once           │   │    │
//! │  │  │                                                               │   │    │
//! │  │  │  ┌──────────────┐   ┌───────────────┐   ┌───────────────┐     │   │    │
//! │  │  │  │ FrameQueue   │──►│ OpusAudio     │──►│ AudioPipeline │     │   │    │
//! │  │  │  │ (media)      │   │ FrameProvider │   │ (poller)      │     │   │    │
//! │  │  │  │ prefetched   │   │ silence burst │   │ RTP header    │     │   │    │
//! │  │  │  │ opus frames  │   │ speaking flag │   │ seal + send   │     │   │    │
//! │  │  │  └──────────────┘   └───────┬───────┘   └───────┬───────┘     │   │    │
//! │  │  │                             │                   │             │   │    │
//! │  │  │            speaking (op 5)  │     IntervalPoller│ every 20ms  │   │    │
//! │  │  └─────────────────────────────┼───────────────────┼─────────────┘   │    │
//! │  └────────────────────────────────┼───────────────────┼─────────────────┘    │
//! │                                   ▼                   ▼                      │
//! │                         gateway commands     shared tokio worker pool        │
//! │                                                       │                      │
//! └───────────────────────────────────────────────────────┼──────────────────────┘
//!                                                         │ UDP
//!                                                         ▼
//!                 [0x80|pt|seq|timestamp|ssrc][ xsalsa20_poly1305(opus frame) ]
//!                                                   voice server
//! ```

pub mod codec;
pub mod config;
pub mod connection;
pub mod context;
pub mod crypto;
pub mod error;
pub mod media;
pub mod network;
pub mod node;
pub mod poller;
pub mod protocol;

pub use connection::MediaConnection;
pub use context::NodeContext;
pub use error::{Error, Result};
pub use node::VoiceNode;

/// Application-wide constants
pub mod constants {
    /// Default size of the shared scheduling pool
    pub const DEFAULT_WORKER_THREADS: usize = 2;

    /// Maximum packet size for UDP
    pub const MAX_PACKET_SIZE: usize = 1472; // MTU - IP/UDP headers

    /// Pre-fetched frame queue capacity (in frames)
    pub const FRAME_QUEUE_CAPACITY: usize = 256;

    /// Default socket send buffer, in bytes
    pub const DEFAULT_SEND_BUFFER_SIZE: usize = 256 * 1024;
}
