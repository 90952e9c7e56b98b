//! Cheap, clonable view of a media connection
//!
//! Frame providers hold one of these instead of the connection itself: it can
//! push speaking notifications to the control plane and listen to connection
//! events, nothing more.

use std::sync::Arc;

use tokio::runtime::Handle;
use tokio::sync::mpsc;
use tracing::{debug, trace};
use uuid::Uuid;

use super::events::{EventBus, Subscription};
use crate::protocol::{ConnectionEvent, GatewayCommand, SpeakingFlags};

/// Outbound control-plane commands of one connection
pub type CommandSender = mpsc::UnboundedSender<GatewayCommand>;

#[derive(Clone)]
pub struct ConnectionHandle {
    inner: Arc<Inner>,
}

struct Inner {
    id: Uuid,
    guild_id: u64,
    ssrc: u32,
    runtime: Handle,
    events: EventBus,
    commands: CommandSender,
}

impl ConnectionHandle {
    pub fn new(guild_id: u64, ssrc: u32, runtime: Handle, commands: CommandSender) -> Self {
        Self {
            inner: Arc::new(Inner {
                id: Uuid::new_v4(),
                guild_id,
                ssrc,
                runtime,
                events: EventBus::new(),
                commands,
            }),
        }
    }

    /// Unique id of this session, used in logs
    pub fn id(&self) -> Uuid {
        self.inner.id
    }

    pub fn guild_id(&self) -> u64 {
        self.inner.guild_id
    }

    pub fn ssrc(&self) -> u32 {
        self.inner.ssrc
    }

    pub fn runtime(&self) -> &Handle {
        &self.inner.runtime
    }

    /// Queue a speaking notification for the control plane; never blocks
    pub fn update_speaking_state(&self, mask: SpeakingFlags) {
        trace!(session = %self.inner.id, mask = mask.bits(), "speaking state");
        if self
            .inner
            .commands
            .send(GatewayCommand::speaking(mask, self.inner.ssrc))
            .is_err()
        {
            debug!(session = %self.inner.id, "control plane gone, speaking update dropped");
        }
    }

    /// Publish a control-plane event to this connection's listeners
    pub fn dispatch(&self, event: ConnectionEvent) -> usize {
        self.inner.events.publish(event)
    }

    /// Listen to this connection's events until the subscription is cancelled
    pub fn on_event<F>(&self, handler: F) -> Subscription
    where
        F: FnMut(ConnectionEvent) + Send + 'static,
    {
        self.inner.events.subscribe(&self.inner.runtime, handler)
    }
}
