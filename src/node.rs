//! Voice node: the registry of live media connections

use std::net::SocketAddr;
use std::sync::Arc;

use dashmap::mapref::entry::Entry;
use dashmap::mapref::one::Ref;
use dashmap::DashMap;
use tracing::{debug, info};

use crate::connection::{CommandSender, MediaConnection};
use crate::context::NodeContext;
use crate::error::{Result, SessionError};
use crate::media::{create_shared_queue, QueueFrameSource, SharedFrameQueue};
use crate::network::PacketTransport;
use crate::protocol::{ConnectionEvent, SessionDescription};

/// One connection per guild, all sharing a single [`NodeContext`]
pub struct VoiceNode {
    ctx: Arc<NodeContext>,
    bind_addr: SocketAddr,
    connections: DashMap<u64, MediaConnection>,
}

impl VoiceNode {
    pub fn new(ctx: Arc<NodeContext>, bind_addr: SocketAddr) -> Self {
        Self {
            ctx,
            bind_addr,
            connections: DashMap::new(),
        }
    }

    pub fn context(&self) -> &Arc<NodeContext> {
        &self.ctx
    }

    /// Open a UDP session for `guild_id`
    pub async fn connect(
        &self,
        guild_id: u64,
        session: &SessionDescription,
        commands: CommandSender,
    ) -> Result<()> {
        if self.connections.contains_key(&guild_id) {
            return Err(SessionError::AlreadyExists(guild_id).into());
        }

        let connection =
            MediaConnection::connect(&self.ctx, self.bind_addr, guild_id, session, commands).await?;
        self.insert(guild_id, connection)
    }

    /// Register a session over an existing transport
    pub fn establish(
        &self,
        guild_id: u64,
        session: &SessionDescription,
        transport: Arc<dyn PacketTransport>,
        commands: CommandSender,
    ) -> Result<()> {
        if self.connections.contains_key(&guild_id) {
            return Err(SessionError::AlreadyExists(guild_id).into());
        }

        let connection = MediaConnection::establish(&self.ctx, guild_id, session, transport, commands)?;
        self.insert(guild_id, connection)
    }

    fn insert(&self, guild_id: u64, connection: MediaConnection) -> Result<()> {
        match self.connections.entry(guild_id) {
            Entry::Occupied(_) => {
                // lost a race with another connect for the same guild
                connection.dispose();
                return Err(SessionError::AlreadyExists(guild_id).into());
            }
            Entry::Vacant(entry) => {
                entry.insert(connection);
            }
        }

        info!(guild_id, sessions = self.connections.len(), "session registered");
        Ok(())
    }

    pub fn get(&self, guild_id: u64) -> Option<Ref<'_, u64, MediaConnection>> {
        self.connections.get(&guild_id)
    }

    /// Feed `guild_id` from a fresh frame queue and start polling it
    pub fn provide_queue(&self, guild_id: u64) -> Result<SharedFrameQueue> {
        let connection = self
            .connections
            .get(&guild_id)
            .ok_or(SessionError::NotFound(guild_id))?;

        let queue = create_shared_queue(self.ctx.voice().frame_queue_capacity);
        connection.set_frame_source(QueueFrameSource::new(queue.clone()))?;
        connection.start_frame_polling()?;
        Ok(queue)
    }

    /// Route a control-plane event to one session
    pub fn dispatch_event(&self, guild_id: u64, event: ConnectionEvent) -> Result<usize> {
        let connection = self
            .connections
            .get(&guild_id)
            .ok_or(SessionError::NotFound(guild_id))?;
        Ok(connection.dispatch(event))
    }

    /// Tear down one session
    pub fn destroy(&self, guild_id: u64) -> Result<()> {
        let (_, connection) = self
            .connections
            .remove(&guild_id)
            .ok_or(SessionError::NotFound(guild_id))?;
        connection.dispose();
        debug!(guild_id, "session destroyed");
        Ok(())
    }

    /// Dispose every session
    pub fn shutdown(&self) {
        let guilds: Vec<u64> = self.connections.iter().map(|entry| *entry.key()).collect();
        for guild_id in &guilds {
            if let Some((_, connection)) = self.connections.remove(guild_id) {
                connection.dispose();
            }
        }
        info!(sessions = guilds.len(), "voice node shut down");
    }

    pub fn connection_count(&self) -> usize {
        self.connections.len()
    }
}

impl Drop for VoiceNode {
    fn drop(&mut self) {
        self.shutdown();
    }
}
