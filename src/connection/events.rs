//! Per-connection event bus
//!
//! Control-plane events for one connection are fanned out over a broadcast
//! channel. Each listener runs as its own task and is owned through a
//! [`Subscription`], which cancels it exactly once.

use tokio::runtime::Handle;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::warn;

use crate::protocol::ConnectionEvent;

const EVENT_CAPACITY: usize = 64;

#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<ConnectionEvent>,
}

impl EventBus {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(EVENT_CAPACITY);
        Self { tx }
    }

    /// Deliver `event` to every live listener, returning how many got it
    pub fn publish(&self, event: ConnectionEvent) -> usize {
        self.tx.send(event).unwrap_or(0)
    }

    pub fn listener_count(&self) -> usize {
        self.tx.receiver_count()
    }

    /// Run `handler` for every event published from now on
    pub fn subscribe<F>(&self, runtime: &Handle, mut handler: F) -> Subscription
    where
        F: FnMut(ConnectionEvent) + Send + 'static,
    {
        let mut rx = self.tx.subscribe();
        let task = runtime.spawn(async move {
            loop {
                match rx.recv().await {
                    Ok(event) => handler(event),
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!(skipped, "event listener lagged");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        });

        Subscription { task: Some(task) }
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

/// Handle to a running listener; cancelled on [`cancel`](Self::cancel) or drop
pub struct Subscription {
    task: Option<JoinHandle<()>>,
}

impl Subscription {
    /// Stop the listener. Returns `true` only on the call that cancelled it.
    pub fn cancel(&mut self) -> bool {
        match self.task.take() {
            Some(task) => {
                task.abort();
                true
            }
            None => false,
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.task.is_none()
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.cancel();
    }
}
