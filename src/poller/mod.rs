//! Frame pollers
//!
//! A poller owns one connection's send cadence. Scheduling lives in
//! [`IntervalPoller`]; what happens on each tick is supplied separately as a
//! [`FrameTick`] (for audio, [`AudioPipeline`]). Every poller task runs on the
//! shared runtime handed in through the node context, so thousands of
//! sessions share a handful of worker threads.
//!
//! Ticks of one poller never overlap: the tick body runs under the
//! connection's own lock, and [`FramePoller::stop`] takes that same lock
//! before returning.

pub mod audio;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, warn};

pub use audio::{AudioPipeline, PipelineStats, SequenceTimestamp};

/// Scheduling interface of a frame poller
pub trait FramePoller {
    /// Begin polling. A no-op while already polling.
    fn start(&self);

    /// Stop polling. Once this returns no tick is running and none will run.
    fn stop(&self);

    /// Stop for good; later `start` calls are ignored. Idempotent.
    fn dispose(&self);

    fn is_polling(&self) -> bool;
}

/// Work done once per frame interval
///
/// Implementations must not block: the tick shares its worker thread with
/// every other session.
pub trait FrameTick: Send + 'static {
    fn tick(&mut self);
}

/// One spawned polling task and the flag only it watches
struct Run {
    task: JoinHandle<()>,
    active: Arc<AtomicBool>,
}

/// Runs a [`FrameTick`] on a fixed period
pub struct IntervalPoller<T: FrameTick> {
    runtime: Handle,
    period: Duration,
    body: Arc<Mutex<T>>,
    disposed: AtomicBool,
    run: Mutex<Option<Run>>,
}

impl<T: FrameTick> IntervalPoller<T> {
    pub fn new(runtime: Handle, period: Duration, body: Arc<Mutex<T>>) -> Self {
        Self {
            runtime,
            period,
            body,
            disposed: AtomicBool::new(false),
            run: Mutex::new(None),
        }
    }

    /// Get the tick period
    pub fn period(&self) -> Duration {
        self.period
    }

    /// Whether [`FramePoller::dispose`] has been called
    pub fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::Acquire)
    }
}

impl<T: FrameTick> FramePoller for IntervalPoller<T> {
    fn start(&self) {
        if self.is_disposed() {
            warn!("start called on a disposed poller");
            return;
        }

        let mut run = self.run.lock();
        if run.is_some() {
            return;
        }

        // a fresh flag per task: a stopped task must never see a later start
        let active = Arc::new(AtomicBool::new(true));

        let body = self.body.clone();
        let running = active.clone();
        let period = self.period;
        let task = self.runtime.spawn(async move {
            let mut interval = tokio::time::interval(period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

            loop {
                interval.tick().await;

                let mut body = body.lock();
                if !running.load(Ordering::Acquire) {
                    break;
                }
                body.tick();
            }
        });
        *run = Some(Run { task, active });

        debug!(period_ms = period.as_millis() as u64, "frame polling started");
    }

    fn stop(&self) {
        let Some(run) = self.run.lock().take() else {
            return;
        };

        run.active.store(false, Ordering::Release);
        run.task.abort();

        // wait out a tick that is already running on another worker
        drop(self.body.lock());

        debug!("frame polling stopped");
    }

    fn dispose(&self) {
        self.disposed.store(true, Ordering::Release);
        self.stop();
    }

    fn is_polling(&self) -> bool {
        self.run.lock().is_some()
    }
}

impl<T: FrameTick> Drop for IntervalPoller<T> {
    fn drop(&mut self) {
        self.dispose();
    }
}
