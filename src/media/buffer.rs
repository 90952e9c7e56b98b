//! Lock-free queue of pre-encoded frames
//!
//! Sources decode and encode ahead of time on their own threads and push the
//! finished Opus frames here; the tick only ever pops, so it never waits on
//! upstream I/O.

use bytes::{BufMut, Bytes, BytesMut};
use crossbeam::queue::ArrayQueue;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use super::FrameSource;
use crate::codec::opus::MAX_FRAME_SIZE;
use crate::error::{CodecError, Result};

/// Bounded SPSC queue of encoded frames
pub struct FrameQueue {
    queue: ArrayQueue<Bytes>,
    overflow_count: AtomicUsize,
    underrun_count: AtomicUsize,
}

impl FrameQueue {
    /// Create a new queue with the specified capacity (in frames)
    pub fn new(capacity: usize) -> Self {
        Self {
            queue: ArrayQueue::new(capacity),
            overflow_count: AtomicUsize::new(0),
            underrun_count: AtomicUsize::new(0),
        }
    }

    /// Push a frame, handing it back if the queue is full
    pub fn push(&self, frame: Bytes) -> std::result::Result<(), Bytes> {
        self.queue.push(frame).map_err(|frame| {
            self.overflow_count.fetch_add(1, Ordering::Relaxed);
            frame
        })
    }

    /// Pop a frame, counting an underrun when empty
    pub fn pop(&self) -> Option<Bytes> {
        match self.queue.pop() {
            Some(frame) => Some(frame),
            None => {
                self.underrun_count.fetch_add(1, Ordering::Relaxed);
                None
            }
        }
    }

    /// Check if empty
    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    /// Check if full
    pub fn is_full(&self) -> bool {
        self.queue.is_full()
    }

    /// Get number of queued frames
    pub fn len(&self) -> usize {
        self.queue.len()
    }

    /// Get capacity in frames
    pub fn capacity(&self) -> usize {
        self.queue.capacity()
    }

    /// Get overflow count
    pub fn overflow_count(&self) -> usize {
        self.overflow_count.load(Ordering::Relaxed)
    }

    /// Get underrun count
    pub fn underrun_count(&self) -> usize {
        self.underrun_count.load(Ordering::Relaxed)
    }
}

/// Thread-safe handle to a frame queue
pub type SharedFrameQueue = Arc<FrameQueue>;

/// Create a new shared frame queue
pub fn create_shared_queue(capacity: usize) -> SharedFrameQueue {
    Arc::new(FrameQueue::new(capacity))
}

/// [`FrameSource`] that pops pre-encoded frames from a [`FrameQueue`]
pub struct QueueFrameSource {
    queue: SharedFrameQueue,
}

impl QueueFrameSource {
    pub fn new(queue: SharedFrameQueue) -> Self {
        Self { queue }
    }

    /// Get the queue this source pops from
    pub fn queue(&self) -> &SharedFrameQueue {
        &self.queue
    }
}

impl FrameSource for QueueFrameSource {
    fn can_provide(&mut self) -> bool {
        !self.queue.is_empty()
    }

    fn retrieve_opus_frame(&mut self, buf: &mut BytesMut) -> Result<()> {
        if let Some(frame) = self.queue.pop() {
            if frame.len() > MAX_FRAME_SIZE {
                return Err(CodecError::FrameTooLarge(frame.len()).into());
            }
            buf.put_slice(&frame);
        }
        Ok(())
    }
}
