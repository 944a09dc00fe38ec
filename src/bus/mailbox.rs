//! Bounded per-(cell, channel) mailbox.
//!
//! One mailbox backs one (recipient, channel) pair. Push behaviour follows
//! the channel's delivery class: lossy pushes evict the oldest message when
//! full, reliable pushes make the sender wait for space up to a deadline,
//! and latest-wins pushes replace the sender's previous message.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::Notify;
use tokio::time::Instant;

use super::message::BusMessage;

/// Outcome of a push.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PushOutcome {
    Delivered,
    /// Delivered after evicting the oldest queued message.
    DroppedOldest,
    /// Delivered by replacing the sender's previous message.
    Replaced,
}

#[derive(Debug)]
pub struct Mailbox {
    queue: Mutex<VecDeque<BusMessage>>,
    capacity: usize,
    not_empty: Notify,
    space: Notify,
    dropped: AtomicU64,
}

impl Mailbox {
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            queue: Mutex::new(VecDeque::with_capacity(capacity.min(64))),
            capacity: capacity.max(1),
            not_empty: Notify::new(),
            space: Notify::new(),
            dropped: AtomicU64::new(0),
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.queue.lock().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.queue.lock().is_empty()
    }

    /// Messages evicted from this mailbox so far.
    #[must_use]
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    /// Lossy push: evicts the oldest message when full.
    pub fn push_lossy(&self, message: BusMessage) -> PushOutcome {
        let mut queue = self.queue.lock();
        let outcome = if queue.len() >= self.capacity {
            queue.pop_front();
            self.dropped.fetch_add(1, Ordering::Relaxed);
            PushOutcome::DroppedOldest
        } else {
            PushOutcome::Delivered
        };
        queue.push_back(message);
        drop(queue);
        self.not_empty.notify_one();
        outcome
    }

    /// Latest-wins push: replaces any queued message from the same sender.
    pub fn push_latest_wins(&self, message: BusMessage) -> PushOutcome {
        let mut queue = self.queue.lock();
        let before = queue.len();
        queue.retain(|queued| queued.from != message.from);
        let replaced = queue.len() < before;
        if queue.len() >= self.capacity {
            queue.pop_front();
            self.dropped.fetch_add(1, Ordering::Relaxed);
        }
        queue.push_back(message);
        drop(queue);
        self.not_empty.notify_one();
        if replaced {
            PushOutcome::Replaced
        } else {
            PushOutcome::Delivered
        }
    }

    fn try_push(&self, message: BusMessage) -> Result<(), BusMessage> {
        let mut queue = self.queue.lock();
        if queue.len() >= self.capacity {
            return Err(message);
        }
        queue.push_back(message);
        drop(queue);
        self.not_empty.notify_one();
        Ok(())
    }

    /// Reliable push: waits for space up to `timeout`, then gives up.
    ///
    /// Returns the message back to the caller on timeout so it can surface
    /// a backpressure warning with context.
    pub async fn push_reliable(
        &self,
        mut message: BusMessage,
        timeout: Duration,
    ) -> Result<PushOutcome, BusMessage> {
        let deadline = Instant::now() + timeout;
        loop {
            match self.try_push(message) {
                Ok(()) => return Ok(PushOutcome::Delivered),
                Err(returned) => message = returned,
            }
            let now = Instant::now();
            if now >= deadline {
                return Err(message);
            }
            // Race between the space check and the notification is resolved
            // by looping with the remaining time.
            let _ = tokio::time::timeout_at(deadline, self.space.notified()).await;
            if Instant::now() >= deadline && self.queue.lock().len() >= self.capacity {
                return Err(message);
            }
        }
    }

    /// Non-blocking receive.
    pub fn try_pop(&self) -> Option<BusMessage> {
        let message = self.queue.lock().pop_front();
        if message.is_some() {
            self.space.notify_one();
        }
        message
    }

    /// Receive, waiting until a message arrives.
    pub async fn recv(&self) -> BusMessage {
        loop {
            if let Some(message) = self.try_pop() {
                return message;
            }
            self.not_empty.notified().await;
        }
    }

    /// Drain everything currently queued.
    pub fn drain(&self) -> Vec<BusMessage> {
        let drained: Vec<BusMessage> = self.queue.lock().drain(..).collect();
        if !drained.is_empty() {
            self.space.notify_waiters();
        }
        drained
    }
}
