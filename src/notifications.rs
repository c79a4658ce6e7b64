//! Asynchronous notification queue (LISTEN/NOTIFY).

use std::collections::VecDeque;
use std::sync::{Arc, Condvar, Mutex};
use std::time::{Duration, Instant};

use crate::error::{Error, Result};

/// One LISTEN/NOTIFY event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notification {
    /// PID of the notifying backend
    pub process_id: u32,
    /// Channel name
    pub channel: String,
    /// Payload (empty string when none was given)
    pub payload: String,
}

struct Inner {
    queue: Mutex<VecDeque<Notification>>,
    available: Condvar,
    capacity: usize,
}

/// Bounded FIFO of notifications.
///
/// The state machine pushes; any thread may take. When the queue is full
/// the oldest entry is dropped so a stalled consumer cannot wedge the
/// connection.
#[derive(Clone)]
pub struct NotificationQueue {
    inner: Arc<Inner>,
}

impl NotificationQueue {
    pub const DEFAULT_CAPACITY: usize = 1024;

    pub fn new(capacity: usize) -> Self {
        Self {
            inner: Arc::new(Inner {
                queue: Mutex::new(VecDeque::new()),
                available: Condvar::new(),
                capacity: capacity.max(1),
            }),
        }
    }

    /// Append a notification, dropping the oldest entry on overflow.
    pub fn put(&self, notification: Notification) {
        let mut queue = self.inner.queue.lock().expect("queue poisoned");
        if queue.len() == self.inner.capacity {
            let dropped = queue.pop_front();
            tracing::warn!(
                channel = dropped.as_ref().map(|n| n.channel.as_str()).unwrap_or(""),
                "notification queue full, dropping oldest entry"
            );
        }
        queue.push_back(notification);
        self.inner.available.notify_one();
    }

    /// Take the next notification, blocking until one arrives.
    pub fn get(&self) -> Notification {
        let mut queue = self.inner.queue.lock().expect("queue poisoned");
        loop {
            if let Some(notification) = queue.pop_front() {
                return notification;
            }
            queue = self.inner.available.wait(queue).expect("queue poisoned");
        }
    }

    /// Take the next notification, waiting at most `timeout`.
    pub fn get_timeout(&self, timeout: Duration) -> Result<Notification> {
        let deadline = Instant::now() + timeout;
        let mut queue = self.inner.queue.lock().expect("queue poisoned");
        loop {
            if let Some(notification) = queue.pop_front() {
                return Ok(notification);
            }
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Err(Error::QueueEmpty);
            }
            let (guard, result) = self
                .inner
                .available
                .wait_timeout(queue, remaining)
                .expect("queue poisoned");
            queue = guard;
            if result.timed_out() && queue.is_empty() {
                return Err(Error::QueueEmpty);
            }
        }
    }

    /// Take the next notification without waiting.
    pub fn get_nowait(&self) -> Result<Notification> {
        self.inner
            .queue
            .lock()
            .expect("queue poisoned")
            .pop_front()
            .ok_or(Error::QueueEmpty)
    }

    pub fn len(&self) -> usize {
        self.inner.queue.lock().expect("queue poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for NotificationQueue {
    fn default() -> Self {
        Self::new(Self::DEFAULT_CAPACITY)
    }
}
