//! Bounded FIFO line queues that decouple socket I/O from protocol logic.
//!
//! Each session owns one inbound and one outbound queue. Producers never
//! block: pushing onto a full queue fails with [`QueueError::Full`] and the
//! caller decides what to drop. Consumers can poll with `peek` and `try_pop`,
//! drain the whole queue at once, or await the next item with `recv`.

use crate::error::QueueError;
use parking_lot::Mutex;
use std::collections::VecDeque;
use tokio::sync::Notify;

#[derive(Debug)]
pub struct MessageQueue {
    items: Mutex<VecDeque<String>>,
    capacity: usize,
    notify: Notify,
}

impl MessageQueue {
    pub fn new(capacity: usize) -> Self {
        Self {
            items: Mutex::new(VecDeque::new()),
            capacity,
            notify: Notify::new(),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Appends a line, failing if the queue already holds `capacity` items.
    pub fn push(&self, line: impl Into<String>) -> Result<(), QueueError> {
        {
            let mut items = self.items.lock();
            if items.len() >= self.capacity {
                return Err(QueueError::Full {
                    capacity: self.capacity,
                });
            }
            items.push_back(line.into());
        }
        self.notify.notify_one();
        Ok(())
    }

    /// Returns a copy of the oldest line without removing it.
    pub fn peek(&self) -> Option<String> {
        self.items.lock().front().cloned()
    }

    pub fn try_pop(&self) -> Option<String> {
        self.items.lock().pop_front()
    }

    /// Removes and returns everything queued, oldest first.
    pub fn drain(&self) -> Vec<String> {
        self.items.lock().drain(..).collect()
    }

    /// Waits until a line is available and pops it.
    ///
    /// Cancel safe: dropping the future never loses a queued line.
    pub async fn recv(&self) -> String {
        loop {
            let notified = self.notify.notified();
            if let Some(line) = self.try_pop() {
                return line;
            }
            notified.await;
        }
    }

    pub fn len(&self) -> usize {
        self.items.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.lock().is_empty()
    }
}
