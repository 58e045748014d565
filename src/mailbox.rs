//! Bounded per-recipient message queue.
//!
//! A [`Mailbox`] holds encoded envelopes in FIFO order. Handles are cheap
//! to clone and all refer to the same queue, so the broker can keep one as
//! a subscriber destination while its owner drains it.
//!
//! # Full-queue policy
//!
//! [`Mailbox::send`] blocks while the queue is full, up to the configured
//! send timeout. If room does not appear in time the message is *not*
//! enqueued and [`Delivery::Backpressure`] is returned. Backpressure is a
//! status for the caller to act on, not an error.
//!
//! # Closing
//!
//! [`Mailbox::close`] succeeds exactly once. It discards anything still
//! queued and wakes every blocked sender and receiver. After close, sends
//! fail with [`MailboxError::Closed`], [`Mailbox::drain`] yields nothing and
//! [`Mailbox::recv`] returns `None`.

// Rust guideline compliant 2026-02

use std::collections::VecDeque;
use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::time::Duration;

use thiserror::Error;

/// Default queue capacity.
pub const DEFAULT_CAPACITY: usize = 4096;

/// Default time a sender waits for room in a full queue.
pub const DEFAULT_SEND_TIMEOUT: Duration = Duration::from_millis(250);

/// Mailbox sizing and full-queue behavior.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MailboxConfig {
    /// Maximum number of queued messages. Clamped to at least 1.
    pub capacity: usize,
    /// How long [`Mailbox::send`] waits for room before reporting backpressure.
    pub send_timeout: Duration,
}

impl Default for MailboxConfig {
    fn default() -> Self {
        Self {
            capacity: DEFAULT_CAPACITY,
            send_timeout: DEFAULT_SEND_TIMEOUT,
        }
    }
}

/// Outcome of a send on an open mailbox.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    /// The message was enqueued.
    Delivered,
    /// The queue stayed full for the whole send timeout; nothing was enqueued.
    Backpressure,
}

/// Mailbox misuse.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum MailboxError {
    /// Send on a closed mailbox.
    #[error("mailbox is closed")]
    Closed,
    /// Close on an already-closed mailbox.
    #[error("mailbox was already closed")]
    AlreadyClosed,
}

#[derive(Debug)]
struct State {
    queue: VecDeque<Vec<u8>>,
    closed: bool,
}

#[derive(Debug)]
struct Shared {
    state: Mutex<State>,
    not_empty: Condvar,
    not_full: Condvar,
    config: MailboxConfig,
}

/// Handle to a bounded FIFO of encoded envelopes.
#[derive(Debug, Clone)]
pub struct Mailbox {
    shared: Arc<Shared>,
}

impl Mailbox {
    /// Create an open, empty mailbox.
    pub fn new(config: MailboxConfig) -> Self {
        let config = MailboxConfig {
            capacity: config.capacity.max(1),
            ..config
        };
        Self {
            shared: Arc::new(Shared {
                state: Mutex::new(State {
                    queue: VecDeque::new(),
                    closed: false,
                }),
                not_empty: Condvar::new(),
                not_full: Condvar::new(),
                config,
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.shared.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Enqueue `message`, waiting up to the send timeout for room.
    pub fn send(&self, message: Vec<u8>) -> Result<Delivery, MailboxError> {
        let capacity = self.shared.config.capacity;
        let state = self.lock();
        let (mut state, _) = self
            .shared
            .not_full
            .wait_timeout_while(state, self.shared.config.send_timeout, |s| {
                !s.closed && s.queue.len() >= capacity
            })
            .unwrap_or_else(|e| e.into_inner());

        if state.closed {
            return Err(MailboxError::Closed);
        }
        if state.queue.len() >= capacity {
            log::warn!("[mailbox] full ({capacity} queued), message not delivered");
            return Ok(Delivery::Backpressure);
        }
        state.queue.push_back(message);
        self.shared.not_empty.notify_one();
        Ok(Delivery::Delivered)
    }

    /// Enqueue without waiting. A full queue reports backpressure at once.
    pub fn try_send(&self, message: Vec<u8>) -> Result<Delivery, MailboxError> {
        let mut state = self.lock();
        if state.closed {
            return Err(MailboxError::Closed);
        }
        if state.queue.len() >= self.shared.config.capacity {
            return Ok(Delivery::Backpressure);
        }
        state.queue.push_back(message);
        self.shared.not_empty.notify_one();
        Ok(Delivery::Delivered)
    }

    /// Take every message queued at call time without blocking.
    ///
    /// Messages that arrive after the call are left for the next drain.
    pub fn drain(&self) -> Vec<Vec<u8>> {
        let mut state = self.lock();
        let taken: Vec<Vec<u8>> = state.queue.drain(..).collect();
        if !taken.is_empty() {
            self.shared.not_full.notify_all();
        }
        taken
    }

    /// Block until a message arrives. Returns `None` once closed.
    pub fn recv(&self) -> Option<Vec<u8>> {
        let state = self.lock();
        let mut state = self
            .shared
            .not_empty
            .wait_while(state, |s| !s.closed && s.queue.is_empty())
            .unwrap_or_else(|e| e.into_inner());
        if state.closed {
            return None;
        }
        let message = state.queue.pop_front();
        self.shared.not_full.notify_one();
        message
    }

    /// Close the mailbox, discarding queued messages and waking waiters.
    pub fn close(&self) -> Result<(), MailboxError> {
        let mut state = self.lock();
        if state.closed {
            return Err(MailboxError::AlreadyClosed);
        }
        state.closed = true;
        state.queue.clear();
        self.shared.not_empty.notify_all();
        self.shared.not_full.notify_all();
        Ok(())
    }

    /// Whether [`Mailbox::close`] has been called.
    pub fn is_closed(&self) -> bool {
        self.lock().closed
    }

    /// Number of queued messages.
    pub fn len(&self) -> usize {
        self.lock().queue.len()
    }

    /// Whether nothing is queued.
    pub fn is_empty(&self) -> bool {
        self.lock().queue.is_empty()
    }

    /// Maximum number of queued messages.
    pub fn capacity(&self) -> usize {
        self.shared.config.capacity
    }

    /// Whether two handles refer to the same queue.
    pub fn same_queue(&self, other: &Mailbox) -> bool {
        Arc::ptr_eq(&self.shared, &other.shared)
    }
}

impl Default for Mailbox {
    fn default() -> Self {
        Self::new(MailboxConfig::default())
    }
}
