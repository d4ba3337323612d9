//! The in-process message bus: named bounded channels with at-most-once
//! delivery.
//!
//! Channels are identified by a string key and created lazily by the first
//! [`send`](ChannelFabric::send) or [`receive`](ChannelFabric::receive) that
//! references them.  Each channel is a bounded FIFO with a single receiving
//! endpoint and any number of senders.  `send` never blocks: a full buffer
//! fails fast with [`FabricError::ChannelFull`] and the caller decides
//! whether to drop, retry or propagate.
//!
//! # Example
//!
//! ```rust
//! use agentfabric::{ChannelFabric, Message};
//!
//! # #[tokio::main]
//! # async fn main() {
//! let fabric = ChannelFabric::new();
//! let mut rx = fabric.receive("events").unwrap();
//!
//! fabric.send("events", Message::new("ray_burst", "{}")).unwrap();
//! let msg = rx.recv().await.unwrap();
//! assert_eq!(msg.message_type, "ray_burst");
//! # }
//! ```

use crate::agentfabric::message::Message;
use std::collections::HashMap;
use std::error::Error;
use std::fmt;
use std::sync::Mutex;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// Default per-channel buffer capacity.
pub const DEFAULT_CHANNEL_CAPACITY: usize = 10;

/// Errors produced by channel fabric operations.
#[derive(Debug, Clone, PartialEq)]
pub enum FabricError {
    /// The bounded buffer is full.  Retryable by the caller.
    ChannelFull { channel: String },
    /// A non-creating lookup referenced a channel that does not exist.
    UnknownChannel { channel: String },
    /// The receiving endpoint was dropped; no send can ever succeed again.
    Closed { channel: String },
    /// A second receiver was requested for a single-consumer channel.
    ReceiverTaken { channel: String },
    /// The caller's cancellation token fired while waiting for capacity.
    Cancelled { channel: String },
}

impl fmt::Display for FabricError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FabricError::ChannelFull { channel } => write!(f, "channel '{}' is full", channel),
            FabricError::UnknownChannel { channel } => write!(f, "unknown channel '{}'", channel),
            FabricError::Closed { channel } => write!(f, "channel '{}' is closed", channel),
            FabricError::ReceiverTaken { channel } => {
                write!(f, "channel '{}' already has a receiver", channel)
            }
            FabricError::Cancelled { channel } => {
                write!(f, "send to channel '{}' was cancelled", channel)
            }
        }
    }
}

impl Error for FabricError {}

struct ChannelEntry {
    sender: mpsc::Sender<Message>,
    // Taken by the first `receive` call; single consumer per channel.
    receiver: Option<mpsc::Receiver<Message>>,
    capacity: usize,
}

impl ChannelEntry {
    fn with_capacity(capacity: usize) -> Self {
        let (sender, receiver) = mpsc::channel(capacity);
        Self {
            sender,
            receiver: Some(receiver),
            capacity,
        }
    }
}

/// Registry of named bounded channels, owned by the runtime.
///
/// All methods take `&self`; the internal map is guarded by a mutex that is
/// never held across an await point.
pub struct ChannelFabric {
    channels: Mutex<HashMap<String, ChannelEntry>>,
}

impl ChannelFabric {
    pub fn new() -> Self {
        Self {
            channels: Mutex::new(HashMap::new()),
        }
    }

    /// Pre-create `key` with a non-default buffer capacity.
    ///
    /// Has no effect if the channel already exists (the original capacity is
    /// kept); capacity is fixed at creation.
    pub fn channel_with_capacity(&self, key: impl Into<String>, capacity: usize) {
        let key = key.into();
        let mut channels = self.channels.lock().unwrap();
        channels
            .entry(key)
            .or_insert_with(|| ChannelEntry::with_capacity(capacity));
    }

    /// Buffer capacity of an existing channel.
    ///
    /// This is a non-creating lookup: a missing channel is
    /// [`FabricError::UnknownChannel`].
    pub fn channel_capacity(&self, key: &str) -> Result<usize, FabricError> {
        let channels = self.channels.lock().unwrap();
        channels
            .get(key)
            .map(|entry| entry.capacity)
            .ok_or_else(|| FabricError::UnknownChannel {
                channel: key.to_string(),
            })
    }

    fn sender_for(&self, key: &str) -> mpsc::Sender<Message> {
        let mut channels = self.channels.lock().unwrap();
        channels
            .entry(key.to_string())
            .or_insert_with(|| ChannelEntry::with_capacity(DEFAULT_CHANNEL_CAPACITY))
            .sender
            .clone()
    }

    /// Non-blocking send.  Creates the channel on first reference.
    ///
    /// A full buffer fails with [`FabricError::ChannelFull`]; a dropped
    /// receiver fails with [`FabricError::Closed`].
    pub fn send(&self, target: &str, msg: Message) -> Result<(), FabricError> {
        let sender = self.sender_for(target);
        match sender.try_send(msg) {
            Ok(()) => Ok(()),
            Err(mpsc::error::TrySendError::Full(_)) => Err(FabricError::ChannelFull {
                channel: target.to_string(),
            }),
            Err(mpsc::error::TrySendError::Closed(_)) => Err(FabricError::Closed {
                channel: target.to_string(),
            }),
        }
    }

    /// Blocking send that waits for buffer capacity, abandoning the wait when
    /// `cancel` fires.
    pub async fn send_cancellable(
        &self,
        cancel: &CancellationToken,
        target: &str,
        msg: Message,
    ) -> Result<(), FabricError> {
        let sender = self.sender_for(target);
        tokio::select! {
            _ = cancel.cancelled() => Err(FabricError::Cancelled {
                channel: target.to_string(),
            }),
            sent = sender.send(msg) => sent.map_err(|_| FabricError::Closed {
                channel: target.to_string(),
            }),
        }
    }

    /// Take the single receiving endpoint of `source`.
    ///
    /// Creates the channel on first reference.  The returned receiver yields
    /// messages in FIFO order and ends cleanly once every sender is gone and
    /// the buffer drains.  A second call for the same key fails with
    /// [`FabricError::ReceiverTaken`].
    pub fn receive(&self, source: &str) -> Result<mpsc::Receiver<Message>, FabricError> {
        let mut channels = self.channels.lock().unwrap();
        let entry = channels
            .entry(source.to_string())
            .or_insert_with(|| ChannelEntry::with_capacity(DEFAULT_CHANNEL_CAPACITY));
        entry
            .receiver
            .take()
            .ok_or_else(|| FabricError::ReceiverTaken {
                channel: source.to_string(),
            })
    }

    /// Names of every channel created so far, sorted.
    pub fn channel_names(&self) -> Vec<String> {
        let channels = self.channels.lock().unwrap();
        let mut names: Vec<String> = channels.keys().cloned().collect();
        names.sort();
        names
    }
}

impl Default for ChannelFabric {
    fn default() -> Self {
        Self::new()
    }
}
