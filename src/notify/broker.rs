//! Message broker abstraction and an in-process queue broker.

use crate::error::BrokerError;
use crossbeam_channel::{bounded, Receiver, SendTimeoutError, Sender};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tracing::{debug, info};

/// Asynchronous publish side of a message channel.
///
/// `publish` returns once the broker has accepted the payload, blocking for
/// at most `timeout` while waiting for acknowledgment.
pub trait Broker: Send + Sync {
    fn publish(&self, channel: &str, payload: Vec<u8>, timeout: Duration) -> Result<(), BrokerError>;
}

/// Queue settings.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct QueueConfig {
    /// Max queued messages per channel before publishers block.
    /// Default: 1000
    pub capacity: usize,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self { capacity: 1000 }
    }
}

/// Receiving end of a declared queue.
#[derive(Clone)]
pub struct QueueReceiver {
    channel: String,
    receiver: Receiver<Vec<u8>>,
}

impl QueueReceiver {
    pub fn channel(&self) -> &str {
        &self.channel
    }

    /// Receive the next payload (blocking).
    pub fn recv(&self) -> Result<Vec<u8>, crossbeam_channel::RecvError> {
        self.receiver.recv()
    }

    /// Try to receive a payload (non-blocking).
    pub fn try_recv(&self) -> Result<Vec<u8>, crossbeam_channel::TryRecvError> {
        self.receiver.try_recv()
    }

    /// Receive with timeout.
    pub fn recv_timeout(&self, timeout: Duration) -> Result<Vec<u8>, crossbeam_channel::RecvTimeoutError> {
        self.receiver.recv_timeout(timeout)
    }

    /// Number of queued payloads.
    pub fn len(&self) -> usize {
        self.receiver.len()
    }

    pub fn is_empty(&self) -> bool {
        self.receiver.is_empty()
    }
}

struct Queue {
    sender: Sender<Vec<u8>>,
    receiver: Receiver<Vec<u8>>,
}

/// In-process broker with named bounded queues.
pub struct QueueBroker {
    config: QueueConfig,
    queues: RwLock<HashMap<String, Queue>>,
    closed: AtomicBool,
}

impl QueueBroker {
    pub fn new(config: QueueConfig) -> Self {
        Self {
            config,
            queues: RwLock::new(HashMap::new()),
            closed: AtomicBool::new(false),
        }
    }

    /// Declare a queue (idempotent) and return a receiver for it.
    pub fn declare_queue(&self, channel: &str) -> QueueReceiver {
        let mut queues = self.queues.write();
        let queue = queues.entry(channel.to_string()).or_insert_with(|| {
            debug!(channel, capacity = self.config.capacity, "Declared queue");
            let (sender, receiver) = bounded(self.config.capacity);
            Queue { sender, receiver }
        });

        QueueReceiver {
            channel: channel.to_string(),
            receiver: queue.receiver.clone(),
        }
    }

    /// Remove a queue. Consumers see a disconnect once it drains.
    pub fn delete_queue(&self, channel: &str) -> bool {
        self.queues.write().remove(channel).is_some()
    }

    /// Stop accepting publishes, as when the broker goes down.
    pub fn close(&self) {
        info!("Queue broker closed");
        self.closed.store(true, Ordering::SeqCst);
    }

    /// Accept publishes again.
    pub fn reopen(&self) {
        info!("Queue broker reopened");
        self.closed.store(false, Ordering::SeqCst);
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Number of payloads waiting on a queue.
    pub fn queue_len(&self, channel: &str) -> Option<usize> {
        self.queues.read().get(channel).map(|q| q.sender.len())
    }
}

impl Default for QueueBroker {
    fn default() -> Self {
        Self::new(QueueConfig::default())
    }
}

impl Broker for QueueBroker {
    fn publish(&self, channel: &str, payload: Vec<u8>, timeout: Duration) -> Result<(), BrokerError> {
        if self.is_closed() {
            return Err(BrokerError::Closed);
        }

        // Clone the sender so a full queue doesn't block other channels.
        let sender = self
            .queues
            .read()
            .get(channel)
            .map(|q| q.sender.clone())
            .ok_or_else(|| BrokerError::ChannelNotFound(channel.to_string()))?;

        match sender.send_timeout(payload, timeout) {
            Ok(()) => Ok(()),
            Err(SendTimeoutError::Timeout(_)) => Err(BrokerError::Timeout {
                channel: channel.to_string(),
                timeout,
            }),
            // The queue holds a receiver, so this means it was deleted
            // mid-publish and every consumer has gone.
            Err(SendTimeoutError::Disconnected(_)) => {
                Err(BrokerError::ChannelNotFound(channel.to_string()))
            }
        }
    }
}

impl<B: Broker + ?Sized> Broker for std::sync::Arc<B> {
    fn publish(&self, channel: &str, payload: Vec<u8>, timeout: Duration) -> Result<(), BrokerError> {
        (**self).publish(channel, payload, timeout)
    }
}
