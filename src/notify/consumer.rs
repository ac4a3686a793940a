//! Queue consumer that turns queued notifications into emails.

use super::broker::QueueReceiver;
use super::mailer::Mailer;
use super::message::NotificationMessage;
use crate::error::ConsumeError;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use tracing::{error, info};

/// Counters for handled payloads.
#[derive(Debug, Default)]
pub struct ConsumerStats {
    delivered: AtomicU64,
    failed: AtomicU64,
}

impl ConsumerStats {
    pub fn delivered(&self) -> u64 {
        self.delivered.load(Ordering::SeqCst)
    }

    pub fn failed(&self) -> u64 {
        self.failed.load(Ordering::SeqCst)
    }
}

/// Dispatches queued notifications to a mailer by kind.
///
/// A payload that fails to decode or deliver is logged and dropped; the
/// consumer keeps going.
#[derive(Clone)]
pub struct NotificationConsumer {
    mailer: Arc<dyn Mailer>,
    stats: Arc<ConsumerStats>,
}

impl NotificationConsumer {
    pub fn new(mailer: Arc<dyn Mailer>) -> Self {
        Self {
            mailer,
            stats: Arc::new(ConsumerStats::default()),
        }
    }

    pub fn stats(&self) -> &ConsumerStats {
        &self.stats
    }

    /// Decode and deliver one payload.
    pub fn handle(&self, payload: &[u8]) -> Result<NotificationMessage, ConsumeError> {
        let result = NotificationMessage::decode(payload)
            .map_err(ConsumeError::from)
            .and_then(|message| {
                info!(
                    recipient = %message.recipient(),
                    kind = %message.kind(),
                    "Sending queued notification"
                );
                self.mailer
                    .send(message.recipient(), message.kind(), message.token())
                    .map(|()| message)
                    .map_err(ConsumeError::from)
            });

        match &result {
            Ok(_) => {
                self.stats.delivered.fetch_add(1, Ordering::SeqCst);
            }
            Err(e) => {
                self.stats.failed.fetch_add(1, Ordering::SeqCst);
                error!(error = %e, "Failed to deliver queued notification");
            }
        }
        result
    }

    /// Handle everything currently queued. Returns how many payloads were taken.
    pub fn drain(&self, queue: &QueueReceiver) -> usize {
        let mut taken = 0;
        while let Ok(payload) = queue.try_recv() {
            let _ = self.handle(&payload);
            taken += 1;
        }
        taken
    }

    /// Consume on a background thread until the queue is deleted and drained.
    pub fn spawn(&self, queue: QueueReceiver) -> std::io::Result<JoinHandle<()>> {
        let consumer = self.clone();
        thread::Builder::new()
            .name(format!("sift-consumer-{}", queue.channel()))
            .spawn(move || {
                info!(channel = %queue.channel(), "Consumer started");
                while let Ok(payload) = queue.recv() {
                    let _ = consumer.handle(&payload);
                }
                info!(channel = %queue.channel(), "Consumer stopped");
            })
    }
}
