//! Broker publish with a circuit breaker and a direct-mail fallback.

use super::breaker::{CircuitBreaker, CircuitBreakerConfig};
use super::broker::Broker;
use super::mailer::Mailer;
use super::message::NotificationMessage;
use crate::config::duration_ms;
use crate::error::{BrokerError, DeliveryError, FallbackFailure};
use crossbeam_channel::{bounded, RecvTimeoutError};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// Notifier settings.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct NotifierConfig {
    /// Name the breaker logs under.
    pub breaker_name: String,
    pub breaker: CircuitBreakerConfig,
    /// Budget for publish plus fallback when the caller gives none.
    #[serde(with = "duration_ms")]
    pub send_timeout: Duration,
    /// Longest a publish may block. Never more than half the send budget.
    #[serde(with = "duration_ms")]
    pub publish_timeout: Duration,
    /// Fallback deliveries allowed to run at once.
    pub max_concurrent_fallbacks: usize,
}

impl Default for NotifierConfig {
    fn default() -> Self {
        Self {
            breaker_name: "broker".to_string(),
            breaker: CircuitBreakerConfig::default(),
            send_timeout: Duration::from_secs(10),
            publish_timeout: Duration::from_secs(3),
            max_concurrent_fallbacks: 16,
        }
    }
}

/// How a notification left the notifier.
#[derive(Clone, Debug)]
pub enum Delivery {
    /// Accepted by the broker.
    Published,
    /// Delivered directly after the broker path failed.
    Fallback { cause: BrokerError },
}

impl Delivery {
    pub fn is_fallback(&self) -> bool {
        matches!(self, Delivery::Fallback { .. })
    }
}

/// Slot held by a running fallback worker. Released on drop.
struct FallbackPermit {
    in_flight: Arc<AtomicUsize>,
}

impl Drop for FallbackPermit {
    fn drop(&mut self) {
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Sends notifications through the broker, delivering directly when it can't.
///
/// Sends are not deduplicated: the same message sent twice is delivered twice.
pub struct ResilientNotifier {
    broker: Arc<dyn Broker>,
    mailer: Arc<dyn Mailer>,
    breaker: CircuitBreaker,
    config: NotifierConfig,
    fallbacks_in_flight: Arc<AtomicUsize>,
}

impl ResilientNotifier {
    pub fn new(broker: Arc<dyn Broker>, mailer: Arc<dyn Mailer>, config: NotifierConfig) -> Self {
        let breaker = CircuitBreaker::new(config.breaker_name.clone(), config.breaker.clone());
        Self {
            broker,
            mailer,
            breaker,
            config,
            fallbacks_in_flight: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn breaker(&self) -> &CircuitBreaker {
        &self.breaker
    }

    /// Fallback workers still running, including ones whose caller gave up.
    pub fn fallbacks_in_flight(&self) -> usize {
        self.fallbacks_in_flight.load(Ordering::SeqCst)
    }

    /// Send with the configured timeout.
    pub fn send(&self, channel: &str, message: &NotificationMessage) -> Result<Delivery, DeliveryError> {
        self.send_with_timeout(channel, message, self.config.send_timeout)
    }

    /// Publish to `channel`, falling back to direct delivery on any broker failure.
    ///
    /// `timeout` bounds the whole call. The publish gets at most half of it,
    /// capped by `publish_timeout`, so a blocked broker still leaves the
    /// fallback time to run.
    pub fn send_with_timeout(
        &self,
        channel: &str,
        message: &NotificationMessage,
        timeout: Duration,
    ) -> Result<Delivery, DeliveryError> {
        let deadline = Instant::now() + timeout;
        let publish_budget = self.config.publish_timeout.min(timeout / 2);

        match self.publish(channel, message.encode(), publish_budget) {
            Ok(()) => {
                debug!(channel, kind = %message.kind(), "Notification published");
                Ok(Delivery::Published)
            }
            Err(cause) => {
                warn!(
                    channel,
                    kind = %message.kind(),
                    error = %cause,
                    "Broker unavailable, delivering notification directly"
                );
                self.fallback(channel, message, deadline)?;
                Ok(Delivery::Fallback { cause })
            }
        }
    }

    /// Hand an encoded payload to the broker. Encoding failures never reach
    /// the breaker.
    fn publish(
        &self,
        channel: &str,
        encoded: Result<Vec<u8>, BrokerError>,
        timeout: Duration,
    ) -> Result<(), BrokerError> {
        let payload = encoded?;

        if !self.breaker.try_acquire_permission() {
            return Err(BrokerError::CircuitOpen(self.breaker.name().to_string()));
        }

        let started = Instant::now();
        let result = self.broker.publish(channel, payload, timeout);

        match &result {
            Ok(()) => self.breaker.on_success(started.elapsed()),
            Err(e) => self.breaker.on_error(started.elapsed(), e.to_string()),
        }
        result
    }

    fn acquire_fallback_slot(&self) -> Option<FallbackPermit> {
        let max = self.config.max_concurrent_fallbacks;
        self.fallbacks_in_flight
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| (n < max).then_some(n + 1))
            .ok()
            .map(|_| FallbackPermit {
                in_flight: Arc::clone(&self.fallbacks_in_flight),
            })
    }

    /// Deliver directly, blocking until the mailer answers or the deadline passes.
    fn fallback(&self, channel: &str, message: &NotificationMessage, deadline: Instant) -> Result<(), DeliveryError> {
        let fail = |failure| DeliveryError {
            channel: channel.to_string(),
            kind: message.kind(),
            failure,
        };

        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            return Err(fail(FallbackFailure::DeadlineExceeded));
        }

        let permit = self.acquire_fallback_slot().ok_or_else(|| {
            warn!(
                channel,
                limit = self.config.max_concurrent_fallbacks,
                "No fallback worker free"
            );
            fail(FallbackFailure::Saturated(self.config.max_concurrent_fallbacks))
        })?;

        // The mailer runs on its own thread so the caller can stop waiting at
        // the deadline. It may still deliver after we give up, holding its
        // slot until it returns.
        let (tx, rx) = bounded(1);
        let mailer = Arc::clone(&self.mailer);
        let owned = message.clone();
        thread::Builder::new()
            .name("sift-fallback".to_string())
            .spawn(move || {
                let _permit = permit;
                let _ = tx.send(mailer.send(owned.recipient(), owned.kind(), owned.token()));
            })
            .map_err(|_| fail(FallbackFailure::WorkerLost))?;

        match rx.recv_timeout(remaining) {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => Err(fail(FallbackFailure::Rejected(e))),
            Err(RecvTimeoutError::Timeout) => Err(fail(FallbackFailure::TimedOut(remaining))),
            Err(RecvTimeoutError::Disconnected) => Err(fail(FallbackFailure::WorkerLost)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::MailError;
    use crate::notify::breaker::CircuitState;
    use crate::notify::broker::{QueueBroker, QueueConfig};
    use crate::notify::message::NotificationKind;
    use parking_lot::Mutex;

    #[derive(Default)]
    struct RecordingMailer {
        calls: Mutex<Vec<(String, NotificationKind, String)>>,
        fail: bool,
        delay: Option<Duration>,
    }

    impl Mailer for RecordingMailer {
        fn send(&self, recipient: &str, kind: NotificationKind, token: &str) -> Result<(), MailError> {
            if let Some(delay) = self.delay {
                thread::sleep(delay);
            }
            if self.fail {
                return Err(MailError::Transport("smtp down".to_string()));
            }
            self.calls
                .lock()
                .push((recipient.to_string(), kind, token.to_string()));
            Ok(())
        }
    }

    #[derive(Default)]
    struct CountingBroker {
        publishes: Mutex<usize>,
    }

    impl Broker for CountingBroker {
        fn publish(&self, _: &str, _: Vec<u8>, _: Duration) -> Result<(), BrokerError> {
            *self.publishes.lock() += 1;
            Ok(())
        }
    }

    fn notifier(broker: Arc<dyn Broker>, mailer: Arc<RecordingMailer>) -> ResilientNotifier {
        ResilientNotifier::new(broker, mailer, NotifierConfig::default())
    }

    #[test]
    fn test_publish_success_skips_fallback() {
        let broker = Arc::new(QueueBroker::default());
        let queue = broker.declare_queue("inviteQueue");
        let mailer = Arc::new(RecordingMailer::default());
        let notifier = notifier(broker.clone(), mailer.clone());

        let message = NotificationMessage::invitation("ann@example.com", "tok");
        let delivery = notifier.send("inviteQueue", &message).unwrap();

        assert!(matches!(delivery, Delivery::Published));
        assert!(mailer.calls.lock().is_empty());
        let queued = NotificationMessage::decode(&queue.try_recv().unwrap()).unwrap();
        assert_eq!(queued, message);
    }

    #[test]
    fn test_open_circuit_skips_publish() {
        let broker = Arc::new(CountingBroker::default());
        let mailer = Arc::new(RecordingMailer::default());
        let notifier = notifier(broker.clone(), mailer.clone());
        notifier.breaker().trip();

        let message = NotificationMessage::verification("ann@example.com", "tok");
        let delivery = notifier.send("verificationQueue", &message).unwrap();

        assert!(matches!(
            delivery,
            Delivery::Fallback {
                cause: BrokerError::CircuitOpen(_)
            }
        ));
        assert_eq!(*broker.publishes.lock(), 0);
        assert_eq!(
            mailer.calls.lock().as_slice(),
            &[(
                "ann@example.com".to_string(),
                NotificationKind::Verification,
                "tok".to_string()
            )]
        );
    }

    #[test]
    fn test_broker_error_falls_back() {
        let broker = Arc::new(QueueBroker::default());
        let mailer = Arc::new(RecordingMailer::default());
        let notifier = notifier(broker, mailer.clone());

        let message = NotificationMessage::invitation("ann@example.com", "tok");
        let delivery = notifier.send("undeclared", &message).unwrap();

        assert!(matches!(
            delivery,
            Delivery::Fallback {
                cause: BrokerError::ChannelNotFound(_)
            }
        ));
        assert_eq!(mailer.calls.lock().len(), 1);
        assert_eq!(notifier.breaker().metrics().failed_calls, 1);
    }

    #[test]
    fn test_open_circuit_and_failed_fallback() {
        let broker = Arc::new(CountingBroker::default());
        let mailer = Arc::new(RecordingMailer {
            fail: true,
            ..Default::default()
        });
        let notifier = notifier(broker, mailer);
        notifier.breaker().trip();

        let message = NotificationMessage::invitation("ann@example.com", "tok");
        let err = notifier.send("inviteQueue", &message).unwrap_err();

        assert_eq!(err.channel, "inviteQueue");
        assert_eq!(err.kind, NotificationKind::Invitation);
        assert!(matches!(err.failure, FallbackFailure::Rejected(_)));
        assert!(err.is_retryable());
    }

    #[test]
    fn test_fallback_timeout_is_not_retryable() {
        let broker = Arc::new(CountingBroker::default());
        let mailer = Arc::new(RecordingMailer {
            delay: Some(Duration::from_millis(200)),
            ..Default::default()
        });
        let notifier = notifier(broker, mailer);
        notifier.breaker().trip();

        let message = NotificationMessage::invitation("ann@example.com", "tok");
        let err = notifier
            .send_with_timeout("inviteQueue", &message, Duration::from_millis(20))
            .unwrap_err();

        assert!(matches!(err.failure, FallbackFailure::TimedOut(_)));
        assert!(!err.is_retryable());
    }

    #[test]
    fn test_zero_budget_never_starts_fallback() {
        let broker = Arc::new(CountingBroker::default());
        let mailer = Arc::new(RecordingMailer::default());
        let notifier = notifier(broker, mailer.clone());
        notifier.breaker().trip();

        let message = NotificationMessage::invitation("ann@example.com", "tok");
        let err = notifier
            .send_with_timeout("inviteQueue", &message, Duration::ZERO)
            .unwrap_err();

        assert!(matches!(err.failure, FallbackFailure::DeadlineExceeded));
        assert!(mailer.calls.lock().is_empty());
    }

    #[test]
    fn test_duplicate_sends_deliver_twice() {
        let broker = Arc::new(CountingBroker::default());
        let mailer = Arc::new(RecordingMailer::default());
        let notifier = notifier(broker.clone(), mailer);

        let message = NotificationMessage::invitation("ann@example.com", "tok");
        notifier.send("inviteQueue", &message).unwrap();
        notifier.send("inviteQueue", &message).unwrap();

        assert_eq!(*broker.publishes.lock(), 2);
    }

    #[test]
    fn test_blocked_broker_leaves_budget_for_fallback() {
        let broker = Arc::new(QueueBroker::new(QueueConfig { capacity: 1 }));
        let _queue = broker.declare_queue("inviteQueue");
        let mailer = Arc::new(RecordingMailer::default());
        let notifier = notifier(broker, mailer.clone());

        let message = NotificationMessage::invitation("ann@example.com", "tok");
        assert!(matches!(
            notifier.send("inviteQueue", &message).unwrap(),
            Delivery::Published
        ));

        // Queue is full: the publish blocks until its share of the budget runs out.
        let delivery = notifier
            .send_with_timeout("inviteQueue", &message, Duration::from_millis(100))
            .unwrap();

        assert!(matches!(
            delivery,
            Delivery::Fallback {
                cause: BrokerError::Timeout { .. }
            }
        ));
        assert_eq!(mailer.calls.lock().len(), 1);
        assert_eq!(notifier.breaker().metrics().failed_calls, 1);
    }

    #[test]
    fn test_publish_timeout_caps_publish_budget() {
        let broker = Arc::new(QueueBroker::new(QueueConfig { capacity: 1 }));
        let _queue = broker.declare_queue("inviteQueue");
        let mailer = Arc::new(RecordingMailer::default());
        let config = NotifierConfig {
            publish_timeout: Duration::from_millis(10),
            ..Default::default()
        };
        let notifier = ResilientNotifier::new(broker, mailer.clone(), config);

        let message = NotificationMessage::invitation("ann@example.com", "tok");
        notifier.send("inviteQueue", &message).unwrap();

        let started = Instant::now();
        let delivery = notifier
            .send_with_timeout("inviteQueue", &message, Duration::from_secs(5))
            .unwrap();

        assert!(delivery.is_fallback());
        assert!(started.elapsed() < Duration::from_secs(1));
        assert_eq!(mailer.calls.lock().len(), 1);
    }

    #[test]
    fn test_hung_mailer_is_capped() {
        let broker = Arc::new(CountingBroker::default());
        let mailer = Arc::new(RecordingMailer {
            delay: Some(Duration::from_millis(300)),
            ..Default::default()
        });
        let config = NotifierConfig {
            max_concurrent_fallbacks: 2,
            ..Default::default()
        };
        let notifier = ResilientNotifier::new(broker, mailer, config);
        notifier.breaker().trip();

        let message = NotificationMessage::invitation("ann@example.com", "tok");
        let failures: Vec<FallbackFailure> = (0..4)
            .map(|_| {
                notifier
                    .send_with_timeout("inviteQueue", &message, Duration::from_millis(20))
                    .unwrap_err()
                    .failure
            })
            .collect();

        assert!(matches!(failures[0], FallbackFailure::TimedOut(_)));
        assert!(matches!(failures[1], FallbackFailure::TimedOut(_)));
        assert!(matches!(failures[2], FallbackFailure::Saturated(2)));
        assert!(matches!(failures[3], FallbackFailure::Saturated(2)));
        assert_eq!(notifier.fallbacks_in_flight(), 2);

        // Slots come back once the hung deliveries finish.
        thread::sleep(Duration::from_millis(500));
        assert_eq!(notifier.fallbacks_in_flight(), 0);
    }

    #[test]
    fn test_encode_failure_does_not_touch_breaker() {
        let broker = Arc::new(CountingBroker::default());
        let mailer = Arc::new(RecordingMailer::default());
        let config = NotifierConfig {
            breaker: CircuitBreakerConfig::default()
                .with_wait_duration_in_open_state(Duration::ZERO)
                .with_permitted_calls_in_half_open_state(1),
            ..Default::default()
        };
        let notifier = ResilientNotifier::new(broker.clone(), mailer, config);
        notifier.breaker().trip();
        assert_eq!(notifier.breaker().state(), CircuitState::HalfOpen);

        let result = notifier.publish(
            "inviteQueue",
            Err(BrokerError::Encode("bad payload".to_string())),
            Duration::from_millis(10),
        );

        assert!(matches!(result, Err(BrokerError::Encode(_))));
        assert_eq!(*broker.publishes.lock(), 0);
        // The single trial permit is still available.
        assert!(notifier.breaker().try_acquire_permission());
        assert!(notifier.breaker().last_failure_reason().is_none());
    }
}
