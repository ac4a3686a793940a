//! Notification delivery.
//!
//! Notifications are published to a named queue on a [`Broker`] and picked
//! up by a [`NotificationConsumer`], which mails them. When the broker can't
//! take a message (transport error, timeout, or the circuit breaker is
//! open), [`ResilientNotifier`] delivers it directly through the [`Mailer`]
//! instead, blocking the caller until the mail is sent or the deadline hits.
//!
//! # Example
//!
//! ```ignore
//! let broker = Arc::new(QueueBroker::default());
//! let queue = broker.declare_queue("inviteQueue");
//! let mailer = Arc::new(TemplateMailer::new(MailConfig::default(), Outbox::new()));
//!
//! let consumer = NotificationConsumer::new(mailer.clone());
//! consumer.spawn(queue)?;
//!
//! let notifier = ResilientNotifier::new(broker, mailer, NotifierConfig::default());
//! notifier.send("inviteQueue", &NotificationMessage::invitation("ann@example.com", token))?;
//! ```

mod breaker;
mod broker;
mod consumer;
mod mailer;
mod message;
mod notifier;

pub use breaker::{BreakerMetrics, CircuitBreaker, CircuitBreakerConfig, CircuitState};
pub use broker::{Broker, QueueBroker, QueueConfig, QueueReceiver};
pub use consumer::{ConsumerStats, NotificationConsumer};
pub use mailer::{MailConfig, MailTransport, Mailer, OutgoingEmail, Outbox, TemplateMailer};
pub use message::{NotificationKind, NotificationMessage};
pub use notifier::{Delivery, NotifierConfig, ResilientNotifier};
