//! Error types for filtering and notification delivery.

use crate::notify::NotificationKind;
use std::time::Duration;
use thiserror::Error;

/// Errors raised while turning a filter source into a condition or executing it.
#[derive(Debug, Error)]
pub enum QueryError {
    #[error("Error accessing field: {field} ({reason})")]
    Introspection { field: String, reason: String },

    #[error("Error filtering: unknown field `{field}` on entity `{entity}`")]
    UnknownField { entity: String, field: String },

    #[error("Error filtering: invalid value for `{field}`: {reason}")]
    InvalidFilter { field: String, reason: String },

    #[error("Condition compiled for `{got}` cannot run against `{expected}`")]
    EntityMismatch { expected: String, got: String },

    #[error("Invalid page request: {0}")]
    InvalidPage(String),

    #[error("Invalid record: {0}")]
    InvalidRecord(String),
}

impl QueryError {
    /// True for errors caused by the caller's filter input.
    pub fn is_bad_request(&self) -> bool {
        !matches!(
            self,
            QueryError::Introspection { .. } | QueryError::EntityMismatch { .. }
        )
    }

    /// HTTP-equivalent status code.
    pub fn status_code(&self) -> u16 {
        if self.is_bad_request() {
            400
        } else {
            500
        }
    }
}

/// The broker could not take the message. Always handled by the fallback path.
#[derive(Debug, Clone, Error)]
pub enum BrokerError {
    #[error("Channel not found: {0}")]
    ChannelNotFound(String),

    #[error("Broker is closed")]
    Closed,

    #[error("Publish to {channel} timed out after {timeout:?}")]
    Timeout { channel: String, timeout: Duration },

    #[error("Payload encoding failed: {0}")]
    Encode(String),

    #[error("Payload decoding failed: {0}")]
    Decode(String),

    #[error("Call not permitted: circuit breaker {0} is open")]
    CircuitOpen(String),
}

impl From<rmp_serde::encode::Error> for BrokerError {
    fn from(e: rmp_serde::encode::Error) -> Self {
        BrokerError::Encode(e.to_string())
    }
}

impl From<rmp_serde::decode::Error> for BrokerError {
    fn from(e: rmp_serde::decode::Error) -> Self {
        BrokerError::Decode(e.to_string())
    }
}

/// Failures of the direct mail path.
#[derive(Debug, Clone, Error)]
pub enum MailError {
    #[error("Recipient rejected: {0}")]
    Rejected(String),

    #[error("Mail transport failed: {0}")]
    Transport(String),
}

/// How the synchronous fallback failed.
#[derive(Debug, Clone, Error)]
pub enum FallbackFailure {
    /// The mailer answered with an error. Nothing was sent.
    #[error("fallback rejected: {0}")]
    Rejected(MailError),

    /// The deadline passed while the mailer was still working. It may still deliver.
    #[error("timed out during fallback after {0:?}")]
    TimedOut(Duration),

    /// The deadline passed before the fallback could start.
    #[error("deadline exceeded before fallback started")]
    DeadlineExceeded,

    /// Every fallback worker slot is busy. Nothing was sent.
    #[error("all {0} fallback workers busy")]
    Saturated(usize),

    /// The fallback worker went away without reporting.
    #[error("fallback worker terminated")]
    WorkerLost,
}

/// Both the broker and the fallback failed to deliver a notification.
#[derive(Debug, Clone, Error)]
#[error("Delivery of {kind} notification on channel {channel} failed: {failure}")]
pub struct DeliveryError {
    pub channel: String,
    pub kind: NotificationKind,
    pub failure: FallbackFailure,
}

impl DeliveryError {
    /// Whether the caller may retry without risking a duplicate delivery.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self.failure,
            FallbackFailure::Rejected(_)
                | FallbackFailure::DeadlineExceeded
                | FallbackFailure::Saturated(_)
        )
    }
}

/// A queued notification could not be handled by the consumer.
#[derive(Debug, Error)]
pub enum ConsumeError {
    #[error(transparent)]
    Decode(#[from] BrokerError),

    #[error(transparent)]
    Mail(#[from] MailError),
}

/// Sequence generator failures.
#[derive(Debug, Error)]
pub enum SequenceError {
    #[error("Sequence exhausted")]
    Exhausted,
}

/// Result type for filtering operations.
pub type Result<T> = std::result::Result<T, QueryError>;
