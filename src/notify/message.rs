//! Notification payloads.

use crate::error::BrokerError;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Which delivery template a notification uses.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationKind {
    /// Invitation to join an organization.
    Invitation,
    /// Email address verification.
    Verification,
}

impl NotificationKind {
    /// Email subject line.
    pub fn subject(&self) -> &'static str {
        match self {
            NotificationKind::Invitation => "You're Invited!",
            NotificationKind::Verification => "Verification Email",
        }
    }

    /// Name of the email body template.
    pub fn template(&self) -> &'static str {
        match self {
            NotificationKind::Invitation => "invitationEmail",
            NotificationKind::Verification => "verificationEmail",
        }
    }

    /// Queue this kind is published to by default.
    pub fn default_channel(&self) -> &'static str {
        match self {
            NotificationKind::Invitation => "inviteQueue",
            NotificationKind::Verification => "verificationQueue",
        }
    }
}

impl fmt::Display for NotificationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NotificationKind::Invitation => write!(f, "invitation"),
            NotificationKind::Verification => write!(f, "verification"),
        }
    }
}

/// An immutable notification: who gets it, the token to embed, and the template.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotificationMessage {
    recipient: String,
    token: String,
    kind: NotificationKind,
}

impl NotificationMessage {
    pub fn new(recipient: impl Into<String>, token: impl Into<String>, kind: NotificationKind) -> Self {
        Self {
            recipient: recipient.into(),
            token: token.into(),
            kind,
        }
    }

    pub fn invitation(recipient: impl Into<String>, token: impl Into<String>) -> Self {
        Self::new(recipient, token, NotificationKind::Invitation)
    }

    pub fn verification(recipient: impl Into<String>, token: impl Into<String>) -> Self {
        Self::new(recipient, token, NotificationKind::Verification)
    }

    pub fn recipient(&self) -> &str {
        &self.recipient
    }

    pub fn token(&self) -> &str {
        &self.token
    }

    pub fn kind(&self) -> NotificationKind {
        self.kind
    }

    /// Encode for the wire (MessagePack with field names).
    pub fn encode(&self) -> Result<Vec<u8>, BrokerError> {
        Ok(rmp_serde::to_vec_named(self)?)
    }

    /// Decode a payload taken off a queue.
    pub fn decode(bytes: &[u8]) -> Result<Self, BrokerError> {
        Ok(rmp_serde::from_slice(bytes)?)
    }
}
