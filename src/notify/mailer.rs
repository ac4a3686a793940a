//! Direct mail delivery, used by the queue consumer and as the broker fallback.

use super::message::NotificationKind;
use crate::error::MailError;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::debug;

/// Synchronous delivery of a notification to a recipient.
pub trait Mailer: Send + Sync {
    fn send(&self, recipient: &str, kind: NotificationKind, token: &str) -> Result<(), MailError>;
}

impl<M: Mailer + ?Sized> Mailer for Arc<M> {
    fn send(&self, recipient: &str, kind: NotificationKind, token: &str) -> Result<(), MailError> {
        (**self).send(recipient, kind, token)
    }
}

/// Sender identity and link base for rendered emails.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct MailConfig {
    pub from_address: String,
    /// Base URL the action links point at, without trailing slash.
    pub public_base_url: String,
}

impl Default for MailConfig {
    fn default() -> Self {
        Self {
            from_address: "no-reply@localhost".to_string(),
            public_base_url: "http://localhost:8080/api/v1".to_string(),
        }
    }
}

/// A fully rendered email, ready for a transport.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutgoingEmail {
    pub from: String,
    pub to: String,
    pub subject: String,
    /// Body template name.
    pub template: String,
    /// Link the recipient follows to act on the token.
    pub action_link: String,
}

/// Hands rendered emails to the outside world.
pub trait MailTransport: Send + Sync {
    fn deliver(&self, email: OutgoingEmail) -> Result<(), MailError>;
}

impl<T: MailTransport + ?Sized> MailTransport for Arc<T> {
    fn deliver(&self, email: OutgoingEmail) -> Result<(), MailError> {
        (**self).deliver(email)
    }
}

/// Mailer that renders the kind's template and delivers through a transport.
pub struct TemplateMailer<T> {
    config: MailConfig,
    transport: T,
}

impl<T: MailTransport> TemplateMailer<T> {
    pub fn new(config: MailConfig, transport: T) -> Self {
        Self { config, transport }
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// Render the email for a notification without sending it.
    pub fn render(&self, recipient: &str, kind: NotificationKind, token: &str) -> Result<OutgoingEmail, MailError> {
        if !is_plausible_address(recipient) {
            return Err(MailError::Rejected(format!("invalid recipient address: {:?}", recipient)));
        }

        let base = self.config.public_base_url.trim_end_matches('/');
        let action_link = match kind {
            NotificationKind::Invitation => {
                format!("{}/organizations/invitation/accept/{}", base, token)
            }
            NotificationKind::Verification => format!("{}/users/verify?token={}", base, token),
        };

        Ok(OutgoingEmail {
            from: self.config.from_address.clone(),
            to: recipient.to_string(),
            subject: kind.subject().to_string(),
            template: kind.template().to_string(),
            action_link,
        })
    }
}

impl<T: MailTransport> Mailer for TemplateMailer<T> {
    fn send(&self, recipient: &str, kind: NotificationKind, token: &str) -> Result<(), MailError> {
        let email = self.render(recipient, kind, token)?;
        debug!(to = %email.to, template = %email.template, "Delivering email");
        self.transport.deliver(email)
    }
}

fn is_plausible_address(address: &str) -> bool {
    match address.split_once('@') {
        Some((local, domain)) => !local.is_empty() && !domain.is_empty() && !address.contains(char::is_whitespace),
        None => false,
    }
}

/// In-memory transport that keeps every delivered email.
#[derive(Default)]
pub struct Outbox {
    sent: Mutex<Vec<OutgoingEmail>>,
}

impl Outbox {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of delivered emails, oldest first.
    pub fn sent(&self) -> Vec<OutgoingEmail> {
        self.sent.lock().clone()
    }

    pub fn len(&self) -> usize {
        self.sent.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl MailTransport for Outbox {
    fn deliver(&self, email: OutgoingEmail) -> Result<(), MailError> {
        self.sent.lock().push(email);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mailer() -> TemplateMailer<Arc<Outbox>> {
        let config = MailConfig {
            from_address: "team@example.com".to_string(),
            public_base_url: "https://api.example.com/api/v1/".to_string(),
        };
        TemplateMailer::new(config, Arc::new(Outbox::new()))
    }

    #[test]
    fn test_invitation_link() {
        let mailer = mailer();
        mailer
            .send("ann@example.com", NotificationKind::Invitation, "abc")
            .unwrap();

        let sent = mailer.transport().sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].subject, "You're Invited!");
        assert_eq!(
            sent[0].action_link,
            "https://api.example.com/api/v1/organizations/invitation/accept/abc"
        );
        assert_eq!(sent[0].from, "team@example.com");
    }

    #[test]
    fn test_verification_link() {
        let email = mailer()
            .render("bob@example.com", NotificationKind::Verification, "xyz")
            .unwrap();
        assert_eq!(email.action_link, "https://api.example.com/api/v1/users/verify?token=xyz");
        assert_eq!(email.template, "verificationEmail");
    }

    #[test]
    fn test_rejects_bad_recipient() {
        let mailer = mailer();
        for recipient in ["", "no-at-sign", "@example.com", "a b@example.com"] {
            let result = mailer.send(recipient, NotificationKind::Invitation, "t");
            assert!(matches!(result, Err(MailError::Rejected(_))), "{:?}", recipient);
        }
        assert!(mailer.transport().is_empty());
    }
}
