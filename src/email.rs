//! Outbound email abstraction.
//!
//! Handlers build plain-text messages and hand them to a [`Notifier`]. Delivery
//! (SMTP, an HTTP API, a queue) belongs to the implementation; the default
//! [`LogNotifier`] only logs the message, which is enough for local development.

use anyhow::Result;
use tracing::info;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EmailMessage {
    pub to: String,
    pub subject: String,
    pub body: String,
}

pub trait Notifier: Send + Sync {
    /// Deliver a message.
    ///
    /// # Errors
    /// Returns an error if the message could not be handed off.
    fn send(&self, message: &EmailMessage) -> Result<()>;
}

#[derive(Clone, Debug, Default)]
pub struct LogNotifier;

impl Notifier for LogNotifier {
    fn send(&self, message: &EmailMessage) -> Result<()> {
        info!(
            to = %message.to,
            subject = %message.subject,
            body = %message.body,
            "Sending email"
        );
        Ok(())
    }
}

#[must_use]
pub fn verification_email(to: &str, token: &str, base_url: &str) -> EmailMessage {
    EmailMessage {
        to: to.to_string(),
        subject: "Email Verification".to_string(),
        body: format!(
            "Welcome!\n\n\
             Use the code below to verify your email address:\n\n\
             {token}\n\n\
             Enter it at {base_url}/verify-email. The code expires in one hour.\n"
        ),
    }
}

#[must_use]
pub fn password_reset_email(to: &str, token: &str, base_url: &str) -> EmailMessage {
    let link = format!("{base_url}/reset-password?email={}", encode_query(to));
    EmailMessage {
        to: to.to_string(),
        subject: "Password Reset".to_string(),
        body: format!(
            "Someone asked to reset the password for this account.\n\n\
             Reset code: {token}\n\n\
             Enter it at {link}. The code expires in 15 minutes.\n\
             If this was not you, you can ignore this email.\n"
        ),
    }
}

#[must_use]
pub fn email_change_email(to: &str, token: &str, base_url: &str) -> EmailMessage {
    EmailMessage {
        to: to.to_string(),
        subject: "Confirm Email Change".to_string(),
        body: format!(
            "Use the code below to confirm this address for your account:\n\n\
             {token}\n\n\
             Enter it on {base_url}/account. The code expires in 15 minutes.\n"
        ),
    }
}

/// Percent-encode a value for use in a query string.
#[must_use]
pub fn encode_query(value: &str) -> String {
    url::form_urlencoded::byte_serialize(value.as_bytes()).collect()
}
