//! Outbound email port

use async_trait::async_trait;

use super::TaskError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EmailMessage {
    pub to: String,
    pub subject: String,
    pub body: String,
}

#[async_trait]
pub trait Mailer: Send + Sync {
    async fn send_email(&self, message: &EmailMessage) -> Result<(), TaskError>;
}

/// Writes outgoing mail to the log instead of delivering it
#[derive(Debug, Clone)]
pub struct LogMailer {
    sender_name: String,
    sender_address: String,
}

impl LogMailer {
    pub fn new(sender_name: impl Into<String>, sender_address: impl Into<String>) -> Self {
        Self {
            sender_name: sender_name.into(),
            sender_address: sender_address.into(),
        }
    }
}

#[async_trait]
impl Mailer for LogMailer {
    async fn send_email(&self, message: &EmailMessage) -> Result<(), TaskError> {
        tracing::info!(
            from = %format!("{} <{}>", self.sender_name, self.sender_address),
            to = %message.to,
            subject = %message.subject,
            body = %message.body,
            "Email sent"
        );
        Ok(())
    }
}
