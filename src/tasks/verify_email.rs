//! `task:send_verify_email`

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::users::UserService;

use super::{EmailMessage, Mailer, Task, TaskError, TaskHandler};

pub const TASK_SEND_VERIFY_EMAIL: &str = "task:send_verify_email";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PayloadSendVerifyEmail {
    pub username: String,
}

/// Creates a verification record and mails its link.
///
/// Running twice sends two links; each is independently valid until used
/// or expired, so a duplicate delivery is harmless.
pub struct SendVerifyEmailHandler {
    users: UserService,
    mailer: Arc<dyn Mailer>,
    frontend_domain: String,
}

impl SendVerifyEmailHandler {
    pub fn new(users: UserService, mailer: Arc<dyn Mailer>, frontend_domain: impl Into<String>) -> Self {
        Self {
            users,
            mailer,
            frontend_domain: frontend_domain.into(),
        }
    }

    fn verify_url(&self, email_id: i64, secret_code: &str) -> String {
        format!(
            "{}/api/v1/users/verify_email?email_id={}&secret_code={}",
            self.frontend_domain.trim_end_matches('/'),
            email_id,
            secret_code
        )
    }
}

#[async_trait]
impl TaskHandler for SendVerifyEmailHandler {
    async fn process(&self, task: &Task) -> Result<(), TaskError> {
        // A payload that does not decode now never will
        let payload: PayloadSendVerifyEmail = serde_json::from_slice(&task.payload)
            .map_err(|e| TaskError::SkipRetry(format!("invalid payload: {}", e)))?;

        // The user row may not be visible yet; a failure here is retried
        let (user, record) = self
            .users
            .issue_verify_email(&payload.username)
            .await
            .map_err(|e| TaskError::Handler(e.to_string()))?;

        let url = self.verify_url(record.id, &record.secret_code);
        let message = EmailMessage {
            to: user.email.clone(),
            subject: "Welcome to Banking System".to_string(),
            body: format!(
                "Hello {},<br/>Thank you for registering with us!<br/>\
                 Please <a href=\"{}\">click here</a> to verify your email address.<br/>",
                user.full_name, url
            ),
        };
        self.mailer.send_email(&message).await?;

        tracing::info!(
            task_id = %task.id,
            username = %user.username,
            email = %user.email,
            "Verification email sent"
        );
        Ok(())
    }
}
