use super::{MailMessage, MailTransport};
use crate::error::NotificationError;
use tracing::info;

/// Transport that only logs messages; used for dry runs and builds without SMTP
pub struct LogTransport {
    name: String,
}

impl LogTransport {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
        }
    }
}

#[async_trait::async_trait]
impl MailTransport for LogTransport {
    fn name(&self) -> &str {
        &self.name
    }

    async fn send(&self, message: &MailMessage) -> Result<(), NotificationError> {
        if message.to.is_empty() {
            return Err(NotificationError::NoRecipients);
        }
        info!(
            to = ?message.to,
            attachments = ?message.attachment_names(),
            "Mail '{}' not delivered (log transport)",
            message.subject
        );
        Ok(())
    }
}
