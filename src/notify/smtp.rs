use super::{content_type_for, MailMessage, MailTransport};
use crate::config::{NotificationConfig, TlsMode};
use crate::error::NotificationError;
use lettre::message::header::ContentType;
use lettre::message::{Attachment, Mailbox, MultiPart, SinglePart};
use lettre::transport::smtp::authentication::Credentials;
use lettre::{AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};
use std::time::Duration;
use tracing::{debug, info};

/// SMTP delivery through lettre, with optional TLS and authentication
pub struct SmtpTransport {
    name: String,
    transport: AsyncSmtpTransport<Tokio1Executor>,
}

impl SmtpTransport {
    pub fn new(config: &NotificationConfig) -> Result<Self, NotificationError> {
        let builder = match config.tls {
            TlsMode::None => {
                AsyncSmtpTransport::<Tokio1Executor>::builder_dangerous(config.host.as_str())
            }
            TlsMode::StartTls => {
                AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&config.host).map_err(
                    |e| NotificationError::Delivery {
                        details: format!("STARTTLS setup for {} failed: {}", config.host, e),
                    },
                )?
            }
            TlsMode::Tls => AsyncSmtpTransport::<Tokio1Executor>::relay(&config.host).map_err(
                |e| NotificationError::Delivery {
                    details: format!("TLS setup for {} failed: {}", config.host, e),
                },
            )?,
        };

        let mut builder = builder
            .port(config.port)
            .timeout(Some(Duration::from_secs(config.timeout_secs)));

        if let Some(username) = &config.username {
            let password = config.password.clone().unwrap_or_default();
            builder = builder.credentials(Credentials::new(username.clone(), password));
        }

        info!(
            "SMTP transport configured for {}:{} (tls={:?}, auth={})",
            config.host,
            config.port,
            config.tls,
            config.username.is_some()
        );

        Ok(Self {
            name: config.id.clone(),
            transport: builder.build(),
        })
    }
}

fn mailbox(address: &str) -> Result<Mailbox, NotificationError> {
    address
        .parse::<Mailbox>()
        .map_err(|e| NotificationError::Address {
            address: address.to_string(),
            details: e.to_string(),
        })
}

async fn build_message(message: &MailMessage) -> Result<Message, NotificationError> {
    if message.to.is_empty() {
        return Err(NotificationError::NoRecipients);
    }

    let mut builder = Message::builder()
        .from(mailbox(&message.from)?)
        .subject(message.subject.clone());
    for recipient in &message.to {
        builder = builder.to(mailbox(recipient)?);
    }

    let mut body = MultiPart::mixed().singlepart(SinglePart::plain(message.body.clone()));
    for path in &message.attachments {
        let data = tokio::fs::read(path)
            .await
            .map_err(|e| NotificationError::Build {
                details: format!("attachment {} unreadable: {}", path.display(), e),
            })?;
        let content_type =
            ContentType::parse(content_type_for(path)).map_err(|e| NotificationError::Build {
                details: e.to_string(),
            })?;
        let filename = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "attachment".to_string());
        body = body.singlepart(Attachment::new(filename).body(data, content_type));
    }

    builder
        .multipart(body)
        .map_err(|e| NotificationError::Build {
            details: e.to_string(),
        })
}

#[async_trait::async_trait]
impl MailTransport for SmtpTransport {
    fn name(&self) -> &str {
        &self.name
    }

    async fn send(&self, message: &MailMessage) -> Result<(), NotificationError> {
        let email = build_message(message).await?;
        debug!(
            "Sending '{}' to {:?} with {} attachment(s)",
            message.subject,
            message.to,
            message.attachments.len()
        );
        self.transport
            .send(email)
            .await
            .map_err(|e| NotificationError::Delivery {
                details: e.to_string(),
            })?;
        Ok(())
    }
}
