//! Outbound mail: message type, transport trait and the concrete transports.

mod log;
#[cfg(test)]
pub(crate) mod recording;
#[cfg(feature = "smtp")]
mod smtp;

pub use self::log::LogTransport;
#[cfg(feature = "smtp")]
pub use self::smtp::SmtpTransport;

use crate::config::NotificationConfig;
use crate::error::NotificationError;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// A composed notification ready for delivery
#[derive(Debug, Clone, PartialEq)]
pub struct MailMessage {
    pub from: String,
    pub to: Vec<String>,
    pub subject: String,
    pub body: String,
    pub attachments: Vec<PathBuf>,
}

impl MailMessage {
    /// File names of all attachments, in order
    pub fn attachment_names(&self) -> Vec<String> {
        self.attachments
            .iter()
            .filter_map(|path| path.file_name())
            .map(|name| name.to_string_lossy().into_owned())
            .collect()
    }
}

/// Session-oriented mail delivery
#[async_trait::async_trait]
pub trait MailTransport: Send + Sync {
    fn name(&self) -> &str;

    async fn send(&self, message: &MailMessage) -> Result<(), NotificationError>;
}

/// MIME type for an attachment, guessed from its extension
pub fn content_type_for(path: &Path) -> &'static str {
    match path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase())
        .as_deref()
    {
        Some("jpg") | Some("jpeg") => "image/jpeg",
        Some("png") => "image/png",
        Some("mjpeg") | Some("mjpg") => "video/x-motion-jpeg",
        Some("mp4") => "video/mp4",
        Some("h264") => "video/h264",
        _ => "application/octet-stream",
    }
}

/// Build the transport selected by configuration
#[cfg(feature = "smtp")]
pub fn transport_from_config(
    config: &NotificationConfig,
) -> Result<Arc<dyn MailTransport>, NotificationError> {
    Ok(Arc::new(SmtpTransport::new(config)?))
}

/// Build the transport selected by configuration (SMTP support not compiled in)
#[cfg(not(feature = "smtp"))]
pub fn transport_from_config(
    config: &NotificationConfig,
) -> Result<Arc<dyn MailTransport>, NotificationError> {
    tracing::warn!(
        "SMTP support disabled at build time; notifications for {} are only logged",
        config.host
    );
    Ok(Arc::new(LogTransport::new(&config.id)))
}
