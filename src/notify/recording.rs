use super::{MailMessage, MailTransport};
use crate::error::NotificationError;
use chrono::{DateTime, Local};
use parking_lot::Mutex;

type SendHook = Box<dyn Fn(&MailMessage) + Send + Sync>;

/// Transport that keeps every message it is asked to send
#[derive(Default)]
pub(crate) struct RecordingTransport {
    sent: Mutex<Vec<(DateTime<Local>, MailMessage)>>,
    fail: Mutex<bool>,
    hook: Mutex<Option<SendHook>>,
}

impl RecordingTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_deliveries(&self, fail: bool) {
        *self.fail.lock() = fail;
    }

    /// Run `hook` at the moment of every delivery
    pub fn on_send(&self, hook: impl Fn(&MailMessage) + Send + Sync + 'static) {
        *self.hook.lock() = Some(Box::new(hook));
    }

    pub fn messages(&self) -> Vec<MailMessage> {
        self.sent.lock().iter().map(|(_, m)| m.clone()).collect()
    }

    pub fn sent_at(&self) -> Vec<DateTime<Local>> {
        self.sent.lock().iter().map(|(at, _)| *at).collect()
    }
}

#[async_trait::async_trait]
impl MailTransport for RecordingTransport {
    fn name(&self) -> &str {
        "recording"
    }

    async fn send(&self, message: &MailMessage) -> Result<(), NotificationError> {
        if *self.fail.lock() {
            return Err(NotificationError::Delivery {
                details: "simulated outage".to_string(),
            });
        }
        if let Some(hook) = self.hook.lock().as_ref() {
            hook(message);
        }
        self.sent.lock().push((Local::now(), message.clone()));
        Ok(())
    }
}
