use super::{ActionOutcome, ActionRequest};
use crate::engine::Engine;
use crate::error::{NotificationError, Result};
use crate::events::{EventContext, NewAction};
use crate::model::{ParamValue, SourceKind};
use crate::notify::MailMessage;
use chrono::Local;
use std::fmt::Write as _;
use std::sync::Arc;
use tracing::debug;

pub(super) async fn run(engine: &Arc<Engine>, request: &ActionRequest) -> Result<ActionOutcome> {
    let action = &request.action;

    // nothing is sent until every sibling has stopped
    if request.is_last {
        if let Some((event_id, worker)) = request.context_key() {
            engine.settle_siblings(event_id, worker, &action.id).await;
        }
    }

    // mail delivery never contends for the busy flag
    let (_, handle) = engine
        .registry()
        .acquire(SourceKind::Notification, &action.device, false)?;
    let mailer = handle
        .as_mailer()
        .cloned()
        .unwrap_or_else(|| Arc::clone(engine.mailer()));

    let context = request
        .event_id
        .as_deref()
        .and_then(|event_id| engine.contexts().get(event_id));
    let message = compose(engine, request, context.as_ref())?;

    let sent_at = Local::now();
    mailer.send(&message).await?;
    debug!(
        "Mail '{}' sent with {} attachment(s)",
        message.subject,
        message.attachments.len()
    );

    if let Some(event_id) = request.logged_event() {
        engine.store().insert_action(&NewAction {
            event: event_id,
            at: sent_at,
            action_type: "Mail",
            duration: None,
            filename: &message.attachment_names().join(","),
            fullpath: &message.to.join(","),
        })?;
    }

    Ok(ActionOutcome::ok(format!(
        "mail sent to {} recipient(s) with {} attachment(s)",
        message.to.len(),
        message.attachments.len()
    )))
}

fn param_str<'a>(request: &'a ActionRequest, name: &str) -> Option<&'a str> {
    request
        .action
        .params
        .get(name)
        .and_then(ParamValue::as_str)
        .map(str::trim)
        .filter(|value| !value.is_empty())
}

fn compose(
    engine: &Engine,
    request: &ActionRequest,
    context: Option<&EventContext>,
) -> Result<MailMessage> {
    let action = &request.action;
    let settings = &engine.config().notification;

    let to: Vec<String> = match param_str(request, "to") {
        Some(list) => list
            .split(',')
            .map(str::trim)
            .filter(|address| !address.is_empty())
            .map(str::to_string)
            .collect(),
        None => settings.recipients.clone(),
    };
    if to.is_empty() {
        return Err(NotificationError::NoRecipients.into());
    }

    let subject = match (param_str(request, "subject"), &request.trigger) {
        (Some(subject), _) => format!("{} {}", settings.subject_prefix, subject),
        (None, Some(trigger)) => format!(
            "{} {} on {}",
            settings.subject_prefix, trigger.event, trigger.device
        ),
        (None, None) => format!("{} {}", settings.subject_prefix, action.id),
    };

    let mut attachments = Vec::new();
    if let (Some(context), Some(worker)) = (context, request.worker) {
        if action.attach_photo() {
            attachments.extend(context.sibling_photos(worker));
        }
        if action.attach_video() {
            attachments.extend(context.sibling_videos(worker));
        }
    }

    let body = match param_str(request, "message") {
        Some(message) => message.to_string(),
        None => default_body(request, context),
    };

    Ok(MailMessage {
        from: settings.sender.clone(),
        to,
        subject: subject.trim().to_string(),
        body,
        attachments,
    })
}

fn default_body(request: &ActionRequest, context: Option<&EventContext>) -> String {
    let mut body = String::new();
    match &request.trigger {
        Some(trigger) => {
            let _ = writeln!(
                body,
                "Trigger {} fired: {} {} reported {}.",
                trigger.id, trigger.source, trigger.device, trigger.event
            );
        }
        None => {
            let _ = writeln!(body, "Action {} run manually.", request.action.id);
        }
    }

    if let Some(context) = context {
        let _ = writeln!(
            body,
            "Event {} at {}.",
            context.id,
            context.created.format("%Y-%m-%d %H:%M:%S")
        );
        let siblings: Vec<_> = context
            .actions
            .iter()
            .filter(|a| Some(a.worker) != request.worker)
            .collect();
        if !siblings.is_empty() {
            let _ = writeln!(body, "\nActions:");
            for sibling in siblings {
                let status = match &sibling.outcome {
                    Some(outcome) if outcome.done => format!("done, {}", outcome.message),
                    Some(outcome) => format!("failed, {}", outcome.message),
                    None => "unfinished".to_string(),
                };
                let _ = writeln!(body, "  {}: {}", sibling.action_id, status);
            }
        }
    }
    body
}
