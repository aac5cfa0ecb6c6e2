//! Action executors.
//!
//! Every executor shares one contract: run an action, optionally on behalf of
//! an event, and report `(done, message)`. Device failures never escape an
//! executor; they are journaled, posted to the status board and reported as
//! `done = false`.

mod camera;
mod gpio;
mod notify;
#[cfg(test)]
mod tests;

use crate::engine::Engine;
use crate::error::Result;
use crate::events::{EventId, WorkerId};
use crate::model::{Action, SourceKind, Trigger};
use chrono::Local;
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, info};

/// Result of one action run
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ActionOutcome {
    pub done: bool,
    pub message: String,
}

impl ActionOutcome {
    pub fn ok(message: impl Into<String>) -> Self {
        Self {
            done: true,
            message: message.into(),
        }
    }

    pub fn failed(message: impl Into<String>) -> Self {
        Self {
            done: false,
            message: message.into(),
        }
    }
}

/// One action to run, with the event it belongs to
#[derive(Debug, Clone)]
pub struct ActionRequest {
    pub action: Action,
    pub trigger: Option<Trigger>,
    pub event_id: Option<EventId>,
    pub worker: Option<WorkerId>,
    pub is_last: bool,
    pub wait: bool,
}

impl ActionRequest {
    /// A request outside of any event
    pub fn standalone(action: Action) -> Self {
        let wait = action.wait();
        Self {
            action,
            trigger: None,
            event_id: None,
            worker: None,
            is_last: false,
            wait,
        }
    }

    /// Context key of the action, when it runs inside an event
    pub(crate) fn context_key(&self) -> Option<(&str, WorkerId)> {
        match (&self.event_id, self.worker) {
            (Some(event_id), Some(worker)) => Some((event_id.as_str(), worker)),
            _ => None,
        }
    }

    /// Event id under which store rows are written; `None` when the trigger does not log
    pub(crate) fn logged_event(&self) -> Option<&str> {
        match (&self.event_id, &self.trigger) {
            (Some(event_id), Some(trigger)) if trigger.log_event() => Some(event_id.as_str()),
            _ => None,
        }
    }

    /// Stem for files produced by this action
    pub(crate) fn file_stem(&self) -> String {
        let prefix = match &self.event_id {
            Some(event_id) => event_id.replace([':', '.'], "-"),
            None => format!("manual-{}", uuid::Uuid::new_v4().simple()),
        };
        format!("{}_{}", prefix, self.action.id)
    }
}

/// Runs actions against the engine's devices
#[derive(Clone)]
pub struct ActionRunner {
    engine: Arc<Engine>,
}

impl ActionRunner {
    pub fn new(engine: Arc<Engine>) -> Self {
        Self { engine }
    }

    pub async fn run(&self, request: ActionRequest) -> ActionOutcome {
        let action = &request.action;
        debug!(
            "Running action {} ({} {}.{})",
            action.id, action.source, action.device, action.method
        );

        if let Some((event_id, worker)) = request.context_key() {
            self.engine
                .contexts()
                .update_action(event_id, worker, |ctx| ctx.started = Some(Local::now()));
        }

        let result: Result<ActionOutcome> = match action.source {
            SourceKind::GeneralIo => gpio::run(&self.engine, &request).await,
            SourceKind::Camera => camera::run(&self.engine, &request).await,
            SourceKind::Notification => notify::run(&self.engine, &request).await,
            SourceKind::MotionSampler => Ok(ActionOutcome::failed(format!(
                "action {} targets {}, which accepts no actions",
                action.id, action.source
            ))),
        };

        let outcome = match result {
            Ok(outcome) => {
                if outcome.done {
                    self.engine.status().clear(action.source.as_str());
                }
                outcome
            }
            Err(e) => {
                self.engine
                    .record_failure(action.source, &format!("action {}", action.id), &e);
                ActionOutcome::failed(e.to_string())
            }
        };

        if let Some((event_id, worker)) = request.context_key() {
            let recorded = outcome.clone();
            self.engine.contexts().update_action(event_id, worker, |ctx| {
                ctx.stopped = Some(Local::now());
                ctx.outcome = Some(recorded);
            });
        }

        info!(
            "Action {} {}: {}",
            action.id,
            if outcome.done { "done" } else { "not done" },
            outcome.message
        );
        outcome
    }

    /// Run one configured action outside of any event
    pub async fn run_standalone(&self, action_id: &str) -> Result<ActionOutcome> {
        let action = self.engine.action(action_id).cloned().ok_or_else(|| {
            crate::error::WatchpostError::configuration(format!("unknown action '{}'", action_id))
        })?;
        Ok(self.run(ActionRequest::standalone(action)).await)
    }
}
