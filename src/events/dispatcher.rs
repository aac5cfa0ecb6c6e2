use super::context::{ActionContext, EventId};
use super::workers::{WorkerGuard, WorkerId};
use crate::actions::{ActionRequest, ActionRunner};
use crate::engine::Engine;
use crate::error::{Result, WatchpostError};
use crate::model::{format_params, Action, SourceKind, Trigger};
use std::sync::Arc;
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// A trigger pushed onto the dispatcher channel
#[derive(Debug)]
pub struct FiredTrigger {
    pub trigger_id: String,
    /// Receives the id of the resulting event, `None` when suppressed
    pub reply: Option<oneshot::Sender<Option<EventId>>>,
}

/// Fans a fired trigger out into one worker per enabled action
pub struct EventDispatcher {
    engine: Arc<Engine>,
    runner: ActionRunner,
}

struct Scheduled {
    action: Action,
    is_last: bool,
    worker: WorkerId,
}

/// Order actions for dispatch and mark the one that runs last.
///
/// The first notification goes first but is marked last; without one the
/// final other action is.
fn plan(actions: Vec<Action>) -> Vec<(Action, bool)> {
    let (notifications, others): (Vec<Action>, Vec<Action>) = actions
        .into_iter()
        .partition(|action| action.source == SourceKind::Notification);

    let mut notifications = notifications.into_iter();
    let mut planned = Vec::new();
    match notifications.next() {
        Some(last) => {
            planned.push((last, true));
            planned.extend(others.into_iter().map(|a| (a, false)));
            planned.extend(notifications.map(|a| (a, false)));
        }
        None => {
            let count = others.len();
            planned.extend(
                others
                    .into_iter()
                    .enumerate()
                    .map(|(i, a)| (a, i + 1 == count)),
            );
        }
    }
    planned
}

impl EventDispatcher {
    pub fn new(engine: Arc<Engine>) -> Self {
        let runner = ActionRunner::new(Arc::clone(&engine));
        Self { engine, runner }
    }

    /// Handle one firing; returns the new event id, or `None` when suppressed
    pub async fn dispatch(&self, trigger_id: &str) -> Result<Option<EventId>> {
        let engine = &self.engine;
        let Some(trigger) = engine.trigger(trigger_id).cloned() else {
            warn!("Fired trigger {} is not configured", trigger_id);
            return Ok(None);
        };

        if !engine.is_armed(&trigger.id) {
            debug!("Trigger {} fired while disarmed", trigger.id);
            return Ok(None);
        }
        if trigger.source == SourceKind::MotionSampler && !engine.schedule().is_armed_now() {
            debug!("Trigger {} outside operating hours", trigger.id);
            return Ok(None);
        }
        if engine.debounce().is_bouncing(&trigger)? {
            return Ok(None);
        }

        let context = engine.contexts().create(&trigger.id);
        let event_id = context.id.clone();
        engine.journal().record(
            "Event",
            &format!(
                "{} opened by {} ({} {} {})",
                event_id, trigger.id, trigger.source, trigger.device, trigger.event
            ),
        );
        if trigger.log_event() {
            let param = if trigger.params.is_empty() {
                trigger.device.clone()
            } else {
                format!("{}: {}", trigger.device, format_params(&trigger.params))
            };
            if let Err(e) = engine.store().insert_event(
                &event_id,
                &trigger.event,
                &trigger.id,
                trigger.source.as_str(),
                &param,
            ) {
                error!("Failed to store event {}: {}", event_id, e);
            }
        }

        let actions: Vec<Action> = trigger
            .enabled_actions()
            .filter_map(|id| {
                let action = engine.action(id).cloned();
                if action.is_none() {
                    warn!("Trigger {} references unknown action {}", trigger.id, id);
                }
                action
            })
            .collect();

        let planned = plan(actions);
        if planned.is_empty() {
            self.finalize(&event_id);
            return Ok(Some(event_id));
        }

        // every worker is registered before any starts so barriers see all siblings
        let scheduled: Vec<Scheduled> = planned
            .into_iter()
            .map(|(action, is_last)| {
                let worker = engine.workers().register(Some(&event_id), &action.id);
                engine.contexts().add_action(
                    &event_id,
                    ActionContext::new(&action.id, action.source, is_last, worker),
                );
                Scheduled {
                    action,
                    is_last,
                    worker,
                }
            })
            .collect();

        info!(
            "Event {} from {}: dispatching {} action(s)",
            event_id,
            trigger.id,
            scheduled.len()
        );
        for job in scheduled {
            self.spawn_worker(&trigger, &event_id, job);
        }
        Ok(Some(event_id))
    }

    fn spawn_worker(&self, trigger: &Trigger, event_id: &EventId, job: Scheduled) {
        let engine = Arc::clone(&self.engine);
        let runner = self.runner.clone();
        let request = ActionRequest {
            wait: job.action.wait(),
            action: job.action,
            trigger: Some(trigger.clone()),
            event_id: Some(event_id.clone()),
            worker: Some(job.worker),
            is_last: job.is_last,
        };
        let is_last = job.is_last;
        let worker = job.worker;
        let event_id = event_id.clone();

        tokio::spawn(async move {
            let mut guard = WorkerGuard::new(engine.workers(), worker);
            let source = request.action.source;
            runner.run(request).await;

            if !is_last {
                return;
            }

            // a notification already waited inside its executor; this returns at once then
            engine
                .settle_siblings(&event_id, worker, source.as_str())
                .await;

            guard.finish();
            Self::close(&engine, &event_id);
        });
    }

    fn finalize(&self, event_id: &str) {
        Self::close(&self.engine, event_id);
    }

    fn close(engine: &Engine, event_id: &str) {
        let Some(context) = engine.contexts().remove(event_id) else {
            warn!("Event {} closed twice", event_id);
            return;
        };
        let done = context.actions.iter().filter(|a| a.succeeded()).count();
        engine.journal().record(
            "Event",
            &format!(
                "{} closed: {}/{} action(s) done",
                event_id,
                done,
                context.actions.len()
            ),
        );
        debug!("Event {} finalized", event_id);
    }

    /// Consume fired triggers until cancelled
    pub async fn run(self, cancel: CancellationToken) -> Result<()> {
        let mut receiver = self
            .engine
            .take_trigger_receiver()
            .ok_or_else(|| WatchpostError::system("event dispatcher already running"))?;
        info!("Event dispatcher running");

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                fired = receiver.recv() => {
                    let Some(fired) = fired else { break };
                    let event = match self.dispatch(&fired.trigger_id).await {
                        Ok(event) => event,
                        Err(e) => {
                            let category = self
                                .engine
                                .trigger(&fired.trigger_id)
                                .map(|t| t.source)
                                .unwrap_or(SourceKind::MotionSampler);
                            self.engine.record_failure(
                                category,
                                &format!("dispatch of {}", fired.trigger_id),
                                &e,
                            );
                            None
                        }
                    };
                    if let Some(reply) = fired.reply {
                        let _ = reply.send(event);
                    }
                }
            }
        }

        info!("Event dispatcher stopped");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::ParamMap;

    fn action(id: &str, source: SourceKind) -> Action {
        Action {
            id: id.to_string(),
            source,
            device: String::new(),
            method: "m".to_string(),
            params: ParamMap::new(),
            control: ParamMap::new(),
        }
    }

    fn ids(planned: &[(Action, bool)]) -> Vec<(&str, bool)> {
        planned.iter().map(|(a, last)| (a.id.as_str(), *last)).collect()
    }

    #[test]
    fn test_notification_dispatched_first_but_last() {
        let planned = plan(vec![
            action("photo", SourceKind::Camera),
            action("mail", SourceKind::Notification),
            action("led", SourceKind::GeneralIo),
            action("mail2", SourceKind::Notification),
        ]);
        assert_eq!(
            ids(&planned),
            vec![("mail", true), ("photo", false), ("led", false), ("mail2", false)]
        );
    }

    #[test]
    fn test_last_other_marked_without_notification() {
        let planned = plan(vec![
            action("photo", SourceKind::Camera),
            action("led", SourceKind::GeneralIo),
        ]);
        assert_eq!(ids(&planned), vec![("photo", false), ("led", true)]);
        assert!(plan(Vec::new()).is_empty());
    }
}
