use super::workers::WorkerId;
use crate::actions::ActionOutcome;
use crate::model::SourceKind;
use chrono::{DateTime, Duration as ChronoDuration, Local, NaiveDateTime};
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::path::PathBuf;

/// Event identity: local ISO-8601 timestamp with microseconds, unique per process
pub type EventId = String;

const EVENT_ID_FORMAT: &str = "%Y-%m-%dT%H:%M:%S%.6f";

/// A video started by an action
#[derive(Debug, Clone)]
pub struct VideoRecord {
    pub path: PathBuf,
    pub started: DateTime<Local>,
    pub stopped: Option<DateTime<Local>>,
}

/// Bookkeeping for one action within an event
#[derive(Debug, Clone)]
pub struct ActionContext {
    pub action_id: String,
    pub source: SourceKind,
    pub is_last: bool,
    pub worker: WorkerId,
    /// Secondary workers spawned by this action (e.g. a recording timer)
    pub helpers: Vec<WorkerId>,
    pub started: Option<DateTime<Local>>,
    pub stopped: Option<DateTime<Local>>,
    pub photos: Vec<PathBuf>,
    pub video: Option<VideoRecord>,
    pub outcome: Option<ActionOutcome>,
}

impl ActionContext {
    pub fn new(action_id: &str, source: SourceKind, is_last: bool, worker: WorkerId) -> Self {
        Self {
            action_id: action_id.to_string(),
            source,
            is_last,
            worker,
            helpers: Vec::new(),
            started: None,
            stopped: None,
            photos: Vec::new(),
            video: None,
            outcome: None,
        }
    }

    pub fn succeeded(&self) -> bool {
        self.outcome.as_ref().map(|o| o.done).unwrap_or(false)
    }
}

/// An in-flight event and its action sub-contexts
#[derive(Debug, Clone)]
pub struct EventContext {
    pub id: EventId,
    pub trigger_id: String,
    pub created: DateTime<Local>,
    pub actions: Vec<ActionContext>,
}

impl EventContext {
    /// Workers the last action must wait for: every other action and its helpers
    pub fn sibling_workers(&self, own: WorkerId) -> Vec<WorkerId> {
        self.actions
            .iter()
            .filter(|action| action.worker != own)
            .flat_map(|action| std::iter::once(action.worker).chain(action.helpers.iter().copied()))
            .chain(
                self.actions
                    .iter()
                    .filter(|action| action.worker == own)
                    .flat_map(|action| action.helpers.iter().copied()),
            )
            .collect()
    }

    /// Photos recorded by actions other than `own`
    pub fn sibling_photos(&self, own: WorkerId) -> Vec<PathBuf> {
        self.actions
            .iter()
            .filter(|action| action.worker != own)
            .flat_map(|action| action.photos.iter().cloned())
            .collect()
    }

    /// Finished videos recorded by actions other than `own`
    pub fn sibling_videos(&self, own: WorkerId) -> Vec<PathBuf> {
        self.actions
            .iter()
            .filter(|action| action.worker != own)
            .filter_map(|action| action.video.as_ref())
            .filter(|video| video.stopped.is_some())
            .map(|video| video.path.clone())
            .collect()
    }

    pub fn last_action(&self) -> Option<&ActionContext> {
        self.actions.iter().find(|action| action.is_last)
    }
}

#[derive(Default)]
struct StoreInner {
    events: BTreeMap<EventId, EventContext>,
    last_issued: Option<NaiveDateTime>,
}

/// In-flight event contexts
#[derive(Default)]
pub struct EventContextStore {
    inner: Mutex<StoreInner>,
}

impl EventContextStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocate a fresh context; ids are strictly increasing
    pub fn create(&self, trigger_id: &str) -> EventContext {
        let now = Local::now();
        let mut inner = self.inner.lock();

        let mut stamp = now.naive_local();
        if let Some(last) = inner.last_issued {
            if stamp <= last {
                stamp = last + ChronoDuration::microseconds(1);
            }
        }
        inner.last_issued = Some(stamp);

        let context = EventContext {
            id: stamp.format(EVENT_ID_FORMAT).to_string(),
            trigger_id: trigger_id.to_string(),
            created: now,
            actions: Vec::new(),
        };
        inner.events.insert(context.id.clone(), context.clone());
        context
    }

    pub fn add_action(&self, event_id: &str, action: ActionContext) -> bool {
        match self.inner.lock().events.get_mut(event_id) {
            Some(event) => {
                event.actions.push(action);
                true
            }
            None => false,
        }
    }

    /// Mutate the action context run by `worker`; false when either is gone
    pub fn update_action(
        &self,
        event_id: &str,
        worker: WorkerId,
        f: impl FnOnce(&mut ActionContext),
    ) -> bool {
        let mut inner = self.inner.lock();
        let action = inner
            .events
            .get_mut(event_id)
            .and_then(|event| event.actions.iter_mut().find(|a| a.worker == worker));
        match action {
            Some(action) => {
                f(action);
                true
            }
            None => false,
        }
    }

    pub fn get(&self, event_id: &str) -> Option<EventContext> {
        self.inner.lock().events.get(event_id).cloned()
    }

    pub fn contains(&self, event_id: &str) -> bool {
        self.inner.lock().events.contains_key(event_id)
    }

    pub fn remove(&self, event_id: &str) -> Option<EventContext> {
        self.inner.lock().events.remove(event_id)
    }

    pub fn ids(&self) -> Vec<EventId> {
        self.inner.lock().events.keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.inner.lock().events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
