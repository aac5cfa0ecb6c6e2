//! Event bookkeeping and dispatch.
//!
//! A fired trigger becomes an [`EventContext`]; the [`EventDispatcher`] fans
//! its actions out onto workers tracked by the [`WorkerSet`], and the
//! [`TriggerLifecycle`] keeps trigger bindings in step with configuration.

mod context;
mod dispatcher;
mod journal;
mod lifecycle;
mod store;
mod workers;

pub use context::{ActionContext, EventContext, EventContextStore, EventId, VideoRecord};
pub use dispatcher::{EventDispatcher, FiredTrigger};
pub use journal::EventJournal;
pub use lifecycle::{ArmReport, TriggerLifecycle};
pub use store::{ActionRecord, DailyCount, EventRecord, EventStore, NewAction};
pub use workers::{WorkerGuard, WorkerId, WorkerInfo, WorkerSet};
