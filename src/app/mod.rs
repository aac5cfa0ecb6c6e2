mod orchestrator;
mod runtime;
mod shutdown;
mod startup;
mod state;
mod types;

#[cfg(test)]
mod tests;

pub use orchestrator::WatchpostOrchestrator;
pub use types::{ComponentState, ShutdownReason};
