use super::*;
use crate::gpio::PinBackend;
use crate::model::SourceKind;
use crate::test_support::{action, device, harness, Harness};
use std::sync::Arc;
use std::time::Duration;

fn orchestrator(harness: &Harness) -> WatchpostOrchestrator {
    WatchpostOrchestrator::with_engine(Arc::clone(&harness.engine))
}

#[tokio::test]
async fn test_component_state_management() {
    let harness = harness(|_| {});
    let orchestrator = orchestrator(&harness);

    // No components registered before initialize
    assert!(orchestrator.get_all_component_states().await.is_empty());

    orchestrator
        .set_component_state("dispatcher", ComponentState::Starting)
        .await;
    assert_eq!(
        orchestrator.get_component_state("dispatcher").await,
        Some(ComponentState::Starting)
    );

    orchestrator
        .set_component_state("dispatcher", ComponentState::Running)
        .await;
    assert_eq!(
        orchestrator.get_component_state("dispatcher").await,
        Some(ComponentState::Running)
    );
    assert_eq!(orchestrator.get_component_state("missing").await, None);
}

#[tokio::test]
async fn test_initialize_registers_enabled_components() {
    let harness = harness(|config| config.motion.enabled = false);
    let mut orchestrator = orchestrator(&harness);
    assert!(orchestrator.sampler().is_none());

    orchestrator.initialize().await.unwrap();
    let states = orchestrator.get_all_component_states().await;

    assert_eq!(states.len(), 3);
    for component in ["store", "lifecycle", "dispatcher"] {
        assert_eq!(states.get(component), Some(&ComponentState::Stopped));
    }
    assert!(!states.contains_key("sampler"));
    assert!(!states.contains_key("keyboard"));
}

#[tokio::test]
async fn test_start_and_shutdown() {
    let harness = harness(|_| {});
    let mut orchestrator = orchestrator(&harness);
    orchestrator.initialize().await.unwrap();
    orchestrator.start().await.unwrap();

    for component in ["store", "lifecycle", "dispatcher", "sampler"] {
        assert_eq!(
            orchestrator.get_component_state(component).await,
            Some(ComponentState::Running),
            "{}",
            component
        );
    }
    assert!(orchestrator.arm_report().is_some());
    assert!(orchestrator.sampler().map(|s| s.is_running()).unwrap_or(false));

    let exit_code = orchestrator.shutdown().await.unwrap();
    assert_eq!(exit_code, 0);
    for (component, state) in orchestrator.get_all_component_states().await {
        assert_eq!(state, ComponentState::Stopped, "{}", component);
    }

    let journal = harness.engine.journal().recent().join("\n");
    assert!(journal.contains("watchpost starting"));
    assert!(journal.contains("watchpost stopped"));
}

#[tokio::test]
async fn test_shutdown_request_ends_run() {
    let harness = harness(|config| config.motion.enabled = false);
    let mut orchestrator = orchestrator(&harness);
    orchestrator.initialize().await.unwrap();
    orchestrator.start().await.unwrap();

    let handle = orchestrator.shutdown_handle();
    handle.send(ShutdownReason::UserRequest).await.unwrap();

    let exit_code = tokio::time::timeout(Duration::from_secs(10), orchestrator.run())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(exit_code, 0);

    // the receiver is consumed by the first run
    assert!(orchestrator.run().await.is_err());
}

#[tokio::test]
async fn test_run_action_standalone() {
    let harness = harness(|config| {
        config.motion.enabled = false;
        config.device = vec![device("porch", "LED", 17)];
        config.action = vec![action("light", SourceKind::GeneralIo, "porch", "on")];
    });
    let orchestrator = orchestrator(&harness);

    let outcome = orchestrator.run_action("light").await.unwrap();
    assert!(outcome.done, "{}", outcome.message);
    assert_eq!(harness.pins.read(17).unwrap(), 1.0);

    assert!(orchestrator.run_action("nope").await.is_err());
}
