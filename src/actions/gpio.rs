use super::{ActionOutcome, ActionRequest};
use crate::engine::Engine;
use crate::error::{DeviceError, Result, WatchpostError};
use crate::events::NewAction;
use crate::gpio::GpioDevice;
use crate::model::{ParamMap, SourceKind};
use chrono::Local;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};

/// Conventional targets that return an output to rest, in order of preference
const REST_TARGETS: [&str; 2] = ["off", "stop"];

pub(super) async fn run(engine: &Arc<Engine>, request: &ActionRequest) -> Result<ActionOutcome> {
    let action = &request.action;
    let registry = engine.registry();
    let timeout = engine.config().devices.busy_wait_timeout();

    let Some((lease, handle)) = registry
        .lease(SourceKind::GeneralIo, &action.device, request.wait, timeout)
        .await?
    else {
        info!("Device {} busy, action {} not run", action.device, action.id);
        return Ok(ActionOutcome::failed(format!("{} is busy", action.device)));
    };

    let device = handle.as_gpio().cloned().ok_or_else(|| DeviceError::Operation {
        device: action.device.clone(),
        operation: action.method.clone(),
        details: "not a GPIO device".to_string(),
    })?;

    let started_at = Local::now();
    let started = Instant::now();

    // operations such as blink or step sleep between pin writes
    invoke_blocking(engine, &device, &action.method, &action.params).await?;
    debug!("{}.{} invoked", action.device, action.method);

    if let Some(duration) = action.duration() {
        tokio::time::sleep(duration).await;
        match REST_TARGETS.iter().find(|t| device.has_operation(t)) {
            Some(rest) => invoke_blocking(engine, &device, rest, &ParamMap::new()).await?,
            None => debug!("{} has no rest target after {:?}", action.device, duration),
        }
    }

    registry.persist_state(&device)?;
    drop(lease);

    let elapsed = started.elapsed().as_secs_f64();
    if let Some(event_id) = request.logged_event() {
        engine.store().insert_action(&NewAction {
            event: event_id,
            at: started_at,
            action_type: SourceKind::GeneralIo.as_str(),
            duration: Some(elapsed),
            filename: &action.method,
            fullpath: &action.device,
        })?;
    }

    Ok(ActionOutcome::ok(format!(
        "{}.{} completed in {:.2}s",
        action.device, action.method, elapsed
    )))
}

/// Invoke a target off the async workers, persisting device state if it fails
async fn invoke_blocking(
    engine: &Engine,
    device: &Arc<GpioDevice>,
    target: &str,
    params: &ParamMap,
) -> Result<()> {
    let invoked = {
        let device = Arc::clone(device);
        let target = target.to_string();
        let params = params.clone();
        tokio::task::spawn_blocking(move || device.invoke(&target, &params))
            .await
            .map_err(|e| WatchpostError::component("gpio", e.to_string()))?
    };
    if let Err(e) = invoked {
        if let Err(persist) = engine.registry().persist_state(device) {
            warn!("Failed to persist state of {}: {}", device.id(), persist);
        }
        return Err(e.into());
    }
    Ok(())
}
