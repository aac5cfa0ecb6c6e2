use super::{ActionOutcome, ActionRequest};
use crate::engine::{Engine, OpenVideo};
use crate::error::{DeviceError, Result};
use crate::events::{NewAction, VideoRecord, WorkerGuard};
use crate::model::SourceKind;
use chrono::Local;
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info, warn};

pub(super) async fn run(engine: &Arc<Engine>, request: &ActionRequest) -> Result<ActionOutcome> {
    let action = &request.action;
    engine.ensure_live_preview().await?;

    match action.method.as_str() {
        "take_photo" => take_photos(engine, request, false).await,
        "take_raw_photo" => take_photos(engine, request, true).await,
        "start_video" => start_video(engine, request).await,
        "stop_video" => stop_video(engine, request).await,
        "record_video" => record_video(engine, request).await,
        other => Err(DeviceError::UnknownTarget {
            device: engine.camera_id().to_string(),
            target: other.to_string(),
        }
        .into()),
    }
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default()
}

fn busy(engine: &Engine, request: &ActionRequest) -> ActionOutcome {
    info!(
        "Camera {} busy, action {} not run",
        engine.camera_id(),
        request.action.id
    );
    ActionOutcome::failed(format!("{} is busy", engine.camera_id()))
}

/// Announce a camera event unless the running event was itself camera-triggered
fn announce(engine: &Engine, request: &ActionRequest, event: &str) {
    if request.trigger.as_ref().map(|t| t.source) == Some(SourceKind::Camera) {
        debug!("Not re-announcing {} from a camera-triggered event", event);
        return;
    }
    if let Err(e) = engine.stimulate(SourceKind::Camera, engine.camera_id(), event) {
        warn!("Failed to announce {}: {}", event, e);
    }
}

async fn take_photos(
    engine: &Arc<Engine>,
    request: &ActionRequest,
    raw: bool,
) -> Result<ActionOutcome> {
    let action = &request.action;
    let timeout = engine.config().devices.busy_wait_timeout();
    let Some((lease, _)) = engine
        .registry()
        .lease(SourceKind::Camera, engine.camera_id(), request.wait, timeout)
        .await?
    else {
        return Ok(busy(engine, request));
    };

    let count = action.burst_count();
    let interval = action.burst_interval();
    let stem = request.file_stem();
    let action_type = if raw { "RawPhoto" } else { "Photo" };

    for shot in 1..=count {
        let name = format!("{}_{}", stem, shot);
        let taken_at = Local::now();
        let path = if raw {
            engine.camera().take_raw_photo(&name).await?
        } else {
            engine.camera().take_photo(&name).await?
        };

        if let Some((event_id, worker)) = request.context_key() {
            engine
                .contexts()
                .update_action(event_id, worker, |ctx| ctx.photos.push(path.clone()));
        }
        if let Some(event_id) = request.logged_event() {
            engine.store().insert_action(&NewAction {
                event: event_id,
                at: taken_at,
                action_type,
                duration: None,
                filename: &file_name(&path),
                fullpath: &path.to_string_lossy(),
            })?;
        }
        debug!("Shot {}/{} written to {}", shot, count, path.display());

        if shot < count && !interval.is_zero() {
            tokio::time::sleep(interval).await;
        }
    }
    drop(lease);

    announce(engine, request, "photo_taken");
    Ok(ActionOutcome::ok(format!("{} photo(s) taken", count)))
}

/// Start a recording and register it as the open video
async fn begin_recording(engine: &Arc<Engine>, request: &ActionRequest) -> Result<ActionOutcome> {
    let started = Local::now();
    let path = engine.camera().start_video(&request.file_stem()).await?;

    let row_id = match request.logged_event() {
        Some(event_id) => Some(engine.store().insert_action(&NewAction {
            event: event_id,
            at: started,
            action_type: "Video",
            duration: None,
            filename: &file_name(&path),
            fullpath: &path.to_string_lossy(),
        })?),
        None => None,
    };

    if let Some((event_id, worker)) = request.context_key() {
        let record = VideoRecord {
            path: path.clone(),
            started,
            stopped: None,
        };
        engine
            .contexts()
            .update_action(event_id, worker, |ctx| ctx.video = Some(record));
    }

    engine.set_open_video(OpenVideo {
        path: path.clone(),
        started,
        event_id: request.event_id.clone(),
        worker: request.worker,
        row_id,
    });
    engine
        .journal()
        .record("Video", &format!("recording to {}", path.display()));

    announce(engine, request, "video_started");
    Ok(ActionOutcome::ok(format!("recording to {}", path.display())))
}

async fn start_video(engine: &Arc<Engine>, request: &ActionRequest) -> Result<ActionOutcome> {
    let timeout = engine.config().devices.busy_wait_timeout();
    let Some((_lease, _)) = engine
        .registry()
        .lease(SourceKind::Camera, engine.camera_id(), request.wait, timeout)
        .await?
    else {
        return Ok(busy(engine, request));
    };
    begin_recording(engine, request).await
}

async fn stop_video(engine: &Arc<Engine>, request: &ActionRequest) -> Result<ActionOutcome> {
    let timeout = engine.config().devices.busy_wait_timeout();
    let Some((_lease, _)) = engine
        .registry()
        .lease(SourceKind::Camera, engine.camera_id(), request.wait, timeout)
        .await?
    else {
        return Ok(busy(engine, request));
    };

    Ok(match engine.stop_video().await? {
        Some(path) => ActionOutcome::ok(format!("recording {} stopped", path.display())),
        None => ActionOutcome::ok("No video recording in progress"),
    })
}

/// Start recording and leave a timer helper that stops it after the duration
async fn record_video(engine: &Arc<Engine>, request: &ActionRequest) -> Result<ActionOutcome> {
    let action = &request.action;
    let duration = action.duration().ok_or_else(|| DeviceError::InvalidParameter {
        device: engine.camera_id().to_string(),
        param: "duration".to_string(),
        details: format!("{} needs a recording duration", action.id),
    })?;

    let timeout = engine.config().devices.busy_wait_timeout();
    let outcome = {
        let Some((_lease, _)) = engine
            .registry()
            .lease(SourceKind::Camera, engine.camera_id(), request.wait, timeout)
            .await?
        else {
            return Ok(busy(engine, request));
        };
        begin_recording(engine, request).await?
    };

    // registered before this worker leaves the set so the completion barrier sees it
    let helper = engine
        .workers()
        .register(request.event_id.as_ref(), &format!("{}:timer", action.id));
    if let Some((event_id, worker)) = request.context_key() {
        engine
            .contexts()
            .update_action(event_id, worker, |ctx| ctx.helpers.push(helper));
    }

    let timer_engine = Arc::clone(engine);
    let action_id = action.id.clone();
    tokio::spawn(async move {
        let engine = timer_engine;
        let _guard = WorkerGuard::new(engine.workers(), helper);
        tokio::time::sleep(duration).await;

        let timeout = engine.config().devices.busy_wait_timeout();
        let lease = match engine
            .registry()
            .lease(SourceKind::Camera, engine.camera_id(), true, timeout)
            .await
        {
            Ok(lease) => lease,
            Err(e) => {
                warn!("Recording timer of {} could not lease the camera: {}", action_id, e);
                None
            }
        };
        if lease.is_none() {
            warn!("Recording timer of {} stopping without the busy flag", action_id);
        }

        match engine.stop_video().await {
            Ok(Some(path)) => debug!("Timer of {} stopped {}", action_id, path.display()),
            Ok(None) => debug!("Recording of {} was already stopped", action_id),
            Err(e) => engine.record_failure(
                SourceKind::Camera,
                &format!("recording timer of {}", action_id),
                &e,
            ),
        }
        drop(lease);
    });

    Ok(ActionOutcome::ok(format!(
        "{} for {:.1}s",
        outcome.message,
        duration.as_secs_f64()
    )))
}
