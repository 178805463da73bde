//! Checkpoint workflow state machine
//!
//! One parameterized flow drives every checkpoint: camera acquisition, an
//! optional liveness challenge, primary capture, an optional secondary capture
//! from the environment camera, then an optional location check against a
//! target site. Stages are selected by `CheckpointConfig` at run start.
//!
//! The run is a single async task. User input arrives as `WorkflowCommand`s on
//! an mpsc channel and every transition is published on a watch channel. The
//! open camera stream lives in a `StreamGuard`, so whichever way the run ends
//! (terminal state, cancel, or the future being dropped) the device is released.

mod handle;
mod stages;
#[cfg(test)]
mod tests;

pub use handle::{spawn_workflow, WorkflowHandle};

use crate::domain::geo::distance_meters;
use crate::domain::types::{
    CameraFacing, CheckpointConfig, CheckpointResult, Coordinate, ErrorReason, LivenessAction,
    LocationVerdict, Photo, WorkflowSnapshot, WorkflowState,
};
use crate::infra::metrics::Metrics;
use crate::io::{
    Camera, CameraError, CameraStream, Geolocator, LivenessVerdict, LivenessVerifier, LocationError,
};
use chrono::Utc;
use smallvec::SmallVec;
use stages::{await_command, capture_when_ready, until_cancelled, StreamGuard};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};

/// User input to a running workflow
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkflowCommand {
    /// Take the photo the run is waiting for
    Capture,
    /// Accept a fix outside the allowed radius
    ForceProceed,
    Cancel,
}

impl WorkflowCommand {
    pub fn as_str(&self) -> &'static str {
        match self {
            WorkflowCommand::Capture => "capture",
            WorkflowCommand::ForceProceed => "force_proceed",
            WorkflowCommand::Cancel => "cancel",
        }
    }
}

/// How a run ended when it did not fail
#[derive(Debug, Clone, PartialEq)]
pub enum RunOutcome {
    Completed(CheckpointResult),
    Cancelled,
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum CheckpointError {
    #[error(transparent)]
    Camera(#[from] CameraError),
    #[error(transparent)]
    Location(#[from] LocationError),
    #[error("liveness verification {}", .0.as_str())]
    Liveness(LivenessVerdict),
    #[error("another checkpoint run is already active")]
    AlreadyRunning,
    #[error("workflow task ended abnormally: {0}")]
    Aborted(String),
}

impl CheckpointError {
    /// Flat user-facing failure class
    pub fn reason(&self) -> ErrorReason {
        match self {
            CheckpointError::Camera(e) => match e {
                CameraError::PermissionDenied => ErrorReason::PermissionDenied,
                CameraError::DeviceBusy => ErrorReason::DeviceBusy,
                CameraError::NotFound => ErrorReason::DeviceNotFound,
                CameraError::Timeout => ErrorReason::CameraTimeout,
                CameraError::Unknown(_) => ErrorReason::Unknown,
            },
            CheckpointError::Location(e) => match e {
                LocationError::PermissionDenied => ErrorReason::PermissionDenied,
                LocationError::Timeout => ErrorReason::LocationTimeout,
                LocationError::Unavailable => ErrorReason::LocationUnavailable,
            },
            CheckpointError::Liveness(LivenessVerdict::Inconclusive) => {
                ErrorReason::LivenessInconclusive
            }
            CheckpointError::Liveness(_) => ErrorReason::LivenessFailed,
            CheckpointError::AlreadyRunning => ErrorReason::DeviceBusy,
            CheckpointError::Aborted(_) => ErrorReason::Unknown,
        }
    }
}

/// Stage timings, normally built by `Config::workflow_timings`
#[derive(Debug, Clone, PartialEq)]
pub struct WorkflowTimings {
    pub camera_acquire_timeout: Duration,
    /// Upper bound on zero-dimension video before a capture fails
    pub frame_ready_timeout: Duration,
    pub frame_poll_interval: Duration,
    /// How long the challenge prompt is shown before verification
    pub liveness_challenge: Duration,
    pub location_fix_timeout: Duration,
}

impl Default for WorkflowTimings {
    fn default() -> Self {
        Self {
            camera_acquire_timeout: Duration::from_secs(15),
            frame_ready_timeout: Duration::from_secs(5),
            frame_poll_interval: Duration::from_millis(100),
            liveness_challenge: Duration::from_secs(3),
            location_fix_timeout: Duration::from_secs(10),
        }
    }
}

/// Resets the active flag when a run finishes or is dropped.
///
/// A run dropped before it settled (its task was aborted) is published as
/// `Cancelled` so observers never keep a dead run's last state.
struct ActiveRun<'a> {
    workflow: &'a CheckpointWorkflow,
    run_id: u64,
    settled: bool,
}

impl ActiveRun<'_> {
    fn settle(&mut self) {
        self.settled = true;
    }
}

impl Drop for ActiveRun<'_> {
    fn drop(&mut self) {
        if !self.settled {
            self.workflow.metrics.record_cancelled();
            info!(run_id = %self.run_id, "workflow_discarded");
            self.workflow.publish(self.run_id, WorkflowState::Cancelled);
        }
        self.workflow.active.store(false, Ordering::Release);
    }
}

/// Drives checkpoint runs against a set of collaborators
pub struct CheckpointWorkflow {
    camera: Arc<dyn Camera>,
    geolocator: Arc<dyn Geolocator>,
    liveness: Arc<dyn LivenessVerifier>,
    timings: WorkflowTimings,
    metrics: Arc<Metrics>,
    state_tx: watch::Sender<WorkflowSnapshot>,
    next_run_id: AtomicU64,
    /// At most one run may hold the camera
    active: AtomicBool,
}

impl CheckpointWorkflow {
    pub fn new(
        camera: Arc<dyn Camera>,
        geolocator: Arc<dyn Geolocator>,
        liveness: Arc<dyn LivenessVerifier>,
        timings: WorkflowTimings,
        metrics: Arc<Metrics>,
    ) -> Self {
        let (state_tx, _) = watch::channel(WorkflowSnapshot { run_id: 0, state: WorkflowState::Idle });
        Self {
            camera,
            geolocator,
            liveness,
            timings,
            metrics,
            state_tx,
            next_run_id: AtomicU64::new(1),
            active: AtomicBool::new(false),
        }
    }

    /// Receiver for every published state, tagged with its run id
    pub fn subscribe(&self) -> watch::Receiver<WorkflowSnapshot> {
        self.state_tx.subscribe()
    }

    pub fn current(&self) -> WorkflowSnapshot {
        self.state_tx.borrow().clone()
    }

    pub fn timings(&self) -> &WorkflowTimings {
        &self.timings
    }

    pub(crate) fn allocate_run_id(&self) -> u64 {
        self.next_run_id.fetch_add(1, Ordering::Relaxed)
    }

    /// Run one checkpoint to a terminal state.
    ///
    /// `Ok(Completed)` and `Ok(Cancelled)` publish `Success` / `Cancelled`;
    /// every `Err` except `AlreadyRunning` publishes `Error { reason }`. A
    /// failed run is never retried automatically; the caller starts a new run.
    pub async fn run(
        &self,
        config: &CheckpointConfig,
        commands: &mut mpsc::Receiver<WorkflowCommand>,
    ) -> Result<RunOutcome, CheckpointError> {
        let run_id = self.allocate_run_id();
        self.run_as(run_id, config, commands).await
    }

    pub(crate) async fn run_as(
        &self,
        run_id: u64,
        config: &CheckpointConfig,
        commands: &mut mpsc::Receiver<WorkflowCommand>,
    ) -> Result<RunOutcome, CheckpointError> {
        if self.active.swap(true, Ordering::AcqRel) {
            warn!(run_id = %run_id, "workflow_rejected_already_running");
            return Err(CheckpointError::AlreadyRunning);
        }
        let mut active = ActiveRun { workflow: self, run_id, settled: false };

        let started = Instant::now();
        self.metrics.record_run_started();
        info!(
            run_id = %run_id,
            facing = %config.camera_facing.as_str(),
            liveness = %config.requires_liveness,
            secondary = %config.secondary_capture,
            location_check = %config.requires_location_check,
            "workflow_started"
        );
        self.publish(run_id, WorkflowState::Idle);

        let mut camera = StreamGuard::new(run_id);
        let outcome = self.drive(run_id, config, commands, &mut camera).await;
        // Device lock is gone before anyone sees a terminal state
        camera.release();
        active.settle();
        let duration_ms = started.elapsed().as_millis() as u64;

        match outcome {
            Ok(Some(result)) => {
                self.metrics.record_success(duration_ms, result.forced_override);
                info!(
                    run_id = %run_id,
                    photos = %result.photos.len(),
                    verdict = ?result.location_verdict,
                    distance_m = ?result.distance_m,
                    forced_override = %result.forced_override,
                    duration_ms = %duration_ms,
                    "workflow_succeeded"
                );
                self.publish(run_id, WorkflowState::Success);
                Ok(RunOutcome::Completed(result))
            }
            Ok(None) => {
                self.metrics.record_cancelled();
                info!(run_id = %run_id, duration_ms = %duration_ms, "workflow_cancelled");
                self.publish(run_id, WorkflowState::Cancelled);
                Ok(RunOutcome::Cancelled)
            }
            Err(e) => {
                let reason = e.reason();
                self.metrics.record_failure(reason, duration_ms);
                warn!(
                    run_id = %run_id,
                    reason = %reason.as_str(),
                    error = %e,
                    duration_ms = %duration_ms,
                    "workflow_failed"
                );
                self.publish(run_id, WorkflowState::Error { reason });
                Err(e)
            }
        }
    }

    /// Stages of one run. `Ok(None)` means cancelled.
    async fn drive(
        &self,
        run_id: u64,
        config: &CheckpointConfig,
        commands: &mut mpsc::Receiver<WorkflowCommand>,
        camera: &mut StreamGuard,
    ) -> Result<Option<CheckpointResult>, CheckpointError> {
        let mut photos: SmallVec<[Photo; 2]> = SmallVec::new();
        let facing = config.camera_facing;

        self.publish(run_id, WorkflowState::AcquiringCamera { facing });
        let Some(stream) = until_cancelled(commands, self.acquire(facing)).await else {
            return Ok(None);
        };
        camera.hold(stream?);

        let frame = if config.requires_liveness {
            let action = LivenessAction::pick();
            info!(run_id = %run_id, prompt = %action.prompt(), "liveness_challenge");
            self.publish(run_id, WorkflowState::LivenessChallenge { action });
            if until_cancelled(commands, tokio::time::sleep(self.timings.liveness_challenge))
                .await
                .is_none()
            {
                return Ok(None);
            }

            self.publish(run_id, WorkflowState::LivenessVerifying);
            let stream = camera.stream_mut()?;
            let Some(verdict) =
                until_cancelled(commands, self.liveness.verify(stream.as_mut(), action)).await
            else {
                return Ok(None);
            };
            debug!(run_id = %run_id, verdict = %verdict.as_str(), "liveness_verdict");
            if verdict != LivenessVerdict::Pass {
                return Err(CheckpointError::Liveness(verdict));
            }
            until_cancelled(commands, capture_when_ready(stream.as_mut(), &self.timings)).await
        } else {
            self.publish(run_id, WorkflowState::CameraReady);
            if !await_command(commands, WorkflowCommand::Capture, "camera_ready").await {
                return Ok(None);
            }
            let stream = camera.stream_mut()?;
            until_cancelled(commands, capture_when_ready(stream.as_mut(), &self.timings)).await
        };
        let Some(frame) = frame else {
            return Ok(None);
        };
        photos.push(Photo::new(facing, frame?));
        self.publish(run_id, WorkflowState::PrimaryCaptured);

        if config.secondary_capture {
            self.publish(run_id, WorkflowState::SwitchingCamera);
            // Strictly sequential: the first stream is stopped before the second is requested
            camera.release();
            let Some(stream) =
                until_cancelled(commands, self.acquire(CameraFacing::Environment)).await
            else {
                return Ok(None);
            };
            camera.hold(stream?);

            self.publish(run_id, WorkflowState::SecondaryCapturing);
            if !await_command(commands, WorkflowCommand::Capture, "secondary_capturing").await {
                return Ok(None);
            }
            let stream = camera.stream_mut()?;
            let Some(frame) =
                until_cancelled(commands, capture_when_ready(stream.as_mut(), &self.timings)).await
            else {
                return Ok(None);
            };
            photos.push(Photo::new(CameraFacing::Environment, frame?));
            self.publish(run_id, WorkflowState::SecondaryCaptured);
        }

        camera.release();

        if !config.requires_location_check {
            return Ok(Some(Self::result(photos, None, None, LocationVerdict::NotChecked)));
        }

        self.publish(run_id, WorkflowState::LocationChecking);
        let Some(fix) = until_cancelled(commands, self.fix()).await else {
            return Ok(None);
        };
        let fix = fix?;

        let Some(target) = config.radius_target() else {
            debug!(run_id = %run_id, fix = %fix, "location_unconstrained");
            return Ok(Some(Self::result(photos, Some(fix), None, LocationVerdict::Unconstrained)));
        };

        let distance = distance_meters(fix, target);
        let distance_m = distance.round();
        if distance <= config.allowed_radius_m {
            debug!(run_id = %run_id, distance_m = %distance_m, "location_within_radius");
            return Ok(Some(Self::result(
                photos,
                Some(fix),
                Some(distance_m),
                LocationVerdict::WithinRadius,
            )));
        }

        warn!(
            run_id = %run_id,
            distance_m = %distance_m,
            allowed_radius_m = %config.allowed_radius_m,
            "location_mismatch"
        );
        self.metrics.record_location_mismatch();
        self.publish(run_id, WorkflowState::LocationMismatchWarning { distance_m });
        if !await_command(commands, WorkflowCommand::ForceProceed, "location_mismatch_warning").await
        {
            return Ok(None);
        }
        info!(run_id = %run_id, distance_m = %distance_m, "location_force_proceed");
        Ok(Some(Self::result(photos, Some(fix), Some(distance_m), LocationVerdict::Overridden)))
    }

    async fn acquire(&self, facing: CameraFacing) -> Result<Box<dyn CameraStream>, CameraError> {
        match tokio::time::timeout(self.timings.camera_acquire_timeout, self.camera.acquire(facing))
            .await
        {
            Ok(result) => result,
            Err(_) => Err(CameraError::Timeout),
        }
    }

    async fn fix(&self) -> Result<Coordinate, LocationError> {
        let timeout = self.timings.location_fix_timeout;
        match tokio::time::timeout(timeout, self.geolocator.get_fix(timeout)).await {
            Ok(result) => result,
            Err(_) => Err(LocationError::Timeout),
        }
    }

    fn result(
        photos: SmallVec<[Photo; 2]>,
        coordinate: Option<Coordinate>,
        distance_m: Option<f64>,
        location_verdict: LocationVerdict,
    ) -> CheckpointResult {
        let forced_override = location_verdict == LocationVerdict::Overridden;
        CheckpointResult {
            photos,
            coordinate,
            distance_m,
            within_radius: !forced_override,
            location_verdict,
            forced_override,
            captured_at: Utc::now(),
        }
    }

    fn publish(&self, run_id: u64, state: WorkflowState) {
        debug!(run_id = %run_id, state = %state.as_str(), "workflow_state");
        self.state_tx.send_replace(WorkflowSnapshot { run_id, state });
    }
}
