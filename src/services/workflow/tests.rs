//! Tests for the checkpoint workflow

use super::*;
use crate::domain::geo::EARTH_RADIUS_M;
use crate::io::{CameraError, SimulatedCamera, SimulatedGeolocator, TimedLivenessVerifier};

const TARGET: Coordinate = Coordinate::new(10.0, 10.0);

/// Test harness keeping typed handles to the simulated collaborators
struct Harness {
    workflow: Arc<CheckpointWorkflow>,
    camera: Arc<SimulatedCamera>,
    geolocator: Arc<SimulatedGeolocator>,
    metrics: Arc<Metrics>,
}

impl std::ops::Deref for Harness {
    type Target = Arc<CheckpointWorkflow>;
    fn deref(&self) -> &Self::Target {
        &self.workflow
    }
}

impl Harness {
    fn spawn(&self, config: CheckpointConfig) -> WorkflowHandle {
        spawn_workflow(self.workflow.clone(), config)
    }

    fn assert_camera_balanced(&self) {
        let counters = self.camera.counters();
        assert_eq!(counters.acquired(), counters.released());
        assert_eq!(counters.open_streams(), 0);
    }
}

fn create_harness(camera: SimulatedCamera, geolocator: SimulatedGeolocator) -> Harness {
    create_harness_with_verdict(camera, geolocator, LivenessVerdict::Pass)
}

fn create_harness_with_verdict(
    camera: SimulatedCamera,
    geolocator: SimulatedGeolocator,
    verdict: LivenessVerdict,
) -> Harness {
    let camera = Arc::new(camera);
    let geolocator = Arc::new(geolocator);
    let liveness =
        Arc::new(TimedLivenessVerifier::new(Duration::from_millis(1500)).with_verdict(verdict));
    let metrics = Arc::new(Metrics::new());
    let workflow = Arc::new(CheckpointWorkflow::new(
        camera.clone(),
        geolocator.clone(),
        liveness,
        WorkflowTimings::default(),
        metrics.clone(),
    ));
    Harness { workflow, camera, geolocator, metrics }
}

fn default_harness() -> Harness {
    create_harness(SimulatedCamera::new(), SimulatedGeolocator::new(TARGET))
}

/// A point `meters` due north of `TARGET`
fn north_of_target(meters: f64) -> Coordinate {
    Coordinate::new(TARGET.lat + (meters / EARTH_RADIUS_M).to_degrees(), TARGET.lng)
}

fn is_camera_ready(state: &WorkflowState) -> bool {
    matches!(state, WorkflowState::CameraReady)
}

fn is_secondary_capturing(state: &WorkflowState) -> bool {
    matches!(state, WorkflowState::SecondaryCapturing)
}

fn is_mismatch(state: &WorkflowState) -> bool {
    matches!(state, WorkflowState::LocationMismatchWarning { .. })
}

fn completed(outcome: Result<RunOutcome, CheckpointError>) -> CheckpointResult {
    match outcome {
        Ok(RunOutcome::Completed(result)) => result,
        other => panic!("expected a completed run, got {:?}", other),
    }
}

// ============================================================================
// Happy paths
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_liveness_punch_within_radius() {
    let h = create_harness(
        SimulatedCamera::new(),
        SimulatedGeolocator::new(Coordinate::new(10.0001, 10.0001)),
    );
    let config = CheckpointConfig::new(CameraFacing::User)
        .with_liveness()
        .with_location_check(Some(TARGET), 200.0);

    let result = completed(h.spawn(config).join().await);

    assert_eq!(result.photos.len(), 1);
    assert_eq!(result.photos[0].facing, CameraFacing::User);
    assert_eq!(result.location_verdict, LocationVerdict::WithinRadius);
    assert!(result.within_radius);
    assert!(!result.forced_override);
    let distance = result.distance_m.unwrap();
    assert!((distance - 15.6).abs() < 1.0, "distance {distance}");
    assert_eq!(result.coordinate, Some(Coordinate::new(10.0001, 10.0001)));
    assert_eq!(h.current().state, WorkflowState::Success);
    h.assert_camera_balanced();
    assert_eq!(h.metrics.runs_succeeded(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_liveness_stage_takes_challenge_then_verify() {
    let h = default_harness();
    let config = CheckpointConfig::new(CameraFacing::User).with_liveness();

    let started = tokio::time::Instant::now();
    let mut handle = h.spawn(config);
    let state = handle
        .wait_for(|s| matches!(s, WorkflowState::LivenessChallenge { .. }))
        .await;
    assert!(matches!(state, Some(WorkflowState::LivenessChallenge { .. })));

    let result = completed(handle.join().await);
    assert!(started.elapsed() >= Duration::from_millis(4500));
    assert_eq!(result.location_verdict, LocationVerdict::NotChecked);
    assert!(result.coordinate.is_none());
    assert_eq!(h.geolocator.requests(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_unset_target_never_warns() {
    let h = create_harness(
        SimulatedCamera::new(),
        SimulatedGeolocator::new(Coordinate::new(48.8566, 2.3522)),
    );
    let config = CheckpointConfig::new(CameraFacing::User)
        .with_liveness()
        .with_location_check(Some(Coordinate::UNSET), 200.0);

    let result = completed(h.spawn(config).join().await);

    assert_eq!(result.location_verdict, LocationVerdict::Unconstrained);
    assert!(result.within_radius);
    assert_eq!(result.distance_m, None);
    assert_eq!(result.coordinate, Some(Coordinate::new(48.8566, 2.3522)));
    assert_eq!(h.metrics.location_mismatches(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_missing_target_records_fix_only() {
    let h = create_harness(SimulatedCamera::new(), SimulatedGeolocator::new(north_of_target(5000.0)));
    let config = CheckpointConfig::new(CameraFacing::User)
        .with_liveness()
        .with_location_check(None, 200.0);

    let result = completed(h.spawn(config).join().await);
    assert_eq!(result.location_verdict, LocationVerdict::Unconstrained);
    assert_eq!(h.metrics.location_mismatches(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_secondary_capture_uses_environment_camera() {
    let h = default_harness();
    let config = CheckpointConfig::new(CameraFacing::User).with_secondary_capture();

    let mut handle = h.spawn(config);
    assert!(handle.wait_for(is_camera_ready).await.is_some());
    assert!(handle.capture().await);
    assert!(handle.wait_for(is_secondary_capturing).await.is_some());
    // Only the environment stream is open at this point
    assert_eq!(h.camera.counters().open_streams(), 1);
    assert_eq!(h.camera.counters().released(), 1);
    assert!(handle.capture().await);

    let result = completed(handle.join().await);
    assert_eq!(result.photos.len(), 2);
    assert_eq!(result.primary_photo().map(|p| p.facing), Some(CameraFacing::User));
    assert_eq!(result.secondary_photo().map(|p| p.facing), Some(CameraFacing::Environment));
    assert_eq!(h.camera.counters().acquired(), 2);
    h.assert_camera_balanced();
}

#[tokio::test(start_paused = true)]
async fn test_camera_released_before_location_stage() {
    let h = create_harness(
        SimulatedCamera::new(),
        SimulatedGeolocator::new(TARGET).with_delay(Duration::from_secs(2)),
    );
    let config = CheckpointConfig::new(CameraFacing::Environment)
        .with_location_check(Some(TARGET), 200.0);

    let mut handle = h.spawn(config);
    assert!(handle.wait_for(is_camera_ready).await.is_some());
    assert_eq!(h.camera.counters().open_streams(), 1);
    handle.capture().await;
    assert!(handle.wait_for(|s| matches!(s, WorkflowState::LocationChecking)).await.is_some());
    assert_eq!(h.camera.counters().open_streams(), 0);

    let result = completed(handle.join().await);
    assert_eq!(result.distance_m, Some(0.0));
    assert_eq!(result.photos[0].facing, CameraFacing::Environment);
}

#[tokio::test(start_paused = true)]
async fn test_frames_not_ready_are_polled() {
    let h = create_harness(
        SimulatedCamera::new().with_not_ready_frames(5),
        SimulatedGeolocator::new(TARGET),
    );
    let config = CheckpointConfig::new(CameraFacing::User).with_liveness();

    let result = completed(h.spawn(config).join().await);
    assert_eq!(result.photos.len(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_inapplicable_command_is_ignored() {
    let h = default_harness();
    let mut handle = h.spawn(CheckpointConfig::new(CameraFacing::User));

    assert!(handle.wait_for(is_camera_ready).await.is_some());
    handle.force_proceed().await;
    assert_eq!(handle.state(), WorkflowState::CameraReady);
    handle.capture().await;

    let result = completed(handle.join().await);
    assert_eq!(result.photos.len(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_run_directly_with_command_channel() {
    let h = default_harness();
    let (_tx, mut rx) = mpsc::channel(4);
    let config = CheckpointConfig::new(CameraFacing::User).with_liveness();

    let outcome = h.run(&config, &mut rx).await;
    assert!(matches!(outcome, Ok(RunOutcome::Completed(_))));
    assert_eq!(h.current().state, WorkflowState::Success);
}

// ============================================================================
// Location mismatch
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_mismatch_then_force_proceed() {
    let h = create_harness(SimulatedCamera::new(), SimulatedGeolocator::new(north_of_target(250.0)));
    let config = CheckpointConfig::new(CameraFacing::User)
        .with_location_check(Some(TARGET), 200.0);

    let mut handle = h.spawn(config);
    handle.wait_for(is_camera_ready).await;
    handle.capture().await;

    let state = handle.wait_for(is_mismatch).await;
    assert_eq!(state, Some(WorkflowState::LocationMismatchWarning { distance_m: 250.0 }));
    // Camera is already stopped while the user decides
    assert_eq!(h.camera.counters().open_streams(), 0);

    handle.force_proceed().await;
    let result = completed(handle.join().await);
    assert!(result.forced_override);
    assert!(!result.within_radius);
    assert_eq!(result.location_verdict, LocationVerdict::Overridden);
    assert_eq!(result.distance_m, Some(250.0));
    assert_eq!(h.metrics.forced_overrides(), 1);
    assert_eq!(h.metrics.location_mismatches(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_mismatch_then_cancel() {
    let h = create_harness(SimulatedCamera::new(), SimulatedGeolocator::new(north_of_target(900.0)));
    let config = CheckpointConfig::new(CameraFacing::User)
        .with_liveness()
        .with_location_check(Some(TARGET), 200.0);

    let mut handle = h.spawn(config);
    assert!(handle.wait_for(is_mismatch).await.is_some());

    assert_eq!(handle.cancel().await, Ok(RunOutcome::Cancelled));
    assert_eq!(h.current().state, WorkflowState::Cancelled);
    assert_eq!(h.metrics.runs_cancelled(), 1);
    h.assert_camera_balanced();
}

#[tokio::test(start_paused = true)]
async fn test_just_inside_radius_is_within() {
    let h = create_harness(SimulatedCamera::new(), SimulatedGeolocator::new(north_of_target(199.5)));
    let config = CheckpointConfig::new(CameraFacing::User)
        .with_liveness()
        .with_location_check(Some(TARGET), 200.0);

    let result = completed(h.spawn(config).join().await);
    assert_eq!(result.location_verdict, LocationVerdict::WithinRadius);
    assert_eq!(h.metrics.location_mismatches(), 0);
}

// ============================================================================
// Cancellation and teardown
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_cancel_while_acquiring() {
    let h = create_harness(
        SimulatedCamera::new().with_acquire_delay(Duration::from_secs(5)),
        SimulatedGeolocator::new(TARGET),
    );
    let mut handle = h.spawn(CheckpointConfig::new(CameraFacing::User).with_liveness());

    assert!(handle
        .wait_for(|s| matches!(s, WorkflowState::AcquiringCamera { facing: CameraFacing::User }))
        .await
        .is_some());
    assert_eq!(handle.cancel().await, Ok(RunOutcome::Cancelled));

    // The pending acquisition never produced a stream
    tokio::time::sleep(Duration::from_secs(10)).await;
    assert_eq!(h.camera.counters().acquired(), 0);
    h.assert_camera_balanced();
    assert_eq!(h.current().state, WorkflowState::Cancelled);
}

#[tokio::test(start_paused = true)]
async fn test_cancel_during_liveness_challenge() {
    let h = default_harness();
    let mut handle = h.spawn(CheckpointConfig::new(CameraFacing::User).with_liveness());

    assert!(handle
        .wait_for(|s| matches!(s, WorkflowState::LivenessChallenge { .. }))
        .await
        .is_some());
    assert_eq!(handle.cancel().await, Ok(RunOutcome::Cancelled));
    assert_eq!(h.camera.counters().acquired(), 1);
    h.assert_camera_balanced();
}

#[tokio::test(start_paused = true)]
async fn test_cancel_during_secondary_capture() {
    let h = default_harness();
    let mut handle = h.spawn(CheckpointConfig::new(CameraFacing::User).with_secondary_capture());

    handle.wait_for(is_camera_ready).await;
    handle.capture().await;
    assert!(handle.wait_for(is_secondary_capturing).await.is_some());
    assert_eq!(h.camera.counters().open_streams(), 1);

    assert_eq!(handle.cancel().await, Ok(RunOutcome::Cancelled));
    assert_eq!(h.camera.counters().acquired(), 2);
    h.assert_camera_balanced();
}

#[tokio::test(start_paused = true)]
async fn test_dropping_handle_releases_camera() {
    let h = default_harness();
    let mut handle = h.spawn(CheckpointConfig::new(CameraFacing::User));

    handle.wait_for(is_camera_ready).await;
    assert_eq!(h.camera.counters().open_streams(), 1);
    drop(handle);

    tokio::time::sleep(Duration::from_millis(10)).await;
    h.assert_camera_balanced();

    // Observers see the discarded run end
    assert_eq!(h.current().state, WorkflowState::Cancelled);
    assert_eq!(h.metrics.runs_started(), 1);
    assert_eq!(h.metrics.runs_cancelled(), 1);

    // And the camera is free for the next run
    let mut next = h.spawn(CheckpointConfig::new(CameraFacing::User));
    assert!(next.wait_for(is_camera_ready).await.is_some());
    assert_eq!(next.cancel().await, Ok(RunOutcome::Cancelled));
}

#[tokio::test(start_paused = true)]
async fn test_closed_command_channel_cancels() {
    let h = default_harness();
    let (tx, mut rx) = mpsc::channel(1);
    drop(tx);

    let outcome = h.run(&CheckpointConfig::new(CameraFacing::User), &mut rx).await;
    assert_eq!(outcome, Ok(RunOutcome::Cancelled));
    assert_eq!(h.camera.counters().attempts(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_second_concurrent_run_rejected() {
    let h = default_harness();
    let mut first = h.spawn(CheckpointConfig::new(CameraFacing::User));
    first.wait_for(is_camera_ready).await;

    let second = h.spawn(CheckpointConfig::new(CameraFacing::User).with_liveness());
    assert_ne!(second.run_id(), first.run_id());
    assert_eq!(second.join().await, Err(CheckpointError::AlreadyRunning));

    // The active run is untouched
    assert_eq!(first.state(), WorkflowState::CameraReady);
    assert_eq!(h.camera.counters().attempts(), 1);
    assert_eq!(first.cancel().await, Ok(RunOutcome::Cancelled));
}

#[tokio::test(start_paused = true)]
async fn test_rejected_run_waiters_return() {
    let h = default_harness();
    let mut first = h.spawn(CheckpointConfig::new(CameraFacing::User));
    first.wait_for(is_camera_ready).await;

    let mut second = h.spawn(CheckpointConfig::new(CameraFacing::User));
    let waited = tokio::time::timeout(Duration::from_secs(5), second.wait_for(|_| true)).await;
    assert_eq!(waited, Ok(None));
    let changed = tokio::time::timeout(Duration::from_secs(5), second.changed()).await;
    assert_eq!(changed, Ok(None));
    assert_eq!(second.join().await, Err(CheckpointError::AlreadyRunning));

    assert_eq!(first.state(), WorkflowState::CameraReady);
    assert_eq!(h.metrics.runs_started(), 1);
    assert_eq!(first.cancel().await, Ok(RunOutcome::Cancelled));
}

#[tokio::test(start_paused = true)]
async fn test_changed_delivers_terminal_state_then_ends() {
    let h = default_harness();
    let mut handle = h.spawn(CheckpointConfig::new(CameraFacing::User));
    handle.wait_for(is_camera_ready).await;
    handle.capture().await;

    let mut last = None;
    while let Some(state) = handle.changed().await {
        last = Some(state);
    }
    assert_eq!(last, Some(WorkflowState::Success));
    assert!(matches!(handle.join().await, Ok(RunOutcome::Completed(_))));
}

// ============================================================================
// Failures
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_permission_denied_is_not_retried() {
    let h = default_harness();
    h.camera.fail_next(CameraError::PermissionDenied);
    let config = CheckpointConfig::new(CameraFacing::User).with_liveness();

    let outcome = h.spawn(config.clone()).join().await;
    assert_eq!(outcome, Err(CheckpointError::Camera(CameraError::PermissionDenied)));
    assert_eq!(
        h.current().state,
        WorkflowState::Error { reason: ErrorReason::PermissionDenied }
    );

    tokio::time::sleep(Duration::from_secs(60)).await;
    assert_eq!(h.camera.counters().attempts(), 1);

    // Explicit retry is a fresh run
    let retry = completed(h.spawn(config).join().await);
    assert_eq!(retry.photos.len(), 1);
    assert_eq!(h.camera.counters().attempts(), 2);
    assert_eq!(h.metrics.runs_failed(), 1);
    assert_eq!(h.metrics.runs_succeeded(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_device_busy_reason() {
    let h = create_harness(
        SimulatedCamera::new().with_failure(CameraError::DeviceBusy),
        SimulatedGeolocator::new(TARGET),
    );
    let err = h.spawn(CheckpointConfig::new(CameraFacing::User)).join().await.unwrap_err();
    assert_eq!(err.reason(), ErrorReason::DeviceBusy);
}

#[tokio::test(start_paused = true)]
async fn test_acquire_timeout() {
    let h = create_harness(
        SimulatedCamera::new().with_acquire_delay(Duration::from_secs(20)),
        SimulatedGeolocator::new(TARGET),
    );
    let err = h.spawn(CheckpointConfig::new(CameraFacing::User)).join().await.unwrap_err();
    assert_eq!(err, CheckpointError::Camera(CameraError::Timeout));
    assert_eq!(err.reason(), ErrorReason::CameraTimeout);
    h.assert_camera_balanced();
}

#[tokio::test(start_paused = true)]
async fn test_frame_never_ready_times_out() {
    let h = create_harness(
        SimulatedCamera::new().with_not_ready_frames(u32::MAX),
        SimulatedGeolocator::new(TARGET),
    );
    let err = h
        .spawn(CheckpointConfig::new(CameraFacing::User).with_liveness())
        .join()
        .await
        .unwrap_err();
    assert_eq!(err.reason(), ErrorReason::CameraTimeout);
    assert_eq!(h.camera.counters().acquired(), 1);
    h.assert_camera_balanced();
}

#[tokio::test(start_paused = true)]
async fn test_secondary_camera_missing() {
    let h = create_harness(
        SimulatedCamera::new().with_facing_failure(CameraFacing::Environment, CameraError::NotFound),
        SimulatedGeolocator::new(TARGET),
    );
    let mut handle = h.spawn(CheckpointConfig::new(CameraFacing::User).with_secondary_capture());
    handle.wait_for(is_camera_ready).await;
    handle.capture().await;

    let err = handle.join().await.unwrap_err();
    assert_eq!(err.reason(), ErrorReason::DeviceNotFound);
    assert_eq!(h.current().state, WorkflowState::Error { reason: ErrorReason::DeviceNotFound });
    h.assert_camera_balanced();
}

#[tokio::test(start_paused = true)]
async fn test_location_timeout() {
    let h = create_harness(
        SimulatedCamera::new(),
        SimulatedGeolocator::new(TARGET).with_delay(Duration::from_secs(30)),
    );
    let config = CheckpointConfig::new(CameraFacing::User)
        .with_liveness()
        .with_location_check(Some(TARGET), 200.0);

    let err = h.spawn(config).join().await.unwrap_err();
    assert_eq!(err.reason(), ErrorReason::LocationTimeout);
    h.assert_camera_balanced();
}

#[tokio::test(start_paused = true)]
async fn test_location_permission_denied() {
    let h = create_harness(
        SimulatedCamera::new(),
        SimulatedGeolocator::new(TARGET).with_failure(LocationError::PermissionDenied),
    );
    let config = CheckpointConfig::new(CameraFacing::User)
        .with_liveness()
        .with_location_check(Some(TARGET), 200.0);

    let err = h.spawn(config).join().await.unwrap_err();
    assert_eq!(err.reason(), ErrorReason::PermissionDenied);
    assert_eq!(h.metrics.summary().location_failures, 1);
}

#[tokio::test(start_paused = true)]
async fn test_liveness_fail_and_inconclusive() {
    for (verdict, reason) in [
        (LivenessVerdict::Fail, ErrorReason::LivenessFailed),
        (LivenessVerdict::Inconclusive, ErrorReason::LivenessInconclusive),
    ] {
        let h = create_harness_with_verdict(
            SimulatedCamera::new(),
            SimulatedGeolocator::new(TARGET),
            verdict,
        );
        let err = h
            .spawn(CheckpointConfig::new(CameraFacing::User).with_liveness())
            .join()
            .await
            .unwrap_err();
        assert_eq!(err, CheckpointError::Liveness(verdict));
        assert_eq!(err.reason(), reason);
        h.assert_camera_balanced();
    }
}

#[test]
fn test_error_reason_mapping() {
    assert_eq!(
        CheckpointError::Location(LocationError::Unavailable).reason(),
        ErrorReason::LocationUnavailable
    );
    assert_eq!(CheckpointError::Camera(CameraError::NotFound).reason(), ErrorReason::DeviceNotFound);
    assert_eq!(
        CheckpointError::Camera(CameraError::Unknown("x".to_string())).reason(),
        ErrorReason::Unknown
    );
    assert_eq!(CheckpointError::AlreadyRunning.reason(), ErrorReason::DeviceBusy);
}
