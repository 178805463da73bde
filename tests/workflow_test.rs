//! End-to-end checkpoint runs applied to a JSON store on disk

use checkpoint_flow::domain::records::{
    AttendanceStatus, ClaimReceipt, ClaimStatus, TourPhase, TourStatus,
};
use checkpoint_flow::domain::types::{
    CheckpointConfig, Coordinate, ErrorReason, LocationVerdict, WorkflowState,
};
use checkpoint_flow::infra::{Config, Metrics};
use checkpoint_flow::io::{
    CameraError, JsonFileStore, SimulatedCamera, SimulatedGeolocator, SimulatedPlaceResolver,
    TimedLivenessVerifier,
};
use checkpoint_flow::services::{
    spawn_workflow, CheckpointError, CheckpointKind, CheckpointWorkflow, FieldOps, NewSite,
    RunOutcome, TourDraft,
};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

const FIX: Coordinate = Coordinate::new(37.7751, -122.4190);
/// About 1.1 km north of `FIX`
const FAR: Coordinate = Coordinate::new(37.7851, -122.4190);

struct Rig {
    workflow: Arc<CheckpointWorkflow>,
    camera: Arc<SimulatedCamera>,
    metrics: Arc<Metrics>,
}

fn build_rig(camera: SimulatedCamera, fix: Coordinate) -> Rig {
    let config = Config::default();
    let camera = Arc::new(camera);
    let metrics = Arc::new(Metrics::new());
    let workflow = Arc::new(CheckpointWorkflow::new(
        camera.clone(),
        Arc::new(SimulatedGeolocator::new(fix)),
        Arc::new(TimedLivenessVerifier::new(Duration::from_millis(config.liveness_verify_ms()))),
        config.workflow_timings(),
        metrics.clone(),
    ));
    Rig { workflow, camera, metrics }
}

fn field_ops(dir: &Path) -> FieldOps {
    FieldOps::new(Arc::new(JsonFileStore::new(dir)), Arc::new(SimulatedPlaceResolver))
}

/// Answer every prompt the way a user tapping through would
async fn drive(
    workflow: &Arc<CheckpointWorkflow>,
    config: CheckpointConfig,
    force: bool,
) -> Result<RunOutcome, CheckpointError> {
    let mut handle = spawn_workflow(workflow.clone(), config);
    while let Some(state) = handle.changed().await {
        match state {
            WorkflowState::CameraReady | WorkflowState::SecondaryCapturing => {
                handle.capture().await;
            }
            WorkflowState::LocationMismatchWarning { .. } if force => {
                handle.force_proceed().await;
            }
            WorkflowState::LocationMismatchWarning { .. } => return handle.cancel().await,
            s if s.is_terminal() => break,
            _ => {}
        }
    }
    handle.join().await
}

fn completed(outcome: Result<RunOutcome, CheckpointError>) -> checkpoint_flow::domain::CheckpointResult {
    match outcome {
        Ok(RunOutcome::Completed(result)) => result,
        other => panic!("expected completed run, got {other:?}"),
    }
}

#[tokio::test(start_paused = true)]
async fn test_punch_in_persists_across_instances() {
    let dir = TempDir::new().unwrap();
    let rig = build_rig(SimulatedCamera::new(), FIX);
    let ops = field_ops(dir.path());

    let kind = ops.punch_kind().unwrap();
    assert_eq!(kind, CheckpointKind::PunchIn);
    let result = completed(drive(&rig.workflow, kind.config(None, 200.0), false).await);
    assert_eq!(result.location_verdict, LocationVerdict::Unconstrained);
    assert_eq!(result.coordinate, Some(FIX));

    ops.apply_punch(&result).await.unwrap();
    assert!(dir.path().join("attendance_state.json").exists());

    let reopened = field_ops(dir.path());
    let state = reopened.repositories().attendance.state().unwrap();
    assert_eq!(state.status, AttendanceStatus::In);
    assert_eq!(state.coordinates, Some(FIX));
    assert_eq!(reopened.punch_kind().unwrap(), CheckpointKind::PunchOut);
    assert_eq!(reopened.repositories().attendance.history().unwrap().len(), 1);

    assert_eq!(rig.camera.counters().open_streams(), 0);
    assert_eq!(rig.metrics.runs_succeeded(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_tour_with_new_site_and_forced_return() {
    let dir = TempDir::new().unwrap();
    let rig = build_rig(SimulatedCamera::new(), FIX);
    let ops = field_ops(dir.path());

    let start = completed(
        drive(&rig.workflow, CheckpointKind::TourStart.config(None, 200.0), false).await,
    );
    assert_eq!(start.photos.len(), 2);
    let tour = ops.start_tour(TourDraft::ad_hoc("Meter audit", "Unknown"), &start).await.unwrap();
    assert!(tour.vehicle_plate_url.is_some());

    // Unset destination: arrival records the fix as a new site
    let (kind, target) = ops.tour_checkpoint(&tour.id).unwrap();
    assert_eq!(kind, CheckpointKind::TourArrival);
    let arrival = completed(drive(&rig.workflow, kind.config(target, 200.0), false).await);
    assert_eq!(arrival.location_verdict, LocationVerdict::Unconstrained);
    let site = NewSite { name: "Substation 12".to_string(), category: "Utility".to_string() };
    let tour = ops.advance_tour(&tour.id, &arrival, Some(site)).await.unwrap();
    assert_eq!(tour.to_coordinates, FIX);
    assert_eq!(tour.tour_phase, Some(TourPhase::OnSite));

    // Return checkpoint taken far from the site needs a forced override
    let far = build_rig(SimulatedCamera::new(), FAR);
    let (kind, target) = ops.tour_checkpoint(&tour.id).unwrap();
    assert_eq!(kind, CheckpointKind::TourReturn);
    assert!(matches!(
        drive(&far.workflow, kind.config(target, 200.0), false).await,
        Ok(RunOutcome::Cancelled)
    ));
    let forced = completed(drive(&far.workflow, kind.config(target, 200.0), true).await);
    assert!(forced.forced_override);
    assert!(!forced.within_radius);
    let tour = ops.advance_tour(&tour.id, &forced, None).await.unwrap();
    assert_eq!(tour.tour_phase, Some(TourPhase::Return));

    let end = completed(
        drive(&rig.workflow, CheckpointKind::TourEnd.config(None, 200.0), false).await,
    );
    let tour = ops.advance_tour(&tour.id, &end, None).await.unwrap();
    assert_eq!(tour.status, TourStatus::Completed);
    assert!(tour.distance_covered.unwrap() > 1.0);

    let audit = &ops.repositories().audit;
    assert_eq!(audit.entries().unwrap().len(), 4);
    assert_eq!(audit.overrides().unwrap().len(), 1);
    assert_eq!(far.metrics.forced_overrides(), 1);
    assert_eq!(far.metrics.runs_cancelled(), 1);

    // Claim the finished tour; no mode recorded means bike rate
    let receipt = ClaimReceipt {
        category: "Food".to_string(),
        amount: 60.0,
        description: "Lunch".to_string(),
        receipt_url: None,
    };
    let (_, summary) = ops.submit_claim(&tour.id, vec![receipt]).unwrap();
    let km = tour.distance_covered.unwrap();
    assert!((summary.travel_amount - km * 8.0).abs() < 0.01);

    let stored = field_ops(dir.path()).repositories().tours.find(&tour.id).unwrap().unwrap();
    assert_eq!(stored.status, TourStatus::Claimed);
    assert_eq!(stored.claim_status, Some(ClaimStatus::Due));
    assert_eq!(stored.claim_amount, Some(summary.total));
}

#[tokio::test(start_paused = true)]
async fn test_failed_run_is_recorded_and_retry_succeeds() {
    let dir = TempDir::new().unwrap();
    let rig = build_rig(SimulatedCamera::new(), FIX);
    let ops = field_ops(dir.path());
    rig.camera.fail_next(CameraError::PermissionDenied);

    let config = CheckpointKind::SessionEnd.config(None, 200.0);
    let err = drive(&rig.workflow, config.clone(), false).await.unwrap_err();
    assert_eq!(err.reason(), ErrorReason::PermissionDenied);
    assert_eq!(
        rig.workflow.current().state,
        WorkflowState::Error { reason: ErrorReason::PermissionDenied }
    );
    ops.record_failure(CheckpointKind::SessionEnd, err.reason()).unwrap();

    // A new run is a fresh attempt
    let result = completed(drive(&rig.workflow, config, false).await);
    let session = ops.end_session("G-201", &result, "Wrapped up").unwrap();
    assert_eq!(session.remarks.as_deref(), Some("Wrapped up"));

    let reopened = field_ops(dir.path());
    let failures = reopened.repositories().audit.failures().unwrap();
    assert_eq!(failures.len(), 1);
    assert_eq!(failures[0].kind, "session_end");
    assert_eq!(rig.camera.counters().attempts(), 2);
    assert_eq!(rig.metrics.runs_failed(), 1);
}
