//! Field operations: applying checkpoint results to the stored records
//!
//! Each operation takes the `CheckpointResult` of a finished run and updates
//! the entity it belongs to (attendance, tour, training session). Every applied
//! checkpoint also lands in the audit trail so forced overrides can be told
//! apart from verified checkpoints later.

use crate::domain::geo::path_length_meters;
use crate::domain::records::{
    epoch_ms, new_uuid_v7, AttendanceLog, AttendanceState, AttendanceStatus, CheckpointAuditEntry,
    CheckpointFailure, ClaimReceipt, ClaimStatus, DayStatus, LeaveRequest, LeaveStatus, LeaveType,
    Notification, NotificationType, PoolRole, TrainingSession, TrainingStatus, TransportMode,
    TravelType, Tour, TourPhase, TourStatus,
};
use crate::domain::types::{CheckpointResult, Coordinate, ErrorReason, Site};
use crate::io::place::PlaceResolver;
use crate::io::store::{KeyValueStore, StoreError};
use crate::services::checkpoints::CheckpointKind;
use crate::services::repository::Repositories;
use chrono::{DateTime, Local, NaiveDate, Utc};
use std::sync::Arc;
use tracing::{info, warn};

#[derive(Debug, thiserror::Error)]
pub enum FieldOpsError {
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("tour '{0}' not found")]
    TourNotFound(String),
    #[error("tour '{id}' is not in progress ({status:?})")]
    TourNotInProgress { id: String, status: TourStatus },
    #[error("tour '{id}' is not completed ({status:?})")]
    TourNotCompleted { id: String, status: TourStatus },
    #[error("tour '{id}' is closed ({status:?})")]
    TourClosed { id: String, status: TourStatus },
    #[error("tour '{0}' has no claim awaiting payment")]
    NoClaimDue(String),
    #[error("amount must be a positive number, got {0}")]
    InvalidAmount(f64),
    #[error("a reason is required")]
    MissingReason,
    #[error("training session '{0}' not found")]
    SessionNotFound(String),
    #[error("leave ends before it starts")]
    InvalidLeaveRange,
    #[error("checkpoint result has no photo")]
    MissingPhoto,
}

/// Details entered before a tour starts
#[derive(Debug, Clone, PartialEq)]
pub struct TourDraft {
    pub project_id: String,
    pub project_name: String,
    pub task_name: String,
    pub task_description: Option<String>,
    pub from_location: String,
    pub to_location: String,
    /// `Coordinate::UNSET` when the destination is not yet known
    pub to_coordinates: Coordinate,
    pub transport_mode: Option<TransportMode>,
    pub travel_type: Option<TravelType>,
    pub pool_role: Option<PoolRole>,
    pub advance_amount: Option<f64>,
}

impl TourDraft {
    /// Ad-hoc visit from the current location to an unknown destination
    pub fn ad_hoc(task_name: &str, to_location: &str) -> Self {
        Self {
            project_id: String::new(),
            project_name: "Ad-hoc Visit".to_string(),
            task_name: task_name.to_string(),
            task_description: None,
            from_location: "Current Location".to_string(),
            to_location: to_location.to_string(),
            to_coordinates: Coordinate::UNSET,
            transport_mode: None,
            travel_type: None,
            pool_role: None,
            advance_amount: None,
        }
    }
}

/// Breakdown of a submitted tour claim
#[derive(Debug, Clone, PartialEq)]
pub struct ClaimSummary {
    pub distance_km: f64,
    pub transport_mode: TransportMode,
    pub rate_per_km: f64,
    /// Zero for a pool passenger
    pub travel_amount: f64,
    pub receipts: Vec<ClaimReceipt>,
    pub total: f64,
}

impl ClaimSummary {
    /// Travel allowance for the distance covered plus every receipt.
    /// Tours without a recorded mode are claimed as bike travel.
    pub fn for_tour(tour: &Tour, receipts: Vec<ClaimReceipt>) -> Self {
        let distance_km = tour.distance_covered.unwrap_or(0.0);
        let transport_mode = tour.transport_mode.unwrap_or(TransportMode::Bike);
        let rate_per_km = transport_mode.rate_per_km();
        let travel_amount = match tour.pool_role {
            Some(PoolRole::Passenger) => 0.0,
            _ => round_cents(distance_km * rate_per_km),
        };
        let total = round_cents(travel_amount + receipts.iter().map(|r| r.amount).sum::<f64>());
        Self { distance_km, transport_mode, rate_per_km, travel_amount, receipts, total }
    }
}

/// Site defined on arrival at a tour destination that had no coordinates
#[derive(Debug, Clone, PartialEq)]
pub struct NewSite {
    pub name: String,
    pub category: String,
}

pub struct FieldOps {
    repos: Repositories,
    places: Arc<dyn PlaceResolver>,
}

impl FieldOps {
    pub fn new(store: Arc<dyn KeyValueStore>, places: Arc<dyn PlaceResolver>) -> Self {
        Self { repos: Repositories::new(store), places }
    }

    pub fn repositories(&self) -> &Repositories {
        &self.repos
    }

    // ------------------------------------------------------------------------
    // Attendance
    // ------------------------------------------------------------------------

    /// Punch-in when out, punch-out when in
    pub fn punch_kind(&self) -> Result<CheckpointKind, FieldOpsError> {
        Ok(match self.repos.attendance.state()?.status {
            AttendanceStatus::Out => CheckpointKind::PunchIn,
            AttendanceStatus::In => CheckpointKind::PunchOut,
        })
    }

    pub async fn apply_punch(
        &self,
        result: &CheckpointResult,
    ) -> Result<AttendanceState, FieldOpsError> {
        self.apply_punch_at(result, Local::now()).await
    }

    pub async fn apply_punch_at(
        &self,
        result: &CheckpointResult,
        now: DateTime<Local>,
    ) -> Result<AttendanceState, FieldOpsError> {
        let photo_url = primary_photo_url(result)?;
        let place = self.places.describe(result.coordinate).await;
        let time = now.format("%H:%M").to_string();
        let date = now.date_naive().to_string();
        let condition = place.condition().to_string();
        let previous = self.repos.attendance.state()?;
        let previous_history = self.repos.attendance.history()?;

        let (kind, state) = match previous.status {
            AttendanceStatus::Out => {
                let state = AttendanceState {
                    status: AttendanceStatus::In,
                    punch_in_time: Some(time.clone()),
                    punch_out_time: None,
                    location: Some(place.location.clone()),
                    weather: Some(place.weather.clone()),
                    photo_url: Some(photo_url),
                    coordinates: result.coordinate,
                };
                let log = AttendanceLog {
                    date: date.clone(),
                    start: time.clone(),
                    end: AttendanceLog::OPEN_END.to_string(),
                    weather: condition,
                    status: DayStatus::Present,
                };
                self.repos.attendance.update_history(|history| history.insert(0, log))?;
                (CheckpointKind::PunchIn, state)
            }
            AttendanceStatus::In => {
                let punch_in_time = previous.punch_in_time.clone();
                let state = AttendanceState {
                    status: AttendanceStatus::Out,
                    punch_out_time: Some(time.clone()),
                    location: Some(place.location.clone()),
                    weather: Some(place.weather.clone()),
                    photo_url: Some(photo_url),
                    coordinates: result.coordinate,
                    ..previous
                };
                self.repos.attendance.update_history(|history| {
                    match history.iter_mut().find(|l| l.date == date && l.is_open()) {
                        Some(open) => open.end = time.clone(),
                        None => history.insert(
                            0,
                            AttendanceLog {
                                date: date.clone(),
                                start: punch_in_time
                                    .unwrap_or_else(|| AttendanceLog::OPEN_END.to_string()),
                                end: time.clone(),
                                weather: condition,
                                status: DayStatus::Present,
                            },
                        ),
                    }
                })?;
                (CheckpointKind::PunchOut, state)
            }
        };

        if let Err(e) = self.repos.attendance.save_state(&state) {
            // History is written first; put it back so it never disagrees with the state
            if let Err(rollback) = self.repos.attendance.replace_history(&previous_history) {
                warn!(error = %rollback, "attendance_history_rollback_failed");
            }
            return Err(e.into());
        }
        self.audit(kind, &date, result)?;
        info!(kind = %kind, time = %time, location = %place.location, "attendance_updated");
        Ok(state)
    }

    // ------------------------------------------------------------------------
    // Tours
    // ------------------------------------------------------------------------

    pub async fn start_tour(
        &self,
        draft: TourDraft,
        result: &CheckpointResult,
    ) -> Result<Tour, FieldOpsError> {
        let selfie_url = primary_photo_url(result)?;
        let place = self.places.describe(result.coordinate).await;
        let now = Utc::now();
        let taken: Vec<String> = self.repos.tours.all()?.into_iter().map(|t| t.id).collect();

        let tour = Tour {
            id: short_id("TR-", epoch_ms(), &taken),
            project_id: draft.project_id,
            project_name: draft.project_name,
            task_name: draft.task_name,
            task_description: draft.task_description,
            from_location: draft.from_location,
            to_location: draft.to_location,
            to_coordinates: draft.to_coordinates,
            start_date: now.to_rfc3339(),
            end_date: now.to_rfc3339(),
            status: TourStatus::InProgress,
            advance_amount: draft.advance_amount,
            tour_phase: Some(TourPhase::Outward),
            actual_start_date: Some(now),
            site_arrival_time: None,
            return_start_time: None,
            actual_end_date: None,
            transport_mode: draft.transport_mode,
            travel_type: draft.travel_type,
            pool_role: draft.pool_role,
            vehicle_plate_url: result.secondary_photo().map(|p| p.to_data_url()),
            start_selfie_url: Some(selfie_url),
            site_arrival_selfie_url: None,
            return_start_selfie_url: None,
            end_selfie_url: None,
            checkpoint_coordinates: result.coordinate.into_iter().collect(),
            distance_covered: None,
            weather_data: Some(place.weather),
            claim_status: None,
            claim_amount: None,
        };

        self.repos.tours.insert(tour.clone())?;
        self.audit(CheckpointKind::TourStart, &tour.id, result)?;
        info!(tour_id = %tour.id, to = %tour.to_location, "tour_started");
        Ok(tour)
    }

    /// Next checkpoint for an in-progress tour and the coordinate it targets
    pub fn tour_checkpoint(
        &self,
        tour_id: &str,
    ) -> Result<(CheckpointKind, Option<Coordinate>), FieldOpsError> {
        let tour = self.in_progress_tour(tour_id)?;
        let kind = CheckpointKind::for_tour_phase(tour.tour_phase.unwrap_or(TourPhase::Outward));
        Ok((kind, Some(tour.to_coordinates)))
    }

    /// Outward → OnSite → Return → Completed.
    ///
    /// `new_site` applies to arrival only: it is stored as a known site at the
    /// captured fix and becomes the tour destination.
    pub async fn advance_tour(
        &self,
        tour_id: &str,
        result: &CheckpointResult,
        new_site: Option<NewSite>,
    ) -> Result<Tour, FieldOpsError> {
        let mut tour = self.in_progress_tour(tour_id)?;
        let selfie_url = primary_photo_url(result)?;
        let now = Utc::now();
        let phase = tour.tour_phase.unwrap_or(TourPhase::Outward);
        if let Some(coordinate) = result.coordinate {
            tour.checkpoint_coordinates.push(coordinate);
        }

        match phase {
            TourPhase::Outward => {
                tour.tour_phase = Some(TourPhase::OnSite);
                tour.site_arrival_time = Some(now);
                tour.site_arrival_selfie_url = Some(selfie_url);
                match (new_site, result.coordinate) {
                    (Some(new_site), Some(coordinate)) => {
                        let site = Site {
                            id: format!("S-{}", new_uuid_v7()),
                            name: new_site.name,
                            category: new_site.category,
                            coordinate,
                        };
                        info!(site_id = %site.id, name = %site.name, "site_defined");
                        tour.to_location = site.name.clone();
                        tour.to_coordinates = coordinate;
                        self.repos.sites.add(site)?;
                    }
                    (Some(new_site), None) => {
                        warn!(tour_id = %tour_id, name = %new_site.name, "site_skipped_no_fix");
                    }
                    (None, _) => {}
                }
            }
            TourPhase::OnSite => {
                tour.tour_phase = Some(TourPhase::Return);
                tour.return_start_time = Some(now);
                tour.return_start_selfie_url = Some(selfie_url);
            }
            TourPhase::Return => {
                tour.status = TourStatus::Completed;
                tour.actual_end_date = Some(now);
                tour.end_selfie_url = Some(selfie_url);
                let km = path_length_meters(&tour.checkpoint_coordinates) / 1000.0;
                tour.distance_covered = Some((km * 10.0).round() / 10.0);
            }
        }

        self.repos.tours.replace(tour.clone())?;
        self.audit(CheckpointKind::for_tour_phase(phase), &tour.id, result)?;
        info!(
            tour_id = %tour.id,
            from_phase = %phase.as_str(),
            status = ?tour.status,
            distance_km = ?tour.distance_covered,
            "tour_advanced"
        );
        Ok(tour)
    }

    fn in_progress_tour(&self, tour_id: &str) -> Result<Tour, FieldOpsError> {
        let tour = self.tour(tour_id)?;
        if tour.status != TourStatus::InProgress {
            return Err(FieldOpsError::TourNotInProgress { id: tour.id, status: tour.status });
        }
        Ok(tour)
    }

    fn tour(&self, tour_id: &str) -> Result<Tour, FieldOpsError> {
        self.repos
            .tours
            .find(tour_id)?
            .ok_or_else(|| FieldOpsError::TourNotFound(tour_id.to_string()))
    }

    // ------------------------------------------------------------------------
    // Advances and claims
    // ------------------------------------------------------------------------

    /// Ask for cash ahead of a tour that has not finished yet. Repeated
    /// requests add up; approval happens outside this app.
    pub fn request_advance(
        &self,
        tour_id: &str,
        amount: f64,
        reason: &str,
    ) -> Result<Tour, FieldOpsError> {
        if !(amount.is_finite() && amount > 0.0) {
            return Err(FieldOpsError::InvalidAmount(amount));
        }
        if reason.trim().is_empty() {
            return Err(FieldOpsError::MissingReason);
        }
        let mut tour = self.tour(tour_id)?;
        if !matches!(tour.status, TourStatus::Upcoming | TourStatus::InProgress) {
            return Err(FieldOpsError::TourClosed { id: tour.id, status: tour.status });
        }
        tour.advance_amount = Some(round_cents(tour.advance_amount.unwrap_or(0.0) + amount));
        self.repos.tours.replace(tour.clone())?;

        self.notify(
            NotificationType::General,
            "Advance Requested",
            format!(
                "Advance of {amount:.2} for \"{}\" ({}) is awaiting manager approval. Reason: {}",
                tour.project_name,
                tour.id,
                reason.trim()
            ),
            &tour.id,
            "/tours",
        )?;
        info!(tour_id = %tour.id, amount = %amount, total = ?tour.advance_amount, "advance_requested");
        Ok(tour)
    }

    /// Claim travel and receipts for a completed tour. The claim is due until
    /// `settle_claim` marks it paid.
    pub fn submit_claim(
        &self,
        tour_id: &str,
        receipts: Vec<ClaimReceipt>,
    ) -> Result<(Tour, ClaimSummary), FieldOpsError> {
        if let Some(bad) = receipts.iter().find(|r| !(r.amount.is_finite() && r.amount > 0.0)) {
            return Err(FieldOpsError::InvalidAmount(bad.amount));
        }
        let mut tour = self.tour(tour_id)?;
        if tour.status != TourStatus::Completed {
            return Err(FieldOpsError::TourNotCompleted { id: tour.id, status: tour.status });
        }

        let summary = ClaimSummary::for_tour(&tour, receipts);
        tour.status = TourStatus::Claimed;
        tour.claim_status = Some(ClaimStatus::Due);
        tour.claim_amount = Some(summary.total);
        self.repos.tours.replace(tour.clone())?;

        self.notify(
            NotificationType::General,
            "Expense Claim Submitted",
            format!(
                "Your claim for \"{}\" ({}) is due for processing. Amount: {:.2}.",
                tour.project_name, tour.id, summary.total
            ),
            &tour.id,
            "/tours",
        )?;
        info!(
            tour_id = %tour.id,
            distance_km = %summary.distance_km,
            travel = %summary.travel_amount,
            receipts = %summary.receipts.len(),
            total = %summary.total,
            "claim_submitted"
        );
        Ok((tour, summary))
    }

    /// Mark a due claim as paid
    pub fn settle_claim(&self, tour_id: &str) -> Result<Tour, FieldOpsError> {
        let mut tour = self.tour(tour_id)?;
        if tour.claim_status != Some(ClaimStatus::Due) {
            return Err(FieldOpsError::NoClaimDue(tour.id));
        }
        tour.claim_status = Some(ClaimStatus::Paid);
        self.repos.tours.replace(tour.clone())?;

        let amount = tour.claim_amount.unwrap_or(0.0);
        self.notify(
            NotificationType::ClaimPaid,
            "Expense Claim Approved",
            format!(
                "Your claim for \"{}\" ({}) has been processed. Amount: {amount:.2}.",
                tour.project_name, tour.id
            ),
            &tour.id,
            "/tours",
        )?;
        info!(tour_id = %tour.id, amount = %amount, "claim_paid");
        Ok(tour)
    }

    // ------------------------------------------------------------------------
    // Training sessions
    // ------------------------------------------------------------------------

    /// Venue a session start is checked against; unset means online
    pub fn session_venue(&self, session_id: &str) -> Result<Coordinate, FieldOpsError> {
        Ok(self.session(session_id)?.location_coords)
    }

    pub fn start_session(
        &self,
        session_id: &str,
        result: &CheckpointResult,
    ) -> Result<TrainingSession, FieldOpsError> {
        let mut session = self.session(session_id)?;
        session.status = TrainingStatus::InProgress;
        session.photo_url = Some(primary_photo_url(result)?);
        session.actual_start_time = Some(Utc::now());

        self.repos.training.replace(session.clone())?;
        self.audit(CheckpointKind::SessionStart, &session.id, result)?;
        info!(session_id = %session.id, topic = %session.topic, "session_started");
        Ok(session)
    }

    pub fn end_session(
        &self,
        session_id: &str,
        result: &CheckpointResult,
        remarks: &str,
    ) -> Result<TrainingSession, FieldOpsError> {
        let mut session = self.session(session_id)?;
        session.status = TrainingStatus::Completed;
        session.completion_photo_url = Some(primary_photo_url(result)?);
        session.actual_end_time = Some(Utc::now());
        session.remarks = Some(remarks.to_string());

        self.repos.training.replace(session.clone())?;
        self.audit(CheckpointKind::SessionEnd, &session.id, result)?;
        info!(session_id = %session.id, "session_completed");
        Ok(session)
    }

    fn session(&self, session_id: &str) -> Result<TrainingSession, FieldOpsError> {
        self.repos
            .training
            .find(session_id)?
            .ok_or_else(|| FieldOpsError::SessionNotFound(session_id.to_string()))
    }

    // ------------------------------------------------------------------------
    // Leave and notifications
    // ------------------------------------------------------------------------

    pub fn apply_leave(
        &self,
        leave_type: LeaveType,
        start_date: NaiveDate,
        end_date: NaiveDate,
        reason: &str,
    ) -> Result<LeaveRequest, FieldOpsError> {
        if end_date < start_date {
            return Err(FieldOpsError::InvalidLeaveRange);
        }
        let now = Utc::now();
        let request = LeaveRequest {
            id: format!("L-{}", new_uuid_v7()),
            leave_type,
            start_date,
            end_date,
            reason: reason.to_string(),
            status: LeaveStatus::Pending,
            applied_on: now,
        };
        self.repos.leave.insert(request.clone())?;

        self.notify(
            NotificationType::LeaveUpdate,
            "Leave Application Received",
            format!(
                "Your leave request for {} has been received and is under review.",
                request.reason
            ),
            &request.id,
            "/hr",
        )?;
        info!(leave_id = %request.id, days = %request.days(), "leave_applied");
        Ok(request)
    }

    fn notify(
        &self,
        kind: NotificationType,
        title: &str,
        message: String,
        reference_id: &str,
        route: &str,
    ) -> Result<(), FieldOpsError> {
        self.repos.notifications.push(Notification {
            id: format!("n-{}", new_uuid_v7()),
            kind,
            title: title.to_string(),
            message,
            timestamp: Utc::now(),
            read: false,
            reference_id: Some(reference_id.to_string()),
            route: Some(route.to_string()),
        })?;
        Ok(())
    }

    pub fn notifications(&self) -> Result<Vec<Notification>, FieldOpsError> {
        Ok(self.repos.notifications.all()?)
    }

    pub fn mark_notification_read(&self, id: &str) -> Result<bool, FieldOpsError> {
        Ok(self.repos.notifications.mark_read(id)?)
    }

    pub fn mark_all_notifications_read(&self) -> Result<usize, FieldOpsError> {
        Ok(self.repos.notifications.mark_all_read()?)
    }

    pub fn unread_notifications(&self) -> Result<usize, FieldOpsError> {
        Ok(self.repos.notifications.unread_count()?)
    }

    // ------------------------------------------------------------------------
    // Audit
    // ------------------------------------------------------------------------

    /// Keep a failed attempt beside the applied checkpoints
    pub fn record_failure(
        &self,
        kind: CheckpointKind,
        reason: ErrorReason,
    ) -> Result<(), FieldOpsError> {
        self.repos.audit.record_failure(CheckpointFailure {
            kind: kind.as_str().to_string(),
            reason,
            at: Utc::now(),
        })?;
        Ok(())
    }

    fn audit(
        &self,
        kind: CheckpointKind,
        entity_id: &str,
        result: &CheckpointResult,
    ) -> Result<(), FieldOpsError> {
        if result.forced_override {
            warn!(
                kind = %kind,
                entity_id = %entity_id,
                distance_m = ?result.distance_m,
                "checkpoint_forced_override"
            );
        }
        self.repos.audit.record(CheckpointAuditEntry {
            id: new_uuid_v7(),
            kind: kind.as_str().to_string(),
            entity_id: entity_id.to_string(),
            captured_at: result.captured_at,
            coordinate: result.coordinate,
            distance_m: result.distance_m,
            within_radius: result.within_radius,
            location_verdict: result.location_verdict,
            forced_override: result.forced_override,
        })?;
        Ok(())
    }
}

fn primary_photo_url(result: &CheckpointResult) -> Result<String, FieldOpsError> {
    result.primary_photo().map(|p| p.to_data_url()).ok_or(FieldOpsError::MissingPhoto)
}

const SHORT_ID_SPACE: u64 = 1_000_000;

/// `{prefix}NNNNNN` for the first number at or after `seed` (mod one million)
/// that no existing record uses
fn short_id(prefix: &str, seed: u64, taken: &[String]) -> String {
    (0..SHORT_ID_SPACE)
        .map(|offset| format!("{prefix}{:06}", (seed + offset) % SHORT_ID_SPACE))
        .find(|id| !taken.contains(id))
        .unwrap_or_else(|| format!("{prefix}{}", new_uuid_v7()))
}

fn round_cents(amount: f64) -> f64 {
    (amount * 100.0).round() / 100.0
}
