//! Persisted field-force records: attendance, tours, training, leave, notifications
//!
//! Records are stored as JSON documents with camelCase keys. Photos are kept
//! as `data:` URLs and timestamps as RFC 3339 strings.

use crate::domain::types::{Coordinate, ErrorReason, LocationVerdict};
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::time::{SystemTime, UNIX_EPOCH};
use uuid::Uuid;

/// Generate a new UUIDv7 (time-sortable)
pub fn new_uuid_v7() -> String {
    Uuid::now_v7().to_string()
}

/// Get current epoch milliseconds
#[inline]
pub fn epoch_ms() -> u64 {
    SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default().as_millis() as u64
}

// ---------------------------------------------------------------------------
// Attendance
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AttendanceStatus {
    #[serde(rename = "IN")]
    In,
    #[serde(rename = "OUT")]
    Out,
}

/// Current punch state of the signed-in employee
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AttendanceState {
    pub status: AttendanceStatus,
    pub punch_in_time: Option<String>,
    pub punch_out_time: Option<String>,
    pub location: Option<String>,
    pub weather: Option<String>,
    pub photo_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub coordinates: Option<Coordinate>,
}

impl Default for AttendanceState {
    fn default() -> Self {
        Self {
            status: AttendanceStatus::Out,
            punch_in_time: None,
            punch_out_time: None,
            location: None,
            weather: None,
            photo_url: None,
            coordinates: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DayStatus {
    Present,
    Absent,
    Leave,
    Holiday,
}

/// One day in the attendance history. `end` is `"-"` while the day is open.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttendanceLog {
    pub date: String,
    pub start: String,
    pub end: String,
    pub weather: String,
    pub status: DayStatus,
}

impl AttendanceLog {
    pub const OPEN_END: &'static str = "-";

    pub fn is_open(&self) -> bool {
        self.end == Self::OPEN_END
    }
}

// ---------------------------------------------------------------------------
// Tours
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TourStatus {
    Upcoming,
    #[serde(rename = "In Progress")]
    InProgress,
    Completed,
    Claimed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TourPhase {
    Outward,
    OnSite,
    Return,
}

impl TourPhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            TourPhase::Outward => "outward",
            TourPhase::OnSite => "on_site",
            TourPhase::Return => "return",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TransportMode {
    Bike,
    Car,
    Bus,
}

impl TransportMode {
    /// Travel allowance per kilometre; public transport is claimed by receipt
    pub fn rate_per_km(&self) -> f64 {
        match self {
            TransportMode::Bike => 8.0,
            TransportMode::Car => 15.0,
            TransportMode::Bus => 0.0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TravelType {
    Individual,
    Pool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PoolRole {
    Driver,
    Passenger,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ClaimStatus {
    Paid,
    Due,
}

/// A field visit: outward journey, time on site, return journey
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Tour {
    pub id: String,
    pub project_id: String,
    pub project_name: String,
    pub task_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub task_description: Option<String>,
    pub from_location: String,
    pub to_location: String,
    pub to_coordinates: Coordinate,
    pub start_date: String,
    pub end_date: String,
    pub status: TourStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub advance_amount: Option<f64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tour_phase: Option<TourPhase>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub actual_start_date: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub site_arrival_time: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub return_start_time: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub actual_end_date: Option<DateTime<Utc>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transport_mode: Option<TransportMode>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub travel_type: Option<TravelType>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pool_role: Option<PoolRole>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vehicle_plate_url: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_selfie_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub site_arrival_selfie_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub return_start_selfie_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_selfie_url: Option<String>,

    /// Fixes recorded at each checkpoint, in order: start, arrival, return, end
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub checkpoint_coordinates: Vec<Coordinate>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub distance_covered: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub weather_data: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub claim_status: Option<ClaimStatus>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub claim_amount: Option<f64>,
}

/// Out-of-pocket expense submitted with a tour claim
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClaimReceipt {
    pub category: String,
    pub amount: f64,
    #[serde(default)]
    pub description: String,
    /// Photo of the paper receipt, taken with the environment camera
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub receipt_url: Option<String>,
}

// ---------------------------------------------------------------------------
// Training
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TrainingRole {
    Trainee,
    Trainer,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TrainingStatus {
    Due,
    #[serde(rename = "In Progress")]
    InProgress,
    Completed,
    Cancelled,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrainingSession {
    pub id: String,
    pub project_name: String,
    pub topic: String,
    pub description: String,
    pub start_date: String,
    pub end_date: String,
    pub location_name: String,
    /// `Coordinate::UNSET` marks an online session
    pub location_coords: Coordinate,
    pub role: TrainingRole,
    pub status: TrainingStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub photo_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub actual_start_time: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub actual_end_time: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completion_photo_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub remarks: Option<String>,
}

// ---------------------------------------------------------------------------
// Leave
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LeaveType {
    Casual,
    Sick,
    Earned,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LeaveStatus {
    Pending,
    Approved,
    Rejected,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LeaveRequest {
    pub id: String,
    #[serde(rename = "type")]
    pub leave_type: LeaveType,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    pub reason: String,
    pub status: LeaveStatus,
    pub applied_on: DateTime<Utc>,
}

impl LeaveRequest {
    /// Inclusive day count
    pub fn days(&self) -> i64 {
        (self.end_date - self.start_date).num_days() + 1
    }
}

// ---------------------------------------------------------------------------
// Notifications
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum NotificationType {
    ProjectAssigned,
    TrainingAssigned,
    ClaimPaid,
    LeaveUpdate,
    General,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Notification {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: NotificationType,
    pub title: String,
    pub message: String,
    pub timestamp: DateTime<Utc>,
    pub read: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reference_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub route: Option<String>,
}

// ---------------------------------------------------------------------------
// Checkpoint audit
// ---------------------------------------------------------------------------

/// Audit trail entry for an applied checkpoint, so forced overrides stay
/// distinguishable from verified in-radius checkpoints
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckpointAuditEntry {
    pub id: String,
    pub kind: String,
    pub entity_id: String,
    pub captured_at: DateTime<Utc>,
    pub coordinate: Option<Coordinate>,
    pub distance_m: Option<f64>,
    pub within_radius: bool,
    pub location_verdict: LocationVerdict,
    pub forced_override: bool,
}

/// Failed attempt entry; kept beside successful ones for the same audit trail
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckpointFailure {
    pub kind: String,
    pub reason: ErrorReason,
    pub at: DateTime<Utc>,
}
