//! Checkpoint types shared by the workflow, its collaborators and the stores

use bytes::Bytes;
use base64::{engine::general_purpose::STANDARD, Engine};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use smallvec::SmallVec;

/// Default radius a captured fix may be from the target site
pub const DEFAULT_ALLOWED_RADIUS_M: f64 = 200.0;

/// WGS84 position in decimal degrees
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Coordinate {
    pub lat: f64,
    pub lng: f64,
}

impl Coordinate {
    /// Sentinel for "site unknown / online": both components zero
    pub const UNSET: Coordinate = Coordinate { lat: 0.0, lng: 0.0 };

    pub const fn new(lat: f64, lng: f64) -> Self {
        Self { lat, lng }
    }

    #[inline]
    pub fn is_unset(&self) -> bool {
        self.lat == 0.0 && self.lng == 0.0
    }
}

impl std::fmt::Display for Coordinate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:.6},{:.6}", self.lat, self.lng)
    }
}

/// Which physical camera a stream is requested from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CameraFacing {
    User,
    Environment,
}

impl CameraFacing {
    pub fn as_str(&self) -> &'static str {
        match self {
            CameraFacing::User => "user",
            CameraFacing::Environment => "environment",
        }
    }
}

/// A still grabbed from a live stream (JPEG encoded)
#[derive(Debug, Clone, PartialEq)]
pub struct Frame {
    pub width: u32,
    pub height: u32,
    pub bytes: Bytes,
}

/// A captured frame plus where and when it came from
#[derive(Debug, Clone, PartialEq)]
pub struct Photo {
    pub facing: CameraFacing,
    pub frame: Frame,
    pub captured_at: DateTime<Utc>,
}

impl Photo {
    pub fn new(facing: CameraFacing, frame: Frame) -> Self {
        Self { facing, frame, captured_at: Utc::now() }
    }

    /// Encode as a `data:` URL, the form records store photos in
    pub fn to_data_url(&self) -> String {
        format!("data:image/jpeg;base64,{}", STANDARD.encode(&self.frame.bytes))
    }
}

/// Stage selection for one workflow run. Immutable once a run starts.
#[derive(Debug, Clone, PartialEq)]
pub struct CheckpointConfig {
    pub requires_liveness: bool,
    pub requires_location_check: bool,
    /// `None` or `Coordinate::UNSET` records the fix without a radius check
    pub target_coordinate: Option<Coordinate>,
    pub allowed_radius_m: f64,
    pub camera_facing: CameraFacing,
    /// Switch to the environment camera for a second, user-triggered photo
    pub secondary_capture: bool,
}

impl CheckpointConfig {
    pub fn new(camera_facing: CameraFacing) -> Self {
        Self {
            requires_liveness: false,
            requires_location_check: false,
            target_coordinate: None,
            allowed_radius_m: DEFAULT_ALLOWED_RADIUS_M,
            camera_facing,
            secondary_capture: false,
        }
    }

    pub fn with_liveness(mut self) -> Self {
        self.requires_liveness = true;
        self
    }

    pub fn with_secondary_capture(mut self) -> Self {
        self.secondary_capture = true;
        self
    }

    /// Require a fix; `target` of `None` records it without a radius check
    pub fn with_location_check(mut self, target: Option<Coordinate>, radius_m: f64) -> Self {
        self.requires_location_check = true;
        self.target_coordinate = target;
        self.allowed_radius_m = radius_m;
        self
    }

    /// Target that a fix must be compared against, if any
    pub fn radius_target(&self) -> Option<Coordinate> {
        self.target_coordinate.filter(|c| !c.is_unset())
    }
}

/// How the location stage concluded
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LocationVerdict {
    /// Location stage not configured
    NotChecked,
    /// Fix taken, no target to compare against
    Unconstrained,
    WithinRadius,
    /// Outside the radius, user chose to proceed anyway
    Overridden,
}

/// Terminal payload of a successful run. Never mutated after creation.
#[derive(Debug, Clone, PartialEq)]
pub struct CheckpointResult {
    /// Primary photo first, secondary (if configured) second
    pub photos: SmallVec<[Photo; 2]>,
    pub coordinate: Option<Coordinate>,
    pub distance_m: Option<f64>,
    pub within_radius: bool,
    pub location_verdict: LocationVerdict,
    pub forced_override: bool,
    pub captured_at: DateTime<Utc>,
}

impl CheckpointResult {
    pub fn primary_photo(&self) -> Option<&Photo> {
        self.photos.first()
    }

    pub fn secondary_photo(&self) -> Option<&Photo> {
        self.photos.get(1)
    }
}

/// Known destination a location check can target
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Site {
    pub id: String,
    pub name: String,
    pub category: String,
    #[serde(rename = "coordinates")]
    pub coordinate: Coordinate,
}

/// Prompt shown during the liveness challenge. Has no effect on the verdict.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LivenessAction {
    BlinkTwice,
    TurnLeft,
    TurnRight,
    Smile,
    Nod,
}

impl LivenessAction {
    pub const ALL: [LivenessAction; 5] = [
        LivenessAction::BlinkTwice,
        LivenessAction::TurnLeft,
        LivenessAction::TurnRight,
        LivenessAction::Smile,
        LivenessAction::Nod,
    ];

    /// Uniform random pick
    pub fn pick() -> Self {
        use rand::seq::SliceRandom;
        *Self::ALL.choose(&mut rand::thread_rng()).unwrap_or(&LivenessAction::BlinkTwice)
    }

    pub fn prompt(&self) -> &'static str {
        match self {
            LivenessAction::BlinkTwice => "Blink your eyes twice",
            LivenessAction::TurnLeft => "Turn your head slightly to the left",
            LivenessAction::TurnRight => "Turn your head slightly to the right",
            LivenessAction::Smile => "Smile for the camera",
            LivenessAction::Nod => "Nod your head",
        }
    }
}

/// User-facing failure classes; every one is offered a retry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorReason {
    PermissionDenied,
    DeviceBusy,
    DeviceNotFound,
    CameraTimeout,
    LocationUnavailable,
    LocationTimeout,
    LivenessFailed,
    LivenessInconclusive,
    Unknown,
}

impl ErrorReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorReason::PermissionDenied => "permission_denied",
            ErrorReason::DeviceBusy => "device_busy",
            ErrorReason::DeviceNotFound => "device_not_found",
            ErrorReason::CameraTimeout => "camera_timeout",
            ErrorReason::LocationUnavailable => "location_unavailable",
            ErrorReason::LocationTimeout => "location_timeout",
            ErrorReason::LivenessFailed => "liveness_failed",
            ErrorReason::LivenessInconclusive => "liveness_inconclusive",
            ErrorReason::Unknown => "unknown",
        }
    }

    /// Message a hosting page shows next to its retry action
    pub fn user_message(&self) -> &'static str {
        match self {
            ErrorReason::PermissionDenied => {
                "Access denied. Please enable camera and location permissions to continue."
            }
            ErrorReason::DeviceBusy => "The camera is in use by another application.",
            ErrorReason::DeviceNotFound => "No camera was found on this device.",
            ErrorReason::CameraTimeout => "The camera did not start in time.",
            ErrorReason::LocationUnavailable => "Failed to retrieve location. Please enable GPS.",
            ErrorReason::LocationTimeout => "Timed out waiting for a location fix.",
            ErrorReason::LivenessFailed => "Face verification failed.",
            ErrorReason::LivenessInconclusive => "Face verification was inconclusive.",
            ErrorReason::Unknown => "Something went wrong.",
        }
    }
}

/// Live state of one workflow run
#[derive(Debug, Clone, PartialEq)]
pub enum WorkflowState {
    Idle,
    AcquiringCamera { facing: CameraFacing },
    /// Stream live, waiting for the user to capture the primary photo
    CameraReady,
    LivenessChallenge { action: LivenessAction },
    LivenessVerifying,
    PrimaryCaptured,
    SwitchingCamera,
    SecondaryCapturing,
    SecondaryCaptured,
    LocationChecking,
    /// Fix is outside the radius; waits for force-proceed or cancel
    LocationMismatchWarning { distance_m: f64 },
    Success,
    Error { reason: ErrorReason },
    Cancelled,
}

impl WorkflowState {
    pub fn as_str(&self) -> &'static str {
        match self {
            WorkflowState::Idle => "idle",
            WorkflowState::AcquiringCamera { .. } => "acquiring_camera",
            WorkflowState::CameraReady => "camera_ready",
            WorkflowState::LivenessChallenge { .. } => "liveness_challenge",
            WorkflowState::LivenessVerifying => "liveness_verifying",
            WorkflowState::PrimaryCaptured => "primary_captured",
            WorkflowState::SwitchingCamera => "switching_camera",
            WorkflowState::SecondaryCapturing => "secondary_capturing",
            WorkflowState::SecondaryCaptured => "secondary_captured",
            WorkflowState::LocationChecking => "location_checking",
            WorkflowState::LocationMismatchWarning { .. } => "location_mismatch_warning",
            WorkflowState::Success => "success",
            WorkflowState::Error { .. } => "error",
            WorkflowState::Cancelled => "cancelled",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            WorkflowState::Success | WorkflowState::Error { .. } | WorkflowState::Cancelled
        )
    }

    /// States that wait on an explicit user command
    pub fn awaits_user(&self) -> bool {
        matches!(
            self,
            WorkflowState::CameraReady
                | WorkflowState::SecondaryCapturing
                | WorkflowState::LocationMismatchWarning { .. }
        )
    }
}

/// A published state tagged with the run it belongs to
#[derive(Debug, Clone, PartialEq)]
pub struct WorkflowSnapshot {
    pub run_id: u64,
    pub state: WorkflowState,
}
