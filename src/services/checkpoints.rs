//! Checkpoint profiles: which workflow stages each use case runs

use crate::domain::records::TourPhase;
use crate::domain::types::{CameraFacing, CheckpointConfig, Coordinate};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckpointKind {
    PunchIn,
    PunchOut,
    /// Selfie plus vehicle plate photo
    TourStart,
    TourArrival,
    TourReturn,
    TourEnd,
    SessionStart,
    SessionEnd,
}

impl CheckpointKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            CheckpointKind::PunchIn => "punch_in",
            CheckpointKind::PunchOut => "punch_out",
            CheckpointKind::TourStart => "tour_start",
            CheckpointKind::TourArrival => "tour_arrival",
            CheckpointKind::TourReturn => "tour_return",
            CheckpointKind::TourEnd => "tour_end",
            CheckpointKind::SessionStart => "session_start",
            CheckpointKind::SessionEnd => "session_end",
        }
    }

    /// Checkpoint that moves an in-progress tour out of `phase`
    pub fn for_tour_phase(phase: TourPhase) -> Self {
        match phase {
            TourPhase::Outward => CheckpointKind::TourArrival,
            TourPhase::OnSite => CheckpointKind::TourReturn,
            TourPhase::Return => CheckpointKind::TourEnd,
        }
    }

    /// Stage selection for this checkpoint.
    ///
    /// `target` only matters for kinds that check a radius; `None` or the
    /// unset sentinel records the fix without comparing it.
    pub fn config(&self, target: Option<Coordinate>, radius_m: f64) -> CheckpointConfig {
        match self {
            CheckpointKind::PunchIn | CheckpointKind::PunchOut | CheckpointKind::TourEnd => {
                CheckpointConfig::new(CameraFacing::User)
                    .with_liveness()
                    .with_location_check(None, radius_m)
            }
            CheckpointKind::TourStart => CheckpointConfig::new(CameraFacing::User)
                .with_secondary_capture()
                .with_location_check(None, radius_m),
            CheckpointKind::TourArrival | CheckpointKind::TourReturn => {
                CheckpointConfig::new(CameraFacing::User)
                    .with_liveness()
                    .with_location_check(target, radius_m)
            }
            CheckpointKind::SessionStart => {
                CheckpointConfig::new(CameraFacing::Environment).with_location_check(target, radius_m)
            }
            CheckpointKind::SessionEnd => CheckpointConfig::new(CameraFacing::Environment),
        }
    }
}

impl std::fmt::Display for CheckpointKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
