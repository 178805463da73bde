//! Domain models - checkpoint types, distance evaluation and stored records
//!
//! This module contains the data types used throughout the system:
//! - `types` - `CheckpointConfig`, `CheckpointResult`, `WorkflowState`, `Coordinate`
//! - `geo` - Haversine distance evaluator
//! - `records` - persisted entities (attendance, tours, training, leave, notifications)
//! - `seed` - default records for collections that were never written

pub mod geo;
pub mod records;
pub mod seed;
pub mod types;

// Re-export commonly used types at module level
pub use geo::distance_meters;
pub use types::{
    CameraFacing, CheckpointConfig, CheckpointResult, Coordinate, ErrorReason, Frame,
    LocationVerdict, Photo, Site, WorkflowSnapshot, WorkflowState,
};
