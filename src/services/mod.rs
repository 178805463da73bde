//! Services - checkpoint workflow and the operations built on its results
//!
//! This module contains the core business logic services:
//! - `workflow` - Checkpoint verification state machine (camera, liveness, location)
//! - `checkpoints` - Stage selection per use case (punch, tour, training)
//! - `repository` - Entity repositories over the key-value store
//! - `field_ops` - Applies checkpoint results to attendance, tours and sessions

pub mod checkpoints;
pub mod field_ops;
pub mod repository;
pub mod workflow;

// Re-export commonly used types
pub use checkpoints::CheckpointKind;
pub use field_ops::{ClaimSummary, FieldOps, FieldOpsError, NewSite, TourDraft};
pub use repository::Repositories;
pub use workflow::{
    spawn_workflow, CheckpointError, CheckpointWorkflow, RunOutcome, WorkflowCommand,
    WorkflowHandle, WorkflowTimings,
};
