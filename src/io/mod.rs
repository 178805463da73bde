//! IO modules - external collaborators behind traits
//!
//! This module contains every interface to the outside world:
//! - `camera` - stream acquisition and frame capture
//! - `geolocation` - one-shot position fix
//! - `liveness` - liveness verification capability
//! - `place` - reverse geocoding and weather for a fix
//! - `store` - key-value persistence shim (JSON documents per collection)
//!
//! Each collaborator has a simulated implementation used by the CLI and tests.

pub mod camera;
pub mod geolocation;
pub mod liveness;
pub mod place;
pub mod store;

// Re-export commonly used types
pub use camera::{Camera, CameraError, CameraStream, FrameError, SimulatedCamera};
pub use geolocation::{Geolocator, LocationError, SimulatedGeolocator};
pub use liveness::{LivenessVerdict, LivenessVerifier, TimedLivenessVerifier};
pub use place::{PlaceInfo, PlaceResolver, SimulatedPlaceResolver};
pub use store::{Collection, Document, JsonFileStore, KeyValueStore, MemoryStore, StoreError};
