//! Geolocation collaborator: one-shot position fix

use crate::domain::types::Coordinate;
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LocationError {
    #[error("location permission denied")]
    PermissionDenied,
    #[error("timed out waiting for a location fix")]
    Timeout,
    #[error("location unavailable")]
    Unavailable,
}

#[async_trait]
pub trait Geolocator: Send + Sync {
    /// Acquire a single fix, giving up after `timeout`
    async fn get_fix(&self, timeout: Duration) -> Result<Coordinate, LocationError>;
}

/// Returns a configured fix (or failure) after an optional delay
pub struct SimulatedGeolocator {
    fix: Coordinate,
    failure: Option<LocationError>,
    scripted: Mutex<VecDeque<Result<Coordinate, LocationError>>>,
    delay: Duration,
    requests: AtomicU64,
}

impl SimulatedGeolocator {
    pub fn new(fix: Coordinate) -> Self {
        Self {
            fix,
            failure: None,
            scripted: Mutex::new(VecDeque::new()),
            delay: Duration::ZERO,
            requests: AtomicU64::new(0),
        }
    }

    pub fn with_failure(mut self, error: LocationError) -> Self {
        self.failure = Some(error);
        self
    }

    /// Time the simulated sensor takes to produce a fix
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Queue a one-shot answer ahead of the configured fix
    pub fn push_response(&self, response: Result<Coordinate, LocationError>) {
        self.scripted.lock().push_back(response);
    }

    pub fn requests(&self) -> u64 {
        self.requests.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl Geolocator for SimulatedGeolocator {
    async fn get_fix(&self, timeout: Duration) -> Result<Coordinate, LocationError> {
        self.requests.fetch_add(1, Ordering::Relaxed);

        if self.delay > timeout {
            tokio::time::sleep(timeout).await;
            return Err(LocationError::Timeout);
        }
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }

        if let Some(response) = self.scripted.lock().pop_front() {
            return response;
        }
        match &self.failure {
            Some(error) => Err(error.clone()),
            None => Ok(self.fix),
        }
    }
}
