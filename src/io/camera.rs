//! Camera collaborator: stream acquisition and still capture
//!
//! The workflow only sees the `Camera` / `CameraStream` traits. `SimulatedCamera`
//! stands in for device hardware in the CLI and in tests: it counts acquire and
//! release calls, can fail on demand, and models a single physical camera handle
//! (a second concurrent acquire fails with `DeviceBusy`).

use crate::domain::types::{CameraFacing, Frame};
use async_trait::async_trait;
use bytes::{BufMut, Bytes, BytesMut};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CameraError {
    #[error("camera permission denied")]
    PermissionDenied,
    #[error("camera is busy")]
    DeviceBusy,
    #[error("no camera found")]
    NotFound,
    #[error("camera did not become available in time")]
    Timeout,
    #[error("camera failure: {0}")]
    Unknown(String),
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FrameError {
    /// Video has zero dimensions; wait for the stream to become ready
    #[error("video not ready")]
    NotReady,
    #[error("stream ended")]
    Ended,
}

/// A live stream from one camera. Tracks must be stopped via `release`.
pub trait CameraStream: Send {
    fn facing(&self) -> CameraFacing;

    fn is_live(&self) -> bool;

    fn capture_frame(&mut self) -> Result<Frame, FrameError>;

    /// Stop all tracks. Idempotent.
    fn release(&mut self);
}

#[async_trait]
pub trait Camera: Send + Sync {
    async fn acquire(&self, facing: CameraFacing) -> Result<Box<dyn CameraStream>, CameraError>;
}

/// Acquire/release bookkeeping shared between a camera and its streams
#[derive(Debug, Default)]
pub struct CameraCounters {
    attempts: AtomicU64,
    acquired: AtomicU64,
    released: AtomicU64,
    open: AtomicUsize,
}

impl CameraCounters {
    /// Every acquire call, successful or not
    pub fn attempts(&self) -> u64 {
        self.attempts.load(Ordering::Relaxed)
    }

    pub fn acquired(&self) -> u64 {
        self.acquired.load(Ordering::Relaxed)
    }

    pub fn released(&self) -> u64 {
        self.released.load(Ordering::Relaxed)
    }

    pub fn open_streams(&self) -> usize {
        self.open.load(Ordering::Relaxed)
    }
}

/// Software camera producing small synthetic JPEG frames
pub struct SimulatedCamera {
    counters: Arc<CameraCounters>,
    /// Fails every acquire while set
    failure: Option<CameraError>,
    /// One-shot failures consumed before `failure`
    scripted: Mutex<VecDeque<CameraError>>,
    failing_facing: Option<(CameraFacing, CameraError)>,
    acquire_delay: Duration,
    not_ready_frames: u32,
    frame_seq: Arc<AtomicU64>,
}

impl SimulatedCamera {
    pub fn new() -> Self {
        Self {
            counters: Arc::new(CameraCounters::default()),
            failure: None,
            scripted: Mutex::new(VecDeque::new()),
            failing_facing: None,
            acquire_delay: Duration::ZERO,
            not_ready_frames: 0,
            frame_seq: Arc::new(AtomicU64::new(0)),
        }
    }

    pub fn with_failure(mut self, error: CameraError) -> Self {
        self.failure = Some(error);
        self
    }

    /// Fail only acquisitions for `facing`
    pub fn with_facing_failure(mut self, facing: CameraFacing, error: CameraError) -> Self {
        self.failing_facing = Some((facing, error));
        self
    }

    pub fn with_acquire_delay(mut self, delay: Duration) -> Self {
        self.acquire_delay = delay;
        self
    }

    /// Number of captures per stream that report `NotReady` before frames flow
    pub fn with_not_ready_frames(mut self, frames: u32) -> Self {
        self.not_ready_frames = frames;
        self
    }

    /// Queue a failure for the next acquire only
    pub fn fail_next(&self, error: CameraError) {
        self.scripted.lock().push_back(error);
    }

    pub fn counters(&self) -> Arc<CameraCounters> {
        self.counters.clone()
    }
}

impl Default for SimulatedCamera {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Camera for SimulatedCamera {
    async fn acquire(&self, facing: CameraFacing) -> Result<Box<dyn CameraStream>, CameraError> {
        self.counters.attempts.fetch_add(1, Ordering::Relaxed);
        if !self.acquire_delay.is_zero() {
            tokio::time::sleep(self.acquire_delay).await;
        }

        if let Some(error) = self.scripted.lock().pop_front() {
            return Err(error);
        }
        if let Some(error) = &self.failure {
            return Err(error.clone());
        }
        if let Some((failing, error)) = &self.failing_facing {
            if *failing == facing {
                return Err(error.clone());
            }
        }
        // Single physical handle
        if self.counters.open_streams() > 0 {
            return Err(CameraError::DeviceBusy);
        }

        self.counters.acquired.fetch_add(1, Ordering::Relaxed);
        self.counters.open.fetch_add(1, Ordering::Relaxed);
        debug!(facing = %facing.as_str(), "simulated_camera_acquired");

        Ok(Box::new(SimulatedStream {
            facing,
            counters: self.counters.clone(),
            live: true,
            not_ready_remaining: self.not_ready_frames,
            frame_seq: self.frame_seq.clone(),
        }))
    }
}

struct SimulatedStream {
    facing: CameraFacing,
    counters: Arc<CameraCounters>,
    live: bool,
    not_ready_remaining: u32,
    frame_seq: Arc<AtomicU64>,
}

impl SimulatedStream {
    /// SOI marker, a text payload, EOI marker
    fn synthetic_jpeg(&self, seq: u64) -> Bytes {
        let payload = format!("{}:{}", self.facing.as_str(), seq);
        let mut buf = BytesMut::with_capacity(payload.len() + 4);
        buf.put_slice(&[0xFF, 0xD8]);
        buf.put_slice(payload.as_bytes());
        buf.put_slice(&[0xFF, 0xD9]);
        buf.freeze()
    }
}

impl CameraStream for SimulatedStream {
    fn facing(&self) -> CameraFacing {
        self.facing
    }

    fn is_live(&self) -> bool {
        self.live
    }

    fn capture_frame(&mut self) -> Result<Frame, FrameError> {
        if !self.live {
            return Err(FrameError::Ended);
        }
        if self.not_ready_remaining > 0 {
            self.not_ready_remaining -= 1;
            return Err(FrameError::NotReady);
        }
        let seq = self.frame_seq.fetch_add(1, Ordering::Relaxed);
        Ok(Frame { width: 640, height: 640, bytes: self.synthetic_jpeg(seq) })
    }

    fn release(&mut self) {
        if !self.live {
            return;
        }
        self.live = false;
        self.counters.released.fetch_add(1, Ordering::Relaxed);
        self.counters.open.fetch_sub(1, Ordering::Relaxed);
        debug!(facing = %self.facing.as_str(), "simulated_camera_released");
    }
}

impl Drop for SimulatedStream {
    fn drop(&mut self) {
        self.release();
    }
}
