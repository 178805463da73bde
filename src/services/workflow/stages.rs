//! Stage helpers: command-aware waiting, frame capture and the camera guard

use super::{WorkflowCommand, WorkflowTimings};
use crate::domain::types::Frame;
use crate::io::{CameraError, CameraStream, FrameError};
use std::future::Future;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::debug;

/// Drive `fut` to completion unless the run is cancelled first.
///
/// Returns `None` on `Cancel` or when the command channel closes. Other
/// commands don't apply while a stage is in flight and are dropped.
pub(super) async fn until_cancelled<F: Future>(
    commands: &mut mpsc::Receiver<WorkflowCommand>,
    fut: F,
) -> Option<F::Output> {
    tokio::pin!(fut);
    loop {
        tokio::select! {
            biased;
            command = commands.recv() => match command {
                Some(WorkflowCommand::Cancel) | None => return None,
                Some(other) => debug!(command = %other.as_str(), "command_ignored"),
            },
            output = &mut fut => return Some(output),
        }
    }
}

/// Wait in a user-gated state for `wanted`. `false` means cancelled.
pub(super) async fn await_command(
    commands: &mut mpsc::Receiver<WorkflowCommand>,
    wanted: WorkflowCommand,
    state: &'static str,
) -> bool {
    loop {
        match commands.recv().await {
            Some(command) if command == wanted => return true,
            Some(WorkflowCommand::Cancel) | None => return false,
            Some(other) => debug!(command = %other.as_str(), state = %state, "command_ignored"),
        }
    }
}

/// Grab a still, polling while the video reports zero dimensions
pub(super) async fn capture_when_ready(
    stream: &mut dyn CameraStream,
    timings: &WorkflowTimings,
) -> Result<Frame, CameraError> {
    let deadline = Instant::now() + timings.frame_ready_timeout;
    let mut polls = 0u32;
    loop {
        match stream.capture_frame() {
            Ok(frame) => {
                if polls > 0 {
                    debug!(polls = %polls, facing = %stream.facing().as_str(), "frame_ready_after_poll");
                }
                return Ok(frame);
            }
            Err(FrameError::NotReady) if Instant::now() < deadline => {
                polls += 1;
                tokio::time::sleep(timings.frame_poll_interval).await;
            }
            Err(FrameError::NotReady) => return Err(CameraError::Timeout),
            Err(FrameError::Ended) => {
                return Err(CameraError::Unknown("stream ended before capture".to_string()))
            }
        }
    }
}

/// Owns the run's open stream; releases it on `release()` or drop
pub(super) struct StreamGuard {
    run_id: u64,
    stream: Option<Box<dyn CameraStream>>,
}

impl StreamGuard {
    pub(super) fn new(run_id: u64) -> Self {
        Self { run_id, stream: None }
    }

    /// Take ownership of a freshly acquired stream
    pub(super) fn hold(&mut self, stream: Box<dyn CameraStream>) {
        self.release();
        debug!(run_id = %self.run_id, facing = %stream.facing().as_str(), "camera_acquired");
        self.stream = Some(stream);
    }

    pub(super) fn stream_mut(&mut self) -> Result<&mut Box<dyn CameraStream>, CameraError> {
        self.stream
            .as_mut()
            .ok_or_else(|| CameraError::Unknown("no active camera stream".to_string()))
    }

    /// Stop all tracks of the held stream, if any. Idempotent.
    pub(super) fn release(&mut self) {
        if let Some(mut stream) = self.stream.take() {
            stream.release();
            debug!(run_id = %self.run_id, facing = %stream.facing().as_str(), "camera_released");
        }
    }

    #[cfg(test)]
    pub(super) fn is_holding(&self) -> bool {
        self.stream.is_some()
    }
}

impl Drop for StreamGuard {
    fn drop(&mut self) {
        self.release();
    }
}
