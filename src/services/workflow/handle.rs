//! Task-backed handle for hosting pages
//!
//! `spawn_workflow` runs one checkpoint on a tokio task and hands back the
//! command sender and a state receiver scoped to that run. Dropping the handle
//! aborts the task; the run's camera guard releases any open stream when the
//! aborted future is dropped, and the run is published as `Cancelled`.
//!
//! A rejected run (another run holds the camera) publishes nothing, so the
//! waiters also watch a `done` flag the task raises when `run_as` returns.

use super::{CheckpointError, CheckpointWorkflow, RunOutcome, WorkflowCommand};
use crate::domain::types::{CheckpointConfig, WorkflowSnapshot, WorkflowState};
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::debug;

/// Buffered commands per run; user input is a handful of taps at most
const COMMAND_BUFFER: usize = 8;

pub struct WorkflowHandle {
    run_id: u64,
    commands: mpsc::Sender<WorkflowCommand>,
    states: watch::Receiver<WorkflowSnapshot>,
    /// `true` once the task returned; closed if it was aborted
    done: watch::Receiver<bool>,
    task: Option<JoinHandle<Result<RunOutcome, CheckpointError>>>,
}

/// Start a run of `workflow` with a config snapshot
pub fn spawn_workflow(workflow: Arc<CheckpointWorkflow>, config: CheckpointConfig) -> WorkflowHandle {
    let (commands, mut command_rx) = mpsc::channel(COMMAND_BUFFER);
    let states = workflow.subscribe();
    let run_id = workflow.allocate_run_id();
    let (done_tx, done) = watch::channel(false);

    let task = tokio::spawn(async move {
        let result = workflow.run_as(run_id, &config, &mut command_rx).await;
        done_tx.send_replace(true);
        result
    });

    WorkflowHandle { run_id, commands, states, done, task: Some(task) }
}

/// Resolves once the run's task has returned or been dropped
async fn finished(done: &mut watch::Receiver<bool>) {
    let _ = done.wait_for(|done| *done).await;
}

impl WorkflowHandle {
    pub fn run_id(&self) -> u64 {
        self.run_id
    }

    /// Latest state of this run; `Idle` until the task publishes
    pub fn state(&self) -> WorkflowState {
        let snapshot = self.states.borrow();
        if snapshot.run_id == self.run_id {
            snapshot.state.clone()
        } else {
            WorkflowState::Idle
        }
    }

    /// Raw receiver; snapshots from other runs carry a different run id
    pub fn states(&self) -> watch::Receiver<WorkflowSnapshot> {
        self.states.clone()
    }

    /// Wait for the next state of this run that satisfies `pred`.
    /// `None` once the run ended without reaching such a state.
    pub async fn wait_for(
        &mut self,
        mut pred: impl FnMut(&WorkflowState) -> bool,
    ) -> Option<WorkflowState> {
        let run_id = self.run_id;
        let reached = tokio::select! {
            biased;
            snapshot = self
                .states
                .wait_for(|s| s.run_id == run_id && (pred(&s.state) || s.state.is_terminal())) => {
                snapshot.ok().map(|s| s.state.clone())
            }
            _ = finished(&mut self.done) => None,
        };
        let state = match reached {
            Some(state) => state,
            None => {
                // The run may have published its last state just before returning
                let snapshot = self.states.borrow();
                if snapshot.run_id != run_id {
                    return None;
                }
                snapshot.state.clone()
            }
        };
        pred(&state).then_some(state)
    }

    /// Wait for the next state change of this run.
    /// `None` once the run has ended and its last state was seen.
    pub async fn changed(&mut self) -> Option<WorkflowState> {
        loop {
            let ended = tokio::select! {
                biased;
                changed = self.states.changed() => {
                    changed.ok()?;
                    false
                }
                _ = finished(&mut self.done) => true,
            };
            if ended && !self.states.has_changed().unwrap_or(false) {
                return None;
            }
            let snapshot = self.states.borrow_and_update();
            if snapshot.run_id == self.run_id {
                return Some(snapshot.state.clone());
            }
        }
    }

    async fn send(&self, command: WorkflowCommand) -> bool {
        let delivered = self.commands.send(command).await.is_ok();
        debug!(run_id = %self.run_id, command = %command.as_str(), delivered = %delivered, "command_sent");
        delivered
    }

    pub async fn capture(&self) -> bool {
        self.send(WorkflowCommand::Capture).await
    }

    pub async fn force_proceed(&self) -> bool {
        self.send(WorkflowCommand::ForceProceed).await
    }

    /// Cancel and wait until the run has released the camera and ended
    pub async fn cancel(self) -> Result<RunOutcome, CheckpointError> {
        self.send(WorkflowCommand::Cancel).await;
        self.join().await
    }

    /// Wait for the run to reach a terminal state
    pub async fn join(mut self) -> Result<RunOutcome, CheckpointError> {
        let Some(task) = self.task.take() else {
            return Err(CheckpointError::Aborted("run already joined".to_string()));
        };
        match task.await {
            Ok(result) => result,
            Err(e) if e.is_cancelled() => Ok(RunOutcome::Cancelled),
            Err(e) => Err(CheckpointError::Aborted(e.to_string())),
        }
    }
}

impl Drop for WorkflowHandle {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            if !task.is_finished() {
                debug!(run_id = %self.run_id, "workflow_handle_dropped");
            }
            task.abort();
        }
    }
}
