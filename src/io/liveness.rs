//! Liveness verification capability
//!
//! The workflow asks a `LivenessVerifier` for a verdict on the live stream after
//! the challenge prompt has been shown. `TimedLivenessVerifier` is the stand-in
//! used until a biometric vendor or model is wired in: it waits a fixed time and
//! passes any stream that is still live.

use crate::domain::types::LivenessAction;
use crate::io::camera::CameraStream;
use async_trait::async_trait;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LivenessVerdict {
    Pass,
    Fail,
    Inconclusive,
}

impl LivenessVerdict {
    pub fn as_str(&self) -> &'static str {
        match self {
            LivenessVerdict::Pass => "pass",
            LivenessVerdict::Fail => "fail",
            LivenessVerdict::Inconclusive => "inconclusive",
        }
    }
}

impl std::str::FromStr for LivenessVerdict {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pass" => Ok(LivenessVerdict::Pass),
            "fail" => Ok(LivenessVerdict::Fail),
            "inconclusive" => Ok(LivenessVerdict::Inconclusive),
            other => Err(format!("unknown liveness verdict '{other}'")),
        }
    }
}

#[async_trait]
pub trait LivenessVerifier: Send + Sync {
    async fn verify(&self, stream: &mut dyn CameraStream, action: LivenessAction)
        -> LivenessVerdict;
}

/// Fixed-duration verifier: no action detection, passes a live stream
pub struct TimedLivenessVerifier {
    duration: Duration,
    verdict: LivenessVerdict,
}

impl TimedLivenessVerifier {
    pub fn new(duration: Duration) -> Self {
        Self { duration, verdict: LivenessVerdict::Pass }
    }

    /// Verdict to report for a live stream
    pub fn with_verdict(mut self, verdict: LivenessVerdict) -> Self {
        self.verdict = verdict;
        self
    }
}

#[async_trait]
impl LivenessVerifier for TimedLivenessVerifier {
    async fn verify(
        &self,
        stream: &mut dyn CameraStream,
        _action: LivenessAction,
    ) -> LivenessVerdict {
        tokio::time::sleep(self.duration).await;
        if stream.is_live() {
            self.verdict
        } else {
            LivenessVerdict::Fail
        }
    }
}
