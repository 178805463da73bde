//! Configuration loading from TOML files
//!
//! Config file is selected via:
//! 1. --config <path> command line argument
//! 2. CONFIG_FILE environment variable
//! 3. Default: config/dev.toml
//!
//! Every section and field is optional; missing values take the defaults below.

use crate::domain::types::{Coordinate, DEFAULT_ALLOWED_RADIUS_M};
use crate::io::{CameraError, LivenessVerdict, LocationError};
use crate::services::workflow::WorkflowTimings;
use anyhow::Context;
use serde::Deserialize;
use std::env;
use std::fs;
use std::path::Path;
use std::time::Duration;

#[derive(Debug, Clone, Deserialize)]
pub struct CameraConfig {
    #[serde(default = "default_acquire_timeout_ms")]
    pub acquire_timeout_ms: u64,
    /// How long a live stream may report zero-dimension video before capture fails
    #[serde(default = "default_frame_ready_timeout_ms")]
    pub frame_ready_timeout_ms: u64,
    #[serde(default = "default_frame_poll_interval_ms")]
    pub frame_poll_interval_ms: u64,
}

fn default_acquire_timeout_ms() -> u64 {
    15_000
}

fn default_frame_ready_timeout_ms() -> u64 {
    5_000
}

fn default_frame_poll_interval_ms() -> u64 {
    100
}

impl Default for CameraConfig {
    fn default() -> Self {
        Self {
            acquire_timeout_ms: default_acquire_timeout_ms(),
            frame_ready_timeout_ms: default_frame_ready_timeout_ms(),
            frame_poll_interval_ms: default_frame_poll_interval_ms(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct LivenessConfig {
    /// Time the challenge prompt is shown before verification starts
    #[serde(default = "default_challenge_ms")]
    pub challenge_ms: u64,
    #[serde(default = "default_verify_ms")]
    pub verify_ms: u64,
}

fn default_challenge_ms() -> u64 {
    3_000
}

fn default_verify_ms() -> u64 {
    1_500
}

impl Default for LivenessConfig {
    fn default() -> Self {
        Self { challenge_ms: default_challenge_ms(), verify_ms: default_verify_ms() }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct LocationConfig {
    #[serde(default = "default_fix_timeout_ms")]
    pub fix_timeout_ms: u64,
    #[serde(default = "default_allowed_radius_m")]
    pub allowed_radius_m: f64,
}

fn default_fix_timeout_ms() -> u64 {
    10_000
}

fn default_allowed_radius_m() -> f64 {
    DEFAULT_ALLOWED_RADIUS_M
}

impl Default for LocationConfig {
    fn default() -> Self {
        Self { fix_timeout_ms: default_fix_timeout_ms(), allowed_radius_m: default_allowed_radius_m() }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct StorageConfig {
    /// Directory holding one JSON document per collection
    #[serde(default = "default_storage_dir")]
    pub dir: String,
}

fn default_storage_dir() -> String {
    "data".to_string()
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self { dir: default_storage_dir() }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct MetricsConfig {
    #[serde(default = "default_log_summary")]
    pub log_summary: bool,
}

fn default_log_summary() -> bool {
    true
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self { log_summary: default_log_summary() }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SimulatedCameraFailure {
    PermissionDenied,
    DeviceBusy,
    NotFound,
}

impl SimulatedCameraFailure {
    pub fn to_error(&self) -> CameraError {
        match self {
            SimulatedCameraFailure::PermissionDenied => CameraError::PermissionDenied,
            SimulatedCameraFailure::DeviceBusy => CameraError::DeviceBusy,
            SimulatedCameraFailure::NotFound => CameraError::NotFound,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SimulatedLocationFailure {
    PermissionDenied,
    Timeout,
    Unavailable,
}

impl SimulatedLocationFailure {
    pub fn to_error(&self) -> LocationError {
        match self {
            SimulatedLocationFailure::PermissionDenied => LocationError::PermissionDenied,
            SimulatedLocationFailure::Timeout => LocationError::Timeout,
            SimulatedLocationFailure::Unavailable => LocationError::Unavailable,
        }
    }
}

/// Behavior of the simulated collaborators the CLI drives
#[derive(Debug, Clone, Deserialize, Default)]
pub struct SimulationConfig {
    #[serde(default)]
    pub fix_lat: f64,
    #[serde(default)]
    pub fix_lng: f64,
    #[serde(default)]
    pub camera_failure: Option<SimulatedCameraFailure>,
    #[serde(default)]
    pub location_failure: Option<SimulatedLocationFailure>,
    #[serde(default = "default_liveness_verdict")]
    pub liveness_verdict: String,
}

fn default_liveness_verdict() -> String {
    "pass".to_string()
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct TomlConfig {
    #[serde(default)]
    pub camera: CameraConfig,
    #[serde(default)]
    pub liveness: LivenessConfig,
    #[serde(default)]
    pub location: LocationConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub metrics: MetricsConfig,
    #[serde(default)]
    pub simulation: SimulationConfig,
}

/// Main configuration struct used throughout the application
#[derive(Debug, Clone)]
pub struct Config {
    camera_acquire_timeout_ms: u64,
    frame_ready_timeout_ms: u64,
    frame_poll_interval_ms: u64,
    liveness_challenge_ms: u64,
    liveness_verify_ms: u64,
    location_fix_timeout_ms: u64,
    allowed_radius_m: f64,
    storage_dir: String,
    log_metrics_summary: bool,
    sim_fix: Coordinate,
    sim_camera_failure: Option<SimulatedCameraFailure>,
    sim_location_failure: Option<SimulatedLocationFailure>,
    sim_liveness_verdict: LivenessVerdict,
    config_file: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            camera_acquire_timeout_ms: default_acquire_timeout_ms(),
            frame_ready_timeout_ms: default_frame_ready_timeout_ms(),
            frame_poll_interval_ms: default_frame_poll_interval_ms(),
            liveness_challenge_ms: default_challenge_ms(),
            liveness_verify_ms: default_verify_ms(),
            location_fix_timeout_ms: default_fix_timeout_ms(),
            allowed_radius_m: default_allowed_radius_m(),
            storage_dir: default_storage_dir(),
            log_metrics_summary: default_log_summary(),
            sim_fix: Coordinate::UNSET,
            sim_camera_failure: None,
            sim_location_failure: None,
            sim_liveness_verdict: LivenessVerdict::Pass,
            config_file: "default".to_string(),
        }
    }
}

impl Config {
    /// Determine config file path from args or environment
    pub fn resolve_config_path(args: &[String]) -> String {
        // Check for --config argument
        for (i, arg) in args.iter().enumerate() {
            if arg == "--config" {
                if let Some(path) = args.get(i + 1) {
                    return path.clone();
                }
            }
            if let Some(path) = arg.strip_prefix("--config=") {
                return path.to_string();
            }
        }

        // Check CONFIG_FILE environment variable
        if let Ok(path) = env::var("CONFIG_FILE") {
            return path;
        }

        "config/dev.toml".to_string()
    }

    /// Load configuration from a TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        Self::from_toml_str(&content)
            .with_context(|| format!("Failed to parse config file {}", path.display()))
            .map(|mut config| {
                config.config_file = path.display().to_string();
                config
            })
    }

    fn from_toml_str(content: &str) -> anyhow::Result<Self> {
        let toml_config: TomlConfig = toml::from_str(content)?;
        let sim = toml_config.simulation;
        let sim_liveness_verdict = sim
            .liveness_verdict
            .parse::<LivenessVerdict>()
            .map_err(anyhow::Error::msg)
            .context("Invalid simulation.liveness_verdict")?;

        Ok(Self {
            camera_acquire_timeout_ms: toml_config.camera.acquire_timeout_ms,
            frame_ready_timeout_ms: toml_config.camera.frame_ready_timeout_ms,
            frame_poll_interval_ms: toml_config.camera.frame_poll_interval_ms,
            liveness_challenge_ms: toml_config.liveness.challenge_ms,
            liveness_verify_ms: toml_config.liveness.verify_ms,
            location_fix_timeout_ms: toml_config.location.fix_timeout_ms,
            allowed_radius_m: toml_config.location.allowed_radius_m,
            storage_dir: toml_config.storage.dir,
            log_metrics_summary: toml_config.metrics.log_summary,
            sim_fix: Coordinate::new(sim.fix_lat, sim.fix_lng),
            sim_camera_failure: sim.camera_failure,
            sim_location_failure: sim.location_failure,
            sim_liveness_verdict,
            config_file: "inline".to_string(),
        })
    }

    /// Load configuration - tries TOML file first, falls back to defaults
    pub fn load(args: &[String]) -> Self {
        Self::load_from_path(&Self::resolve_config_path(args))
    }

    /// Load from an explicit path, falling back to defaults on any error
    pub fn load_from_path(path: &str) -> Self {
        match Self::from_file(path) {
            Ok(config) => config,
            Err(e) => {
                tracing::warn!(path = %path, error = %format!("{e:#}"), "config_defaults_used");
                Self::default()
            }
        }
    }

    /// Timings consumed by the checkpoint state machine
    pub fn workflow_timings(&self) -> WorkflowTimings {
        WorkflowTimings {
            camera_acquire_timeout: Duration::from_millis(self.camera_acquire_timeout_ms),
            frame_ready_timeout: Duration::from_millis(self.frame_ready_timeout_ms),
            frame_poll_interval: Duration::from_millis(self.frame_poll_interval_ms.max(1)),
            liveness_challenge: Duration::from_millis(self.liveness_challenge_ms),
            location_fix_timeout: Duration::from_millis(self.location_fix_timeout_ms),
        }
    }

    pub fn camera_acquire_timeout_ms(&self) -> u64 {
        self.camera_acquire_timeout_ms
    }

    pub fn frame_ready_timeout_ms(&self) -> u64 {
        self.frame_ready_timeout_ms
    }

    pub fn frame_poll_interval_ms(&self) -> u64 {
        self.frame_poll_interval_ms
    }

    pub fn liveness_challenge_ms(&self) -> u64 {
        self.liveness_challenge_ms
    }

    pub fn liveness_verify_ms(&self) -> u64 {
        self.liveness_verify_ms
    }

    pub fn location_fix_timeout_ms(&self) -> u64 {
        self.location_fix_timeout_ms
    }

    pub fn allowed_radius_m(&self) -> f64 {
        self.allowed_radius_m
    }

    pub fn storage_dir(&self) -> &str {
        &self.storage_dir
    }

    pub fn log_metrics_summary(&self) -> bool {
        self.log_metrics_summary
    }

    pub fn sim_fix(&self) -> Coordinate {
        self.sim_fix
    }

    pub fn sim_camera_failure(&self) -> Option<&SimulatedCameraFailure> {
        self.sim_camera_failure.as_ref()
    }

    pub fn sim_location_failure(&self) -> Option<&SimulatedLocationFailure> {
        self.sim_location_failure.as_ref()
    }

    pub fn sim_liveness_verdict(&self) -> LivenessVerdict {
        self.sim_liveness_verdict
    }

    pub fn config_file(&self) -> &str {
        &self.config_file
    }

    /// Builder method for tests to shorten the liveness stage
    #[cfg(test)]
    pub fn with_liveness_ms(mut self, challenge_ms: u64, verify_ms: u64) -> Self {
        self.liveness_challenge_ms = challenge_ms;
        self.liveness_verify_ms = verify_ms;
        self
    }
}
