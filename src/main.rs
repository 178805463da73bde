//! Checkpoint Flow - field-force checkpoint verification CLI
//!
//! Runs one checkpoint (selfie, optional liveness, optional plate photo,
//! location check) against simulated collaborators and applies the result to
//! the JSON record store.
//!
//! Module structure:
//! - `domain/` - Checkpoint types, distance evaluation, stored records
//! - `io/` - Collaborators (camera, geolocation, liveness, place, store)
//! - `services/` - Workflow state machine, checkpoint profiles, field operations
//! - `infra/` - Infrastructure (Config, Metrics)

use chrono::NaiveDate;
use checkpoint_flow::domain::records::{ClaimReceipt, LeaveType, TourStatus};
use checkpoint_flow::domain::types::{CheckpointResult, Coordinate, WorkflowState};
use checkpoint_flow::infra::{Config, Metrics};
use checkpoint_flow::io::{
    JsonFileStore, SimulatedCamera, SimulatedGeolocator, SimulatedPlaceResolver,
    TimedLivenessVerifier,
};
use checkpoint_flow::services::{
    spawn_workflow, CheckpointKind, CheckpointWorkflow, FieldOps, NewSite, RunOutcome, TourDraft,
};
use clap::{Parser, Subcommand, ValueEnum};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};
use tracing_subscriber::fmt::time::UtcTime;
use tracing_subscriber::EnvFilter;

/// Checkpoint Flow - verified check-ins for field staff
#[derive(Parser, Debug)]
#[command(name = "checkpoint-flow", version, about)]
struct Args {
    /// Path to TOML configuration file
    #[arg(short, long, global = true, default_value = "config/dev.toml")]
    config: String,

    /// Accept a fix outside the allowed radius instead of cancelling
    #[arg(long, global = true)]
    force: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Punch in, or punch out when already punched in
    Punch,
    /// Start a tour with a selfie and a vehicle plate photo
    TourStart {
        #[arg(long)]
        task: String,
        #[arg(long)]
        to: String,
        #[arg(long, requires = "to_lng")]
        to_lat: Option<f64>,
        #[arg(long, requires = "to_lat")]
        to_lng: Option<f64>,
    },
    /// Next checkpoint of an in-progress tour (arrival, return, end)
    TourAdvance {
        #[arg(long)]
        id: String,
        /// Define the destination as a new site on arrival
        #[arg(long)]
        site_name: Option<String>,
        #[arg(long, default_value = "Client Site")]
        site_category: String,
    },
    SessionStart {
        #[arg(long)]
        id: String,
    },
    SessionEnd {
        #[arg(long)]
        id: String,
        #[arg(long, default_value = "")]
        remarks: String,
    },
    /// Request a cash advance for an upcoming or in-progress tour
    Advance {
        #[arg(long)]
        id: String,
        #[arg(long)]
        amount: f64,
        #[arg(long)]
        reason: String,
    },
    /// Claim travel and expenses for a completed tour
    Claim {
        #[arg(long)]
        id: String,
        /// Expense as CATEGORY:AMOUNT[:DESCRIPTION], repeatable
        #[arg(long = "receipt", value_parser = parse_receipt)]
        receipts: Vec<ClaimReceipt>,
    },
    /// Mark a due claim as paid
    SettleClaim {
        #[arg(long)]
        id: String,
    },
    /// Apply for leave
    Leave {
        #[arg(long, value_enum)]
        kind: LeaveKind,
        #[arg(long)]
        from: NaiveDate,
        #[arg(long)]
        to: NaiveDate,
        #[arg(long)]
        reason: String,
    },
    /// Show attendance, tours, notifications and audit counts
    Status {
        #[arg(long)]
        mark_all_read: bool,
    },
}

#[derive(ValueEnum, Clone, Copy, Debug)]
enum LeaveKind {
    Casual,
    Sick,
    Earned,
}

impl From<LeaveKind> for LeaveType {
    fn from(kind: LeaveKind) -> Self {
        match kind {
            LeaveKind::Casual => LeaveType::Casual,
            LeaveKind::Sick => LeaveType::Sick,
            LeaveKind::Earned => LeaveType::Earned,
        }
    }
}

fn parse_receipt(raw: &str) -> Result<ClaimReceipt, String> {
    let mut parts = raw.splitn(3, ':');
    let category = parts.next().unwrap_or_default().trim();
    if category.is_empty() {
        return Err("missing category".to_string());
    }
    let amount = parts
        .next()
        .ok_or_else(|| "missing amount".to_string())?
        .trim()
        .parse::<f64>()
        .map_err(|e| format!("invalid amount: {e}"))?;
    Ok(ClaimReceipt {
        category: category.to_string(),
        amount,
        description: parts.next().unwrap_or_default().trim().to_string(),
        receipt_url: None,
    })
}

enum Step {
    State(Option<WorkflowState>),
    Interrupted,
}

struct App {
    workflow: Arc<CheckpointWorkflow>,
    ops: FieldOps,
    allowed_radius_m: f64,
    force: bool,
}

impl App {
    /// Drive one run to a terminal state, answering prompts from the CLI flags.
    /// `None` when the run was cancelled or failed.
    async fn checkpoint(
        &self,
        kind: CheckpointKind,
        target: Option<Coordinate>,
    ) -> anyhow::Result<Option<CheckpointResult>> {
        let config = kind.config(target, self.allowed_radius_m);
        info!(kind = %kind, target = ?config.radius_target(), "checkpoint_requested");

        let mut handle = spawn_workflow(self.workflow.clone(), config);
        let ctrl_c = tokio::signal::ctrl_c();
        tokio::pin!(ctrl_c);

        loop {
            let step = tokio::select! {
                state = handle.changed() => Step::State(state),
                _ = &mut ctrl_c => Step::Interrupted,
            };
            match step {
                Step::State(None) => break,
                Step::State(Some(state)) => match state {
                    WorkflowState::CameraReady | WorkflowState::SecondaryCapturing => {
                        handle.capture().await;
                    }
                    WorkflowState::LivenessChallenge { action } => {
                        info!(prompt = %action.prompt(), "liveness_prompt");
                    }
                    WorkflowState::LocationMismatchWarning { distance_m } => {
                        if self.force {
                            warn!(kind = %kind, distance_m = %distance_m, "forcing_checkpoint");
                            handle.force_proceed().await;
                        } else {
                            warn!(
                                kind = %kind,
                                distance_m = %distance_m,
                                radius_m = %self.allowed_radius_m,
                                "outside_radius_cancelling"
                            );
                            handle.cancel().await?;
                            return Ok(None);
                        }
                    }
                    s if s.is_terminal() => break,
                    _ => {}
                },
                Step::Interrupted => {
                    warn!(kind = %kind, "interrupted");
                    handle.cancel().await?;
                    return Ok(None);
                }
            }
        }

        match handle.join().await {
            Ok(RunOutcome::Completed(result)) => Ok(Some(result)),
            Ok(RunOutcome::Cancelled) => Ok(None),
            Err(e) => {
                let reason = e.reason();
                warn!(kind = %kind, reason = %reason.as_str(), message = %reason.user_message(), "checkpoint_failed");
                self.ops.record_failure(kind, reason)?;
                Ok(None)
            }
        }
    }

    async fn execute(&self, command: Command) -> anyhow::Result<()> {
        match command {
            Command::Punch => {
                let kind = self.ops.punch_kind()?;
                if let Some(result) = self.checkpoint(kind, None).await? {
                    let state = self.ops.apply_punch(&result).await?;
                    println!(
                        "{}: in {} / out {} at {}",
                        kind,
                        state.punch_in_time.as_deref().unwrap_or("-"),
                        state.punch_out_time.as_deref().unwrap_or("-"),
                        state.location.as_deref().unwrap_or("unknown location"),
                    );
                }
            }
            Command::TourStart { task, to, to_lat, to_lng } => {
                let mut draft = TourDraft::ad_hoc(&task, &to);
                if let (Some(lat), Some(lng)) = (to_lat, to_lng) {
                    draft.to_coordinates = Coordinate::new(lat, lng);
                }
                if let Some(result) = self.checkpoint(CheckpointKind::TourStart, None).await? {
                    let tour = self.ops.start_tour(draft, &result).await?;
                    println!("{} started: {} -> {}", tour.id, tour.from_location, tour.to_location);
                }
            }
            Command::TourAdvance { id, site_name, site_category } => {
                let (kind, target) = self.ops.tour_checkpoint(&id)?;
                let new_site = site_name.map(|name| NewSite { name, category: site_category });
                if let Some(result) = self.checkpoint(kind, target).await? {
                    let tour = self.ops.advance_tour(&id, &result, new_site).await?;
                    match (tour.status, tour.distance_covered) {
                        (TourStatus::Completed, Some(km)) => {
                            println!("{} completed, {:.1} km covered", tour.id, km)
                        }
                        _ => println!("{} {}", tour.id, kind),
                    }
                }
            }
            Command::SessionStart { id } => {
                let venue = self.ops.session_venue(&id)?;
                if let Some(result) = self.checkpoint(CheckpointKind::SessionStart, Some(venue)).await? {
                    let session = self.ops.start_session(&id, &result)?;
                    println!("{} started: {}", session.id, session.topic);
                }
            }
            Command::SessionEnd { id, remarks } => {
                if let Some(result) = self.checkpoint(CheckpointKind::SessionEnd, None).await? {
                    let session = self.ops.end_session(&id, &result, &remarks)?;
                    println!("{} completed", session.id);
                }
            }
            Command::Advance { id, amount, reason } => {
                let tour = self.ops.request_advance(&id, amount, &reason)?;
                println!("{} advance requested, {:.2} total", tour.id, tour.advance_amount.unwrap_or(0.0));
            }
            Command::Claim { id, receipts } => {
                let (tour, summary) = self.ops.submit_claim(&id, receipts)?;
                println!(
                    "{} claimed: {:.1} km x {:.2} = {:.2} travel, {} receipts, {:.2} due",
                    tour.id,
                    summary.distance_km,
                    summary.rate_per_km,
                    summary.travel_amount,
                    summary.receipts.len(),
                    summary.total,
                );
            }
            Command::SettleClaim { id } => {
                let tour = self.ops.settle_claim(&id)?;
                println!("{} paid {:.2}", tour.id, tour.claim_amount.unwrap_or(0.0));
            }
            Command::Leave { kind, from, to, reason } => {
                let request = self.ops.apply_leave(kind.into(), from, to, &reason)?;
                println!("{} pending ({} days)", request.id, request.days());
            }
            Command::Status { mark_all_read } => self.print_status(mark_all_read)?,
        }
        Ok(())
    }

    fn print_status(&self, mark_all_read: bool) -> anyhow::Result<()> {
        let repos = self.ops.repositories();
        let attendance = repos.attendance.state()?;
        println!(
            "attendance: {:?} (in {}, out {})",
            attendance.status,
            attendance.punch_in_time.as_deref().unwrap_or("-"),
            attendance.punch_out_time.as_deref().unwrap_or("-"),
        );
        for tour in repos.tours.all()?.iter().filter(|t| t.status == TourStatus::InProgress) {
            let phase = tour.tour_phase.map(|p| p.as_str()).unwrap_or("-");
            println!("tour {}: {} [{}]", tour.id, tour.to_location, phase);
        }
        for n in self.ops.notifications()?.iter().filter(|n| !n.read) {
            println!("notification {}: {}", n.id, n.title);
        }
        println!(
            "audit: {} applied, {} overridden, {} failed",
            repos.audit.entries()?.len(),
            repos.audit.overrides()?.len(),
            repos.audit.failures()?.len(),
        );
        if mark_all_read {
            let marked = self.ops.mark_all_notifications_read()?;
            info!(marked = %marked, "notifications_marked_read");
        }
        Ok(())
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize structured logging with configurable level via RUST_LOG env var
    // Default: INFO, use RUST_LOG=debug for every state transition
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_timer(UtcTime::rfc_3339())
        .with_target(false)
        .init();

    let args = Args::parse();
    let config = Config::load_from_path(&args.config);

    info!(
        version = %env!("CARGO_PKG_VERSION"),
        git_hash = %env!("GIT_HASH"),
        config_file = %config.config_file(),
        storage_dir = %config.storage_dir(),
        allowed_radius_m = %config.allowed_radius_m(),
        sim_fix = %config.sim_fix(),
        "config_loaded"
    );

    let mut camera = SimulatedCamera::new();
    if let Some(failure) = config.sim_camera_failure() {
        camera = camera.with_failure(failure.to_error());
    }
    let mut geolocator = SimulatedGeolocator::new(config.sim_fix());
    if let Some(failure) = config.sim_location_failure() {
        geolocator = geolocator.with_failure(failure.to_error());
    }
    let liveness = TimedLivenessVerifier::new(Duration::from_millis(config.liveness_verify_ms()))
        .with_verdict(config.sim_liveness_verdict());

    let metrics = Arc::new(Metrics::new());
    let workflow = Arc::new(CheckpointWorkflow::new(
        Arc::new(camera),
        Arc::new(geolocator),
        Arc::new(liveness),
        config.workflow_timings(),
        metrics.clone(),
    ));
    let ops = FieldOps::new(
        Arc::new(JsonFileStore::new(config.storage_dir())),
        Arc::new(SimulatedPlaceResolver),
    );

    let app = App { workflow, ops, allowed_radius_m: config.allowed_radius_m(), force: args.force };
    let result = app.execute(args.command).await;

    if config.log_metrics_summary() {
        metrics.summary().log();
    }
    result
}
