//! Runs phases of stages with per-stage isolation and timeouts.
//!
//! Each stage gets its own connection and its own worker thread. The
//! orchestrator waits for the stage's result on a channel; a stage that
//! errors, panics or overruns its timeout is recorded as failed and the
//! phase carries on with the next stage. A timed-out stage is cancelled and
//! joined before the next one starts, so stages never overlap.

use std::fmt;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use chrono::{Local, NaiveDate};
use crossbeam::channel::{bounded, RecvTimeoutError};
use serde::Serialize;
use uuid::Uuid;

use crate::metrics::analytics::AnalyticsResult;
use crate::pipeline::stage::{
    PhasePlan, RunScope, Selection, Stage, StageContext, StageRegistry, StageReport,
};
use crate::pipeline::window::WindowRequest;
use crate::pipeline::PipelineError;
use crate::storage::{
    AnalyticsConfig, AnalyticsStore, Database, DatabaseError, DatabasePaths, RunRecord,
};

/// Hands out fresh connections, one per stage.
pub trait ConnectionProvider: Send + Sync {
    fn connect(&self) -> Result<Database, DatabaseError>;
}

impl ConnectionProvider for DatabasePaths {
    fn connect(&self) -> Result<Database, DatabaseError> {
        Database::open(self)
    }
}

/// Full refresh or incremental update.
#[derive(Debug, Clone, PartialEq)]
pub enum RunMode {
    Full,
    Incremental(WindowRequest),
}

/// Why a stage did not succeed.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", content = "detail", rename_all = "snake_case")]
pub enum StageFailure {
    Error(String),
    TimedOut(Duration),
    Panicked,
}

impl fmt::Display for StageFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StageFailure::Error(msg) => write!(f, "{}", msg),
            StageFailure::TimedOut(limit) => write!(f, "timed out after {}s", limit.as_secs()),
            StageFailure::Panicked => write!(f, "panicked"),
        }
    }
}

/// Result of one stage.
#[derive(Debug, Clone, Serialize)]
pub struct StageOutcome {
    pub stage: String,
    pub rows_written: Option<usize>,
    pub duration_ms: u64,
    pub failure: Option<StageFailure>,
}

impl StageOutcome {
    pub fn succeeded(&self) -> bool {
        self.failure.is_none()
    }
}

/// Results of one phase.
#[derive(Debug, Clone, Serialize)]
pub struct PhaseSummary {
    pub phase: u8,
    pub stages: Vec<StageOutcome>,
}

impl PhaseSummary {
    pub fn succeeded(&self) -> usize {
        self.stages.iter().filter(|s| s.succeeded()).count()
    }
}

/// Results of a whole run.
#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    pub run_id: Uuid,
    pub mode: &'static str,
    pub from_date: Option<NaiveDate>,
    /// Races in the update window
    pub window_races: Option<usize>,
    pub phases: Vec<PhaseSummary>,
}

impl RunSummary {
    pub fn all_succeeded(&self) -> bool {
        self.phases.iter().all(|p| p.succeeded() == p.stages.len())
    }

    pub fn failed(&self) -> impl Iterator<Item = &StageOutcome> {
        self.phases.iter().flat_map(|p| &p.stages).filter(|s| !s.succeeded())
    }

    /// Process exit code: 0 only when every selected stage succeeded.
    pub fn exit_code(&self) -> u8 {
        if self.all_succeeded() {
            0
        } else {
            1
        }
    }
}

/// Drives phases of stages against the configured databases.
pub struct Orchestrator {
    provider: Arc<dyn ConnectionProvider>,
    registry: StageRegistry,
    config: Arc<AnalyticsConfig>,
}

impl Orchestrator {
    pub fn new(provider: Arc<dyn ConnectionProvider>, config: AnalyticsConfig) -> Self {
        Self::with_registry(provider, config, StageRegistry::builtin())
    }

    /// Orchestrator over a custom set of stages.
    pub fn with_registry(
        provider: Arc<dyn ConnectionProvider>,
        config: AnalyticsConfig,
        registry: StageRegistry,
    ) -> Self {
        Self {
            provider,
            registry,
            config: Arc::new(config),
        }
    }

    pub fn registry(&self) -> &StageRegistry {
        &self.registry
    }

    /// Run the selected stages.
    ///
    /// Only setup problems are errors: an unknown selection, an unresolvable
    /// window or an unreachable database. Stage failures are reported in the
    /// summary.
    pub fn run(&self, selection: &Selection, mode: &RunMode) -> Result<RunSummary, PipelineError> {
        let plans = self.registry.select(selection)?;
        let control = self.provider.connect()?;

        let scope = match mode {
            RunMode::Full => RunScope::Full,
            RunMode::Incremental(request) => {
                RunScope::Incremental(request.resolve(&control, Local::now().date_naive())?)
            }
        };

        let run_id = Uuid::new_v4();
        let ctx = StageContext::new(
            run_id,
            scope.clone(),
            Arc::clone(&self.config),
            Local::now().format("%Y-%m-%d %H:%M:%S").to_string(),
        );
        let timeout = self.config.pipeline.timeout(scope.is_incremental());

        tracing::info!(
            "Starting {} run {} ({} phases)",
            scope.mode_name(),
            run_id,
            plans.len()
        );

        let mut phases = Vec::with_capacity(plans.len());
        for plan in plans {
            let summary = self.run_phase(&plan, &ctx, timeout);
            for outcome in &summary.stages {
                self.record(&control, &ctx, outcome);
            }
            tracing::info!(
                "Phase {}: {} of {} stages succeeded",
                summary.phase,
                summary.succeeded(),
                summary.stages.len()
            );
            phases.push(summary);
        }

        Ok(RunSummary {
            run_id,
            mode: scope.mode_name(),
            from_date: scope.from_date(),
            window_races: match &scope {
                RunScope::Full => None,
                RunScope::Incremental(w) => Some(w.race_ids.len()),
            },
            phases,
        })
    }

    fn run_phase(&self, plan: &PhasePlan, ctx: &StageContext, timeout: Duration) -> PhaseSummary {
        let stages = plan
            .stages
            .iter()
            .map(|stage| self.run_stage(Arc::clone(stage), ctx.for_stage(), timeout))
            .collect();
        PhaseSummary {
            phase: plan.phase,
            stages,
        }
    }

    fn run_stage(&self, stage: Arc<dyn Stage>, ctx: StageContext, timeout: Duration) -> StageOutcome {
        let name = stage.name().to_string();
        let started = Instant::now();
        tracing::info!("Stage {} started", name);

        let result = self.execute(stage, &ctx, timeout);
        let duration_ms = started.elapsed().as_millis() as u64;

        match result {
            Ok(report) => {
                tracing::info!(
                    "Stage {} wrote {} rows in {} ms",
                    name,
                    report.rows_written,
                    duration_ms
                );
                StageOutcome {
                    stage: name,
                    rows_written: Some(report.rows_written),
                    duration_ms,
                    failure: None,
                }
            }
            Err(failure) => {
                tracing::warn!("Stage {} failed: {}", name, failure);
                StageOutcome {
                    stage: name,
                    rows_written: None,
                    duration_ms,
                    failure: Some(failure),
                }
            }
        }
    }

    /// Run a stage on a worker thread and wait at most `timeout` for it.
    fn execute(
        &self,
        stage: Arc<dyn Stage>,
        ctx: &StageContext,
        timeout: Duration,
    ) -> Result<StageReport, StageFailure> {
        let db = self
            .provider
            .connect()
            .map_err(|e| StageFailure::Error(e.to_string()))?;
        let interrupt = db.interrupt_handle();
        let name = stage.name().to_string();

        let (tx, rx) = bounded::<AnalyticsResult<StageReport>>(1);
        let worker_ctx = ctx.clone();
        let worker_name = name.clone();
        let worker = thread::Builder::new()
            .name(format!("stage-{}", name))
            .spawn(move || {
                let result = stage.run(&db, &worker_ctx);
                if tx.send(result).is_err() {
                    tracing::warn!("Stage {} finished but its result was dropped", worker_name);
                }
            })
            .map_err(|e| StageFailure::Error(format!("failed to spawn worker: {}", e)))?;

        let outcome = match rx.recv_timeout(timeout) {
            Ok(result) => stage_result(result),
            Err(RecvTimeoutError::Disconnected) => Err(StageFailure::Panicked),
            Err(RecvTimeoutError::Timeout) if ctx.cancel() => {
                interrupt.interrupt();
                tracing::warn!(
                    "Stage {} exceeded {}s, waiting for it to stop",
                    name,
                    timeout.as_secs()
                );
                let _ = worker.join();
                if let Ok(late) = rx.try_recv() {
                    match late {
                        Ok(report) => tracing::warn!(
                            "Stage {} finished after its timeout ({} rows discarded)",
                            name,
                            report.rows_written
                        ),
                        Err(e) => tracing::warn!("Stage {} stopped after its timeout: {}", name, e),
                    }
                }
                return Err(StageFailure::TimedOut(timeout));
            }
            Err(RecvTimeoutError::Timeout) => {
                // the stage claimed its commit first; its result stands
                tracing::info!("Stage {} is committing past its timeout", name);
                rx.recv()
                    .map_err(|_| StageFailure::Panicked)
                    .and_then(stage_result)
            }
        };

        if worker.join().is_err() {
            tracing::debug!("Stage {} worker panicked", name);
        }
        outcome
    }

    fn record(&self, control: &Database, ctx: &StageContext, outcome: &StageOutcome) {
        let error = outcome.failure.as_ref().map(|f| f.to_string());
        let finished_at = Local::now().format("%Y-%m-%d %H:%M:%S").to_string();
        let record = RunRecord {
            run_id: ctx.run_id,
            stage: &outcome.stage,
            mode: ctx.scope.mode_name(),
            from_date: ctx.scope.from_date(),
            status: if outcome.succeeded() { "success" } else { "failed" },
            rows_written: outcome.rows_written,
            duration_ms: outcome.duration_ms,
            error: error.as_deref(),
            finished_at: &finished_at,
        };
        if let Err(e) = AnalyticsStore::new(control.connection()).record_run(&record) {
            tracing::warn!("Could not record stage {}: {}", outcome.stage, e);
        }
    }
}

fn stage_result(result: AnalyticsResult<StageReport>) -> Result<StageReport, StageFailure> {
    result.map_err(|e| StageFailure::Error(e.to_string()))
}
