//! Stage identities, the stage trait and the phase registry.

use std::fmt;
use std::str::FromStr;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;

use chrono::NaiveDate;
use uuid::Uuid;

use crate::metrics::analytics::{AnalyticsError, AnalyticsResult};
use crate::pipeline::{stages, PipelineError};
use crate::storage::{AnalyticsConfig, Database, WriteGuard, WriteMode};

/// Every built-in stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StageId {
    RaceZScore,
    PerformanceTiers,
    HotStreak,
    ConsistencyCareer,
    ConsistencyYearly,
    StrokesGained,
    StrokesGainedCareer,
    StrokesGainedLocation,
    StrokesGainedBib,
    StrokesGainedBibLocation,
    TopPerformancesCareer,
    TopPerformancesYearly,
    AthleteSummary,
    CourseProfile,
    HillDifficulty,
    HillFavorability,
    LocationRanking,
    CourseRegression,
    CourseTraits,
}

impl StageId {
    /// Built-in stages in execution order.
    pub const ALL: [StageId; 19] = [
        StageId::RaceZScore,
        StageId::PerformanceTiers,
        StageId::HotStreak,
        StageId::ConsistencyCareer,
        StageId::ConsistencyYearly,
        StageId::StrokesGained,
        StageId::StrokesGainedCareer,
        StageId::StrokesGainedLocation,
        StageId::StrokesGainedBib,
        StageId::StrokesGainedBibLocation,
        StageId::TopPerformancesCareer,
        StageId::TopPerformancesYearly,
        StageId::AthleteSummary,
        StageId::CourseProfile,
        StageId::HillDifficulty,
        StageId::HillFavorability,
        StageId::LocationRanking,
        StageId::CourseRegression,
        StageId::CourseTraits,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            StageId::RaceZScore => "race-z-score",
            StageId::PerformanceTiers => "performance-tiers",
            StageId::HotStreak => "hot-streak",
            StageId::ConsistencyCareer => "consistency-career",
            StageId::ConsistencyYearly => "consistency-yearly",
            StageId::StrokesGained => "strokes-gained",
            StageId::StrokesGainedCareer => "strokes-gained-career",
            StageId::StrokesGainedLocation => "strokes-gained-location",
            StageId::StrokesGainedBib => "strokes-gained-bib",
            StageId::StrokesGainedBibLocation => "strokes-gained-bib-location",
            StageId::TopPerformancesCareer => "top-performances-career",
            StageId::TopPerformancesYearly => "top-performances-yearly",
            StageId::AthleteSummary => "athlete-summary",
            StageId::CourseProfile => "course-profile",
            StageId::HillDifficulty => "hill-difficulty",
            StageId::HillFavorability => "hill-favorability",
            StageId::LocationRanking => "location-ranking",
            StageId::CourseRegression => "course-regression",
            StageId::CourseTraits => "course-traits",
        }
    }

    /// Phase 1 scores races, phase 2 derives athlete features, phase 3 course features.
    pub fn phase(&self) -> u8 {
        match self {
            StageId::RaceZScore => 1,
            StageId::CourseProfile
            | StageId::HillDifficulty
            | StageId::HillFavorability
            | StageId::LocationRanking
            | StageId::CourseRegression
            | StageId::CourseTraits => 3,
            _ => 2,
        }
    }

    /// Whether the stage can limit itself to the races of a window.
    pub fn supports_incremental(&self) -> bool {
        matches!(self, StageId::RaceZScore | StageId::StrokesGained)
    }
}

impl fmt::Display for StageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for StageId {
    type Err = PipelineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        StageId::ALL
            .iter()
            .copied()
            .find(|id| id.name() == s)
            .ok_or_else(|| PipelineError::UnknownStage(s.to_string()))
    }
}

/// Races an incremental run covers.
#[derive(Debug, Clone, PartialEq)]
pub struct Window {
    /// Start date, when the window was resolved from a date
    pub from_date: Option<NaiveDate>,
    pub race_ids: Vec<i64>,
}

/// What a run recomputes.
#[derive(Debug, Clone, PartialEq)]
pub enum RunScope {
    Full,
    Incremental(Window),
}

impl RunScope {
    pub fn is_incremental(&self) -> bool {
        matches!(self, RunScope::Incremental(_))
    }

    pub fn mode_name(&self) -> &'static str {
        match self {
            RunScope::Full => "full",
            RunScope::Incremental(_) => "incremental",
        }
    }

    pub fn from_date(&self) -> Option<NaiveDate> {
        match self {
            RunScope::Full => None,
            RunScope::Incremental(w) => w.from_date,
        }
    }
}

const RUNNING: u8 = 0;
const COMMITTING: u8 = 1;
const CANCELLED: u8 = 2;

/// Everything a stage gets besides its connection.
#[derive(Debug, Clone)]
pub struct StageContext {
    pub run_id: Uuid,
    pub scope: RunScope,
    pub config: Arc<AnalyticsConfig>,
    /// Local time stamped on every written row
    pub last_updated: String,
    /// RUNNING until the stage either claims its commit or is cancelled
    state: Arc<AtomicU8>,
}

impl StageContext {
    pub fn new(
        run_id: Uuid,
        scope: RunScope,
        config: Arc<AnalyticsConfig>,
        last_updated: String,
    ) -> Self {
        Self {
            run_id,
            scope,
            config,
            last_updated,
            state: Arc::new(AtomicU8::new(RUNNING)),
        }
    }

    /// Copy for one stage execution, with its own cancel state.
    pub fn for_stage(&self) -> Self {
        Self {
            state: Arc::new(AtomicU8::new(RUNNING)),
            ..self.clone()
        }
    }

    /// Cancel the stage unless it has already started committing.
    ///
    /// Returns false when a commit won the race; the stage's own result
    /// then stands.
    pub fn cancel(&self) -> bool {
        match self
            .state
            .compare_exchange(RUNNING, CANCELLED, Ordering::SeqCst, Ordering::SeqCst)
        {
            Ok(_) => true,
            Err(current) => current == CANCELLED,
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.state.load(Ordering::SeqCst) == CANCELLED
    }

    /// Claim the right to commit. Fails once the stage has been cancelled;
    /// after it succeeds, `cancel` has no effect.
    pub fn begin_commit(&self) -> bool {
        self.state
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |s| {
                (s != CANCELLED).then_some(COMMITTING)
            })
            .is_ok()
    }

    /// `Err(Cancelled)` once the stage has been cancelled.
    pub fn checkpoint(&self) -> AnalyticsResult<()> {
        if self.is_cancelled() {
            Err(AnalyticsError::Cancelled)
        } else {
            Ok(())
        }
    }

    /// Race ids to restrict to, when the stage honours the window.
    pub fn window_races(&self, incremental: bool) -> Option<&[i64]> {
        match &self.scope {
            RunScope::Incremental(w) if incremental => Some(&w.race_ids),
            _ => None,
        }
    }

    /// Write mode for a stage's output table.
    pub fn write_mode(&self, incremental: bool) -> WriteMode {
        match self.window_races(incremental) {
            Some(ids) => WriteMode::ReplaceRaces(ids.to_vec()),
            None => WriteMode::Replace,
        }
    }
}

impl WriteGuard for StageContext {
    fn aborted(&self) -> bool {
        self.is_cancelled()
    }

    fn begin_commit(&self) -> bool {
        StageContext::begin_commit(self)
    }
}

/// Result of a successful stage.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StageReport {
    pub rows_written: usize,
}

/// A unit of work the orchestrator can run.
pub trait Stage: Send + Sync {
    fn name(&self) -> &str;

    fn supports_incremental(&self) -> bool {
        false
    }

    fn run(&self, db: &Database, ctx: &StageContext) -> AnalyticsResult<StageReport>;
}

/// A built-in stage.
#[derive(Debug, Clone, Copy)]
pub struct BuiltinStage(pub StageId);

impl Stage for BuiltinStage {
    fn name(&self) -> &str {
        self.0.name()
    }

    fn supports_incremental(&self) -> bool {
        self.0.supports_incremental()
    }

    fn run(&self, db: &Database, ctx: &StageContext) -> AnalyticsResult<StageReport> {
        stages::run(self.0, db, ctx)
    }
}

/// Which stages a run selects.
#[derive(Debug, Clone, PartialEq)]
pub enum Selection {
    All,
    Phase(u8),
    Stage(String),
}

/// Stages of one phase, in order.
#[derive(Clone)]
pub struct PhasePlan {
    pub phase: u8,
    pub stages: Vec<Arc<dyn Stage>>,
}

/// Ordered phases of stages.
#[derive(Clone, Default)]
pub struct StageRegistry {
    phases: Vec<PhasePlan>,
}

impl StageRegistry {
    /// Registry without any stages.
    pub fn empty() -> Self {
        Self::default()
    }

    /// All built-in stages in their phases.
    pub fn builtin() -> Self {
        let mut registry = Self::empty();
        for id in StageId::ALL {
            registry.register(id.phase(), Arc::new(BuiltinStage(id)));
        }
        registry
    }

    /// Append a stage to a phase, creating the phase if needed.
    pub fn register(&mut self, phase: u8, stage: Arc<dyn Stage>) {
        match self.phases.iter_mut().find(|p| p.phase == phase) {
            Some(plan) => plan.stages.push(stage),
            None => {
                self.phases.push(PhasePlan {
                    phase,
                    stages: vec![stage],
                });
                self.phases.sort_by_key(|p| p.phase);
            }
        }
    }

    pub fn phases(&self) -> &[PhasePlan] {
        &self.phases
    }

    /// Phases and stages a selection runs.
    pub fn select(&self, selection: &Selection) -> Result<Vec<PhasePlan>, PipelineError> {
        match selection {
            Selection::All => Ok(self.phases.clone()),
            Selection::Phase(n) => self
                .phases
                .iter()
                .find(|p| p.phase == *n)
                .cloned()
                .map(|p| vec![p])
                .ok_or(PipelineError::UnknownPhase(*n)),
            Selection::Stage(name) => self
                .phases
                .iter()
                .find_map(|p| {
                    p.stages.iter().find(|s| s.name() == name).map(|s| PhasePlan {
                        phase: p.phase,
                        stages: vec![Arc::clone(s)],
                    })
                })
                .map(|p| vec![p])
                .ok_or_else(|| PipelineError::UnknownStage(name.clone())),
        }
    }
}
