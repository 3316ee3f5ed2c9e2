//! A failing, panicking or hanging stage never stops its phase.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use alpine_analytics::metrics::analytics::{AnalyticsResult, RaceZScore};
use alpine_analytics::pipeline::{
    Orchestrator, RunMode, Selection, Stage, StageContext, StageFailure, StageRegistry,
    StageReport,
};
use alpine_analytics::storage::{tables, AnalyticsStore, Database, WriteMode};

use crate::common::{config_for, seed_season, separate_stores};

struct PanickingStage;

impl Stage for PanickingStage {
    fn name(&self) -> &str {
        "panics"
    }

    fn run(&self, _db: &Database, _ctx: &StageContext) -> AnalyticsResult<StageReport> {
        panic!("stage blew up");
    }
}

/// Sleeps past its timeout, then tries to write.
struct SlowStage;

impl Stage for SlowStage {
    fn name(&self) -> &str {
        "slow"
    }

    fn run(&self, db: &Database, ctx: &StageContext) -> AnalyticsResult<StageReport> {
        thread::sleep(Duration::from_millis(2500));
        let row = RaceZScore {
            race_id: 1,
            fis_code: "A".to_string(),
            name: "Athlete A".to_string(),
            race_z_score: 0.0,
        };
        let rows_written = AnalyticsStore::new(db.connection()).write_table(
            &tables::race_z_score(),
            &[row],
            &WriteMode::Replace,
            &ctx.last_updated,
            ctx,
        )?;
        Ok(StageReport { rows_written })
    }
}

struct QuickStage;

impl Stage for QuickStage {
    fn name(&self) -> &str {
        "quick"
    }

    fn run(&self, _db: &Database, _ctx: &StageContext) -> AnalyticsResult<StageReport> {
        Ok(StageReport { rows_written: 1 })
    }
}

/// Spins without ever looking at its cancel flag.
struct SpinningStage {
    running: Arc<AtomicBool>,
}

impl Stage for SpinningStage {
    fn name(&self) -> &str {
        "spinning"
    }

    fn run(&self, _db: &Database, _ctx: &StageContext) -> AnalyticsResult<StageReport> {
        self.running.store(true, Ordering::SeqCst);
        let started = Instant::now();
        while started.elapsed() < Duration::from_secs(3) {
            std::hint::spin_loop();
        }
        self.running.store(false, Ordering::SeqCst);
        Ok(StageReport::default())
    }
}

/// Records whether the spinning stage was still going when it started.
struct ObserverStage {
    running: Arc<AtomicBool>,
    overlapped: Arc<AtomicBool>,
}

impl Stage for ObserverStage {
    fn name(&self) -> &str {
        "observer"
    }

    fn run(&self, _db: &Database, _ctx: &StageContext) -> AnalyticsResult<StageReport> {
        self.overlapped
            .store(self.running.load(Ordering::SeqCst), Ordering::SeqCst);
        Ok(StageReport::default())
    }
}

#[test]
fn test_timed_out_stage_finishes_before_next_starts() {
    let (_dir, paths) = separate_stores();
    let mut config = config_for(&paths);
    config.pipeline.full_timeout_secs = 1;

    let running = Arc::new(AtomicBool::new(false));
    let overlapped = Arc::new(AtomicBool::new(false));
    let mut registry = StageRegistry::empty();
    registry.register(
        1,
        Arc::new(SpinningStage {
            running: Arc::clone(&running),
        }),
    );
    registry.register(
        1,
        Arc::new(ObserverStage {
            running: Arc::clone(&running),
            overlapped: Arc::clone(&overlapped),
        }),
    );

    let summary = Orchestrator::with_registry(Arc::new(paths.clone()), config, registry)
        .run(&Selection::All, &RunMode::Full)
        .unwrap();

    let stages = &summary.phases[0].stages;
    assert_eq!(
        stages[0].failure,
        Some(StageFailure::TimedOut(Duration::from_secs(1)))
    );
    assert!(stages[1].succeeded());
    assert!(!overlapped.load(Ordering::SeqCst));
}

#[test]
fn test_panic_and_timeout_are_isolated() {
    let (_dir, paths) = separate_stores();
    let mut config = config_for(&paths);
    config.pipeline.full_timeout_secs = 1;

    let mut registry = StageRegistry::empty();
    registry.register(1, Arc::new(PanickingStage));
    registry.register(1, Arc::new(SlowStage));
    registry.register(1, Arc::new(QuickStage));
    registry.register(2, Arc::new(QuickStage));

    let orchestrator = Orchestrator::with_registry(Arc::new(paths.clone()), config, registry);
    let summary = orchestrator.run(&Selection::All, &RunMode::Full).unwrap();

    let phase = &summary.phases[0];
    assert_eq!(phase.succeeded(), 1);
    assert_eq!(phase.stages[0].failure, Some(StageFailure::Panicked));
    assert_eq!(
        phase.stages[1].failure,
        Some(StageFailure::TimedOut(Duration::from_secs(1)))
    );
    assert!(phase.stages[2].succeeded());
    // later phases still run
    assert_eq!(summary.phases[1].succeeded(), 1);
    assert_eq!(summary.exit_code(), 1);

    // the timed-out stage was cancelled before it could commit
    let db = Database::open(&paths).unwrap();
    assert!(!db.table_exists("race_z_score").unwrap());
}

#[test]
fn test_phase_two_without_scores_reports_failures() {
    let (_dir, paths) = separate_stores();
    seed_season(&paths);

    let summary = Orchestrator::new(Arc::new(paths.clone()), config_for(&paths))
        .run(&Selection::Phase(2), &RunMode::Full)
        .unwrap();

    let phase = &summary.phases[0];
    assert_eq!(phase.stages.len(), 12);
    // performance tiers read raw points only
    let passed: Vec<&str> = phase
        .stages
        .iter()
        .filter(|s| s.succeeded())
        .map(|s| s.stage.as_str())
        .collect();
    assert_eq!(passed, vec!["performance-tiers"]);
    assert!(summary.failed().all(|s| matches!(
        &s.failure,
        Some(StageFailure::Error(msg)) if msg.contains("race_z_score")
    )));
    assert_eq!(summary.exit_code(), 1);
}
