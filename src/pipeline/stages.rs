//! Bodies of the built-in stages: load inputs, run the engine, write the table.

use crate::metrics::analytics::{
    course_profiles, course_race_metrics, rank_locations, summarize_athletes, AnalyticsError,
    AnalyticsResult, ConsistencyEngine, ConsistencyScope, CourseIndex, CourseTraitEngine,
    DifficultyEngine, FavorabilityEngine, MomentumEngine, RaceResult, StrokesGainedEngine,
    TierEngine, TopPerformanceEngine, TopScope, ZScoreEngine, ZScoreTable,
};
use crate::pipeline::stage::{StageContext, StageId, StageReport};
use crate::storage::{
    tables, AnalyticsStore, Database, DatabaseError, ResultFilter, TableRow, TableSpec, WriteMode,
};

/// Run one built-in stage on `db`.
pub(crate) fn run(id: StageId, db: &Database, ctx: &StageContext) -> AnalyticsResult<StageReport> {
    let cfg = &ctx.config;
    ctx.checkpoint()?;
    let rows_written = match id {
        StageId::RaceZScore => {
            let Some(results) = load_window(db, ctx, id)? else {
                return Ok(StageReport::default());
            };
            let rows = ZScoreEngine::new().compute(&results);
            write(db, ctx, &tables::race_z_score(), &rows, ctx.write_mode(true))?
        }
        StageId::PerformanceTiers => {
            let rows = TierEngine::new().compute(&load_all(db, ctx)?);
            write(db, ctx, &tables::performance_tiers(), &rows, WriteMode::Replace)?
        }
        StageId::HotStreak => {
            let (results, z) = load_scored(db, ctx)?;
            let rows = MomentumEngine::new().compute(&results, &z);
            write(db, ctx, &tables::hot_streaks(), &rows, WriteMode::Replace)?
        }
        StageId::ConsistencyCareer | StageId::ConsistencyYearly => {
            let (results, z) = load_scored(db, ctx)?;
            let (scope, spec) = if id == StageId::ConsistencyCareer {
                (ConsistencyScope::Career, tables::consistency_career())
            } else {
                (ConsistencyScope::Yearly, tables::consistency_yearly())
            };
            let rows = ConsistencyEngine::new().compute(&results, &z, scope);
            write(db, ctx, &spec, &rows, WriteMode::Replace)?
        }
        StageId::StrokesGained => {
            let Some(results) = load_window(db, ctx, id)? else {
                return Ok(StageReport::default());
            };
            let z = store(db).load_z_scores()?;
            let rows = gains(ctx).field_relative(&results, &z);
            write(db, ctx, &tables::strokes_gained(), &rows, ctx.write_mode(true))?
        }
        StageId::StrokesGainedCareer | StageId::StrokesGainedLocation => {
            let (results, z) = load_scored(db, ctx)?;
            let gained = gains(ctx).field_relative(&results, &z);
            let (rows, spec) = if id == StageId::StrokesGainedCareer {
                (
                    StrokesGainedEngine::career_summary(&gained),
                    tables::strokes_gained_career(),
                )
            } else {
                (
                    StrokesGainedEngine::location_summary(&gained),
                    tables::strokes_gained_location(),
                )
            };
            write(db, ctx, &spec, &rows, WriteMode::Replace)?
        }
        StageId::StrokesGainedBib => {
            let (results, z) = load_scored(db, ctx)?;
            let rows = gains(ctx).bib_relative(&results, &z, &|| ctx.is_cancelled())?;
            write(db, ctx, &tables::strokes_gained_bib_relative(), &rows, WriteMode::Replace)?
        }
        StageId::StrokesGainedBibLocation => {
            let (results, z) = load_scored(db, ctx)?;
            let bib = gains(ctx).bib_relative(&results, &z, &|| ctx.is_cancelled())?;
            let rows = StrokesGainedEngine::bib_location_summary(&bib);
            write(
                db,
                ctx,
                &tables::strokes_gained_bib_relative_location(),
                &rows,
                WriteMode::Replace,
            )?
        }
        StageId::TopPerformancesCareer | StageId::TopPerformancesYearly => {
            let (results, z) = load_scored(db, ctx)?;
            let (scope, spec) = if id == StageId::TopPerformancesCareer {
                (TopScope::Career, tables::top_performances_career())
            } else {
                (TopScope::Yearly, tables::top_performances_yearly())
            };
            let rows = TopPerformanceEngine::new().compute(&results, &z, scope);
            write(db, ctx, &spec, &rows, WriteMode::Replace)?
        }
        StageId::AthleteSummary => {
            let (results, z) = load_scored(db, ctx)?;
            let rows = summarize_athletes(&results, &z);
            write(db, ctx, &tables::athlete_summary(), &rows, WriteMode::Replace)?
        }
        StageId::CourseProfile => {
            let metrics = course_race_metrics(&db.load_race_details()?, &load_all(db, ctx)?);
            let rows = course_profiles(&metrics);
            write(db, ctx, &tables::course_profile(), &rows, WriteMode::Replace)?
        }
        StageId::HillDifficulty => {
            let metrics = course_race_metrics(&db.load_race_details()?, &load_all(db, ctx)?);
            let rows = DifficultyEngine::new(cfg.difficulty.clone()).compute(&metrics);
            write(db, ctx, &tables::hill_difficulty(), &rows, WriteMode::Replace)?
        }
        StageId::HillFavorability => {
            let rows = FavorabilityEngine::new(
                cfg.favorability.min_skier_count,
                cfg.favorability.ci_multiplier,
            )
            .compute(&load_all(db, ctx)?);
            write(db, ctx, &tables::hill_favorability(), &rows, WriteMode::Replace)?
        }
        StageId::LocationRanking => {
            let rows = rank_locations(&store(db).load_top_performances()?);
            write(db, ctx, &tables::location_ranking(), &rows, WriteMode::Replace)?
        }
        StageId::CourseRegression => {
            let (results, z) = load_scored(db, ctx)?;
            let courses = CourseIndex::new(store(db).load_course_features()?);
            let rows = traits(ctx).regress(&results, &z, &courses, &|| ctx.is_cancelled())?;
            write(db, ctx, &tables::course_regression(), &rows, WriteMode::Replace)?
        }
        StageId::CourseTraits => {
            let (results, z) = load_scored(db, ctx)?;
            let courses = CourseIndex::new(store(db).load_course_features()?);
            let rows = traits(ctx).bin_traits(&results, &z, &courses);
            write(db, ctx, &tables::course_trait(), &rows, WriteMode::Replace)?
        }
    };
    Ok(StageReport { rows_written })
}

fn store(db: &Database) -> AnalyticsStore<'_> {
    AnalyticsStore::new(db.connection())
}

fn gains(ctx: &StageContext) -> StrokesGainedEngine {
    StrokesGainedEngine::with_bib_range(ctx.config.strokes_gained.bib_range)
}

fn traits(ctx: &StageContext) -> CourseTraitEngine {
    CourseTraitEngine::new(
        ctx.config.course_traits.min_races,
        ctx.config.course_traits.bin_count,
    )
}

fn load_all(db: &Database, _ctx: &StageContext) -> AnalyticsResult<Vec<RaceResult>> {
    Ok(db.load_results(&ResultFilter::All)?)
}

/// Results plus the persisted z-scores.
fn load_scored(db: &Database, ctx: &StageContext) -> AnalyticsResult<(Vec<RaceResult>, ZScoreTable)> {
    let z = store(db).load_z_scores()?;
    Ok((load_all(db, ctx)?, z))
}

/// Results of the window's races, or all results on a full run. `None` when
/// the window holds no races.
fn load_window(
    db: &Database,
    ctx: &StageContext,
    id: StageId,
) -> AnalyticsResult<Option<Vec<RaceResult>>> {
    match ctx.window_races(id.supports_incremental()) {
        Some([]) => {
            tracing::info!("{}: no races in the update window", id);
            Ok(None)
        }
        Some(ids) => {
            let results = db.load_results(&ResultFilter::Races(ids.to_vec()))?;
            ctx.checkpoint()?;
            Ok(Some(results))
        }
        None => Ok(Some(load_all(db, ctx)?)),
    }
}

fn write<R: TableRow>(
    db: &Database,
    ctx: &StageContext,
    spec: &TableSpec,
    rows: &[R],
    mode: WriteMode,
) -> AnalyticsResult<usize> {
    ctx.checkpoint()?;
    store(db)
        .write_table(spec, rows, &mode, &ctx.last_updated, ctx)
        .map_err(|e| match e {
            DatabaseError::Interrupted(_) => AnalyticsError::Cancelled,
            other => AnalyticsError::Storage(other),
        })
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use uuid::Uuid;

    use super::*;
    use crate::pipeline::stage::{RunScope, Window};
    use crate::storage::AnalyticsConfig;

    fn seed(db: &Database) {
        db.connection()
            .execute_batch(
                "INSERT INTO race_details (race_id, location, country, discipline, date, homologation_number,
                                           vertical_drop, start_altitude, first_run_number_of_gates)
                 VALUES (1, 'Soelden', 'AUT', 'GS', '2024-10-27', 'H1', 400, 2600, 52),
                        (2, 'Soelden', 'AUT', 'GS', '2024-10-28', 'H1', 400, 2600, 50);
                 INSERT INTO fis_results (race_id, rank, bib, fis_code, name, final_time, fis_points)
                 VALUES (1, '1', '1', 'A', 'Athlete A', '1:10.00', '10'),
                        (1, '2', '2', 'B', 'Athlete B', '1:11.00', '20'),
                        (1, 'DNF1', '3', 'C', 'Athlete C', NULL, NULL),
                        (2, '1', '2', 'B', 'Athlete B', '1:09.50', '5'),
                        (2, '2', '1', 'A', 'Athlete A', '1:10.20', '15');",
            )
            .expect("seed");
    }

    fn context(scope: RunScope) -> StageContext {
        StageContext::new(
            Uuid::new_v4(),
            scope,
            Arc::new(AnalyticsConfig::default()),
            "2025-01-01 00:00:00".to_string(),
        )
    }

    #[test]
    fn test_phase_two_requires_z_scores() {
        let db = Database::open_in_memory().unwrap();
        seed(&db);
        let result = run(StageId::HotStreak, &db, &context(RunScope::Full));
        assert!(matches!(
            result,
            Err(AnalyticsError::Storage(DatabaseError::NotFound(_)))
        ));
    }

    #[test]
    fn test_z_scores_then_consistency() {
        let db = Database::open_in_memory().unwrap();
        seed(&db);
        let ctx = context(RunScope::Full);

        let report = run(StageId::RaceZScore, &db, &ctx).unwrap();
        assert_eq!(report.rows_written, 4);

        let report = run(StageId::ConsistencyCareer, &db, &ctx).unwrap();
        // A, B and C in GS
        assert_eq!(report.rows_written, 3);
    }

    #[test]
    fn test_empty_window_writes_nothing() {
        let db = Database::open_in_memory().unwrap();
        seed(&db);
        run(StageId::RaceZScore, &db, &context(RunScope::Full)).unwrap();

        let ctx = context(RunScope::Incremental(Window {
            from_date: None,
            race_ids: Vec::new(),
        }));
        let report = run(StageId::RaceZScore, &db, &ctx).unwrap();
        assert_eq!(report.rows_written, 0);
        assert_eq!(store(&db).count_rows("race_z_score").unwrap(), 4);
    }

    #[test]
    fn test_cancelled_stage_does_not_write() {
        let db = Database::open_in_memory().unwrap();
        seed(&db);
        let ctx = context(RunScope::Full);
        ctx.cancel();
        assert!(matches!(
            run(StageId::RaceZScore, &db, &ctx),
            Err(AnalyticsError::Cancelled)
        ));
        assert!(!db.table_exists("race_z_score").unwrap());
    }
}
