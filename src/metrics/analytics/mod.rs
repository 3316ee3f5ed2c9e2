//! Feature engines for race analytics.
//!
//! Each engine turns race results (and, where needed, the canonical race
//! z-scores) into the rows of one or more derived tables:
//! - Race z-score
//! - Performance tiers
//! - Hot-streak momentum
//! - Performance consistency
//! - Strokes gained (field and bib relative)
//! - Top performances
//! - Athlete career summary
//! - Course profiles and hill difficulty
//! - Hill favorability and course ranking
//! - Course trait regression and bucketing

pub mod athlete_summary;
pub mod consistency;
pub mod course_traits;
pub mod difficulty;
pub mod error;
pub mod favorability;
pub mod location_ranking;
pub mod momentum;
pub mod results;
pub mod strokes_gained;
pub mod tiers;
pub mod top_performances;
pub mod z_score;

// Re-exports for convenience
pub use athlete_summary::{summarize_athletes, AthleteSummary};
pub use consistency::{Consistency, ConsistencyEngine, ConsistencyScope};
pub use course_traits::{
    CourseFeatures, CourseIndex, CourseTrait, CourseTraitEngine, TraitBin, TraitCoefficient,
};
pub use difficulty::{
    course_profiles, course_race_metrics, CourseProfile, CourseRaceMetrics, DifficultyEngine,
    DifficultyWeights, HillDifficulty,
};
pub use error::{AnalyticsError, AnalyticsResult};
pub use favorability::{FavorabilityEngine, HillFavorability};
pub use location_ranking::{rank_locations, LocationRanking};
pub use momentum::{HotStreak, MomentumEngine};
pub use results::{AthleteKey, RaceDetail, RaceResult, ZScoreTable};
pub use strokes_gained::{BibRelative, GainSummary, StrokesGained, StrokesGainedEngine};
pub use tiers::{PerformanceTier, TierEngine};
pub use top_performances::{TopPerformance, TopPerformanceEngine, TopScope};
pub use z_score::{RaceZScore, ZScoreEngine};
