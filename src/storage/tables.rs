//! Derived table layouts and the row mapping of every feature type.
//!
//! A [`TableSpec`] lists a table's columns; a [`TableRow`] names the values
//! of one row. Rows may carry more fields than a table stores (career and
//! yearly variants share one row type), and the writer picks the table's
//! columns by name. Every table also gets a trailing `last_updated` column
//! filled by the writer.

use chrono::NaiveDate;
use rusqlite::types::Value;

use crate::metrics::analytics::{
    AthleteSummary, BibRelative, Consistency, CourseProfile, GainSummary, HillDifficulty,
    HillFavorability, HotStreak, LocationRanking, PerformanceTier, RaceZScore, StrokesGained,
    TopPerformance, TraitBin, TraitCoefficient,
};
use crate::metrics::analytics::difficulty::PROFILE_ETL_VERSION;
use crate::metrics::stats::ColumnSummary;

/// SQLite column affinity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SqlType {
    Integer,
    Real,
    Text,
}

impl SqlType {
    pub fn as_sql(&self) -> &'static str {
        match self {
            SqlType::Integer => "INTEGER",
            SqlType::Real => "REAL",
            SqlType::Text => "TEXT",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Column {
    pub name: String,
    pub sql_type: SqlType,
}

/// Layout of one derived table.
#[derive(Debug, Clone, PartialEq)]
pub struct TableSpec {
    pub name: &'static str,
    pub columns: Vec<Column>,
    /// Rows carry a `race_id` and can be replaced race by race
    pub race_keyed: bool,
}

impl TableSpec {
    fn new(name: &'static str, columns: &[(&str, SqlType)]) -> Self {
        Self {
            name,
            columns: columns
                .iter()
                .map(|(n, t)| Column {
                    name: n.to_string(),
                    sql_type: *t,
                })
                .collect(),
            race_keyed: false,
        }
    }

    fn race_keyed(mut self) -> Self {
        self.race_keyed = true;
        self
    }

    fn with(mut self, columns: Vec<(String, SqlType)>) -> Self {
        self.columns.extend(
            columns
                .into_iter()
                .map(|(name, sql_type)| Column { name, sql_type }),
        );
        self
    }

    pub fn column_names(&self) -> impl Iterator<Item = &str> {
        self.columns.iter().map(|c| c.name.as_str())
    }
}

/// Named values of one output row.
pub trait TableRow {
    fn fields(&self) -> Vec<(String, Value)>;
}

pub(crate) fn real(v: impl Into<Option<f64>>) -> Value {
    match v.into() {
        Some(x) if x.is_finite() => Value::Real(x),
        _ => Value::Null,
    }
}

pub(crate) fn int(v: i64) -> Value {
    Value::Integer(v)
}

pub(crate) fn string(v: &str) -> Value {
    Value::Text(v.to_string())
}

pub(crate) fn text(v: Option<&str>) -> Value {
    v.map(|s| Value::Text(s.to_string())).unwrap_or(Value::Null)
}

pub(crate) fn date(d: NaiveDate) -> Value {
    Value::Text(d.format("%Y-%m-%d").to_string())
}

macro_rules! fields {
    ($($name:literal => $value:expr),* $(,)?) => {
        vec![$(($name.to_string(), $value)),*]
    };
}

use SqlType::{Integer as I, Real as R, Text as T};

fn summary_columns(prefix: &str, with_spread: bool) -> Vec<(String, SqlType)> {
    let stats: &[&str] = if with_spread {
        &["min", "max", "mean", "median", "std", "cv"]
    } else {
        &["min", "max", "mean", "std"]
    };
    stats.iter().map(|s| (format!("{}_{}", s, prefix), R)).collect()
}

fn summary_fields(prefix: &str, s: &ColumnSummary) -> Vec<(String, Value)> {
    vec![
        (format!("min_{}", prefix), real(s.min)),
        (format!("max_{}", prefix), real(s.max)),
        (format!("mean_{}", prefix), real(s.mean)),
        (format!("median_{}", prefix), real(s.median)),
        (format!("std_{}", prefix), real(s.std)),
        (format!("cv_{}", prefix), real(s.cv)),
    ]
}

// ---------- specs ----------

pub fn race_z_score() -> TableSpec {
    TableSpec::new(
        "race_z_score",
        &[("race_id", I), ("fis_code", T), ("name", T), ("race_z_score", R)],
    )
    .race_keyed()
}

pub fn performance_tiers() -> TableSpec {
    TableSpec::new(
        "performance_tiers",
        &[
            ("fis_code", T),
            ("name", T),
            ("discipline", T),
            ("year", I),
            ("race_count", I),
            ("avg_fis_points", R),
            ("log_avg_fis_points", R),
            ("tier", T),
        ],
    )
}

pub fn hot_streaks() -> TableSpec {
    TableSpec::new(
        "hot_streaks",
        &[
            ("race_id", I),
            ("fis_code", T),
            ("name", T),
            ("fis_points", R),
            ("rank", T),
            ("date", T),
            ("discipline", T),
            ("race_z_score", R),
            ("ewma_race_z", R),
            ("ewstd_race_z", R),
            ("momentum_z", R),
            ("ewma_fis", R),
            ("ewstd_fis", R),
            ("momentum_fis", R),
            ("rolling_race_z", R),
            ("race_count", I),
        ],
    )
}

const CONSISTENCY_METRICS: [(&str, SqlType); 12] = [
    ("race_count", I),
    ("mean_fis", R),
    ("std_fis", R),
    ("mean_race_z_score", R),
    ("std_race_z_score", R),
    ("dnf_count", I),
    ("dnf_rate", R),
    ("max_dnf_streak", I),
    ("cv_fis", R),
    ("cv_race_z", R),
    ("bounce_back_score", R),
    ("bounce_back_z_score", R),
];

pub fn consistency_career() -> TableSpec {
    TableSpec::new(
        "performance_consistency_career",
        &[("fis_code", T), ("name", T), ("discipline", T)],
    )
    .with(metric_columns(&CONSISTENCY_METRICS))
}

pub fn consistency_yearly() -> TableSpec {
    TableSpec::new(
        "performance_consistency_yearly",
        &[("fis_code", T), ("name", T), ("discipline", T), ("year", I)],
    )
    .with(metric_columns(&CONSISTENCY_METRICS))
}

fn metric_columns(cols: &[(&str, SqlType)]) -> Vec<(String, SqlType)> {
    cols.iter().map(|(n, t)| (n.to_string(), *t)).collect()
}

pub fn strokes_gained() -> TableSpec {
    TableSpec::new(
        "strokes_gained",
        &[
            ("race_id", I),
            ("fis_code", T),
            ("name", T),
            ("fis_points", R),
            ("date", T),
            ("location", T),
            ("homologation_number", T),
            ("discipline", T),
            ("avg_fis_points", R),
            ("points_gained", R),
            ("race_z_score", R),
        ],
    )
    .race_keyed()
}

const GAIN_METRICS: [(&str, SqlType); 5] = [
    ("race_count", I),
    ("mean_points_gained", R),
    ("std_points_gained", R),
    ("mean_race_z_score", R),
    ("std_race_z_score", R),
];

pub fn strokes_gained_career() -> TableSpec {
    TableSpec::new(
        "strokes_gained_career",
        &[("fis_code", T), ("name", T), ("discipline", T)],
    )
    .with(metric_columns(&GAIN_METRICS))
}

pub fn strokes_gained_location() -> TableSpec {
    TableSpec::new(
        "strokes_gained_location",
        &[
            ("fis_code", T),
            ("name", T),
            ("discipline", T),
            ("homologation_number", T),
            ("location", T),
        ],
    )
    .with(metric_columns(&GAIN_METRICS))
}

pub fn strokes_gained_bib_relative() -> TableSpec {
    TableSpec::new(
        "strokes_gained_bib_relative",
        &[
            ("race_id", I),
            ("fis_code", T),
            ("name", T),
            ("fis_points", R),
            ("bib", R),
            ("date", T),
            ("location", T),
            ("homologation_number", T),
            ("discipline", T),
            ("race_type", T),
            ("race_z_score", R),
            ("local_avg_fis_points", R),
            ("bib_strokes_gained", R),
            ("local_avg_race_z_score", R),
            ("bib_zscore_delta", R),
        ],
    )
}

pub fn strokes_gained_bib_relative_location() -> TableSpec {
    strokes_gained_location_named("strokes_gained_bib_relative_location").with(vec![
        ("mean_bib_zscore_delta".to_string(), R),
        ("std_bib_zscore_delta".to_string(), R),
    ])
}

fn strokes_gained_location_named(name: &'static str) -> TableSpec {
    TableSpec {
        name,
        ..strokes_gained_location()
    }
}

const TOP_COLUMNS: [(&str, SqlType); 10] = [
    ("race_id", I),
    ("fis_code", T),
    ("name", T),
    ("fis_points", R),
    ("rank", T),
    ("date", T),
    ("location", T),
    ("homologation_number", T),
    ("discipline", T),
    ("race_z_score", R),
];

pub fn top_performances_career() -> TableSpec {
    TableSpec::new("top_3_performances_career", &TOP_COLUMNS)
}

pub fn top_performances_yearly() -> TableSpec {
    TableSpec::new("top_3_performances_yearly", &TOP_COLUMNS).with(vec![("year".to_string(), I)])
}

pub fn athlete_summary() -> TableSpec {
    TableSpec::new(
        "basic_athlete_info_career",
        &[("fis_code", T), ("name", T), ("discipline", T), ("race_count", I)],
    )
    .with(summary_columns("fis_points", false))
    .with(summary_columns("bib", false))
    .with(summary_columns("rank", false))
    .with(vec![("dnf_rate".to_string(), R), ("dnf_count".to_string(), I)])
    .with(summary_columns("race_z_score", false))
}

pub fn course_profile() -> TableSpec {
    let mut spec = TableSpec::new(
        "basic_hill_info",
        &[
            ("location", T),
            ("homologation_number", T),
            ("discipline", T),
            ("country", T),
            ("race_count", I),
        ],
    );
    for metric in PROFILE_METRICS {
        spec = spec.with(summary_columns(metric, true));
    }
    spec.with(vec![("etl_version".to_string(), T)])
}

const PROFILE_METRICS: [&str; 7] = [
    "vertical_drop",
    "start_altitude",
    "gate_count",
    "winning_time",
    "fis_points",
    "dnf_rate",
    "starters",
];

pub fn hill_difficulty() -> TableSpec {
    TableSpec::new(
        "hdi",
        &[
            ("location", T),
            ("country", T),
            ("discipline", T),
            ("homologation_number", T),
            ("race_count", I),
            ("avg_winning_time", T),
            ("winning_time_norm", R),
            ("avg_gate_count", R),
            ("gate_count_norm", R),
            ("avg_start_altitude", R),
            ("start_altitude_norm", R),
            ("avg_vertical_drop", R),
            ("vertical_drop_norm", R),
            ("avg_dnf_rate", R),
            ("dnf_rate_norm", R),
            ("hill_difficulty_index", R),
        ],
    )
}

pub fn hill_favorability() -> TableSpec {
    TableSpec::new(
        "hill_favorability_analysis",
        &[
            ("location", T),
            ("country", T),
            ("homologation_number", T),
            ("discipline", T),
            ("avg_performance_delta", R),
            ("std_performance_delta", R),
            ("skier_count", I),
            ("ci_lower", R),
            ("ci_upper", R),
        ],
    )
}

pub fn location_ranking() -> TableSpec {
    TableSpec::new(
        "location_zscore_ranking",
        &[
            ("location", T),
            ("discipline", T),
            ("homologation_number", T),
            ("mean_z_score", R),
            ("performance_count", I),
            ("rank", I),
        ],
    )
}

pub fn course_regression() -> TableSpec {
    TableSpec::new(
        "course_regression",
        &[
            ("fis_code", T),
            ("name", T),
            ("discipline", T),
            ("trait", T),
            ("coefficient", R),
            ("r_squared", R),
            ("race_count", I),
        ],
    )
}

pub fn course_trait() -> TableSpec {
    TableSpec::new(
        "course_trait",
        &[
            ("fis_code", T),
            ("name", T),
            ("discipline", T),
            ("trait", T),
            ("trait_bin", T),
            ("avg_performance_delta", R),
            ("avg_z_score", R),
            ("race_count", I),
        ],
    )
}

// ---------- rows ----------

impl TableRow for RaceZScore {
    fn fields(&self) -> Vec<(String, Value)> {
        fields! {
            "race_id" => int(self.race_id),
            "fis_code" => string(&self.fis_code),
            "name" => string(&self.name),
            "race_z_score" => real(self.race_z_score),
        }
    }
}

impl TableRow for PerformanceTier {
    fn fields(&self) -> Vec<(String, Value)> {
        fields! {
            "fis_code" => string(&self.fis_code),
            "name" => string(&self.name),
            "discipline" => string(&self.discipline),
            "year" => int(self.year as i64),
            "race_count" => int(self.race_count),
            "avg_fis_points" => real(self.avg_fis_points),
            "log_avg_fis_points" => real(self.log_avg_fis_points),
            "tier" => text(self.tier),
        }
    }
}

impl TableRow for HotStreak {
    fn fields(&self) -> Vec<(String, Value)> {
        fields! {
            "race_id" => int(self.race_id),
            "fis_code" => string(&self.fis_code),
            "name" => string(&self.name),
            "fis_points" => real(self.fis_points),
            "rank" => text(self.rank.as_deref()),
            "date" => date(self.date),
            "discipline" => string(&self.discipline),
            "race_z_score" => real(self.race_z_score),
            "ewma_race_z" => real(self.ewma_race_z),
            "ewstd_race_z" => real(self.ewstd_race_z),
            "momentum_z" => real(self.momentum_z),
            "ewma_fis" => real(self.ewma_fis),
            "ewstd_fis" => real(self.ewstd_fis),
            "momentum_fis" => real(self.momentum_fis),
            "rolling_race_z" => real(self.rolling_race_z),
            "race_count" => int(self.race_count),
        }
    }
}

impl TableRow for Consistency {
    fn fields(&self) -> Vec<(String, Value)> {
        fields! {
            "fis_code" => string(&self.fis_code),
            "name" => string(&self.name),
            "discipline" => string(&self.discipline),
            "year" => self.year.map(|y| int(y as i64)).unwrap_or(Value::Null),
            "race_count" => int(self.race_count),
            "mean_fis" => real(self.mean_fis),
            "std_fis" => real(self.std_fis),
            "mean_race_z_score" => real(self.mean_race_z_score),
            "std_race_z_score" => real(self.std_race_z_score),
            "dnf_count" => int(self.dnf_count),
            "dnf_rate" => real(self.dnf_rate),
            "max_dnf_streak" => int(self.max_dnf_streak),
            "cv_fis" => real(self.cv_fis),
            "cv_race_z" => real(self.cv_race_z),
            "bounce_back_score" => real(self.bounce_back_score),
            "bounce_back_z_score" => real(self.bounce_back_z_score),
        }
    }
}

impl TableRow for StrokesGained {
    fn fields(&self) -> Vec<(String, Value)> {
        fields! {
            "race_id" => int(self.race_id),
            "fis_code" => string(&self.fis_code),
            "name" => string(&self.name),
            "fis_points" => real(self.fis_points),
            "date" => date(self.date),
            "location" => text(self.location.as_deref()),
            "homologation_number" => text(self.homologation_number.as_deref()),
            "discipline" => string(&self.discipline),
            "avg_fis_points" => real(self.avg_fis_points),
            "points_gained" => real(self.points_gained),
            "race_z_score" => real(self.race_z_score),
        }
    }
}

impl TableRow for GainSummary {
    fn fields(&self) -> Vec<(String, Value)> {
        fields! {
            "fis_code" => string(&self.fis_code),
            "name" => string(&self.name),
            "discipline" => string(&self.discipline),
            "homologation_number" => text(self.homologation_number.as_deref()),
            "location" => text(self.location.as_deref()),
            "race_count" => int(self.race_count),
            "mean_points_gained" => real(self.mean_points_gained),
            "std_points_gained" => real(self.std_points_gained),
            "mean_race_z_score" => real(self.mean_race_z_score),
            "std_race_z_score" => real(self.std_race_z_score),
            "mean_bib_zscore_delta" => real(self.mean_bib_zscore_delta),
            "std_bib_zscore_delta" => real(self.std_bib_zscore_delta),
        }
    }
}

impl TableRow for BibRelative {
    fn fields(&self) -> Vec<(String, Value)> {
        fields! {
            "race_id" => int(self.race_id),
            "fis_code" => string(&self.fis_code),
            "name" => string(&self.name),
            "fis_points" => real(self.fis_points),
            "bib" => real(self.bib),
            "date" => date(self.date),
            "location" => text(self.location.as_deref()),
            "homologation_number" => text(self.homologation_number.as_deref()),
            "discipline" => string(&self.discipline),
            "race_type" => text(self.race_type.as_deref()),
            "race_z_score" => real(self.race_z_score),
            "local_avg_fis_points" => real(self.local_avg_fis_points),
            "bib_strokes_gained" => real(self.bib_strokes_gained),
            "local_avg_race_z_score" => real(self.local_avg_race_z_score),
            "bib_zscore_delta" => real(self.bib_zscore_delta),
        }
    }
}

impl TableRow for TopPerformance {
    fn fields(&self) -> Vec<(String, Value)> {
        fields! {
            "race_id" => int(self.race_id),
            "fis_code" => string(&self.fis_code),
            "name" => string(&self.name),
            "fis_points" => real(self.fis_points),
            "rank" => text(self.rank.as_deref()),
            "date" => date(self.date),
            "location" => text(self.location.as_deref()),
            "homologation_number" => text(self.homologation_number.as_deref()),
            "discipline" => string(&self.discipline),
            "race_z_score" => real(self.race_z_score),
            "year" => self.year.map(|y| int(y as i64)).unwrap_or(Value::Null),
        }
    }
}

impl TableRow for AthleteSummary {
    fn fields(&self) -> Vec<(String, Value)> {
        let mut out = fields! {
            "fis_code" => string(&self.fis_code),
            "name" => string(&self.name),
            "discipline" => string(&self.discipline),
            "race_count" => int(self.race_count),
            "dnf_rate" => real(self.dnf_rate),
            "dnf_count" => int(self.dnf_count),
        };
        out.extend(summary_fields("fis_points", &self.fis_points));
        out.extend(summary_fields("bib", &self.bib));
        out.extend(summary_fields("rank", &self.rank));
        out.extend(summary_fields("race_z_score", &self.race_z_score));
        out
    }
}

impl TableRow for CourseProfile {
    fn fields(&self) -> Vec<(String, Value)> {
        let mut out = fields! {
            "location" => string(&self.key.location),
            "homologation_number" => string(&self.key.homologation_number),
            "discipline" => string(&self.key.discipline),
            "country" => string(&self.key.country),
            "race_count" => int(self.race_count),
            "etl_version" => string(PROFILE_ETL_VERSION),
        };
        let summaries = [
            &self.vertical_drop,
            &self.start_altitude,
            &self.gate_count,
            &self.winning_time,
            &self.fis_points,
            &self.dnf_rate,
            &self.starters,
        ];
        for (metric, summary) in PROFILE_METRICS.iter().zip(summaries) {
            out.extend(summary_fields(metric, summary));
        }
        out
    }
}

impl TableRow for HillDifficulty {
    fn fields(&self) -> Vec<(String, Value)> {
        fields! {
            "location" => text(self.location.as_deref()),
            "country" => text(self.country.as_deref()),
            "discipline" => text(self.discipline.as_deref()),
            "homologation_number" => text(self.homologation_number.as_deref()),
            "race_count" => int(self.race_count),
            "avg_winning_time" => text(self.avg_winning_time.as_deref()),
            "winning_time_norm" => real(self.winning_time_norm),
            "avg_gate_count" => real(self.avg_gate_count),
            "gate_count_norm" => real(self.gate_count_norm),
            "avg_start_altitude" => real(self.avg_start_altitude),
            "start_altitude_norm" => real(self.start_altitude_norm),
            "avg_vertical_drop" => real(self.avg_vertical_drop),
            "vertical_drop_norm" => real(self.vertical_drop_norm),
            "avg_dnf_rate" => real(self.avg_dnf_rate),
            "dnf_rate_norm" => real(self.dnf_rate_norm),
            "hill_difficulty_index" => real(self.hill_difficulty_index),
        }
    }
}

impl TableRow for HillFavorability {
    fn fields(&self) -> Vec<(String, Value)> {
        fields! {
            "location" => text(self.location.as_deref()),
            "country" => text(self.country.as_deref()),
            "homologation_number" => text(self.homologation_number.as_deref()),
            "discipline" => string(&self.discipline),
            "avg_performance_delta" => real(self.avg_performance_delta),
            "std_performance_delta" => real(self.std_performance_delta),
            "skier_count" => int(self.skier_count),
            "ci_lower" => real(self.ci_lower),
            "ci_upper" => real(self.ci_upper),
        }
    }
}

impl TableRow for LocationRanking {
    fn fields(&self) -> Vec<(String, Value)> {
        fields! {
            "location" => string(&self.location),
            "discipline" => string(&self.discipline),
            "homologation_number" => string(&self.homologation_number),
            "mean_z_score" => real(self.mean_z_score),
            "performance_count" => int(self.performance_count),
            "rank" => int(self.rank as i64),
        }
    }
}

impl TableRow for TraitCoefficient {
    fn fields(&self) -> Vec<(String, Value)> {
        fields! {
            "fis_code" => string(&self.fis_code),
            "name" => string(&self.name),
            "discipline" => string(&self.discipline),
            "trait" => string(self.course_trait.name()),
            "coefficient" => real(self.coefficient),
            "r_squared" => real(self.r_squared),
            "race_count" => int(self.race_count),
        }
    }
}

impl TableRow for TraitBin {
    fn fields(&self) -> Vec<(String, Value)> {
        fields! {
            "fis_code" => string(&self.fis_code),
            "name" => string(&self.name),
            "discipline" => string(&self.discipline),
            "trait" => string(self.course_trait.name()),
            "trait_bin" => string(&self.trait_bin),
            "avg_performance_delta" => real(self.avg_performance_delta),
            "avg_z_score" => real(self.avg_z_score),
            "race_count" => int(self.race_count),
        }
    }
}
