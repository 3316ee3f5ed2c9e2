//! Pipeline configuration.
//!
//! Loaded from TOML. Every section and key is optional; a missing file means
//! all defaults.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::metrics::analytics::course_traits::{DEFAULT_BIN_COUNT, DEFAULT_MIN_RACES};
use crate::metrics::analytics::favorability::{DEFAULT_CI_MULTIPLIER, DEFAULT_MIN_SKIER_COUNT};
use crate::metrics::analytics::strokes_gained::DEFAULT_BIB_RANGE;
use crate::metrics::analytics::DifficultyWeights;

/// Full configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalyticsConfig {
    pub database: DatabaseSettings,
    pub pipeline: PipelineSettings,
    pub difficulty: DifficultyWeights,
    pub strokes_gained: StrokesGainedSettings,
    pub course_traits: CourseTraitSettings,
    pub favorability: FavorabilitySettings,
}

/// Database file locations.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseSettings {
    /// Raw results store
    pub raw_path: PathBuf,
    /// Race details store, when kept apart from the results
    pub details_path: Option<PathBuf>,
    /// Derived tables
    pub aggregate_path: PathBuf,
}

impl Default for DatabaseSettings {
    fn default() -> Self {
        let data_dir = get_data_dir();
        Self {
            raw_path: data_dir.join("fis_results.db"),
            details_path: None,
            aggregate_path: data_dir.join("alpine_aggregate.db"),
        }
    }
}

/// Stage execution settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineSettings {
    /// Per-stage timeout for full runs
    pub full_timeout_secs: u64,
    /// Per-stage timeout for incremental runs
    pub incremental_timeout_secs: u64,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            full_timeout_secs: 600,
            incremental_timeout_secs: 300,
        }
    }
}

impl PipelineSettings {
    pub fn timeout(&self, incremental: bool) -> Duration {
        if incremental {
            Duration::from_secs(self.incremental_timeout_secs)
        } else {
            Duration::from_secs(self.full_timeout_secs)
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StrokesGainedSettings {
    /// Half-width of the bib window
    pub bib_range: f64,
}

impl Default for StrokesGainedSettings {
    fn default() -> Self {
        Self {
            bib_range: DEFAULT_BIB_RANGE,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CourseTraitSettings {
    /// Complete races needed for a regression
    pub min_races: usize,
    /// Quantile buckets per trait
    pub bin_count: usize,
}

impl Default for CourseTraitSettings {
    fn default() -> Self {
        Self {
            min_races: DEFAULT_MIN_RACES,
            bin_count: DEFAULT_BIN_COUNT,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FavorabilitySettings {
    pub min_skier_count: usize,
    pub ci_multiplier: f64,
}

impl Default for FavorabilitySettings {
    fn default() -> Self {
        Self {
            min_skier_count: DEFAULT_MIN_SKIER_COUNT,
            ci_multiplier: DEFAULT_CI_MULTIPLIER,
        }
    }
}

impl AnalyticsConfig {
    /// Reject settings no run could use.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let d = &self.difficulty;
        if !(0.0..=1.0).contains(&d.lower_quantile)
            || !(0.0..=1.0).contains(&d.upper_quantile)
            || d.lower_quantile > d.upper_quantile
        {
            return Err(ConfigError::Invalid(format!(
                "difficulty quantiles must satisfy 0 <= lower <= upper <= 1, got {} and {}",
                d.lower_quantile, d.upper_quantile
            )));
        }
        let weights = [d.winning_time, d.gate_count, d.start_altitude, d.vertical_drop, d.dnf_rate];
        if weights.iter().any(|w| !w.is_finite() || *w < 0.0) {
            return Err(ConfigError::Invalid(
                "difficulty weights must be finite and non-negative".to_string(),
            ));
        }
        if (d.total() - 1.0).abs() > 1e-6 {
            tracing::warn!("Difficulty weights sum to {}, index will not span 0-100", d.total());
        }
        if !self.strokes_gained.bib_range.is_finite() || self.strokes_gained.bib_range < 0.0 {
            return Err(ConfigError::Invalid("bib_range must be non-negative".to_string()));
        }
        if self.course_traits.bin_count == 0 {
            return Err(ConfigError::Invalid("bin_count must be at least 1".to_string()));
        }
        if self.pipeline.full_timeout_secs == 0 || self.pipeline.incremental_timeout_secs == 0 {
            return Err(ConfigError::Invalid("stage timeouts must be positive".to_string()));
        }
        Ok(())
    }
}

/// Get the application data directory.
pub fn get_data_dir() -> PathBuf {
    directories::ProjectDirs::from("org", "alpine-analytics", "AlpineAnalytics")
        .map(|dirs| dirs.data_dir().to_path_buf())
        .unwrap_or_else(|| PathBuf::from("."))
}

/// Get the default configuration file path.
pub fn get_config_path() -> PathBuf {
    get_data_dir().join("config.toml")
}

/// Load configuration from `path`, or from the default location.
///
/// A missing file yields the defaults.
pub fn load_config(path: Option<&Path>) -> Result<AnalyticsConfig, ConfigError> {
    let path = path.map(Path::to_path_buf).unwrap_or_else(get_config_path);

    if !path.exists() {
        tracing::debug!("No config at {}, using defaults", path.display());
        return Ok(AnalyticsConfig::default());
    }

    let content = std::fs::read_to_string(&path).map_err(|e| ConfigError::IoError(e.to_string()))?;

    let config: AnalyticsConfig =
        toml::from_str(&content).map_err(|e| ConfigError::ParseError(e.to_string()))?;

    config.validate()?;
    Ok(config)
}

/// Save configuration to `path`.
pub fn save_config(config: &AnalyticsConfig, path: &Path) -> Result<(), ConfigError> {
    // Ensure parent directory exists
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(|e| ConfigError::IoError(e.to_string()))?;
    }

    let content =
        toml::to_string_pretty(config).map_err(|e| ConfigError::SerializeError(e.to_string()))?;

    std::fs::write(path, content).map_err(|e| ConfigError::IoError(e.to_string()))?;

    Ok(())
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    IoError(String),

    #[error("Parse error: {0}")]
    ParseError(String),

    #[error("Serialize error: {0}")]
    SerializeError(String),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}
