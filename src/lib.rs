//! Alpine Analytics - feature pipeline for alpine ski race results
//!
//! Reads raw FIS race results and race details from SQLite, derives athlete
//! and course feature tables (race z-scores, momentum, consistency, field and
//! bib relative gains, course difficulty, trait sensitivity) and writes them
//! to an aggregate database in three dependent phases.

pub mod metrics;
pub mod pipeline;
pub mod storage;

// Re-export commonly used types
pub use pipeline::{Orchestrator, RunMode, RunSummary, Selection, StageId};
pub use storage::{AnalyticsConfig, Database, DatabasePaths};
