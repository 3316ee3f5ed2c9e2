//! Storage module for databases and configuration.

pub mod analytics_store;
pub mod config;
pub mod database;
pub mod race_source;
pub mod schema;
pub mod tables;

pub use analytics_store::{AnalyticsStore, RunRecord, WriteGuard, WriteMode};
pub use config::{load_config, save_config, AnalyticsConfig, ConfigError};
pub use database::{Database, DatabaseError, DatabasePaths};
pub use race_source::ResultFilter;
pub use tables::{TableRow, TableSpec};
