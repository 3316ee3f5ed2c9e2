//! Command-line arguments.

use std::path::PathBuf;

use chrono::NaiveDate;
use clap::{Args, Parser, Subcommand};

use alpine_analytics::pipeline::{RunMode, Selection, WindowRequest};
use alpine_analytics::storage::AnalyticsConfig;

/// Feature pipeline over alpine ski race results
#[derive(Parser, Debug)]
#[command(name = "alpine-analytics")]
#[command(version)]
pub struct Cli {
    /// Configuration file (defaults to the data directory's config.toml)
    #[arg(long, global = true, env = "ALPINE_ANALYTICS_CONFIG")]
    pub config: Option<PathBuf>,

    #[command(flatten)]
    pub databases: DatabaseArgs,

    /// Print the run summary as JSON
    #[arg(long, global = true)]
    pub json: bool,

    #[command(subcommand)]
    pub command: Command,
}

/// Database path overrides.
#[derive(Args, Debug, Default)]
pub struct DatabaseArgs {
    /// Raw results database
    #[arg(long, global = true, env = "ALPINE_ANALYTICS_RAW_DB")]
    pub raw_db: Option<PathBuf>,

    /// Race details database, when kept apart from the results
    #[arg(long, global = true, env = "ALPINE_ANALYTICS_DETAILS_DB")]
    pub details_db: Option<PathBuf>,

    /// Derived tables database
    #[arg(long, global = true, env = "ALPINE_ANALYTICS_AGGREGATE_DB")]
    pub aggregate_db: Option<PathBuf>,
}

impl DatabaseArgs {
    /// Apply the overrides on top of the configured paths.
    pub fn apply(&self, config: &mut AnalyticsConfig) {
        if let Some(p) = &self.raw_db {
            config.database.raw_path = p.clone();
        }
        if let Some(p) = &self.details_db {
            config.database.details_path = Some(p.clone());
        }
        if let Some(p) = &self.aggregate_db {
            config.database.aggregate_path = p.clone();
        }
    }
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Full refresh of all stages, one phase or one stage
    Run {
        /// Only this phase (1-3)
        #[arg(long, conflicts_with = "stage")]
        phase: Option<u8>,

        /// Only this stage (see `stages`)
        #[arg(long)]
        stage: Option<String>,
    },

    /// Incremental update of recent races
    Update {
        /// First race date of the window (YYYY-MM-DD)
        #[arg(long, conflicts_with_all = ["days", "race_ids"])]
        from_date: Option<NaiveDate>,

        /// Window of the last N days
        #[arg(long, conflicts_with = "race_ids")]
        days: Option<u32>,

        /// Exact races to refresh
        #[arg(long, value_delimiter = ',')]
        race_ids: Option<Vec<i64>>,
    },

    /// List phases and stage names
    Stages,

    /// Create the raw and aggregate schemas
    Init,
}

impl Command {
    /// Stage selection and mode of a pipeline command.
    pub fn plan(&self) -> Option<(Selection, RunMode)> {
        match self {
            Command::Run { phase, stage } => {
                let selection = match (phase, stage) {
                    (Some(n), _) => Selection::Phase(*n),
                    (None, Some(name)) => Selection::Stage(name.clone()),
                    (None, None) => Selection::All,
                };
                Some((selection, RunMode::Full))
            }
            Command::Update {
                from_date,
                days,
                race_ids,
            } => Some((
                Selection::All,
                RunMode::Incremental(WindowRequest {
                    from_date: *from_date,
                    days: *days,
                    race_ids: race_ids.clone(),
                }),
            )),
            Command::Stages | Command::Init => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_run_phase() {
        let cli = Cli::parse_from(["alpine-analytics", "run", "--phase", "2"]);
        assert_eq!(cli.command.plan(), Some((Selection::Phase(2), RunMode::Full)));
    }

    #[test]
    fn test_update_race_ids() {
        let cli = Cli::parse_from(["alpine-analytics", "update", "--race-ids", "7,9", "--json"]);
        assert!(cli.json);
        let (_, mode) = cli.command.plan().unwrap();
        assert_eq!(
            mode,
            RunMode::Incremental(WindowRequest {
                from_date: None,
                days: None,
                race_ids: Some(vec![7, 9]),
            })
        );
    }

    #[test]
    fn test_from_date_and_days_conflict() {
        let parsed = Cli::try_parse_from([
            "alpine-analytics",
            "update",
            "--from-date",
            "2024-11-01",
            "--days",
            "3",
        ]);
        assert!(parsed.is_err());
    }

    #[test]
    fn test_database_overrides() {
        let cli = Cli::parse_from([
            "alpine-analytics",
            "--raw-db",
            "/tmp/raw.db",
            "--aggregate-db",
            "/tmp/agg.db",
            "stages",
        ]);
        let mut config = AnalyticsConfig::default();
        cli.databases.apply(&mut config);
        assert_eq!(config.database.raw_path, PathBuf::from("/tmp/raw.db"));
        assert_eq!(config.database.aggregate_path, PathBuf::from("/tmp/agg.db"));
        assert_eq!(config.database.details_path, None);
    }
}
