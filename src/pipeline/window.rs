//! Resolution of the incremental update window.

use chrono::{Duration, NaiveDate};

use crate::pipeline::stage::Window;
use crate::pipeline::PipelineError;
use crate::storage::Database;

/// How the caller asked for the window.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct WindowRequest {
    pub from_date: Option<NaiveDate>,
    pub days: Option<u32>,
    pub race_ids: Option<Vec<i64>>,
}

impl WindowRequest {
    /// Resolve to concrete race ids.
    ///
    /// An explicit race list wins. Otherwise the start date is the given
    /// date, `today - days`, or the day before the latest race on record.
    pub fn resolve(&self, db: &Database, today: NaiveDate) -> Result<Window, PipelineError> {
        if let Some(ids) = &self.race_ids {
            if self.from_date.is_some() || self.days.is_some() {
                return Err(PipelineError::Config(
                    "race ids cannot be combined with a date window".to_string(),
                ));
            }
            let mut race_ids = ids.clone();
            race_ids.sort_unstable();
            race_ids.dedup();
            return Ok(Window {
                from_date: None,
                race_ids,
            });
        }

        let from = match (self.from_date, self.days) {
            (Some(_), Some(_)) => {
                return Err(PipelineError::Config(
                    "--from-date and --days are mutually exclusive".to_string(),
                ))
            }
            (Some(date), None) => date,
            (None, Some(days)) => today - Duration::days(i64::from(days)),
            (None, None) => {
                let latest = db.latest_race_date()?.ok_or(PipelineError::NoRaceData)?;
                latest - Duration::days(1)
            }
        };

        let race_ids = db.race_ids_since(from)?;
        tracing::info!("Update window from {} covers {} races", from, race_ids.len());
        Ok(Window {
            from_date: Some(from),
            race_ids,
        })
    }
}
