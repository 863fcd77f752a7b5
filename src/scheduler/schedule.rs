use std::str::FromStr;

use chrono::{DateTime, Utc};
use chrono_tz::Tz;

use super::cancel::SchedulerError;

/// Cron expression evaluated in a fixed IANA timezone.
#[derive(Debug, Clone)]
pub struct CronSchedule {
    expression: String,
    schedule: cron::Schedule,
    timezone: Tz,
}

impl CronSchedule {
    pub fn parse(expression: &str, timezone: &str) -> Result<Self, SchedulerError> {
        let schedule = cron::Schedule::from_str(expression.trim()).map_err(|e| {
            SchedulerError::InvalidSchedule(format!("cron expression '{expression}': {e}"))
        })?;
        let timezone = timezone
            .trim()
            .parse::<Tz>()
            .map_err(|e| SchedulerError::InvalidSchedule(format!("timezone '{timezone}': {e}")))?;
        Ok(Self {
            expression: expression.trim().to_string(),
            schedule,
            timezone,
        })
    }

    pub fn expression(&self) -> &str {
        &self.expression
    }

    pub fn timezone(&self) -> Tz {
        self.timezone
    }

    /// First fire time strictly after `after`.
    pub fn next_after(&self, after: DateTime<Utc>) -> Option<DateTime<Utc>> {
        self.schedule
            .after(&after.with_timezone(&self.timezone))
            .next()
            .map(|at| at.with_timezone(&Utc))
    }

    /// Next `count` fire times after `after`.
    pub fn upcoming(&self, after: DateTime<Utc>, count: usize) -> Vec<DateTime<Utc>> {
        self.schedule
            .after(&after.with_timezone(&self.timezone))
            .take(count)
            .map(|at| at.with_timezone(&Utc))
            .collect()
    }

    /// Calendar date in the schedule's timezone.
    pub fn local_date(&self, at: DateTime<Utc>) -> chrono::NaiveDate {
        at.with_timezone(&self.timezone).date_naive()
    }
}
