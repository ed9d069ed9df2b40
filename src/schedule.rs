// ABOUTME: Trigger schedule turning a cron expression into logical run windows
// ABOUTME: Computes which windows are due, with or without catching up on missed ones

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use cron::Schedule;
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use thiserror::Error;

use crate::engine::run::Window;

/// Hourly, on the hour
pub const DEFAULT_CRON: &str = "0 * * * *";

/// How far back to look when neither a start date nor a completed window
/// bounds the search
const DEFAULT_LOOKBACK_DAYS: i64 = 1;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ScheduleError {
    #[error("Invalid cron expression '{expression}': {message}")]
    InvalidCron { expression: String, message: String },
}

pub type Result<T> = std::result::Result<T, ScheduleError>;

/// ```yaml
/// schedule:
///   cron: "0 * * * *"
///   catchup: false
///   start_date: 2019-01-12T00:00:00Z
/// ```
///
/// Consecutive fire times `t_i`, `t_{i+1}` bound the window `[t_i, t_{i+1})`.
/// Five-field expressions are accepted and run at second zero.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TriggerSchedule {
    #[serde(default = "default_cron")]
    pub cron: String,
    #[serde(default)]
    pub catchup: bool,
    #[serde(default)]
    pub start_date: Option<DateTime<Utc>>,
}

fn default_cron() -> String {
    DEFAULT_CRON.to_string()
}

impl Default for TriggerSchedule {
    fn default() -> Self {
        Self {
            cron: default_cron(),
            catchup: false,
            start_date: None,
        }
    }
}

impl TriggerSchedule {
    pub fn new(cron: impl Into<String>) -> Self {
        Self {
            cron: cron.into(),
            ..Self::default()
        }
    }

    pub fn with_catchup(mut self, catchup: bool) -> Self {
        self.catchup = catchup;
        self
    }

    pub fn with_start_date(mut self, start_date: DateTime<Utc>) -> Self {
        self.start_date = Some(start_date);
        self
    }

    pub fn validate(&self) -> Result<()> {
        self.parse().map(|_| ())
    }

    fn parse(&self) -> Result<Schedule> {
        let fields = self.cron.split_whitespace().count();
        let normalized = if fields == 5 {
            format!("0 {}", self.cron.trim())
        } else {
            self.cron.trim().to_string()
        };
        Schedule::from_str(&normalized).map_err(|e| ScheduleError::InvalidCron {
            expression: self.cron.clone(),
            message: e.to_string(),
        })
    }

    /// Windows whose end is at or before `now` and which start at or after
    /// both `start_date` and `last_completed` (the end of the last window a
    /// run completed).
    ///
    /// Without catch-up only the most recent due window is returned.
    pub fn due_windows(
        &self,
        now: DateTime<Utc>,
        last_completed: Option<DateTime<Utc>>,
    ) -> Result<Vec<Window>> {
        let schedule = self.parse()?;
        let lower = match (self.start_date, last_completed) {
            (Some(start), Some(last)) => start.max(last),
            (Some(start), None) => start,
            (None, Some(last)) => last,
            (None, None) => now - ChronoDuration::days(DEFAULT_LOOKBACK_DAYS),
        };

        if self.catchup {
            let fire_times: Vec<DateTime<Utc>> =
                fire_times_between(&schedule, lower, now).collect();
            return Ok(fire_times
                .windows(2)
                .map(|pair| Window::new(pair[0], pair[1]))
                .collect());
        }

        // Only the latest window is due: widen a span back from `now` until
        // it holds two fire times or reaches `lower`.
        let mut span = ChronoDuration::minutes(1);
        loop {
            let from = (now - span).max(lower);
            let (previous, last) = fire_times_between(&schedule, from, now)
                .fold((None, None), |(_, last), fire_time| (last, Some(fire_time)));
            if let (Some(start), Some(end)) = (previous, last) {
                return Ok(vec![Window::new(start, end)]);
            }
            if from == lower {
                return Ok(Vec::new());
            }
            span = span * 2;
        }
    }

    /// The first window starting at or after `from`
    pub fn next_window(&self, from: DateTime<Utc>) -> Result<Option<Window>> {
        let schedule = self.parse()?;
        let mut fire_times = schedule.after(&(from - ChronoDuration::seconds(1)));
        Ok(match (fire_times.next(), fire_times.next()) {
            (Some(start), Some(end)) => Some(Window::new(start, end)),
            _ => None,
        })
    }
}

/// Fire times in `[from, until]`, in order
fn fire_times_between(
    schedule: &Schedule,
    from: DateTime<Utc>,
    until: DateTime<Utc>,
) -> impl Iterator<Item = DateTime<Utc>> + '_ {
    // `after` is exclusive; step back so a fire time at `from` counts.
    schedule
        .after(&(from - ChronoDuration::seconds(1)))
        .take_while(move |fire_time| *fire_time <= until)
}
