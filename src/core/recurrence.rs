//! Recurrence policies for repeating tasks.
//!
//! Calendar patterns are evaluated in UTC. Named patterns fire at fixed wall
//! times: the top of the next hour, 09:00 on the next day, 09:00 on the next
//! Monday, and 09:00 on the first day of the next month.

use chrono::{DateTime, Datelike, Days, Duration as ChronoDuration, NaiveDate, NaiveTime, Timelike, Utc};
use serde::{Deserialize, Serialize};

/// Hour of day used by the daily, weekly and monthly patterns.
pub const CALENDAR_RUN_HOUR: u32 = 9;

/// Unit for fixed-interval recurrence and relative scheduling.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TimeUnit {
    /// Milliseconds.
    Milliseconds,
    /// Seconds.
    Seconds,
    /// Minutes.
    Minutes,
    /// Hours.
    Hours,
    /// Days.
    Days,
}

impl TimeUnit {
    /// `amount` of this unit as a std duration, `None` on overflow.
    #[must_use]
    pub fn duration(self, amount: u64) -> Option<std::time::Duration> {
        let millis_per_unit: u64 = match self {
            Self::Milliseconds => 1,
            Self::Seconds => 1_000,
            Self::Minutes => 60_000,
            Self::Hours => 3_600_000,
            Self::Days => 86_400_000,
        };
        amount
            .checked_mul(millis_per_unit)
            .map(std::time::Duration::from_millis)
    }
}

/// When a recurring task fires next.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RecurrencePattern {
    /// Every `amount` `unit`s after the previous run.
    FixedInterval {
        /// Interval length in `unit`s.
        amount: u64,
        /// Interval unit.
        unit: TimeUnit,
    },
    /// Top of every hour.
    Hourly,
    /// 09:00 every day.
    Daily,
    /// 09:00 every Monday.
    Weekly,
    /// 09:00 on the first of every month.
    Monthly,
}

impl RecurrencePattern {
    /// Candidate time strictly after `now`, ignoring bounds.
    #[must_use]
    pub fn next_after(&self, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        match *self {
            Self::FixedInterval { amount, unit } => {
                let step = ChronoDuration::from_std(unit.duration(amount)?).ok()?;
                now.checked_add_signed(step)
            }
            Self::Hourly => {
                let hour_start = now.date_naive().and_time(NaiveTime::from_hms_opt(now.hour(), 0, 0)?);
                hour_start
                    .and_utc()
                    .checked_add_signed(ChronoDuration::hours(1))
            }
            Self::Daily => {
                let date = now.date_naive().checked_add_days(Days::new(1))?;
                at_run_hour(date)
            }
            Self::Weekly => {
                let days_ahead = 7 - u64::from(now.weekday().num_days_from_monday());
                let date = now.date_naive().checked_add_days(Days::new(days_ahead))?;
                at_run_hour(date)
            }
            Self::Monthly => {
                let (year, month) = if now.month() == 12 {
                    (now.year() + 1, 1)
                } else {
                    (now.year(), now.month() + 1)
                };
                at_run_hour(NaiveDate::from_ymd_opt(year, month, 1)?)
            }
        }
    }
}

fn at_run_hour(date: NaiveDate) -> Option<DateTime<Utc>> {
    date.and_hms_opt(CALENDAR_RUN_HOUR, 0, 0).map(|dt| dt.and_utc())
}

/// Pattern plus bounds deciding whether and when a task runs again.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecurrencePolicy {
    pattern: RecurrencePattern,
    end_time: Option<DateTime<Utc>>,
    max_executions: u32,
    enabled: bool,
}

impl RecurrencePolicy {
    /// Unbounded, enabled policy following `pattern`.
    #[must_use]
    pub const fn new(pattern: RecurrencePattern) -> Self {
        Self {
            pattern,
            end_time: None,
            max_executions: 0,
            enabled: true,
        }
    }

    /// Fixed-interval policy.
    #[must_use]
    pub const fn every(amount: u64, unit: TimeUnit) -> Self {
        Self::new(RecurrencePattern::FixedInterval { amount, unit })
    }

    /// Top of every hour.
    #[must_use]
    pub const fn hourly() -> Self {
        Self::new(RecurrencePattern::Hourly)
    }

    /// 09:00 every day.
    #[must_use]
    pub const fn daily() -> Self {
        Self::new(RecurrencePattern::Daily)
    }

    /// 09:00 every Monday.
    #[must_use]
    pub const fn weekly() -> Self {
        Self::new(RecurrencePattern::Weekly)
    }

    /// 09:00 on the first of every month.
    #[must_use]
    pub const fn monthly() -> Self {
        Self::new(RecurrencePattern::Monthly)
    }

    /// Never schedule a run after `end_time`.
    #[must_use]
    pub const fn with_end_time(mut self, end_time: DateTime<Utc>) -> Self {
        self.end_time = Some(end_time);
        self
    }

    /// Stop after `max_executions` runs. Zero means unbounded.
    #[must_use]
    pub const fn with_max_executions(mut self, max_executions: u32) -> Self {
        self.max_executions = max_executions;
        self
    }

    /// The recurrence pattern.
    #[must_use]
    pub const fn pattern(&self) -> RecurrencePattern {
        self.pattern
    }

    /// End bound, if any.
    #[must_use]
    pub const fn end_time(&self) -> Option<DateTime<Utc>> {
        self.end_time
    }

    /// Execution bound; zero means unbounded.
    #[must_use]
    pub const fn max_executions(&self) -> u32 {
        self.max_executions
    }

    /// Whether further runs may be scheduled.
    #[must_use]
    pub const fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Enable or disable further runs.
    pub const fn set_enabled(&mut self, enabled: bool) {
        self.enabled = enabled;
    }

    /// Reject policies that can never produce a sensible schedule.
    ///
    /// # Errors
    ///
    /// Returns a message when the fixed interval is zero or overflows.
    pub fn validate(&self) -> Result<(), String> {
        if let RecurrencePattern::FixedInterval { amount, unit } = self.pattern {
            if amount == 0 {
                return Err("recurrence interval must be greater than 0".into());
            }
            if unit.duration(amount).is_none() {
                return Err("recurrence interval overflows".into());
            }
        }
        Ok(())
    }

    /// Whether `executions` runs use up the execution bound.
    #[must_use]
    pub const fn is_exhausted(&self, executions: u32) -> bool {
        self.max_executions > 0 && executions >= self.max_executions
    }

    /// Next due time after `now`, given how many runs already happened.
    ///
    /// `None` ends the recurrence: the policy is disabled, the execution
    /// bound is reached, or the candidate lies past the end time.
    #[must_use]
    pub fn next_execution(&self, now: DateTime<Utc>, executions: u32) -> Option<DateTime<Utc>> {
        if !self.enabled {
            return None;
        }
        if self.is_exhausted(executions) {
            return None;
        }
        let candidate = self.pattern.next_after(now)?;
        match self.end_time {
            Some(end) if candidate > end => None,
            _ => Some(candidate),
        }
    }
}
