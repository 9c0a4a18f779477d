//! Schedule expressions and due-tick evaluation.
//!
//! Two spellings are accepted:
//!
//! - `cron(m h dom mon dow yr)`: six fields, `?` meaning "any", evaluated
//!   at second zero
//! - a native six or seven field expression with seconds
//!
//! Evaluation is stateless: the caller passes the last tick it acted on
//! and the current time, and gets back at most one due tick. Missed ticks
//! collapse into the most recent one.

use std::str::FromStr;

use chrono::{DateTime, Duration, Utc};
use chrono_tz::Tz;
use cron::Schedule;

use crate::error::{Error, Result};

/// How far back a first evaluation looks for a due tick.
pub const DEFAULT_CATCHUP_WINDOW_HOURS: i64 = 24;

/// A parsed schedule expression.
#[derive(Debug, Clone)]
pub struct ScheduleExpression {
    expression: String,
    schedule: Schedule,
}

impl ScheduleExpression {
    /// Parses either spelling.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidSchedule`] if the field count is wrong or the
    /// fields don't parse.
    pub fn parse(expression: &str) -> Result<Self> {
        let invalid = |message: String| Error::InvalidSchedule {
            expression: expression.to_string(),
            message,
        };
        let trimmed = expression.trim();
        let native = match trimmed
            .strip_prefix("cron(")
            .and_then(|rest| rest.strip_suffix(')'))
        {
            Some(inner) => {
                let fields: Vec<&str> = inner.split_whitespace().collect();
                if fields.len() != 6 {
                    return Err(invalid(format!(
                        "expected 6 fields inside cron(), got {}",
                        fields.len()
                    )));
                }
                let fields: Vec<&str> = fields
                    .into_iter()
                    .map(|f| if f == "?" { "*" } else { f })
                    .collect();
                format!("0 {}", fields.join(" "))
            }
            None => {
                let count = trimmed.split_whitespace().count();
                if !(6..=7).contains(&count) {
                    return Err(invalid(format!("expected 6 or 7 fields, got {count}")));
                }
                trimmed.to_string()
            }
        };
        let schedule = Schedule::from_str(&native).map_err(|e| invalid(e.to_string()))?;
        Ok(Self {
            expression: expression.to_string(),
            schedule,
        })
    }

    /// The expression as configured.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.expression
    }
}

/// Parses an IANA timezone name.
///
/// # Errors
///
/// Returns [`Error::InvalidTimezone`] for unknown names.
pub fn parse_timezone(name: &str) -> Result<Tz> {
    name.parse::<Tz>()
        .map_err(|_| Error::InvalidTimezone(name.to_string()))
}

/// Evaluates a schedule in a timezone.
#[derive(Debug, Clone)]
pub struct ScheduleEvaluator {
    expression: ScheduleExpression,
    timezone: Tz,
    catchup_window: Duration,
}

impl ScheduleEvaluator {
    /// Creates an evaluator.
    ///
    /// # Errors
    ///
    /// Returns an error if the expression or timezone is invalid.
    pub fn new(expression: &str, timezone: &str) -> Result<Self> {
        Ok(Self {
            expression: ScheduleExpression::parse(expression)?,
            timezone: parse_timezone(timezone)?,
            catchup_window: Duration::hours(DEFAULT_CATCHUP_WINDOW_HOURS),
        })
    }

    /// Overrides how far back evaluation looks.
    #[must_use]
    pub fn with_catchup_window(mut self, window: Duration) -> Self {
        self.catchup_window = window;
        self
    }

    /// The parsed expression.
    #[must_use]
    pub fn expression(&self) -> &ScheduleExpression {
        &self.expression
    }

    /// The evaluation timezone.
    #[must_use]
    pub const fn timezone(&self) -> Tz {
        self.timezone
    }

    /// The most recent tick in `(last, now]`, bounded by the catch-up window.
    #[must_use]
    pub fn due_tick(
        &self,
        last: Option<DateTime<Utc>>,
        now: DateTime<Utc>,
    ) -> Option<DateTime<Utc>> {
        let floor = now - self.catchup_window;
        let start = last.map_or(floor, |t| t.max(floor));

        let start_tz = start.with_timezone(&self.timezone);
        let now_tz = now.with_timezone(&self.timezone);

        self.expression
            .schedule
            .after(&start_tz)
            .take_while(|t| *t <= now_tz)
            .last()
            .map(|t| t.with_timezone(&Utc))
    }

    /// The next `count` ticks strictly after `after`.
    #[must_use]
    pub fn upcoming(&self, after: DateTime<Utc>, count: usize) -> Vec<DateTime<Utc>> {
        self.expression
            .schedule
            .after(&after.with_timezone(&self.timezone))
            .take(count)
            .map(|t| t.with_timezone(&Utc))
            .collect()
    }
}

/// Stable identifier of one tick of one trigger binding.
#[must_use]
pub fn tick_id(trigger: &str, tick: DateTime<Utc>) -> String {
    format!("{trigger}:{}", tick.timestamp())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(y: i32, mo: u32, d: u32, h: u32, mi: u32, s: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, mo, d, h, mi, s).single().expect("valid time")
    }

    #[test]
    fn aws_cron_is_translated() {
        let eval = ScheduleEvaluator::new("cron(0 12 * * ? *)", "UTC").expect("valid");
        let now = at(2026, 1, 2, 12, 0, 30);
        assert_eq!(eval.due_tick(None, now), Some(at(2026, 1, 2, 12, 0, 0)));
        assert_eq!(
            eval.upcoming(now, 2),
            vec![at(2026, 1, 3, 12, 0, 0), at(2026, 1, 4, 12, 0, 0)]
        );
    }

    #[test]
    fn native_expressions_pass_through() {
        let eval = ScheduleEvaluator::new("0 */15 * * * *", "UTC").expect("valid");
        let now = at(2026, 1, 1, 10, 20, 0);
        assert_eq!(eval.due_tick(None, now), Some(at(2026, 1, 1, 10, 15, 0)));
    }

    #[test]
    fn a_tick_fires_once() {
        let eval = ScheduleEvaluator::new("cron(0 12 * * ? *)", "UTC").expect("valid");
        let tick = at(2026, 1, 2, 12, 0, 0);
        let now = tick + Duration::seconds(1);
        assert_eq!(eval.due_tick(Some(tick), now), None);
        assert_eq!(eval.due_tick(Some(tick), now + Duration::seconds(1)), None);
    }

    #[test]
    fn missed_ticks_collapse_into_the_latest() {
        let eval = ScheduleEvaluator::new("0 0 * * * *", "UTC").expect("valid");
        let last = at(2026, 1, 1, 0, 0, 0);
        let now = at(2026, 1, 1, 5, 30, 0);
        assert_eq!(eval.due_tick(Some(last), now), Some(at(2026, 1, 1, 5, 0, 0)));
    }

    #[test]
    fn catchup_window_bounds_the_lookback() {
        let eval = ScheduleEvaluator::new("cron(0 12 * * ? *)", "UTC")
            .expect("valid")
            .with_catchup_window(Duration::hours(1));
        let now = at(2026, 1, 2, 14, 0, 0);
        assert_eq!(eval.due_tick(None, now), None);
    }

    #[test]
    fn timezone_shifts_ticks() {
        let eval = ScheduleEvaluator::new("cron(0 12 * * ? *)", "Europe/Berlin").expect("valid");
        let now = at(2026, 1, 15, 11, 30, 0);
        assert_eq!(eval.due_tick(None, now), Some(at(2026, 1, 15, 11, 0, 0)));
    }

    #[test]
    fn invalid_inputs_are_rejected() {
        assert!(matches!(
            ScheduleExpression::parse("cron(0 12 * *)"),
            Err(Error::InvalidSchedule { .. })
        ));
        assert!(matches!(
            ScheduleExpression::parse("every day"),
            Err(Error::InvalidSchedule { .. })
        ));
        assert!(matches!(
            ScheduleEvaluator::new("cron(0 12 * * ? *)", "Mars/Olympus"),
            Err(Error::InvalidTimezone(_))
        ));
    }

    #[test]
    fn tick_ids_are_stable() {
        assert_eq!(tick_id("t", at(1970, 1, 1, 0, 1, 0)), "t:60");
    }
}
