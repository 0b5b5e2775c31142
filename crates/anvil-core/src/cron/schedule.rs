use chrono::{DateTime, Utc};
use cron::Schedule;
use std::str::FromStr;

/// A parsed six-field cron expression (second minute hour day-of-month month
/// day-of-week), per §3's `attributes.cronjob` field.
#[derive(Debug, Clone)]
pub struct CronSchedule {
    expression: String,
    schedule: Schedule,
}

impl CronSchedule {
    /// Parse an expression, accepting either the conventional five-field form
    /// (seconds defaulted to `0`) or an explicit six-field form.
    pub fn new(expression: &str) -> Result<Self, CronParseError> {
        let normalized = normalize_cron_expression(expression);

        let schedule = Schedule::from_str(&normalized)
            .map_err(|e| CronParseError::InvalidExpression(e.to_string()))?;

        Ok(Self {
            expression: normalized,
            schedule,
        })
    }

    pub fn expression(&self) -> &str {
        &self.expression
    }

    /// The next occurrence strictly after `after`. This is `cron.Next(now())`
    /// in the spec's notation; unlike a naive `Schedule::upcoming` call (which
    /// is always relative to wall-clock now), this advances from the given
    /// instant so it can be used to recompute a schedule for any point in the
    /// past, which §8's cron-regeneration property and scenario 3 depend on.
    pub fn next_after(&self, after: DateTime<Utc>) -> Option<DateTime<Utc>> {
        self.schedule.after(&after).next()
    }

    pub fn next_after_in_tz(
        &self,
        after: DateTime<Utc>,
        timezone: &str,
    ) -> Option<DateTime<Utc>> {
        let tz: chrono_tz::Tz = timezone.parse().ok()?;
        let local_time = after.with_timezone(&tz);

        self.schedule
            .after(&local_time)
            .next()
            .map(|dt| dt.with_timezone(&Utc))
    }

    pub fn between(&self, start: DateTime<Utc>, end: DateTime<Utc>) -> Vec<DateTime<Utc>> {
        self.schedule.after(&start).take_while(|dt| *dt < end).collect()
    }
}

fn normalize_cron_expression(expr: &str) -> String {
    let parts: Vec<&str> = expr.split_whitespace().collect();
    match parts.len() {
        5 => format!("0 {expr}"),
        _ => expr.to_string(),
    }
}

#[derive(Debug, Clone)]
pub enum CronParseError {
    InvalidExpression(String),
}

impl std::fmt::Display for CronParseError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InvalidExpression(e) => write!(f, "invalid cron expression: {e}"),
        }
    }
}

impl std::error::Error for CronParseError {}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn normalizes_five_field_expressions() {
        let schedule = CronSchedule::new("*/5 * * * *").unwrap();
        assert_eq!(schedule.expression(), "0 */5 * * * *");
    }

    #[test]
    fn keeps_six_field_expressions() {
        let schedule = CronSchedule::new("30 */5 * * * *").unwrap();
        assert_eq!(schedule.expression(), "30 */5 * * * *");
    }

    #[test]
    fn rejects_invalid_expressions() {
        assert!(CronSchedule::new("not a cron").is_err());
    }

    /// Scenario 3: an hourly cron evaluated at 12:00:30 next-fires at 13:00:00,
    /// regardless of wall-clock time — this is the bug fixed relative to a
    /// naive `upcoming(Utc)` implementation that ignores its `after` argument.
    #[test]
    fn next_after_advances_from_given_instant_not_wall_clock() {
        let schedule = CronSchedule::new("0 0 * * * *").unwrap();
        let at = Utc.with_ymd_and_hms(2025, 1, 1, 12, 0, 30).unwrap();
        let next = schedule.next_after(at).unwrap();
        assert_eq!(next, Utc.with_ymd_and_hms(2025, 1, 1, 13, 0, 0).unwrap());

        let second = schedule.next_after(next + chrono::Duration::seconds(1)).unwrap();
        assert_eq!(second, Utc.with_ymd_and_hms(2025, 1, 1, 14, 0, 0).unwrap());
    }

    #[test]
    fn between_collects_all_occurrences_in_range() {
        let schedule = CronSchedule::new("0 * * * * *").unwrap(); // every minute
        let start = Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap();
        let end = start + chrono::Duration::minutes(3);
        let times = schedule.between(start, end);
        assert_eq!(times.len(), 3);
    }
}
