//! 5-field cron expression parsing ("MIN HOUR DOM MON DOW").
//!
//! Supports wildcards, steps (`*/N`), ranges (`N-M`, `N-M/S`), and lists
//! (`a,b,c`). Day-of-month and day-of-week follow the classic cron rule:
//! when both are restricted, a time matches if EITHER does. Expressions
//! are validated eagerly so a bad schedule is rejected at registration,
//! not at fire time.

use std::collections::BTreeSet;

use chrono::{DateTime, Datelike, Duration, Timelike, Utc};

use herald_core::error::{HeraldError, Result};

/// A parsed, validated cron expression.
#[derive(Debug, Clone)]
pub struct CronSpec {
    minutes: BTreeSet<u32>,
    hours: BTreeSet<u32>,
    days_of_month: BTreeSet<u32>,
    months: BTreeSet<u32>,
    days_of_week: BTreeSet<u32>,
    dom_restricted: bool,
    dow_restricted: bool,
}

impl CronSpec {
    pub fn parse(expression: &str) -> Result<Self> {
        let parts: Vec<&str> = expression.split_whitespace().collect();
        if parts.len() != 5 {
            return Err(HeraldError::Config(format!(
                "cron expression '{expression}' must have 5 fields (MIN HOUR DOM MON DOW)"
            )));
        }
        Ok(Self {
            minutes: parse_field(parts[0], 0, 59)?,
            hours: parse_field(parts[1], 0, 23)?,
            days_of_month: parse_field(parts[2], 1, 31)?,
            months: parse_field(parts[3], 1, 12)?,
            // 0 and 7 both mean Sunday
            days_of_week: parse_field(parts[4], 0, 7)?
                .into_iter()
                .map(|d| d % 7)
                .collect(),
            dom_restricted: parts[2] != "*",
            dow_restricted: parts[4] != "*",
        })
    }

    /// The first matching time strictly after `after`. `None` only for
    /// expressions that can never match (e.g. Feb 31).
    pub fn next_after(&self, after: DateTime<Utc>) -> Option<DateTime<Utc>> {
        let mut candidate = (after + Duration::minutes(1))
            .with_second(0)?
            .with_nanosecond(0)?;

        // Scan forward minute by minute, far enough to cover any
        // month/day combination.
        for _ in 0..(366 * 24 * 60) {
            if self.matches(candidate) {
                return Some(candidate);
            }
            candidate += Duration::minutes(1);
        }
        None
    }

    fn matches(&self, t: DateTime<Utc>) -> bool {
        if !self.minutes.contains(&t.minute())
            || !self.hours.contains(&t.hour())
            || !self.months.contains(&t.month())
        {
            return false;
        }
        let dom_ok = self.days_of_month.contains(&t.day());
        let dow_ok = self
            .days_of_week
            .contains(&t.weekday().num_days_from_sunday());
        match (self.dom_restricted, self.dow_restricted) {
            (true, true) => dom_ok || dow_ok,
            (true, false) => dom_ok,
            (false, true) => dow_ok,
            (false, false) => true,
        }
    }
}

/// Validate an expression without keeping the parse.
pub fn validate(expression: &str) -> Result<()> {
    CronSpec::parse(expression).map(|_| ())
}

/// Next run time for an expression, or `None` if it is invalid or can
/// never match.
pub fn next_run_from_cron(expression: &str, after: DateTime<Utc>) -> Option<DateTime<Utc>> {
    match CronSpec::parse(expression) {
        Ok(spec) => spec.next_after(after),
        Err(e) => {
            tracing::warn!("⚠️ {e}");
            None
        }
    }
}

/// Expression for a daily broadcast at `hour:minute`.
pub fn daily_expression(hour: u32, minute: u32) -> Result<String> {
    expression_for_time(hour, minute, &[])
}

/// Expression for a broadcast at `hour:minute` on the given weekdays
/// (0 = Sunday). An empty day set means every day.
pub fn expression_for_time(hour: u32, minute: u32, days: &[u32]) -> Result<String> {
    if hour > 23 || minute > 59 {
        return Err(HeraldError::Config(format!(
            "invalid time {hour:02}:{minute:02}"
        )));
    }
    if let Some(bad) = days.iter().find(|d| **d > 7) {
        return Err(HeraldError::Config(format!("invalid weekday {bad}")));
    }
    let dow = if days.is_empty() {
        "*".to_string()
    } else {
        days.iter()
            .map(|d| d.to_string())
            .collect::<Vec<_>>()
            .join(",")
    };
    Ok(format!("{minute} {hour} * * {dow}"))
}

/// Parse one cron field into the set of matching values.
fn parse_field(field: &str, min: u32, max: u32) -> Result<BTreeSet<u32>> {
    let mut values = BTreeSet::new();
    for item in field.split(',') {
        parse_item(item.trim(), min, max, &mut values)
            .map_err(|e| HeraldError::Config(format!("cron field '{field}': {e}")))?;
    }
    if values.is_empty() {
        return Err(HeraldError::Config(format!("cron field '{field}' is empty")));
    }
    Ok(values)
}

fn parse_item(
    item: &str,
    min: u32,
    max: u32,
    out: &mut BTreeSet<u32>,
) -> std::result::Result<(), String> {
    let (range, step) = match item.split_once('/') {
        Some((range, step)) => {
            let step: u32 = step
                .parse()
                .map_err(|_| format!("bad step '{step}'"))?;
            if step == 0 {
                return Err("step must be positive".into());
            }
            (range, step)
        }
        None => (item, 1),
    };

    let (lo, hi) = if range == "*" {
        (min, max)
    } else if let Some((lo, hi)) = range.split_once('-') {
        let lo: u32 = lo.parse().map_err(|_| format!("bad value '{lo}'"))?;
        let hi: u32 = hi.parse().map_err(|_| format!("bad value '{hi}'"))?;
        if lo > hi {
            return Err(format!("range {lo}-{hi} is inverted"));
        }
        (lo, hi)
    } else {
        let n: u32 = range.parse().map_err(|_| format!("bad value '{range}'"))?;
        (n, n)
    };

    if lo < min || hi > max {
        return Err(format!("{lo}-{hi} outside {min}-{max}"));
    }
    out.extend((lo..=hi).step_by(step as usize));
    Ok(())
}
