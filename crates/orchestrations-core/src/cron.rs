//! Five-field cron expressions (`minute hour day-of-month month day-of-week`).
//!
//! Parsing and occurrence arithmetic are delegated to the `cron` crate, which
//! expects a leading seconds field and numbers weekdays 1–7 from Sunday. The
//! expression is therefore normalised before parsing: a `0` seconds field is
//! prepended and Unix weekday numbers (0–7, Sunday = 0 or 7) are rewritten as
//! day names. The original text is what gets stored and compared.
//!
//! When both day-of-month and day-of-week are restricted, a time matches if
//! either field matches. The `cron` crate requires both, so such expressions
//! are split into one schedule per day field and their occurrences merged.

use crate::error::{OrchestrationError, Result};
use chrono::{DateTime, Duration, Utc};
use cron::Schedule;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::iter::Peekable;
use std::str::FromStr;

const FIELD_COUNT: usize = 5;
pub const MAX_LOOKBACK_DAYS: i64 = 366;

#[derive(Clone, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct CronExpression {
    expression: String,
    /// One schedule, or two whose union is the expression.
    schedules: Vec<Schedule>,
}

impl CronExpression {
    pub fn parse(expression: &str) -> Result<Self> {
        let expression = expression.trim();
        let fields: Vec<&str> = expression.split_whitespace().collect();
        if fields.len() != FIELD_COUNT {
            return Err(invalid(
                expression,
                format!("expected {FIELD_COUNT} fields, found {}", fields.len()),
            ));
        }

        let weekday = normalize_weekday_field(fields[4]).map_err(|r| invalid(expression, r))?;
        let (minute, hour, day_of_month, month) = (fields[0], fields[1], fields[2], fields[3]);
        let day_fields = if is_restricted(day_of_month) && is_restricted(&weekday) {
            vec![(day_of_month, "*"), ("*", weekday.as_str())]
        } else {
            vec![(day_of_month, weekday.as_str())]
        };
        let schedules = day_fields
            .into_iter()
            .map(|(dom, dow)| {
                Schedule::from_str(&format!("0 {minute} {hour} {dom} {month} {dow}"))
                    .map_err(|e| invalid(expression, e.to_string()))
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(Self {
            expression: fields.join(" "),
            schedules,
        })
    }

    pub fn as_str(&self) -> &str {
        &self.expression
    }

    /// Fire times strictly after `after`, ascending.
    pub fn occurrences_after(&self, after: DateTime<Utc>) -> impl Iterator<Item = DateTime<Utc>> + '_ {
        Occurrences {
            sources: self
                .schedules
                .iter()
                .map(|schedule| schedule.after(&after).peekable())
                .collect(),
        }
    }

    /// Most recent fire time in `(now - lookback, now]`. The lookback is
    /// capped at [`MAX_LOOKBACK_DAYS`].
    pub fn latest_occurrence(&self, now: DateTime<Utc>, lookback: Duration) -> Option<DateTime<Utc>> {
        let lookback = lookback.min(Duration::days(MAX_LOOKBACK_DAYS));
        let from = now
            .checked_sub_signed(lookback)
            .unwrap_or(DateTime::<Utc>::MIN_UTC);
        self.occurrences_after(from)
            .take_while(|t| *t <= now)
            .last()
    }
}

/// A field starting with `*` leaves its day dimension open.
fn is_restricted(field: &str) -> bool {
    !field.starts_with('*')
}

/// Ascending, de-duplicated merge of per-schedule occurrences.
struct Occurrences<I: Iterator<Item = DateTime<Utc>>> {
    sources: Vec<Peekable<I>>,
}

impl<I: Iterator<Item = DateTime<Utc>>> Iterator for Occurrences<I> {
    type Item = DateTime<Utc>;

    fn next(&mut self) -> Option<Self::Item> {
        let next = self
            .sources
            .iter_mut()
            .filter_map(|source| source.peek().copied())
            .min()?;
        for source in &mut self.sources {
            if source.peek() == Some(&next) {
                source.next();
            }
        }
        Some(next)
    }
}

fn invalid(expression: &str, reason: impl Into<String>) -> OrchestrationError {
    OrchestrationError::InvalidCronExpression {
        expression: expression.to_string(),
        reason: reason.into(),
    }
}

// ---------------------------------------------------------------------------
// Weekday normalisation
// ---------------------------------------------------------------------------

fn normalize_weekday_field(field: &str) -> std::result::Result<String, String> {
    let items = field
        .split(',')
        .map(|item| {
            let (range, step) = match item.split_once('/') {
                Some((range, step)) => (range, Some(step)),
                None => (item, None),
            };
            let range = range
                .split('-')
                .map(weekday_token)
                .collect::<std::result::Result<Vec<_>, _>>()?
                .join("-");
            Ok(match step {
                Some(step) => format!("{range}/{step}"),
                None => range,
            })
        })
        .collect::<std::result::Result<Vec<_>, String>>()?;
    Ok(items.join(","))
}

fn weekday_token(token: &str) -> std::result::Result<String, String> {
    if token.is_empty() || !token.bytes().all(|b| b.is_ascii_digit()) {
        return Ok(token.to_string());
    }
    let name = match token.parse::<u8>() {
        Ok(0 | 7) => "Sun",
        Ok(1) => "Mon",
        Ok(2) => "Tue",
        Ok(3) => "Wed",
        Ok(4) => "Thu",
        Ok(5) => "Fri",
        Ok(6) => "Sat",
        _ => return Err(format!("day-of-week '{token}' out of range 0-7")),
    };
    Ok(name.to_string())
}

// ---------------------------------------------------------------------------
// Trait impls
// ---------------------------------------------------------------------------

impl fmt::Debug for CronExpression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("CronExpression")
            .field(&self.expression)
            .finish()
    }
}

impl fmt::Display for CronExpression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.expression)
    }
}

impl PartialEq for CronExpression {
    fn eq(&self, other: &Self) -> bool {
        self.expression == other.expression
    }
}

impl Eq for CronExpression {}

impl FromStr for CronExpression {
    type Err = OrchestrationError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl TryFrom<String> for CronExpression {
    type Error = OrchestrationError;

    fn try_from(value: String) -> Result<Self> {
        Self::parse(&value)
    }
}

impl From<CronExpression> for String {
    fn from(value: CronExpression) -> Self {
        value.expression
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Datelike, TimeZone, Timelike, Weekday};

    #[test]
    fn accepts_five_field_expressions() {
        for expr in ["0 9,14 * * *", "0 2 * * 1-5", "*/15 * * * *", "30 6 1 * 0"] {
            CronExpression::parse(expr).unwrap_or_else(|e| panic!("{expr}: {e}"));
        }
    }

    #[test]
    fn rejects_wrong_field_count_and_garbage() {
        for expr in ["", "* * * *", "0 0 9 * * *", "not a cron at all x", "61 * * * *", "0 2 * * 9"] {
            assert!(
                matches!(
                    CronExpression::parse(expr),
                    Err(OrchestrationError::InvalidCronExpression { .. })
                ),
                "expected invalid: {expr:?}"
            );
        }
    }

    #[test]
    fn weekdays_use_unix_numbering() {
        // 2024-01-06 is a Saturday; "1-5" must skip to Monday 2024-01-08.
        let cron = CronExpression::parse("0 2 * * 1-5").unwrap();
        let sat = Utc.with_ymd_and_hms(2024, 1, 6, 0, 0, 0).unwrap();
        let next = cron.occurrences_after(sat).next().unwrap();
        assert_eq!(next.weekday(), Weekday::Mon);
        assert_eq!(next.hour(), 2);

        let sunday = CronExpression::parse("0 0 * * 0").unwrap();
        let next = sunday.occurrences_after(sat).next().unwrap();
        assert_eq!(next.weekday(), Weekday::Sun);
    }

    #[test]
    fn restricted_day_of_month_and_weekday_match_either() {
        // Every 13th plus every Friday; 2024-01-05 is the first Friday.
        let cron = CronExpression::parse("0 0 13 * 5").unwrap();
        let start = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let days: Vec<(u32, Weekday)> = cron
            .occurrences_after(start)
            .take(4)
            .map(|t| (t.day(), t.weekday()))
            .collect();
        assert_eq!(
            days,
            vec![
                (5, Weekday::Fri),
                (12, Weekday::Fri),
                (13, Weekday::Sat),
                (19, Weekday::Fri),
            ]
        );

        // A day that matches both fields fires once.
        let before_friday_13th = Utc.with_ymd_and_hms(2024, 9, 12, 12, 0, 0).unwrap();
        let next_two: Vec<_> = cron.occurrences_after(before_friday_13th).take(2).collect();
        assert_eq!(next_two[0], Utc.with_ymd_and_hms(2024, 9, 13, 0, 0, 0).unwrap());
        assert_eq!(next_two[1], Utc.with_ymd_and_hms(2024, 9, 20, 0, 0, 0).unwrap());
    }

    #[test]
    fn latest_occurrence_tolerates_huge_lookback() {
        let cron = CronExpression::parse("0 2 * * 1-5").unwrap();
        let now = Utc.with_ymd_and_hms(2024, 1, 2, 2, 0, 0).unwrap();
        assert_eq!(
            cron.latest_occurrence(now, Duration::days(200_000_000)),
            Some(now)
        );
    }

    #[test]
    fn latest_occurrence_is_boundary_inclusive() {
        let cron = CronExpression::parse("0 9,14 * * *").unwrap();
        let at_nine = Utc.with_ymd_and_hms(2024, 3, 5, 9, 0, 0).unwrap();
        assert_eq!(
            cron.latest_occurrence(at_nine, Duration::minutes(1)),
            Some(at_nine)
        );

        let later = at_nine + Duration::seconds(59);
        assert_eq!(
            cron.latest_occurrence(later, Duration::minutes(1)),
            Some(at_nine)
        );

        let too_late = at_nine + Duration::minutes(2);
        assert_eq!(cron.latest_occurrence(too_late, Duration::minutes(1)), None);
    }

    #[test]
    fn serializes_as_original_text() {
        let cron = CronExpression::parse("0  2 * *   1-5").unwrap();
        let json = serde_json::to_string(&cron).unwrap();
        assert_eq!(json, "\"0 2 * * 1-5\"");

        let back: CronExpression = serde_json::from_str(&json).unwrap();
        assert_eq!(back, cron);
        assert!(serde_json::from_str::<CronExpression>("\"bad\"").is_err());
    }
}
