//! Time unit and duration primitives
//!
//! Pure parsing of the compact time syntax used by function parameters:
//!
//! - durations with suffix: `30s`, `5m`, `2h`, `1d`, `1w` (no suffix = seconds)
//! - counts: `#5`
//! - floats with optional multiplier suffix: `1.5K`, `2h`, `512M`
//! - calendar periods for trend functions: `1h`, `1d`, `1w`, `1M`, `1y`
//! - relative time expressions: `now/h`, `now-1d`, `now/d-1d`, `now/M+3d`
//!
//! Relative expressions are resolved against an anchor time with
//! calendar-aware arithmetic (UTC): `/unit` rounds down to the unit boundary,
//! `+`/`-` steps by whole units, where months and years step by calendar
//! rather than by a fixed number of seconds.

use chrono::{DateTime, Datelike, Duration, Months, TimeZone, Timelike, Utc};
use nom::{
    branch::alt,
    bytes::complete::tag,
    character::complete::{char, digit1, one_of},
    combinator::{all_consuming, map, opt},
    multi::many0,
    sequence::{pair, preceded},
    IResult,
};

use crate::error::{Error, Result};

/// Calendar time unit
///
/// Ordered from smallest to largest so that unit constraints
/// ("shift units must not be smaller than the period unit") are plain
/// comparisons.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum TimeUnit {
    /// One second
    Second,
    /// 60 seconds
    Minute,
    /// 3600 seconds
    Hour,
    /// 86400 seconds
    Day,
    /// 7 days
    Week,
    /// Calendar month
    Month,
    /// Calendar year
    Year,
}

impl TimeUnit {
    /// Map a suffix character to its unit
    pub fn from_suffix(c: char) -> Option<TimeUnit> {
        match c {
            's' => Some(TimeUnit::Second),
            'm' => Some(TimeUnit::Minute),
            'h' => Some(TimeUnit::Hour),
            'd' => Some(TimeUnit::Day),
            'w' => Some(TimeUnit::Week),
            'M' => Some(TimeUnit::Month),
            'y' => Some(TimeUnit::Year),
            _ => None,
        }
    }

    /// Fixed length in seconds; `None` for calendar-stepped units
    pub fn fixed_seconds(&self) -> Option<i64> {
        match self {
            TimeUnit::Second => Some(1),
            TimeUnit::Minute => Some(60),
            TimeUnit::Hour => Some(3600),
            TimeUnit::Day => Some(86400),
            TimeUnit::Week => Some(7 * 86400),
            TimeUnit::Month | TimeUnit::Year => None,
        }
    }
}

/// One step of a relative time expression after the `now` anchor
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum TimeExprStep {
    /// `/unit`: round down to the start of the unit
    RoundDown(TimeUnit),
    /// `+N<unit>` / `-N<unit>`: step by whole units
    Offset {
        /// True for `-`
        negative: bool,
        /// Number of units, non-negative
        amount: i64,
        /// Step unit
        unit: TimeUnit,
    },
}

impl TimeExprStep {
    /// The unit this step operates in
    pub fn unit(&self) -> TimeUnit {
        match self {
            TimeExprStep::RoundDown(unit) => *unit,
            TimeExprStep::Offset { unit, .. } => *unit,
        }
    }
}

// ============================================================================
// Durations and counts
// ============================================================================

/// Parse a non-negative duration with optional `s/m/h/d/w` suffix into seconds
///
/// No suffix means seconds. Fails on empty input, trailing garbage, negative
/// values and overflow.
pub fn parse_duration(text: &str) -> Result<i64> {
    let (digits, suffix) = split_suffix(text);

    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return Err(Error::InvalidSyntax(format!("invalid duration \"{}\"", text)));
    }

    let value: i64 = digits
        .parse()
        .map_err(|_| Error::InvalidSyntax(format!("duration \"{}\" is too large", text)))?;

    let multiplier = match suffix {
        None => 1,
        Some(c) => match TimeUnit::from_suffix(c).and_then(|u| u.fixed_seconds()) {
            Some(seconds) => seconds,
            None => {
                return Err(Error::InvalidSyntax(format!(
                    "unexpected duration suffix \"{}\"",
                    c
                )))
            }
        },
    };

    value
        .checked_mul(multiplier)
        .ok_or_else(|| Error::InvalidSyntax(format!("duration \"{}\" is too large", text)))
}

/// Parse a duration allowing a leading `-` ("seconds before now" sugar)
pub fn parse_signed_duration(text: &str) -> Result<i64> {
    match text.strip_prefix('-') {
        Some(rest) => parse_duration(rest).map(|v| -v),
        None => parse_duration(text),
    }
}

/// Parse a `#N` count parameter, `N` a positive 31-bit integer
pub fn parse_count(text: &str) -> Result<usize> {
    let digits = text
        .strip_prefix('#')
        .ok_or_else(|| Error::InvalidSyntax(format!("invalid count \"{}\"", text)))?;

    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return Err(Error::InvalidSyntax(format!("invalid count \"{}\"", text)));
    }

    let value: i64 = digits
        .parse()
        .map_err(|_| Error::InvalidSyntax(format!("count \"{}\" is too large", text)))?;

    if value < 1 || value > i32::MAX as i64 {
        return Err(Error::InvalidSyntax(format!("invalid count \"{}\"", text)));
    }

    Ok(value as usize)
}

/// Parse a calendar period `N<h|d|w|M|y>` for trend range expressions
///
/// Units below one hour are rejected: trend buckets are hourly.
pub fn parse_calendar_period(text: &str) -> Result<(i64, TimeUnit)> {
    let (digits, suffix) = split_suffix(text);

    let unit = match suffix.and_then(TimeUnit::from_suffix) {
        Some(unit) if unit >= TimeUnit::Hour => unit,
        Some(_) => {
            return Err(Error::InvalidSyntax(format!(
                "period \"{}\" must be defined in hours or larger units",
                text
            )))
        }
        None => return Err(Error::InvalidSyntax(format!("invalid period \"{}\"", text))),
    };

    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return Err(Error::InvalidSyntax(format!("invalid period \"{}\"", text)));
    }

    let value: i64 = digits
        .parse()
        .map_err(|_| Error::InvalidSyntax(format!("period \"{}\" is too large", text)))?;

    if value < 1 {
        return Err(Error::InvalidSyntax(format!("invalid period \"{}\"", text)));
    }

    Ok((value, unit))
}

/// Parse a float with an optional multiplier suffix
///
/// `K/M/G/T` are 1024-based, `s/m/h/d/w` are second multipliers. The numeric
/// part accepts anything Rust's float grammar accepts.
pub fn parse_suffixed_float(text: &str) -> Result<f64> {
    let (number, multiplier) = match text.char_indices().last() {
        Some((idx, c)) if c.is_ascii_alphabetic() => {
            let multiplier = match c {
                'K' => 1024.0,
                'M' => 1024.0 * 1024.0,
                'G' => 1024.0 * 1024.0 * 1024.0,
                'T' => 1024.0 * 1024.0 * 1024.0 * 1024.0,
                's' => 1.0,
                'm' => 60.0,
                'h' => 3600.0,
                'd' => 86400.0,
                'w' => 7.0 * 86400.0,
                _ => {
                    return Err(Error::InvalidSyntax(format!(
                        "unexpected suffix in \"{}\"",
                        text
                    )))
                }
            };
            (&text[..idx], multiplier)
        }
        _ => (text, 1.0),
    };

    parse_plain_float(number).map(|v| v * multiplier)
}

/// Parse a float with no suffix allowed
pub fn parse_plain_float(text: &str) -> Result<f64> {
    let value: f64 = text
        .trim()
        .parse()
        .map_err(|_| Error::InvalidSyntax(format!("invalid numeric value \"{}\"", text)))?;

    if !value.is_finite() {
        return Err(Error::InvalidSyntax(format!(
            "invalid numeric value \"{}\"",
            text
        )));
    }

    Ok(value)
}

/// Split a trailing alphabetic suffix character off a token
fn split_suffix(text: &str) -> (&str, Option<char>) {
    match text.char_indices().last() {
        Some((idx, c)) if c.is_ascii_alphabetic() => (&text[..idx], Some(c)),
        _ => (text, None),
    }
}

// ============================================================================
// Relative time expressions
// ============================================================================

/// Parse a `now`-anchored relative time expression into its steps
pub fn parse_time_expr(expr: &str) -> Result<Vec<TimeExprStep>> {
    match all_consuming(preceded(tag("now"), many0(time_expr_step)))(expr) {
        Ok((_, steps)) => Ok(steps),
        Err(_) => Err(Error::InvalidSyntax(format!(
            "invalid time expression \"{}\"",
            expr
        ))),
    }
}

fn time_expr_step(input: &str) -> IResult<&str, TimeExprStep> {
    alt((round_down_step, offset_step))(input)
}

fn round_down_step(input: &str) -> IResult<&str, TimeExprStep> {
    map(preceded(char('/'), time_unit), TimeExprStep::RoundDown)(input)
}

fn offset_step(input: &str) -> IResult<&str, TimeExprStep> {
    map(
        pair(one_of("+-"), pair(digit1, opt(time_unit))),
        |(sign, (digits, unit)): (char, (&str, Option<TimeUnit>))| TimeExprStep::Offset {
            negative: sign == '-',
            // digit1 bounds the token; values beyond i64 saturate and fail
            // later in apply_time_expr through chrono range checks
            amount: digits.parse().unwrap_or(i64::MAX),
            unit: unit.unwrap_or(TimeUnit::Second),
        },
    )(input)
}

fn time_unit(input: &str) -> IResult<&str, TimeUnit> {
    map(one_of("smhdwMy"), |c| {
        TimeUnit::from_suffix(c).expect("one_of admits only unit suffixes")
    })(input)
}

/// Resolve a parsed expression against an anchor into an absolute time
pub fn apply_time_expr(anchor: i64, steps: &[TimeExprStep]) -> Result<i64> {
    let mut current = datetime_from_sec(anchor)?;

    for step in steps {
        current = match *step {
            TimeExprStep::RoundDown(unit) => round_down(current, unit),
            TimeExprStep::Offset {
                negative,
                amount,
                unit,
            } => offset(current, negative, amount, unit)?,
        };
    }

    Ok(current.timestamp())
}

/// Resolve a textual `now...` expression against an anchor time
pub fn resolve_relative_time(anchor: i64, expr: &str) -> Result<i64> {
    let steps = parse_time_expr(expr)?;
    apply_time_expr(anchor, &steps)
}

/// Round a time down to the start of a unit (UTC)
pub fn floor_to_unit(time: i64, unit: TimeUnit) -> Result<i64> {
    Ok(round_down(datetime_from_sec(time)?, unit).timestamp())
}

/// Step a time by whole units, calendar-aware (UTC)
pub fn step_time(time: i64, negative: bool, amount: i64, unit: TimeUnit) -> Result<i64> {
    Ok(offset(datetime_from_sec(time)?, negative, amount, unit)?.timestamp())
}

fn datetime_from_sec(sec: i64) -> Result<DateTime<Utc>> {
    Utc.timestamp_opt(sec, 0)
        .single()
        .ok_or_else(|| Error::InvalidSyntax(format!("time {} is out of range", sec)))
}

fn round_down(time: DateTime<Utc>, unit: TimeUnit) -> DateTime<Utc> {
    let midnight = |t: DateTime<Utc>| {
        t.with_hour(0)
            .and_then(|t| t.with_minute(0))
            .and_then(|t| t.with_second(0))
            .expect("midnight is always representable")
    };

    match unit {
        TimeUnit::Second => time,
        TimeUnit::Minute => time.with_second(0).expect("zero seconds is representable"),
        TimeUnit::Hour => time
            .with_minute(0)
            .and_then(|t| t.with_second(0))
            .expect("hour start is representable"),
        TimeUnit::Day => midnight(time),
        TimeUnit::Week => {
            let days_from_monday = time.weekday().num_days_from_monday() as i64;
            midnight(time - Duration::days(days_from_monday))
        }
        TimeUnit::Month => midnight(time.with_day(1).expect("day 1 exists in every month")),
        TimeUnit::Year => midnight(
            time.with_month(1)
                .and_then(|t| t.with_day(1))
                .expect("January 1st exists in every year"),
        ),
    }
}

fn offset(
    time: DateTime<Utc>,
    negative: bool,
    amount: i64,
    unit: TimeUnit,
) -> Result<DateTime<Utc>> {
    let out_of_range = || Error::InvalidSyntax("time expression is out of range".to_string());

    match unit.fixed_seconds() {
        Some(unit_seconds) => {
            let seconds = amount.checked_mul(unit_seconds).ok_or_else(out_of_range)?;
            let delta = Duration::seconds(seconds);
            let shifted = if negative { time - delta } else { time + delta };
            Ok(shifted)
        }
        None => {
            let months = match unit {
                TimeUnit::Month => amount,
                _ => amount.checked_mul(12).ok_or_else(out_of_range)?,
            };
            let months = u32::try_from(months).map_err(|_| out_of_range())?;
            let shifted = if negative {
                time.checked_sub_months(Months::new(months))
            } else {
                time.checked_add_months(Months::new(months))
            };
            shifted.ok_or_else(out_of_range)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_duration_suffixes() {
        assert_eq!(parse_duration("30s").unwrap(), 30);
        assert_eq!(parse_duration("5m").unwrap(), 300);
        assert_eq!(parse_duration("2h").unwrap(), 7200);
        assert_eq!(parse_duration("1d").unwrap(), 86400);
        assert_eq!(parse_duration("1w").unwrap(), 604800);
        assert_eq!(parse_duration("90").unwrap(), 90);
        assert_eq!(parse_duration("0").unwrap(), 0);
    }

    #[test]
    fn test_parse_duration_rejects_garbage() {
        assert!(parse_duration("").is_err());
        assert!(parse_duration("-30").is_err());
        assert!(parse_duration("30q").is_err());
        assert!(parse_duration("3 0").is_err());
        assert!(parse_duration("1M").is_err()); // calendar units are not durations
        assert!(parse_duration("99999999999999999999").is_err());
    }

    #[test]
    fn test_parse_signed_duration() {
        assert_eq!(parse_signed_duration("-30m").unwrap(), -1800);
        assert_eq!(parse_signed_duration("30m").unwrap(), 1800);
    }

    #[test]
    fn test_parse_count() {
        assert_eq!(parse_count("#1").unwrap(), 1);
        assert_eq!(parse_count("#2147483647").unwrap(), i32::MAX as usize);
        assert!(parse_count("#0").is_err());
        assert!(parse_count("#-1").is_err());
        assert!(parse_count("#").is_err());
        assert!(parse_count("5").is_err());
        assert!(parse_count("#2147483648").is_err());
    }

    #[test]
    fn test_parse_suffixed_float() {
        assert_eq!(parse_suffixed_float("1.5K").unwrap(), 1536.0);
        assert_eq!(parse_suffixed_float("2h").unwrap(), 7200.0);
        assert_eq!(parse_suffixed_float("-2").unwrap(), -2.0);
        assert!(parse_suffixed_float("2x").is_err());
    }

    #[test]
    fn test_parse_plain_float() {
        assert_eq!(parse_plain_float("99.5").unwrap(), 99.5);
        assert!(parse_plain_float("99.5K").is_err());
        assert!(parse_plain_float("nan").is_err());
    }

    #[test]
    fn test_calendar_period() {
        assert_eq!(parse_calendar_period("1h").unwrap(), (1, TimeUnit::Hour));
        assert_eq!(parse_calendar_period("2d").unwrap(), (2, TimeUnit::Day));
        assert_eq!(parse_calendar_period("1M").unwrap(), (1, TimeUnit::Month));
        assert!(parse_calendar_period("30m").is_err());
        assert!(parse_calendar_period("1").is_err());
        assert!(parse_calendar_period("0d").is_err());
    }

    // 2023-11-15 14:30:30 UTC, a Wednesday
    const ANCHOR: i64 = 1700058630;

    #[test]
    fn test_resolve_now() {
        assert_eq!(resolve_relative_time(ANCHOR, "now").unwrap(), ANCHOR);
    }

    #[test]
    fn test_resolve_offsets() {
        assert_eq!(
            resolve_relative_time(ANCHOR, "now-1d").unwrap(),
            ANCHOR - 86400
        );
        assert_eq!(
            resolve_relative_time(ANCHOR, "now+2h").unwrap(),
            ANCHOR + 7200
        );
        assert_eq!(
            resolve_relative_time(ANCHOR, "now-90").unwrap(),
            ANCHOR - 90
        );
    }

    #[test]
    fn test_resolve_round_down() {
        // 14:30:30 -> 14:00:00
        assert_eq!(
            resolve_relative_time(ANCHOR, "now/h").unwrap(),
            ANCHOR - 30 * 60 - 30
        );
        // midnight of the same day
        assert_eq!(
            resolve_relative_time(ANCHOR, "now/d").unwrap(),
            ANCHOR - 14 * 3600 - 30 * 60 - 30
        );
        // Wednesday rounds down to Monday midnight
        let monday = resolve_relative_time(ANCHOR, "now/w").unwrap();
        assert_eq!(
            monday,
            resolve_relative_time(ANCHOR, "now/d").unwrap() - 2 * 86400
        );
    }

    #[test]
    fn test_resolve_combined() {
        // start of yesterday
        let expected = resolve_relative_time(ANCHOR, "now/d").unwrap() - 86400;
        assert_eq!(resolve_relative_time(ANCHOR, "now/d-1d").unwrap(), expected);
    }

    #[test]
    fn test_resolve_calendar_month() {
        // 2023-11-15 back one month is 2023-10-15, same time of day
        let shifted = resolve_relative_time(ANCHOR, "now-1M").unwrap();
        assert_eq!(shifted, ANCHOR - 31 * 86400);
    }

    #[test]
    fn test_resolve_rejects_garbage() {
        assert!(resolve_relative_time(ANCHOR, "").is_err());
        assert!(resolve_relative_time(ANCHOR, "yesterday").is_err());
        assert!(resolve_relative_time(ANCHOR, "now-").is_err());
        assert!(resolve_relative_time(ANCHOR, "now/q").is_err());
        assert!(resolve_relative_time(ANCHOR, "now-1d extra").is_err());
    }
}
