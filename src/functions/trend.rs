//! Trend-bucket aggregation and seasonal baselines
//!
//! The `trend*` family reads pre-aggregated hourly buckets instead of raw
//! samples. Its single parameter is a period expression
//! `<period>:<period_shift>` — e.g. `1d:now/d` is "yesterday", `1M:now/M`
//! "last month" — resolved into inclusive hour-aligned bucket clocks.
//!
//! `baselinewma`/`baselinedev` reuse the same period grammar and gather one
//! aggregated value per season instance (the same period shifted back by
//! whole days/weeks/months/...), producing a weighted average or a deviation
//! score against the seasonal history.

use tracing::debug;

use super::EvalContext;
use crate::error::{Error, Result};
use crate::params::resolver::resolve_string;
use crate::params::time::{
    apply_time_expr, parse_calendar_period, parse_time_expr, step_time, TimeUnit,
};
use crate::params::ParamList;
use crate::source::TrendStat;
use crate::types::{EvalItem, EvalValue, Timestamp};

/// Seconds per trend bucket
pub(crate) const BUCKET_SECONDS: i64 = 3600;

/// Resolve a `<period>:<period_shift>` expression into inclusive bucket
/// clocks `[start, end]`
///
/// The period unit must be one hour or larger; every unit in the shift
/// expression must be at least as large as the period unit, and the shift
/// must land on an hour boundary.
pub(crate) fn parse_trend_range(anchor: i64, text: &str) -> Result<(i64, i64)> {
    let (period_text, shift_text) = text.split_once(':').ok_or_else(|| {
        Error::InvalidSyntax(format!("period \"{}\" is missing a period shift", text))
    })?;

    let (count, unit) = parse_calendar_period(period_text)?;

    let steps = parse_time_expr(shift_text)?;
    if steps.iter().any(|step| step.unit() < unit) {
        return Err(Error::InvalidSyntax(
            "time units in the period shift must not be smaller than the period unit".to_string(),
        ));
    }

    let boundary = apply_time_expr(anchor, &steps)?;
    if boundary.rem_euclid(BUCKET_SECONDS) != 0 {
        return Err(Error::InvalidSyntax(
            "the period shift must resolve to an hour boundary".to_string(),
        ));
    }

    let start = step_time(boundary, true, count, unit)?;

    Ok((start, boundary - BUCKET_SECONDS))
}

/// Shared implementation of `trendavg/min/max/sum/count`
pub(crate) fn trend_aggregate(
    cx: &EvalContext,
    item: &EvalItem,
    params: &ParamList,
    anchor: Timestamp,
    stat: TrendStat,
) -> Result<EvalValue> {
    let period = resolve_string(params, 0)?;
    let (start, end) = parse_trend_range(anchor.sec, &period)?;

    debug!(item = item.item_id, start, end, "aggregating trend buckets");

    match cx.trends.get_trend_aggregate(item.item_id, start, end, stat)? {
        Some(value) => Ok(EvalValue::Float(value)),
        // an empty range legitimately counts zero values
        None if stat == TrendStat::Count => Ok(EvalValue::Float(0.0)),
        None => Err(Error::NotEnoughData),
    }
}

pub(crate) fn trendavg(
    cx: &EvalContext,
    item: &EvalItem,
    params: &ParamList,
    anchor: Timestamp,
) -> Result<EvalValue> {
    trend_aggregate(cx, item, params, anchor, TrendStat::Avg)
}

pub(crate) fn trendmin(
    cx: &EvalContext,
    item: &EvalItem,
    params: &ParamList,
    anchor: Timestamp,
) -> Result<EvalValue> {
    trend_aggregate(cx, item, params, anchor, TrendStat::Min)
}

pub(crate) fn trendmax(
    cx: &EvalContext,
    item: &EvalItem,
    params: &ParamList,
    anchor: Timestamp,
) -> Result<EvalValue> {
    trend_aggregate(cx, item, params, anchor, TrendStat::Max)
}

pub(crate) fn trendsum(
    cx: &EvalContext,
    item: &EvalItem,
    params: &ParamList,
    anchor: Timestamp,
) -> Result<EvalValue> {
    trend_aggregate(cx, item, params, anchor, TrendStat::Sum)
}

pub(crate) fn trendcount(
    cx: &EvalContext,
    item: &EvalItem,
    params: &ParamList,
    anchor: Timestamp,
) -> Result<EvalValue> {
    trend_aggregate(cx, item, params, anchor, TrendStat::Count)
}

// ============================================================================
// Baselines
// ============================================================================

/// Season stepping unit; anything below one hour makes no sense for hourly
/// buckets
fn parse_season_unit(text: &str) -> Result<TimeUnit> {
    let mut chars = text.chars();
    let unit = chars
        .next()
        .and_then(TimeUnit::from_suffix)
        .filter(|_| chars.next().is_none());

    match unit {
        Some(unit) if unit >= TimeUnit::Hour => Ok(unit),
        _ => Err(Error::InvalidSyntax(format!(
            "invalid season unit \"{}\"",
            text
        ))),
    }
}

/// One trend average per season shift where the shifted period has data
///
/// Returns `(value, shift)` pairs in the order the shifts were probed.
fn gather_seasons(
    cx: &EvalContext,
    item: &EvalItem,
    start: i64,
    end: i64,
    unit: TimeUnit,
    shifts: impl Iterator<Item = i64>,
) -> Result<Vec<(f64, i64)>> {
    let mut values = Vec::new();

    for shift in shifts {
        let season_start = step_time(start, true, shift, unit)?;
        let season_end = step_time(end, true, shift, unit)?;

        if let Some(value) =
            cx.trends
                .get_trend_aggregate(item.item_id, season_start, season_end, TrendStat::Avg)?
        {
            values.push((value, shift));
        }
    }

    Ok(values)
}

/// `baselinewma(period, season_unit, season_count)`
///
/// Weighted average over the same period in prior seasons, the most recent
/// season weighted highest (linear weights `count .. 1`).
pub(crate) fn baselinewma(
    cx: &EvalContext,
    item: &EvalItem,
    params: &ParamList,
    anchor: Timestamp,
) -> Result<EvalValue> {
    let (start, end, unit, season_count) = baseline_args(params, anchor)?;

    let seasons = gather_seasons(cx, item, start, end, unit, 1..=season_count)?;

    if seasons.is_empty() {
        return Err(Error::NotEnoughData);
    }

    let mut weighted_sum = 0.0;
    let mut weights = 0i64;

    for &(value, shift) in &seasons {
        let weight = season_count + 1 - shift;
        weighted_sum += value * weight as f64;
        weights += weight;
    }

    Ok(EvalValue::Float(weighted_sum / weights as f64))
}

/// `baselinedev(period, season_unit, season_count)`
///
/// Number of population standard deviations between the current period and
/// the same period across preceding seasons; 0 when the spread collapses
/// below the numeric tolerance.
pub(crate) fn baselinedev(
    cx: &EvalContext,
    item: &EvalItem,
    params: &ParamList,
    anchor: Timestamp,
) -> Result<EvalValue> {
    let (start, end, unit, season_count) = baseline_args(params, anchor)?;

    let seasons = gather_seasons(cx, item, start, end, unit, 0..=season_count)?;

    // the deviation of the current period is the quantity being measured
    match seasons.first() {
        Some(&(_, shift)) if shift == 0 => {}
        _ => return Err(Error::NotEnoughData),
    }

    if seasons.len() < 2 {
        return Err(Error::NotEnoughData);
    }

    let values: Vec<f64> = seasons.iter().map(|&(v, _)| v).collect();
    let deviation = super::stats::stddev_pop(&values);

    let score = if deviation >= crate::types::DOUBLE_EPSILON {
        (values[0] - super::stats::mean(&values)).abs() / deviation
    } else {
        0.0
    };

    Ok(EvalValue::Float(score))
}

fn baseline_args(params: &ParamList, anchor: Timestamp) -> Result<(i64, i64, TimeUnit, i64)> {
    let period = resolve_string(params, 0)?;
    let (start, end) = parse_trend_range(anchor.sec, &period)?;

    let unit = parse_season_unit(&resolve_string(params, 1)?)?;

    let count_text = resolve_string(params, 2)?;
    let season_count: i64 = count_text
        .parse()
        .ok()
        .filter(|&n| n > 0)
        .ok_or_else(|| Error::bad_param(3))?;

    Ok((start, end, unit, season_count))
}
