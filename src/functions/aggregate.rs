//! Window aggregation and selection functions
//!
//! `last`, `first`, `min`, `max`, `avg`, `sum`, `percentile`, `change` and
//! `abschange`. Selection functions (`last`, `first`, `min`, `max`,
//! `percentile`) return the selected sample in its native type; `avg` is
//! always a float, `sum` keeps unsigned arithmetic for unsigned metrics.

use std::cmp::Ordering;

use super::{fetch_range, last_n_value, EvalContext};
use crate::error::{Error, Result};
use crate::params::resolver::{
    resolve_float, resolve_history_range, FloatShape, RangeKind,
};
use crate::params::ParamList;
use crate::types::{EvalItem, EvalValue, HistoryValue, Sample, Timestamp, ValueType};

/// `last([#N|duration][:shift])` — Nth most recent value, N defaults to 1
pub(crate) fn last(
    cx: &EvalContext,
    item: &EvalItem,
    params: &ParamList,
    anchor: Timestamp,
) -> Result<EvalValue> {
    let sample = last_n_value(cx, item, params, 0, anchor)?;
    Ok(EvalValue::from(&sample.value))
}

/// `first(duration[:shift])` — oldest value within the window
///
/// Unlike `last`, the first argument is mandatory and must be a strictly
/// positive duration; count forms are rejected.
pub(crate) fn first(
    cx: &EvalContext,
    item: &EvalItem,
    params: &ParamList,
    anchor: Timestamp,
) -> Result<EvalValue> {
    let range = resolve_history_range(params, 0, anchor.sec)?;

    let seconds = match range.kind {
        RangeKind::Seconds(seconds) => seconds,
        RangeKind::None => {
            return Err(Error::InvalidSyntax(
                "the first argument is not specified".to_string(),
            ))
        }
        RangeKind::Count(_) => {
            return Err(Error::InvalidSyntax(
                "the first argument cannot be a number of values".to_string(),
            ))
        }
    };

    if seconds <= 0 {
        return Err(Error::InvalidSyntax(
            "the first argument must be greater than 0".to_string(),
        ));
    }

    let window = fetch_range(cx, item, &range, anchor)?;

    match window.last() {
        Some(sample) => Ok(EvalValue::from(&sample.value)),
        None => Err(Error::NotEnoughData),
    }
}

/// Selector for [`min_or_max`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Extremum {
    /// Smallest value wins
    Min,
    /// Largest value wins
    Max,
}

/// `min(range)` / `max(range)` over the resolved window
pub(crate) fn min_or_max(
    cx: &EvalContext,
    item: &EvalItem,
    params: &ParamList,
    anchor: Timestamp,
    which: Extremum,
) -> Result<EvalValue> {
    let window = mandatory_window(cx, item, params, anchor)?;

    if window.is_empty() {
        return Err(Error::NotEnoughData);
    }

    let best = window
        .iter()
        .min_by(|a, b| {
            let ord = compare_numeric(&a.value, &b.value);
            match which {
                Extremum::Min => ord,
                Extremum::Max => ord.reverse(),
            }
        })
        .expect("window is non-empty");

    Ok(EvalValue::from(&best.value))
}

/// `avg(range)` — arithmetic mean, always a float
pub(crate) fn avg(
    cx: &EvalContext,
    item: &EvalItem,
    params: &ParamList,
    anchor: Timestamp,
) -> Result<EvalValue> {
    let window = mandatory_window(cx, item, params, anchor)?;

    if window.is_empty() {
        return Err(Error::NotEnoughData);
    }

    let sum: f64 = window.iter().filter_map(|s| s.value.as_f64()).sum();
    Ok(EvalValue::Float(sum / window.len() as f64))
}

/// `sum(range)` — unsigned metrics sum in unsigned arithmetic
pub(crate) fn sum(
    cx: &EvalContext,
    item: &EvalItem,
    params: &ParamList,
    anchor: Timestamp,
) -> Result<EvalValue> {
    let window = mandatory_window(cx, item, params, anchor)?;

    if item.value_type == ValueType::Uint {
        let total = window
            .iter()
            .filter_map(|s| s.value.as_u64())
            .fold(0u64, u64::wrapping_add);
        Ok(EvalValue::Uint(total))
    } else {
        let total: f64 = window.iter().filter_map(|s| s.value.as_f64()).sum();
        Ok(EvalValue::Float(total))
    }
}

/// `percentile(range, pct)` — `ceil(N·pct/100)`-th smallest value
///
/// 1-indexed selection; `pct = 0` selects the single smallest element,
/// `pct = 100` the largest.
pub(crate) fn percentile(
    cx: &EvalContext,
    item: &EvalItem,
    params: &ParamList,
    anchor: Timestamp,
) -> Result<EvalValue> {
    let range = resolve_history_range(params, 0, anchor.sec)?;
    if range.kind == RangeKind::None {
        return Err(Error::bad_param(1));
    }

    let percentage = resolve_float(params, 1, FloatShape::Plain)?;
    if !(0.0..=100.0).contains(&percentage) {
        return Err(Error::bad_param(2));
    }

    let mut window = fetch_range(cx, item, &range, anchor)?;

    if window.is_empty() {
        return Err(Error::NotEnoughData);
    }

    window.sort_by(|a, b| compare_numeric(&a.value, &b.value));

    let index = if percentage == 0.0 {
        1
    } else {
        (window.len() as f64 * percentage / 100.0).ceil() as usize
    };

    Ok(EvalValue::from(&window[index - 1].value))
}

/// `change()` — difference between the two most recent values
///
/// Unsigned underflow produces a signed double instead of wrapping; the
/// string-family types report 0 for equal values and 1 otherwise.
pub(crate) fn change(
    cx: &EvalContext,
    item: &EvalItem,
    params: &ParamList,
    anchor: Timestamp,
) -> Result<EvalValue> {
    change_inner(cx, item, params, anchor, false)
}

/// `abschange()` — absolute value of `change()`
pub(crate) fn abschange(
    cx: &EvalContext,
    item: &EvalItem,
    params: &ParamList,
    anchor: Timestamp,
) -> Result<EvalValue> {
    change_inner(cx, item, params, anchor, true)
}

fn change_inner(
    cx: &EvalContext,
    item: &EvalItem,
    _params: &ParamList,
    anchor: Timestamp,
    absolute: bool,
) -> Result<EvalValue> {
    let window = cx
        .values
        .get_values(item.item_id, item.value_type, 0, 2, anchor)?;

    if window.len() < 2 {
        return Err(Error::NotEnoughData);
    }

    let result = match (&window[0].value, &window[1].value) {
        (HistoryValue::Float(newest), HistoryValue::Float(previous)) => newest - previous,
        (HistoryValue::Uint(newest), HistoryValue::Uint(previous)) => {
            if newest >= previous {
                (newest - previous) as f64
            } else {
                -((previous - newest) as f64)
            }
        }
        (newest, previous) => {
            let equal = match (newest.as_text(), previous.as_text()) {
                (Some(a), Some(b)) => a == b,
                _ => return Err(Error::InvalidValueType),
            };
            if equal {
                0.0
            } else {
                1.0
            }
        }
    };

    Ok(EvalValue::Float(if absolute { result.abs() } else { result }))
}

/// Resolve the single mandatory range parameter and fetch its window
fn mandatory_window(
    cx: &EvalContext,
    item: &EvalItem,
    params: &ParamList,
    anchor: Timestamp,
) -> Result<Vec<Sample>> {
    let range = resolve_history_range(params, 0, anchor.sec)?;
    if range.kind == RangeKind::None {
        return Err(Error::bad_param(1));
    }
    fetch_range(cx, item, &range, anchor)
}

/// Order two numeric history values, NaN-tolerant
pub(crate) fn compare_numeric(a: &HistoryValue, b: &HistoryValue) -> Ordering {
    match (a, b) {
        (HistoryValue::Uint(a), HistoryValue::Uint(b)) => a.cmp(b),
        _ => {
            let a = a.as_f64().unwrap_or(f64::NAN);
            let b = b.as_f64().unwrap_or(f64::NAN);
            a.partial_cmp(&b).unwrap_or(Ordering::Equal)
        }
    }
}
