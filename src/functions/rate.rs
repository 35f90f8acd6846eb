//! Counter-rate and sequence functions
//!
//! `rate` compensates counter resets and extrapolates the observed interval
//! to the requested range; `changecount` counts directed changes between
//! consecutive samples; `monoinc`/`monodec` test monotonicity of the window.

use super::{fetch_range, EvalContext};
use crate::error::{Error, Result};
use crate::params::resolver::{resolve_history_range, RangeKind};
use crate::params::ParamList;
use crate::types::{double_eq, EvalItem, EvalValue, HistoryValue, Timestamp, ValueType};

/// Gap-model policy for `rate` extrapolation. A boundary gap shorter than
/// `GAP_THRESHOLD_FACTOR` times the average sample spacing is covered in
/// full; a longer gap contributes only half the average spacing.
const GAP_THRESHOLD_FACTOR: f64 = 1.1;

/// `rate(range)` — per-second rate of a monotonically growing counter
pub(crate) fn rate(
    cx: &EvalContext,
    item: &EvalItem,
    params: &ParamList,
    anchor: Timestamp,
) -> Result<EvalValue> {
    let range = resolve_history_range(params, 0, anchor.sec)?;
    if range.kind == RangeKind::None {
        return Err(Error::bad_param(1));
    }

    let window = fetch_range(cx, item, &range, anchor)?;

    if window.len() < 2 {
        return Err(Error::NotEnoughData);
    }

    let newest = &window[0];
    let oldest = &window[window.len() - 1];
    let value_of = |v: &HistoryValue| v.as_f64().unwrap_or(0.0);

    // reset detection: walking oldest to newest, every drop is a counter
    // restart from zero, so the pre-reset value is added back
    let mut delta = value_of(&newest.value) - value_of(&oldest.value);
    let mut last = 0.0;

    for sample in window.iter().rev() {
        let value = value_of(&sample.value);
        if !double_eq(value, last) && value < last {
            delta += last;
        }
        last = value;
    }

    // extrapolation over the requested range
    let range_seconds = match range.kind {
        RangeKind::Seconds(seconds) => seconds as f64,
        _ => newest.ts.as_secs_f64() - oldest.ts.as_secs_f64(),
    };

    let end = anchor.sec as f64 + anchor.ns as f64 / 1e9 - range.time_shift as f64;
    let range_start = end - range_seconds;

    let sampled_interval = newest.ts.as_secs_f64() - oldest.ts.as_secs_f64();
    if sampled_interval <= 0.0 || range_seconds <= 0.0 {
        return Err(Error::NotEnoughData);
    }

    let mut gap_start = oldest.ts.as_secs_f64() - range_start;
    let gap_end = end - newest.ts.as_secs_f64();
    let average_spacing = sampled_interval / (window.len() - 1) as f64;

    // a rising counter that started non-negative cannot predate its own
    // zero crossing; clamp the leading gap to that estimate
    if delta > 0.0 && value_of(&oldest.value) >= 0.0 {
        let zero = sampled_interval * (value_of(&oldest.value) / delta);
        if zero < gap_start {
            gap_start = zero;
        }
    }

    let threshold = average_spacing * GAP_THRESHOLD_FACTOR;
    let mut interval = sampled_interval;

    interval += if gap_start < threshold {
        gap_start
    } else {
        average_spacing / 2.0
    };

    interval += if gap_end < threshold {
        gap_end
    } else {
        average_spacing / 2.0
    };

    Ok(EvalValue::Float(
        (delta * (interval / sampled_interval)) / range_seconds,
    ))
}

/// Direction filter for `changecount`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ChangeMode {
    All,
    Inc,
    Dec,
}

/// `changecount(range, mode?)` — number of changes between consecutive samples
pub(crate) fn changecount(
    cx: &EvalContext,
    item: &EvalItem,
    params: &ParamList,
    anchor: Timestamp,
) -> Result<EvalValue> {
    let range = resolve_history_range(params, 0, anchor.sec)?;
    if range.kind == RangeKind::None {
        return Err(Error::bad_param(1));
    }

    let mode = match params.get(1) {
        None | Some("") | Some("all") => ChangeMode::All,
        Some("inc") => ChangeMode::Inc,
        Some("dec") => ChangeMode::Dec,
        Some(_) => return Err(Error::bad_param(2)),
    };

    let window = fetch_range(cx, item, &range, anchor)?;

    if window.len() < 2 {
        return Err(Error::NotEnoughData);
    }

    let mut count: u64 = 0;

    // window is newest-first: pairs walk (older, newer)
    for pair in window.windows(2) {
        let (newer, older) = (&pair[0].value, &pair[1].value);

        let changed = match item.value_type {
            ValueType::Uint => {
                let (n, o) = (newer.as_u64().unwrap_or(0), older.as_u64().unwrap_or(0));
                match mode {
                    ChangeMode::All => n != o,
                    ChangeMode::Inc => o < n,
                    ChangeMode::Dec => o > n,
                }
            }
            ValueType::Float => {
                let (n, o) = (newer.as_f64().unwrap_or(0.0), older.as_f64().unwrap_or(0.0));
                match mode {
                    ChangeMode::All => !double_eq(n, o),
                    ChangeMode::Inc => !double_eq(n, o) && o < n,
                    ChangeMode::Dec => !double_eq(n, o) && o > n,
                }
            }
            _ => match mode {
                // string-family changes are directionless
                ChangeMode::All => newer.as_text() != older.as_text(),
                _ => return Err(Error::bad_param(2)),
            },
        };

        if changed {
            count += 1;
        }
    }

    Ok(EvalValue::Uint(count))
}

/// Gradient for [`mono`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Gradient {
    /// Values must not decrease (or must strictly increase)
    Inc,
    /// Values must not increase (or must strictly decrease)
    Dec,
}

/// `monoinc`/`monodec(range, strictness?)` — 1 when the whole window is
/// monotonic, 0 otherwise
pub(crate) fn mono(
    cx: &EvalContext,
    item: &EvalItem,
    params: &ParamList,
    anchor: Timestamp,
    gradient: Gradient,
) -> Result<EvalValue> {
    let range = resolve_history_range(params, 0, anchor.sec)?;
    if range.kind == RangeKind::None {
        return Err(Error::bad_param(1));
    }

    let strict = match params.get(1) {
        None | Some("") | Some("weak") => false,
        Some("strict") => true,
        Some(text) => {
            return Err(Error::InvalidSyntax(format!(
                "invalid monotonicity mode \"{}\"",
                text
            )))
        }
    };

    let window = fetch_range(cx, item, &range, anchor)?;

    if window.is_empty() {
        return Err(Error::NotEnoughData);
    }

    let mut monotonic = true;

    for pair in window.windows(2) {
        let (newer, older) = (&pair[0].value, &pair[1].value);

        let holds = match item.value_type {
            ValueType::Uint => {
                let (n, o) = (newer.as_u64().unwrap_or(0), older.as_u64().unwrap_or(0));
                match (gradient, strict) {
                    (Gradient::Inc, false) => n >= o,
                    (Gradient::Inc, true) => n > o,
                    (Gradient::Dec, false) => n <= o,
                    (Gradient::Dec, true) => n < o,
                }
            }
            _ => {
                let (n, o) = (newer.as_f64().unwrap_or(0.0), older.as_f64().unwrap_or(0.0));
                let equal = double_eq(n, o);
                match (gradient, strict) {
                    (Gradient::Inc, false) => equal || n > o,
                    (Gradient::Inc, true) => !equal && n > o,
                    (Gradient::Dec, false) => equal || n < o,
                    (Gradient::Dec, true) => !equal && n < o,
                }
            }
        };

        if !holds {
            monotonic = false;
            break;
        }
    }

    Ok(EvalValue::Uint(monotonic as u64))
}
