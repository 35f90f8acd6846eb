//! Availability and bitwise functions
//!
//! `nodata` answers "has anything arrived lately", with proxy-buffering
//! awareness unless the strict mode disables it; `fuzzytime` checks that a
//! timestamp-valued metric tracks the anchor clock; `bitand` masks the most
//! recent unsigned value.

use tracing::debug;

use super::{last_n_value, EvalContext};
use crate::error::{Error, Result};
use crate::params::resolver::{resolve_period, resolve_uint64};
use crate::params::ParamList;
use crate::types::{EvalItem, EvalValue, Timestamp};

/// `nodata(period, mode?)` — 1 when no value arrived within `period`
/// seconds, 0 otherwise
///
/// In the default lazy mode a proxied item widens the window by the proxy's
/// last-access lag and refuses to fire while the proxy's suppressed-data
/// transfer is still in progress; `mode = "strict"` turns both behaviors
/// off. An item that has not existed for a full period cannot be judged yet.
pub(crate) fn nodata(
    cx: &EvalContext,
    item: &EvalItem,
    params: &ParamList,
    anchor: Timestamp,
) -> Result<EvalValue> {
    let period = match resolve_period(params, 0)? {
        Some(period) if period > 0 => period,
        _ => return Err(Error::bad_param(1)),
    };

    let lazy = match params.get(1) {
        None | Some("") => true,
        Some("strict") => false,
        Some(text) => {
            return Err(Error::InvalidSyntax(format!(
                "invalid nodata mode \"{}\"",
                text
            )))
        }
    };

    let effective_period = match item.proxy {
        Some(proxy) if lazy => period + (anchor.sec - proxy.last_access).max(0),
        _ => period,
    };

    let window = cx
        .values
        .get_values(item.item_id, item.value_type, effective_period, 1, anchor)?;

    if !window.is_empty() {
        return Ok(EvalValue::Float(0.0));
    }

    let expected_from = item.data_expected_from.ok_or_else(|| {
        Error::SourceUnavailable(
            "the item does not exist, is disabled or belongs to a disabled host".to_string(),
        )
    })?;

    if expected_from + period > anchor.sec {
        return Err(Error::NotEnoughData);
    }

    if lazy && item.proxy.is_some_and(|proxy| proxy.suppress_active) {
        return Err(Error::SourceUnavailable(
            "historical data transfer from the proxy is still in progress".to_string(),
        ));
    }

    debug!(
        item = item.item_id,
        period = effective_period,
        "no data within the checked window"
    );

    Ok(EvalValue::Float(1.0))
}

/// `fuzzytime(period)` — 1 when the latest value, read as a Unix timestamp,
/// lies within ±period of the anchor
pub(crate) fn fuzzytime(
    cx: &EvalContext,
    item: &EvalItem,
    params: &ParamList,
    anchor: Timestamp,
) -> Result<EvalValue> {
    let period = match resolve_period(params, 0)? {
        Some(period) if period > 0 => period,
        _ => return Err(Error::bad_param(1)),
    };

    if anchor.sec <= period {
        return Err(Error::InvalidSyntax(
            "the period is larger than the evaluation time".to_string(),
        ));
    }

    let window = cx
        .values
        .get_values(item.item_id, item.value_type, 0, 1, anchor)?;

    let value = match window.first().and_then(|s| s.value.as_f64()) {
        Some(value) => value,
        None => return Err(Error::NotEnoughData),
    };

    let low = (anchor.sec - period) as f64;
    let high = (anchor.sec + period) as f64;

    Ok(EvalValue::Float(if value >= low && value <= high {
        1.0
    } else {
        0.0
    }))
}

/// `bitand(range, mask)` — the `last`-style value AND `mask`
pub(crate) fn bitand(
    cx: &EvalContext,
    item: &EvalItem,
    params: &ParamList,
    anchor: Timestamp,
) -> Result<EvalValue> {
    let mask = resolve_uint64(params, 1)?;

    let sample = last_n_value(cx, item, params, 0, anchor)?;
    let value = sample.value.as_u64().ok_or(Error::InvalidValueType)?;

    Ok(EvalValue::Uint(value & mask))
}
