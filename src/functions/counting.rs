//! Pattern-matching count functions
//!
//! `count`, `find` and `countunique` share one engine: resolve the window,
//! optionally deduplicate it, then count samples matching a comparison
//! operator and pattern. `find` is `count` with the match limit pinned to 1,
//! so a single hit short-circuits the scan.
//!
//! Operators by value type:
//!
//! | type        | operators                               |
//! |-------------|-----------------------------------------|
//! | float, uint | `eq`, `ne`, `gt`, `ge`, `lt`, `le`      |
//! | uint        | additionally `bitand` (`value/mask`)    |
//! | str, text, log | `eq`, `ne`, `like`, `regexp`, `iregexp` |
//!
//! With no operator, a present pattern defaults to `eq` (numeric) or `like`
//! (string family); with neither operator nor pattern every sample matches.

use regex::{Regex, RegexBuilder};

use super::{fetch_range, EvalContext};
use crate::error::{Error, Result};
use crate::params::resolver::{resolve_history_range, resolve_string, RangeKind};
use crate::params::time::parse_suffixed_float;
use crate::params::ParamList;
use crate::types::{double_eq, EvalItem, EvalValue, HistoryValue, Sample, Timestamp, ValueType};

/// Comparison applied to each sample
#[derive(Debug, Clone)]
enum CountOp {
    /// Match every sample
    Any,
    /// Numeric comparisons
    Eq(f64),
    Ne(f64),
    Gt(f64),
    Ge(f64),
    Lt(f64),
    Le(f64),
    /// Unsigned comparisons keep full 64-bit precision
    UintEq(u64),
    UintNe(u64),
    UintGt(u64),
    UintGe(u64),
    UintLt(u64),
    UintLe(u64),
    /// `(sample & mask) == value`
    Bitand { value: u64, mask: u64 },
    /// String equality / inequality
    StrEq(String),
    StrNe(String),
    /// Substring containment
    Like(String),
    /// Regular expression match
    Regexp(Regex),
}

impl CountOp {
    fn matches(&self, value: &HistoryValue) -> bool {
        match self {
            CountOp::Any => true,
            CountOp::Eq(p) => value.as_f64().is_some_and(|v| double_eq(v, *p)),
            CountOp::Ne(p) => value.as_f64().is_some_and(|v| !double_eq(v, *p)),
            CountOp::Gt(p) => value.as_f64().is_some_and(|v| v > *p),
            CountOp::Ge(p) => value.as_f64().is_some_and(|v| v >= *p),
            CountOp::Lt(p) => value.as_f64().is_some_and(|v| v < *p),
            CountOp::Le(p) => value.as_f64().is_some_and(|v| v <= *p),
            CountOp::UintEq(p) => value.as_u64().is_some_and(|v| v == *p),
            CountOp::UintNe(p) => value.as_u64().is_some_and(|v| v != *p),
            CountOp::UintGt(p) => value.as_u64().is_some_and(|v| v > *p),
            CountOp::UintGe(p) => value.as_u64().is_some_and(|v| v >= *p),
            CountOp::UintLt(p) => value.as_u64().is_some_and(|v| v < *p),
            CountOp::UintLe(p) => value.as_u64().is_some_and(|v| v <= *p),
            CountOp::Bitand { value: p, mask } => {
                value.as_u64().is_some_and(|v| v & mask == *p)
            }
            CountOp::StrEq(p) => value.as_text().is_some_and(|v| v == p.as_str()),
            CountOp::StrNe(p) => value.as_text().is_some_and(|v| v != p.as_str()),
            CountOp::Like(p) => value.as_text().is_some_and(|v| v.contains(p.as_str())),
            CountOp::Regexp(re) => value.as_text().is_some_and(|v| re.is_match(v)),
        }
    }
}

/// Build the comparison from the operator and pattern parameters
fn build_op(
    operator: Option<&str>,
    pattern: Option<&str>,
    value_type: ValueType,
) -> Result<CountOp> {
    let operator = operator.unwrap_or("");

    let pattern = match pattern {
        None | Some("") if operator.is_empty() => return Ok(CountOp::Any),
        None => {
            return Err(Error::InvalidSyntax(format!(
                "operator \"{}\" requires a pattern",
                operator
            )))
        }
        Some(p) => p,
    };

    if pattern.starts_with('@') {
        return Err(Error::InvalidSyntax(
            "global regular expressions are not supported".to_string(),
        ));
    }

    let numeric = value_type.is_numeric();

    let operator = match operator {
        "" if numeric => "eq",
        "" => "like",
        op => op,
    };

    let bad_operator = || {
        Error::InvalidSyntax(format!(
            "operator \"{}\" is not supported for value type \"{}\"",
            operator, value_type
        ))
    };

    if numeric {
        if value_type == ValueType::Uint {
            if operator == "bitand" {
                let (value, mask) = parse_bitand_pattern(pattern)?;
                return Ok(CountOp::Bitand { value, mask });
            }

            let p = parse_uint_pattern(pattern)?;
            return match operator {
                "eq" => Ok(CountOp::UintEq(p)),
                "ne" => Ok(CountOp::UintNe(p)),
                "gt" => Ok(CountOp::UintGt(p)),
                "ge" => Ok(CountOp::UintGe(p)),
                "lt" => Ok(CountOp::UintLt(p)),
                "le" => Ok(CountOp::UintLe(p)),
                _ => Err(bad_operator()),
            };
        }

        let p = parse_suffixed_float(pattern)?;
        return match operator {
            "eq" => Ok(CountOp::Eq(p)),
            "ne" => Ok(CountOp::Ne(p)),
            "gt" => Ok(CountOp::Gt(p)),
            "ge" => Ok(CountOp::Ge(p)),
            "lt" => Ok(CountOp::Lt(p)),
            "le" => Ok(CountOp::Le(p)),
            _ => Err(bad_operator()),
        };
    }

    match operator {
        "eq" => Ok(CountOp::StrEq(pattern.to_string())),
        "ne" => Ok(CountOp::StrNe(pattern.to_string())),
        "like" => Ok(CountOp::Like(pattern.to_string())),
        "regexp" => Ok(CountOp::Regexp(compile_regex(pattern, false)?)),
        "iregexp" => Ok(CountOp::Regexp(compile_regex(pattern, true)?)),
        _ => Err(bad_operator()),
    }
}

fn compile_regex(pattern: &str, case_insensitive: bool) -> Result<Regex> {
    RegexBuilder::new(pattern)
        .case_insensitive(case_insensitive)
        .build()
        .map_err(|_| Error::InvalidSyntax(format!("invalid regular expression \"{}\"", pattern)))
}

/// `value/mask` or bare `mask` (then value = mask)
fn parse_bitand_pattern(pattern: &str) -> Result<(u64, u64)> {
    let bad = || Error::InvalidSyntax(format!("invalid bitand pattern \"{}\"", pattern));

    match pattern.split_once('/') {
        Some((value, mask)) => {
            let value = value.parse().map_err(|_| bad())?;
            let mask = mask.parse().map_err(|_| bad())?;
            Ok((value, mask))
        }
        None => {
            let mask: u64 = pattern.parse().map_err(|_| bad())?;
            Ok((mask, mask))
        }
    }
}

/// Unsigned pattern; multiplier suffixes are accepted for whole results
fn parse_uint_pattern(pattern: &str) -> Result<u64> {
    if pattern.bytes().all(|b| b.is_ascii_digit()) && !pattern.is_empty() {
        return pattern
            .parse()
            .map_err(|_| Error::InvalidSyntax(format!("invalid pattern \"{}\"", pattern)));
    }

    let value = parse_suffixed_float(pattern)?;
    if value < 0.0 || value.fract() != 0.0 || value > u64::MAX as f64 {
        return Err(Error::InvalidSyntax(format!(
            "invalid pattern \"{}\"",
            pattern
        )));
    }
    Ok(value as u64)
}

/// Counting variant
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum CountMode {
    /// Count all matching samples up to the configured limit
    All,
    /// Deduplicate the window by value before counting
    Unique,
    /// Stop at the first match
    Find,
}

/// Shared engine behind `count`, `countunique` and `find`
pub(crate) fn count_with_mode(
    cx: &EvalContext,
    item: &EvalItem,
    params: &ParamList,
    anchor: Timestamp,
    mode: CountMode,
) -> Result<EvalValue> {
    let range = resolve_history_range(params, 0, anchor.sec)?;

    let operator = if params.len() >= 2 {
        Some(resolve_string(params, 1)?)
    } else {
        None
    };
    let pattern = if params.len() >= 3 {
        Some(resolve_string(params, 2)?)
    } else {
        None
    };

    let op = build_op(operator.as_deref(), pattern.as_deref(), item.value_type)?;

    // an absent range degrades to the single most recent value
    let range = match range.kind {
        RangeKind::None => crate::params::resolver::HistRange {
            kind: RangeKind::Count(1),
            time_shift: range.time_shift,
        },
        _ => range,
    };

    let mut window = fetch_range(cx, item, &range, anchor)?;

    if mode == CountMode::Unique {
        deduplicate(&mut window, item.value_type);
    }

    let limit = match mode {
        CountMode::Find => 1,
        _ => cx.config.count_limit,
    };

    let mut count = 0usize;
    for sample in &window {
        if op.matches(&sample.value) {
            count += 1;
            if count >= limit {
                break;
            }
        }
    }

    Ok(EvalValue::Float(count as f64))
}

/// Sort and drop duplicate values; logs are unique by (value, source)
fn deduplicate(window: &mut Vec<Sample>, value_type: ValueType) {
    use std::cmp::Ordering;

    let key_cmp = move |a: &Sample, b: &Sample| -> Ordering {
        match value_type {
            ValueType::Uint => a.value.as_u64().cmp(&b.value.as_u64()),
            ValueType::Float => a
                .value
                .as_f64()
                .partial_cmp(&b.value.as_f64())
                .unwrap_or(Ordering::Equal),
            ValueType::Log => {
                let empty = (None, None);
                let a = a.value.as_log().map(|l| (Some(&l.value), l.source.as_ref()));
                let b = b.value.as_log().map(|l| (Some(&l.value), l.source.as_ref()));
                a.unwrap_or(empty).cmp(&b.unwrap_or(empty))
            }
            _ => a.value.as_text().cmp(&b.value.as_text()),
        }
    };

    window.sort_by(key_cmp);
    window.dedup_by(|a, b| key_cmp(a, b) == Ordering::Equal);
}

/// `count(range, op?, pattern?)`
pub(crate) fn count(
    cx: &EvalContext,
    item: &EvalItem,
    params: &ParamList,
    anchor: Timestamp,
) -> Result<EvalValue> {
    count_with_mode(cx, item, params, anchor, CountMode::All)
}

/// `countunique(range, op?, pattern?)`
pub(crate) fn countunique(
    cx: &EvalContext,
    item: &EvalItem,
    params: &ParamList,
    anchor: Timestamp,
) -> Result<EvalValue> {
    count_with_mode(cx, item, params, anchor, CountMode::Unique)
}

/// `find(range, op?, pattern?)` — at most one match is reported
pub(crate) fn find(
    cx: &EvalContext,
    item: &EvalItem,
    params: &ParamList,
    anchor: Timestamp,
) -> Result<EvalValue> {
    count_with_mode(cx, item, params, anchor, CountMode::Find)
}
