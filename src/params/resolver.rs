//! Typed parameter resolution
//!
//! Each function implementation resolves its own parameters from the split
//! [`ParamList`](super::ParamList) through the operations here, one per
//! parameter "shape": history range, plain period, float, string, unsigned
//! integer. Indices are zero-based; error messages number parameters the way
//! operators see them (one-based).

use super::time::{
    parse_count, parse_duration, parse_plain_float, parse_signed_duration, parse_suffixed_float,
    resolve_relative_time,
};
use super::ParamList;
use crate::error::{Error, Result};

/// The lookback part of a resolved history range
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RangeKind {
    /// Parameter was absent or empty; the caller decides the default
    None,
    /// Lookback by wall-clock seconds
    Seconds(i64),
    /// Lookback by sample count
    Count(usize),
}

/// A resolved history range: lookback plus time shift
///
/// Invariant: exactly one of Seconds/Count is populated when `kind` is not
/// `None`. Constructed per call, consumed by the sample window fetch, then
/// discarded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HistRange {
    /// How far back to look
    pub kind: RangeKind,
    /// Seconds to shift the window's end back from the anchor (signed;
    /// negative shifts look into the future of the anchor)
    pub time_shift: i64,
}

impl HistRange {
    /// A range with no lookback and no shift
    pub fn none() -> Self {
        HistRange {
            kind: RangeKind::None,
            time_shift: 0,
        }
    }
}

/// Flag for [`resolve_float`]: whether multiplier suffixes are accepted
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FloatShape {
    /// Bare decimal number
    Plain,
    /// Decimal number with optional `K/M/G/T` or time multiplier suffix
    Suffixed,
}

/// Resolve parameter `index` as `<count-or-duration>[:<timeshift>]`
///
/// An empty or absent parameter resolves to `RangeKind::None`. A leading `#`
/// makes it a count (strictly positive); otherwise it is a duration with
/// optional suffix. The optional `:` suffix is a `now`-anchored relative
/// time expression resolved against `anchor` into a shift in seconds.
pub fn resolve_history_range(params: &ParamList, index: usize, anchor: i64) -> Result<HistRange> {
    let text = params.get_or_empty(index);

    if text.is_empty() {
        return Ok(HistRange::none());
    }

    let (range_text, shift_text) = match text.split_once(':') {
        Some((range, shift)) => (range, Some(shift)),
        None => (text, None),
    };

    let kind = if range_text.is_empty() {
        RangeKind::None
    } else if range_text.starts_with('#') {
        RangeKind::Count(parse_count(range_text).map_err(|_| Error::bad_param(index + 1))?)
    } else {
        RangeKind::Seconds(parse_duration(range_text).map_err(|_| Error::bad_param(index + 1))?)
    };

    let time_shift = match shift_text {
        None => 0,
        Some(expr) => {
            let resolved = resolve_relative_time(anchor, expr)?;
            anchor - resolved
        }
    };

    Ok(HistRange { kind, time_shift })
}

/// Resolve parameter `index` as a plain period in seconds
///
/// No count support; a leading `-` is accepted as "seconds before now"
/// sugar. Returns `None` when the parameter is absent or empty.
pub fn resolve_period(params: &ParamList, index: usize) -> Result<Option<i64>> {
    let text = params.get_or_empty(index);

    if text.is_empty() {
        return Ok(None);
    }

    parse_signed_duration(text)
        .map(Some)
        .map_err(|_| Error::bad_param(index + 1))
}

/// Resolve parameter `index` as a float, honoring the suffix flag
pub fn resolve_float(params: &ParamList, index: usize, shape: FloatShape) -> Result<f64> {
    let text = params
        .get(index)
        .ok_or_else(|| Error::bad_param(index + 1))?;

    let parsed = match shape {
        FloatShape::Plain => parse_plain_float(text),
        FloatShape::Suffixed => parse_suffixed_float(text),
    };

    parsed.map_err(|_| Error::bad_param(index + 1))
}

/// Resolve parameter `index` as its raw (unquoted) text
///
/// Fails only when the parameter is absent entirely.
pub fn resolve_string(params: &ParamList, index: usize) -> Result<String> {
    params
        .get(index)
        .map(str::to_string)
        .ok_or_else(|| Error::bad_param(index + 1))
}

/// Resolve parameter `index` as a strict unsigned 64-bit integer
pub fn resolve_uint64(params: &ParamList, index: usize) -> Result<u64> {
    let text = params
        .get(index)
        .ok_or_else(|| Error::bad_param(index + 1))?;

    if text.is_empty() || !text.bytes().all(|b| b.is_ascii_digit()) {
        return Err(Error::bad_param(index + 1));
    }

    text.parse().map_err(|_| Error::bad_param(index + 1))
}

#[cfg(test)]
mod tests {
    use super::*;

    const ANCHOR: i64 = 1700058630;

    fn range(raw: &str) -> Result<HistRange> {
        let params = ParamList::parse(raw).unwrap();
        resolve_history_range(&params, 0, ANCHOR)
    }

    #[test]
    fn test_history_range_count() {
        assert_eq!(range("#5").unwrap().kind, RangeKind::Count(5));
        assert!(range("#0").is_err());
        assert!(range("#-3").is_err());
    }

    #[test]
    fn test_history_range_seconds() {
        assert_eq!(range("1h").unwrap().kind, RangeKind::Seconds(3600));
        assert_eq!(range("300").unwrap().kind, RangeKind::Seconds(300));
        assert!(range("-300").is_err());
    }

    #[test]
    fn test_history_range_absent() {
        let resolved = range("").unwrap();
        assert_eq!(resolved.kind, RangeKind::None);
        assert_eq!(resolved.time_shift, 0);
    }

    #[test]
    fn test_history_range_with_shift() {
        let resolved = range("1h:now-1d").unwrap();
        assert_eq!(resolved.kind, RangeKind::Seconds(3600));
        assert_eq!(resolved.time_shift, 86400);

        let resolved = range("#3:now-30m").unwrap();
        assert_eq!(resolved.kind, RangeKind::Count(3));
        assert_eq!(resolved.time_shift, 1800);
    }

    #[test]
    fn test_history_range_bad_shift() {
        assert!(range("1h:tomorrow").is_err());
        assert!(range("1h:").is_err());
    }

    #[test]
    fn test_period() {
        let params = ParamList::parse("30m,-1h,").unwrap();
        assert_eq!(resolve_period(&params, 0).unwrap(), Some(1800));
        assert_eq!(resolve_period(&params, 1).unwrap(), Some(-3600));
        assert_eq!(resolve_period(&params, 2).unwrap(), None);
        assert_eq!(resolve_period(&params, 9).unwrap(), None);
    }

    #[test]
    fn test_float_shapes() {
        let params = ParamList::parse("2K,50").unwrap();
        assert!(resolve_float(&params, 0, FloatShape::Plain).is_err());
        assert_eq!(
            resolve_float(&params, 0, FloatShape::Suffixed).unwrap(),
            2048.0
        );
        assert_eq!(resolve_float(&params, 1, FloatShape::Plain).unwrap(), 50.0);
        assert!(resolve_float(&params, 5, FloatShape::Plain).is_err());
    }

    #[test]
    fn test_string_and_uint() {
        let params = ParamList::parse("abc,123").unwrap();
        assert_eq!(resolve_string(&params, 0).unwrap(), "abc");
        assert!(resolve_string(&params, 2).is_err());
        assert_eq!(resolve_uint64(&params, 1).unwrap(), 123);
        assert!(resolve_uint64(&params, 0).is_err());
    }
}
