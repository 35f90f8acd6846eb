//! Analytic function implementations
//!
//! One module per function family, all sharing the same handler shape: the
//! dispatch table has already checked the function's value-type applicability
//! and parameter-count bounds, so a handler only resolves its own typed
//! parameters, requests a sample window and computes.
//!
//! - [`aggregate`] — `last`, `first`, `min`, `max`, `avg`, `sum`,
//!   `percentile`, `change`, `abschange`
//! - [`counting`] — `count`, `find`, `countunique`
//! - [`rate`] — `rate`, `changecount`, `monoinc`, `monodec`
//! - [`curvefit`] — `forecast`, `timeleft`
//! - [`stats`] — `kurtosis`, `mad`, `skewness`, `stddevpop`, `stddevsamp`,
//!   `sumofsquares`, `varpop`, `varsamp`
//! - [`trend`] — `trendavg`, `trendmin`, `trendmax`, `trendsum`,
//!   `trendcount`, `baselinewma`, `baselinedev`
//! - [`stl`] — `trendstl`
//! - [`misc`] — `nodata`, `fuzzytime`, `bitand`
//! - [`log`] — `logeventid`, `logsource`, `logseverity`

pub mod aggregate;
pub mod counting;
pub mod curvefit;
pub mod log;
pub mod misc;
pub mod rate;
pub mod stats;
pub mod stl;
pub mod trend;

use crate::config::EvalConfig;
use crate::error::{Error, Result};
use crate::params::resolver::{HistRange, RangeKind};
use crate::params::ParamList;
use crate::source::{TrendSource, ValueSource};
use crate::types::{EvalItem, EvalValue, Sample, Timestamp};

/// Everything a handler needs besides its own parameters
pub(crate) struct EvalContext<'a> {
    /// Raw history window provider
    pub values: &'a dyn ValueSource,
    /// Hourly trend bucket provider
    pub trends: &'a dyn TrendSource,
    /// Engine tunables
    pub config: &'a EvalConfig,
}

/// Handler signature shared by every function implementation
pub(crate) type Handler =
    fn(&EvalContext, &EvalItem, &ParamList, Timestamp) -> Result<EvalValue>;

/// Window end after applying a resolved time shift to the anchor
pub(crate) fn shifted_end(anchor: Timestamp, time_shift: i64) -> Timestamp {
    Timestamp {
        sec: anchor.sec - time_shift,
        ns: anchor.ns,
    }
}

/// Fetch the window described by a resolved history range
///
/// The caller has already rejected `RangeKind::None` where a range is
/// mandatory; a `None` reaching this point is a missing first argument.
pub(crate) fn fetch_range(
    cx: &EvalContext,
    item: &EvalItem,
    range: &HistRange,
    anchor: Timestamp,
) -> Result<Vec<Sample>> {
    let (seconds, count) = match range.kind {
        RangeKind::Seconds(seconds) => (seconds, 0),
        RangeKind::Count(count) => (0, count),
        RangeKind::None => {
            return Err(Error::InvalidSyntax(
                "the first argument is not specified".to_string(),
            ))
        }
    };

    cx.values.get_values(
        item.item_id,
        item.value_type,
        seconds,
        count,
        shifted_end(anchor, range.time_shift),
    )
}

/// Fetch the Nth most recent sample per the `last`-style first parameter
///
/// Duration and absent forms default to the single most recent value; a
/// count form `#N` selects the Nth most recent. Fails `NotEnoughData` when
/// fewer than N samples exist at or before the (shifted) anchor.
pub(crate) fn last_n_value(
    cx: &EvalContext,
    item: &EvalItem,
    params: &ParamList,
    index: usize,
    anchor: Timestamp,
) -> Result<Sample> {
    let range = crate::params::resolver::resolve_history_range(params, index, anchor.sec)?;

    let n = match range.kind {
        RangeKind::Count(n) => n,
        _ => 1,
    };

    let mut window = cx.values.get_values(
        item.item_id,
        item.value_type,
        0,
        n,
        shifted_end(anchor, range.time_shift),
    )?;

    if window.len() < n {
        return Err(Error::NotEnoughData);
    }

    Ok(window.swap_remove(n - 1))
}

/// Numeric view of a window; valid only after the dispatch step has
/// restricted the function to numeric value types
pub(crate) fn numeric_window(window: &[Sample]) -> Vec<f64> {
    window
        .iter()
        .filter_map(|s| s.value.as_f64())
        .collect()
}
