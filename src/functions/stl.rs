//! Seasonal-trend decomposition and the `trendstl` anomaly score
//!
//! `trendstl` builds one hourly-average point per hour across its evaluation
//! period (gap-filling empty hours from the nearest known neighbor, forward
//! then backward), splits the series into trend + seasonal + remainder with
//! an additive loess-based STL decomposition, and reports the percentage of
//! remainder points inside the detection sub-window that deviate from the
//! series' central measure by more than `deviations` multiples of the spread
//! (median/MAD by default, mean/standard deviation otherwise).
//!
//! The decomposition follows the classic STL inner loop: cycle-subseries
//! smoothing of the detrended series, a 3×-moving-average low-pass to strip
//! residual trend from the seasonal component, then loess over the
//! deseasonalized series for the trend.

use tracing::debug;

use super::stats::{mad_value, mean, median, stddev_pop, stddev_samp};
use super::trend::{parse_trend_range, BUCKET_SECONDS};
use super::EvalContext;
use crate::error::{Error, Result};
use crate::params::resolver::{
    resolve_float, resolve_history_range, resolve_string, resolve_uint64, FloatShape, RangeKind,
};
use crate::params::ParamList;
use crate::source::TrendStat;
use crate::types::{EvalItem, EvalValue, Timestamp};

/// Inner STL iterations; two passes suffice without robustness weights
const INNER_ITERATIONS: usize = 2;

/// Decomposition output, one entry per input point
pub(crate) struct Decomposition {
    pub trend: Vec<f64>,
    pub seasonal: Vec<f64>,
    pub remainder: Vec<f64>,
}

fn next_odd(n: usize) -> usize {
    if n % 2 == 0 {
        n + 1
    } else {
        n
    }
}

/// Loess smoothing over equally spaced points
///
/// For each position the `window` nearest points are weighted by the tricube
/// kernel and fitted with a weighted regression of the given degree (0 or 1).
fn loess_smooth(values: &[f64], window: usize, degree: usize) -> Vec<f64> {
    let n = values.len();
    if n <= 1 {
        return values.to_vec();
    }

    let q = window.clamp(2, n);
    let mut smoothed = Vec::with_capacity(n);

    for i in 0..n {
        let lo = i.saturating_sub(q / 2).min(n - q);
        let hi = lo + q;

        let max_dist = (i - lo).max(hi - 1 - i).max(1) as f64;

        let mut w_sum = 0.0;
        let mut wx_sum = 0.0;
        let mut wy_sum = 0.0;
        let mut wxx_sum = 0.0;
        let mut wxy_sum = 0.0;

        for j in lo..hi {
            let dist = (j as f64 - i as f64).abs() / max_dist;
            let weight = {
                let u = 1.0 - dist * dist * dist;
                u * u * u
            };
            if weight <= 0.0 {
                continue;
            }

            let x = j as f64;
            w_sum += weight;
            wx_sum += weight * x;
            wy_sum += weight * values[j];
            wxx_sum += weight * x * x;
            wxy_sum += weight * x * values[j];
        }

        if w_sum == 0.0 {
            smoothed.push(values[i]);
            continue;
        }

        let value = if degree == 0 {
            wy_sum / w_sum
        } else {
            let denom = w_sum * wxx_sum - wx_sum * wx_sum;
            if denom.abs() < 1e-12 {
                wy_sum / w_sum
            } else {
                let slope = (w_sum * wxy_sum - wx_sum * wy_sum) / denom;
                let intercept = (wy_sum - slope * wx_sum) / w_sum;
                intercept + slope * i as f64
            }
        };

        smoothed.push(value);
    }

    smoothed
}

/// Moving average keeping only fully covered positions (`n - len + 1`)
fn moving_average(values: &[f64], len: usize) -> Vec<f64> {
    if values.len() < len || len == 0 {
        return Vec::new();
    }

    let mut result = Vec::with_capacity(values.len() - len + 1);
    let mut sum: f64 = values[..len].iter().sum();
    result.push(sum / len as f64);

    for i in len..values.len() {
        sum += values[i] - values[i - len];
        result.push(sum / len as f64);
    }

    result
}

/// Additive STL decomposition
///
/// `season_window` of 0 means periodic seasonality: each seasonal phase is
/// smoothed to its subseries mean.
pub(crate) fn stl_decompose(
    values: &[f64],
    period: usize,
    season_window: u64,
    inner: usize,
) -> Result<Decomposition> {
    let n = values.len();

    if period < 2 {
        return Err(Error::Model(
            "the seasonal period must span at least two buckets".to_string(),
        ));
    }
    if n < 2 * period {
        return Err(Error::Model(
            "less than two full seasonal periods of data".to_string(),
        ));
    }

    let periodic = season_window == 0;
    let s_window = next_odd(season_window as usize);
    // the denominator collapses for degenerate seasonal windows
    let t_window = if periodic || s_window < 3 {
        next_odd((1.5 * period as f64).ceil() as usize)
    } else {
        next_odd((1.5 * period as f64 / (1.0 - 1.5 / s_window as f64)).ceil() as usize)
    };
    let l_window = next_odd(period);

    let mut trend = vec![0.0; n];
    let mut seasonal = vec![0.0; n];

    for _ in 0..inner {
        let detrended: Vec<f64> = values.iter().zip(&trend).map(|(v, t)| v - t).collect();

        // cycle-subseries smoothing, extended one period at both ends
        let mut cycle = vec![0.0; n + 2 * period];
        for phase in 0..period {
            let subseries: Vec<f64> = detrended[phase..].iter().step_by(period).copied().collect();

            let smoothed = if periodic {
                vec![mean(&subseries); subseries.len()]
            } else {
                loess_smooth(&subseries, s_window, 1)
            };

            let first = *smoothed.first().expect("subseries is non-empty");
            let last = *smoothed.last().expect("subseries is non-empty");

            for (k, value) in std::iter::once(first)
                .chain(smoothed.iter().copied())
                .chain(std::iter::once(last))
                .enumerate()
            {
                let index = phase + k * period;
                if index < cycle.len() {
                    cycle[index] = value;
                }
            }
        }

        // low-pass: period, period, 3 moving averages plus loess
        let low = moving_average(&cycle, period);
        let low = moving_average(&low, period);
        let low = moving_average(&low, 3);
        let low = loess_smooth(&low, l_window, 1);

        for i in 0..n {
            seasonal[i] = cycle[period + i] - low[i];
        }

        let deseasonalized: Vec<f64> = values.iter().zip(&seasonal).map(|(v, s)| v - s).collect();
        trend = loess_smooth(&deseasonalized, t_window, 1);
    }

    let remainder = values
        .iter()
        .zip(trend.iter().zip(&seasonal))
        .map(|(v, (t, s))| v - t - s)
        .collect();

    Ok(Decomposition {
        trend,
        seasonal,
        remainder,
    })
}

/// Deviation measure for the remainder scoring
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DeviationAlg {
    Mad,
    StddevPop,
    StddevSamp,
}

impl DeviationAlg {
    fn parse(text: &str) -> Result<Self> {
        match text {
            "" | "mad" => Ok(DeviationAlg::Mad),
            "stddevpop" => Ok(DeviationAlg::StddevPop),
            "stddevsamp" => Ok(DeviationAlg::StddevSamp),
            _ => Err(Error::InvalidSyntax(format!(
                "invalid deviation algorithm \"{}\"",
                text
            ))),
        }
    }

    /// `(center, spread)` of the remainder series
    fn measure(&self, remainder: &[f64]) -> (f64, f64) {
        match self {
            DeviationAlg::Mad => (median(remainder), mad_value(remainder)),
            DeviationAlg::StddevPop => (mean(remainder), stddev_pop(remainder)),
            DeviationAlg::StddevSamp => (mean(remainder), stddev_samp(remainder)),
        }
    }
}

/// `trendstl(period, detection, season, deviations?, dev_alg?, s_window?)`
pub(crate) fn trendstl(
    cx: &EvalContext,
    item: &EvalItem,
    params: &ParamList,
    anchor: Timestamp,
) -> Result<EvalValue> {
    let period = resolve_string(params, 0)?;
    let (start, end) = parse_trend_range(anchor.sec, &period)?;

    let detection = match resolve_history_range(params, 1, anchor.sec)?.kind {
        RangeKind::Seconds(seconds) if seconds > 0 => seconds,
        _ => return Err(Error::bad_param(2)),
    };

    let season = match resolve_history_range(params, 2, anchor.sec)?.kind {
        RangeKind::Seconds(seconds) if seconds > 0 => seconds,
        _ => return Err(Error::bad_param(3)),
    };

    let deviations = match params.get(3) {
        None | Some("") => cx.config.stl_deviations_default,
        _ => resolve_float(params, 3, FloatShape::Plain)?,
    };
    if deviations <= 0.0 {
        return Err(Error::bad_param(4));
    }

    let dev_alg = DeviationAlg::parse(params.get_or_empty(4))?;

    let season_window = match params.get(5) {
        None | Some("") => cx.config.stl_season_window_default,
        _ => resolve_uint64(params, 5)?,
    };

    // the detection window hugs the end of the evaluation period
    let detection_end = end + BUCKET_SECONDS - 1;
    let detection_start = detection_end - detection + 1;
    if detection_start < start {
        return Err(Error::InvalidSyntax(
            "the detection period must not exceed the evaluation period".to_string(),
        ));
    }

    // one point per hourly bucket, gaps filled from the nearest neighbor
    let mut points: Vec<Option<f64>> = Vec::new();
    let mut clocks: Vec<i64> = Vec::new();
    let mut clock = start;
    while clock <= end {
        let value = cx
            .trends
            .get_trend_aggregate(item.item_id, clock, clock, TrendStat::Avg)?;
        points.push(value);
        clocks.push(clock);
        clock += BUCKET_SECONDS;
    }

    if points.iter().all(Option::is_none) {
        return Err(Error::NotEnoughData);
    }

    let values = fill_gaps(points);

    debug!(
        item = item.item_id,
        buckets = values.len(),
        "running seasonal-trend decomposition"
    );

    let season_buckets = (season / BUCKET_SECONDS) as usize;
    let decomposition = stl_decompose(&values, season_buckets, season_window, INNER_ITERATIONS)?;

    let (center, spread) = dev_alg.measure(&decomposition.remainder);

    let mut detected = 0usize;
    let mut exceeded = 0usize;

    for (clock, residual) in clocks.iter().zip(&decomposition.remainder) {
        if *clock >= detection_start && *clock <= detection_end {
            detected += 1;
            if (residual - center).abs() > deviations * spread {
                exceeded += 1;
            }
        }
    }

    if detected == 0 {
        return Err(Error::NotEnoughData);
    }

    Ok(EvalValue::Float(
        100.0 * exceeded as f64 / detected as f64,
    ))
}

/// Nearest-neighbor gap filling, forward then backward
fn fill_gaps(points: Vec<Option<f64>>) -> Vec<f64> {
    let mut filled: Vec<Option<f64>> = Vec::with_capacity(points.len());
    let mut last_known: Option<f64> = None;

    for point in points {
        let value = point.or(last_known);
        if value.is_some() {
            last_known = value;
        }
        filled.push(value);
    }

    let mut next_known: Option<f64> = None;
    for slot in filled.iter_mut().rev() {
        match slot {
            Some(value) => next_known = Some(*value),
            None => *slot = next_known,
        }
    }

    filled
        .into_iter()
        .map(|v| v.expect("at least one bucket held data"))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EvalConfig;
    use crate::source::{MemoryTrendSource, MemoryValueSource, TrendBucket};
    use crate::types::ValueType;

    #[test]
    fn test_fill_gaps_forward_then_backward() {
        let filled = fill_gaps(vec![None, Some(2.0), None, None, Some(5.0), None]);
        assert_eq!(filled, vec![2.0, 2.0, 2.0, 2.0, 5.0, 5.0]);
    }

    #[test]
    fn test_moving_average_lengths() {
        let values = [1.0, 2.0, 3.0, 4.0];
        assert_eq!(moving_average(&values, 2), vec![1.5, 2.5, 3.5]);
        assert_eq!(moving_average(&values, 4), vec![2.5]);
        assert!(moving_average(&values, 5).is_empty());
    }

    #[test]
    fn test_loess_preserves_line() {
        let line: Vec<f64> = (0..20).map(|i| 3.0 + 0.5 * i as f64).collect();
        let smoothed = loess_smooth(&line, 7, 1);
        for (a, b) in line.iter().zip(&smoothed) {
            assert!((a - b).abs() < 1e-9);
        }
    }

    #[test]
    fn test_stl_separates_seasonal_signal() {
        // four days of hourly data: flat trend 10 plus a daily sine
        let period = 24;
        let values: Vec<f64> = (0..4 * period)
            .map(|i| {
                10.0 + 3.0 * (2.0 * std::f64::consts::PI * (i % period) as f64 / period as f64).sin()
            })
            .collect();

        let d = stl_decompose(&values, period, 0, INNER_ITERATIONS).unwrap();

        // the remainder should be an order of magnitude below the seasonal
        // amplitude away from the boundaries
        for residual in &d.remainder[period..3 * period] {
            assert!(residual.abs() < 0.5, "residual {} too large", residual);
        }

        // trend stays near the flat level
        for t in &d.trend[period..3 * period] {
            assert!((t - 10.0).abs() < 1.0, "trend {} strayed", t);
        }
    }

    #[test]
    fn test_stl_needs_two_periods() {
        let values = vec![1.0; 30];
        assert!(stl_decompose(&values, 24, 0, INNER_ITERATIONS).is_err());
        assert!(stl_decompose(&values, 1, 0, INNER_ITERATIONS).is_err());
    }

    // 2023-11-15 00:00:00 UTC
    const MIDNIGHT: i64 = 1700006400;

    #[test]
    fn test_trendstl_flags_anomalous_tail() {
        let values = MemoryValueSource::new();
        let mut trends = MemoryTrendSource::new();

        // seven days of a clean daily pattern, then a wrecked final hour
        let start = MIDNIGHT - 7 * 86400;
        for hour in 0..7 * 24 {
            let phase = (hour % 24) as f64 / 24.0;
            let mut value = 50.0 + 10.0 * (2.0 * std::f64::consts::PI * phase).sin();
            if hour == 7 * 24 - 1 {
                value += 200.0;
            }
            trends.add_bucket(1, TrendBucket::flat(start + hour as i64 * 3600, 60, value));
        }

        let config = EvalConfig::default();
        let cx = EvalContext {
            values: &values,
            trends: &trends,
            config: &config,
        };
        let item = EvalItem::new(1, ValueType::Float);

        // evaluate the full week, detect over the last 2 hours, one-day season
        let params = ParamList::parse("7d:now/d,2h,1d").unwrap();
        let result = trendstl(&cx, &item, &params, Timestamp::from_sec(MIDNIGHT + 1000))
            .unwrap()
            .as_f64()
            .unwrap();

        // the wrecked hour sits inside the two-point detection window
        assert!(result >= 50.0, "spike not flagged: {}", result);
    }

    #[test]
    fn test_trendstl_detection_exceeds_evaluation() {
        let values = MemoryValueSource::new();
        let trends = MemoryTrendSource::new();
        let config = EvalConfig::default();
        let cx = EvalContext {
            values: &values,
            trends: &trends,
            config: &config,
        };
        let item = EvalItem::new(1, ValueType::Float);

        let params = ParamList::parse("1d:now/d,2d,6h").unwrap();
        let result = trendstl(&cx, &item, &params, Timestamp::from_sec(MIDNIGHT));
        assert!(matches!(result, Err(Error::InvalidSyntax(_))));
    }

    #[test]
    fn test_trendstl_all_empty() {
        let values = MemoryValueSource::new();
        let trends = MemoryTrendSource::new();
        let config = EvalConfig::default();
        let cx = EvalContext {
            values: &values,
            trends: &trends,
            config: &config,
        };
        let item = EvalItem::new(1, ValueType::Float);

        let params = ParamList::parse("1d:now/d,2h,6h").unwrap();
        let result = trendstl(&cx, &item, &params, Timestamp::from_sec(MIDNIGHT));
        assert!(matches!(result, Err(Error::NotEnoughData)));
    }
}
