//! Central-moment statistics over a history window
//!
//! `kurtosis`, `mad`, `skewness`, `stddevpop`, `stddevsamp`, `sumofsquares`,
//! `varpop`, `varsamp`. All share one data path: a single mandatory range
//! parameter, a numeric window, a minimum sample count (two for the sample
//! statistics, one otherwise), then a pure computation on the doubles.
//!
//! The moment helpers are reused by `baselinedev` and the seasonal
//! decomposition's deviation scoring.

use super::{fetch_range, numeric_window, EvalContext};
use crate::error::{Error, Result};
use crate::params::resolver::{resolve_history_range, RangeKind};
use crate::params::ParamList;
use crate::types::{EvalItem, EvalValue, Timestamp};

/// Arithmetic mean
pub(crate) fn mean(values: &[f64]) -> f64 {
    values.iter().sum::<f64>() / values.len() as f64
}

/// Population variance `Σ(x-μ)²/n`
pub(crate) fn variance_pop(values: &[f64]) -> f64 {
    let mu = mean(values);
    values.iter().map(|v| (v - mu) * (v - mu)).sum::<f64>() / values.len() as f64
}

/// Sample variance `Σ(x-μ)²/(n-1)`; undefined below two samples
pub(crate) fn variance_samp(values: &[f64]) -> f64 {
    let mu = mean(values);
    values.iter().map(|v| (v - mu) * (v - mu)).sum::<f64>() / (values.len() - 1) as f64
}

/// Population standard deviation
pub(crate) fn stddev_pop(values: &[f64]) -> f64 {
    variance_pop(values).sqrt()
}

/// Sample standard deviation
pub(crate) fn stddev_samp(values: &[f64]) -> f64 {
    variance_samp(values).sqrt()
}

/// Median of the values (mean of the middle pair for even counts)
pub(crate) fn median(values: &[f64]) -> f64 {
    let mut sorted = values.to_vec();
    sorted.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));

    let n = sorted.len();
    if n % 2 == 1 {
        sorted[n / 2]
    } else {
        (sorted[n / 2 - 1] + sorted[n / 2]) / 2.0
    }
}

/// Median absolute deviation from the median
pub(crate) fn mad_value(values: &[f64]) -> f64 {
    let center = median(values);
    let deviations: Vec<f64> = values.iter().map(|v| (v - center).abs()).collect();
    median(&deviations)
}

/// Population skewness `m₃ / σ³`
fn skewness_value(values: &[f64]) -> Result<f64> {
    let mu = mean(values);
    let n = values.len() as f64;
    let m2 = variance_pop(values);
    let m3 = values.iter().map(|v| (v - mu).powi(3)).sum::<f64>() / n;

    let sigma3 = m2.sqrt().powi(3);
    if sigma3 == 0.0 {
        return Err(Error::Model(
            "cannot calculate skewness of constant data".to_string(),
        ));
    }

    Ok(m3 / sigma3)
}

/// Population kurtosis `m₄ / m₂²`
fn kurtosis_value(values: &[f64]) -> Result<f64> {
    let mu = mean(values);
    let n = values.len() as f64;
    let m2 = variance_pop(values);
    let m4 = values.iter().map(|v| (v - mu).powi(4)).sum::<f64>() / n;

    if m2 == 0.0 {
        return Err(Error::Model(
            "cannot calculate kurtosis of constant data".to_string(),
        ));
    }

    Ok(m4 / (m2 * m2))
}

/// Resolve the single range parameter, fetch and convert the window
fn stat_window(
    cx: &EvalContext,
    item: &EvalItem,
    params: &ParamList,
    anchor: Timestamp,
    min_values: usize,
) -> Result<Vec<f64>> {
    let range = resolve_history_range(params, 0, anchor.sec)?;
    if range.kind == RangeKind::None {
        return Err(Error::bad_param(1));
    }

    let window = fetch_range(cx, item, &range, anchor)?;

    if window.len() < min_values {
        return Err(Error::NotEnoughData);
    }

    Ok(numeric_window(&window))
}

macro_rules! stat_handler {
    ($name:ident, $min:expr, $compute:expr) => {
        pub(crate) fn $name(
            cx: &EvalContext,
            item: &EvalItem,
            params: &ParamList,
            anchor: Timestamp,
        ) -> Result<EvalValue> {
            let values = stat_window(cx, item, params, anchor, $min)?;
            #[allow(clippy::redundant_closure_call)]
            let result: Result<f64> = ($compute)(&values);
            result.map(EvalValue::Float)
        }
    };
}

stat_handler!(kurtosis, 1, |v: &[f64]| kurtosis_value(v));
stat_handler!(mad, 1, |v: &[f64]| Ok(mad_value(v)));
stat_handler!(skewness, 1, |v: &[f64]| skewness_value(v));
stat_handler!(stddevpop, 1, |v: &[f64]| Ok(stddev_pop(v)));
stat_handler!(stddevsamp, 2, |v: &[f64]| Ok(stddev_samp(v)));
stat_handler!(sumofsquares, 1, |v: &[f64]| {
    Ok(v.iter().map(|x| x * x).sum())
});
stat_handler!(varpop, 1, |v: &[f64]| Ok(variance_pop(v)));
stat_handler!(varsamp, 2, |v: &[f64]| Ok(variance_samp(v)));

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mean_and_variance() {
        let values = [2.0, 4.0, 4.0, 4.0, 5.0, 5.0, 7.0, 9.0];
        assert_eq!(mean(&values), 5.0);
        assert_eq!(variance_pop(&values), 4.0);
        assert_eq!(stddev_pop(&values), 2.0);
        assert!((variance_samp(&values) - 32.0 / 7.0).abs() < 1e-12);
    }

    #[test]
    fn test_median_and_mad() {
        assert_eq!(median(&[3.0, 1.0, 2.0]), 2.0);
        assert_eq!(median(&[4.0, 1.0, 2.0, 3.0]), 2.5);

        // deviations from median 2: [1, 0, 1, 4] -> median 1
        assert_eq!(mad_value(&[1.0, 2.0, 3.0, 6.0]), 1.0);
    }

    #[test]
    fn test_skewness_symmetry() {
        let symmetric = [1.0, 2.0, 3.0, 4.0, 5.0];
        assert!(skewness_value(&symmetric).unwrap().abs() < 1e-12);

        let right_tailed = [1.0, 1.0, 1.0, 1.0, 10.0];
        assert!(skewness_value(&right_tailed).unwrap() > 0.0);

        assert!(skewness_value(&[3.0, 3.0, 3.0]).is_err());
    }

    #[test]
    fn test_kurtosis() {
        // uniform two-point distribution has kurtosis 1
        let values = [-1.0, 1.0, -1.0, 1.0];
        assert!((kurtosis_value(&values).unwrap() - 1.0).abs() < 1e-12);

        assert!(kurtosis_value(&[5.0, 5.0]).is_err());
    }
}
