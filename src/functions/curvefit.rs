//! Least-squares curve fitting, forecasting and threshold solving
//!
//! `forecast` and `timeleft` build `(t, x)` pairs with `t` measured upward
//! from the oldest sample, fit one of five models and then either project
//! the fitted curve over a future interval or solve for the time at which it
//! crosses a threshold.
//!
//! Models:
//!
//! - `linear` — `x = c₀ + c₁t` (default)
//! - `polynomialK` — degree-K least squares, K = 1..6
//! - `exponential` — `x = a·e^(bt)`, fitted in log space (requires x > 0)
//! - `logarithmic` — `x = c₀ + c₁·ln t`
//! - `power` — `x = a·t^b`, fitted in log-log space (requires x > 0)
//!
//! Polynomial extrema and threshold crossings use exact root isolation:
//! roots of the derivative are found recursively (a polynomial is monotonic
//! between consecutive critical points), then bisection pins each root.

use super::{fetch_range, EvalContext};
use crate::error::{Error, Result};
use crate::params::resolver::{
    resolve_float, resolve_history_range, resolve_period, FloatShape, RangeKind,
};
use crate::params::ParamList;
use crate::types::{double_eq, EvalItem, EvalValue, Sample, Timestamp};

/// Result of `timeleft` when the fitted curve never reaches the threshold
pub const TIMELEFT_NEVER: f64 = f64::MAX;

/// Curve family to fit
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Fit {
    Linear,
    Polynomial(usize),
    Exponential,
    Logarithmic,
    Power,
}

/// What `forecast` reports about the projected interval
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ForecastMode {
    Value,
    Max,
    Min,
    Delta,
    Avg,
}

fn parse_fit(text: &str, max_degree: u8) -> Result<Fit> {
    match text {
        "" | "linear" => Ok(Fit::Linear),
        "exponential" => Ok(Fit::Exponential),
        "logarithmic" => Ok(Fit::Logarithmic),
        "power" => Ok(Fit::Power),
        _ => {
            if let Some(digits) = text.strip_prefix("polynomial") {
                let degree: usize = digits.parse().map_err(|_| {
                    Error::InvalidSyntax(format!("invalid fit function \"{}\"", text))
                })?;
                if degree < 1 || degree > max_degree as usize {
                    return Err(Error::InvalidSyntax(format!(
                        "polynomial degree must be between 1 and {}",
                        max_degree
                    )));
                }
                Ok(Fit::Polynomial(degree))
            } else {
                Err(Error::InvalidSyntax(format!(
                    "invalid fit function \"{}\"",
                    text
                )))
            }
        }
    }
}

fn parse_mode(text: &str) -> Result<ForecastMode> {
    match text {
        "" | "value" => Ok(ForecastMode::Value),
        "max" => Ok(ForecastMode::Max),
        "min" => Ok(ForecastMode::Min),
        "delta" => Ok(ForecastMode::Delta),
        "avg" => Ok(ForecastMode::Avg),
        _ => Err(Error::InvalidSyntax(format!(
            "invalid forecast mode \"{}\"",
            text
        ))),
    }
}

// ============================================================================
// Fitted models
// ============================================================================

/// A fitted curve
#[derive(Debug, Clone)]
enum Model {
    /// `c₀ + c₁t + c₂t² + ...`
    Polynomial(Vec<f64>),
    /// `a·e^(bt)`
    Exponential { a: f64, b: f64 },
    /// `c₀ + c₁·ln t`
    Logarithmic { c0: f64, c1: f64 },
    /// `a·t^b`
    Power { a: f64, b: f64 },
}

/// Fit the requested model to the `(t, x)` pairs
fn fit_model(t: &[f64], x: &[f64], fit: Fit) -> Result<Model> {
    match fit {
        Fit::Linear => Ok(Model::Polynomial(polynomial_fit(t, x, 1)?)),
        Fit::Polynomial(k) => {
            // an exact fit needs no more coefficients than points
            let k = k.min(t.len() - 1).max(1);
            Ok(Model::Polynomial(polynomial_fit(t, x, k)?))
        }
        Fit::Exponential => {
            let log_x = log_domain(x)?;
            let coeffs = polynomial_fit(t, &log_x, 1)?;
            Ok(Model::Exponential {
                a: coeffs[0].exp(),
                b: coeffs[1],
            })
        }
        Fit::Logarithmic => {
            let log_t: Vec<f64> = t.iter().map(|v| v.ln()).collect();
            let coeffs = polynomial_fit(&log_t, x, 1)?;
            Ok(Model::Logarithmic {
                c0: coeffs[0],
                c1: coeffs[1],
            })
        }
        Fit::Power => {
            let log_x = log_domain(x)?;
            let log_t: Vec<f64> = t.iter().map(|v| v.ln()).collect();
            let coeffs = polynomial_fit(&log_t, &log_x, 1)?;
            Ok(Model::Power {
                a: coeffs[0].exp(),
                b: coeffs[1],
            })
        }
    }
}

fn log_domain(x: &[f64]) -> Result<Vec<f64>> {
    if x.iter().any(|&v| v <= 0.0) {
        return Err(Error::Model(
            "exponential and power fits require strictly positive data".to_string(),
        ));
    }
    Ok(x.iter().map(|v| v.ln()).collect())
}

/// Least squares polynomial fit via normal equations
fn polynomial_fit(t: &[f64], x: &[f64], degree: usize) -> Result<Vec<f64>> {
    let n = degree + 1;

    // power sums S_j = Σ t^j for j = 0..2k
    let mut sums = vec![0.0; 2 * degree + 1];
    for &ti in t {
        let mut power = 1.0;
        for sum in sums.iter_mut() {
            *sum += power;
            power *= ti;
        }
    }

    let mut matrix = vec![vec![0.0; n]; n];
    for (i, row) in matrix.iter_mut().enumerate() {
        for (j, cell) in row.iter_mut().enumerate() {
            *cell = sums[i + j];
        }
    }

    let mut rhs = vec![0.0; n];
    for (&ti, &xi) in t.iter().zip(x) {
        let mut power = 1.0;
        for r in rhs.iter_mut() {
            *r += xi * power;
            power *= ti;
        }
    }

    solve_linear_system(matrix, rhs)
}

/// Gaussian elimination with partial pivoting
fn solve_linear_system(mut a: Vec<Vec<f64>>, mut b: Vec<f64>) -> Result<Vec<f64>> {
    let n = b.len();

    for col in 0..n {
        let pivot_row = (col..n)
            .max_by(|&i, &j| {
                a[i][col]
                    .abs()
                    .partial_cmp(&a[j][col].abs())
                    .unwrap_or(std::cmp::Ordering::Equal)
            })
            .expect("non-empty pivot range");

        if a[pivot_row][col].abs() < 1e-12 {
            return Err(Error::Model(
                "curve fitting produced a singular system".to_string(),
            ));
        }

        a.swap(col, pivot_row);
        b.swap(col, pivot_row);

        for row in col + 1..n {
            let factor = a[row][col] / a[col][col];
            for k in col..n {
                a[row][k] -= factor * a[col][k];
            }
            b[row] -= factor * b[col];
        }
    }

    let mut solution = vec![0.0; n];
    for row in (0..n).rev() {
        let mut acc = b[row];
        for col in row + 1..n {
            acc -= a[row][col] * solution[col];
        }
        solution[row] = acc / a[row][row];
    }

    Ok(solution)
}

impl Model {
    fn value_at(&self, t: f64) -> f64 {
        match self {
            Model::Polynomial(coeffs) => poly_value(coeffs, t),
            Model::Exponential { a, b } => a * (b * t).exp(),
            Model::Logarithmic { c0, c1 } => c0 + c1 * t.ln(),
            Model::Power { a, b } => a * t.powf(*b),
        }
    }

    /// Extremum of the model over `[t1, t2]`
    fn extremum(&self, t1: f64, t2: f64, maximum: bool) -> f64 {
        let mut candidates = vec![self.value_at(t1), self.value_at(t2)];

        if let Model::Polynomial(coeffs) = self {
            let derivative = poly_derivative(coeffs);
            for root in poly_real_roots(&derivative) {
                if root > t1 && root < t2 {
                    candidates.push(poly_value(coeffs, root));
                }
            }
        }
        // the other models are monotonic on t > 0

        candidates
            .into_iter()
            .fold(if maximum { f64::NEG_INFINITY } else { f64::INFINITY }, |acc, v| {
                if maximum {
                    acc.max(v)
                } else {
                    acc.min(v)
                }
            })
    }

    /// Exact average of the model over `[t1, t2]` via the antiderivative
    fn average(&self, t1: f64, t2: f64) -> f64 {
        let width = t2 - t1;
        if width == 0.0 {
            return self.value_at(t1);
        }

        let integral = match self {
            Model::Polynomial(coeffs) => {
                poly_antiderivative(coeffs, t2) - poly_antiderivative(coeffs, t1)
            }
            Model::Exponential { a, b } => {
                if b.abs() < f64::EPSILON {
                    a * width
                } else {
                    a / b * ((b * t2).exp() - (b * t1).exp())
                }
            }
            // ∫ (c₀ + c₁ ln t) dt = c₀t + c₁(t ln t − t)
            Model::Logarithmic { c0, c1 } => {
                let f = |t: f64| c0 * t + c1 * (t * t.ln() - t);
                f(t2) - f(t1)
            }
            Model::Power { a, b } => {
                if (b + 1.0).abs() < f64::EPSILON {
                    a * (t2.ln() - t1.ln())
                } else {
                    a / (b + 1.0) * (t2.powf(b + 1.0) - t1.powf(b + 1.0))
                }
            }
        };

        integral / width
    }

    /// Earliest `t ≥ now` where the model equals `threshold`, or `None`
    fn crossing(&self, now: f64, threshold: f64) -> Option<f64> {
        match self {
            Model::Polynomial(coeffs) => {
                let mut shifted = coeffs.clone();
                shifted[0] -= threshold;
                poly_real_roots(&shifted)
                    .into_iter()
                    .filter(|&root| root >= now)
                    .fold(None, |best: Option<f64>, root| {
                        Some(best.map_or(root, |b| b.min(root)))
                    })
            }
            Model::Exponential { a, b } => {
                if b.abs() < f64::EPSILON {
                    return if double_eq(*a, threshold) { Some(now) } else { None };
                }
                let t = (threshold / a).ln() / b;
                (t.is_finite() && t >= now).then_some(t)
            }
            Model::Logarithmic { c0, c1 } => {
                if c1.abs() < f64::EPSILON {
                    return if double_eq(*c0, threshold) { Some(now) } else { None };
                }
                let t = ((threshold - c0) / c1).exp();
                (t.is_finite() && t >= now).then_some(t)
            }
            Model::Power { a, b } => {
                if b.abs() < f64::EPSILON {
                    return if double_eq(*a, threshold) { Some(now) } else { None };
                }
                let t = (threshold / a).powf(1.0 / b);
                (t.is_finite() && t >= now).then_some(t)
            }
        }
    }
}

// ============================================================================
// Polynomial helpers
// ============================================================================

fn poly_value(coeffs: &[f64], t: f64) -> f64 {
    coeffs.iter().rev().fold(0.0, |acc, &c| acc * t + c)
}

fn poly_derivative(coeffs: &[f64]) -> Vec<f64> {
    coeffs
        .iter()
        .enumerate()
        .skip(1)
        .map(|(i, &c)| c * i as f64)
        .collect()
}

fn poly_antiderivative(coeffs: &[f64], t: f64) -> f64 {
    coeffs
        .iter()
        .enumerate()
        .map(|(i, &c)| c / (i + 1) as f64 * t.powi(i as i32 + 1))
        .sum()
}

/// All real roots of a polynomial, ascending
///
/// Critical points come from the derivative's roots (recursion bottoms out
/// at degree one); between consecutive critical points the polynomial is
/// monotonic, so a sign change pins exactly one root for bisection.
fn poly_real_roots(coeffs: &[f64]) -> Vec<f64> {
    // strip negligible leading coefficients
    let mut coeffs = coeffs.to_vec();
    while coeffs.len() > 1 && coeffs.last().is_some_and(|c| c.abs() < 1e-300) {
        coeffs.pop();
    }

    let degree = coeffs.len() - 1;
    if degree == 0 {
        return Vec::new();
    }
    if degree == 1 {
        return vec![-coeffs[0] / coeffs[1]];
    }

    // Cauchy bound on root magnitude
    let leading = coeffs[degree];
    let bound = 1.0
        + coeffs[..degree]
            .iter()
            .map(|c| (c / leading).abs())
            .fold(0.0, f64::max);

    let mut boundaries = vec![-bound];
    for root in poly_real_roots(&poly_derivative(&coeffs)) {
        if root > -bound && root < bound {
            boundaries.push(root);
        }
    }
    boundaries.push(bound);
    boundaries.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));

    let mut roots = Vec::new();
    for pair in boundaries.windows(2) {
        let (lo, hi) = (pair[0], pair[1]);
        let (f_lo, f_hi) = (poly_value(&coeffs, lo), poly_value(&coeffs, hi));

        if f_lo == 0.0 {
            push_root(&mut roots, lo);
        }

        if f_lo * f_hi < 0.0 {
            push_root(&mut roots, bisect(&coeffs, lo, hi, f_lo));
        }
    }

    let last = *boundaries.last().expect("at least two boundaries");
    if poly_value(&coeffs, last) == 0.0 {
        push_root(&mut roots, last);
    }

    roots
}

fn push_root(roots: &mut Vec<f64>, root: f64) {
    if roots.last().map_or(true, |&r| (root - r).abs() > 1e-9) {
        roots.push(root);
    }
}

fn bisect(coeffs: &[f64], mut lo: f64, mut hi: f64, f_lo: f64) -> f64 {
    let descending = f_lo > 0.0;

    for _ in 0..200 {
        let mid = (lo + hi) / 2.0;
        if mid == lo || mid == hi {
            break;
        }
        let f_mid = poly_value(coeffs, mid);
        if f_mid == 0.0 {
            return mid;
        }
        if (f_mid > 0.0) == descending {
            lo = mid;
        } else {
            hi = mid;
        }
    }

    (lo + hi) / 2.0
}

// ============================================================================
// Sample preparation
// ============================================================================

/// Build `(t, x)` pairs from a newest-first window
///
/// Time zero sits just before the oldest sample, keeping every `t` strictly
/// positive for the log-domain fits; `now` is the anchor on the same scale.
fn time_series(window: &[Sample], anchor: Timestamp) -> (Vec<f64>, Vec<f64>, f64) {
    let zero = window[window.len() - 1].ts;

    let t: Vec<f64> = window
        .iter()
        .map(|s| (s.ts.sec - zero.sec) as f64 + 1e-9 * ((s.ts.ns - zero.ns) as f64 + 1.0))
        .collect();
    let x: Vec<f64> = window
        .iter()
        .map(|s| s.value.as_f64().unwrap_or(0.0))
        .collect();

    let now = (anchor.sec - zero.sec) as f64 - 1e-9 * (zero.ns as f64 + 1.0);

    (t, x, now)
}

fn finite_or_model_error(value: f64) -> Result<EvalValue> {
    if value.is_finite() {
        Ok(EvalValue::Float(value))
    } else {
        Err(Error::Model("projection is not a finite number".to_string()))
    }
}

// ============================================================================
// Handlers
// ============================================================================

/// `forecast(range, horizon, fit?, mode?)`
pub(crate) fn forecast(
    cx: &EvalContext,
    item: &EvalItem,
    params: &ParamList,
    anchor: Timestamp,
) -> Result<EvalValue> {
    let range = resolve_history_range(params, 0, anchor.sec)?;
    if range.kind == RangeKind::None {
        return Err(Error::bad_param(1));
    }

    let horizon = resolve_period(params, 1)?.ok_or_else(|| Error::bad_param(2))? as f64;
    let fit = parse_fit(params.get_or_empty(2), cx.config.max_polynomial_degree)?;
    let mode = parse_mode(params.get_or_empty(3))?;

    let window = fetch_range(cx, item, &range, anchor)?;

    if window.is_empty() {
        return Err(Error::NotEnoughData);
    }

    if window.len() == 1 {
        let value = window[0].value.as_f64().unwrap_or(0.0);
        return Ok(EvalValue::Float(match mode {
            ForecastMode::Delta => 0.0,
            _ => value,
        }));
    }

    let (t, x, now) = time_series(&window, anchor);
    let model = fit_model(&t, &x, fit)?;

    let (t1, t2) = if horizon >= 0.0 {
        (now, now + horizon)
    } else {
        (now + horizon, now)
    };

    let result = match mode {
        ForecastMode::Value => model.value_at(now + horizon),
        ForecastMode::Max => model.extremum(t1, t2, true),
        ForecastMode::Min => model.extremum(t1, t2, false),
        ForecastMode::Delta => model.extremum(t1, t2, true) - model.extremum(t1, t2, false),
        ForecastMode::Avg => model.average(t1, t2),
    };

    finite_or_model_error(result)
}

/// `timeleft(range, threshold, fit?)`
pub(crate) fn timeleft(
    cx: &EvalContext,
    item: &EvalItem,
    params: &ParamList,
    anchor: Timestamp,
) -> Result<EvalValue> {
    let range = resolve_history_range(params, 0, anchor.sec)?;
    if range.kind == RangeKind::None {
        return Err(Error::bad_param(1));
    }

    let threshold = resolve_float(params, 1, FloatShape::Suffixed)?;
    let fit = parse_fit(params.get_or_empty(2), cx.config.max_polynomial_degree)?;

    if matches!(fit, Fit::Exponential | Fit::Power) && threshold <= 0.0 {
        return Err(Error::InvalidSyntax(
            "exponential and power functions are always positive".to_string(),
        ));
    }

    let window = fetch_range(cx, item, &range, anchor)?;

    if window.is_empty() {
        return Err(Error::NotEnoughData);
    }

    if window.len() == 1 {
        let value = window[0].value.as_f64().unwrap_or(0.0);
        return Ok(EvalValue::Float(if double_eq(value, threshold) {
            0.0
        } else {
            TIMELEFT_NEVER
        }));
    }

    let (t, x, now) = time_series(&window, anchor);
    let model = fit_model(&t, &x, fit)?;

    match model.crossing(now, threshold) {
        Some(at) => finite_or_model_error(at - now),
        None => Ok(EvalValue::Float(TIMELEFT_NEVER)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EvalConfig;
    use crate::source::{MemoryTrendSource, MemoryValueSource};
    use crate::types::{HistoryValue, ValueType};

    fn float_series(values: &[(i64, f64)]) -> MemoryValueSource {
        let mut source = MemoryValueSource::new();
        source.add_samples(
            1,
            values
                .iter()
                .map(|&(sec, v)| Sample::new(Timestamp::from_sec(sec), HistoryValue::Float(v)))
                .collect(),
        );
        source
    }

    fn run(
        source: &MemoryValueSource,
        handler: super::super::Handler,
        raw_params: &str,
        anchor: i64,
    ) -> Result<EvalValue> {
        let trends = MemoryTrendSource::new();
        let config = EvalConfig::default();
        let cx = EvalContext {
            values: source,
            trends: &trends,
            config: &config,
        };
        let item = EvalItem::new(1, ValueType::Float);
        let params = ParamList::parse(raw_params).unwrap();
        handler(&cx, &item, &params, Timestamp::from_sec(anchor))
    }

    #[test]
    fn test_poly_roots_quadratic() {
        // (t - 2)(t - 5) = t² - 7t + 10
        let roots = poly_real_roots(&[10.0, -7.0, 1.0]);
        assert_eq!(roots.len(), 2);
        assert!((roots[0] - 2.0).abs() < 1e-6);
        assert!((roots[1] - 5.0).abs() < 1e-6);
    }

    #[test]
    fn test_poly_roots_cubic_with_negative_root() {
        // (t + 1)(t - 1)(t - 3) = t³ - 3t² - t + 3
        let roots = poly_real_roots(&[3.0, -1.0, -3.0, 1.0]);
        assert_eq!(roots.len(), 3);
        assert!((roots[0] + 1.0).abs() < 1e-6);
        assert!((roots[1] - 1.0).abs() < 1e-6);
        assert!((roots[2] - 3.0).abs() < 1e-6);
    }

    #[test]
    fn test_poly_no_real_roots() {
        // t² + 1
        assert!(poly_real_roots(&[1.0, 0.0, 1.0]).is_empty());
    }

    #[test]
    fn test_linear_fit_recovers_line() {
        let t = [1.0, 2.0, 3.0, 4.0];
        let x = [3.0, 5.0, 7.0, 9.0]; // x = 1 + 2t
        let coeffs = polynomial_fit(&t, &x, 1).unwrap();
        assert!((coeffs[0] - 1.0).abs() < 1e-9);
        assert!((coeffs[1] - 2.0).abs() < 1e-9);
    }

    #[test]
    fn test_forecast_linear_projection() {
        // value rises 1.0 per 10 seconds; at anchor 40 + 60s horizon the
        // line reaches 4 + 6 = 10 ... values 1..4 at t 10..40
        let source = float_series(&[(10, 1.0), (20, 2.0), (30, 3.0), (40, 4.0)]);
        let result = run(&source, forecast, "40,60", 40).unwrap();
        assert!((result.as_f64().unwrap() - 10.0).abs() < 1e-6);
    }

    #[test]
    fn test_forecast_modes_on_line() {
        let source = float_series(&[(10, 1.0), (20, 2.0), (30, 3.0), (40, 4.0)]);

        let max = run(&source, forecast, "40,60,linear,max", 40).unwrap();
        let min = run(&source, forecast, "40,60,linear,min", 40).unwrap();
        let delta = run(&source, forecast, "40,60,linear,delta", 40).unwrap();
        let avg = run(&source, forecast, "40,60,linear,avg", 40).unwrap();

        assert!((max.as_f64().unwrap() - 10.0).abs() < 1e-6);
        assert!((min.as_f64().unwrap() - 4.0).abs() < 1e-6);
        assert!((delta.as_f64().unwrap() - 6.0).abs() < 1e-6);
        assert!((avg.as_f64().unwrap() - 7.0).abs() < 1e-6);
    }

    #[test]
    fn test_forecast_single_sample_is_constant() {
        let source = float_series(&[(10, 5.0)]);
        assert_eq!(
            run(&source, forecast, "#1,60", 40).unwrap(),
            EvalValue::Float(5.0)
        );
        assert_eq!(
            run(&source, forecast, "#1,60,linear,delta", 40).unwrap(),
            EvalValue::Float(0.0)
        );
    }

    #[test]
    fn test_forecast_empty_window() {
        let source = MemoryValueSource::new();
        assert!(matches!(
            run(&source, forecast, "60,60", 40),
            Err(Error::NotEnoughData)
        ));
    }

    #[test]
    fn test_timeleft_falling_line() {
        // falls 1.0 per 10 seconds from 10 at t=40; hits 0 at t=140,
        // i.e. 100 seconds after the anchor
        let source = float_series(&[(10, 13.0), (20, 12.0), (30, 11.0), (40, 10.0)]);
        let result = run(&source, timeleft, "40,0", 40).unwrap();
        assert!((result.as_f64().unwrap() - 100.0).abs() < 1e-4);
    }

    #[test]
    fn test_timeleft_never_crosses() {
        // rising line asked when it falls to a value below its reach
        let source = float_series(&[(10, 1.0), (20, 2.0), (30, 3.0), (40, 4.0)]);
        let result = run(&source, timeleft, "40,0", 40).unwrap();
        assert_eq!(result, EvalValue::Float(TIMELEFT_NEVER));
    }

    #[test]
    fn test_timeleft_rejects_nonpositive_threshold_for_exponential() {
        let source = float_series(&[(10, 1.0), (20, 2.0)]);
        assert!(run(&source, timeleft, "40,0,exponential", 40).is_err());
    }

    #[test]
    fn test_exponential_fit() {
        // x = 2·e^(0.1t)
        let t: Vec<f64> = (1..=8).map(|i| i as f64 * 10.0).collect();
        let x: Vec<f64> = t.iter().map(|&ti| 2.0 * (0.1 * ti).exp()).collect();
        let model = fit_model(&t, &x, Fit::Exponential).unwrap();
        match model {
            Model::Exponential { a, b } => {
                assert!((a - 2.0).abs() < 1e-6);
                assert!((b - 0.1).abs() < 1e-9);
            }
            _ => panic!("expected exponential model"),
        }
    }

    #[test]
    fn test_exponential_rejects_nonpositive_data() {
        let t = [1.0, 2.0];
        let x = [3.0, -1.0];
        assert!(matches!(
            fit_model(&t, &x, Fit::Exponential),
            Err(Error::Model(_))
        ));
    }
}
