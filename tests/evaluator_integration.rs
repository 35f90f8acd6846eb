//! Integration tests for the analytic function evaluator
//!
//! These tests drive the complete pipeline through `Evaluator::evaluate`:
//! parameter resolution, dispatch-time validation, sample window
//! acquisition from in-memory sources and the function computations
//! themselves.

use std::sync::Arc;

use histeval::source::{MemoryTrendSource, MemoryValueSource, TrendBucket};
use histeval::types::{HistoryValue, LogRecord, ProxyState, Sample};
use histeval::{is_known_function, Error, EvalItem, EvalValue, Evaluator, Timestamp, ValueType};

// 2023-11-15 00:00:00 UTC
const MIDNIGHT: i64 = 1700006400;

// ============================================================================
// Helper Functions
// ============================================================================

fn float_samples(values: &[(i64, f64)]) -> Vec<Sample> {
    values
        .iter()
        .map(|&(sec, v)| Sample::new(Timestamp::from_sec(sec), HistoryValue::Float(v)))
        .collect()
}

fn uint_samples(values: &[(i64, u64)]) -> Vec<Sample> {
    values
        .iter()
        .map(|&(sec, v)| Sample::new(Timestamp::from_sec(sec), HistoryValue::Uint(v)))
        .collect()
}

fn str_samples(values: &[(i64, &str)]) -> Vec<Sample> {
    values
        .iter()
        .map(|&(sec, v)| Sample::new(Timestamp::from_sec(sec), HistoryValue::Str(v.to_string())))
        .collect()
}

fn evaluator(samples: Vec<Sample>) -> Evaluator {
    let mut values = MemoryValueSource::new();
    values.add_samples(1, samples);
    Evaluator::new(Arc::new(values), Arc::new(MemoryTrendSource::new()))
}

fn float_item() -> EvalItem {
    EvalItem::new(1, ValueType::Float)
}

fn uint_item() -> EvalItem {
    EvalItem::new(1, ValueType::Uint)
}

fn at(sec: i64) -> Timestamp {
    Timestamp::from_sec(sec)
}

// ============================================================================
// Selection functions
// ============================================================================

#[test]
fn last_selects_nth_most_recent() {
    let e = evaluator(float_samples(&[(10, 1.0), (20, 2.0), (30, 3.0)]));
    let item = float_item();

    assert_eq!(
        e.evaluate("last", "#1", &item, at(100)).unwrap(),
        EvalValue::Float(3.0)
    );
    assert_eq!(
        e.evaluate("last", "#3", &item, at(100)).unwrap(),
        EvalValue::Float(1.0)
    );
    assert!(matches!(
        e.evaluate("last", "#4", &item, at(100)),
        Err(Error::NotEnoughData)
    ));

    // absent parameter defaults to the most recent value
    assert_eq!(
        e.evaluate("last", "", &item, at(100)).unwrap(),
        EvalValue::Float(3.0)
    );
}

#[test]
fn last_honors_time_shift() {
    let e = evaluator(float_samples(&[(10, 1.0), (100, 2.0)]));
    let item = float_item();

    // shifted anchor lands before the newest sample
    let result = e.evaluate("last", "#1:now-50", &item, at(120)).unwrap();
    assert_eq!(result, EvalValue::Float(1.0));
}

#[test]
fn last_on_string_metric() {
    let mut values = MemoryValueSource::new();
    values.add_samples(1, str_samples(&[(10, "down"), (20, "up")]));
    let e = Evaluator::new(Arc::new(values), Arc::new(MemoryTrendSource::new()));
    let item = EvalItem::new(1, ValueType::Str);

    assert_eq!(
        e.evaluate("last", "", &item, at(100)).unwrap(),
        EvalValue::Str("up".to_string())
    );
}

#[test]
fn first_needs_a_positive_duration() {
    let e = evaluator(float_samples(&[(10, 1.0), (20, 2.0), (30, 3.0)]));
    let item = float_item();

    assert_eq!(
        e.evaluate("first", "1m", &item, at(60)).unwrap(),
        EvalValue::Float(1.0)
    );
    assert!(matches!(
        e.evaluate("first", "#2", &item, at(60)),
        Err(Error::InvalidSyntax(_))
    ));
    assert!(matches!(
        e.evaluate("first", "", &item, at(60)),
        Err(Error::InvalidParameterCount)
    ));
}

// ============================================================================
// Aggregates
// ============================================================================

#[test]
fn numeric_aggregates() {
    let e = evaluator(float_samples(&[(10, 4.0), (20, 1.0), (30, 7.0), (40, 2.0)]));
    let item = float_item();

    assert_eq!(
        e.evaluate("min", "60", &item, at(60)).unwrap(),
        EvalValue::Float(1.0)
    );
    assert_eq!(
        e.evaluate("max", "60", &item, at(60)).unwrap(),
        EvalValue::Float(7.0)
    );
    assert_eq!(
        e.evaluate("avg", "60", &item, at(60)).unwrap(),
        EvalValue::Float(3.5)
    );
    assert_eq!(
        e.evaluate("sum", "60", &item, at(60)).unwrap(),
        EvalValue::Float(14.0)
    );
}

#[test]
fn sum_keeps_unsigned_arithmetic() {
    let e = evaluator(uint_samples(&[(10, 1), (20, 2), (30, 3)]));
    let result = e.evaluate("sum", "60", &uint_item(), at(60)).unwrap();
    assert_eq!(result, EvalValue::Uint(6));
}

#[test]
fn aggregates_reject_string_metrics() {
    let e = evaluator(str_samples(&[(10, "a")]));
    let item = EvalItem::new(1, ValueType::Str);

    for function in ["min", "max", "avg", "sum", "percentile", "forecast", "rate"] {
        let result = e.evaluate(function, "60,1", &item, at(60));
        assert!(
            matches!(result, Err(Error::InvalidValueType)),
            "{} accepted a string metric",
            function
        );
    }
}

#[test]
fn percentile_boundaries() {
    let e = evaluator(float_samples(&[
        (10, 5.0),
        (20, 1.0),
        (30, 9.0),
        (40, 3.0),
        (50, 7.0),
    ]));
    let item = float_item();

    assert_eq!(
        e.evaluate("percentile", "60,0", &item, at(60)).unwrap(),
        EvalValue::Float(1.0)
    );
    assert_eq!(
        e.evaluate("percentile", "60,100", &item, at(60)).unwrap(),
        EvalValue::Float(9.0)
    );
    assert_eq!(
        e.evaluate("percentile", "60,50", &item, at(60)).unwrap(),
        EvalValue::Float(5.0)
    );

    assert!(matches!(
        e.evaluate("percentile", "60,101", &item, at(60)),
        Err(Error::InvalidSyntax(_))
    ));
}

#[test]
fn change_handles_unsigned_underflow() {
    // newest 3, previous 10: the difference is -7, not a wrapped u64
    let e = evaluator(uint_samples(&[(10, 10), (20, 3)]));
    let result = e.evaluate("change", "", &uint_item(), at(60)).unwrap();
    assert_eq!(result, EvalValue::Float(-7.0));

    let e = evaluator(uint_samples(&[(10, 7), (20, 10)]));
    assert_eq!(
        e.evaluate("change", "", &uint_item(), at(60)).unwrap(),
        EvalValue::Float(3.0)
    );
    assert_eq!(
        e.evaluate("abschange", "", &uint_item(), at(60)).unwrap(),
        EvalValue::Float(3.0)
    );
}

#[test]
fn change_on_strings_is_boolean() {
    let e = evaluator(str_samples(&[(10, "up"), (20, "down")]));
    let item = EvalItem::new(1, ValueType::Str);
    assert_eq!(
        e.evaluate("change", "", &item, at(60)).unwrap(),
        EvalValue::Float(1.0)
    );

    let e = evaluator(str_samples(&[(10, "up"), (20, "up")]));
    assert_eq!(
        e.evaluate("change", "", &item, at(60)).unwrap(),
        EvalValue::Float(0.0)
    );
}

// ============================================================================
// Counting
// ============================================================================

#[test]
fn count_with_operators() {
    let e = evaluator(uint_samples(&[(10, 1), (20, 5), (30, 5), (40, 9)]));
    let item = uint_item();

    assert_eq!(
        e.evaluate("count", "60", &item, at(60)).unwrap(),
        EvalValue::Float(4.0)
    );
    assert_eq!(
        e.evaluate("count", "60,eq,5", &item, at(60)).unwrap(),
        EvalValue::Float(2.0)
    );
    assert_eq!(
        e.evaluate("count", "60,gt,4", &item, at(60)).unwrap(),
        EvalValue::Float(3.0)
    );
    assert_eq!(
        e.evaluate("count", "60,bitand,1", &item, at(60)).unwrap(),
        EvalValue::Float(4.0)
    );
}

#[test]
fn countunique_deduplicates_first() {
    let e = evaluator(uint_samples(&[(10, 1), (20, 5), (30, 5), (40, 9)]));
    assert_eq!(
        e.evaluate("countunique", "60", &uint_item(), at(60)).unwrap(),
        EvalValue::Float(3.0)
    );
}

#[test]
fn find_stops_at_one_match() {
    let e = evaluator(str_samples(&[(10, "error"), (20, "error"), (30, "ok")]));
    let item = EvalItem::new(1, ValueType::Str);
    assert_eq!(
        e.evaluate("find", "60,like,error", &item, at(60)).unwrap(),
        EvalValue::Float(1.0)
    );
    assert_eq!(
        e.evaluate("find", "60,regexp,^missing$", &item, at(60)).unwrap(),
        EvalValue::Float(0.0)
    );
}

#[test]
fn count_with_embedded_commas_in_pattern() {
    let e = evaluator(str_samples(&[(10, "a,b"), (20, "c")]));
    let item = EvalItem::new(1, ValueType::Str);
    assert_eq!(
        e.evaluate("count", r#"60,eq,"a,b""#, &item, at(60)).unwrap(),
        EvalValue::Float(1.0)
    );
}

// ============================================================================
// Rate and sequences
// ============================================================================

#[test]
fn rate_compensates_counter_resets() {
    // chronological 5, 8, 2, 6: the reset restarts from zero, so the
    // pre-reset value 8 is added back and the total increase is 9
    let e = evaluator(uint_samples(&[(10, 5), (20, 8), (30, 2), (40, 6)]));
    let result = e
        .evaluate("rate", "40", &uint_item(), at(40))
        .unwrap()
        .as_f64()
        .unwrap();
    assert!((result - 9.0 / 30.0).abs() < 1e-9);
}

#[test]
fn monotonicity_checks() {
    let item = uint_item();

    let rising = evaluator(uint_samples(&[(10, 1), (20, 2), (30, 3)]));
    assert_eq!(
        rising
            .evaluate("monoinc", "60,strict", &item, at(60))
            .unwrap(),
        EvalValue::Uint(1)
    );

    let plateau = evaluator(uint_samples(&[(10, 1), (20, 3), (30, 3)]));
    assert_eq!(
        plateau
            .evaluate("monoinc", "60,strict", &item, at(60))
            .unwrap(),
        EvalValue::Uint(0)
    );
    assert_eq!(
        plateau
            .evaluate("monoinc", "60,weak", &item, at(60))
            .unwrap(),
        EvalValue::Uint(1)
    );

    let falling = evaluator(uint_samples(&[(10, 9), (20, 5), (30, 2)]));
    assert_eq!(
        falling
            .evaluate("monodec", "60,strict", &item, at(60))
            .unwrap(),
        EvalValue::Uint(1)
    );
}

#[test]
fn changecount_directions() {
    let e = evaluator(uint_samples(&[(10, 1), (20, 3), (30, 2), (40, 5)]));
    let item = uint_item();

    assert_eq!(
        e.evaluate("changecount", "60", &item, at(60)).unwrap(),
        EvalValue::Uint(3)
    );
    assert_eq!(
        e.evaluate("changecount", "60,inc", &item, at(60)).unwrap(),
        EvalValue::Uint(2)
    );
    assert_eq!(
        e.evaluate("changecount", "60,dec", &item, at(60)).unwrap(),
        EvalValue::Uint(1)
    );

    let single = evaluator(uint_samples(&[(10, 1)]));
    assert!(matches!(
        single.evaluate("changecount", "60", &item, at(60)),
        Err(Error::NotEnoughData)
    ));
}

// ============================================================================
// Statistics
// ============================================================================

#[test]
fn sample_statistics_need_two_values() {
    let single = evaluator(float_samples(&[(10, 4.0)]));
    let item = float_item();

    for function in ["stddevsamp", "varsamp"] {
        assert!(
            matches!(
                single.evaluate(function, "60", &item, at(60)),
                Err(Error::NotEnoughData)
            ),
            "{} accepted a single sample",
            function
        );
    }

    // population statistics are defined for one sample, and are zero
    assert_eq!(
        single.evaluate("stddevpop", "60", &item, at(60)).unwrap(),
        EvalValue::Float(0.0)
    );
    assert_eq!(
        single.evaluate("varpop", "60", &item, at(60)).unwrap(),
        EvalValue::Float(0.0)
    );
}

#[test]
fn population_moments() {
    let e = evaluator(float_samples(&[
        (10, 2.0),
        (20, 4.0),
        (30, 4.0),
        (40, 4.0),
        (50, 5.0),
        (60, 5.0),
        (70, 7.0),
        (80, 9.0),
    ]));
    let item = float_item();

    assert_eq!(
        e.evaluate("stddevpop", "100", &item, at(100)).unwrap(),
        EvalValue::Float(2.0)
    );
    assert_eq!(
        e.evaluate("varpop", "100", &item, at(100)).unwrap(),
        EvalValue::Float(4.0)
    );
    assert_eq!(
        e.evaluate("sumofsquares", "100", &item, at(100)).unwrap(),
        EvalValue::Float(232.0)
    );
    // median 4.5, deviations [0.5×5, 2.5×2, 4.5] -> median deviation 0.5
    assert_eq!(
        e.evaluate("mad", "100", &item, at(100)).unwrap(),
        EvalValue::Float(0.5)
    );
}

// ============================================================================
// Forecasting
// ============================================================================

#[test]
fn forecast_projects_a_line() {
    let e = evaluator(float_samples(&[(10, 1.0), (20, 2.0), (30, 3.0), (40, 4.0)]));
    let item = float_item();

    let result = e
        .evaluate("forecast", "40,60", &item, at(40))
        .unwrap()
        .as_f64()
        .unwrap();
    assert!((result - 10.0).abs() < 1e-6);
}

#[test]
fn timeleft_on_a_falling_line() {
    let e = evaluator(float_samples(&[
        (10, 13.0),
        (20, 12.0),
        (30, 11.0),
        (40, 10.0),
    ]));
    let item = float_item();

    let result = e
        .evaluate("timeleft", "40,0", &item, at(40))
        .unwrap()
        .as_f64()
        .unwrap();
    assert!((result - 100.0).abs() < 1e-4);

    // a rising line never falls back to zero
    let rising = evaluator(float_samples(&[(10, 1.0), (20, 2.0), (30, 3.0)]));
    assert_eq!(
        rising.evaluate("timeleft", "30,0", &item, at(30)).unwrap(),
        EvalValue::Float(histeval::TIMELEFT_NEVER)
    );
}

// ============================================================================
// Trends and baselines
// ============================================================================

fn trend_evaluator(buckets: Vec<TrendBucket>) -> Evaluator {
    let mut trends = MemoryTrendSource::new();
    for bucket in buckets {
        trends.add_bucket(1, bucket);
    }
    Evaluator::new(Arc::new(MemoryValueSource::new()), Arc::new(trends))
}

#[test]
fn trend_aggregates_over_yesterday() {
    let start = MIDNIGHT - 86400;
    let buckets = (0..24)
        .map(|hour| TrendBucket::flat(start + hour * 3600, 10, hour as f64))
        .collect();
    let e = trend_evaluator(buckets);
    let item = float_item();
    let anchor = at(MIDNIGHT + 3600);

    assert_eq!(
        e.evaluate("trendavg", "1d:now/d", &item, anchor).unwrap(),
        EvalValue::Float(11.5)
    );
    assert_eq!(
        e.evaluate("trendmin", "1d:now/d", &item, anchor).unwrap(),
        EvalValue::Float(0.0)
    );
    assert_eq!(
        e.evaluate("trendmax", "1d:now/d", &item, anchor).unwrap(),
        EvalValue::Float(23.0)
    );
    assert_eq!(
        e.evaluate("trendcount", "1d:now/d", &item, anchor).unwrap(),
        EvalValue::Float(240.0)
    );

    // an empty period counts zero but cannot be averaged
    assert_eq!(
        e.evaluate("trendcount", "1d:now/d-10d", &item, anchor)
            .unwrap(),
        EvalValue::Float(0.0)
    );
    assert!(matches!(
        e.evaluate("trendavg", "1d:now/d-10d", &item, anchor),
        Err(Error::NotEnoughData)
    ));
}

#[test]
fn baselinewma_weighted_seasons() {
    let hour = MIDNIGHT - 3600;
    let buckets = vec![
        TrendBucket::flat(hour - 86400, 1, 6.0),
        TrendBucket::flat(hour - 2 * 86400, 1, 9.0),
        TrendBucket::flat(hour - 3 * 86400, 1, 12.0),
    ];
    let e = trend_evaluator(buckets);
    let item = float_item();

    let result = e
        .evaluate("baselinewma", "1h:now/d,d,3", &item, at(MIDNIGHT + 1000))
        .unwrap();

    // (3·6 + 2·9 + 1·12) / 6
    assert_eq!(result, EvalValue::Float(8.0));
}

#[test]
fn baselinedev_scores_the_current_period() {
    let hour = MIDNIGHT - 3600;
    let mut buckets: Vec<TrendBucket> = (1..=4)
        .map(|days_back| TrendBucket::flat(hour - days_back * 86400, 1, 10.0))
        .collect();
    // current period far off the seasonal history
    buckets.push(TrendBucket::flat(hour, 1, 20.0));

    let e = trend_evaluator(buckets);
    let item = float_item();

    let result = e
        .evaluate("baselinedev", "1h:now/d,d,4", &item, at(MIDNIGHT + 1000))
        .unwrap()
        .as_f64()
        .unwrap();

    // values [20, 10, 10, 10, 10]: mean 12, stddev 4, |20-12|/4 = 2
    assert!((result - 2.0).abs() < 1e-9);
}

// ============================================================================
// Availability
// ============================================================================

#[test]
fn nodata_lazy_and_strict() {
    let mut values = MemoryValueSource::new();
    values.add_samples(1, float_samples(&[(750, 1.0)]));
    let e = Evaluator::new(Arc::new(values), Arc::new(MemoryTrendSource::new()));

    let mut item = float_item();
    item.data_expected_from = Some(0);
    item.proxy = Some(ProxyState {
        last_access: 800,
        suppress_active: false,
    });

    // 100s window misses the value; the lazy proxy extension reaches it
    assert_eq!(
        e.evaluate("nodata", "100", &item, at(1000)).unwrap(),
        EvalValue::Float(0.0)
    );
    assert_eq!(
        e.evaluate("nodata", "100,strict", &item, at(1000)).unwrap(),
        EvalValue::Float(1.0)
    );
}

#[test]
fn bitand_masks_the_latest_value() {
    let e = evaluator(uint_samples(&[(10, 0b1101)]));
    assert_eq!(
        e.evaluate("bitand", "#1,6", &uint_item(), at(60)).unwrap(),
        EvalValue::Uint(0b0100)
    );
}

#[test]
fn fuzzytime_tracks_the_clock() {
    let e = evaluator(uint_samples(&[(990, 995)]));
    assert_eq!(
        e.evaluate("fuzzytime", "60", &uint_item(), at(1000)).unwrap(),
        EvalValue::Float(1.0)
    );
}

// ============================================================================
// Log functions
// ============================================================================

#[test]
fn log_functions_read_record_fields() {
    let mut values = MemoryValueSource::new();
    values.add_samples(
        1,
        vec![Sample::new(
            Timestamp::from_sec(100),
            HistoryValue::Log(LogRecord {
                value: "disk failure".into(),
                source: Some("kernel".into()),
                severity: 4,
                event_id: 4242,
                log_time: 100,
            }),
        )],
    );
    let e = Evaluator::new(Arc::new(values), Arc::new(MemoryTrendSource::new()));
    let item = EvalItem::new(1, ValueType::Log);

    assert_eq!(
        e.evaluate("logseverity", "", &item, at(200)).unwrap(),
        EvalValue::Float(4.0)
    );
    assert_eq!(
        e.evaluate("logsource", "#1,kernel", &item, at(200)).unwrap(),
        EvalValue::Float(1.0)
    );
    assert_eq!(
        e.evaluate("logeventid", "#1,^42", &item, at(200)).unwrap(),
        EvalValue::Float(1.0)
    );

    // log functions reject non-log metrics
    let float = evaluator(float_samples(&[(10, 1.0)]));
    assert!(matches!(
        float.evaluate("logseverity", "", &float_item(), at(200)),
        Err(Error::InvalidValueType)
    ));
}

// ============================================================================
// Whitelist
// ============================================================================

#[test]
fn whitelist_gates_macro_expansion() {
    for name in ["last", "trendavg", "baselinedev", "abs", "jsonpath"] {
        assert!(is_known_function(name), "{} should be known", name);
    }
    for name in ["lastvalue", "tren", "", "evaluate"] {
        assert!(!is_known_function(name), "{} should be unknown", name);
    }
}
