//! Sample and trend-bucket sources
//!
//! The evaluator never touches storage: it requests windows through the two
//! traits here and treats each call as a synchronous operation that may block
//! inside the collaborator. Failures propagate as
//! [`Error::SourceUnavailable`](crate::error::Error::SourceUnavailable).
//!
//! - [`ValueSource`] serves raw history windows, newest-first, bounded by
//!   either wall-clock seconds or a sample count (exactly one of the two per
//!   request, matching the resolved-range invariant).
//! - [`TrendSource`] serves aggregates over pre-computed hourly buckets,
//!   used by the `trend*` and `baseline*` functions instead of raw samples.
//!
//! In-memory implementations of both are provided for tests and embedding.
//!
//! # Example
//!
//! ```rust
//! use histeval::source::{MemoryValueSource, ValueSource};
//! use histeval::types::{HistoryValue, Sample, Timestamp, ValueType};
//!
//! let mut source = MemoryValueSource::new();
//! source.add_samples(1, vec![
//!     Sample::new(Timestamp::from_sec(100), HistoryValue::Float(1.0)),
//!     Sample::new(Timestamp::from_sec(200), HistoryValue::Float(2.0)),
//! ]);
//!
//! let window = source
//!     .get_values(1, ValueType::Float, 0, 1, Timestamp::from_sec(300))
//!     .unwrap();
//! assert_eq!(window.len(), 1);
//! assert_eq!(window[0].ts.sec, 200);
//! ```

use std::collections::HashMap;

use crate::error::{Error, Result};
use crate::types::{ItemId, Sample, Timestamp, ValueType};

/// Aggregate kind for a trend-bucket query
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrendStat {
    /// Weighted average of bucket averages
    Avg,
    /// Minimum over bucket minimums
    Min,
    /// Maximum over bucket maximums
    Max,
    /// Sum reconstructed from bucket averages and counts
    Sum,
    /// Number of raw values covered by the buckets
    Count,
}

/// Provider of raw history windows for one metric
///
/// Returned samples are sorted newest-first and all lie at or before `end`.
/// Exactly one of `seconds`/`count` is non-zero per request: a seconds
/// request covers the window `(end - seconds, end]`, a count request returns
/// the `count` most recent samples at or before `end`.
pub trait ValueSource: Send + Sync {
    /// Fetch a window of samples for an item
    fn get_values(
        &self,
        item_id: ItemId,
        value_type: ValueType,
        seconds: i64,
        count: usize,
        end: Timestamp,
    ) -> Result<Vec<Sample>>;
}

/// Provider of hourly trend-bucket aggregates for one metric
///
/// `start` and `end` are inclusive hour-aligned bucket clocks. `Ok(None)`
/// means the range holds no buckets (distinct from a source failure).
pub trait TrendSource: Send + Sync {
    /// Aggregate the buckets with clocks in `[start, end]`
    fn get_trend_aggregate(
        &self,
        item_id: ItemId,
        start: i64,
        end: i64,
        stat: TrendStat,
    ) -> Result<Option<f64>>;
}

// ============================================================================
// In-memory value source
// ============================================================================

/// In-memory [`ValueSource`] for tests and embedding
#[derive(Debug, Default)]
pub struct MemoryValueSource {
    series: HashMap<ItemId, Vec<Sample>>,
}

impl MemoryValueSource {
    /// Create an empty source
    pub fn new() -> Self {
        Self::default()
    }

    /// Add samples for an item; ordering of the input does not matter
    pub fn add_samples(&mut self, item_id: ItemId, samples: Vec<Sample>) {
        let series = self.series.entry(item_id).or_default();
        series.extend(samples);
        // newest-first, the order the evaluator consumes
        series.sort_by(|a, b| b.ts.cmp(&a.ts));
    }
}

impl ValueSource for MemoryValueSource {
    fn get_values(
        &self,
        item_id: ItemId,
        _value_type: ValueType,
        seconds: i64,
        count: usize,
        end: Timestamp,
    ) -> Result<Vec<Sample>> {
        let series = match self.series.get(&item_id) {
            Some(series) => series,
            None => return Ok(Vec::new()),
        };

        let in_window = series.iter().filter(|s| {
            s.ts <= end && (seconds == 0 || s.ts.sec > end.sec.saturating_sub(seconds))
        });

        let window: Vec<Sample> = if count > 0 {
            in_window.take(count).cloned().collect()
        } else {
            in_window.cloned().collect()
        };

        Ok(window)
    }
}

// ============================================================================
// In-memory trend source
// ============================================================================

/// One pre-aggregated hourly bucket
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TrendBucket {
    /// Start of the hour the bucket covers, seconds since epoch
    pub clock: i64,
    /// Number of raw values aggregated into the bucket
    pub num: u32,
    /// Average of the raw values
    pub avg: f64,
    /// Minimum of the raw values
    pub min: f64,
    /// Maximum of the raw values
    pub max: f64,
}

impl TrendBucket {
    /// Bucket where every raw value equals `value`
    pub fn flat(clock: i64, num: u32, value: f64) -> Self {
        Self {
            clock,
            num,
            avg: value,
            min: value,
            max: value,
        }
    }
}

/// In-memory [`TrendSource`] for tests and embedding
#[derive(Debug, Default)]
pub struct MemoryTrendSource {
    series: HashMap<ItemId, Vec<TrendBucket>>,
}

impl MemoryTrendSource {
    /// Create an empty source
    pub fn new() -> Self {
        Self::default()
    }

    /// Add one bucket for an item
    pub fn add_bucket(&mut self, item_id: ItemId, bucket: TrendBucket) {
        self.series.entry(item_id).or_default().push(bucket);
    }
}

impl TrendSource for MemoryTrendSource {
    fn get_trend_aggregate(
        &self,
        item_id: ItemId,
        start: i64,
        end: i64,
        stat: TrendStat,
    ) -> Result<Option<f64>> {
        if start > end {
            return Err(Error::SourceUnavailable(format!(
                "invalid trend range: start {} > end {}",
                start, end
            )));
        }

        let buckets: Vec<&TrendBucket> = self
            .series
            .get(&item_id)
            .map(|series| {
                series
                    .iter()
                    .filter(|b| b.clock >= start && b.clock <= end)
                    .collect()
            })
            .unwrap_or_default();

        if buckets.is_empty() {
            return Ok(None);
        }

        let total_num: u64 = buckets.iter().map(|b| b.num as u64).sum();
        if total_num == 0 {
            return Ok(None);
        }

        let weighted_sum: f64 = buckets.iter().map(|b| b.avg * b.num as f64).sum();

        let value = match stat {
            TrendStat::Avg => weighted_sum / total_num as f64,
            TrendStat::Sum => weighted_sum,
            TrendStat::Count => total_num as f64,
            TrendStat::Min => buckets.iter().map(|b| b.min).fold(f64::INFINITY, f64::min),
            TrendStat::Max => buckets
                .iter()
                .map(|b| b.max)
                .fold(f64::NEG_INFINITY, f64::max),
        };

        Ok(Some(value))
    }
}
