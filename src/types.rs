//! Core data types used throughout the evaluator
//!
//! This module defines the data model shared by the argument resolver, the
//! sample window adapter and the function implementations:
//!
//! # Key Types
//!
//! - **`ItemId`**: unique identifier of a monitored metric
//! - **`ValueType`**: the metric's value type, constraining applicable functions
//! - **`Timestamp`**: second-resolution clock with a nanosecond tie-breaker
//! - **`HistoryValue`** / **`Sample`**: one historical measurement
//! - **`EvalItem`**: the metric snapshot an evaluation runs against
//! - **`EvalValue`**: the single typed result of a function call
//!
//! # Example
//!
//! ```rust
//! use histeval::types::{HistoryValue, Sample, Timestamp};
//!
//! let sample = Sample::new(Timestamp::new(1700000000, 0), HistoryValue::Float(42.5));
//! assert_eq!(sample.ts.sec, 1700000000);
//! ```

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;

/// Unique identifier for a monitored metric ("item")
pub type ItemId = u64;

/// Comparison tolerance for floating point history values.
///
/// Two doubles closer than this are considered equal by `changecount`,
/// `monoinc`/`monodec`, counter-reset detection and the `eq`/`ne` count
/// operators.
pub const DOUBLE_EPSILON: f64 = 1.0e-9;

/// Compare two doubles with the evaluator-wide tolerance
pub fn double_eq(a: f64, b: f64) -> bool {
    (a - b).abs() <= DOUBLE_EPSILON
}

/// Value type of a metric
///
/// Constrains which functions apply and which sample fields are valid. The
/// dispatch table rejects an evaluation with `InvalidValueType` before any
/// sample data is fetched.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ValueType {
    /// IEEE 754 double precision values
    Float,
    /// Unsigned 64-bit integer values (counters, sizes, flags)
    Uint,
    /// Short character values
    Str,
    /// Long text values
    Text,
    /// Log records with severity/source/event-id metadata
    Log,
}

impl ValueType {
    /// Whether the type carries numeric samples
    pub fn is_numeric(&self) -> bool {
        matches!(self, ValueType::Float | ValueType::Uint)
    }
}

impl fmt::Display for ValueType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ValueType::Float => "float",
            ValueType::Uint => "uint",
            ValueType::Str => "str",
            ValueType::Text => "text",
            ValueType::Log => "log",
        };
        write!(f, "{}", name)
    }
}

/// Point in time with second resolution plus a nanosecond tie-breaker
///
/// Samples collected within the same second are ordered by the nanosecond
/// part, matching the ordering granularity of the value store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Timestamp {
    /// Seconds since the Unix epoch
    pub sec: i64,
    /// Nanoseconds within the second (0..10^9)
    pub ns: i32,
}

impl Timestamp {
    /// Create a new timestamp
    pub fn new(sec: i64, ns: i32) -> Self {
        Self { sec, ns }
    }

    /// Timestamp at an exact second boundary
    pub fn from_sec(sec: i64) -> Self {
        Self { sec, ns: 0 }
    }

    /// The timestamp as fractional seconds
    pub fn as_secs_f64(&self) -> f64 {
        self.sec as f64 + self.ns as f64 / 1e9
    }
}

impl PartialOrd for Timestamp {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Timestamp {
    fn cmp(&self, other: &Self) -> Ordering {
        self.sec.cmp(&other.sec).then(self.ns.cmp(&other.ns))
    }
}

/// One log record as stored in history
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogRecord {
    /// The log line itself
    pub value: String,
    /// Originating source (facility, file, channel), when known
    pub source: Option<String>,
    /// Severity level
    pub severity: i32,
    /// Event identifier assigned by the log producer
    pub event_id: u64,
    /// Timestamp extracted from the log line, seconds since epoch
    pub log_time: i64,
}

impl LogRecord {
    /// Create a log record carrying only a message line
    pub fn from_value(value: impl Into<String>) -> Self {
        Self {
            value: value.into(),
            source: None,
            severity: 0,
            event_id: 0,
            log_time: 0,
        }
    }
}

/// A single historical value, tagged by value type
///
/// Functions declare which variants they accept; the dispatch step enforces
/// the declaration before any variant is unwrapped, so the accessors here
/// only need to handle the declared shapes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum HistoryValue {
    /// Floating point sample
    Float(f64),
    /// Unsigned integer sample
    Uint(u64),
    /// Short string sample
    Str(String),
    /// Long text sample
    Text(String),
    /// Log record sample
    Log(LogRecord),
}

impl HistoryValue {
    /// Numeric view of the sample; `None` for string-family variants
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            HistoryValue::Float(v) => Some(*v),
            HistoryValue::Uint(v) => Some(*v as f64),
            _ => None,
        }
    }

    /// Unsigned view of the sample
    pub fn as_u64(&self) -> Option<u64> {
        match self {
            HistoryValue::Uint(v) => Some(*v),
            _ => None,
        }
    }

    /// Textual view of the sample: the string itself, or the log line
    pub fn as_text(&self) -> Option<&str> {
        match self {
            HistoryValue::Str(s) | HistoryValue::Text(s) => Some(s),
            HistoryValue::Log(log) => Some(&log.value),
            _ => None,
        }
    }

    /// Log-record view of the sample
    pub fn as_log(&self) -> Option<&LogRecord> {
        match self {
            HistoryValue::Log(log) => Some(log),
            _ => None,
        }
    }
}

/// A `(timestamp, value)` pair as returned by the value source
///
/// Windows are ordered newest-first; the evaluator consumes them in that
/// order and releases the window at the end of the call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Sample {
    /// Collection time
    pub ts: Timestamp,
    /// Collected value
    pub value: HistoryValue,
}

impl Sample {
    /// Create a new sample
    pub fn new(ts: Timestamp, value: HistoryValue) -> Self {
        Self { ts, value }
    }
}

/// Proxy state snapshot used by availability checks
///
/// When a metric is collected through a proxy, data may lag behind the
/// proxy's buffer; `nodata` in lazy mode widens its window by the last-access
/// lag and refuses to fire while a suppressed-data transfer is in progress.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProxyState {
    /// Last time the proxy contacted the server, seconds since epoch
    pub last_access: i64,
    /// Whether the proxy's historical data transfer is still suppressed
    pub suppress_active: bool,
}

/// The metric snapshot an evaluation runs against
///
/// Owned by the caller; the evaluator only reads it. The availability fields
/// are a point-in-time snapshot the caller takes from its configuration
/// store, so the evaluator itself has no hidden collaborators.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvalItem {
    /// Metric identifier, passed through to the value source
    pub item_id: ItemId,
    /// Value type of the metric's samples
    pub value_type: ValueType,
    /// Host the metric belongs to (diagnostics only)
    pub host: String,
    /// Metric key (diagnostics only)
    pub key: String,
    /// Earliest time data could have existed for this metric
    /// (registration or re-enable time); used by `nodata`
    pub data_expected_from: Option<i64>,
    /// Proxy snapshot when the metric is proxied; used by `nodata`
    pub proxy: Option<ProxyState>,
}

impl EvalItem {
    /// Create an item snapshot with no proxy and unknown registration time
    pub fn new(item_id: ItemId, value_type: ValueType) -> Self {
        Self {
            item_id,
            value_type,
            host: String::new(),
            key: String::new(),
            data_expected_from: None,
            proxy: None,
        }
    }
}

/// The single typed result of a function evaluation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum EvalValue {
    /// Numeric result
    Float(f64),
    /// Unsigned integer result (counts, masked values, boolean 0/1)
    Uint(u64),
    /// String result (`last` on string metrics, log fields)
    Str(String),
}

impl EvalValue {
    /// Numeric view of the result
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            EvalValue::Float(v) => Some(*v),
            EvalValue::Uint(v) => Some(*v as f64),
            EvalValue::Str(_) => None,
        }
    }
}

impl From<&HistoryValue> for EvalValue {
    /// History values surface as results unchanged; log records surface as
    /// their message line
    fn from(value: &HistoryValue) -> Self {
        match value {
            HistoryValue::Float(v) => EvalValue::Float(*v),
            HistoryValue::Uint(v) => EvalValue::Uint(*v),
            HistoryValue::Str(s) | HistoryValue::Text(s) => EvalValue::Str(s.clone()),
            HistoryValue::Log(log) => EvalValue::Str(log.value.clone()),
        }
    }
}

impl fmt::Display for EvalValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EvalValue::Float(v) => write!(f, "{}", v),
            EvalValue::Uint(v) => write!(f, "{}", v),
            EvalValue::Str(s) => write!(f, "{}", s),
        }
    }
}
