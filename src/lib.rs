//! histeval - Time-series analytic function evaluator for trigger expressions
//!
//! This library computes named analytic functions (`last`, `avg`,
//! `percentile`, `trendavg`, `forecast`, `rate`, `changecount`,
//! `baselinewma`, ...) over a bounded window of historical samples belonging
//! to one monitored metric, producing a single typed value used to drive
//! alerting logic. It provides:
//!
//! - the compact textual parameter grammar every function call uses
//!   (`#5`, `30m`, `1h:now-1d`, quoted strings, comparison operators)
//! - a fixed dispatch table enforcing value-type applicability and
//!   parameter-count bounds before any data is fetched
//! - ~40 analytic functions: window aggregation, order statistics,
//!   pattern-matching counts, counter-reset-aware rates, least-squares
//!   forecasting, seasonal-trend decomposition and seasonal baselines
//!
//! History and trend-bucket storage stay behind the [`source`] traits; the
//! evaluator itself is a pure, synchronous, re-entrant computation with no
//! shared mutable state.
//!
//! # Example
//!
//! ```rust
//! use std::sync::Arc;
//! use histeval::{Evaluator, EvalItem, EvalValue, Timestamp, ValueType};
//! use histeval::source::{MemoryTrendSource, MemoryValueSource};
//! use histeval::types::{HistoryValue, Sample};
//!
//! let mut values = MemoryValueSource::new();
//! values.add_samples(1, vec![
//!     Sample::new(Timestamp::from_sec(100), HistoryValue::Uint(10)),
//!     Sample::new(Timestamp::from_sec(200), HistoryValue::Uint(13)),
//! ]);
//!
//! let evaluator = Evaluator::new(Arc::new(values), Arc::new(MemoryTrendSource::new()));
//! let item = EvalItem::new(1, ValueType::Uint);
//!
//! let change = evaluator
//!     .evaluate("change", "", &item, Timestamp::from_sec(300))
//!     .unwrap();
//! assert_eq!(change, EvalValue::Float(3.0));
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod config;
pub mod dispatch;
pub mod error;
pub mod params;
pub mod source;
pub mod types;

mod functions;

// Re-export main types
pub use config::EvalConfig;
pub use dispatch::{is_known_function, Evaluator};
pub use error::{Error, Result};
pub use types::{EvalItem, EvalValue, Timestamp, ValueType};

/// `timeleft` result when the fitted curve never reaches the threshold
pub use functions::curvefit::TIMELEFT_NEVER;
