//! Function dispatch
//!
//! One immutable table maps a function name to its implementation, the value
//! types it applies to and its parameter-count bounds. Lookups are exact —
//! no prefix or partial matches — because the same table doubles as the
//! whitelist upstream parsers use to decide what an expression token is
//! allowed to execute.
//!
//! [`Evaluator`] is the sole entry point consumed by trigger-expression
//! evaluation and macro expansion: dispatch-time rejections
//! (`UnsupportedFunction`, `InvalidValueType`, `InvalidParameterCount`)
//! happen before any sample data is fetched.

use std::collections::HashMap;
use std::sync::Arc;

use lazy_static::lazy_static;
use tracing::debug;

use crate::config::EvalConfig;
use crate::error::{Error, Result};
use crate::functions::aggregate::{self, Extremum};
use crate::functions::rate::{self, Gradient};
use crate::functions::{counting, curvefit, log, misc, stats, stl, trend, EvalContext, Handler};
use crate::params::ParamList;
use crate::source::{TrendSource, ValueSource};
use crate::types::{EvalItem, EvalValue, Timestamp, ValueType};

const ALL_TYPES: &[ValueType] = &[
    ValueType::Float,
    ValueType::Uint,
    ValueType::Str,
    ValueType::Text,
    ValueType::Log,
];
const NUMERIC: &[ValueType] = &[ValueType::Float, ValueType::Uint];
const UINT_ONLY: &[ValueType] = &[ValueType::Uint];
const LOG_ONLY: &[ValueType] = &[ValueType::Log];

/// One dispatch table entry
struct FunctionDef {
    /// Value types the function applies to
    types: &'static [ValueType],
    /// Inclusive parameter-count bounds
    params: (usize, usize),
    /// Implementation
    handler: Handler,
}

fn eval_min(cx: &EvalContext, i: &EvalItem, p: &ParamList, t: Timestamp) -> Result<EvalValue> {
    aggregate::min_or_max(cx, i, p, t, Extremum::Min)
}

fn eval_max(cx: &EvalContext, i: &EvalItem, p: &ParamList, t: Timestamp) -> Result<EvalValue> {
    aggregate::min_or_max(cx, i, p, t, Extremum::Max)
}

fn eval_monoinc(cx: &EvalContext, i: &EvalItem, p: &ParamList, t: Timestamp) -> Result<EvalValue> {
    rate::mono(cx, i, p, t, Gradient::Inc)
}

fn eval_monodec(cx: &EvalContext, i: &EvalItem, p: &ParamList, t: Timestamp) -> Result<EvalValue> {
    rate::mono(cx, i, p, t, Gradient::Dec)
}

lazy_static! {
    static ref FUNCTION_TABLE: HashMap<&'static str, FunctionDef> = {
        let entries: Vec<(&'static str, &'static [ValueType], (usize, usize), Handler)> = vec![
            ("last", ALL_TYPES, (0, 1), aggregate::last),
            ("first", ALL_TYPES, (1, 1), aggregate::first),
            ("min", NUMERIC, (1, 1), eval_min),
            ("max", NUMERIC, (1, 1), eval_max),
            ("avg", NUMERIC, (1, 1), aggregate::avg),
            ("sum", NUMERIC, (1, 1), aggregate::sum),
            ("percentile", NUMERIC, (2, 2), aggregate::percentile),
            ("change", ALL_TYPES, (0, 0), aggregate::change),
            ("abschange", ALL_TYPES, (0, 0), aggregate::abschange),
            ("count", ALL_TYPES, (1, 3), counting::count),
            ("countunique", ALL_TYPES, (1, 3), counting::countunique),
            ("find", ALL_TYPES, (1, 3), counting::find),
            ("nodata", ALL_TYPES, (1, 2), misc::nodata),
            ("fuzzytime", NUMERIC, (1, 1), misc::fuzzytime),
            ("bitand", UINT_ONLY, (2, 2), misc::bitand),
            ("logeventid", LOG_ONLY, (0, 2), log::logeventid),
            ("logsource", LOG_ONLY, (0, 2), log::logsource),
            ("logseverity", LOG_ONLY, (0, 1), log::logseverity),
            ("forecast", NUMERIC, (2, 4), curvefit::forecast),
            ("timeleft", NUMERIC, (2, 3), curvefit::timeleft),
            ("rate", NUMERIC, (1, 1), rate::rate),
            ("changecount", ALL_TYPES, (1, 2), rate::changecount),
            ("monoinc", NUMERIC, (1, 2), eval_monoinc),
            ("monodec", NUMERIC, (1, 2), eval_monodec),
            ("trendavg", NUMERIC, (1, 1), trend::trendavg),
            ("trendmin", NUMERIC, (1, 1), trend::trendmin),
            ("trendmax", NUMERIC, (1, 1), trend::trendmax),
            ("trendsum", NUMERIC, (1, 1), trend::trendsum),
            ("trendcount", NUMERIC, (1, 1), trend::trendcount),
            ("trendstl", NUMERIC, (3, 6), stl::trendstl),
            ("baselinewma", NUMERIC, (3, 3), trend::baselinewma),
            ("baselinedev", NUMERIC, (3, 3), trend::baselinedev),
            ("kurtosis", NUMERIC, (1, 1), stats::kurtosis),
            ("mad", NUMERIC, (1, 1), stats::mad),
            ("skewness", NUMERIC, (1, 1), stats::skewness),
            ("stddevpop", NUMERIC, (1, 1), stats::stddevpop),
            ("stddevsamp", NUMERIC, (1, 1), stats::stddevsamp),
            ("sumofsquares", NUMERIC, (1, 1), stats::sumofsquares),
            ("varpop", NUMERIC, (1, 1), stats::varpop),
            ("varsamp", NUMERIC, (1, 1), stats::varsamp),
        ];

        entries
            .into_iter()
            .map(|(name, types, params, handler)| {
                (
                    name,
                    FunctionDef {
                        types,
                        params,
                        handler,
                    },
                )
            })
            .collect()
    };
}

/// Expression-level function names reserved by the surrounding trigger
/// language (math and string operators evaluated elsewhere); the whitelist
/// recognizes them so parsers can tell function-call syntax from other
/// tokens without invoking evaluation.
const EXPRESSION_FUNCTIONS: &[&str] = &[
    "abs", "acos", "ascii", "asin", "atan", "atan2", "between", "bitlength", "bitlshift",
    "bitnot", "bitor", "bitrshift", "bitxor", "bytelength", "cbrt", "ceil", "char", "concat",
    "cos", "cosh", "cot", "degrees", "e", "exp", "expm1", "floor", "in", "insert", "jsonpath",
    "lcase", "left", "log", "log10", "ltrim", "mid", "mod", "pi", "power", "radians", "rand",
    "repeat", "replace", "right", "round", "rtrim", "signum", "sin", "sinh", "sqrt", "tan",
    "trim", "truncate", "xmlxpath",
];

/// Whether `name` is a known trigger function (history-backed or
/// expression-level). Exact match only.
pub fn is_known_function(name: &str) -> bool {
    FUNCTION_TABLE.contains_key(name) || EXPRESSION_FUNCTIONS.contains(&name)
}

/// The analytic function evaluator
///
/// Holds the source seams and configuration; every evaluation is a pure,
/// synchronous, re-entrant computation with no state outside the call, so
/// one `Evaluator` may be shared freely across threads.
///
/// # Example
///
/// ```rust
/// use std::sync::Arc;
/// use histeval::{Evaluator, EvalItem, EvalValue, Timestamp, ValueType};
/// use histeval::source::{MemoryTrendSource, MemoryValueSource};
/// use histeval::types::{HistoryValue, Sample};
///
/// let mut values = MemoryValueSource::new();
/// values.add_samples(7, vec![
///     Sample::new(Timestamp::from_sec(100), HistoryValue::Float(41.0)),
///     Sample::new(Timestamp::from_sec(200), HistoryValue::Float(42.0)),
/// ]);
///
/// let evaluator = Evaluator::new(Arc::new(values), Arc::new(MemoryTrendSource::new()));
/// let item = EvalItem::new(7, ValueType::Float);
///
/// let result = evaluator
///     .evaluate("last", "", &item, Timestamp::from_sec(300))
///     .unwrap();
/// assert_eq!(result, EvalValue::Float(42.0));
/// ```
pub struct Evaluator {
    values: Arc<dyn ValueSource>,
    trends: Arc<dyn TrendSource>,
    config: EvalConfig,
}

impl Evaluator {
    /// Create an evaluator with default configuration
    pub fn new(values: Arc<dyn ValueSource>, trends: Arc<dyn TrendSource>) -> Self {
        Self {
            values,
            trends,
            config: EvalConfig::default(),
        }
    }

    /// Create an evaluator with explicit configuration
    pub fn with_config(
        values: Arc<dyn ValueSource>,
        trends: Arc<dyn TrendSource>,
        config: EvalConfig,
    ) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            values,
            trends,
            config,
        })
    }

    /// Evaluate `function(parameters)` for an item at the anchor time
    ///
    /// The call either fully succeeds with one typed value or fully fails;
    /// no partial results are ever surfaced.
    pub fn evaluate(
        &self,
        function: &str,
        parameters: &str,
        item: &EvalItem,
        anchor: Timestamp,
    ) -> Result<EvalValue> {
        debug!(
            host = %item.host,
            key = %item.key,
            function,
            parameters,
            anchor = anchor.sec,
            "evaluating function"
        );

        let def = FUNCTION_TABLE
            .get(function)
            .ok_or_else(|| Error::UnsupportedFunction(function.to_string()))?;

        if !def.types.contains(&item.value_type) {
            return Err(Error::InvalidValueType);
        }

        let params = ParamList::parse(parameters)?;

        let (min_params, max_params) = def.params;
        if params.len() < min_params || params.len() > max_params {
            return Err(Error::InvalidParameterCount);
        }

        let cx = EvalContext {
            values: self.values.as_ref(),
            trends: self.trends.as_ref(),
            config: &self.config,
        };

        let result = (def.handler)(&cx, item, &params, anchor);

        match &result {
            Ok(value) => debug!(function, %value, "evaluation succeeded"),
            Err(error) => debug!(function, %error, "evaluation failed"),
        }

        result
    }
}
