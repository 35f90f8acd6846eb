//! Log-record field functions
//!
//! `logeventid`, `logsource` and `logseverity` read the Nth most recent log
//! record (via the `last`-style first parameter) and match or report its
//! metadata fields. Only log-typed metrics reach these handlers.

use regex::Regex;

use super::{last_n_value, EvalContext};
use crate::error::{Error, Result};
use crate::params::resolver::resolve_string;
use crate::params::ParamList;
use crate::types::{EvalItem, EvalValue, LogRecord, Timestamp};

/// Fetch the target log record and the optional pattern parameter
fn log_record_and_pattern(
    cx: &EvalContext,
    item: &EvalItem,
    params: &ParamList,
    anchor: Timestamp,
) -> Result<(LogRecord, Option<Regex>)> {
    let pattern = if params.len() >= 2 {
        let text = resolve_string(params, 1)?;
        if text.starts_with('@') {
            return Err(Error::InvalidSyntax(
                "global regular expressions are not supported".to_string(),
            ));
        }
        Some(Regex::new(&text).map_err(|_| {
            Error::InvalidSyntax(format!("invalid regular expression \"{}\"", text))
        })?)
    } else {
        None
    };

    let sample = last_n_value(cx, item, params, 0, anchor)?;
    let record = sample.value.as_log().ok_or(Error::InvalidValueType)?.clone();

    Ok((record, pattern))
}

fn match_result(pattern: Option<&Regex>, text: &str) -> EvalValue {
    let matched = pattern.map_or(true, |re| re.is_match(text));
    EvalValue::Float(if matched { 1.0 } else { 0.0 })
}

/// `logeventid(range?, pattern?)` — 1 when the record's event id matches
pub(crate) fn logeventid(
    cx: &EvalContext,
    item: &EvalItem,
    params: &ParamList,
    anchor: Timestamp,
) -> Result<EvalValue> {
    let (record, pattern) = log_record_and_pattern(cx, item, params, anchor)?;
    Ok(match_result(
        pattern.as_ref(),
        &record.event_id.to_string(),
    ))
}

/// `logsource(range?, pattern?)` — 1 when the record's source matches
pub(crate) fn logsource(
    cx: &EvalContext,
    item: &EvalItem,
    params: &ParamList,
    anchor: Timestamp,
) -> Result<EvalValue> {
    let (record, pattern) = log_record_and_pattern(cx, item, params, anchor)?;
    Ok(match_result(
        pattern.as_ref(),
        record.source.as_deref().unwrap_or(""),
    ))
}

/// `logseverity(range?)` — severity of the record
pub(crate) fn logseverity(
    cx: &EvalContext,
    item: &EvalItem,
    params: &ParamList,
    anchor: Timestamp,
) -> Result<EvalValue> {
    let sample = last_n_value(cx, item, params, 0, anchor)?;
    let record = sample.value.as_log().ok_or(Error::InvalidValueType)?;
    Ok(EvalValue::Float(record.severity as f64))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EvalConfig;
    use crate::source::{MemoryTrendSource, MemoryValueSource};
    use crate::types::{HistoryValue, Sample, ValueType};

    fn log_source() -> MemoryValueSource {
        let mut source = MemoryValueSource::new();
        source.add_samples(
            1,
            vec![
                Sample::new(
                    Timestamp::from_sec(100),
                    HistoryValue::Log(LogRecord {
                        value: "service started".into(),
                        source: Some("systemd".into()),
                        severity: 2,
                        event_id: 1000,
                        log_time: 100,
                    }),
                ),
                Sample::new(
                    Timestamp::from_sec(200),
                    HistoryValue::Log(LogRecord {
                        value: "disk failure".into(),
                        source: Some("kernel".into()),
                        severity: 4,
                        event_id: 4242,
                        log_time: 200,
                    }),
                ),
            ],
        );
        source
    }

    fn run(handler: super::super::Handler, raw_params: &str) -> Result<EvalValue> {
        let source = log_source();
        let trends = MemoryTrendSource::new();
        let config = EvalConfig::default();
        let cx = EvalContext {
            values: &source,
            trends: &trends,
            config: &config,
        };
        let item = EvalItem::new(1, ValueType::Log);
        let params = ParamList::parse(raw_params).unwrap();
        handler(&cx, &item, &params, Timestamp::from_sec(300))
    }

    #[test]
    fn test_logseverity_of_nth_record() {
        assert_eq!(run(logseverity, "").unwrap(), EvalValue::Float(4.0));
        assert_eq!(run(logseverity, "#2").unwrap(), EvalValue::Float(2.0));
        assert!(matches!(run(logseverity, "#3"), Err(Error::NotEnoughData)));
    }

    #[test]
    fn test_logeventid_pattern() {
        assert_eq!(run(logeventid, "#1,^42").unwrap(), EvalValue::Float(1.0));
        assert_eq!(run(logeventid, "#1,^10").unwrap(), EvalValue::Float(0.0));
        // no pattern matches everything
        assert_eq!(run(logeventid, "#1").unwrap(), EvalValue::Float(1.0));
    }

    #[test]
    fn test_logsource_pattern() {
        assert_eq!(run(logsource, "#1,kernel").unwrap(), EvalValue::Float(1.0));
        assert_eq!(run(logsource, "#2,kernel").unwrap(), EvalValue::Float(0.0));
        assert!(run(logsource, "#1,@global").is_err());
        assert!(run(logsource, "#1,(").is_err());
    }
}
