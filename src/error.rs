//! Error types for the evaluator
//!
//! Every public operation returns [`Result`]. Errors carry plain descriptive
//! text intended for operator-facing display (e.g. surfaced next to a
//! misconfigured trigger); callers must not coerce a failed evaluation into a
//! default value.

use thiserror::Error;

/// Main error type for function evaluation
#[derive(Error, Debug)]
pub enum Error {
    /// A parameter could not be parsed into its expected shape
    /// (duration, count, float, quoted string, time-shift expression)
    #[error("invalid parameter: {0}")]
    InvalidSyntax(String),

    /// The raw parameter count is outside the function's bounds
    #[error("invalid number of parameters")]
    InvalidParameterCount,

    /// The function name is not in the dispatch table
    #[error("function is not supported: {0}")]
    UnsupportedFunction(String),

    /// The metric's value type is not in the function's applicable set
    #[error("invalid value type")]
    InvalidValueType,

    /// The resolved window produced fewer samples than the function requires
    #[error("not enough data")]
    NotEnoughData,

    /// The external value or trend store failed or could not be reached
    #[error("cannot get values from value source: {0}")]
    SourceUnavailable(String),

    /// A model could not be computed (degenerate fit input, zero variance,
    /// seasonal decomposition on too little data)
    #[error("cannot build model: {0}")]
    Model(String),

    /// Invalid evaluator configuration
    #[error("invalid configuration: {0}")]
    Configuration(String),
}

impl Error {
    /// Shorthand for an [`Error::InvalidSyntax`] referring to the Nth
    /// function parameter (1-based, as operators see them)
    pub(crate) fn bad_param(index: usize) -> Self {
        Error::InvalidSyntax(format!("invalid parameter #{}", index))
    }
}

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = Error::InvalidSyntax("unexpected suffix \"q\"".to_string());
        assert!(err.to_string().contains("unexpected suffix"));

        let err = Error::UnsupportedFunction("frobnicate".to_string());
        assert!(err.to_string().contains("frobnicate"));

        assert_eq!(Error::NotEnoughData.to_string(), "not enough data");
    }
}
