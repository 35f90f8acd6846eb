//! Evaluator configuration
//!
//! Tunables for the evaluation engine with TOML support and sensible
//! defaults. Every knob is optional in the file:
//!
//! ```toml
//! count_limit = 100000
//! stl_deviations_default = 3.0
//! stl_season_window_default = 0
//! max_polynomial_degree = 6
//! ```

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Evaluation engine configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct EvalConfig {
    /// Upper bound on matches counted by `count`/`countunique`; counting
    /// stops once the bound is reached (`find` always stops at one)
    #[serde(default = "default_count_limit")]
    pub count_limit: usize,

    /// `trendstl` deviations threshold when the parameter is omitted
    #[serde(default = "default_stl_deviations")]
    pub stl_deviations_default: f64,

    /// `trendstl` seasonal smoothing window when the parameter is omitted;
    /// 0 means periodic (each seasonal phase smoothed to its mean)
    #[serde(default)]
    pub stl_season_window_default: u64,

    /// Highest degree accepted by `polynomialN` fits
    #[serde(default = "default_max_polynomial_degree")]
    pub max_polynomial_degree: u8,
}

fn default_count_limit() -> usize {
    i32::MAX as usize
}

fn default_stl_deviations() -> f64 {
    3.0
}

fn default_max_polynomial_degree() -> u8 {
    6
}

impl Default for EvalConfig {
    fn default() -> Self {
        Self {
            count_limit: default_count_limit(),
            stl_deviations_default: default_stl_deviations(),
            stl_season_window_default: 0,
            max_polynomial_degree: default_max_polynomial_degree(),
        }
    }
}

impl EvalConfig {
    /// Load configuration from a TOML string
    pub fn from_toml_str(contents: &str) -> Result<Self> {
        let config: EvalConfig = toml::from_str(contents)
            .map_err(|e| Error::Configuration(format!("cannot parse configuration: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Check value ranges
    pub fn validate(&self) -> Result<()> {
        if self.count_limit == 0 {
            return Err(Error::Configuration(
                "count_limit must be greater than 0".to_string(),
            ));
        }

        if !self.stl_deviations_default.is_finite() || self.stl_deviations_default <= 0.0 {
            return Err(Error::Configuration(
                "stl_deviations_default must be a positive number".to_string(),
            ));
        }

        if self.max_polynomial_degree < 1 || self.max_polynomial_degree > 6 {
            return Err(Error::Configuration(
                "max_polynomial_degree must be between 1 and 6".to_string(),
            ));
        }

        Ok(())
    }
}
