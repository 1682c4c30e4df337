//! Sync configuration
//!
//! Feature flags, the average-to-percentage scale and verification tolerance.
//! A [`SyncConfig`] value is passed explicitly to every operation; nothing in
//! the crate reads global state.

use crate::error::ConfigError;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Default verification tolerance in percentage points
pub const DEFAULT_TOLERANCE: f64 = 0.01;

/// Placeholder substituted into the comment template
pub const AVERAGE_PLACEHOLDER: &str = "{average}";

/// Mapping from outcome average to override percentage
///
/// Both variants are strictly monotonic once validated, hence injective.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum GradeScale {
    /// `multiplier * average + offset`
    Linear {
        /// Slope; must be non-zero
        multiplier: f64,
        /// Intercept
        #[serde(default)]
        offset: f64,
    },
    /// Piecewise-linear interpolation through `[average, percentage]` points
    Breakpoints {
        /// Strictly increasing in both coordinates
        points: Vec<[f64; 2]>,
    },
}

impl GradeScale {
    /// Linear scale without offset
    #[inline]
    #[must_use]
    pub fn linear(multiplier: f64) -> Self {
        Self::Linear {
            multiplier,
            offset: 0.0,
        }
    }

    /// Apply the scale
    #[must_use]
    pub fn apply(&self, average: f64) -> f64 {
        match self {
            Self::Linear { multiplier, offset } => multiplier * average + offset,
            Self::Breakpoints { points } => interpolate(points, average),
        }
    }

    /// Check the scale is injective
    pub fn validate(&self) -> Result<(), ConfigError> {
        match self {
            Self::Linear { multiplier, offset } => {
                if !multiplier.is_finite() || !offset.is_finite() {
                    return Err(ConfigError::Invalid("linear scale must be finite".into()));
                }
                if *multiplier == 0.0 {
                    return Err(ConfigError::Invalid(
                        "linear scale multiplier must be non-zero".into(),
                    ));
                }
                Ok(())
            }
            Self::Breakpoints { points } => {
                if points.len() < 2 {
                    return Err(ConfigError::Invalid(
                        "breakpoint scale needs at least two points".into(),
                    ));
                }
                for pair in points.windows(2) {
                    let ([x0, y0], [x1, y1]) = (pair[0], pair[1]);
                    if !(x1 > x0 && y1 > y0) {
                        return Err(ConfigError::Invalid(format!(
                            "breakpoints must be strictly increasing: [{x0}, {y0}] -> [{x1}, {y1}]"
                        )));
                    }
                }
                Ok(())
            }
        }
    }
}

impl Default for GradeScale {
    fn default() -> Self {
        // 0-4 mastery scale onto 0-100
        Self::linear(25.0)
    }
}

fn interpolate(points: &[[f64; 2]], x: f64) -> f64 {
    if points.len() < 2 {
        return points.first().map_or(x, |p| p[1]);
    }
    let upper = points
        .iter()
        .position(|p| x <= p[0])
        .unwrap_or(points.len() - 1)
        .max(1);
    let ([x0, y0], [x1, y1]) = (points[upper - 1], points[upper]);
    y0 + (x - x0) * (y1 - y0) / (x1 - x0)
}

/// Sync configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Write the computed average back to the reference outcome
    pub update_outcomes: bool,
    /// Manage final grade overrides
    pub update_overrides: bool,
    /// Tag submissions and overrides with custom grade statuses
    pub custom_grade_status: bool,
    /// Custom status used for insufficient evidence
    pub ie_status_id: Option<String>,
    /// Outcomes whose title contains any of these (case-insensitive) are ignored
    pub excluded_keywords: Vec<String>,
    /// Outcome holding the computed average
    pub reference_outcome_id: String,
    /// Average to override percentage
    pub scale: GradeScale,
    /// Verification tolerance in percentage points
    pub tolerance: f64,
    /// Comment posted with each SCORE update
    pub comment_template: String,
    /// Mutations in flight at once during a pass
    pub max_concurrent_updates: usize,
}

impl SyncConfig {
    /// Create default configuration
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse and validate TOML
    pub fn from_toml_str(input: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(input)?;
        config.validate()?;
        Ok(config)
    }

    /// Load and validate a TOML file
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path)?;
        Self::from_toml_str(&raw)
    }

    /// Check cross-field constraints
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.scale.validate()?;
        if !(self.tolerance.is_finite() && self.tolerance >= 0.0) {
            return Err(ConfigError::Invalid(format!(
                "tolerance must be a non-negative number, got {}",
                self.tolerance
            )));
        }
        if self.max_concurrent_updates == 0 {
            return Err(ConfigError::Invalid(
                "max_concurrent_updates must be at least 1".into(),
            ));
        }
        if self.custom_grade_status && self.ie_status_id.is_none() {
            return Err(ConfigError::Invalid(
                "ie_status_id is required when custom_grade_status is enabled".into(),
            ));
        }
        Ok(())
    }

    /// With outcome channel toggled
    #[inline]
    #[must_use]
    pub fn with_outcome_updates(mut self, enabled: bool) -> Self {
        self.update_outcomes = enabled;
        self
    }

    /// With override channel toggled
    #[inline]
    #[must_use]
    pub fn with_override_updates(mut self, enabled: bool) -> Self {
        self.update_overrides = enabled;
        self
    }

    /// With custom grade status enabled using the given IE status
    #[inline]
    #[must_use]
    pub fn with_custom_grade_status(mut self, ie_status_id: impl Into<String>) -> Self {
        self.custom_grade_status = true;
        self.ie_status_id = Some(ie_status_id.into());
        self
    }

    /// With excluded title keywords
    #[inline]
    #[must_use]
    pub fn with_excluded_keywords<I, S>(mut self, keywords: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.excluded_keywords = keywords.into_iter().map(Into::into).collect();
        self
    }

    /// With reference outcome
    #[inline]
    #[must_use]
    pub fn with_reference_outcome(mut self, outcome_id: impl Into<String>) -> Self {
        self.reference_outcome_id = outcome_id.into();
        self
    }

    /// With scale
    #[inline]
    #[must_use]
    pub fn with_scale(mut self, scale: GradeScale) -> Self {
        self.scale = scale;
        self
    }

    /// With verification tolerance
    #[inline]
    #[must_use]
    pub fn with_tolerance(mut self, tolerance: f64) -> Self {
        self.tolerance = tolerance;
        self
    }

    /// With concurrency bound for a pass
    #[inline]
    #[must_use]
    pub fn with_max_concurrent_updates(mut self, max: usize) -> Self {
        self.max_concurrent_updates = max;
        self
    }

    /// Map an average to its override percentage
    #[inline]
    #[must_use]
    pub fn scale(&self, average: f64) -> f64 {
        self.scale.apply(average)
    }

    /// Lowercased keywords, empty entries dropped
    #[must_use]
    pub fn normalized_keywords(&self) -> Vec<String> {
        self.excluded_keywords
            .iter()
            .map(|k| k.trim().to_lowercase())
            .filter(|k| !k.is_empty())
            .collect()
    }

    /// Comment for a SCORE update
    #[must_use]
    pub fn render_comment(&self, average: f64) -> String {
        self.comment_template
            .replace(AVERAGE_PLACEHOLDER, &format!("{average:.2}"))
    }
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            update_outcomes: true,
            update_overrides: true,
            custom_grade_status: false,
            ie_status_id: None,
            excluded_keywords: Vec::new(),
            reference_outcome_id: String::new(),
            scale: GradeScale::default(),
            tolerance: DEFAULT_TOLERANCE,
            comment_template: format!("Outcome average: {AVERAGE_PLACEHOLDER}"),
            max_concurrent_updates: 1,
        }
    }
}
