//! Common types for the correction module

use serde::{Deserialize, Serialize};
use thiserror::Error;

// ============================================================
// Constants
// ============================================================

/// Default moving-average window for band smoothing
pub const DEFAULT_BAND_WINDOW: usize = 7;

/// Default number of band smoothing passes
pub const DEFAULT_BAND_PASSES: usize = 2;

/// Default neighbor half-width for the gamma reference column
pub const DEFAULT_NEIGHBOR_RADIUS: usize = 3;

/// Default lower gamma bound
pub const DEFAULT_GAMMA_MIN: f64 = 0.5;

/// Default upper gamma bound
pub const DEFAULT_GAMMA_MAX: f64 = 2.0;

/// Default number of gamma candidates
pub const DEFAULT_GAMMA_STEPS: usize = 20;

/// Lowest display value
pub const DISPLAY_MIN: u8 = 0;

/// Highest display value
pub const DISPLAY_MAX: u8 = 255;

// ============================================================
// Error Types
// ============================================================

/// Correction error types
#[derive(Debug, Error, Clone, PartialEq)]
pub enum CorrectionError {
    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),
}

pub type Result<T> = std::result::Result<T, CorrectionError>;

// ============================================================
// Band Smoothing Options
// ============================================================

/// How the moving average treats columns beyond the image edges
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BoundaryPadding {
    /// Missing samples count as zero (biases the edges low)
    #[default]
    Zero,

    /// Missing samples repeat the nearest edge column
    Replicate,

    /// Missing samples mirror the profile, edge sample repeated (`ba|abcd|dc`),
    /// numpy's `symmetric`
    Symmetric,

    /// Missing samples mirror the profile about the edge sample (`cb|abcd|cb`),
    /// numpy's `reflect` and OpenCV's `BORDER_REFLECT_101`
    Reflect,
}

/// Options for band smoothing
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BandSmoothOptions {
    /// Moving-average window width in columns
    pub window: usize,

    /// Number of consecutive passes
    pub passes: usize,

    /// Edge policy for the moving average
    pub padding: BoundaryPadding,
}

impl Default for BandSmoothOptions {
    fn default() -> Self {
        Self {
            window: DEFAULT_BAND_WINDOW,
            passes: DEFAULT_BAND_PASSES,
            padding: BoundaryPadding::Zero,
        }
    }
}

impl BandSmoothOptions {
    /// Create a builder
    pub fn builder() -> BandSmoothOptionsBuilder {
        BandSmoothOptionsBuilder::default()
    }

    /// Single pass, otherwise default
    pub fn single_pass() -> Self {
        Self {
            passes: 1,
            ..Default::default()
        }
    }

    /// Validate against an image width
    pub fn validate(&self, width: usize) -> Result<()> {
        validate_window(self.window, width)?;
        if self.passes == 0 {
            return Err(CorrectionError::InvalidParameter(
                "band smoothing passes must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

/// Builder for BandSmoothOptions
#[derive(Debug, Default)]
pub struct BandSmoothOptionsBuilder {
    options: BandSmoothOptions,
}

impl BandSmoothOptionsBuilder {
    /// Set window
    #[must_use]
    pub fn window(mut self, window: usize) -> Self {
        self.options.window = window;
        self
    }

    /// Set passes
    #[must_use]
    pub fn passes(mut self, passes: usize) -> Self {
        self.options.passes = passes;
        self
    }

    /// Set boundary padding
    #[must_use]
    pub fn padding(mut self, padding: BoundaryPadding) -> Self {
        self.options.padding = padding;
        self
    }

    /// Build the options
    #[must_use]
    pub fn build(self) -> BandSmoothOptions {
        self.options
    }
}

pub(crate) fn validate_window(window: usize, width: usize) -> Result<()> {
    if window == 0 || window > width {
        return Err(CorrectionError::InvalidParameter(format!(
            "window must be in 1..={}, got {}",
            width, window
        )));
    }
    Ok(())
}

// ============================================================
// Gamma Equalization Options
// ============================================================

/// Options for per-column gamma equalization
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GammaEqualizeOptions {
    /// Neighbor half-width used for the reference column
    pub neighbor_radius: usize,

    /// Smallest gamma candidate
    pub gamma_min: f64,

    /// Largest gamma candidate
    pub gamma_max: f64,

    /// Number of evenly spaced candidates
    pub steps: usize,
}

impl Default for GammaEqualizeOptions {
    fn default() -> Self {
        Self {
            neighbor_radius: DEFAULT_NEIGHBOR_RADIUS,
            gamma_min: DEFAULT_GAMMA_MIN,
            gamma_max: DEFAULT_GAMMA_MAX,
            steps: DEFAULT_GAMMA_STEPS,
        }
    }
}

impl GammaEqualizeOptions {
    /// Create a builder
    pub fn builder() -> GammaEqualizeOptionsBuilder {
        GammaEqualizeOptionsBuilder::default()
    }

    /// Gamma range as a tuple
    pub fn gamma_range(&self) -> (f64, f64) {
        (self.gamma_min, self.gamma_max)
    }

    /// Check the gamma grid parameters
    pub fn validate(&self) -> Result<()> {
        validate_gamma_grid(self.gamma_min, self.gamma_max, self.steps)
    }
}

/// Builder for GammaEqualizeOptions
#[derive(Debug, Default)]
pub struct GammaEqualizeOptionsBuilder {
    options: GammaEqualizeOptions,
}

impl GammaEqualizeOptionsBuilder {
    /// Set neighbor radius
    #[must_use]
    pub fn neighbor_radius(mut self, radius: usize) -> Self {
        self.options.neighbor_radius = radius;
        self
    }

    /// Set gamma range
    #[must_use]
    pub fn gamma_range(mut self, min: f64, max: f64) -> Self {
        self.options.gamma_min = min;
        self.options.gamma_max = max;
        self
    }

    /// Set number of candidates
    #[must_use]
    pub fn steps(mut self, steps: usize) -> Self {
        self.options.steps = steps;
        self
    }

    /// Build the options
    #[must_use]
    pub fn build(self) -> GammaEqualizeOptions {
        self.options
    }
}

pub(crate) fn validate_gamma_grid(gamma_min: f64, gamma_max: f64, steps: usize) -> Result<()> {
    if !gamma_min.is_finite() || !gamma_max.is_finite() {
        return Err(CorrectionError::InvalidParameter(format!(
            "gamma range must be finite, got ({}, {})",
            gamma_min, gamma_max
        )));
    }
    if gamma_min <= 0.0 {
        return Err(CorrectionError::InvalidParameter(format!(
            "gamma_min must be positive, got {}",
            gamma_min
        )));
    }
    if gamma_min > gamma_max {
        return Err(CorrectionError::InvalidParameter(format!(
            "gamma_min ({}) exceeds gamma_max ({})",
            gamma_min, gamma_max
        )));
    }
    if steps == 0 {
        return Err(CorrectionError::InvalidParameter(
            "gamma steps must be at least 1".to_string(),
        ));
    }
    Ok(())
}
