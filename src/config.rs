//! Configuration file support
//!
//! Settings are read from `scanband.toml` in the current directory, or
//! from `<config_dir>/scanband/config.toml`. Command-line flags override
//! file values.
//!
//! ```toml
//! [band]
//! enabled = true
//! window = 7
//! passes = 2
//! padding = "zero"
//!
//! [gamma]
//! enabled = false
//! neighbor_radius = 3
//! gamma_min = 0.5
//! gamma_max = 2.0
//! steps = 20
//!
//! [rotation]
//! enabled = false
//!
//! [pipeline]
//! threads = 4
//! ```

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::correction::{
    BandSmoothOptions, BoundaryPadding, GammaEqualizeOptions, DEFAULT_BAND_PASSES,
    DEFAULT_BAND_WINDOW, DEFAULT_GAMMA_MAX, DEFAULT_GAMMA_MIN, DEFAULT_GAMMA_STEPS,
    DEFAULT_NEIGHBOR_RADIUS,
};
use crate::filters::FilterStage;
use crate::pipeline::PipelineConfig;
use crate::rotation::RotationOptions;

/// Local config file name
pub const LOCAL_CONFIG_FILE: &str = "scanband.toml";

/// Application directory under the user config dir
const APP_CONFIG_DIR: &str = "scanband";

/// Config file name inside the application directory
const USER_CONFIG_FILE: &str = "config.toml";

// ============================================================
// Error Types
// ============================================================

/// Configuration error types
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Invalid config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Failed to serialize config: {0}")]
    Serialize(#[from] toml::ser::Error),
}

pub type Result<T> = std::result::Result<T, ConfigError>;

// ============================================================
// Sections
// ============================================================

/// `[band]` section
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BandSection {
    pub enabled: bool,
    pub window: usize,
    pub passes: usize,
    pub padding: BoundaryPadding,
}

impl Default for BandSection {
    fn default() -> Self {
        Self {
            enabled: true,
            window: DEFAULT_BAND_WINDOW,
            passes: DEFAULT_BAND_PASSES,
            padding: BoundaryPadding::Zero,
        }
    }
}

/// `[gamma]` section
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GammaSection {
    pub enabled: bool,
    pub neighbor_radius: usize,
    pub gamma_min: f64,
    pub gamma_max: f64,
    pub steps: usize,
}

impl Default for GammaSection {
    fn default() -> Self {
        Self {
            enabled: false,
            neighbor_radius: DEFAULT_NEIGHBOR_RADIUS,
            gamma_min: DEFAULT_GAMMA_MIN,
            gamma_max: DEFAULT_GAMMA_MAX,
            steps: DEFAULT_GAMMA_STEPS,
        }
    }
}

/// `[rotation]` section
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RotationSection {
    pub enabled: bool,
    pub canny_low: f32,
    pub canny_high: f32,
    pub vote_threshold: u32,
}

impl Default for RotationSection {
    fn default() -> Self {
        let defaults = RotationOptions::default();
        Self {
            enabled: false,
            canny_low: defaults.canny_low,
            canny_high: defaults.canny_high,
            vote_threshold: defaults.vote_threshold,
        }
    }
}

/// `[pipeline]` section
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineSection {
    pub threads: Option<usize>,
    pub pre_filters: Vec<FilterStage>,
    pub post_filters: Vec<FilterStage>,
}

// ============================================================
// Config
// ============================================================

/// Configuration file contents
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub band: BandSection,
    pub gamma: GammaSection,
    pub rotation: RotationSection,
    pub pipeline: PipelineSection,
}

/// Values explicitly set on the command line
#[derive(Debug, Clone, Default)]
pub struct CliOverrides {
    pub band: Option<bool>,
    pub window: Option<usize>,
    pub passes: Option<usize>,
    pub padding: Option<BoundaryPadding>,
    pub gamma: Option<bool>,
    pub neighbor_radius: Option<usize>,
    pub gamma_min: Option<f64>,
    pub gamma_max: Option<f64>,
    pub gamma_steps: Option<usize>,
    pub deskew: Option<bool>,
    pub threads: Option<usize>,
}

impl CliOverrides {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Config {
    /// Load from the first config file found, or defaults if none exists
    pub fn load() -> Result<Self> {
        match Self::search_paths().into_iter().find(|p| p.is_file()) {
            Some(path) => Self::load_from_path(&path),
            None => Ok(Self::default()),
        }
    }

    /// Load from a specific file
    pub fn load_from_path(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml(&content)
    }

    /// Parse TOML text
    pub fn from_toml(content: &str) -> Result<Self> {
        Ok(toml::from_str(content)?)
    }

    /// Render as TOML text
    pub fn to_toml(&self) -> Result<String> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Candidate config files, in priority order
    pub fn search_paths() -> Vec<PathBuf> {
        let mut paths = vec![PathBuf::from(LOCAL_CONFIG_FILE)];
        if let Some(config_dir) = dirs::config_dir() {
            paths.push(config_dir.join(APP_CONFIG_DIR).join(USER_CONFIG_FILE));
        }
        paths
    }

    /// Combine with command-line overrides (CLI wins)
    pub fn merge_with_cli(&self, cli: &CliOverrides) -> PipelineConfig {
        let band = cli.band.unwrap_or(self.band.enabled).then(|| BandSmoothOptions {
            window: cli.window.unwrap_or(self.band.window),
            passes: cli.passes.unwrap_or(self.band.passes),
            padding: cli.padding.unwrap_or(self.band.padding),
        });

        let gamma = cli.gamma.unwrap_or(self.gamma.enabled).then(|| GammaEqualizeOptions {
            neighbor_radius: cli.neighbor_radius.unwrap_or(self.gamma.neighbor_radius),
            gamma_min: cli.gamma_min.unwrap_or(self.gamma.gamma_min),
            gamma_max: cli.gamma_max.unwrap_or(self.gamma.gamma_max),
            steps: cli.gamma_steps.unwrap_or(self.gamma.steps),
        });

        let deskew = cli
            .deskew
            .unwrap_or(self.rotation.enabled)
            .then(|| RotationOptions {
                canny_low: self.rotation.canny_low,
                canny_high: self.rotation.canny_high,
                vote_threshold: self.rotation.vote_threshold,
                ..Default::default()
            });

        PipelineConfig {
            pre_filters: self.pipeline.pre_filters.clone(),
            deskew,
            band,
            gamma,
            post_filters: self.pipeline.post_filters.clone(),
            threads: cli.threads.or(self.pipeline.threads),
        }
    }
}
