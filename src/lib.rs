//! scanband - column artifact correction for scanned images
//!
//! Removes vertical banding caused by scanner sensor drift from
//! single-channel images.
//!
//! # Modules
//!
//! - [`correction`] - band smoothing and per-column gamma equalization
//! - [`filters`] - optional pre/post filter stages
//! - [`rotation`] - rotation estimate and deskew
//! - [`pipeline`] - stage sequencing for images and directories
//! - [`config`] - TOML configuration and CLI overrides
//! - [`cli`] - command-line definitions

pub mod cli;
pub mod config;
pub mod correction;
pub mod filters;
pub mod pipeline;
pub mod rotation;

// CLI
pub use cli::{exit_codes, Cli, Commands, ConfigArgs, PaddingArg, ProcessArgs};

// Config
pub use config::{CliOverrides, Config, ConfigError};

// Correction
pub use correction::{
    equalize_columns, smooth_bands, BandSmoothOptions, BandSmoother, BoundaryPadding,
    ColumnCorrection, CorrectionError, GammaCandidates, GammaEqualizeOptions, GammaEqualizer,
};

// Filters and rotation
pub use filters::{mask_combine, FilterStage};
pub use rotation::{deskew, detect_rotation_angle, rotate_expanded, RotationOptions};

// Pipeline
pub use pipeline::{
    BatchReport, ImageReport, Pipeline, PipelineConfig, PipelineError, ProgressCallback,
    SilentProgress,
};
