//! Processing pipeline
//!
//! Sequences the optional filter stages, deskew, band smoothing and gamma
//! equalization over single images or whole directories.
//!
//! Stage order: pre filters, deskew, band smoothing, gamma equalization,
//! post filters. Disabled stages are skipped.

use image::{GrayImage, ImageFormat};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Instant;
use thiserror::Error;
use tracing::{debug, info, instrument, warn};

use crate::correction::{
    BandSmoothOptions, BandSmoother, CorrectionError, GammaEqualizeOptions, GammaEqualizer,
};
use crate::filters::{apply_all, FilterStage};
use crate::rotation::{deskew, RotationOptions};

// ============================================================
// Error Types
// ============================================================

/// Pipeline error types
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("Image not found: {0}")]
    ImageNotFound(PathBuf),

    #[error("Invalid image: {0}")]
    InvalidImage(String),

    #[error("No images found in: {0}")]
    NoImagesFound(PathBuf),

    #[error("Thread pool error: {0}")]
    ThreadPool(String),

    #[error(transparent)]
    Correction(#[from] CorrectionError),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, PipelineError>;

// ============================================================
// Configuration
// ============================================================

/// Effective pipeline configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Filters run before any correction
    pub pre_filters: Vec<FilterStage>,

    /// Deskew before correction (None disables)
    pub deskew: Option<RotationOptions>,

    /// Band smoothing (None disables)
    pub band: Option<BandSmoothOptions>,

    /// Gamma equalization (None disables)
    pub gamma: Option<GammaEqualizeOptions>,

    /// Filters run after correction
    pub post_filters: Vec<FilterStage>,

    /// Worker threads for batch processing (None = CPU count)
    pub threads: Option<usize>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            pre_filters: Vec::new(),
            deskew: None,
            band: Some(BandSmoothOptions::default()),
            gamma: None,
            post_filters: Vec::new(),
            threads: None,
        }
    }
}

impl PipelineConfig {
    /// Serialize to pretty JSON
    pub fn to_json(&self) -> String {
        serde_json::to_string_pretty(self).unwrap_or_default()
    }

    /// Number of stages that will run
    pub fn stage_count(&self) -> usize {
        self.pre_filters.len()
            + usize::from(self.deskew.is_some())
            + usize::from(self.band.is_some())
            + usize::from(self.gamma.is_some())
            + self.post_filters.len()
    }
}

// ============================================================
// Progress
// ============================================================

/// Progress callback for batch processing
pub trait ProgressCallback: Send + Sync {
    /// Called when a step starts
    fn on_step_start(&self, _step: &str) {}

    /// Called with item progress
    fn on_step_progress(&self, _current: usize, _total: usize) {}

    /// Called when a step completes
    fn on_step_complete(&self, _step: &str, _message: &str) {}

    /// Called with debug information
    fn on_debug(&self, _message: &str) {}
}

/// Progress callback that ignores everything
pub struct SilentProgress;

impl ProgressCallback for SilentProgress {}

// ============================================================
// Reports
// ============================================================

/// Result of processing one image file
#[derive(Debug, Clone, Serialize)]
pub struct ImageReport {
    pub input: PathBuf,
    pub output: PathBuf,
    pub width: u32,
    pub height: u32,
    /// Rotation removed by deskew, if enabled
    pub rotation_degrees: Option<f32>,
    pub elapsed_seconds: f64,
}

/// Result of processing a directory
#[derive(Debug, Clone, Default, Serialize)]
pub struct BatchReport {
    pub processed: Vec<ImageReport>,
    pub failed: Vec<(PathBuf, String)>,
    pub elapsed_seconds: f64,
}

impl BatchReport {
    pub fn ok_count(&self) -> usize {
        self.processed.len()
    }

    pub fn error_count(&self) -> usize {
        self.failed.len()
    }
}

// ============================================================
// Pipeline
// ============================================================

/// Column artifact correction pipeline
#[derive(Debug, Clone, Default)]
pub struct Pipeline {
    config: PipelineConfig,
}

impl Pipeline {
    /// Create a pipeline
    pub fn new(config: PipelineConfig) -> Self {
        Self { config }
    }

    /// Configuration in use
    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Run every enabled stage on an in-memory image
    pub fn process_image(&self, image: &GrayImage) -> Result<GrayImage> {
        self.run_stages(image).map(|(img, _)| img)
    }

    #[instrument(skip(self, image), fields(width = image.width(), height = image.height()))]
    fn run_stages(&self, image: &GrayImage) -> Result<(GrayImage, Option<f32>)> {
        let mut current = apply_all(&self.config.pre_filters, image)?;
        let mut rotation = None;

        if let Some(options) = &self.config.deskew {
            let (rotated, angle) = deskew(&current, options)?;
            current = rotated;
            rotation = Some(angle);
        }

        if let Some(options) = &self.config.band {
            let start = Instant::now();
            current = BandSmoother::new(options.clone()).apply(&current)?;
            debug!(elapsed_ms = start.elapsed().as_millis() as u64, "Band smoothing done");
        }

        if let Some(options) = &self.config.gamma {
            let start = Instant::now();
            current = GammaEqualizer::new(options.clone()).apply(&current)?;
            debug!(elapsed_ms = start.elapsed().as_millis() as u64, "Gamma equalization done");
        }

        current = apply_all(&self.config.post_filters, &current)?;
        Ok((current, rotation))
    }

    /// Decode `input` as 8-bit grayscale, process it, and write `output`
    ///
    /// The output format follows the output file extension.
    #[instrument(skip_all, fields(input = %input.display()))]
    pub fn process_file(&self, input: &Path, output: &Path) -> Result<ImageReport> {
        if !input.exists() {
            return Err(PipelineError::ImageNotFound(input.to_path_buf()));
        }

        let start = Instant::now();
        let gray = image::open(input)
            .map_err(|e| PipelineError::InvalidImage(e.to_string()))?
            .to_luma8();

        let (result, rotation_degrees) = self.run_stages(&gray)?;

        if let Some(parent) = output.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        result
            .save(output)
            .map_err(|e| PipelineError::InvalidImage(e.to_string()))?;

        let report = ImageReport {
            input: input.to_path_buf(),
            output: output.to_path_buf(),
            width: result.width(),
            height: result.height(),
            rotation_degrees,
            elapsed_seconds: start.elapsed().as_secs_f64(),
        };
        info!(
            output = %output.display(),
            elapsed = report.elapsed_seconds,
            "Image processed"
        );
        Ok(report)
    }

    /// Process every image in `input_dir`, writing results under the same
    /// file name in `output_dir`
    ///
    /// A failing image is recorded in the report and does not stop the batch.
    pub fn process_directory(
        &self,
        input_dir: &Path,
        output_dir: &Path,
        progress: &dyn ProgressCallback,
    ) -> Result<BatchReport> {
        let start = Instant::now();
        let images = collect_images(input_dir)?;
        if images.is_empty() {
            return Err(PipelineError::NoImagesFound(input_dir.to_path_buf()));
        }
        std::fs::create_dir_all(output_dir)?;

        let threads = self.config.threads.unwrap_or_else(num_cpus::get).max(1);
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(threads)
            .build()
            .map_err(|e| PipelineError::ThreadPool(e.to_string()))?;

        let total = images.len();
        let done = AtomicUsize::new(0);
        progress.on_step_start("Correcting images");
        progress.on_debug(&format!("{} images, {} threads", total, threads));

        let results: Vec<(PathBuf, Result<ImageReport>)> = pool.install(|| {
            images
                .par_iter()
                .map(|path| {
                    let file_name = path.file_name().unwrap_or(path.as_os_str());
                    let result = self.process_file(path, &output_dir.join(file_name));
                    let current = done.fetch_add(1, Ordering::SeqCst) + 1;
                    progress.on_step_progress(current, total);
                    (path.clone(), result)
                })
                .collect()
        });

        let mut report = BatchReport::default();
        for (path, result) in results {
            match result {
                Ok(image_report) => report.processed.push(image_report),
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "Image failed");
                    report.failed.push((path, e.to_string()));
                }
            }
        }
        report.elapsed_seconds = start.elapsed().as_secs_f64();

        progress.on_step_complete(
            "Correcting images",
            &format!("{} ok, {} failed", report.ok_count(), report.error_count()),
        );
        Ok(report)
    }
}

/// Sorted list of files in `dir` whose extension is a known image format
pub fn collect_images(dir: &Path) -> Result<Vec<PathBuf>> {
    if !dir.is_dir() {
        return Err(PipelineError::ImageNotFound(dir.to_path_buf()));
    }

    let mut images = Vec::new();
    for entry in std::fs::read_dir(dir)? {
        let path = entry?.path();
        if path.is_file() && ImageFormat::from_path(&path).is_ok() {
            images.push(path);
        }
    }
    images.sort();
    Ok(images)
}
