//! Rotation estimate and deskew
//!
//! Estimates how far a scanned page is rotated from the dominant straight
//! edges in the image (typically the black border around the page) and
//! rotates it back.
//!
//! # Algorithm
//!
//! 1. Canny edge detection
//! 2. Hough line transform
//! 3. Convert each line's normal angle to a tilt (`angle - 90`) and keep
//!    tilts strictly inside (-45, 45) degrees
//! 4. Report the median tilt; 0 when nothing qualifies
//!
//! Deskewing rotates onto an enlarged canvas so no page content is cut off;
//! the uncovered triangles are filled with black.

use image::{GrayImage, Luma};
use imageproc::edges::canny;
use imageproc::geometric_transformations::{warp_into, Interpolation, Projection};
use imageproc::hough::{detect_lines, LineDetectionOptions};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::correction::{CorrectionError, Result};

// ============================================================
// Constants
// ============================================================

/// Default Canny low threshold
const DEFAULT_CANNY_LOW: f32 = 50.0;

/// Default Canny high threshold
const DEFAULT_CANNY_HIGH: f32 = 150.0;

/// Default Hough vote threshold
const DEFAULT_VOTE_THRESHOLD: u32 = 100;

/// Tilts at or beyond this magnitude are ignored
const MAX_TILT_DEGREES: f32 = 45.0;

// ============================================================
// Types
// ============================================================

/// Options for rotation detection
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RotationOptions {
    /// Canny low hysteresis threshold
    pub canny_low: f32,

    /// Canny high hysteresis threshold
    pub canny_high: f32,

    /// Minimum Hough votes for a line
    pub vote_threshold: u32,

    /// Non-maximum suppression radius in Hough space (0 disables)
    pub suppression_radius: u32,
}

impl Default for RotationOptions {
    fn default() -> Self {
        Self {
            canny_low: DEFAULT_CANNY_LOW,
            canny_high: DEFAULT_CANNY_HIGH,
            vote_threshold: DEFAULT_VOTE_THRESHOLD,
            suppression_radius: 0,
        }
    }
}

impl RotationOptions {
    fn validate(&self) -> Result<()> {
        if !(self.canny_low >= 0.0 && self.canny_low <= self.canny_high) {
            return Err(CorrectionError::InvalidParameter(format!(
                "canny thresholds must satisfy 0 <= low <= high, got ({}, {})",
                self.canny_low, self.canny_high
            )));
        }
        Ok(())
    }
}

// ============================================================
// Detection
// ============================================================

/// Estimated page tilt in degrees, positive meaning clockwise correction
pub fn detect_rotation_angle(image: &GrayImage, options: &RotationOptions) -> Result<f32> {
    options.validate()?;

    let edges = canny(image, options.canny_low, options.canny_high);
    let lines = detect_lines(
        &edges,
        LineDetectionOptions {
            vote_threshold: options.vote_threshold,
            suppression_radius: options.suppression_radius,
        },
    );

    let mut tilts: Vec<f32> = lines
        .iter()
        .map(|line| line.angle_in_degrees as f32 - 90.0)
        .filter(|tilt| tilt.abs() < MAX_TILT_DEGREES)
        .collect();

    debug!(
        line_count = lines.len(),
        usable = tilts.len(),
        "Hough lines detected"
    );

    Ok(median(&mut tilts).unwrap_or(0.0))
}

/// Rotate the image back by the detected tilt
///
/// Returns the rotated image and the angle that was removed. The canvas
/// grows to the rotated bounding box, see [`rotate_expanded`].
pub fn deskew(image: &GrayImage, options: &RotationOptions) -> Result<(GrayImage, f32)> {
    let angle = detect_rotation_angle(image, options)?;
    info!(angle, "Detected rotation angle");

    if angle == 0.0 {
        return Ok((image.clone(), angle));
    }

    Ok((rotate_expanded(image, angle), angle))
}

// ============================================================
// Rotation
// ============================================================

/// Canvas size that holds a `width` x `height` image rotated by `angle_degrees`
///
/// `W|cos| + H|sin|` by `W|sin| + H|cos|`, rounded up.
pub fn expanded_size(width: u32, height: u32, angle_degrees: f32) -> (u32, u32) {
    let theta = (angle_degrees as f64).to_radians();
    let (sin, cos) = (theta.sin().abs(), theta.cos().abs());
    let (w, h) = (width as f64, height as f64);

    // Absorb float noise so 0 and 90 degrees do not grow by a pixel
    let fit = |extent: f64| (extent - 1e-6).ceil().max(0.0) as u32;
    (fit(w * cos + h * sin), fit(w * sin + h * cos))
}

/// Rotate clockwise by `angle_degrees` about the centre onto an expanded canvas
///
/// The source centre lands on the centre of the new canvas; pixels not
/// covered by the source are black.
pub fn rotate_expanded(image: &GrayImage, angle_degrees: f32) -> GrayImage {
    let (width, height) = image.dimensions();
    let (new_width, new_height) = expanded_size(width, height, angle_degrees);

    let mut output = GrayImage::new(new_width, new_height);
    if width == 0 || height == 0 || new_width == 0 || new_height == 0 {
        return output;
    }

    let projection = Projection::translate(new_width as f32 / 2.0, new_height as f32 / 2.0)
        * Projection::rotate(angle_degrees.to_radians())
        * Projection::translate(-(width as f32) / 2.0, -(height as f32) / 2.0);

    warp_into(
        image,
        &projection,
        Interpolation::Bilinear,
        Luma([0u8]),
        &mut output,
    );

    debug!(
        width,
        height,
        new_width,
        new_height,
        angle_degrees,
        "Rotated onto expanded canvas"
    );
    output
}

fn median(values: &mut [f32]) -> Option<f32> {
    if values.is_empty() {
        return None;
    }
    values.sort_by(|a, b| a.total_cmp(b));
    let mid = values.len() / 2;
    if values.len() % 2 == 0 {
        Some((values[mid - 1] + values[mid]) / 2.0)
    } else {
        Some(values[mid])
    }
}
