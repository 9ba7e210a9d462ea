//! Min-max rescaling to the display range
//!
//! Both correction stages work on real-valued samples and re-quantize to
//! 8-bit only at their output boundary. This module holds that final step.

use image::{GrayImage, Luma};
use tracing::debug;

use super::types::{CorrectionError, Result};

/// Rescale row-major samples so their minimum maps to `target_min` and
/// their maximum to `target_max`, truncating toward zero.
///
/// An input with zero span (every sample equal) yields a uniform image at
/// `target_min` instead of dividing by zero.
pub fn rescale_to_range(
    values: &[f64],
    width: u32,
    height: u32,
    target_min: u8,
    target_max: u8,
) -> GrayImage {
    let mut output = GrayImage::from_pixel(width, height, Luma([target_min]));
    if values.is_empty() {
        return output;
    }

    let (min, max) = values
        .iter()
        .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), &v| {
            (lo.min(v), hi.max(v))
        });
    let span = max - min;

    if span <= 0.0 || !span.is_finite() {
        debug!(min, max, target_min, "Degenerate rescale, returning uniform image");
        return output;
    }

    let low = target_min as f64;
    let range = target_max as f64 - low;
    for (pixel, &v) in output.pixels_mut().zip(values) {
        let scaled = low + (v - min) / span * range;
        pixel.0[0] = scaled.clamp(0.0, 255.0) as u8;
    }

    output
}

/// Min-max normalize an 8-bit image into `[target_min, target_max]`
pub fn normalize(image: &GrayImage, target_min: u8, target_max: u8) -> Result<GrayImage> {
    if target_min > target_max {
        return Err(CorrectionError::InvalidParameter(format!(
            "normalize target_min ({}) exceeds target_max ({})",
            target_min, target_max
        )));
    }

    let values: Vec<f64> = image.pixels().map(|p| p.0[0] as f64).collect();
    let (width, height) = image.dimensions();
    Ok(rescale_to_range(&values, width, height, target_min, target_max))
}
