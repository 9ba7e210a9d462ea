//! Band smoothing
//!
//! Removes a smooth vertical-band bias from a scanned image.
//!
//! # Algorithm
//!
//! 1. Compute the mean intensity of every column (the column profile)
//! 2. Smooth the profile with a `window`-wide moving average, same length
//!    as the input
//! 3. Subtract the smoothed profile from every column
//! 4. Min-max rescale the residual to `[0, 255]`
//!
//! With the default zero padding the smoothed profile is biased low within
//! `window / 2` columns of either edge, so those columns come out brighter.

use image::GrayImage;
use tracing::debug;

use super::rescale::rescale_to_range;
use super::types::{
    validate_window, BandSmoothOptions, BoundaryPadding, Result, DISPLAY_MAX, DISPLAY_MIN,
};

/// Remove vertical banding with a zero-padded moving average
pub fn smooth_bands(image: &GrayImage, window: usize) -> Result<GrayImage> {
    smooth_bands_with(image, window, BoundaryPadding::Zero)
}

/// Remove vertical banding with an explicit edge policy
pub fn smooth_bands_with(
    image: &GrayImage,
    window: usize,
    padding: BoundaryPadding,
) -> Result<GrayImage> {
    let (width, height) = image.dimensions();
    validate_window(window, width as usize)?;

    let profile = column_means(image);
    let smoothed = moving_average(&profile, window, padding);

    let w = width as usize;
    let residual: Vec<f64> = image
        .as_raw()
        .iter()
        .enumerate()
        .map(|(i, &v)| v as f64 - smoothed[i % w])
        .collect();

    Ok(rescale_to_range(
        &residual,
        width,
        height,
        DISPLAY_MIN,
        DISPLAY_MAX,
    ))
}

/// Mean intensity of each column
pub fn column_means(image: &GrayImage) -> Vec<f64> {
    let (width, height) = image.dimensions();
    let w = width as usize;
    let mut sums = vec![0.0f64; w];

    if w == 0 || height == 0 {
        return sums;
    }

    for row in image.as_raw().chunks_exact(w) {
        for (sum, &v) in sums.iter_mut().zip(row) {
            *sum += v as f64;
        }
    }

    let rows = height as f64;
    for sum in &mut sums {
        *sum /= rows;
    }
    sums
}

/// Same-length moving average of a profile
///
/// Output index `i` averages input indices `[i - window / 2, i + (window - 1) / 2]`,
/// which centres odd windows and leans left for even ones.
pub fn moving_average(profile: &[f64], window: usize, padding: BoundaryPadding) -> Vec<f64> {
    let n = profile.len() as isize;
    if n == 0 || window == 0 {
        return profile.to_vec();
    }

    let before = (window / 2) as isize;
    let after = ((window - 1) / 2) as isize;
    let divisor = window as f64;

    let sample = |j: isize| -> f64 {
        if (0..n).contains(&j) {
            return profile[j as usize];
        }
        match padding {
            BoundaryPadding::Zero => 0.0,
            BoundaryPadding::Replicate => profile[j.clamp(0, n - 1) as usize],
            BoundaryPadding::Symmetric => {
                let mirrored = if j < 0 { -j - 1 } else { 2 * n - j - 1 };
                profile[mirrored.clamp(0, n - 1) as usize]
            }
            BoundaryPadding::Reflect => {
                let mirrored = if j < 0 { -j } else { 2 * (n - 1) - j };
                profile[mirrored.clamp(0, n - 1) as usize]
            }
        }
    };

    (0..n)
        .map(|i| {
            let sum: f64 = (i - before..=i + after).map(&sample).sum();
            sum / divisor
        })
        .collect()
}

/// Multi-pass band smoother
#[derive(Debug, Clone, Default)]
pub struct BandSmoother {
    options: BandSmoothOptions,
}

impl BandSmoother {
    /// Create a smoother
    pub fn new(options: BandSmoothOptions) -> Self {
        Self { options }
    }

    /// Options in use
    pub fn options(&self) -> &BandSmoothOptions {
        &self.options
    }

    /// Run every configured pass
    ///
    /// All parameters are checked before the first pass runs.
    pub fn apply(&self, image: &GrayImage) -> Result<GrayImage> {
        self.options.validate(image.width() as usize)?;

        let mut current = image.clone();
        for pass in 0..self.options.passes {
            current = smooth_bands_with(&current, self.options.window, self.options.padding)?;
            debug!(
                pass = pass + 1,
                window = self.options.window,
                padding = ?self.options.padding,
                "Band smoothing pass complete"
            );
        }
        Ok(current)
    }
}
