//! Optional pre/post filter stages
//!
//! Stateless pixel transforms that can run before or after the column
//! correction stages. Each stage is a single pass over the image; none of
//! them carries state between images.
//!
//! Stages deserialize from tagged TOML tables:
//!
//! ```toml
//! [[pipeline.pre_filters]]
//! type = "median_blur"
//! radius = 1
//!
//! [[pipeline.post_filters]]
//! type = "unsharp_mask"
//! sigma = 2.0
//! amount = 1.5
//! threshold = 3
//! ```
//!
//! Neighborhood stages that read past the image edge (`laplacian`,
//! `sobel_mask`, `scharr_mask`) mirror the border without repeating the
//! edge sample (`cb|abcd|cb`).

use image::{GrayImage, ImageBuffer, Luma};
use imageproc::filter::{bilateral_filter, gaussian_blur_f32, median_filter};
use imageproc::gradients::{horizontal_scharr, horizontal_sobel, vertical_scharr, vertical_sobel};
use imageproc::morphology::{grayscale_erode, Mask};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::correction::{normalize, CorrectionError, Result};

// ============================================================
// Constants
// ============================================================

/// Binarization level used before edge erosion
const EDGE_BINARY_LEVEL: u8 = 127;

/// Default bilateral window (pixels)
pub const DEFAULT_BILATERAL_WINDOW: u32 = 9;

/// Default bilateral intensity sigma
pub const DEFAULT_BILATERAL_SIGMA_COLOR: f32 = 75.0;

/// Default bilateral spatial sigma
pub const DEFAULT_BILATERAL_SIGMA_SPATIAL: f32 = 75.0;

/// Default CLAHE clip limit, relative to a flat histogram
pub const DEFAULT_CLAHE_CLIP_LIMIT: f32 = 1.5;

/// Default CLAHE tiles per side
pub const DEFAULT_CLAHE_TILE_GRID: u32 = 12;

const HISTOGRAM_BINS: usize = 256;

// ============================================================
// Types
// ============================================================

/// A single optional filter stage
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum FilterStage {
    /// Gaussian blur
    GaussianBlur { sigma: f32 },

    /// Square median filter of side `2 * radius + 1`
    MedianBlur { radius: u32 },

    /// Unsharp mask; differences below `threshold` are left alone
    UnsharpMask { sigma: f32, amount: f32, threshold: u8 },

    /// Global gamma lookup table, `(v / 255)^gamma * 255` truncated
    GammaLut { gamma: f64 },

    /// Min-max stretch into `[target_min, target_max]`
    Normalize { target_min: u8, target_max: u8 },

    /// Binary threshold: strictly above `level` becomes 255, everything else 0
    Threshold { level: u8 },

    /// Grayscale erosion (square minimum filter)
    Erode { radius: u32, iterations: u32 },

    /// Binary edge mask: thresholded image minus its erosion
    EdgeBinaryErosion { radius: u32 },

    /// Equal-weight blend of absolute horizontal and vertical Sobel responses
    SobelMask,

    /// Equal-weight blend of absolute horizontal and vertical Scharr responses
    ScharrMask,

    /// Absolute 4-neighbor Laplacian
    Laplacian,

    /// Edge-preserving bilateral denoise
    Bilateral {
        #[serde(default = "default_bilateral_window")]
        window: u32,
        #[serde(default = "default_bilateral_sigma_color")]
        sigma_color: f32,
        #[serde(default = "default_bilateral_sigma_spatial")]
        sigma_spatial: f32,
    },

    /// Contrast limited adaptive histogram equalization over a
    /// `tile_grid` x `tile_grid` grid
    Clahe {
        #[serde(default = "default_clahe_clip_limit")]
        clip_limit: f32,
        #[serde(default = "default_clahe_tile_grid")]
        tile_grid: u32,
    },

    /// Per-pixel select between two filtered versions of the input
    ///
    /// All three stage lists run on the same input. Bits set in the `mask`
    /// result come from `inside`, the rest from `outside`. An empty list
    /// leaves the input as is.
    MaskCombine {
        mask: Vec<FilterStage>,
        #[serde(default)]
        inside: Vec<FilterStage>,
        #[serde(default)]
        outside: Vec<FilterStage>,
    },
}

fn default_bilateral_window() -> u32 {
    DEFAULT_BILATERAL_WINDOW
}

fn default_bilateral_sigma_color() -> f32 {
    DEFAULT_BILATERAL_SIGMA_COLOR
}

fn default_bilateral_sigma_spatial() -> f32 {
    DEFAULT_BILATERAL_SIGMA_SPATIAL
}

fn default_clahe_clip_limit() -> f32 {
    DEFAULT_CLAHE_CLIP_LIMIT
}

fn default_clahe_tile_grid() -> u32 {
    DEFAULT_CLAHE_TILE_GRID
}

impl FilterStage {
    /// Bilateral denoise with the default 9 px window and sigmas of 75
    pub fn bilateral() -> Self {
        FilterStage::Bilateral {
            window: DEFAULT_BILATERAL_WINDOW,
            sigma_color: DEFAULT_BILATERAL_SIGMA_COLOR,
            sigma_spatial: DEFAULT_BILATERAL_SIGMA_SPATIAL,
        }
    }

    /// CLAHE with clip limit 1.5 on a 12 x 12 grid
    pub fn clahe() -> Self {
        FilterStage::Clahe {
            clip_limit: DEFAULT_CLAHE_CLIP_LIMIT,
            tile_grid: DEFAULT_CLAHE_TILE_GRID,
        }
    }

    /// Short stage name
    pub fn name(&self) -> &'static str {
        match self {
            FilterStage::GaussianBlur { .. } => "gaussian_blur",
            FilterStage::MedianBlur { .. } => "median_blur",
            FilterStage::UnsharpMask { .. } => "unsharp_mask",
            FilterStage::GammaLut { .. } => "gamma_lut",
            FilterStage::Normalize { .. } => "normalize",
            FilterStage::Threshold { .. } => "threshold",
            FilterStage::Erode { .. } => "erode",
            FilterStage::EdgeBinaryErosion { .. } => "edge_binary_erosion",
            FilterStage::SobelMask => "sobel_mask",
            FilterStage::ScharrMask => "scharr_mask",
            FilterStage::Laplacian => "laplacian",
            FilterStage::Bilateral { .. } => "bilateral",
            FilterStage::Clahe { .. } => "clahe",
            FilterStage::MaskCombine { .. } => "mask_combine",
        }
    }

    /// Apply the stage, returning a new image of the same size
    pub fn apply(&self, image: &GrayImage) -> Result<GrayImage> {
        match self {
            FilterStage::GaussianBlur { sigma } => {
                require_positive("gaussian sigma", *sigma as f64)?;
                Ok(gaussian_blur_f32(image, *sigma))
            }
            FilterStage::MedianBlur { radius } => Ok(median_filter(image, *radius, *radius)),
            FilterStage::UnsharpMask {
                sigma,
                amount,
                threshold,
            } => {
                require_positive("unsharp sigma", *sigma as f64)?;
                Ok(unsharp_mask(image, *sigma, *amount, *threshold))
            }
            FilterStage::GammaLut { gamma } => {
                require_positive("gamma", *gamma)?;
                Ok(gamma_lut(image, *gamma))
            }
            FilterStage::Normalize {
                target_min,
                target_max,
            } => normalize(image, *target_min, *target_max),
            FilterStage::Threshold { level } => Ok(threshold(image, *level)),
            FilterStage::Erode { radius, iterations } => {
                let mut current = image.clone();
                for _ in 0..*iterations {
                    current = erode(&current, *radius)?;
                }
                Ok(current)
            }
            FilterStage::EdgeBinaryErosion { radius } => {
                let binary = threshold(image, EDGE_BINARY_LEVEL);
                let eroded = erode(&binary, *radius)?;
                Ok(subtract(&binary, &eroded))
            }
            FilterStage::SobelMask => {
                let padded = pad_reflect_101(image);
                Ok(blend_abs(
                    &horizontal_sobel(&padded),
                    &vertical_sobel(&padded),
                ))
            }
            FilterStage::ScharrMask => {
                let padded = pad_reflect_101(image);
                Ok(blend_abs(
                    &horizontal_scharr(&padded),
                    &vertical_scharr(&padded),
                ))
            }
            FilterStage::Laplacian => Ok(laplacian(image)),
            FilterStage::Bilateral {
                window,
                sigma_color,
                sigma_spatial,
            } => {
                if *window == 0 {
                    return Err(CorrectionError::InvalidParameter(
                        "bilateral window must be at least 1".to_string(),
                    ));
                }
                require_positive("bilateral sigma_color", *sigma_color as f64)?;
                require_positive("bilateral sigma_spatial", *sigma_spatial as f64)?;
                Ok(bilateral_filter(image, *window, *sigma_color, *sigma_spatial))
            }
            FilterStage::Clahe {
                clip_limit,
                tile_grid,
            } => {
                require_positive("clahe clip_limit", *clip_limit as f64)?;
                if *tile_grid == 0 {
                    return Err(CorrectionError::InvalidParameter(
                        "clahe tile_grid must be at least 1".to_string(),
                    ));
                }
                Ok(clahe(image, *clip_limit, *tile_grid))
            }
            FilterStage::MaskCombine {
                mask,
                inside,
                outside,
            } => {
                let mask = apply_all(mask, image)?;
                let inside = apply_all(inside, image)?;
                let outside = apply_all(outside, image)?;
                mask_combine(&mask, &inside, &outside)
            }
        }
    }
}

impl fmt::Display for FilterStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FilterStage::GaussianBlur { sigma } => write!(f, "gaussian_blur(sigma={})", sigma),
            FilterStage::MedianBlur { radius } => write!(f, "median_blur(radius={})", radius),
            FilterStage::UnsharpMask {
                sigma,
                amount,
                threshold,
            } => write!(
                f,
                "unsharp_mask(sigma={}, amount={}, threshold={})",
                sigma, amount, threshold
            ),
            FilterStage::GammaLut { gamma } => write!(f, "gamma_lut(gamma={})", gamma),
            FilterStage::Normalize {
                target_min,
                target_max,
            } => write!(f, "normalize({}..={})", target_min, target_max),
            FilterStage::Threshold { level } => write!(f, "threshold(level={})", level),
            FilterStage::Erode { radius, iterations } => {
                write!(f, "erode(radius={}, iterations={})", radius, iterations)
            }
            FilterStage::EdgeBinaryErosion { radius } => {
                write!(f, "edge_binary_erosion(radius={})", radius)
            }
            FilterStage::Bilateral {
                window,
                sigma_color,
                sigma_spatial,
            } => write!(
                f,
                "bilateral(window={}, sigma_color={}, sigma_spatial={})",
                window, sigma_color, sigma_spatial
            ),
            FilterStage::Clahe {
                clip_limit,
                tile_grid,
            } => write!(f, "clahe(clip_limit={}, tile_grid={})", clip_limit, tile_grid),
            FilterStage::MaskCombine {
                mask,
                inside,
                outside,
            } => write!(
                f,
                "mask_combine(mask={}, inside={}, outside={})",
                mask.len(),
                inside.len(),
                outside.len()
            ),
            other => f.write_str(other.name()),
        }
    }
}

/// Take `masked` where `mask` bits are set and `unmasked` elsewhere
///
/// Bitwise: `(masked & mask) | (unmasked & !mask)`, so a 0/255 mask
/// selects whole pixels.
pub fn mask_combine(
    mask: &GrayImage,
    masked: &GrayImage,
    unmasked: &GrayImage,
) -> Result<GrayImage> {
    if mask.dimensions() != masked.dimensions() || mask.dimensions() != unmasked.dimensions() {
        return Err(CorrectionError::InvalidParameter(format!(
            "mask_combine needs equal sizes, got mask {:?}, masked {:?}, unmasked {:?}",
            mask.dimensions(),
            masked.dimensions(),
            unmasked.dimensions()
        )));
    }

    let mut output = unmasked.clone();
    for ((pixel, m), inside) in output.pixels_mut().zip(mask.pixels()).zip(masked.pixels()) {
        let bits = m.0[0];
        pixel.0[0] = (inside.0[0] & bits) | (pixel.0[0] & !bits);
    }
    Ok(output)
}

/// Apply stages in order
pub fn apply_all(stages: &[FilterStage], image: &GrayImage) -> Result<GrayImage> {
    let mut current = image.clone();
    for stage in stages {
        current = stage.apply(&current)?;
    }
    Ok(current)
}

fn require_positive(name: &str, value: f64) -> Result<()> {
    if value.is_finite() && value > 0.0 {
        Ok(())
    } else {
        Err(CorrectionError::InvalidParameter(format!(
            "{} must be positive, got {}",
            name, value
        )))
    }
}

// ============================================================
// Filter Implementations
// ============================================================

/// Unsharp mask: `original + amount * (original - blurred)`
fn unsharp_mask(image: &GrayImage, sigma: f32, amount: f32, threshold: u8) -> GrayImage {
    let blurred = gaussian_blur_f32(image, sigma);
    let mut output = image.clone();

    for (pixel, blur) in output.pixels_mut().zip(blurred.pixels()) {
        let original = pixel.0[0] as f32;
        let diff = original - blur.0[0] as f32;
        if diff.abs() >= threshold as f32 {
            pixel.0[0] = (original + amount * diff).round().clamp(0.0, 255.0) as u8;
        }
    }

    output
}

fn gamma_lut(image: &GrayImage, gamma: f64) -> GrayImage {
    let lut: Vec<u8> = (0..=255u32)
        .map(|i| ((i as f64 / 255.0).powf(gamma) * 255.0) as u8)
        .collect();

    let mut output = image.clone();
    for pixel in output.pixels_mut() {
        pixel.0[0] = lut[pixel.0[0] as usize];
    }
    output
}

fn threshold(image: &GrayImage, level: u8) -> GrayImage {
    let mut output = image.clone();
    for pixel in output.pixels_mut() {
        pixel.0[0] = if pixel.0[0] > level { 255 } else { 0 };
    }
    output
}

/// Square minimum filter, ignoring samples outside the image
fn erode(image: &GrayImage, radius: u32) -> Result<GrayImage> {
    if radius == 0 {
        return Ok(image.clone());
    }
    let radius = u8::try_from(radius).map_err(|_| {
        CorrectionError::InvalidParameter(format!(
            "erode radius must be at most 255, got {}",
            radius
        ))
    })?;
    Ok(grayscale_erode(image, &Mask::square(radius)))
}

fn subtract(a: &GrayImage, b: &GrayImage) -> GrayImage {
    let mut output = a.clone();
    for (pixel, other) in output.pixels_mut().zip(b.pixels()) {
        pixel.0[0] = pixel.0[0].saturating_sub(other.0[0]);
    }
    output
}

/// Mirror index without repeating the edge sample (`cb|abcd|cb`)
fn reflect_101(i: i64, len: i64) -> i64 {
    if len == 1 {
        return 0;
    }
    let i = i.abs();
    if i >= len {
        2 * (len - 1) - i
    } else {
        i
    }
}

/// One-pixel reflect-101 border so crate gradients see mirrored neighbors
fn pad_reflect_101(image: &GrayImage) -> GrayImage {
    let (width, height) = image.dimensions();
    if width == 0 || height == 0 {
        return image.clone();
    }
    GrayImage::from_fn(width + 2, height + 2, |x, y| {
        let sx = reflect_101(x as i64 - 1, width as i64) as u32;
        let sy = reflect_101(y as i64 - 1, height as i64) as u32;
        *image.get_pixel(sx, sy)
    })
}

/// `0.5 * |gx| + 0.5 * |gy|` over gradients of a padded image, each
/// response saturated to 8 bits first; the border ring is dropped
fn blend_abs(
    gx: &ImageBuffer<Luma<i16>, Vec<i16>>,
    gy: &ImageBuffer<Luma<i16>, Vec<i16>>,
) -> GrayImage {
    let (padded_width, padded_height) = gx.dimensions();
    let width = padded_width.saturating_sub(2);
    let height = padded_height.saturating_sub(2);
    GrayImage::from_fn(width, height, |x, y| {
        let sx = (gx.get_pixel(x + 1, y + 1).0[0] as i32).abs().min(255) as f32;
        let sy = (gy.get_pixel(x + 1, y + 1).0[0] as i32).abs().min(255) as f32;
        Luma([(0.5 * sx + 0.5 * sy).round() as u8])
    })
}

/// Kernel `[0, 1, 0; 1, -4, 1; 0, 1, 0]`, reflect-101 borders
fn laplacian(image: &GrayImage) -> GrayImage {
    let (width, height) = image.dimensions();
    if width == 0 || height == 0 {
        return image.clone();
    }

    let at = |x: i64, y: i64| -> i32 {
        let cx = reflect_101(x, width as i64) as u32;
        let cy = reflect_101(y, height as i64) as u32;
        image.get_pixel(cx, cy).0[0] as i32
    };

    GrayImage::from_fn(width, height, |x, y| {
        let (x, y) = (x as i64, y as i64);
        let value = at(x, y - 1) + at(x, y + 1) + at(x - 1, y) + at(x + 1, y) - 4 * at(x, y);
        Luma([value.unsigned_abs().min(255) as u8])
    })
}

// ============================================================
// CLAHE
// ============================================================

/// Tile-based contrast limited adaptive histogram equalization
///
/// # Algorithm
///
/// 1. Split the image into `tile_grid` x `tile_grid` tiles (fewer when the
///    image is smaller than the grid)
/// 2. Per tile, clip the histogram at `clip_limit * area / 256` (at least
///    1) and spread the clipped excess evenly over all bins
/// 3. The tile lookup table is the scaled cumulative histogram
/// 4. Each pixel blends the lookup tables of the four nearest tile centres
///    bilinearly
fn clahe(image: &GrayImage, clip_limit: f32, tile_grid: u32) -> GrayImage {
    let (width, height) = image.dimensions();
    if width == 0 || height == 0 {
        return image.clone();
    }

    let tiles_x = tile_grid.min(width);
    let tiles_y = tile_grid.min(height);
    let x_bounds = tile_bounds(width, tiles_x);
    let y_bounds = tile_bounds(height, tiles_y);

    let mut luts = Vec::with_capacity((tiles_x * tiles_y) as usize);
    for ty in 0..tiles_y as usize {
        for tx in 0..tiles_x as usize {
            let mut histogram = [0u32; HISTOGRAM_BINS];
            for y in y_bounds[ty]..y_bounds[ty + 1] {
                for x in x_bounds[tx]..x_bounds[tx + 1] {
                    histogram[image.get_pixel(x, y).0[0] as usize] += 1;
                }
            }
            let area = (x_bounds[tx + 1] - x_bounds[tx]) * (y_bounds[ty + 1] - y_bounds[ty]);
            luts.push(tile_lut(&mut histogram, area, clip_limit));
        }
    }

    let tile_width = width as f32 / tiles_x as f32;
    let tile_height = height as f32 / tiles_y as f32;
    let lut_at = |tx: usize, ty: usize| &luts[ty * tiles_x as usize + tx];

    GrayImage::from_fn(width, height, |x, y| {
        let (x0, x1, ax) = neighbor_tiles(x, tile_width, tiles_x);
        let (y0, y1, ay) = neighbor_tiles(y, tile_height, tiles_y);
        let v = image.get_pixel(x, y).0[0] as usize;

        let top = lut_at(x0, y0)[v] * (1.0 - ax) + lut_at(x1, y0)[v] * ax;
        let bottom = lut_at(x0, y1)[v] * (1.0 - ax) + lut_at(x1, y1)[v] * ax;
        let value = top * (1.0 - ay) + bottom * ay;
        Luma([value.round().clamp(0.0, 255.0) as u8])
    })
}

fn tile_bounds(len: u32, tiles: u32) -> Vec<u32> {
    (0..=tiles as u64)
        .map(|i| (i * len as u64 / tiles as u64) as u32)
        .collect()
}

/// Clipped, redistributed cumulative histogram scaled to `0..=255`
fn tile_lut(
    histogram: &mut [u32; HISTOGRAM_BINS],
    area: u32,
    clip_limit: f32,
) -> [f32; HISTOGRAM_BINS] {
    let limit = ((clip_limit * area as f32 / HISTOGRAM_BINS as f32) as u32).max(1);

    let mut excess = 0u32;
    for count in histogram.iter_mut() {
        if *count > limit {
            excess += *count - limit;
            *count = limit;
        }
    }

    let bonus = excess / HISTOGRAM_BINS as u32;
    let mut residual = (excess % HISTOGRAM_BINS as u32) as usize;
    for count in histogram.iter_mut() {
        *count += bonus;
    }
    if residual > 0 {
        let step = (HISTOGRAM_BINS / residual).max(1);
        let mut bin = 0;
        while bin < HISTOGRAM_BINS && residual > 0 {
            histogram[bin] += 1;
            residual -= 1;
            bin += step;
        }
    }

    let scale = 255.0 / area.max(1) as f32;
    let mut lut = [0f32; HISTOGRAM_BINS];
    let mut cumulative = 0u32;
    for (entry, count) in lut.iter_mut().zip(histogram.iter()) {
        cumulative += count;
        *entry = (cumulative as f32 * scale).min(255.0);
    }
    lut
}

/// The two tiles whose centres bracket `pos` and the weight of the second
fn neighbor_tiles(pos: u32, tile_size: f32, tiles: u32) -> (usize, usize, f32) {
    let t = (pos as f32 + 0.5) / tile_size - 0.5;
    let first = t.floor();
    let weight = t - first;
    let last = tiles as i64 - 1;
    let lo = (first as i64).clamp(0, last) as usize;
    let hi = (first as i64 + 1).clamp(0, last) as usize;
    (lo, hi, weight)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn square_image() -> GrayImage {
        GrayImage::from_fn(20, 20, |x, y| {
            if (5..15).contains(&x) && (5..15).contains(&y) {
                Luma([200])
            } else {
                Luma([50])
            }
        })
    }

    #[test]
    fn test_stage_names() {
        assert_eq!(FilterStage::SobelMask.name(), "sobel_mask");
        assert_eq!(FilterStage::MedianBlur { radius: 1 }.name(), "median_blur");
        assert_eq!(
            FilterStage::Erode { radius: 1, iterations: 2 }.to_string(),
            "erode(radius=1, iterations=2)"
        );
    }

    #[test]
    fn test_all_stages_preserve_shape() {
        let img = square_image();
        let stages = [
            FilterStage::GaussianBlur { sigma: 1.0 },
            FilterStage::MedianBlur { radius: 1 },
            FilterStage::UnsharpMask { sigma: 2.0, amount: 1.5, threshold: 3 },
            FilterStage::GammaLut { gamma: 0.8 },
            FilterStage::Normalize { target_min: 0, target_max: 255 },
            FilterStage::Threshold { level: 100 },
            FilterStage::Erode { radius: 1, iterations: 1 },
            FilterStage::EdgeBinaryErosion { radius: 2 },
            FilterStage::SobelMask,
            FilterStage::ScharrMask,
            FilterStage::Laplacian,
            FilterStage::bilateral(),
            FilterStage::clahe(),
            FilterStage::MaskCombine {
                mask: vec![FilterStage::Threshold { level: 100 }],
                inside: vec![],
                outside: vec![FilterStage::MedianBlur { radius: 1 }],
            },
        ];
        for stage in &stages {
            let out = stage.apply(&img).unwrap();
            assert_eq!(out.dimensions(), img.dimensions(), "stage {}", stage);
        }
    }

    #[test]
    fn test_threshold_is_strict() {
        let img = GrayImage::from_raw(3, 1, vec![100, 101, 99]).unwrap();
        let out = FilterStage::Threshold { level: 100 }.apply(&img).unwrap();
        assert_eq!(out.as_raw(), &vec![0, 255, 0]);
    }

    #[test]
    fn test_gamma_lut_endpoints() {
        let img = GrayImage::from_raw(3, 1, vec![0, 255, 128]).unwrap();
        let out = FilterStage::GammaLut { gamma: 1.0 }.apply(&img).unwrap();
        assert_eq!(out.get_pixel(0, 0).0[0], 0);
        assert_eq!(out.get_pixel(1, 0).0[0], 255);

        let bright = FilterStage::GammaLut { gamma: 0.5 }.apply(&img).unwrap();
        assert!(bright.get_pixel(2, 0).0[0] > 128);
    }

    #[test]
    fn test_erode_shrinks_bright_region() {
        let img = square_image();
        let out = erode(&img, 1).unwrap();
        assert_eq!(out.get_pixel(5, 5).0[0], 50);
        assert_eq!(out.get_pixel(6, 6).0[0], 200);
        assert_eq!(out.get_pixel(10, 10).0[0], 200);
    }

    #[test]
    fn test_edge_binary_erosion_outlines_square() {
        let img = square_image();
        let out = FilterStage::EdgeBinaryErosion { radius: 1 }.apply(&img).unwrap();
        assert_eq!(out.get_pixel(5, 10).0[0], 255);
        assert_eq!(out.get_pixel(10, 10).0[0], 0);
        assert_eq!(out.get_pixel(0, 0).0[0], 0);
    }

    #[test]
    fn test_laplacian_flat_is_zero() {
        let img = GrayImage::from_pixel(8, 8, Luma([77]));
        let out = laplacian(&img);
        assert!(out.pixels().all(|p| p.0[0] == 0));
    }

    #[test]
    fn test_laplacian_mirrors_border_without_edge_sample() {
        let mut img = GrayImage::new(5, 5);
        img.put_pixel(0, 2, Luma([50]));
        let out = laplacian(&img);
        // Left neighbor of column 0 is column 1, not column 0 again
        assert_eq!(out.get_pixel(0, 2).0[0], 200);
        assert_eq!(out.get_pixel(1, 2).0[0], 50);
        assert_eq!(out.get_pixel(4, 4).0[0], 0);
    }

    #[test]
    fn test_sobel_mirrors_border_without_edge_sample() {
        let img = GrayImage::from_fn(5, 5, |x, _| if x == 0 { Luma([100]) } else { Luma([0]) });
        let out = FilterStage::SobelMask.apply(&img).unwrap();
        assert_eq!(out.dimensions(), (5, 5));
        // Mirrored neighbors on both sides of column 0 cancel out
        assert_eq!(out.get_pixel(0, 2).0[0], 0);
        // |gx| = 4 * 100 saturates to 255, halved by the blend
        assert_eq!(out.get_pixel(1, 2).0[0], 128);
        assert_eq!(out.get_pixel(3, 2).0[0], 0);
    }

    #[test]
    fn test_reflect_101_index() {
        assert_eq!(reflect_101(-1, 4), 1);
        assert_eq!(reflect_101(4, 4), 2);
        assert_eq!(reflect_101(2, 4), 2);
        assert_eq!(reflect_101(-1, 1), 0);
    }

    #[test]
    fn test_sobel_flat_is_zero() {
        let img = GrayImage::from_pixel(8, 8, Luma([77]));
        let out = FilterStage::SobelMask.apply(&img).unwrap();
        assert!(out.pixels().all(|p| p.0[0] == 0));
    }

    #[test]
    fn test_erode_rejects_oversized_radius() {
        let img = square_image();
        assert!(FilterStage::Erode { radius: 300, iterations: 1 }.apply(&img).is_err());
    }

    #[test]
    fn test_bilateral_defaults() {
        assert_eq!(
            FilterStage::bilateral(),
            FilterStage::Bilateral {
                window: 9,
                sigma_color: 75.0,
                sigma_spatial: 75.0,
            }
        );
        let stage: FilterStage = toml::from_str("type = \"bilateral\"\n").unwrap();
        assert_eq!(stage, FilterStage::bilateral());
    }

    #[test]
    fn test_bilateral_smooths_flat_and_keeps_step_edge() {
        let flat = GrayImage::from_pixel(12, 12, Luma([90]));
        let out = FilterStage::bilateral().apply(&flat).unwrap();
        assert!(out.pixels().all(|p| (p.0[0] as i32 - 90).abs() <= 1));

        let step = GrayImage::from_fn(20, 20, |x, _| if x < 10 { Luma([50]) } else { Luma([200]) });
        let stage = FilterStage::Bilateral {
            window: 5,
            sigma_color: 10.0,
            sigma_spatial: 3.0,
        };
        let out = stage.apply(&step).unwrap();
        assert!((out.get_pixel(9, 10).0[0] as i32 - 50).abs() <= 1);
        assert!((out.get_pixel(10, 10).0[0] as i32 - 200).abs() <= 1);

        // A gaussian of similar reach blurs the same edge
        let blurred = FilterStage::GaussianBlur { sigma: 1.5 }.apply(&step).unwrap();
        assert!(blurred.get_pixel(9, 10).0[0] > 60);
    }

    #[test]
    fn test_bilateral_invalid_parameters() {
        let img = square_image();
        let zero_window = FilterStage::Bilateral {
            window: 0,
            sigma_color: 75.0,
            sigma_spatial: 75.0,
        };
        assert!(zero_window.apply(&img).is_err());
        let bad_sigma = FilterStage::Bilateral {
            window: 9,
            sigma_color: 0.0,
            sigma_spatial: 75.0,
        };
        assert!(bad_sigma.apply(&img).is_err());
    }

    #[test]
    fn test_clahe_defaults() {
        assert_eq!(
            FilterStage::clahe(),
            FilterStage::Clahe {
                clip_limit: 1.5,
                tile_grid: 12,
            }
        );
        let stage: FilterStage = toml::from_str("type = \"clahe\"\ntile_grid = 4\n").unwrap();
        assert_eq!(
            stage,
            FilterStage::Clahe {
                clip_limit: 1.5,
                tile_grid: 4,
            }
        );
    }

    #[test]
    fn test_clahe_uniform_stays_uniform() {
        let img = GrayImage::from_pixel(48, 48, Luma([128]));
        let out = FilterStage::clahe().apply(&img).unwrap();
        let first = out.get_pixel(0, 0).0[0];
        assert!(out.pixels().all(|p| p.0[0] == first));
    }

    #[test]
    fn test_clahe_stretches_low_contrast() {
        // 16 grey levels, 100..=115
        let img = GrayImage::from_fn(64, 64, |x, _| Luma([100 + (x / 4) as u8]));
        let stage = FilterStage::Clahe {
            clip_limit: 40.0,
            tile_grid: 2,
        };
        let out = stage.apply(&img).unwrap();

        let spread = |image: &GrayImage| {
            let min = image.pixels().map(|p| p.0[0]).min().unwrap();
            let max = image.pixels().map(|p| p.0[0]).max().unwrap();
            max - min
        };
        assert!(spread(&out) > 3 * spread(&img), "spread {}", spread(&out));

        // Inside one tile the mapping is monotonic
        assert!(out.get_pixel(0, 0).0[0] < out.get_pixel(8, 0).0[0]);
    }

    #[test]
    fn test_clahe_clip_limit_tempers_contrast() {
        let img = GrayImage::from_fn(64, 64, |x, _| Luma([100 + (x / 4) as u8]));
        let spread = |clip_limit: f32| {
            let out = FilterStage::Clahe { clip_limit, tile_grid: 2 }.apply(&img).unwrap();
            let min = out.pixels().map(|p| p.0[0]).min().unwrap();
            let max = out.pixels().map(|p| p.0[0]).max().unwrap();
            max - min
        };
        assert!(spread(1.0) < spread(40.0));
    }

    #[test]
    fn test_clahe_invalid_parameters() {
        let img = square_image();
        assert!(FilterStage::Clahe { clip_limit: 0.0, tile_grid: 8 }.apply(&img).is_err());
        assert!(FilterStage::Clahe { clip_limit: 1.5, tile_grid: 0 }.apply(&img).is_err());
    }

    #[test]
    fn test_mask_combine_selects_per_pixel() {
        let mask = GrayImage::from_raw(4, 1, vec![255, 0, 255, 0]).unwrap();
        let masked = GrayImage::from_raw(4, 1, vec![10, 20, 30, 40]).unwrap();
        let unmasked = GrayImage::from_raw(4, 1, vec![50, 60, 70, 80]).unwrap();
        let out = mask_combine(&mask, &masked, &unmasked).unwrap();
        assert_eq!(out.as_raw(), &vec![10, 60, 30, 80]);

        let small = GrayImage::new(2, 1);
        assert!(mask_combine(&small, &masked, &unmasked).is_err());
    }

    #[test]
    fn test_mask_combine_stage() {
        let img = square_image();
        let stage = FilterStage::MaskCombine {
            mask: vec![FilterStage::Threshold { level: 100 }],
            inside: vec![FilterStage::Normalize { target_min: 0, target_max: 255 }],
            outside: vec![FilterStage::Threshold { level: 10 }],
        };
        let out = stage.apply(&img).unwrap();
        // Inside the bright square: normalized 200 -> 255
        assert_eq!(out.get_pixel(10, 10).0[0], 255);
        // Background: thresholded 50 -> 255
        assert_eq!(out.get_pixel(0, 0).0[0], 255);

        let keep_background = FilterStage::MaskCombine {
            mask: vec![FilterStage::Threshold { level: 100 }],
            inside: vec![FilterStage::GammaLut { gamma: 2.0 }],
            outside: vec![],
        };
        let out = keep_background.apply(&img).unwrap();
        assert_eq!(out.get_pixel(0, 0).0[0], 50);
        assert!(out.get_pixel(10, 10).0[0] < 200);
        assert_eq!(keep_background.name(), "mask_combine");
    }

    #[test]
    fn test_mask_combine_from_toml() {
        let toml_str = r#"
type = "mask_combine"

[[mask]]
type = "threshold"
level = 100

[[inside]]
type = "median_blur"
radius = 1
"#;
        let stage: FilterStage = toml::from_str(toml_str).unwrap();
        assert_eq!(
            stage,
            FilterStage::MaskCombine {
                mask: vec![FilterStage::Threshold { level: 100 }],
                inside: vec![FilterStage::MedianBlur { radius: 1 }],
                outside: vec![],
            }
        );
    }

    #[test]
    fn test_invalid_parameters() {
        let img = square_image();
        assert!(FilterStage::GaussianBlur { sigma: 0.0 }.apply(&img).is_err());
        assert!(FilterStage::GammaLut { gamma: -1.0 }.apply(&img).is_err());
        assert!(FilterStage::Normalize { target_min: 10, target_max: 5 }
            .apply(&img)
            .is_err());
    }

    #[test]
    fn test_apply_all_runs_in_order() {
        let img = square_image();
        let stages = vec![
            FilterStage::Threshold { level: 100 },
            FilterStage::Normalize { target_min: 10, target_max: 20 },
        ];
        let out = apply_all(&stages, &img).unwrap();
        assert_eq!(out.get_pixel(0, 0).0[0], 10);
        assert_eq!(out.get_pixel(10, 10).0[0], 20);
    }

    #[test]
    fn test_stage_toml_roundtrip_shape() {
        let stage: FilterStage = toml::from_str("type = \"median_blur\"\nradius = 2\n").unwrap();
        assert_eq!(stage, FilterStage::MedianBlur { radius: 2 });

        let stage: FilterStage = toml::from_str("type = \"sobel_mask\"\n").unwrap();
        assert_eq!(stage, FilterStage::SobelMask);
    }
}
