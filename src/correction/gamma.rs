//! Per-column gamma equalization
//!
//! Corrects column-to-column brightness drift by searching, independently
//! for every column, the gamma exponent that makes it closest to its local
//! neighborhood.
//!
//! # Algorithm
//!
//! For each column `c`:
//!
//! 1. Build the reference: the row-wise mean of columns
//!    `[c - radius, c + radius]` clamped to the image, read from the
//!    unmodified input
//! 2. For every gamma on an evenly spaced grid, compute
//!    `(col / max(col))^gamma * max(col)` and its L1 distance to the reference
//! 3. Keep the first candidate with the smallest distance
//!
//! Columns never read each other's corrected values, so the search runs in
//! parallel across columns.

use image::{GrayImage, Luma};
use rayon::prelude::*;
use tracing::debug;

use super::types::{validate_gamma_grid, GammaEqualizeOptions, Result};

// ============================================================
// Types
// ============================================================

/// Ordered grid of gamma exponents
#[derive(Debug, Clone, PartialEq)]
pub struct GammaCandidates {
    values: Vec<f64>,
}

impl GammaCandidates {
    /// `steps` values evenly spaced over `[min, max]`, both ends included
    ///
    /// A single step yields just `min`.
    pub fn linspace(min: f64, max: f64, steps: usize) -> Result<Self> {
        validate_gamma_grid(min, max, steps)?;

        let values = if steps == 1 {
            vec![min]
        } else {
            let step = (max - min) / (steps - 1) as f64;
            (0..steps)
                .map(|i| if i == steps - 1 { max } else { min + step * i as f64 })
                .collect()
        };

        Ok(Self { values })
    }

    /// Candidate exponents in evaluation order
    pub fn as_slice(&self) -> &[f64] {
        &self.values
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

/// Outcome of one column's search
#[derive(Debug, Clone, PartialEq)]
pub struct ColumnCorrection {
    /// Column index
    pub column: usize,

    /// Winning gamma
    pub gamma: f64,

    /// L1 distance of the corrected column to its reference
    pub score: f64,

    /// Corrected samples, top to bottom
    pub values: Vec<u8>,
}

// ============================================================
// Column Operations
// ============================================================

/// Copy of column `column`, top to bottom
pub fn extract_column(image: &GrayImage, column: usize) -> Vec<u8> {
    let w = image.width() as usize;
    image
        .as_raw()
        .iter()
        .skip(column)
        .step_by(w.max(1))
        .copied()
        .collect()
}

/// Row-wise mean of the columns within `radius` of `column`
///
/// The range is clamped to the image. When it collapses to one index the
/// reference is that column itself.
pub fn neighbor_reference(image: &GrayImage, column: usize, radius: usize) -> Vec<f64> {
    let w = image.width() as usize;
    if w == 0 {
        return Vec::new();
    }

    let left = column.saturating_sub(radius);
    let right = column.saturating_add(radius).min(w - 1);

    if left == right {
        return extract_column(image, left)
            .into_iter()
            .map(f64::from)
            .collect();
    }

    let count = (right - left + 1) as f64;
    image
        .as_raw()
        .chunks_exact(w)
        .map(|row| row[left..=right].iter().map(|&v| v as f64).sum::<f64>() / count)
        .collect()
}

/// Power-law remap of a column against its own maximum
///
/// Results are rounded to the nearest display value, so `gamma == 1.0`
/// returns the column unchanged. An all-black column stays black.
pub fn apply_gamma(column: &[u8], gamma: f64) -> Vec<u8> {
    let max = column.iter().copied().max().unwrap_or(0);
    if max == 0 {
        return vec![0; column.len()];
    }

    let max = max as f64;
    column
        .iter()
        .map(|&v| {
            let corrected = (v as f64 / max).powf(gamma) * max;
            corrected.round().clamp(0.0, 255.0) as u8
        })
        .collect()
}

/// Sum of absolute per-row differences
pub fn l1_distance(candidate: &[u8], reference: &[f64]) -> f64 {
    candidate
        .iter()
        .zip(reference)
        .map(|(&v, &r)| (v as f64 - r).abs())
        .sum()
}

/// Search the best gamma for one column of `image`
///
/// Reads only from `image`; the result does not depend on any other
/// column's correction.
pub fn correct_column(
    image: &GrayImage,
    column: usize,
    candidates: &GammaCandidates,
    radius: usize,
) -> ColumnCorrection {
    let original = extract_column(image, column);
    let reference = neighbor_reference(image, column, radius);
    let first_gamma = candidates.as_slice().first().copied().unwrap_or(1.0);

    if original.iter().all(|&v| v == 0) {
        let score = l1_distance(&original, &reference);
        return ColumnCorrection {
            column,
            gamma: first_gamma,
            score,
            values: original,
        };
    }

    let mut best = ColumnCorrection {
        column,
        gamma: first_gamma,
        score: f64::INFINITY,
        values: original.clone(),
    };

    for &gamma in candidates.as_slice() {
        let corrected = apply_gamma(&original, gamma);
        let score = l1_distance(&corrected, &reference);
        if score < best.score {
            best.gamma = gamma;
            best.score = score;
            best.values = corrected;
        }
    }

    best
}

// ============================================================
// Equalizer
// ============================================================

/// Equalize every column with the given search parameters
pub fn equalize_columns(
    image: &GrayImage,
    neighbor_radius: usize,
    gamma_range: (f64, f64),
    steps: usize,
) -> Result<GrayImage> {
    let options = GammaEqualizeOptions {
        neighbor_radius,
        gamma_min: gamma_range.0,
        gamma_max: gamma_range.1,
        steps,
    };
    GammaEqualizer::new(options).apply(image)
}

/// Per-column gamma equalizer
#[derive(Debug, Clone, Default)]
pub struct GammaEqualizer {
    options: GammaEqualizeOptions,
}

impl GammaEqualizer {
    /// Create an equalizer
    pub fn new(options: GammaEqualizeOptions) -> Self {
        Self { options }
    }

    /// Options in use
    pub fn options(&self) -> &GammaEqualizeOptions {
        &self.options
    }

    /// Run the search for every column and return the per-column results
    /// in column order
    pub fn analyze(&self, image: &GrayImage) -> Result<Vec<ColumnCorrection>> {
        let candidates = GammaCandidates::linspace(
            self.options.gamma_min,
            self.options.gamma_max,
            self.options.steps,
        )?;
        let radius = self.options.neighbor_radius;

        Ok((0..image.width() as usize)
            .into_par_iter()
            .map(|c| correct_column(image, c, &candidates, radius))
            .collect())
    }

    /// Equalize the image
    pub fn apply(&self, image: &GrayImage) -> Result<GrayImage> {
        let corrections = self.analyze(image)?;
        let output = assemble_columns(image.width(), image.height(), &corrections);

        if !corrections.is_empty() {
            let mean_gamma =
                corrections.iter().map(|c| c.gamma).sum::<f64>() / corrections.len() as f64;
            debug!(
                columns = corrections.len(),
                mean_gamma,
                steps = self.options.steps,
                radius = self.options.neighbor_radius,
                "Gamma equalization complete"
            );
        }

        Ok(output)
    }
}

/// Write each correction into its own output column
pub fn assemble_columns(width: u32, height: u32, corrections: &[ColumnCorrection]) -> GrayImage {
    let mut output = GrayImage::new(width, height);
    for correction in corrections {
        for (y, &v) in correction.values.iter().enumerate() {
            output.put_pixel(correction.column as u32, y as u32, Luma([v]));
        }
    }
    output
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::correction::CorrectionError;

    /// Columns hold the same ramp; column `distorted` is darkened by gamma 2
    fn ramp_with_distorted_column(width: u32, distorted: u32) -> (GrayImage, Vec<u8>) {
        let clean: Vec<u8> = (0..16u32).map(|r| (r * 16) as u8).collect();
        let dark = apply_gamma(&clean, 2.0);
        let img = GrayImage::from_fn(width, 16, |x, y| {
            if x == distorted {
                Luma([dark[y as usize]])
            } else {
                Luma([clean[y as usize]])
            }
        });
        (img, clean)
    }

    fn distance(a: &[u8], b: &[u8]) -> u32 {
        a.iter().zip(b).map(|(&x, &y)| (x as i32 - y as i32).unsigned_abs()).sum()
    }

    #[test]
    fn test_linspace_includes_endpoints() {
        let c = GammaCandidates::linspace(0.5, 2.0, 4).unwrap();
        assert_eq!(c.len(), 4);
        assert_eq!(c.as_slice()[0], 0.5);
        assert_eq!(c.as_slice()[1], 1.0);
        assert_eq!(c.as_slice()[2], 1.5);
        assert_eq!(c.as_slice()[3], 2.0);
    }

    #[test]
    fn test_linspace_single_step() {
        let c = GammaCandidates::linspace(1.0, 1.0, 1).unwrap();
        assert_eq!(c.as_slice(), &[1.0]);
    }

    #[test]
    fn test_linspace_validation() {
        for (min, max, steps) in [(0.0, 2.0, 5), (-1.0, 2.0, 5), (2.0, 1.0, 5), (0.5, 2.0, 0)] {
            assert!(matches!(
                GammaCandidates::linspace(min, max, steps),
                Err(CorrectionError::InvalidParameter(_))
            ));
        }
        assert!(GammaCandidates::linspace(f64::NAN, 2.0, 3).is_err());
    }

    #[test]
    fn test_apply_gamma_identity() {
        let column = vec![0, 3, 7, 50, 99, 200, 255];
        assert_eq!(apply_gamma(&column, 1.0), column);
    }

    #[test]
    fn test_apply_gamma_black_column() {
        assert_eq!(apply_gamma(&[0, 0, 0], 0.5), vec![0, 0, 0]);
    }

    #[test]
    fn test_apply_gamma_keeps_maximum() {
        let out = apply_gamma(&[50, 100, 200], 2.0);
        assert_eq!(out[2], 200);
        // (100 / 200)^2 * 200 = 50
        assert_eq!(out[1], 50);
    }

    #[test]
    fn test_neighbor_reference_left_edge() {
        let img = GrayImage::from_raw(5, 1, vec![10, 20, 30, 40, 50]).unwrap();
        // radius 2 at column 0 averages columns 0..=2 only
        assert_eq!(neighbor_reference(&img, 0, 2), vec![20.0]);
        assert_eq!(neighbor_reference(&img, 4, 1), vec![45.0]);
        assert_eq!(neighbor_reference(&img, 2, 1), vec![30.0]);
    }

    #[test]
    fn test_neighbor_reference_single_column() {
        let img = GrayImage::from_raw(1, 3, vec![7, 8, 9]).unwrap();
        assert_eq!(neighbor_reference(&img, 0, 3), vec![7.0, 8.0, 9.0]);

        let img = GrayImage::from_raw(3, 1, vec![7, 8, 9]).unwrap();
        assert_eq!(neighbor_reference(&img, 1, 0), vec![8.0]);
    }

    #[test]
    fn test_identity_gamma_scenario() {
        let img = GrayImage::from_raw(3, 2, vec![0, 50, 100, 0, 50, 100]).unwrap();
        let out = equalize_columns(&img, 1, (1.0, 1.0), 1).unwrap();
        assert_eq!(out, img);
    }

    #[test]
    fn test_shape_preserved() {
        let img = GrayImage::from_fn(9, 6, |x, y| Luma([((x * 37 + y * 11) % 256) as u8]));
        let out = equalize_columns(&img, 3, (0.5, 2.0), 20).unwrap();
        assert_eq!(out.dimensions(), (9, 6));
    }

    #[test]
    fn test_tie_keeps_first_candidate() {
        // Values of only 0 and max are fixed points of every gamma
        let img = GrayImage::from_fn(3, 4, |x, y| {
            if x == 1 {
                Luma([if y % 2 == 0 { 0 } else { 200 }])
            } else {
                Luma([90 + y as u8])
            }
        });
        let candidates = GammaCandidates::linspace(0.5, 2.0, 7).unwrap();
        let result = correct_column(&img, 1, &candidates, 1);
        assert_eq!(result.gamma, 0.5);
        assert_eq!(result.values, vec![0, 200, 0, 200]);
    }

    #[test]
    fn test_black_column_stays_black() {
        let img = GrayImage::from_fn(3, 4, |x, y| Luma([if x == 0 { 0 } else { 100 + y as u8 }]));
        let out = equalize_columns(&img, 1, (0.5, 2.0), 10).unwrap();
        for y in 0..4 {
            assert_eq!(out.get_pixel(0, y).0[0], 0);
        }
    }

    #[test]
    fn test_distorted_column_moves_toward_neighbors() {
        let (img, clean) = ramp_with_distorted_column(5, 2);
        let before = extract_column(&img, 2);

        let candidates = GammaCandidates::linspace(0.5, 2.0, 16).unwrap();
        let result = correct_column(&img, 2, &candidates, 1);

        assert!(result.gamma < 1.0, "expected brightening gamma, got {}", result.gamma);
        assert!(distance(&result.values, &clean) < distance(&before, &clean));
    }

    #[test]
    fn test_column_order_independence() {
        let (img, _) = ramp_with_distorted_column(7, 3);
        let candidates = GammaCandidates::linspace(0.5, 2.0, 20).unwrap();

        let mut reversed: Vec<ColumnCorrection> = (0..7)
            .rev()
            .map(|c| correct_column(&img, c, &candidates, 3))
            .collect();
        reversed.reverse();
        let sequential = assemble_columns(7, 16, &reversed);

        let parallel = equalize_columns(&img, 3, (0.5, 2.0), 20).unwrap();
        assert_eq!(parallel, sequential);
    }

    #[test]
    fn test_input_not_mutated() {
        let (img, _) = ramp_with_distorted_column(5, 2);
        let copy = img.clone();
        let _ = equalize_columns(&img, 1, (0.5, 2.0), 8).unwrap();
        assert_eq!(img, copy);
    }

    #[test]
    fn test_analyze_reports_every_column() {
        let (img, _) = ramp_with_distorted_column(6, 1);
        let equalizer = GammaEqualizer::default();
        let report = equalizer.analyze(&img).unwrap();
        assert_eq!(report.len(), 6);
        for (i, c) in report.iter().enumerate() {
            assert_eq!(c.column, i);
            assert_eq!(c.values.len(), 16);
        }
    }

    #[test]
    fn test_invalid_parameters_rejected_before_processing() {
        let img = GrayImage::new(4, 4);
        assert!(matches!(
            equalize_columns(&img, 1, (2.0, 0.5), 10),
            Err(CorrectionError::InvalidParameter(_))
        ));
        assert!(matches!(
            equalize_columns(&img, 1, (0.5, 2.0), 0),
            Err(CorrectionError::InvalidParameter(_))
        ));
    }

    #[test]
    fn test_empty_image() {
        let img = GrayImage::new(0, 0);
        let out = equalize_columns(&img, 3, (0.5, 2.0), 20).unwrap();
        assert_eq!(out.dimensions(), (0, 0));
    }
}
