//! Column artifact correction
//!
//! Removes column-wise scanning artifacts (vertical banding from sensor
//! drift) from single-channel images.
//!
//! # Stages
//!
//! - **Band smoothing** ([`band`]) - subtract a moving-average column profile
//! - **Gamma equalization** ([`gamma`]) - per-column gamma search against the
//!   local neighborhood
//!
//! Both stages take `&GrayImage` and return a new image of the same size;
//! the input is never modified.
//!
//! # Example
//!
//! ```rust
//! use image::{GrayImage, Luma};
//! use scanband::{equalize_columns, smooth_bands};
//!
//! let scan = GrayImage::from_fn(64, 32, |x, y| Luma([((x * 7 + y) % 200) as u8]));
//! let flattened = smooth_bands(&scan, 7).unwrap();
//! let equalized = equalize_columns(&flattened, 3, (0.5, 2.0), 20).unwrap();
//! assert_eq!(equalized.dimensions(), scan.dimensions());
//! ```

pub mod band;
pub mod gamma;
pub mod rescale;
mod types;

// Re-export public API
pub use band::{column_means, moving_average, smooth_bands, smooth_bands_with, BandSmoother};
pub use gamma::{
    apply_gamma, correct_column, equalize_columns, neighbor_reference, ColumnCorrection,
    GammaCandidates, GammaEqualizer,
};
pub use rescale::{normalize, rescale_to_range};
pub use types::{
    BandSmoothOptions, BandSmoothOptionsBuilder, BoundaryPadding, CorrectionError,
    GammaEqualizeOptions, GammaEqualizeOptionsBuilder, Result, DEFAULT_BAND_PASSES,
    DEFAULT_BAND_WINDOW, DEFAULT_GAMMA_MAX, DEFAULT_GAMMA_MIN, DEFAULT_GAMMA_STEPS,
    DEFAULT_NEIGHBOR_RADIUS,
};
