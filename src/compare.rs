//! Perceptual pixel comparison.
//!
//! Two pixels differ when their colour distance in YIQ space exceeds a fixed
//! fraction of the largest possible distance. Alpha is blended over white
//! first, so fully transparent pixels compare as white.

use image::imageops::FilterType;
use image::{DynamicImage, GenericImageView, Rgb, RgbImage, Rgba};
use serde::Serialize;
use std::path::Path;
use tracing::debug;

use crate::error::CompareError;

/// Per-pixel tolerance, as a fraction of the maximum YIQ distance
pub const PIXEL_TOLERANCE: f64 = 0.1;

/// Largest possible YIQ delta between two colours
const MAX_YIQ_DELTA: f64 = 35215.0;

const DIFF_COLOR: Rgb<u8> = Rgb([255, 0, 0]);

/// Unchanged pixels in the diff image keep this share of their contrast
const DIFF_FADE: f64 = 0.1;

/// Verdict for one screenshot against its baseline
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Analysis {
    /// Fraction of differing pixels, 0.0 to 1.0
    pub mis_match_percentage: f64,
    pub is_same_dimensions: bool,
    pub pass_threshold: bool,
}

impl Analysis {
    pub fn new(comparison: &Comparison, threshold: f64) -> Self {
        Self {
            mis_match_percentage: comparison.mismatch,
            is_same_dimensions: comparison.same_dimensions,
            pass_threshold: comparison.mismatch <= threshold,
        }
    }

    pub fn has_mismatch(&self) -> bool {
        self.mis_match_percentage > 0.0
    }
}

/// Raw comparator output
#[derive(Debug, Clone)]
pub struct Comparison {
    pub mismatch: f64,
    pub same_dimensions: bool,
    pub differing_pixels: u64,
    /// Present only when at least one pixel differs
    pub diff: Option<RgbImage>,
}

/// Compare `test` against `base`.
///
/// Images of different sizes are compared after the larger one is scaled
/// down to the smaller one's dimensions.
pub fn compare(base: &DynamicImage, test: &DynamicImage) -> Result<Comparison, CompareError> {
    if base.width() == 0 || base.height() == 0 || test.width() == 0 || test.height() == 0 {
        return Err(CompareError::EmptyImage);
    }

    let same_dimensions = base.dimensions() == test.dimensions();
    let (base, test) = if same_dimensions {
        (base.to_rgba8(), test.to_rgba8())
    } else {
        let base_area = base.width() as u64 * base.height() as u64;
        let test_area = test.width() as u64 * test.height() as u64;
        debug!(
            base = ?base.dimensions(),
            test = ?test.dimensions(),
            "comparing images of different sizes"
        );
        if base_area > test_area {
            let scaled = base.resize_exact(test.width(), test.height(), FilterType::Triangle);
            (scaled.to_rgba8(), test.to_rgba8())
        } else {
            let scaled = test.resize_exact(base.width(), base.height(), FilterType::Triangle);
            (base.to_rgba8(), scaled.to_rgba8())
        }
    };

    let max_delta = MAX_YIQ_DELTA * PIXEL_TOLERANCE * PIXEL_TOLERANCE;
    let (width, height) = base.dimensions();
    let mut diff = RgbImage::new(width, height);
    let mut differing_pixels = 0u64;

    for (x, y, base_px) in base.enumerate_pixels() {
        let a = blend(*base_px);
        let b = blend(*test.get_pixel(x, y));
        if yiq_delta(a, b) > max_delta {
            differing_pixels += 1;
            diff.put_pixel(x, y, DIFF_COLOR);
        } else {
            let gray = (255.0 + (luma(a) - 255.0) * DIFF_FADE).clamp(0.0, 255.0) as u8;
            diff.put_pixel(x, y, Rgb([gray, gray, gray]));
        }
    }

    let total = width as u64 * height as u64;
    let mismatch = differing_pixels as f64 / total as f64;
    Ok(Comparison {
        mismatch,
        same_dimensions,
        differing_pixels,
        diff: (differing_pixels > 0).then_some(diff),
    })
}

/// Compare two PNG files and write `diff_path` when any pixel differs
pub fn compare_files(
    base: &Path,
    test: &Path,
    diff_path: &Path,
    threshold: f64,
) -> Result<Analysis, CompareError> {
    let base_img = load(base)?;
    let test_img = load(test)?;
    let comparison = compare(&base_img, &test_img)?;

    if let Some(diff) = &comparison.diff {
        if let Some(parent) = diff_path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| CompareError::Save {
                path: diff_path.to_path_buf(),
                source: image::ImageError::IoError(e),
            })?;
        }
        diff.save(diff_path).map_err(|source| CompareError::Save {
            path: diff_path.to_path_buf(),
            source,
        })?;
    }

    Ok(Analysis::new(&comparison, threshold))
}

fn load(path: &Path) -> Result<DynamicImage, CompareError> {
    image::open(path).map_err(|source| CompareError::Load {
        path: path.to_path_buf(),
        source,
    })
}

fn blend(px: Rgba<u8>) -> [f64; 3] {
    let alpha = px[3] as f64 / 255.0;
    [0, 1, 2].map(|c| 255.0 + (px[c] as f64 - 255.0) * alpha)
}

fn luma([r, g, b]: [f64; 3]) -> f64 {
    r * 0.29889531 + g * 0.58662247 + b * 0.11448223
}

fn yiq_delta(a: [f64; 3], b: [f64; 3]) -> f64 {
    let [r, g, bl] = [a[0] - b[0], a[1] - b[1], a[2] - b[2]];
    let y = r * 0.29889531 + g * 0.58662247 + bl * 0.11448223;
    let i = r * 0.59597799 - g * 0.27417610 - bl * 0.32180189;
    let q = r * 0.21147017 - g * 0.52261711 + bl * 0.31114694;
    0.5053 * y * y + 0.299 * i * i + 0.1957 * q * q
}
