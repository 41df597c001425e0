//! Screenshot comparison
//!
//! Two knobs decide whether a screenshot matches its reference: how far a
//! single channel may deviate before a pixel counts as wrong, and which share
//! of wrong pixels the whole image may contain. The negative check asks for a
//! minimum number of pixels that differ by at least a given amount.
//!
//! Channel differences are normalised to `[0, 1]`; all four RGBA channels are
//! compared.

use super::error::{HarnessError, Result};
use image::{imageops, Rgba, RgbaImage};
use std::path::{Path, PathBuf};
use tracing::{error, info};

/// Tolerances for an equality check
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EqualityTolerance {
    /// Share of wrong pixels allowed, `0.0..=1.0`
    pub wrong_pixels_allowed: f64,
    /// Per-channel difference a pixel may have without counting as wrong
    pub rgb_difference_allowed: f64,
}

impl Default for EqualityTolerance {
    fn default() -> Self {
        Self {
            wrong_pixels_allowed: 0.0,
            rgb_difference_allowed: 0.0,
        }
    }
}

/// Requirements for an inequality check
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct InequalityRequirement {
    /// Number of pixels that must differ
    pub required_unequal_pixels: u64,
    /// Per-channel difference below which a pixel counts as too similar
    pub rgb_difference_required: f64,
}

impl Default for InequalityRequirement {
    fn default() -> Self {
        Self {
            required_unequal_pixels: 1,
            rgb_difference_required: 0.0,
        }
    }
}

/// What a comparison should establish
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ComparisonMode {
    /// Candidate must match the reference within tolerance
    Equal(EqualityTolerance),
    /// Candidate must differ from the reference
    Unequal(InequalityRequirement),
}

impl Default for ComparisonMode {
    fn default() -> Self {
        Self::Equal(EqualityTolerance::default())
    }
}

/// Pixel statistics of a comparison
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PixelCounts {
    /// Number of pixels compared
    pub total: u64,
    /// Pixels with any channel difference
    pub different: u64,
    /// Pixels with a channel difference above the allowed difference
    pub wrong: u64,
    /// Pixels not too similar to the reference
    pub unequal: u64,
}

fn channel_differences(a: &Rgba<u8>, b: &Rgba<u8>) -> [f64; 4] {
    let mut diffs = [0.0; 4];
    for (diff, (x, y)) in diffs.iter_mut().zip(a.0.iter().zip(b.0.iter())) {
        *diff = f64::from(x.abs_diff(*y)) / 255.0;
    }
    diffs
}

/// Count pixels against both thresholds in a single pass
///
/// Both images must have the same dimensions.
pub fn count_pixels(
    candidate: &RgbaImage,
    reference: &RgbaImage,
    rgb_difference_allowed: f64,
    rgb_difference_required: f64,
) -> PixelCounts {
    let mut counts = PixelCounts::default();
    for (a, b) in candidate.pixels().zip(reference.pixels()) {
        let diffs = channel_differences(a, b);
        counts.total += 1;
        if diffs.iter().any(|d| *d > 0.0) {
            counts.different += 1;
        }
        if diffs.iter().any(|d| *d > rgb_difference_allowed) {
            counts.wrong += 1;
        }
        if !diffs.iter().all(|d| *d < rgb_difference_required) {
            counts.unequal += 1;
        }
    }
    counts
}

fn same_size(candidate: &RgbaImage, reference: &RgbaImage) -> bool {
    if candidate.dimensions() == reference.dimensions() {
        return true;
    }
    error!(
        "image sizes differ: {}x{} vs reference {}x{}",
        candidate.width(),
        candidate.height(),
        reference.width(),
        reference.height()
    );
    false
}

/// Is `candidate` close enough to `reference`?
///
/// Passes iff `wrong / total <= wrong_pixels_allowed`. Identical images pass
/// without looking at single pixels; images of different size fail.
#[allow(clippy::cast_precision_loss)]
pub fn compare_equal(
    candidate: &RgbaImage,
    reference: &RgbaImage,
    wrong_pixels_allowed: f64,
    rgb_difference_allowed: f64,
) -> bool {
    if !same_size(candidate, reference) {
        return false;
    }
    if candidate.as_raw() == reference.as_raw() {
        info!("images are identical");
        return true;
    }

    let counts = count_pixels(candidate, reference, rgb_difference_allowed, 0.0);
    let wrong_share = counts.wrong as f64 / counts.total as f64;
    let passed = wrong_share <= wrong_pixels_allowed;
    info!(
        "{} of {} pixels differ, {} above the allowed difference of {:.2}% ({:.4}% wrong, {:.4}% allowed)",
        counts.different,
        counts.total,
        counts.wrong,
        rgb_difference_allowed * 100.0,
        wrong_share * 100.0,
        wrong_pixels_allowed * 100.0
    );
    passed
}

/// Is `candidate` different enough from `reference`?
///
/// A pixel is too similar when all its channel differences are below
/// `rgb_difference_required`. Passes iff at least `required_unequal_pixels`
/// pixels are not too similar. Images of different size fail.
pub fn compare_unequal(
    candidate: &RgbaImage,
    reference: &RgbaImage,
    required_unequal_pixels: u64,
    rgb_difference_required: f64,
) -> bool {
    if !same_size(candidate, reference) {
        return false;
    }

    let counts = count_pixels(candidate, reference, 1.0, rgb_difference_required);
    info!(
        "{} of {} pixels differ by at least {:.2}%, {} required",
        counts.unequal,
        counts.total,
        rgb_difference_required * 100.0,
        required_unequal_pixels
    );
    counts.unequal >= required_unequal_pixels
}

/// Compare two images according to `mode`
pub fn compare(candidate: &RgbaImage, reference: &RgbaImage, mode: ComparisonMode) -> bool {
    match mode {
        ComparisonMode::Equal(t) => {
            compare_equal(candidate, reference, t.wrong_pixels_allowed, t.rgb_difference_allowed)
        }
        ComparisonMode::Unequal(r) => {
            compare_unequal(candidate, reference, r.required_unequal_pixels, r.rgb_difference_required)
        }
    }
}

/// Top-left `width` x `height` part of `image`
pub fn crop_to(image: &RgbaImage, width: u32, height: u32) -> RgbaImage {
    imageops::crop_imm(image, 0, 0, width, height).to_image()
}

#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
fn scale_channel(value: u8, factor: f64) -> u8 {
    (f64::from(value) * factor).round().clamp(0.0, 255.0) as u8
}

/// Write `<base>_DIFF.png` and `<base>_DIFF_SCALED.png` into `output_dir`
///
/// The diff image holds the absolute per-channel difference (opaque); the
/// scaled one multiplies it by `scale_factor` so small deviations become
/// visible. Images of different size are diffed over their common area.
pub fn create_diff_images(
    candidate: &RgbaImage,
    reference: &RgbaImage,
    output_dir: &Path,
    base_name: &str,
    scale_factor: f64,
) -> Result<(PathBuf, PathBuf)> {
    let width = candidate.width().min(reference.width());
    let height = candidate.height().min(reference.height());

    let diff = RgbaImage::from_fn(width, height, |x, y| {
        let a = candidate.get_pixel(x, y);
        let b = reference.get_pixel(x, y);
        Rgba([a[0].abs_diff(b[0]), a[1].abs_diff(b[1]), a[2].abs_diff(b[2]), 255])
    });
    let scaled = RgbaImage::from_fn(width, height, |x, y| {
        let d = diff.get_pixel(x, y);
        Rgba([
            scale_channel(d[0], scale_factor),
            scale_channel(d[1], scale_factor),
            scale_channel(d[2], scale_factor),
            255,
        ])
    });

    std::fs::create_dir_all(output_dir)?;
    let diff_path = output_dir.join(format!("{base_name}_DIFF.png"));
    let scaled_path = output_dir.join(format!("{base_name}_DIFF_SCALED.png"));
    diff.save(&diff_path)?;
    scaled.save(&scaled_path)?;
    info!("diff images written to {} and {}", diff_path.display(), scaled_path.display());
    Ok((diff_path, scaled_path))
}

/// Compare two images and write diff images on failure
///
/// A failed comparison is a [`HarnessError::Assertion`] naming `label`. Diff
/// images land in `diff_dir` as `<base_name>_DIFF.png` and
/// `<base_name>_DIFF_SCALED.png`.
pub fn assert_images_match(
    candidate: &RgbaImage,
    reference: &RgbaImage,
    mode: ComparisonMode,
    diff_dir: &Path,
    base_name: &str,
    scale_factor: f64,
) -> Result<()> {
    if compare(candidate, reference, mode) {
        return Ok(());
    }

    if let Err(e) = create_diff_images(candidate, reference, diff_dir, base_name, scale_factor) {
        error!("could not write diff images: {}", e);
    }
    let expectation = match mode {
        ComparisonMode::Equal(_) => "does not match its reference",
        ComparisonMode::Unequal(_) => "is not different enough from its reference",
    };
    Err(HarnessError::assertion(format!("{base_name} {expectation}")))
}

/// Load two image files and [`assert_images_match`] them
///
/// Diff images are named after the candidate file.
pub fn compare_image_files(
    candidate_path: &Path,
    reference_path: &Path,
    mode: ComparisonMode,
    diff_dir: &Path,
    scale_factor: f64,
) -> Result<()> {
    let candidate = image::open(candidate_path)?.to_rgba8();
    let reference = image::open(reference_path)?.to_rgba8();
    let base_name = candidate_path
        .file_stem()
        .map_or_else(|| "screenshot".to_string(), |s| s.to_string_lossy().into_owned());
    info!("comparing {} with {}", candidate_path.display(), reference_path.display());
    assert_images_match(&candidate, &reference, mode, diff_dir, &base_name, scale_factor)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn filled(width: u32, height: u32, value: u8) -> RgbaImage {
        RgbaImage::from_pixel(width, height, Rgba([value, value, value, 255]))
    }

    #[test]
    fn test_black_matches_black() {
        let reference = filled(100, 100, 0);
        let candidate = filled(100, 100, 0);
        assert!(compare_equal(&candidate, &reference, 0.0, 0.0));
    }

    #[test]
    fn test_white_against_black() {
        let reference = filled(100, 100, 0);
        let candidate = filled(100, 100, 255);
        assert!(!compare_equal(&candidate, &reference, 0.0, 0.0));
        assert!(compare_unequal(&candidate, &reference, 10_000, 0.0));
        assert!(!compare_unequal(&candidate, &reference, 10_001, 0.0));
    }

    #[test]
    fn test_size_mismatch_fails_both_ways() {
        let reference = filled(100, 100, 0);
        let candidate = filled(100, 99, 0);
        assert!(!compare_equal(&candidate, &reference, 1.0, 1.0));
        assert!(!compare_unequal(&candidate, &reference, 0, 0.0));
    }

    #[test]
    fn test_per_pixel_tolerance() {
        let reference = filled(10, 10, 100);
        let mut candidate = reference.clone();
        // 10/255 ~ 3.9%
        candidate.put_pixel(3, 3, Rgba([110, 100, 100, 255]));

        assert!(!compare_equal(&candidate, &reference, 0.0, 0.0));
        assert!(compare_equal(&candidate, &reference, 0.0, 0.05));
        assert!(!compare_equal(&candidate, &reference, 0.0, 0.03));
        // one wrong pixel out of 100
        assert!(compare_equal(&candidate, &reference, 0.02, 0.0));
    }

    #[test]
    fn test_required_difference() {
        let reference = filled(10, 10, 0);
        let mut candidate = reference.clone();
        candidate.put_pixel(0, 0, Rgba([20, 0, 0, 255]));
        candidate.put_pixel(1, 0, Rgba([200, 0, 0, 255]));

        let counts = count_pixels(&candidate, &reference, 0.0, 0.5);
        assert_eq!(counts.total, 100);
        assert_eq!(counts.different, 2);
        assert_eq!(counts.wrong, 2);
        assert_eq!(counts.unequal, 1);

        assert!(compare_unequal(&candidate, &reference, 1, 0.5));
        assert!(!compare_unequal(&candidate, &reference, 2, 0.5));
        assert!(compare_unequal(&candidate, &reference, 2, 0.05));
    }

    #[test]
    fn test_crop() {
        let mut image = filled(20, 10, 0);
        image.put_pixel(1, 1, Rgba([255, 0, 0, 255]));
        let cropped = crop_to(&image, 5, 5);
        assert_eq!(cropped.dimensions(), (5, 5));
        assert_eq!(cropped.get_pixel(1, 1), &Rgba([255, 0, 0, 255]));
    }

    #[test]
    fn test_diff_images_written() {
        let dir = tempfile::tempdir().unwrap();
        let reference = filled(4, 4, 10);
        let candidate = filled(4, 4, 12);

        let (diff, scaled) = create_diff_images(&candidate, &reference, dir.path(), "shot", 20.0).unwrap();
        let diff = image::open(diff).unwrap().to_rgba8();
        let scaled = image::open(scaled).unwrap().to_rgba8();
        assert_eq!(diff.get_pixel(0, 0), &Rgba([2, 2, 2, 255]));
        assert_eq!(scaled.get_pixel(0, 0), &Rgba([40, 40, 40, 255]));
    }

    fn arbitrary_pair() -> impl Strategy<Value = (RgbaImage, RgbaImage)> {
        (1u32..8, 1u32..8).prop_flat_map(|(w, h)| {
            let len = (w * h * 4) as usize;
            (
                proptest::collection::vec(any::<u8>(), len),
                proptest::collection::vec(any::<u8>(), len),
            )
                .prop_map(move |(a, b)| {
                    (
                        RgbaImage::from_raw(w, h, a).unwrap(),
                        RgbaImage::from_raw(w, h, b).unwrap(),
                    )
                })
        })
    }

    proptest! {
        #[test]
        fn prop_identity_always_passes(
            (image, _) in arbitrary_pair(),
            wrong in 0.0f64..1.0,
            diff in 0.0f64..1.0,
        ) {
            prop_assert!(compare_equal(&image, &image.clone(), wrong, diff));
        }

        #[test]
        fn prop_trivial_bounds_agree((a, b) in arbitrary_pair()) {
            if compare_equal(&a, &b, 1.0, 1.0) {
                prop_assert!(compare_unequal(&a, &b, 0, 0.0));
            }
        }
    }
}
