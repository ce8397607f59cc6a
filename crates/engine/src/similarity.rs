//! Multi-algorithm image similarity scoring and difference visualisation

use std::borrow::Cow;
use std::io::Cursor;
use std::path::Path;

use image::{imageops, ImageOutputFormat, Rgba, RgbaImage};
use tracing::{debug, warn};

use visreg_common::config::SimilarityConfig;
use visreg_common::{Error, Result, SimilarityScores};

/// Colour used to mark differing pixels in diff images
pub const HIGHLIGHT: Rgba<u8> = Rgba([255, 0, 0, 255]);

/// Fill used when padding the smaller image onto the common canvas
const PAD: Rgba<u8> = Rgba([0, 0, 0, 0]);

// SSIM stabilisers for 8-bit luminance: (0.01 * 255)^2 and (0.03 * 255)^2
const SSIM_C1: f64 = 6.5025;
const SSIM_C2: f64 = 58.5225;

/// Difference overlay produced by [`SimilarityEngine::diff`]
#[derive(Debug, Clone)]
pub struct DiffImage {
    pub image: RgbaImage,
    /// Pixels whose per-channel difference exceeds the tolerance
    pub highlighted_pixels: u64,
    pub total_pixels: u64,
    pub dimension_mismatch: bool,
}

impl DiffImage {
    pub fn diff_percent(&self) -> f64 {
        if self.total_pixels == 0 {
            0.0
        } else {
            self.highlighted_pixels as f64 / self.total_pixels as f64 * 100.0
        }
    }

    pub fn to_png(&self) -> Result<Vec<u8>> {
        encode_png(&self.image)
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, self.to_png()?)?;
        Ok(())
    }
}

/// Pure image comparison: sub-scores, weighted composite and diff overlays
#[derive(Debug, Clone)]
pub struct SimilarityEngine {
    config: SimilarityConfig,
}

impl Default for SimilarityEngine {
    fn default() -> Self {
        Self {
            config: SimilarityConfig::default(),
        }
    }
}

impl SimilarityEngine {
    pub fn new(config: SimilarityConfig) -> Result<Self> {
        let weights = [config.pixel_weight, config.histogram_weight, config.structural_weight];
        if weights.iter().any(|w| !w.is_finite() || *w < 0.0) || weights.iter().sum::<f64>() <= 0.0 {
            return Err(Error::InvalidConfig(
                "similarity weights must be non-negative with a positive sum".into(),
            ));
        }
        if config.ssim_window == 0 || config.ssim_stride == 0 {
            return Err(Error::InvalidConfig("ssim window and stride must be positive".into()));
        }
        Ok(Self { config })
    }

    pub fn config(&self) -> &SimilarityConfig {
        &self.config
    }

    /// Score `a` against `b`
    pub fn compare(&self, a: &RgbaImage, b: &RgbaImage) -> Result<SimilarityScores> {
        ensure_area(a)?;
        ensure_area(b)?;

        if a.dimensions() == b.dimensions() && a.as_raw() == b.as_raw() {
            debug!("Images are byte-identical");
            return Ok(SimilarityScores::identical());
        }

        let (a, b, dimension_mismatch) = pad_to_common(a, b);
        if dimension_mismatch {
            warn!(
                "Image dimensions differ, padded to {}x{}",
                a.width(),
                a.height()
            );
        }

        let pixel = pixel_score(&a, &b);
        let histogram = histogram_score(&a, &b);
        let structural = structural_score(&a, &b, self.config.ssim_window, self.config.ssim_stride);
        let composite = self.composite(pixel, histogram, structural);

        Ok(SimilarityScores {
            pixel,
            histogram,
            structural,
            composite,
            dimension_mismatch,
        })
    }

    /// Decode two encoded images and score them
    pub fn compare_bytes(&self, a: &[u8], b: &[u8]) -> Result<SimilarityScores> {
        self.compare(&decode(a)?, &decode(b)?)
    }

    /// Overlay marking every pixel that differs beyond the tolerance
    pub fn diff(&self, a: &RgbaImage, b: &RgbaImage) -> Result<DiffImage> {
        ensure_area(a)?;
        ensure_area(b)?;

        let (a, b, dimension_mismatch) = pad_to_common(a, b);
        let (width, height) = a.dimensions();
        let mut image = RgbaImage::new(width, height);
        let mut highlighted_pixels = 0u64;

        for (x, y, actual) in a.enumerate_pixels() {
            let expected = b.get_pixel(x, y);
            if pixels_differ(actual, expected, self.config.diff_tolerance) {
                highlighted_pixels += 1;
                image.put_pixel(x, y, HIGHLIGHT);
            } else {
                // Keep original but dim it
                let [r, g, bl, _] = actual.0;
                image.put_pixel(x, y, Rgba([r / 2, g / 2, bl / 2, 128]));
            }
        }

        Ok(DiffImage {
            image,
            highlighted_pixels,
            total_pixels: width as u64 * height as u64,
            dimension_mismatch,
        })
    }

    fn composite(&self, pixel: f64, histogram: f64, structural: f64) -> f64 {
        let c = &self.config;
        let total = c.pixel_weight + c.histogram_weight + c.structural_weight;
        let weighted =
            c.pixel_weight * pixel + c.histogram_weight * histogram + c.structural_weight * structural;
        clamp_score(weighted / total)
    }
}

/// Decode PNG (or any format the image crate recognises) into RGBA
pub fn decode(bytes: &[u8]) -> Result<RgbaImage> {
    let img = image::load_from_memory(bytes)
        .map_err(|e| Error::InvalidImage(format!("cannot decode image: {}", e)))?
        .to_rgba8();
    ensure_area(&img)?;
    Ok(img)
}

pub fn encode_png(img: &RgbaImage) -> Result<Vec<u8>> {
    let mut buf = Vec::new();
    image::DynamicImage::ImageRgba8(img.clone())
        .write_to(&mut Cursor::new(&mut buf), ImageOutputFormat::Png)?;
    Ok(buf)
}

fn ensure_area(img: &RgbaImage) -> Result<()> {
    if img.width() == 0 || img.height() == 0 {
        return Err(Error::InvalidImage(format!(
            "zero-area image ({}x{})",
            img.width(),
            img.height()
        )));
    }
    Ok(())
}

fn clamp_score(score: f64) -> f64 {
    if score.is_nan() {
        0.0
    } else {
        score.clamp(0.0, 100.0)
    }
}

/// Place both images on a canvas large enough for either; never crops
fn pad_to_common<'a>(a: &'a RgbaImage, b: &'a RgbaImage) -> (Cow<'a, RgbaImage>, Cow<'a, RgbaImage>, bool) {
    if a.dimensions() == b.dimensions() {
        return (Cow::Borrowed(a), Cow::Borrowed(b), false);
    }
    let width = a.width().max(b.width());
    let height = a.height().max(b.height());
    (pad(a, width, height), pad(b, width, height), true)
}

fn pad(img: &RgbaImage, width: u32, height: u32) -> Cow<'_, RgbaImage> {
    if img.dimensions() == (width, height) {
        return Cow::Borrowed(img);
    }
    let mut canvas = RgbaImage::from_pixel(width, height, PAD);
    imageops::replace(&mut canvas, img, 0, 0);
    Cow::Owned(canvas)
}

fn pixels_differ(a: &Rgba<u8>, b: &Rgba<u8>, tolerance: u8) -> bool {
    a.0.iter()
        .zip(b.0.iter())
        .any(|(x, y)| x.abs_diff(*y) > tolerance)
}

/// 100 * (1 - mean per-channel absolute difference / 255)
fn pixel_score(a: &RgbaImage, b: &RgbaImage) -> f64 {
    let total: u64 = a
        .as_raw()
        .iter()
        .zip(b.as_raw().iter())
        .map(|(x, y)| x.abs_diff(*y) as u64)
        .sum();
    let mean = total as f64 / a.as_raw().len() as f64;
    clamp_score(100.0 * (1.0 - mean / 255.0))
}

/// 256-bin histograms of R, G and B, concatenated
fn rgb_histogram(img: &RgbaImage) -> Vec<f64> {
    let mut hist = vec![0f64; 768];
    for px in img.pixels() {
        hist[px.0[0] as usize] += 1.0;
        hist[256 + px.0[1] as usize] += 1.0;
        hist[512 + px.0[2] as usize] += 1.0;
    }
    hist
}

/// 100 * Pearson correlation of the per-channel intensity histograms
fn histogram_score(a: &RgbaImage, b: &RgbaImage) -> f64 {
    let ha = rgb_histogram(a);
    let hb = rgb_histogram(b);
    if ha == hb {
        return 100.0;
    }

    let n = ha.len() as f64;
    let mean_a = ha.iter().sum::<f64>() / n;
    let mean_b = hb.iter().sum::<f64>() / n;

    let mut cov = 0.0;
    let mut var_a = 0.0;
    let mut var_b = 0.0;
    for (x, y) in ha.iter().zip(hb.iter()) {
        let da = x - mean_a;
        let db = y - mean_b;
        cov += da * db;
        var_a += da * da;
        var_b += db * db;
    }

    let denom = (var_a * var_b).sqrt();
    if denom == 0.0 {
        // Flat histograms that are not equal carry no correlation
        return 0.0;
    }
    clamp_score(cov / denom * 100.0)
}

fn luminance(img: &RgbaImage) -> Vec<f64> {
    img.pixels()
        .map(|p| 0.299 * p.0[0] as f64 + 0.587 * p.0[1] as f64 + 0.114 * p.0[2] as f64)
        .collect()
}

/// Mean SSIM over a sliding window of luminance
fn structural_score(a: &RgbaImage, b: &RgbaImage, window: u32, stride: u32) -> f64 {
    let (width, height) = a.dimensions();
    let la = luminance(a);
    let lb = luminance(b);

    let win_w = window.min(width) as usize;
    let win_h = window.min(height) as usize;
    let width = width as usize;
    let height = height as usize;
    let stride = stride as usize;
    let samples = (win_w * win_h) as f64;

    let mut total = 0.0;
    let mut windows = 0usize;

    for top in (0..=height - win_h).step_by(stride) {
        for left in (0..=width - win_w).step_by(stride) {
            let (mut sum_a, mut sum_b) = (0.0, 0.0);
            for row in top..top + win_h {
                let base = row * width;
                for i in base + left..base + left + win_w {
                    sum_a += la[i];
                    sum_b += lb[i];
                }
            }
            let mu_a = sum_a / samples;
            let mu_b = sum_b / samples;

            let (mut var_a, mut var_b, mut cov) = (0.0, 0.0, 0.0);
            for row in top..top + win_h {
                let base = row * width;
                for i in base + left..base + left + win_w {
                    let da = la[i] - mu_a;
                    let db = lb[i] - mu_b;
                    var_a += da * da;
                    var_b += db * db;
                    cov += da * db;
                }
            }
            var_a /= samples;
            var_b /= samples;
            cov /= samples;

            let ssim = ((2.0 * mu_a * mu_b + SSIM_C1) * (2.0 * cov + SSIM_C2))
                / ((mu_a * mu_a + mu_b * mu_b + SSIM_C1) * (var_a + var_b + SSIM_C2));
            total += ssim;
            windows += 1;
        }
    }

    if windows == 0 {
        return 0.0;
    }
    clamp_score(total / windows as f64 * 100.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    fn gradient(width: u32, height: u32, shift: u8) -> RgbaImage {
        RgbaImage::from_fn(width, height, |x, y| {
            Rgba([
                (x as u8).wrapping_mul(7).wrapping_add(shift),
                (y as u8).wrapping_mul(5),
                ((x + y) as u8).wrapping_mul(3),
                255,
            ])
        })
    }

    fn solid(width: u32, height: u32, value: u8) -> RgbaImage {
        RgbaImage::from_pixel(width, height, Rgba([value, value, value, 255]))
    }

    #[test]
    fn test_identical_images_score_exactly_100() {
        let engine = SimilarityEngine::default();
        let img = gradient(40, 30, 0);
        let scores = engine.compare(&img, &img.clone()).unwrap();
        assert_eq!(scores.composite, 100.0);
        assert!(!scores.dimension_mismatch);
    }

    #[test]
    fn test_pixel_and_histogram_are_symmetric() {
        let engine = SimilarityEngine::default();
        let a = gradient(32, 24, 0);
        let b = gradient(32, 24, 40);
        let ab = engine.compare(&a, &b).unwrap();
        let ba = engine.compare(&b, &a).unwrap();
        assert_eq!(ab.pixel, ba.pixel);
        assert_eq!(ab.histogram, ba.histogram);
    }

    #[test_case(solid(16, 16, 0), solid(16, 16, 255) ; "black vs white")]
    #[test_case(gradient(20, 20, 0), gradient(20, 20, 128) ; "shifted gradient")]
    #[test_case(solid(10, 10, 30), gradient(25, 7, 3) ; "padded")]
    fn test_scores_are_bounded(a: RgbaImage, b: RgbaImage) {
        let scores = SimilarityEngine::default().compare(&a, &b).unwrap();
        for s in [scores.pixel, scores.histogram, scores.structural, scores.composite] {
            assert!((0.0..=100.0).contains(&s), "score out of range: {}", s);
        }
    }

    #[test]
    fn test_black_vs_white_scores_low() {
        let scores = SimilarityEngine::default()
            .compare(&solid(16, 16, 0), &solid(16, 16, 255))
            .unwrap();
        // RGB channels differ fully, alpha matches
        assert!((scores.pixel - 25.0).abs() < 1e-9);
        assert_eq!(scores.histogram, 0.0);
        assert!(scores.composite < 50.0);
    }

    #[test]
    fn test_dimension_mismatch_is_padded_and_flagged() {
        let engine = SimilarityEngine::default();
        let small = solid(10, 10, 200);
        let large = solid(20, 12, 200);
        let scores = engine.compare(&small, &large).unwrap();
        assert!(scores.dimension_mismatch);
        assert!(scores.composite < 100.0);

        let diff = engine.diff(&small, &large).unwrap();
        assert_eq!(diff.image.dimensions(), (20, 12));
        // Padded area differs from the opaque grey of the larger image
        assert_eq!(diff.highlighted_pixels, 20 * 12 - 10 * 10);
    }

    #[test]
    fn test_diff_of_identical_has_no_highlights() {
        let img = gradient(30, 30, 9);
        let diff = SimilarityEngine::default().diff(&img, &img).unwrap();
        assert_eq!(diff.highlighted_pixels, 0);
        assert!(diff.image.pixels().all(|p| *p != HIGHLIGHT));
    }

    #[test]
    fn test_diff_respects_tolerance() {
        let a = solid(4, 4, 100);
        let mut b = solid(4, 4, 100);
        b.put_pixel(0, 0, Rgba([104, 100, 100, 255]));
        b.put_pixel(1, 1, Rgba([120, 100, 100, 255]));
        let diff = SimilarityEngine::default().diff(&a, &b).unwrap();
        assert_eq!(diff.highlighted_pixels, 1);
        assert_eq!(*diff.image.get_pixel(1, 1), HIGHLIGHT);
    }

    #[test]
    fn test_zero_area_is_invalid() {
        let engine = SimilarityEngine::default();
        let empty = RgbaImage::new(0, 5);
        let ok = solid(5, 5, 1);
        assert!(matches!(engine.compare(&empty, &ok), Err(Error::InvalidImage(_))));
        assert!(matches!(engine.diff(&ok, &empty), Err(Error::InvalidImage(_))));
    }

    #[test]
    fn test_garbage_bytes_are_invalid() {
        assert!(matches!(decode(b"not a png"), Err(Error::InvalidImage(_))));
    }

    #[test]
    fn test_png_roundtrip_scores_100() {
        let engine = SimilarityEngine::default();
        let img = gradient(12, 9, 1);
        let png = encode_png(&img).unwrap();
        let scores = engine.compare_bytes(&png, &png).unwrap();
        assert_eq!(scores.composite, 100.0);
    }

    #[test]
    fn test_weights_are_configuration() {
        let engine = SimilarityEngine::new(SimilarityConfig {
            pixel_weight: 1.0,
            histogram_weight: 0.0,
            structural_weight: 0.0,
            ..SimilarityConfig::default()
        })
        .unwrap();
        let scores = engine.compare(&solid(8, 8, 0), &solid(8, 8, 51)).unwrap();
        assert!((scores.composite - scores.pixel).abs() < 1e-9);
        // mean difference 51 * 3 / 4 over RGBA
        assert!((scores.pixel - 85.0).abs() < 1e-9);
    }

    #[test]
    fn test_rejects_negative_weights() {
        let config = SimilarityConfig {
            pixel_weight: -1.0,
            ..SimilarityConfig::default()
        };
        assert!(SimilarityEngine::new(config).is_err());
    }
}
