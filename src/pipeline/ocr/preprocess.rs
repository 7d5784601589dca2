//! Image preprocessing for the OCR passes.
//!
//! Each step is a pure image-to-image transform on grayscale. Steps that
//! cannot apply to a given image return an error; [`prepare`] logs it and
//! carries on with the image from the previous step, so a pass only fails
//! when the source image itself cannot be decoded.

use std::io::Cursor;

use image::imageops::FilterType;
use image::{DynamicImage, GrayImage, ImageFormat, ImageOutputFormat, Luma};
use tracing::{debug, warn};

use super::OcrError;
use crate::config::PassSettings;

/// Maximum input image size (in bytes) before rejecting.
/// Prevents OOM on corrupt/adversarial files.
const MAX_IMAGE_BYTES: usize = 50 * 1024 * 1024; // 50 MB

/// Minimum valid image size in bytes (smallest valid PNG is ~67 bytes).
const MIN_IMAGE_BYTES: usize = 67;

/// Pixels darker than this count as ink when locating the content region.
const INK_THRESHOLD: u8 = 160;

/// A content region narrower or shorter than this is treated as noise.
const MIN_CONTENT_SIDE: u32 = 8;

/// Fraction of pixels ignored at each end of the histogram by autocontrast.
const AUTOCONTRAST_CUTOFF: f32 = 0.005;

/// Light sharpening kernel (center-weighted, sums to 16).
const SHARPEN_KERNEL: [f32; 9] = [-2.0, -2.0, -2.0, -2.0, 32.0, -2.0, -2.0, -2.0, -2.0];

/// One preprocessing step. Passes are defined as ordered step lists.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PreprocessStep {
    CropToContent,
    Autocontrast,
    Sharpen,
    BoundedResize,
    Upscale,
    Binarize,
}

impl PreprocessStep {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::CropToContent => "crop_to_content",
            Self::Autocontrast => "autocontrast",
            Self::Sharpen => "sharpen",
            Self::BoundedResize => "bounded_resize",
            Self::Upscale => "upscale",
            Self::Binarize => "binarize",
        }
    }

    fn apply(&self, img: &GrayImage, settings: &PassSettings) -> Result<GrayImage, OcrError> {
        match self {
            Self::CropToContent => crop_to_content(img, settings.crop_margin_px),
            Self::Autocontrast => autocontrast(img),
            Self::Sharpen => sharpen(img),
            Self::BoundedResize => Ok(bounded_resize(img, settings.max_side)),
            Self::Upscale => Ok(upscale(img, settings.upscale_factor, settings.max_upscaled_side)),
            Self::Binarize => binarize(img, settings.binarize_threshold),
        }
    }
}

/// Run `steps` in order on a grayscale copy of `image`.
/// A failing step is skipped and the previous image kept.
pub fn prepare(image: &DynamicImage, steps: &[PreprocessStep], settings: &PassSettings) -> GrayImage {
    let mut current = image.to_luma8();
    for step in steps {
        match step.apply(&current, settings) {
            Ok(next) => {
                debug!(
                    step = step.as_str(),
                    width = next.width(),
                    height = next.height(),
                    "Preprocessing step applied"
                );
                current = next;
            }
            Err(e) => {
                warn!(step = step.as_str(), error = %e, "Preprocessing step skipped");
            }
        }
    }
    current
}

// ═══════════════════════════════════════════════════════════
// Decoding
// ═══════════════════════════════════════════════════════════

/// Validate image bytes before decoding.
pub fn validate_image_bytes(bytes: &[u8]) -> Result<(), OcrError> {
    if bytes.len() < MIN_IMAGE_BYTES {
        return Err(OcrError::ImageDecode(
            "Image data too small to be valid".into(),
        ));
    }
    if bytes.len() > MAX_IMAGE_BYTES {
        return Err(OcrError::ImageDecode(format!(
            "Image data exceeds {}MB limit",
            MAX_IMAGE_BYTES / (1024 * 1024)
        )));
    }
    Ok(())
}

/// Decode a JPEG, PNG, WebP or TIFF payload and fix its EXIF orientation.
pub fn load_image(bytes: &[u8]) -> Result<DynamicImage, OcrError> {
    validate_image_bytes(bytes)?;

    let format = image::guess_format(bytes)
        .map_err(|e| OcrError::ImageDecode(format!("Unknown image format: {e}")))?;
    if !matches!(
        format,
        ImageFormat::Png | ImageFormat::Jpeg | ImageFormat::WebP | ImageFormat::Tiff
    ) {
        return Err(OcrError::ImageDecode(format!(
            "Unsupported image format: {format:?}"
        )));
    }

    let img = image::load_from_memory_with_format(bytes, format)
        .map_err(|e| OcrError::ImageDecode(format!("Failed to decode image: {e}")))?;

    Ok(apply_orientation(img, read_exif_orientation(bytes)))
}

/// Read EXIF orientation tag from raw image bytes.
/// Returns 1 (normal) if no EXIF data or tag not present.
pub fn read_exif_orientation(bytes: &[u8]) -> u32 {
    let mut cursor = Cursor::new(bytes);
    let reader = match exif::Reader::new().read_from_container(&mut cursor) {
        Ok(r) => r,
        Err(_) => return 1,
    };

    reader
        .get_field(exif::Tag::Orientation, exif::In::PRIMARY)
        .and_then(|f| f.value.get_uint(0))
        .unwrap_or(1)
}

/// Apply EXIF orientation transform to a `DynamicImage`.
///
/// 1 = Normal, 2 = Mirrored, 3 = 180deg, 4 = Flipped V,
/// 5 = Mirrored + 90deg CW, 6 = 90deg CW, 7 = Mirrored + 270deg CW, 8 = 270deg CW
pub fn apply_orientation(img: DynamicImage, orientation: u32) -> DynamicImage {
    match orientation {
        1 => img,
        2 => img.fliph(),
        3 => img.rotate180(),
        4 => img.flipv(),
        5 => img.rotate90().fliph(),
        6 => img.rotate90(),
        7 => img.rotate270().fliph(),
        8 => img.rotate270(),
        _ => img,
    }
}

/// Encode a grayscale image as PNG bytes for the OCR engine.
pub fn encode_png(img: &GrayImage) -> Result<Vec<u8>, OcrError> {
    let dynamic = DynamicImage::ImageLuma8(img.clone());
    let mut cursor = Cursor::new(Vec::new());
    dynamic
        .write_to(&mut cursor, ImageOutputFormat::Png)
        .map_err(|e| OcrError::ImageProcessing(format!("PNG encoding failed: {e}")))?;
    Ok(cursor.into_inner())
}

// ═══════════════════════════════════════════════════════════
// Steps
// ═══════════════════════════════════════════════════════════

/// Crop to the bounding box of ink pixels plus `margin`.
///
/// Scanned pages often carry wide blank borders; photographed ones carry
/// table edges or fingers. Errors when no plausible content region exists.
pub fn crop_to_content(img: &GrayImage, margin: u32) -> Result<GrayImage, OcrError> {
    let (w, h) = img.dimensions();
    let mut min_x = u32::MAX;
    let mut min_y = u32::MAX;
    let mut max_x = 0u32;
    let mut max_y = 0u32;
    let mut found = false;

    for (x, y, p) in img.enumerate_pixels() {
        if p.0[0] < INK_THRESHOLD {
            found = true;
            min_x = min_x.min(x);
            min_y = min_y.min(y);
            max_x = max_x.max(x);
            max_y = max_y.max(y);
        }
    }

    if !found {
        return Err(OcrError::ImageProcessing("No content region found".into()));
    }

    let x0 = min_x.saturating_sub(margin);
    let y0 = min_y.saturating_sub(margin);
    let x1 = (max_x + margin + 1).min(w);
    let y1 = (max_y + margin + 1).min(h);
    let (cw, ch) = (x1 - x0, y1 - y0);

    if cw < MIN_CONTENT_SIDE || ch < MIN_CONTENT_SIDE {
        return Err(OcrError::ImageProcessing(format!(
            "Content region too small ({cw}x{ch})"
        )));
    }

    Ok(image::imageops::crop_imm(img, x0, y0, cw, ch).to_image())
}

/// Stretch the luminance histogram to the full 0-255 range.
pub fn autocontrast(img: &GrayImage) -> Result<GrayImage, OcrError> {
    let total = (img.width() as usize) * (img.height() as usize);
    if total == 0 {
        return Err(OcrError::ImageProcessing("Empty image".into()));
    }

    let mut histogram = [0usize; 256];
    for p in img.pixels() {
        histogram[p.0[0] as usize] += 1;
    }

    let cutoff = (total as f32 * AUTOCONTRAST_CUTOFF) as usize;
    let lo = histogram_bound(histogram.iter().enumerate(), cutoff);
    let hi = histogram_bound(histogram.iter().enumerate().rev(), cutoff);

    if hi <= lo + 1 {
        return Err(OcrError::ImageProcessing("Flat histogram, nothing to stretch".into()));
    }

    let scale = 255.0 / (hi - lo) as f32;
    let mut out = img.clone();
    for p in out.pixels_mut() {
        let v = (p.0[0] as f32 - lo as f32) * scale;
        p.0[0] = v.round().clamp(0.0, 255.0) as u8;
    }
    Ok(out)
}

/// First gray level at which the cumulative count exceeds `cutoff`.
fn histogram_bound<'a>(bins: impl Iterator<Item = (usize, &'a usize)>, cutoff: usize) -> u8 {
    let mut seen = 0usize;
    let mut last = 0usize;
    for (level, &count) in bins {
        last = level;
        seen += count;
        if seen > cutoff {
            return level as u8;
        }
    }
    last as u8
}

/// Light 3x3 sharpening with clamped edges.
pub fn sharpen(img: &GrayImage) -> Result<GrayImage, OcrError> {
    let (w, h) = img.dimensions();
    if w < 3 || h < 3 {
        return Err(OcrError::ImageProcessing(format!(
            "Image too small to sharpen ({w}x{h})"
        )));
    }

    let norm: f32 = SHARPEN_KERNEL.iter().sum();
    let mut out = GrayImage::new(w, h);
    for y in 0..h {
        for x in 0..w {
            let mut acc = 0.0f32;
            for ky in 0..3u32 {
                for kx in 0..3u32 {
                    let sx = (x + kx).saturating_sub(1).min(w - 1);
                    let sy = (y + ky).saturating_sub(1).min(h - 1);
                    acc += img.get_pixel(sx, sy).0[0] as f32
                        * SHARPEN_KERNEL[(ky * 3 + kx) as usize];
                }
            }
            out.put_pixel(x, y, Luma([(acc / norm).round().clamp(0.0, 255.0) as u8]));
        }
    }
    Ok(out)
}

/// Downscale so the longest side is at most `max_side`. Never upscales.
pub fn bounded_resize(img: &GrayImage, max_side: u32) -> GrayImage {
    let (w, h) = img.dimensions();
    let largest = w.max(h);
    if largest <= max_side || largest == 0 {
        return img.clone();
    }

    let scale = max_side as f32 / largest as f32;
    let new_w = ((w as f32 * scale).round() as u32).max(1);
    let new_h = ((h as f32 * scale).round() as u32).max(1);
    image::imageops::resize(img, new_w, new_h, FilterType::CatmullRom)
}

/// Upscale by `factor`, capped so the longest side stays within `max_side`.
pub fn upscale(img: &GrayImage, factor: f32, max_side: u32) -> GrayImage {
    let (w, h) = img.dimensions();
    let largest = w.max(h);
    if largest == 0 || factor <= 1.0 {
        return img.clone();
    }

    let scale = factor.min(max_side as f32 / largest as f32);
    if scale <= 1.0 {
        return img.clone();
    }

    let new_w = (w as f32 * scale).round() as u32;
    let new_h = (h as f32 * scale).round() as u32;
    image::imageops::resize(img, new_w, new_h, FilterType::CatmullRom)
}

/// Hard black/white conversion with a single global threshold.
/// `None` picks the threshold with Otsu's method.
pub fn binarize(img: &GrayImage, threshold: Option<u8>) -> Result<GrayImage, OcrError> {
    if img.width() == 0 || img.height() == 0 {
        return Err(OcrError::ImageProcessing("Empty image".into()));
    }

    let t = threshold.unwrap_or_else(|| otsu_threshold(img));
    let mut out = img.clone();
    for p in out.pixels_mut() {
        p.0[0] = if p.0[0] > t { 255 } else { 0 };
    }
    Ok(out)
}

/// Otsu's global threshold: maximizes between-class variance.
pub fn otsu_threshold(img: &GrayImage) -> u8 {
    let mut histogram = [0u64; 256];
    for p in img.pixels() {
        histogram[p.0[0] as usize] += 1;
    }

    let total: u64 = histogram.iter().sum();
    if total == 0 {
        return 127;
    }

    let sum_all: f64 = histogram
        .iter()
        .enumerate()
        .map(|(i, &c)| i as f64 * c as f64)
        .sum();

    let mut sum_bg = 0.0f64;
    let mut weight_bg = 0u64;
    let mut best_t = 0u8;
    let mut best_var = -1.0f64;

    for (t, &count) in histogram.iter().enumerate() {
        weight_bg += count;
        if weight_bg == 0 {
            continue;
        }
        let weight_fg = total - weight_bg;
        if weight_fg == 0 {
            break;
        }
        sum_bg += t as f64 * count as f64;
        let mean_bg = sum_bg / weight_bg as f64;
        let mean_fg = (sum_all - sum_bg) / weight_fg as f64;
        let between = weight_bg as f64 * weight_fg as f64 * (mean_bg - mean_fg).powi(2);
        if between > best_var {
            best_var = between;
            best_t = t as u8;
        }
    }

    best_t
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{GenericImageView, Rgb, RgbImage};

    /// White page with one dark block of "text".
    fn page_with_block(w: u32, h: u32, block: (u32, u32, u32, u32)) -> GrayImage {
        let (bx, by, bw, bh) = block;
        GrayImage::from_fn(w, h, |x, y| {
            if x >= bx && x < bx + bw && y >= by && y < by + bh {
                Luma([20])
            } else {
                Luma([245])
            }
        })
    }

    fn png_bytes(img: &RgbImage) -> Vec<u8> {
        let mut cursor = Cursor::new(Vec::new());
        DynamicImage::ImageRgb8(img.clone())
            .write_to(&mut cursor, ImageOutputFormat::Png)
            .unwrap();
        cursor.into_inner()
    }

    // ── decoding ──

    #[test]
    fn zero_bytes_rejected() {
        assert!(matches!(load_image(&[]), Err(OcrError::ImageDecode(_))));
    }

    #[test]
    fn garbage_bytes_rejected() {
        let garbage = vec![0xAB; 4096];
        assert!(matches!(load_image(&garbage), Err(OcrError::ImageDecode(_))));
    }

    #[test]
    fn unsupported_format_rejected() {
        let mut bmp = b"BM".to_vec();
        bmp.extend(std::iter::repeat(0u8).take(200));
        assert!(matches!(load_image(&bmp), Err(OcrError::ImageDecode(_))));
    }

    #[test]
    fn png_decodes() {
        let bytes = png_bytes(&RgbImage::from_pixel(40, 30, Rgb([200, 200, 200])));
        let img = load_image(&bytes).unwrap();
        assert_eq!((img.width(), img.height()), (40, 30));
    }

    #[test]
    fn exif_no_data_returns_identity() {
        let bytes = png_bytes(&RgbImage::from_pixel(10, 10, Rgb([128, 128, 128])));
        assert_eq!(read_exif_orientation(&bytes), 1);
    }

    #[test]
    fn apply_orientation_rotate90_swaps_dimensions() {
        let img = DynamicImage::ImageRgb8(RgbImage::from_pixel(10, 20, Rgb([100, 100, 100])));
        let result = apply_orientation(img, 6);
        assert_eq!((result.width(), result.height()), (20, 10));
    }

    #[test]
    fn apply_orientation_unknown_is_identity() {
        let img = DynamicImage::ImageRgb8(RgbImage::from_pixel(10, 20, Rgb([100, 100, 100])));
        let result = apply_orientation(img, 99);
        assert_eq!((result.width(), result.height()), (10, 20));
    }

    #[test]
    fn encode_png_round_trips_dimensions() {
        let img = page_with_block(50, 40, (10, 10, 5, 5));
        let bytes = encode_png(&img).unwrap();
        let back = image::load_from_memory(&bytes).unwrap();
        assert_eq!((back.width(), back.height()), (50, 40));
    }

    // ── crop ──

    #[test]
    fn crop_keeps_block_plus_margin() {
        let img = page_with_block(400, 300, (100, 80, 50, 20));
        let cropped = crop_to_content(&img, 10).unwrap();
        assert_eq!(cropped.dimensions(), (70, 40));
    }

    #[test]
    fn crop_margin_clamped_at_edges() {
        let img = page_with_block(100, 100, (0, 0, 20, 20));
        let cropped = crop_to_content(&img, 30).unwrap();
        assert_eq!(cropped.dimensions(), (50, 50));
    }

    #[test]
    fn crop_blank_page_errors() {
        let img = GrayImage::from_pixel(100, 100, Luma([250]));
        assert!(crop_to_content(&img, 10).is_err());
    }

    #[test]
    fn crop_speck_errors() {
        let img = page_with_block(100, 100, (50, 50, 1, 1));
        assert!(crop_to_content(&img, 2).is_err());
    }

    // ── contrast / sharpen ──

    #[test]
    fn autocontrast_stretches_range() {
        let img = GrayImage::from_fn(100, 10, |x, _| Luma([if x < 50 { 100 } else { 150 }]));
        let out = autocontrast(&img).unwrap();
        assert_eq!(out.get_pixel(0, 0).0[0], 0);
        assert_eq!(out.get_pixel(99, 0).0[0], 255);
    }

    #[test]
    fn autocontrast_flat_image_errors() {
        let img = GrayImage::from_pixel(20, 20, Luma([128]));
        assert!(autocontrast(&img).is_err());
    }

    #[test]
    fn sharpen_keeps_flat_regions() {
        let img = GrayImage::from_pixel(10, 10, Luma([128]));
        let out = sharpen(&img).unwrap();
        assert!(out.pixels().all(|p| p.0[0] == 128));
    }

    #[test]
    fn sharpen_increases_edge_contrast() {
        let img = GrayImage::from_fn(10, 10, |x, _| Luma([if x < 5 { 100 } else { 150 }]));
        let out = sharpen(&img).unwrap();
        assert!(out.get_pixel(4, 5).0[0] < 100);
        assert!(out.get_pixel(5, 5).0[0] > 150);
    }

    #[test]
    fn sharpen_tiny_image_errors() {
        let img = GrayImage::from_pixel(2, 2, Luma([128]));
        assert!(sharpen(&img).is_err());
    }

    // ── resize ──

    #[test]
    fn bounded_resize_caps_longest_side() {
        let img = GrayImage::from_pixel(2800, 1400, Luma([200]));
        let out = bounded_resize(&img, 1400);
        assert_eq!(out.dimensions(), (1400, 700));
    }

    #[test]
    fn bounded_resize_never_upscales() {
        let img = GrayImage::from_pixel(300, 200, Luma([200]));
        assert_eq!(bounded_resize(&img, 1400).dimensions(), (300, 200));
    }

    #[test]
    fn upscale_respects_cap() {
        let img = GrayImage::from_pixel(1000, 500, Luma([200]));
        assert_eq!(upscale(&img, 1.5, 4000).dimensions(), (1500, 750));
        assert_eq!(upscale(&img, 1.5, 1200).dimensions(), (1200, 600));
        assert_eq!(upscale(&img, 1.5, 800).dimensions(), (1000, 500));
    }

    // ── binarization ──

    #[test]
    fn otsu_splits_bimodal_histogram() {
        let img = GrayImage::from_fn(100, 10, |x, _| Luma([if x < 30 { 40 } else { 210 }]));
        let t = otsu_threshold(&img);
        assert!((40..210).contains(&t), "threshold {t} should separate the modes");
    }

    #[test]
    fn binarize_outputs_only_black_and_white() {
        let img = GrayImage::from_fn(64, 64, |x, y| Luma([((x * 3 + y) % 256) as u8]));
        let out = binarize(&img, None).unwrap();
        assert!(out.pixels().all(|p| p.0[0] == 0 || p.0[0] == 255));
    }

    #[test]
    fn binarize_fixed_threshold() {
        let img = GrayImage::from_fn(2, 1, |x, _| Luma([if x == 0 { 100 } else { 101 }]));
        let out = binarize(&img, Some(100)).unwrap();
        assert_eq!(out.get_pixel(0, 0).0[0], 0);
        assert_eq!(out.get_pixel(1, 0).0[0], 255);
    }

    // ── composed ──

    #[test]
    fn prepare_skips_failing_steps() {
        let flat = DynamicImage::ImageLuma8(GrayImage::from_pixel(200, 100, Luma([250])));
        let settings = PassSettings::default();
        let out = prepare(
            &flat,
            &[PreprocessStep::CropToContent, PreprocessStep::Autocontrast, PreprocessStep::Sharpen],
            &settings,
        );
        // crop and autocontrast fail on a blank page; the image survives untouched
        assert_eq!(out.dimensions(), (200, 100));
    }

    #[test]
    fn prepare_applies_steps_in_order() {
        let page = DynamicImage::ImageLuma8(page_with_block(3000, 2000, (500, 500, 1000, 400)));
        let settings = PassSettings {
            crop_margin_px: 0,
            max_side: 500,
            ..PassSettings::default()
        };
        let out = prepare(
            &page,
            &[PreprocessStep::CropToContent, PreprocessStep::BoundedResize],
            &settings,
        );
        assert_eq!(out.dimensions(), (500, 200));
    }
}
