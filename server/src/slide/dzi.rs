//! Deep-zoom pyramid math and region decoding
//!
//! Deep-zoom convention: level 0 is 1x1, the top level is full resolution,
//! each level doubles the previous one. The slide's native pyramid rarely
//! lines up with that, so a tile read picks the best native level at or
//! above the requested scale, reads a proportionally larger region, and
//! downsamples to the target tile size.

use std::time::Instant;

use image::codecs::jpeg::JpegEncoder;
use image::{ImageEncoder, RgbaImage};
use metrics::histogram;
use openslide_rs::{Address, OpenSlide, Region, Size};
use tracing::debug;

use super::types::{SlideError, SlideMetadata};

/// Number of deep-zoom levels for the given full-resolution dimensions
pub fn dzi_levels(width: u64, height: u64) -> u32 {
    if width == 0 || height == 0 {
        return 1;
    }
    let max_dim = width.max(height);
    (max_dim as f64).log2().ceil() as u32 + 1
}

/// The DZI XML descriptor for a slide
pub fn dzi_xml(meta: &SlideMetadata) -> String {
    format!(
        r#"<?xml version="1.0" encoding="UTF-8"?>
<Image xmlns="http://schemas.microsoft.com/deepzoom/2008"
       Format="jpeg"
       Overlap="0"
       TileSize="{}">
    <Size Width="{}" Height="{}"/>
</Image>"#,
        meta.tile_size, meta.width, meta.height
    )
}

/// Placement of one deep-zoom tile, independent of the native pyramid
#[derive(Debug, PartialEq)]
pub struct TileGeometry {
    /// Downsample factor of this deep-zoom level relative to full resolution
    pub scale: f64,
    /// Tile origin in full-resolution coordinates
    pub x_level0: u32,
    pub y_level0: u32,
    /// Final tile dimensions (smaller than tile_size at the edges)
    pub target_w: u32,
    pub target_h: u32,
}

/// Validate tile coordinates against the descriptor and compute placement
pub fn tile_geometry(
    meta: &SlideMetadata,
    level: u32,
    x: u32,
    y: u32,
) -> Result<TileGeometry, SlideError> {
    let max_level = meta.num_levels.saturating_sub(1);
    if level > max_level {
        return Err(SlideError::InvalidLevel(level));
    }

    let scale = 2.0_f64.powi((max_level - level) as i32);
    let level_w = (meta.width as f64 / scale).ceil() as u64;
    let level_h = (meta.height as f64 / scale).ceil() as u64;

    // Coordinates come straight off the URL; widen before multiplying so a
    // huge x or y cannot wrap around the bounds check
    let tile_x_start = x as u64 * meta.tile_size as u64;
    let tile_y_start = y as u64 * meta.tile_size as u64;
    if tile_x_start >= level_w || tile_y_start >= level_h {
        return Err(SlideError::InvalidTileCoordinates { level, x, y });
    }

    Ok(TileGeometry {
        scale,
        x_level0: (tile_x_start as f64 * scale) as u32,
        y_level0: (tile_y_start as f64 * scale) as u32,
        target_w: (meta.tile_size as u64).min(level_w - tile_x_start) as u32,
        target_h: (meta.tile_size as u64).min(level_h - tile_y_start) as u32,
    })
}

/// Best native pyramid level for a target downsample: the level with the
/// largest downsample not exceeding the target.
fn best_native_level(slide: &OpenSlide, target_downsample: f64) -> (u32, f64) {
    let level_count = slide.get_level_count().unwrap_or(1);
    let mut best_level = 0u32;
    let mut best_downsample = 1.0f64;
    for level in 0..level_count {
        let downsample = slide.get_level_downsample(level).unwrap_or(1.0);
        if downsample <= target_downsample && downsample >= best_downsample {
            best_level = level;
            best_downsample = downsample;
        }
    }
    (best_level, best_downsample)
}

/// Read one deep-zoom tile and encode it as JPEG
pub fn read_tile_jpeg(
    slide: &OpenSlide,
    meta: &SlideMetadata,
    level: u32,
    x: u32,
    y: u32,
    quality: u8,
) -> Result<Vec<u8>, SlideError> {
    let geometry = tile_geometry(meta, level, x, y)?;
    let (native_level, native_downsample) = best_native_level(slide, geometry.scale);

    // How much native pixels map onto one target pixel
    let residual_scale = geometry.scale / native_downsample;
    let read_w = (geometry.target_w as f64 * residual_scale).ceil() as u32;
    let read_h = (geometry.target_h as f64 * residual_scale).ceil() as u32;

    debug!(
        "Tile read: level={} x={} y={} -> native_level={} read={}x{} target={}x{}",
        level, x, y, native_level, read_w, read_h, geometry.target_w, geometry.target_h
    );

    let read_start = Instant::now();
    let region = Region {
        address: Address {
            x: geometry.x_level0,
            y: geometry.y_level0,
        },
        level: native_level,
        size: Size {
            w: read_w,
            h: read_h,
        },
    };
    let rgba: RgbaImage = slide.read_image_rgba(&region).map_err(|e| {
        SlideError::TileError(format!(
            "failed to read region at level {} ({},{}): {}",
            level, x, y, e
        ))
    })?;
    histogram!("wsibrowse_tile_phase_duration_seconds", "phase" => "read")
        .record(read_start.elapsed());

    let final_image = if residual_scale > 1.001 {
        let resize_start = Instant::now();
        let resized = image::imageops::resize(
            &rgba,
            geometry.target_w,
            geometry.target_h,
            image::imageops::FilterType::Lanczos3,
        );
        histogram!("wsibrowse_tile_phase_duration_seconds", "phase" => "resize")
            .record(resize_start.elapsed());
        resized
    } else {
        rgba
    };

    let encode_start = Instant::now();
    let encoded = encode_jpeg(&final_image, quality);
    histogram!("wsibrowse_tile_phase_duration_seconds", "phase" => "encode")
        .record(encode_start.elapsed());
    encoded
}

/// Associated images tried as thumbnail sources, in preference order
const ASSOCIATED_THUMB_SOURCES: &[&str] = &["thumbnail", "macro", "label"];

/// Read one embedded associated image and encode it as JPEG
pub fn read_associated_jpeg(
    slide: &OpenSlide,
    name: &str,
    quality: u8,
) -> Result<Vec<u8>, SlideError> {
    let rgba = slide.read_associated_image_rgba(name).map_err(|e| {
        SlideError::TileError(format!("failed to read associated image {}: {}", name, e))
    })?;
    encode_jpeg(&rgba, quality)
}

/// Produce a thumbnail, preferring an embedded associated image when one of
/// the usual names exists, falling back to downsampling the lowest pyramid
/// level.
pub fn read_thumbnail_jpeg(
    slide: &OpenSlide,
    max_px: u32,
    quality: u8,
    prefer_associated: bool,
) -> Result<Vec<u8>, SlideError> {
    if prefer_associated
        && let Ok(names) = slide.get_associated_image_names()
    {
        for name in ASSOCIATED_THUMB_SOURCES {
            if names.iter().any(|n| n == name)
                && let Ok(rgba) = slide.read_associated_image_rgba(name)
            {
                return encode_jpeg(&fit_to_box(&rgba, max_px), quality);
            }
        }
    }

    let full = slide
        .get_level_dimensions(0)
        .map_err(|e| SlideError::OpenError(format!("failed to read dimensions: {}", e)))?;
    let max_dim = full.w.max(full.h).max(1);
    let target_downsample = (max_dim as f64 / max_px as f64).max(1.0);

    let (native_level, _) = best_native_level(slide, target_downsample);
    let level_size = slide
        .get_level_dimensions(native_level)
        .map_err(|e| SlideError::OpenError(format!("failed to read level dimensions: {}", e)))?;

    let region = Region {
        address: Address { x: 0, y: 0 },
        level: native_level,
        size: Size {
            w: level_size.w,
            h: level_size.h,
        },
    };
    let rgba: RgbaImage = slide
        .read_image_rgba(&region)
        .map_err(|e| SlideError::TileError(format!("failed to read thumbnail source: {}", e)))?;

    encode_jpeg(&fit_to_box(&rgba, max_px), quality)
}

/// Shrink into a square bounding box, preserving aspect ratio. Images
/// already inside the box pass through unscaled.
fn fit_to_box(rgba: &RgbaImage, max_px: u32) -> RgbaImage {
    let (w, h) = (rgba.width().max(1), rgba.height().max(1));
    let scale = (max_px as f64 / w.max(h) as f64).min(1.0);
    let thumb_w = ((w as f64 * scale).round() as u32).max(1);
    let thumb_h = ((h as f64 * scale).round() as u32).max(1);
    if thumb_w == rgba.width() && thumb_h == rgba.height() {
        return rgba.clone();
    }
    image::imageops::resize(rgba, thumb_w, thumb_h, image::imageops::FilterType::Lanczos3)
}

/// Encode an RGBA image as JPEG (alpha dropped)
fn encode_jpeg(rgba: &RgbaImage, quality: u8) -> Result<Vec<u8>, SlideError> {
    let rgb = image::DynamicImage::ImageRgba8(rgba.clone()).into_rgb8();

    let mut buffer = Vec::new();
    let encoder = JpegEncoder::new_with_quality(&mut buffer, quality);
    encoder
        .write_image(
            rgb.as_raw(),
            rgb.width(),
            rgb.height(),
            image::ExtendedColorType::Rgb8,
        )
        .map_err(|e| SlideError::TileError(format!("JPEG encoding failed: {}", e)))?;

    Ok(buffer)
}
