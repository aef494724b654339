//! CLI command implementations

pub mod devices;
pub mod equalize;
pub mod vector;

use anyhow::{Context, Result};
use histeq_compute::{ComputeError, ContextConfig};
use histeq_core::{ImageMeta, OwnedImage, interleaved_to_planar, planar_to_interleaved};
use image::ColorType;
use std::path::Path;

use crate::DeviceArgs;

/// Context settings from the device flags.
pub fn context_config(args: &DeviceArgs) -> ContextConfig {
    ContextConfig::default()
        .with_backend(args.backend)
        .with_device(args.platform, args.device)
        .with_profiling(!args.no_profile)
}

/// Load an 8-bit image as planar bytes (one plane per channel).
pub fn load_planar(path: &Path) -> Result<OwnedImage> {
    let img = image::open(path).with_context(|| format!("Failed to load: {}", path.display()))?;
    let (width, height) = (img.width(), img.height());
    let (data, channels) = match img.color().channel_count() {
        1 => (img.into_luma8().into_raw(), 1),
        2 => (img.into_luma_alpha8().into_raw(), 2),
        3 => (img.into_rgb8().into_raw(), 3),
        _ => (img.into_rgba8().into_raw(), 4),
    };
    let meta = ImageMeta::planar(width, height, channels)
        .with_context(|| format!("Unusable image: {}", path.display()))?;
    Ok(OwnedImage::new(interleaved_to_planar(&data, channels as usize), meta))
}

/// Save planar bytes, choosing the encoder from the extension.
pub fn save_planar(path: &Path, meta: &ImageMeta, planar: &[u8]) -> Result<()> {
    let color = match meta.channels {
        1 => ColorType::L8,
        2 => ColorType::La8,
        3 => ColorType::Rgb8,
        4 => ColorType::Rgba8,
        n => anyhow::bail!("cannot save an image with {n} channels"),
    };
    let data = planar_to_interleaved(planar, meta.channels as usize);
    image::save_buffer(path, &data, meta.width, meta.height, color)
        .with_context(|| format!("Failed to save: {}", path.display()))
}

/// Print build status, options and log of a failed build to stderr.
pub fn report_build_failure(err: &ComputeError) {
    if let Some(diag) = err.build_diagnostics() {
        eprintln!("{}", diag.report());
    }
}
