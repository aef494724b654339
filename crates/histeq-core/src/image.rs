//! Flat 8-bit image data as consumed by the pipeline.
//!
//! Decoding is somebody else's job. The pipeline only sees a flat byte
//! buffer and the metadata needed to size device buffers:
//! - [`ImageMeta`] - width, height, depth and channel count
//! - [`ImageView`] - borrowed bytes plus metadata
//! - [`OwnedImage`] - owned bytes plus metadata
//!
//! # Memory Layout
//!
//! Pixels are stored **planar**, one full plane per channel:
//!
//! ```text
//! Memory: [R R R R ... R]  ← plane 0 (width * height * depth bytes)
//!         [G G G G ... G]  ← plane 1
//!         [B B B B ... B]  ← plane 2
//! ```
//!
//! Decoders usually hand out interleaved pixels; use
//! [`interleaved_to_planar`] and [`planar_to_interleaved`] at the boundary.
//!
//! # Usage
//!
//! ```rust
//! use histeq_core::{ImageMeta, ImageView};
//!
//! let meta = ImageMeta::new(2, 1, 1, 3).unwrap();
//! let bytes = [10u8, 20, 30, 40, 50, 60];
//! let view = ImageView::new(&bytes, meta);
//! assert_eq!(view.meta().element_count(), 6);
//! assert!(view.is_consistent());
//! ```

use crate::{Error, Result};

/// Image dimensions as reported by the decoder.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ImageMeta {
    /// Width in pixels.
    pub width: u32,
    /// Height in pixels.
    pub height: u32,
    /// Depth in slices (1 for 2D images).
    pub depth: u32,
    /// Channels per pixel (the "spectrum").
    pub channels: u32,
}

impl ImageMeta {
    /// Create validated metadata.
    ///
    /// Every dimension must be non-zero and the total element count must fit
    /// in `usize`.
    pub fn new(width: u32, height: u32, depth: u32, channels: u32) -> Result<Self> {
        let dims = (width, height, depth, channels);
        if width == 0 || height == 0 || depth == 0 || channels == 0 {
            return Err(Error::invalid_dimensions(dims, "every dimension must be non-zero"));
        }
        let meta = Self { width, height, depth, channels };
        meta.checked_element_count()
            .ok_or_else(|| Error::invalid_dimensions(dims, "element count overflows usize"))?;
        Ok(meta)
    }

    /// Metadata for a 2D image.
    pub fn planar(width: u32, height: u32, channels: u32) -> Result<Self> {
        Self::new(width, height, 1, channels)
    }

    fn checked_element_count(&self) -> Option<usize> {
        (self.width as usize)
            .checked_mul(self.height as usize)?
            .checked_mul(self.depth as usize)?
            .checked_mul(self.channels as usize)
    }

    /// Number of pixels in one channel plane.
    #[inline]
    pub fn pixels_per_channel(&self) -> usize {
        (self.width as usize) * (self.height as usize) * (self.depth as usize)
    }

    /// Number of sampled elements (pixels x channels). One byte each.
    #[inline]
    pub fn element_count(&self) -> usize {
        self.pixels_per_channel() * (self.channels as usize)
    }

    /// Byte length of a buffer holding this image.
    #[inline]
    pub fn byte_len(&self) -> usize {
        self.element_count()
    }
}

impl std::fmt::Display for ImageMeta {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.depth == 1 {
            write!(f, "{}x{} ({} ch)", self.width, self.height, self.channels)
        } else {
            write!(f, "{}x{}x{} ({} ch)", self.width, self.height, self.depth, self.channels)
        }
    }
}

/// Borrowed image bytes with metadata.
///
/// The byte slice is not checked against the metadata here. The device
/// layer sizes buffers from the metadata and rejects a mismatched upload,
/// which is where a wrong length has to surface.
#[derive(Debug, Clone, Copy)]
pub struct ImageView<'a> {
    data: &'a [u8],
    meta: ImageMeta,
}

impl<'a> ImageView<'a> {
    /// Wrap a byte slice.
    pub fn new(data: &'a [u8], meta: ImageMeta) -> Self {
        Self { data, meta }
    }

    /// Raw bytes.
    #[inline]
    pub fn data(&self) -> &'a [u8] {
        self.data
    }

    /// Image metadata.
    #[inline]
    pub fn meta(&self) -> &ImageMeta {
        &self.meta
    }

    /// True when the byte length equals the metadata's element count.
    pub fn is_consistent(&self) -> bool {
        self.data.len() == self.meta.byte_len()
    }
}

/// Owned image bytes with metadata.
#[derive(Clone, PartialEq, Eq)]
pub struct OwnedImage {
    data: Vec<u8>,
    meta: ImageMeta,
}

impl OwnedImage {
    /// Take ownership of planar bytes.
    pub fn new(data: Vec<u8>, meta: ImageMeta) -> Self {
        Self { data, meta }
    }

    /// Borrow as a view.
    pub fn view(&self) -> ImageView<'_> {
        ImageView::new(&self.data, self.meta)
    }

    /// Raw bytes.
    pub fn data(&self) -> &[u8] {
        &self.data
    }

    /// Image metadata.
    pub fn meta(&self) -> &ImageMeta {
        &self.meta
    }

    /// Consume into the byte buffer.
    pub fn into_data(self) -> Vec<u8> {
        self.data
    }
}

impl std::fmt::Debug for OwnedImage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OwnedImage")
            .field("meta", &self.meta)
            .field("size_bytes", &self.data.len())
            .finish()
    }
}

/// Convert `[R G B R G B ...]` into one plane per channel.
pub fn interleaved_to_planar(data: &[u8], channels: usize) -> Vec<u8> {
    if channels <= 1 {
        return data.to_vec();
    }
    let plane = data.len() / channels;
    let mut out = vec![0u8; plane * channels];
    for (px, chunk) in data.chunks_exact(channels).enumerate() {
        for (ch, &v) in chunk.iter().enumerate() {
            out[ch * plane + px] = v;
        }
    }
    out
}

/// Convert planar channel data back into interleaved pixels.
pub fn planar_to_interleaved(data: &[u8], channels: usize) -> Vec<u8> {
    if channels <= 1 {
        return data.to_vec();
    }
    let plane = data.len() / channels;
    let mut out = vec![0u8; plane * channels];
    for (px, chunk) in out.chunks_exact_mut(channels).enumerate() {
        for (ch, v) in chunk.iter_mut().enumerate() {
            *v = data[ch * plane + px];
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_meta_counts() {
        let meta = ImageMeta::planar(4, 3, 3).unwrap();
        assert_eq!(meta.pixels_per_channel(), 12);
        assert_eq!(meta.element_count(), 36);
        assert_eq!(meta.byte_len(), 36);
        assert_eq!(meta.to_string(), "4x3 (3 ch)");
    }

    #[test]
    fn test_meta_rejects_zero() {
        assert!(ImageMeta::new(0, 3, 1, 3).is_err());
        assert!(ImageMeta::new(3, 3, 1, 0).is_err());
    }

    #[test]
    fn test_view_consistency() {
        let meta = ImageMeta::planar(2, 2, 1).unwrap();
        assert!(ImageView::new(&[1, 2, 3, 4], meta).is_consistent());
        assert!(!ImageView::new(&[1, 2, 3], meta).is_consistent());
    }

    #[test]
    fn test_planar_layout() {
        let interleaved = [1u8, 10, 100, 2, 20, 200];
        let planar = interleaved_to_planar(&interleaved, 3);
        assert_eq!(planar, vec![1, 2, 10, 20, 100, 200]);
        assert_eq!(planar_to_interleaved(&planar, 3), interleaved.to_vec());
    }
}
