//! Histogram bucket layout.
//!
//! A histogram is a flat array of [`Counter`] slots. The bucket count is a
//! pipeline-wide constant, so the byte size of every histogram buffer is
//! known before anything touches a device.
//!
//! A byte value `v` lands in bucket `v * bins / 256`. With 256 buckets that
//! is the identity; with 8 buckets, values 64..=95 land in bucket 2.

use rayon::prelude::*;

use crate::{Error, ImageView, Result};

/// Counter stored in each bucket (32-bit, signed like the device kernels).
pub type Counter = i32;

/// Width of one counter in bytes.
pub const COUNTER_BYTES: usize = std::mem::size_of::<Counter>();

/// Number of distinct 8-bit intensity levels.
pub const INTENSITY_LEVELS: usize = 256;

/// Default bucket count: one bucket per intensity level.
pub const DEFAULT_BINS: usize = INTENSITY_LEVELS;

/// Fixed bucket count of a pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct HistogramLayout {
    bins: usize,
}

impl HistogramLayout {
    /// Create a layout with `bins` buckets.
    ///
    /// The bucket count must be non-zero and small enough for a single
    /// scan work-group (`bins <= i32::MAX / 2` so the padded size fits the
    /// kernels' `int` arguments).
    pub fn new(bins: usize) -> Result<Self> {
        if bins == 0 {
            return Err(Error::invalid_bins(bins, "a histogram needs at least one bucket"));
        }
        if bins > (i32::MAX as usize) / 2 {
            return Err(Error::invalid_bins(bins, "bucket count exceeds the kernels' int range"));
        }
        Ok(Self { bins })
    }

    /// Bucket count.
    #[inline]
    pub fn bins(&self) -> usize {
        self.bins
    }

    /// Byte size of a histogram buffer with this layout.
    #[inline]
    pub fn byte_len(&self) -> usize {
        self.bins * COUNTER_BYTES
    }

    /// Bucket count rounded up to the next power of two.
    ///
    /// The scan treats buckets past `bins` as zero-valued phantoms.
    #[inline]
    pub fn padded_bins(&self) -> usize {
        self.bins.next_power_of_two()
    }

    /// Depth of the scan tree, `ceil(log2(bins))`.
    #[inline]
    pub fn scan_depth(&self) -> u32 {
        self.padded_bins().trailing_zeros()
    }

    /// Bucket that a byte value falls into.
    #[inline]
    pub fn bucket_of(&self, value: u8) -> usize {
        (value as usize * self.bins) / INTENSITY_LEVELS
    }

    /// A zeroed histogram.
    pub fn zeroed(&self) -> Vec<Counter> {
        vec![0; self.bins]
    }

    /// The lookup table that maps every bucket to its own index.
    ///
    /// With 256 buckets, applying it reproduces the input unchanged.
    pub fn identity_lut(&self) -> Vec<Counter> {
        (0..self.bins).map(|i| i as Counter).collect()
    }

    /// Check that a lookup table has one entry per bucket.
    pub fn check_lut(&self, lut: &[Counter]) -> Result<()> {
        if lut.len() != self.bins {
            return Err(Error::LutLength { expected: self.bins, actual: lut.len() });
        }
        Ok(())
    }

    /// Host reference histogram over every byte of the image.
    pub fn histogram_of(&self, image: &ImageView<'_>) -> Vec<Counter> {
        image
            .data()
            .par_chunks(64 * 1024)
            .fold(
                || self.zeroed(),
                |mut acc, chunk| {
                    for &v in chunk {
                        acc[self.bucket_of(v)] += 1;
                    }
                    acc
                },
            )
            .reduce(
                || self.zeroed(),
                |mut a, b| {
                    a.iter_mut().zip(b).for_each(|(x, y)| *x += y);
                    a
                },
            )
    }

    /// Host reference for the apply stage: map each byte through `lut`,
    /// clamping results into `0..=255`.
    pub fn apply_lut(&self, image: &ImageView<'_>, lut: &[Counter]) -> Result<Vec<u8>> {
        self.check_lut(lut)?;
        Ok(image
            .data()
            .par_iter()
            .map(|&v| lut[self.bucket_of(v)].clamp(0, 255) as u8)
            .collect())
    }
}

impl Default for HistogramLayout {
    fn default() -> Self {
        Self { bins: DEFAULT_BINS }
    }
}

/// Sum of every bucket, widened so large images cannot overflow.
pub fn total_count(histogram: &[Counter]) -> i64 {
    histogram.iter().map(|&c| c as i64).sum()
}
