//! Error types for histeq-core operations.
//!
//! Everything in this crate runs on the host, so the failure modes are few:
//! malformed image metadata, an unusable bucket layout, and normalization
//! parameters that cannot produce a lookup table.
//!
//! # Usage
//!
//! ```rust
//! use histeq_core::{Error, HistogramLayout};
//!
//! let err = HistogramLayout::new(0).unwrap_err();
//! assert!(matches!(err, Error::InvalidBins { .. }));
//! ```
//!
//! # Used By
//!
//! - [`crate::image::ImageMeta`] - Dimension validation
//! - [`crate::histogram::HistogramLayout`] - Bucket count validation
//! - `histeq-compute` - Wrapped into `ComputeError::Core`

use thiserror::Error;

/// Result type alias using [`Error`] as the error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors produced by host-side histogram and image helpers.
#[derive(Debug, Error)]
pub enum Error {
    /// Image dimensions are zero or overflow `usize` when multiplied.
    #[error("invalid image dimensions: {width}x{height}x{depth}, {channels} channel(s) ({reason})")]
    InvalidDimensions {
        /// Image width
        width: u32,
        /// Image height
        height: u32,
        /// Image depth (1 for 2D images)
        depth: u32,
        /// Channel count
        channels: u32,
        /// Reason why the dimensions were rejected
        reason: String,
    },

    /// A histogram needs at least one bucket.
    #[error("invalid bucket count {bins}: {reason}")]
    InvalidBins {
        /// Requested bucket count
        bins: usize,
        /// Reason why the count was rejected
        reason: String,
    },

    /// Lookup table length does not match the bucket count.
    #[error("lookup table has {actual} entries, layout expects {expected}")]
    LutLength {
        /// Expected entry count
        expected: usize,
        /// Actual entry count
        actual: usize,
    },
}

impl Error {
    /// Creates an [`Error::InvalidDimensions`] error.
    #[inline]
    pub fn invalid_dimensions(
        (width, height, depth, channels): (u32, u32, u32, u32),
        reason: impl Into<String>,
    ) -> Self {
        Self::InvalidDimensions {
            width,
            height,
            depth,
            channels,
            reason: reason.into(),
        }
    }

    /// Creates an [`Error::InvalidBins`] error.
    #[inline]
    pub fn invalid_bins(bins: usize, reason: impl Into<String>) -> Self {
        Self::InvalidBins {
            bins,
            reason: reason.into(),
        }
    }
}
