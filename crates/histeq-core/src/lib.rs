//! # histeq-core
//!
//! Host-side types for the histogram-equalization pipeline.
//!
//! Nothing in this crate talks to a device. It holds the pieces both the
//! device layer and its tests agree on:
//!
//! - [`ImageMeta`], [`ImageView`], [`OwnedImage`] - flat planar 8-bit images
//! - [`HistogramLayout`] - fixed bucket count, byte sizes, bucket mapping
//! - [`scan`] - sequential reference and work-efficient Blelloch prefix sums
//! - [`normalize`] - strategies turning a cumulative histogram into a LUT
//!
//! ## Crate Structure
//!
//! ```text
//! histeq-core (this crate)
//!    ^
//!    |
//!    +-- histeq-compute (backends, device buffers, pipelines)
//!    +-- histeq-cli     (histeq binary)
//!    +-- histeq-bench   (criterion benches)
//! ```

#![warn(missing_docs)]
#![warn(rustdoc::missing_crate_level_docs)]

pub mod error;
pub mod histogram;
pub mod image;
pub mod normalize;
pub mod scan;

pub use error::{Error, Result};
pub use histogram::{
    total_count, Counter, HistogramLayout, COUNTER_BYTES, DEFAULT_BINS, INTENSITY_LEVELS,
};
pub use image::{interleaved_to_planar, planar_to_interleaved, ImageMeta, ImageView, OwnedImage};
pub use normalize::{
    Equalize, FixedScale, Identity, Normalization, NormalizationParams, Offset, ReferenceScale,
};
pub use scan::{blelloch_scan, is_non_decreasing, ScanKind};

/// Prelude module for convenient imports.
///
/// ```
/// use histeq_core::prelude::*;
/// ```
pub mod prelude {
    pub use crate::error::{Error, Result};
    pub use crate::histogram::{Counter, HistogramLayout};
    pub use crate::image::{ImageMeta, ImageView, OwnedImage};
    pub use crate::normalize::{Equalize, FixedScale, Identity, Normalization, ReferenceScale};
    pub use crate::scan::{blelloch_scan, ScanKind};
}
