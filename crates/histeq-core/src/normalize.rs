//! Cumulative histogram to lookup table.
//!
//! Every strategy reduces to one formula applied bucket by bucket:
//!
//! ```text
//! lut[i] = trunc((cumulative[i] - offset) / scale)
//! ```
//!
//! Strategies only differ in how they pick `offset` and `scale`. This runs on
//! the host between the scan and apply stages; it is O(bucket count).
//!
//! | Strategy           | offset                      | scale                        |
//! |--------------------|-----------------------------|------------------------------|
//! | [`ReferenceScale`] | fixed or pixels-per-channel | `cum[reference] / range`     |
//! | [`FixedScale`]     | fixed                       | fixed                        |
//! | [`Equalize`]       | first non-zero cumulative   | `(total - offset) / 255`     |
//! | [`Identity`]       | 0                           | 1                            |
//!
//! The reference-scale constants were calibrated on one set of image sizes.
//! They do not scale with image size or bucket count; recalibrate before
//! trusting them elsewhere.

use tracing::warn;

use crate::histogram::Counter;
use crate::ImageMeta;

/// Offset and scale resolved for one cumulative histogram.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct NormalizationParams {
    /// Subtracted from every bucket.
    pub offset: i64,
    /// Every bucket is divided by this after the offset.
    pub scale: f64,
}

impl NormalizationParams {
    /// Parameters that leave the histogram unchanged.
    pub const IDENTITY: Self = Self { offset: 0, scale: 1.0 };

    /// Apply to a cumulative histogram.
    ///
    /// A scale that is zero, negative or not finite would blow up the
    /// division; it is replaced by 1.
    pub fn apply(&self, cumulative: &[Counter]) -> Vec<Counter> {
        let scale = if self.scale.is_finite() && self.scale > 0.0 {
            self.scale
        } else {
            warn!(scale = self.scale, "unusable normalization scale, using 1");
            1.0
        };
        cumulative
            .iter()
            .map(|&c| ((c as i64 - self.offset) as f64 / scale).trunc() as Counter)
            .collect()
    }
}

/// Strategy that turns a cumulative histogram into a lookup table.
pub trait Normalization: Send + Sync + std::fmt::Debug {
    /// Short name for logs and CLI output.
    fn name(&self) -> &'static str;

    /// Resolve offset and scale for this histogram.
    fn params(&self, cumulative: &[Counter], meta: &ImageMeta) -> NormalizationParams;

    /// Produce the lookup table.
    fn normalize(&self, cumulative: &[Counter], meta: &ImageMeta) -> Vec<Counter> {
        self.params(cumulative, meta).apply(cumulative)
    }
}

/// How [`ReferenceScale`] picks its offset.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Offset {
    /// A constant.
    Fixed(i64),
    /// Pixels per channel times a multiplier.
    PixelsPerChannel(i64),
}

impl Offset {
    fn resolve(&self, meta: &ImageMeta) -> i64 {
        match *self {
            Self::Fixed(v) => v,
            Self::PixelsPerChannel(mult) => meta.pixels_per_channel() as i64 * mult,
        }
    }
}

/// Scale from a reference bucket divided by the desired output range.
///
/// This is the default strategy.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ReferenceScale {
    /// Bucket whose cumulative value is the reference; `None` means the
    /// last bucket. Indices past the end clamp to the last bucket.
    pub reference_bucket: Option<usize>,
    /// Width of the output range.
    pub output_range: f64,
    /// Subtracted from every bucket.
    pub offset: Offset,
    /// Truncate `reference / range` to an integer before dividing.
    pub integer_scale: bool,
}

impl ReferenceScale {
    /// The constants of the first implementation: reference bucket 255,
    /// range 512 with integer division, offset of three full channel planes.
    pub fn legacy() -> Self {
        Self {
            reference_bucket: Some(255),
            output_range: 512.0,
            offset: Offset::PixelsPerChannel(3),
            integer_scale: true,
        }
    }
}

impl Default for ReferenceScale {
    fn default() -> Self {
        Self {
            reference_bucket: None,
            output_range: 255.0,
            offset: Offset::Fixed(0),
            integer_scale: false,
        }
    }
}

impl Normalization for ReferenceScale {
    fn name(&self) -> &'static str {
        if *self == Self::legacy() { "legacy" } else { "reference" }
    }

    fn params(&self, cumulative: &[Counter], meta: &ImageMeta) -> NormalizationParams {
        let Some(last) = cumulative.len().checked_sub(1) else {
            return NormalizationParams::IDENTITY;
        };
        let idx = self.reference_bucket.unwrap_or(last).min(last);
        let reference = cumulative[idx] as f64;
        let scale = if self.integer_scale {
            (reference / self.output_range).trunc()
        } else {
            reference / self.output_range
        };
        NormalizationParams {
            offset: self.offset.resolve(meta),
            scale,
        }
    }
}

/// Explicit offset and scale.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FixedScale {
    /// Subtracted from every bucket.
    pub offset: i64,
    /// Divisor.
    pub scale: f64,
}

impl Normalization for FixedScale {
    fn name(&self) -> &'static str {
        "fixed"
    }

    fn params(&self, _cumulative: &[Counter], _meta: &ImageMeta) -> NormalizationParams {
        NormalizationParams { offset: self.offset, scale: self.scale }
    }
}

/// Classic histogram equalization onto `0..=255`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Equalize;

impl Normalization for Equalize {
    fn name(&self) -> &'static str {
        "equalize"
    }

    fn params(&self, cumulative: &[Counter], _meta: &ImageMeta) -> NormalizationParams {
        let cdf_min = cumulative.iter().copied().find(|&c| c > 0).unwrap_or(0) as i64;
        let total = cumulative.last().copied().unwrap_or(0) as i64;
        NormalizationParams {
            offset: cdf_min,
            scale: (total - cdf_min) as f64 / 255.0,
        }
    }

    /// Integer form of the shared formula, so the last bucket lands on 255
    /// exactly.
    fn normalize(&self, cumulative: &[Counter], meta: &ImageMeta) -> Vec<Counter> {
        let params = self.params(cumulative, meta);
        let span = cumulative.last().copied().unwrap_or(0) as i64 - params.offset;
        if span <= 0 {
            return params.apply(cumulative);
        }
        cumulative
            .iter()
            .map(|&c| ((c as i64 - params.offset) * 255 / span) as Counter)
            .collect()
    }
}

/// Leaves the cumulative histogram untouched.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Identity;

impl Normalization for Identity {
    fn name(&self) -> &'static str {
        "identity"
    }

    fn params(&self, _cumulative: &[Counter], _meta: &ImageMeta) -> NormalizationParams {
        NormalizationParams::IDENTITY
    }
}
