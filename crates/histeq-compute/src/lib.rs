//! Device layer and orchestration for histogram equalization.
//!
//! Runs the histogram → scan → normalize → apply pipeline on one selected
//! compute device. The host backend (rayon) is always available; the OpenCL
//! backend is behind the `opencl` feature.
//!
//! # Architecture
//!
//! ```text
//! HistogramPipeline<B: ComputeBackend>   VectorPipeline<B>
//!     └── ComputeBackend trait
//!             ├── HostBackend   (rayon, simulated compiler)
//!             └── OpenClBackend (opencl3)
//! ```
//!
//! # Example
//!
//! ```
//! use histeq_compute::{HostBackend, HistogramPipeline, PipelineConfig, ProgramSource};
//! use histeq_core::{FixedScale, ImageMeta, ImageView};
//!
//! let backend = HostBackend::new();
//! let config = PipelineConfig::default()
//!     .with_bins(8)
//!     .with_normalization(FixedScale { offset: 0, scale: 1.0 });
//! let pipeline = HistogramPipeline::new(backend, &ProgramSource::builtin_histogram(), config)?;
//!
//! let pixels = [64u8, 64, 64, 64, 96, 96, 96, 96, 96, 96];
//! let image = ImageView::new(&pixels, ImageMeta::planar(10, 1, 1)?);
//! let report = pipeline.run(&image)?;
//! assert_eq!(report.histogram, vec![0, 0, 4, 6, 0, 0, 0, 0]);
//! assert_eq!(report.output[0], 4);
//! assert_eq!(report.output[9], 10);
//! # Ok::<(), histeq_compute::ComputeError>(())
//! ```

pub mod backend;
pub mod context;
pub mod pipeline;
pub mod profiling;
pub mod program;
pub mod staged;
pub mod vector;

pub use backend::{
    AccessMode, AnyPipeline, Backend, BackendInfo, BuiltProgram, CompletionToken, ComputeBackend,
    DeviceBuffer, HostBackend, HostStats, IndexSpace, KernelArg, KernelInvocation,
    describe_backends, detect_backends, select_best_backend,
};
#[cfg(feature = "opencl")]
pub use backend::OpenClBackend;
pub use context::{
    ContextConfig, DeviceInfo, DeviceKind, DeviceSelection, PlatformInfo, format_device_listing,
    list_devices,
};
pub use pipeline::{HistogramPipeline, KernelNames, PipelineConfig, PipelineReport, StageOutput};
pub use profiling::{ProfilingInfo, ProfilingResolution, Stage, StageTimings};
pub use program::{BuildDiagnostics, BuildStatus, ProgramSource};
pub use staged::StagedBuffer;
pub use vector::{VectorPipeline, VectorResult};

use std::path::PathBuf;

use thiserror::Error;

/// Device layer errors.
#[derive(Error, Debug)]
pub enum ComputeError {
    #[error("cannot select platform {platform}, device {device}: {reason}")]
    DeviceSelection { platform: usize, device: usize, reason: String },

    #[error("kernel build failed: {0}")]
    KernelBuild(Box<BuildDiagnostics>),

    #[error("transfer size mismatch on buffer '{buffer}': device holds {expected} bytes, host side has {actual}")]
    TransferSizeMismatch { buffer: String, expected: usize, actual: usize },

    #[error("kernel dispatch failed in stage '{stage}': {reason}")]
    KernelDispatch { stage: String, reason: String },

    #[error("Backend not available: {0}")]
    BackendNotAvailable(String),

    #[error("device operation failed: {0}")]
    Device(String),

    #[error("failed to read kernel source {}: {source}", path.display())]
    SourceRead {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("device copy of buffer '{0}' is stale; upload host edits first")]
    StaleBuffer(String),

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("profiling unavailable: {0}")]
    Profiling(String),

    #[error(transparent)]
    Core(#[from] histeq_core::Error),
}

/// Coarse classification of a [`ComputeError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    DeviceSelection,
    KernelBuild,
    TransferSizeMismatch,
    KernelDispatch,
    Other,
}

impl ComputeError {
    /// Dispatch failure for `stage`.
    pub fn dispatch(stage: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::KernelDispatch { stage: stage.into(), reason: reason.into() }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::DeviceSelection { .. } => ErrorKind::DeviceSelection,
            Self::KernelBuild(_) => ErrorKind::KernelBuild,
            Self::TransferSizeMismatch { .. } => ErrorKind::TransferSizeMismatch,
            Self::KernelDispatch { .. } => ErrorKind::KernelDispatch,
            _ => ErrorKind::Other,
        }
    }

    /// Stage tag of a dispatch error.
    pub fn stage(&self) -> Option<&str> {
        match self {
            Self::KernelDispatch { stage, .. } => Some(stage.as_str()),
            _ => None,
        }
    }

    /// Build status, options and log of a failed build.
    pub fn build_diagnostics(&self) -> Option<&BuildDiagnostics> {
        match self {
            Self::KernelBuild(diag) => Some(diag.as_ref()),
            _ => None,
        }
    }

    /// Retag a dispatch error with a pipeline stage name.
    ///
    /// Other variants pass through unchanged.
    pub fn with_stage(self, stage: impl Into<String>) -> Self {
        match self {
            Self::KernelDispatch { reason, .. } => Self::KernelDispatch { stage: stage.into(), reason },
            other => other,
        }
    }

    /// Any failure while completing a dispatched stage, as a dispatch
    /// error tagged with that stage.
    pub fn into_dispatch(self, stage: impl Into<String>) -> Self {
        match self {
            Self::KernelDispatch { reason, .. } => Self::KernelDispatch { stage: stage.into(), reason },
            other => Self::KernelDispatch { stage: stage.into(), reason: other.to_string() },
        }
    }
}

impl From<BuildDiagnostics> for ComputeError {
    fn from(diag: BuildDiagnostics) -> Self {
        Self::KernelBuild(Box::new(diag))
    }
}

pub type ComputeResult<T> = Result<T, ComputeError>;
