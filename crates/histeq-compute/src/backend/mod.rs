//! Compute backends for the equalization pipeline.
//!
//! Provides the host (rayon) and OpenCL backends with automatic selection.
//!
//! # Architecture
//!
//! ```text
//! HistogramPipeline<B: ComputeBackend>
//!     +-- HostBackend   (rayon, simulated compiler)
//!     +-- OpenClBackend (opencl3)
//! ```
//!
//! Both backends bind the same [`KernelInvocation`]s, so the pipelines are
//! written once.

mod detect;
mod host_backend;
mod host_compiler;
mod host_kernels;
mod primitives;

#[cfg(feature = "opencl")]
mod opencl_backend;

// Core types
pub use primitives::{
    AccessMode, BuiltProgram, CompletionToken, ComputeBackend, DeviceBuffer, IndexSpace, KernelArg,
    KernelInvocation,
};
pub use detect::{BackendInfo, describe_backends, detect_backends, select_best_backend};

// Backends
pub use host_backend::{HOST_MAX_WORK_GROUP, HostBackend, HostBuffer, HostEvent, HostProgram, HostStats};

#[cfg(feature = "opencl")]
pub use opencl_backend::{OpenClBackend, OpenClBuffer, OpenClEvent, OpenClProgram};

use histeq_core::ImageView;

use crate::context::{ContextConfig, DeviceInfo};
use crate::pipeline::{HistogramPipeline, PipelineConfig, PipelineReport};
use crate::program::ProgramSource;
use crate::ComputeResult;
#[cfg(not(feature = "opencl"))]
use crate::ComputeError;

/// Available compute backends.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Backend {
    /// Auto-select best available (OpenCL > host).
    #[default]
    Auto,
    /// Host backend using rayon.
    Host,
    /// OpenCL device.
    OpenCl,
}

impl Backend {
    /// Check if this backend is available on current system.
    pub fn is_available(&self) -> bool {
        match self {
            Self::Auto => true,
            Self::Host => HostBackend::is_available(),
            #[cfg(feature = "opencl")]
            Self::OpenCl => OpenClBackend::is_available(),
            #[cfg(not(feature = "opencl"))]
            Self::OpenCl => false,
        }
    }

    /// Get human-readable name.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Auto => "auto",
            Self::Host => "host",
            Self::OpenCl => "opencl",
        }
    }

    /// Concrete backend for `Auto`, itself otherwise.
    pub fn resolve(&self) -> Backend {
        match self {
            Self::Auto => select_best_backend(),
            other => *other,
        }
    }
}

impl std::str::FromStr for Backend {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "auto" => Ok(Self::Auto),
            "host" | "cpu" => Ok(Self::Host),
            "opencl" | "cl" => Ok(Self::OpenCl),
            other => Err(format!("unknown backend '{other}' (expected auto, host or opencl)")),
        }
    }
}

/// Histogram pipeline over a backend chosen at runtime.
pub enum AnyPipeline {
    Host(HistogramPipeline<HostBackend>),
    #[cfg(feature = "opencl")]
    OpenCl(HistogramPipeline<OpenClBackend>),
}

impl AnyPipeline {
    /// Open the configured device and build the program.
    pub fn open(
        context: &ContextConfig,
        source: &ProgramSource,
        config: PipelineConfig,
    ) -> ComputeResult<Self> {
        match context.backend.resolve() {
            Backend::Auto | Backend::Host => {
                let backend = HostBackend::from_config(context)?;
                Ok(Self::Host(HistogramPipeline::new(backend, source, config)?))
            }
            Backend::OpenCl => {
                #[cfg(feature = "opencl")]
                {
                    let backend = OpenClBackend::from_config(context)?;
                    Ok(Self::OpenCl(HistogramPipeline::new(backend, source, config)?))
                }
                #[cfg(not(feature = "opencl"))]
                {
                    Err(ComputeError::BackendNotAvailable(
                        "opencl feature not enabled".to_string(),
                    ))
                }
            }
        }
    }

    /// Get backend name.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Host(p) => p.backend().name(),
            #[cfg(feature = "opencl")]
            Self::OpenCl(p) => p.backend().name(),
        }
    }

    /// The selected device.
    pub fn device_info(&self) -> &DeviceInfo {
        match self {
            Self::Host(p) => p.backend().device_info(),
            #[cfg(feature = "opencl")]
            Self::OpenCl(p) => p.backend().device_info(),
        }
    }

    /// Run all stages on one image.
    pub fn run(&self, image: &ImageView<'_>) -> ComputeResult<PipelineReport> {
        match self {
            Self::Host(p) => p.run(image),
            #[cfg(feature = "opencl")]
            Self::OpenCl(p) => p.run(image),
        }
    }
}

impl std::fmt::Debug for AnyPipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AnyPipeline")
            .field("backend", &self.name())
            .field("device", &self.device_info().name)
            .finish()
    }
}
