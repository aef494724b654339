//! Histogram-equalization pipeline.
//!
//! Runs four stages on one device, in order, on a single in-order queue:
//!
//! ```text
//! image ──► createHist ──► blelloch ──► normalize (host) ──► applyHistogram ──► output
//!              │              │              │                    │
//!           histogram     cumulative        LUT            clamp(lut[bucket])
//! ```
//!
//! The histogram buffer is reused for all three of its roles (counts, then
//! prefix sums, then the LUT); the host mirror is downloaded after every
//! device stage so each intermediate ends up in the [`PipelineReport`].
//!
//! # Example
//!
//! ```
//! use histeq_compute::{HostBackend, HistogramPipeline, PipelineConfig, ProgramSource};
//! use histeq_core::{ImageMeta, ImageView};
//!
//! let pipeline = HistogramPipeline::new(
//!     HostBackend::new(),
//!     &ProgramSource::builtin_histogram(),
//!     PipelineConfig::default(),
//! )?;
//! let pixels: Vec<u8> = (0..=255).collect();
//! let image = ImageView::new(&pixels, ImageMeta::planar(16, 16, 1)?);
//! let report = pipeline.run(&image)?;
//! assert_eq!(*report.cumulative.last().unwrap(), 256);
//! # Ok::<(), histeq_compute::ComputeError>(())
//! ```

use std::sync::Arc;

use histeq_core::{
    COUNTER_BYTES, Counter, DEFAULT_BINS, HistogramLayout, ImageView, Normalization, ReferenceScale,
};
use tracing::{debug, info, trace};

use crate::backend::{
    AccessMode, BuiltProgram, CompletionToken, ComputeBackend, IndexSpace, KernelInvocation,
};
use crate::profiling::{Stage, StageTimings};
use crate::program::{BuildDiagnostics, BuildStatus, ProgramSource};
use crate::staged::StagedBuffer;
use crate::{ComputeError, ComputeResult};

// ============================================================================
// Configuration
// ============================================================================

/// Entry point names of the three device stages.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KernelNames {
    pub histogram: String,
    pub scan: String,
    pub apply: String,
}

impl Default for KernelNames {
    fn default() -> Self {
        Self {
            histogram: "createHist".to_string(),
            scan: "blelloch".to_string(),
            apply: "applyHistogram".to_string(),
        }
    }
}

impl KernelNames {
    pub fn for_stage(&self, stage: Stage) -> &str {
        match stage {
            Stage::Histogram => &self.histogram,
            Stage::Scan => &self.scan,
            Stage::Apply => &self.apply,
        }
    }
}

/// Pipeline-wide settings, fixed for the lifetime of a pipeline.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Bucket count.
    pub bins: usize,
    /// Passed to the compiler unchanged.
    pub build_options: String,
    pub kernels: KernelNames,
    /// Cumulative histogram to LUT.
    pub normalization: Arc<dyn Normalization>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            bins: DEFAULT_BINS,
            build_options: String::new(),
            kernels: KernelNames::default(),
            normalization: Arc::new(ReferenceScale::default()),
        }
    }
}

impl PipelineConfig {
    pub fn with_bins(mut self, bins: usize) -> Self {
        self.bins = bins;
        self
    }

    pub fn with_build_options(mut self, options: impl Into<String>) -> Self {
        self.build_options = options.into();
        self
    }

    pub fn with_kernels(mut self, kernels: KernelNames) -> Self {
        self.kernels = kernels;
        self
    }

    pub fn with_normalization(mut self, normalization: impl Normalization + 'static) -> Self {
        self.normalization = Arc::new(normalization);
        self
    }

    /// Same as [`with_normalization`](Self::with_normalization) for an
    /// already shared strategy.
    pub fn with_shared_normalization(mut self, normalization: Arc<dyn Normalization>) -> Self {
        self.normalization = normalization;
        self
    }

    /// Check the settings and derive the bucket layout.
    pub fn validate(&self) -> ComputeResult<HistogramLayout> {
        let layout = HistogramLayout::new(self.bins)?;
        for stage in Stage::ALL {
            if self.kernels.for_stage(stage).trim().is_empty() {
                return Err(ComputeError::InvalidInput(format!(
                    "no kernel name configured for the {stage} stage"
                )));
            }
        }
        Ok(layout)
    }
}

// ============================================================================
// Results
// ============================================================================

/// Everything one run produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PipelineReport {
    /// Equalized image, same length and layout as the input.
    pub output: Vec<u8>,
    /// Bucket counts.
    pub histogram: Vec<Counter>,
    /// Inclusive prefix sums of `histogram`.
    pub cumulative: Vec<Counter>,
    /// Normalized `cumulative`, as applied.
    pub lut: Vec<Counter>,
    /// Empty when profiling is off.
    pub timings: StageTimings,
}

impl PipelineReport {
    /// Sum of the stage times; 0 without profiling.
    pub fn total_ns(&self) -> u64 {
        self.timings.total_ns()
    }
}

/// Result of one individually run stage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StageOutput<T> {
    pub value: T,
    /// `None` when profiling is off.
    pub elapsed_ns: Option<u64>,
}

// ============================================================================
// Pipeline
// ============================================================================

/// Histogram equalization on one device with one built program.
pub struct HistogramPipeline<B: ComputeBackend> {
    backend: B,
    program: B::Program,
    config: PipelineConfig,
    layout: HistogramLayout,
}

impl<B: ComputeBackend> HistogramPipeline<B> {
    /// Validate the configuration and build the program.
    ///
    /// Nothing is allocated on the device before the build succeeds. A
    /// program that builds but lacks one of the configured entry points is
    /// rejected as a build failure.
    pub fn new(backend: B, source: &ProgramSource, config: PipelineConfig) -> ComputeResult<Self> {
        let layout = config.validate()?;

        let group = layout.padded_bins();
        let max_group = backend.device_info().max_work_group_size;
        if group > max_group {
            return Err(ComputeError::InvalidInput(format!(
                "{} buckets need a scan work-group of {group}, device allows {max_group}",
                layout.bins()
            )));
        }

        let program = backend.build_program(source, &config.build_options)?;
        check_entry_points(&program, &config.kernels)?;

        info!(
            backend = backend.name(),
            device = %backend.device_info().name,
            bins = layout.bins(),
            normalization = config.normalization.name(),
            profiling = backend.profiling_enabled(),
            "histogram pipeline ready"
        );
        Ok(Self { backend, program, config, layout })
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn program(&self) -> &B::Program {
        &self.program
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn layout(&self) -> HistogramLayout {
        self.layout
    }

    /// Run every stage on one image.
    pub fn run(&self, image: &ImageView<'_>) -> ComputeResult<PipelineReport> {
        let meta = *image.meta();
        let n = check_image(image)?;
        let mut timings = StageTimings::new();

        // Sized from the metadata; a short or long byte slice fails on upload.
        let mut input = self.backend.allocate("image", meta.byte_len(), AccessMode::ReadOnly)?;
        let target = self.backend.allocate("output", meta.byte_len(), AccessMode::WriteOnly)?;
        let mut hist = self.histogram_buffer()?;

        self.backend.upload(&mut input, image.data())?;
        hist.sync_to_device(&self.backend)?;

        timings.record_opt(Stage::Histogram, self.histogram_stage(&input, &hist, n)?);
        hist.sync_to_host(&self.backend)?;
        let histogram = hist.host().to_vec();

        timings.record_opt(Stage::Scan, self.scan_stage(&hist)?);
        hist.sync_to_host(&self.backend)?;
        let cumulative = hist.host().to_vec();

        let lut = self.config.normalization.normalize(&cumulative, &meta);
        hist.replace_host(&lut)?;
        hist.sync_to_device(&self.backend)?;

        timings.record_opt(Stage::Apply, self.apply_stage(&input, &target, &hist, n)?);
        let mut output = vec![0u8; meta.byte_len()];
        self.backend.download(&target, &mut output)?;
        self.backend.finish()?;

        info!(image = %meta, total_ns = timings.total_ns(), "equalization finished");
        Ok(PipelineReport { output, histogram, cumulative, lut, timings })
    }

    /// Histogram stage alone.
    pub fn build_histogram(&self, image: &ImageView<'_>) -> ComputeResult<StageOutput<Vec<Counter>>> {
        let n = check_image(image)?;
        let mut input = self
            .backend
            .allocate("image", image.meta().byte_len(), AccessMode::ReadOnly)?;
        let mut hist = self.histogram_buffer()?;
        self.backend.upload(&mut input, image.data())?;
        hist.sync_to_device(&self.backend)?;

        let elapsed_ns = self.histogram_stage(&input, &hist, n)?;
        hist.sync_to_host(&self.backend)?;
        Ok(StageOutput { value: hist.into_host(), elapsed_ns })
    }

    /// Inclusive scan of one histogram. `counts` must have one entry per bucket.
    pub fn scan(&self, counts: &[Counter]) -> ComputeResult<StageOutput<Vec<Counter>>> {
        let mut hist = self.histogram_buffer()?;
        hist.replace_host(counts)?;
        hist.sync_to_device(&self.backend)?;

        let elapsed_ns = self.scan_stage(&hist)?;
        hist.sync_to_host(&self.backend)?;
        Ok(StageOutput { value: hist.into_host(), elapsed_ns })
    }

    /// Apply stage alone. `lut` must have one entry per bucket.
    pub fn apply_lut(&self, image: &ImageView<'_>, lut: &[Counter]) -> ComputeResult<StageOutput<Vec<u8>>> {
        let n = check_image(image)?;
        let len = image.meta().byte_len();
        let mut input = self.backend.allocate("image", len, AccessMode::ReadOnly)?;
        let output = self.backend.allocate("output", len, AccessMode::WriteOnly)?;
        let mut table = self.histogram_buffer()?;
        self.backend.upload(&mut input, image.data())?;
        table.replace_host(lut)?;
        table.sync_to_device(&self.backend)?;

        let elapsed_ns = self.apply_stage(&input, &output, &table, n)?;
        let mut out = vec![0u8; len];
        self.backend.download(&output, &mut out)?;
        Ok(StageOutput { value: out, elapsed_ns })
    }

    fn histogram_buffer(&self) -> ComputeResult<StagedBuffer<B::Buffer, Counter>> {
        StagedBuffer::new(&self.backend, "histogram", self.layout.bins(), AccessMode::ReadWrite)
    }

    fn bins_arg(&self) -> i32 {
        // HistogramLayout caps bins at i32::MAX / 2
        self.layout.bins() as i32
    }

    fn histogram_stage(
        &self,
        input: &B::Buffer,
        hist: &StagedBuffer<B::Buffer, Counter>,
        n: usize,
    ) -> ComputeResult<Option<u64>> {
        trace!(elements = n, bins = self.layout.bins(), "histogram stage");
        let invocation = KernelInvocation::new(&self.config.kernels.histogram, IndexSpace::linear(n))
            .buffer(input)
            .buffer(hist.device()?)
            .int(self.bins_arg());
        self.submit(Stage::Histogram, &invocation)
    }

    fn scan_stage(&self, hist: &StagedBuffer<B::Buffer, Counter>) -> ComputeResult<Option<u64>> {
        let group = self.layout.padded_bins();
        trace!(bins = self.layout.bins(), group, depth = self.layout.scan_depth(), "scan stage");
        let invocation = KernelInvocation::new(&self.config.kernels.scan, IndexSpace::single_group(group))
            .buffer(hist.device()?)
            .local(group * COUNTER_BYTES)
            .int(self.bins_arg());
        self.submit(Stage::Scan, &invocation)
    }

    fn apply_stage(
        &self,
        input: &B::Buffer,
        output: &B::Buffer,
        lut: &StagedBuffer<B::Buffer, Counter>,
        n: usize,
    ) -> ComputeResult<Option<u64>> {
        trace!(elements = n, "apply stage");
        let invocation = KernelInvocation::new(&self.config.kernels.apply, IndexSpace::linear(n))
            .buffer(input)
            .buffer(output)
            .buffer(lut.device()?)
            .int(self.bins_arg());
        self.submit(Stage::Apply, &invocation)
    }

    /// Dispatch, wait, and read the stage time when profiling is on.
    fn submit(
        &self,
        stage: Stage,
        invocation: &KernelInvocation<'_, B::Buffer>,
    ) -> ComputeResult<Option<u64>> {
        let event = self
            .backend
            .dispatch(&self.program, invocation)
            .map_err(|e| e.with_stage(stage.as_str()))?;
        event.wait().map_err(|e| e.into_dispatch(stage.as_str()))?;

        if !self.backend.profiling_enabled() {
            return Ok(None);
        }
        let elapsed = event
            .profiling()
            .map_err(|e| e.into_dispatch(stage.as_str()))?
            .elapsed_ns();
        debug!(stage = %stage, kernel = invocation.entry_point(), elapsed_ns = elapsed, "stage complete");
        Ok(Some(elapsed))
    }
}

impl<B: ComputeBackend> std::fmt::Debug for HistogramPipeline<B> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HistogramPipeline")
            .field("backend", &self.backend.name())
            .field("device", &self.backend.device_info().name)
            .field("entry_points", &self.program.entry_points())
            .field("config", &self.config)
            .finish()
    }
}

/// Non-empty image whose element count fits the kernels' `int` index.
fn check_image(image: &ImageView<'_>) -> ComputeResult<usize> {
    let n = image.meta().element_count();
    if n == 0 || image.data().is_empty() {
        return Err(ComputeError::InvalidInput("image has no pixels".to_string()));
    }
    if n > i32::MAX as usize {
        return Err(ComputeError::InvalidInput(format!(
            "{n} elements exceed the kernels' int index range"
        )));
    }
    Ok(n)
}

fn check_entry_points<P: BuiltProgram>(program: &P, kernels: &KernelNames) -> ComputeResult<()> {
    let missing: Vec<&str> = Stage::ALL
        .iter()
        .map(|&s| kernels.for_stage(s))
        .filter(|name| !program.has_entry_point(name))
        .collect();
    if missing.is_empty() {
        return Ok(());
    }

    let diag = program.diagnostics();
    let mut log = diag.log.clone();
    for name in missing {
        if !log.is_empty() {
            log.push('\n');
        }
        log.push_str(&format!("error: program has no kernel '{name}'"));
    }
    Err(BuildDiagnostics { status: BuildStatus::Error, options: diag.options.clone(), log }.into())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::HostBackend;
    use histeq_core::{FixedScale, Identity, ImageMeta};

    fn pipeline(bins: usize) -> HistogramPipeline<HostBackend> {
        let config = PipelineConfig::default()
            .with_bins(bins)
            .with_normalization(FixedScale { offset: 0, scale: 1.0 });
        HistogramPipeline::new(HostBackend::new(), &ProgramSource::builtin_histogram(), config).unwrap()
    }

    #[test]
    fn test_validate_rejects_zero_bins() {
        let err = PipelineConfig::default().with_bins(0).validate().unwrap_err();
        assert!(matches!(err, ComputeError::Core(_)));
    }

    #[test]
    fn test_validate_rejects_blank_kernel_name() {
        let kernels = KernelNames { scan: " ".into(), ..KernelNames::default() };
        let err = PipelineConfig::default().with_kernels(kernels).validate().unwrap_err();
        assert!(err.to_string().contains("scan"));
    }

    #[test]
    fn test_missing_entry_point_is_build_error() {
        let kernels = KernelNames { apply: "applyLut".into(), ..KernelNames::default() };
        let config = PipelineConfig::default().with_kernels(kernels);
        let backend = HostBackend::new();
        let err = HistogramPipeline::new(backend, &ProgramSource::builtin_histogram(), config).unwrap_err();
        let diag = err.build_diagnostics().unwrap();
        assert!(diag.log.contains("no kernel 'applyLut'"));
    }

    #[test]
    fn test_stages_individually() {
        let p = pipeline(8);
        let pixels = [64u8, 64, 64, 64, 96, 96, 96, 96, 96, 96];
        let image = ImageView::new(&pixels, ImageMeta::planar(10, 1, 1).unwrap());

        let hist = p.build_histogram(&image).unwrap();
        assert_eq!(hist.value, [0, 0, 4, 6, 0, 0, 0, 0]);
        assert!(hist.elapsed_ns.is_some());

        let cum = p.scan(&hist.value).unwrap();
        assert_eq!(cum.value, [0, 0, 4, 10, 10, 10, 10, 10]);

        let out = p.apply_lut(&image, &cum.value).unwrap();
        assert_eq!(out.value, [4, 4, 4, 4, 10, 10, 10, 10, 10, 10]);
    }

    #[test]
    fn test_scan_length_checked() {
        let p = pipeline(8);
        let err = p.scan(&[1, 2, 3]).unwrap_err();
        assert!(matches!(err, ComputeError::TransferSizeMismatch { expected: 32, actual: 12, .. }));
    }

    /// Host device whose `fault` kernel completes with an execution error.
    struct FaultingDevice {
        host: HostBackend,
        fault: &'static str,
    }

    struct FaultingEvent {
        inner: crate::backend::HostEvent,
        failed: bool,
    }

    impl CompletionToken for FaultingEvent {
        fn wait(&self) -> ComputeResult<()> {
            if self.failed {
                return Err(ComputeError::Device("CL_OUT_OF_RESOURCES".into()));
            }
            self.inner.wait()
        }

        fn profiling(&self) -> ComputeResult<crate::profiling::ProfilingInfo> {
            self.inner.profiling()
        }
    }

    impl ComputeBackend for FaultingDevice {
        type Buffer = crate::backend::HostBuffer;
        type Program = crate::backend::HostProgram;
        type Event = FaultingEvent;

        fn name(&self) -> &'static str {
            "faulting"
        }
        fn device_info(&self) -> &crate::context::DeviceInfo {
            self.host.device_info()
        }
        fn profiling_enabled(&self) -> bool {
            self.host.profiling_enabled()
        }
        fn build_program(&self, source: &ProgramSource, options: &str) -> ComputeResult<Self::Program> {
            self.host.build_program(source, options)
        }
        fn allocate(&self, label: &str, size: usize, mode: AccessMode) -> ComputeResult<Self::Buffer> {
            self.host.allocate(label, size, mode)
        }
        fn upload(&self, buffer: &mut Self::Buffer, data: &[u8]) -> ComputeResult<()> {
            self.host.upload(buffer, data)
        }
        fn download(&self, buffer: &Self::Buffer, dest: &mut [u8]) -> ComputeResult<()> {
            self.host.download(buffer, dest)
        }
        fn dispatch(
            &self,
            program: &Self::Program,
            invocation: &KernelInvocation<'_, Self::Buffer>,
        ) -> ComputeResult<Self::Event> {
            let inner = self.host.dispatch(program, invocation)?;
            Ok(FaultingEvent { inner, failed: invocation.entry_point() == self.fault })
        }
        fn finish(&self) -> ComputeResult<()> {
            self.host.finish()
        }
    }

    #[test]
    fn test_execution_fault_is_tagged_dispatch_error() {
        let device = FaultingDevice { host: HostBackend::new(), fault: "blelloch" };
        let p = HistogramPipeline::new(device, &ProgramSource::builtin_histogram(), PipelineConfig::default())
            .unwrap();
        let pixels = [1u8, 2, 3, 4];
        let image = ImageView::new(&pixels, ImageMeta::planar(4, 1, 1).unwrap());

        let err = p.run(&image).unwrap_err();
        assert_eq!(err.kind(), crate::ErrorKind::KernelDispatch);
        assert_eq!(err.stage(), Some("scan"));
        assert!(err.to_string().contains("CL_OUT_OF_RESOURCES"));
        // apply never dispatched
        assert_eq!(p.backend().host.stats().dispatches, 2);
    }

    #[test]
    fn test_scan_wraps_on_overflow() {
        let p = pipeline(2);
        let cum = p.scan(&[i32::MAX, 1]).unwrap();
        assert_eq!(cum.value, [i32::MAX, i32::MIN]);
    }

    #[test]
    fn test_identity_normalization_256() {
        let config = PipelineConfig::default().with_normalization(Identity);
        let p = HistogramPipeline::new(HostBackend::new(), &ProgramSource::builtin_histogram(), config)
            .unwrap();
        let pixels: Vec<u8> = (0..=255).collect();
        let image = ImageView::new(&pixels, ImageMeta::planar(256, 1, 1).unwrap());
        let report = p.run(&image).unwrap();
        // one pixel per bucket: cumulative[i] = i + 1
        assert_eq!(report.cumulative[0], 1);
        assert_eq!(report.cumulative[255], 256);
        assert_eq!(report.output[0], 1);
        assert_eq!(report.output[254], 255);
        assert_eq!(report.output[255], 255);
    }
}
