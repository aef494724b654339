//! Host backend: every kernel runs on the CPU with rayon.
//!
//! Always available. It behaves like a device in every way the pipeline can
//! observe: buffers have a fixed size and access mode, programs are checked
//! by [`host_compiler`](super::host_compiler) and carry a build log, and
//! dispatches return completion tokens with timestamps.

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Instant;

use tracing::{debug, error, info, warn};

use super::host_compiler;
use super::host_kernels::{self, KernelCall};
use super::primitives::{
    AccessMode, BuiltProgram, CompletionToken, ComputeBackend, DeviceBuffer, KernelInvocation,
    check_transfer,
};
use crate::context::{ContextConfig, DeviceInfo, DeviceKind, DeviceSelection, PlatformInfo};
use crate::profiling::ProfilingInfo;
use crate::program::{BuildDiagnostics, BuildStatus, ProgramSource};
use crate::{ComputeError, ComputeResult};

/// Largest single work-group the host accepts.
pub const HOST_MAX_WORK_GROUP: usize = 1 << 24;

/// Host buffer. Storage is word-aligned so it can be viewed as `i32`/`f32`.
pub struct HostBuffer {
    id: u64,
    label: String,
    mode: AccessMode,
    size: usize,
    words: RwLock<Vec<u32>>,
}

impl HostBuffer {
    pub(crate) fn id(&self) -> u64 {
        self.id
    }

    pub(crate) fn read(&self) -> Result<RwLockReadGuard<'_, Vec<u32>>, String> {
        self.words
            .read()
            .map_err(|_| format!("buffer '{}' is poisoned", self.label))
    }

    pub(crate) fn write(&self) -> Result<RwLockWriteGuard<'_, Vec<u32>>, String> {
        self.words
            .write()
            .map_err(|_| format!("buffer '{}' is poisoned", self.label))
    }
}

impl DeviceBuffer for HostBuffer {
    fn size_bytes(&self) -> usize {
        self.size
    }

    fn mode(&self) -> AccessMode {
        self.mode
    }

    fn label(&self) -> &str {
        &self.label
    }
}

impl std::fmt::Debug for HostBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HostBuffer")
            .field("label", &self.label)
            .field("mode", &self.mode)
            .field("size", &self.size)
            .finish()
    }
}

/// A program that passed the host checks.
#[derive(Debug, Clone)]
pub struct HostProgram {
    entry_points: Vec<String>,
    diagnostics: BuildDiagnostics,
}

impl BuiltProgram for HostProgram {
    fn entry_points(&self) -> &[String] {
        &self.entry_points
    }

    fn diagnostics(&self) -> &BuildDiagnostics {
        &self.diagnostics
    }
}

/// Completion token. Host dispatches finish before they return.
#[derive(Debug, Clone, Copy)]
pub struct HostEvent {
    info: ProfilingInfo,
    profiling: bool,
}

impl CompletionToken for HostEvent {
    fn wait(&self) -> ComputeResult<()> {
        Ok(())
    }

    fn profiling(&self) -> ComputeResult<ProfilingInfo> {
        if !self.profiling {
            return Err(ComputeError::Profiling(
                "device was opened without profiling".to_string(),
            ));
        }
        Ok(self.info)
    }
}

/// Operation counts since the backend was opened.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HostStats {
    pub builds: usize,
    pub allocations: usize,
    pub uploads: usize,
    pub downloads: usize,
    pub dispatches: usize,
}

#[derive(Default)]
struct Counters {
    builds: AtomicUsize,
    allocations: AtomicUsize,
    uploads: AtomicUsize,
    downloads: AtomicUsize,
    dispatches: AtomicUsize,
}

fn bump(counter: &AtomicUsize) {
    counter.fetch_add(1, Ordering::Relaxed);
}

/// Host compute backend.
pub struct HostBackend {
    info: DeviceInfo,
    profiling: bool,
    epoch: Instant,
    next_id: AtomicU64,
    counters: Counters,
}

impl HostBackend {
    /// Open the host device with profiling enabled.
    pub fn new() -> Self {
        Self::with_profiling(true)
    }

    pub fn with_profiling(profiling: bool) -> Self {
        Self {
            info: host_device(),
            profiling,
            epoch: Instant::now(),
            next_id: AtomicU64::new(0),
            counters: Counters::default(),
        }
    }

    /// Open by platform/device index. Only `(0, 0)` exists.
    pub fn open(selection: DeviceSelection, profiling: bool) -> ComputeResult<Self> {
        let platforms = Self::platforms();
        let (platform, device) = selection.resolve(&platforms)?;
        info!(platform = %platform.name, device = %device.name, profiling, "opened host device");
        Ok(Self::with_profiling(profiling))
    }

    pub fn from_config(config: &ContextConfig) -> ComputeResult<Self> {
        Self::open(config.selection, config.profiling)
    }

    /// The host is always available.
    pub fn is_available() -> bool {
        true
    }

    /// The single host platform with its single device.
    pub fn platforms() -> Vec<PlatformInfo> {
        vec![PlatformInfo {
            name: "Host".to_string(),
            vendor: "histeq".to_string(),
            version: concat!("host-", env!("CARGO_PKG_VERSION")).to_string(),
            devices: vec![host_device()],
        }]
    }

    pub fn stats(&self) -> HostStats {
        let c = &self.counters;
        HostStats {
            builds: c.builds.load(Ordering::Relaxed),
            allocations: c.allocations.load(Ordering::Relaxed),
            uploads: c.uploads.load(Ordering::Relaxed),
            downloads: c.downloads.load(Ordering::Relaxed),
            dispatches: c.dispatches.load(Ordering::Relaxed),
        }
    }

    fn now_ns(&self) -> u64 {
        self.epoch.elapsed().as_nanos() as u64
    }
}

impl Default for HostBackend {
    fn default() -> Self {
        Self::new()
    }
}

fn host_device() -> DeviceInfo {
    // Fall back to 4GB if detection fails
    let memory = sys_info::mem_info()
        .map(|m| m.total * 1024)
        .unwrap_or(4 * 1024 * 1024 * 1024);
    DeviceInfo {
        name: format!("Host CPU (rayon, {} threads)", rayon::current_num_threads()),
        vendor: "histeq".to_string(),
        kind: DeviceKind::Cpu,
        global_mem_bytes: memory,
        max_work_group_size: HOST_MAX_WORK_GROUP,
    }
}

impl ComputeBackend for HostBackend {
    type Buffer = HostBuffer;
    type Program = HostProgram;
    type Event = HostEvent;

    fn name(&self) -> &'static str {
        "host"
    }

    fn device_info(&self) -> &DeviceInfo {
        &self.info
    }

    fn profiling_enabled(&self) -> bool {
        self.profiling
    }

    fn build_program(&self, source: &ProgramSource, options: &str) -> ComputeResult<HostProgram> {
        bump(&self.counters.builds);
        match host_compiler::compile(source, options, host_kernels::has_host_impl) {
            Ok(unit) => {
                if !unit.log.is_empty() {
                    warn!(log = %unit.log, "program built with warnings");
                }
                info!(entry_points = ?unit.entry_points, options, "program built");
                Ok(HostProgram {
                    entry_points: unit.entry_points,
                    diagnostics: BuildDiagnostics {
                        status: BuildStatus::Success,
                        options: options.to_string(),
                        log: unit.log,
                    },
                })
            }
            Err(log) => {
                error!(options, "program build failed:\n{log}");
                Err(BuildDiagnostics {
                    status: BuildStatus::Error,
                    options: options.to_string(),
                    log,
                }
                .into())
            }
        }
    }

    fn allocate(&self, label: &str, size: usize, mode: AccessMode) -> ComputeResult<HostBuffer> {
        if size == 0 {
            return Err(ComputeError::Device(format!(
                "cannot allocate zero-sized buffer '{label}'"
            )));
        }
        bump(&self.counters.allocations);
        debug!(label, size, ?mode, "allocate");
        Ok(HostBuffer {
            id: self.next_id.fetch_add(1, Ordering::Relaxed),
            label: label.to_string(),
            mode,
            size,
            words: RwLock::new(vec![0u32; size.div_ceil(4)]),
        })
    }

    fn upload(&self, buffer: &mut HostBuffer, data: &[u8]) -> ComputeResult<()> {
        check_transfer(buffer, data.len())?;
        bump(&self.counters.uploads);
        debug!(label = %buffer.label, bytes = data.len(), "upload");
        let size = buffer.size;
        let words = buffer.words.get_mut().map_err(|_| poisoned(&buffer.label))?;
        bytemuck::cast_slice_mut::<u32, u8>(words)[..size].copy_from_slice(data);
        Ok(())
    }

    fn download(&self, buffer: &HostBuffer, dest: &mut [u8]) -> ComputeResult<()> {
        check_transfer(buffer, dest.len())?;
        bump(&self.counters.downloads);
        debug!(label = %buffer.label, bytes = dest.len(), "download");
        let words = buffer.words.read().map_err(|_| poisoned(&buffer.label))?;
        dest.copy_from_slice(&bytemuck::cast_slice::<u32, u8>(&words)[..buffer.size]);
        Ok(())
    }

    fn dispatch(
        &self,
        program: &HostProgram,
        invocation: &KernelInvocation<'_, HostBuffer>,
    ) -> ComputeResult<HostEvent> {
        bump(&self.counters.dispatches);
        let queued = self.now_ns();
        let entry = invocation.entry_point();
        let range = invocation.range();

        if !program.has_entry_point(entry) {
            return Err(ComputeError::dispatch(entry, format!("program has no kernel '{entry}'")));
        }
        let kernel = host_kernels::lookup(entry)
            .ok_or_else(|| ComputeError::dispatch(entry, "kernel has no host implementation"))?;
        if range.global == 0 {
            return Err(ComputeError::dispatch(entry, "empty index space"));
        }
        if let Some(local) = range.local {
            if local == 0 || local > self.info.max_work_group_size {
                return Err(ComputeError::dispatch(
                    entry,
                    format!("work-group size {local} outside 1..={}", self.info.max_work_group_size),
                ));
            }
            if range.global % local != 0 {
                return Err(ComputeError::dispatch(
                    entry,
                    format!("global size {} is not a multiple of work-group size {local}", range.global),
                ));
            }
        }

        let submitted = self.now_ns();
        let start = self.now_ns();
        kernel(&KernelCall::new(invocation.args(), range))
            .map_err(|reason| ComputeError::dispatch(entry, reason))?;
        let end = self.now_ns();

        debug!(kernel = entry, global = range.global, local = ?range.local, elapsed_ns = end - start, "dispatch");
        Ok(HostEvent {
            info: ProfilingInfo { queued, submitted, start, end },
            profiling: self.profiling,
        })
    }

    fn finish(&self) -> ComputeResult<()> {
        Ok(())
    }
}

fn poisoned(label: &str) -> ComputeError {
    ComputeError::Device(format!("buffer '{label}' is poisoned"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::primitives::IndexSpace;

    #[test]
    fn test_open_only_device_zero() {
        assert!(HostBackend::open(DeviceSelection::new(0, 0), true).is_ok());
        let err = HostBackend::open(DeviceSelection::new(0, 1), true).err().unwrap();
        assert!(matches!(err, ComputeError::DeviceSelection { device: 1, .. }));
        assert!(HostBackend::open(DeviceSelection::new(1, 0), true).is_err());
    }

    #[test]
    fn test_buffers_start_zeroed_and_round_trip() {
        let host = HostBackend::new();
        let mut buf = host.allocate("b", 6, AccessMode::ReadWrite).unwrap();
        let mut out = [9u8; 6];
        host.download(&buf, &mut out).unwrap();
        assert_eq!(out, [0; 6]);

        host.upload(&mut buf, &[1, 2, 3, 4, 5, 6]).unwrap();
        host.download(&buf, &mut out).unwrap();
        assert_eq!(out, [1, 2, 3, 4, 5, 6]);
        assert_eq!(host.stats().uploads, 1);
        assert_eq!(host.stats().downloads, 2);
    }

    #[test]
    fn test_transfer_size_checked() {
        let host = HostBackend::new();
        let mut buf = host.allocate("hist", 16, AccessMode::ReadWrite).unwrap();
        let err = host.upload(&mut buf, &[0; 12]).unwrap_err();
        assert!(matches!(
            err,
            ComputeError::TransferSizeMismatch { expected: 16, actual: 12, .. }
        ));
        assert_eq!(host.stats().uploads, 0);
        assert!(host.allocate("empty", 0, AccessMode::ReadOnly).is_err());
    }

    #[test]
    fn test_build_failure_carries_diagnostics() {
        let host = HostBackend::new();
        let src = ProgramSource::with_source("bad.cl", "kernel void f( {");
        let err = host.build_program(&src, "-Werror").unwrap_err();
        let diag = err.build_diagnostics().unwrap();
        assert_eq!(diag.status, BuildStatus::Error);
        assert_eq!(diag.options, "-Werror");
        assert!(!diag.log.is_empty());
    }

    #[test]
    fn test_dispatch_unknown_entry_point() {
        let host = HostBackend::new();
        let program = host.build_program(&ProgramSource::builtin_vector(), "").unwrap();
        let inv = KernelInvocation::<HostBuffer>::new("createHist", IndexSpace::linear(4));
        let err = host.dispatch(&program, &inv).unwrap_err();
        assert_eq!(err.stage(), Some("createHist"));
    }

    #[test]
    fn test_profiling_disabled() {
        let host = HostBackend::with_profiling(false);
        let program = host.build_program(&ProgramSource::builtin_vector(), "").unwrap();
        let a = host.allocate("a", 16, AccessMode::ReadOnly).unwrap();
        let b = host.allocate("b", 16, AccessMode::ReadOnly).unwrap();
        let c = host.allocate("c", 16, AccessMode::WriteOnly).unwrap();
        let inv = KernelInvocation::new("add", IndexSpace::linear(4))
            .buffer(&a)
            .buffer(&b)
            .buffer(&c);
        let event = host.dispatch(&program, &inv).unwrap();
        event.wait().unwrap();
        assert!(matches!(event.profiling(), Err(ComputeError::Profiling(_))));
    }

    #[test]
    fn test_timestamps_ordered() {
        let host = HostBackend::new();
        let program = host.build_program(&ProgramSource::builtin_vector(), "").unwrap();
        let a = host.allocate("a", 4096, AccessMode::ReadOnly).unwrap();
        let b = host.allocate("b", 4096, AccessMode::ReadOnly).unwrap();
        let c = host.allocate("c", 4096, AccessMode::WriteOnly).unwrap();
        let inv = KernelInvocation::new("mult", IndexSpace::linear(1024))
            .buffer(&a)
            .buffer(&b)
            .buffer(&c);
        let info = host.dispatch(&program, &inv).unwrap().profiling().unwrap();
        assert!(info.queued <= info.submitted);
        assert!(info.submitted <= info.start);
        assert!(info.start <= info.end);
    }
}
