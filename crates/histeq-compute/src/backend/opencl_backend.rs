//! OpenCL backend (feature `opencl`).
//!
//! One platform/device pair, one context, one in-order queue. Transfers are
//! blocking; kernel objects are created per dispatch from the built program.

use std::ptr;

use opencl3::command_queue::{CL_QUEUE_PROFILING_ENABLE, CommandQueue};
use opencl3::context::Context;
use opencl3::device::{
    CL_DEVICE_TYPE_ACCELERATOR, CL_DEVICE_TYPE_ALL, CL_DEVICE_TYPE_CPU, CL_DEVICE_TYPE_GPU, Device,
};
use opencl3::event::Event;
use opencl3::kernel::Kernel;
use opencl3::memory::{Buffer, CL_MEM_READ_ONLY, ClMem, CL_MEM_READ_WRITE, CL_MEM_WRITE_ONLY};
use opencl3::platform::{Platform, get_platforms};
use opencl3::program::Program;
use opencl3::types::{CL_BLOCKING, cl_device_type};
use tracing::{debug, error, info, warn};

use super::primitives::{
    AccessMode, BuiltProgram, CompletionToken, ComputeBackend, DeviceBuffer, KernelArg,
    KernelInvocation, check_transfer,
};
use crate::context::{ContextConfig, DeviceInfo, DeviceKind, DeviceSelection, PlatformInfo};
use crate::profiling::ProfilingInfo;
use crate::program::{BuildDiagnostics, BuildStatus, ProgramSource};
use crate::{ComputeError, ComputeResult};

fn device_kind(ty: cl_device_type) -> DeviceKind {
    if ty & CL_DEVICE_TYPE_GPU != 0 {
        DeviceKind::Gpu
    } else if ty & CL_DEVICE_TYPE_CPU != 0 {
        DeviceKind::Cpu
    } else if ty & CL_DEVICE_TYPE_ACCELERATOR != 0 {
        DeviceKind::Accelerator
    } else {
        DeviceKind::Other
    }
}

fn describe_device(dev: &Device) -> DeviceInfo {
    DeviceInfo {
        name: dev.name().unwrap_or_default().trim().to_string(),
        vendor: dev.vendor().unwrap_or_default().trim().to_string(),
        kind: device_kind(dev.dev_type().unwrap_or(0)),
        global_mem_bytes: dev.global_mem_size().unwrap_or(0),
        max_work_group_size: dev.max_work_group_size().unwrap_or(1),
    }
}

fn describe_platform(platform: &Platform) -> PlatformInfo {
    let devices = platform
        .get_devices(CL_DEVICE_TYPE_ALL)
        .unwrap_or_default()
        .into_iter()
        .map(|id| describe_device(&Device::new(id)))
        .collect();
    PlatformInfo {
        name: platform.name().unwrap_or_default().trim().to_string(),
        vendor: platform.vendor().unwrap_or_default().trim().to_string(),
        version: platform.version().unwrap_or_default().trim().to_string(),
        devices,
    }
}

/// Device buffer backed by `Buffer<u8>`.
pub struct OpenClBuffer {
    buffer: Buffer<u8>,
    label: String,
    mode: AccessMode,
    size: usize,
}

// SAFETY: cl_mem handles are reference counted by the runtime and may be
// used from any thread; the queue serializes commands.
unsafe impl Send for OpenClBuffer {}
unsafe impl Sync for OpenClBuffer {}

impl DeviceBuffer for OpenClBuffer {
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

/// A program built for the context's devices.
pub struct OpenClProgram {
    program: Program,
    entry_points: Vec<String>,
    diagnostics: BuildDiagnostics,
}

unsafe impl Send for OpenClProgram {}
unsafe impl Sync for OpenClProgram {}

impl BuiltProgram for OpenClProgram {
    fn entry_points(&self) -> &[String] {
        &self.entry_points
    }

    fn diagnostics(&self) -> &BuildDiagnostics {
        &self.diagnostics
    }
}

/// Completion token wrapping a `cl_event`.
pub struct OpenClEvent {
    event: Event,
    kernel: String,
    profiling: bool,
}

impl CompletionToken for OpenClEvent {
    fn wait(&self) -> ComputeResult<()> {
        self.event
            .wait()
            .map_err(|e| ComputeError::dispatch(&self.kernel, format!("execution failed: {e}")))
    }

    fn profiling(&self) -> ComputeResult<ProfilingInfo> {
        if !self.profiling {
            return Err(ComputeError::Profiling(
                "command queue was created without CL_QUEUE_PROFILING_ENABLE".to_string(),
            ));
        }
        self.wait()?;
        let read = |what: &str, value: Result<u64, opencl3::error_codes::ClError>| {
            value.map_err(|e| ComputeError::Profiling(format!("{what}: {e}")))
        };
        Ok(ProfilingInfo {
            queued: read("queued", self.event.profiling_command_queued())?,
            submitted: read("submitted", self.event.profiling_command_submit())?,
            start: read("start", self.event.profiling_command_start())?,
            end: read("end", self.event.profiling_command_end())?,
        })
    }
}

/// OpenCL compute backend.
#[derive(Debug)]
pub struct OpenClBackend {
    device: Device,
    context: Context,
    queue: CommandQueue,
    info: DeviceInfo,
    profiling: bool,
}

// SAFETY: the OpenCL runtime guarantees thread safety for contexts, queues
// and memory objects. The raw pointers in opencl3 types are opaque handles.
unsafe impl Send for OpenClBackend {}
unsafe impl Sync for OpenClBackend {}

impl OpenClBackend {
    /// True when at least one platform exposes at least one device.
    pub fn is_available() -> bool {
        get_platforms()
            .map(|ps| ps.iter().any(|p| !p.get_devices(CL_DEVICE_TYPE_ALL).unwrap_or_default().is_empty()))
            .unwrap_or(false)
    }

    /// Every platform with its devices. An absent runtime yields no platforms.
    pub fn platforms() -> ComputeResult<Vec<PlatformInfo>> {
        let platforms = get_platforms().unwrap_or_default();
        Ok(platforms.iter().map(describe_platform).collect())
    }

    /// Open a device by platform/device index.
    pub fn open(selection: DeviceSelection, profiling: bool) -> ComputeResult<Self> {
        let platforms = get_platforms().unwrap_or_default();
        let platform = platforms.get(selection.platform).ok_or_else(|| ComputeError::DeviceSelection {
            platform: selection.platform,
            device: selection.device,
            reason: format!("only {} platform(s) available", platforms.len()),
        })?;
        let ids = platform
            .get_devices(CL_DEVICE_TYPE_ALL)
            .map_err(|e| ComputeError::Device(format!("enumerate devices: {e}")))?;
        let id = *ids.get(selection.device).ok_or_else(|| ComputeError::DeviceSelection {
            platform: selection.platform,
            device: selection.device,
            reason: format!(
                "platform '{}' has only {} device(s)",
                platform.name().unwrap_or_default().trim(),
                ids.len()
            ),
        })?;

        let device = Device::new(id);
        let context = Context::from_device(&device)
            .map_err(|e| ComputeError::Device(format!("create context: {e}")))?;

        // OpenCL 1.2 queue API for portability.
        let props = if profiling { CL_QUEUE_PROFILING_ENABLE } else { 0 };
        #[allow(deprecated)]
        let queue = CommandQueue::create_default(&context, props)
            .map_err(|e| ComputeError::Device(format!("create command queue: {e}")))?;

        let info = describe_device(&device);
        info!(
            platform = %platform.name().unwrap_or_default().trim(),
            device = %info.name,
            kind = %info.kind,
            profiling,
            "opened OpenCL device"
        );
        Ok(Self { device, context, queue, info, profiling })
    }

    pub fn from_config(config: &ContextConfig) -> ComputeResult<Self> {
        Self::open(config.selection, config.profiling)
    }

    fn diagnostics(&self, program: &Program, options: &str) -> BuildDiagnostics {
        let id = self.device.id();
        BuildDiagnostics {
            status: program
                .get_build_status(id)
                .map(BuildStatus::from_code)
                .unwrap_or(BuildStatus::None),
            options: program.get_build_options(id).unwrap_or_else(|_| options.to_string()),
            log: program.get_build_log(id).unwrap_or_default(),
        }
    }
}

impl ComputeBackend for OpenClBackend {
    type Buffer = OpenClBuffer;
    type Program = OpenClProgram;
    type Event = OpenClEvent;

    fn name(&self) -> &'static str {
        "opencl"
    }

    fn device_info(&self) -> &DeviceInfo {
        &self.info
    }

    fn profiling_enabled(&self) -> bool {
        self.profiling
    }

    fn build_program(&self, source: &ProgramSource, options: &str) -> ComputeResult<OpenClProgram> {
        let mut program = match Program::create_from_sources(&self.context, &source.texts()) {
            Ok(p) => p,
            Err(e) => {
                error!(error = %e, "cannot create program object");
                return Err(BuildDiagnostics {
                    status: BuildStatus::Other(e.0),
                    options: options.to_string(),
                    log: e.to_string(),
                }
                .into());
            }
        };

        if let Err(e) = program.build(self.context.devices(), options) {
            let diag = self.diagnostics(&program, options);
            error!(error = %e, status = %diag.status, "program build failed:\n{}", diag.log);
            return Err(diag.into());
        }

        let diagnostics = self.diagnostics(&program, options);
        if !diagnostics.log.trim().is_empty() {
            warn!(log = %diagnostics.log, "program built with messages");
        }
        let entry_points: Vec<String> = program
            .kernel_names()
            .split(';')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(String::from)
            .collect();
        info!(entry_points = ?entry_points, options, "program built");
        Ok(OpenClProgram { program, entry_points, diagnostics })
    }

    fn allocate(&self, label: &str, size: usize, mode: AccessMode) -> ComputeResult<OpenClBuffer> {
        let flags = match mode {
            AccessMode::ReadOnly => CL_MEM_READ_ONLY,
            AccessMode::WriteOnly => CL_MEM_WRITE_ONLY,
            AccessMode::ReadWrite => CL_MEM_READ_WRITE,
        };
        let mut buffer = unsafe {
            Buffer::<u8>::create(&self.context, flags, size, ptr::null_mut())
                .map_err(|e| ComputeError::Device(format!("allocate '{label}' ({size} bytes): {e}")))?
        };
        unsafe {
            self.queue
                .enqueue_fill_buffer(&mut buffer, &[0u8], 0, size, &[])
                .and_then(|ev| ev.wait())
                .map_err(|e| ComputeError::Device(format!("zero-fill '{label}': {e}")))?;
        }
        debug!(label, size, ?mode, "allocate");
        Ok(OpenClBuffer { buffer, label: label.to_string(), mode, size })
    }

    fn upload(&self, buffer: &mut OpenClBuffer, data: &[u8]) -> ComputeResult<()> {
        check_transfer(buffer, data.len())?;
        debug!(label = %buffer.label, bytes = data.len(), "upload");
        unsafe {
            self.queue
                .enqueue_write_buffer(&mut buffer.buffer, CL_BLOCKING, 0, data, &[])
                .map_err(|e| ComputeError::Device(format!("write '{}': {e}", buffer.label)))?;
        }
        Ok(())
    }

    fn download(&self, buffer: &OpenClBuffer, dest: &mut [u8]) -> ComputeResult<()> {
        check_transfer(buffer, dest.len())?;
        debug!(label = %buffer.label, bytes = dest.len(), "download");
        unsafe {
            self.queue
                .enqueue_read_buffer(&buffer.buffer, CL_BLOCKING, 0, dest, &[])
                .map_err(|e| ComputeError::Device(format!("read '{}': {e}", buffer.label)))?;
        }
        Ok(())
    }

    fn dispatch(
        &self,
        program: &OpenClProgram,
        invocation: &KernelInvocation<'_, OpenClBuffer>,
    ) -> ComputeResult<OpenClEvent> {
        let entry = invocation.entry_point();
        let range = invocation.range();
        if !program.has_entry_point(entry) {
            return Err(ComputeError::dispatch(entry, format!("program has no kernel '{entry}'")));
        }

        let kernel = Kernel::create(&program.program, entry)
            .map_err(|e| ComputeError::dispatch(entry, format!("create kernel: {e}")))?;
        let expected = kernel
            .num_args()
            .map_err(|e| ComputeError::dispatch(entry, format!("query argument count: {e}")))?;
        let args = invocation.args();
        if args.len() != expected as usize {
            return Err(ComputeError::dispatch(
                entry,
                format!("kernel takes {expected} arguments, {} bound", args.len()),
            ));
        }

        for (index, arg) in (0..expected).zip(args) {
            let bound = unsafe {
                match arg {
                    KernelArg::Buffer(b) => kernel.set_arg(index, &b.buffer.get()),
                    KernelArg::Int(v) => kernel.set_arg(index, v),
                    KernelArg::UInt(v) => kernel.set_arg(index, v),
                    KernelArg::Float(v) => kernel.set_arg(index, v),
                    KernelArg::Local(bytes) => kernel.set_arg_local_buffer(index, *bytes),
                }
            };
            bound.map_err(|e| ComputeError::dispatch(entry, format!("argument {index}: {e}")))?;
        }

        let global = [range.global];
        let local = range.local.map(|l| [l]);
        let local_ptr = local.as_ref().map_or(ptr::null(), |l| l.as_ptr());
        let event = unsafe {
            self.queue.enqueue_nd_range_kernel(
                kernel.get(),
                1,
                ptr::null(),
                global.as_ptr(),
                local_ptr,
                &[],
            )
        }
        .map_err(|e| ComputeError::dispatch(entry, format!("enqueue: {e}")))?;
        debug!(kernel = entry, global = range.global, local = ?range.local, "dispatch");
        Ok(OpenClEvent { event, kernel: entry.to_string(), profiling: self.profiling })
    }

    fn finish(&self) -> ComputeResult<()> {
        self.queue
            .finish()
            .map_err(|e| ComputeError::Device(format!("finish queue: {e}")))
    }
}
