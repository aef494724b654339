//! Device primitives shared by every backend.

use std::sync::Arc;

use crate::context::DeviceInfo;
use crate::profiling::ProfilingInfo;
use crate::program::{BuildDiagnostics, ProgramSource};
use crate::{ComputeError, ComputeResult};

/// How kernels may touch a buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessMode {
    ReadOnly,
    WriteOnly,
    ReadWrite,
}

impl AccessMode {
    pub fn readable(&self) -> bool {
        !matches!(self, Self::WriteOnly)
    }

    pub fn writable(&self) -> bool {
        !matches!(self, Self::ReadOnly)
    }
}

/// Handle to a fixed-size region of device memory.
pub trait DeviceBuffer: Send + Sync {
    /// Size in bytes, fixed at allocation.
    fn size_bytes(&self) -> usize;

    fn mode(&self) -> AccessMode;

    /// Name used in errors and logs.
    fn label(&self) -> &str;
}

/// A successfully built program unit.
pub trait BuiltProgram: Send + Sync {
    /// Kernel entry points the program exposes.
    fn entry_points(&self) -> &[String];

    /// Diagnostics of the build that produced this program.
    fn diagnostics(&self) -> &BuildDiagnostics;

    fn has_entry_point(&self, name: &str) -> bool {
        self.entry_points().iter().any(|e| e == name)
    }
}

/// Completion token of a dispatched command.
pub trait CompletionToken {
    /// Block until the command has finished.
    fn wait(&self) -> ComputeResult<()>;

    /// Device timestamps. Waits first. Fails when the device was opened
    /// without profiling.
    fn profiling(&self) -> ComputeResult<ProfilingInfo>;
}

/// One positional kernel argument.
#[derive(Debug)]
pub enum KernelArg<'a, B> {
    Buffer(&'a B),
    Int(i32),
    UInt(u32),
    Float(f32),
    /// Work-group local scratch of this many bytes.
    Local(usize),
}

impl<B> KernelArg<'_, B> {
    /// Kind name used in argument errors.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Buffer(_) => "buffer",
            Self::Int(_) => "int",
            Self::UInt(_) => "uint",
            Self::Float(_) => "float",
            Self::Local(_) => "local",
        }
    }
}

impl<B> Clone for KernelArg<'_, B> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<B> Copy for KernelArg<'_, B> {}

/// One-dimensional index space of a dispatch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IndexSpace {
    pub global: usize,
    /// Work-group size; `None` lets the device choose.
    pub local: Option<usize>,
}

impl IndexSpace {
    pub fn linear(global: usize) -> Self {
        Self { global, local: None }
    }

    /// A single work-group covering the whole index space.
    pub fn single_group(size: usize) -> Self {
        Self { global: size, local: Some(size) }
    }
}

/// A kernel entry point, its bound arguments and its index space.
#[derive(Debug)]
pub struct KernelInvocation<'a, B> {
    entry_point: &'a str,
    args: Vec<KernelArg<'a, B>>,
    range: IndexSpace,
}

impl<'a, B> KernelInvocation<'a, B> {
    pub fn new(entry_point: &'a str, range: IndexSpace) -> Self {
        Self { entry_point, args: Vec::new(), range }
    }

    pub fn arg(mut self, arg: KernelArg<'a, B>) -> Self {
        self.args.push(arg);
        self
    }

    pub fn buffer(self, buffer: &'a B) -> Self {
        self.arg(KernelArg::Buffer(buffer))
    }

    pub fn int(self, value: i32) -> Self {
        self.arg(KernelArg::Int(value))
    }

    pub fn local(self, bytes: usize) -> Self {
        self.arg(KernelArg::Local(bytes))
    }

    pub fn entry_point(&self) -> &'a str {
        self.entry_point
    }

    pub fn args(&self) -> &[KernelArg<'a, B>] {
        &self.args
    }

    pub fn range(&self) -> IndexSpace {
        self.range
    }
}

/// One opened compute device: buffers, transfers, program builds and
/// kernel dispatch on a single in-order queue.
pub trait ComputeBackend: Send + Sync {
    /// Backend-specific buffer handle.
    type Buffer: DeviceBuffer;
    /// Backend-specific built program.
    type Program: BuiltProgram;
    /// Backend-specific completion token.
    type Event: CompletionToken;

    /// Backend name.
    fn name(&self) -> &'static str;

    /// The selected device.
    fn device_info(&self) -> &DeviceInfo;

    /// True when the queue records timestamps.
    fn profiling_enabled(&self) -> bool;

    /// Compile and link a program. Failures carry status, options and log.
    fn build_program(&self, source: &ProgramSource, options: &str) -> ComputeResult<Self::Program>;

    /// Allocate a zero-filled buffer of `size` bytes.
    fn allocate(&self, label: &str, size: usize, mode: AccessMode) -> ComputeResult<Self::Buffer>;

    /// Blocking host to device copy. `data` must be exactly the buffer size.
    fn upload(&self, buffer: &mut Self::Buffer, data: &[u8]) -> ComputeResult<()>;

    /// Blocking device to host copy. `dest` must be exactly the buffer size.
    fn download(&self, buffer: &Self::Buffer, dest: &mut [u8]) -> ComputeResult<()>;

    /// Enqueue a kernel.
    fn dispatch(
        &self,
        program: &Self::Program,
        invocation: &KernelInvocation<'_, Self::Buffer>,
    ) -> ComputeResult<Self::Event>;

    /// Wait for everything queued so far.
    fn finish(&self) -> ComputeResult<()>;
}

/// A shared device: several pipelines on one context and queue.
impl<D: ComputeBackend> ComputeBackend for Arc<D> {
    type Buffer = D::Buffer;
    type Program = D::Program;
    type Event = D::Event;

    fn name(&self) -> &'static str {
        (**self).name()
    }

    fn device_info(&self) -> &DeviceInfo {
        (**self).device_info()
    }

    fn profiling_enabled(&self) -> bool {
        (**self).profiling_enabled()
    }

    fn build_program(&self, source: &ProgramSource, options: &str) -> ComputeResult<Self::Program> {
        (**self).build_program(source, options)
    }

    fn allocate(&self, label: &str, size: usize, mode: AccessMode) -> ComputeResult<Self::Buffer> {
        (**self).allocate(label, size, mode)
    }

    fn upload(&self, buffer: &mut Self::Buffer, data: &[u8]) -> ComputeResult<()> {
        (**self).upload(buffer, data)
    }

    fn download(&self, buffer: &Self::Buffer, dest: &mut [u8]) -> ComputeResult<()> {
        (**self).download(buffer, dest)
    }

    fn dispatch(
        &self,
        program: &Self::Program,
        invocation: &KernelInvocation<'_, Self::Buffer>,
    ) -> ComputeResult<Self::Event> {
        (**self).dispatch(program, invocation)
    }

    fn finish(&self) -> ComputeResult<()> {
        (**self).finish()
    }
}

/// Reject a transfer whose host side differs in size from the buffer.
pub(crate) fn check_transfer<B: DeviceBuffer>(buffer: &B, host_len: usize) -> ComputeResult<()> {
    if host_len != buffer.size_bytes() {
        return Err(ComputeError::TransferSizeMismatch {
            buffer: buffer.label().to_string(),
            expected: buffer.size_bytes(),
            actual: host_len,
        });
    }
    Ok(())
}
