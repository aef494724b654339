//! Host implementations of the built-in kernels.
//!
//! Argument lists match `kernels/histogram.cl` and `kernels/vector.cl`
//! position for position, so the pipelines bind the same invocation on
//! every backend.

use rayon::prelude::*;

use histeq_core::scan::{down_sweep, up_sweep};
use histeq_core::{COUNTER_BYTES, Counter, INTENSITY_LEVELS};

use super::host_backend::HostBuffer;
use super::primitives::{DeviceBuffer, IndexSpace, KernelArg};

pub(crate) type HostKernel = fn(&KernelCall<'_>) -> Result<(), String>;

/// Host implementation of a kernel entry point.
pub(crate) fn lookup(name: &str) -> Option<HostKernel> {
    match name {
        "createHist" => Some(create_hist),
        "blelloch" => Some(blelloch),
        "applyHistogram" => Some(apply_histogram),
        "add" => Some(add),
        "mult" => Some(mult),
        _ => None,
    }
}

pub(crate) fn has_host_impl(name: &str) -> bool {
    lookup(name).is_some()
}

/// Bound arguments and index space of one host dispatch.
pub(crate) struct KernelCall<'a> {
    args: &'a [KernelArg<'a, HostBuffer>],
    range: IndexSpace,
}

impl<'a> KernelCall<'a> {
    pub(crate) fn new(args: &'a [KernelArg<'a, HostBuffer>], range: IndexSpace) -> Self {
        Self { args, range }
    }

    fn expect_count(&self, n: usize) -> Result<(), String> {
        if self.args.len() != n {
            return Err(format!("expected {n} argument(s), got {}", self.args.len()));
        }
        Ok(())
    }

    fn buffer(&self, i: usize) -> Result<&'a HostBuffer, String> {
        match self.args.get(i) {
            Some(KernelArg::Buffer(b)) => Ok(*b),
            Some(other) => Err(format!("argument {i}: expected buffer, got {}", other.kind())),
            None => Err(format!("argument {i} is missing")),
        }
    }

    /// Buffer that must hold at least `bytes` and allow the given access.
    fn sized_buffer(&self, i: usize, bytes: usize, write: bool) -> Result<&'a HostBuffer, String> {
        let buf = self.buffer(i)?;
        if buf.size_bytes() < bytes {
            return Err(format!(
                "argument {i}: buffer '{}' holds {} bytes, kernel touches {bytes}",
                buf.label(),
                buf.size_bytes()
            ));
        }
        if write && !buf.mode().writable() {
            return Err(format!("argument {i}: buffer '{}' is read-only", buf.label()));
        }
        if !write && !buf.mode().readable() {
            return Err(format!("argument {i}: buffer '{}' is write-only", buf.label()));
        }
        Ok(buf)
    }

    fn positive_int(&self, i: usize) -> Result<usize, String> {
        match self.args.get(i) {
            Some(KernelArg::Int(v)) if *v > 0 => Ok(*v as usize),
            Some(KernelArg::Int(v)) => Err(format!("argument {i}: expected a positive int, got {v}")),
            Some(other) => Err(format!("argument {i}: expected int, got {}", other.kind())),
            None => Err(format!("argument {i} is missing")),
        }
    }

    fn local_bytes(&self, i: usize) -> Result<usize, String> {
        match self.args.get(i) {
            Some(KernelArg::Local(bytes)) => Ok(*bytes),
            Some(other) => Err(format!("argument {i}: expected local scratch, got {}", other.kind())),
            None => Err(format!("argument {i} is missing")),
        }
    }
}

/// The host cannot lock one buffer for reading and writing at once.
fn distinct(buffers: &[&HostBuffer]) -> Result<(), String> {
    for (i, a) in buffers.iter().enumerate() {
        if let Some(b) = buffers[i + 1..].iter().find(|b| b.id() == a.id()) {
            return Err(format!("buffer '{}' is bound to more than one argument", b.label()));
        }
    }
    Ok(())
}

#[inline]
fn bucket(value: u8, bins: usize) -> usize {
    (value as usize * bins) / INTENSITY_LEVELS
}

/// `createHist(image, hist, bins)`: one increment per work item.
fn create_hist(call: &KernelCall<'_>) -> Result<(), String> {
    call.expect_count(3)?;
    let n = call.range.global;
    let bins = call.positive_int(2)?;
    let image = call.sized_buffer(0, n, false)?;
    let hist = call.sized_buffer(1, bins * COUNTER_BYTES, true)?;
    distinct(&[image, hist])?;

    let src = image.read()?;
    let pixels = &bytemuck::cast_slice::<u32, u8>(&src)[..n];
    let partial = pixels
        .par_chunks(64 * 1024)
        .fold(
            || vec![0 as Counter; bins],
            |mut acc, chunk| {
                for &v in chunk {
                    acc[bucket(v, bins)] += 1;
                }
                acc
            },
        )
        .reduce(
            || vec![0; bins],
            |mut a, b| {
                a.iter_mut().zip(b).for_each(|(x, y)| *x += y);
                a
            },
        );

    let mut dst = hist.write()?;
    let counts = &mut bytemuck::cast_slice_mut::<u32, Counter>(&mut dst)[..bins];
    counts
        .iter_mut()
        .zip(partial)
        .for_each(|(c, p)| *c = c.wrapping_add(p));
    Ok(())
}

/// `blelloch(hist, scratch, n)`: inclusive scan of the first `n` counters in
/// one work-group spanning the whole index space.
fn blelloch(call: &KernelCall<'_>) -> Result<(), String> {
    call.expect_count(3)?;
    let n = call.positive_int(2)?;
    let scratch = call.local_bytes(1)?;
    let hist = call.sized_buffer(0, n * COUNTER_BYTES, true)?;

    let size = call.range.local.unwrap_or(call.range.global);
    if call.range.global != size {
        return Err(format!(
            "scan runs as one work-group; global size {} != local size {size}",
            call.range.global
        ));
    }
    if !size.is_power_of_two() {
        return Err(format!("work-group size {size} is not a power of two"));
    }
    if size < n {
        return Err(format!("work-group of {size} cannot scan {n} buckets"));
    }
    if scratch < size * COUNTER_BYTES {
        return Err(format!(
            "local scratch of {scratch} bytes cannot hold {size} counters"
        ));
    }

    let mut dst = hist.write()?;
    let counts = &mut bytemuck::cast_slice_mut::<u32, Counter>(&mut dst)[..n];
    let mut tree = vec![0 as Counter; size];
    tree[..n].copy_from_slice(counts);

    up_sweep(&mut tree);
    down_sweep(&mut tree);

    counts
        .iter_mut()
        .zip(&tree)
        .for_each(|(c, &prefix)| *c = prefix.wrapping_add(*c));
    Ok(())
}

/// `applyHistogram(image, output, lut, bins)`: `output = clamp(lut[bucket])`.
fn apply_histogram(call: &KernelCall<'_>) -> Result<(), String> {
    call.expect_count(4)?;
    let n = call.range.global;
    let bins = call.positive_int(3)?;
    let image = call.sized_buffer(0, n, false)?;
    let output = call.sized_buffer(1, n, true)?;
    let lut = call.sized_buffer(2, bins * COUNTER_BYTES, false)?;
    distinct(&[image, output, lut])?;

    let src = image.read()?;
    let table = lut.read()?;
    let mut out = output.write()?;

    let pixels = &bytemuck::cast_slice::<u32, u8>(&src)[..n];
    let table = &bytemuck::cast_slice::<u32, Counter>(&table)[..bins];
    bytemuck::cast_slice_mut::<u32, u8>(&mut out)[..n]
        .par_iter_mut()
        .zip(pixels.par_iter())
        .for_each(|(o, &v)| *o = table[bucket(v, bins)].clamp(0, 255) as u8);
    Ok(())
}

fn elementwise(call: &KernelCall<'_>, op: fn(f32, f32) -> f32) -> Result<(), String> {
    call.expect_count(3)?;
    let n = call.range.global;
    let bytes = n * std::mem::size_of::<f32>();
    let a = call.sized_buffer(0, bytes, false)?;
    let b = call.sized_buffer(1, bytes, false)?;
    let c = call.sized_buffer(2, bytes, true)?;
    distinct(&[a, b, c])?;

    let lhs = a.read()?;
    let rhs = b.read()?;
    let mut out = c.write()?;
    let lhs = &bytemuck::cast_slice::<u32, f32>(&lhs)[..n];
    let rhs = &bytemuck::cast_slice::<u32, f32>(&rhs)[..n];
    bytemuck::cast_slice_mut::<u32, f32>(&mut out)[..n]
        .par_iter_mut()
        .zip(lhs.par_iter().zip(rhs.par_iter()))
        .for_each(|(o, (&x, &y))| *o = op(x, y));
    Ok(())
}

/// `add(A, B, C)`: `C = A + B`.
fn add(call: &KernelCall<'_>) -> Result<(), String> {
    elementwise(call, |x, y| x + y)
}

/// `mult(A, B, C)`: `C = A * B`.
fn mult(call: &KernelCall<'_>) -> Result<(), String> {
    elementwise(call, |x, y| x * y)
}
