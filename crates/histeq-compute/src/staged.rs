//! Device buffers paired with a host mirror.
//!
//! A [`StagedBuffer`] keeps a typed host copy next to a device buffer of
//! exactly the same byte size. The size is fixed at creation; neither side
//! can grow or shrink afterwards.
//!
//! Host edits go through [`StagedBuffer::host_mut`], which marks the device
//! copy stale until [`StagedBuffer::sync_to_device`] runs. Binding a stale
//! buffer to a kernel is an error instead of a silent read of old data.
//!
//! ```
//! use histeq_compute::{AccessMode, HostBackend, StagedBuffer};
//!
//! let host = HostBackend::new();
//! let mut hist = StagedBuffer::<_, i32>::new(&host, "hist", 8, AccessMode::ReadWrite)?;
//! hist.host_mut()[2] = 4;
//! assert!(hist.device().is_err());
//! hist.sync_to_device(&host)?;
//! assert!(hist.device().is_ok());
//! # Ok::<(), histeq_compute::ComputeError>(())
//! ```

use bytemuck::Pod;
use tracing::debug;

use crate::backend::{AccessMode, ComputeBackend, DeviceBuffer};
use crate::{ComputeError, ComputeResult};

/// Device buffer plus a host mirror of `T` elements.
pub struct StagedBuffer<B, T> {
    buffer: B,
    host: Vec<T>,
    stale: bool,
}

impl<B: DeviceBuffer, T: Pod> StagedBuffer<B, T> {
    /// Allocate `len` elements on the device and a zeroed host mirror.
    ///
    /// The device copy counts as stale until the first upload.
    pub fn new<D>(device: &D, label: &str, len: usize, mode: AccessMode) -> ComputeResult<Self>
    where
        D: ComputeBackend<Buffer = B>,
    {
        let buffer = device.allocate(label, len * std::mem::size_of::<T>(), mode)?;
        Ok(Self { buffer, host: vec![T::zeroed(); len], stale: true })
    }

    /// Allocate and upload `values`.
    pub fn from_slice<D>(device: &D, label: &str, values: &[T], mode: AccessMode) -> ComputeResult<Self>
    where
        D: ComputeBackend<Buffer = B>,
    {
        let mut staged = Self::new(device, label, values.len(), mode)?;
        staged.host.copy_from_slice(values);
        staged.sync_to_device(device)?;
        Ok(staged)
    }

    pub fn host(&self) -> &[T] {
        &self.host
    }

    /// Mutable host view; marks the device copy stale.
    pub fn host_mut(&mut self) -> &mut [T] {
        self.stale = true;
        &mut self.host
    }

    /// Replace the host contents. `values` must have the same length.
    pub fn replace_host(&mut self, values: &[T]) -> ComputeResult<()> {
        if values.len() != self.host.len() {
            return Err(ComputeError::TransferSizeMismatch {
                buffer: self.buffer.label().to_string(),
                expected: self.buffer.size_bytes(),
                actual: std::mem::size_of_val(values),
            });
        }
        self.host_mut().copy_from_slice(values);
        Ok(())
    }

    /// Upload the host mirror.
    pub fn sync_to_device<D>(&mut self, device: &D) -> ComputeResult<()>
    where
        D: ComputeBackend<Buffer = B>,
    {
        device.upload(&mut self.buffer, bytemuck::cast_slice(&self.host))?;
        self.stale = false;
        Ok(())
    }

    /// Download into the host mirror. Unsynced host edits are discarded.
    pub fn sync_to_host<D>(&mut self, device: &D) -> ComputeResult<()>
    where
        D: ComputeBackend<Buffer = B>,
    {
        if self.stale {
            debug!(label = self.buffer.label(), "discarding host edits on download");
        }
        device.download(&self.buffer, bytemuck::cast_slice_mut(&mut self.host))?;
        self.stale = false;
        Ok(())
    }

    /// The device buffer, for binding to a kernel.
    pub fn device(&self) -> ComputeResult<&B> {
        if self.stale {
            return Err(ComputeError::StaleBuffer(self.buffer.label().to_string()));
        }
        Ok(&self.buffer)
    }

    pub fn is_stale(&self) -> bool {
        self.stale
    }

    pub fn len(&self) -> usize {
        self.host.len()
    }

    pub fn is_empty(&self) -> bool {
        self.host.is_empty()
    }

    /// Byte size of either side.
    pub fn byte_len(&self) -> usize {
        self.buffer.size_bytes()
    }

    pub fn into_host(self) -> Vec<T> {
        self.host
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::HostBackend;

    #[test]
    fn test_sizes_match() {
        let host = HostBackend::new();
        let staged = StagedBuffer::<_, i32>::new(&host, "hist", 300, AccessMode::ReadWrite).unwrap();
        assert_eq!(staged.byte_len(), 1200);
        assert_eq!(staged.len(), 300);
        assert!(staged.is_stale());
    }

    #[test]
    fn test_round_trip_through_device() {
        let host = HostBackend::new();
        let mut staged =
            StagedBuffer::from_slice(&host, "v", &[1.5f32, 2.5, 3.5], AccessMode::ReadWrite).unwrap();
        assert!(!staged.is_stale());

        staged.host_mut()[0] = 9.0;
        assert!(matches!(staged.device(), Err(ComputeError::StaleBuffer(_))));

        // download overwrites the unsynced edit
        staged.sync_to_host(&host).unwrap();
        assert_eq!(staged.host(), &[1.5, 2.5, 3.5]);
        assert!(staged.device().is_ok());
    }

    #[test]
    fn test_replace_host_checks_length() {
        let host = HostBackend::new();
        let mut staged = StagedBuffer::<_, i32>::new(&host, "lut", 8, AccessMode::ReadWrite).unwrap();
        let err = staged.replace_host(&[0; 4]).unwrap_err();
        assert!(matches!(
            err,
            ComputeError::TransferSizeMismatch { expected: 32, actual: 16, .. }
        ));
        staged.replace_host(&[7; 8]).unwrap();
        assert!(staged.is_stale());
        assert_eq!(staged.host()[7], 7);
    }
}
