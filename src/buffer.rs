//! Device buffers and typed readback
//!
//! A [`DeviceBuffer`] pairs a driver memory object with a host mirror of
//! the same size. Readback copies device bytes into the mirror and decodes
//! them as any [`Pod`] element type.

use crate::driver::Driver;
use crate::error::{ComputeError, Result};
use bytemuck::Pod;

/// Device memory with a host-side mirror
pub struct DeviceBuffer<D: Driver> {
    mem: D::Mem,
    host: Vec<u8>,
}

impl<D: Driver> std::fmt::Debug for DeviceBuffer<D> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeviceBuffer")
            .field("len", &self.host.len())
            .finish_non_exhaustive()
    }
}

impl<D: Driver> DeviceBuffer<D> {
    pub(crate) fn new(mem: D::Mem, len: usize) -> Self {
        Self {
            mem,
            host: vec![0; len],
        }
    }

    pub fn mem(&self) -> &D::Mem {
        &self.mem
    }

    /// Size in bytes
    pub fn len(&self) -> usize {
        self.host.len()
    }

    pub fn is_empty(&self) -> bool {
        self.host.is_empty()
    }

    /// Number of whole `T` elements the buffer holds
    pub fn capacity<T: Pod>(&self) -> usize {
        match std::mem::size_of::<T>() {
            0 => 0,
            size => self.host.len() / size,
        }
    }

    /// Host mirror as of the last read or write
    pub fn host_bytes(&self) -> &[u8] {
        &self.host
    }

    pub(crate) fn host_mut(&mut self) -> &mut [u8] {
        &mut self.host
    }

    pub(crate) fn split_mut(&mut self) -> (&D::Mem, &mut [u8]) {
        (&self.mem, &mut self.host)
    }
}

/// Element count for a readback of `length` elements from `capacity`
///
/// `None`, zero, or a length past the capacity all read the full capacity.
pub fn effective_count(capacity: usize, length: Option<usize>) -> usize {
    match length {
        Some(n) if n > 0 && n <= capacity => n,
        _ => capacity,
    }
}

/// Decodes the first `count` elements of `bytes` as `T`
pub fn decode<T: Pod>(bytes: &[u8], count: usize) -> Result<Vec<T>> {
    let size = element_size::<T>()?;
    let required = count * size;
    if bytes.len() < required {
        return Err(ComputeError::BufferTooSmall {
            capacity: bytes.len(),
            required,
        });
    }
    Ok(bytes[..required]
        .chunks_exact(size)
        .map(bytemuck::pod_read_unaligned)
        .collect())
}

pub(crate) fn element_size<T>() -> Result<usize> {
    match std::mem::size_of::<T>() {
        0 => Err(ComputeError::ZeroSizedElement(std::any::type_name::<T>())),
        size => Ok(size),
    }
}
