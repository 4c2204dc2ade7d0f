//! Device capability queries
//!
//! The driver hands back raw `clGetDeviceInfo`-style payloads; this module
//! decodes them at fixed offsets into [`DeviceCapabilities`].

use crate::driver::{DeviceParam, Driver};
use crate::error::{ComputeError, Result};

/// Read-only capability limits of a selected device
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceCapabilities {
    pub name: String,
    pub vendor: String,
    pub max_work_group_size: usize,
    pub max_work_item_dimensions: u32,
    pub max_work_item_sizes: Vec<usize>,
    pub max_compute_units: u32,
    pub max_mem_alloc_size: u64,
}

impl DeviceCapabilities {
    /// Queries every capability of `device`
    pub fn query<D: Driver>(driver: &D, device: &D::Device) -> Result<Self> {
        let fetch = |param: DeviceParam| {
            driver
                .device_info(device, param)
                .map_err(|source| ComputeError::DeviceQuery { param, source })
        };

        let max_work_item_dimensions = decode_u32(
            DeviceParam::MaxWorkItemDimensions,
            &fetch(DeviceParam::MaxWorkItemDimensions)?,
        )?;

        Ok(Self {
            name: decode_string(&fetch(DeviceParam::Name)?),
            vendor: decode_string(&fetch(DeviceParam::Vendor)?),
            max_work_group_size: decode_size(
                DeviceParam::MaxWorkGroupSize,
                &fetch(DeviceParam::MaxWorkGroupSize)?,
            )?,
            max_work_item_sizes: decode_sizes(
                DeviceParam::MaxWorkItemSizes,
                &fetch(DeviceParam::MaxWorkItemSizes)?,
                max_work_item_dimensions as usize,
            )?,
            max_work_item_dimensions,
            max_compute_units: decode_u32(
                DeviceParam::MaxComputeUnits,
                &fetch(DeviceParam::MaxComputeUnits)?,
            )?,
            max_mem_alloc_size: decode_u64(
                DeviceParam::MaxMemAllocSize,
                &fetch(DeviceParam::MaxMemAllocSize)?,
            )?,
        })
    }
}

fn malformed(param: DeviceParam, bytes: &[u8]) -> ComputeError {
    ComputeError::MalformedInfo {
        param,
        len: bytes.len(),
    }
}

pub(crate) fn decode_u32(param: DeviceParam, bytes: &[u8]) -> Result<u32> {
    bytes
        .get(..4)
        .and_then(|b| b.try_into().ok())
        .map(u32::from_ne_bytes)
        .ok_or_else(|| malformed(param, bytes))
}

pub(crate) fn decode_u64(param: DeviceParam, bytes: &[u8]) -> Result<u64> {
    bytes
        .get(..8)
        .and_then(|b| b.try_into().ok())
        .map(u64::from_ne_bytes)
        .ok_or_else(|| malformed(param, bytes))
}

/// `size_t` is 4 or 8 bytes depending on the device's address width
pub(crate) fn decode_size(param: DeviceParam, bytes: &[u8]) -> Result<usize> {
    match bytes.len() {
        4 => decode_u32(param, bytes).map(|v| v as usize),
        8 => decode_u64(param, bytes).map(|v| v as usize),
        _ => Err(malformed(param, bytes)),
    }
}

pub(crate) fn decode_sizes(param: DeviceParam, bytes: &[u8], count: usize) -> Result<Vec<usize>> {
    if count == 0 || bytes.len() % count != 0 {
        return Err(malformed(param, bytes));
    }
    let width = bytes.len() / count;
    bytes
        .chunks_exact(width)
        .map(|chunk| decode_size(param, chunk))
        .collect()
}

/// Decodes a NUL-terminated string payload
pub(crate) fn decode_string(bytes: &[u8]) -> String {
    let end = bytes.iter().position(|&b| b == 0).unwrap_or(bytes.len());
    String::from_utf8_lossy(&bytes[..end]).trim().to_string()
}
