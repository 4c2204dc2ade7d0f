//! Device registry
//!
//! Enumerates platforms once, caches them by name for the lifetime of the
//! registry, and resolves a platform name (or no name) to a device set.
//!
//! # Preference order
//!
//! When no name is given:
//! 1. the first platform whose name contains "nvidia" wins immediately
//! 2. otherwise the first platform whose name contains "amd"
//! 3. otherwise the first platform enumerated

mod info;

pub use info::DeviceCapabilities;

use crate::driver::{Driver, PlatformParam, status};
use crate::error::{ComputeError, Result};
use log::{debug, info, warn};
use std::sync::{Arc, OnceLock, PoisonError, RwLock};

/// One discovered platform and its devices
struct PlatformEntry<D: Driver> {
    name: String,
    platform: D::Platform,
    devices: Vec<D::Device>,
    capabilities: OnceLock<DeviceCapabilities>,
}

/// A resolved platform with its device set and the capabilities of its first device
pub struct SelectedDevice<D: Driver> {
    platform_name: String,
    platform: D::Platform,
    devices: Vec<D::Device>,
    capabilities: DeviceCapabilities,
}

impl<D: Driver> Clone for SelectedDevice<D> {
    fn clone(&self) -> Self {
        Self {
            platform_name: self.platform_name.clone(),
            platform: self.platform.clone(),
            devices: self.devices.clone(),
            capabilities: self.capabilities.clone(),
        }
    }
}

impl<D: Driver> std::fmt::Debug for SelectedDevice<D> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SelectedDevice")
            .field("platform", &self.platform_name)
            .field("devices", &self.devices.len())
            .field("capabilities", &self.capabilities)
            .finish()
    }
}

impl<D: Driver> SelectedDevice<D> {
    pub fn platform_name(&self) -> &str {
        &self.platform_name
    }

    pub fn platform(&self) -> &D::Platform {
        &self.platform
    }

    /// Every device of the platform; programs are built for all of them
    pub fn devices(&self) -> &[D::Device] {
        &self.devices
    }

    /// Device that owns the command queue
    pub fn primary(&self) -> &D::Device {
        &self.devices[0]
    }

    pub fn capabilities(&self) -> &DeviceCapabilities {
        &self.capabilities
    }

    pub fn max_work_group_size(&self) -> usize {
        self.capabilities.max_work_group_size
    }

    pub fn max_work_item_dimensions(&self) -> u32 {
        self.capabilities.max_work_item_dimensions
    }

    pub fn max_work_item_sizes(&self) -> &[usize] {
        &self.capabilities.max_work_item_sizes
    }

    pub fn max_compute_units(&self) -> u32 {
        self.capabilities.max_compute_units
    }

    pub fn max_mem_alloc_size(&self) -> u64 {
        self.capabilities.max_mem_alloc_size
    }
}

/// Index of the preferred platform among `names`, or `None` if empty
pub fn preferred_platform<'a, I>(names: I) -> Option<usize>
where
    I: IntoIterator<Item = &'a str>,
{
    let mut candidate: Option<(usize, bool)> = None;
    for (index, name) in names.into_iter().enumerate() {
        let lower = name.to_lowercase();
        if lower.contains("nvidia") {
            return Some(index);
        }
        let is_amd = lower.contains("amd");
        match candidate {
            None => candidate = Some((index, is_amd)),
            Some((_, false)) if is_amd => candidate = Some((index, true)),
            _ => {}
        }
    }
    candidate.map(|(index, _)| index)
}

/// Process-lifetime cache of platforms and their devices
pub struct DeviceRegistry<D: Driver> {
    platforms: RwLock<Option<Arc<Vec<PlatformEntry<D>>>>>,
}

impl<D: Driver> Default for DeviceRegistry<D> {
    fn default() -> Self {
        Self::new()
    }
}

impl<D: Driver> DeviceRegistry<D> {
    pub fn new() -> Self {
        Self {
            platforms: RwLock::new(None),
        }
    }

    /// Names of every platform that exposes at least one device
    pub fn list_platforms(&self, driver: &D) -> Result<Vec<String>> {
        Ok(self
            .entries(driver)?
            .iter()
            .map(|entry| entry.name.clone())
            .collect())
    }

    /// Resolves `name` (or the preference order when `None` or blank)
    pub fn select(&self, driver: &D, name: Option<&str>) -> Result<SelectedDevice<D>> {
        let entries = self.entries(driver)?;
        let requested = name.map(str::trim).filter(|n| !n.is_empty());

        let index = match requested {
            Some(name) => entries
                .iter()
                .position(|e| e.name == name)
                .ok_or_else(|| ComputeError::NoMatchingDevice(name.to_string()))?,
            None => preferred_platform(entries.iter().map(|e| e.name.as_str()))
                .ok_or(ComputeError::NoPlatforms)?,
        };

        let entry = &entries[index];
        let capabilities = match entry.capabilities.get() {
            Some(caps) => caps.clone(),
            None => {
                let caps = DeviceCapabilities::query(driver, &entry.devices[0])?;
                entry.capabilities.get_or_init(|| caps).clone()
            }
        };

        info!(
            "Selected platform '{}' ({} device(s), primary '{}')",
            entry.name,
            entry.devices.len(),
            capabilities.name
        );

        Ok(SelectedDevice {
            platform_name: entry.name.clone(),
            platform: entry.platform.clone(),
            devices: entry.devices.clone(),
            capabilities,
        })
    }

    fn entries(&self, driver: &D) -> Result<Arc<Vec<PlatformEntry<D>>>> {
        if let Some(entries) = self
            .platforms
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
        {
            return Ok(Arc::clone(entries));
        }

        let mut slot = self
            .platforms
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        if let Some(entries) = slot.as_ref() {
            return Ok(Arc::clone(entries));
        }
        let entries = Arc::new(Self::enumerate(driver)?);
        *slot = Some(Arc::clone(&entries));
        Ok(entries)
    }

    fn enumerate(driver: &D) -> Result<Vec<PlatformEntry<D>>> {
        let mut entries: Vec<PlatformEntry<D>> = Vec::new();
        for platform in driver.platforms().map_err(ComputeError::Enumeration)? {
            let raw = driver
                .platform_info(&platform, PlatformParam::Name)
                .map_err(ComputeError::Enumeration)?;
            let name = info::decode_string(&raw);

            let devices = match driver.devices(&platform) {
                Ok(devices) if !devices.is_empty() => devices,
                Ok(_) => {
                    warn!("Platform '{}' has no devices, skipping", name);
                    continue;
                }
                Err(e) if e.code == status::DEVICE_NOT_FOUND => {
                    warn!("Platform '{}' has no devices, skipping", name);
                    continue;
                }
                Err(e) => return Err(ComputeError::Enumeration(e)),
            };

            if entries.iter().any(|e| e.name == name) {
                warn!("Duplicate platform name '{}', keeping the first", name);
                continue;
            }

            debug!("Discovered platform '{}' with {} device(s)", name, devices.len());
            entries.push(PlatformEntry {
                name,
                platform,
                devices,
                capabilities: OnceLock::new(),
            });
        }
        Ok(entries)
    }
}
