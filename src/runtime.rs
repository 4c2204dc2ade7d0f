//! Runtime
//!
//! Owns the state every compute shader shares: the driver, the device
//! registry, the include table and, in the default configuration, a single
//! context and command queue created on first use.
//!
//! ```
//! use shader_dispatch::{HostDriver, Runtime};
//!
//! let runtime = Runtime::new(HostDriver::new());
//! let platforms = runtime.list_platforms().unwrap();
//! assert_eq!(platforms, vec!["Host Reference Platform"]);
//! ```

use crate::config::{ContextSharing, RuntimeConfig};
use crate::device::{DeviceRegistry, SelectedDevice};
use crate::driver::Driver;
use crate::error::{ComputeError, Result};
use crate::include::IncludeLibrary;
use log::{debug, info};
use std::sync::{Arc, Mutex, PoisonError};

#[cfg(feature = "opencl")]
use crate::driver::OclDriver;
#[cfg(feature = "opencl")]
use std::sync::LazyLock;

#[cfg(feature = "opencl")]
static OPENCL: LazyLock<Arc<Runtime<OclDriver>>> = LazyLock::new(|| {
    Arc::new(Runtime::with_config(
        OclDriver::new(),
        RuntimeConfig::from_env(),
    ))
});

/// A context and its command queue, bound to one platform's device set
pub struct DeviceContext<D: Driver> {
    device: SelectedDevice<D>,
    context: D::Context,
    queue: D::Queue,
}

impl<D: Driver> DeviceContext<D> {
    pub fn platform_name(&self) -> &str {
        self.device.platform_name()
    }

    pub fn device(&self) -> &SelectedDevice<D> {
        &self.device
    }

    pub fn context(&self) -> &D::Context {
        &self.context
    }

    pub fn queue(&self) -> &D::Queue {
        &self.queue
    }
}

impl<D: Driver> std::fmt::Debug for DeviceContext<D> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeviceContext")
            .field("platform", &self.device.platform_name())
            .finish_non_exhaustive()
    }
}

/// Shared engine state
pub struct Runtime<D: Driver> {
    driver: D,
    config: RuntimeConfig,
    registry: DeviceRegistry<D>,
    includes: Arc<IncludeLibrary>,
    shared: Mutex<Option<Arc<DeviceContext<D>>>>,
}

impl<D: Driver + std::fmt::Debug> std::fmt::Debug for Runtime<D> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Runtime")
            .field("driver", &self.driver)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl<D: Driver> Runtime<D> {
    /// Runtime with the default configuration and the process-wide include table
    pub fn new(driver: D) -> Self {
        Self::with_config(driver, RuntimeConfig::default())
    }

    pub fn with_config(driver: D, config: RuntimeConfig) -> Self {
        Self {
            driver,
            config,
            registry: DeviceRegistry::new(),
            includes: IncludeLibrary::global(),
            shared: Mutex::new(None),
        }
    }

    /// Replaces the include table used when compiling programs
    pub fn with_includes(mut self, includes: Arc<IncludeLibrary>) -> Self {
        self.includes = includes;
        self
    }

    pub fn driver(&self) -> &D {
        &self.driver
    }

    pub fn config(&self) -> &RuntimeConfig {
        &self.config
    }

    pub fn includes(&self) -> &IncludeLibrary {
        &self.includes
    }

    pub fn registry(&self) -> &DeviceRegistry<D> {
        &self.registry
    }

    pub fn list_platforms(&self) -> Result<Vec<String>> {
        self.registry.list_platforms(&self.driver)
    }

    /// Selects `name`, falling back to the configured device and then to the preference order
    pub fn select_device(&self, name: Option<&str>) -> Result<SelectedDevice<D>> {
        let name = name
            .filter(|n| !n.trim().is_empty())
            .or(self.config.device.as_deref());
        self.registry.select(&self.driver, name)
    }

    /// The process-wide context, if one has been created
    pub fn shared_context(&self) -> Option<Arc<DeviceContext<D>>> {
        self.shared
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Returns a context and queue for `device`
    ///
    /// With [`ContextSharing::Process`] the first call creates the shared
    /// context and every later call reuses it. A request for a different
    /// platform than the one the shared context was created for fails with
    /// [`ComputeError::ContextMismatch`].
    pub fn acquire_context(&self, device: &SelectedDevice<D>) -> Result<Arc<DeviceContext<D>>> {
        if self.config.context_sharing == ContextSharing::PerInstance {
            return self.create_context(device).map(Arc::new);
        }

        let mut shared = self.shared.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(existing) = shared.as_ref() {
            if existing.platform_name() != device.platform_name() {
                return Err(ComputeError::ContextMismatch {
                    active: existing.platform_name().to_string(),
                    requested: device.platform_name().to_string(),
                });
            }
            debug!("Reusing shared context for '{}'", existing.platform_name());
            return Ok(Arc::clone(existing));
        }

        let created = Arc::new(self.create_context(device)?);
        *shared = Some(Arc::clone(&created));
        Ok(created)
    }

    fn create_context(&self, device: &SelectedDevice<D>) -> Result<DeviceContext<D>> {
        let context = self
            .driver
            .create_context(device.devices())
            .map_err(|source| ComputeError::ResourceCreation {
                what: "context",
                source,
            })?;
        let queue = self
            .driver
            .create_queue(&context, device.primary())
            .map_err(|source| ComputeError::ResourceCreation {
                what: "command queue",
                source,
            })?;
        info!(
            "Created context and queue on '{}' ({})",
            device.platform_name(),
            device.capabilities().name
        );
        Ok(DeviceContext {
            device: device.clone(),
            context,
            queue,
        })
    }
}

#[cfg(feature = "opencl")]
impl Runtime<OclDriver> {
    /// Process-wide OpenCL runtime, configured from the environment on first use
    pub fn global() -> Arc<Self> {
        Arc::clone(&OPENCL)
    }
}
