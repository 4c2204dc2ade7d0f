//! Kernel cache
//!
//! Maps entry-point names to kernel objects of one program. Filled eagerly
//! after a successful build and lazily on the first request for a name the
//! eager pass did not produce.

use crate::driver::{Driver, DriverResult};
use crate::error::{ComputeError, Result};
use log::{debug, warn};
use rustc_hash::FxHashMap;
use std::collections::hash_map::Entry;

/// Kernel objects of one program, keyed by function name
pub struct KernelCache<D: Driver> {
    kernels: FxHashMap<String, D::Kernel>,
}

impl<D: Driver> Default for KernelCache<D> {
    fn default() -> Self {
        Self::new()
    }
}

impl<D: Driver> KernelCache<D> {
    pub fn new() -> Self {
        Self {
            kernels: FxHashMap::default(),
        }
    }

    /// Inserts a kernel object for every entry point of `program`
    ///
    /// Returns the number of kernels inserted. A duplicate name replaces
    /// (and releases) the earlier kernel.
    pub fn populate(&mut self, driver: &D, program: &D::Program) -> DriverResult<usize> {
        let mut inserted = 0;
        for kernel in driver.create_kernels_in_program(program)? {
            let name = match driver.kernel_name(&kernel) {
                Ok(name) => name,
                Err(e) => {
                    warn!("Skipping kernel with unreadable name: {}", e);
                    driver.release_kernel(kernel);
                    continue;
                }
            };
            if let Some(previous) = self.kernels.insert(name, kernel) {
                driver.release_kernel(previous);
            }
            inserted += 1;
        }
        Ok(inserted)
    }

    /// Returns the kernel for `name`, creating and caching it on a miss
    pub fn resolve(&mut self, driver: &D, program: &D::Program, name: &str) -> Result<&D::Kernel> {
        match self.kernels.entry(name.to_string()) {
            Entry::Occupied(entry) => {
                debug!("Kernel cache hit: {}", name);
                Ok(entry.into_mut())
            }
            Entry::Vacant(entry) => {
                debug!("Kernel cache miss: {}", name);
                let kernel = driver.create_kernel(program, name).map_err(|source| {
                    ComputeError::KernelResolution {
                        name: name.to_string(),
                        source,
                    }
                })?;
                Ok(entry.insert(kernel))
            }
        }
    }

    pub fn contains(&self, name: &str) -> bool {
        self.kernels.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.kernels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.kernels.is_empty()
    }

    /// Cached names in sorted order
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.kernels.keys().cloned().collect();
        names.sort();
        names
    }

    /// Releases every cached kernel and returns how many were released
    pub fn release_all(&mut self, driver: &D) -> usize {
        let count = self.kernels.len();
        for (_, kernel) in self.kernels.drain() {
            driver.release_kernel(kernel);
        }
        count
    }
}
