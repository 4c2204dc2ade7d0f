//! Error types
//!
//! Every failure the engine can surface is a [`ComputeError`]. Driver
//! primitives report [`DriverError`], which carries the raw status code so
//! callers can tell `CL_INVALID_ARG_INDEX` from `CL_OUT_OF_RESOURCES`.

use crate::driver::{DeviceParam, DriverError};
use thiserror::Error;

/// Errors raised by the dispatch engine
#[derive(Debug, Error)]
pub enum ComputeError {
    /// Platform or device enumeration failed
    #[error("failed to enumerate compute platforms: {0}")]
    Enumeration(#[source] DriverError),

    /// Enumeration succeeded but no platform exposes a device
    #[error("no compute platform with at least one device is available")]
    NoPlatforms,

    /// A platform name was requested that the registry does not know
    #[error("no matching device: '{0}'")]
    NoMatchingDevice(String),

    /// A device capability query failed
    #[error("failed to query {param:?}: {source}")]
    DeviceQuery {
        param: DeviceParam,
        #[source]
        source: DriverError,
    },

    /// A capability payload did not have the expected layout
    #[error("malformed {param:?} payload ({len} bytes)")]
    MalformedInfo { param: DeviceParam, len: usize },

    /// Creating a context, queue, program or buffer failed
    #[error("failed to create {what}: {source}")]
    ResourceCreation {
        what: &'static str,
        #[source]
        source: DriverError,
    },

    /// The process-wide context serves a different platform
    #[error("shared context is bound to platform '{active}', cannot serve '{requested}'")]
    ContextMismatch { active: String, requested: String },

    /// The build step rejected the source; `log` aggregates every device's log
    #[error("program build failed (code {code}):\n{log}")]
    Build { code: i32, log: String },

    /// No kernel with the requested entry point exists in the program
    #[error("kernel '{name}' could not be resolved: {source}")]
    KernelResolution {
        name: String,
        #[source]
        source: DriverError,
    },

    /// Binding the argument at `index` failed
    #[error("failed to bind argument {index} of kernel '{kernel}': {source}")]
    ArgumentBinding {
        kernel: String,
        index: usize,
        #[source]
        source: DriverError,
    },

    /// The driver rejected the enqueue
    #[error("dispatch of kernel '{kernel}' failed with driver error {code}")]
    Dispatch {
        kernel: String,
        code: i32,
        #[source]
        source: DriverError,
    },

    /// Flushing or waiting on pending events failed
    #[error("wait failed: {0}")]
    Wait(#[source] DriverError),

    /// A device-to-host copy failed
    #[error("buffer read failed: {0}")]
    Read(#[source] DriverError),

    /// A host-to-device copy failed
    #[error("buffer write failed: {0}")]
    Write(#[source] DriverError),

    /// The buffer cannot hold the requested data
    #[error("buffer of {capacity} bytes cannot hold {required} bytes")]
    BufferTooSmall { capacity: usize, required: usize },

    /// Readback was requested for a zero-sized element type
    #[error("cannot decode zero-sized element type '{0}'")]
    ZeroSizedElement(&'static str),

    /// The compute shader has already released its device resources
    #[error("compute shader has been disposed")]
    Disposed,
}

/// Crate-wide result alias
pub type Result<T> = std::result::Result<T, ComputeError>;
