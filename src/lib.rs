//! shader-dispatch: host-side compute shader dispatch
//!
//! Selects a compute device, compiles kernel source after expanding
//! `#include <name>` directives, caches kernel objects, dispatches kernels
//! over a 1 to 3 dimensional index space and reads typed results back.
//!
//! # Architecture
//!
//! - **driver**: the narrow driver contract plus the host reference driver
//!   and the OpenCL driver
//! - **device**: platform enumeration, preference order and capabilities
//! - **include**: the include table and the directive expander
//! - **runtime**: shared driver, registry, includes and context
//! - **program**: the build step with aggregated diagnostics
//! - **kernel**: per-program kernel cache
//! - **shader**: dispatch, sessions, waiting, readback and disposal
//!
//! # Feature Flags
//!
//! - `opencl`: enable [`driver::OclDriver`] and `Runtime::global()`

// ============================================================================
// Core Modules
// ============================================================================

pub mod buffer;
pub mod config;
pub mod device;
pub mod dispatch;
pub mod driver;
pub mod error;
pub mod include;
pub mod kernel;
pub mod program;
pub mod runtime;
pub mod shader;
pub mod types;

// ============================================================================
// Re-exports
// ============================================================================

pub use buffer::DeviceBuffer;
pub use config::{ContextSharing, RuntimeConfig};
pub use device::{DeviceCapabilities, DeviceRegistry, SelectedDevice};
pub use dispatch::{NdRange, SessionId};
pub use driver::{Driver, DriverError, EventStatus, HostDriver};
pub use error::{ComputeError, Result};
pub use include::IncludeLibrary;
pub use kernel::KernelCache;
pub use runtime::{DeviceContext, Runtime};
pub use shader::ComputeShader;

#[cfg(feature = "opencl")]
pub use driver::OclDriver;

// ============================================================================
// Prelude
// ============================================================================

/// Prelude module with commonly used types and traits
pub mod prelude {
    pub use crate::buffer::DeviceBuffer;
    pub use crate::config::{ContextSharing, RuntimeConfig};
    pub use crate::dispatch::{NdRange, SessionId};
    pub use crate::driver::{Driver, HostArgs, HostDriver, WorkItem};
    pub use crate::error::{ComputeError, Result};
    pub use crate::include::IncludeLibrary;
    pub use crate::runtime::Runtime;
    pub use crate::shader::ComputeShader;
    pub use crate::types::{Float2, Float4, Int2, Int4, UInt2, UInt4};

    #[cfg(feature = "opencl")]
    pub use crate::driver::OclDriver;
}
