//! Driver contract
//!
//! The engine never talks to a compute API directly. Everything it needs
//! from the driver is listed on [`Driver`]: enumeration, object creation,
//! the build step, argument binding, N-dimensional enqueue, blocking
//! transfers and event bookkeeping.
//!
//! Two implementations ship with the crate:
//! - [`HostDriver`]: CPU reference driver, always available
//! - `OclDriver`: OpenCL through the `ocl` crate (feature `opencl`)

pub mod host;
#[cfg(feature = "opencl")]
pub mod opencl;

pub use host::{HostArgs, HostDeviceSpec, HostDriver, HostPlatform, HostStats, WorkItem};
#[cfg(feature = "opencl")]
pub use opencl::OclDriver;

use thiserror::Error;

/// OpenCL status codes used by the engine and the host driver
pub mod status {
    pub const SUCCESS: i32 = 0;
    pub const DEVICE_NOT_FOUND: i32 = -1;
    pub const OUT_OF_RESOURCES: i32 = -5;
    pub const BUILD_PROGRAM_FAILURE: i32 = -11;
    pub const EXEC_STATUS_ERROR_FOR_EVENTS_IN_WAIT_LIST: i32 = -14;
    pub const INVALID_VALUE: i32 = -30;
    pub const INVALID_DEVICE: i32 = -33;
    pub const INVALID_PROGRAM_EXECUTABLE: i32 = -45;
    pub const INVALID_KERNEL_NAME: i32 = -46;
    pub const INVALID_ARG_INDEX: i32 = -49;
    pub const INVALID_ARG_VALUE: i32 = -50;
    pub const INVALID_KERNEL_ARGS: i32 = -52;
    pub const INVALID_WORK_GROUP_SIZE: i32 = -54;
    pub const INVALID_WORK_ITEM_SIZE: i32 = -55;
    pub const INVALID_GLOBAL_WORK_SIZE: i32 = -63;
    pub const PLATFORM_NOT_FOUND_KHR: i32 = -1001;
    /// Used when the driver did not report a status code
    pub const UNKNOWN: i32 = i32::MIN;
}

/// Failure reported by a driver primitive
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message} (code {code})")]
pub struct DriverError {
    pub code: i32,
    pub message: String,
}

impl DriverError {
    pub fn new(code: i32, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }
}

pub type DriverResult<T> = std::result::Result<T, DriverError>;

/// Platform attributes queryable through [`Driver::platform_info`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PlatformParam {
    Name,
    Vendor,
}

impl PlatformParam {
    /// `cl_platform_info` value
    pub fn code(self) -> u32 {
        match self {
            PlatformParam::Name => 0x0902,
            PlatformParam::Vendor => 0x0903,
        }
    }
}

/// Device attributes queryable through [`Driver::device_info`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DeviceParam {
    /// `cl_uint`
    MaxComputeUnits,
    /// `cl_uint`
    MaxWorkItemDimensions,
    /// `size_t`
    MaxWorkGroupSize,
    /// `size_t[MaxWorkItemDimensions]`
    MaxWorkItemSizes,
    /// `cl_ulong`
    MaxMemAllocSize,
    /// NUL-terminated string
    Name,
    /// NUL-terminated string
    Vendor,
}

impl DeviceParam {
    /// `cl_device_info` value
    pub fn code(self) -> u32 {
        match self {
            DeviceParam::MaxComputeUnits => 0x1002,
            DeviceParam::MaxWorkItemDimensions => 0x1003,
            DeviceParam::MaxWorkGroupSize => 0x1004,
            DeviceParam::MaxWorkItemSizes => 0x1005,
            DeviceParam::MaxMemAllocSize => 0x1010,
            DeviceParam::Name => 0x102B,
            DeviceParam::Vendor => 0x102C,
        }
    }
}

/// Execution status of a completion event
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventStatus {
    Queued,
    Submitted,
    Running,
    Complete,
    /// The command terminated abnormally with the given status code
    Error(i32),
}

impl EventStatus {
    /// Maps a raw `CL_EVENT_COMMAND_EXECUTION_STATUS` value
    pub fn from_raw(raw: i32) -> Self {
        match raw {
            0 => EventStatus::Complete,
            1 => EventStatus::Running,
            2 => EventStatus::Submitted,
            3 => EventStatus::Queued,
            code => EventStatus::Error(code),
        }
    }
}

/// Narrow contract between the engine and a compute driver
///
/// Handles are owned values. Release primitives consume them, so a handle
/// cannot be released twice.
pub trait Driver: Send + Sync + 'static {
    type Platform: Clone + Send + Sync + 'static;
    type Device: Clone + Send + Sync + 'static;
    type Context: Send + Sync + 'static;
    type Queue: Send + Sync + 'static;
    type Program: Send + 'static;
    type Kernel: Send + 'static;
    type Event: Send + 'static;
    type Mem: Send + Sync + 'static;

    /// Lists every platform the driver can see
    fn platforms(&self) -> DriverResult<Vec<Self::Platform>>;

    /// Raw platform attribute payload
    fn platform_info(&self, platform: &Self::Platform, param: PlatformParam)
    -> DriverResult<Vec<u8>>;

    /// Lists every device of a platform
    fn devices(&self, platform: &Self::Platform) -> DriverResult<Vec<Self::Device>>;

    /// Raw device attribute payload
    fn device_info(&self, device: &Self::Device, param: DeviceParam) -> DriverResult<Vec<u8>>;

    fn create_context(&self, devices: &[Self::Device]) -> DriverResult<Self::Context>;

    fn create_queue(
        &self,
        context: &Self::Context,
        device: &Self::Device,
    ) -> DriverResult<Self::Queue>;

    fn create_program(&self, context: &Self::Context, source: &str)
    -> DriverResult<Self::Program>;

    /// Builds `program` for `devices`. On failure, logs are available via [`Driver::build_log`].
    fn build_program(
        &self,
        program: &Self::Program,
        devices: &[Self::Device],
        options: &str,
    ) -> DriverResult<()>;

    fn build_log(&self, program: &Self::Program, device: &Self::Device) -> DriverResult<String>;

    /// Creates a kernel object for every entry point of a built program
    fn create_kernels_in_program(&self, program: &Self::Program)
    -> DriverResult<Vec<Self::Kernel>>;

    fn create_kernel(&self, program: &Self::Program, name: &str) -> DriverResult<Self::Kernel>;

    /// Declared function name of a kernel
    fn kernel_name(&self, kernel: &Self::Kernel) -> DriverResult<String>;

    /// Binds a memory object to the positional parameter `index`
    fn set_kernel_arg(&self, kernel: &Self::Kernel, index: u32, mem: &Self::Mem)
    -> DriverResult<()>;

    /// Enqueues a 3-dimensional dispatch and returns its completion event
    fn enqueue_nd_range(
        &self,
        queue: &Self::Queue,
        kernel: &Self::Kernel,
        offset: [usize; 3],
        global: [usize; 3],
        local: [usize; 3],
        wait_list: &[Self::Event],
    ) -> DriverResult<Self::Event>;

    fn create_buffer(&self, context: &Self::Context, len: usize) -> DriverResult<Self::Mem>;

    /// Blocking host-to-device copy
    fn write_buffer(
        &self,
        queue: &Self::Queue,
        mem: &Self::Mem,
        offset: usize,
        data: &[u8],
        wait_list: &[Self::Event],
    ) -> DriverResult<()>;

    /// Blocking device-to-host copy of `data.len()` bytes starting at `offset`
    fn read_buffer(
        &self,
        queue: &Self::Queue,
        mem: &Self::Mem,
        offset: usize,
        data: &mut [u8],
        wait_list: &[Self::Event],
    ) -> DriverResult<()>;

    fn event_status(&self, event: &Self::Event) -> DriverResult<EventStatus>;

    /// Blocks until every event has completed
    fn wait_for_events(&self, events: &[Self::Event]) -> DriverResult<()>;

    /// Submits buffered commands without waiting
    fn flush(&self, queue: &Self::Queue) -> DriverResult<()>;

    /// Blocks until every command on the queue has completed
    fn finish(&self, queue: &Self::Queue) -> DriverResult<()>;

    fn release_event(&self, event: Self::Event);

    fn release_kernel(&self, kernel: Self::Kernel);

    fn release_program(&self, program: Self::Program);
}
