//! Compute shader
//!
//! One compiled program plus the dispatch state around it: the kernel
//! cache, the wait list of pending completion events and the session
//! counter.
//!
//! Waiting is coarse. [`ComputeShader::wait`], [`ComputeShader::is_running`]
//! and [`ComputeShader::clear_session`] accept a [`SessionId`] but act on
//! every pending event of the instance as one group; `is_running` only
//! inspects the oldest pending event.
//!
//! ```
//! use std::sync::Arc;
//! use shader_dispatch::prelude::*;
//!
//! let driver = HostDriver::new();
//! driver.register_kernel("square", |item: &WorkItem, args: &HostArgs| {
//!     let i = item.global_id[0];
//!     let v: f32 = args.get(0, i);
//!     args.set(0, i, v * v);
//! });
//! let runtime = Arc::new(Runtime::new(driver));
//! let shader = ComputeShader::new(&runtime, "__kernel void square(__global float* v) {}")?;
//!
//! let mut values = shader.create_buffer_from(&[1.0f32, 2.0, 3.0])?;
//! let session = shader.execute("square", 3, &[Some(&values)])?;
//! shader.wait(session)?;
//! assert_eq!(shader.read_array::<f32>(&mut values, None)?, vec![1.0, 4.0, 9.0]);
//! # Ok::<(), shader_dispatch::ComputeError>(())
//! ```

use crate::buffer::{self, DeviceBuffer};
use crate::device::SelectedDevice;
use crate::dispatch::{NdRange, SessionId};
use crate::driver::{Driver, EventStatus, status};
use crate::error::{ComputeError, Result};
use crate::kernel::KernelCache;
use crate::program;
use crate::runtime::{DeviceContext, Runtime};
use bytemuck::Pod;
use log::{debug, warn};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

#[cfg(feature = "opencl")]
use crate::driver::OclDriver;

/// Per-instance mutable state. `program` is `None` once disposed.
struct DispatchState<D: Driver> {
    program: Option<D::Program>,
    kernels: KernelCache<D>,
    wait_list: Vec<D::Event>,
    session: u64,
}

/// A compiled program and its dispatch state
pub struct ComputeShader<D: Driver> {
    runtime: Arc<Runtime<D>>,
    context: Arc<DeviceContext<D>>,
    state: Mutex<DispatchState<D>>,
}

impl<D: Driver> std::fmt::Debug for ComputeShader<D> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.lock();
        f.debug_struct("ComputeShader")
            .field("platform", &self.context.platform_name())
            .field("kernels", &state.kernels.names())
            .field("pending_events", &state.wait_list.len())
            .field("session", &state.session)
            .field("disposed", &state.program.is_none())
            .finish()
    }
}

impl<D: Driver> ComputeShader<D> {
    /// Compiles `source` on the runtime's default device
    pub fn new(runtime: &Arc<Runtime<D>>, source: &str) -> Result<Self> {
        Self::with_device(runtime, source, None)
    }

    /// Compiles `source` on the platform named `device`
    pub fn with_device(
        runtime: &Arc<Runtime<D>>,
        source: &str,
        device: Option<&str>,
    ) -> Result<Self> {
        let selected = runtime.select_device(device)?;
        let context = runtime.acquire_context(&selected)?;
        let driver = runtime.driver();
        let options = runtime.config().effective_build_options();
        let program = program::compile(driver, &context, runtime.includes(), source, &options)?;

        let mut kernels = KernelCache::new();
        match kernels.populate(driver, &program) {
            Ok(count) => debug!("Cached {} kernel(s) after build", count),
            Err(e) => warn!("Kernel discovery failed, kernels will be created on demand: {}", e),
        }

        Ok(Self {
            runtime: Arc::clone(runtime),
            context,
            state: Mutex::new(DispatchState {
                program: Some(program),
                kernels,
                wait_list: Vec::new(),
                session: 0,
            }),
        })
    }

    fn lock(&self) -> MutexGuard<'_, DispatchState<D>> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn driver(&self) -> &D {
        self.runtime.driver()
    }

    // ========================================================================
    // Dispatch
    // ========================================================================

    /// Binds `args` positionally and enqueues `kernel` over `range`
    ///
    /// A `None` entry leaves its slot unbound; later arguments keep their
    /// positions. Does not block.
    pub fn execute(
        &self,
        kernel: &str,
        range: impl Into<NdRange>,
        args: &[Option<&DeviceBuffer<D>>],
    ) -> Result<SessionId> {
        let range = range.into();
        let driver = self.driver();
        let mut guard = self.lock();
        let DispatchState {
            program,
            kernels,
            wait_list,
            session,
        } = &mut *guard;
        let program = program.as_ref().ok_or(ComputeError::Disposed)?;
        let handle = kernels.resolve(driver, program, kernel)?;

        let mut first_hole = None;
        for (index, arg) in args.iter().enumerate() {
            match arg {
                Some(buffer) => driver
                    .set_kernel_arg(handle, index as u32, buffer.mem())
                    .map_err(|source| ComputeError::ArgumentBinding {
                        kernel: kernel.to_string(),
                        index,
                        source,
                    })?,
                None => {
                    first_hole.get_or_insert(index);
                }
            }
        }

        let event = driver
            .enqueue_nd_range(
                self.context.queue(),
                handle,
                range.offset,
                range.global,
                range.local,
                &[],
            )
            .map_err(|source| match source.code {
                // an unset slot is either the first hole or past the supplied args
                status::INVALID_KERNEL_ARGS => ComputeError::ArgumentBinding {
                    kernel: kernel.to_string(),
                    index: first_hole.unwrap_or(args.len()),
                    source,
                },
                _ => ComputeError::Dispatch {
                    kernel: kernel.to_string(),
                    code: source.code,
                    source,
                },
            })?;

        *session += 1;
        wait_list.push(event);
        debug!(
            "Dispatched '{}' over {:?} as session {} ({} pending)",
            kernel,
            range.global,
            session,
            wait_list.len()
        );
        Ok(SessionId(*session))
    }

    // ========================================================================
    // Synchronization
    // ========================================================================

    /// Flushes the queue and blocks until every pending event has completed
    ///
    /// The session id is not used to filter; see [`ComputeShader::wait_all`].
    pub fn wait(&self, _session: SessionId) -> Result<()> {
        self.wait_all()
    }

    pub fn wait_all(&self) -> Result<()> {
        let state = self.lock();
        if state.program.is_none() {
            return Err(ComputeError::Disposed);
        }
        let driver = self.driver();
        driver
            .flush(self.context.queue())
            .map_err(ComputeError::Wait)?;
        if !state.wait_list.is_empty() {
            debug!("Waiting on {} pending event(s)", state.wait_list.len());
            driver
                .wait_for_events(&state.wait_list)
                .map_err(ComputeError::Wait)?;
        }
        Ok(())
    }

    /// Whether the oldest pending event has not yet completed
    pub fn is_running(&self, _session: SessionId) -> Result<bool> {
        let state = self.lock();
        let Some(head) = state.wait_list.first() else {
            return Ok(false);
        };
        match self.driver().event_status(head).map_err(ComputeError::Wait)? {
            EventStatus::Complete => Ok(false),
            EventStatus::Error(code) => {
                warn!("Oldest pending event terminated with status {}", code);
                Ok(false)
            }
            EventStatus::Queued | EventStatus::Submitted | EventStatus::Running => Ok(true),
        }
    }

    /// Releases and forgets every pending event, whatever `session` is
    pub fn clear_session(&self, _session: SessionId) {
        let mut state = self.lock();
        let released = Self::release_events(self.driver(), &mut state.wait_list);
        if released > 0 {
            debug!("Released {} event(s)", released);
        }
    }

    fn release_events(driver: &D, wait_list: &mut Vec<D::Event>) -> usize {
        let count = wait_list.len();
        for event in wait_list.drain(..) {
            driver.release_event(event);
        }
        count
    }

    // ========================================================================
    // Buffers and readback
    // ========================================================================

    /// Allocates a zero-filled buffer of `len` bytes in this shader's context
    pub fn create_buffer(&self, len: usize) -> Result<DeviceBuffer<D>> {
        let mem = self
            .driver()
            .create_buffer(self.context.context(), len)
            .map_err(|source| ComputeError::ResourceCreation {
                what: "buffer",
                source,
            })?;
        Ok(DeviceBuffer::new(mem, len))
    }

    /// Allocates a buffer sized for `data` and uploads it
    pub fn create_buffer_from<T: Pod>(&self, data: &[T]) -> Result<DeviceBuffer<D>> {
        let mut buffer = self.create_buffer(std::mem::size_of_val(data))?;
        self.write_buffer(&mut buffer, data)?;
        Ok(buffer)
    }

    /// Uploads `data` to the start of `buffer`, after any pending work
    pub fn write_buffer<T: Pod>(&self, buffer: &mut DeviceBuffer<D>, data: &[T]) -> Result<()> {
        let bytes: &[u8] = bytemuck::cast_slice(data);
        if bytes.len() > buffer.len() {
            return Err(ComputeError::BufferTooSmall {
                capacity: buffer.len(),
                required: bytes.len(),
            });
        }
        let state = self.lock();
        self.driver()
            .write_buffer(
                self.context.queue(),
                buffer.mem(),
                0,
                bytes,
                &state.wait_list,
            )
            .map_err(ComputeError::Write)?;
        buffer.host_mut()[..bytes.len()].copy_from_slice(bytes);
        Ok(())
    }

    /// Reads the whole buffer and returns its first element as `T`
    pub fn read_scalar<T: Pod>(&self, buffer: &mut DeviceBuffer<D>) -> Result<T> {
        let size = buffer::element_size::<T>()?;
        if buffer.len() < size {
            return Err(ComputeError::BufferTooSmall {
                capacity: buffer.len(),
                required: size,
            });
        }
        let len = buffer.len();
        self.read_into(buffer, len)?;
        Ok(bytemuck::pod_read_unaligned(&buffer.host_bytes()[..size]))
    }

    /// Reads `length` elements of `T`, or the full capacity when `length` is
    /// `None`, zero, or larger than the buffer holds
    pub fn read_array<T: Pod>(
        &self,
        buffer: &mut DeviceBuffer<D>,
        length: Option<usize>,
    ) -> Result<Vec<T>> {
        let size = buffer::element_size::<T>()?;
        let count = buffer::effective_count(buffer.capacity::<T>(), length);
        let bytes = count * size;
        self.read_into(buffer, bytes)?;
        buffer::decode(&buffer.host_bytes()[..bytes], count)
    }

    /// Blocking read of the first `len` bytes into the host mirror, ordered
    /// after every pending event
    fn read_into(&self, buffer: &mut DeviceBuffer<D>, len: usize) -> Result<()> {
        if len == 0 {
            return Ok(());
        }
        let state = self.lock();
        if state.program.is_none() {
            return Err(ComputeError::Disposed);
        }
        let (mem, host) = buffer.split_mut();
        self.driver()
            .read_buffer(
                self.context.queue(),
                mem,
                0,
                &mut host[..len],
                &state.wait_list,
            )
            .map_err(ComputeError::Read)
    }

    // ========================================================================
    // Accessors
    // ========================================================================

    pub fn runtime(&self) -> &Arc<Runtime<D>> {
        &self.runtime
    }

    /// Platform, devices and capabilities this shader was built for
    pub fn device(&self) -> &SelectedDevice<D> {
        self.context.device()
    }

    /// Names currently in the kernel cache, sorted
    pub fn kernel_names(&self) -> Vec<String> {
        self.lock().kernels.names()
    }

    /// Id returned by the most recent successful dispatch
    pub fn last_session(&self) -> Option<SessionId> {
        match self.lock().session {
            0 => None,
            n => Some(SessionId(n)),
        }
    }

    pub fn pending_events(&self) -> usize {
        self.lock().wait_list.len()
    }

    pub fn is_disposed(&self) -> bool {
        self.lock().program.is_none()
    }

    // ========================================================================
    // Lifecycle
    // ========================================================================

    /// Releases pending events, cached kernels and the program
    ///
    /// Later calls do nothing. Every other operation on a disposed shader
    /// returns [`ComputeError::Disposed`].
    pub fn dispose(&mut self) {
        let driver = self.runtime.driver();
        let state = self.state.get_mut().unwrap_or_else(PoisonError::into_inner);
        let Some(program) = state.program.take() else {
            return;
        };
        let events = Self::release_events(driver, &mut state.wait_list);
        let kernels = state.kernels.release_all(driver);
        driver.release_program(program);
        debug!(
            "Disposed compute shader on '{}' ({} event(s), {} kernel(s))",
            self.context.platform_name(),
            events,
            kernels
        );
    }
}

impl<D: Driver> Drop for ComputeShader<D> {
    fn drop(&mut self) {
        self.dispose();
    }
}

#[cfg(feature = "opencl")]
impl ComputeShader<OclDriver> {
    /// Compiles `source` against the process-wide OpenCL runtime
    pub fn compile(source: &str) -> Result<Self> {
        Self::new(&Runtime::global(), source)
    }
}
