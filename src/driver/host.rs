//! CPU reference driver
//!
//! Behaves like a single in-order OpenCL queue per device, with kernel
//! bodies supplied as Rust closures. Used for development and for exercising
//! the engine on machines without an OpenCL runtime.
//!
//! ```
//! use shader_dispatch::driver::{HostDriver, WorkItem, HostArgs};
//!
//! let driver = HostDriver::new();
//! driver.register_kernel("double_it", |item: &WorkItem, args: &HostArgs| {
//!     let i = item.global_id[0];
//!     let v: f32 = args.get(0, i);
//!     args.set(0, i, v * 2.0);
//! });
//! ```
//!
//! Commands are deferred: an enqueued dispatch stays `Queued` until the queue
//! is flushed (`Submitted`), and runs when its event is waited on, the queue
//! is finished, or a blocking transfer is issued on the same queue.

use super::{DeviceParam, Driver, DriverError, DriverResult, EventStatus, PlatformParam, status};
use bytemuck::Pod;
use log::{debug, trace};
use rustc_hash::FxHashMap;
use std::collections::VecDeque;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};

/// `CL_INVALID_BUFFER_SIZE`
const INVALID_BUFFER_SIZE: i32 = -61;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

// ============================================================================
// Configuration
// ============================================================================

/// Capabilities reported by a host device
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostDeviceSpec {
    pub name: String,
    pub max_compute_units: u32,
    pub max_work_group_size: usize,
    pub max_work_item_sizes: [usize; 3],
    pub max_mem_alloc_size: u64,
}

impl Default for HostDeviceSpec {
    fn default() -> Self {
        Self {
            name: "Host Reference Device".to_string(),
            max_compute_units: 8,
            max_work_group_size: 1024,
            max_work_item_sizes: [1024, 1024, 64],
            max_mem_alloc_size: 1 << 30,
        }
    }
}

impl HostDeviceSpec {
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }
}

/// A named group of host devices
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostPlatform {
    pub name: String,
    pub vendor: String,
    pub devices: Vec<HostDeviceSpec>,
}

impl HostPlatform {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            vendor: "shader-dispatch".to_string(),
            devices: Vec::new(),
        }
    }

    pub fn with_device(mut self, device: HostDeviceSpec) -> Self {
        self.devices.push(device);
        self
    }
}

// ============================================================================
// Kernel bodies
// ============================================================================

/// Index-space coordinates of one work item
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WorkItem {
    pub global_id: [usize; 3],
    pub local_id: [usize; 3],
    pub group_id: [usize; 3],
    pub global_size: [usize; 3],
    pub local_size: [usize; 3],
    pub global_offset: [usize; 3],
}

impl WorkItem {
    /// Row-major linear index of the item within the dispatched range, ignoring the offset
    pub fn linear_id(&self) -> usize {
        let x = self.global_id[0] - self.global_offset[0];
        let y = self.global_id[1] - self.global_offset[1];
        let z = self.global_id[2] - self.global_offset[2];
        (z * self.global_size[1] + y) * self.global_size[0] + x
    }
}

/// Typed element access to the buffers bound to a dispatch
///
/// Out-of-range reads return zero and out-of-range writes are dropped.
pub struct HostArgs {
    slots: Vec<HostMem>,
}

impl HostArgs {
    /// Number of bound argument slots
    pub fn slots(&self) -> usize {
        self.slots.len()
    }

    /// Number of whole `T` elements in slot `slot`
    pub fn len<T: Pod>(&self, slot: usize) -> usize {
        let size = std::mem::size_of::<T>();
        match self.slots.get(slot) {
            Some(mem) if size > 0 => lock(&mem.bytes).len() / size,
            _ => 0,
        }
    }

    pub fn get<T: Pod>(&self, slot: usize, index: usize) -> T {
        let size = std::mem::size_of::<T>();
        let Some(mem) = self.slots.get(slot) else {
            return T::zeroed();
        };
        let bytes = lock(&mem.bytes);
        let start = index * size;
        match bytes.get(start..start + size) {
            Some(raw) => bytemuck::pod_read_unaligned(raw),
            None => T::zeroed(),
        }
    }

    pub fn set<T: Pod>(&self, slot: usize, index: usize, value: T) {
        let size = std::mem::size_of::<T>();
        let Some(mem) = self.slots.get(slot) else {
            return;
        };
        let mut bytes = lock(&mem.bytes);
        let start = index * size;
        if let Some(raw) = bytes.get_mut(start..start + size) {
            raw.copy_from_slice(bytemuck::bytes_of(&value));
        }
    }
}

type HostKernelFn = Arc<dyn Fn(&WorkItem, &HostArgs) + Send + Sync>;

// ============================================================================
// Handles
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct HostPlatformId(usize);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct HostDeviceId {
    platform: usize,
    device: usize,
}

#[derive(Debug)]
pub struct HostContext {
    devices: Vec<HostDeviceId>,
}

pub struct HostQueue {
    device: HostDeviceId,
    state: Arc<QueueState>,
}

pub struct HostProgram {
    source: String,
    decls: Vec<KernelDecl>,
    logs: Mutex<FxHashMap<HostDeviceId, String>>,
    built: AtomicBool,
}

impl std::fmt::Debug for HostProgram {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HostProgram")
            .field("kernels", &self.decls)
            .field("built", &self.built.load(Ordering::SeqCst))
            .finish_non_exhaustive()
    }
}

pub struct HostKernel {
    name: String,
    params: usize,
    args: Mutex<Vec<Option<HostMem>>>,
    body: HostKernelFn,
}

pub struct HostEvent {
    state: Arc<EventState>,
    queue: Arc<QueueState>,
}

/// Host-side memory object
#[derive(Clone)]
pub struct HostMem {
    bytes: Arc<Mutex<Vec<u8>>>,
}

#[derive(Debug, Clone)]
struct KernelDecl {
    name: String,
    params: usize,
}

struct EventState {
    status: Mutex<EventStatus>,
}

impl EventState {
    fn new() -> Self {
        Self {
            status: Mutex::new(EventStatus::Queued),
        }
    }

    fn status(&self) -> EventStatus {
        *lock(&self.status)
    }

    fn set(&self, status: EventStatus) {
        *lock(&self.status) = status;
    }

    fn is_finished(&self) -> bool {
        matches!(self.status(), EventStatus::Complete | EventStatus::Error(_))
    }
}

struct Command {
    event: Arc<EventState>,
    run: Box<dyn FnOnce() + Send>,
}

/// Pending commands of one queue, executed in FIFO order
struct QueueState {
    pending: Mutex<VecDeque<Command>>,
    exec: Mutex<()>,
}

impl QueueState {
    fn new() -> Self {
        Self {
            pending: Mutex::new(VecDeque::new()),
            exec: Mutex::new(()),
        }
    }

    fn push(&self, command: Command) {
        lock(&self.pending).push_back(command);
    }

    /// Runs the oldest pending command. Caller must hold `exec`.
    fn run_next(&self) -> bool {
        let Some(command) = lock(&self.pending).pop_front() else {
            return false;
        };
        command.event.set(EventStatus::Running);
        match catch_unwind(AssertUnwindSafe(command.run)) {
            Ok(()) => command.event.set(EventStatus::Complete),
            Err(_) => command.event.set(EventStatus::Error(status::OUT_OF_RESOURCES)),
        }
        true
    }

    fn run_until(&self, target: &EventState) {
        let _exec = lock(&self.exec);
        while !target.is_finished() && self.run_next() {}
    }

    fn run_all(&self) {
        let _exec = lock(&self.exec);
        while self.run_next() {}
    }

    fn submit_all(&self) {
        for command in lock(&self.pending).iter() {
            if command.event.status() == EventStatus::Queued {
                command.event.set(EventStatus::Submitted);
            }
        }
    }
}

// ============================================================================
// Statistics
// ============================================================================

#[derive(Debug, Default)]
struct Counters {
    contexts_created: AtomicUsize,
    queues_created: AtomicUsize,
    programs_created: AtomicUsize,
    programs_released: AtomicUsize,
    kernels_created: AtomicUsize,
    kernels_released: AtomicUsize,
    events_created: AtomicUsize,
    events_released: AtomicUsize,
    kernel_launches: AtomicUsize,
    queue_flushes: AtomicUsize,
}

fn bump(counter: &AtomicUsize) {
    counter.fetch_add(1, Ordering::SeqCst);
}

/// Snapshot of the host driver's object counters
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct HostStats {
    pub contexts_created: usize,
    pub queues_created: usize,
    pub programs_created: usize,
    pub programs_released: usize,
    pub kernels_created: usize,
    pub kernels_released: usize,
    pub events_created: usize,
    pub events_released: usize,
    /// Dispatches that have actually run
    pub kernel_launches: usize,
    pub queue_flushes: usize,
}

impl HostStats {
    pub fn live_programs(&self) -> usize {
        self.programs_created - self.programs_released
    }

    pub fn live_kernels(&self) -> usize {
        self.kernels_created - self.kernels_released
    }

    pub fn live_events(&self) -> usize {
        self.events_created - self.events_released
    }
}

// ============================================================================
// HostDriver
// ============================================================================

/// CPU reference implementation of [`Driver`]
pub struct HostDriver {
    platforms: Vec<HostPlatform>,
    bodies: RwLock<FxHashMap<String, HostKernelFn>>,
    counters: Arc<Counters>,
}

impl std::fmt::Debug for HostDriver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let bodies = self.bodies.read().unwrap_or_else(PoisonError::into_inner);
        let mut names: Vec<&String> = bodies.keys().collect();
        names.sort();
        f.debug_struct("HostDriver")
            .field("platforms", &self.platforms)
            .field("kernels", &names)
            .finish()
    }
}

impl Default for HostDriver {
    fn default() -> Self {
        Self::new()
    }
}

impl HostDriver {
    /// One platform with one default device
    pub fn new() -> Self {
        Self::with_platforms(vec![
            HostPlatform::new("Host Reference Platform").with_device(HostDeviceSpec::default()),
        ])
    }

    pub fn with_platforms(platforms: Vec<HostPlatform>) -> Self {
        Self {
            platforms,
            bodies: RwLock::new(FxHashMap::default()),
            counters: Arc::new(Counters::default()),
        }
    }

    /// One platform per name, each with a single default device
    pub fn named_platforms<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let platforms = names
            .into_iter()
            .map(|name| {
                let name = name.into();
                let device = HostDeviceSpec::named(format!("{} Device", name));
                HostPlatform::new(name).with_device(device)
            })
            .collect();
        Self::with_platforms(platforms)
    }

    /// Registers (or replaces) the body of kernel `name`
    pub fn register_kernel<F>(&self, name: impl Into<String>, body: F) -> &Self
    where
        F: Fn(&WorkItem, &HostArgs) + Send + Sync + 'static,
    {
        let name = name.into();
        debug!("Registering host kernel body '{}'", name);
        self.bodies
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(name, Arc::new(body));
        self
    }

    pub fn stats(&self) -> HostStats {
        let c = &self.counters;
        HostStats {
            contexts_created: c.contexts_created.load(Ordering::SeqCst),
            queues_created: c.queues_created.load(Ordering::SeqCst),
            programs_created: c.programs_created.load(Ordering::SeqCst),
            programs_released: c.programs_released.load(Ordering::SeqCst),
            kernels_created: c.kernels_created.load(Ordering::SeqCst),
            kernels_released: c.kernels_released.load(Ordering::SeqCst),
            events_created: c.events_created.load(Ordering::SeqCst),
            events_released: c.events_released.load(Ordering::SeqCst),
            kernel_launches: c.kernel_launches.load(Ordering::SeqCst),
            queue_flushes: c.queue_flushes.load(Ordering::SeqCst),
        }
    }

    fn spec(&self, id: &HostDeviceId) -> DriverResult<&HostDeviceSpec> {
        self.platforms
            .get(id.platform)
            .and_then(|p| p.devices.get(id.device))
            .ok_or_else(|| DriverError::new(status::INVALID_DEVICE, "unknown host device"))
    }

    fn body(&self, name: &str) -> Option<HostKernelFn> {
        self.bodies
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(name)
            .cloned()
    }

    fn diagnose(&self, program: &HostProgram) -> Vec<String> {
        let mut diagnostics = Vec::new();
        for (number, line) in program.source.lines().enumerate() {
            let trimmed = line.trim();
            if let Some(target) = trimmed.strip_prefix("#include") {
                diagnostics.push(format!(
                    "<source>:{}:1: fatal error: {} file not found",
                    number + 1,
                    target.trim()
                ));
            } else if let Some(message) = trimmed.strip_prefix("#error") {
                diagnostics.push(format!(
                    "<source>:{}:2: error: {}",
                    number + 1,
                    message.trim()
                ));
            }
        }
        for decl in &program.decls {
            if self.body(&decl.name).is_none() {
                diagnostics.push(format!(
                    "error: no host implementation registered for kernel '{}'",
                    decl.name
                ));
            }
        }
        diagnostics
    }

    fn make_kernel(&self, decl: &KernelDecl) -> DriverResult<HostKernel> {
        let body = self.body(&decl.name).ok_or_else(|| {
            DriverError::new(
                status::INVALID_KERNEL_NAME,
                format!("no host implementation for kernel '{}'", decl.name),
            )
        })?;
        bump(&self.counters.kernels_created);
        Ok(HostKernel {
            name: decl.name.clone(),
            params: decl.params,
            args: Mutex::new(vec![None; decl.params]),
            body,
        })
    }

    fn wait_dependencies(&self, queue: &HostQueue, wait_list: &[HostEvent]) {
        for event in wait_list {
            if !Arc::ptr_eq(&event.queue, &queue.state) {
                event.queue.run_until(&event.state);
            }
        }
    }
}

/// Fails when any finished command in `wait_list` terminated abnormally
fn check_wait_list(wait_list: &[HostEvent]) -> DriverResult<()> {
    match wait_list
        .iter()
        .map(|e| e.state.status())
        .find(|s| matches!(s, EventStatus::Error(_)))
    {
        Some(EventStatus::Error(code)) => Err(DriverError::new(
            status::EXEC_STATUS_ERROR_FOR_EVENTS_IN_WAIT_LIST,
            format!("a command in the wait list terminated with status {}", code),
        )),
        _ => Ok(()),
    }
}

/// Extracts `__kernel void name(params)` declarations
fn parse_kernel_decls(source: &str) -> Vec<KernelDecl> {
    const KEYWORD: &str = "__kernel";
    let mut decls = Vec::new();
    let mut rest = source;
    while let Some(pos) = rest.find(KEYWORD) {
        rest = &rest[pos + KEYWORD.len()..];
        let Some(signature) = rest.trim_start().strip_prefix("void") else {
            continue;
        };
        let signature = signature.trim_start();
        let name_len = signature
            .find(|c: char| !(c.is_ascii_alphanumeric() || c == '_'))
            .unwrap_or(signature.len());
        if name_len == 0 {
            continue;
        }
        let name = &signature[..name_len];
        let Some(params) = signature[name_len..].trim_start().strip_prefix('(') else {
            continue;
        };
        let Some(close) = params.find(')') else {
            continue;
        };
        let count = params[..close]
            .split(',')
            .map(str::trim)
            .filter(|p| !p.is_empty() && *p != "void")
            .count();
        decls.push(KernelDecl {
            name: name.to_string(),
            params: count,
        });
    }
    decls
}

fn encode_string(value: &str) -> Vec<u8> {
    let mut bytes = value.as_bytes().to_vec();
    bytes.push(0);
    bytes
}

fn check_range(offset: usize, len: usize, capacity: usize) -> DriverResult<()> {
    match offset.checked_add(len) {
        Some(end) if end <= capacity => Ok(()),
        _ => Err(DriverError::new(
            status::INVALID_VALUE,
            format!(
                "range {}..{} exceeds buffer of {} bytes",
                offset,
                offset.saturating_add(len),
                capacity
            ),
        )),
    }
}

impl Driver for HostDriver {
    type Platform = HostPlatformId;
    type Device = HostDeviceId;
    type Context = HostContext;
    type Queue = HostQueue;
    type Program = HostProgram;
    type Kernel = HostKernel;
    type Event = HostEvent;
    type Mem = HostMem;

    fn platforms(&self) -> DriverResult<Vec<HostPlatformId>> {
        if self.platforms.is_empty() {
            return Err(DriverError::new(
                status::PLATFORM_NOT_FOUND_KHR,
                "no host platforms configured",
            ));
        }
        Ok((0..self.platforms.len()).map(HostPlatformId).collect())
    }

    fn platform_info(
        &self,
        platform: &HostPlatformId,
        param: PlatformParam,
    ) -> DriverResult<Vec<u8>> {
        let platform = self
            .platforms
            .get(platform.0)
            .ok_or_else(|| DriverError::new(status::INVALID_VALUE, "unknown host platform"))?;
        Ok(match param {
            PlatformParam::Name => encode_string(&platform.name),
            PlatformParam::Vendor => encode_string(&platform.vendor),
        })
    }

    fn devices(&self, platform: &HostPlatformId) -> DriverResult<Vec<HostDeviceId>> {
        let entry = self
            .platforms
            .get(platform.0)
            .ok_or_else(|| DriverError::new(status::INVALID_VALUE, "unknown host platform"))?;
        if entry.devices.is_empty() {
            return Err(DriverError::new(
                status::DEVICE_NOT_FOUND,
                format!("platform '{}' has no devices", entry.name),
            ));
        }
        Ok((0..entry.devices.len())
            .map(|device| HostDeviceId {
                platform: platform.0,
                device,
            })
            .collect())
    }

    fn device_info(&self, device: &HostDeviceId, param: DeviceParam) -> DriverResult<Vec<u8>> {
        let spec = self.spec(device)?;
        Ok(match param {
            DeviceParam::MaxComputeUnits => spec.max_compute_units.to_ne_bytes().to_vec(),
            DeviceParam::MaxWorkItemDimensions => 3u32.to_ne_bytes().to_vec(),
            DeviceParam::MaxWorkGroupSize => spec.max_work_group_size.to_ne_bytes().to_vec(),
            DeviceParam::MaxWorkItemSizes => spec
                .max_work_item_sizes
                .iter()
                .flat_map(|s| s.to_ne_bytes())
                .collect(),
            DeviceParam::MaxMemAllocSize => spec.max_mem_alloc_size.to_ne_bytes().to_vec(),
            DeviceParam::Name => encode_string(&spec.name),
            DeviceParam::Vendor => encode_string(&self.platforms[device.platform].vendor),
        })
    }

    fn create_context(&self, devices: &[HostDeviceId]) -> DriverResult<HostContext> {
        if devices.is_empty() {
            return Err(DriverError::new(status::INVALID_VALUE, "empty device list"));
        }
        for device in devices {
            self.spec(device)?;
        }
        bump(&self.counters.contexts_created);
        Ok(HostContext {
            devices: devices.to_vec(),
        })
    }

    fn create_queue(&self, context: &HostContext, device: &HostDeviceId) -> DriverResult<HostQueue> {
        if !context.devices.contains(device) {
            return Err(DriverError::new(
                status::INVALID_DEVICE,
                "device is not part of the context",
            ));
        }
        bump(&self.counters.queues_created);
        Ok(HostQueue {
            device: *device,
            state: Arc::new(QueueState::new()),
        })
    }

    fn create_program(&self, _context: &HostContext, source: &str) -> DriverResult<HostProgram> {
        bump(&self.counters.programs_created);
        Ok(HostProgram {
            source: source.to_string(),
            decls: parse_kernel_decls(source),
            logs: Mutex::new(FxHashMap::default()),
            built: AtomicBool::new(false),
        })
    }

    fn build_program(
        &self,
        program: &HostProgram,
        devices: &[HostDeviceId],
        options: &str,
    ) -> DriverResult<()> {
        trace!("Host build with options '{}'", options);
        let diagnostics = self.diagnose(program);
        let mut logs = lock(&program.logs);
        for device in devices {
            let spec = self.spec(device)?;
            let log = diagnostics
                .iter()
                .map(|line| format!("{}: {}", spec.name, line))
                .collect::<Vec<_>>()
                .join("\n");
            logs.insert(*device, log);
        }
        if diagnostics.is_empty() {
            program.built.store(true, Ordering::SeqCst);
            Ok(())
        } else {
            Err(DriverError::new(
                status::BUILD_PROGRAM_FAILURE,
                "build program failure",
            ))
        }
    }

    fn build_log(&self, program: &HostProgram, device: &HostDeviceId) -> DriverResult<String> {
        Ok(lock(&program.logs).get(device).cloned().unwrap_or_default())
    }

    fn create_kernels_in_program(&self, program: &HostProgram) -> DriverResult<Vec<HostKernel>> {
        if !program.built.load(Ordering::SeqCst) {
            return Err(DriverError::new(
                status::INVALID_PROGRAM_EXECUTABLE,
                "program has not been built",
            ));
        }
        program.decls.iter().map(|d| self.make_kernel(d)).collect()
    }

    fn create_kernel(&self, program: &HostProgram, name: &str) -> DriverResult<HostKernel> {
        if !program.built.load(Ordering::SeqCst) {
            return Err(DriverError::new(
                status::INVALID_PROGRAM_EXECUTABLE,
                "program has not been built",
            ));
        }
        let decl = program
            .decls
            .iter()
            .find(|d| d.name == name)
            .ok_or_else(|| {
                DriverError::new(
                    status::INVALID_KERNEL_NAME,
                    format!("no kernel named '{}' in program", name),
                )
            })?;
        self.make_kernel(decl)
    }

    fn kernel_name(&self, kernel: &HostKernel) -> DriverResult<String> {
        Ok(kernel.name.clone())
    }

    fn set_kernel_arg(&self, kernel: &HostKernel, index: u32, mem: &HostMem) -> DriverResult<()> {
        let index = index as usize;
        if index >= kernel.params {
            return Err(DriverError::new(
                status::INVALID_ARG_INDEX,
                format!(
                    "kernel '{}' takes {} arguments, index {} is out of range",
                    kernel.name, kernel.params, index
                ),
            ));
        }
        lock(&kernel.args)[index] = Some(mem.clone());
        Ok(())
    }

    fn enqueue_nd_range(
        &self,
        queue: &HostQueue,
        kernel: &HostKernel,
        offset: [usize; 3],
        global: [usize; 3],
        local: [usize; 3],
        wait_list: &[HostEvent],
    ) -> DriverResult<HostEvent> {
        let mut slots = Vec::with_capacity(kernel.params);
        for (index, arg) in lock(&kernel.args).iter().enumerate() {
            match arg {
                Some(mem) => slots.push(mem.clone()),
                None => {
                    return Err(DriverError::new(
                        status::INVALID_KERNEL_ARGS,
                        format!("argument {} of kernel '{}' is not set", index, kernel.name),
                    ));
                }
            }
        }
        if global.contains(&0) {
            return Err(DriverError::new(
                status::INVALID_GLOBAL_WORK_SIZE,
                format!("global work size {:?} has a zero extent", global),
            ));
        }
        if local.contains(&0) || (0..3).any(|d| global[d] % local[d] != 0) {
            return Err(DriverError::new(
                status::INVALID_WORK_GROUP_SIZE,
                format!("local size {:?} does not divide global size {:?}", local, global),
            ));
        }
        let spec = self.spec(&queue.device)?;
        if (0..3).any(|d| local[d] > spec.max_work_item_sizes[d]) {
            return Err(DriverError::new(
                status::INVALID_WORK_ITEM_SIZE,
                format!(
                    "local size {:?} exceeds max work item sizes {:?}",
                    local, spec.max_work_item_sizes
                ),
            ));
        }
        if local.iter().product::<usize>() > spec.max_work_group_size {
            return Err(DriverError::new(
                status::INVALID_WORK_GROUP_SIZE,
                format!(
                    "work group of {} items exceeds device limit {}",
                    local.iter().product::<usize>(),
                    spec.max_work_group_size
                ),
            ));
        }

        let dependencies: Vec<(Arc<QueueState>, Arc<EventState>)> = wait_list
            .iter()
            .filter(|e| !Arc::ptr_eq(&e.queue, &queue.state))
            .map(|e| (Arc::clone(&e.queue), Arc::clone(&e.state)))
            .collect();
        let body = Arc::clone(&kernel.body);
        let counters = Arc::clone(&self.counters);
        let name = kernel.name.clone();
        let args = HostArgs { slots };
        let run = move || {
            for (dep_queue, dep_event) in &dependencies {
                dep_queue.run_until(dep_event);
            }
            trace!("Running host kernel '{}' over {:?}", name, global);
            for z in 0..global[2] {
                for y in 0..global[1] {
                    for x in 0..global[0] {
                        let item = WorkItem {
                            global_id: [offset[0] + x, offset[1] + y, offset[2] + z],
                            local_id: [x % local[0], y % local[1], z % local[2]],
                            group_id: [x / local[0], y / local[1], z / local[2]],
                            global_size: global,
                            local_size: local,
                            global_offset: offset,
                        };
                        body(&item, &args);
                    }
                }
            }
            bump(&counters.kernel_launches);
        };

        let state = Arc::new(EventState::new());
        queue.state.push(Command {
            event: Arc::clone(&state),
            run: Box::new(run),
        });
        bump(&self.counters.events_created);
        Ok(HostEvent {
            state,
            queue: Arc::clone(&queue.state),
        })
    }

    fn create_buffer(&self, _context: &HostContext, len: usize) -> DriverResult<HostMem> {
        if len == 0 {
            return Err(DriverError::new(INVALID_BUFFER_SIZE, "buffer size must be > 0"));
        }
        Ok(HostMem {
            bytes: Arc::new(Mutex::new(vec![0u8; len])),
        })
    }

    fn write_buffer(
        &self,
        queue: &HostQueue,
        mem: &HostMem,
        offset: usize,
        data: &[u8],
        wait_list: &[HostEvent],
    ) -> DriverResult<()> {
        self.wait_dependencies(queue, wait_list);
        queue.state.run_all();
        check_wait_list(wait_list)?;
        let mut bytes = lock(&mem.bytes);
        check_range(offset, data.len(), bytes.len())?;
        bytes[offset..offset + data.len()].copy_from_slice(data);
        Ok(())
    }

    fn read_buffer(
        &self,
        queue: &HostQueue,
        mem: &HostMem,
        offset: usize,
        data: &mut [u8],
        wait_list: &[HostEvent],
    ) -> DriverResult<()> {
        self.wait_dependencies(queue, wait_list);
        queue.state.run_all();
        check_wait_list(wait_list)?;
        let bytes = lock(&mem.bytes);
        check_range(offset, data.len(), bytes.len())?;
        data.copy_from_slice(&bytes[offset..offset + data.len()]);
        Ok(())
    }

    fn event_status(&self, event: &HostEvent) -> DriverResult<EventStatus> {
        Ok(event.state.status())
    }

    fn wait_for_events(&self, events: &[HostEvent]) -> DriverResult<()> {
        for event in events {
            event.queue.run_until(&event.state);
        }
        check_wait_list(events)
    }

    fn flush(&self, queue: &HostQueue) -> DriverResult<()> {
        bump(&self.counters.queue_flushes);
        queue.state.submit_all();
        Ok(())
    }

    fn finish(&self, queue: &HostQueue) -> DriverResult<()> {
        queue.state.run_all();
        Ok(())
    }

    fn release_event(&self, event: HostEvent) {
        bump(&self.counters.events_released);
        drop(event);
    }

    fn release_kernel(&self, kernel: HostKernel) {
        bump(&self.counters.kernels_released);
        drop(kernel);
    }

    fn release_program(&self, program: HostProgram) {
        bump(&self.counters.programs_released);
        drop(program);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn built_program(driver: &HostDriver, source: &str) -> (HostContext, HostQueue, HostProgram) {
        let platform = driver.platforms().unwrap()[0];
        let devices = driver.devices(&platform).unwrap();
        let context = driver.create_context(&devices).unwrap();
        let queue = driver.create_queue(&context, &devices[0]).unwrap();
        let program = driver.create_program(&context, source).unwrap();
        driver.build_program(&program, &devices, "").unwrap();
        (context, queue, program)
    }

    #[test]
    fn test_parse_kernel_decls() {
        let source = r#"
            __kernel void add(__global float* a, __global float* b, __global float* c) {}
            __kernel void noop(void) {}
            float helper(float x) { return x; }
        "#;
        let decls = parse_kernel_decls(source);
        assert_eq!(decls.len(), 2);
        assert_eq!(decls[0].name, "add");
        assert_eq!(decls[0].params, 3);
        assert_eq!(decls[1].name, "noop");
        assert_eq!(decls[1].params, 0);
    }

    #[test]
    fn test_empty_driver_fails_enumeration() {
        let driver = HostDriver::with_platforms(vec![]);
        let err = driver.platforms().unwrap_err();
        assert_eq!(err.code, status::PLATFORM_NOT_FOUND_KHR);
    }

    #[test]
    fn test_build_log_is_per_device() {
        let driver = HostDriver::with_platforms(vec![
            HostPlatform::new("Dual")
                .with_device(HostDeviceSpec::named("gpu0"))
                .with_device(HostDeviceSpec::named("gpu1")),
        ]);
        let platform = driver.platforms().unwrap()[0];
        let devices = driver.devices(&platform).unwrap();
        let context = driver.create_context(&devices).unwrap();
        let program = driver
            .create_program(&context, "#error broken\n__kernel void k(void) {}")
            .unwrap();
        let err = driver.build_program(&program, &devices, "").unwrap_err();
        assert_eq!(err.code, status::BUILD_PROGRAM_FAILURE);

        let log0 = driver.build_log(&program, &devices[0]).unwrap();
        let log1 = driver.build_log(&program, &devices[1]).unwrap();
        assert!(log0.starts_with("gpu0: "));
        assert!(log0.contains("error: broken"));
        assert!(log1.starts_with("gpu1: "));
        assert!(log1.contains("no host implementation registered for kernel 'k'"));
    }

    #[test]
    fn test_commands_are_deferred_until_waited() {
        let driver = HostDriver::new();
        driver.register_kernel("fill", |item: &WorkItem, args: &HostArgs| {
            args.set(0, item.global_id[0], 7u32);
        });
        let (context, queue, program) =
            built_program(&driver, "__kernel void fill(__global uint* out) {}");
        let kernel = driver.create_kernel(&program, "fill").unwrap();
        let mem = driver.create_buffer(&context, 16).unwrap();
        driver.set_kernel_arg(&kernel, 0, &mem).unwrap();

        let event = driver
            .enqueue_nd_range(&queue, &kernel, [0; 3], [4, 1, 1], [1, 1, 1], &[])
            .unwrap();
        assert_eq!(driver.event_status(&event).unwrap(), EventStatus::Queued);
        driver.flush(&queue).unwrap();
        assert_eq!(driver.event_status(&event).unwrap(), EventStatus::Submitted);
        assert_eq!(driver.stats().kernel_launches, 0);

        driver.wait_for_events(std::slice::from_ref(&event)).unwrap();
        assert_eq!(driver.event_status(&event).unwrap(), EventStatus::Complete);

        let mut out = [0u8; 16];
        driver.read_buffer(&queue, &mem, 0, &mut out, &[]).unwrap();
        let values: Vec<u32> = out
            .chunks(4)
            .map(|c| u32::from_ne_bytes([c[0], c[1], c[2], c[3]]))
            .collect();
        assert_eq!(values, vec![7, 7, 7, 7]);
    }

    #[test]
    fn test_finish_drains_queue() {
        let driver = HostDriver::new();
        driver.register_kernel("noop", |_: &WorkItem, _: &HostArgs| {});
        let (_context, queue, program) = built_program(&driver, "__kernel void noop(void) {}");
        let kernel = driver.create_kernel(&program, "noop").unwrap();
        let events: Vec<HostEvent> = (0..3)
            .map(|_| {
                driver
                    .enqueue_nd_range(&queue, &kernel, [0; 3], [2, 2, 1], [1, 1, 1], &[])
                    .unwrap()
            })
            .collect();

        driver.finish(&queue).unwrap();
        assert_eq!(driver.stats().kernel_launches, 3);
        for event in &events {
            assert_eq!(driver.event_status(event).unwrap(), EventStatus::Complete);
        }
    }

    #[test]
    fn test_unbound_argument_rejected_at_enqueue() {
        let driver = HostDriver::new();
        driver.register_kernel("pair", |_: &WorkItem, _: &HostArgs| {});
        let (context, queue, program) =
            built_program(&driver, "__kernel void pair(__global int* a, __global int* b) {}");
        let kernel = driver.create_kernel(&program, "pair").unwrap();
        let mem = driver.create_buffer(&context, 4).unwrap();
        driver.set_kernel_arg(&kernel, 0, &mem).unwrap();

        let err = driver
            .enqueue_nd_range(&queue, &kernel, [0; 3], [1, 1, 1], [1, 1, 1], &[])
            .err()
            .unwrap();
        assert_eq!(err.code, status::INVALID_KERNEL_ARGS);

        let err = driver.set_kernel_arg(&kernel, 2, &mem).unwrap_err();
        assert_eq!(err.code, status::INVALID_ARG_INDEX);
    }

    #[test]
    fn test_work_group_validation() {
        let driver = HostDriver::new();
        driver.register_kernel("noop", |_: &WorkItem, _: &HostArgs| {});
        let (_context, queue, program) = built_program(&driver, "__kernel void noop(void) {}");
        let kernel = driver.create_kernel(&program, "noop").unwrap();

        let err = driver
            .enqueue_nd_range(&queue, &kernel, [0; 3], [6, 1, 1], [4, 1, 1], &[])
            .err()
            .unwrap();
        assert_eq!(err.code, status::INVALID_WORK_GROUP_SIZE);

        let err = driver
            .enqueue_nd_range(&queue, &kernel, [0; 3], [0, 1, 1], [1, 1, 1], &[])
            .err()
            .unwrap();
        assert_eq!(err.code, status::INVALID_GLOBAL_WORK_SIZE);
    }

    #[test]
    fn test_panicking_body_marks_event_errored() {
        let driver = HostDriver::new();
        driver.register_kernel("boom", |_: &WorkItem, _: &HostArgs| panic!("kernel fault"));
        let (_context, queue, program) = built_program(&driver, "__kernel void boom(void) {}");
        let kernel = driver.create_kernel(&program, "boom").unwrap();
        let event = driver
            .enqueue_nd_range(&queue, &kernel, [0; 3], [1, 1, 1], [1, 1, 1], &[])
            .unwrap();

        let err = driver.wait_for_events(std::slice::from_ref(&event)).unwrap_err();
        assert_eq!(err.code, status::EXEC_STATUS_ERROR_FOR_EVENTS_IN_WAIT_LIST);
        assert!(matches!(
            driver.event_status(&event).unwrap(),
            EventStatus::Error(_)
        ));
    }

    #[test]
    fn test_transfer_after_faulted_wait_list_fails() {
        let driver = HostDriver::new();
        driver.register_kernel("boom", |_: &WorkItem, _: &HostArgs| panic!("kernel fault"));
        let (context, queue, program) = built_program(&driver, "__kernel void boom(void) {}");
        let kernel = driver.create_kernel(&program, "boom").unwrap();
        let mem = driver.create_buffer(&context, 4).unwrap();
        let event = driver
            .enqueue_nd_range(&queue, &kernel, [0; 3], [1, 1, 1], [1, 1, 1], &[])
            .unwrap();
        let wait_list = std::slice::from_ref(&event);

        let mut data = [0u8; 4];
        let err = driver
            .read_buffer(&queue, &mem, 0, &mut data, wait_list)
            .unwrap_err();
        assert_eq!(err.code, status::EXEC_STATUS_ERROR_FOR_EVENTS_IN_WAIT_LIST);
        let err = driver
            .write_buffer(&queue, &mem, 0, &[1, 2, 3, 4], wait_list)
            .unwrap_err();
        assert_eq!(err.code, status::EXEC_STATUS_ERROR_FOR_EVENTS_IN_WAIT_LIST);

        driver.read_buffer(&queue, &mem, 0, &mut data, &[]).unwrap();
        assert_eq!(data, [0; 4]);
    }

    #[test]
    fn test_flush_submits_without_running() {
        let driver = HostDriver::new();
        driver.register_kernel("noop", |_: &WorkItem, _: &HostArgs| {});
        let (_context, queue, program) = built_program(&driver, "__kernel void noop(void) {}");
        let kernel = driver.create_kernel(&program, "noop").unwrap();
        let event = driver
            .enqueue_nd_range(&queue, &kernel, [0; 3], [1, 1, 1], [1, 1, 1], &[])
            .unwrap();
        assert_eq!(driver.event_status(&event).unwrap(), EventStatus::Queued);

        driver.flush(&queue).unwrap();
        assert_eq!(driver.event_status(&event).unwrap(), EventStatus::Submitted);
        assert_eq!(driver.stats().queue_flushes, 1);
        assert_eq!(driver.stats().kernel_launches, 0);
    }

    #[test]
    fn test_work_item_linear_id() {
        let item = WorkItem {
            global_id: [3, 2, 1],
            local_id: [0; 3],
            group_id: [0; 3],
            global_size: [4, 4, 4],
            local_size: [1; 3],
            global_offset: [1, 0, 0],
        };
        assert_eq!(item.linear_id(), 16 + 2 * 4 + 2);
    }
}
