//! OpenCL driver
//!
//! Thin mapping of [`Driver`] onto `ocl::core`. Handles are the `ocl::core`
//! reference-counted wrappers, so releasing a handle is dropping it.

use super::{DeviceParam, Driver, DriverError, DriverResult, EventStatus, PlatformParam, status};
use log::trace;
use ocl::core::{
    self as cl, ArgVal, CommandExecutionStatus, CommandQueue, Context, DeviceId, Event,
    EventInfo, EventInfoResult, Kernel, KernelInfo, Mem, MemFlags, PlatformId, PlatformInfo,
    Program, ProgramBuildInfo, ProgramInfo, ProgramInfoResult,
};
use std::ffi::CString;

fn driver_error(context: &str, e: cl::Error) -> DriverError {
    let code = e.api_status().map(|s| s as i32).unwrap_or(status::UNKNOWN);
    DriverError::new(code, format!("{}: {}", context, e))
}

fn c_string(value: &str) -> DriverResult<CString> {
    CString::new(value)
        .map_err(|e| DriverError::new(status::INVALID_VALUE, format!("interior NUL: {}", e)))
}

/// Splits the `;` separated `CL_PROGRAM_KERNEL_NAMES` value
fn kernel_names(value: &str) -> impl Iterator<Item = &str> {
    value
        .split(';')
        .map(|name| name.trim_matches(|c: char| c == '\0' || c.is_whitespace()))
        .filter(|name| !name.is_empty())
}

/// OpenCL implementation of [`Driver`]
#[derive(Debug, Default, Clone, Copy)]
pub struct OclDriver;

impl OclDriver {
    pub fn new() -> Self {
        Self
    }
}

impl Driver for OclDriver {
    type Platform = PlatformId;
    type Device = DeviceId;
    type Context = Context;
    type Queue = CommandQueue;
    type Program = Program;
    type Kernel = Kernel;
    type Event = Event;
    type Mem = Mem;

    fn platforms(&self) -> DriverResult<Vec<PlatformId>> {
        cl::get_platform_ids().map_err(|e| driver_error("clGetPlatformIDs", e))
    }

    fn platform_info(&self, platform: &PlatformId, param: PlatformParam) -> DriverResult<Vec<u8>> {
        let request = match param {
            PlatformParam::Name => PlatformInfo::Name,
            PlatformParam::Vendor => PlatformInfo::Vendor,
        };
        let value = cl::get_platform_info(*platform, request)
            .map_err(|e| driver_error("clGetPlatformInfo", e))?
            .to_string();
        let mut bytes = value.into_bytes();
        bytes.push(0);
        Ok(bytes)
    }

    fn devices(&self, platform: &PlatformId) -> DriverResult<Vec<DeviceId>> {
        cl::get_device_ids(*platform, None, None).map_err(|e| driver_error("clGetDeviceIDs", e))
    }

    fn device_info(&self, device: &DeviceId, param: DeviceParam) -> DriverResult<Vec<u8>> {
        cl::get_device_info_raw(*device, param.code())
            .map_err(|e| driver_error("clGetDeviceInfo", e))
    }

    fn create_context(&self, devices: &[DeviceId]) -> DriverResult<Context> {
        cl::create_context(None, devices, None, None)
            .map_err(|e| driver_error("clCreateContext", e))
    }

    fn create_queue(&self, context: &Context, device: &DeviceId) -> DriverResult<CommandQueue> {
        cl::create_command_queue(context, *device, None)
            .map_err(|e| driver_error("clCreateCommandQueue", e))
    }

    fn create_program(&self, context: &Context, source: &str) -> DriverResult<Program> {
        let source = c_string(source)?;
        cl::create_program_with_source(context, &[source])
            .map_err(|e| driver_error("clCreateProgramWithSource", e))
    }

    fn build_program(
        &self,
        program: &Program,
        devices: &[DeviceId],
        options: &str,
    ) -> DriverResult<()> {
        let options = c_string(options)?;
        cl::build_program(program, Some(devices), &options, None, None)
            .map_err(|e| driver_error("clBuildProgram", e))
    }

    fn build_log(&self, program: &Program, device: &DeviceId) -> DriverResult<String> {
        cl::get_program_build_info(program, *device, ProgramBuildInfo::BuildLog)
            .map(|log| log.to_string().trim_end_matches('\0').to_string())
            .map_err(|e| driver_error("clGetProgramBuildInfo", e))
    }

    fn create_kernels_in_program(&self, program: &Program) -> DriverResult<Vec<Kernel>> {
        let names = match cl::get_program_info(program, ProgramInfo::KernelNames)
            .map_err(|e| driver_error("clGetProgramInfo", e))?
        {
            ProgramInfoResult::KernelNames(names) => names,
            other => {
                return Err(DriverError::new(
                    status::UNKNOWN,
                    format!("unexpected program info: {:?}", other),
                ));
            }
        };
        kernel_names(&names)
            .map(|name| self.create_kernel(program, name))
            .collect()
    }

    fn create_kernel(&self, program: &Program, name: &str) -> DriverResult<Kernel> {
        cl::create_kernel(program, name).map_err(|e| driver_error("clCreateKernel", e))
    }

    fn kernel_name(&self, kernel: &Kernel) -> DriverResult<String> {
        cl::get_kernel_info(kernel, KernelInfo::FunctionName)
            .map(|name| name.to_string())
            .map_err(|e| driver_error("clGetKernelInfo", e))
    }

    fn set_kernel_arg(&self, kernel: &Kernel, index: u32, mem: &Mem) -> DriverResult<()> {
        cl::set_kernel_arg(kernel, index, ArgVal::mem(mem))
            .map_err(|e| driver_error("clSetKernelArg", e))
    }

    fn enqueue_nd_range(
        &self,
        queue: &CommandQueue,
        kernel: &Kernel,
        offset: [usize; 3],
        global: [usize; 3],
        local: [usize; 3],
        wait_list: &[Event],
    ) -> DriverResult<Event> {
        let mut event = Event::null();
        let wait_list = (!wait_list.is_empty()).then_some(wait_list);
        trace!("clEnqueueNDRangeKernel global={:?} local={:?}", global, local);
        // SAFETY: every argument the kernel reads was bound through set_kernel_arg
        // and the memory objects stay alive as long as the kernel holds them.
        unsafe {
            cl::enqueue_kernel(
                queue,
                kernel,
                3,
                Some(offset),
                &global,
                Some(local),
                wait_list,
                Some(&mut event),
            )
        }
        .map_err(|e| driver_error("clEnqueueNDRangeKernel", e))?;
        Ok(event)
    }

    fn create_buffer(&self, context: &Context, len: usize) -> DriverResult<Mem> {
        // SAFETY: no host pointer is passed.
        unsafe { cl::create_buffer::<_, u8>(context, MemFlags::new().read_write(), len, None) }
            .map_err(|e| driver_error("clCreateBuffer", e))
    }

    fn write_buffer(
        &self,
        queue: &CommandQueue,
        mem: &Mem,
        offset: usize,
        data: &[u8],
        wait_list: &[Event],
    ) -> DriverResult<()> {
        let wait_list = (!wait_list.is_empty()).then_some(wait_list);
        // SAFETY: the write blocks, so `data` outlives the transfer.
        unsafe {
            cl::enqueue_write_buffer(queue, mem, true, offset, data, wait_list, None::<&mut Event>)
        }
        .map_err(|e| driver_error("clEnqueueWriteBuffer", e))
    }

    fn read_buffer(
        &self,
        queue: &CommandQueue,
        mem: &Mem,
        offset: usize,
        data: &mut [u8],
        wait_list: &[Event],
    ) -> DriverResult<()> {
        let wait_list = (!wait_list.is_empty()).then_some(wait_list);
        // SAFETY: the read blocks, so `data` outlives the transfer.
        unsafe {
            cl::enqueue_read_buffer(queue, mem, true, offset, data, wait_list, None::<&mut Event>)
        }
        .map_err(|e| driver_error("clEnqueueReadBuffer", e))
    }

    fn event_status(&self, event: &Event) -> DriverResult<EventStatus> {
        match cl::get_event_info(event, EventInfo::CommandExecutionStatus)
            .map_err(|e| driver_error("clGetEventInfo", e))?
        {
            EventInfoResult::CommandExecutionStatus(status) => Ok(match status {
                CommandExecutionStatus::Complete => EventStatus::Complete,
                CommandExecutionStatus::Running => EventStatus::Running,
                CommandExecutionStatus::Submitted => EventStatus::Submitted,
                CommandExecutionStatus::Queued => EventStatus::Queued,
            }),
            other => Err(DriverError::new(
                status::UNKNOWN,
                format!("unexpected event info: {:?}", other),
            )),
        }
    }

    fn wait_for_events(&self, events: &[Event]) -> DriverResult<()> {
        for event in events {
            cl::wait_for_event(event).map_err(|e| driver_error("clWaitForEvents", e))?;
        }
        Ok(())
    }

    fn flush(&self, queue: &CommandQueue) -> DriverResult<()> {
        cl::flush(queue).map_err(|e| driver_error("clFlush", e))
    }

    fn finish(&self, queue: &CommandQueue) -> DriverResult<()> {
        cl::finish(queue).map_err(|e| driver_error("clFinish", e))
    }

    fn release_event(&self, event: Event) {
        drop(event);
    }

    fn release_kernel(&self, kernel: Kernel) {
        drop(kernel);
    }

    fn release_program(&self, program: Program) {
        drop(program);
    }
}
