//! Common test utilities for dispatch integration tests

#![allow(dead_code)]

use shader_dispatch::prelude::*;
use std::sync::Arc;

/// Writes `x + y + z` of each work item into slot 0
pub const INDEX_SUM: &str = r#"
__kernel void index_sum(__global int* out) {
    int x = get_global_id(0);
    int y = get_global_id(1);
    int z = get_global_id(2);
    out[(z * get_global_size(1) + y) * get_global_size(0) + x] = x + y + z;
}
"#;

/// Adds slot 0 and slot 2 element-wise into slot 1
pub const ADD_INTO: &str = r#"
__kernel void add_into(__global const float* a, __global float* out, __global const float* b) {
    int i = get_global_id(0);
    out[i] = a[i] + b[i];
}
"#;

pub fn init_logger() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// Registers host bodies for every kernel in this module
pub fn register_kernels(driver: &HostDriver) {
    driver
        .register_kernel("index_sum", |item: &WorkItem, args: &HostArgs| {
            let [x, y, z] = item.global_id;
            args.set(0, item.linear_id(), (x + y + z) as i32);
        })
        .register_kernel("add_into", |item: &WorkItem, args: &HostArgs| {
            let i = item.global_id[0];
            let a: f32 = args.get(0, i);
            let b: f32 = args.get(2, i);
            args.set(1, i, a + b);
        });
}

/// Runtime on a single host platform with a private include table
pub fn host_runtime() -> Arc<Runtime<HostDriver>> {
    runtime_with(HostDriver::new(), RuntimeConfig::default())
}

pub fn runtime_with(driver: HostDriver, config: RuntimeConfig) -> Arc<Runtime<HostDriver>> {
    init_logger();
    register_kernels(&driver);
    Arc::new(Runtime::with_config(driver, config).with_includes(Arc::new(IncludeLibrary::new())))
}

pub fn expected_index_sum(extent: usize) -> Vec<i32> {
    let mut expected = Vec::with_capacity(extent * extent * extent);
    for z in 0..extent {
        for y in 0..extent {
            for x in 0..extent {
                expected.push((x + y + z) as i32);
            }
        }
    }
    expected
}
