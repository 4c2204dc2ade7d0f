//! Waiting, event bookkeeping and disposal tests against the host driver

mod common;

use common::{INDEX_SUM, host_runtime, runtime_with};
use shader_dispatch::driver::status;
use shader_dispatch::buffer::decode;
use shader_dispatch::prelude::*;

#[test]
fn test_is_running_checks_oldest_event() {
    let runtime = host_runtime();
    let shader = ComputeShader::new(&runtime, INDEX_SUM).unwrap();
    let out = shader.create_buffer(64 * 4).unwrap();

    assert!(!shader.is_running(SessionId(1)).unwrap());

    let first = shader.execute("index_sum", [4, 4, 4], &[Some(&out)]).unwrap();
    let second = shader.execute("index_sum", [4, 4, 4], &[Some(&out)]).unwrap();
    assert!(shader.is_running(first).unwrap());
    assert!(shader.is_running(second).unwrap());

    shader.wait(first).unwrap();
    assert!(!shader.is_running(first).unwrap());
    assert!(!shader.is_running(second).unwrap());
    assert_eq!(runtime.driver().stats().kernel_launches, 2);
}

#[test]
fn test_wait_covers_every_pending_session() {
    let runtime = host_runtime();
    let shader = ComputeShader::new(&runtime, INDEX_SUM).unwrap();
    let out = shader.create_buffer(64 * 4).unwrap();

    let first = shader.execute("index_sum", [4, 4, 4], &[Some(&out)]).unwrap();
    shader.execute("index_sum", [4, 4, 4], &[Some(&out)]).unwrap();
    shader.execute("index_sum", [4, 4, 4], &[Some(&out)]).unwrap();

    shader.wait(first).unwrap();
    assert_eq!(runtime.driver().stats().kernel_launches, 3);
    // waiting does not forget events
    assert_eq!(shader.pending_events(), 3);
}

#[test]
fn test_clear_session_releases_every_event() {
    let runtime = host_runtime();
    let shader = ComputeShader::new(&runtime, INDEX_SUM).unwrap();
    let out = shader.create_buffer(64 * 4).unwrap();

    let first = shader.execute("index_sum", [4, 4, 4], &[Some(&out)]).unwrap();
    let second = shader.execute("index_sum", [4, 4, 4], &[Some(&out)]).unwrap();
    shader.wait(second).unwrap();

    shader.clear_session(first);
    assert_eq!(shader.pending_events(), 0);
    assert_eq!(runtime.driver().stats().live_events(), 0);
    assert!(!shader.is_running(second).unwrap());

    let third = shader.execute("index_sum", [4, 4, 4], &[Some(&out)]).unwrap();
    assert_eq!(third, SessionId(3));
}

#[test]
fn test_faulted_kernel_surfaces_on_wait() {
    let driver = HostDriver::new();
    driver.register_kernel("fault", |_: &WorkItem, _: &HostArgs| {
        panic!("device fault");
    });
    let runtime = runtime_with(driver, RuntimeConfig::default());
    let shader = ComputeShader::new(&runtime, "__kernel void fault(void) {}").unwrap();

    let session = shader.execute("fault", 1, &[]).unwrap();
    assert!(matches!(shader.wait(session), Err(ComputeError::Wait(_))));
    assert!(!shader.is_running(session).unwrap());
}

#[test]
fn test_read_after_faulted_kernel_fails() {
    let driver = HostDriver::new();
    driver.register_kernel("fault", |_: &WorkItem, _: &HostArgs| {
        panic!("device fault");
    });
    let runtime = runtime_with(driver, RuntimeConfig::default());
    let shader = ComputeShader::new(&runtime, "__kernel void fault(void) {}").unwrap();
    let mut out = shader.create_buffer(4 * 4).unwrap();

    let session = shader.execute("fault", 1, &[]).unwrap();
    let err = shader.read_array::<i32>(&mut out, None).unwrap_err();
    assert!(matches!(
        err,
        ComputeError::Read(ref source)
            if source.code == status::EXEC_STATUS_ERROR_FOR_EVENTS_IN_WAIT_LIST
    ));

    shader.clear_session(session);
    assert_eq!(shader.read_array::<i32>(&mut out, None).unwrap(), vec![0; 4]);
}

#[test]
fn test_wait_flushes_shared_queue() {
    let runtime = host_runtime();
    let producer = ComputeShader::new(&runtime, INDEX_SUM).unwrap();
    let observer = ComputeShader::new(&runtime, INDEX_SUM).unwrap();
    let out = producer.create_buffer(4).unwrap();
    let flushes = runtime.driver().stats().queue_flushes;

    let session = producer.execute("index_sum", 1, &[Some(&out)]).unwrap();
    observer.wait_all().unwrap();

    let stats = runtime.driver().stats();
    assert_eq!(stats.queue_flushes, flushes + 1);
    assert_eq!(stats.kernel_launches, 0);
    assert!(producer.is_running(session).unwrap());

    producer.wait(session).unwrap();
    assert_eq!(runtime.driver().stats().queue_flushes, flushes + 2);
    assert!(!producer.is_running(session).unwrap());
}

#[test]
fn test_dispose_twice_releases_once() {
    let runtime = host_runtime();
    let mut shader = ComputeShader::new(&runtime, INDEX_SUM).unwrap();
    let out = shader.create_buffer(64 * 4).unwrap();
    shader.execute("index_sum", [4, 4, 4], &[Some(&out)]).unwrap();
    shader.execute("index_sum", [4, 4, 4], &[Some(&out)]).unwrap();

    shader.dispose();
    let after_first = runtime.driver().stats();
    assert_eq!(after_first.programs_released, 1);
    assert_eq!(after_first.live_programs(), 0);
    assert_eq!(after_first.live_kernels(), 0);
    assert_eq!(after_first.live_events(), 0);

    shader.dispose();
    drop(shader);
    assert_eq!(runtime.driver().stats(), after_first);
}

#[test]
fn test_drop_releases_resources() {
    let runtime = host_runtime();
    {
        let shader = ComputeShader::new(&runtime, INDEX_SUM).unwrap();
        let out = shader.create_buffer(4).unwrap();
        shader.execute("index_sum", 1, &[Some(&out)]).unwrap();
        assert_eq!(runtime.driver().stats().live_programs(), 1);
        assert_eq!(runtime.driver().stats().live_events(), 1);
    }
    let stats = runtime.driver().stats();
    assert_eq!(stats.live_programs(), 0);
    assert_eq!(stats.live_kernels(), 0);
    assert_eq!(stats.live_events(), 0);
}

#[test]
fn test_shared_context_outlives_shaders() {
    let runtime = host_runtime();
    drop(ComputeShader::new(&runtime, INDEX_SUM).unwrap());
    drop(ComputeShader::new(&runtime, INDEX_SUM).unwrap());

    assert!(runtime.shared_context().is_some());
    assert_eq!(runtime.driver().stats().contexts_created, 1);
    assert_eq!(runtime.driver().stats().queues_created, 1);
}

#[test]
fn test_buffer_outlives_disposed_shader() {
    let runtime = host_runtime();
    let mut shader = ComputeShader::new(&runtime, INDEX_SUM).unwrap();
    let out = shader.create_buffer_from(&[5i32, 6, 7, 8]).unwrap();
    shader.dispose();

    assert_eq!(out.len(), 16);
    assert_eq!(out.capacity::<i32>(), 4);
    let mirrored = decode::<i32>(out.host_bytes(), 4).unwrap();
    assert_eq!(mirrored, vec![5, 6, 7, 8]);
}
