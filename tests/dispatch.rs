//! Dispatch, session and readback tests against the host driver

mod common;

use common::{ADD_INTO, INDEX_SUM, expected_index_sum, host_runtime};
use shader_dispatch::driver::status;
use shader_dispatch::prelude::*;

#[test]
fn test_session_ids_strictly_increase() {
    let runtime = host_runtime();
    let shader = ComputeShader::new(&runtime, INDEX_SUM).unwrap();
    let out = shader.create_buffer(64 * 4).unwrap();

    let ids: Vec<SessionId> = (0..10)
        .map(|_| shader.execute("index_sum", [4, 4, 4], &[Some(&out)]).unwrap())
        .collect();

    assert_eq!(ids.first(), Some(&SessionId(1)));
    assert!(ids.windows(2).all(|w| w[0] < w[1]));
    assert_eq!(shader.last_session(), Some(SessionId(10)));
    assert_eq!(shader.pending_events(), 10);
}

#[test]
fn test_sessions_are_per_instance() {
    let runtime = host_runtime();
    let first = ComputeShader::new(&runtime, INDEX_SUM).unwrap();
    let second = ComputeShader::new(&runtime, INDEX_SUM).unwrap();
    let out = first.create_buffer(4).unwrap();

    first.execute("index_sum", 1, &[Some(&out)]).unwrap();
    first.execute("index_sum", 1, &[Some(&out)]).unwrap();
    assert_eq!(
        second.execute("index_sum", 1, &[Some(&out)]).unwrap(),
        SessionId(1)
    );
}

#[test]
fn test_concurrent_dispatch_mints_unique_sessions() {
    let runtime = host_runtime();
    let shader = ComputeShader::new(&runtime, INDEX_SUM).unwrap();
    let out = shader.create_buffer(64 * 4).unwrap();

    let mut ids: Vec<u64> = std::thread::scope(|scope| {
        let handles: Vec<_> = (0..4)
            .map(|_| {
                scope.spawn(|| {
                    (0..25)
                        .map(|_| {
                            shader
                                .execute("index_sum", [4, 4, 4], &[Some(&out)])
                                .unwrap()
                                .get()
                        })
                        .collect::<Vec<_>>()
                })
            })
            .collect();
        handles
            .into_iter()
            .flat_map(|h| h.join().unwrap())
            .collect()
    });

    ids.sort_unstable();
    assert_eq!(ids, (1..=100).collect::<Vec<u64>>());
    shader.wait_all().unwrap();
}

#[test]
fn test_index_sum_readback() {
    let runtime = host_runtime();
    let shader = ComputeShader::new(&runtime, INDEX_SUM).unwrap();
    let mut out = shader.create_buffer(64 * 4).unwrap();

    let session = shader.execute("index_sum", [4, 4, 4], &[Some(&out)]).unwrap();
    shader.wait(session).unwrap();

    let values = shader.read_array::<i32>(&mut out, None).unwrap();
    assert_eq!(values.len(), 64);
    assert_eq!(values, expected_index_sum(4));
    assert_eq!(runtime.driver().stats().kernel_launches, 1);
}

#[test]
fn test_read_without_wait_is_ordered_after_dispatch() {
    let runtime = host_runtime();
    let shader = ComputeShader::new(&runtime, INDEX_SUM).unwrap();
    let mut out = shader.create_buffer(64 * 4).unwrap();

    shader.execute("index_sum", [4, 4, 4], &[Some(&out)]).unwrap();
    let values = shader.read_array::<i32>(&mut out, Some(8)).unwrap();
    assert_eq!(values, expected_index_sum(4)[..8].to_vec());
    assert_eq!(shader.read_scalar::<i32>(&mut out).unwrap(), 0);
}

#[test]
fn test_vector_readback() {
    let runtime = host_runtime();
    let shader = ComputeShader::new(&runtime, INDEX_SUM).unwrap();
    let mut out = shader.create_buffer(64 * 4).unwrap();

    let session = shader.execute("index_sum", [4, 4, 4], &[Some(&out)]).unwrap();
    shader.wait(session).unwrap();

    let rows = shader.read_array::<Int4>(&mut out, None).unwrap();
    assert_eq!(rows.len(), 16);
    assert_eq!(rows[0], Int4::new(0, 1, 2, 3));
    assert_eq!(rows[15], Int4::new(6, 7, 8, 9));
}

#[test]
fn test_offset_shifts_global_ids() {
    let runtime = host_runtime();
    let shader = ComputeShader::new(&runtime, INDEX_SUM).unwrap();
    let mut out = shader.create_buffer(4 * 4).unwrap();

    let range = NdRange::from([4, 1, 1]).with_offset([2, 0, 0]);
    let session = shader.execute("index_sum", range, &[Some(&out)]).unwrap();
    shader.wait(session).unwrap();

    assert_eq!(
        shader.read_array::<i32>(&mut out, None).unwrap(),
        vec![2, 3, 4, 5]
    );
}

#[test]
fn test_null_argument_leaves_hole() {
    let runtime = host_runtime();
    let shader = ComputeShader::new(&runtime, ADD_INTO).unwrap();
    let a = shader.create_buffer_from(&[1.0f32, 2.0, 3.0, 4.0]).unwrap();
    let b = shader.create_buffer_from(&[10.0f32, 20.0, 30.0, 40.0]).unwrap();

    let err = shader.execute("add_into", 4, &[Some(&a), None, Some(&b)]).unwrap_err();
    match err {
        ComputeError::ArgumentBinding {
            kernel,
            index,
            source,
        } => {
            assert_eq!(kernel, "add_into");
            assert_eq!(index, 1);
            assert_eq!(source.code, status::INVALID_KERNEL_ARGS);
        }
        other => panic!("expected argument binding failure, got {:?}", other),
    }
    assert_eq!(shader.last_session(), None);
    assert_eq!(shader.pending_events(), 0);
}

#[test]
fn test_missing_trailing_arguments_name_first_unset_slot() {
    let runtime = host_runtime();
    let shader = ComputeShader::new(&runtime, ADD_INTO).unwrap();
    let a = shader.create_buffer_from(&[1.0f32, 2.0, 3.0, 4.0]).unwrap();

    let err = shader.execute("add_into", 4, &[Some(&a)]).unwrap_err();
    assert!(matches!(
        err,
        ComputeError::ArgumentBinding { index: 1, ref source, .. }
            if source.code == status::INVALID_KERNEL_ARGS
    ));
    assert_eq!(shader.pending_events(), 0);
}

#[test]
fn test_holes_do_not_shift_positions() {
    let runtime = host_runtime();
    let shader = ComputeShader::new(&runtime, ADD_INTO).unwrap();
    let a = shader.create_buffer_from(&[1.0f32, 2.0, 3.0, 4.0]).unwrap();
    let b = shader.create_buffer_from(&[10.0f32, 20.0, 30.0, 40.0]).unwrap();
    let mut out = shader.create_buffer(4 * 4).unwrap();

    let session = shader
        .execute("add_into", 4, &[Some(&a), Some(&out), Some(&b)])
        .unwrap();
    shader.wait(session).unwrap();
    assert_eq!(
        shader.read_array::<f32>(&mut out, None).unwrap(),
        vec![11.0, 22.0, 33.0, 44.0]
    );

    // slot 1 keeps its earlier binding, slot 2 is rebound
    let c = shader.create_buffer_from(&[100.0f32; 4]).unwrap();
    let session = shader
        .execute("add_into", 4, &[Some(&a), None, Some(&c)])
        .unwrap();
    shader.wait(session).unwrap();
    assert_eq!(
        shader.read_array::<f32>(&mut out, None).unwrap(),
        vec![101.0, 102.0, 103.0, 104.0]
    );
}

#[test]
fn test_binding_past_last_parameter_names_index() {
    let runtime = host_runtime();
    let shader = ComputeShader::new(&runtime, INDEX_SUM).unwrap();
    let out = shader.create_buffer(4).unwrap();

    let err = shader
        .execute("index_sum", 1, &[Some(&out), Some(&out)])
        .unwrap_err();
    assert!(matches!(
        err,
        ComputeError::ArgumentBinding { index: 1, ref source, .. }
            if source.code == status::INVALID_ARG_INDEX
    ));
}

#[test]
fn test_rejected_enqueue_reports_driver_code() {
    let runtime = host_runtime();
    let shader = ComputeShader::new(&runtime, INDEX_SUM).unwrap();
    let out = shader.create_buffer(16).unwrap();

    let range = NdRange::from(4).with_local([3, 1, 1]);
    let err = shader.execute("index_sum", range, &[Some(&out)]).unwrap_err();
    assert!(matches!(
        err,
        ComputeError::Dispatch { code, .. } if code == status::INVALID_WORK_GROUP_SIZE
    ));
    assert!(err.to_string().contains(&status::INVALID_WORK_GROUP_SIZE.to_string()));
}

#[test]
fn test_unknown_kernel_fails_resolution() {
    let runtime = host_runtime();
    let shader = ComputeShader::new(&runtime, INDEX_SUM).unwrap();
    let out = shader.create_buffer(4).unwrap();

    let err = shader.execute("no_such_kernel", 1, &[Some(&out)]).unwrap_err();
    assert!(matches!(
        err,
        ComputeError::KernelResolution { ref name, .. } if name == "no_such_kernel"
    ));
    assert_eq!(shader.kernel_names(), vec!["index_sum"]);
}
