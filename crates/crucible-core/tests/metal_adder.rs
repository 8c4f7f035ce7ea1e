//! End-to-end GPU test: runs a real adder kernel on the system Metal device.
#![cfg(target_vendor = "apple")]

use crucible_core::{DispatchRequest, Session};

const ADDER: &str = r#"
    #include <metal_stdlib>
    using namespace metal;

    kernel void adder(device int *a [[buffer(0)]],
                      device int *b [[buffer(1)]],
                      device int *out [[buffer(2)]],
                      uint id [[thread_position_in_grid]]) {
        out[id] = a[id] + b[id];
    }
"#;

#[test]
fn adder_end_to_end() {
    let n = 4096usize;
    let bytes = n * std::mem::size_of::<i32>();

    let mut session = Session::new().unwrap();
    session.compile_source(ADDER).unwrap();
    session.select_function("adder").unwrap();

    let limits = session.limits().unwrap();
    assert!(limits.max_threads_per_group > 0);
    assert!(limits.execution_width > 0);

    let a = session.allocate_buffer(bytes).unwrap();
    let b = session.allocate_buffer(bytes).unwrap();
    let out = session.allocate_buffer(bytes).unwrap();

    let lhs: Vec<i32> = (0..n as i32).collect();
    let rhs: Vec<i32> = vec![2; n];
    session.write_buffer(a, 0, bytemuck::cast_slice(&lhs)).unwrap();
    session.write_buffer(b, 0, bytemuck::cast_slice(&rhs)).unwrap();

    session
        .dispatch(&DispatchRequest::linear(n as u32).bind(a).bind(b).bind(out))
        .unwrap();

    let mut result = vec![0i32; n];
    session
        .read_buffer(out, 0, bytemuck::cast_slice_mut(&mut result))
        .unwrap();

    for (i, value) in result.iter().enumerate() {
        assert_eq!(*value, i as i32 + 2, "mismatch at {i}");
    }

    session.release_buffer(a).unwrap();
    session.release_buffer(b).unwrap();
    session.release_buffer(out).unwrap();
}

#[test]
fn pointer_writes_feed_the_gpu() {
    let n = 256usize;
    let bytes = n * std::mem::size_of::<i32>();

    let mut session = Session::new().unwrap();
    session.compile_source(ADDER).unwrap();
    session.select_function("adder").unwrap();

    let a = session.allocate_buffer(bytes).unwrap();
    let b = session.allocate_buffer(bytes).unwrap();
    let out = session.allocate_buffer(bytes).unwrap();

    // Populate inputs through the borrowed pointers, the way a binding
    // layer maps buffers into foreign arrays.
    unsafe {
        let pa = session.buffer_ptr(a).unwrap().as_ptr().cast::<i32>();
        let pb = session.buffer_ptr(b).unwrap().as_ptr().cast::<i32>();
        for i in 0..n {
            *pa.add(i) = i as i32;
            *pb.add(i) = 10;
        }
    }

    session
        .dispatch(&DispatchRequest::linear(n as u32).bind(a).bind(b).bind(out))
        .unwrap();

    unsafe {
        let pout = session.buffer_ptr(out).unwrap().as_ptr().cast::<i32>();
        for i in 0..n {
            assert_eq!(*pout.add(i), i as i32 + 10);
        }
    }
}

#[test]
fn function_not_found_reports_diagnostic_state() {
    let mut session = Session::new().unwrap();
    session.compile_source(ADDER).unwrap();

    assert!(session.select_function("no_such_kernel").is_err());
    assert_eq!(session.max_threads_per_group(), None);
}
