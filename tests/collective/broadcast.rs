use super::helpers::run_cluster;
use arbor::ArborError;

#[test]
fn test_broadcast_3_workers_from_root_1() {
    run_cluster(3, |engine| {
        let mut data = if engine.rank() == 1 {
            *b"hello"
        } else {
            [0u8; 5]
        };
        engine.broadcast(&mut data, 1).unwrap();
        assert_eq!(&data, b"hello", "rank {} missed the payload", engine.rank());
    });
}

#[test]
fn test_broadcast_from_root_0() {
    run_cluster(4, |engine| {
        let mut data: Vec<u8> = if engine.rank() == 0 {
            (0..=255).collect()
        } else {
            vec![0; 256]
        };
        engine.broadcast(&mut data, 0).unwrap();
        let expected: Vec<u8> = (0..=255).collect();
        assert_eq!(data, expected);
    });
}

#[test]
fn test_broadcast_is_idempotent() {
    run_cluster(3, |engine| {
        let mut data = if engine.rank() == 2 { *b"abcd" } else { [0u8; 4] };
        engine.broadcast(&mut data, 2).unwrap();
        // broadcasting the already-agreed buffer changes nothing
        engine.broadcast(&mut data, 2).unwrap();
        assert_eq!(&data, b"abcd");
    });
}

#[test]
fn test_broadcast_root_out_of_range() {
    run_cluster(2, |engine| {
        let mut data = [0u8; 4];
        let res = engine.try_broadcast(&mut data, 2);
        assert!(matches!(
            res,
            Err(ArborError::InvalidRoot {
                root: 2,
                world_size: 2
            })
        ));
    });
}

#[test]
fn test_broadcast_then_allreduce() {
    use arbor::ReduceOp;
    run_cluster(3, |engine| {
        let mut seed = if engine.rank() == 0 { [21i32] } else { [0i32] };
        let bytes = unsafe {
            std::slice::from_raw_parts_mut(seed.as_mut_ptr().cast::<u8>(), 4)
        };
        engine.broadcast(bytes, 0).unwrap();
        assert_eq!(seed, [21]);
        engine.allreduce(&mut seed, ReduceOp::Sum).unwrap();
        assert_eq!(seed, [63]);
    });
}
