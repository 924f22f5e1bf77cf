use super::helpers::{run_cluster, run_cluster_configured};
use arbor::ReduceOp;
use rand::{Rng, SeedableRng};

#[test]
fn test_allreduce_4_workers_sum() {
    run_cluster(4, |engine| {
        let rank = engine.rank() as i32;
        let mut data = [rank, rank + 1, rank + 2];
        engine.allreduce(&mut data, ReduceOp::Sum).unwrap();
        assert_eq!(data, [6, 10, 14], "rank {rank} got a wrong reduction");
    });
}

#[test]
fn test_allreduce_2_workers_min() {
    run_cluster(2, |engine| {
        let mut data = if engine.rank() == 0 {
            [5i32, 2, 9]
        } else {
            [3i32, 8, 1]
        };
        engine.allreduce(&mut data, ReduceOp::Min).unwrap();
        assert_eq!(data, [3, 2, 1]);
    });
}

#[test]
fn test_allreduce_identical_inputs_max_is_identity() {
    run_cluster(3, |engine| {
        let mut data = [4.0f64, -1.5, 0.25, 1e9];
        engine.allreduce(&mut data, ReduceOp::Max).unwrap();
        assert_eq!(data, [4.0, -1.5, 0.25, 1e9]);
    });
}

#[test]
fn test_allreduce_sum_scales_identical_inputs() {
    run_cluster(3, |engine| {
        let mut data = [3u64, 11, 400];
        engine.allreduce(&mut data, ReduceOp::Sum).unwrap();
        assert_eq!(data, [9, 33, 1200]);
    });
}

#[test]
fn test_allreduce_random_payload_sum() {
    const COUNT: usize = 512;
    run_cluster(3, |engine| {
        // every worker can regenerate every contribution from the seeds,
        // so the expected reduction is computable locally
        let contribution = |rank: u32| -> Vec<i64> {
            let mut rng = rand::rngs::StdRng::seed_from_u64(rank as u64);
            (0..COUNT).map(|_| rng.gen_range(-1000..1000)).collect()
        };
        let mut data = contribution(engine.rank());
        let mut expected = vec![0i64; COUNT];
        for rank in 0..engine.world_size() {
            for (e, v) in expected.iter_mut().zip(contribution(rank)) {
                *e += v;
            }
        }
        engine.allreduce(&mut data, ReduceOp::Sum).unwrap();
        assert_eq!(data, expected);
    });
}

#[test]
fn test_allreduce_small_reduce_buffer() {
    // ring buffers clamp to one whole payload when the target is smaller
    run_cluster_configured(
        3,
        |cfg| cfg.set_param("rabit_reduce_buffer", "1K").unwrap(),
        |engine| {
            let mut data = vec![1i64; 4096]; // 32 KiB payload >> 1 KiB target
            engine.allreduce(&mut data, ReduceOp::Sum).unwrap();
            assert_eq!(data, vec![3i64; 4096]);
        },
    );
}

#[test]
fn test_allreduce_custom_reducer() {
    // user-defined associative op through the raw byte interface: bitwise or
    run_cluster(3, |engine| {
        let rank = engine.rank();
        let mut data = [1u8 << rank, 0xF0];
        engine
            .try_allreduce(
                &mut data,
                1,
                2,
                |src, dst, nelem| {
                    for i in 0..nelem {
                        dst[i] |= src[i];
                    }
                },
                None,
            )
            .unwrap();
        assert_eq!(data, [0b111, 0xF0]);
    });
}

#[test]
fn test_second_collective_implies_first_completed_everywhere() {
    run_cluster(4, |engine| {
        let mut first = [engine.rank() as i32; 2];
        engine.allreduce(&mut first, ReduceOp::Sum).unwrap();
        // a successful collective K means every worker completed K-1, so
        // by the time this returns the whole cohort agreed on `first`
        let mut second = [1i32];
        engine.allreduce(&mut second, ReduceOp::Sum).unwrap();
        assert_eq!(first, [6, 6]);
        assert_eq!(second, [4]);
        assert_eq!(engine.version_number(), 2);
    });
}
