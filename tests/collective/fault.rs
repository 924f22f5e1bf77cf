//! Fault injection: collectives must fail with a classified error when a
//! peer disappears mid-stream, and the mesh must come back via recover.

use super::helpers::{run_cluster_manual, worker_config};
use arbor::{ArborError, Engine, FaultKind, ReduceOp};
use std::time::Duration;

#[test]
fn test_peer_death_faults_allreduce() {
    let results = run_cluster_manual(3, |mut engine, _ctx| {
        if engine.rank() == 2 {
            // abandon the cohort before contributing anything
            std::thread::sleep(Duration::from_millis(50));
            engine.shutdown().unwrap();
            return None;
        }
        let mut data = [1u8; 64];
        let res = engine.try_allreduce(
            &mut data,
            1,
            64,
            |src, dst, nelem| {
                for i in 0..nelem {
                    dst[i] = dst[i].wrapping_add(src[i]);
                }
            },
            None,
        );
        // the survivor's own shutdown below is what unblocks the other
        // survivor, mirroring a cascading abort
        let fault = match res {
            Err(ArborError::Fault(fault)) => fault,
            other => panic!("expected a link fault, got {other:?}"),
        };
        assert!(matches!(
            fault.kind,
            FaultKind::SockError | FaultKind::GetExcept
        ));
        engine.shutdown().unwrap();
        Some(fault.kind)
    });
    // no worker saw a successful collective
    assert_eq!(results.iter().flatten().count(), 2);
}

#[test]
fn test_recover_roundtrip_is_a_noop_on_live_links() {
    run_cluster_manual(2, |mut engine, _ctx| {
        let mut data = [engine.rank() as i32 + 1; 4];
        engine.allreduce(&mut data, ReduceOp::Sum).unwrap();
        assert_eq!(data, [3; 4]);
        // rebuilding with every link healthy dials and accepts nothing
        engine.recover().unwrap();
        let mut again = [2i32; 4];
        engine.allreduce(&mut again, ReduceOp::Sum).unwrap();
        assert_eq!(again, [4; 4]);
        engine.shutdown().unwrap();
    });
}

#[test]
fn test_restarted_worker_rejoins_and_allreduce_retries() {
    run_cluster_manual(2, |mut engine, ctx| {
        let rank = engine.rank();
        let mut warmup = [1u32; 2];
        engine.allreduce(&mut warmup, ReduceOp::Sum).unwrap();
        assert_eq!(warmup, [2; 2]);

        if rank == 1 {
            // crash: drop the engine without telling anyone, then come back
            // under the same task id to reclaim rank 1
            drop(engine);
            std::thread::sleep(Duration::from_millis(100));
            engine = Engine::init(worker_config(ctx.tracker_port, ctx.world, ctx.task)).unwrap();
            assert_eq!(engine.rank(), 1);
        } else {
            // give the peer time to die so the first attempt faults
            std::thread::sleep(Duration::from_millis(50));
        }

        // the blocking wrapper rides out the fault: rebuild, restore, retry
        let mut data = [10u32 * (engine.rank() + 1); 3];
        engine.allreduce(&mut data, ReduceOp::Sum).unwrap();
        assert_eq!(data, [30; 3]);
        engine.shutdown().unwrap();
    });
}
