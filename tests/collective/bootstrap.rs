use super::helpers::{run_cluster, run_cluster_manual, MiniTracker, worker_config};
use arbor::Engine;
use std::collections::BTreeSet;

#[test]
fn test_init_assigns_distinct_ranks() {
    let seen = run_cluster(3, |engine| {
        assert_eq!(engine.world_size(), 3);
        assert_eq!(engine.version_number(), 0);
        engine.rank()
    });
    let ranks: BTreeSet<u32> = seen.into_iter().collect();
    assert_eq!(ranks, BTreeSet::from([0, 1, 2]));
}

#[test]
fn test_single_worker_cohort_through_tracker() {
    let tracker = MiniTracker::spawn(1);
    let engine = Engine::init(worker_config(tracker.port, 1, 0)).unwrap();
    assert_eq!(engine.rank(), 0);
    assert_eq!(engine.world_size(), 1);
    engine.shutdown().unwrap();
    tracker.join();
}

#[test]
fn test_tracker_print_reaches_coordinator() {
    let results = run_cluster_manual(2, |engine, _ctx| {
        if engine.rank() == 0 {
            engine.tracker_print("worker zero reporting").unwrap();
        }
        engine.shutdown().unwrap();
    });
    assert_eq!(results.len(), 2);
}

#[test]
fn test_tracker_print_is_recorded() {
    let tracker = MiniTracker::spawn(1);
    let engine = Engine::init(worker_config(tracker.port, 1, 0)).unwrap();
    engine.tracker_print("hello coordinator").unwrap();
    engine.shutdown().unwrap();
    let prints = tracker.prints.lock().unwrap().clone();
    tracker.join();
    assert_eq!(prints, vec!["hello coordinator".to_string()]);
}

#[test]
fn test_reinit_under_same_task_id_keeps_rank() {
    let tracker = MiniTracker::spawn_sessions(2, 2);
    let port = tracker.port;
    let mut handles = Vec::new();
    for task in 0..2usize {
        handles.push(std::thread::spawn(move || {
            let engine = Engine::init(worker_config(port, 2, task)).unwrap();
            let first_rank = engine.rank();
            engine.shutdown().unwrap();
            // a restarted process announces no rank; the coordinator maps
            // the task id back to the one it held
            let engine = Engine::init(worker_config(port, 2, task)).unwrap();
            assert_eq!(engine.rank(), first_rank);
            engine.shutdown().unwrap();
            first_rank
        }));
    }
    let ranks: BTreeSet<u32> = handles.into_iter().map(|h| h.join().unwrap()).collect();
    tracker.join();
    assert_eq!(ranks.len(), 2);
}
