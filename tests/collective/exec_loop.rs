use super::helpers::run_cluster;
use std::cell::Cell;

#[test]
fn test_approx_loop_4_workers() {
    let per_worker = 1000usize;
    let results = run_cluster(4, move |engine| {
        let done = Cell::new(0usize);
        let ratio = engine
            .try_exec_loop(|begin, end| done.set(done.get() + (end - begin)), per_worker, 0.9)
            .unwrap();
        (done.get(), ratio)
    });

    let total: usize = results.iter().map(|(done, _)| done).sum();
    assert!((3600..=4000).contains(&total), "cohort work {total} out of range");
    let finished = results.iter().filter(|(done, _)| *done == per_worker).count();
    assert!(finished >= 3, "only {finished} workers finished");
    for (done, ratio) in results {
        assert!((0.9..=1.0).contains(&ratio), "ratio {ratio} out of range");
        assert!(done <= per_worker);
    }
}

#[test]
fn test_approx_loop_full_ratio_runs_everything() {
    let results = run_cluster(3, |engine| {
        let done = Cell::new(0usize);
        let mut last_end = 0usize;
        let ratio = engine
            .try_exec_loop(
                |begin, end| {
                    // ranges arrive in order without gaps
                    assert_eq!(begin, done.get());
                    done.set(done.get() + (end - begin));
                    last_end = end;
                },
                500,
                1.0,
            )
            .unwrap();
        assert_eq!(last_end, 500);
        (done.get(), ratio)
    });
    for (done, ratio) in results {
        assert_eq!(done, 500);
        assert_eq!(ratio, 1.0);
    }
}

#[test]
fn test_approx_loop_single_node() {
    let mut engine = arbor::Engine::init(arbor::ArborConfig::default()).unwrap();
    let done = Cell::new(0usize);
    let ratio = engine
        .try_exec_loop(|begin, end| done.set(done.get() + (end - begin)), 100, 0.5)
        .unwrap();
    // a lone worker is always the majority straggler, so it runs to the end
    assert_eq!(done.get(), 100);
    assert_eq!(ratio, 1.0);
    engine.shutdown().unwrap();
}

#[test]
fn test_approx_loop_zero_iterations() {
    run_cluster(2, |engine| {
        let ratio = engine.try_exec_loop(|_, _| panic!("no work to run"), 0, 0.9).unwrap();
        assert_eq!(ratio, 1.0);
    });
}
