use hetsim::{
    Affinity, DagSpec, PriorityScheduler, Scheduler, SegmentId, SimConfig, SimError, Simulator,
    TaskState,
};
use proptest::prelude::*;

/// Random DAG: edges only point from lower to higher index, so it is acyclic.
fn dag_strategy() -> impl Strategy<Value = DagSpec> {
    (1usize..8).prop_flat_map(|n| {
        (
            prop::collection::vec((any::<bool>(), 1u8..5), n),
            prop::collection::vec((0..n, 0..n), 0..12),
            20u64..60,
        )
            .prop_map(move |(segs, raw_edges, period)| {
                let segments = segs
                    .into_iter()
                    .map(|(gpu, len)| {
                        let affinity = if gpu { Affinity::Gpu } else { Affinity::Cpu };
                        (affinity, len as f64)
                    })
                    .collect();
                let edges = raw_edges
                    .into_iter()
                    .filter(|(u, v)| u < v)
                    .collect();
                DagSpec::new(period, segments, edges)
            })
    })
}

fn build_sim(specs: &[DagSpec], seed: u64, variation: f64) -> Simulator {
    let mut sim = Simulator::with_config(SimConfig {
        time_bound: 120,
        seed,
    });
    sim.create_processors(Affinity::Gpu, 1);
    sim.create_processors(Affinity::Cpu, 2);
    sim.sort_processors();
    for i in 0..sim.processor_count() {
        sim.set_processor_variation(hetsim::ProcessorId(i), variation)
            .unwrap();
    }
    sim.set_processor_parallel_factor(Affinity::Cpu, 5.0).unwrap();
    for spec in specs {
        sim.create_dag_task(spec).unwrap();
    }
    sim
}

proptest! {
    #[test]
    fn readiness_follows_precedence(
        specs in prop::collection::vec(dag_strategy(), 1..4),
        seed in any::<u64>(),
        variation in 0.0f64..30.0,
    ) {
        let mut sim = build_sim(&specs, seed, variation);
        let mut sched = PriorityScheduler::default();
        sim.start().unwrap();

        // (release tick, ready flags) per task, to check monotonicity.
        let mut previous: Vec<(Option<u64>, Vec<bool>)> = Vec::new();
        while !sim.is_complete() {
            sched.schedule(&mut sim);
            match sim.advance_tick() {
                Ok(delta) => prop_assert!(delta >= 0.0),
                Err(SimError::ReleaseRejected { .. }) => continue,
                Err(e) => return Err(TestCaseError::fail(e.to_string())),
            }

            let mut current = Vec::new();
            for task in sim.tasks() {
                for (i, seg) in task.segments().iter().enumerate() {
                    let id = SegmentId(i);
                    if seg.is_marked_ready() || !seg.history().is_empty() {
                        for pred in task.predecessors(id) {
                            prop_assert!(task.segment(*pred).unwrap().is_completed());
                        }
                    }
                    prop_assert!(!(seg.is_completed() && seg.is_marked_ready()));
                }

                prop_assert!(task.executed_length() <= task.total_work() + 1e-9);
                if task.state() == TaskState::Finished {
                    prop_assert!((task.executed_length() - task.total_work()).abs() < 1e-9);
                }

                let flags: Vec<bool> = task.segments().iter().map(|s| s.is_marked_ready()).collect();
                current.push((task.released_at(), flags));
            }

            for (task, (before, now)) in sim.tasks().iter().zip(previous.iter().zip(&current)) {
                if before.0 != now.0 {
                    continue;
                }
                for (i, (&was, &is)) in before.1.iter().zip(&now.1).enumerate() {
                    if was && !is {
                        prop_assert!(task.segments()[i].is_completed());
                    }
                }
            }
            previous = current;
        }
    }

    #[test]
    fn same_seed_same_trajectory(
        spec in dag_strategy(),
        seed in any::<u64>(),
    ) {
        let trace = |seed: u64| {
            let mut sim = build_sim(std::slice::from_ref(&spec), seed, 25.0);
            let mut sched = PriorityScheduler::default();
            let mut deltas = Vec::new();
            let _ = sim.start();
            while !sim.is_complete() {
                sched.schedule(&mut sim);
                match sim.advance_tick() {
                    Ok(d) => deltas.push(d),
                    Err(_) => break,
                }
            }
            deltas
        };
        prop_assert_eq!(trace(seed), trace(seed));
    }

    #[test]
    fn back_edges_are_rejected(
        spec in dag_strategy(),
    ) {
        prop_assume!(!spec.edges.is_empty());
        let mut cyclic = spec.clone();
        let (u, v) = spec.edges[0];
        cyclic.edges.push((v, u));
        let is_cycle = matches!(cyclic.validate(), Err(SimError::CycleDetected { .. }));
        prop_assert!(is_cycle);
        let mut sim = Simulator::new();
        prop_assert!(sim.create_dag_task(&cyclic).is_err());
        prop_assert_eq!(sim.task_count(), 0);
    }
}
