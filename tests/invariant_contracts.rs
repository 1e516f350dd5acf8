//! Contract tests: a realistic run must exercise every internal invariant.
//!
//! Kept to a single test so no parallel test clears the shared log mid-run.

use hetsim::invariant::{
    clear_invariant_log, contract_test, ASSIGNMENT_EXCLUSIVE, BINDING_CONSISTENT, CLOCK_MONOTONIC,
    COMPLETION_CONSERVED, PRECEDENCE_RESPECTED, READY_IMPLIES_PENDING,
};
use hetsim::{Affinity, DagSpec, PriorityScheduler, SimConfig, Simulator};

#[test]
fn scheduling_run_exercises_all_invariants() {
    clear_invariant_log();

    let mut sim = Simulator::with_config(SimConfig {
        time_bound: 40,
        seed: 1,
    });
    sim.create_processors(Affinity::Cpu, 2);
    sim.create_processors(Affinity::Gpu, 1);
    sim.sort_processors();
    let diamond = DagSpec::new(
        20,
        vec![
            (Affinity::Cpu, 2.0),
            (Affinity::Gpu, 3.0),
            (Affinity::Cpu, 2.0),
            (Affinity::Cpu, 1.0),
        ],
        vec![(0, 1), (0, 2), (1, 3), (2, 3)],
    );
    sim.create_dag_task(&diamond).unwrap();

    let summary = sim.run(&mut PriorityScheduler::default()).unwrap();
    assert!(!summary.deadline_missed);

    contract_test(
        "scheduling_run",
        &[
            BINDING_CONSISTENT,
            ASSIGNMENT_EXCLUSIVE,
            PRECEDENCE_RESPECTED,
            COMPLETION_CONSERVED,
            READY_IMPLIES_PENDING,
            CLOCK_MONOTONIC,
        ],
    );
}
