//! Scheduling policies.
//!
//! A scheduler observes the simulator between ticks and binds ready segments
//! to processors through [`Simulator::assign_segment`]. It never advances
//! time itself.

#![forbid(unsafe_code)]

use crate::affinity::Affinity;
use crate::processor::ProcessorId;
use crate::simulator::Simulator;
use crate::task::{Task, TaskId};
use log::debug;
use std::cmp::Ordering;

/// A pluggable scheduling decision, made once per tick.
pub trait Scheduler {
    /// Short name used in logs.
    fn name(&self) -> &str;

    /// Make this tick's assignments. Returns how many succeeded.
    fn schedule(&mut self, sim: &mut Simulator) -> usize;
}

/// How tasks are ranked against each other.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serialize", derive(serde::Serialize, serde::Deserialize))]
pub enum Policy {
    /// Higher numeric priority first (`SCHED_FIFO`).
    #[default]
    FixedPriority,
    /// Shorter period first.
    RateMonotonic,
    /// Earlier absolute deadline first.
    EarliestDeadlineFirst,
}

impl Policy {
    /// `Less` when `a` should run before `b`. Ties compare equal so a
    /// stable sort keeps creation order.
    pub fn compare(self, a: &Task, b: &Task) -> Ordering {
        match self {
            Policy::FixedPriority => b.priority().cmp(&a.priority()),
            Policy::RateMonotonic => period_key(a).cmp(&period_key(b)),
            Policy::EarliestDeadlineFirst => a.absolute_deadline().cmp(&b.absolute_deadline()),
        }
    }

    /// Strictly higher rank; equal rank never preempts.
    pub fn outranks(self, a: &Task, b: &Task) -> bool {
        self.compare(a, b) == Ordering::Less
    }
}

/// Aperiodic tasks rank last under rate-monotonic ordering.
fn period_key(task: &Task) -> u64 {
    match task.period() {
        0 => u64::MAX,
        p => p,
    }
}

/// Two-pass priority scheduler.
///
/// Idle processors are filled first; only then may a busy preemptive
/// processor switch to a strictly higher-ranked task.
#[derive(Debug, Clone, Default)]
pub struct PriorityScheduler {
    policy: Policy,
}

impl PriorityScheduler {
    /// Scheduler ranking tasks by `policy`.
    pub fn new(policy: Policy) -> Self {
        Self { policy }
    }

    /// Ranking in use.
    pub fn policy(&self) -> Policy {
        self.policy
    }

    /// Task ids in rank order.
    pub fn rank(&self, sim: &Simulator) -> Vec<TaskId> {
        let tasks = sim.tasks();
        let mut order: Vec<TaskId> = tasks.iter().map(Task::id).collect();
        order.sort_by(|a, b| self.policy.compare(&tasks[a.0], &tasks[b.0]));
        order
    }

    /// Try the first task in `order` with a ready segment for `affinity`.
    fn place(sim: &mut Simulator, processor: ProcessorId, affinity: Affinity, order: &[TaskId]) -> bool {
        for &task in order {
            let Ok(Some(seg)) = sim.first_ready_segment(task, affinity) else {
                continue;
            };
            return match sim.assign_segment(processor, task, seg) {
                Ok(()) => true,
                Err(e) => {
                    debug!("{} rejected {}/{}: {}", processor, task, seg, e);
                    false
                }
            };
        }
        false
    }
}

impl Scheduler for PriorityScheduler {
    fn name(&self) -> &str {
        match self.policy {
            Policy::FixedPriority => "fifo",
            Policy::RateMonotonic => "rate-monotonic",
            Policy::EarliestDeadlineFirst => "edf",
        }
    }

    fn schedule(&mut self, sim: &mut Simulator) -> usize {
        let order = self.rank(sim);
        let mut assigned = 0;

        let idle: Vec<(ProcessorId, Affinity)> = sim
            .processors()
            .iter()
            .filter(|p| p.is_idle())
            .map(|p| (p.id(), p.affinity()))
            .collect();
        for (processor, affinity) in idle {
            if Self::place(sim, processor, affinity, &order) {
                assigned += 1;
            }
        }

        let busy: Vec<(ProcessorId, Affinity, TaskId)> = sim
            .processors()
            .iter()
            .filter(|p| p.is_preemptable())
            .filter_map(|p| p.binding().map(|(t, _)| (p.id(), p.affinity(), t)))
            .collect();
        for (processor, affinity, current) in busy {
            let tasks = sim.tasks();
            let Some(running) = tasks.get(current.0) else {
                continue;
            };
            let candidates: Vec<TaskId> = order
                .iter()
                .copied()
                .filter(|t| self.policy.outranks(&tasks[t.0], running))
                .collect();
            if Self::place(sim, processor, affinity, &candidates) {
                assigned += 1;
            }
        }
        assigned
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::noise::Silent;
    use crate::segment::SegmentId;

    fn two_cpu_tasks(priorities: [u8; 2], periods: [u64; 2]) -> Simulator {
        let mut sim = Simulator::new();
        sim.set_noise_source(Box::new(Silent));
        sim.create_processors(Affinity::Cpu, 1);
        sim.sort_processors();
        for i in 0..2 {
            let t = sim.create_task();
            sim.add_segment(t, Affinity::Cpu, 3.0).unwrap();
            sim.set_task_period(t, periods[i]).unwrap();
            sim.set_task_priority(t, priorities[i]).unwrap();
        }
        sim.start().unwrap();
        sim
    }

    #[test]
    fn fixed_priority_picks_highest() {
        let mut sim = two_cpu_tasks([10, 50], [20, 20]);
        let mut sched = PriorityScheduler::new(Policy::FixedPriority);
        assert_eq!(sched.schedule(&mut sim), 1);
        assert_eq!(
            sim.processors()[0].binding(),
            Some((TaskId(1), SegmentId(0)))
        );
    }

    #[test]
    fn ties_keep_creation_order() {
        let sim = two_cpu_tasks([7, 7], [20, 20]);
        let sched = PriorityScheduler::default();
        assert_eq!(sched.rank(&sim), vec![TaskId(0), TaskId(1)]);
    }

    #[test]
    fn rate_monotonic_prefers_short_period() {
        let mut sim = two_cpu_tasks([99, 1], [40, 10]);
        let mut sched = PriorityScheduler::new(Policy::RateMonotonic);
        sched.schedule(&mut sim);
        assert_eq!(sim.processors()[0].binding().map(|b| b.0), Some(TaskId(1)));
    }

    #[test]
    fn equal_rank_does_not_preempt() {
        let mut sim = two_cpu_tasks([5, 5], [20, 20]);
        let mut sched = PriorityScheduler::default();
        sched.schedule(&mut sim);
        assert_eq!(sched.schedule(&mut sim), 0);
        assert_eq!(sim.processors()[0].binding().map(|b| b.0), Some(TaskId(0)));
    }

    #[test]
    fn higher_priority_preempts_running_task() {
        let mut sim = two_cpu_tasks([5, 9], [20, 20]);
        sim.assign_segment(ProcessorId(0), TaskId(0), SegmentId(0))
            .unwrap();
        let mut sched = PriorityScheduler::default();
        assert_eq!(sched.schedule(&mut sim), 1);
        assert_eq!(sim.processors()[0].binding().map(|b| b.0), Some(TaskId(1)));
        let victim = sim.segment_snapshot(TaskId(0), SegmentId(0)).unwrap();
        assert_eq!(victim.processor, None);
    }

    #[test]
    fn names() {
        assert_eq!(PriorityScheduler::default().name(), "fifo");
        assert_eq!(
            PriorityScheduler::new(Policy::EarliestDeadlineFirst).name(),
            "edf"
        );
    }
}
