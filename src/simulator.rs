//! The simulator: owns every processor and task and drives the logical clock.
//!
//! One call to [`Simulator::advance_tick`] is one tick. Within it the stages
//! run in a fixed order: release check, parallel burden, processor work,
//! clock advance, task bookkeeping, then the release check for the next tick.
//! A scheduler makes its assignments between ticks, through
//! [`Simulator::assign_segment`].

#![forbid(unsafe_code)]
#![warn(missing_docs)]

use crate::affinity::Affinity;
use crate::builder::{DagSpec, PipelineSpec};
use crate::error::{SimError, SimResult};
use crate::invariant::{assert_invariant, CLOCK_MONOTONIC};
use crate::noise::{NoiseSource, SeededNoise};
use crate::processor::{Processor, ProcessorId, ProcessorSnapshot, ProcessorState};
use crate::scheduler::Scheduler;
use crate::segment::{SegmentId, SegmentSnapshot};
use crate::task::{SchedulePolicyTag, Task, TaskId, TaskSnapshot};
use log::{debug, info, trace, warn};
use std::fmt;

/// Simulation parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serialize", derive(serde::Serialize, serde::Deserialize))]
pub struct SimConfig {
    /// The simulation is complete once the clock reaches this tick.
    pub time_bound: u64,
    /// Seed for execution-time variation.
    pub seed: u64,
}

impl Default for SimConfig {
    fn default() -> Self {
        Self {
            time_bound: 65536,
            seed: 0,
        }
    }
}

/// A processor-level failure during one tick. Never aborts the tick.
#[derive(Debug, Clone, PartialEq)]
pub struct Fault {
    /// Tick during which the fault occurred.
    pub tick: u64,
    /// Processor that failed to work.
    pub processor: ProcessorId,
    /// What went wrong.
    pub error: SimError,
}

/// Outcome of [`Simulator::run`].
#[derive(Debug, Clone, PartialEq)]
pub struct RunSummary {
    /// Ticks advanced by this run.
    pub ticks: u64,
    /// Work done during this run.
    pub total_work: f64,
    /// Whether the run stopped on a deadline miss.
    pub deadline_missed: bool,
    /// Every processor fault, in tick order.
    pub faults: Vec<Fault>,
    /// `(task, tick)` of every release refused because the previous
    /// instance was unfinished.
    pub rejected_releases: Vec<(TaskId, u64)>,
}

/// Owns processors and tasks and advances the clock.
pub struct Simulator {
    config: SimConfig,
    processors: Vec<Processor>,
    /// `(affinity, first index, count)` per contiguous type group.
    groups: Vec<(Affinity, usize, usize)>,
    sorted: bool,
    /// Speedup-deduction factor per affinity code.
    parallel_factors: [f64; Affinity::COUNT],
    tasks: Vec<Task>,
    now: u64,
    deadline_missed: bool,
    total_executed: f64,
    release_checked: bool,
    noise: Box<dyn NoiseSource>,
    custom_noise: bool,
    faults: Vec<Fault>,
    /// Rejection from the trailing release check, reported by the next tick.
    pending_rejection: Option<SimError>,
}

impl Simulator {
    /// Simulator with the default configuration.
    pub fn new() -> Self {
        Self::with_config(SimConfig::default())
    }

    /// Simulator with an explicit configuration.
    pub fn with_config(config: SimConfig) -> Self {
        Self {
            config,
            processors: Vec::new(),
            groups: Vec::new(),
            sorted: true,
            parallel_factors: [0.0; Affinity::COUNT],
            tasks: Vec::new(),
            now: 0,
            deadline_missed: false,
            total_executed: 0.0,
            release_checked: false,
            noise: Box::new(SeededNoise::new(config.seed)),
            custom_noise: false,
            faults: Vec::new(),
            pending_rejection: None,
        }
    }

    /// Current configuration.
    pub fn config(&self) -> SimConfig {
        self.config
    }

    /// Replace the source of execution-time noise. Survives [`Simulator::reset`].
    pub fn set_noise_source(&mut self, noise: Box<dyn NoiseSource>) {
        self.noise = noise;
        self.custom_noise = true;
    }

    // ── Processors ──────────────────────────────────────────────

    /// Append `count` processors of one type. Invalidates the type grouping.
    pub fn create_processors(&mut self, affinity: Affinity, count: usize) -> Vec<ProcessorId> {
        let factor = self.parallel_factors[affinity.code() as usize];
        let mut local = self
            .processors
            .iter()
            .filter(|p| p.affinity() == affinity)
            .count();
        let mut ids = Vec::with_capacity(count);
        for _ in 0..count {
            let id = ProcessorId(self.processors.len());
            let mut processor = Processor::new(affinity, id, local);
            processor.set_speedup_factor(factor);
            self.processors.push(processor);
            ids.push(id);
            local += 1;
        }
        if count > 0 {
            self.sorted = false;
        }
        ids
    }

    /// Group processors by type and renumber them.
    ///
    /// Global indices change; ids obtained before the sort must not be reused.
    pub fn sort_processors(&mut self) {
        self.processors.sort_by_key(Processor::affinity);
        self.groups.clear();
        let mut start = 0;
        while start < self.processors.len() {
            let affinity = self.processors[start].affinity();
            let count = self.processors[start..]
                .iter()
                .take_while(|p| p.affinity() == affinity)
                .count();
            for local in 0..count {
                let index = start + local;
                self.processors[index].reindex(ProcessorId(index), local);
                if let Some((task, seg)) = self.processors[index].binding() {
                    if let Some(Ok(segment)) = self.tasks.get_mut(task.0).map(|t| t.segment_mut(seg)) {
                        segment.assign(ProcessorId(index));
                    }
                }
            }
            self.groups.push((affinity, start, count));
            start += count;
        }
        self.sorted = true;
    }

    /// Type groups as `(affinity, count)`, in processor order.
    pub fn type_counts(&self) -> Vec<(Affinity, usize)> {
        self.groups.iter().map(|&(a, _, n)| (a, n)).collect()
    }

    /// Set the execution-time variation, in percent, of one processor.
    pub fn set_processor_variation(&mut self, id: ProcessorId, percent: f64) -> SimResult<()> {
        self.processor_mut(id)?.set_variation(percent)
    }

    /// Set the per-peer slowdown, in percent, for every processor of a type.
    pub fn set_processor_parallel_factor(&mut self, affinity: Affinity, factor: f64) -> SimResult<()> {
        if !factor.is_finite() || factor < 0.0 {
            return Err(SimError::InvalidParameter(format!(
                "parallel factor {} must be a non-negative number",
                factor
            )));
        }
        self.parallel_factors[affinity.code() as usize] = factor;
        for processor in self.processors.iter_mut().filter(|p| p.affinity() == affinity) {
            processor.set_speedup_factor(factor);
        }
        Ok(())
    }

    /// Mark a processor as failed. Its segment, if any, becomes unassigned.
    pub fn fail_processor(&mut self, id: ProcessorId) -> SimResult<()> {
        let processor = self
            .processors
            .get_mut(id.0)
            .ok_or(SimError::UnknownProcessor(id))?;
        processor.kill(&mut self.tasks);
        warn!("tick {}: {} marked dead", self.now, id);
        Ok(())
    }

    fn processor_mut(&mut self, id: ProcessorId) -> SimResult<&mut Processor> {
        self.processors
            .get_mut(id.0)
            .ok_or(SimError::UnknownProcessor(id))
    }

    // ── Tasks ───────────────────────────────────────────────────

    /// Create an empty task.
    pub fn create_task(&mut self) -> TaskId {
        let id = TaskId(self.tasks.len());
        self.tasks.push(Task::new(id));
        id
    }

    /// Create a task from a validated precedence graph.
    pub fn create_dag_task(&mut self, spec: &DagSpec) -> SimResult<TaskId> {
        let task = spec.build(TaskId(self.tasks.len()))?;
        Ok(self.push_task(task))
    }

    /// Create a linear chain task.
    pub fn create_pipeline_task(&mut self, spec: &PipelineSpec) -> SimResult<TaskId> {
        let task = spec.build(TaskId(self.tasks.len()))?;
        Ok(self.push_task(task))
    }

    fn push_task(&mut self, task: Task) -> TaskId {
        let id = task.id();
        debug!("created {} with {} segments", id, task.segment_count());
        self.tasks.push(task);
        id
    }

    fn task_mut(&mut self, id: TaskId) -> SimResult<&mut Task> {
        self.tasks.get_mut(id.0).ok_or(SimError::UnknownTask(id))
    }

    /// Append a segment to `task`. The length must be finite and non-negative.
    pub fn add_segment(&mut self, task: TaskId, affinity: Affinity, length: f64) -> SimResult<SegmentId> {
        if !length.is_finite() || length < 0.0 {
            return Err(SimError::InvalidParameter(format!(
                "segment length {} is not a non-negative number",
                length
            )));
        }
        Ok(self.task_mut(task)?.add_segment(affinity, length))
    }

    /// Make `downstream` wait for `upstream` within `task`.
    pub fn set_dependency(&mut self, task: TaskId, upstream: SegmentId, downstream: SegmentId) -> SimResult<()> {
        self.task_mut(task)?.set_dependency(upstream, downstream)
    }

    /// Sets the period and the relative deadline.
    pub fn set_task_period(&mut self, task: TaskId, period: u64) -> SimResult<()> {
        self.task_mut(task)?.set_period(period);
        Ok(())
    }

    /// Override the relative deadline of `task`.
    pub fn set_task_deadline(&mut self, task: TaskId, relative: u64) -> SimResult<()> {
        self.task_mut(task)?.set_relative_deadline(relative);
        Ok(())
    }

    /// Fixed priority of `task`; lower is more urgent.
    pub fn set_task_priority(&mut self, task: TaskId, priority: u8) -> SimResult<()> {
        self.task_mut(task)?.set_priority(priority);
        Ok(())
    }

    /// Scheduling class tag of `task`.
    pub fn set_task_policy(&mut self, task: TaskId, policy: SchedulePolicyTag) -> SimResult<()> {
        self.task_mut(task)?.set_policy(policy);
        Ok(())
    }

    /// Move the completion bound.
    pub fn set_simulation_bound(&mut self, tick: u64) {
        self.config.time_bound = tick;
    }

    // ── Scheduling surface ──────────────────────────────────────

    /// Bind a segment to a processor at the current tick.
    pub fn assign_segment(&mut self, processor: ProcessorId, task: TaskId, seg: SegmentId) -> SimResult<()> {
        let now = self.now;
        let processor = self
            .processors
            .get_mut(processor.0)
            .ok_or(SimError::UnknownProcessor(processor))?;
        processor.assign(&mut self.tasks, task, seg, now)
    }

    /// First ready, unassigned segment of `task` that `affinity` can run.
    pub fn first_ready_segment(&mut self, task: TaskId, affinity: Affinity) -> SimResult<Option<SegmentId>> {
        Ok(self.task_mut(task)?.first_ready_segment(affinity))
    }

    // ── Time ────────────────────────────────────────────────────

    /// Release every task due at tick 0.
    pub fn start(&mut self) -> SimResult<()> {
        self.release_check()
    }

    /// Release every task whose period divides the current tick.
    ///
    /// Each task's boundary is handled once, whether its release succeeds or
    /// is rejected. A rejected task keeps its unfinished instance. The first
    /// rejection is returned after every other task has been released.
    fn release_check(&mut self) -> SimResult<()> {
        if self.release_checked {
            return Ok(());
        }
        let now = self.now;
        let mut first_err = None;
        for task in self
            .tasks
            .iter_mut()
            .filter(|t| t.period() > 0 && now % t.period() == 0 && t.last_boundary() != Some(now))
        {
            task.note_boundary(now);
            match task.release(now) {
                Ok(()) => debug!("tick {}: released {}", now, task.id()),
                Err(e) => {
                    first_err.get_or_insert(e);
                }
            }
        }
        self.release_checked = true;
        match first_err {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    /// Set every processor's burden to the number of Busy peers in its group.
    ///
    /// Dead processors run nothing and do not count as contention.
    fn refresh_burden(&mut self) {
        for &(_, start, count) in &self.groups {
            let group = &mut self.processors[start..start + count];
            let busy = group
                .iter()
                .filter(|p| {
                    matches!(
                        p.state(),
                        ProcessorState::BusyPreemptive | ProcessorState::BusyNonpreemptive
                    )
                })
                .count();
            for processor in group.iter_mut() {
                processor.set_burden(busy);
            }
        }
    }

    /// Advance the simulation by one tick and return the work done during it.
    ///
    /// Processor faults do not fail the tick; they are collected in
    /// [`Simulator::faults`]. A release rejected at the end of the previous
    /// tick is returned once as `ReleaseRejected`, without advancing; the
    /// following call carries on and the unfinished instance keeps running.
    pub fn advance_tick(&mut self) -> SimResult<f64> {
        if !self.sorted {
            return Err(SimError::ProcessorsUnsorted);
        }
        if let Some(e) = self.pending_rejection.take() {
            return Err(e);
        }
        self.release_check()?;
        self.refresh_burden();

        let before: f64 = self.tasks.iter().map(Task::executed_length).sum();
        let tick = self.now;
        self.faults.clear();
        for processor in &mut self.processors {
            if let Err(error) = processor.work(&mut self.tasks, tick, self.noise.as_mut()) {
                warn!("tick {}: {} fault: {}", tick, processor.id(), error);
                self.faults.push(Fault {
                    tick,
                    processor: processor.id(),
                    error,
                });
            }
        }

        self.now += 1;
        assert_invariant(
            CLOCK_MONOTONIC,
            self.now == tick + 1,
            "clock must advance by exactly one tick",
            Some("advance_tick"),
        );

        let mut after = 0.0;
        for task in &mut self.tasks {
            task.check_states();
            let already = task.has_missed();
            if task.check_missed_deadline(self.now) {
                if !already {
                    info!(
                        "tick {}: {} misses its deadline at {}",
                        self.now,
                        task.id(),
                        task.absolute_deadline()
                    );
                }
                self.deadline_missed = true;
            }
            after += task.executed_length();
        }
        let delta = (after - before).max(0.0);
        self.total_executed += delta;
        trace!("tick {}: work {}", tick, delta);

        self.release_checked = false;
        if let Err(e) = self.release_check() {
            warn!("tick {}: {}", self.now, e);
            self.pending_rejection = Some(e);
        }
        Ok(delta)
    }

    /// Schedule and advance until the bound is reached or a deadline is missed.
    pub fn run(&mut self, scheduler: &mut dyn Scheduler) -> SimResult<RunSummary> {
        self.start()?;
        let first_tick = self.now;
        let first_work = self.total_executed;
        let mut faults = Vec::new();
        let mut rejected_releases = Vec::new();
        while !self.is_complete() && !self.deadline_missed {
            scheduler.schedule(self);
            match self.advance_tick() {
                Ok(_) => faults.extend(self.faults.iter().cloned()),
                Err(SimError::ReleaseRejected { task, tick }) => rejected_releases.push((task, tick)),
                Err(e) => return Err(e),
            }
        }
        info!(
            "{} stopped at tick {} (missed: {})",
            scheduler.name(),
            self.now,
            self.deadline_missed
        );
        Ok(RunSummary {
            ticks: self.now - first_tick,
            total_work: self.total_executed - first_work,
            deadline_missed: self.deadline_missed,
            faults,
            rejected_releases,
        })
    }

    /// Back to tick 0: in-flight work is discarded, every processor is
    /// reset, and tasks due at tick 0 are released again.
    pub fn reset(&mut self) -> SimResult<()> {
        self.now = 0;
        for task in &mut self.tasks {
            task.abandon();
        }
        for processor in &mut self.processors {
            processor.reset();
        }
        self.deadline_missed = false;
        self.total_executed = 0.0;
        self.release_checked = false;
        self.pending_rejection = None;
        self.faults.clear();
        if !self.custom_noise {
            self.noise = Box::new(SeededNoise::new(self.config.seed));
        }
        self.release_check()
    }

    // ── Queries ─────────────────────────────────────────────────

    /// Current tick.
    pub fn now(&self) -> u64 {
        self.now
    }

    /// Completion bound.
    pub fn time_bound(&self) -> u64 {
        self.config.time_bound
    }

    /// True once the clock has reached the bound.
    pub fn is_complete(&self) -> bool {
        self.now >= self.config.time_bound
    }

    /// Sticky: true once any task has missed a deadline.
    pub fn deadline_missed(&self) -> bool {
        self.deadline_missed
    }

    /// Work done since tick 0.
    pub fn total_executed(&self) -> f64 {
        self.total_executed
    }

    /// Faults raised during the last tick.
    pub fn faults(&self) -> &[Fault] {
        &self.faults
    }

    /// All processors, in id order.
    pub fn processors(&self) -> &[Processor] {
        &self.processors
    }

    /// Processor `id`, or `UnknownProcessor`.
    pub fn processor(&self, id: ProcessorId) -> SimResult<&Processor> {
        self.processors.get(id.0).ok_or(SimError::UnknownProcessor(id))
    }

    /// Number of processors.
    pub fn processor_count(&self) -> usize {
        self.processors.len()
    }

    /// Current view of processor `id`.
    pub fn processor_snapshot(&self, id: ProcessorId) -> SimResult<ProcessorSnapshot> {
        self.processor(id).map(Processor::snapshot)
    }

    /// All tasks, in creation order.
    pub fn tasks(&self) -> &[Task] {
        &self.tasks
    }

    /// Task `id`, or `UnknownTask`.
    pub fn task(&self, id: TaskId) -> SimResult<&Task> {
        self.tasks.get(id.0).ok_or(SimError::UnknownTask(id))
    }

    /// Number of tasks.
    pub fn task_count(&self) -> usize {
        self.tasks.len()
    }

    /// Current view of task `id`.
    pub fn task_snapshot(&self, id: TaskId) -> SimResult<TaskSnapshot> {
        self.task(id).map(Task::snapshot)
    }

    /// Current view of one segment.
    pub fn segment_snapshot(&self, task: TaskId, seg: SegmentId) -> SimResult<SegmentSnapshot> {
        Ok(self.task(task)?.segment(seg)?.snapshot())
    }

    /// Work done on the current instance of `task`.
    pub fn executed_length(&self, task: TaskId) -> SimResult<f64> {
        self.task(task).map(Task::executed_length)
    }

    /// Sum of task utilizations.
    pub fn utilization(&self) -> f64 {
        self.tasks.iter().map(Task::utilization).sum()
    }
}

impl Default for Simulator {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Simulator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Simulator")
            .field("config", &self.config)
            .field("now", &self.now)
            .field("processors", &self.processors.len())
            .field("tasks", &self.tasks.len())
            .field("deadline_missed", &self.deadline_missed)
            .finish_non_exhaustive()
    }
}
