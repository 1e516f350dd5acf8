//! Processors: execute at most one segment at a time.
//!
//! A processor does not own the work it runs. Its binding is a
//! `(TaskId, SegmentId)` pair resolved against the simulator's task list,
//! which is passed in to every operation that touches a segment.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

use crate::affinity::{Affinity, Preemption};
use crate::error::{SimError, SimResult};
use crate::invariant::{assert_invariant, ASSIGNMENT_EXCLUSIVE, BINDING_CONSISTENT};
use crate::noise::NoiseSource;
use crate::segment::SegmentId;
use crate::task::{Task, TaskId};
use log::debug;
use std::fmt;

/// Global index of a processor. Only stable between calls to
/// [`crate::Simulator::sort_processors`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serialize", derive(serde::Serialize, serde::Deserialize))]
pub struct ProcessorId(pub usize);

impl fmt::Display for ProcessorId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "P{}", self.0)
    }
}

/// Execution state of a processor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serialize", derive(serde::Serialize, serde::Deserialize))]
pub enum ProcessorState {
    /// Bound to nothing.
    Idle,
    /// Running a segment that a higher-ranked one may displace.
    BusyPreemptive,
    /// Running a segment until it completes.
    BusyNonpreemptive,
    /// Failed; accepts no work until the simulator is reset.
    Dead,
}

/// Read-only view of a processor.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serialize", derive(serde::Serialize, serde::Deserialize))]
pub struct ProcessorSnapshot {
    /// Processor type.
    pub affinity: Affinity,
    /// Execution state.
    pub state: ProcessorState,
    /// Segment being run, if any.
    pub binding: Option<(TaskId, SegmentId)>,
}

/// One processing element of a given type.
#[derive(Debug, Clone)]
pub struct Processor {
    affinity: Affinity,
    preemption: Preemption,
    state: ProcessorState,
    id: ProcessorId,
    local_index: usize,
    binding: Option<(TaskId, SegmentId)>,
    /// Execution-time variation in percent.
    variation: f64,
    /// Busy processors of this type, refreshed every tick.
    burden: usize,
    /// Percent of throughput lost per additional busy peer.
    speedup_factor: f64,
}

impl Processor {
    /// Idle processor whose preemption mode follows its type.
    pub fn new(affinity: Affinity, id: ProcessorId, local_index: usize) -> Self {
        Self {
            affinity,
            preemption: affinity.preemption(),
            state: ProcessorState::Idle,
            id,
            local_index,
            binding: None,
            variation: 0.0,
            burden: 0,
            speedup_factor: 0.0,
        }
    }

    /// Global index.
    pub fn id(&self) -> ProcessorId {
        self.id
    }

    /// Processor type.
    pub fn affinity(&self) -> Affinity {
        self.affinity
    }

    /// Whether running work may be displaced.
    pub fn preemption(&self) -> Preemption {
        self.preemption
    }

    /// Execution state.
    pub fn state(&self) -> ProcessorState {
        self.state
    }

    /// Bound to nothing and not dead.
    pub fn is_idle(&self) -> bool {
        self.state == ProcessorState::Idle
    }

    /// Busy on a segment that may be preempted.
    pub fn is_preemptable(&self) -> bool {
        self.state == ProcessorState::BusyPreemptive
    }

    /// Index within its type group.
    pub fn local_index(&self) -> usize {
        self.local_index
    }

    /// Segment being run, if any.
    pub fn binding(&self) -> Option<(TaskId, SegmentId)> {
        self.binding
    }

    /// Execution-time variation in percent.
    pub fn variation(&self) -> f64 {
        self.variation
    }

    /// Busy processors of this type as of the last tick.
    pub fn burden(&self) -> usize {
        self.burden
    }

    /// Percent of throughput lost per additional busy peer.
    pub fn speedup_factor(&self) -> f64 {
        self.speedup_factor
    }

    /// Set the execution-time variation, in percent.
    pub fn set_variation(&mut self, percent: f64) -> SimResult<()> {
        if !(0.0..=100.0).contains(&percent) {
            return Err(SimError::InvalidParameter(format!(
                "variation {} is outside 0..=100",
                percent
            )));
        }
        self.variation = percent;
        Ok(())
    }

    pub(crate) fn set_speedup_factor(&mut self, factor: f64) {
        self.speedup_factor = factor;
    }

    pub(crate) fn set_burden(&mut self, burden: usize) {
        self.burden = burden;
    }

    pub(crate) fn reindex(&mut self, id: ProcessorId, local_index: usize) {
        self.id = id;
        self.local_index = local_index;
    }

    /// Contention discount in percent applied to this tick's work.
    pub fn parallel_discount(&self) -> f64 {
        self.burden.saturating_sub(1) as f64 * self.speedup_factor
    }

    /// Bind segment `seg` of `task` to this processor.
    ///
    /// Fails on affinity mismatch, unready segments, segments held by another
    /// processor, and busy non-preemptive processors. A preemptive processor
    /// busy with other work drops it: the displaced task returns to Ready and
    /// its segment becomes unassigned.
    pub fn assign(
        &mut self,
        tasks: &mut [Task],
        task: TaskId,
        seg: SegmentId,
        tick: u64,
    ) -> SimResult<()> {
        if self.state == ProcessorState::Dead {
            return Err(SimError::ProcessorDead(self.id));
        }
        let target = tasks.get_mut(task.0).ok_or(SimError::UnknownTask(task))?;
        let required = target.segment(seg)?.affinity();
        if required != self.affinity {
            return Err(SimError::AffinityMismatch {
                required,
                provided: self.affinity,
            });
        }
        if !target.is_segment_ready(seg) {
            return Err(SimError::SegmentNotReady { task, segment: seg });
        }
        if self.binding == Some((task, seg)) {
            return Ok(());
        }
        if let Some(holder) = target.segment(seg)?.assigned() {
            return Err(SimError::SegmentClaimed {
                task,
                segment: seg,
                holder,
            });
        }

        if let Some((prev_task, prev_seg)) = self.binding {
            if self.preemption == Preemption::NonPreemptive {
                return Err(SimError::NotPreemptible(self.id));
            }
            let displaced = tasks
                .get_mut(prev_task.0)
                .ok_or(SimError::UnknownTask(prev_task))?;
            displaced.segment_mut(prev_seg)?.unassign();
            displaced.mark_preempted();
            debug!(
                "tick {}: {} preempts {}/{} for {}/{}",
                tick, self.id, prev_task, prev_seg, task, seg
            );
        }

        let target = tasks.get_mut(task.0).ok_or(SimError::UnknownTask(task))?;
        let segment = target.segment_mut(seg)?;
        assert_invariant(
            ASSIGNMENT_EXCLUSIVE,
            segment.assigned().is_none(),
            "segment bound to two processors",
            Some("assign"),
        );
        segment.assign(self.id);
        target.mark_scheduled();
        self.binding = Some((task, seg));
        self.state = match self.preemption {
            Preemption::Preemptive => ProcessorState::BusyPreemptive,
            Preemption::NonPreemptive => ProcessorState::BusyNonpreemptive,
        };
        debug!("tick {}: {} runs {}/{}", tick, self.id, task, seg);
        Ok(())
    }

    /// Run the bound segment for one tick.
    ///
    /// An execution failure leaves the binding in place and is returned as a
    /// fault for this processor only.
    pub fn work(
        &mut self,
        tasks: &mut [Task],
        tick: u64,
        noise: &mut dyn NoiseSource,
    ) -> SimResult<()> {
        let Some((task, seg)) = self.binding else {
            if self.state != ProcessorState::Dead {
                self.state = ProcessorState::Idle;
            }
            return Ok(());
        };
        let bound = tasks.get_mut(task.0).ok_or(SimError::UnknownTask(task))?;
        assert_invariant(
            BINDING_CONSISTENT,
            bound.segment(seg)?.assigned() == Some(self.id),
            "processor and segment disagree on binding",
            Some("work"),
        );

        let jitter = noise.draw(self.variation);
        bound.execute_segment(seg, tick, self.variation, self.parallel_discount(), jitter)?;
        if bound.segment(seg)?.is_completed() {
            self.binding = None;
            self.state = ProcessorState::Idle;
        }
        Ok(())
    }

    /// Drop any binding and return to Idle, discarding in-flight work.
    pub fn reset(&mut self) {
        self.binding = None;
        self.burden = 0;
        self.state = ProcessorState::Idle;
    }

    /// Fail the processor, releasing whatever it was running.
    pub(crate) fn kill(&mut self, tasks: &mut [Task]) {
        if let Some((task, seg)) = self.binding.take() {
            if let Some(bound) = tasks.get_mut(task.0) {
                if let Ok(segment) = bound.segment_mut(seg) {
                    segment.unassign();
                }
                bound.mark_preempted();
            }
        }
        self.state = ProcessorState::Dead;
    }

    /// Current view for reporting.
    pub fn snapshot(&self) -> ProcessorSnapshot {
        ProcessorSnapshot {
            affinity: self.affinity,
            state: self.state,
            binding: self.binding,
        }
    }
}

impl fmt::Display for Processor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Processor {} {}#{}: ", self.id.0, self.affinity, self.local_index)?;
        match (self.state, self.binding) {
            (ProcessorState::Dead, _) => f.write_str("dead"),
            (_, Some((task, seg))) => write!(f, "running task {} segment {}", task.0, seg.0),
            (_, None) => f.write_str("idle"),
        }
    }
}
