//! Tasks: a periodic job made of segments linked by a precedence DAG.
//!
//! Readiness is computed lazily and cached on the segment: once a segment
//! is found ready it stays ready until the next reset. [`Task::check_states`]
//! is the single place where the aggregate view (executed length, ready set,
//! task state) is recomputed; everything else reads its cached results.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

use crate::affinity::Affinity;
use crate::error::{SimError, SimResult};
use crate::invariant::{
    assert_invariant, COMPLETION_CONSERVED, PRECEDENCE_RESPECTED, READY_IMPLIES_PENDING,
};
use crate::segment::{Segment, SegmentId, SegmentSnapshot};
use std::fmt;

/// Handle of a task inside a simulator, in creation order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serialize", derive(serde::Serialize, serde::Deserialize))]
pub struct TaskId(pub usize);

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "T{}", self.0)
    }
}

/// Aggregate state of the current task instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serialize", derive(serde::Serialize, serde::Deserialize))]
pub enum TaskState {
    /// Some segment can run.
    Ready,
    /// Some segment is bound to a processor.
    Executing,
    /// No work left in this instance.
    Finished,
    /// This instance missed, or can no longer meet, its deadline.
    MissedDeadline,
    /// Not yet evaluated, or blocked with nothing ready.
    Unknown,
}

/// Scheduling class tag, mirroring the `SCHED_*` policies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serialize", derive(serde::Serialize, serde::Deserialize))]
pub enum SchedulePolicyTag {
    /// `SCHED_OTHER`
    Other,
    /// `SCHED_FIFO`
    #[default]
    Fifo,
    /// `SCHED_RR`
    RoundRobin,
    /// `SCHED_BATCH`
    Batch,
    /// `SCHED_ISO`
    Iso,
    /// `SCHED_IDLE`
    Idle,
    /// `SCHED_DEADLINE`
    Deadline,
}

/// Real-time class of a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serialize", derive(serde::Serialize, serde::Deserialize))]
pub enum RtClass {
    /// A miss is a failure.
    #[default]
    Hard,
    /// A miss is tolerated.
    Soft,
}

/// Read-only view of a task, as reported to front ends.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serialize", derive(serde::Serialize, serde::Deserialize))]
pub struct TaskSnapshot {
    /// Release period in ticks.
    pub period: u64,
    /// One entry per segment, in creation order.
    pub segments: Vec<SegmentSnapshot>,
}

/// A periodic task.
#[derive(Debug, Clone)]
pub struct Task {
    id: TaskId,
    segments: Vec<Segment>,
    /// `predecessors[i]`: segments that must complete before `i` may run.
    predecessors: Vec<Vec<SegmentId>>,
    /// `successors[i]`: segments that wait on `i`.
    successors: Vec<Vec<SegmentId>>,
    period: u64,
    relative_deadline: u64,
    absolute_deadline: u64,
    priority: u8,
    policy: SchedulePolicyTag,
    rt_class: RtClass,
    state: TaskState,
    missed: bool,
    max_concurrency: usize,
    executed: f64,
    ready_set: Vec<SegmentId>,
    released_at: Option<u64>,
    /// Last period boundary the release check handled, released or not.
    last_boundary: Option<u64>,
}

impl Task {
    /// Empty task with priority 99 and no period.
    pub fn new(id: TaskId) -> Self {
        Self {
            id,
            segments: Vec::new(),
            predecessors: Vec::new(),
            successors: Vec::new(),
            period: 0,
            relative_deadline: 0,
            absolute_deadline: 0,
            priority: 99,
            policy: SchedulePolicyTag::default(),
            rt_class: RtClass::default(),
            state: TaskState::Unknown,
            missed: false,
            max_concurrency: 1,
            executed: 0.0,
            ready_set: Vec::new(),
            released_at: None,
            last_boundary: None,
        }
    }

    /// Handle of this task.
    pub fn id(&self) -> TaskId {
        self.id
    }

    // ── Construction ────────────────────────────────────────────

    /// Append a segment whose preemption mode follows its affinity.
    pub fn add_segment(&mut self, affinity: Affinity, length: f64) -> SegmentId {
        self.push_segment(Segment::new(length, affinity))
    }

    /// Append a prebuilt segment.
    pub fn push_segment(&mut self, segment: Segment) -> SegmentId {
        let id = SegmentId(self.segments.len());
        self.segments.push(segment);
        self.predecessors.push(Vec::new());
        self.successors.push(Vec::new());
        id
    }

    /// Record that `downstream` depends on `upstream`.
    ///
    /// Rejects self-edges, unknown segments and edges that would close a
    /// cycle. Registering the same edge twice is a no-op. The maximum
    /// concurrency is the largest out-degree seen so far, which is an
    /// optimistic bound rather than the true width of the graph.
    pub fn set_dependency(&mut self, upstream: SegmentId, downstream: SegmentId) -> SimResult<()> {
        let n = self.segments.len();
        if upstream == downstream || upstream.0 >= n || downstream.0 >= n {
            return Err(SimError::InvalidEdge {
                upstream,
                downstream,
            });
        }
        if self.successors[upstream.0].contains(&downstream) {
            return Ok(());
        }
        if self.reaches(downstream, upstream) {
            return Err(SimError::CycleDetected {
                upstream,
                downstream,
            });
        }
        self.predecessors[downstream.0].push(upstream);
        self.successors[upstream.0].push(downstream);
        self.max_concurrency = self.max_concurrency.max(self.successors[upstream.0].len());
        Ok(())
    }

    /// Depth-first search along successor edges.
    fn reaches(&self, from: SegmentId, target: SegmentId) -> bool {
        let mut visited = vec![false; self.segments.len()];
        let mut stack = vec![from];
        while let Some(current) = stack.pop() {
            if current == target {
                return true;
            }
            if visited[current.0] {
                continue;
            }
            visited[current.0] = true;
            stack.extend(self.successors[current.0].iter().copied());
        }
        false
    }

    /// Sets both the period and the (implicit) relative deadline.
    pub fn set_period(&mut self, period: u64) {
        self.period = period;
        self.relative_deadline = period;
    }

    /// Deadline relative to each release. Overrides the one implied by the period.
    pub fn set_relative_deadline(&mut self, deadline: u64) {
        self.relative_deadline = deadline;
    }

    /// Fixed priority; lower is more urgent.
    pub fn set_priority(&mut self, priority: u8) {
        self.priority = priority;
    }

    /// Scheduling class tag, informational only.
    pub fn set_policy(&mut self, policy: SchedulePolicyTag) {
        self.policy = policy;
    }

    /// Hard or soft real-time class.
    pub fn set_rt_class(&mut self, class: RtClass) {
        self.rt_class = class;
    }

    /// Raise the concurrency bound used by the deadline projection.
    ///
    /// Returns `false` and leaves the bound unchanged if `n` is not larger.
    pub fn raise_max_concurrency(&mut self, n: usize) -> bool {
        if n > self.max_concurrency {
            self.max_concurrency = n;
            true
        } else {
            false
        }
    }

    // ── Queries ─────────────────────────────────────────────────

    /// Number of segments.
    pub fn segment_count(&self) -> usize {
        self.segments.len()
    }

    /// Segment `id`, or `UnknownSegment`.
    pub fn segment(&self, id: SegmentId) -> SimResult<&Segment> {
        self.segments.get(id.0).ok_or(SimError::UnknownSegment {
            task: self.id,
            segment: id,
        })
    }

    pub(crate) fn segment_mut(&mut self, id: SegmentId) -> SimResult<&mut Segment> {
        let task = self.id;
        self.segments
            .get_mut(id.0)
            .ok_or(SimError::UnknownSegment { task, segment: id })
    }

    /// All segments in creation order.
    pub fn segments(&self) -> &[Segment] {
        &self.segments
    }

    /// Direct predecessors of `id`; empty for an unknown segment.
    pub fn predecessors(&self, id: SegmentId) -> &[SegmentId] {
        self.predecessors.get(id.0).map_or(&[][..], Vec::as_slice)
    }

    /// Direct successors of `id`; empty for an unknown segment.
    pub fn successors(&self, id: SegmentId) -> &[SegmentId] {
        self.successors.get(id.0).map_or(&[][..], Vec::as_slice)
    }

    /// Release period in ticks; 0 means never released.
    pub fn period(&self) -> u64 {
        self.period
    }

    /// Deadline relative to each release.
    pub fn relative_deadline(&self) -> u64 {
        self.relative_deadline
    }

    /// Deadline of the current instance.
    pub fn absolute_deadline(&self) -> u64 {
        self.absolute_deadline
    }

    /// Fixed priority; lower is more urgent.
    pub fn priority(&self) -> u8 {
        self.priority
    }

    /// Scheduling class tag.
    pub fn policy(&self) -> SchedulePolicyTag {
        self.policy
    }

    /// Real-time class.
    pub fn rt_class(&self) -> RtClass {
        self.rt_class
    }

    /// State as of the last [`Task::check_states`].
    pub fn state(&self) -> TaskState {
        self.state
    }

    /// True once the current instance has missed its deadline.
    pub fn has_missed(&self) -> bool {
        self.missed
    }

    /// Tick of the current instance's release, if any.
    pub fn released_at(&self) -> Option<u64> {
        self.released_at
    }

    /// Concurrency bound used by the deadline projection.
    pub fn max_concurrency(&self) -> usize {
        self.max_concurrency
    }

    /// Work done on the current instance, as of the last [`Task::check_states`].
    pub fn executed_length(&self) -> f64 {
        self.executed
    }

    /// Sum of all segment lengths.
    pub fn total_work(&self) -> f64 {
        self.segments.iter().map(Segment::length).sum()
    }

    /// Ready, incomplete segments found by the last [`Task::check_states`].
    pub fn ready_segments(&self) -> &[SegmentId] {
        &self.ready_set
    }

    /// True when no segment has outstanding work.
    pub fn is_all_completed(&self) -> bool {
        self.segments.iter().all(Segment::is_completed)
    }

    /// Total work over period; zero for a task without a period.
    pub fn utilization(&self) -> f64 {
        if self.period == 0 {
            return 0.0;
        }
        self.total_work() / self.period as f64
    }

    /// Utilization restricted to segments of one affinity.
    pub fn utilization_on(&self, affinity: Affinity) -> f64 {
        if self.period == 0 {
            return 0.0;
        }
        let work: f64 = self
            .segments
            .iter()
            .filter(|s| s.affinity() == affinity)
            .map(Segment::length)
            .sum();
        work / self.period as f64
    }

    /// Current view for reporting.
    pub fn snapshot(&self) -> TaskSnapshot {
        TaskSnapshot {
            period: self.period,
            segments: self.segments.iter().map(Segment::snapshot).collect(),
        }
    }

    // ── Readiness ───────────────────────────────────────────────

    /// Whether segment `id` may run, caching a positive answer.
    ///
    /// Completed and unknown segments are never ready.
    pub fn is_segment_ready(&mut self, id: SegmentId) -> bool {
        let Some(segment) = self.segments.get(id.0) else {
            return false;
        };
        if segment.is_marked_ready() {
            assert_invariant(
                READY_IMPLIES_PENDING,
                !segment.is_completed(),
                "ready segment still has work",
                Some("is_segment_ready"),
            );
            return true;
        }
        if segment.is_completed() {
            return false;
        }
        let all_done = self.predecessors[id.0]
            .iter()
            .all(|p| self.segments[p.0].is_completed());
        if !all_done {
            return false;
        }
        assert_invariant(
            PRECEDENCE_RESPECTED,
            self.predecessors[id.0]
                .iter()
                .all(|p| self.segments[p.0].remaining() <= 0.0),
            "segment marked ready before its predecessors completed",
            Some("is_segment_ready"),
        );
        self.segments[id.0].mark_ready();
        true
    }

    /// First ready, unassigned segment of the given affinity.
    pub fn first_ready_segment(&mut self, affinity: Affinity) -> Option<SegmentId> {
        (0..self.segments.len()).map(SegmentId).find(|&id| {
            let seg = &self.segments[id.0];
            seg.affinity() == affinity
                && seg.assigned().is_none()
                && !seg.is_completed()
                && self.is_segment_ready(id)
        })
    }

    /// First ready segment regardless of affinity or binding.
    pub fn first_ready_segment_any(&mut self) -> Option<SegmentId> {
        (0..self.segments.len())
            .map(SegmentId)
            .find(|&id| self.is_segment_ready(id))
    }

    // ── Lifecycle ───────────────────────────────────────────────

    /// Recompute executed length, the ready set and the task state.
    pub fn check_states(&mut self) -> TaskState {
        self.executed = self
            .segments
            .iter()
            .map(|s| s.length() - s.remaining())
            .sum();
        assert_invariant(
            COMPLETION_CONSERVED,
            self.executed <= self.total_work() + f64::EPSILON,
            "executed length exceeds total work",
            Some("check_states"),
        );

        self.ready_set.clear();
        for i in 0..self.segments.len() {
            let id = SegmentId(i);
            if !self.segments[i].is_completed() && self.is_segment_ready(id) {
                self.ready_set.push(id);
            }
        }

        self.state = if self.missed {
            TaskState::MissedDeadline
        } else if self.is_all_completed() {
            TaskState::Finished
        } else if !self.ready_set.is_empty() {
            TaskState::Ready
        } else {
            TaskState::Unknown
        };
        self.state
    }

    /// Reset every segment for a fresh instance.
    ///
    /// Without `enforce`, refuses (and changes nothing) if any segment still
    /// has outstanding work.
    pub fn reset(&mut self, enforce: bool) -> bool {
        if !enforce && !self.is_all_completed() {
            return false;
        }
        for segment in &mut self.segments {
            segment.reset(true);
        }
        self.executed = 0.0;
        self.released_at = None;
        self.missed = false;
        self.ready_set.clear();
        self.state = TaskState::Unknown;
        true
    }

    /// Discard the current instance and every release record.
    ///
    /// Afterwards the task looks freshly built: no outstanding work, so the
    /// next [`Task::release`] is accepted.
    pub fn abandon(&mut self) {
        for segment in &mut self.segments {
            segment.abandon();
        }
        self.executed = 0.0;
        self.absolute_deadline = 0;
        self.released_at = None;
        self.last_boundary = None;
        self.missed = false;
        self.ready_set.clear();
        self.state = TaskState::Unknown;
    }

    /// Last period boundary handled by the release check.
    pub fn last_boundary(&self) -> Option<u64> {
        self.last_boundary
    }

    pub(crate) fn note_boundary(&mut self, tick: u64) {
        self.last_boundary = Some(tick);
    }

    /// Start a new instance at tick `now`. Segments without predecessors become ready.
    ///
    /// Rejected if the previous instance still has outstanding work; the
    /// task is then left exactly as it was.
    pub fn release(&mut self, now: u64) -> SimResult<()> {
        if !self.reset(false) {
            return Err(SimError::ReleaseRejected {
                task: self.id,
                tick: now,
            });
        }
        for i in 0..self.segments.len() {
            if self.predecessors[i].is_empty() {
                self.segments[i].mark_ready();
            }
        }
        self.absolute_deadline = self.relative_deadline + now;
        self.released_at = Some(now);
        self.state = TaskState::Ready;
        Ok(())
    }

    /// Whether the current instance has missed, or can no longer meet, its deadline.
    ///
    /// Besides the hard check `now > deadline`, the remaining work divided by
    /// the maximum concurrency is projected from `now`. A miss is sticky until
    /// the next release.
    pub fn check_missed_deadline(&mut self, now: u64) -> bool {
        if self.state == TaskState::Finished {
            return false;
        }
        if self.missed {
            return true;
        }
        let remaining = (self.total_work() - self.executed).max(0.0);
        let projected = now as f64 + remaining / self.max_concurrency.max(1) as f64;
        if now > self.absolute_deadline || projected > self.absolute_deadline as f64 {
            self.missed = true;
            self.state = TaskState::MissedDeadline;
        }
        self.missed
    }

    /// Execute one segment for one tick.
    ///
    /// On completion, readiness is re-evaluated for every direct successor and
    /// the segment's processor binding is dropped.
    pub fn execute_segment(
        &mut self,
        id: SegmentId,
        tick: u64,
        variation: f64,
        parallel_discount: f64,
        noise: f64,
    ) -> SimResult<()> {
        let segment = self.segment_mut(id)?;
        segment.execute(id, tick, variation, parallel_discount, noise)?;
        if segment.is_completed() {
            segment.unassign();
            let successors = self.successors[id.0].clone();
            for next in successors {
                self.is_segment_ready(next);
            }
        }
        Ok(())
    }

    pub(crate) fn mark_scheduled(&mut self) {
        self.state = TaskState::Executing;
    }

    pub(crate) fn mark_preempted(&mut self) {
        if !self.missed {
            self.state = TaskState::Ready;
        }
    }
}

impl fmt::Display for Task {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = match self.state {
            TaskState::Executing => "executing",
            TaskState::Finished => "finished",
            TaskState::Ready => "ready",
            TaskState::MissedDeadline => "missddl",
            TaskState::Unknown => "unknown",
        };
        write!(
            f,
            "Task {}, period {}, state: {}, prog: {}/{}",
            self.id.0,
            self.period,
            state,
            self.executed,
            self.total_work()
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chain(lengths: &[f64]) -> Task {
        let mut task = Task::new(TaskId(0));
        for (i, &len) in lengths.iter().enumerate() {
            task.add_segment(Affinity::Cpu, len);
            if i > 0 {
                task.set_dependency(SegmentId(i - 1), SegmentId(i)).unwrap();
            }
        }
        task.set_period(20);
        task
    }

    #[test]
    fn release_marks_only_root_ready() {
        let mut task = chain(&[2.0, 1.0, 3.0]);
        task.release(0).unwrap();
        assert_eq!(task.check_states(), TaskState::Ready);
        assert_eq!(task.ready_segments(), &[SegmentId(0)]);
        assert_eq!(task.absolute_deadline(), 20);
    }

    #[test]
    fn completion_cascades_to_successor() {
        let mut task = chain(&[1.0, 2.0]);
        task.release(0).unwrap();
        task.execute_segment(SegmentId(0), 0, 0.0, 0.0, 0.0).unwrap();
        assert!(task.segment(SegmentId(1)).unwrap().is_marked_ready());
    }

    #[test]
    fn fan_out_raises_concurrency() {
        let mut task = Task::new(TaskId(1));
        for _ in 0..4 {
            task.add_segment(Affinity::Gpu, 1.0);
        }
        task.set_dependency(SegmentId(0), SegmentId(1)).unwrap();
        task.set_dependency(SegmentId(0), SegmentId(2)).unwrap();
        task.set_dependency(SegmentId(0), SegmentId(3)).unwrap();
        assert_eq!(task.max_concurrency(), 3);
        task.set_dependency(SegmentId(0), SegmentId(3)).unwrap();
        assert_eq!(task.successors(SegmentId(0)).len(), 3);
    }

    #[test]
    fn cycle_is_rejected() {
        let mut task = chain(&[1.0, 1.0, 1.0]);
        assert_eq!(
            task.set_dependency(SegmentId(2), SegmentId(0)),
            Err(SimError::CycleDetected {
                upstream: SegmentId(2),
                downstream: SegmentId(0)
            })
        );
        assert!(task.set_dependency(SegmentId(1), SegmentId(1)).is_err());
        assert!(task.set_dependency(SegmentId(0), SegmentId(9)).is_err());
    }

    #[test]
    fn release_rejected_while_in_flight() {
        let mut task = chain(&[3.0]);
        task.release(0).unwrap();
        task.execute_segment(SegmentId(0), 0, 0.0, 0.0, 0.0).unwrap();
        let err = task.release(20).unwrap_err();
        assert_eq!(
            err,
            SimError::ReleaseRejected {
                task: TaskId(0),
                tick: 20
            }
        );
        assert_eq!(task.segment(SegmentId(0)).unwrap().remaining(), 2.0);
    }

    #[test]
    fn projection_flags_early_miss() {
        let mut task = Task::new(TaskId(0));
        task.add_segment(Affinity::Cpu, 10.0);
        task.set_period(5);
        task.release(0).unwrap();
        task.check_states();
        assert!(task.check_missed_deadline(1));
        assert_eq!(task.state(), TaskState::MissedDeadline);
        // Sticky for this release.
        assert_eq!(task.check_states(), TaskState::MissedDeadline);
    }

    #[test]
    fn finished_never_misses() {
        let mut task = chain(&[1.0]);
        task.release(0).unwrap();
        task.execute_segment(SegmentId(0), 0, 0.0, 0.0, 0.0).unwrap();
        assert_eq!(task.check_states(), TaskState::Finished);
        assert!(!task.check_missed_deadline(100));
        assert_eq!(task.executed_length(), task.total_work());
    }

    #[test]
    fn first_ready_filters_affinity_and_binding() {
        let mut task = Task::new(TaskId(0));
        task.add_segment(Affinity::Cpu, 1.0);
        task.add_segment(Affinity::Gpu, 1.0);
        task.set_period(10);
        task.release(0).unwrap();
        assert_eq!(task.first_ready_segment(Affinity::Gpu), Some(SegmentId(1)));
        task.segment_mut(SegmentId(1))
            .unwrap()
            .assign(crate::processor::ProcessorId(0));
        assert_eq!(task.first_ready_segment(Affinity::Gpu), None);
        assert_eq!(task.first_ready_segment(Affinity::Cpu), Some(SegmentId(0)));
    }

    #[test]
    fn utilization_by_affinity() {
        let mut task = Task::new(TaskId(0));
        task.add_segment(Affinity::Cpu, 3.0);
        task.add_segment(Affinity::Gpu, 1.0);
        task.set_period(8);
        assert_eq!(task.utilization(), 0.5);
        assert_eq!(task.utilization_on(Affinity::Gpu), 0.125);
        assert_eq!(Task::new(TaskId(1)).utilization(), 0.0);
    }

    #[test]
    fn abandon_allows_immediate_release() {
        let mut task = chain(&[3.0, 2.0]);
        task.release(0).unwrap();
        task.execute_segment(SegmentId(0), 0, 0.0, 0.0, 0.0).unwrap();
        assert!(task.release(0).is_err());
        task.abandon();
        assert_eq!(task.released_at(), None);
        assert_eq!(task.check_states(), TaskState::Finished);
        task.release(0).unwrap();
        assert_eq!(task.segment(SegmentId(0)).unwrap().remaining(), 3.0);
        assert_eq!(task.check_states(), TaskState::Ready);
        assert_eq!(task.ready_segments(), &[SegmentId(0)]);
    }

    #[test]
    fn raise_only() {
        let mut task = chain(&[1.0]);
        assert!(!task.raise_max_concurrency(1));
        assert!(task.raise_max_concurrency(4));
        assert_eq!(task.max_concurrency(), 4);
    }
}
