//! Segments: the unit of work inside a task.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

use crate::affinity::{Affinity, Preemption};
use crate::error::{SimError, SimResult};
use crate::noise::step_progress;
use crate::processor::ProcessorId;
use std::fmt;

/// Index of a segment inside its task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serialize", derive(serde::Serialize, serde::Deserialize))]
pub struct SegmentId(pub usize);

impl fmt::Display for SegmentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "S{}", self.0)
    }
}

/// A unit of work owned by exactly one task.
///
/// A new segment carries no outstanding work until its task is released;
/// [`Segment::reset`] restores the full length.
#[derive(Debug, Clone)]
pub struct Segment {
    length: f64,
    remaining: f64,
    affinity: Affinity,
    preemption: Preemption,
    ready: bool,
    assigned: Option<ProcessorId>,
    /// Ticks at which this segment made progress, oldest first.
    history: Vec<u64>,
}

/// Read-only view of a segment, as reported to front ends.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serialize", derive(serde::Serialize, serde::Deserialize))]
pub struct SegmentSnapshot {
    /// Processor type the segment needs.
    pub affinity: Affinity,
    /// Bound processor, if any.
    pub processor: Option<ProcessorId>,
    /// Cached readiness flag.
    pub ready: bool,
    /// Full work of one instance.
    pub length: f64,
    /// Work still outstanding.
    pub remaining: f64,
}

impl Segment {
    /// Segment whose preemption mode follows its affinity.
    pub fn new(length: f64, affinity: Affinity) -> Self {
        Self::with_preemption(length, affinity, affinity.preemption())
    }

    /// Segment with an explicit preemption mode.
    pub fn with_preemption(length: f64, affinity: Affinity, preemption: Preemption) -> Self {
        Self {
            length: length.max(0.0),
            remaining: 0.0,
            affinity,
            preemption,
            ready: false,
            assigned: None,
            history: Vec::new(),
        }
    }

    /// Full work of one instance.
    pub fn length(&self) -> f64 {
        self.length
    }

    /// Work still outstanding in the current instance.
    pub fn remaining(&self) -> f64 {
        self.remaining
    }

    /// Processor type able to run this segment.
    pub fn affinity(&self) -> Affinity {
        self.affinity
    }

    /// Whether the segment may be interrupted mid-run.
    pub fn preemption(&self) -> Preemption {
        self.preemption
    }

    /// True once no work is left.
    pub fn is_completed(&self) -> bool {
        self.remaining <= 0.0
    }

    /// Cached readiness flag; see [`crate::task::Task::is_segment_ready`].
    pub fn is_marked_ready(&self) -> bool {
        self.ready
    }

    /// Idempotent. Has no effect on a completed segment.
    pub fn mark_ready(&mut self) {
        if !self.is_completed() {
            self.ready = true;
        }
    }

    /// Processor currently bound to this segment, if any.
    pub fn assigned(&self) -> Option<ProcessorId> {
        self.assigned
    }

    pub(crate) fn assign(&mut self, processor: ProcessorId) {
        self.assigned = Some(processor);
    }

    pub(crate) fn unassign(&mut self) {
        self.assigned = None;
    }

    /// Ticks at which this segment executed.
    pub fn history(&self) -> &[u64] {
        &self.history
    }

    /// Progress the segment by one tick.
    ///
    /// Fails without touching any state if there is no work left, or if a
    /// non-preemptive segment last ran at some tick other than `tick - 1`.
    pub fn execute(
        &mut self,
        id: SegmentId,
        tick: u64,
        variation: f64,
        parallel_discount: f64,
        noise: f64,
    ) -> SimResult<()> {
        if self.is_completed() {
            return Err(SimError::SegmentCompleted(id));
        }
        if self.preemption == Preemption::NonPreemptive {
            if let Some(&last) = self.history.last() {
                if last + 1 != tick {
                    return Err(SimError::ContinuityViolation {
                        segment: id,
                        last,
                        tick,
                    });
                }
            }
        }
        self.remaining -= step_progress(variation, parallel_discount, noise);
        self.history.push(tick);
        if self.remaining <= 0.0 {
            self.remaining = 0.0;
            self.ready = false;
        }
        Ok(())
    }

    /// Restore the segment for a new task instance.
    ///
    /// Refuses (returns `false`) while work is outstanding unless `enforce`.
    pub fn reset(&mut self, enforce: bool) -> bool {
        if !enforce && !self.is_completed() {
            return false;
        }
        self.history.clear();
        self.remaining = self.length;
        self.assigned = None;
        self.ready = false;
        true
    }

    /// Drop all outstanding work, leaving the segment as if never released.
    pub(crate) fn abandon(&mut self) {
        self.history.clear();
        self.remaining = 0.0;
        self.assigned = None;
        self.ready = false;
    }

    /// Current view for reporting.
    pub fn snapshot(&self) -> SegmentSnapshot {
        SegmentSnapshot {
            affinity: self.affinity,
            processor: self.assigned,
            ready: self.ready,
            length: self.length,
            remaining: self.remaining,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn released(length: f64, affinity: Affinity) -> Segment {
        let mut seg = Segment::new(length, affinity);
        assert!(seg.reset(false));
        seg
    }

    #[test]
    fn new_segment_has_no_outstanding_work() {
        let seg = Segment::new(4.0, Affinity::Cpu);
        assert!(seg.is_completed());
        assert_eq!(seg.remaining(), 0.0);
        assert_eq!(seg.length(), 4.0);
    }

    #[test]
    fn execute_deducts_one_unit() {
        let mut seg = released(3.0, Affinity::Cpu);
        seg.execute(SegmentId(0), 0, 0.0, 0.0, 0.0).unwrap();
        assert_eq!(seg.remaining(), 2.0);
        assert_eq!(seg.history(), &[0]);
    }

    #[test]
    fn execute_completes_and_clears_ready() {
        let mut seg = released(1.0, Affinity::Gpu);
        seg.mark_ready();
        seg.execute(SegmentId(0), 5, 0.0, 0.0, 0.0).unwrap();
        assert!(seg.is_completed());
        assert!(!seg.is_marked_ready());
        assert_eq!(
            seg.execute(SegmentId(0), 6, 0.0, 0.0, 0.0),
            Err(SimError::SegmentCompleted(SegmentId(0)))
        );
    }

    #[test]
    fn non_preemptive_gap_fails_without_progress() {
        let mut seg = released(5.0, Affinity::Gpu);
        seg.execute(SegmentId(1), 3, 0.0, 0.0, 0.0).unwrap();
        let err = seg.execute(SegmentId(1), 5, 0.0, 0.0, 0.0).unwrap_err();
        assert_eq!(
            err,
            SimError::ContinuityViolation {
                segment: SegmentId(1),
                last: 3,
                tick: 5
            }
        );
        assert_eq!(seg.remaining(), 4.0);
        seg.execute(SegmentId(1), 4, 0.0, 0.0, 0.0).unwrap();
        assert_eq!(seg.remaining(), 3.0);
    }

    #[test]
    fn preemptive_gap_is_fine() {
        let mut seg = released(5.0, Affinity::Cpu);
        seg.execute(SegmentId(0), 1, 0.0, 0.0, 0.0).unwrap();
        seg.execute(SegmentId(0), 7, 0.0, 0.0, 0.0).unwrap();
        assert_eq!(seg.remaining(), 3.0);
    }

    #[test]
    fn reset_guards_in_flight_work() {
        let mut seg = released(3.0, Affinity::Cpu);
        seg.execute(SegmentId(0), 0, 0.0, 0.0, 0.0).unwrap();
        seg.execute(SegmentId(0), 1, 0.0, 0.0, 0.0).unwrap();
        assert_eq!(seg.remaining(), 1.0);
        assert!(!seg.reset(false));
        assert_eq!(seg.remaining(), 1.0);
        assert!(seg.reset(true));
        assert_eq!(seg.remaining(), 3.0);
        assert!(seg.history().is_empty());
    }

    #[test]
    fn discount_slows_progress() {
        let mut seg = released(2.0, Affinity::Gpu);
        seg.execute(SegmentId(0), 0, 0.0, 50.0, 0.0).unwrap();
        assert_eq!(seg.remaining(), 1.5);
    }

    #[test]
    fn completed_segment_never_marked_ready() {
        let mut seg = Segment::new(2.0, Affinity::Cpu);
        seg.mark_ready();
        assert!(!seg.is_marked_ready());
    }

    #[test]
    fn abandoned_segment_reads_as_unreleased() {
        let mut seg = released(3.0, Affinity::Gpu);
        seg.mark_ready();
        seg.assign(ProcessorId(1));
        seg.execute(SegmentId(0), 0, 0.0, 0.0, 0.0).unwrap();
        seg.abandon();
        assert!(seg.is_completed());
        assert!(!seg.is_marked_ready());
        assert_eq!(seg.assigned(), None);
        assert!(seg.history().is_empty());
        // The next release restores the full length.
        assert!(seg.reset(false));
        assert_eq!(seg.remaining(), 3.0);
    }

    #[test]
    fn snapshot_reports_binding() {
        let mut seg = released(2.0, Affinity::Fpga);
        seg.mark_ready();
        seg.assign(ProcessorId(4));
        let snap = seg.snapshot();
        assert_eq!(snap.processor, Some(ProcessorId(4)));
        assert!(snap.ready);
        assert_eq!(snap.remaining, 2.0);
    }
}
