//! Error types for the simulator.
//!
//! Every fallible operation returns [`SimResult`]. None of these conditions is
//! fatal: the caller decides whether a failure should stop its run loop.
//! A missed deadline is a simulation outcome and never shows up here.

#![forbid(unsafe_code)]

use crate::affinity::Affinity;
use crate::processor::ProcessorId;
use crate::segment::SegmentId;
use crate::task::TaskId;
use thiserror::Error;

/// Broad class of a [`SimError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Malformed identifiers or unmet preconditions.
    Validation,
    /// A non-preemptive segment was starved across ticks.
    Continuity,
    /// A task instance could not be released.
    State,
}

/// Errors reported by the simulator core.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum SimError {
    // ── Validation ──────────────────────────────────────────
    /// No task with this id.
    #[error("task {0} does not exist")]
    UnknownTask(TaskId),

    /// No processor with this global index.
    #[error("processor {0} does not exist")]
    UnknownProcessor(ProcessorId),

    /// Segment index out of range for its task.
    #[error("task {task} has no segment {segment}")]
    UnknownSegment { task: TaskId, segment: SegmentId },

    /// The segment needs a different processor class.
    #[error("segment requires {required}, processor provides {provided}")]
    AffinityMismatch {
        required: Affinity,
        provided: Affinity,
    },

    /// The segment's predecessors have not all completed.
    #[error("segment {segment} of task {task} is not ready")]
    SegmentNotReady { task: TaskId, segment: SegmentId },

    /// The segment is already bound to another processor.
    #[error("segment {segment} of task {task} is already bound to processor {holder}")]
    SegmentClaimed {
        task: TaskId,
        segment: SegmentId,
        holder: ProcessorId,
    },

    /// The processor has failed and accepts no work.
    #[error("processor {0} is dead")]
    ProcessorDead(ProcessorId),

    /// The processor is busy and cannot be preempted.
    #[error("processor {0} is busy and not preemptible")]
    NotPreemptible(ProcessorId),

    /// The segment has no remaining work.
    #[error("segment {0} has no remaining work")]
    SegmentCompleted(SegmentId),

    /// The dependency would close a cycle in the precedence graph.
    #[error("dependency {upstream} -> {downstream} would create a cycle")]
    CycleDetected {
        upstream: SegmentId,
        downstream: SegmentId,
    },

    /// A dependency refers to a segment that does not exist, or to itself.
    #[error("invalid dependency {upstream} -> {downstream}")]
    InvalidEdge {
        upstream: SegmentId,
        downstream: SegmentId,
    },

    /// A configuration value is out of range or malformed.
    #[error("invalid parameter: {0}")]
    InvalidParameter(String),

    /// Processors were created after the last sort.
    #[error("processors must be sorted by type before the simulation advances")]
    ProcessorsUnsorted,

    // ── Continuity ──────────────────────────────────────────
    /// A non-preemptive segment skipped at least one tick.
    #[error("non-preemptive segment {segment} last ran at tick {last}, cannot resume at tick {tick}")]
    ContinuityViolation {
        segment: SegmentId,
        last: u64,
        tick: u64,
    },

    // ── State ───────────────────────────────────────────────
    /// The previous instance of the task still has outstanding work.
    #[error("task {task} cannot be released at tick {tick}: previous instance unfinished")]
    ReleaseRejected { task: TaskId, tick: u64 },
}

impl SimError {
    /// Classify this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            SimError::ContinuityViolation { .. } => ErrorKind::Continuity,
            SimError::ReleaseRejected { .. } => ErrorKind::State,
            _ => ErrorKind::Validation,
        }
    }
}

/// Convenience alias for `Result<T, SimError>`.
pub type SimResult<T> = Result<T, SimError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kinds_follow_taxonomy() {
        let continuity = SimError::ContinuityViolation {
            segment: SegmentId(0),
            last: 1,
            tick: 3,
        };
        assert_eq!(continuity.kind(), ErrorKind::Continuity);
        let state = SimError::ReleaseRejected {
            task: TaskId(0),
            tick: 20,
        };
        assert_eq!(state.kind(), ErrorKind::State);
        assert_eq!(SimError::ProcessorsUnsorted.kind(), ErrorKind::Validation);
    }

    #[test]
    fn display_names_the_parties() {
        let e = SimError::SegmentClaimed {
            task: TaskId(2),
            segment: SegmentId(1),
            holder: ProcessorId(3),
        };
        let s = e.to_string();
        assert!(s.contains("task T2"));
        assert!(s.contains("processor P3"));
    }

    #[test]
    fn continuity_message_has_ticks() {
        let e = SimError::ContinuityViolation {
            segment: SegmentId(4),
            last: 7,
            tick: 9,
        };
        let s = e.to_string();
        assert!(s.contains("tick 7"));
        assert!(s.contains("tick 9"));
    }
}
