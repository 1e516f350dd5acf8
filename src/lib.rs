//! Deterministic, tick-driven simulation of real-time task sets on
//! heterogeneous processors.

pub mod affinity;
pub mod builder;
pub mod error;
#[doc(hidden)]
pub mod invariant;
pub mod noise;
pub mod processor;
pub mod scheduler;
pub mod segment;
pub mod simulator;
pub mod task;
pub mod workload;

pub use affinity::{Affinity, Preemption};
pub use builder::{DagSpec, PipelineSpec};
pub use error::{ErrorKind, SimError, SimResult};
pub use noise::{NoiseSource, SeededNoise, Silent};
pub use processor::{Processor, ProcessorId, ProcessorSnapshot, ProcessorState};
pub use scheduler::{Policy, PriorityScheduler, Scheduler};
pub use segment::{Segment, SegmentId, SegmentSnapshot};
pub use simulator::{Fault, RunSummary, SimConfig, Simulator};
pub use task::{RtClass, SchedulePolicyTag, Task, TaskId, TaskSnapshot, TaskState};
