//! Processor classes and the preemption mode each class implies.

#![forbid(unsafe_code)]

use crate::error::SimError;
use std::fmt;
use std::str::FromStr;

/// The processor class a segment requires, or that a processor provides.
///
/// Declaration order is the grouping order used when processors are sorted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serialize", derive(serde::Serialize, serde::Deserialize))]
pub enum Affinity {
    /// General purpose CPU core.
    Cpu,
    /// High performance core of a big.LITTLE cluster.
    CpuBigCore,
    /// Efficiency core of a big.LITTLE cluster.
    CpuLittleCore,
    /// Generic data-copy engine.
    DataCopy,
    /// Host to device copy engine.
    DataCopyHostToDevice,
    /// Device to host copy engine.
    DataCopyDeviceToHost,
    /// Accelerator processing element.
    ProcessingElement,
    /// Graphics processor.
    Gpu,
    /// Reconfigurable fabric.
    Fpga,
    /// Unclassified.
    Unknown,
}

/// Whether work may be interrupted and resumed later.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serialize", derive(serde::Serialize, serde::Deserialize))]
pub enum Preemption {
    /// Can be interrupted at any tick boundary.
    Preemptive,
    /// Must run to completion once started, one tick after another.
    NonPreemptive,
}

const NAMES: [(&str, Affinity); 10] = [
    ("CPU", Affinity::Cpu),
    ("CPUBigCore", Affinity::CpuBigCore),
    ("CPULittleCore", Affinity::CpuLittleCore),
    ("DataCopy", Affinity::DataCopy),
    ("DataCopyHTD", Affinity::DataCopyHostToDevice),
    ("DataCopyDTH", Affinity::DataCopyDeviceToHost),
    ("PE", Affinity::ProcessingElement),
    ("GPU", Affinity::Gpu),
    ("FPGA", Affinity::Fpga),
    ("UNKNOWN", Affinity::Unknown),
];

impl Affinity {
    /// Number of distinct affinities.
    pub const COUNT: usize = 10;

    /// Every affinity, in grouping order.
    pub const ALL: [Affinity; Affinity::COUNT] = [
        Affinity::Cpu,
        Affinity::CpuBigCore,
        Affinity::CpuLittleCore,
        Affinity::DataCopy,
        Affinity::DataCopyHostToDevice,
        Affinity::DataCopyDeviceToHost,
        Affinity::ProcessingElement,
        Affinity::Gpu,
        Affinity::Fpga,
        Affinity::Unknown,
    ];

    /// Default preemption mode: the CPU family is preemptive, everything else is not.
    pub fn preemption(self) -> Preemption {
        match self {
            Affinity::Cpu | Affinity::CpuBigCore | Affinity::CpuLittleCore => {
                Preemption::Preemptive
            }
            _ => Preemption::NonPreemptive,
        }
    }

    /// Short name used by textual front ends.
    pub fn name(self) -> &'static str {
        NAMES[self.code() as usize].0
    }

    /// Stable numeric code, matching declaration order.
    pub fn code(self) -> u8 {
        self as u8
    }

    /// Inverse of [`Affinity::code`].
    pub fn from_code(code: u8) -> Option<Affinity> {
        Affinity::ALL.get(code as usize).copied()
    }
}

impl fmt::Display for Affinity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Affinity {
    type Err = SimError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        NAMES
            .iter()
            .find(|(name, _)| *name == s)
            .map(|(_, affinity)| *affinity)
            .ok_or_else(|| SimError::InvalidParameter(format!("unknown affinity `{}`", s)))
    }
}
