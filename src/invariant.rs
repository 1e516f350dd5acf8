//! Runtime invariant enforcement with contract tracking.
//!
//! Internal invariants guard against programming errors in the simulator
//! itself, never against bad input. With the `ppt` feature, every checked id
//! is recorded so tests can verify that a code path actually exercised it.

#![forbid(unsafe_code)]

#[cfg(feature = "ppt")]
use lazy_static::lazy_static;
#[cfg(feature = "ppt")]
use std::collections::HashSet;
#[cfg(feature = "ppt")]
use std::sync::Mutex;

/// A segment and the processor it is bound to agree on the binding.
pub const BINDING_CONSISTENT: u32 = 1;
/// No segment is bound to two processors at once.
pub const ASSIGNMENT_EXCLUSIVE: u32 = 2;
/// A segment only becomes ready once every predecessor completed.
pub const PRECEDENCE_RESPECTED: u32 = 3;
/// Executed work never exceeds total work.
pub const COMPLETION_CONSERVED: u32 = 4;
/// A segment marked ready still has work left.
pub const READY_IMPLIES_PENDING: u32 = 5;
/// The logical clock only moves forward, one tick at a time.
pub const CLOCK_MONOTONIC: u32 = 6;

#[cfg(feature = "ppt")]
lazy_static! {
    static ref INVARIANT_LOG: Mutex<HashSet<u32>> = Mutex::new(HashSet::new());
}

#[cfg(feature = "ppt")]
/// Assert an invariant: records it and panics on failure.
pub(crate) fn assert_invariant(id: u32, condition: bool, message: &str, context: Option<&str>) {
    if !condition {
        let full_message = match context {
            Some(ctx) => format!("invariant {} violated: {} ({})", id, message, ctx),
            None => format!("invariant {} violated: {}", id, message),
        };
        log::error!("{}", full_message);
        panic!("{}", full_message);
    }
    // A poisoned log only means another test panicked mid-insert.
    let mut log = match INVARIANT_LOG.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    };
    log.insert(id);
}

#[cfg(not(feature = "ppt"))]
/// Assert an invariant: panics on failure.
pub(crate) fn assert_invariant(_id: u32, condition: bool, message: &str, _context: Option<&str>) {
    if !condition {
        panic!("invariant violated: {}", message);
    }
}

#[cfg(feature = "ppt")]
/// Panics unless every id in `required` has been asserted since the last clear.
pub fn contract_test(test_name: &str, required: &[u32]) {
    let missing: Vec<u32> = {
        let log = match INVARIANT_LOG.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        required
            .iter()
            .copied()
            .filter(|id| !log.contains(id))
            .collect()
    };
    if !missing.is_empty() {
        panic!(
            "contract '{}' failed: invariants never checked: {:?}",
            test_name, missing
        );
    }
}

#[cfg(not(feature = "ppt"))]
/// No-op without the `ppt` feature.
pub fn contract_test(_test_name: &str, _required: &[u32]) {}

#[cfg(feature = "ppt")]
/// Forget every recorded invariant.
pub fn clear_invariant_log() {
    match INVARIANT_LOG.lock() {
        Ok(mut guard) => guard.clear(),
        Err(poisoned) => poisoned.into_inner().clear(),
    }
}

#[cfg(not(feature = "ppt"))]
/// No-op without the `ppt` feature.
pub fn clear_invariant_log() {}
