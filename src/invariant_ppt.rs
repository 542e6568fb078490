//! PPT Invariant System: structural invariant enforcement with contract tracking.

#[cfg(feature = "ppt")]
use lazy_static::lazy_static;
#[cfg(feature = "ppt")]
use std::collections::HashSet;
#[cfg(feature = "ppt")]
use std::sync::Mutex;

// Invariant constants for contract tracking.
pub const SIZE_CONTRACT: u32 = 1;
pub const CHAIN_GEOMETRY: u32 = 2;
pub const GRAPH_LEGALITY: u32 = 3;
pub const GRAPH_REJECTS_INVALID: u32 = 4;
pub const PLAN_SOUNDNESS: u32 = 5;
pub const SINGLE_FEEDBACK_LOOP: u32 = 6;
pub const FROZEN_FRAMES: u32 = 7;
pub const ITERATION_TERMINATES: u32 = 8;
pub const STATS_SERIALIZED: u32 = 9;
pub const STOP_RULE: u32 = 10;

#[cfg(feature = "ppt")]
lazy_static! {
    static ref INVARIANT_LOG: Mutex<HashSet<u32>> = Mutex::new(HashSet::new());
}

#[cfg(feature = "ppt")]
/// Assert an invariant: logs it and panics on failure.
pub(crate) fn assert_invariant(id: u32, condition: bool, message: &str, context: Option<&str>) {
    if !condition {
        let full_message = if let Some(ctx) = context {
            format!("Invariant {} failed: {} (context: {})", id, message, ctx)
        } else {
            format!("Invariant {} failed: {}", id, message)
        };
        tracing::error!("{}", full_message);
        panic!("{}", full_message);
    }
    // A poisoned log only means another test panicked mid-insert.
    INVARIANT_LOG
        .lock()
        .unwrap_or_else(|poisoned| poisoned.into_inner())
        .insert(id);
}

#[cfg(not(feature = "ppt"))]
/// Assert an invariant: checks condition and panics on failure.
pub(crate) fn assert_invariant(_id: u32, condition: bool, message: &str, _context: Option<&str>) {
    if !condition {
        panic!("Invariant failed: {}", message);
    }
}

#[cfg(feature = "ppt")]
/// Contract test: checks that specified invariants were asserted.
pub fn contract_test(test_name: &str, required_invariants: &[u32]) {
    let log = INVARIANT_LOG
        .lock()
        .unwrap_or_else(|poisoned| poisoned.into_inner());
    let missing: Vec<u32> = required_invariants
        .iter()
        .copied()
        .filter(|inv| !log.contains(inv))
        .collect();
    drop(log); // Drop the lock before panicking
    if !missing.is_empty() {
        panic!(
            "Contract test '{}' failed: invariants not enforced: {:?}",
            test_name, missing
        );
    }
}

#[cfg(not(feature = "ppt"))]
/// Contract test: no-op when PPT feature is disabled.
pub fn contract_test(_test_name: &str, _required_invariants: &[u32]) {}

#[cfg(feature = "ppt")]
/// Clear invariant log (for between test runs).
pub fn clear_invariant_log() {
    INVARIANT_LOG
        .lock()
        .unwrap_or_else(|poisoned| poisoned.into_inner())
        .clear();
}

#[cfg(not(feature = "ppt"))]
/// Clear invariant log: no-op when PPT feature is disabled.
pub fn clear_invariant_log() {}
