//! The self-healing subsystem.
//!
//! Healing runs in the Heal phase of the cognitive cycle, or when a parent
//! nudges a child with `HEAL_REQUEST`. The loop itself is driven by the
//! cell runtime (it needs tool and delegation access); this module holds
//! the pure machinery: convergence detection, cascade-claim admission, fix
//! patterns, and severity prioritisation.

pub mod cascade;
pub mod convergence;
pub mod patterns;

pub use cascade::{CascadeClaim, parse_claims, validate_claim};
pub use convergence::{
    ConvergenceDecision, ConvergenceDetector, ConvergenceReason, HealProgress,
};

use serde::{Deserialize, Serialize};

use crate::journal::ErrorJournal;
use crate::types::ErrorId;

/// Summary of one healing run, surfaced in traces and test assertions.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct HealSummary {
    pub iterations: u32,
    pub fixed: usize,
    pub wont_fix: usize,
    pub cascades_discovered: usize,
    pub reason: ConvergenceReason,
}

/// Unresolved entries ordered for fixing: severity descending, then age
/// (older first) so equal-severity errors heal in discovery order.
#[must_use]
pub fn prioritise(journal: &ErrorJournal) -> Vec<ErrorId> {
    let mut open: Vec<_> = journal.unresolved();
    open.sort_by(|a, b| b.severity.cmp(&a.severity).then(a.at.cmp(&b.at)));
    open.into_iter().map(|entry| entry.id.clone()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::journal::{ErrorEntry, ErrorSource};
    use crate::types::Severity;

    #[test]
    fn prioritise_orders_by_severity_then_age() {
        let mut journal = ErrorJournal::new();
        journal.record(ErrorEntry::new(
            ErrorId::from("low-old"),
            ErrorSource::Runtime,
            "t",
            "m",
            Severity::Low,
        ));
        journal.record(ErrorEntry::new(
            ErrorId::from("critical"),
            ErrorSource::Validation,
            "t",
            "m",
            Severity::Critical,
        ));
        journal.record(ErrorEntry::new(
            ErrorId::from("low-new"),
            ErrorSource::Runtime,
            "t",
            "m",
            Severity::Low,
        ));
        let order = prioritise(&journal);
        assert_eq!(order[0].as_str(), "critical");
        assert_eq!(order[1].as_str(), "low-old");
        assert_eq!(order[2].as_str(), "low-new");
    }
}
