//! Monitor: checked after every execute step.
//!
//! Detects drift away from the focus, stagnating outcomes, imminent budget
//! exhaustion, and satisfied success criteria, and turns each into a typed
//! verdict. The monitor also triggers the working-memory compression pass
//! when occupancy crosses its threshold.

use rustc_hash::FxHashSet;

use super::{CellCtx, MonitorVerdict};
use crate::envelope::{StderrEntry, StderrKind};
use crate::memory::WorkingMemory;
use crate::utils::text::token_set;

/// Whether one success criterion is satisfied by the accumulated facts.
///
/// A criterion is met when at least half of its tokens appear somewhere in
/// the fact bag. Empty criteria are trivially met.
#[must_use]
pub fn criterion_met(criterion: &str, memory: &WorkingMemory) -> bool {
    let wanted = token_set(criterion);
    if wanted.is_empty() {
        return true;
    }
    let have: FxHashSet<String> = memory
        .facts()
        .iter()
        .flat_map(|fact| token_set(&fact.content))
        .collect();
    let hits = wanted.iter().filter(|token| have.contains(*token)).count();
    hits * 2 >= wanted.len()
}

/// Whether every step's success criterion is satisfied.
///
/// A plan whose criteria are all empty never early-terminates here; it
/// runs to the end of its steps instead.
#[must_use]
pub fn all_criteria_met(ctx: &CellCtx) -> bool {
    ctx.plan
        .steps
        .iter()
        .any(|step| !step.success_criterion.trim().is_empty())
        && ctx
            .plan
            .steps
            .iter()
            .all(|step| criterion_met(&step.success_criterion, &ctx.memory))
}

/// Run the monitor once. Order matters: budget exhaustion wins over
/// everything (the partial result must still get packaged), then success,
/// then drift, then stagnation.
pub fn check(ctx: &mut CellCtx) -> MonitorVerdict {
    let monitor = &ctx.config.monitor;

    // Compression is a monitor duty.
    let digested = ctx.memory.compress(monitor);
    if digested > 0 {
        tracing::debug!(digested, "compressed working memory");
    }

    let step_cost = ctx.config.execution.step_cost_estimate;
    if ctx.governor.deadline_passed() {
        ctx.memory.warn(StderrEntry::new(
            StderrKind::DeadlineExceeded,
            "deadline reached; packaging partial results",
        ));
        return MonitorVerdict::CutToPackage;
    }
    if !ctx.governor.can_afford_step(step_cost) {
        return MonitorVerdict::CutToPackage;
    }

    if all_criteria_met(ctx) {
        return MonitorVerdict::TerminateSuccess;
    }

    let drift = ctx.memory.drift_from_focus(monitor);
    if drift > monitor.drift_threshold {
        if ctx.replans >= monitor.max_replans {
            return MonitorVerdict::TerminateFailure {
                reason: format!(
                    "repeated drift ({drift:.2}) with no replan options left"
                ),
            };
        }
        return MonitorVerdict::Replan {
            why: format!("drift {drift:.2} above threshold"),
        };
    }

    let variance_flat = ctx.memory.step() >= monitor.signature_window as u64
        && ctx.memory.confidence_variance(monitor.signature_window) < monitor.confidence_epsilon;
    let stagnant = ctx.memory.detect_stagnation(monitor) || variance_flat;
    if stagnant {
        if ctx.replans < monitor.max_replans {
            return MonitorVerdict::Replan {
                why: "stagnating outcomes".to_string(),
            };
        }
        // Out of replans: note it and push on.
        ctx.memory.warn(StderrEntry::new(
            StderrKind::Stagnation,
            "stagnation detected; proceeding with current plan",
        ));
    }

    MonitorVerdict::Continue
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::Fact;

    #[test]
    fn criterion_met_on_token_overlap() {
        let mut memory = WorkingMemory::new("f");
        memory.add_fact(Fact::new(
            "photosynthesis converts light and carbon dioxide into sugar",
            0.9,
            "t",
        ));
        assert!(criterion_met("mentions light carbon dioxide", &memory));
        assert!(!criterion_met("covers quarterly revenue figures", &memory));
    }

    #[test]
    fn empty_criterion_is_trivially_met() {
        let memory = WorkingMemory::new("f");
        assert!(criterion_met("", &memory));
    }
}
