//! Convergence detection for the healing loop.
//!
//! The detector decides, before every iteration, whether another pass is
//! worth running. It never looks at individual errors; it works on journal
//! aggregates and the budget.

use serde::{Deserialize, Serialize};

use crate::config::HealingConfig;

/// Why the healing loop stopped (or kept going).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConvergenceReason {
    Continue,
    FullyConverged,
    BudgetFloor,
    IterationCap,
    CascadeDepthCap,
    DiminishingReturns,
}

/// Decision returned by [`ConvergenceDetector::should_continue`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ConvergenceDecision {
    pub proceed: bool,
    pub reason: ConvergenceReason,
}

impl ConvergenceDecision {
    fn stop(reason: ConvergenceReason) -> Self {
        Self {
            proceed: false,
            reason,
        }
    }

    fn go() -> Self {
        Self {
            proceed: true,
            reason: ConvergenceReason::Continue,
        }
    }
}

/// Aggregate view of one healing iteration boundary.
///
/// Improvement is measured as errors *resolved* in the last iteration
/// against the count open at its start, not as a net-count delta — a fix
/// that uncovers a cascade is progress, not stagnation.
#[derive(Clone, Copy, Debug)]
pub struct HealProgress {
    pub iteration: u32,
    pub unresolved_now: usize,
    /// Entries resolved (fixed or wont-fix) during the last iteration.
    pub resolved_last: usize,
    /// Entries open at the start of the last iteration.
    pub open_at_last_start: usize,
    pub cascade_depth: u32,
    pub budget_remaining: u64,
}

/// Stops healing on budget floor, iteration cap, cascade depth, diminishing
/// returns, or full convergence.
#[derive(Clone, Debug)]
pub struct ConvergenceDetector {
    max_iterations: u32,
    max_cascade_depth: u32,
    diminishing_returns_threshold: f64,
    min_heal_reserve: u64,
}

impl ConvergenceDetector {
    #[must_use]
    pub fn new(config: &HealingConfig, max_iterations: u32, min_heal_reserve: u64) -> Self {
        Self {
            max_iterations,
            max_cascade_depth: config.max_cascade_depth,
            diminishing_returns_threshold: config.diminishing_returns_threshold,
            min_heal_reserve,
        }
    }

    #[must_use]
    pub fn should_continue(&self, progress: HealProgress) -> ConvergenceDecision {
        if progress.unresolved_now == 0 {
            return ConvergenceDecision::stop(ConvergenceReason::FullyConverged);
        }
        if progress.budget_remaining < self.min_heal_reserve {
            return ConvergenceDecision::stop(ConvergenceReason::BudgetFloor);
        }
        if progress.iteration >= self.max_iterations {
            return ConvergenceDecision::stop(ConvergenceReason::IterationCap);
        }
        if progress.cascade_depth >= self.max_cascade_depth {
            return ConvergenceDecision::stop(ConvergenceReason::CascadeDepthCap);
        }
        // Improvement ratio only applies once a full iteration has run.
        if progress.iteration > 0 {
            let improvement =
                progress.resolved_last as f64 / progress.open_at_last_start.max(1) as f64;
            if improvement < self.diminishing_returns_threshold {
                return ConvergenceDecision::stop(ConvergenceReason::DiminishingReturns);
            }
        }
        ConvergenceDecision::go()
    }
}
