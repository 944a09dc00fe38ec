//! Token budgets and the resource governor.
//!
//! A [`TokenBudget`] is carved at spawn time and only ever shrinks. The
//! [`Governor`] wraps one budget with the admission predicates the cognitive
//! cycle consults before every tool call, child spawn, or heal iteration.
//! The governor is purely advisory: it never interrupts in-flight work, it
//! just fails the *next* admission check, which cuts the cycle over to
//! Package early.

use miette::Diagnostic;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::time::Instant;

/// How a parent splits budget across children.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum CarveStrategy {
    /// Even split of the delegable pool.
    #[default]
    Equal,
    /// Proportional to subtask complexity weight.
    Weighted,
    /// The child at the given index receives twice the others' share.
    Priority(usize),
}

/// Share of the remaining budget a parent keeps back for review and
/// synthesis when delegating.
pub const PARENT_RESERVE_RATIO: f64 = 0.1;

/// The allowance of compute a cell may consume.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenBudget {
    pub total: u64,
    pub remaining: u64,
    pub depth: u32,
    pub max_depth: u32,
    pub can_delegate: bool,
    #[serde(default)]
    pub carve: CarveStrategy,
}

/// Rejected budget operations.
#[derive(Debug, Error, Diagnostic)]
pub enum BudgetError {
    #[error("delegation depth {depth} would exceed max {max_depth}")]
    #[diagnostic(code(hivecell::budget::depth_exceeded))]
    DepthExceeded { depth: u32, max_depth: u32 },

    #[error("cannot carve {requested} children from a pool of {pool} tokens")]
    #[diagnostic(
        code(hivecell::budget::pool_too_small),
        help("Each child needs at least the configured per-child minimum.")
    )]
    PoolTooSmall { requested: usize, pool: u64 },

    #[error("carve weights empty")]
    #[diagnostic(code(hivecell::budget::no_children))]
    NoChildren,
}

impl TokenBudget {
    /// Root budget for a fresh run.
    #[must_use]
    pub fn root(total: u64, max_depth: u32) -> Self {
        Self {
            total,
            remaining: total,
            depth: 0,
            max_depth,
            can_delegate: max_depth > 0,
            carve: CarveStrategy::Equal,
        }
    }

    #[must_use]
    pub fn with_carve(mut self, carve: CarveStrategy) -> Self {
        self.carve = carve;
        self
    }

    /// Consume tokens; saturates at zero.
    pub fn charge(&mut self, tokens: u64) {
        self.remaining = self.remaining.saturating_sub(tokens);
    }

    #[must_use]
    pub fn used(&self) -> u64 {
        self.total - self.remaining
    }

    #[must_use]
    pub fn is_exhausted(&self) -> bool {
        self.remaining == 0
    }

    /// Carve child budgets out of this one.
    ///
    /// The delegable pool is `remaining * (1 - PARENT_RESERVE_RATIO)`;
    /// shares follow the carve strategy over `weights` (one weight per
    /// child). On success the pool is deducted from `remaining`, so
    /// `sum(children.total) + parent.reserved <= parent.remaining` held at
    /// carve time by construction.
    pub fn carve_children(
        &mut self,
        weights: &[u32],
        per_child_minimum: u64,
    ) -> Result<Vec<TokenBudget>, BudgetError> {
        if weights.is_empty() {
            return Err(BudgetError::NoChildren);
        }
        if self.depth + 1 > self.max_depth {
            return Err(BudgetError::DepthExceeded {
                depth: self.depth + 1,
                max_depth: self.max_depth,
            });
        }
        let pool = (self.remaining as f64 * (1.0 - PARENT_RESERVE_RATIO)) as u64;
        if pool < per_child_minimum.saturating_mul(weights.len() as u64) {
            return Err(BudgetError::PoolTooSmall {
                requested: weights.len(),
                pool,
            });
        }

        let shares = self.shares(pool, weights);
        let child_depth = self.depth + 1;
        let children = shares
            .into_iter()
            .map(|share| TokenBudget {
                total: share,
                remaining: share,
                depth: child_depth,
                max_depth: self.max_depth,
                can_delegate: child_depth < self.max_depth,
                carve: self.carve,
            })
            .collect::<Vec<_>>();

        let handed_out: u64 = children.iter().map(|c| c.total).sum();
        self.remaining -= handed_out;
        Ok(children)
    }

    fn shares(&self, pool: u64, weights: &[u32]) -> Vec<u64> {
        let n = weights.len() as u64;
        match self.carve {
            CarveStrategy::Equal => {
                let each = pool / n;
                vec![each; weights.len()]
            }
            CarveStrategy::Weighted => {
                let weight_sum: u64 = weights.iter().map(|w| u64::from(*w).max(1)).sum();
                weights
                    .iter()
                    .map(|w| pool * u64::from(*w).max(1) / weight_sum)
                    .collect()
            }
            CarveStrategy::Priority(favoured) => {
                // The favoured child counts double in the denominator.
                let denominator = n + 1;
                let base = pool / denominator;
                weights
                    .iter()
                    .enumerate()
                    .map(|(i, _)| if i == favoured { base * 2 } else { base })
                    .collect()
            }
        }
    }
}

/// Advisory admission control for one cell.
///
/// Consulted synchronously before any tool call, child spawn, or self-heal
/// iteration. Holds the budget, the safety floor, the heal reserve, and the
/// envelope deadline.
#[derive(Debug)]
pub struct Governor {
    budget: TokenBudget,
    safety_floor: u64,
    per_child_minimum: u64,
    min_heal_reserve: u64,
    healing_enabled: bool,
    can_delegate_authority: bool,
    deadline: Option<Instant>,
}

impl Governor {
    /// Build a governor around a freshly carved budget.
    ///
    /// `min_heal_reserve` defaults to the larger of 25% of the initial
    /// budget and `reserve_floor`.
    #[must_use]
    pub fn new(
        budget: TokenBudget,
        safety_floor: u64,
        per_child_minimum: u64,
        reserve_floor: u64,
        heal_reserve_ratio: f64,
        healing_enabled: bool,
        can_delegate_authority: bool,
    ) -> Self {
        let min_heal_reserve =
            ((budget.total as f64 * heal_reserve_ratio) as u64).max(reserve_floor);
        Self {
            budget,
            safety_floor,
            per_child_minimum,
            min_heal_reserve,
            healing_enabled,
            can_delegate_authority,
            deadline: None,
        }
    }

    #[must_use]
    pub fn with_deadline(mut self, deadline: Option<Instant>) -> Self {
        self.deadline = deadline;
        self
    }

    #[must_use]
    pub fn budget(&self) -> &TokenBudget {
        &self.budget
    }

    pub fn budget_mut(&mut self) -> &mut TokenBudget {
        &mut self.budget
    }

    #[must_use]
    pub fn remaining(&self) -> u64 {
        self.budget.remaining
    }

    #[must_use]
    pub fn min_heal_reserve(&self) -> u64 {
        self.min_heal_reserve
    }

    pub fn charge(&mut self, tokens: u64) {
        self.budget.charge(tokens);
    }

    #[must_use]
    pub fn deadline_passed(&self) -> bool {
        self.deadline.is_some_and(|d| Instant::now() >= d)
    }

    /// Can the cell afford one more step of estimated cost `est`?
    #[must_use]
    pub fn can_afford_step(&self, est: u64) -> bool {
        !self.deadline_passed() && self.budget.remaining >= est + self.safety_floor
    }

    /// Can the cell spawn children at all?
    #[must_use]
    pub fn can_delegate(&self) -> bool {
        !self.deadline_passed()
            && self.budget.depth < self.budget.max_depth
            && self.budget.can_delegate
            && self.can_delegate_authority
            && self.budget.remaining >= self.per_child_minimum
    }

    /// Can the cell run (another) heal iteration?
    #[must_use]
    pub fn can_heal(&self, is_intern: bool) -> bool {
        !self.deadline_passed()
            && self.healing_enabled
            && !is_intern
            && self.budget.remaining >= self.min_heal_reserve
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn carve_preserves_parent_reserve() {
        let mut budget = TokenBudget::root(10_000, 3);
        let children = budget.carve_children(&[1, 1, 1], 100).unwrap();
        let handed: u64 = children.iter().map(|c| c.total).sum();
        assert!(handed <= 9_000);
        assert_eq!(budget.remaining, 10_000 - handed);
        assert!(budget.remaining >= 1_000);
        for child in &children {
            assert_eq!(child.depth, 1);
            assert!(child.can_delegate);
        }
    }

    #[test]
    fn carve_weighted_follows_complexity() {
        let mut budget = TokenBudget::root(10_000, 2).with_carve(CarveStrategy::Weighted);
        let children = budget.carve_children(&[1, 3], 100).unwrap();
        assert!(children[1].total >= children[0].total * 2);
    }

    #[test]
    fn carve_priority_doubles_favoured_share() {
        let mut budget = TokenBudget::root(9_000, 2).with_carve(CarveStrategy::Priority(1));
        let children = budget.carve_children(&[1, 1], 100).unwrap();
        assert_eq!(children[1].total, children[0].total * 2);
    }

    #[test]
    fn carve_rejects_depth_overflow() {
        let mut budget = TokenBudget::root(10_000, 0);
        assert!(matches!(
            budget.carve_children(&[1], 100),
            Err(BudgetError::DepthExceeded { .. })
        ));
    }

    #[test]
    fn leaf_children_cannot_delegate() {
        let mut budget = TokenBudget::root(10_000, 1);
        let children = budget.carve_children(&[1], 100).unwrap();
        assert!(!children[0].can_delegate);
    }

    #[test]
    fn governor_admission_boundaries() {
        let governor = Governor::new(TokenBudget::root(5_000, 2), 200, 500, 1_000, 0.25, true, true);
        assert!(governor.can_afford_step(100));
        assert!(governor.can_delegate());
        assert!(governor.can_heal(false));
        assert!(!governor.can_heal(true), "interns never heal");
        // min_heal_reserve = max(1250, 1000) = 1250
        assert_eq!(governor.min_heal_reserve(), 1_250);
    }

    #[test]
    fn exhausted_governor_fails_all_admissions() {
        let mut governor =
            Governor::new(TokenBudget::root(5_000, 2), 200, 500, 1_000, 0.25, true, true);
        governor.charge(5_000);
        assert!(!governor.can_afford_step(1));
        assert!(!governor.can_delegate());
        assert!(!governor.can_heal(false));
    }
}
