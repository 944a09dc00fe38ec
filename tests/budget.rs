//! Budget and governor invariants.

use hivecell::budget::{BudgetError, CarveStrategy, Governor, TokenBudget};

fn governor(budget: TokenBudget) -> Governor {
    Governor::new(budget, 200, 500, 1_000, 0.25, true, true)
}

#[test]
fn carved_children_never_exceed_the_parent_pool() {
    for strategy in [
        CarveStrategy::Equal,
        CarveStrategy::Weighted,
        CarveStrategy::Priority(0),
    ] {
        let mut parent = TokenBudget::root(50_000, 3).with_carve(strategy);
        let before = parent.remaining;
        let children = parent.carve_children(&[1, 2, 4, 8], 500).unwrap();
        let handed: u64 = children.iter().map(|child| child.total).sum();
        assert!(
            handed + parent.remaining == before,
            "tokens neither created nor destroyed ({strategy:?})"
        );
        assert!(
            handed as f64 <= before as f64 * 0.9 + 1.0,
            "parent reserve of 10% respected ({strategy:?})"
        );
    }
}

#[test]
fn child_depth_increments_and_bounds() {
    let mut parent = TokenBudget::root(50_000, 2);
    let mut children = parent.carve_children(&[1], 500).unwrap();
    assert_eq!(children[0].depth, 1);
    assert!(children[0].can_delegate);

    let mut grandchildren = children[0].carve_children(&[1], 500).unwrap();
    assert_eq!(grandchildren[0].depth, 2);
    assert!(!grandchildren[0].can_delegate);
    assert!(matches!(
        grandchildren[0].carve_children(&[1], 500),
        Err(BudgetError::DepthExceeded { .. })
    ));
}

#[test]
fn zero_remaining_fails_every_admission() {
    let mut g = governor(TokenBudget::root(10_000, 2));
    g.charge(10_000);
    assert_eq!(g.remaining(), 0);
    assert!(!g.can_afford_step(0), "safety floor still applies");
    assert!(!g.can_delegate());
    assert!(!g.can_heal(false));
}

#[test]
fn max_depth_zero_disables_delegation() {
    let g = governor(TokenBudget::root(10_000, 0));
    assert!(!g.can_delegate());
}

#[test]
fn authority_veto_disables_delegation() {
    let g = Governor::new(TokenBudget::root(10_000, 3), 200, 500, 1_000, 0.25, true, false);
    assert!(!g.can_delegate());
}

#[test]
fn heal_reserve_takes_the_larger_of_ratio_and_floor() {
    let small = governor(TokenBudget::root(2_000, 1));
    assert_eq!(small.min_heal_reserve(), 1_000, "floor wins on small budgets");
    let large = governor(TokenBudget::root(100_000, 1));
    assert_eq!(large.min_heal_reserve(), 25_000, "ratio wins on large budgets");
}

#[test]
fn charging_saturates_at_zero() {
    let mut budget = TokenBudget::root(100, 1);
    budget.charge(250);
    assert_eq!(budget.remaining, 0);
    assert!(budget.is_exhausted());
    assert_eq!(budget.used(), 100);
}

#[test]
fn priority_carve_favours_the_marked_child() {
    let mut parent = TokenBudget::root(30_000, 2).with_carve(CarveStrategy::Priority(2));
    let children = parent.carve_children(&[1, 1, 1], 500).unwrap();
    assert_eq!(children[2].total, children[0].total * 2);
    assert_eq!(children[0].total, children[1].total);
}
