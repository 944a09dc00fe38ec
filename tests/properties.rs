//! Property tests for the quantified invariants: budget conservation,
//! journal monotonicity, causal artifact order, healing termination, and
//! envelope round-trips.

use proptest::prelude::*;

use hivecell::artifact::{Artifact, ArtifactKind, WorkPackage, overall_confidence};
use hivecell::budget::{CarveStrategy, TokenBudget};
use hivecell::config::HealingConfig;
use hivecell::cycle::SubTask;
use hivecell::envelope::{Envelope, Instruction};
use hivecell::heal::{ConvergenceDetector, HealProgress};
use hivecell::journal::{ErrorEntry, ErrorJournal, ErrorSource, ErrorStatus};
use hivecell::types::{ArtifactId, Complexity, ErrorId, Intent, Severity, TaskId};

fn status_rank(status: ErrorStatus) -> u8 {
    match status {
        ErrorStatus::Detected => 0,
        ErrorStatus::Diagnosing => 1,
        ErrorStatus::Fixing => 2,
        ErrorStatus::Fixed | ErrorStatus::WontFix | ErrorStatus::Cascaded => 3,
    }
}

fn any_status() -> impl Strategy<Value = ErrorStatus> {
    prop_oneof![
        Just(ErrorStatus::Detected),
        Just(ErrorStatus::Diagnosing),
        Just(ErrorStatus::Fixing),
        Just(ErrorStatus::Fixed),
        Just(ErrorStatus::WontFix),
        Just(ErrorStatus::Cascaded),
    ]
}

proptest! {
    /// Invariant 1: carving conserves tokens and honours the 10% reserve.
    #[test]
    fn carve_conserves_tokens(
        total in 10_000u64..5_000_000,
        weights in prop::collection::vec(1u32..12, 1..8),
        strategy_pick in 0usize..3,
    ) {
        let strategy = match strategy_pick {
            0 => CarveStrategy::Equal,
            1 => CarveStrategy::Weighted,
            _ => CarveStrategy::Priority(weights.len() - 1),
        };
        let mut parent = TokenBudget::root(total, 4).with_carve(strategy);
        let before = parent.remaining;
        let children = parent.carve_children(&weights, 1).unwrap();
        let handed: u64 = children.iter().map(|child| child.total).sum();

        prop_assert_eq!(handed + parent.remaining, before);
        prop_assert!(handed as f64 <= before as f64 * 0.9 + 1.0);
        for child in &children {
            prop_assert_eq!(child.depth, 1);
            prop_assert_eq!(child.remaining, child.total);
        }
    }

    /// Invariant 2: journal status ranks never regress, apart from the
    /// fixed <-> cascaded flip.
    #[test]
    fn journal_status_is_monotonic(
        transitions in prop::collection::vec((0usize..4, any_status()), 1..40),
    ) {
        let mut journal = ErrorJournal::new();
        let ids: Vec<ErrorId> = (0..4)
            .map(|n| {
                journal.record(ErrorEntry::new(
                    ErrorId::new(format!("e{n}")),
                    ErrorSource::Runtime,
                    "t",
                    "m",
                    Severity::Medium,
                ))
            })
            .collect();

        for (pick, target) in transitions {
            let id = &ids[pick];
            let before = journal.get(id).unwrap().status;
            if let Ok(after) = journal.transition(id, target) {
                let flip = (before == ErrorStatus::Fixed && after == ErrorStatus::Cascaded)
                    || (before == ErrorStatus::Cascaded && after == ErrorStatus::Fixed);
                prop_assert!(
                    status_rank(after) >= status_rank(before) || flip,
                    "{before:?} -> {after:?}"
                );
                if before == ErrorStatus::WontFix {
                    prop_assert_eq!(after, ErrorStatus::WontFix);
                }
            }
        }
    }

    /// Invariant 3: packages built in push order with backward-only
    /// derivations are always causally ordered.
    #[test]
    fn backward_derivations_stay_causally_ordered(
        count in 1usize..12,
        edges in prop::collection::vec((1usize..12, 0usize..11), 0..20),
    ) {
        let mut package = WorkPackage::new("p");
        for n in 0..count {
            let mut artifact = Artifact::new(
                ArtifactId::new(format!("a{n}")),
                ArtifactKind::Report,
                format!("artifact {n}"),
                "body",
                0.8,
            );
            artifact.derived_from = edges
                .iter()
                .filter(|(to, from)| *to == n && from < to)
                .map(|(_, from)| ArtifactId::new(format!("a{from}")))
                .collect();
            package.push_artifact(artifact);
        }
        prop_assert!(package.is_causally_ordered());
    }

    /// Overall confidence stays inside [0, 1] and never exceeds the
    /// weakest artifact.
    #[test]
    fn overall_confidence_bounds(
        shapes in prop::collection::vec((0.0f64..=1.0, 1usize..400), 1..12),
    ) {
        let artifacts: Vec<Artifact> = shapes
            .iter()
            .enumerate()
            .map(|(n, (confidence, size))| {
                Artifact::new(
                    ArtifactId::new(format!("a{n}")),
                    ArtifactKind::Report,
                    "t",
                    "x".repeat(*size),
                    *confidence,
                )
            })
            .collect();
        let overall = overall_confidence(&artifacts);
        let min = artifacts
            .iter()
            .map(|artifact| artifact.confidence)
            .fold(f64::MAX, f64::min);
        prop_assert!((0.0..=1.0).contains(&overall));
        prop_assert!(overall <= min + 1e-9);
    }

    /// Invariant 7: the convergence detector stops within its iteration
    /// allowance on any finite progress sequence.
    #[test]
    fn healing_always_terminates(
        max_iterations in 1u32..6,
        deltas in prop::collection::vec((0usize..4, 0usize..4), 0..64),
    ) {
        let detector =
            ConvergenceDetector::new(&HealingConfig::default(), max_iterations, 100);
        let mut unresolved = 3usize;
        let mut iteration = 0u32;
        let mut resolved_last = 0usize;
        let mut open_at_last_start = unresolved;
        let mut deltas = deltas.into_iter();
        loop {
            let decision = detector.should_continue(HealProgress {
                iteration,
                unresolved_now: unresolved,
                resolved_last,
                open_at_last_start,
                cascade_depth: 0,
                budget_remaining: 10_000,
            });
            if !decision.proceed {
                break;
            }
            let (resolved, discovered) = deltas.next().unwrap_or((unresolved.min(1), 0));
            open_at_last_start = unresolved;
            resolved_last = resolved.min(unresolved);
            unresolved = unresolved - resolved_last + discovered;
            iteration += 1;
            prop_assert!(iteration <= max_iterations + 1);
        }
        prop_assert!(iteration <= max_iterations);
    }

    /// Invariant 6: envelopes survive the JSON round trip bit-for-bit.
    #[test]
    fn envelope_round_trip(
        text in "[a-zA-Z0-9 ,.]{1,60}",
        goal in "[a-zA-Z0-9 ]{0,30}",
        budget in 1u64..10_000_000,
        depth in 0u32..6,
    ) {
        prop_assume!(!text.trim().is_empty());
        let mut envelope = Envelope::request(Instruction::new(text, Intent::Research), budget);
        envelope.constraints.max_delegation_depth = depth;
        envelope.context.organisational_goal = goal;
        let back = Envelope::from_json(&envelope.to_json().unwrap()).unwrap();
        prop_assert_eq!(envelope, back);
    }

    /// Subtask layering respects every dependency edge.
    #[test]
    fn phase_layers_respect_dependencies(
        count in 1usize..8,
        edges in prop::collection::vec((1usize..8, 0usize..7), 0..16),
    ) {
        let tasks: Vec<SubTask> = (0..count)
            .map(|n| SubTask {
                id: TaskId::new(format!("t{n}")),
                description: format!("task {n}"),
                domain: String::new(),
                required_tools: vec![],
                depends_on: edges
                    .iter()
                    .filter(|(to, from)| *to == n && from < to)
                    .map(|(_, from)| TaskId::new(format!("t{from}")))
                    .collect(),
                estimated_complexity: Complexity::Simple,
                expected_output: String::new(),
                assigned_role: String::new(),
            })
            .collect();
        let layers = hivecell::cycle::plan::phases(&tasks, 16).unwrap();

        let layer_of = |id: &TaskId| -> usize {
            layers
                .iter()
                .position(|layer| layer.iter().any(|task| &task.id == id))
                .unwrap()
        };
        for task in &tasks {
            for dep in &task.depends_on {
                prop_assert!(layer_of(dep) < layer_of(&task.id));
            }
        }
    }
}
