//! Assess: classify complexity and choose a processing mode.
//!
//! The classifier is deterministic and cheap: instruction length and
//! structure, distinct domain hints, comparative/temporal/numeric
//! operators, and the prior-findings gap. The resulting complexity maps to
//! a mode, degraded to what the governor and authority actually permit.

use super::CellCtx;
use crate::envelope::{Instruction, TaskContext};
use crate::types::{Complexity, ProcessingMode};

/// Markers of comparative, temporal, or numeric structure in a request.
const OPERATOR_MARKERS: [&str; 14] = [
    "compare", "versus", " vs", "difference", "trend", "project", "forecast", "before",
    "after", "between", "growth", "change", "rank", "per cent",
];

/// Classify an instruction into the five-point complexity scale.
#[must_use]
pub fn classify(instruction: &Instruction, context: &TaskContext) -> Complexity {
    let text = instruction.text.to_lowercase();
    let words = text.split_whitespace().count();

    let mut score = 0u32;

    // (a) length and structure
    score += match words {
        0..=8 => 0,
        9..=20 => 1,
        21..=60 => 2,
        _ => 3,
    };
    let clauses = text
        .matches(|c| c == ';' || c == ',')
        .count()
        .min(3) as u32;
    score += clauses.min(2);

    // (b) distinct domain hints
    score += match context.domain_hints.len() {
        0 => 0,
        1 => 1,
        _ => 2,
    };

    // (c) comparative/temporal/numeric operators
    let operators = OPERATOR_MARKERS
        .iter()
        .filter(|marker| text.contains(*marker))
        .count() as u32;
    let numbers = text
        .split_whitespace()
        .filter(|w| w.chars().any(|c| c.is_ascii_digit()))
        .count() as u32;
    score += operators.min(3) + numbers.min(2);

    // (d) prior-findings gap: work already done shrinks the task.
    score = score.saturating_sub((context.prior_findings.len() as u32).min(2));

    match score {
        0..=1 => Complexity::Trivial,
        2..=3 => Complexity::Simple,
        4..=6 => Complexity::Moderate,
        7..=9 => Complexity::Complex,
        _ => Complexity::Extreme,
    }
}

/// Map complexity to a processing mode.
#[must_use]
pub fn mode_for(complexity: Complexity) -> ProcessingMode {
    match complexity {
        Complexity::Trivial => ProcessingMode::Direct,
        Complexity::Simple => ProcessingMode::Solo,
        Complexity::Moderate => ProcessingMode::Delegate,
        Complexity::Complex | Complexity::Extreme => ProcessingMode::Hierarchy,
    }
}

/// Run the Assess phase: set complexity and mode on the context.
///
/// Modes degrade to what is actually permitted: delegation modes fall back
/// to solo when the governor or authority forbids spawning, and a journal
/// that already holds unresolved errors forces heal mode.
pub fn run(ctx: &mut CellCtx) {
    ctx.complexity = classify(&ctx.envelope.instruction, &ctx.envelope.context);
    let mut mode = mode_for(ctx.complexity);

    if matches!(mode, ProcessingMode::Delegate | ProcessingMode::Hierarchy)
        && !ctx.governor.can_delegate()
    {
        mode = ProcessingMode::Solo;
    }
    if ctx.memory.journal().unresolved_count() > 0 {
        mode = ProcessingMode::Heal;
    }
    ctx.mode = mode;
    ctx.memory.add_decision(
        format!("mode {:?} for complexity {:?}", ctx.mode, ctx.complexity),
        "assessment of instruction structure, hints, and operators",
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Intent;

    fn instruction(text: &str) -> Instruction {
        Instruction::new(text, Intent::Research)
    }

    #[test]
    fn short_definition_is_trivial() {
        let complexity = classify(
            &instruction("Define the term 'photosynthesis'."),
            &TaskContext::default(),
        );
        assert_eq!(complexity, Complexity::Trivial);
    }

    #[test]
    fn comparative_numeric_request_is_at_least_moderate() {
        let context = TaskContext {
            domain_hints: vec!["finance".into()],
            ..TaskContext::default()
        };
        let complexity = classify(
            &instruction("Compare 2023 vs 2024 revenues of Example Corp and project 2025."),
            &context,
        );
        assert!(complexity >= Complexity::Moderate, "got {complexity:?}");
    }

    #[test]
    fn prior_findings_shrink_complexity() {
        let text = "Compare 2023 vs 2024 revenues of Example Corp and project 2025.";
        let bare = classify(&instruction(text), &TaskContext::default());
        let informed = classify(
            &instruction(text),
            &TaskContext {
                prior_findings: vec!["2023 revenue: 1.2M".into(), "2024 revenue: 1.4M".into()],
                ..TaskContext::default()
            },
        );
        assert!(informed < bare);
    }

    #[test]
    fn mode_mapping_matches_scale() {
        assert_eq!(mode_for(Complexity::Trivial), ProcessingMode::Direct);
        assert_eq!(mode_for(Complexity::Simple), ProcessingMode::Solo);
        assert_eq!(mode_for(Complexity::Moderate), ProcessingMode::Delegate);
        assert_eq!(mode_for(Complexity::Complex), ProcessingMode::Hierarchy);
        assert_eq!(mode_for(Complexity::Extreme), ProcessingMode::Hierarchy);
    }
}
