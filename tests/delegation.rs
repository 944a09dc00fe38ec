//! Delegation protocol end-to-end: phased spawning over a dependency DAG,
//! review acceptance, cross-branch contradiction handling.

mod common;

use std::sync::Arc;
use std::time::Duration;

use common::*;
use hivecell::artifact::ArtifactKind;
use hivecell::config::KernelConfig;
use hivecell::envelope::{Envelope, Instruction, StderrKind};
use hivecell::trace::TraceEvent;
use hivecell::types::Intent;

const REVENUE_SUBTASKS: &str = r#"[
  {"id": "fetch-2023", "description": "Fetch the 2023 revenue of Example Corp",
   "domain": "finance", "estimated_complexity": "trivial",
   "expected_output": "evidence", "assigned_role": "researcher"},
  {"id": "fetch-2024", "description": "Fetch the 2024 revenue of Example Corp",
   "domain": "finance", "estimated_complexity": "trivial",
   "expected_output": "evidence", "assigned_role": "researcher"},
  {"id": "compare", "description": "Compare the fetched revenues into one table",
   "domain": "finance", "depends_on": ["fetch-2023", "fetch-2024"],
   "estimated_complexity": "simple", "expected_output": "comparison dataset",
   "assigned_role": "analyst"},
  {"id": "project-2025", "description": "Project the 2025 revenue of Example Corp",
   "domain": "finance", "depends_on": ["fetch-2023", "fetch-2024"],
   "estimated_complexity": "simple", "expected_output": "2025 projection recommendation",
   "assigned_role": "analyst"}
]"#;

fn revenue_inference() -> Arc<SeededInference> {
    let inference = Arc::new(SeededInference::seeded(4));
    inference.rule("Partition this task", REVENUE_SUBTASKS);
    inference.rule("Break this task", "no structured plan available");
    inference.rule(
        "Step goal: Fetch the 2023",
        "Example Corp 2023 revenue was 120",
    );
    inference.rule(
        "Step goal: Fetch the 2024",
        "Example Corp 2024 revenue was 150",
    );
    inference.rule(
        "Step goal: Compare the fetched",
        "Comparison table: year 2023 at 120 versus year 2024 at 150, growth rate 25",
    );
    inference.rule(
        "Step goal: Project the 2025",
        "Projection recommendation: plan for 2025 revenue near 187",
    );
    inference
}

fn revenue_envelope() -> Envelope {
    let mut envelope = Envelope::request(
        Instruction::new(
            "Compare 2023 vs 2024 revenues of Example Corp and project 2025.",
            Intent::Analyse,
        ),
        60_000,
    );
    envelope.constraints.max_delegation_depth = 3;
    envelope.context.domain_hints = vec!["finance".to_string()];
    envelope
}

/// Scenario: two fetch children in the first phase, dependent analysis in
/// the second, dataset + recommendation artifacts in the final package.
#[tokio::test]
async fn delegation_with_dependency_produces_dataset_and_recommendation() {
    let inference = revenue_inference();
    let collaborators = collaborators(
        inference,
        Arc::new(ScriptedToolHost::new(vec![ScriptedToolHost::search_tool()])),
        Arc::new(StaticKnowledge::empty()),
        Arc::new(MemoryVault::new()),
    );
    let (runtime, sink) = traced_runtime(KernelConfig::default(), collaborators);

    let reply = runtime.process(revenue_envelope()).await;
    tokio::time::sleep(Duration::from_millis(50)).await;

    assert!(
        !reply.stderr.has_failures(),
        "unexpected failures: {:?}",
        reply.stderr.failures
    );
    let package = reply
        .stdout
        .as_ref()
        .and_then(|stdout| stdout.work_package.as_ref())
        .expect("work package present");

    let kinds: Vec<ArtifactKind> = package.artifacts.iter().map(|a| a.kind).collect();
    assert!(kinds.contains(&ArtifactKind::Dataset), "kinds: {kinds:?}");
    assert!(
        kinds.contains(&ArtifactKind::Recommendation),
        "kinds: {kinds:?}"
    );
    assert!(
        package.overall_confidence >= 0.6,
        "overall {}",
        package.overall_confidence
    );
    assert!(package.is_causally_ordered());

    // Phase-two artifacts are causally derived from phase-one output.
    let recommendation = package
        .artifacts
        .iter()
        .find(|a| a.kind == ArtifactKind::Recommendation)
        .unwrap();
    assert!(
        !recommendation.derived_from.is_empty(),
        "projection declares its inputs"
    );

    // Spawn order follows the phases: root, two researchers, two analysts.
    let spawns: Vec<String> = sink
        .events()
        .iter()
        .filter_map(|event| match event {
            TraceEvent::CellSpawned { role, .. } => Some(role.clone()),
            _ => None,
        })
        .collect();
    assert_eq!(spawns.len(), 5, "spawns: {spawns:?}");
    assert_eq!(spawns[1], "researcher");
    assert_eq!(spawns[2], "researcher");
    assert_eq!(spawns[3], "analyst");
    assert_eq!(spawns[4], "analyst");
}

const AUDIT_SUBTASKS: &str = r#"[
  {"id": "audit-a", "description": "Report the Example Corp 2024 revenue from ledger A",
   "domain": "finance", "estimated_complexity": "simple",
   "expected_output": "evidence", "assigned_role": "researcher"},
  {"id": "audit-b", "description": "Report the Example Corp 2024 revenue from ledger B",
   "domain": "finance", "estimated_complexity": "simple",
   "expected_output": "evidence", "assigned_role": "researcher"}
]"#;

/// Scenario: two branches report contradictory numbers with equal
/// confidence; both survive as competing hypotheses, a contradiction
/// warning is raised, and overall confidence is capped at 0.5.
#[tokio::test]
async fn contradictory_branches_become_competing_hypotheses() {
    let inference = Arc::new(SeededInference::seeded(6));
    inference.rule("Partition this task", AUDIT_SUBTASKS);
    inference.rule("Break this task", "no structured plan available");
    inference.rule(
        "Step goal: Report the Example Corp 2024 revenue from ledger A",
        "Example Corp 2024 revenue is 14.5",
    );
    inference.rule(
        "Step goal: Report the Example Corp 2024 revenue from ledger B",
        "Example Corp 2024 revenue is 16.1",
    );
    let collaborators = collaborators(
        inference,
        Arc::new(ScriptedToolHost::new(vec![ScriptedToolHost::search_tool()])),
        Arc::new(StaticKnowledge::empty()),
        Arc::new(MemoryVault::new()),
    );
    let (runtime, _sink) = traced_runtime(KernelConfig::default(), collaborators);

    let mut envelope = Envelope::request(
        Instruction::new(
            "Compare ledger A versus ledger B 2024 revenue of Example Corp and reconcile the difference.",
            Intent::Analyse,
        ),
        40_000,
    );
    envelope.constraints.max_delegation_depth = 2;
    envelope.context.domain_hints = vec!["finance".to_string()];

    let reply = runtime.process(envelope).await;

    assert!(
        reply
            .stderr
            .warnings
            .iter()
            .any(|warning| warning.kind == StderrKind::Contradiction),
        "warnings: {:?}",
        reply.stderr.warnings
    );

    let package = reply
        .stdout
        .as_ref()
        .and_then(|stdout| stdout.work_package.as_ref())
        .expect("work package present");
    assert!(
        package.overall_confidence <= 0.5,
        "overall {}",
        package.overall_confidence
    );
    let competing = package
        .artifacts
        .iter()
        .find(|artifact| artifact.title.starts_with("competing hypotheses"))
        .expect("competing hypotheses artifact");
    assert!(competing.content.contains("14.5"));
    assert!(competing.content.contains("16.1"));
}

/// An unusable decomposition falls back to solo execution instead of
/// failing the cell.
#[tokio::test]
async fn cyclic_decomposition_falls_back_to_solo() {
    let inference = Arc::new(SeededInference::seeded(8));
    inference.rule(
        "Partition this task",
        r#"[{"id": "a", "description": "first half", "depends_on": ["b"]},
            {"id": "b", "description": "second half", "depends_on": ["a"]}]"#,
    );
    let collaborators = collaborators(
        inference,
        Arc::new(ScriptedToolHost::new(vec![ScriptedToolHost::search_tool()])),
        Arc::new(StaticKnowledge::empty()),
        Arc::new(MemoryVault::new()),
    );
    let (runtime, sink) = traced_runtime(KernelConfig::default(), collaborators);

    let reply = runtime.process(revenue_envelope()).await;
    tokio::time::sleep(Duration::from_millis(50)).await;

    assert!(reply.stdout.is_some());
    let spawned = sink
        .events()
        .iter()
        .filter(|event| matches!(event, TraceEvent::CellSpawned { .. }))
        .count();
    assert_eq!(spawned, 1, "no children for a cyclic decomposition");
}
