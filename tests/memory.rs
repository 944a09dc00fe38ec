//! Working-memory behaviour: confidence revision, digesting, stagnation
//! signals over realistic step sequences.

use hivecell::config::MonitorConfig;
use hivecell::memory::{Fact, HypothesisState, WorkingMemory};

#[test]
fn confidence_revision_updates_map_and_fact() {
    let mut memory = WorkingMemory::new("focus");
    let id = memory.add_fact(Fact::new("the number is 42", 0.9, "tool"));
    memory.revise_confidence(&id, 0.2);
    assert_eq!(memory.fact_confidence(&id), Some(0.2));
    assert_eq!(memory.facts()[0].confidence, 0.2);
}

#[test]
fn strongest_facts_rank_by_confidence() {
    let mut memory = WorkingMemory::new("focus");
    memory.add_fact(Fact::new("weak", 0.2, "a"));
    memory.add_fact(Fact::new("strong", 0.9, "b"));
    memory.add_fact(Fact::new("middle", 0.5, "c"));
    let ranked = memory.strongest_facts(2);
    assert_eq!(ranked[0].content, "strong");
    assert_eq!(ranked[1].content, "middle");
}

#[test]
fn digest_names_focus_and_top_facts() {
    let mut memory = WorkingMemory::new("compare revenues");
    memory.add_fact(Fact::new("2024 revenue was 150", 0.9, "ledger"));
    let digest = memory.digest(3);
    assert!(digest.contains("compare revenues"));
    assert!(digest.contains("2024 revenue was 150"));
    assert!(digest.contains("ledger"));
}

#[test]
fn a_productive_run_never_reads_as_stagnant() {
    let config = MonitorConfig::default();
    let mut memory = WorkingMemory::new("research the topic");
    for step in 0..10 {
        memory.add_fact(Fact::new(
            format!("distinct finding number {step} about aspect {step}"),
            0.5 + 0.04 * step as f64,
            "tool",
        ));
        memory.note_step(
            &format!("investigate aspect {step}"),
            &format!("found finding {step}"),
        );
        assert!(
            !memory.detect_stagnation(&config),
            "step {step} flagged as stagnant"
        );
    }
}

#[test]
fn a_looping_run_reads_as_stagnant() {
    let config = MonitorConfig::default();
    let mut memory = WorkingMemory::new("research the topic");
    for _ in 0..config.signature_window {
        memory.note_step("retry the fetch", "empty result set");
    }
    assert!(memory.detect_stagnation(&config));
}

#[test]
fn compression_is_a_noop_below_the_threshold() {
    let config = MonitorConfig::default();
    let mut memory = WorkingMemory::new("focus");
    memory.add_fact(Fact::new("weak but young", 0.1, "t"));
    assert_eq!(memory.compress(&config), 0);
    assert_eq!(memory.facts().len(), 1);
}

#[test]
fn supported_hypotheses_survive_compression() {
    let mut config = MonitorConfig::default();
    config.memory_occupancy_threshold = 0;
    config.compression_age_steps = 0;

    let mut memory = WorkingMemory::new("focus");
    memory.add_hypothesis("holds up");
    memory.set_hypothesis_state("holds up", HypothesisState::Supported);
    memory.add_hypothesis("does not");
    memory.set_hypothesis_state("does not", HypothesisState::Refuted);
    memory.add_fact(Fact::new("filler", 0.9, "t"));
    for _ in 0..3 {
        memory.note_step("g", "o");
    }
    memory.compress(&config);
    let statements: Vec<&str> = memory
        .hypotheses()
        .iter()
        .map(|h| h.statement.as_str())
        .collect();
    assert_eq!(statements, vec!["holds up"]);
}

#[test]
fn stderr_accumulates_and_drains_once() {
    use hivecell::envelope::{StderrEntry, StderrKind};
    let mut memory = WorkingMemory::new("focus");
    memory.warn(StderrEntry::new(StderrKind::Stagnation, "looping"));
    memory
        .stderr_mut()
        .fail(StderrEntry::new(StderrKind::ToolFailure, "tool died"));
    let report = memory.take_stderr();
    assert_eq!(report.warnings.len(), 1);
    assert_eq!(report.failures.len(), 1);
    assert!(memory.stderr().is_clean());
}
