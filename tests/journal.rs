//! Error-journal state machine and cascade graph behaviour.

use hivecell::journal::{ErrorEntry, ErrorJournal, ErrorSource, ErrorStatus, FixAttempt, FixResult};
use hivecell::types::{ErrorId, Severity};

fn entry(id: &str, severity: Severity) -> ErrorEntry {
    ErrorEntry::new(
        ErrorId::from(id),
        ErrorSource::ToolFailure,
        "schema_mismatch",
        format!("error {id}"),
        severity,
    )
}

#[test]
fn no_entry_is_fixed_while_cascade_children_are_detected() {
    let mut journal = ErrorJournal::new();
    let parent = journal.record(entry("parent", Severity::High));
    let child = journal.record(entry("child", Severity::Medium));
    journal.link_cascade(&parent, &child).unwrap();

    // Attempting the fixed transition lands as cascaded instead.
    let landed = journal.transition(&parent, ErrorStatus::Fixed).unwrap();
    assert_eq!(landed, ErrorStatus::Cascaded);
    assert_ne!(journal.get(&parent).unwrap().status, ErrorStatus::Fixed);

    // Child resolution releases the parent.
    journal.transition(&child, ErrorStatus::Fixed).unwrap();
    assert_eq!(journal.get(&parent).unwrap().status, ErrorStatus::Fixed);
}

#[test]
fn chained_cascades_release_transitively() {
    let mut journal = ErrorJournal::new();
    let a = journal.record(entry("a", Severity::High));
    let b = journal.record(entry("b", Severity::Medium));
    let c = journal.record(entry("c", Severity::Low));
    journal.link_cascade(&a, &b).unwrap();
    journal.link_cascade(&b, &c).unwrap();

    assert_eq!(
        journal.transition(&a, ErrorStatus::Fixed).unwrap(),
        ErrorStatus::Cascaded
    );
    assert_eq!(
        journal.transition(&b, ErrorStatus::Fixed).unwrap(),
        ErrorStatus::Cascaded
    );
    journal.transition(&c, ErrorStatus::Fixed).unwrap();

    assert_eq!(journal.get(&a).unwrap().status, ErrorStatus::Fixed);
    assert_eq!(journal.get(&b).unwrap().status, ErrorStatus::Fixed);
    assert_eq!(journal.max_cascade_depth(), 2);
}

#[test]
fn linking_a_cascade_demotes_an_already_fixed_parent() {
    let mut journal = ErrorJournal::new();
    let parent = journal.record(entry("parent", Severity::Medium));
    journal.transition(&parent, ErrorStatus::Fixed).unwrap();

    let late = journal.record(entry("late", Severity::Medium));
    journal.link_cascade(&parent, &late).unwrap();
    assert_eq!(journal.get(&parent).unwrap().status, ErrorStatus::Cascaded);
}

#[test]
fn attempts_accumulate_in_order() {
    let mut journal = ErrorJournal::new();
    let id = journal.record(entry("e", Severity::Medium));
    for n in 1..=3 {
        journal
            .record_attempt(
                &id,
                FixAttempt {
                    n,
                    strategy: format!("attempt {n}"),
                    result: if n == 3 {
                        FixResult::Success
                    } else {
                        FixResult::Failed
                    },
                    discovered_error_ids: vec![],
                    tokens_consumed: 10 * u64::from(n),
                    at: chrono::Utc::now(),
                },
            )
            .unwrap();
    }
    let attempts = &journal.get(&id).unwrap().attempts;
    assert_eq!(attempts.len(), 3);
    assert_eq!(attempts[2].result, FixResult::Success);
}

#[test]
fn unknown_ids_are_rejected() {
    let mut journal = ErrorJournal::new();
    assert!(
        journal
            .transition(&ErrorId::from("ghost"), ErrorStatus::Fixed)
            .is_err()
    );
    assert!(
        journal
            .link_cascade(&ErrorId::from("ghost"), &ErrorId::from("other"))
            .is_err()
    );
}

#[test]
fn journal_serialises_with_its_cascades() {
    let mut journal = ErrorJournal::new();
    let a = journal.record(entry("a", Severity::High));
    let b = journal.record(entry("b", Severity::Low));
    journal.link_cascade(&a, &b).unwrap();

    let json = serde_json::to_string(&journal).unwrap();
    let back: ErrorJournal = serde_json::from_str(&json).unwrap();
    assert_eq!(back.len(), 2);
    assert_eq!(back.cascade_children(&a), &[b]);
}
