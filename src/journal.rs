//! The per-cell error journal.
//!
//! An append-only record of everything that went wrong inside one cell and
//! what was done about it. Entries move through a small status machine:
//!
//! ```text
//! detected -> diagnosing -> fixing -> fixed | wont_fix
//!     \__________________________________/^
//!      (shortcut: detected -> fixed / wont_fix)
//! ```
//!
//! Transitions are monotonic apart from the shortcut, with one exception: a
//! `fixed` entry whose cascade children are still unresolved flips to
//! `cascaded`, and flips back once they resolve. The journal also holds the
//! cascade causality graph (`error -> errors its fix uncovered`).

use chrono::{DateTime, Utc};
use miette::Diagnostic;
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::types::{ErrorId, Severity};

/// Where an error originated.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorSource {
    ToolFailure,
    QualityGate,
    DelegationFailure,
    Validation,
    Runtime,
}

/// Remediation status of a journal entry.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorStatus {
    Detected,
    Diagnosing,
    Fixing,
    Fixed,
    WontFix,
    Cascaded,
}

impl ErrorStatus {
    fn rank(self) -> u8 {
        match self {
            ErrorStatus::Detected => 0,
            ErrorStatus::Diagnosing => 1,
            ErrorStatus::Fixing => 2,
            ErrorStatus::Fixed | ErrorStatus::WontFix | ErrorStatus::Cascaded => 3,
        }
    }

    /// Whether remediation work on this entry is still outstanding.
    #[must_use]
    pub fn is_unresolved(self) -> bool {
        matches!(
            self,
            ErrorStatus::Detected | ErrorStatus::Diagnosing | ErrorStatus::Fixing
        )
    }
}

/// Outcome of one fix attempt.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FixResult {
    Success,
    Partial,
    Failed,
    Cascaded,
}

/// One remediation attempt recorded against an entry.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct FixAttempt {
    pub n: u32,
    pub strategy: String,
    pub result: FixResult,
    #[serde(default)]
    pub discovered_error_ids: Vec<ErrorId>,
    pub tokens_consumed: u64,
    pub at: DateTime<Utc>,
}

/// One journalled error.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ErrorEntry {
    pub id: ErrorId,
    pub at: DateTime<Utc>,
    pub source: ErrorSource,
    /// Machine-matchable type within the source, e.g. `schema_mismatch`.
    pub error_type: String,
    pub message: String,
    #[serde(default)]
    pub context: Value,
    pub severity: Severity,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub root_cause: Option<String>,
    #[serde(default)]
    pub related_errors: Vec<ErrorId>,
    #[serde(default)]
    pub attempts: Vec<FixAttempt>,
    pub status: ErrorStatus,
}

impl ErrorEntry {
    #[must_use]
    pub fn new(
        id: ErrorId,
        source: ErrorSource,
        error_type: impl Into<String>,
        message: impl Into<String>,
        severity: Severity,
    ) -> Self {
        Self {
            id,
            at: Utc::now(),
            source,
            error_type: error_type.into(),
            message: message.into(),
            context: Value::Null,
            severity,
            root_cause: None,
            related_errors: Vec::new(),
            attempts: Vec::new(),
            status: ErrorStatus::Detected,
        }
    }

    #[must_use]
    pub fn with_context(mut self, context: Value) -> Self {
        self.context = context;
        self
    }

    #[must_use]
    pub fn related_to(mut self, parent: ErrorId) -> Self {
        self.related_errors.push(parent);
        self
    }
}

/// Rejected journal operations.
#[derive(Debug, Error, Diagnostic)]
pub enum JournalError {
    #[error("unknown error id: {id}")]
    #[diagnostic(code(hivecell::journal::unknown_id))]
    UnknownId { id: ErrorId },

    #[error("illegal status transition {from:?} -> {to:?} on {id}")]
    #[diagnostic(
        code(hivecell::journal::illegal_transition),
        help("Status only moves forward; the lone backward edge is cascaded -> fixed.")
    )]
    IllegalTransition {
        id: ErrorId,
        from: ErrorStatus,
        to: ErrorStatus,
    },

    #[error("cascade link would create a self-cycle on {id}")]
    #[diagnostic(code(hivecell::journal::cascade_cycle))]
    CascadeCycle { id: ErrorId },
}

/// Append-only error log with a cascade causality graph.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct ErrorJournal {
    entries: Vec<ErrorEntry>,
    /// `error -> errors discovered while fixing it`.
    cascades: FxHashMap<ErrorId, Vec<ErrorId>>,
}

impl ErrorJournal {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a new entry; its id must be unique within the journal.
    pub fn record(&mut self, entry: ErrorEntry) -> ErrorId {
        let id = entry.id.clone();
        self.entries.push(entry);
        id
    }

    #[must_use]
    pub fn get(&self, id: &ErrorId) -> Option<&ErrorEntry> {
        self.entries.iter().find(|e| &e.id == id)
    }

    fn get_mut(&mut self, id: &ErrorId) -> Option<&mut ErrorEntry> {
        self.entries.iter_mut().find(|e| &e.id == id)
    }

    #[must_use]
    pub fn entries(&self) -> &[ErrorEntry] {
        &self.entries
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Entries whose remediation is still outstanding.
    #[must_use]
    pub fn unresolved(&self) -> Vec<&ErrorEntry> {
        self.entries
            .iter()
            .filter(|e| e.status.is_unresolved())
            .collect()
    }

    #[must_use]
    pub fn unresolved_count(&self) -> usize {
        self.entries
            .iter()
            .filter(|e| e.status.is_unresolved())
            .count()
    }

    /// Move an entry through the status machine.
    ///
    /// Enforces monotonicity, the `detected -> fixed | wont_fix` shortcut,
    /// and the `fixed <-> cascaded` flip. A transition to `fixed` lands as
    /// `cascaded` instead when the entry still has unresolved cascade
    /// children.
    pub fn transition(&mut self, id: &ErrorId, to: ErrorStatus) -> Result<ErrorStatus, JournalError> {
        let from = self
            .get(id)
            .ok_or_else(|| JournalError::UnknownId { id: id.clone() })?
            .status;

        let legal = match (from, to) {
            _ if from == to => true,
            // Forward moves.
            _ if to.rank() > from.rank() && from != ErrorStatus::WontFix => true,
            // fixed <-> cascaded flip, both directions.
            (ErrorStatus::Fixed, ErrorStatus::Cascaded)
            | (ErrorStatus::Cascaded, ErrorStatus::Fixed) => true,
            _ => false,
        };
        if !legal {
            return Err(JournalError::IllegalTransition {
                id: id.clone(),
                from,
                to,
            });
        }

        let landed = if to == ErrorStatus::Fixed && self.has_unresolved_cascades(id) {
            ErrorStatus::Cascaded
        } else {
            to
        };
        if let Some(entry) = self.get_mut(id) {
            entry.status = landed;
        }
        if landed == ErrorStatus::Fixed || landed == ErrorStatus::WontFix {
            self.reconcile_cascade_parents(id);
        }
        Ok(landed)
    }

    /// Record a fix attempt against an entry.
    pub fn record_attempt(&mut self, id: &ErrorId, attempt: FixAttempt) -> Result<(), JournalError> {
        let entry = self
            .get_mut(id)
            .ok_or_else(|| JournalError::UnknownId { id: id.clone() })?;
        entry.attempts.push(attempt);
        Ok(())
    }

    pub fn set_root_cause(&mut self, id: &ErrorId, cause: impl Into<String>) -> Result<(), JournalError> {
        let entry = self
            .get_mut(id)
            .ok_or_else(|| JournalError::UnknownId { id: id.clone() })?;
        entry.root_cause = Some(cause.into());
        Ok(())
    }

    /// Link a cascade child discovered while fixing `parent`.
    ///
    /// A parent already marked `fixed` flips to `cascaded` until the child
    /// resolves.
    pub fn link_cascade(&mut self, parent: &ErrorId, child: &ErrorId) -> Result<(), JournalError> {
        if parent == child {
            return Err(JournalError::CascadeCycle { id: parent.clone() });
        }
        if self.get(parent).is_none() {
            return Err(JournalError::UnknownId { id: parent.clone() });
        }
        if self.get(child).is_none() {
            return Err(JournalError::UnknownId { id: child.clone() });
        }
        let children = self.cascades.entry(parent.clone()).or_default();
        if !children.contains(child) {
            children.push(child.clone());
        }
        if self.get(parent).map(|e| e.status) == Some(ErrorStatus::Fixed)
            && self.has_unresolved_cascades(parent)
            && let Some(entry) = self.get_mut(parent)
        {
            entry.status = ErrorStatus::Cascaded;
        }
        Ok(())
    }

    /// Cascade children of an entry, in discovery order.
    #[must_use]
    pub fn cascade_children(&self, id: &ErrorId) -> &[ErrorId] {
        self.cascades.get(id).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Longest chain length in the cascade graph, 0 for a cascade-free
    /// journal. The graph is acyclic by construction (children are always
    /// freshly recorded entries), so plain DFS depth is enough.
    #[must_use]
    pub fn max_cascade_depth(&self) -> u32 {
        fn depth(journal: &ErrorJournal, id: &ErrorId) -> u32 {
            journal
                .cascade_children(id)
                .iter()
                .map(|child| 1 + depth(journal, child))
                .max()
                .unwrap_or(0)
        }
        self.entries
            .iter()
            .map(|e| depth(self, &e.id))
            .max()
            .unwrap_or(0)
    }

    fn has_unresolved_cascades(&self, id: &ErrorId) -> bool {
        self.cascade_children(id).iter().any(|child| {
            self.get(child)
                .is_some_and(|e| e.status.is_unresolved() || e.status == ErrorStatus::Cascaded)
        })
    }

    /// After `resolved_child` settles, flip any `cascaded` parent whose
    /// children are now all resolved back to `fixed`.
    fn reconcile_cascade_parents(&mut self, resolved_child: &ErrorId) {
        let parents: Vec<ErrorId> = self
            .cascades
            .iter()
            .filter(|(_, children)| children.contains(resolved_child))
            .map(|(parent, _)| parent.clone())
            .collect();
        for parent in parents {
            if self.get(&parent).map(|e| e.status) == Some(ErrorStatus::Cascaded)
                && !self.has_unresolved_cascades(&parent)
            {
                if let Some(entry) = self.get_mut(&parent) {
                    entry.status = ErrorStatus::Fixed;
                }
                // A parent flipping to fixed may itself unblock its own
                // parents.
                self.reconcile_cascade_parents(&parent);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(id: &str) -> ErrorEntry {
        ErrorEntry::new(
            ErrorId::from(id),
            ErrorSource::ToolFailure,
            "schema_mismatch",
            "tool rejected arguments",
            Severity::Medium,
        )
    }

    #[test]
    fn forward_transitions_are_legal() {
        let mut journal = ErrorJournal::new();
        let id = journal.record(entry("e1"));
        journal.transition(&id, ErrorStatus::Diagnosing).unwrap();
        journal.transition(&id, ErrorStatus::Fixing).unwrap();
        let landed = journal.transition(&id, ErrorStatus::Fixed).unwrap();
        assert_eq!(landed, ErrorStatus::Fixed);
    }

    #[test]
    fn shortcut_detected_to_fixed() {
        let mut journal = ErrorJournal::new();
        let id = journal.record(entry("e1"));
        assert_eq!(
            journal.transition(&id, ErrorStatus::Fixed).unwrap(),
            ErrorStatus::Fixed
        );
    }

    #[test]
    fn backward_transition_is_rejected() {
        let mut journal = ErrorJournal::new();
        let id = journal.record(entry("e1"));
        journal.transition(&id, ErrorStatus::Fixing).unwrap();
        assert!(matches!(
            journal.transition(&id, ErrorStatus::Detected),
            Err(JournalError::IllegalTransition { .. })
        ));
    }

    #[test]
    fn wont_fix_is_terminal() {
        let mut journal = ErrorJournal::new();
        let id = journal.record(entry("e1"));
        journal.transition(&id, ErrorStatus::WontFix).unwrap();
        assert!(journal.transition(&id, ErrorStatus::Fixed).is_err());
    }

    #[test]
    fn fixed_with_open_cascade_lands_as_cascaded() {
        let mut journal = ErrorJournal::new();
        let parent = journal.record(entry("parent"));
        let child = journal.record(entry("child"));
        journal.link_cascade(&parent, &child).unwrap();

        let landed = journal.transition(&parent, ErrorStatus::Fixed).unwrap();
        assert_eq!(landed, ErrorStatus::Cascaded);

        // Resolving the child flips the parent back to fixed.
        journal.transition(&child, ErrorStatus::Fixed).unwrap();
        assert_eq!(
            journal.get(&parent).unwrap().status,
            ErrorStatus::Fixed
        );
    }

    #[test]
    fn cascade_depth_counts_chains() {
        let mut journal = ErrorJournal::new();
        let a = journal.record(entry("a"));
        let b = journal.record(entry("b"));
        let c = journal.record(entry("c"));
        journal.link_cascade(&a, &b).unwrap();
        journal.link_cascade(&b, &c).unwrap();
        assert_eq!(journal.max_cascade_depth(), 2);
    }

    #[test]
    fn unresolved_tracks_open_entries() {
        let mut journal = ErrorJournal::new();
        let a = journal.record(entry("a"));
        let _b = journal.record(entry("b"));
        assert_eq!(journal.unresolved_count(), 2);
        journal.transition(&a, ErrorStatus::WontFix).unwrap();
        assert_eq!(journal.unresolved_count(), 1);
    }
}
