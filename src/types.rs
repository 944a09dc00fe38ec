//! Core types for the hivecell kernel.
//!
//! This module defines the fundamental vocabulary used throughout the
//! system: identifiers, the corporate rank ladder, cell identity, and the
//! small closed enums that parameterise a cell's behaviour (intent, urgency,
//! quality, complexity, processing mode).
//!
//! For runtime configuration knobs see [`crate::config`]; for the I/O
//! contract between cells see [`crate::envelope`].
//!
//! # Examples
//!
//! ```rust
//! use hivecell::types::{CellLevel, QualityLevel};
//!
//! // Ranks order from Board (highest) down to Intern.
//! assert!(CellLevel::Manager.outranks(CellLevel::Staff));
//! assert_eq!(CellLevel::Ceo.next_lower(), Some(CellLevel::Vp));
//!
//! // Quality levels carry their confidence floor.
//! assert!(QualityLevel::Publication.confidence_floor() > QualityLevel::Draft.confidence_floor());
//! ```

use serde::{Deserialize, Serialize};
use std::fmt;

macro_rules! string_id {
    ($(#[$doc:meta])* $name:ident) => {
        $(#[$doc])*
        #[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Default)]
        #[serde(transparent)]
        pub struct $name(pub String);

        impl $name {
            #[must_use]
            pub fn new(id: impl Into<String>) -> Self {
                Self(id.into())
            }

            #[must_use]
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl From<&str> for $name {
            fn from(s: &str) -> Self {
                Self(s.to_string())
            }
        }

        impl From<String> for $name {
            fn from(s: String) -> Self {
                Self(s)
            }
        }
    };
}

string_id! {
    /// Identifier of one cell instance.
    CellId
}
string_id! {
    /// Identifier correlating every event, message, and envelope of one
    /// delegation tree. Observers join on this.
    TraceId
}
string_id! {
    /// Identifier of a task or subtask.
    TaskId
}
string_id! {
    /// Identifier of an artifact inside a work package.
    ArtifactId
}
string_id! {
    /// Identifier of an error-journal entry.
    ErrorId
}
string_id! {
    /// Identifier of a bus message.
    MessageId
}
string_id! {
    /// Identifier of a fact held in working memory.
    FactId
}

/// Corporate rank of a cell.
///
/// Higher ranks delegate; lower ranks execute tools. The ordering is
/// explicit rather than derived so that `outranks` reads the way the org
/// chart does.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CellLevel {
    Board,
    Ceo,
    Vp,
    Director,
    Manager,
    SeniorStaff,
    Staff,
    Intern,
}

impl CellLevel {
    /// Seniority as a number, Board highest.
    #[must_use]
    pub fn seniority(self) -> u8 {
        match self {
            CellLevel::Board => 7,
            CellLevel::Ceo => 6,
            CellLevel::Vp => 5,
            CellLevel::Director => 4,
            CellLevel::Manager => 3,
            CellLevel::SeniorStaff => 2,
            CellLevel::Staff => 1,
            CellLevel::Intern => 0,
        }
    }

    #[must_use]
    pub fn outranks(self, other: CellLevel) -> bool {
        self.seniority() > other.seniority()
    }

    /// The next rank down the ladder, if any.
    #[must_use]
    pub fn next_lower(self) -> Option<CellLevel> {
        match self {
            CellLevel::Board => Some(CellLevel::Ceo),
            CellLevel::Ceo => Some(CellLevel::Vp),
            CellLevel::Vp => Some(CellLevel::Director),
            CellLevel::Director => Some(CellLevel::Manager),
            CellLevel::Manager => Some(CellLevel::SeniorStaff),
            CellLevel::SeniorStaff => Some(CellLevel::Staff),
            CellLevel::Staff => Some(CellLevel::Intern),
            CellLevel::Intern => None,
        }
    }

    /// Whether cells of this rank run the healing loop at manager cadence.
    #[must_use]
    pub fn is_manager_or_above(self) -> bool {
        self.seniority() >= CellLevel::Manager.seniority()
    }

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            CellLevel::Board => "board",
            CellLevel::Ceo => "ceo",
            CellLevel::Vp => "vp",
            CellLevel::Director => "director",
            CellLevel::Manager => "manager",
            CellLevel::SeniorStaff => "senior-staff",
            CellLevel::Staff => "staff",
            CellLevel::Intern => "intern",
        }
    }
}

impl fmt::Display for CellLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Identity of one cell: who it is, where it sits, what it works on.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CellIdentity {
    pub cell_id: CellId,
    pub level: CellLevel,
    /// Role name resolved against the role directory.
    pub role: String,
    /// Domain the cell is scoped to (e.g. "finance").
    pub domain: String,
}

/// What kind of work the instruction asks for.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Intent {
    Research,
    Analyse,
    Synthesise,
    Decide,
    Execute,
}

/// How urgently the caller wants the result.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum Urgency {
    Low,
    #[default]
    Normal,
    High,
    Critical,
}

/// Quality bar the output must clear.
///
/// Each level implies a confidence floor; artifacts below the floor force a
/// `low_confidence` warning on stderr.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum QualityLevel {
    Draft,
    #[default]
    Standard,
    Executive,
    Publication,
}

impl QualityLevel {
    /// Minimum artifact confidence this quality level accepts.
    #[must_use]
    pub fn confidence_floor(self) -> f64 {
        match self {
            QualityLevel::Draft => 0.3,
            QualityLevel::Standard => 0.5,
            QualityLevel::Executive => 0.7,
            QualityLevel::Publication => 0.85,
        }
    }
}

/// Assessed complexity of a task.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Complexity {
    Trivial,
    Simple,
    Moderate,
    Complex,
    Extreme,
}

impl Complexity {
    /// Relative weight used by the weighted budget-carving strategy.
    #[must_use]
    pub fn weight(self) -> u32 {
        match self {
            Complexity::Trivial => 1,
            Complexity::Simple => 2,
            Complexity::Moderate => 4,
            Complexity::Complex => 8,
            Complexity::Extreme => 12,
        }
    }
}

/// How the cell processes its envelope, chosen during Assess.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProcessingMode {
    /// Single generation, no tools.
    Direct,
    /// Run the execute loop with tools, no children.
    Solo,
    /// One level of child cells.
    Delegate,
    /// Multi-level delegation.
    Hierarchy,
    /// Output had detected errors; run the healing loop.
    Heal,
}

/// Severity of a journalled error.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

/// States of the per-cell lifecycle machine.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CellState {
    Spawned,
    Intaking,
    Assessing,
    Planning,
    Executing,
    Monitoring,
    Healing,
    Reviewing,
    Packaging,
    Terminated,
}

impl fmt::Display for CellState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            CellState::Spawned => "spawned",
            CellState::Intaking => "intaking",
            CellState::Assessing => "assessing",
            CellState::Planning => "planning",
            CellState::Executing => "executing",
            CellState::Monitoring => "monitoring",
            CellState::Healing => "healing",
            CellState::Reviewing => "reviewing",
            CellState::Packaging => "packaging",
            CellState::Terminated => "terminated",
        };
        write!(f, "{s}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ladder_descends_to_intern() {
        let mut level = CellLevel::Board;
        let mut hops = 0;
        while let Some(next) = level.next_lower() {
            assert!(level.outranks(next));
            level = next;
            hops += 1;
        }
        assert_eq!(level, CellLevel::Intern);
        assert_eq!(hops, 7);
    }

    #[test]
    fn quality_floors_are_monotonic() {
        let levels = [
            QualityLevel::Draft,
            QualityLevel::Standard,
            QualityLevel::Executive,
            QualityLevel::Publication,
        ];
        for pair in levels.windows(2) {
            assert!(pair[0].confidence_floor() < pair[1].confidence_floor());
        }
    }

    #[test]
    fn level_serde_uses_kebab_case() {
        let json = serde_json::to_string(&CellLevel::SeniorStaff).unwrap();
        assert_eq!(json, "\"senior-staff\"");
        let back: CellLevel = serde_json::from_str(&json).unwrap();
        assert_eq!(back, CellLevel::SeniorStaff);
    }
}
