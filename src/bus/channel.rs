//! Channel taxonomy and delivery classes.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Typed channels between cells.
///
/// Direction and semantics follow the delegation protocol: children report
/// upward (`Progress`, `Clarify`, `Escalate`, `Blocked`, `HealResult`),
/// parents steer downward (`Redirect`, `Feedback`, `HealRequest`), and
/// lateral exchange (`Insight`, `Share`) is always mediated by the parent.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ChannelKind {
    Progress,
    Clarify,
    Escalate,
    Insight,
    Redirect,
    Blocked,
    Feedback,
    Share,
    HealRequest,
    HealResult,
}

/// How messages on a channel are delivered.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Delivery {
    /// May be dropped under backpressure, oldest first.
    AtMostOnce,
    /// Backpressures the sender instead of dropping.
    ExactlyOnce,
    /// The latest message from a sender replaces its predecessor.
    LatestWins,
}

impl ChannelKind {
    #[must_use]
    pub fn delivery(self) -> Delivery {
        match self {
            ChannelKind::Progress | ChannelKind::Insight | ChannelKind::Share => {
                Delivery::AtMostOnce
            }
            ChannelKind::Clarify
            | ChannelKind::Escalate
            | ChannelKind::Feedback
            | ChannelKind::HealRequest
            | ChannelKind::HealResult
            | ChannelKind::Blocked => Delivery::ExactlyOnce,
            ChannelKind::Redirect => Delivery::LatestWins,
        }
    }

    /// All channels, for mailbox registration and draining.
    pub const ALL: [ChannelKind; 10] = [
        ChannelKind::Progress,
        ChannelKind::Clarify,
        ChannelKind::Escalate,
        ChannelKind::Insight,
        ChannelKind::Redirect,
        ChannelKind::Blocked,
        ChannelKind::Feedback,
        ChannelKind::Share,
        ChannelKind::HealRequest,
        ChannelKind::HealResult,
    ];
}

impl fmt::Display for ChannelKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ChannelKind::Progress => "PROGRESS",
            ChannelKind::Clarify => "CLARIFY",
            ChannelKind::Escalate => "ESCALATE",
            ChannelKind::Insight => "INSIGHT",
            ChannelKind::Redirect => "REDIRECT",
            ChannelKind::Blocked => "BLOCKED",
            ChannelKind::Feedback => "FEEDBACK",
            ChannelKind::Share => "SHARE",
            ChannelKind::HealRequest => "HEAL_REQUEST",
            ChannelKind::HealResult => "HEAL_RESULT",
        };
        write!(f, "{s}")
    }
}
