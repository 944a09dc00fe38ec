//! Bus message envelope and per-channel payloads.

use chrono::{DateTime, Utc};
use tokio::sync::oneshot;

use super::channel::ChannelKind;
use crate::journal::ErrorEntry;
use crate::memory::Fact;
use crate::types::{ArtifactId, CellId, ErrorId, MessageId, Severity, TraceId};

/// Defect categories a reviewer can raise against an artifact.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DefectKind {
    Gaps,
    UnsupportedClaims,
    Tone,
    Format,
    LowConfidence,
}

/// One defect raised during review.
#[derive(Clone, Debug)]
pub struct Defect {
    pub kind: DefectKind,
    pub note: String,
}

/// Payload carried on a bus channel.
///
/// `Clarify` and `Escalate` carry a oneshot reply handle, which is why bus
/// messages are not `Clone`: the reply path belongs to exactly one
/// recipient.
#[derive(Debug)]
pub enum BusPayload {
    /// Status ping, droppable.
    Progress { phase: String, note: String },
    /// Blocking request for information; the parent answers on `reply`.
    Clarify {
        question: String,
        reply: oneshot::Sender<String>,
    },
    /// Request for intervention; the parent acknowledges on `ack`.
    Escalate {
        reason: String,
        severity: Severity,
        ack: oneshot::Sender<()>,
    },
    /// A high-confidence, surprising fact.
    Insight { fact: Fact },
    /// New focus or constraint from the parent; latest wins.
    Redirect {
        focus: Option<String>,
        note: String,
    },
    /// The child cannot progress.
    Blocked { reason: String },
    /// Defect report during review.
    Feedback {
        artifact_id: Option<ArtifactId>,
        defects: Vec<Defect>,
    },
    /// Lateral fact exchange, mediated by the parent.
    Share { fact: Fact },
    /// "Investigate and fix this error."
    HealRequest { error: Box<ErrorEntry> },
    /// "Fixed, and these cascades were uncovered."
    HealResult {
        error_id: ErrorId,
        fixed: bool,
        cascades: Vec<ErrorId>,
    },
}

impl BusPayload {
    #[must_use]
    pub fn channel(&self) -> ChannelKind {
        match self {
            BusPayload::Progress { .. } => ChannelKind::Progress,
            BusPayload::Clarify { .. } => ChannelKind::Clarify,
            BusPayload::Escalate { .. } => ChannelKind::Escalate,
            BusPayload::Insight { .. } => ChannelKind::Insight,
            BusPayload::Redirect { .. } => ChannelKind::Redirect,
            BusPayload::Blocked { .. } => ChannelKind::Blocked,
            BusPayload::Feedback { .. } => ChannelKind::Feedback,
            BusPayload::Share { .. } => ChannelKind::Share,
            BusPayload::HealRequest { .. } => ChannelKind::HealRequest,
            BusPayload::HealResult { .. } => ChannelKind::HealResult,
        }
    }
}

/// One message on the bus.
#[derive(Debug)]
pub struct BusMessage {
    pub id: MessageId,
    /// Correlates the message with its delegation tree for observers.
    pub trace_id: TraceId,
    pub from: CellId,
    pub to: CellId,
    pub at: DateTime<Utc>,
    pub payload: BusPayload,
}

impl BusMessage {
    #[must_use]
    pub fn new(
        id: MessageId,
        trace_id: TraceId,
        from: CellId,
        to: CellId,
        payload: BusPayload,
    ) -> Self {
        Self {
            id,
            trace_id,
            from,
            to,
            at: Utc::now(),
            payload,
        }
    }

    #[must_use]
    pub fn channel(&self) -> ChannelKind {
        self.payload.channel()
    }
}
