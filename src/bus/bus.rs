//! The process-wide cell bus and the per-cell endpoint handed to cells.
//!
//! The bus owns every mailbox: cells hold parent references only through
//! their [`BusEndpoint`], never an owning pointer, and on teardown the bus
//! is the unambiguous lifetime owner of pending messages. Sends never block
//! the cell's phase machine beyond the bounded backpressure wait on
//! exactly-once channels.

use std::sync::Arc;
use std::time::Duration;

use miette::Diagnostic;
use parking_lot::Mutex;
use rustc_hash::{FxHashMap, FxHashSet};
use thiserror::Error;
use tokio::sync::oneshot;

use super::channel::{ChannelKind, Delivery};
use super::mailbox::{Mailbox, PushOutcome};
use super::message::{BusMessage, BusPayload, Defect};
use crate::config::BusConfig;
use crate::journal::ErrorEntry;
use crate::memory::Fact;
use crate::types::{ArtifactId, CellId, ErrorId, MessageId, Severity, TraceId};
use crate::utils::id_generator::IdGenerator;

/// Bus faults surfaced to senders.
#[derive(Debug, Error, Diagnostic)]
pub enum BusError {
    #[error("unknown recipient cell: {cell}")]
    #[diagnostic(code(hivecell::bus::unknown_recipient))]
    UnknownRecipient { cell: CellId },

    #[error("backpressure on {channel} to {cell} after {waited_ms} ms")]
    #[diagnostic(
        code(hivecell::bus::backpressure),
        help("Exactly-once channels wait for mailbox space; the recipient is not draining.")
    )]
    Backpressure {
        cell: CellId,
        channel: ChannelKind,
        waited_ms: u64,
    },

    #[error("cell has no parent to address on {channel}")]
    #[diagnostic(code(hivecell::bus::no_parent))]
    NoParent { channel: ChannelKind },
}

/// Result of a successful send.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SendOutcome {
    Delivered,
    /// Delivered, evicting the oldest queued message (lossy channels).
    DroppedOldest,
    /// Delivered, replacing the sender's previous message (REDIRECT).
    Replaced,
}

impl From<PushOutcome> for SendOutcome {
    fn from(outcome: PushOutcome) -> Self {
        match outcome {
            PushOutcome::Delivered => SendOutcome::Delivered,
            PushOutcome::DroppedOldest => SendOutcome::DroppedOldest,
            PushOutcome::Replaced => SendOutcome::Replaced,
        }
    }
}

/// Process-wide message bus between cells.
pub struct CellBus {
    config: BusConfig,
    registered: Mutex<FxHashSet<CellId>>,
    mailboxes: Mutex<FxHashMap<(CellId, ChannelKind), Arc<Mailbox>>>,
}

impl std::fmt::Debug for CellBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CellBus")
            .field("registered", &self.registered.lock().len())
            .finish_non_exhaustive()
    }
}

impl CellBus {
    #[must_use]
    pub fn new(config: BusConfig) -> Self {
        Self {
            config,
            registered: Mutex::new(FxHashSet::default()),
            mailboxes: Mutex::new(FxHashMap::default()),
        }
    }

    /// Register a cell before it can receive.
    pub fn register(&self, cell: &CellId) {
        self.registered.lock().insert(cell.clone());
    }

    /// Remove a cell and discard its pending messages.
    pub fn deregister(&self, cell: &CellId) {
        self.registered.lock().remove(cell);
        self.mailboxes
            .lock()
            .retain(|(owner, _), _| owner != cell);
    }

    #[must_use]
    pub fn is_registered(&self, cell: &CellId) -> bool {
        self.registered.lock().contains(cell)
    }

    fn mailbox(&self, cell: &CellId, channel: ChannelKind) -> Arc<Mailbox> {
        self.mailboxes
            .lock()
            .entry((cell.clone(), channel))
            .or_insert_with(|| Arc::new(Mailbox::new(self.config.mailbox_capacity)))
            .clone()
    }

    /// Deliver a message to its recipient's mailbox.
    ///
    /// Behaviour follows the channel's delivery class; see
    /// [`ChannelKind::delivery`].
    pub async fn send(&self, message: BusMessage) -> Result<SendOutcome, BusError> {
        if !self.is_registered(&message.to) {
            return Err(BusError::UnknownRecipient {
                cell: message.to.clone(),
            });
        }
        let channel = message.channel();
        let mailbox = self.mailbox(&message.to, channel);
        match channel.delivery() {
            Delivery::AtMostOnce => Ok(mailbox.push_lossy(message).into()),
            Delivery::LatestWins => Ok(mailbox.push_latest_wins(message).into()),
            Delivery::ExactlyOnce => {
                let timeout = Duration::from_millis(self.config.backpressure_timeout_ms);
                mailbox
                    .push_reliable(message, timeout)
                    .await
                    .map(SendOutcome::from)
                    .map_err(|rejected| BusError::Backpressure {
                        cell: rejected.to.clone(),
                        channel,
                        waited_ms: self.config.backpressure_timeout_ms,
                    })
            }
        }
    }

    /// Wait for the next message on a channel.
    pub async fn recv(&self, cell: &CellId, channel: ChannelKind) -> BusMessage {
        let mailbox = self.mailbox(cell, channel);
        mailbox.recv().await
    }

    /// Non-blocking receive.
    pub fn try_recv(&self, cell: &CellId, channel: ChannelKind) -> Option<BusMessage> {
        self.mailbox(cell, channel).try_pop()
    }

    /// Drain everything queued on a channel.
    pub fn drain(&self, cell: &CellId, channel: ChannelKind) -> Vec<BusMessage> {
        self.mailbox(cell, channel).drain()
    }

    /// Drain all channels of a cell, in channel-table order.
    pub fn drain_all(&self, cell: &CellId) -> Vec<BusMessage> {
        ChannelKind::ALL
            .iter()
            .flat_map(|channel| self.drain(cell, *channel))
            .collect()
    }
}

/// A cell's handle onto the bus.
///
/// Carries the cell's identity, its parent (if any), and the trace id every
/// outgoing message is stamped with.
#[derive(Clone)]
pub struct BusEndpoint {
    bus: Arc<CellBus>,
    cell_id: CellId,
    parent: Option<CellId>,
    trace_id: TraceId,
    ids: Arc<IdGenerator>,
}

impl std::fmt::Debug for BusEndpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BusEndpoint")
            .field("cell_id", &self.cell_id)
            .field("parent", &self.parent)
            .finish_non_exhaustive()
    }
}

impl BusEndpoint {
    #[must_use]
    pub fn new(
        bus: Arc<CellBus>,
        cell_id: CellId,
        parent: Option<CellId>,
        trace_id: TraceId,
        ids: Arc<IdGenerator>,
    ) -> Self {
        Self {
            bus,
            cell_id,
            parent,
            trace_id,
            ids,
        }
    }

    #[must_use]
    pub fn cell_id(&self) -> &CellId {
        &self.cell_id
    }

    #[must_use]
    pub fn parent(&self) -> Option<&CellId> {
        self.parent.as_ref()
    }

    #[must_use]
    pub fn trace_id(&self) -> &TraceId {
        &self.trace_id
    }

    #[must_use]
    pub fn bus(&self) -> &Arc<CellBus> {
        &self.bus
    }

    fn message(&self, to: CellId, payload: BusPayload) -> BusMessage {
        BusMessage::new(
            MessageId::new(self.ids.next_id("msg")),
            self.trace_id.clone(),
            self.cell_id.clone(),
            to,
            payload,
        )
    }

    fn parent_or_err(&self, channel: ChannelKind) -> Result<CellId, BusError> {
        self.parent
            .clone()
            .ok_or(BusError::NoParent { channel })
    }

    /// Send any payload to an explicit recipient.
    pub async fn send_to(
        &self,
        to: &CellId,
        payload: BusPayload,
    ) -> Result<SendOutcome, BusError> {
        self.bus.send(self.message(to.clone(), payload)).await
    }

    // ------------------------------------------------------------------
    // Child -> parent
    // ------------------------------------------------------------------

    /// Droppable status ping to the parent; a no-op for the root cell.
    pub async fn progress(
        &self,
        phase: impl Into<String>,
        note: impl Into<String>,
    ) -> Result<SendOutcome, BusError> {
        let Some(parent) = self.parent.clone() else {
            return Ok(SendOutcome::Delivered);
        };
        self.send_to(
            &parent,
            BusPayload::Progress {
                phase: phase.into(),
                note: note.into(),
            },
        )
        .await
        .or(Ok(SendOutcome::DroppedOldest))
    }

    /// Blocking request for information. Returns the receiver the parent's
    /// answer arrives on.
    pub async fn clarify(
        &self,
        question: impl Into<String>,
    ) -> Result<oneshot::Receiver<String>, BusError> {
        let parent = self.parent_or_err(ChannelKind::Clarify)?;
        let (reply_tx, reply_rx) = oneshot::channel();
        self.send_to(
            &parent,
            BusPayload::Clarify {
                question: question.into(),
                reply: reply_tx,
            },
        )
        .await?;
        Ok(reply_rx)
    }

    /// Request intervention. Returns the receiver the acknowledgement
    /// arrives on.
    pub async fn escalate(
        &self,
        reason: impl Into<String>,
        severity: Severity,
    ) -> Result<oneshot::Receiver<()>, BusError> {
        let parent = self.parent_or_err(ChannelKind::Escalate)?;
        let (ack_tx, ack_rx) = oneshot::channel();
        self.send_to(
            &parent,
            BusPayload::Escalate {
                reason: reason.into(),
                severity,
                ack: ack_tx,
            },
        )
        .await?;
        Ok(ack_rx)
    }

    /// Surface a high-confidence, surprising fact to the parent.
    pub async fn insight(&self, fact: Fact) -> Result<SendOutcome, BusError> {
        let parent = self.parent_or_err(ChannelKind::Insight)?;
        self.send_to(&parent, BusPayload::Insight { fact }).await
    }

    /// Lateral fact exchange; the parent mediates the fan-out.
    pub async fn share(&self, fact: Fact) -> Result<SendOutcome, BusError> {
        let parent = self.parent_or_err(ChannelKind::Share)?;
        self.send_to(&parent, BusPayload::Share { fact }).await
    }

    pub async fn blocked(&self, reason: impl Into<String>) -> Result<SendOutcome, BusError> {
        let parent = self.parent_or_err(ChannelKind::Blocked)?;
        self.send_to(
            &parent,
            BusPayload::Blocked {
                reason: reason.into(),
            },
        )
        .await
    }

    pub async fn heal_result(
        &self,
        error_id: ErrorId,
        fixed: bool,
        cascades: Vec<ErrorId>,
    ) -> Result<SendOutcome, BusError> {
        let parent = self.parent_or_err(ChannelKind::HealResult)?;
        self.send_to(
            &parent,
            BusPayload::HealResult {
                error_id,
                fixed,
                cascades,
            },
        )
        .await
    }

    // ------------------------------------------------------------------
    // Parent -> child
    // ------------------------------------------------------------------

    /// Point a child at a new focus or constraint. Latest wins.
    pub async fn redirect(
        &self,
        child: &CellId,
        focus: Option<String>,
        note: impl Into<String>,
    ) -> Result<SendOutcome, BusError> {
        self.send_to(
            child,
            BusPayload::Redirect {
                focus,
                note: note.into(),
            },
        )
        .await
    }

    /// Deliver a review defect report to a child.
    pub async fn feedback(
        &self,
        child: &CellId,
        artifact_id: Option<ArtifactId>,
        defects: Vec<Defect>,
    ) -> Result<SendOutcome, BusError> {
        self.send_to(
            child,
            BusPayload::Feedback {
                artifact_id,
                defects,
            },
        )
        .await
    }

    /// Ask a child (or, when enabled by config, a peer) to investigate and
    /// fix an error.
    pub async fn heal_request(
        &self,
        to: &CellId,
        error: ErrorEntry,
    ) -> Result<SendOutcome, BusError> {
        self.send_to(
            to,
            BusPayload::HealRequest {
                error: Box::new(error),
            },
        )
        .await
    }

    // ------------------------------------------------------------------
    // Receiving
    // ------------------------------------------------------------------

    pub async fn recv(&self, channel: ChannelKind) -> BusMessage {
        self.bus.recv(&self.cell_id, channel).await
    }

    pub fn try_recv(&self, channel: ChannelKind) -> Option<BusMessage> {
        self.bus.try_recv(&self.cell_id, channel)
    }

    pub fn drain(&self, channel: ChannelKind) -> Vec<BusMessage> {
        self.bus.drain(&self.cell_id, channel)
    }
}
