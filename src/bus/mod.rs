//! Typed inter-cell messaging.
//!
//! The module is organised around the process-wide [`CellBus`] (a registry
//! of bounded per-(cell, channel) mailboxes) and the [`BusEndpoint`] handed
//! to each cell at spawn. Channels carry typed payloads with per-channel
//! delivery semantics: lossy status traffic drops oldest under load,
//! exactly-once control traffic backpressures the sender, and REDIRECT is
//! latest-wins.

pub mod bus;
pub mod channel;
pub mod mailbox;
pub mod message;

pub use bus::{BusEndpoint, BusError, CellBus, SendOutcome};
pub use channel::{ChannelKind, Delivery};
pub use mailbox::{Mailbox, PushOutcome};
pub use message::{BusMessage, BusPayload, Defect, DefectKind};
