//! The seven-phase cognitive cycle.
//!
//! Every cell runs the same loop — Perceive (Intake) → Frame (Assess) →
//! Plan → Execute ⇄ Monitor → Heal → Package — parameterised by its rank.
//! Phases run strictly in order and communicate through the shared
//! [`CellCtx`]; loop exits are typed outcomes, never errors.
//!
//! The phases here cover the solo path (intake, assess, plan, execute,
//! monitor, package). Delegation and healing need runtime services (child
//! spawning, cancellation scopes) and are driven from
//! [`crate::runtime`], reusing the planning and packaging phases below.

pub mod assess;
pub mod execute;
pub mod intake;
pub mod monitor;
pub mod package;
pub mod plan;

use std::sync::Arc;

use miette::Diagnostic;
use thiserror::Error;
use tokio::sync::watch;
use tokio::time::Instant;

use crate::artifact::Artifact;
use crate::budget::Governor;
use crate::collaborators::{CollaboratorError, Collaborators, ToolSpec};
use crate::config::KernelConfig;
use crate::envelope::{Envelope, EnvelopeError};
use crate::memory::WorkingMemory;
use crate::roles::RoleDirectory;
use crate::trace::TraceEmitter;
use crate::types::{CellIdentity, Complexity, ProcessingMode};
use crate::utils::id_generator::IdGenerator;

pub use plan::{Step, StepPlan, SubTask};

/// Verdict the monitor returns after every step.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum MonitorVerdict {
    Continue,
    /// Go back to Plan with memory preserved.
    Replan { why: String },
    /// Budget is about to run out; cut straight to Package.
    CutToPackage,
    TerminateSuccess,
    TerminateFailure { reason: String },
}

/// How the execute loop ended.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ExecuteOutcome {
    /// All steps done, success criteria satisfied.
    Completed,
    /// Budget or deadline forced an early cutover; partial facts stand.
    Partial { why: String },
    /// The monitor gave up on the plan.
    Failed { reason: String },
}

/// Fatal conditions that abort a cell without a normal package.
#[derive(Debug, Error, Diagnostic)]
pub enum CellAbort {
    #[error("invalid envelope: {0}")]
    #[diagnostic(code(hivecell::cycle::invalid_envelope))]
    InvalidEnvelope(#[from] EnvelopeError),

    #[error("tool host persistently unreachable: {0}")]
    #[diagnostic(code(hivecell::cycle::tool_host_unreachable))]
    ToolHostUnreachable(String),

    #[error("cancelled")]
    #[diagnostic(code(hivecell::cycle::cancelled))]
    Cancelled,
}

impl CellAbort {
    #[must_use]
    pub fn from_collaborator(error: &CollaboratorError) -> Option<CellAbort> {
        match error {
            CollaboratorError::Unavailable { service, message } if *service == "tool_host" => {
                Some(CellAbort::ToolHostUnreachable(message.clone()))
            }
            _ => None,
        }
    }
}

/// Mutable state threaded through one cell's phases.
///
/// Working memory, the governor, and the plan are private to the cell; the
/// collaborator bundle and config are shared handles.
pub struct CellCtx {
    pub identity: CellIdentity,
    pub envelope: Envelope,
    pub memory: WorkingMemory,
    pub governor: Governor,
    pub collaborators: Collaborators,
    pub endpoint: crate::bus::BusEndpoint,
    pub config: Arc<KernelConfig>,
    pub roles: Arc<RoleDirectory>,
    pub trace: TraceEmitter,
    pub ids: Arc<IdGenerator>,
    pub cancel: watch::Receiver<bool>,
    pub started: Instant,

    /// Set by Assess.
    pub complexity: Complexity,
    /// Set by Assess.
    pub mode: ProcessingMode,
    /// Set by Plan (solo path).
    pub plan: StepPlan,
    /// Replans granted so far.
    pub replans: u32,
    /// Artifacts accumulated before Package assembles the work package.
    pub artifacts: Vec<Artifact>,
    /// Tool catalogue fetched during Intake, already filtered by authority.
    pub catalogue: Vec<ToolSpec>,
}

impl CellCtx {
    #[must_use]
    pub fn cancelled(&self) -> bool {
        *self.cancel.borrow()
    }

    /// Domain the cell operates in (first hint or the identity's domain).
    #[must_use]
    pub fn domain(&self) -> &str {
        self.envelope
            .context
            .domain_hints
            .first()
            .map(String::as_str)
            .unwrap_or(&self.identity.domain)
    }

    /// System prompt for this cell's role and focus.
    #[must_use]
    pub fn system_prompt(&self) -> String {
        self.roles
            .resolve(&self.identity.role)
            .system_prompt(self.memory.focus(), self.domain())
    }
}
