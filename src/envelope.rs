//! The universal I/O envelope: the only contract across cell boundaries.
//!
//! Every cell receives one [`Envelope`], runs one cognitive cycle, and emits
//! exactly one reply envelope. Producers must fully populate the required
//! fields; consumers reject anything that fails [`Envelope::validate`] with
//! an `invalid_envelope` failure and no side effect.
//!
//! The canonical external form is JSON with `envelope_version = "1"`;
//! serialisation round-trips all fields exactly.
//!
//! # Examples
//!
//! ```rust
//! use hivecell::envelope::{Envelope, Instruction};
//! use hivecell::types::Intent;
//!
//! let envelope = Envelope::request(
//!     Instruction::new("Define the term 'photosynthesis'.", Intent::Research),
//!     5_000,
//! );
//! assert!(envelope.validate().is_ok());
//!
//! let json = serde_json::to_string(&envelope).unwrap();
//! let back: Envelope = serde_json::from_str(&json).unwrap();
//! assert_eq!(envelope, back);
//! ```

use miette::Diagnostic;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::artifact::WorkPackage;
use crate::types::{CellId, Intent, QualityLevel, TaskId, TraceId, Urgency};

/// Wire version accepted by this runtime.
pub const ENVELOPE_VERSION: &str = "1";

/// The natural-language request and its shape.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Instruction {
    pub text: String,
    pub intent: Intent,
    #[serde(default)]
    pub urgency: Urgency,
}

impl Instruction {
    #[must_use]
    pub fn new(text: impl Into<String>, intent: Intent) -> Self {
        Self {
            text: text.into(),
            intent,
            urgency: Urgency::Normal,
        }
    }

    #[must_use]
    pub fn with_urgency(mut self, urgency: Urgency) -> Self {
        self.urgency = urgency;
        self
    }
}

/// Where the task sits in the wider effort.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct TaskContext {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_task_id: Option<TaskId>,
    #[serde(default)]
    pub organisational_goal: String,
    #[serde(default)]
    pub domain_hints: Vec<String>,
    #[serde(default)]
    pub prior_findings: Vec<String>,
}

/// Hard limits the cell must respect.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Constraints {
    pub token_budget: u64,
    #[serde(default)]
    pub quality_level: QualityLevel,
    #[serde(default)]
    pub max_delegation_depth: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deadline_ms: Option<u64>,
}

impl Default for Constraints {
    fn default() -> Self {
        Self {
            token_budget: 10_000,
            quality_level: QualityLevel::Standard,
            max_delegation_depth: 2,
            deadline_ms: None,
        }
    }
}

/// What the cell is allowed to do.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Authority {
    pub can_delegate: bool,
    /// Tool names the cell may invoke; `"*"` grants everything.
    #[serde(default)]
    pub tool_access: Vec<String>,
}

impl Default for Authority {
    fn default() -> Self {
        Self {
            can_delegate: true,
            tool_access: vec!["*".to_string()],
        }
    }
}

impl Authority {
    #[must_use]
    pub fn allows_tool(&self, name: &str) -> bool {
        self.tool_access
            .iter()
            .any(|granted| granted == "*" || granted == name)
    }

    #[must_use]
    pub fn has_any_tools(&self) -> bool {
        !self.tool_access.is_empty()
    }
}

/// Rendering format of the primary output.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum OutputFormat {
    #[default]
    Report,
    Dataset,
    Recommendation,
    Code,
    Brief,
}

/// The primary output channel.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize, Default)]
pub struct StdoutPayload {
    #[serde(default)]
    pub format: OutputFormat,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub work_package: Option<WorkPackage>,
    #[serde(default)]
    pub content: String,
    #[serde(default)]
    pub summary: String,
}

impl StdoutPayload {
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.work_package
            .as_ref()
            .is_none_or(|wp| wp.artifacts.is_empty())
            && self.content.is_empty()
    }
}

/// Closed set of warning/failure kinds carried on stderr.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StderrKind {
    InvalidEnvelope,
    LowConfidence,
    Contradiction,
    BusBackpressure,
    BudgetExhausted,
    Cancelled,
    NoToolsAvailable,
    ToolFailure,
    QualityGate,
    DelegationFailure,
    Validation,
    Runtime,
    Stagnation,
    Drift,
    HealExhausted,
    DeadlineExceeded,
    ReviewUnresolved,
}

/// One stderr record: a warning, failure, or escalation.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct StderrEntry {
    #[serde(rename = "type")]
    pub kind: StderrKind,
    pub message: String,
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub context: Value,
}

impl StderrEntry {
    #[must_use]
    pub fn new(kind: StderrKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            context: Value::Null,
        }
    }

    #[must_use]
    pub fn with_context(mut self, context: Value) -> Self {
        self.context = context;
        self
    }
}

/// Out-of-band channel for warnings, failures, and escalations.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize, Default)]
pub struct StderrReport {
    #[serde(default)]
    pub warnings: Vec<StderrEntry>,
    #[serde(default)]
    pub failures: Vec<StderrEntry>,
    #[serde(default)]
    pub escalations: Vec<StderrEntry>,
}

impl StderrReport {
    pub fn warn(&mut self, entry: StderrEntry) {
        self.warnings.push(entry);
    }

    pub fn fail(&mut self, entry: StderrEntry) {
        self.failures.push(entry);
    }

    pub fn escalate(&mut self, entry: StderrEntry) {
        self.escalations.push(entry);
    }

    #[must_use]
    pub fn is_clean(&self) -> bool {
        self.warnings.is_empty() && self.failures.is_empty() && self.escalations.is_empty()
    }

    #[must_use]
    pub fn has_failures(&self) -> bool {
        !self.failures.is_empty()
    }

    /// Fold another report into this one, preserving order.
    pub fn absorb(&mut self, other: StderrReport) {
        self.warnings.extend(other.warnings);
        self.failures.extend(other.failures);
        self.escalations.extend(other.escalations);
    }
}

/// Trace metadata stamped on reply envelopes.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize, Default)]
pub struct EnvelopeMetadata {
    pub trace_id: TraceId,
    pub cell_id: CellId,
    pub tokens_used: u64,
    pub duration_ms: u64,
    pub confidence: f64,
}

/// The universal I/O container between cells and between the kernel and its
/// callers.
///
/// A request envelope carries instruction/context/constraints/authority; the
/// reply additionally carries `stdout`, `stderr`, and `metadata`. An empty
/// `stdout` alongside a failure entry is a valid terminal envelope.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    pub envelope_version: String,
    pub instruction: Instruction,
    #[serde(default)]
    pub context: TaskContext,
    #[serde(default)]
    pub constraints: Constraints,
    #[serde(default)]
    pub authority: Authority,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stdout: Option<StdoutPayload>,
    #[serde(default)]
    pub stderr: StderrReport,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<EnvelopeMetadata>,
}

/// Why an envelope was rejected at the boundary.
#[derive(Debug, Error, Diagnostic)]
pub enum EnvelopeError {
    #[error("unsupported envelope version: {found:?}")]
    #[diagnostic(
        code(hivecell::envelope::version),
        help("This runtime speaks envelope_version \"1\".")
    )]
    UnsupportedVersion { found: String },

    #[error("instruction text is empty")]
    #[diagnostic(code(hivecell::envelope::empty_instruction))]
    EmptyInstruction,

    #[error("token budget must be positive")]
    #[diagnostic(code(hivecell::envelope::zero_budget))]
    ZeroBudget,

    #[error("confidence {value} outside [0, 1] on {field}")]
    #[diagnostic(code(hivecell::envelope::confidence_range))]
    ConfidenceOutOfRange { field: &'static str, value: f64 },

    #[error("artifact stream violates declared causal order")]
    #[diagnostic(
        code(hivecell::envelope::causal_order),
        help("Every derived_from id must reference an earlier artifact.")
    )]
    CausalOrderViolated,

    #[error("envelope is not valid JSON: {0}")]
    #[diagnostic(code(hivecell::envelope::json))]
    Json(#[from] serde_json::Error),
}

impl Envelope {
    /// Build a request envelope with defaults for everything but the
    /// instruction and budget.
    #[must_use]
    pub fn request(instruction: Instruction, token_budget: u64) -> Self {
        Self {
            envelope_version: ENVELOPE_VERSION.to_string(),
            instruction,
            context: TaskContext::default(),
            constraints: Constraints {
                token_budget,
                ..Constraints::default()
            },
            authority: Authority::default(),
            stdout: None,
            stderr: StderrReport::default(),
            metadata: None,
        }
    }

    /// Start a reply envelope that echoes this request's header fields.
    #[must_use]
    pub fn reply(&self) -> Envelope {
        Envelope {
            envelope_version: ENVELOPE_VERSION.to_string(),
            instruction: self.instruction.clone(),
            context: self.context.clone(),
            constraints: self.constraints.clone(),
            authority: self.authority.clone(),
            stdout: Some(StdoutPayload::default()),
            stderr: StderrReport::default(),
            metadata: None,
        }
    }

    /// Schema validation at the cell boundary.
    ///
    /// Checks version, instruction, budget, and — when output is present —
    /// confidence ranges and artifact causal order.
    pub fn validate(&self) -> Result<(), EnvelopeError> {
        if self.envelope_version != ENVELOPE_VERSION {
            return Err(EnvelopeError::UnsupportedVersion {
                found: self.envelope_version.clone(),
            });
        }
        if self.instruction.text.trim().is_empty() {
            return Err(EnvelopeError::EmptyInstruction);
        }
        if self.constraints.token_budget == 0 {
            return Err(EnvelopeError::ZeroBudget);
        }
        if let Some(stdout) = &self.stdout
            && let Some(package) = &stdout.work_package
        {
            if !(0.0..=1.0).contains(&package.overall_confidence) {
                return Err(EnvelopeError::ConfidenceOutOfRange {
                    field: "work_package.overall_confidence",
                    value: package.overall_confidence,
                });
            }
            for artifact in &package.artifacts {
                if !(0.0..=1.0).contains(&artifact.confidence) {
                    return Err(EnvelopeError::ConfidenceOutOfRange {
                        field: "artifact.confidence",
                        value: artifact.confidence,
                    });
                }
            }
            if !package.is_causally_ordered() {
                return Err(EnvelopeError::CausalOrderViolated);
            }
        }
        if let Some(metadata) = &self.metadata
            && !(0.0..=1.0).contains(&metadata.confidence)
        {
            return Err(EnvelopeError::ConfidenceOutOfRange {
                field: "metadata.confidence",
                value: metadata.confidence,
            });
        }
        Ok(())
    }

    /// Parse and validate an envelope from its canonical JSON form.
    pub fn from_json(json: &str) -> Result<Envelope, EnvelopeError> {
        let envelope: Envelope = serde_json::from_str(json)?;
        envelope.validate()?;
        Ok(envelope)
    }

    /// Serialise to the canonical JSON form.
    pub fn to_json(&self) -> Result<String, EnvelopeError> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Whether this reply carries no usable output.
    #[must_use]
    pub fn stdout_is_empty(&self) -> bool {
        self.stdout.as_ref().is_none_or(StdoutPayload::is_empty)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::artifact::{Artifact, ArtifactKind};
    use crate::types::ArtifactId;

    fn request() -> Envelope {
        Envelope::request(
            Instruction::new("Summarise quarterly numbers", Intent::Analyse),
            8_000,
        )
    }

    #[test]
    fn request_envelope_validates() {
        assert!(request().validate().is_ok());
    }

    #[test]
    fn wrong_version_is_rejected() {
        let mut envelope = request();
        envelope.envelope_version = "2".to_string();
        assert!(matches!(
            envelope.validate(),
            Err(EnvelopeError::UnsupportedVersion { .. })
        ));
    }

    #[test]
    fn empty_instruction_is_rejected() {
        let mut envelope = request();
        envelope.instruction.text = "   ".to_string();
        assert!(matches!(
            envelope.validate(),
            Err(EnvelopeError::EmptyInstruction)
        ));
    }

    #[test]
    fn causal_violation_is_rejected() {
        let mut envelope = request().reply();
        let mut package = WorkPackage::new("s");
        let mut head = Artifact::new(
            ArtifactId::from("b"),
            ArtifactKind::Report,
            "b",
            "body",
            0.9,
        );
        head.derived_from = vec![ArtifactId::from("missing")];
        package.push_artifact(head);
        envelope.stdout = Some(StdoutPayload {
            work_package: Some(package),
            ..StdoutPayload::default()
        });
        assert!(matches!(
            envelope.validate(),
            Err(EnvelopeError::CausalOrderViolated)
        ));
    }

    #[test]
    fn tool_access_wildcard() {
        let authority = Authority::default();
        assert!(authority.allows_tool("anything"));
        let narrow = Authority {
            can_delegate: false,
            tool_access: vec!["search".to_string()],
        };
        assert!(narrow.allows_tool("search"));
        assert!(!narrow.allows_tool("calculator"));
    }

    #[test]
    fn json_round_trip_preserves_fields() {
        let mut envelope = request();
        envelope.context.domain_hints = vec!["finance".to_string()];
        envelope.constraints.deadline_ms = Some(1500);
        let json = envelope.to_json().unwrap();
        let back = Envelope::from_json(&json).unwrap();
        assert_eq!(envelope, back);
    }
}
