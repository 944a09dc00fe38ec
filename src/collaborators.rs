//! Narrow interfaces to the kernel's external collaborators.
//!
//! The Tool Host, Knowledge service, Vault, and inference provider live
//! outside the kernel. Cells reach them only through the traits here, and
//! every cell receives them bundled in a [`Collaborators`] context object at
//! spawn — there are no module-level singletons. All four are assumed
//! internally safe for concurrent use.
//!
//! Tests substitute the deterministic stubs in [`crate::utils::testing`].

use async_trait::async_trait;
use miette::Diagnostic;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use thiserror::Error;

use crate::memory::Fact;

/// Fault reported by a collaborator.
#[derive(Debug, Error, Diagnostic)]
pub enum CollaboratorError {
    #[error("{service} unavailable: {message}")]
    #[diagnostic(
        code(hivecell::collaborators::unavailable),
        help("Persistent unavailability of the tool host is fatal to the cell.")
    )]
    Unavailable {
        service: &'static str,
        message: String,
    },

    #[error("{service} timed out after {elapsed_ms} ms")]
    #[diagnostic(code(hivecell::collaborators::timeout))]
    Timeout {
        service: &'static str,
        elapsed_ms: u64,
    },

    #[error("{service} protocol error: {message}")]
    #[diagnostic(code(hivecell::collaborators::protocol))]
    Protocol {
        service: &'static str,
        message: String,
    },
}

/// Error detail inside a failed [`ToolResult`].
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolFault {
    pub code: String,
    pub message: String,
    pub retryable: bool,
}

/// Result of one tool invocation.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ToolResult {
    pub success: bool,
    #[serde(default)]
    pub output: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ToolFault>,
    #[serde(default)]
    pub citations: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tokens_consumed: Option<u64>,
}

impl ToolResult {
    #[must_use]
    pub fn ok(output: Value) -> Self {
        Self {
            success: true,
            output,
            error: None,
            citations: Vec::new(),
            tokens_consumed: None,
        }
    }

    #[must_use]
    pub fn err(code: impl Into<String>, message: impl Into<String>, retryable: bool) -> Self {
        Self {
            success: false,
            output: Value::Null,
            error: Some(ToolFault {
                code: code.into(),
                message: message.into(),
                retryable,
            }),
            citations: Vec::new(),
            tokens_consumed: None,
        }
    }
}

/// Catalogue entry describing one tool.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ToolSpec {
    pub name: String,
    /// JSON schema of the arguments object. The kernel checks `required`
    /// and property types before dispatch.
    pub schema: Value,
    pub description: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cost_hint: Option<u64>,
}

/// The tool-execution service.
#[async_trait]
pub trait ToolHost: Send + Sync {
    async fn execute(&self, tool_name: &str, args: Value) -> Result<ToolResult, CollaboratorError>;

    async fn list_tools(&self, domain: Option<&str>) -> Result<Vec<ToolSpec>, CollaboratorError>;
}

/// The retrieval service.
#[async_trait]
pub trait Knowledge: Send + Sync {
    async fn search(
        &self,
        query: &str,
        k: usize,
        domain_hints: &[String],
    ) -> Result<Vec<Fact>, CollaboratorError>;
}

/// The persistence store; the only permitted side-effect channel for
/// inter-run state. Namespaces are per cell domain.
#[async_trait]
pub trait Vault: Send + Sync {
    async fn put(&self, key: &str, blob: Value, ttl_s: Option<u64>)
    -> Result<(), CollaboratorError>;

    async fn get(&self, key: &str) -> Result<Option<Value>, CollaboratorError>;

    async fn query(&self, namespace: &str, filter: &str) -> Result<Vec<Value>, CollaboratorError>;
}

/// One message in an inference conversation.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

impl ChatMessage {
    pub const SYSTEM: &'static str = "system";
    pub const USER: &'static str = "user";
    pub const ASSISTANT: &'static str = "assistant";

    #[must_use]
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Self::USER.to_string(),
            content: content.into(),
        }
    }

    #[must_use]
    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Self::ASSISTANT.to_string(),
            content: content.into(),
        }
    }
}

/// Sampling parameters for one generation.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct GenerateParams {
    pub max_tokens: u64,
    pub temperature: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stop: Option<Vec<String>>,
}

impl Default for GenerateParams {
    fn default() -> Self {
        Self {
            max_tokens: 1_024,
            temperature: 0.2,
            stop: None,
        }
    }
}

/// One completed generation.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Generation {
    pub text: String,
    pub tokens_used: u64,
}

/// The inference provider. Exactly this interface is mocked in tests.
#[async_trait]
pub trait InferenceProvider: Send + Sync {
    async fn generate(
        &self,
        system: &str,
        messages: &[ChatMessage],
        params: GenerateParams,
    ) -> Result<Generation, CollaboratorError>;
}

/// The bundle of collaborator handles a cell receives at spawn.
#[derive(Clone)]
pub struct Collaborators {
    pub inference: Arc<dyn InferenceProvider>,
    pub tools: Arc<dyn ToolHost>,
    pub knowledge: Arc<dyn Knowledge>,
    pub vault: Arc<dyn Vault>,
}

impl std::fmt::Debug for Collaborators {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Collaborators").finish_non_exhaustive()
    }
}
