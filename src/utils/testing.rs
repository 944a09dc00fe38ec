//! Deterministic stub collaborators for tests, doc examples, and the CLI
//! harness.
//!
//! The inference stub is seeded: identical prompts produce identical text,
//! which is what makes idempotence assertions possible. Scripted responses
//! can be layered on top and are consumed in order before the seeded
//! fallback kicks in.

use async_trait::async_trait;
use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use serde_json::{Value, json};
use std::collections::VecDeque;
use std::sync::Arc;

use crate::collaborators::{
    ChatMessage, CollaboratorError, Collaborators, GenerateParams, Generation, InferenceProvider,
    Knowledge, ToolHost, ToolResult, ToolSpec, Vault,
};
use crate::envelope::{Envelope, Instruction};
use crate::memory::Fact;
use crate::types::Intent;
use crate::utils::text::canonical_hash;

/// Seeded inference stub.
///
/// Resolution order per call: prompt-matching rules (stable under
/// concurrent callers), then the sequential script queue, then a
/// deterministic function of `(seed, system, last message)` — which is
/// what makes idempotence assertions possible.
#[derive(Debug)]
pub struct SeededInference {
    seed: u64,
    rules: Mutex<Vec<(String, String)>>,
    script: Mutex<VecDeque<String>>,
    tokens_per_call: u64,
    latency_ms: u64,
}

impl SeededInference {
    #[must_use]
    pub fn seeded(seed: u64) -> Self {
        Self {
            seed,
            rules: Mutex::new(Vec::new()),
            script: Mutex::new(VecDeque::new()),
            tokens_per_call: 50,
            latency_ms: 0,
        }
    }

    /// Queue responses consumed in order before the seeded fallback.
    #[must_use]
    pub fn scripted(responses: Vec<&str>) -> Self {
        let stub = Self::seeded(0);
        stub.push_responses(responses);
        stub
    }

    #[must_use]
    pub fn with_tokens_per_call(mut self, tokens: u64) -> Self {
        self.tokens_per_call = tokens;
        self
    }

    /// Simulated per-call latency, for cancellation tests.
    #[must_use]
    pub fn with_latency_ms(mut self, latency_ms: u64) -> Self {
        self.latency_ms = latency_ms;
        self
    }

    /// Answer any prompt containing `pattern` with `response`.
    ///
    /// Rules are checked first-match-wins and survive concurrent callers,
    /// unlike the sequential script queue.
    pub fn rule(&self, pattern: &str, response: &str) {
        self.rules
            .lock()
            .push((pattern.to_string(), response.to_string()));
    }

    /// Append more scripted responses.
    pub fn push_responses(&self, responses: Vec<&str>) {
        let mut script = self.script.lock();
        for response in responses {
            script.push_back(response.to_string());
        }
    }

    #[must_use]
    pub fn remaining_script(&self) -> usize {
        self.script.lock().len()
    }
}

#[async_trait]
impl InferenceProvider for SeededInference {
    async fn generate(
        &self,
        system: &str,
        messages: &[ChatMessage],
        _params: GenerateParams,
    ) -> Result<Generation, CollaboratorError> {
        if self.latency_ms > 0 {
            tokio::time::sleep(std::time::Duration::from_millis(self.latency_ms)).await;
        }
        let prompt = messages
            .last()
            .map(|message| message.content.as_str())
            .unwrap_or_default();
        let matched = self
            .rules
            .lock()
            .iter()
            .find(|(pattern, _)| prompt.contains(pattern))
            .map(|(_, response)| response.clone());
        if let Some(response) = matched {
            return Ok(Generation {
                text: response,
                tokens_used: self.tokens_per_call,
            });
        }
        if let Some(scripted) = self.script.lock().pop_front() {
            return Ok(Generation {
                text: scripted,
                tokens_used: self.tokens_per_call,
            });
        }
        let digest = canonical_hash(&format!("{}|{system}|{prompt}", self.seed));
        let head: String = prompt.chars().take(72).collect();
        Ok(Generation {
            text: format!("deterministic note {digest:016x} on: {head}"),
            tokens_used: self.tokens_per_call,
        })
    }
}

/// Scripted tool host: per-tool response queues, with a configurable
/// default and an unreachable mode for fatal-path tests.
#[derive(Debug, Default)]
pub struct ScriptedToolHost {
    tools: Vec<ToolSpec>,
    responses: Mutex<FxHashMap<String, VecDeque<ToolResult>>>,
    calls: Mutex<Vec<(String, Value)>>,
    unreachable: bool,
}

impl ScriptedToolHost {
    #[must_use]
    pub fn new(tools: Vec<ToolSpec>) -> Self {
        Self {
            tools,
            ..Self::default()
        }
    }

    /// A host that fails every call with `Unavailable`.
    #[must_use]
    pub fn unreachable() -> Self {
        Self {
            unreachable: true,
            ..Self::default()
        }
    }

    /// Queue the next responses for one tool, consumed in order.
    pub fn script(&self, tool: &str, results: Vec<ToolResult>) {
        self.responses
            .lock()
            .entry(tool.to_string())
            .or_default()
            .extend(results);
    }

    /// Every call made so far, in order.
    #[must_use]
    pub fn calls(&self) -> Vec<(String, Value)> {
        self.calls.lock().clone()
    }

    /// A simple search tool spec used across tests.
    #[must_use]
    pub fn search_tool() -> ToolSpec {
        ToolSpec {
            name: "search".to_string(),
            schema: json!({
                "type": "object",
                "required": ["query"],
                "properties": { "query": {"type": "string"} }
            }),
            description: "look a query up in the corpus".to_string(),
            cost_hint: Some(120),
        }
    }
}

#[async_trait]
impl ToolHost for ScriptedToolHost {
    async fn execute(&self, tool_name: &str, args: Value) -> Result<ToolResult, CollaboratorError> {
        if self.unreachable {
            return Err(CollaboratorError::Unavailable {
                service: "tool_host",
                message: "connection refused".to_string(),
            });
        }
        self.calls.lock().push((tool_name.to_string(), args.clone()));
        if let Some(queued) = self
            .responses
            .lock()
            .get_mut(tool_name)
            .and_then(VecDeque::pop_front)
        {
            return Ok(queued);
        }
        Ok(ToolResult::ok(json!({
            "tool": tool_name,
            "echo": args,
        })))
    }

    async fn list_tools(&self, _domain: Option<&str>) -> Result<Vec<ToolSpec>, CollaboratorError> {
        if self.unreachable {
            return Err(CollaboratorError::Unavailable {
                service: "tool_host",
                message: "connection refused".to_string(),
            });
        }
        Ok(self.tools.clone())
    }
}

/// Fixed-corpus knowledge stub.
#[derive(Debug, Default)]
pub struct StaticKnowledge {
    facts: Vec<Fact>,
}

impl StaticKnowledge {
    #[must_use]
    pub fn new(facts: Vec<Fact>) -> Self {
        Self { facts }
    }

    #[must_use]
    pub fn empty() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Knowledge for StaticKnowledge {
    async fn search(
        &self,
        _query: &str,
        k: usize,
        _domain_hints: &[String],
    ) -> Result<Vec<Fact>, CollaboratorError> {
        Ok(self.facts.iter().take(k).cloned().collect())
    }
}

/// In-memory vault.
#[derive(Debug, Default)]
pub struct MemoryVault {
    store: Mutex<FxHashMap<String, Value>>,
}

impl MemoryVault {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.store.lock().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.store.lock().is_empty()
    }
}

#[async_trait]
impl Vault for MemoryVault {
    async fn put(
        &self,
        key: &str,
        blob: Value,
        _ttl_s: Option<u64>,
    ) -> Result<(), CollaboratorError> {
        self.store.lock().insert(key.to_string(), blob);
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<Value>, CollaboratorError> {
        Ok(self.store.lock().get(key).cloned())
    }

    async fn query(&self, namespace: &str, _filter: &str) -> Result<Vec<Value>, CollaboratorError> {
        let prefix = format!("{namespace}/");
        Ok(self
            .store
            .lock()
            .iter()
            .filter(|(key, _)| key.starts_with(&prefix))
            .map(|(_, value)| value.clone())
            .collect())
    }
}

/// A full collaborator bundle around the given stubs.
#[must_use]
pub fn collaborators(
    inference: Arc<SeededInference>,
    tools: Arc<ScriptedToolHost>,
    knowledge: Arc<StaticKnowledge>,
    vault: Arc<MemoryVault>,
) -> Collaborators {
    Collaborators {
        inference,
        tools,
        knowledge,
        vault,
    }
}

/// The default offline bundle: seeded inference, echo tools, no knowledge.
#[must_use]
pub fn stub_collaborators(seed: u64) -> Collaborators {
    collaborators(
        Arc::new(SeededInference::seeded(seed)),
        Arc::new(ScriptedToolHost::new(vec![ScriptedToolHost::search_tool()])),
        Arc::new(StaticKnowledge::empty()),
        Arc::new(MemoryVault::new()),
    )
}

/// A minimal valid request envelope.
#[must_use]
pub fn request_envelope(text: &str, budget: u64, max_depth: u32) -> Envelope {
    let mut envelope = Envelope::request(Instruction::new(text, Intent::Research), budget);
    envelope.constraints.max_delegation_depth = max_depth;
    envelope
}
