//! Per-cell working memory.
//!
//! Volatile, private to one cell, never shared with children or peers. It
//! holds the current focus, accumulated facts and hypotheses, decisions,
//! the error journal, learned fix patterns, and the signals the monitor
//! reads (step-outcome signatures, fact-bag snapshots). A cell may elect to
//! flush parts of it to the Vault before terminating; nothing else survives
//! the cell.
//!
//! Memory is bounded: when occupancy crosses the configured threshold the
//! compression pass digests stale low-confidence facts and drops stale
//! refuted hypotheses. Focus and decisions are never compressed.

use chrono::{DateTime, Utc};
use rustc_hash::{FxHashMap, FxHashSet};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

use crate::config::MonitorConfig;
use crate::envelope::{StderrEntry, StderrReport};
use crate::journal::ErrorJournal;
use crate::types::FactId;
use crate::utils::text::{canonical_hash, jaccard, token_set};

/// One observation held in working memory.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Fact {
    #[serde(default)]
    pub id: FactId,
    pub content: String,
    /// Confidence in `[0, 1]`.
    pub confidence: f64,
    /// Where the fact came from: a tool name, "inference", a child cell id,
    /// or the knowledge service.
    pub source: String,
    pub at: DateTime<Utc>,
}

impl Fact {
    #[must_use]
    pub fn new(content: impl Into<String>, confidence: f64, source: impl Into<String>) -> Self {
        Self {
            id: FactId::default(),
            content: content.into(),
            confidence: confidence.clamp(0.0, 1.0),
            source: source.into(),
            at: Utc::now(),
        }
    }
}

/// State of a working hypothesis.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HypothesisState {
    Open,
    Supported,
    Refuted,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Hypothesis {
    pub statement: String,
    pub state: HypothesisState,
    /// Step at which the hypothesis last changed state.
    pub noted_at_step: u64,
}

/// A committed choice and why it was made.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Decision {
    pub summary: String,
    pub rationale: String,
    pub at_step: u64,
}

/// A generalised error signature and the strategy that fixed it.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct FixPattern {
    /// Template-stripped message, see [`crate::utils::text::template_strip`].
    pub signature: String,
    pub error_type: String,
    pub domain: String,
    pub strategy: String,
    pub occurrences: u32,
}

/// The mutable state of one cognitive cycle.
#[derive(Debug, Default)]
pub struct WorkingMemory {
    /// The current question. Never compressed.
    focus: String,
    hypotheses: Vec<Hypothesis>,
    facts: Vec<Fact>,
    decisions: Vec<Decision>,
    confidence: FxHashMap<FactId, f64>,
    /// Step at which each fact entered memory, for age-based compression.
    inserted_at: FxHashMap<FactId, u64>,
    journal: ErrorJournal,
    fix_patterns: Vec<FixPattern>,
    /// Canonical hashes of recent step outcomes.
    outcome_signatures: VecDeque<u64>,
    /// Hash-set snapshots of the fact bag after recent steps.
    fact_bags: VecDeque<FxHashSet<u64>>,
    /// Goals of recent steps, for drift measurement.
    recent_goals: VecDeque<String>,
    stderr: StderrReport,
    step: u64,
    next_fact: u64,
}

/// Window depth kept for the monitor regardless of configured windows.
const SIGNAL_HISTORY: usize = 32;

impl WorkingMemory {
    #[must_use]
    pub fn new(focus: impl Into<String>) -> Self {
        Self {
            focus: focus.into(),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn focus(&self) -> &str {
        &self.focus
    }

    pub fn set_focus(&mut self, focus: impl Into<String>) {
        self.focus = focus.into();
    }

    #[must_use]
    pub fn step(&self) -> u64 {
        self.step
    }

    // ------------------------------------------------------------------
    // Facts
    // ------------------------------------------------------------------

    /// Insert a fact, assigning a memory-local id when it has none.
    pub fn add_fact(&mut self, mut fact: Fact) -> FactId {
        if fact.id.as_str().is_empty() {
            fact.id = FactId::new(format!("fact-{:06}", self.next_fact));
            self.next_fact += 1;
        }
        let id = fact.id.clone();
        self.confidence.insert(id.clone(), fact.confidence);
        self.inserted_at.insert(id.clone(), self.step);
        self.facts.push(fact);
        id
    }

    #[must_use]
    pub fn facts(&self) -> &[Fact] {
        &self.facts
    }

    #[must_use]
    pub fn fact_confidence(&self, id: &FactId) -> Option<f64> {
        self.confidence.get(id).copied()
    }

    /// Revise confidence in a fact without touching its record.
    pub fn revise_confidence(&mut self, id: &FactId, confidence: f64) {
        let clamped = confidence.clamp(0.0, 1.0);
        self.confidence.insert(id.clone(), clamped);
        if let Some(fact) = self.facts.iter_mut().find(|f| &f.id == id) {
            fact.confidence = clamped;
        }
    }

    /// Facts ranked by confidence, strongest first.
    #[must_use]
    pub fn strongest_facts(&self, k: usize) -> Vec<&Fact> {
        let mut ranked: Vec<&Fact> = self.facts.iter().collect();
        ranked.sort_by(|a, b| {
            b.confidence
                .partial_cmp(&a.confidence)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        ranked.truncate(k);
        ranked
    }

    #[must_use]
    pub fn occupancy(&self) -> usize {
        self.facts.len()
    }

    /// A short textual digest of memory for diagnosis prompts.
    #[must_use]
    pub fn digest(&self, max_facts: usize) -> String {
        let mut out = format!("focus: {}\n", self.focus);
        for fact in self.strongest_facts(max_facts) {
            out.push_str(&format!(
                "- [{:.2}] {} ({})\n",
                fact.confidence, fact.content, fact.source
            ));
        }
        out
    }

    // ------------------------------------------------------------------
    // Hypotheses & decisions
    // ------------------------------------------------------------------

    pub fn add_hypothesis(&mut self, statement: impl Into<String>) {
        self.hypotheses.push(Hypothesis {
            statement: statement.into(),
            state: HypothesisState::Open,
            noted_at_step: self.step,
        });
    }

    pub fn set_hypothesis_state(&mut self, statement: &str, state: HypothesisState) {
        if let Some(h) = self
            .hypotheses
            .iter_mut()
            .find(|h| h.statement == statement)
        {
            h.state = state;
            h.noted_at_step = self.step;
        }
    }

    #[must_use]
    pub fn hypotheses(&self) -> &[Hypothesis] {
        &self.hypotheses
    }

    pub fn add_decision(&mut self, summary: impl Into<String>, rationale: impl Into<String>) {
        self.decisions.push(Decision {
            summary: summary.into(),
            rationale: rationale.into(),
            at_step: self.step,
        });
    }

    #[must_use]
    pub fn decisions(&self) -> &[Decision] {
        &self.decisions
    }

    // ------------------------------------------------------------------
    // Journal, patterns, stderr
    // ------------------------------------------------------------------

    #[must_use]
    pub fn journal(&self) -> &ErrorJournal {
        &self.journal
    }

    pub fn journal_mut(&mut self) -> &mut ErrorJournal {
        &mut self.journal
    }

    #[must_use]
    pub fn fix_patterns(&self) -> &[FixPattern] {
        &self.fix_patterns
    }

    /// Learn (or reinforce) a fix pattern.
    pub fn record_fix_pattern(&mut self, pattern: FixPattern) {
        if let Some(existing) = self.fix_patterns.iter_mut().find(|p| {
            p.signature == pattern.signature
                && p.error_type == pattern.error_type
                && p.domain == pattern.domain
        }) {
            existing.occurrences += 1;
            existing.strategy = pattern.strategy;
        } else {
            self.fix_patterns.push(pattern);
        }
    }

    pub fn seed_fix_patterns(&mut self, patterns: Vec<FixPattern>) {
        for pattern in patterns {
            self.record_fix_pattern(pattern);
        }
    }

    pub fn stderr_mut(&mut self) -> &mut StderrReport {
        &mut self.stderr
    }

    #[must_use]
    pub fn stderr(&self) -> &StderrReport {
        &self.stderr
    }

    pub fn warn(&mut self, entry: StderrEntry) {
        self.stderr.warn(entry);
    }

    /// Take the accumulated stderr report for packaging.
    pub fn take_stderr(&mut self) -> StderrReport {
        std::mem::take(&mut self.stderr)
    }

    // ------------------------------------------------------------------
    // Monitor signals
    // ------------------------------------------------------------------

    /// Record the outcome of one execute-loop step.
    pub fn note_step(&mut self, goal: &str, outcome: &str) {
        self.step += 1;
        push_bounded(&mut self.outcome_signatures, canonical_hash(outcome));
        let bag: FxHashSet<u64> = self
            .facts
            .iter()
            .map(|f| canonical_hash(&f.content))
            .collect();
        push_bounded(&mut self.fact_bags, bag);
        push_bounded(&mut self.recent_goals, goal.to_string());
    }

    #[must_use]
    pub fn recent_goals(&self, n: usize) -> Vec<&str> {
        self.recent_goals
            .iter()
            .rev()
            .take(n)
            .map(String::as_str)
            .collect()
    }

    /// Stagnation check over the recorded signal windows.
    ///
    /// True when the Jaccard similarity between consecutive fact-bag
    /// snapshots exceeds the configured threshold across the whole sliding
    /// window, or when the last `signature_window` step outcomes hash
    /// bit-identically.
    #[must_use]
    pub fn detect_stagnation(&self, config: &MonitorConfig) -> bool {
        let w = config.signature_window;
        if self.outcome_signatures.len() >= w {
            let tail: Vec<u64> = self
                .outcome_signatures
                .iter()
                .rev()
                .take(w)
                .copied()
                .collect();
            if tail.windows(2).all(|pair| pair[0] == pair[1]) {
                return true;
            }
        }
        if self.fact_bags.len() >= w.max(2) {
            let bags: Vec<&FxHashSet<u64>> = self.fact_bags.iter().rev().take(w.max(2)).collect();
            if bags
                .windows(2)
                .all(|pair| jaccard(pair[0], pair[1]) > config.jaccard_threshold)
            {
                return true;
            }
        }
        false
    }

    /// Lexical drift of recent step goals away from the focus.
    #[must_use]
    pub fn drift_from_focus(&self, config: &MonitorConfig) -> f64 {
        let goals = self.recent_goals(config.goal_window);
        if goals.is_empty() {
            return 0.0;
        }
        let focus_tokens = token_set(&self.focus);
        let sum: f64 = goals
            .iter()
            .map(|goal| 1.0 - jaccard(&focus_tokens, &token_set(goal)))
            .sum();
        sum / goals.len() as f64
    }

    /// Variance of confidence across recent facts, for the ε stagnation
    /// signal.
    #[must_use]
    pub fn confidence_variance(&self, window: usize) -> f64 {
        let recent: Vec<f64> = self
            .facts
            .iter()
            .rev()
            .take(window)
            .map(|f| f.confidence)
            .collect();
        if recent.len() < 2 {
            return f64::MAX;
        }
        let mean = recent.iter().sum::<f64>() / recent.len() as f64;
        recent.iter().map(|c| (c - mean).powi(2)).sum::<f64>() / recent.len() as f64
    }

    // ------------------------------------------------------------------
    // Compression
    // ------------------------------------------------------------------

    /// Bound memory when occupancy crosses the configured threshold.
    ///
    /// Facts below the 0.3 confidence line older than the configured age
    /// are folded into a single low-confidence digest fact; refuted
    /// hypotheses older than the same age are dropped. Returns the number
    /// of facts digested.
    pub fn compress(&mut self, config: &MonitorConfig) -> usize {
        if self.occupancy() <= config.memory_occupancy_threshold {
            return 0;
        }
        let cutoff = self.step.saturating_sub(config.compression_age_steps);

        let mut kept = Vec::with_capacity(self.facts.len());
        let mut digested: Vec<Fact> = Vec::new();
        for fact in self.facts.drain(..) {
            let current = self
                .confidence
                .get(&fact.id)
                .copied()
                .unwrap_or(fact.confidence);
            let stale = self
                .inserted_at
                .get(&fact.id)
                .copied()
                .unwrap_or(0)
                <= cutoff;
            if current < 0.3 && stale {
                digested.push(fact);
            } else {
                kept.push(fact);
            }
        }
        let count = digested.len();
        if count > 0 {
            for fact in &digested {
                self.confidence.remove(&fact.id);
                self.inserted_at.remove(&fact.id);
            }
            let digest_content = format!(
                "low-confidence digest of {count} facts: {}",
                digested
                    .iter()
                    .map(|f| f.content.chars().take(40).collect::<String>())
                    .collect::<Vec<_>>()
                    .join("; ")
            );
            let mut digest = Fact::new(digest_content, 0.2, "memory-compression");
            digest.id = FactId::new(format!("fact-{:06}", self.next_fact));
            self.next_fact += 1;
            self.confidence.insert(digest.id.clone(), 0.2);
            self.inserted_at.insert(digest.id.clone(), self.step);
            kept.push(digest);
        }
        self.facts = kept;

        self.hypotheses.retain(|h| {
            !(h.state == HypothesisState::Refuted && h.noted_at_step <= cutoff)
        });
        count
    }
}

fn push_bounded<T>(queue: &mut VecDeque<T>, item: T) {
    if queue.len() == SIGNAL_HISTORY {
        queue.pop_front();
    }
    queue.push_back(item);
}
