//! The delegation protocol: decompose, spawn, supervise, review.
//!
//! The parent decomposes its instruction into a subtask DAG, carves child
//! budgets, spawns each dependency layer concurrently, supervises the bus
//! while children run, reviews their output against the quality floor with
//! bounded feedback rounds, and resolves cross-branch contradictions
//! before folding everything into its own work package.

use std::sync::Arc;

use rustc_hash::FxHashMap;
use tokio::task::JoinSet;

use crate::artifact::{Artifact, ArtifactKind};
use crate::budget::TokenBudget;
use crate::bus::{BusEndpoint, BusPayload, ChannelKind, Defect, DefectKind};
use crate::cycle::{CellAbort, CellCtx, ExecuteOutcome, SubTask, execute, plan};
use crate::envelope::{
    Authority, Constraints, Envelope, Instruction, StderrEntry, StderrKind, TaskContext,
};
use crate::journal::{ErrorEntry, ErrorSource};
use crate::memory::{Fact, HypothesisState};
use crate::types::{ArtifactId, CellId, CellLevel, ErrorId, Severity, TaskId};
use crate::utils::text::{jaccard, token_set};

use super::{CancelScope, CellRuntime, SpawnSpec};

/// Run the delegation path. Falls back to solo execution when
/// decomposition yields nothing usable.
pub async fn run(
    runtime: &Arc<CellRuntime>,
    ctx: &mut CellCtx,
) -> Result<ExecuteOutcome, CellAbort> {
    let subtasks = plan::decompose(ctx).await;
    let layers = match plan::phases(&subtasks, ctx.config.delegation.max_parallel_children) {
        Ok(layers) => layers,
        Err(error) => {
            tracing::debug!(%error, "decomposition unusable; running solo");
            ctx.memory.add_decision(
                "fell back to solo execution",
                format!("decomposition rejected: {error}"),
            );
            return solo_fallback(ctx).await;
        }
    };

    // Carve budgets for every subtask up front; the carve respects the 10%
    // parent reserve and the per-child minimum.
    let ordered: Vec<&SubTask> = layers.iter().flatten().collect();
    let weights: Vec<u32> = ordered
        .iter()
        .map(|task| task.estimated_complexity.weight())
        .collect();
    let per_child_minimum = ctx.config.delegation.per_child_minimum;
    let mut budgets = match ctx
        .governor
        .budget_mut()
        .carve_children(&weights, per_child_minimum)
    {
        Ok(budgets) => budgets,
        Err(error) => {
            tracing::debug!(%error, "budget too small to delegate; running solo");
            ctx.memory.add_decision(
                "fell back to solo execution",
                format!("budget carve rejected: {error}"),
            );
            return solo_fallback(ctx).await;
        }
    };
    // Single-level delegation keeps grandchildren off the table.
    if ctx.mode == crate::types::ProcessingMode::Delegate {
        for budget in &mut budgets {
            budget.can_delegate = false;
        }
    }
    let mut budget_by_task: FxHashMap<TaskId, TokenBudget> = ordered
        .iter()
        .map(|task| task.id.clone())
        .zip(budgets)
        .collect();

    // Tasks that something else depends on are non-leaf: they may not be
    // staffed at intern rank.
    let non_leaf: rustc_hash::FxHashSet<TaskId> = ordered
        .iter()
        .flat_map(|task| task.depends_on.iter().cloned())
        .collect();

    let (scope, child_cancel) = CancelScope::derived(ctx.cancel.clone());
    let endpoint = ctx.endpoint.clone();
    let mut completed: Vec<(SubTask, Envelope)> = Vec::new();
    let mut outcome = ExecuteOutcome::Completed;

    for layer in &layers {
        if ctx.cancelled() {
            scope.cancel();
            outcome = ExecuteOutcome::Partial {
                why: "cancelled during delegation".to_string(),
            };
            break;
        }

        // Dependency outputs become the layer's prior findings.
        let mut join_set: JoinSet<(TaskId, Envelope)> = JoinSet::new();
        let mut layer_cells: FxHashMap<CellId, TaskId> = FxHashMap::default();
        for subtask in layer {
            let Some(budget) = budget_by_task.remove(&subtask.id) else {
                continue;
            };
            let child_id = CellId::new(runtime.ids().next_id("cell"));
            layer_cells.insert(child_id.clone(), subtask.id.clone());
            let spec = child_spec(
                ctx,
                subtask,
                budget,
                child_id,
                &completed,
                !non_leaf.contains(&subtask.id),
                child_cancel.clone(),
            );
            let runtime = runtime.clone();
            let workers = runtime.workers().clone();
            let task_id = subtask.id.clone();
            join_set.spawn(async move {
                let _permit = workers.acquire_owned().await;
                let reply = runtime.run_cell(spec).await;
                (task_id, reply)
            });
        }

        let layer_results =
            supervise_layer(ctx, &endpoint, &mut join_set, &layer_cells).await;

        for (task_id, mut reply) in layer_results {
            let Some(subtask) = layer.iter().find(|t| t.id == task_id) else {
                continue;
            };
            review_child(runtime, ctx, subtask, &mut reply, child_cancel.clone()).await;
            absorb_child_failure(ctx, subtask, &reply).await;
            completed.push((subtask.clone(), reply));
        }
    }

    assemble(ctx, completed);
    resolve_contradictions(ctx);
    Ok(outcome)
}

/// Solo fallback shared by every delegation bail-out path.
async fn solo_fallback(ctx: &mut CellCtx) -> Result<ExecuteOutcome, CellAbort> {
    ctx.plan = plan::build_step_plan(ctx).await;
    execute::run(ctx).await
}

/// Build the spawn spec for one subtask.
fn child_spec(
    ctx: &CellCtx,
    subtask: &SubTask,
    budget: TokenBudget,
    child_id: CellId,
    completed: &[(SubTask, Envelope)],
    is_leaf: bool,
    cancel: tokio::sync::watch::Receiver<bool>,
) -> SpawnSpec {
    // Findings of dependency subtasks flow in as prior findings.
    let mut prior_findings: Vec<String> = Vec::new();
    for dep in &subtask.depends_on {
        if let Some((_, reply)) = completed.iter().find(|(task, _)| &task.id == dep)
            && let Some(stdout) = &reply.stdout
            && let Some(package) = &stdout.work_package
        {
            prior_findings.extend(package.key_findings.iter().cloned());
        }
    }

    let mut domain_hints = ctx.envelope.context.domain_hints.clone();
    if !subtask.domain.is_empty() && !domain_hints.contains(&subtask.domain) {
        domain_hints.insert(0, subtask.domain.clone());
    }
    let tool_access = if subtask.required_tools.is_empty() {
        ctx.envelope.authority.tool_access.clone()
    } else {
        subtask
            .required_tools
            .iter()
            .filter(|tool| ctx.envelope.authority.allows_tool(tool))
            .cloned()
            .collect()
    };

    let role = if subtask.assigned_role.is_empty() {
        None
    } else {
        Some(subtask.assigned_role.clone())
    };
    let level = child_level(ctx, role.as_deref(), is_leaf);

    let envelope = Envelope {
        envelope_version: crate::envelope::ENVELOPE_VERSION.to_string(),
        instruction: Instruction::new(subtask.description.clone(), ctx.envelope.instruction.intent)
            .with_urgency(ctx.envelope.instruction.urgency),
        context: TaskContext {
            parent_task_id: Some(subtask.id.clone()),
            organisational_goal: if ctx.envelope.context.organisational_goal.is_empty() {
                ctx.envelope.instruction.text.clone()
            } else {
                ctx.envelope.context.organisational_goal.clone()
            },
            domain_hints,
            prior_findings,
        },
        constraints: Constraints {
            token_budget: budget.total,
            quality_level: ctx.envelope.constraints.quality_level,
            max_delegation_depth: ctx.envelope.constraints.max_delegation_depth,
            deadline_ms: ctx.envelope.constraints.deadline_ms,
        },
        authority: Authority {
            can_delegate: budget.can_delegate,
            tool_access,
        },
        stdout: None,
        stderr: Default::default(),
        metadata: None,
    };

    SpawnSpec {
        envelope,
        budget,
        parent: Some(ctx.identity.cell_id.clone()),
        cell_id: Some(child_id),
        role,
        level: Some(level),
        trace_id: ctx.endpoint.trace_id().clone(),
        cancel,
    }
}

/// Resolve a child's rank: one below the parent, adjusted toward the
/// role's preference, and never intern unless the subtask is a leaf.
fn child_level(ctx: &CellCtx, role: Option<&str>, is_leaf: bool) -> CellLevel {
    let ladder = ctx
        .identity
        .level
        .next_lower()
        .unwrap_or(CellLevel::Intern);
    let preferred = role
        .map(|name| ctx.roles.resolve(name).preferred_level)
        .unwrap_or(ladder);
    // Take the junior of the two so children never outrank their parent.
    let mut level = if preferred.outranks(ladder) {
        ladder
    } else {
        preferred
    };
    if level == CellLevel::Intern && !is_leaf {
        level = CellLevel::Staff;
    }
    level
}

/// Supervise one layer: await children while relaying and answering bus
/// traffic.
async fn supervise_layer(
    ctx: &mut CellCtx,
    endpoint: &BusEndpoint,
    join_set: &mut JoinSet<(TaskId, Envelope)>,
    layer_cells: &FxHashMap<CellId, TaskId>,
) -> Vec<(TaskId, Envelope)> {
    let mut results = Vec::new();
    loop {
        tokio::select! {
            joined = join_set.join_next() => {
                match joined {
                    None => break,
                    Some(Ok(result)) => results.push(result),
                    Some(Err(join_error)) => {
                        ctx.memory.journal_mut().record(
                            ErrorEntry::new(
                                ErrorId::new(ctx.ids.next_id("err")),
                                ErrorSource::DelegationFailure,
                                "child_panicked",
                                join_error.to_string(),
                                Severity::High,
                            ),
                        );
                    }
                }
            }
            message = next_supervision_message(endpoint) => {
                handle_supervision_message(ctx, endpoint, message, layer_cells).await;
            }
        }
    }
    // A drained join set can leave queued messages behind; sweep them.
    for channel in [ChannelKind::Progress, ChannelKind::Insight, ChannelKind::Share] {
        for message in endpoint.drain(channel) {
            handle_supervision_message(ctx, endpoint, message, layer_cells).await;
        }
    }
    results
}

async fn next_supervision_message(endpoint: &BusEndpoint) -> crate::bus::BusMessage {
    tokio::select! {
        m = endpoint.recv(ChannelKind::Progress) => m,
        m = endpoint.recv(ChannelKind::Clarify) => m,
        m = endpoint.recv(ChannelKind::Escalate) => m,
        m = endpoint.recv(ChannelKind::Insight) => m,
        m = endpoint.recv(ChannelKind::Blocked) => m,
        m = endpoint.recv(ChannelKind::Share) => m,
        m = endpoint.recv(ChannelKind::HealResult) => m,
    }
}

async fn handle_supervision_message(
    ctx: &mut CellCtx,
    endpoint: &BusEndpoint,
    message: crate::bus::BusMessage,
    layer_cells: &FxHashMap<CellId, TaskId>,
) {
    let sender = message.from.clone();
    match message.payload {
        BusPayload::Progress { phase, note } => {
            // Relay child progress upward.
            let _ = endpoint
                .progress(phase, format!("[{}] {note}", sender.as_str()))
                .await;
        }
        BusPayload::Clarify { question, reply } => {
            let answer = answer_from_memory(ctx, &question);
            match answer {
                Some(answer) => {
                    let _ = reply.send(answer);
                }
                None if endpoint.parent().is_some() => {
                    // Forward upward and relay the answer back down.
                    match endpoint.clarify(question).await {
                        Ok(upstream) => {
                            let answer = upstream
                                .await
                                .unwrap_or_else(|_| "no answer available".to_string());
                            let _ = reply.send(answer);
                        }
                        Err(_) => {
                            let _ = reply.send("no answer available".to_string());
                        }
                    }
                }
                None => {
                    let _ = reply.send("no answer available".to_string());
                }
            }
        }
        BusPayload::Escalate {
            reason,
            severity,
            ack,
        } => {
            let _ = ack.send(());
            ctx.memory.stderr_mut().escalate(
                StderrEntry::new(
                    StderrKind::DelegationFailure,
                    format!("child {} escalated: {reason}", sender.as_str()),
                )
                .with_context(serde_json::json!({ "severity": severity })),
            );
            if severity >= Severity::High && endpoint.parent().is_some() {
                // Escalate further upward; the ack receiver is dropped on
                // purpose, acknowledgement happens at our level.
                let _ = endpoint.escalate(reason, severity).await;
            }
        }
        BusPayload::Insight { fact } => {
            // Record, then fan out to siblings. Fan-out never crosses
            // delegation branches: only this parent's own children see it.
            ctx.memory.add_fact(fact.clone());
            for peer in layer_cells.keys().filter(|peer| **peer != sender) {
                let _ = endpoint
                    .send_to(peer, BusPayload::Share { fact: fact.clone() })
                    .await;
            }
        }
        BusPayload::Share { fact } => {
            for peer in layer_cells.keys().filter(|peer| **peer != sender) {
                let _ = endpoint
                    .send_to(peer, BusPayload::Share { fact: fact.clone() })
                    .await;
            }
        }
        BusPayload::Blocked { reason } => {
            ctx.memory.warn(StderrEntry::new(
                StderrKind::DelegationFailure,
                format!("child {} blocked: {reason}", sender.as_str()),
            ));
            let _ = endpoint
                .redirect(
                    &sender,
                    None,
                    "report what you have; the remainder will be replanned",
                )
                .await;
        }
        BusPayload::HealResult {
            error_id,
            fixed,
            cascades,
        } => {
            ctx.memory.add_decision(
                format!("child heal result for {error_id}"),
                format!("fixed={fixed}, cascades={}", cascades.len()),
            );
        }
        BusPayload::Redirect { .. } | BusPayload::Feedback { .. } | BusPayload::HealRequest { .. } => {
            // Downward-only channels; nothing a supervising parent expects.
        }
    }
}

/// Answer a clarify question from our own facts when overlap is decent.
fn answer_from_memory(ctx: &CellCtx, question: &str) -> Option<String> {
    let wanted = token_set(question);
    ctx.memory
        .facts()
        .iter()
        .map(|fact| (jaccard(&wanted, &token_set(&fact.content)), fact))
        .filter(|(overlap, _)| *overlap > 0.2)
        .max_by(|a, b| a.0.partial_cmp(&b.0).unwrap_or(std::cmp::Ordering::Equal))
        .map(|(_, fact)| fact.content.clone())
}

/// Multi-round review of one child's output.
///
/// Round 1 accepts artifacts at or above the quality floor. Each further
/// round sends FEEDBACK naming the defects and respawns the child with its
/// unspent budget to revise. After the cap, unresolved defects become
/// stderr warnings. The round cap applies per child.
async fn review_child(
    runtime: &Arc<CellRuntime>,
    ctx: &mut CellCtx,
    subtask: &SubTask,
    reply: &mut Envelope,
    cancel: tokio::sync::watch::Receiver<bool>,
) {
    let floor = ctx.envelope.constraints.quality_level.confidence_floor();
    let max_rounds = ctx.config.delegation.max_review_rounds;

    for round in 1..max_rounds {
        let defects = collect_defects(reply, floor);
        if defects.is_empty() {
            return;
        }
        let child_id = reply
            .metadata
            .as_ref()
            .map(|metadata| metadata.cell_id.clone());
        let unspent = child_unspent(reply, subtask);
        if unspent < ctx.config.delegation.per_child_minimum {
            break;
        }

        if let Some(child_id) = &child_id {
            // The child has terminated; the feedback message documents the
            // defects for observers even though the revision runs in a
            // fresh cell.
            let _ = ctx
                .endpoint
                .feedback(child_id, defects.first().and_then(|d| d.0.clone()),
                    defects.iter().map(|d| d.1.clone()).collect())
                .await;
        }

        tracing::debug!(
            subtask = %subtask.id,
            round,
            defects = defects.len(),
            "review round requesting revision"
        );
        let revision = spawn_revision(runtime, ctx, subtask, reply, &defects, unspent, cancel.clone()).await;
        *reply = revision;
    }

    let defects = collect_defects(reply, floor);
    for (_, defect) in defects {
        ctx.memory.warn(StderrEntry::new(
            StderrKind::ReviewUnresolved,
            format!("subtask {}: {}", subtask.id, defect.note),
        ));
    }
}

type DefectRef = (Option<ArtifactId>, Defect);

fn collect_defects(reply: &Envelope, floor: f64) -> Vec<DefectRef> {
    let mut defects = Vec::new();
    if reply.stdout_is_empty() {
        defects.push((
            None,
            Defect {
                kind: DefectKind::Gaps,
                note: "no output produced".to_string(),
            },
        ));
        return defects;
    }
    if let Some(stdout) = &reply.stdout
        && let Some(package) = &stdout.work_package
    {
        for artifact in &package.artifacts {
            if artifact.confidence < floor {
                defects.push((
                    Some(artifact.id.clone()),
                    Defect {
                        kind: DefectKind::LowConfidence,
                        note: format!(
                            "artifact '{}' confidence {:.2} below floor {floor:.2}",
                            artifact.title, artifact.confidence
                        ),
                    },
                ));
            }
            if artifact.content.trim().is_empty() {
                defects.push((
                    Some(artifact.id.clone()),
                    Defect {
                        kind: DefectKind::Format,
                        note: format!("artifact '{}' has no content", artifact.title),
                    },
                ));
            }
        }
    }
    defects
}

fn child_unspent(reply: &Envelope, subtask: &SubTask) -> u64 {
    let _ = subtask;
    let granted = reply.constraints.token_budget;
    let used = reply
        .metadata
        .as_ref()
        .map(|metadata| metadata.tokens_used)
        .unwrap_or(granted);
    granted.saturating_sub(used)
}

/// Respawn the child with its remaining sub-budget and the defect report
/// folded into its context.
async fn spawn_revision(
    runtime: &Arc<CellRuntime>,
    ctx: &CellCtx,
    subtask: &SubTask,
    reply: &Envelope,
    defects: &[DefectRef],
    unspent: u64,
    cancel: tokio::sync::watch::Receiver<bool>,
) -> Envelope {
    let mut prior_findings: Vec<String> = defects
        .iter()
        .map(|(_, defect)| format!("reviewer defect: {}", defect.note))
        .collect();
    if let Some(stdout) = &reply.stdout
        && let Some(package) = &stdout.work_package
    {
        prior_findings.extend(package.key_findings.iter().cloned());
    }

    let mut envelope = reply.clone();
    envelope.stdout = None;
    envelope.stderr = Default::default();
    envelope.metadata = None;
    envelope.context.prior_findings = prior_findings;
    envelope.constraints.token_budget = unspent;

    let budget = TokenBudget {
        total: unspent,
        remaining: unspent,
        depth: ctx.governor.budget().depth + 1,
        max_depth: ctx.governor.budget().max_depth,
        can_delegate: false,
        carve: ctx.governor.budget().carve,
    };
    let spec = SpawnSpec {
        envelope,
        budget,
        parent: Some(ctx.identity.cell_id.clone()),
        cell_id: None,
        role: if subtask.assigned_role.is_empty() {
            None
        } else {
            Some(subtask.assigned_role.clone())
        },
        level: Some(ctx.identity.level.next_lower().unwrap_or(CellLevel::Intern)),
        trace_id: ctx.endpoint.trace_id().clone(),
        cancel,
    };
    runtime.clone().run_cell(spec).await
}

/// Journal and escalate a failed child.
async fn absorb_child_failure(ctx: &mut CellCtx, subtask: &SubTask, reply: &Envelope) {
    if !reply.stderr.has_failures() {
        return;
    }
    let severity = if reply.stdout_is_empty() {
        Severity::High
    } else {
        Severity::Medium
    };
    let messages: Vec<String> = reply
        .stderr
        .failures
        .iter()
        .map(|failure| failure.message.clone())
        .collect();
    ctx.memory.journal_mut().record(
        ErrorEntry::new(
            ErrorId::new(ctx.ids.next_id("err")),
            ErrorSource::DelegationFailure,
            "child_failure",
            format!("subtask {} failed: {}", subtask.id, messages.join("; ")),
            severity,
        )
        .with_context(serde_json::json!({ "subtask": subtask.id })),
    );
    if severity >= Severity::High {
        ctx.memory.stderr_mut().escalate(StderrEntry::new(
            StderrKind::DelegationFailure,
            format!("subtask {} produced no usable output", subtask.id),
        ));
    }
}

/// Fold completed children into the parent's artifacts and facts.
fn assemble(ctx: &mut CellCtx, completed: Vec<(SubTask, Envelope)>) {
    let mut artifacts_by_task: FxHashMap<TaskId, Vec<ArtifactId>> = FxHashMap::default();

    for (subtask, reply) in completed {
        let Some(stdout) = reply.stdout else { continue };
        let Some(package) = stdout.work_package else {
            continue;
        };
        let confidence = package.overall_confidence;
        let source = reply
            .metadata
            .as_ref()
            .map(|metadata| metadata.cell_id.as_str().to_string())
            .unwrap_or_else(|| subtask.id.as_str().to_string());

        for finding in &package.key_findings {
            ctx.memory
                .add_fact(Fact::new(finding.clone(), confidence, source.clone()));
        }

        // Dependency artifacts are causal inputs of this subtask's output.
        let inputs: Vec<ArtifactId> = subtask
            .depends_on
            .iter()
            .flat_map(|dep| artifacts_by_task.get(dep).cloned().unwrap_or_default())
            .collect();

        let mut produced = Vec::new();
        for mut artifact in package.artifacts {
            artifact.kind = rekind(artifact.kind, &subtask.expected_output);
            if artifact.derived_from.is_empty() {
                artifact.derived_from = inputs.clone();
            }
            produced.push(artifact.id.clone());
            ctx.artifacts.push(artifact);
        }
        artifacts_by_task.insert(subtask.id.clone(), produced);
    }
}

/// Nudge an artifact's kind toward what the subtask promised.
fn rekind(kind: ArtifactKind, expected_output: &str) -> ArtifactKind {
    let expected = expected_output.to_lowercase();
    if expected.contains("dataset") || expected.contains("comparison table") {
        ArtifactKind::Dataset
    } else if expected.contains("recommendation") || expected.contains("projection") {
        ArtifactKind::Recommendation
    } else if expected.contains("code") {
        ArtifactKind::Code
    } else if expected.contains("evidence") {
        ArtifactKind::Evidence
    } else {
        kind
    }
}

/// A numeric claim extracted from a fact: the last number is the value,
/// every other token (years and ordinals included) keys the entity.
fn numeric_claim(content: &str) -> Option<(String, f64)> {
    let words: Vec<&str> = content.split_whitespace().collect();
    let value_index = words.iter().rposition(|word| {
        word.trim_matches(|c: char| !c.is_ascii_digit() && c != '.' && c != '-')
            .parse::<f64>()
            .is_ok()
    })?;
    let value = words[value_index]
        .trim_matches(|c: char| !c.is_ascii_digit() && c != '.' && c != '-')
        .parse::<f64>()
        .ok()?;
    let entity: Vec<String> = words
        .iter()
        .enumerate()
        .filter(|(i, _)| *i != value_index)
        .map(|(_, word)| word.to_lowercase())
        .collect();
    if entity.is_empty() {
        return None;
    }
    Some((entity.join(" "), value))
}

/// Cross-branch contradiction handling.
///
/// Two children reporting different numbers for the same entity tie-break
/// on confidence; within epsilon both survive as competing hypotheses, a
/// `contradiction` warning is raised, and the package confidence is capped
/// at 0.5 through the competing-hypotheses artifact.
fn resolve_contradictions(ctx: &mut CellCtx) {
    let epsilon = ctx.config.monitor.confidence_epsilon;
    let claims: Vec<(crate::types::FactId, String, f64, f64, String)> = ctx
        .memory
        .facts()
        .iter()
        .filter_map(|fact| {
            numeric_claim(&fact.content).map(|(entity, value)| {
                (
                    fact.id.clone(),
                    entity,
                    value,
                    fact.confidence,
                    fact.source.clone(),
                )
            })
        })
        .collect();

    let mut contradictions: Vec<(String, String, String)> = Vec::new();
    for (i, a) in claims.iter().enumerate() {
        for b in claims.iter().skip(i + 1) {
            if a.1 != b.1 || a.4 == b.4 || (a.2 - b.2).abs() < f64::EPSILON {
                continue;
            }
            if (a.3 - b.3).abs() > epsilon {
                // Clear winner on confidence: demote the loser.
                let loser = if a.3 < b.3 { &a.0 } else { &b.0 };
                ctx.memory.revise_confidence(&loser.clone(), 0.25);
                continue;
            }
            let statement_a = format!("{} = {}", a.1, a.2);
            let statement_b = format!("{} = {}", b.1, b.2);
            contradictions.push((a.1.clone(), statement_a, statement_b));
        }
    }

    for (entity, statement_a, statement_b) in contradictions {
        ctx.memory.add_hypothesis(statement_a.clone());
        ctx.memory.add_hypothesis(statement_b.clone());
        ctx.memory
            .set_hypothesis_state(&statement_a, HypothesisState::Open);
        ctx.memory
            .set_hypothesis_state(&statement_b, HypothesisState::Open);
        ctx.memory.warn(
            StderrEntry::new(
                StderrKind::Contradiction,
                format!("children disagree on {entity}: {statement_a} vs {statement_b}"),
            )
            .with_context(serde_json::json!({ "entity": entity })),
        );
        // Competing hypotheses ride along as a capped-confidence artifact,
        // which drags overall confidence to 0.5 or below.
        let artifact = Artifact::new(
            ArtifactId::new(ctx.ids.next_id("artifact")),
            ArtifactKind::Evidence,
            format!("competing hypotheses: {entity}"),
            format!("{statement_a}\n{statement_b}\n"),
            0.45,
        );
        ctx.artifacts.push(artifact);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn numeric_claims_extract_entity_and_value() {
        let (entity, value) = numeric_claim("Example Corp 2024 revenue was 14.5").unwrap();
        assert!(entity.contains("revenue"));
        assert!((value - 14.5).abs() < f64::EPSILON);
        assert!(numeric_claim("no numbers here").is_none());
    }

    #[test]
    fn rekind_follows_expected_output() {
        assert_eq!(
            rekind(ArtifactKind::Report, "a comparison dataset"),
            ArtifactKind::Dataset
        );
        assert_eq!(
            rekind(ArtifactKind::Report, "2025 projection recommendation"),
            ArtifactKind::Recommendation
        );
        assert_eq!(rekind(ArtifactKind::Report, "a memo"), ArtifactKind::Report);
    }
}
