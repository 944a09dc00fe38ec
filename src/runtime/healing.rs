//! The healing loop driver.
//!
//! Runs a mini cognitive cycle per error: diagnose, consult learned fix
//! patterns, then either fix inline or delegate the fix to a child cell
//! scoped to that one error. Every applied fix is followed by a cascade
//! check whose claims are validated against actual memory state before
//! they may enter the journal.

use std::sync::Arc;

use crate::budget::TokenBudget;
use crate::collaborators::{ChatMessage, GenerateParams};
use crate::cycle::CellCtx;
use crate::envelope::{
    Authority, Constraints, Envelope, Instruction, StderrEntry, StderrKind, TaskContext,
};
use crate::heal::{
    self, ConvergenceDetector, ConvergenceReason, HealProgress, HealSummary, patterns,
};
use crate::journal::{ErrorEntry, ErrorStatus, FixAttempt, FixResult};
use crate::memory::Fact;
use crate::trace::TraceEvent;
use crate::types::{ArtifactId, ErrorId, Intent, Severity};

use super::{CellRuntime, SpawnSpec};

/// Strategy recorded when no learned pattern applies.
const DEFAULT_STRATEGY: &str = "re-execute failed step with corrected parameters";

/// Run the healing loop until the convergence detector stops it.
pub async fn run(runtime: &Arc<CellRuntime>, ctx: &mut CellCtx) -> HealSummary {
    let is_intern = ctx.identity.level == crate::types::CellLevel::Intern;
    let max_iterations = ctx
        .config
        .max_heal_iterations(ctx.identity.level.is_manager_or_above());
    let detector = ConvergenceDetector::new(
        &ctx.config.healing,
        max_iterations,
        ctx.governor.min_heal_reserve(),
    );

    let mut summary = HealSummary {
        iterations: 0,
        fixed: 0,
        wont_fix: 0,
        cascades_discovered: 0,
        reason: ConvergenceReason::Continue,
    };
    let mut resolved_last = 0usize;
    let mut open_at_last_start = ctx.memory.journal().unresolved_count();

    loop {
        let progress = HealProgress {
            iteration: summary.iterations,
            unresolved_now: ctx.memory.journal().unresolved_count(),
            resolved_last,
            open_at_last_start,
            cascade_depth: ctx.memory.journal().max_cascade_depth(),
            budget_remaining: ctx.governor.remaining(),
        };
        let decision = detector.should_continue(progress);
        if !decision.proceed {
            summary.reason = decision.reason;
            break;
        }

        ctx.trace.emit(TraceEvent::HealIteration {
            trace_id: ctx.endpoint.trace_id().clone(),
            cell_id: ctx.identity.cell_id.clone(),
            iteration: summary.iterations,
            unresolved: progress.unresolved_now,
        });

        open_at_last_start = progress.unresolved_now;
        resolved_last = 0;

        for error_id in heal::prioritise(ctx.memory.journal()) {
            if !ctx.governor.can_heal(is_intern) {
                skip_for_budget(ctx, &error_id);
                summary.wont_fix += 1;
                resolved_last += 1;
                continue;
            }
            let report = fix(runtime, ctx, &error_id).await;
            if report.fixed {
                summary.fixed += 1;
                resolved_last += 1;
            }
            summary.cascades_discovered += report.cascades.len();
            for cascade in &report.cascades {
                let _ = ctx
                    .memory
                    .journal_mut()
                    .link_cascade(&error_id, cascade);
            }
            if ctx.endpoint.parent().is_some() {
                let _ = ctx
                    .endpoint
                    .heal_result(error_id.clone(), report.fixed, report.cascades.clone())
                    .await;
            }
        }
        summary.iterations += 1;
    }
    summary
}

/// Mark an error as not-to-be-fixed because the budget floor was hit.
fn skip_for_budget(ctx: &mut CellCtx, error_id: &ErrorId) {
    let _ = ctx
        .memory
        .journal_mut()
        .set_root_cause(error_id, "budget_exhausted");
    let _ = ctx
        .memory
        .journal_mut()
        .transition(error_id, ErrorStatus::WontFix);
    let message = ctx
        .memory
        .journal()
        .get(error_id)
        .map(|entry| entry.message.clone())
        .unwrap_or_default();
    ctx.memory.warn(
        StderrEntry::new(
            StderrKind::BudgetExhausted,
            format!("skipped healing of: {message}"),
        )
        .with_context(serde_json::json!({ "error_id": error_id })),
    );
}

struct FixReport {
    fixed: bool,
    cascades: Vec<ErrorId>,
}

/// Mini cognitive cycle scoped to one error.
async fn fix(runtime: &Arc<CellRuntime>, ctx: &mut CellCtx, error_id: &ErrorId) -> FixReport {
    let Some(entry) = ctx.memory.journal().get(error_id).cloned() else {
        return FixReport {
            fixed: false,
            cascades: Vec::new(),
        };
    };

    // Diagnose.
    let _ = ctx
        .memory
        .journal_mut()
        .transition(error_id, ErrorStatus::Diagnosing);
    if let Some(root_cause) = diagnose(ctx, &entry).await {
        let _ = ctx.memory.journal_mut().set_root_cause(error_id, root_cause);
    }

    // Prefer a learned strategy when the generalised signature matches.
    let domain = ctx.domain().to_string();
    let strategy = patterns::find_matching(ctx.memory.fix_patterns(), &entry, &domain)
        .map(|pattern| pattern.strategy.clone())
        .unwrap_or_else(|| DEFAULT_STRATEGY.to_string());

    let _ = ctx
        .memory
        .journal_mut()
        .transition(error_id, ErrorStatus::Fixing);

    let delegate_fix = entry.severity >= Severity::High && ctx.governor.can_delegate();
    let (succeeded, tokens) = if delegate_fix {
        fix_by_delegation(runtime, ctx, &entry).await
    } else {
        fix_inline(ctx, &entry, &strategy).await
    };

    let attempt_n = ctx
        .memory
        .journal()
        .get(error_id)
        .map(|e| e.attempts.len() as u32 + 1)
        .unwrap_or(1);

    let mut cascades = Vec::new();
    if succeeded {
        cascades = cascade_check(ctx, &entry).await;
        let attempt = FixAttempt {
            n: attempt_n,
            strategy: strategy.clone(),
            result: if cascades.is_empty() {
                FixResult::Success
            } else {
                FixResult::Cascaded
            },
            discovered_error_ids: cascades.clone(),
            tokens_consumed: tokens,
            at: chrono::Utc::now(),
        };
        let _ = ctx.memory.journal_mut().record_attempt(error_id, attempt);
        let _ = ctx
            .memory
            .journal_mut()
            .transition(error_id, ErrorStatus::Fixed);
        let pattern = patterns::learned_from(&entry, &strategy, &domain);
        ctx.memory.record_fix_pattern(pattern);
    } else {
        let attempt = FixAttempt {
            n: attempt_n,
            strategy,
            result: FixResult::Failed,
            discovered_error_ids: Vec::new(),
            tokens_consumed: tokens,
            at: chrono::Utc::now(),
        };
        let _ = ctx.memory.journal_mut().record_attempt(error_id, attempt);
    }

    FixReport {
        fixed: succeeded,
        cascades,
    }
}

async fn diagnose(ctx: &mut CellCtx, entry: &ErrorEntry) -> Option<String> {
    let related: Vec<String> = entry
        .related_errors
        .iter()
        .filter_map(|id| ctx.memory.journal().get(id))
        .map(|related| related.message.clone())
        .collect();
    let prompt = format!(
        "Diagnose the root cause of this error.\n\
         type: {}\nmessage: {}\ncontext: {}\nrelated: [{}]\n\
         Memory digest:\n{}\nAnswer with one sentence naming the root cause.",
        entry.error_type,
        entry.message,
        entry.context,
        related.join("; "),
        ctx.memory.digest(5),
    );
    let system = ctx.system_prompt();
    match ctx
        .collaborators
        .inference
        .generate(
            &system,
            &[ChatMessage::user(prompt)],
            GenerateParams::default(),
        )
        .await
    {
        Ok(generation) => {
            ctx.governor.charge(generation.tokens_used);
            Some(generation.text)
        }
        Err(error) => {
            tracing::debug!(%error, "diagnosis generation failed");
            None
        }
    }
}

/// Apply a fix inline: one corrective generation folded into memory.
async fn fix_inline(ctx: &mut CellCtx, entry: &ErrorEntry, strategy: &str) -> (bool, u64) {
    let prompt = format!(
        "Apply this remediation strategy and state the corrected result.\n\
         strategy: {strategy}\nerror: {}\nroot cause: {}\n",
        entry.message,
        entry.root_cause.as_deref().unwrap_or("unknown"),
    );
    let system = ctx.system_prompt();
    match ctx
        .collaborators
        .inference
        .generate(
            &system,
            &[ChatMessage::user(prompt)],
            GenerateParams::default(),
        )
        .await
    {
        Ok(generation) => {
            ctx.governor.charge(generation.tokens_used);
            ctx.memory
                .add_fact(Fact::new(generation.text, 0.75, "self-heal"));
            (true, generation.tokens_used)
        }
        Err(error) => {
            tracing::debug!(%error, "inline fix generation failed");
            (false, 0)
        }
    }
}

/// Spawn a child cell scoped to diagnosing and fixing one error.
async fn fix_by_delegation(
    runtime: &Arc<CellRuntime>,
    ctx: &mut CellCtx,
    entry: &ErrorEntry,
) -> (bool, u64) {
    let per_child_minimum = ctx.config.delegation.per_child_minimum;
    let carved = ctx
        .governor
        .budget_mut()
        .carve_children(&[1], per_child_minimum);
    let child_budget: TokenBudget = match carved {
        Ok(mut budgets) => budgets.remove(0),
        Err(error) => {
            tracing::debug!(%error, "cannot carve a heal child; fixing inline");
            return fix_inline(ctx, entry, DEFAULT_STRATEGY).await;
        }
    };
    let child_total = child_budget.total;

    let envelope = Envelope {
        envelope_version: crate::envelope::ENVELOPE_VERSION.to_string(),
        instruction: Instruction::new(
            format!(
                "Diagnose, fix, and cascade-check this error: {} (type {}, root cause: {})",
                entry.message,
                entry.error_type,
                entry.root_cause.as_deref().unwrap_or("unknown"),
            ),
            Intent::Execute,
        ),
        context: TaskContext {
            parent_task_id: None,
            organisational_goal: ctx.envelope.context.organisational_goal.clone(),
            domain_hints: ctx.envelope.context.domain_hints.clone(),
            prior_findings: vec![ctx.memory.digest(5)],
        },
        constraints: Constraints {
            token_budget: child_total,
            quality_level: ctx.envelope.constraints.quality_level,
            max_delegation_depth: ctx.envelope.constraints.max_delegation_depth,
            deadline_ms: ctx.envelope.constraints.deadline_ms,
        },
        authority: Authority {
            can_delegate: false,
            tool_access: ctx.envelope.authority.tool_access.clone(),
        },
        stdout: None,
        stderr: Default::default(),
        metadata: None,
    };

    let spec = SpawnSpec {
        envelope,
        budget: child_budget,
        parent: Some(ctx.identity.cell_id.clone()),
        cell_id: None,
        role: Some("coder".to_string()),
        level: ctx.identity.level.next_lower(),
        trace_id: ctx.endpoint.trace_id().clone(),
        cancel: ctx.cancel.clone(),
    };
    let reply = runtime.clone().run_cell(spec).await;

    let used = reply
        .metadata
        .as_ref()
        .map(|m| m.tokens_used)
        .unwrap_or(child_total);
    // Return what the child did not consume to the parent's pool.
    let unspent = child_total.saturating_sub(used);
    ctx.governor.budget_mut().remaining += unspent;

    let fixed = !reply.stderr.has_failures() && !reply.stdout_is_empty();
    if let Some(stdout) = &reply.stdout
        && let Some(package) = &stdout.work_package
    {
        for finding in &package.key_findings {
            ctx.memory.add_fact(Fact::new(
                finding.clone(),
                package.overall_confidence,
                "heal-child",
            ));
        }
    }
    (fixed, used)
}

/// Ask which related invariants the fix may have violated, then validate
/// every claim against actual state before admitting it to the journal.
async fn cascade_check(ctx: &mut CellCtx, entry: &ErrorEntry) -> Vec<ErrorId> {
    let artifact_ids: Vec<ArtifactId> = ctx
        .artifacts
        .iter()
        .map(|artifact| artifact.id.clone())
        .collect();
    let prompt = format!(
        "A fix was just applied for: {}\n\
         Which related invariants could now be violated? Consider missing \
         prerequisites, type mismatches, stale caches, and contradicting \
         artifacts. Known artifact ids: [{}].\n\
         Respond with a JSON array of objects with keys \"error_type\", \
         \"message\", \"severity\" (low|medium|high|critical), and either \
         \"artifact_ref\" (an artifact id) or \"fact_ref\" (fact content). \
         Respond with [] when nothing is at risk.",
        entry.message,
        artifact_ids
            .iter()
            .map(|id| id.as_str())
            .collect::<Vec<_>>()
            .join(", "),
    );
    let system = ctx.system_prompt();
    let claims = match ctx
        .collaborators
        .inference
        .generate(
            &system,
            &[ChatMessage::user(prompt)],
            GenerateParams::default(),
        )
        .await
    {
        Ok(generation) => {
            ctx.governor.charge(generation.tokens_used);
            heal::parse_claims(&generation.text)
        }
        Err(error) => {
            tracing::debug!(%error, "cascade check generation failed");
            Vec::new()
        }
    };

    let mut admitted = Vec::new();
    for claim in claims {
        if !heal::validate_claim(&claim, &artifact_ids, &ctx.memory) {
            tracing::debug!(?claim, "dropping ungrounded cascade claim");
            continue;
        }
        let id = ErrorId::new(ctx.ids.next_id("err"));
        let cascade_entry = ErrorEntry::new(
            id.clone(),
            crate::journal::ErrorSource::Validation,
            claim.error_type.clone(),
            claim.message.clone(),
            claim.severity,
        )
        .with_context(serde_json::json!({
            "artifact_ref": claim.artifact_ref,
            "fact_ref": claim.fact_ref,
        }))
        .related_to(entry.id.clone());
        ctx.memory.journal_mut().record(cascade_entry);
        admitted.push(id);
    }
    admitted
}
