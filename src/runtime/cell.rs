//! The per-cell driver: one pass through the cognitive cycle.
//!
//! `drive` owns the phase sequencing and the failure semantics split:
//! retried internally (schema repairs, transient tool errors, inference
//! backoff — all inside the execute loop), surfaced as stderr warnings
//! (low confidence, minor unresolved errors, stagnation), surfaced as
//! stderr failures (heal exhaustion, budget exhaustion with no output),
//! and fatal aborts (invalid envelope, persistently unreachable tool
//! host, forced cancellation).

use std::sync::Arc;

use crate::bus::{BusPayload, ChannelKind};
use crate::cycle::{CellAbort, CellCtx, assess, execute, intake, package, plan};
use crate::envelope::{Envelope, StderrEntry, StderrKind};
use crate::heal::patterns;
use crate::trace::TraceEvent;
use crate::types::{CellState, ProcessingMode, Severity};

use super::{CellRuntime, delegate, healing};

/// Run one cell from Intake to its terminal envelope.
pub async fn drive(runtime: Arc<CellRuntime>, mut ctx: CellCtx) -> Envelope {
    phase(&ctx, CellState::Intaking);
    let intake_result = intake::run(&mut ctx).await;
    if let Err(abort) = intake_result {
        return abort_envelope(&mut ctx, abort);
    }

    phase(&ctx, CellState::Assessing);
    apply_redirects(&mut ctx);
    absorb_heal_requests(&mut ctx);
    assess::run(&mut ctx);

    let outcome = match ctx.mode {
        ProcessingMode::Direct | ProcessingMode::Solo => {
            phase(&ctx, CellState::Planning);
            ctx.plan = plan::build_step_plan(&mut ctx).await;
            phase(&ctx, CellState::Executing);
            let executed = execute::run(&mut ctx).await;
            match executed {
                Ok(outcome) => outcome,
                Err(abort) => return abort_envelope(&mut ctx, abort),
            }
        }
        ProcessingMode::Delegate | ProcessingMode::Hierarchy => {
            phase(&ctx, CellState::Planning);
            let delegated = delegate::run(&runtime, &mut ctx).await;
            match delegated {
                Ok(outcome) => outcome,
                Err(abort) => return abort_envelope(&mut ctx, abort),
            }
        }
        ProcessingMode::Heal => {
            // Output-with-detected-errors: heal first, then execute what
            // remains of the plan.
            phase(&ctx, CellState::Healing);
            let _ = healing::run(&runtime, &mut ctx).await;
            phase(&ctx, CellState::Planning);
            ctx.plan = plan::build_step_plan(&mut ctx).await;
            phase(&ctx, CellState::Executing);
            let executed = execute::run(&mut ctx).await;
            match executed {
                Ok(outcome) => outcome,
                Err(abort) => return abort_envelope(&mut ctx, abort),
            }
        }
    };

    // Heal phase: only when there is unresolved work and the reserve
    // allows it; otherwise unresolved entries surface on stderr below.
    if ctx.memory.journal().unresolved_count() > 0 {
        let is_intern = ctx.identity.level == crate::types::CellLevel::Intern;
        if ctx.governor.can_heal(is_intern) {
            phase(&ctx, CellState::Healing);
            let summary = healing::run(&runtime, &mut ctx).await;
            tracing::debug!(
                fixed = summary.fixed,
                wont_fix = summary.wont_fix,
                reason = ?summary.reason,
                "healing finished"
            );
        }
    }
    surface_unresolved(&mut ctx);

    phase(&ctx, CellState::Packaging);
    let mut reply = package::run(&mut ctx, &outcome);

    // Validate our own output; a defective package gets one repair pass,
    // persistent failure is fatal.
    if let Err(error) = reply.validate() {
        tracing::warn!(%error, "own output failed validation; repairing");
        repair_package(&mut reply);
        if let Err(error) = reply.validate() {
            return abort_envelope(
                &mut ctx,
                CellAbort::InvalidEnvelope(error),
            );
        }
    }

    // Flush learned fix patterns for future runs.
    if !ctx.memory.fix_patterns().is_empty() {
        let domain = ctx.domain().to_string();
        let _ = patterns::persist(
            ctx.collaborators.vault.as_ref(),
            &domain,
            ctx.memory.fix_patterns(),
        )
        .await;
    }

    phase(&ctx, CellState::Terminated);
    reply
}

fn phase(ctx: &CellCtx, state: CellState) {
    ctx.trace.emit(TraceEvent::PhaseChanged {
        trace_id: ctx.endpoint.trace_id().clone(),
        cell_id: ctx.identity.cell_id.clone(),
        state,
    });
}

/// Honour any pending REDIRECT before planning: latest wins.
fn apply_redirects(ctx: &mut CellCtx) {
    let redirects = ctx.endpoint.drain(ChannelKind::Redirect);
    if let Some(message) = redirects.into_iter().next_back()
        && let BusPayload::Redirect { focus, note } = message.payload
    {
        if let Some(focus) = focus {
            ctx.memory.set_focus(focus);
        }
        ctx.memory.add_decision("redirected by parent", note);
    }
}

/// Pull HEAL_REQUEST entries into the local journal.
fn absorb_heal_requests(ctx: &mut CellCtx) {
    for message in ctx.endpoint.drain(ChannelKind::HealRequest) {
        if let BusPayload::HealRequest { error } = message.payload {
            ctx.memory.journal_mut().record(*error);
        }
    }
}

/// Surface whatever remains unresolved after (or instead of) healing.
///
/// Severity high and critical entries become stderr failures; the rest are
/// warnings.
fn surface_unresolved(ctx: &mut CellCtx) {
    let unresolved: Vec<(String, Severity)> = ctx
        .memory
        .journal()
        .unresolved()
        .iter()
        .map(|entry| (entry.message.clone(), entry.severity))
        .collect();
    for (message, severity) in unresolved {
        let entry = StderrEntry::new(
            StderrKind::HealExhausted,
            format!("unresolved error: {message}"),
        );
        if severity >= Severity::High {
            ctx.memory.stderr_mut().fail(entry);
        } else {
            ctx.memory.stderr_mut().warn(entry);
        }
    }
}

/// Fix the fixable validation defects in a packaged envelope.
fn repair_package(reply: &mut Envelope) {
    if let Some(stdout) = &mut reply.stdout
        && let Some(package) = &mut stdout.work_package
    {
        for artifact in &mut package.artifacts {
            artifact.confidence = artifact.confidence.clamp(0.0, 1.0);
        }
        package.refresh_confidence();
    }
    if let Some(metadata) = &mut reply.metadata {
        metadata.confidence = metadata.confidence.clamp(0.0, 1.0);
    }
}

fn abort_envelope(ctx: &mut CellCtx, abort: CellAbort) -> Envelope {
    let kind = match &abort {
        CellAbort::InvalidEnvelope(_) => StderrKind::InvalidEnvelope,
        CellAbort::ToolHostUnreachable(_) => StderrKind::Runtime,
        CellAbort::Cancelled => StderrKind::Cancelled,
    };
    package::aborted(ctx, kind, abort.to_string())
}
