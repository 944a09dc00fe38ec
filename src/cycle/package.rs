//! Package: assemble the outgoing envelope.
//!
//! Synthesises the work package from facts, decisions, and any artifacts
//! accumulated by delegation, stamps metadata, and folds the stderr report
//! accumulated in working memory into the reply. Quality floors are
//! enforced here: artifacts below the floor raise a `low_confidence`
//! warning, and low-confidence facts can only be leaned on with an explicit
//! gap annotation.

use super::{CellCtx, ExecuteOutcome};
use crate::artifact::{Artifact, ArtifactKind, WorkPackage, overall_confidence};
use crate::envelope::{
    Envelope, EnvelopeMetadata, OutputFormat, StderrEntry, StderrKind, StdoutPayload,
};
use crate::types::{ArtifactId, Intent};

/// Facts surfaced as key findings.
const KEY_FINDINGS: usize = 5;
/// Facts folded into a synthesised artifact body.
const BODY_FACTS: usize = 8;

/// Assemble the reply envelope for this cell.
pub fn run(ctx: &mut CellCtx, outcome: &ExecuteOutcome) -> Envelope {
    let mut reply = ctx.envelope.reply();

    // Delegation already produced artifacts; the solo path synthesises one
    // from memory.
    let mut artifacts = std::mem::take(&mut ctx.artifacts);
    if artifacts.is_empty() && !ctx.memory.facts().is_empty() {
        artifacts.push(synthesise_artifact(ctx));
    }

    let floor = ctx.envelope.constraints.quality_level.confidence_floor();
    for artifact in &artifacts {
        if artifact.confidence < floor {
            ctx.memory.warn(
                StderrEntry::new(
                    StderrKind::LowConfidence,
                    format!(
                        "artifact '{}' confidence {:.2} below {:?} floor {floor:.2}",
                        artifact.title,
                        artifact.confidence,
                        ctx.envelope.constraints.quality_level
                    ),
                )
                .with_context(serde_json::json!({ "artifact_id": artifact.id })),
            );
        }
    }

    let key_findings: Vec<String> = ctx
        .memory
        .strongest_facts(KEY_FINDINGS)
        .into_iter()
        .map(|fact| fact.content.clone())
        .collect();

    let summary = match outcome {
        ExecuteOutcome::Completed => summarise(ctx, &key_findings),
        ExecuteOutcome::Partial { why } => {
            format!("{} (partial: {why})", summarise(ctx, &key_findings))
        }
        ExecuteOutcome::Failed { reason } => format!("failed: {reason}"),
    };

    let confidence = overall_confidence(&artifacts);
    let format = artifacts
        .first()
        .map(|artifact| match artifact.kind {
            ArtifactKind::Report | ArtifactKind::Evidence => OutputFormat::Report,
            ArtifactKind::Dataset => OutputFormat::Dataset,
            ArtifactKind::Recommendation => OutputFormat::Recommendation,
            ArtifactKind::Code => OutputFormat::Code,
        })
        .unwrap_or_default();

    let package = WorkPackage {
        summary: summary.clone(),
        artifacts,
        overall_confidence: confidence,
        key_findings,
    };

    let content = package
        .artifacts
        .first()
        .map(|artifact| artifact.content.clone())
        .unwrap_or_default();

    reply.stdout = Some(StdoutPayload {
        format,
        work_package: Some(package),
        content,
        summary,
    });
    reply.stderr = ctx.memory.take_stderr();

    if let ExecuteOutcome::Failed { reason } = outcome {
        reply.stderr.fail(StderrEntry::new(
            StderrKind::QualityGate,
            format!("execution failed: {reason}"),
        ));
        // A failed run does not stand behind its output.
        reply.stdout = Some(StdoutPayload::default());
    }

    let elapsed = ctx.started.elapsed().as_millis() as u64;
    reply.metadata = Some(EnvelopeMetadata {
        trace_id: ctx.endpoint.trace_id().clone(),
        cell_id: ctx.identity.cell_id.clone(),
        tokens_used: ctx.governor.budget().used(),
        duration_ms: elapsed,
        confidence,
    });
    reply
}

/// Build the minimal envelope for a fatal abort: empty stdout, one failure.
pub fn aborted(ctx: &mut CellCtx, kind: StderrKind, message: String) -> Envelope {
    let mut reply = ctx.envelope.reply();
    reply.stdout = Some(StdoutPayload::default());
    reply.stderr = ctx.memory.take_stderr();
    reply.stderr.fail(StderrEntry::new(kind, message));
    reply.metadata = Some(EnvelopeMetadata {
        trace_id: ctx.endpoint.trace_id().clone(),
        cell_id: ctx.identity.cell_id.clone(),
        tokens_used: ctx.governor.budget().used(),
        duration_ms: ctx.started.elapsed().as_millis() as u64,
        confidence: 0.0,
    });
    reply
}

/// Synthesise the solo path's primary artifact from working memory.
fn synthesise_artifact(ctx: &mut CellCtx) -> Artifact {
    let strongest = ctx.memory.strongest_facts(BODY_FACTS);
    let mut sources: Vec<String> = Vec::new();
    let mut body = String::new();
    let mut confidence_sum = 0.0;
    let mut gaps: Vec<String> = Vec::new();
    let used = strongest.len().max(1);
    for fact in &strongest {
        body.push_str(&fact.content);
        body.push('\n');
        confidence_sum += fact.confidence;
        if !sources.contains(&fact.source) {
            sources.push(fact.source.clone());
        }
        if fact.confidence < 0.3 {
            gaps.push(format!(
                "leans on low-confidence fact: {}",
                fact.content.chars().take(60).collect::<String>()
            ));
        }
    }
    for decision in ctx.memory.decisions() {
        body.push_str(&format!("decision: {} ({})\n", decision.summary, decision.rationale));
    }

    let kind = match ctx.envelope.instruction.intent {
        Intent::Research | Intent::Analyse | Intent::Synthesise => ArtifactKind::Report,
        Intent::Decide => ArtifactKind::Recommendation,
        Intent::Execute => ArtifactKind::Code,
    };
    let mut artifact = Artifact::new(
        ArtifactId::new(ctx.ids.next_id("artifact")),
        kind,
        ctx.memory.focus().chars().take(80).collect::<String>(),
        body,
        confidence_sum / used as f64,
    )
    .with_sources(sources);
    artifact.gaps = gaps;
    artifact
}

fn summarise(ctx: &CellCtx, key_findings: &[String]) -> String {
    match key_findings.first() {
        Some(finding) => format!(
            "{}: {}",
            ctx.memory.focus().chars().take(60).collect::<String>(),
            finding.chars().take(160).collect::<String>()
        ),
        None => format!("no findings for: {}", ctx.memory.focus()),
    }
}
