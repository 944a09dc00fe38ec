//! Intake: parse, validate, and enrich.
//!
//! The first phase of the cycle. Validates the envelope (rejecting with no
//! side effect on failure), sets the focus, pulls top-k domain knowledge
//! into working memory, seeds fix patterns from the Vault, and fetches the
//! tool catalogue filtered by the cell's authority.

use super::{CellAbort, CellCtx};
use crate::heal::patterns;

/// Facts requested from the knowledge service during intake.
const KNOWLEDGE_TOP_K: usize = 5;

pub async fn run(ctx: &mut CellCtx) -> Result<(), CellAbort> {
    ctx.envelope.validate()?;

    ctx.memory.set_focus(ctx.envelope.instruction.text.clone());

    // Knowledge enrichment: instruction text combined with domain hints.
    let query = if ctx.envelope.context.domain_hints.is_empty() {
        ctx.envelope.instruction.text.clone()
    } else {
        format!(
            "{} [{}]",
            ctx.envelope.instruction.text,
            ctx.envelope.context.domain_hints.join(", ")
        )
    };
    match ctx
        .collaborators
        .knowledge
        .search(&query, KNOWLEDGE_TOP_K, &ctx.envelope.context.domain_hints)
        .await
    {
        Ok(facts) => {
            for fact in facts {
                ctx.memory.add_fact(fact);
            }
        }
        Err(error) => {
            // Knowledge is an enrichment, not a prerequisite.
            tracing::debug!(%error, "knowledge search failed during intake");
        }
    }

    // Prior findings arrive as medium-confidence facts.
    let priors: Vec<String> = ctx.envelope.context.prior_findings.clone();
    for finding in priors {
        ctx.memory
            .add_fact(crate::memory::Fact::new(finding, 0.6, "prior_findings"));
    }

    // Seed learned fix patterns for this domain.
    let limit = ctx.config.healing.pattern_seed_limit;
    if limit > 0 {
        match patterns::seed(ctx.collaborators.vault.as_ref(), ctx.domain(), limit).await {
            Ok(seeded) if !seeded.is_empty() => {
                tracing::debug!(count = seeded.len(), "seeded fix patterns from vault");
                ctx.memory.seed_fix_patterns(seeded);
            }
            Ok(_) => {}
            Err(error) => tracing::debug!(%error, "fix-pattern seeding failed"),
        }
    }

    // Tool catalogue, filtered down to what authority grants.
    if ctx.envelope.authority.has_any_tools() {
        match ctx
            .collaborators
            .tools
            .list_tools(Some(ctx.domain()))
            .await
        {
            Ok(catalogue) => {
                ctx.catalogue = catalogue
                    .into_iter()
                    .filter(|spec| ctx.envelope.authority.allows_tool(&spec.name))
                    .collect();
            }
            Err(error) => {
                if let Some(abort) = CellAbort::from_collaborator(&error) {
                    return Err(abort);
                }
                tracing::warn!(%error, "tool catalogue unavailable; continuing without tools");
            }
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use crate::envelope::{Envelope, Instruction};
    use crate::types::Intent;

    #[test]
    fn invalid_envelope_fails_validation_before_side_effects() {
        let mut envelope = Envelope::request(Instruction::new("", Intent::Research), 1_000);
        envelope.instruction.text = String::new();
        assert!(envelope.validate().is_err());
    }
}
