//! Cascade claims and their admission check.
//!
//! After a fix is applied, the inference provider is asked which related
//! invariants could now be violated. Its answers are *claims*; each one is
//! validated against actual memory state before it may enter the journal.
//! Speculation with no grounding evidence is dropped.

use serde::{Deserialize, Serialize};

use crate::memory::WorkingMemory;
use crate::types::{ArtifactId, Severity};
use crate::utils::text::{jaccard, token_set};

/// One follow-on defect the model suspects a fix introduced.
///
/// The shape matches the JSON the cascade-check prompt asks for; unknown
/// fields are ignored so prompt drift does not break parsing.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CascadeClaim {
    pub error_type: String,
    pub message: String,
    #[serde(default = "default_severity")]
    pub severity: Severity,
    /// Artifact the claim is about, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub artifact_ref: Option<ArtifactId>,
    /// Fact content the claim is about, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fact_ref: Option<String>,
}

fn default_severity() -> Severity {
    Severity::Medium
}

/// Minimum token overlap between a fact reference and some fact actually
/// held in memory for the claim to count as grounded.
const FACT_REF_OVERLAP: f64 = 0.3;

/// Admission check: does the claim's evidence exist in the cell's world?
///
/// - A claim about an artifact is admitted only if that artifact id was
///   actually produced.
/// - A claim about a fact is admitted only if memory holds a fact with
///   meaningful token overlap.
/// - A claim referencing nothing is pure speculation and is dropped.
#[must_use]
pub fn validate_claim(
    claim: &CascadeClaim,
    produced_artifacts: &[ArtifactId],
    memory: &WorkingMemory,
) -> bool {
    if let Some(artifact) = &claim.artifact_ref {
        return produced_artifacts.contains(artifact);
    }
    if let Some(reference) = &claim.fact_ref {
        let ref_tokens = token_set(reference);
        return memory
            .facts()
            .iter()
            .any(|fact| jaccard(&ref_tokens, &token_set(&fact.content)) > FACT_REF_OVERLAP);
    }
    false
}

/// Parse the cascade-check response: a JSON array of claims, or a single
/// claim object. Anything unparsable yields no claims.
#[must_use]
pub fn parse_claims(text: &str) -> Vec<CascadeClaim> {
    let trimmed = text.trim();
    if let Ok(claims) = serde_json::from_str::<Vec<CascadeClaim>>(trimmed) {
        return claims;
    }
    if let Ok(claim) = serde_json::from_str::<CascadeClaim>(trimmed) {
        return vec![claim];
    }
    Vec::new()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::Fact;

    fn memory_with(content: &str) -> WorkingMemory {
        let mut memory = WorkingMemory::new("focus");
        memory.add_fact(Fact::new(content, 0.8, "test"));
        memory
    }

    #[test]
    fn artifact_claims_need_a_real_artifact() {
        let claim = CascadeClaim {
            error_type: "stale_reference".into(),
            message: "artifact references replaced dataset".into(),
            severity: Severity::Medium,
            artifact_ref: Some(ArtifactId::from("artifact-1")),
            fact_ref: None,
        };
        let memory = WorkingMemory::new("f");
        assert!(validate_claim(
            &claim,
            &[ArtifactId::from("artifact-1")],
            &memory
        ));
        assert!(!validate_claim(&claim, &[], &memory));
    }

    #[test]
    fn fact_claims_need_overlapping_memory() {
        let claim = CascadeClaim {
            error_type: "number_mismatch".into(),
            message: "recomputed revenue differs".into(),
            severity: Severity::High,
            artifact_ref: None,
            fact_ref: Some("2023 revenue total".into()),
        };
        let grounded = memory_with("2023 revenue total was 1.2M");
        let ungrounded = memory_with("penguins are birds");
        assert!(validate_claim(&claim, &[], &grounded));
        assert!(!validate_claim(&claim, &[], &ungrounded));
    }

    #[test]
    fn referenceless_claims_are_dropped() {
        let claim = CascadeClaim {
            error_type: "vague".into(),
            message: "something may be wrong".into(),
            severity: Severity::Low,
            artifact_ref: None,
            fact_ref: None,
        };
        assert!(!validate_claim(&claim, &[], &WorkingMemory::new("f")));
    }

    #[test]
    fn parses_array_or_single() {
        let array = r#"[{"error_type":"a","message":"m"}]"#;
        assert_eq!(parse_claims(array).len(), 1);
        let single = r#"{"error_type":"a","message":"m","severity":"high"}"#;
        let claims = parse_claims(single);
        assert_eq!(claims[0].severity, Severity::High);
        assert!(parse_claims("not json").is_empty());
    }
}
