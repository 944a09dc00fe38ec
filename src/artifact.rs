//! Artifacts and the work package they travel in.
//!
//! An [`Artifact`] is a typed deliverable; a [`WorkPackage`] is the ordered
//! collection of artifacts a cell hands back through `stdout`. Artifact
//! order is *causal*: earlier artifacts are inputs or prerequisites of later
//! ones, and consumers may stream them but must never reorder them.

use serde::{Deserialize, Serialize};

use crate::types::ArtifactId;

/// Kind of deliverable an artifact carries.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArtifactKind {
    Report,
    Dataset,
    Recommendation,
    Code,
    Evidence,
}

/// A typed deliverable with provenance and known weaknesses.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Artifact {
    pub id: ArtifactId,
    pub kind: ArtifactKind,
    pub title: String,
    pub content: String,
    /// Confidence in `[0, 1]`.
    pub confidence: f64,
    /// Citations or upstream fact sources.
    #[serde(default)]
    pub sources: Vec<String>,
    /// Acknowledged gaps. Mandatory whenever the artifact leans on a fact
    /// below the 0.3 confidence line.
    #[serde(default)]
    pub gaps: Vec<String>,
    /// Causal inputs: ids of earlier artifacts this one is derived from.
    #[serde(default)]
    pub derived_from: Vec<ArtifactId>,
}

impl Artifact {
    #[must_use]
    pub fn new(
        id: ArtifactId,
        kind: ArtifactKind,
        title: impl Into<String>,
        content: impl Into<String>,
        confidence: f64,
    ) -> Self {
        Self {
            id,
            kind,
            title: title.into(),
            content: content.into(),
            confidence: confidence.clamp(0.0, 1.0),
            sources: Vec::new(),
            gaps: Vec::new(),
            derived_from: Vec::new(),
        }
    }

    #[must_use]
    pub fn with_sources(mut self, sources: Vec<String>) -> Self {
        self.sources = sources;
        self
    }

    #[must_use]
    pub fn with_gap(mut self, gap: impl Into<String>) -> Self {
        self.gaps.push(gap.into());
        self
    }

    #[must_use]
    pub fn derived_from(mut self, inputs: Vec<ArtifactId>) -> Self {
        self.derived_from = inputs;
        self
    }
}

/// The structured payload inside `stdout`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize, Default)]
pub struct WorkPackage {
    pub summary: String,
    /// Causally ordered deliverables.
    pub artifacts: Vec<Artifact>,
    /// Size-weighted mean of artifact confidences, capped above by the
    /// minimum artifact confidence so one weak artifact drags the total.
    pub overall_confidence: f64,
    pub key_findings: Vec<String>,
}

impl WorkPackage {
    #[must_use]
    pub fn new(summary: impl Into<String>) -> Self {
        Self {
            summary: summary.into(),
            ..Default::default()
        }
    }

    /// Append an artifact and refresh the overall confidence.
    pub fn push_artifact(&mut self, artifact: Artifact) {
        self.artifacts.push(artifact);
        self.overall_confidence = overall_confidence(&self.artifacts);
    }

    /// Recompute `overall_confidence` from the current artifact set.
    pub fn refresh_confidence(&mut self) {
        self.overall_confidence = overall_confidence(&self.artifacts);
    }

    /// Whether the artifact sequence respects every declared causal
    /// dependency: each `derived_from` id must appear *earlier* in the
    /// stream.
    #[must_use]
    pub fn is_causally_ordered(&self) -> bool {
        let mut seen: Vec<&ArtifactId> = Vec::with_capacity(self.artifacts.len());
        for artifact in &self.artifacts {
            if artifact
                .derived_from
                .iter()
                .any(|dep| !seen.contains(&dep))
            {
                return false;
            }
            seen.push(&artifact.id);
        }
        true
    }
}

/// Size-weighted mean of artifact confidences, capped above by the minimum.
///
/// Weighting by character count keeps a one-line caveat from washing out a
/// long report; the min-cap keeps one weak artifact visible in the total.
#[must_use]
pub fn overall_confidence(artifacts: &[Artifact]) -> f64 {
    if artifacts.is_empty() {
        return 0.0;
    }
    let mut weighted = 0.0;
    let mut weight_sum = 0.0;
    let mut min = f64::MAX;
    for artifact in artifacts {
        let weight = artifact.content.chars().count().max(1) as f64;
        weighted += artifact.confidence * weight;
        weight_sum += weight;
        min = min.min(artifact.confidence);
    }
    (weighted / weight_sum).min(min.max(0.0))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn artifact(id: &str, confidence: f64, len: usize) -> Artifact {
        Artifact::new(
            ArtifactId::from(id),
            ArtifactKind::Report,
            id,
            "x".repeat(len),
            confidence,
        )
    }

    #[test]
    fn overall_confidence_is_capped_by_minimum() {
        let artifacts = vec![artifact("big", 0.9, 1000), artifact("weak", 0.2, 10)];
        let overall = overall_confidence(&artifacts);
        assert!((overall - 0.2).abs() < f64::EPSILON);
    }

    #[test]
    fn uniform_confidence_passes_through() {
        let artifacts = vec![artifact("long", 0.7, 900), artifact("short", 0.7, 100)];
        let overall = overall_confidence(&artifacts);
        assert!((overall - 0.7).abs() < 1e-9);
    }

    #[test]
    fn causal_order_rejects_forward_references() {
        let mut package = WorkPackage::new("s");
        let a = artifact("a", 0.9, 10);
        let mut b = artifact("b", 0.9, 10);
        b.derived_from = vec![ArtifactId::from("a")];
        package.push_artifact(a);
        package.push_artifact(b);
        assert!(package.is_causally_ordered());

        let mut reversed = WorkPackage::new("s");
        let mut first = artifact("b", 0.9, 10);
        first.derived_from = vec![ArtifactId::from("a")];
        reversed.push_artifact(first);
        reversed.push_artifact(artifact("a", 0.9, 10));
        assert!(!reversed.is_causally_ordered());
    }

    #[test]
    fn empty_package_has_zero_confidence() {
        assert_eq!(overall_confidence(&[]), 0.0);
    }
}
