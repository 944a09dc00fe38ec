//! Fix-pattern learning and Vault persistence.
//!
//! On a successful fix the error's generalised signature and the winning
//! strategy are appended to the cell's fix patterns. Patterns are
//! cell-local; sharing happens only through the Vault, namespaced by
//! domain, and a fresh cell seeds its patterns from there (top-K by
//! frequency).

use serde_json::json;

use crate::collaborators::{CollaboratorError, Vault};
use crate::journal::ErrorEntry;
use crate::memory::FixPattern;
use crate::utils::text::template_strip;

/// Generalised signature of an error: template-stripped message.
#[must_use]
pub fn signature_of(entry: &ErrorEntry) -> String {
    template_strip(&entry.message)
}

/// Find a learned pattern matching this error, if any.
#[must_use]
pub fn find_matching<'a>(
    patterns: &'a [FixPattern],
    entry: &ErrorEntry,
    domain: &str,
) -> Option<&'a FixPattern> {
    let signature = signature_of(entry);
    patterns
        .iter()
        .filter(|p| p.error_type == entry.error_type && p.signature == signature)
        .find(|p| p.domain == domain || p.domain == "*")
}

/// Build the pattern learned from a successful fix.
#[must_use]
pub fn learned_from(entry: &ErrorEntry, strategy: &str, domain: &str) -> FixPattern {
    FixPattern {
        signature: signature_of(entry),
        error_type: entry.error_type.clone(),
        domain: domain.to_string(),
        strategy: strategy.to_string(),
        occurrences: 1,
    }
}

fn vault_key(domain: &str) -> String {
    format!("fix_patterns/{domain}")
}

/// Persist a cell's patterns to the Vault under its domain namespace.
pub async fn persist(
    vault: &dyn Vault,
    domain: &str,
    patterns: &[FixPattern],
) -> Result<(), CollaboratorError> {
    if patterns.is_empty() {
        return Ok(());
    }
    let blob = json!(patterns);
    vault.put(&vault_key(domain), blob, None).await
}

/// Seed patterns from the Vault, bounded to the top `limit` by frequency.
pub async fn seed(
    vault: &dyn Vault,
    domain: &str,
    limit: usize,
) -> Result<Vec<FixPattern>, CollaboratorError> {
    if limit == 0 {
        return Ok(Vec::new());
    }
    let Some(blob) = vault.get(&vault_key(domain)).await? else {
        return Ok(Vec::new());
    };
    let mut patterns: Vec<FixPattern> = serde_json::from_value(blob).unwrap_or_default();
    patterns.sort_by(|a, b| b.occurrences.cmp(&a.occurrences));
    patterns.truncate(limit);
    Ok(patterns)
}
