//! Text signatures used by drift and stagnation detection.
//!
//! The monitor never embeds or calls out for similarity judgements; it works
//! on cheap lexical signatures. Token sets feed Jaccard overlap, canonical
//! hashes feed cycle detection, and template stripping generalises error
//! messages into reusable fix-pattern signatures.

use rustc_hash::{FxHashSet, FxHasher};
use std::hash::{Hash, Hasher};

/// Lowercased alphanumeric token set of a text.
pub fn token_set(text: &str) -> FxHashSet<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|t| t.len() > 2)
        .map(|t| t.to_lowercase())
        .collect()
}

/// Jaccard similarity of two sets, in `[0, 1]`.
///
/// Two empty sets are considered identical (similarity 1.0): a step that
/// produces nothing twice in a row is exactly the repetition the stagnation
/// detector is after.
pub fn jaccard<T: Eq + std::hash::Hash>(a: &FxHashSet<T>, b: &FxHashSet<T>) -> f64 {
    if a.is_empty() && b.is_empty() {
        return 1.0;
    }
    let intersection = a.intersection(b).count();
    let union = a.len() + b.len() - intersection;
    if union == 0 {
        return 1.0;
    }
    intersection as f64 / union as f64
}

/// Lexical distance between two texts, `1 - jaccard(tokens)`.
pub fn lexical_distance(a: &str, b: &str) -> f64 {
    1.0 - jaccard(&token_set(a), &token_set(b))
}

/// Canonical hash of a step-outcome description.
///
/// Whitespace runs collapse and case folds, so cosmetically different
/// renderings of the same outcome hash identically.
pub fn canonical_hash(text: &str) -> u64 {
    let mut hasher = FxHasher::default();
    for token in text.split_whitespace() {
        token.to_lowercase().hash(&mut hasher);
    }
    hasher.finish()
}

/// Strip volatile fragments from an error message, leaving a template.
///
/// Digit runs become `#`, quoted spans become `"_"`, so
/// `column 'q3_rev' not found in row 17` and
/// `column 'q4_rev' not found in row 4` share one signature.
pub fn template_strip(message: &str) -> String {
    let mut out = String::with_capacity(message.len());
    let mut chars = message.chars().peekable();
    while let Some(c) = chars.next() {
        match c {
            '0'..='9' => {
                while chars.peek().is_some_and(|n| n.is_ascii_digit()) {
                    chars.next();
                }
                out.push('#');
            }
            '\'' | '"' => {
                let quote = c;
                for n in chars.by_ref() {
                    if n == quote {
                        break;
                    }
                }
                out.push(quote);
                out.push('_');
                out.push(quote);
            }
            _ => out.push(c),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn jaccard_identical_and_disjoint() {
        let a = token_set("compare revenue growth");
        let b = token_set("compare revenue growth");
        let c = token_set("entirely different words");
        assert!((jaccard(&a, &b) - 1.0).abs() < f64::EPSILON);
        assert!(jaccard(&a, &c) < 0.01);
    }

    #[test]
    fn canonical_hash_ignores_whitespace_and_case() {
        assert_eq!(
            canonical_hash("Fetched   2023 Revenue"),
            canonical_hash("fetched 2023 revenue")
        );
        assert_ne!(
            canonical_hash("fetched 2023 revenue"),
            canonical_hash("fetched 2024 revenue")
        );
    }

    #[test]
    fn template_strip_generalises_volatile_parts() {
        let a = template_strip("column 'q3_rev' not found in row 17");
        let b = template_strip("column 'q4_rev' not found in row 4");
        assert_eq!(a, b);
        assert_eq!(a, "column '_' not found in row #");
    }

    #[test]
    fn lexical_distance_bounds() {
        assert!(lexical_distance("abc def", "abc def") < f64::EPSILON);
        let d = lexical_distance("project next year revenue", "define photosynthesis");
        assert!(d > 0.9);
    }
}
