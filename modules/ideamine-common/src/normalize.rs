//! Concept text normalization and fingerprinting.
//!
//! Normalization is a pure, total function: any input (including empty or
//! malformed text) yields a normalized string, never an error. Identical
//! normalized text always yields an identical fingerprint.

use sha2::{Digest, Sha256};

/// Ordered substitution rules applied after case/whitespace normalization.
/// Earlier rules run first, so multi-word forms must precede their
/// single-word suffixes ("mobile application" before "application").
pub fn default_normalization_rules() -> Vec<(String, String)> {
    [
        ("app idea:", ""),
        ("business idea:", ""),
        ("startup idea:", ""),
        ("idea:", ""),
        ("concept:", ""),
        ("mobile application", "app"),
        ("mobile app", "app"),
        ("web application", "app"),
        ("web app", "app"),
        ("application", "app"),
        ("an app", "app"),
        ("a app", "app"),
    ]
    .into_iter()
    .map(|(from, to)| (from.to_string(), to.to_string()))
    .collect()
}

/// Canonicalize raw concept text for stable comparison: lowercase, trim,
/// collapse internal whitespace, then apply the ordered rule table.
pub fn normalize(text: &str, rules: &[(String, String)]) -> String {
    let mut out = collapse_whitespace(&text.to_lowercase());
    for (from, to) in rules {
        if out.contains(from.as_str()) {
            out = out.replace(from.as_str(), to);
        }
    }
    // Rules can strip prefixes or fold phrases, leaving stray spaces.
    collapse_whitespace(&out)
}

/// Hex SHA-256 of the normalized text. Collision probability is
/// cryptographically negligible, so the fingerprint doubles as the
/// store-level uniqueness key.
pub fn fingerprint(normalized: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(normalized.as_bytes());
    hex::encode(hasher.finalize())
}

fn collapse_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rules() -> Vec<(String, String)> {
        default_normalization_rules()
    }

    #[test]
    fn normalize_lowercases_and_trims() {
        assert_eq!(
            normalize("  Fitness Tracking App  ", &rules()),
            "fitness tracking app"
        );
    }

    #[test]
    fn normalize_collapses_internal_whitespace() {
        assert_eq!(
            normalize("fitness\t tracking \n app", &rules()),
            "fitness tracking app"
        );
    }

    #[test]
    fn normalize_strips_boilerplate_prefix() {
        assert_eq!(
            normalize("App idea: fitness tracking app", &rules()),
            "fitness tracking app"
        );
    }

    #[test]
    fn normalize_folds_platform_synonyms() {
        assert_eq!(
            normalize("Fitness tracking mobile app", &rules()),
            "fitness tracking app"
        );
        assert_eq!(
            normalize("Fitness tracking web application", &rules()),
            "fitness tracking app"
        );
    }

    #[test]
    fn normalize_empty_input_yields_empty_string() {
        assert_eq!(normalize("", &rules()), "");
        assert_eq!(normalize("   \t\n  ", &rules()), "");
    }

    #[test]
    fn normalize_is_deterministic() {
        let a = normalize("Idea: A app for   DOG walkers", &rules());
        let b = normalize("Idea: A app for   DOG walkers", &rules());
        assert_eq!(a, b);
    }

    #[test]
    fn normalize_applies_rules_in_order() {
        // "mobile application" must fold as one phrase, not via the bare
        // "application" rule first.
        assert_eq!(normalize("dog walking mobile application", &rules()), "dog walking app");
    }

    #[test]
    fn case_only_variants_normalize_identically() {
        let a = normalize("Fitness tracking app for runners", &rules());
        let b = normalize("fitness tracking app for runners", &rules());
        assert_eq!(a, b);
    }

    #[test]
    fn fingerprint_is_stable() {
        assert_eq!(fingerprint("fitness tracking app"), fingerprint("fitness tracking app"));
    }

    #[test]
    fn fingerprint_differs_for_different_text() {
        assert_ne!(fingerprint("fitness tracking app"), fingerprint("tax filing assistant"));
    }

    #[test]
    fn fingerprint_is_hex_sha256() {
        let fp = fingerprint("");
        assert_eq!(fp.len(), 64);
        assert!(fp.chars().all(|c| c.is_ascii_hexdigit()));
    }
}
