//! Deterministic filter relaxation after an empty retrieval.
//!
//! Strategies are ordered and bounded; each produces a strictly different,
//! still non-empty filter set or reports itself as not applicable. A
//! relaxation is never allowed to reach the empty set — an unfiltered scan
//! is the default-list policy's job, not reformulation's.

use std::collections::BTreeMap;

/// Corporate suffixes stripped by `shorten_company`, lowercase, compared
/// with any trailing dot removed.
const COMPANY_SUFFIXES: &[&str] = &[
    "inc", "llc", "ltd", "corp", "co", "gmbh", "sa", "srl", "plc",
];

/// One relaxation step: a stable reason tag plus the relaxed filter set.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Relaxation {
    pub reason: &'static str,
    pub filters: BTreeMap<String, String>,
}

/// Ordered relaxations of `filters`: drop `email`, shorten `company` by
/// stripping corporate suffixes, drop `company`. Only applicable steps are
/// returned, each derived from the previous step's output.
pub fn relaxations(filters: &BTreeMap<String, String>) -> Vec<Relaxation> {
    let mut out = Vec::new();
    let mut current = filters.clone();

    // drop_email
    if current.contains_key("email") && current.len() > 1 {
        current.remove("email");
        out.push(Relaxation {
            reason: "drop_email",
            filters: current.clone(),
        });
    }

    // shorten_company
    if let Some(company) = current.get("company") {
        let short = strip_company_suffixes(company);
        if short != *company && !short.is_empty() {
            current.insert("company".to_string(), short);
            out.push(Relaxation {
                reason: "shorten_company",
                filters: current.clone(),
            });
        }
    }

    // drop_company
    if current.contains_key("company") && current.len() > 1 {
        current.remove("company");
        out.push(Relaxation {
            reason: "drop_company",
            filters: current.clone(),
        });
    }

    out
}

/// Strip trailing corporate suffixes (`"Acme Inc"` → `"Acme"`), repeatedly,
/// case-insensitively, tolerating a trailing dot per word.
pub fn strip_company_suffixes(name: &str) -> String {
    let mut words: Vec<&str> = name.split_whitespace().collect();
    while words.len() > 1 {
        let last = words[words.len() - 1]
            .trim_end_matches('.')
            .to_ascii_lowercase();
        if COMPANY_SUFFIXES.contains(&last.as_str()) {
            words.pop();
        } else {
            break;
        }
    }
    words.join(" ")
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn filters(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn full_ladder_email_then_company() {
        let steps = relaxations(&filters(&[
            ("email", "b@x.io"),
            ("company", "Acme Inc"),
            ("id", "1"),
        ]));
        let reasons: Vec<_> = steps.iter().map(|s| s.reason).collect();
        assert_eq!(reasons, vec!["drop_email", "shorten_company", "drop_company"]);

        assert!(!steps[0].filters.contains_key("email"));
        assert_eq!(steps[1].filters.get("company").unwrap(), "Acme");
        assert!(!steps[2].filters.contains_key("company"));
        assert!(steps[2].filters.contains_key("id"));
    }

    #[test]
    fn drop_email_keeps_remaining_filters() {
        let steps = relaxations(&filters(&[("email", "b@x.io"), ("company", "Acme Inc")]));
        assert_eq!(steps[0].reason, "drop_email");
        assert_eq!(steps[0].filters, filters(&[("company", "Acme Inc")]));
    }

    #[test]
    fn never_relaxes_to_an_empty_set() {
        // email alone: dropping it would leave nothing.
        let steps = relaxations(&filters(&[("email", "b@x.io")]));
        assert!(steps.is_empty());

        // company alone: shorten applies, drop does not.
        let steps = relaxations(&filters(&[("company", "Acme Inc")]));
        let reasons: Vec<_> = steps.iter().map(|s| s.reason).collect();
        assert_eq!(reasons, vec!["shorten_company"]);
    }

    #[test]
    fn suffix_stripping_variants() {
        assert_eq!(strip_company_suffixes("Acme Inc"), "Acme");
        assert_eq!(strip_company_suffixes("Acme Inc."), "Acme");
        assert_eq!(strip_company_suffixes("Acme Holdings LLC"), "Acme Holdings");
        assert_eq!(strip_company_suffixes("Acme Co. Ltd"), "Acme");
        // A bare suffix word is left alone.
        assert_eq!(strip_company_suffixes("Inc"), "Inc");
        assert_eq!(strip_company_suffixes("Acme"), "Acme");
    }

    #[test]
    fn no_applicable_strategy_yields_nothing() {
        let steps = relaxations(&filters(&[("id", "42")]));
        assert!(steps.is_empty());
    }
}
