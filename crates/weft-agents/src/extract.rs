//! Rule-based filter extraction from free text.
//!
//! Deterministic first pass before any LLM is consulted. Recognized keys:
//! `id`, `email`, `company`, `client_id`. The rules are intentionally
//! simple — token shapes and a couple of prepositions — because anything
//! the rules miss falls through to structured LLM extraction.

use std::collections::BTreeMap;

/// Words that end a company-name capture.
const COMPANY_STOPWORDS: &[&str] = &[
    "with", "where", "and", "who", "that", "for", "about", "please", "in", "on",
];

/// Max words captured as a company name after `at`/`from`.
const COMPANY_MAX_WORDS: usize = 3;

/// Extract `{id, email, company, client_id}` candidates from a prompt.
/// Keys come back canonicalized (lowercase, sorted map).
pub fn parse_filters(prompt: &str) -> BTreeMap<String, String> {
    let mut out = BTreeMap::new();
    let words: Vec<&str> = prompt.split_whitespace().collect();

    for (i, raw) in words.iter().enumerate() {
        let token = trim_punct(raw);
        if token.is_empty() {
            continue;
        }

        // Prefixed forms first, so `email:a@x.io` captures the value, not
        // the whole token.
        let mut matched_prefix = false;
        for (prefix, key) in [
            ("id:", "id"),
            ("id=", "id"),
            ("client_id:", "client_id"),
            ("client_id=", "client_id"),
            ("client:", "client_id"),
            ("email:", "email"),
            ("company:", "company"),
        ] {
            if let Some(v) = token.strip_prefix(prefix) {
                if !v.is_empty() {
                    out.entry(key.to_string()).or_insert(v.to_string());
                    matched_prefix = true;
                }
            }
        }
        if matched_prefix {
            continue;
        }

        if looks_like_email(token) {
            out.entry("email".to_string()).or_insert(token.to_string());
            continue;
        }

        if let Some(v) = token.strip_prefix('#') {
            if !v.is_empty() && v.chars().all(|c| c.is_ascii_alphanumeric() || c == '-') {
                out.entry("id".to_string()).or_insert(v.to_string());
            }
        }

        // "at Acme Inc" / "from Acme" → company
        let lower = token.to_ascii_lowercase();
        if (lower == "at" || lower == "from") && !out.contains_key("company") {
            let mut name_words = Vec::new();
            for next in words.iter().skip(i + 1).take(COMPANY_MAX_WORDS) {
                let w = trim_punct(next);
                let wl = w.to_ascii_lowercase();
                if w.is_empty()
                    || w.contains(':')
                    || w.contains('@')
                    || COMPANY_STOPWORDS.contains(&wl.as_str())
                {
                    break;
                }
                name_words.push(w);
            }
            if !name_words.is_empty() {
                out.insert("company".to_string(), name_words.join(" "));
            }
        }
    }

    out
}

fn trim_punct(s: &str) -> &str {
    s.trim_matches(|c: char| matches!(c, ',' | '.' | ';' | '!' | '?' | '(' | ')' | '"' | '\''))
}

fn looks_like_email(token: &str) -> bool {
    let Some(at) = token.find('@') else {
        return false;
    };
    let (local, domain) = token.split_at(at);
    let domain = &domain[1..];
    !local.is_empty() && domain.contains('.') && !domain.starts_with('.') && !domain.ends_with('.')
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------
