//! Filter DSL and adapter capability negotiation.
//!
//! Filters are a small tagged enum rather than string-keyed maps so that
//! operator shape is decided in exactly one place. Before dispatching a
//! query, callers check the adapter's [`Capabilities`] via
//! [`check_capabilities`]; an adapter is never handed an operator it did not
//! advertise.

use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

use crate::error::PersistError;

// ---------------------------------------------------------------------------
// Filter
// ---------------------------------------------------------------------------

/// Comparison operator for [`Filter::Range`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RangeOp {
    Gt,
    Gte,
    Lt,
    Lte,
    Neq,
}

impl RangeOp {
    /// REST operator token (PostgREST convention).
    pub fn rest_token(&self) -> &'static str {
        match self {
            RangeOp::Gt => "gt",
            RangeOp::Gte => "gte",
            RangeOp::Lt => "lt",
            RangeOp::Lte => "lte",
            RangeOp::Neq => "neq",
        }
    }
}

/// One predicate over a column. All predicates in a query are AND-ed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Filter {
    Eq { col: String, value: Value },
    /// Case-insensitive containment; `%` and `*` are wildcards.
    Ilike { col: String, pattern: String },
    In { col: String, values: Vec<Value> },
    Range { col: String, cmp: RangeOp, value: Value },
}

impl Filter {
    pub fn eq(col: impl Into<String>, value: impl Into<Value>) -> Self {
        Filter::Eq {
            col: col.into(),
            value: value.into(),
        }
    }

    pub fn ilike(col: impl Into<String>, pattern: impl Into<String>) -> Self {
        Filter::Ilike {
            col: col.into(),
            pattern: pattern.into(),
        }
    }

    pub fn col(&self) -> &str {
        match self {
            Filter::Eq { col, .. }
            | Filter::Ilike { col, .. }
            | Filter::In { col, .. }
            | Filter::Range { col, .. } => col,
        }
    }
}

/// Render a filter set as the compact JSON object used in envelope metadata:
/// `Eq`/`Ilike` collapse to `col: value`; `In`/`Range` keep operator shape.
pub fn filters_to_json(filters: &[Filter]) -> Value {
    let mut out = Map::new();
    for f in filters {
        match f {
            Filter::Eq { col, value } => {
                out.insert(col.clone(), value.clone());
            }
            Filter::Ilike { col, pattern } => {
                out.insert(col.clone(), Value::String(pattern.clone()));
            }
            Filter::In { col, values } => {
                out.insert(col.clone(), json!({ "in": values }));
            }
            Filter::Range { col, cmp, value } => {
                let mut m = Map::new();
                m.insert(cmp.rest_token().to_string(), value.clone());
                out.insert(col.clone(), Value::Object(m));
            }
        }
    }
    Value::Object(out)
}

// ---------------------------------------------------------------------------
// Capabilities
// ---------------------------------------------------------------------------

/// What an adapter can do. Consulted by higher layers before emitting
/// operators; adapters return a constant value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Capabilities {
    pub equality_filters: bool,
    pub ordering: bool,
    pub limit: bool,
    pub projections: bool,
    pub ilike: bool,
    pub range_operators: bool,
    pub in_operator: bool,
    pub max_batch_size: usize,
}

impl Capabilities {
    /// Everything on; batch bound for in-process backends.
    pub fn full() -> Self {
        Self {
            equality_filters: true,
            ordering: true,
            limit: true,
            projections: true,
            ilike: true,
            range_operators: true,
            in_operator: true,
            max_batch_size: 500,
        }
    }
}

/// Reject any filter the adapter did not advertise support for.
/// Zero adapter calls are made when this fails.
pub fn check_capabilities(filters: &[Filter], caps: &Capabilities) -> Result<(), PersistError> {
    for f in filters {
        let (ok, what) = match f {
            Filter::Eq { .. } => (caps.equality_filters, "equality filters"),
            Filter::Ilike { .. } => (caps.ilike, "ilike"),
            Filter::In { .. } => (caps.in_operator, "in operator"),
            Filter::Range { .. } => (caps.range_operators, "range operators"),
        };
        if !ok {
            return Err(PersistError::Unsupported { what: what.into() });
        }
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Matching (shared by the in-memory backend)
// ---------------------------------------------------------------------------

/// Whether `row` satisfies every filter.
pub fn row_matches(row: &Map<String, Value>, filters: &[Filter]) -> bool {
    filters.iter().all(|f| match f {
        Filter::Eq { col, value } => row.get(col).map(|v| values_eq(v, value)).unwrap_or(false),
        Filter::Ilike { col, pattern } => row
            .get(col)
            .and_then(Value::as_str)
            .map(|s| ilike_match(s, pattern))
            .unwrap_or(false),
        Filter::In { col, values } => row
            .get(col)
            .map(|v| values.iter().any(|w| values_eq(v, w)))
            .unwrap_or(false),
        Filter::Range { col, cmp, value } => row
            .get(col)
            .map(|v| range_match(v, *cmp, value))
            .unwrap_or(false),
    })
}

/// Equality with string/number tolerance: `"1"` matches `1`.
fn values_eq(a: &Value, b: &Value) -> bool {
    if a == b {
        return true;
    }
    match (a, b) {
        (Value::String(s), Value::Number(n)) | (Value::Number(n), Value::String(s)) => {
            s == &n.to_string()
        }
        _ => false,
    }
}

/// Case-insensitive match with `%`/`*` wildcards. A pattern without
/// wildcards must match the whole value; with wildcards, the non-wildcard
/// fragments must appear in order.
fn ilike_match(value: &str, pattern: &str) -> bool {
    let value = value.to_lowercase();
    let pattern = pattern.to_lowercase().replace('*', "%");
    if !pattern.contains('%') {
        return value == pattern;
    }
    let mut rest = value.as_str();
    let fragments: Vec<&str> = pattern.split('%').filter(|f| !f.is_empty()).collect();
    let anchored_start = !pattern.starts_with('%');
    let anchored_end = !pattern.ends_with('%');

    for (i, frag) in fragments.iter().enumerate() {
        match rest.find(frag) {
            Some(pos) => {
                if i == 0 && anchored_start && pos != 0 {
                    return false;
                }
                rest = &rest[pos + frag.len()..];
            }
            None => return false,
        }
    }
    if anchored_end && !fragments.is_empty() {
        let last = fragments[fragments.len() - 1];
        if !value.ends_with(last) {
            return false;
        }
    }
    true
}

fn range_match(v: &Value, op: RangeOp, bound: &Value) -> bool {
    if op == RangeOp::Neq {
        return !values_eq(v, bound);
    }
    let ord = match (v.as_f64(), bound.as_f64()) {
        (Some(a), Some(b)) => a.partial_cmp(&b),
        _ => match (v.as_str(), bound.as_str()) {
            (Some(a), Some(b)) => Some(a.cmp(b)),
            _ => None,
        },
    };
    match ord {
        Some(ord) => match op {
            RangeOp::Gt => ord.is_gt(),
            RangeOp::Gte => ord.is_ge(),
            RangeOp::Lt => ord.is_lt(),
            RangeOp::Lte => ord.is_le(),
            RangeOp::Neq => unreachable!("handled above"),
        },
        None => false,
    }
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn row(pairs: &[(&str, Value)]) -> Map<String, Value> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }

    #[test]
    fn eq_matches_with_number_tolerance() {
        let r = row(&[("id", json!(1)), ("company", json!("Acme"))]);
        assert!(row_matches(&r, &[Filter::eq("id", "1")]));
        assert!(row_matches(&r, &[Filter::eq("company", "Acme")]));
        assert!(!row_matches(&r, &[Filter::eq("company", "acme")]));
    }

    #[test]
    fn ilike_without_wildcard_is_whole_value_case_insensitive() {
        let r = row(&[("company", json!("Acme Inc"))]);
        assert!(row_matches(&r, &[Filter::ilike("company", "acme inc")]));
        assert!(!row_matches(&r, &[Filter::ilike("company", "acme")]));
    }

    #[test]
    fn ilike_wildcards_match_fragments_in_order() {
        let r = row(&[("company", json!("Acme Holdings Inc"))]);
        assert!(row_matches(&r, &[Filter::ilike("company", "%acme%")]));
        assert!(row_matches(&r, &[Filter::ilike("company", "acme%inc")]));
        assert!(row_matches(&r, &[Filter::ilike("company", "*holdings*")]));
        assert!(!row_matches(&r, &[Filter::ilike("company", "inc%acme")]));
    }

    #[test]
    fn in_and_range_operators() {
        let r = row(&[("score", json!(42)), ("tier", json!("b"))]);
        assert!(row_matches(
            &r,
            &[Filter::In {
                col: "tier".into(),
                values: vec![json!("a"), json!("b")],
            }]
        ));
        assert!(row_matches(
            &r,
            &[Filter::Range {
                col: "score".into(),
                cmp: RangeOp::Gte,
                value: json!(42),
            }]
        ));
        assert!(!row_matches(
            &r,
            &[Filter::Range {
                col: "score".into(),
                cmp: RangeOp::Lt,
                value: json!(42),
            }]
        ));
        assert!(row_matches(
            &r,
            &[Filter::Range {
                col: "tier".into(),
                cmp: RangeOp::Neq,
                value: json!("a"),
            }]
        ));
    }

    #[test]
    fn missing_column_never_matches() {
        let r = row(&[("id", json!(1))]);
        assert!(!row_matches(&r, &[Filter::eq("ghost", "x")]));
        assert!(!row_matches(&r, &[Filter::ilike("ghost", "%x%")]));
    }

    #[test]
    fn capability_check_rejects_unadvertised_operators() {
        let mut caps = Capabilities::full();
        caps.ilike = false;
        let err = check_capabilities(&[Filter::ilike("c", "%x%")], &caps).unwrap_err();
        assert_eq!(err.kind(), "UnsupportedOperationError");

        check_capabilities(&[Filter::eq("c", "x")], &caps).unwrap();
    }

    #[test]
    fn filters_to_json_collapses_simple_operators() {
        let filters = vec![
            Filter::eq("company", "Acme"),
            Filter::ilike("email", "%@x.io"),
            Filter::In {
                col: "tier".into(),
                values: vec![json!("a")],
            },
        ];
        let v = filters_to_json(&filters);
        assert_eq!(v["company"], "Acme");
        assert_eq!(v["email"], "%@x.io");
        assert_eq!(v["tier"]["in"][0], "a");
    }

    #[test]
    fn filter_wire_form_is_tagged() {
        let f = Filter::eq("company", "Acme");
        let v = serde_json::to_value(&f).unwrap();
        assert_eq!(v["op"], "eq");
        let back: Filter = serde_json::from_value(v).unwrap();
        assert_eq!(back, f);
    }
}
