//! Typed query tree evaluated against JSON documents.
//!
//! The query translator (an external collaborator) produces this tree;
//! store backends turn it into whatever filter form they need. The
//! reference evaluation here walks a `serde_json::Value` directly.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::cmp::Ordering;

/// A node in the query tree.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum QueryNode {
    /// Both sides must match.
    And(Box<QueryNode>, Box<QueryNode>),
    /// Either side must match.
    Or(Box<QueryNode>, Box<QueryNode>),
    /// Field equals value.
    Eq {
        /// Dotted field path.
        field: String,
        /// Comparison value.
        value: Value,
    },
    /// Field does not equal value.
    Neq {
        /// Dotted field path.
        field: String,
        /// Comparison value.
        value: Value,
    },
    /// Field is strictly greater than value.
    Gt {
        /// Dotted field path.
        field: String,
        /// Comparison value.
        value: Value,
    },
    /// Field is greater than or equal to value.
    Gte {
        /// Dotted field path.
        field: String,
        /// Comparison value.
        value: Value,
    },
    /// Field is strictly less than value.
    Lt {
        /// Dotted field path.
        field: String,
        /// Comparison value.
        value: Value,
    },
    /// Field is less than or equal to value.
    Lte {
        /// Dotted field path.
        field: String,
        /// Comparison value.
        value: Value,
    },
    /// Field is a string containing the given text.
    Contains {
        /// Dotted field path.
        field: String,
        /// Substring to look for.
        text: String,
    },
}

/// Evaluate a query tree against a parsed JSON document.
pub fn matches_document(query: &QueryNode, doc: &Value) -> bool {
    match query {
        QueryNode::And(l, r) => matches_document(l, doc) && matches_document(r, doc),
        QueryNode::Or(l, r) => matches_document(l, doc) || matches_document(r, doc),
        QueryNode::Eq { field, value } => lookup(doc, field).is_some_and(|v| values_equal(v, value)),
        QueryNode::Neq { field, value } => {
            lookup(doc, field).is_none_or(|v| !values_equal(v, value))
        }
        QueryNode::Gt { field, value } => compare_field(doc, field, value, Ordering::is_gt),
        QueryNode::Gte { field, value } => compare_field(doc, field, value, Ordering::is_ge),
        QueryNode::Lt { field, value } => compare_field(doc, field, value, Ordering::is_lt),
        QueryNode::Lte { field, value } => compare_field(doc, field, value, Ordering::is_le),
        QueryNode::Contains { field, text } => lookup(doc, field)
            .and_then(Value::as_str)
            .is_some_and(|s| s.contains(text.as_str())),
    }
}

/// Walk a dotted path into nested objects.
fn lookup<'a>(doc: &'a Value, path: &str) -> Option<&'a Value> {
    let mut current = doc;
    for segment in path.split('.') {
        current = current.as_object()?.get(segment)?;
    }
    Some(current)
}

/// Equality with numeric coercion, so `1` and `1.0` compare equal.
fn values_equal(a: &Value, b: &Value) -> bool {
    match (a.as_f64(), b.as_f64()) {
        (Some(x), Some(y)) => x == y,
        _ => a == b,
    }
}

fn compare_field(doc: &Value, field: &str, value: &Value, accept: fn(Ordering) -> bool) -> bool {
    lookup(doc, field)
        .and_then(|v| compare_values(v, value))
        .is_some_and(accept)
}

/// Ordering between two JSON scalars; `None` for incomparable types.
fn compare_values(a: &Value, b: &Value) -> Option<Ordering> {
    match (a, b) {
        (Value::Number(_), Value::Number(_)) => a.as_f64()?.partial_cmp(&b.as_f64()?),
        (Value::String(x), Value::String(y)) => Some(x.cmp(y)),
        (Value::Bool(x), Value::Bool(y)) => Some(x.cmp(y)),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn doc() -> Value {
        json!({
            "name": "Alice",
            "age": 30,
            "profile": { "city": "Oslo", "score": 7.5 },
            "active": true
        })
    }

    fn eq(field: &str, value: Value) -> QueryNode {
        QueryNode::Eq {
            field: field.into(),
            value,
        }
    }

    #[test]
    fn eq_matches_scalar() {
        assert!(matches_document(&eq("name", json!("Alice")), &doc()));
        assert!(!matches_document(&eq("name", json!("Bob")), &doc()));
    }

    #[test]
    fn eq_coerces_int_and_float() {
        assert!(matches_document(&eq("age", json!(30.0)), &doc()));
        assert!(matches_document(&eq("profile.score", json!(7.5)), &doc()));
    }

    #[test]
    fn dotted_path_reaches_nested_fields() {
        assert!(matches_document(&eq("profile.city", json!("Oslo")), &doc()));
        assert!(!matches_document(&eq("profile.missing", json!(1)), &doc()));
    }

    #[test]
    fn neq_matches_missing_field() {
        let q = QueryNode::Neq {
            field: "missing".into(),
            value: json!(1),
        };
        assert!(matches_document(&q, &doc()));
    }

    #[test]
    fn range_operators() {
        let gt = QueryNode::Gt {
            field: "age".into(),
            value: json!(29),
        };
        let lte = QueryNode::Lte {
            field: "age".into(),
            value: json!(30),
        };
        assert!(matches_document(&gt, &doc()));
        assert!(matches_document(&lte, &doc()));

        let lt = QueryNode::Lt {
            field: "age".into(),
            value: json!(30),
        };
        assert!(!matches_document(&lt, &doc()));
    }

    #[test]
    fn range_on_mismatched_types_never_matches() {
        let q = QueryNode::Gt {
            field: "name".into(),
            value: json!(5),
        };
        assert!(!matches_document(&q, &doc()));
    }

    #[test]
    fn contains_is_substring_match() {
        let q = QueryNode::Contains {
            field: "profile.city".into(),
            text: "sl".into(),
        };
        assert!(matches_document(&q, &doc()));

        let q = QueryNode::Contains {
            field: "age".into(),
            text: "3".into(),
        };
        assert!(!matches_document(&q, &doc()), "contains only applies to strings");
    }

    #[test]
    fn and_or_compose() {
        let q = QueryNode::And(
            Box::new(eq("active", json!(true))),
            Box::new(QueryNode::Or(
                Box::new(eq("name", json!("Bob"))),
                Box::new(eq("profile.city", json!("Oslo"))),
            )),
        );
        assert!(matches_document(&q, &doc()));

        let q = QueryNode::And(
            Box::new(eq("active", json!(false))),
            Box::new(eq("name", json!("Alice"))),
        );
        assert!(!matches_document(&q, &doc()));
    }
}
