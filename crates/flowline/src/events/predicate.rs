//! `jsonPath` predicate evaluation (§4.7 step 1): `{path, operator, value}`
//! clauses evaluated against an event's JSON view.

use crate::json;
use crate::model::{PredicateClause, PredicateOperator};
use regex::RegexBuilder;
use serde_json::Value;

/// Whether every clause in `predicates` passes against `payload`.
pub fn matches_all(predicates: &[PredicateClause], payload: &Value) -> bool {
    predicates.iter().all(|clause| matches_one(clause, payload))
}

fn matches_one(clause: &PredicateClause, payload: &Value) -> bool {
    let found = json::get_path(payload, &clause.json_path);
    match clause.operator {
        PredicateOperator::Exists => found.is_some(),
        PredicateOperator::Eq => found.is_some_and(|v| compare_eq(v, &clause.value, clause.case_sensitive)),
        PredicateOperator::Neq => !found.is_some_and(|v| compare_eq(v, &clause.value, clause.case_sensitive)),
        PredicateOperator::In => {
            let Some(v) = found else { return false };
            let candidates = clause.value.as_array().cloned().unwrap_or_default();
            candidates.iter().any(|c| compare_eq(v, c, clause.case_sensitive))
        }
        PredicateOperator::Contains => {
            let Some(v) = found else { return false };
            match v {
                Value::Array(items) => items.iter().any(|i| compare_eq(i, &clause.value, clause.case_sensitive)),
                Value::String(s) => {
                    let needle = json::as_comparable_string(&clause.value);
                    if clause.case_sensitive {
                        s.contains(&needle)
                    } else {
                        s.to_lowercase().contains(&needle.to_lowercase())
                    }
                }
                _ => false,
            }
        }
        PredicateOperator::Regex => {
            let Some(v) = found else { return false };
            let haystack = json::as_comparable_string(v);
            let pattern = clause.value.as_str().unwrap_or_default();
            let case_insensitive = !clause.case_sensitive || clause.flags.as_deref().is_some_and(|f| f.contains('i'));
            RegexBuilder::new(pattern)
                .case_insensitive(case_insensitive)
                .build()
                .is_ok_and(|re| re.is_match(&haystack))
        }
        PredicateOperator::Gt | PredicateOperator::Gte | PredicateOperator::Lt | PredicateOperator::Lte => {
            let Some(v) = found else { return false };
            compare_numeric(v, &clause.value, clause.operator)
        }
    }
}

fn compare_eq(a: &Value, b: &Value, case_sensitive: bool) -> bool {
    if case_sensitive {
        a == b
    } else {
        match (a, b) {
            (Value::String(x), Value::String(y)) => x.to_lowercase() == y.to_lowercase(),
            _ => a == b,
        }
    }
}

fn compare_numeric(found: &Value, bound: &Value, op: PredicateOperator) -> bool {
    let (Some(f), Some(b)) = (found.as_f64(), bound.as_f64()) else {
        return false;
    };
    match op {
        PredicateOperator::Gt => f > b,
        PredicateOperator::Gte => f >= b,
        PredicateOperator::Lt => f < b,
        PredicateOperator::Lte => f <= b,
        _ => unreachable!(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn clause(path: &str, operator: PredicateOperator, value: Value) -> PredicateClause {
        PredicateClause {
            json_path: path.to_string(),
            operator,
            value,
            case_sensitive: true,
            flags: None,
        }
    }

    #[test]
    fn eq_matches_exact_value() {
        let payload = json!({"repo": {"action": "opened"}});
        let c = clause("repo.action", PredicateOperator::Eq, json!("opened"));
        assert!(matches_one(&c, &payload));
    }

    #[test]
    fn eq_is_case_sensitive_by_default() {
        let payload = json!({"action": "Opened"});
        let c = clause("action", PredicateOperator::Eq, json!("opened"));
        assert!(!matches_one(&c, &payload));
    }

    #[test]
    fn in_matches_any_candidate() {
        let payload = json!({"status": "pending"});
        let c = clause("status", PredicateOperator::In, json!(["pending", "running"]));
        assert!(matches_one(&c, &payload));
    }

    #[test]
    fn contains_checks_array_membership() {
        let payload = json!({"labels": ["bug", "priority:high"]});
        let c = clause("labels", PredicateOperator::Contains, json!("bug"));
        assert!(matches_one(&c, &payload));
    }

    #[test]
    fn exists_fails_on_missing_path() {
        let payload = json!({"a": 1});
        let c = clause("b", PredicateOperator::Exists, Value::Null);
        assert!(!matches_one(&c, &payload));
    }

    #[test]
    fn gte_compares_numerically() {
        let payload = json!({"count": 5});
        let c = clause("count", PredicateOperator::Gte, json!(5));
        assert!(matches_one(&c, &payload));
    }

    #[test]
    fn regex_matches_pattern() {
        let payload = json!({"ref": "refs/heads/release-1.2"});
        let c = clause("ref", PredicateOperator::Regex, json!("^refs/heads/release-"));
        assert!(matches_one(&c, &payload));
    }

    #[test]
    fn matches_all_requires_every_clause() {
        let payload = json!({"action": "opened", "count": 2});
        let predicates = vec![
            clause("action", PredicateOperator::Eq, json!("opened")),
            clause("count", PredicateOperator::Gte, json!(5)),
        ];
        assert!(!matches_all(&predicates, &payload));
    }
}
