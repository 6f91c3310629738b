//! # Condition Evaluator
//!
//! Decides visibility and enablement from [`Dependency`] expressions.
//!
//! - [`evaluate`] answers a single dependency against the value bag.
//! - [`graph::DependencyGraph`] orders dependencies and finds cycles once per schema load.
//! - [`visibility::ConditionEvaluator`] recomputes the visible/disabled maps.

use crate::schema::{Dependency, Operator};
use serde_json::Value;
use std::collections::HashMap;

pub mod graph;
pub mod visibility;

pub use graph::{DependencyGraph, DependencyStatus};
pub use visibility::{ConditionEvaluator, VisibilityMap};

/// Evaluates a dependency against the current values.
///
/// A missing source value is treated as `null`.
pub fn evaluate(dependency: &Dependency, values: &HashMap<String, Value>) -> bool {
    let actual = values.get(&dependency.field).unwrap_or(&Value::Null);
    compare_values(actual, dependency.operator, &dependency.value)
}

pub fn compare_values(a: &Value, op: Operator, b: &Value) -> bool {
    match op {
        Operator::Equals => values_equal(a, b),
        Operator::NotEquals => !values_equal(a, b),
        Operator::Contains => contains(a, b),
        Operator::NotContains => !contains(a, b),
        Operator::GreaterThan => match (as_number(a), as_number(b)) {
            (Some(na), Some(nb)) => na > nb,
            _ => false,
        },
        Operator::LessThan => match (as_number(a), as_number(b)) {
            (Some(na), Some(nb)) => na < nb,
            _ => false,
        },
    }
}

/// Strict equality, except that a numeric side makes the comparison numeric.
pub fn values_equal(a: &Value, b: &Value) -> bool {
    if a.is_number() || b.is_number() {
        return match (as_number(a), as_number(b)) {
            (Some(na), Some(nb)) => na == nb,
            _ => false,
        };
    }
    a == b
}

fn contains(haystack: &Value, needle: &Value) -> bool {
    match haystack {
        Value::String(s) => match needle {
            Value::String(n) => s.contains(n.as_str()),
            Value::Number(n) => s.contains(&n.to_string()),
            _ => false,
        },
        Value::Array(items) => items.iter().any(|item| values_equal(item, needle)),
        _ => false,
    }
}

/// Numeric view of a value: JSON numbers, and strings that parse as numbers.
pub fn as_number(v: &Value) -> Option<f64> {
    match v {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => {
            let trimmed = s.trim();
            if trimmed.is_empty() {
                None
            } else {
                trimmed.parse::<f64>().ok().filter(|n| n.is_finite())
            }
        }
        _ => None,
    }
}
