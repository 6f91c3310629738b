//! Built-in rules compiled from declarative [`ValidationRule`]s.
//!
//! Compilation happens once per registration, so a `pattern` regex is built once
//! and reused on every keystroke.

use super::{NamedRule, RuleImpl, RuleOutcome, RuleSource, ValidationContext, Validator, ValueBag};
use crate::condition::{as_number, values_equal};
use crate::error::SchemaError;
use crate::schema::{FieldDefinition, FieldKind, RuleKind, Severity, ValidationRule};
use anyhow::Result;
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;
use std::sync::Arc;

static EMAIL_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[^\s@]+@[^\s@]+\.[^\s@]+$").expect("email regex compiles"));

#[derive(Debug, Clone)]
enum Check {
    Required,
    MinLength(usize),
    MaxLength(usize),
    Min(f64),
    Max(f64),
    Pattern(Regex),
    Email,
    Url,
    Numeric,
    OneOf(Vec<Value>),
    EachOf(Vec<Value>),
}

/// A compiled built-in rule.
#[derive(Debug, Clone)]
pub struct BuiltinRule {
    check: Check,
    code: &'static str,
    message: String,
    severity: Severity,
}

impl BuiltinRule {
    fn new(check: Check, code: &'static str, message: String, severity: Severity) -> Self {
        Self {
            check,
            code,
            message,
            severity,
        }
    }

    pub fn required(message: Option<&str>) -> Self {
        Self::new(
            Check::Required,
            "required",
            message.unwrap_or("This field is required").to_string(),
            Severity::Error,
        )
    }

    fn passes(&self, value: &Value) -> bool {
        if let Check::Required = self.check {
            return !is_empty(value);
        }
        // An empty optional value satisfies every other constraint
        if is_empty(value) {
            return true;
        }

        match &self.check {
            Check::Required => true,
            Check::MinLength(n) => value_length(value) >= *n,
            Check::MaxLength(n) => value_length(value) <= *n,
            Check::Min(n) => as_number(value).is_some_and(|v| v >= *n),
            Check::Max(n) => as_number(value).is_some_and(|v| v <= *n),
            Check::Pattern(re) => text_of(value).is_some_and(|s| re.is_match(&s)),
            Check::Email => value.as_str().is_some_and(|s| EMAIL_RE.is_match(s.trim())),
            Check::Url => value
                .as_str()
                .and_then(|s| url::Url::parse(s.trim()).ok())
                .is_some_and(|u| u.has_host()),
            Check::Numeric => as_number(value).is_some(),
            Check::OneOf(options) => options.iter().any(|o| values_equal(o, value)),
            Check::EachOf(options) => match value {
                Value::Array(items) => items
                    .iter()
                    .all(|item| options.iter().any(|o| values_equal(o, item))),
                single => options.iter().any(|o| values_equal(o, single)),
            },
        }
    }
}

impl Validator for BuiltinRule {
    fn validate(&self, value: &Value, _ctx: &ValidationContext) -> Result<RuleOutcome> {
        if self.passes(value) {
            Ok(RuleOutcome::valid())
        } else {
            Ok(RuleOutcome::single(self.code, self.message.clone(), self.severity))
        }
    }
}

/// Empty means: null, blank string, empty list or object, or an unticked checkbox.
pub fn is_empty(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::String(s) => s.trim().is_empty(),
        Value::Array(items) => items.is_empty(),
        Value::Object(map) => map.is_empty(),
        Value::Bool(b) => !b,
        Value::Number(_) => false,
    }
}

/// Length as seen by `minLength`/`maxLength`: characters, elements, or keys.
pub fn value_length(value: &Value) -> usize {
    match value {
        Value::String(s) => s.chars().count(),
        Value::Array(items) => items.len(),
        Value::Object(map) => map.len(),
        Value::Number(n) => n.to_string().chars().count(),
        Value::Bool(b) => b.to_string().len(),
        Value::Null => 0,
    }
}

fn text_of(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

fn format_number(n: f64) -> String {
    if n.fract() == 0.0 && n.abs() < 1e15 {
        format!("{}", n as i64)
    } else {
        n.to_string()
    }
}

/// Compiles one declarative rule.
pub fn compile_rule(field: &FieldDefinition, rule: &ValidationRule) -> Result<NamedRule, SchemaError> {
    let msg = |default: String| rule.message.clone().unwrap_or(default);
    let severity = rule.severity;
    let code = rule.kind.code();

    let builtin = match &rule.kind {
        RuleKind::Required => BuiltinRule::new(
            Check::Required,
            code,
            msg("This field is required".to_string()),
            // Required always blocks
            Severity::Error,
        ),
        RuleKind::MinLength { value } => BuiltinRule::new(
            Check::MinLength(*value),
            code,
            msg(format!("Must be at least {value} characters")),
            severity,
        ),
        RuleKind::MaxLength { value } => BuiltinRule::new(
            Check::MaxLength(*value),
            code,
            msg(format!("Must be at most {value} characters")),
            severity,
        ),
        RuleKind::Min { value } => BuiltinRule::new(
            Check::Min(*value),
            code,
            msg(format!("Must be at least {}", format_number(*value))),
            severity,
        ),
        RuleKind::Max { value } => BuiltinRule::new(
            Check::Max(*value),
            code,
            msg(format!("Must be at most {}", format_number(*value))),
            severity,
        ),
        RuleKind::Pattern { value } => {
            let re = Regex::new(value).map_err(|source| SchemaError::InvalidPattern {
                field: field.name.clone(),
                pattern: value.clone(),
                source,
            })?;
            BuiltinRule::new(Check::Pattern(re), code, msg("Invalid format".to_string()), severity)
        }
        RuleKind::Email => BuiltinRule::new(
            Check::Email,
            code,
            msg("Enter a valid email address".to_string()),
            severity,
        ),
        RuleKind::Url => BuiltinRule::new(Check::Url, code, msg("Enter a valid URL".to_string()), severity),
        RuleKind::Custom { name } => {
            if name.trim().is_empty() {
                return Err(SchemaError::InvalidRule {
                    field: field.name.clone(),
                    reason: "custom rule without a name".to_string(),
                });
            }
            return Ok(NamedRule {
                name: name.clone(),
                source: RuleSource::Registry {
                    name: name.clone(),
                    message: rule.message.clone(),
                    severity,
                },
            });
        }
    };

    Ok(NamedRule {
        name: code.to_string(),
        source: RuleSource::Direct(RuleImpl::Sync(Arc::new(builtin))),
    })
}

/// Compiles the full, ordered rule set of a field.
///
/// Order: the `required` flag, then the checks implied by the field type, then the
/// declared rules.
pub fn compile_field_rules(field: &FieldDefinition) -> Result<Vec<NamedRule>, SchemaError> {
    let mut compiled = Vec::with_capacity(field.rules.len() + 2);
    let declares = |pred: fn(&RuleKind) -> bool| field.rules.iter().any(|r| pred(&r.kind));

    // 1. Required flag
    if field.required && !declares(|k| matches!(k, RuleKind::Required)) {
        compiled.push(sync_rule("required", BuiltinRule::required(None)));
    }

    // 2. Type-implied checks
    match field.kind {
        FieldKind::Email if !declares(|k| matches!(k, RuleKind::Email)) => {
            compiled.push(sync_rule(
                "email",
                BuiltinRule::new(
                    Check::Email,
                    "email",
                    "Enter a valid email address".to_string(),
                    Severity::Error,
                ),
            ));
        }
        FieldKind::Number => {
            compiled.push(sync_rule(
                "number",
                BuiltinRule::new(Check::Numeric, "number", "Must be a number".to_string(), Severity::Error),
            ));
        }
        kind if kind.is_single_choice() && !field.options.is_empty() => {
            compiled.push(sync_rule(
                "option",
                BuiltinRule::new(
                    Check::OneOf(field.options.iter().map(|o| o.value.clone()).collect()),
                    "invalid_option",
                    "Select one of the available options".to_string(),
                    Severity::Error,
                ),
            ));
        }
        FieldKind::Multiselect if !field.options.is_empty() => {
            compiled.push(sync_rule(
                "options",
                BuiltinRule::new(
                    Check::EachOf(field.options.iter().map(|o| o.value.clone()).collect()),
                    "invalid_option",
                    "Select only the available options".to_string(),
                    Severity::Error,
                ),
            ));
        }
        _ => {}
    }

    // 3. Declared rules
    for rule in &field.rules {
        compiled.push(compile_rule(field, rule)?);
    }

    check_bounds(field)?;
    Ok(compiled)
}

fn sync_rule(name: &str, rule: BuiltinRule) -> NamedRule {
    NamedRule {
        name: name.to_string(),
        source: RuleSource::Direct(RuleImpl::Sync(Arc::new(rule))),
    }
}

/// Rejects contradictory bounds such as `minLength` greater than `maxLength`.
fn check_bounds(field: &FieldDefinition) -> Result<(), SchemaError> {
    let mut min_len = None;
    let mut max_len = None;
    let mut min = None;
    let mut max = None;
    for rule in &field.rules {
        match &rule.kind {
            RuleKind::MinLength { value } => min_len = Some(*value),
            RuleKind::MaxLength { value } => max_len = Some(*value),
            RuleKind::Min { value } => min = Some(*value),
            RuleKind::Max { value } => max = Some(*value),
            _ => {}
        }
    }
    let invalid = |reason: String| SchemaError::InvalidRule {
        field: field.name.clone(),
        reason,
    };
    if let (Some(lo), Some(hi)) = (min_len, max_len)
        && lo > hi
    {
        return Err(invalid(format!("minLength {lo} exceeds maxLength {hi}")));
    }
    if let (Some(lo), Some(hi)) = (min, max)
        && lo > hi
    {
        return Err(invalid(format!("min {lo} exceeds max {hi}")));
    }
    if min.is_some_and(|v: f64| !v.is_finite()) || max.is_some_and(|v: f64| !v.is_finite()) {
        return Err(invalid("numeric bounds must be finite".to_string()));
    }
    Ok(())
}

/// Built-in cross-field rule: every listed field holds the same value.
///
/// Empty values are left to `required`.
pub fn fields_match(values: &ValueBag, fields: &[String]) -> Result<RuleOutcome> {
    let present: Vec<&Value> = fields
        .iter()
        .filter_map(|f| values.get(f))
        .filter(|v| !is_empty(v))
        .collect();
    if present.len() < fields.len() {
        return Ok(RuleOutcome::valid());
    }
    let all_equal = present.windows(2).all(|pair| values_equal(pair[0], pair[1]));
    if all_equal {
        Ok(RuleOutcome::valid())
    } else {
        Ok(RuleOutcome::error("fields_match", "Values do not match"))
    }
}
