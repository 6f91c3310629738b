//! # Validation
//!
//! Rules are small, stateless units: they receive a value plus a read-only view of
//! the whole form and report zero or more issues. The [`engine::ValidationEngine`]
//! orders them, bounds async work and aggregates results.
//!
//! Rule bodies return `anyhow::Result`; an `Err` is contained to its field and
//! reported as a generic failure.

use crate::schema::Severity;
use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;

pub mod builtin;
pub mod engine;
pub mod registry;
pub mod remote;

pub use engine::ValidationEngine;
pub use registry::{RuleRegistry, register_named_cross_rule, register_named_rule};

/// The flat name → value map shared by every field of a form.
pub type ValueBag = HashMap<String, Value>;

/// Code attached to issues produced by a rule that could not run.
pub const RULE_ERROR_CODE: &str = "rule_error";
pub const RULE_ERROR_MESSAGE: &str = "This value could not be validated. Please try again.";

/// What a rule sees while it runs.
#[derive(Debug, Clone)]
pub struct ValidationContext {
    /// The field being validated.
    pub field: String,
    /// Snapshot of every value in the form.
    pub values: Arc<ValueBag>,
}

impl ValidationContext {
    pub fn new(field: impl Into<String>, values: Arc<ValueBag>) -> Self {
        Self {
            field: field.into(),
            values,
        }
    }

    /// The value under validation, `null` when unset.
    pub fn value(&self) -> &Value {
        self.values.get(&self.field).unwrap_or(&Value::Null)
    }
}

/// A single problem reported by a rule, before it is attached to a field.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RuleIssue {
    pub message: String,
    pub code: String,
    pub severity: Severity,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RuleOutcome {
    pub issues: Vec<RuleIssue>,
}

impl RuleOutcome {
    pub fn valid() -> Self {
        Self::default()
    }

    pub fn error(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::single(code, message, Severity::Error)
    }

    pub fn warning(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::single(code, message, Severity::Warning)
    }

    pub fn single(code: impl Into<String>, message: impl Into<String>, severity: Severity) -> Self {
        Self {
            issues: vec![RuleIssue {
                message: message.into(),
                code: code.into(),
                severity,
            }],
        }
    }

    /// No blocking issue. Warnings do not make an outcome invalid.
    pub fn is_valid(&self) -> bool {
        !self.issues.iter().any(|i| i.severity.is_error())
    }

    /// Replaces messages and/or severity on every issue.
    pub(crate) fn overridden(mut self, message: Option<&str>, severity: Option<Severity>) -> Self {
        for issue in &mut self.issues {
            if let Some(m) = message {
                issue.message = m.to_string();
            }
            if let Some(s) = severity {
                issue.severity = s;
            }
        }
        self
    }
}

/// An issue attached to a field.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ValidationIssue {
    pub field: String,
    pub message: String,
    pub code: String,
    pub severity: Severity,
}

impl ValidationIssue {
    pub fn from_rule(field: &str, issue: RuleIssue) -> Self {
        Self {
            field: field.to_string(),
            message: issue.message,
            code: issue.code,
            severity: issue.severity,
        }
    }

    pub(crate) fn rule_error(field: &str) -> Self {
        Self {
            field: field.to_string(),
            message: RULE_ERROR_MESSAGE.to_string(),
            code: RULE_ERROR_CODE.to_string(),
            severity: Severity::Error,
        }
    }
}

/// Ordered issues from one or more rules.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ValidationResult {
    pub issues: Vec<ValidationIssue>,
}

impl ValidationResult {
    pub fn is_valid(&self) -> bool {
        !self.issues.iter().any(|i| i.severity.is_error())
    }

    pub fn errors(&self) -> impl Iterator<Item = &ValidationIssue> {
        self.issues.iter().filter(|i| i.severity.is_error())
    }

    pub fn warnings(&self) -> impl Iterator<Item = &ValidationIssue> {
        self.issues.iter().filter(|i| !i.severity.is_error())
    }

    /// Error messages for one field, in the order they were reported.
    pub fn error_messages(&self, field: &str) -> Vec<String> {
        self.errors()
            .filter(|i| i.field == field)
            .map(|i| i.message.clone())
            .collect()
    }

    pub fn warning_messages(&self, field: &str) -> Vec<String> {
        self.warnings()
            .filter(|i| i.field == field)
            .map(|i| i.message.clone())
            .collect()
    }

    pub fn extend(&mut self, other: ValidationResult) {
        self.issues.extend(other.issues);
    }
}

/// Whole-form result, partitioned by severity.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct FormValidation {
    pub errors: HashMap<String, Vec<String>>,
    pub warnings: HashMap<String, Vec<String>>,
    pub is_valid: bool,
}

impl From<ValidationResult> for FormValidation {
    fn from(result: ValidationResult) -> Self {
        let is_valid = result.is_valid();
        let mut errors: HashMap<String, Vec<String>> = HashMap::new();
        let mut warnings: HashMap<String, Vec<String>> = HashMap::new();
        for issue in result.issues {
            let bucket = if issue.severity.is_error() {
                &mut errors
            } else {
                &mut warnings
            };
            bucket.entry(issue.field).or_default().push(issue.message);
        }
        Self {
            errors,
            warnings,
            is_valid,
        }
    }
}

/// A synchronous rule body.
pub trait Validator: Send + Sync {
    fn validate(&self, value: &Value, ctx: &ValidationContext) -> anyhow::Result<RuleOutcome>;
}

impl<F> Validator for F
where
    F: Fn(&Value, &ValidationContext) -> anyhow::Result<RuleOutcome> + Send + Sync,
{
    fn validate(&self, value: &Value, ctx: &ValidationContext) -> anyhow::Result<RuleOutcome> {
        self(value, ctx)
    }
}

/// An asynchronous rule body, e.g. a uniqueness check against a remote service.
#[async_trait]
pub trait AsyncValidator: Send + Sync {
    async fn validate(&self, value: &Value, ctx: &ValidationContext) -> anyhow::Result<RuleOutcome>;
}

/// A rule over several fields at once.
pub trait CrossFieldValidator: Send + Sync {
    fn validate(&self, values: &ValueBag, fields: &[String]) -> anyhow::Result<RuleOutcome>;
}

impl<F> CrossFieldValidator for F
where
    F: Fn(&ValueBag, &[String]) -> anyhow::Result<RuleOutcome> + Send + Sync,
{
    fn validate(&self, values: &ValueBag, fields: &[String]) -> anyhow::Result<RuleOutcome> {
        self(values, fields)
    }
}

#[derive(Clone)]
pub enum RuleImpl {
    Sync(Arc<dyn Validator>),
    Async(Arc<dyn AsyncValidator>),
}

impl RuleImpl {
    pub fn is_async(&self) -> bool {
        matches!(self, RuleImpl::Async(_))
    }
}

/// Where a field rule's implementation comes from.
#[derive(Clone)]
pub enum RuleSource {
    Direct(RuleImpl),
    /// Looked up in the rule registry each time the rule runs.
    Registry {
        name: String,
        message: Option<String>,
        severity: Severity,
    },
}

#[derive(Clone)]
pub struct NamedRule {
    pub name: String,
    pub source: RuleSource,
}

impl NamedRule {
    pub fn sync(name: impl Into<String>, validator: impl Validator + 'static) -> Self {
        Self {
            name: name.into(),
            source: RuleSource::Direct(RuleImpl::Sync(Arc::new(validator))),
        }
    }

    /// A sync rule from a plain closure.
    pub fn from_fn<F>(name: impl Into<String>, f: F) -> Self
    where
        F: Fn(&Value, &ValidationContext) -> anyhow::Result<RuleOutcome> + Send + Sync + 'static,
    {
        Self::sync(name, f)
    }

    pub fn asynchronous(name: impl Into<String>, validator: impl AsyncValidator + 'static) -> Self {
        Self {
            name: name.into(),
            source: RuleSource::Direct(RuleImpl::Async(Arc::new(validator))),
        }
    }

    /// A reference into the registry, resolved at validation time.
    pub fn registered(name: impl Into<String>) -> Self {
        let name = name.into();
        Self {
            source: RuleSource::Registry {
                name: name.clone(),
                message: None,
                severity: Severity::Error,
            },
            name,
        }
    }
}

impl std::fmt::Debug for NamedRule {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let kind = match &self.source {
            RuleSource::Direct(RuleImpl::Sync(_)) => "sync",
            RuleSource::Direct(RuleImpl::Async(_)) => "async",
            RuleSource::Registry { .. } => "registry",
        };
        f.debug_struct("NamedRule")
            .field("name", &self.name)
            .field("kind", &kind)
            .finish()
    }
}

#[derive(Clone)]
pub enum CrossFieldSource {
    Direct(Arc<dyn CrossFieldValidator>),
    Registry(String),
}

/// A rule whose predicate reads more than one field.
#[derive(Clone)]
pub struct CrossFieldRule {
    pub name: String,
    /// The first field is the owner: failures are reported against it.
    pub fields: Vec<String>,
    pub message: Option<String>,
    pub source: CrossFieldSource,
}

impl CrossFieldRule {
    pub fn new(
        name: impl Into<String>,
        fields: Vec<String>,
        validator: impl CrossFieldValidator + 'static,
    ) -> Self {
        Self {
            name: name.into(),
            fields,
            message: None,
            source: CrossFieldSource::Direct(Arc::new(validator)),
        }
    }

    pub fn from_fn<F>(name: impl Into<String>, fields: Vec<String>, f: F) -> Self
    where
        F: Fn(&ValueBag, &[String]) -> anyhow::Result<RuleOutcome> + Send + Sync + 'static,
    {
        Self::new(name, fields, f)
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }

    pub fn registered(name: impl Into<String>, fields: Vec<String>, message: Option<String>) -> Self {
        let name = name.into();
        Self {
            source: CrossFieldSource::Registry(name.clone()),
            name,
            fields,
            message,
        }
    }

    pub fn owner(&self) -> Option<&str> {
        self.fields.first().map(|s| s.as_str())
    }
}

impl std::fmt::Debug for CrossFieldRule {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CrossFieldRule")
            .field("name", &self.name)
            .field("fields", &self.fields)
            .finish()
    }
}
