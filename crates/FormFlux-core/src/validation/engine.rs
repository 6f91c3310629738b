use super::registry::RuleRegistry;
use super::{
    CrossFieldRule, CrossFieldSource, FormValidation, NamedRule, RuleImpl, RuleOutcome, RuleSource,
    ValidationContext, ValidationIssue, ValidationResult, ValueBag,
};
use crate::condition::VisibilityMap;
use crate::error::RuleExecutionError;
use crate::schema::{FormSchema, Severity};
use crate::schema_loader::LoadedSchema;
use dashmap::DashMap;
use futures::future::join_all;
use std::sync::{Arc, RwLock};
use tokio::sync::Semaphore;

/// Runs field and cross-field rules for one form session.
///
/// Rules compiled from the schema run first, then rules registered by the host.
/// Async rules share a single semaphore, so at most `max_concurrent_async` of them
/// are in flight for the whole form.
pub struct ValidationEngine {
    schema_rules: DashMap<String, Arc<Vec<NamedRule>>>,
    field_rules: DashMap<String, Arc<Vec<NamedRule>>>,
    cross_rules: RwLock<Vec<CrossFieldRule>>,
    registry: Arc<RuleRegistry>,
    async_limit: Arc<Semaphore>,
}

/// A rule ready to run, with any schema-level message and severity overrides.
struct Resolved {
    name: String,
    rule: RuleImpl,
    message: Option<String>,
    severity: Option<Severity>,
}

enum Step {
    Run(Resolved),
    Missing(String),
}

impl ValidationEngine {
    pub fn new(max_concurrent_async: usize) -> Self {
        Self::with_registry(max_concurrent_async, RuleRegistry::global())
    }

    pub fn with_registry(max_concurrent_async: usize, registry: Arc<RuleRegistry>) -> Self {
        Self {
            schema_rules: DashMap::new(),
            field_rules: DashMap::new(),
            cross_rules: RwLock::new(Vec::new()),
            registry,
            async_limit: Arc::new(Semaphore::new(max_concurrent_async.max(1))),
        }
    }

    pub fn registry(&self) -> &Arc<RuleRegistry> {
        &self.registry
    }

    /// Installs the compiled rules of a loaded schema plus its cross-field rules.
    /// Replaces whatever a previous schema installed.
    #[tracing::instrument(skip(self, loaded), fields(schema_id = %loaded.schema.id))]
    pub fn install_schema(&self, loaded: &LoadedSchema) {
        let cross: Vec<CrossFieldRule> = loaded
            .schema
            .cross_field_rules
            .iter()
            .map(|def| CrossFieldRule::registered(&def.rule, def.fields.clone(), def.message.clone()))
            .collect();

        self.schema_rules.clear();
        for (name, rules) in loaded.rules.iter() {
            self.schema_rules.insert(name.clone(), rules.clone());
        }
        let mut guard = self.cross_rules.write().unwrap_or_else(|e| e.into_inner());
        guard.retain(|r| !matches!(r.source, CrossFieldSource::Registry(_)));
        guard.extend(cross);

        tracing::debug!(fields = loaded.rules.len(), "Installed schema rules");
    }

    /// Sets the host-supplied rules of a field. Calling it again with the same
    /// rules leaves the engine in the same state.
    pub fn register_rule(&self, field: impl Into<String>, rules: Vec<NamedRule>) {
        let field = field.into();
        tracing::debug!(field = %field, count = rules.len(), "Registering field rules");
        self.field_rules.insert(field, Arc::new(rules));
    }

    /// Adds a cross-field rule. A rule with the same name and fields replaces the old one.
    pub fn register_cross_field_rule(&self, rule: CrossFieldRule) {
        let mut guard = self.cross_rules.write().unwrap_or_else(|e| e.into_inner());
        guard.retain(|r| !(r.name == rule.name && r.fields == rule.fields));
        guard.push(rule);
    }

    pub fn cross_field_rules(&self) -> Vec<CrossFieldRule> {
        self.cross_rules
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    /// Drops every rule that concerns a field no longer part of the form,
    /// including cross-field rules naming such a field.
    pub fn retain_fields(&self, keep: impl Fn(&str) -> bool) {
        self.field_rules.retain(|name, _| keep(name));
        self.schema_rules.retain(|name, _| keep(name));

        let mut guard = self.cross_rules.write().unwrap_or_else(|e| e.into_inner());
        guard.retain(|rule| {
            let kept = rule.fields.iter().all(|f| keep(f));
            if !kept {
                tracing::debug!(rule = %rule.name, fields = ?rule.fields, "Dropping cross-field rule for removed field");
            }
            kept
        });
    }

    fn rules_for(&self, field: &str) -> Vec<NamedRule> {
        let mut rules = Vec::new();
        if let Some(r) = self.schema_rules.get(field) {
            rules.extend(r.iter().cloned());
        }
        if let Some(r) = self.field_rules.get(field) {
            rules.extend(r.iter().cloned());
        }
        rules
    }

    fn resolve(&self, rule: NamedRule) -> Step {
        match rule.source {
            RuleSource::Direct(imp) => Step::Run(Resolved {
                name: rule.name,
                rule: imp,
                message: None,
                severity: None,
            }),
            RuleSource::Registry {
                name,
                message,
                severity,
            } => match self.registry.get(&name) {
                Some(imp) => Step::Run(Resolved {
                    name,
                    rule: imp,
                    message,
                    severity: Some(severity),
                }),
                None => Step::Missing(name),
            },
        }
    }

    /// Validates one field.
    ///
    /// Sync rules run in registration order; a failing `required` stops the field.
    /// Async rules then run concurrently, bounded by the engine-wide limit.
    #[tracing::instrument(skip(self, ctx), fields(field = %ctx.field))]
    pub async fn validate_field(&self, ctx: &ValidationContext) -> ValidationResult {
        let field = ctx.field.as_str();
        let value = ctx.value();
        let mut result = ValidationResult::default();
        let mut pending = Vec::new();

        // 1. Sync pass
        for rule in self.rules_for(field) {
            let resolved = match self.resolve(rule) {
                Step::Run(r) => r,
                Step::Missing(name) => {
                    let err = RuleExecutionError::UnknownRule {
                        rule: name,
                        field: field.to_string(),
                    };
                    tracing::error!(error = %err, "Rule lookup failed");
                    result.issues.push(ValidationIssue::rule_error(field));
                    continue;
                }
            };

            let async_rule = match &resolved.rule {
                RuleImpl::Sync(validator) => {
                    let outcome = validator.validate(value, ctx);
                    if record(&mut result, field, &resolved, outcome) {
                        return result;
                    }
                    continue;
                }
                RuleImpl::Async(validator) => validator.clone(),
            };
            pending.push((async_rule, resolved));
        }

        if pending.is_empty() {
            return result;
        }

        // 2. Async pass
        let runs = pending.iter().map(|(validator, _)| async move {
            let _permit = self.async_limit.acquire().await?;
            validator.validate(value, ctx).await
        });
        let outcomes = join_all(runs).await;

        for ((_, resolved), outcome) in pending.iter().zip(outcomes) {
            record(&mut result, field, resolved, outcome);
        }
        result
    }

    /// Runs cross-field rules against the full value bag. Failures are attached to
    /// each rule's first field.
    pub fn validate_cross_fields(&self, rules: &[CrossFieldRule], values: &ValueBag) -> ValidationResult {
        let mut result = ValidationResult::default();
        for rule in rules {
            let Some(owner) = rule.owner() else {
                continue;
            };

            let validator = match &rule.source {
                CrossFieldSource::Direct(v) => Some(v.clone()),
                CrossFieldSource::Registry(name) => self.registry.get_cross_rule(name),
            };
            let Some(validator) = validator else {
                let err = RuleExecutionError::UnknownRule {
                    rule: rule.name.clone(),
                    field: owner.to_string(),
                };
                tracing::error!(error = %err, "Cross-field rule lookup failed");
                result.issues.push(ValidationIssue::rule_error(owner));
                continue;
            };

            match validator.validate(values, &rule.fields) {
                Ok(outcome) => {
                    let outcome = outcome.overridden(rule.message.as_deref(), None);
                    result
                        .issues
                        .extend(outcome.issues.into_iter().map(|i| ValidationIssue::from_rule(owner, i)));
                }
                Err(source) => {
                    let err = RuleExecutionError::Failed {
                        rule: rule.name.clone(),
                        field: owner.to_string(),
                        source,
                    };
                    tracing::error!(error = %err, "Cross-field rule failed");
                    result.issues.push(ValidationIssue::rule_error(owner));
                }
            }
        }
        result
    }

    /// Validates a field together with the cross-field rules it owns.
    ///
    /// Cross-field rules are skipped when any of their fields is inactive or
    /// unknown to `visibility`, and when the field already failed `required`.
    pub async fn validate_owned(&self, ctx: &ValidationContext, visibility: &VisibilityMap) -> ValidationResult {
        let mut result = self.validate_field(ctx).await;
        if result.issues.iter().any(|i| i.code == "required") {
            return result;
        }

        let owned: Vec<CrossFieldRule> = self
            .cross_field_rules()
            .into_iter()
            .filter(|r| r.owner() == Some(ctx.field.as_str()))
            .filter(|r| r.fields.iter().all(|f| visibility.is_known_active(f)))
            .collect();
        if !owned.is_empty() {
            result.extend(self.validate_cross_fields(&owned, &ctx.values));
        }
        result
    }

    /// Owners of the cross-field rules that read `field`, other than `field` itself.
    pub fn cross_field_owners(&self, field: &str) -> Vec<String> {
        let mut owners: Vec<String> = self
            .cross_field_rules()
            .iter()
            .filter(|r| r.fields.iter().any(|f| f == field))
            .filter_map(|r| r.owner())
            .filter(|owner| *owner != field)
            .map(str::to_string)
            .collect();
        owners.sort();
        owners.dedup();
        owners
    }

    /// Validates every visible, enabled field plus the cross-field rules whose
    /// fields are all active.
    #[tracing::instrument(skip_all, fields(schema_id = %schema.id))]
    pub async fn validate_form(
        &self,
        schema: &FormSchema,
        visibility: &VisibilityMap,
        values: Arc<ValueBag>,
    ) -> FormValidation {
        let contexts: Vec<ValidationContext> = schema
            .fields()
            .map(|(_, f)| f.name.as_str())
            .filter(|name| visibility.is_active(name))
            .map(|name| ValidationContext::new(name, values.clone()))
            .collect();

        let per_field = join_all(contexts.iter().map(|ctx| self.validate_owned(ctx, visibility))).await;
        let mut result = ValidationResult::default();
        for r in per_field {
            result.extend(r);
        }

        let validation = FormValidation::from(result);
        tracing::info!(valid = validation.is_valid, errors = validation.errors.len(), "Form validated");
        validation
    }
}

/// Appends a rule's outcome. Returns true when a `required` failure ends the field.
fn record(
    result: &mut ValidationResult,
    field: &str,
    resolved: &Resolved,
    outcome: anyhow::Result<RuleOutcome>,
) -> bool {
    match outcome {
        Ok(outcome) => {
            let outcome = outcome.overridden(resolved.message.as_deref(), resolved.severity);
            let required_failed = outcome
                .issues
                .iter()
                .any(|i| i.code == "required" && i.severity.is_error());
            result
                .issues
                .extend(outcome.issues.into_iter().map(|i| ValidationIssue::from_rule(field, i)));
            required_failed
        }
        Err(source) => {
            let err = RuleExecutionError::Failed {
                rule: resolved.name.clone(),
                field: field.to_string(),
                source,
            };
            tracing::error!(error = %err, "Validation rule failed");
            result.issues.push(ValidationIssue::rule_error(field));
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::validation::builtin::BuiltinRule;
    use serde_json::{Value, json};
    use std::collections::HashMap;

    fn ctx(field: &str, value: Value) -> ValidationContext {
        ValidationContext::new(field, Arc::new(HashMap::from([(field.to_string(), value)])))
    }

    #[tokio::test]
    async fn test_required_failure_hides_later_messages() {
        let engine = ValidationEngine::with_registry(2, Arc::new(RuleRegistry::default()));
        engine.register_rule(
            "name",
            vec![
                NamedRule::sync("required", BuiltinRule::required(None)),
                NamedRule::from_fn("never", |_, _| Ok(RuleOutcome::error("never", "Never valid"))),
            ],
        );

        let result = engine.validate_field(&ctx("name", json!(""))).await;
        assert_eq!(result.error_messages("name"), vec!["This field is required".to_string()]);

        let result = engine.validate_field(&ctx("name", json!("Ada"))).await;
        assert_eq!(result.error_messages("name"), vec!["Never valid".to_string()]);
    }

    #[tokio::test]
    async fn test_failing_rule_becomes_generic_error() {
        let engine = ValidationEngine::with_registry(2, Arc::new(RuleRegistry::default()));
        engine.register_rule(
            "f",
            vec![NamedRule::from_fn("boom", |_, _| Err(anyhow::anyhow!("exploded")))],
        );
        let result = engine.validate_field(&ctx("f", json!("x"))).await;
        assert_eq!(result.issues.len(), 1);
        assert_eq!(result.issues[0].code, crate::validation::RULE_ERROR_CODE);
    }

    #[tokio::test]
    async fn test_unknown_registry_rule_is_contained() {
        let engine = ValidationEngine::with_registry(2, Arc::new(RuleRegistry::default()));
        engine.register_rule("f", vec![NamedRule::registered("does_not_exist")]);
        let result = engine.validate_field(&ctx("f", json!("x"))).await;
        assert!(!result.is_valid());
        assert_eq!(result.issues[0].code, crate::validation::RULE_ERROR_CODE);
    }

    #[test]
    fn test_cross_field_failure_goes_to_first_field() {
        let engine = ValidationEngine::with_registry(2, Arc::new(RuleRegistry::with_builtins()));
        let rule = CrossFieldRule::registered(
            "fields_match",
            vec!["confirmPassword".into(), "password".into()],
            Some("Passwords must match".into()),
        );
        let values = HashMap::from([
            ("password".to_string(), json!("hunter22")),
            ("confirmPassword".to_string(), json!("hunter23")),
        ]);
        let result = engine.validate_cross_fields(&[rule], &values);
        assert_eq!(
            result.error_messages("confirmPassword"),
            vec!["Passwords must match".to_string()]
        );
        assert!(result.error_messages("password").is_empty());
    }
}
