use super::builtin::fields_match;
use super::{CrossFieldValidator, RuleImpl};
use dashmap::DashMap;
use once_cell::sync::Lazy;
use std::sync::Arc;

static GLOBAL: Lazy<Arc<RuleRegistry>> = Lazy::new(|| {
    let registry = RuleRegistry::default();
    registry.register_cross_rule("fields_match", fields_match);
    Arc::new(registry)
});

/// Named rule implementations that schemas reference by string.
///
/// The process-wide instance is [`RuleRegistry::global`]; engines can be handed a
/// private one instead.
#[derive(Default)]
pub struct RuleRegistry {
    rules: DashMap<String, RuleImpl>,
    cross_rules: DashMap<String, Arc<dyn CrossFieldValidator>>,
}

impl RuleRegistry {
    pub fn global() -> Arc<RuleRegistry> {
        GLOBAL.clone()
    }

    /// A registry holding only the built-in cross-field rules.
    pub fn with_builtins() -> Self {
        let registry = Self::default();
        registry.register_cross_rule("fields_match", fields_match);
        registry
    }

    /// Registers a field rule. A later registration under the same name wins.
    pub fn register(&self, name: impl Into<String>, rule: RuleImpl) {
        let name = name.into();
        let kind = if rule.is_async() { "async" } else { "sync" };
        self.rules.insert(name.clone(), rule);
        tracing::info!(rule = %name, kind, "Registered rule");
    }

    pub fn register_cross_rule(
        &self,
        name: impl Into<String>,
        rule: impl CrossFieldValidator + 'static,
    ) {
        let name = name.into();
        self.cross_rules.insert(name.clone(), Arc::new(rule));
        tracing::info!(rule = %name, "Registered cross-field rule");
    }

    pub fn get(&self, name: &str) -> Option<RuleImpl> {
        self.rules.get(name).map(|r| r.value().clone())
    }

    pub fn get_cross_rule(&self, name: &str) -> Option<Arc<dyn CrossFieldValidator>> {
        self.cross_rules.get(name).map(|r| r.value().clone())
    }

    pub fn contains_cross_rule(&self, name: &str) -> bool {
        self.cross_rules.contains_key(name)
    }

    /// Registered field rule names, sorted.
    pub fn list_rules(&self) -> Vec<String> {
        let mut names: Vec<String> = self.rules.iter().map(|r| r.key().clone()).collect();
        names.sort();
        names
    }

    pub fn list_cross_rules(&self) -> Vec<String> {
        let mut names: Vec<String> = self.cross_rules.iter().map(|r| r.key().clone()).collect();
        names.sort();
        names
    }
}

/// Adds a field rule to the process-wide registry.
pub fn register_named_rule(name: impl Into<String>, rule: RuleImpl) {
    RuleRegistry::global().register(name, rule);
}

/// Adds a cross-field rule to the process-wide registry.
pub fn register_named_cross_rule(name: impl Into<String>, rule: impl CrossFieldValidator + 'static) {
    RuleRegistry::global().register_cross_rule(name, rule);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::validation::{RuleOutcome, ValidationContext};
    use serde_json::Value;

    #[test]
    fn test_global_has_fields_match() {
        assert!(RuleRegistry::global().contains_cross_rule("fields_match"));
    }

    #[test]
    fn test_reregistering_replaces() {
        let registry = RuleRegistry::default();
        let always = |_: &Value, _: &ValidationContext| anyhow::Ok(RuleOutcome::valid());
        let never = |_: &Value, _: &ValidationContext| anyhow::Ok(RuleOutcome::error("no", "No"));
        registry.register("check", RuleImpl::Sync(Arc::new(always)));
        registry.register("check", RuleImpl::Sync(Arc::new(never)));
        assert_eq!(registry.list_rules(), vec!["check".to_string()]);

        let ctx = ValidationContext::new("f", Default::default());
        let Some(RuleImpl::Sync(rule)) = registry.get("check") else {
            panic!("expected sync rule");
        };
        assert!(!rule.validate(&Value::Null, &ctx).unwrap().is_valid());
    }
}
