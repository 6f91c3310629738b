//! # Form State
//!
//! The mutable half of a session: values plus the parallel per-field maps the host
//! renders from. Only [`crate::manager::FormManager`] mutates it.

use crate::condition::VisibilityMap;
use crate::schema::FormSchema;
use crate::validation::{FormValidation, ValidationResult, ValueBag};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{HashMap, HashSet};

/// Lifecycle of a single field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldStatus {
    Pristine,
    Touched,
    Validating,
    Valid,
    Invalid,
}

/// Fields whose active flag flipped in one visibility update.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VisibilityChange {
    pub activated: Vec<String>,
    pub deactivated: Vec<String>,
}

#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FormState {
    pub values: ValueBag,
    pub errors: HashMap<String, Vec<String>>,
    pub warnings: HashMap<String, Vec<String>>,
    pub touched: HashMap<String, bool>,
    pub visible: HashMap<String, bool>,
    pub disabled: HashMap<String, bool>,
    pub validating: HashMap<String, bool>,
    /// Bumped on every change to a field's value; validation results carry the
    /// generation they started at.
    #[serde(skip)]
    pub generations: HashMap<String, u64>,
    /// Set once a submit has run; newly shown fields are revalidated after that.
    #[serde(skip)]
    pub submitted: bool,
    /// Fields that have completed at least one validation since their last edit.
    #[serde(skip)]
    checked: HashSet<String>,
    #[serde(skip)]
    dirty: HashSet<String>,
}

impl FormState {
    /// Fresh state with every field at its default value.
    pub fn new(schema: &FormSchema) -> Self {
        let mut state = Self::default();
        state.add_missing(schema);
        state
    }

    /// Gives every schema field without state its default entries.
    pub fn add_missing(&mut self, schema: &FormSchema) {
        for (_, field) in schema.fields() {
            let name = &field.name;
            if !self.values.contains_key(name) {
                self.values.insert(
                    name.clone(),
                    field.default_value.clone().unwrap_or(Value::Null),
                );
            }
            self.touched.entry(name.clone()).or_insert(false);
            self.visible.entry(name.clone()).or_insert(true);
            self.disabled.entry(name.clone()).or_insert(field.disabled);
            self.validating.entry(name.clone()).or_insert(false);
            self.generations.entry(name.clone()).or_insert(0);
        }
    }

    /// Removes every key that no longer names a field of `schema`.
    pub fn prune(&mut self, schema: &FormSchema) {
        let names: HashSet<String> = schema.field_names().into_iter().collect();
        let keep = |k: &String| names.contains(k);
        self.values.retain(|k, _| keep(k));
        self.errors.retain(|k, _| keep(k));
        self.warnings.retain(|k, _| keep(k));
        self.touched.retain(|k, _| keep(k));
        self.visible.retain(|k, _| keep(k));
        self.disabled.retain(|k, _| keep(k));
        self.validating.retain(|k, _| keep(k));
        self.generations.retain(|k, _| keep(k));
        self.checked.retain(|k| keep(k));
        self.dirty.retain(|k| keep(k));
    }

    pub fn contains(&self, name: &str) -> bool {
        self.values.contains_key(name)
    }

    pub fn is_visible(&self, name: &str) -> bool {
        self.visible.get(name).copied().unwrap_or(true)
    }

    pub fn is_disabled(&self, name: &str) -> bool {
        self.disabled.get(name).copied().unwrap_or(false)
    }

    /// Visible and enabled.
    pub fn is_active(&self, name: &str) -> bool {
        self.is_visible(name) && !self.is_disabled(name)
    }

    pub fn is_touched(&self, name: &str) -> bool {
        self.touched.get(name).copied().unwrap_or(false)
    }

    pub fn is_validating(&self, name: &str) -> bool {
        self.validating.get(name).copied().unwrap_or(false)
    }

    pub fn generation(&self, name: &str) -> u64 {
        self.generations.get(name).copied().unwrap_or(0)
    }

    /// The value has been edited since the state was created or reset.
    pub fn is_dirty(&self, name: &str) -> bool {
        self.dirty.contains(name)
    }

    /// Bumps and returns the field's generation. Any result started earlier is stale.
    pub fn bump_generation(&mut self, name: &str) -> u64 {
        let generation = self.generations.entry(name.to_string()).or_insert(0);
        *generation += 1;
        *generation
    }

    pub fn first_error(&self, name: &str) -> Option<&str> {
        self.errors.get(name).and_then(|e| e.first()).map(|s| s.as_str())
    }

    pub fn status(&self, name: &str) -> FieldStatus {
        if self.is_validating(name) {
            FieldStatus::Validating
        } else if self.errors.get(name).is_some_and(|e| !e.is_empty()) {
            FieldStatus::Invalid
        } else if self.checked.contains(name) {
            FieldStatus::Valid
        } else if self.is_touched(name) {
            FieldStatus::Touched
        } else {
            FieldStatus::Pristine
        }
    }

    pub fn visibility(&self) -> VisibilityMap {
        VisibilityMap {
            visible: self.visible.clone(),
            disabled: self.disabled.clone(),
        }
    }

    /// Copies visibility flags in. Fields that stop being active lose their
    /// messages.
    pub fn apply_visibility(&mut self, map: &VisibilityMap) -> VisibilityChange {
        let mut change = VisibilityChange::default();
        for (name, visible) in &map.visible {
            let was_active = self.is_active(name);
            self.visible.insert(name.clone(), *visible);
            self.disabled.insert(name.clone(), map.is_disabled(name));
            let now_active = self.is_active(name);

            if was_active && !now_active {
                self.clear_messages(name);
                self.validating.insert(name.clone(), false);
                change.deactivated.push(name.clone());
            } else if !was_active && now_active {
                change.activated.push(name.clone());
            }
        }
        change.activated.sort();
        change.deactivated.sort();
        change
    }

    /// Stores a user edit: the value, a cleared message list and a new generation.
    pub fn record_edit(&mut self, name: &str, value: Value) -> u64 {
        self.values.insert(name.to_string(), value);
        self.clear_messages(name);
        self.validating.insert(name.to_string(), false);
        self.dirty.insert(name.to_string());
        self.bump_generation(name)
    }

    pub fn clear_messages(&mut self, name: &str) {
        self.errors.remove(name);
        self.warnings.remove(name);
        self.checked.remove(name);
    }

    /// Replaces one field's messages with a fresh result.
    pub fn apply_field_result(&mut self, name: &str, result: &ValidationResult) {
        set_or_remove(&mut self.errors, name, result.error_messages(name));
        set_or_remove(&mut self.warnings, name, result.warning_messages(name));
        self.validating.insert(name.to_string(), false);
        self.checked.insert(name.to_string());
    }

    /// Applies a whole-form result to the fields whose generation still matches
    /// `started`. Fields edited since then keep their newer messages.
    pub fn apply_form_validation(&mut self, validation: &FormValidation, started: &HashMap<String, u64>) {
        for (name, generation) in started {
            if self.generation(name) != *generation {
                continue;
            }
            let errors = validation.errors.get(name).cloned().unwrap_or_default();
            let warnings = validation.warnings.get(name).cloned().unwrap_or_default();
            set_or_remove(&mut self.errors, name, errors);
            set_or_remove(&mut self.warnings, name, warnings);
            self.validating.insert(name.clone(), false);
            if self.is_active(name) {
                self.checked.insert(name.clone());
            } else {
                self.checked.remove(name);
            }
        }
    }

    /// `values` restricted to the fields `visibility` marks active.
    pub fn active_subset(values: &ValueBag, visibility: &VisibilityMap) -> ValueBag {
        values
            .iter()
            .filter(|(name, _)| visibility.is_active(name))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }

    pub fn is_valid(&self) -> bool {
        self.errors.values().all(|e| e.is_empty())
    }
}

fn set_or_remove(map: &mut HashMap<String, Vec<String>>, name: &str, messages: Vec<String>) {
    if messages.is_empty() {
        map.remove(name);
    } else {
        map.insert(name.to_string(), messages);
    }
}
