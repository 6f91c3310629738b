//! Schema import and export.
//!
//! Import is all-or-nothing: a document either becomes a [`LoadedSchema`] that
//! passed every structural check, or an [`ImportError`] and nothing else happens.

use crate::condition::{ConditionEvaluator, DependencyGraph, DependencyStatus};
use crate::config::CyclePolicy;
use crate::error::{ImportError, SchemaError};
use crate::schema::{FieldKind, FormSchema};
use crate::validation::NamedRule;
use crate::validation::builtin::compile_field_rules;
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::sync::Arc;

/// A schema that passed every load-time check, with its dependency graph built.
#[derive(Debug, Clone)]
pub struct LoadedSchema {
    pub schema: Arc<FormSchema>,
    pub evaluator: Arc<ConditionEvaluator>,
    /// Declarative rules of every field, compiled once at load.
    pub rules: Arc<HashMap<String, Arc<Vec<NamedRule>>>>,
}

impl LoadedSchema {
    /// Checks a schema and builds its evaluator.
    #[tracing::instrument(skip(schema), fields(schema_id = %schema.id))]
    pub fn new(schema: FormSchema, policy: CyclePolicy) -> Result<Self, SchemaError> {
        // 1. Identity
        let mut section_ids = HashSet::new();
        for section in &schema.sections {
            if !section_ids.insert(section.id.as_str()) {
                return Err(SchemaError::DuplicateSectionId(section.id.clone()));
            }
        }
        let mut names = HashSet::new();
        for (_, field) in schema.fields() {
            if field.name.trim().is_empty() {
                return Err(SchemaError::Malformed(format!("field '{}' has an empty name", field.id)));
            }
            if !names.insert(field.name.as_str()) {
                return Err(SchemaError::DuplicateFieldName(field.name.clone()));
            }
        }

        // 2. Rules compile (patterns, bounds, custom names)
        let mut rules = HashMap::with_capacity(schema.field_count());
        for (_, field) in schema.fields() {
            rules.insert(field.name.clone(), Arc::new(compile_field_rules(field)?));
        }
        for def in &schema.cross_field_rules {
            let Some(owner) = def.fields.first() else {
                return Err(SchemaError::InvalidRule {
                    field: def.rule.clone(),
                    reason: "cross-field rule lists no fields".to_string(),
                });
            };
            if let Some(missing) = def.fields.iter().find(|f| !names.contains(f.as_str())) {
                return Err(SchemaError::InvalidRule {
                    field: owner.clone(),
                    reason: format!("cross-field rule '{}' names unknown field '{missing}'", def.rule),
                });
            }
        }

        // 3. Dependencies
        let graph = DependencyGraph::build(&schema)?;
        if let DependencyStatus::CyclicWith(members) = graph.status()
            && policy == CyclePolicy::Reject
        {
            return Err(SchemaError::CyclicDependency(members.clone()));
        }

        let evaluator = ConditionEvaluator::with_graph(&schema, graph);
        tracing::info!(fields = schema.field_count(), sections = schema.sections.len(), "Schema loaded");
        Ok(Self {
            schema: Arc::new(schema),
            evaluator: Arc::new(evaluator),
            rules: Arc::new(rules),
        })
    }

    pub fn status(&self) -> &DependencyStatus {
        self.evaluator.graph().status()
    }
}

/// Loads a schema file. `.yaml`/`.yml` are read as YAML, everything else as JSON.
pub fn load_schema(path: impl AsRef<Path>, policy: CyclePolicy) -> Result<LoadedSchema, ImportError> {
    let path = path.as_ref();
    let content = std::fs::read_to_string(path)?;
    match path.extension().and_then(|e| e.to_str()) {
        Some("yaml") | Some("yml") => load_schema_from_yaml(&content, policy),
        _ => load_schema_from_str(&content, policy),
    }
}

/// Parses and checks a JSON schema document.
pub fn load_schema_from_str(json: &str, policy: CyclePolicy) -> Result<LoadedSchema, ImportError> {
    let document: Value = serde_json::from_str(json).map_err(|e| ImportError::Malformed(e.to_string()))?;
    load_schema_from_value(document, policy)
}

pub fn load_schema_from_yaml(yaml: &str, policy: CyclePolicy) -> Result<LoadedSchema, ImportError> {
    let document: Value = serde_yaml::from_str(yaml).map_err(|e| ImportError::Malformed(e.to_string()))?;
    load_schema_from_value(document, policy)
}

#[tracing::instrument(skip_all)]
pub fn load_schema_from_value(document: Value, policy: CyclePolicy) -> Result<LoadedSchema, ImportError> {
    // Report unknown field types by name before serde gives a generic enum error
    check_field_types(&document)?;

    let schema: FormSchema =
        serde_json::from_value(document).map_err(|e| SchemaError::Malformed(e.to_string()))?;
    Ok(LoadedSchema::new(schema, policy)?)
}

fn check_field_types(document: &Value) -> Result<(), SchemaError> {
    let sections = document
        .get("sections")
        .and_then(|s| s.as_array())
        .into_iter()
        .flatten();
    for section in sections {
        let fields = section.get("fields").and_then(|f| f.as_array()).into_iter().flatten();
        for field in fields {
            let Some(tag) = field.get("type").and_then(|t| t.as_str()) else {
                continue;
            };
            if FieldKind::from_tag(tag).is_none() {
                let name = field
                    .get("name")
                    .and_then(|n| n.as_str())
                    .unwrap_or("<unnamed>")
                    .to_string();
                return Err(SchemaError::UnknownFieldType {
                    field: name,
                    tag: tag.to_string(),
                });
            }
        }
    }
    Ok(())
}

/// Serializes a schema to pretty JSON in the exchange format.
pub fn export_json(schema: &FormSchema) -> anyhow::Result<String> {
    Ok(serde_json::to_string_pretty(schema)?)
}

pub fn export_yaml(schema: &FormSchema) -> anyhow::Result<String> {
    Ok(serde_yaml::to_string(schema)?)
}

/// Writes a schema next to where it would be loaded from, picking the format by extension.
pub fn save_schema(schema: &FormSchema, path: impl AsRef<Path>) -> anyhow::Result<()> {
    let path = path.as_ref();
    let content = match path.extension().and_then(|e| e.to_str()) {
        Some("yaml") | Some("yml") => export_yaml(schema)?,
        _ => export_json(schema)?,
    };
    std::fs::write(path, content)?;
    tracing::info!(path = %path.display(), "Schema saved");
    Ok(())
}

/// JSON Schema describing the exchange format, for authoring tools.
pub fn exchange_format_schema() -> Value {
    let root = schemars::schema_for!(FormSchema);
    serde_json::to_value(root).unwrap_or(Value::Null)
}
