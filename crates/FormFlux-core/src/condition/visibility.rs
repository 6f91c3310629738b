use super::evaluate;
use super::graph::DependencyGraph;
use crate::error::SchemaError;
use crate::schema::{Dependency, DependencyEffect, FormSchema};
use serde_json::Value;
use std::collections::HashMap;

/// Visible / disabled flags per field name.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VisibilityMap {
    pub visible: HashMap<String, bool>,
    pub disabled: HashMap<String, bool>,
}

impl VisibilityMap {
    pub fn is_visible(&self, name: &str) -> bool {
        self.visible.get(name).copied().unwrap_or(true)
    }

    pub fn is_disabled(&self, name: &str) -> bool {
        self.disabled.get(name).copied().unwrap_or(false)
    }

    /// Visible and enabled: the field takes part in validation and submission.
    pub fn is_active(&self, name: &str) -> bool {
        self.is_visible(name) && !self.is_disabled(name)
    }

    /// Active, and tracked by this map. Names outside the schema are never active.
    pub fn is_known_active(&self, name: &str) -> bool {
        self.visible.contains_key(name) && self.is_active(name)
    }
}

#[derive(Debug, Clone)]
struct Gate {
    section: Option<Dependency>,
    field: Option<Dependency>,
    disabled: bool,
}

/// Recomputes visibility for one schema. Holds no per-session state.
#[derive(Debug, Clone)]
pub struct ConditionEvaluator {
    graph: DependencyGraph,
    gates: HashMap<String, Gate>,
}

impl ConditionEvaluator {
    pub fn new(schema: &FormSchema) -> Result<Self, SchemaError> {
        let graph = DependencyGraph::build(schema)?;
        Ok(Self::with_graph(schema, graph))
    }

    pub fn with_graph(schema: &FormSchema, graph: DependencyGraph) -> Self {
        let gates = schema
            .fields()
            .map(|(section, field)| {
                (
                    field.name.clone(),
                    Gate {
                        section: section.dependency.clone(),
                        field: field.dependency.clone(),
                        disabled: field.disabled,
                    },
                )
            })
            .collect();
        Self { graph, gates }
    }

    pub fn graph(&self) -> &DependencyGraph {
        &self.graph
    }

    /// Full recompute over every field, in dependency order.
    pub fn recompute_visibility(&self, values: &HashMap<String, Value>) -> VisibilityMap {
        let mut map = VisibilityMap::default();
        for name in self.graph.evaluation_order() {
            let (visible, disabled) = self.evaluate_field(name, values, &map);
            map.visible.insert(name.clone(), visible);
            map.disabled.insert(name.clone(), disabled);
        }
        map
    }

    /// Targeted recompute of the fields downstream of `changed`.
    ///
    /// Returns the names whose visible or disabled flag flipped.
    pub fn recompute_from(
        &self,
        changed: &str,
        values: &HashMap<String, Value>,
        map: &mut VisibilityMap,
    ) -> Vec<String> {
        if !self.graph.has_dependents(changed) {
            return Vec::new();
        }
        let affected = self.graph.descendants(changed);

        let mut flipped = Vec::new();
        for name in self.graph.evaluation_order() {
            if !affected.contains(name) {
                continue;
            }
            let (visible, disabled) = self.evaluate_field(name, values, map);
            let was_visible = map.visible.insert(name.clone(), visible);
            let was_disabled = map.disabled.insert(name.clone(), disabled);
            if was_visible != Some(visible) || was_disabled != Some(disabled) {
                flipped.push(name.clone());
            }
        }
        flipped
    }

    fn evaluate_field(
        &self,
        name: &str,
        values: &HashMap<String, Value>,
        map: &VisibilityMap,
    ) -> (bool, bool) {
        let Some(gate) = self.gates.get(name) else {
            return (true, false);
        };

        // Fail open: a field caught in a cycle is always shown
        if self.graph.is_cyclic(name) {
            return (true, gate.disabled);
        }

        let mut visible = true;
        let mut disabled = gate.disabled;
        for dep in gate.section.iter().chain(gate.field.iter()) {
            let passes = map.is_visible(&dep.field) && evaluate(dep, values);
            match dep.effect {
                DependencyEffect::Show => visible &= passes,
                DependencyEffect::Enable => disabled |= !passes,
            }
        }
        (visible, disabled)
    }
}
