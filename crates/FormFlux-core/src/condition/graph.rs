use crate::error::SchemaError;
use crate::schema::FormSchema;
use petgraph::algo::tarjan_scc;
use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::visit::Dfs;
use std::collections::{HashMap, HashSet};

/// Outcome of the cycle check. Downstream code has to match on it, so a cyclic
/// schema can never be mistaken for a safe one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DependencyStatus {
    Acyclic,
    /// Every field that takes part in at least one cycle, in document order.
    CyclicWith(Vec<String>),
}

impl DependencyStatus {
    pub fn is_acyclic(&self) -> bool {
        matches!(self, DependencyStatus::Acyclic)
    }
}

/// Directed graph over field names. An edge `a -> b` means "b's visibility reads a".
///
/// Section dependencies contribute an edge to every field of the section.
#[derive(Debug, Clone)]
pub struct DependencyGraph {
    graph: DiGraph<String, ()>,
    nodes: HashMap<String, NodeIndex>,
    order: Vec<String>,
    cyclic: HashSet<String>,
    status: DependencyStatus,
}

impl DependencyGraph {
    /// Builds the graph and runs cycle detection.
    ///
    /// Fails only when a dependency names a field that does not exist.
    #[tracing::instrument(skip(schema), fields(schema_id = %schema.id))]
    pub fn build(schema: &FormSchema) -> Result<Self, SchemaError> {
        // 1. One node per field, in document order
        let mut graph = DiGraph::<String, ()>::new();
        let mut nodes = HashMap::new();
        let mut position = HashMap::new();
        for (idx, (_, field)) in schema.fields().enumerate() {
            let node = graph.add_node(field.name.clone());
            nodes.insert(field.name.clone(), node);
            position.insert(field.name.clone(), idx);
        }

        // 2. Edges from dependency source to dependent field
        for section in &schema.sections {
            for field in &section.fields {
                let target = nodes[&field.name];
                let deps = section.dependency.iter().chain(field.dependency.iter());
                for dep in deps {
                    let source = *nodes.get(&dep.field).ok_or_else(|| {
                        SchemaError::UnknownDependencySource {
                            target: field.name.clone(),
                            source_field: dep.field.clone(),
                        }
                    })?;
                    if !graph.contains_edge(source, target) {
                        graph.add_edge(source, target, ());
                    }
                }
            }
        }

        // 3. Strongly connected components come back in reverse topological order
        let mut sccs = tarjan_scc(&graph);
        sccs.reverse();

        let mut order = Vec::with_capacity(nodes.len());
        let mut cyclic = HashSet::new();
        for mut scc in sccs {
            scc.sort_by_key(|n| position[&graph[*n]]);
            let is_cycle = scc.len() > 1 || graph.contains_edge(scc[0], scc[0]);
            for node in scc {
                let name = graph[node].clone();
                if is_cycle {
                    cyclic.insert(name.clone());
                }
                order.push(name);
            }
        }

        let status = if cyclic.is_empty() {
            DependencyStatus::Acyclic
        } else {
            let mut members: Vec<String> = cyclic.iter().cloned().collect();
            members.sort_by_key(|name| position[name]);
            tracing::warn!(fields = ?members, "Dependency cycle detected");
            DependencyStatus::CyclicWith(members)
        };

        Ok(Self {
            graph,
            nodes,
            order,
            cyclic,
            status,
        })
    }

    pub fn status(&self) -> &DependencyStatus {
        &self.status
    }

    /// Field names with every dependency source ahead of its dependents.
    pub fn evaluation_order(&self) -> &[String] {
        &self.order
    }

    pub fn is_cyclic(&self, field: &str) -> bool {
        self.cyclic.contains(field)
    }

    pub fn has_dependents(&self, field: &str) -> bool {
        self.nodes.get(field).is_some_and(|n| {
            self.graph
                .neighbors_directed(*n, petgraph::Direction::Outgoing)
                .next()
                .is_some()
        })
    }

    /// All fields whose visibility may change when `field` changes.
    ///
    /// The field itself is included only when it reaches itself through a cycle.
    pub fn descendants(&self, field: &str) -> HashSet<String> {
        let Some(&start) = self.nodes.get(field) else {
            return HashSet::new();
        };

        let mut found = HashSet::new();
        let mut dfs = Dfs::new(&self.graph, start);
        while let Some(node) = dfs.next(&self.graph) {
            if node != start {
                found.insert(self.graph[node].clone());
            }
        }
        if self.cyclic.contains(field) {
            found.insert(field.to_string());
        }
        found
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{Dependency, FieldDefinition, FieldKind, Operator, Section};
    use serde_json::json;

    fn field(name: &str, depends_on: Option<&str>) -> FieldDefinition {
        FieldDefinition {
            id: format!("f_{name}"),
            kind: FieldKind::Text,
            name: name.to_string(),
            label: name.to_string(),
            placeholder: None,
            description: None,
            required: false,
            disabled: false,
            options: vec![],
            rules: vec![],
            dependency: depends_on.map(|src| Dependency::new(src, Operator::Equals, json!("x"))),
            default_value: None,
        }
    }

    fn schema(fields: Vec<FieldDefinition>) -> FormSchema {
        FormSchema {
            id: "s".into(),
            title: "S".into(),
            description: None,
            validation_mode: None,
            sections: vec![Section {
                id: "main".into(),
                title: "Main".into(),
                description: None,
                fields,
                dependency: None,
            }],
            cross_field_rules: vec![],
        }
    }

    #[test]
    fn test_topological_order_puts_sources_first() {
        let s = schema(vec![
            field("c", Some("b")),
            field("b", Some("a")),
            field("a", None),
        ]);
        let g = DependencyGraph::build(&s).unwrap();
        assert!(g.status().is_acyclic());
        let order = g.evaluation_order();
        let pos = |n: &str| order.iter().position(|x| x == n).unwrap();
        assert!(pos("a") < pos("b"));
        assert!(pos("b") < pos("c"));
    }

    #[test]
    fn test_cycle_members_are_reported() {
        let s = schema(vec![
            field("a", Some("b")),
            field("b", Some("a")),
            field("c", Some("a")),
        ]);
        let g = DependencyGraph::build(&s).unwrap();
        assert_eq!(
            g.status(),
            &DependencyStatus::CyclicWith(vec!["a".to_string(), "b".to_string()])
        );
        assert!(g.is_cyclic("a"));
        assert!(!g.is_cyclic("c"));
    }

    #[test]
    fn test_self_dependency_is_a_cycle() {
        let s = schema(vec![field("a", Some("a"))]);
        let g = DependencyGraph::build(&s).unwrap();
        assert_eq!(g.status(), &DependencyStatus::CyclicWith(vec!["a".to_string()]));
    }

    #[test]
    fn test_descendants_are_transitive() {
        let s = schema(vec![
            field("a", None),
            field("b", Some("a")),
            field("c", Some("b")),
            field("d", None),
        ]);
        let g = DependencyGraph::build(&s).unwrap();
        let d = g.descendants("a");
        assert_eq!(d, HashSet::from(["b".to_string(), "c".to_string()]));
        assert!(g.descendants("d").is_empty());
        assert!(g.has_dependents("b"));
        assert!(!g.has_dependents("c"));
    }

    #[test]
    fn test_unknown_source_is_rejected() {
        let s = schema(vec![field("a", Some("ghost"))]);
        let err = DependencyGraph::build(&s).unwrap_err();
        assert!(matches!(err, SchemaError::UnknownDependencySource { .. }));
    }
}
