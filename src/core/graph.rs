//! CN-007: Dependency graph and scope broker.
//!
//! Records ordering edges between nodes, keeps them inside a single
//! deployment unit unless an export sanctions the crossing, and reduces
//! cross-unit edges to a unit-level DAG. Ordering uses Kahn's algorithm with
//! declaration-order tie-breaking so emission is deterministic.

use super::deferred::{DeferredEngine, DeferredHandle, Origin};
use super::error::SynthError;
use super::tree::{NodeId, Tree};
use super::types::Value;
use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap, HashSet};

/// How an edge came to exist.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EdgeKind {
    Explicit,
    DerivedFromExport,
}

/// `source` is emitted after `target`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Edge {
    pub source: NodeId,
    pub target: NodeId,
    pub kind: EdgeKind,
}

/// Unit `dependent` is emitted after unit `dependency`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnitEdge {
    pub dependent: NodeId,
    pub dependency: NodeId,
    pub kind: EdgeKind,
}

/// A unit-level output registered by `export_reference`.
#[derive(Debug, Clone, PartialEq)]
pub struct Export {
    pub unit: NodeId,
    pub producer: NodeId,
    pub output_id: String,
    pub export_name: String,
    pub value: Value,
}

/// A unit-level import registered by `export_reference`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Import {
    pub unit: NodeId,
    pub from_unit: NodeId,
    pub export_name: String,
}

/// Ordering edges, exports, and imports accumulated before and during a pass.
#[derive(Debug, Default)]
pub struct DependencyGraph {
    edges: Vec<Edge>,
    edge_index: HashSet<(NodeId, NodeId)>,
    unit_edges: Vec<UnitEdge>,
    unit_edge_index: HashSet<(NodeId, NodeId)>,
    exports: Vec<Export>,
    imports: Vec<Import>,
}

impl DependencyGraph {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn edges(&self) -> &[Edge] {
        &self.edges
    }

    pub fn unit_edges(&self) -> &[UnitEdge] {
        &self.unit_edges
    }

    pub fn exports(&self) -> &[Export] {
        &self.exports
    }

    pub fn imports(&self) -> &[Import] {
        &self.imports
    }

    pub fn imports_of(&self, unit: NodeId) -> impl Iterator<Item = &Import> {
        self.imports.iter().filter(move |i| i.unit == unit)
    }

    /// Units that `unit` must be emitted after, in registration order.
    pub fn unit_dependencies(&self, unit: NodeId) -> Vec<NodeId> {
        self.unit_edges
            .iter()
            .filter(|e| e.dependent == unit)
            .map(|e| e.dependency)
            .collect()
    }

    /// True once `producer_unit` has exported something to `consumer_unit`.
    fn has_route(&self, consumer_unit: NodeId, producer_unit: NodeId) -> bool {
        self.imports
            .iter()
            .any(|i| i.unit == consumer_unit && i.from_unit == producer_unit)
    }

    pub(crate) fn add_unit_edge(&mut self, dependent: NodeId, dependency: NodeId, kind: EdgeKind) {
        if self.unit_edge_index.insert((dependent, dependency)) {
            self.unit_edges.push(UnitEdge {
                dependent,
                dependency,
                kind,
            });
        }
    }

    /// Record that `dependent` must be emitted after `dependency`.
    pub fn add_dependency(
        &mut self,
        tree: &Tree,
        dependent: NodeId,
        dependency: NodeId,
    ) -> Result<(), SynthError> {
        tree.get(dependent)?;
        tree.get(dependency)?;
        if dependent == dependency {
            return Err(SynthError::SelfDependency {
                path: tree.path(dependent).to_string(),
            });
        }

        let dependent_unit = unit_required(tree, dependent)?;
        let dependency_unit = unit_required(tree, dependency)?;
        let kind = if dependent_unit == dependency_unit {
            EdgeKind::Explicit
        } else if self.has_route(dependent_unit, dependency_unit) {
            EdgeKind::DerivedFromExport
        } else {
            return Err(SynthError::ScopeViolation {
                dependent: tree.path(dependent).to_string(),
                dependency: tree.path(dependency).to_string(),
            });
        };

        if self.edge_index.insert((dependent, dependency)) {
            tracing::debug!(
                dependent = tree.path(dependent),
                dependency = tree.path(dependency),
                ?kind,
                "dependency edge"
            );
            self.edges.push(Edge {
                source: dependent,
                target: dependency,
                kind,
            });
        }
        if kind == EdgeKind::DerivedFromExport {
            self.add_unit_edge(dependent_unit, dependency_unit, kind);
        }
        Ok(())
    }

    /// Guard for direct references: both nodes must share a unit.
    pub fn assert_same_unit(&self, tree: &Tree, a: NodeId, b: NodeId) -> Result<(), SynthError> {
        let unit_a = unit_required(tree, a)?;
        let unit_b = unit_required(tree, b)?;
        if unit_a == unit_b {
            Ok(())
        } else {
            Err(SynthError::ScopeViolation {
                dependent: tree.path(a).to_string(),
                dependency: tree.path(b).to_string(),
            })
        }
    }

    /// Carry `value` from `producer`'s unit into `consumer`'s unit.
    ///
    /// Registers an output on the producer unit and an import on the consumer
    /// unit, adds the unit edge, and returns a handle resolvable only inside
    /// the consumer unit.
    pub fn export_reference(
        &mut self,
        tree: &Tree,
        engine: &mut DeferredEngine,
        consumer: NodeId,
        producer: NodeId,
        value: Value,
    ) -> Result<DeferredHandle, SynthError> {
        let consumer_unit = unit_required(tree, consumer)?;
        let producer_unit = unit_required(tree, producer)?;
        let origin = Origin {
            node: Some(consumer),
            unit: Some(consumer_unit),
            path: tree.path(consumer).to_string(),
            scope: Some(consumer_unit),
        };

        if consumer_unit == producer_unit {
            return Ok(engine.create(origin, move |_| Ok(value)));
        }

        let existing = self
            .exports
            .iter()
            .find(|e| e.producer == producer && e.value == value)
            .map(|e| e.export_name.clone());
        let export_name = match existing {
            Some(name) => name,
            None => {
                let ordinal = self.exports.iter().filter(|e| e.producer == producer).count();
                let output_id = if ordinal == 0 {
                    format!("Export{}", tree.logical_id(producer))
                } else {
                    format!("Export{}{}", tree.logical_id(producer), ordinal)
                };
                let export_name = format!("{}:{}", tree.artifact_id(producer_unit), output_id);
                tracing::debug!(
                    producer = tree.path(producer),
                    export = %export_name,
                    "registered export"
                );
                self.exports.push(Export {
                    unit: producer_unit,
                    producer,
                    output_id,
                    export_name: export_name.clone(),
                    value,
                });
                export_name
            }
        };

        let import = Import {
            unit: consumer_unit,
            from_unit: producer_unit,
            export_name: export_name.clone(),
        };
        if !self.imports.contains(&import) {
            self.imports.push(import);
        }
        self.add_unit_edge(consumer_unit, producer_unit, EdgeKind::DerivedFromExport);

        let expression = engine.dialect().import_value(&export_name);
        Ok(engine.create(origin, move |_| Ok(expression)))
    }

    /// Per-resource predecessor lists, de-duplicated, in declaration order.
    ///
    /// Edges on groups (or any non-resource node) expand to every resource
    /// in that node's subtree within the same unit.
    pub fn resource_predecessors(&self, tree: &Tree) -> HashMap<NodeId, Vec<NodeId>> {
        let position: HashMap<NodeId, usize> = tree
            .preorder()
            .into_iter()
            .enumerate()
            .map(|(i, id)| (id, i))
            .collect();

        let mut preds: HashMap<NodeId, Vec<NodeId>> = HashMap::new();
        for edge in self.edges.iter().filter(|e| e.kind == EdgeKind::Explicit) {
            let targets = tree.resources_within(edge.target);
            for source in tree.resources_within(edge.source) {
                let entry = preds.entry(source).or_default();
                for &target in &targets {
                    if target != source && !entry.contains(&target) {
                        entry.push(target);
                    }
                }
            }
        }
        for list in preds.values_mut() {
            list.sort_by_key(|id| position.get(id).copied().unwrap_or(usize::MAX));
        }
        preds
    }

    /// Reject resource-level cycles inside `unit`.
    pub fn check_unit_acyclic(
        &self,
        tree: &Tree,
        unit: NodeId,
        preds: &HashMap<NodeId, Vec<NodeId>>,
    ) -> Result<(), SynthError> {
        let resources = tree.resources_within(unit);
        let index: HashMap<NodeId, usize> =
            resources.iter().enumerate().map(|(i, id)| (*id, i)).collect();

        let mut edges = Vec::new();
        for (i, resource) in resources.iter().enumerate() {
            for pred in preds.get(resource).into_iter().flatten() {
                if let Some(&p) = index.get(pred) {
                    edges.push((p, i));
                }
            }
        }

        kahn_order(resources.len(), &edges).map(|_| ()).map_err(|stuck| {
            SynthError::configuration(format!(
                "resource dependency cycle in unit '{}' involving: {}",
                tree.path(unit),
                stuck
                    .iter()
                    .map(|&i| tree.path(resources[i]))
                    .collect::<Vec<_>>()
                    .join(", ")
            ))
        })
    }

    /// Topological emission order of all units.
    pub fn unit_order(&self, tree: &Tree) -> Result<Vec<NodeId>, SynthError> {
        let units = tree.units();
        let index: HashMap<NodeId, usize> =
            units.iter().enumerate().map(|(i, id)| (*id, i)).collect();

        let edges: Vec<(usize, usize)> = self
            .unit_edges
            .iter()
            .filter_map(|e| Some((*index.get(&e.dependency)?, *index.get(&e.dependent)?)))
            .collect();

        match kahn_order(units.len(), &edges) {
            Ok(order) => Ok(order.into_iter().map(|i| units[i]).collect()),
            Err(stuck) => Err(SynthError::configuration(format!(
                "unit dependency cycle detected involving: {}",
                stuck
                    .iter()
                    .map(|&i| tree.path(units[i]))
                    .collect::<Vec<_>>()
                    .join(", ")
            ))),
        }
    }
}

fn unit_required(tree: &Tree, id: NodeId) -> Result<NodeId, SynthError> {
    tree.get(id)?;
    tree.unit_of(id).ok_or_else(|| SynthError::OutsideUnit {
        path: tree.path(id).to_string(),
    })
}

/// Kahn's algorithm over `0..count`; each edge is `(before, after)`.
/// Ready nodes are taken lowest index first. On a cycle, returns the
/// indices that could not be ordered.
fn kahn_order(count: usize, edges: &[(usize, usize)]) -> Result<Vec<usize>, Vec<usize>> {
    let mut in_degree = vec![0usize; count];
    let mut adjacency: Vec<Vec<usize>> = vec![Vec::new(); count];
    for &(before, after) in edges {
        adjacency[before].push(after);
        in_degree[after] += 1;
    }

    let mut ready: BinaryHeap<Reverse<usize>> = (0..count)
        .filter(|&i| in_degree[i] == 0)
        .map(Reverse)
        .collect();

    let mut order = Vec::with_capacity(count);
    while let Some(Reverse(current)) = ready.pop() {
        order.push(current);
        for &next in &adjacency[current] {
            in_degree[next] -= 1;
            if in_degree[next] == 0 {
                ready.push(Reverse(next));
            }
        }
    }

    if order.len() == count {
        Ok(order)
    } else {
        Err((0..count).filter(|&i| in_degree[i] > 0).collect())
    }
}
