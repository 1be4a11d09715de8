//! CN-008: Synthesis context.
//!
//! `App` owns everything one pass needs: the node tree, the deferred engine,
//! the dependency graph, and settings. Nothing is process-global, so any
//! number of apps can be built and synthesized side by side.

use super::deferred::{DeferredEngine, DeferredHandle, Origin, ResolveContext, Resolver};
use super::dialect::ExpressionDialect;
use super::error::{ProduceError, SynthError};
use super::graph::DependencyGraph;
use super::synth::{self, Assembly};
use super::tree::{NodeId, NodeKind, OutputNode, ResourceNode, Tree, UnitNode};
use super::types::{SynthSettings, Value};

#[derive(Debug)]
pub struct App {
    name: String,
    tree: Tree,
    engine: DeferredEngine,
    graph: DependencyGraph,
    settings: SynthSettings,
}

impl App {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            tree: Tree::new(),
            engine: DeferredEngine::new(),
            graph: DependencyGraph::new(),
            settings: SynthSettings::default(),
        }
    }

    pub fn with_settings(mut self, settings: SynthSettings) -> Self {
        self.settings = settings;
        self
    }

    /// Swap the expression dialect used for references, joins and imports.
    pub fn with_dialect(mut self, dialect: Box<dyn ExpressionDialect>) -> Self {
        self.engine.set_dialect(dialect);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn settings(&self) -> &SynthSettings {
        &self.settings
    }

    pub fn tree(&self) -> &Tree {
        &self.tree
    }

    pub fn engine(&self) -> &DeferredEngine {
        &self.engine
    }

    pub fn graph(&self) -> &DependencyGraph {
        &self.graph
    }

    pub fn root(&self) -> NodeId {
        self.tree.root()
    }

    // ------------------------------------------------------------------
    // Construction
    // ------------------------------------------------------------------

    pub fn add_node(&mut self, parent: NodeId, name: &str, kind: NodeKind) -> Result<NodeId, SynthError> {
        self.tree.add(parent, name, kind)
    }

    /// Add a deployment unit. Units may nest; each still emits its own document.
    pub fn add_unit(
        &mut self,
        parent: NodeId,
        name: &str,
        description: Option<String>,
    ) -> Result<NodeId, SynthError> {
        self.add_node(parent, name, NodeKind::Unit(UnitNode { description }))
    }

    pub fn add_group(&mut self, parent: NodeId, name: &str) -> Result<NodeId, SynthError> {
        self.add_node(parent, name, NodeKind::Group)
    }

    pub fn add_resource(
        &mut self,
        parent: NodeId,
        name: &str,
        resource: ResourceNode,
    ) -> Result<NodeId, SynthError> {
        self.add_node(parent, name, NodeKind::Resource(resource))
    }

    pub fn add_output(
        &mut self,
        parent: NodeId,
        name: &str,
        output: OutputNode,
    ) -> Result<NodeId, SynthError> {
        self.add_node(parent, name, NodeKind::Output(output))
    }

    /// Replace a resource's properties or an output's value.
    pub fn set_value(&mut self, id: NodeId, value: Value) -> Result<(), SynthError> {
        let path = self.tree.path(id).to_string();
        match self.tree.kind_mut(id)? {
            NodeKind::Resource(r) => r.properties = value,
            NodeKind::Output(o) => o.value = value,
            other => {
                return Err(SynthError::configuration(format!(
                    "cannot set a value on {} node '{}'",
                    other.label(),
                    path
                )))
            }
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // Deferred values
    // ------------------------------------------------------------------

    /// Register a producer owned by `owner`. Failures are reported against
    /// the owner's path.
    pub fn create_deferred<F>(&mut self, owner: NodeId, producer: F) -> Result<DeferredHandle, SynthError>
    where
        F: FnOnce(&mut Resolver<'_>) -> Result<Value, ProduceError> + 'static,
    {
        let origin = self.origin(owner, None)?;
        Ok(self.engine.create(origin, producer))
    }

    /// Resolve a handle on behalf of `consumer`.
    pub fn resolve(&mut self, handle: DeferredHandle, consumer: NodeId) -> Result<Value, SynthError> {
        let ctx = ResolveContext::new(
            self.tree.unit_of(consumer),
            self.tree.get(consumer)?.path.clone(),
        );
        self.engine.resolve(handle, &ctx)
    }

    pub fn to_symbolic(&self, handle: DeferredHandle) -> String {
        self.engine.to_symbolic(handle)
    }

    /// Provider-evaluated reference to `node`, usable only inside its unit.
    pub fn reference(&mut self, node: NodeId) -> Result<DeferredHandle, SynthError> {
        let unit = self.tree.unit_of(node);
        let origin = self.origin(node, unit)?;
        let logical_id = self.tree.logical_id(node);
        Ok(self
            .engine
            .create(origin, move |r| Ok(r.dialect().reference(&logical_id))))
    }

    /// Provider-evaluated attribute of `node`, usable only inside its unit.
    pub fn attribute(&mut self, node: NodeId, attribute: &str) -> Result<DeferredHandle, SynthError> {
        let unit = self.tree.unit_of(node);
        let origin = self.origin(node, unit)?;
        let logical_id = self.tree.logical_id(node);
        let attribute = attribute.to_string();
        Ok(self
            .engine
            .create(origin, move |r| Ok(r.dialect().attribute(&logical_id, &attribute))))
    }

    fn origin(&self, node: NodeId, scope: Option<NodeId>) -> Result<Origin, SynthError> {
        Ok(Origin {
            node: Some(node),
            unit: self.tree.unit_of(node),
            path: self.tree.get(node)?.path.clone(),
            scope,
        })
    }

    // ------------------------------------------------------------------
    // Dependencies
    // ------------------------------------------------------------------

    pub fn add_dependency(&mut self, dependent: NodeId, dependency: NodeId) -> Result<(), SynthError> {
        self.graph.add_dependency(&self.tree, dependent, dependency)
    }

    pub fn assert_same_unit(&self, a: NodeId, b: NodeId) -> Result<(), SynthError> {
        self.graph.assert_same_unit(&self.tree, a, b)
    }

    /// Carry `value` from `producer`'s unit into `consumer`'s unit.
    pub fn export_reference(
        &mut self,
        consumer: NodeId,
        producer: NodeId,
        value: Value,
    ) -> Result<DeferredHandle, SynthError> {
        self.graph
            .export_reference(&self.tree, &mut self.engine, consumer, producer, value)
    }

    /// Run the synthesis pass. Consumes the app: a pass owns its cache and
    /// graph, and a frozen tree cannot be reused.
    pub fn synth(self) -> Result<Assembly, SynthError> {
        synth::synthesize(self)
    }

    pub(crate) fn into_parts(self) -> (String, Tree, DeferredEngine, DependencyGraph, SynthSettings) {
        (self.name, self.tree, self.engine, self.graph, self.settings)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn two_units() -> (App, NodeId, NodeId, NodeId, NodeId) {
        let mut app = App::new("test");
        let root = app.root();
        let u1 = app.add_unit(root, "one", None).unwrap();
        let a = app.add_resource(u1, "a", ResourceNode::new("T::A")).unwrap();
        let u2 = app.add_unit(root, "two", None).unwrap();
        let b = app.add_resource(u2, "b", ResourceNode::new("T::B")).unwrap();
        (app, u1, u2, a, b)
    }

    #[test]
    fn test_cn008_resolve_is_idempotent() {
        let (mut app, _, _, a, _) = two_units();
        let h = app.create_deferred(a, |_| Ok(Value::from("x"))).unwrap();
        let first = app.resolve(h, a).unwrap();
        let second = app.resolve(h, a).unwrap();
        assert_eq!(first, second);
        assert_eq!(app.engine().invocations(), 1);
    }

    #[test]
    fn test_cn008_reference_and_attribute_shapes() {
        let (mut app, _, _, a, _) = two_units();
        let id = app.tree().logical_id(a);
        let r = app.reference(a).unwrap();
        let g = app.attribute(a, "Arn").unwrap();
        assert_eq!(app.resolve(r, a).unwrap(), Value::map([("Ref", id.as_str())]));
        assert_eq!(
            app.resolve(g, a).unwrap(),
            Value::map([("Fn::GetAtt", Value::list([id.as_str(), "Arn"]))])
        );
    }

    #[test]
    fn test_cn008_reference_is_unit_scoped() {
        let (mut app, _, _, a, b) = two_units();
        let r = app.reference(a).unwrap();
        let err = app.resolve(r, b).unwrap_err();
        assert_eq!(
            err,
            SynthError::ScopeViolation {
                dependent: "two/b".to_string(),
                dependency: "one/a".to_string()
            }
        );
    }

    #[test]
    fn test_cn008_cross_unit_dependency_needs_export() {
        let (mut app, _, _, a, b) = two_units();
        assert!(matches!(
            app.add_dependency(a, b),
            Err(SynthError::ScopeViolation { .. })
        ));
        app.export_reference(a, b, Value::from("v")).unwrap();
        app.add_dependency(a, b).unwrap();
        assert!(app.assert_same_unit(a, b).is_err());
    }

    #[test]
    fn test_cn008_set_value_targets() {
        let (mut app, u1, _, a, _) = two_units();
        app.set_value(a, Value::map([("Name", "x")])).unwrap();
        match &app.tree().node(a).kind {
            NodeKind::Resource(r) => assert_eq!(r.properties.get("Name"), Some(&Value::from("x"))),
            other => panic!("unexpected {other:?}"),
        }
        assert!(matches!(
            app.set_value(u1, Value::Null),
            Err(SynthError::Configuration { .. })
        ));
    }

    #[test]
    fn test_cn008_independent_apps_do_not_share_state() {
        let (mut first, _, _, a, _) = two_units();
        let (second, _, _, _, _) = two_units();
        first.create_deferred(a, |_| Ok(Value::Null)).unwrap();
        assert_eq!(first.engine().len(), 1);
        assert!(second.engine().is_empty());
    }
}
