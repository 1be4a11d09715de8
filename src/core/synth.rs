//! CN-009: Synthesizer.
//!
//! One deterministic pass: freeze, collect dependencies, resolve values,
//! emit one document per unit in topological order, then scan the emitted
//! text for markers that should have been substituted. Any failure aborts
//! the pass with nothing emitted.

use super::app::App;
use super::deferred::{find_markers, DeferredEngine, ResolveContext};
use super::error::SynthError;
use super::graph::DependencyGraph;
use super::hasher;
use super::tree::{Bind, BindScope, NodeId, NodeKind, Tree};
use super::types::{DocumentFormat, ExportName, OutputEntry, ResourceEntry, Template, Value};
use std::collections::HashMap;

/// One emitted deployment document.
#[derive(Debug, Clone)]
pub struct UnitDocument {
    pub unit: NodeId,
    pub path: String,
    pub artifact_id: String,
    pub file_name: String,
    pub template: Template,
    /// Serialized document text
    pub body: String,
    /// Artifact ids of units this one is emitted after
    pub dependencies: Vec<String>,
    /// Export names this document defines
    pub exports: Vec<String>,
    /// Export names this document imports
    pub imports: Vec<String>,
    /// BLAKE3 hash of `body`
    pub hash: String,
}

/// Result of a successful pass: documents in emission order.
#[derive(Debug, Clone)]
pub struct Assembly {
    pub app: String,
    pub format: DocumentFormat,
    pub outdir: String,
    pub manifest: bool,
    pub documents: Vec<UnitDocument>,
}

impl Assembly {
    /// Look up a document by unit path.
    pub fn document(&self, path: &str) -> Option<&UnitDocument> {
        self.documents.iter().find(|d| d.path == path)
    }

    /// Unit paths in emission order.
    pub fn order(&self) -> Vec<&str> {
        self.documents.iter().map(|d| d.path.as_str()).collect()
    }
}

/// Run a full synthesis pass over `app`.
pub fn synthesize(app: App) -> Result<Assembly, SynthError> {
    let (name, mut tree, mut engine, mut graph, settings) = app.into_parts();
    let span = tracing::info_span!("synth", app = %name);
    let _enter = span.enter();

    tree.freeze();
    tracing::debug!(nodes = tree.len(), "tree frozen");

    collect_dependencies(&tree, &mut graph)?;
    tracing::debug!(edges = graph.edges().len(), "dependencies collected");

    let values = resolve_values(&tree, &mut engine)?;
    let export_values = resolve_exports(&tree, &graph, &mut engine)?;
    let swept = engine.resolve_pending()?;
    tracing::debug!(
        handles = engine.len(),
        invocations = engine.invocations(),
        swept,
        "deferred values resolved"
    );

    let order = graph.unit_order(&tree)?;
    let preds = graph.resource_predecessors(&tree);
    let mut documents = Vec::with_capacity(order.len());
    let mut export_owners: HashMap<String, String> = HashMap::new();
    for unit in order {
        graph.check_unit_acyclic(&tree, unit, &preds)?;
        let template = build_template(&tree, &graph, unit, &values, &export_values, &preds)?;
        let body = serialize(&template, settings.format).map_err(|message| SynthError::Serialize {
            unit: tree.path(unit).to_string(),
            message,
        })?;
        let artifact_id = tree.artifact_id(unit);

        let mut exports = Vec::new();
        for (output_id, output) in &template.outputs {
            let Some(export) = &output.export else {
                continue;
            };
            let owner = format!("{}/{}", tree.path(unit), output_id);
            if let Some(first) = export_owners.get(&export.name) {
                return Err(SynthError::configuration(format!(
                    "export name '{}' of '{}' is already used by '{}'",
                    export.name, owner, first
                )));
            }
            export_owners.insert(export.name.clone(), owner);
            exports.push(export.name.clone());
        }

        documents.push(UnitDocument {
            unit,
            path: tree.path(unit).to_string(),
            file_name: format!("{}.template.{}", artifact_id, settings.format.extension()),
            artifact_id,
            dependencies: graph
                .unit_dependencies(unit)
                .into_iter()
                .map(|u| tree.artifact_id(u))
                .collect(),
            exports,
            imports: graph
                .imports_of(unit)
                .map(|i| i.export_name.clone())
                .collect(),
            hash: hasher::hash_string(&body),
            template,
            body,
        });
    }

    for doc in &documents {
        if let Some(token) = find_markers(&doc.body).into_iter().next() {
            tracing::error!(unit = %doc.path, %token, "residual marker in emitted document");
            return Err(SynthError::UnresolvedToken {
                unit: doc.path.clone(),
                token,
            });
        }
    }

    tracing::info!(documents = documents.len(), "synthesis complete");
    Ok(Assembly {
        app: name,
        format: settings.format,
        outdir: settings.outdir,
        manifest: settings.manifest,
        documents,
    })
}

fn collect_dependencies(tree: &Tree, graph: &mut DependencyGraph) -> Result<(), SynthError> {
    for id in tree.preorder() {
        let node = tree.node(id);
        if matches!(node.kind, NodeKind::Resource(_) | NodeKind::Output(_)) && tree.unit_of(id).is_none() {
            return Err(SynthError::OutsideUnit {
                path: node.path.clone(),
            });
        }
        let scope = BindScope::new(tree, id);
        for dependency in node.kind.compute_dependencies(&scope) {
            graph.add_dependency(tree, id, dependency)?;
        }
    }
    Ok(())
}

fn resolve_values(tree: &Tree, engine: &mut DeferredEngine) -> Result<HashMap<NodeId, Value>, SynthError> {
    let mut values = HashMap::new();
    for id in tree.preorder() {
        let raw = tree.node(id).kind.compute_value(&BindScope::new(tree, id));
        if raw.is_null() {
            continue;
        }
        let ctx = ResolveContext::new(tree.unit_of(id), tree.path(id));
        values.insert(id, engine.resolve_value(raw, &ctx)?);
    }
    Ok(values)
}

/// Export values are resolved on the producer's side of the boundary.
fn resolve_exports(
    tree: &Tree,
    graph: &DependencyGraph,
    engine: &mut DeferredEngine,
) -> Result<Vec<Value>, SynthError> {
    graph
        .exports()
        .iter()
        .map(|export| {
            let ctx = ResolveContext::new(Some(export.unit), tree.path(export.producer));
            engine.resolve_value(export.value.clone(), &ctx)
        })
        .collect()
}

fn build_template(
    tree: &Tree,
    graph: &DependencyGraph,
    unit: NodeId,
    values: &HashMap<NodeId, Value>,
    export_values: &[Value],
    preds: &HashMap<NodeId, Vec<NodeId>>,
) -> Result<Template, SynthError> {
    let mut template = Template::default();
    if let NodeKind::Unit(u) = &tree.node(unit).kind {
        template.description = u.description.clone();
    }

    for member in tree.unit_members(unit) {
        let node = tree.node(member);
        let value = values.get(&member).cloned().unwrap_or_default();
        match &node.kind {
            NodeKind::Resource(resource) => {
                let entry = ResourceEntry {
                    resource_type: resource.resource_type.clone(),
                    properties: value,
                    depends_on: preds
                        .get(&member)
                        .map(|p| p.iter().map(|id| tree.logical_id(*id)).collect())
                        .unwrap_or_default(),
                };
                insert_unique(&mut template.resources, tree.logical_id(member), entry, &node.path)?;
            }
            NodeKind::Output(output) => {
                let entry = OutputEntry {
                    value,
                    description: output.description.clone(),
                    export: output.export_name.clone().map(|name| ExportName { name }),
                };
                insert_unique(&mut template.outputs, tree.logical_id(member), entry, &node.path)?;
            }
            NodeKind::Custom(_) if !value.is_null() => {
                template.metadata.insert(node.path.clone(), value);
            }
            _ => {}
        }
    }

    for (export, value) in graph.exports().iter().zip(export_values) {
        if export.unit != unit {
            continue;
        }
        let entry = OutputEntry {
            value: value.clone(),
            description: None,
            export: Some(ExportName {
                name: export.export_name.clone(),
            }),
        };
        insert_unique(
            &mut template.outputs,
            export.output_id.clone(),
            entry,
            tree.path(export.producer),
        )?;
    }
    Ok(template)
}

fn insert_unique<T>(
    map: &mut indexmap::IndexMap<String, T>,
    key: String,
    value: T,
    path: &str,
) -> Result<(), SynthError> {
    if map.contains_key(&key) {
        return Err(SynthError::configuration(format!(
            "logical id '{}' of '{}' collides with another entry in its unit",
            key, path
        )));
    }
    map.insert(key, value);
    Ok(())
}

fn serialize(template: &Template, format: DocumentFormat) -> Result<String, String> {
    match format {
        DocumentFormat::Json => serde_json::to_string_pretty(template)
            .map(|mut s| {
                s.push('\n');
                s
            })
            .map_err(|e| e.to_string()),
        DocumentFormat::Yaml => serde_yaml_ng::to_string(template).map_err(|e| e.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::deferred::DeferredHandle;
    use crate::core::error::ProduceError;
    use crate::core::tree::{OutputNode, ResourceNode};
    use crate::core::types::SynthSettings;

    fn props(doc: &UnitDocument, tree_id: &str) -> Value {
        doc.template.resources[tree_id].properties.clone()
    }

    fn id_of(app: &App, path: &str) -> String {
        let tree = app.tree();
        tree.logical_id(tree.find(path).unwrap())
    }

    #[test]
    fn test_cn009_scenario_one_list_of_references() {
        let mut app = App::new("s1");
        let root = app.root();
        let u = app.add_unit(root, "main", None).unwrap();
        let a = app.add_resource(u, "a", ResourceNode::new("T::A")).unwrap();
        let b = app.add_resource(u, "b", ResourceNode::new("T::B")).unwrap();

        let ha = app.create_deferred(a, |_| Ok(Value::from("x"))).unwrap();
        let hb = app
            .create_deferred(b, move |r| {
                let x = r.resolve(ha)?;
                Ok(Value::list([x]))
            })
            .unwrap();
        app.set_value(b, Value::map([("Refs", hb)])).unwrap();

        let b_id = id_of(&app, "main/b");
        let asm = app.synth().unwrap();
        let doc = asm.document("main").unwrap();
        assert_eq!(props(doc, &b_id), Value::map([("Refs", Value::list(["x"]))]));
        assert!(doc.body.contains("\"x\""));
    }

    #[test]
    fn test_cn009_structural_values_resolve_in_place() {
        let mut app = App::new("s");
        let root = app.root();
        let u = app.add_unit(root, "main", None).unwrap();
        let a = app.add_resource(u, "a", ResourceNode::new("T::A")).unwrap();
        let ha = app.create_deferred(a, |_| Ok(Value::from(1_i64))).unwrap();
        let hb = app.create_deferred(a, |_| Ok(Value::from(true))).unwrap();
        app.set_value(
            a,
            Value::map([("list", Value::list([Value::from(ha), Value::from("literal"), Value::from(hb)]))]),
        )
        .unwrap();

        let a_id = id_of(&app, "main/a");
        let asm = app.synth().unwrap();
        let doc = asm.document("main").unwrap();
        assert_eq!(
            props(doc, &a_id),
            Value::map([(
                "list",
                Value::list([Value::from(1_i64), Value::from("literal"), Value::from(true)])
            )])
        );
        assert!(!doc.template.resources[&a_id].properties.contains_deferred());
    }

    #[test]
    fn test_cn009_scenario_three_unit_cycle_aborts() {
        let mut app = App::new("s3");
        let root = app.root();
        let u1 = app.add_unit(root, "one", None).unwrap();
        let a = app.add_resource(u1, "a", ResourceNode::new("T::A")).unwrap();
        let u2 = app.add_unit(root, "two", None).unwrap();
        let b = app.add_resource(u2, "b", ResourceNode::new("T::B")).unwrap();
        let to_two = app.export_reference(b, a, Value::from("from-one")).unwrap();
        let to_one = app.export_reference(a, b, Value::from("from-two")).unwrap();
        app.set_value(a, Value::map([("In", to_one)])).unwrap();
        app.set_value(b, Value::map([("In", to_two)])).unwrap();

        match app.synth() {
            Err(SynthError::Configuration { message }) => assert!(message.contains("cycle")),
            other => panic!("expected configuration error, got {other:?}"),
        }
    }

    #[test]
    fn test_cn009_scenario_four_producer_failure_aborts() {
        let mut app = App::new("s4");
        let root = app.root();
        let u1 = app.add_unit(root, "ok", None).unwrap();
        app.add_resource(u1, "fine", ResourceNode::new("T::A")).unwrap();
        let u2 = app.add_unit(root, "bad", None).unwrap();
        let broken = app.add_resource(u2, "broken", ResourceNode::new("T::B")).unwrap();
        let h = app
            .create_deferred(broken, |_| Err(ProduceError::from("lookup failed")))
            .unwrap();
        app.set_value(broken, Value::map([("X", h)])).unwrap();

        assert_eq!(
            app.synth().unwrap_err(),
            SynthError::Producer {
                path: "bad/broken".to_string(),
                message: "lookup failed".to_string()
            }
        );
    }

    #[test]
    fn test_cn009_unreferenced_producer_failure_still_aborts() {
        let mut app = App::new("s");
        let root = app.root();
        let u = app.add_unit(root, "main", None).unwrap();
        let a = app.add_resource(u, "a", ResourceNode::new("T::A")).unwrap();
        app.create_deferred(a, |_| Err(ProduceError::from("boom"))).unwrap();
        assert!(matches!(app.synth(), Err(SynthError::Producer { .. })));
    }

    /// `a` reads a failing handle owned by `b` and substitutes a fallback.
    fn recovering_reader() -> (App, NodeId, DeferredHandle) {
        let mut app = App::new("s");
        let root = app.root();
        let u = app.add_unit(root, "main", None).unwrap();
        let a = app.add_resource(u, "a", ResourceNode::new("T::A")).unwrap();
        let b = app.add_resource(u, "b", ResourceNode::new("T::B")).unwrap();
        let q = app
            .create_deferred(b, |_| Err(ProduceError::from("boom")))
            .unwrap();
        let p = app
            .create_deferred(a, move |r| {
                Ok(r.resolve(q).unwrap_or_else(|_| Value::from("fallback")))
            })
            .unwrap();
        app.set_value(a, Value::map([("P", p)])).unwrap();
        (app, b, q)
    }

    fn boom_at_b() -> SynthError {
        SynthError::Producer {
            path: "main/b".to_string(),
            message: "boom".to_string(),
        }
    }

    #[test]
    fn test_cn009_caught_producer_failure_still_aborts() {
        let (app, _, _) = recovering_reader();
        assert_eq!(app.synth().unwrap_err(), boom_at_b());
    }

    #[test]
    fn test_cn009_failed_handle_reread_reports_producer_error() {
        let (mut app, b, q) = recovering_reader();
        app.set_value(b, Value::map([("Q", q)])).unwrap();
        assert_eq!(app.synth().unwrap_err(), boom_at_b());
    }

    #[test]
    fn test_cn009_declaration_order_is_kept() {
        let mut app = App::new("s");
        let root = app.root();
        let u = app.add_unit(root, "main", None).unwrap();
        for name in ["zeta", "alpha", "mid"] {
            app.add_resource(u, name, ResourceNode::new("T::R")).unwrap();
        }
        let asm = app.synth().unwrap();
        let doc = asm.document("main").unwrap();
        let keys: Vec<&str> = doc.template.resources.keys().map(String::as_str).collect();
        assert!(keys[0].starts_with("Zeta"));
        assert!(keys[1].starts_with("Alpha"));
        assert!(keys[2].starts_with("Mid"));
        let z = doc.body.find(keys[0]).unwrap();
        let a = doc.body.find(keys[1]).unwrap();
        assert!(z < a);
    }

    #[test]
    fn test_cn009_depends_on_lists() {
        let mut app = App::new("s");
        let root = app.root();
        let u = app.add_unit(root, "main", None).unwrap();
        let a = app.add_resource(u, "a", ResourceNode::new("T::A")).unwrap();
        let b = app.add_resource(u, "b", ResourceNode::new("T::B")).unwrap();
        app.add_resource(u, "c", ResourceNode::new("T::C").depends_on(b).depends_on(a))
            .unwrap();
        app.add_dependency(b, a).unwrap();

        let (a_id, b_id, c_id) = (id_of(&app, "main/a"), id_of(&app, "main/b"), id_of(&app, "main/c"));
        let asm = app.synth().unwrap();
        let doc = asm.document("main").unwrap();
        assert!(doc.template.resources[&a_id].depends_on.is_empty());
        assert_eq!(doc.template.resources[&b_id].depends_on, vec![a_id.clone()]);
        assert_eq!(doc.template.resources[&c_id].depends_on, vec![a_id, b_id]);
        assert!(doc.body.contains("\"DependsOn\""));
    }

    #[test]
    fn test_cn009_exports_order_units_and_emit_outputs() {
        let mut app = App::new("s");
        let root = app.root();
        // Consumer declared first; emission must still put the producer first
        let web = app.add_unit(root, "web", None).unwrap();
        let site = app.add_resource(web, "site", ResourceNode::new("T::Site")).unwrap();
        let data = app.add_unit(root, "data", Some("Storage".to_string())).unwrap();
        let bucket = app.add_resource(data, "bucket", ResourceNode::new("T::Bucket")).unwrap();

        let arn = app.attribute(bucket, "Arn").unwrap();
        let imported = app.export_reference(site, bucket, Value::from(arn)).unwrap();
        app.set_value(site, Value::map([("Source", imported)])).unwrap();

        let bucket_id = id_of(&app, "data/bucket");
        let site_id = id_of(&app, "web/site");
        let asm = app.synth().unwrap();
        assert_eq!(asm.order(), vec!["data", "web"]);

        let data_doc = asm.document("data").unwrap();
        assert_eq!(data_doc.template.description.as_deref(), Some("Storage"));
        let output_id = format!("Export{}", bucket_id);
        let output = &data_doc.template.outputs[&output_id];
        assert_eq!(
            output.value,
            Value::map([("Fn::GetAtt", Value::list([bucket_id.as_str(), "Arn"]))])
        );
        let export_name = format!("data:{}", output_id);
        assert_eq!(data_doc.exports, vec![export_name.clone()]);

        let web_doc = asm.document("web").unwrap();
        assert_eq!(web_doc.dependencies, vec!["data".to_string()]);
        assert_eq!(web_doc.imports, vec![export_name.clone()]);
        assert_eq!(
            props(web_doc, &site_id),
            Value::map([("Source", Value::map([("Fn::ImportValue", export_name.as_str())]))])
        );
    }

    #[test]
    fn test_cn009_join_for_embedded_reference() {
        let mut app = App::new("s");
        let root = app.root();
        let u = app.add_unit(root, "main", None).unwrap();
        let bucket = app.add_resource(u, "bucket", ResourceNode::new("T::Bucket")).unwrap();
        let policy = app.add_resource(u, "policy", ResourceNode::new("T::Policy")).unwrap();
        let r = app.reference(bucket).unwrap();
        let text = format!("arn:aws:s3:::{}/*", app.to_symbolic(r));
        app.set_value(policy, Value::map([("Resource", text)])).unwrap();

        let bucket_id = id_of(&app, "main/bucket");
        let policy_id = id_of(&app, "main/policy");
        let asm = app.synth().unwrap();
        let doc = asm.document("main").unwrap();
        assert_eq!(
            props(doc, &policy_id),
            Value::map([(
                "Resource",
                Value::map([(
                    "Fn::Join",
                    Value::list([
                        Value::from(""),
                        Value::list([
                            Value::from("arn:aws:s3:::"),
                            Value::map([("Ref", bucket_id.as_str())]),
                            Value::from("/*"),
                        ]),
                    ])
                )])
            )])
        );
    }

    #[test]
    fn test_cn009_direct_cross_unit_reference_is_rejected() {
        let mut app = App::new("s");
        let root = app.root();
        let u1 = app.add_unit(root, "one", None).unwrap();
        let a = app.add_resource(u1, "a", ResourceNode::new("T::A")).unwrap();
        let u2 = app.add_unit(root, "two", None).unwrap();
        let b = app.add_resource(u2, "b", ResourceNode::new("T::B")).unwrap();
        let r = app.reference(a).unwrap();
        app.set_value(b, Value::map([("Target", r)])).unwrap();
        assert_eq!(
            app.synth().unwrap_err(),
            SynthError::ScopeViolation {
                dependent: "two/b".to_string(),
                dependency: "one/a".to_string()
            }
        );
    }

    #[test]
    fn test_cn009_residual_marker_is_fatal() {
        let mut app = App::new("s");
        let root = app.root();
        let u = app.add_unit(root, "main", None).unwrap();
        let a = app.add_resource(u, "a", ResourceNode::new("T::A")).unwrap();
        // A handle issued by some other pass is unknown to this engine
        let foreign = DeferredHandle::from_raw(4242);
        app.set_value(a, Value::map([("Name", format!("prefix-{}", foreign.marker()))]))
            .unwrap();
        assert_eq!(
            app.synth().unwrap_err(),
            SynthError::UnresolvedToken {
                unit: "main".to_string(),
                token: "${Token[4242]}".to_string()
            }
        );
    }

    #[test]
    fn test_cn009_yaml_format() {
        let settings = SynthSettings {
            format: DocumentFormat::Yaml,
            ..SynthSettings::default()
        };
        let mut app = App::new("s").with_settings(settings);
        let root = app.root();
        let u = app.add_unit(root, "main", None).unwrap();
        app.add_resource(
            u,
            "queue",
            ResourceNode::new("AWS::SQS::Queue").with_properties(Value::map([("DelaySeconds", 5_i64)])),
        )
        .unwrap();
        let asm = app.synth().unwrap();
        let doc = asm.document("main").unwrap();
        assert_eq!(doc.file_name, "main.template.yaml");
        assert!(doc.body.contains("Resources:"));
        assert!(doc.body.contains("AWS::SQS::Queue"));
        assert!(doc.body.contains("DelaySeconds: 5"));
    }

    #[test]
    fn test_cn009_outputs_and_custom_metadata() {
        struct Tag;
        impl Bind for Tag {
            fn compute_value(&self, scope: &BindScope<'_>) -> Value {
                Value::map([("owner", scope.path())])
            }
        }

        let mut app = App::new("s");
        let root = app.root();
        let u = app.add_unit(root, "main", None).unwrap();
        let a = app.add_resource(u, "a", ResourceNode::new("T::A")).unwrap();
        app.add_node(u, "tag", NodeKind::Custom(Box::new(Tag))).unwrap();
        let r = app.reference(a).unwrap();
        let mut out = OutputNode::new(Value::from(r));
        out.export_name = Some("shared-a".to_string());
        app.add_output(u, "AName", out).unwrap();

        let asm = app.synth().unwrap();
        let doc = asm.document("main").unwrap();
        assert_eq!(
            doc.template.metadata["main/tag"],
            Value::map([("owner", "main/tag")])
        );
        let (key, output) = doc.template.outputs.first().unwrap();
        assert!(key.starts_with("AName"));
        assert_eq!(output.export.as_ref().unwrap().name, "shared-a");
        assert_eq!(doc.exports, vec!["shared-a".to_string()]);
    }

    #[test]
    fn test_cn009_duplicate_export_names_rejected() {
        let mut app = App::new("s");
        let root = app.root();
        let net = app.add_unit(root, "net", None).unwrap();
        let web = app.add_unit(root, "web", None).unwrap();
        let a = app.add_resource(net, "a", ResourceNode::new("T::A")).unwrap();
        let b = app.add_resource(web, "b", ResourceNode::new("T::B")).unwrap();
        for (unit, node, id) in [(net, a, "First"), (net, a, "Other"), (web, b, "Second")] {
            let r = app.reference(node).unwrap();
            let mut out = OutputNode::new(Value::from(r));
            if id != "Other" {
                out.export_name = Some("shared".to_string());
            }
            app.add_output(unit, id, out).unwrap();
        }

        match app.synth().unwrap_err() {
            SynthError::Configuration { message } => {
                assert!(message.contains("export name 'shared'"), "{message}");
                assert!(message.contains("web/Second"), "{message}");
                assert!(message.contains("net/First"), "{message}");
            }
            other => panic!("expected configuration error, got {other:?}"),
        }
    }

    #[test]
    fn test_cn009_duplicate_export_names_in_one_unit_rejected() {
        let mut app = App::new("s");
        let root = app.root();
        let u = app.add_unit(root, "main", None).unwrap();
        let a = app.add_resource(u, "a", ResourceNode::new("T::A")).unwrap();
        for id in ["First", "Middle", "Last"] {
            let r = app.reference(a).unwrap();
            let mut out = OutputNode::new(Value::from(r));
            if id != "Middle" {
                out.export_name = Some("shared".to_string());
            }
            app.add_output(u, id, out).unwrap();
        }
        assert!(matches!(
            app.synth().unwrap_err(),
            SynthError::Configuration { .. }
        ));
    }

    #[test]
    fn test_cn009_resource_outside_unit_rejected() {
        let mut app = App::new("s");
        let root = app.root();
        app.add_resource(root, "stray", ResourceNode::new("T::A")).unwrap();
        assert_eq!(
            app.synth().unwrap_err(),
            SynthError::OutsideUnit {
                path: "stray".to_string()
            }
        );
    }

    #[test]
    fn test_cn009_identical_apps_hash_identically() {
        fn build() -> App {
            let mut app = App::new("s");
            let root = app.root();
            let u = app.add_unit(root, "main", None).unwrap();
            let a = app.add_resource(u, "a", ResourceNode::new("T::A")).unwrap();
            let r = app.reference(a).unwrap();
            app.add_resource(u, "b", ResourceNode::new("T::B").with_properties(Value::map([("A", r)])))
                .unwrap();
            app
        }
        let first = build().synth().unwrap();
        let second = build().synth().unwrap();
        assert_eq!(first.documents[0].hash, second.documents[0].hash);
        assert!(first.documents[0].hash.starts_with("blake3:"));
    }
}
