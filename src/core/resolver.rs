//! CN-012: Template resolution and app construction.
//!
//! Turns a parsed `AppConfig` into an `App`: units, groups, resources and
//! outputs become tree nodes, string templates become literals or deferred
//! handles, and `depends_on` entries become dependency edges. References
//! that cross a unit boundary are routed through an export.
//!
//! Template forms:
//! - `{{params.key}}`: literal parameter value
//! - `{{ref:unit/path}}`: reference to a resource
//! - `{{attr:unit/path.Attribute}}`: attribute of a resource

use super::app::App;
use super::deferred::DeferredHandle;
use super::error::SynthError;
use super::tree::{NodeId, OutputNode, ResourceNode};
use super::types::*;
use indexmap::IndexMap;
use std::collections::HashMap;

/// A parsed `{{ ... }}` expression.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TemplateRef {
    Param(String),
    Ref(String),
    Attr { target: String, attribute: String },
}

/// Piece of a template string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Segment {
    Literal(String),
    Expr(TemplateRef),
}

/// Split a template string into literal text and expressions.
pub fn parse_template(template: &str) -> Result<Vec<Segment>, String> {
    let mut segments = Vec::new();
    let mut start = 0;

    while let Some(open) = template[start..].find("{{") {
        let open = start + open;
        let close = template[open..]
            .find("}}")
            .ok_or_else(|| format!("unclosed template at position {}", open))?;
        let close = open + close + 2;
        let key = template[open + 2..close - 2].trim();

        if open > start {
            segments.push(Segment::Literal(template[start..open].to_string()));
        }
        segments.push(Segment::Expr(parse_expr(key)?));
        start = close;
    }
    if start < template.len() {
        segments.push(Segment::Literal(template[start..].to_string()));
    }
    Ok(segments)
}

fn parse_expr(key: &str) -> Result<TemplateRef, String> {
    if let Some(param) = key.strip_prefix("params.") {
        return Ok(TemplateRef::Param(param.to_string()));
    }
    if let Some(target) = key.strip_prefix("ref:") {
        if target.is_empty() {
            return Err("empty ref target".to_string());
        }
        return Ok(TemplateRef::Ref(target.to_string()));
    }
    if let Some(rest) = key.strip_prefix("attr:") {
        let (target, attribute) = rest
            .rsplit_once('.')
            .filter(|(t, a)| !t.is_empty() && !a.is_empty())
            .ok_or_else(|| format!("invalid attr ref: {}", key))?;
        return Ok(TemplateRef::Attr {
            target: target.to_string(),
            attribute: attribute.to_string(),
        });
    }
    Err(format!("unknown template variable: {}", key))
}

/// Text of a param spliced into a longer string. Param values are literal:
/// templates inside them are not expanded.
fn param(params: &HashMap<String, serde_yaml_ng::Value>, key: &str) -> Result<String, String> {
    params
        .get(key)
        .map(yaml_value_to_string)
        .ok_or_else(|| format!("unknown param: {}", key))
}

/// Emittable number from a YAML number. NaN and infinities have no
/// document representation.
fn yaml_number(n: &serde_yaml_ng::Number) -> Result<Value, String> {
    if let Some(i) = n.as_i64() {
        return Ok(Value::from(i));
    }
    if let Some(u) = n.as_u64() {
        return Ok(Value::from(u));
    }
    match n.as_f64() {
        Some(f) if f.is_finite() => Ok(Value::from(f)),
        _ => Err(format!("non-finite number {} cannot be emitted", n)),
    }
}

/// Build an `App` from a parsed (and validated) config.
pub fn build_app(config: &AppConfig) -> Result<App, SynthError> {
    let mut builder = Builder {
        app: App::new(config.name.clone()).with_settings(config.settings.clone()),
        params: &config.params,
        handles: HashMap::new(),
    };
    let span = tracing::debug_span!("build_app", app = %config.name);
    let _enter = span.enter();

    // Phase 1: nodes
    let mut units = Vec::with_capacity(config.units.len());
    for (unit_name, unit) in &config.units {
        let root = builder.app.root();
        let unit_id = builder
            .app
            .add_unit(root, unit_name, unit.description.clone())?;
        let mut resources = Vec::with_capacity(unit.resources.len());
        for (id, resource) in &unit.resources {
            let node = builder.add_resource(unit_id, id, &resource.resource_type)?;
            resources.push(node);
        }
        let mut outputs = Vec::with_capacity(unit.outputs.len());
        for (id, output) in &unit.outputs {
            let node = builder.app.add_output(
                unit_id,
                id,
                OutputNode {
                    value: Value::Null,
                    description: output.description.clone(),
                    export_name: output.export.clone(),
                },
            )?;
            outputs.push(node);
        }
        units.push((unit_id, unit, resources, outputs));
    }

    // Phase 2: values
    for (_, unit, resources, outputs) in &units {
        for (node, resource) in resources.iter().zip(unit.resources.values()) {
            let mut map = IndexMap::with_capacity(resource.properties.len());
            for (key, value) in &resource.properties {
                map.insert(key.clone(), builder.convert(*node, value, true)?);
            }
            builder.app.set_value(*node, Value::Map(map))?;
        }
        for (node, output) in outputs.iter().zip(unit.outputs.values()) {
            let value = builder.convert(*node, &output.value, true)?;
            builder.app.set_value(*node, value)?;
        }
    }

    // Phase 3: explicit ordering
    for (unit_id, unit, resources, _) in &units {
        for (node, resource) in resources.iter().zip(unit.resources.values()) {
            for dep in &resource.depends_on {
                let target = builder.lookup_relative(*unit_id, dep)?;
                builder.app.add_dependency(*node, target)?;
            }
        }
    }

    tracing::debug!(nodes = builder.app.tree().len(), "app built");
    Ok(builder.app)
}

struct Builder<'a> {
    app: App,
    params: &'a HashMap<String, serde_yaml_ng::Value>,
    /// Reference handles per (target, attribute), reused so repeated
    /// cross-unit references share one export
    handles: HashMap<(NodeId, Option<String>), DeferredHandle>,
}

impl Builder<'_> {
    /// Add a resource, creating groups for each `/`-separated prefix.
    fn add_resource(&mut self, unit: NodeId, id: &str, resource_type: &str) -> Result<NodeId, SynthError> {
        let mut parts: Vec<&str> = id.split('/').collect();
        let name = parts.pop().unwrap_or(id);
        let mut parent = unit;
        for group in parts {
            parent = match self.app.tree().find_child(parent, group) {
                Some(existing) => existing,
                None => self.app.add_group(parent, group)?,
            };
        }
        self.app
            .add_resource(parent, name, ResourceNode::new(resource_type))
    }

    fn lookup_relative(&self, unit: NodeId, path: &str) -> Result<NodeId, SynthError> {
        let tree = self.app.tree();
        let relative = format!("{}/{}", tree.path(unit), path);
        tree.find(&relative)
            .or_else(|| tree.find(path))
            .ok_or_else(|| {
                SynthError::configuration(format!(
                    "'{}' depends on unknown node '{}'",
                    tree.path(unit),
                    path
                ))
            })
    }

    fn lookup_absolute(&self, consumer: NodeId, path: &str) -> Result<NodeId, SynthError> {
        let tree = self.app.tree();
        tree.find(path).ok_or_else(|| {
            SynthError::configuration(format!(
                "'{}' references unknown node '{}'",
                tree.path(consumer),
                path
            ))
        })
    }

    /// Convert a YAML value owned by `consumer`. String templates are
    /// resolved only with `expand`; param values are converted without it.
    fn convert(
        &mut self,
        consumer: NodeId,
        value: &serde_yaml_ng::Value,
        expand: bool,
    ) -> Result<Value, SynthError> {
        use serde_yaml_ng::Value as Yaml;
        Ok(match value {
            Yaml::Null => Value::Null,
            Yaml::Bool(b) => Value::Bool(*b),
            Yaml::Number(n) => yaml_number(n).map_err(|e| {
                SynthError::configuration(format!("{}: {}", self.app.tree().path(consumer), e))
            })?,
            Yaml::String(s) if expand => self.convert_string(consumer, s)?,
            Yaml::String(s) => Value::from(s.as_str()),
            Yaml::Sequence(items) => Value::List(
                items
                    .iter()
                    .map(|v| self.convert(consumer, v, expand))
                    .collect::<Result<_, _>>()?,
            ),
            Yaml::Mapping(map) => {
                let mut out = IndexMap::with_capacity(map.len());
                for (k, v) in map {
                    out.insert(yaml_value_to_string(k), self.convert(consumer, v, expand)?);
                }
                Value::Map(out)
            }
            Yaml::Tagged(tagged) => self.convert(consumer, &tagged.value, expand)?,
        })
    }

    fn convert_string(&mut self, consumer: NodeId, text: &str) -> Result<Value, SynthError> {
        if !text.contains("{{") {
            return Ok(Value::from(text));
        }
        let path = self.app.tree().path(consumer).to_string();
        let segments = parse_template(text)
            .map_err(|e| SynthError::configuration(format!("{}: {}", path, e)))?;

        // A lone expression keeps its own type
        let params = self.params;
        if let [Segment::Expr(expr)] = segments.as_slice() {
            return match expr {
                TemplateRef::Param(key) => match params.get(key) {
                    Some(v) => self.convert(consumer, v, false),
                    None => Err(SynthError::configuration(format!(
                        "{}: unknown param: {}",
                        path, key
                    ))),
                },
                other => Ok(Value::from(self.expression_handle(consumer, other)?)),
            };
        }

        let mut out = String::new();
        for segment in segments {
            match segment {
                Segment::Literal(literal) => out.push_str(&literal),
                Segment::Expr(TemplateRef::Param(key)) => out.push_str(
                    &param(self.params, &key)
                        .map_err(|e| SynthError::configuration(format!("{}: {}", path, e)))?,
                ),
                Segment::Expr(expr) => {
                    let handle = self.expression_handle(consumer, &expr)?;
                    out.push_str(&self.app.to_symbolic(handle));
                }
            }
        }
        Ok(Value::from(out))
    }

    /// Handle for a `ref:`/`attr:` expression as seen from `consumer`.
    fn expression_handle(&mut self, consumer: NodeId, expr: &TemplateRef) -> Result<DeferredHandle, SynthError> {
        let (target_path, attribute) = match expr {
            TemplateRef::Ref(target) => (target.as_str(), None),
            TemplateRef::Attr { target, attribute } => (target.as_str(), Some(attribute.clone())),
            TemplateRef::Param(_) => {
                return Err(SynthError::configuration("param is not a reference"))
            }
        };
        let target = self.lookup_absolute(consumer, target_path)?;

        let key = (target, attribute);
        let handle = match self.handles.get(&key) {
            Some(h) => *h,
            None => {
                let h = match &key.1 {
                    Some(attribute) => self.app.attribute(target, attribute)?,
                    None => self.app.reference(target)?,
                };
                self.handles.insert(key, h);
                h
            }
        };

        let tree = self.app.tree();
        if tree.unit_of(consumer) == tree.unit_of(target) {
            Ok(handle)
        } else {
            self.app
                .export_reference(consumer, target, Value::from(handle))
        }
    }
}
