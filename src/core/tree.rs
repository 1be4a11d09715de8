//! CN-003: Node tree: an arena of addressable nodes.
//!
//! Parent/child links are arena indices, so the tree has no ownership
//! cycles. A node's path is derived from its position when it is added and
//! never changes. The tree is frozen at the start of a synthesis pass; any
//! later structural mutation is rejected.

use super::error::SynthError;
use super::hasher;
use super::types::Value;
use std::fmt;

const MAX_HUMAN_ID_LEN: usize = 240;

/// Arena index of a node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(pub u32);

impl NodeId {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ============================================================================
// Node capabilities
// ============================================================================

/// Per-node capabilities consulted during synthesis.
///
/// Both methods must be idempotent and must not mutate the tree; the
/// synthesizer may call them on a frozen tree only.
pub trait Bind {
    /// Nodes that must be emitted before this one.
    fn compute_dependencies(&self, _scope: &BindScope<'_>) -> Vec<NodeId> {
        Vec::new()
    }

    /// The node's value: resource properties, output value, or metadata.
    fn compute_value(&self, _scope: &BindScope<'_>) -> Value {
        Value::Null
    }
}

/// Read-only view handed to `Bind` implementations.
pub struct BindScope<'a> {
    tree: &'a Tree,
    node: NodeId,
}

impl<'a> BindScope<'a> {
    pub fn new(tree: &'a Tree, node: NodeId) -> Self {
        Self { tree, node }
    }

    pub fn node(&self) -> NodeId {
        self.node
    }

    pub fn path(&self) -> &'a str {
        self.tree.path(self.node)
    }

    pub fn unit(&self) -> Option<NodeId> {
        self.tree.unit_of(self.node)
    }

    pub fn tree(&self) -> &'a Tree {
        self.tree
    }

    /// Resolve an absolute path.
    pub fn find(&self, path: &str) -> Option<NodeId> {
        self.tree.find(path)
    }
}

// ============================================================================
// Node variants
// ============================================================================

/// A deployment unit boundary.
#[derive(Debug, Clone, Default)]
pub struct UnitNode {
    pub description: Option<String>,
}

/// A provider resource.
#[derive(Debug, Clone)]
pub struct ResourceNode {
    pub resource_type: String,
    pub properties: Value,
    pub depends_on: Vec<NodeId>,
}

impl ResourceNode {
    pub fn new(resource_type: impl Into<String>) -> Self {
        Self {
            resource_type: resource_type.into(),
            properties: Value::Null,
            depends_on: Vec::new(),
        }
    }

    pub fn with_properties(mut self, properties: Value) -> Self {
        self.properties = properties;
        self
    }

    pub fn depends_on(mut self, node: NodeId) -> Self {
        self.depends_on.push(node);
        self
    }
}

impl Bind for ResourceNode {
    fn compute_dependencies(&self, _scope: &BindScope<'_>) -> Vec<NodeId> {
        self.depends_on.clone()
    }

    fn compute_value(&self, _scope: &BindScope<'_>) -> Value {
        self.properties.clone()
    }
}

/// A unit output.
#[derive(Debug, Clone)]
pub struct OutputNode {
    pub value: Value,
    pub description: Option<String>,
    pub export_name: Option<String>,
}

impl OutputNode {
    pub fn new(value: Value) -> Self {
        Self {
            value,
            description: None,
            export_name: None,
        }
    }
}

impl Bind for OutputNode {
    fn compute_value(&self, _scope: &BindScope<'_>) -> Value {
        self.value.clone()
    }
}

/// Tagged node variant. `Custom` carries a collaborator-supplied binding.
pub enum NodeKind {
    Root,
    Unit(UnitNode),
    Group,
    Resource(ResourceNode),
    Output(OutputNode),
    Custom(Box<dyn Bind>),
}

impl NodeKind {
    pub fn is_unit(&self) -> bool {
        matches!(self, Self::Unit(_))
    }

    pub fn is_resource(&self) -> bool {
        matches!(self, Self::Resource(_))
    }

    pub fn label(&self) -> &'static str {
        match self {
            Self::Root => "root",
            Self::Unit(_) => "unit",
            Self::Group => "group",
            Self::Resource(_) => "resource",
            Self::Output(_) => "output",
            Self::Custom(_) => "custom",
        }
    }
}

impl fmt::Debug for NodeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unit(u) => f.debug_tuple("Unit").field(u).finish(),
            Self::Resource(r) => f.debug_tuple("Resource").field(r).finish(),
            Self::Output(o) => f.debug_tuple("Output").field(o).finish(),
            other => f.write_str(other.label()),
        }
    }
}

impl Bind for NodeKind {
    fn compute_dependencies(&self, scope: &BindScope<'_>) -> Vec<NodeId> {
        match self {
            Self::Resource(r) => r.compute_dependencies(scope),
            Self::Output(o) => o.compute_dependencies(scope),
            Self::Custom(c) => c.compute_dependencies(scope),
            Self::Root | Self::Unit(_) | Self::Group => Vec::new(),
        }
    }

    fn compute_value(&self, scope: &BindScope<'_>) -> Value {
        match self {
            Self::Resource(r) => r.compute_value(scope),
            Self::Output(o) => o.compute_value(scope),
            Self::Custom(c) => c.compute_value(scope),
            Self::Root | Self::Unit(_) | Self::Group => Value::Null,
        }
    }
}

// ============================================================================
// Tree
// ============================================================================

/// One arena entry.
#[derive(Debug)]
pub struct Node {
    pub name: String,
    pub path: String,
    pub parent: Option<NodeId>,
    pub children: Vec<NodeId>,
    pub kind: NodeKind,
}

/// Arena-backed node tree rooted at index 0.
#[derive(Debug)]
pub struct Tree {
    nodes: Vec<Node>,
    frozen: bool,
}

impl Default for Tree {
    fn default() -> Self {
        Self::new()
    }
}

impl Tree {
    pub fn new() -> Self {
        Self {
            nodes: vec![Node {
                name: String::new(),
                path: String::new(),
                parent: None,
                children: Vec::new(),
                kind: NodeKind::Root,
            }],
            frozen: false,
        }
    }

    pub fn root(&self) -> NodeId {
        NodeId(0)
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.len() == 1
    }

    pub fn is_frozen(&self) -> bool {
        self.frozen
    }

    /// Forbid further structural mutation.
    pub fn freeze(&mut self) {
        self.frozen = true;
    }

    /// Add a child under `parent`. Sibling names must be unique.
    pub fn add(&mut self, parent: NodeId, name: &str, kind: NodeKind) -> Result<NodeId, SynthError> {
        let parent_path = self.get(parent)?.path.clone();
        if self.frozen {
            return Err(SynthError::TreeFrozen {
                path: join_path(&parent_path, name),
            });
        }
        validate_name(name)?;
        if self.find_child(parent, name).is_some() {
            return Err(SynthError::DuplicateNode {
                path: join_path(&parent_path, name),
            });
        }

        let id = NodeId(self.nodes.len() as u32);
        self.nodes.push(Node {
            name: name.to_string(),
            path: join_path(&parent_path, name),
            parent: Some(parent),
            children: Vec::new(),
            kind,
        });
        self.nodes[parent.index()].children.push(id);
        Ok(id)
    }

    pub fn get(&self, id: NodeId) -> Result<&Node, SynthError> {
        self.nodes.get(id.index()).ok_or_else(|| SynthError::UnknownNode {
            node: format!("#{}", id),
        })
    }

    /// Mutable access to a node's variant; rejected once frozen.
    pub fn kind_mut(&mut self, id: NodeId) -> Result<&mut NodeKind, SynthError> {
        let path = self.get(id)?.path.clone();
        if self.frozen {
            return Err(SynthError::TreeFrozen { path });
        }
        Ok(&mut self.nodes[id.index()].kind)
    }

    /// Node by id. Ids are only minted by this tree, so out-of-range ids
    /// indicate a handle from a different tree.
    pub fn node(&self, id: NodeId) -> &Node {
        &self.nodes[id.index()]
    }

    pub fn path(&self, id: NodeId) -> &str {
        self.nodes.get(id.index()).map_or("", |n| n.path.as_str())
    }

    pub fn find_child(&self, parent: NodeId, name: &str) -> Option<NodeId> {
        self.nodes
            .get(parent.index())?
            .children
            .iter()
            .copied()
            .find(|c| self.nodes[c.index()].name == name)
    }

    /// Resolve an absolute `/`-separated path.
    pub fn find(&self, path: &str) -> Option<NodeId> {
        path.split('/')
            .filter(|s| !s.is_empty())
            .try_fold(self.root(), |current, name| self.find_child(current, name))
    }

    /// Nearest enclosing unit, the node itself included.
    pub fn unit_of(&self, id: NodeId) -> Option<NodeId> {
        let mut current = Some(id);
        while let Some(c) = current {
            let node = self.nodes.get(c.index())?;
            if node.kind.is_unit() {
                return Some(c);
            }
            current = node.parent;
        }
        None
    }

    /// All nodes in depth-first pre-order (declaration order).
    pub fn preorder(&self) -> Vec<NodeId> {
        self.subtree(self.root(), false)
    }

    /// All unit nodes in declaration order.
    pub fn units(&self) -> Vec<NodeId> {
        self.preorder()
            .into_iter()
            .filter(|id| self.nodes[id.index()].kind.is_unit())
            .collect()
    }

    /// Descendants of `unit` that belong to it (nested units excluded).
    pub fn unit_members(&self, unit: NodeId) -> Vec<NodeId> {
        self.subtree(unit, true)
            .into_iter()
            .filter(|&id| id != unit)
            .collect()
    }

    /// Resources in the subtree of `id` that share its unit.
    pub fn resources_within(&self, id: NodeId) -> Vec<NodeId> {
        self.subtree(id, true)
            .into_iter()
            .filter(|n| self.nodes[n.index()].kind.is_resource())
            .collect()
    }

    /// Pre-order walk from `start`; with `stop_at_units`, nested unit
    /// subtrees below `start` are skipped.
    fn subtree(&self, start: NodeId, stop_at_units: bool) -> Vec<NodeId> {
        let mut out = Vec::new();
        if start.index() >= self.nodes.len() {
            return out;
        }
        let mut stack = vec![start];
        while let Some(id) = stack.pop() {
            let node = &self.nodes[id.index()];
            if stop_at_units && id != start && node.kind.is_unit() {
                continue;
            }
            out.push(id);
            stack.extend(node.children.iter().rev().copied());
        }
        out
    }

    /// File-system friendly identity of a unit: its path with `/` → `-`.
    pub fn artifact_id(&self, unit: NodeId) -> String {
        self.path(unit).replace('/', "-")
    }

    /// Deterministic document-level identifier for a node.
    ///
    /// Human-readable part from the path components below the unit, plus an
    /// 8-digit BLAKE3 suffix of those components.
    pub fn logical_id(&self, id: NodeId) -> String {
        let unit = self.unit_of(id);
        let mut components = Vec::new();
        let mut current = Some(id);
        while let Some(c) = current {
            if Some(c) == unit && c != id {
                break;
            }
            let node = &self.nodes[c.index()];
            if node.parent.is_none() {
                break;
            }
            components.push(node.name.as_str());
            current = node.parent;
        }
        components.reverse();

        let mut human: String = components.iter().map(|c| capitalize_alnum(c)).collect();
        human.truncate(MAX_HUMAN_ID_LEN);
        format!("{}{}", human, hasher::short_digest(&components.join("/")))
    }
}

fn join_path(parent: &str, name: &str) -> String {
    if parent.is_empty() {
        name.to_string()
    } else {
        format!("{}/{}", parent, name)
    }
}

fn validate_name(name: &str) -> Result<(), SynthError> {
    let reason = if name.is_empty() {
        "must not be empty"
    } else if name.contains('/') {
        "must not contain '/'"
    } else if name.contains("${") {
        "must not contain a token marker"
    } else {
        return Ok(());
    };
    Err(SynthError::InvalidName {
        name: name.to_string(),
        reason: reason.to_string(),
    })
}

fn capitalize_alnum(component: &str) -> String {
    let mut chars = component.chars().filter(|c| c.is_ascii_alphanumeric());
    match chars.next() {
        Some(first) => {
            let rest: String = chars.collect();
            format!("{}{}", first.to_ascii_uppercase(), rest)
        }
        None => String::new(),
    }
}
