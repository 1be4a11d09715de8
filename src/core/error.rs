//! CN-002: Synthesis error taxonomy.
//!
//! Every variant is fatal to the current pass and carries enough path or
//! identity context to locate the offending node without re-running.

use thiserror::Error;

/// Errors raised while building a node tree or running a synthesis pass.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SynthError {
    /// A dependency or reference crosses a deployment unit boundary without an export.
    #[error("scope violation: '{dependent}' cannot reference '{dependency}' across deployment units without an export")]
    ScopeViolation {
        dependent: String,
        dependency: String,
    },

    /// A deferred value's producer transitively depends on its own unresolved result.
    #[error("cyclic deferred value resolution: {}", .cycle.join(" -> "))]
    CyclicResolution { cycle: Vec<String> },

    /// The unit-level (or resource-level) dependency graph is not a DAG, or the
    /// application definition is inconsistent.
    #[error("configuration error: {message}")]
    Configuration { message: String },

    /// A symbolic marker survived final serialization.
    #[error("unresolved token {token} in document for unit '{unit}'")]
    UnresolvedToken { unit: String, token: String },

    /// A producer callback failed.
    #[error("producer for '{path}' failed: {message}")]
    Producer { path: String, message: String },

    /// Structural mutation attempted after the tree was frozen.
    #[error("tree is frozen: cannot modify '{path}'")]
    TreeFrozen { path: String },

    /// A sibling with the same name already exists.
    #[error("duplicate node path: '{path}'")]
    DuplicateNode { path: String },

    /// A node name is not usable as a path component.
    #[error("invalid node name '{name}': {reason}")]
    InvalidName { name: String, reason: String },

    /// A node id or path is not part of this tree.
    #[error("unknown node: {node}")]
    UnknownNode { node: String },

    /// A node was asked to depend on itself.
    #[error("node '{path}' cannot depend on itself")]
    SelfDependency { path: String },

    /// A node that is not inside any deployment unit took part in a dependency.
    #[error("node '{path}' is not inside a deployment unit")]
    OutsideUnit { path: String },

    /// A handle that was not issued by this engine.
    #[error("unknown deferred handle #{id}")]
    UnknownHandle { id: u32 },

    /// A document could not be serialized.
    #[error("cannot serialize document for unit '{unit}': {message}")]
    Serialize { unit: String, message: String },

    /// Writing the assembly failed.
    #[error("i/o error at {path}: {message}")]
    Io { path: String, message: String },
}

impl SynthError {
    pub(crate) fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }
}

/// Error returned by a producer callback.
///
/// `Failed` is annotated with the originating node path by the engine;
/// `Synth` propagates an error raised while the producer read another handle.
#[derive(Debug, Error)]
pub enum ProduceError {
    #[error("{0}")]
    Failed(String),

    #[error(transparent)]
    Synth(#[from] SynthError),
}

impl From<String> for ProduceError {
    fn from(message: String) -> Self {
        Self::Failed(message)
    }
}

impl From<&str> for ProduceError {
    fn from(message: &str) -> Self {
        Self::Failed(message.to_string())
    }
}
