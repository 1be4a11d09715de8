//! CN-006: Deferred value engine.
//!
//! Issues handles wrapping producer callbacks, memoizes each result for the
//! lifetime of the pass, and resolves structured values depth-first. Handles
//! can be embedded in strings as symbolic markers (`${Token[N]}`); markers are
//! substituted during resolution and any that survive are caught by the
//! synthesizer's residual scan.

use super::dialect::{CloudFormation, ExpressionDialect};
use super::error::{ProduceError, SynthError};
use super::tree::NodeId;
use super::types::Value;
use indexmap::IndexMap;
use regex::Regex;
use std::fmt;
use std::sync::LazyLock;

static MARKER_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\$\{Token\[(\d+)\]\}").expect("static marker pattern"));

const MARKER_PREFIX: &str = "${Token[";

/// Engine-issued identity of a deferred value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DeferredHandle(u32);

impl DeferredHandle {
    pub(crate) fn from_raw(id: u32) -> Self {
        Self(id)
    }

    pub fn id(self) -> u32 {
        self.0
    }

    /// Symbolic marker for embedding the handle in a string.
    pub fn marker(self) -> String {
        format!("{}{}]}}", MARKER_PREFIX, self.0)
    }
}

impl fmt::Display for DeferredHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// All symbolic markers present in `text`, in order of appearance.
pub fn find_markers(text: &str) -> Vec<String> {
    MARKER_RE
        .find_iter(text)
        .map(|m| m.as_str().to_string())
        .collect()
}

/// Producer callback. Invoked at most once per pass.
pub type Producer = Box<dyn FnOnce(&mut Resolver<'_>) -> Result<Value, ProduceError>>;

/// Location a value is being resolved for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolveContext {
    /// Deployment unit of the consuming node
    pub unit: Option<NodeId>,
    /// Path of the consuming node
    pub path: String,
}

impl ResolveContext {
    pub fn new(unit: Option<NodeId>, path: impl Into<String>) -> Self {
        Self {
            unit,
            path: path.into(),
        }
    }
}

/// Where a handle was created.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Origin {
    /// Owning node, used to annotate producer failures
    pub node: Option<NodeId>,
    /// Unit of the owning node
    pub unit: Option<NodeId>,
    pub path: String,
    /// If set, the handle may only be resolved from this unit
    pub scope: Option<NodeId>,
}

enum SlotState {
    Pending(Producer),
    InFlight,
    Resolved {
        value: Value,
        /// Unit the value is bound to, declared or inherited from handles it read
        scope: Option<NodeId>,
    },
    /// Producer failed; every later read reports the same error
    Failed(SynthError),
}

struct Slot {
    origin: Origin,
    state: SlotState,
}

/// Memoizing resolver for deferred values. Owned by exactly one pass.
pub struct DeferredEngine {
    slots: Vec<Slot>,
    /// Handles currently being produced, outermost first
    stack: Vec<DeferredHandle>,
    /// Scope inherited by each in-flight producer from the handles it reads
    scope_frames: Vec<Option<NodeId>>,
    dialect: Box<dyn ExpressionDialect>,
    invocations: usize,
    /// First producer failure or cycle seen this pass, even if a caller caught it
    first_failure: Option<SynthError>,
}

impl Default for DeferredEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for DeferredEngine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeferredEngine")
            .field("handles", &self.slots.len())
            .field("invocations", &self.invocations)
            .finish()
    }
}

impl DeferredEngine {
    pub fn new() -> Self {
        Self::with_dialect(Box::new(CloudFormation))
    }

    pub fn with_dialect(dialect: Box<dyn ExpressionDialect>) -> Self {
        Self {
            slots: Vec::new(),
            stack: Vec::new(),
            scope_frames: Vec::new(),
            dialect,
            invocations: 0,
            first_failure: None,
        }
    }

    pub fn dialect(&self) -> &dyn ExpressionDialect {
        self.dialect.as_ref()
    }

    pub(crate) fn set_dialect(&mut self, dialect: Box<dyn ExpressionDialect>) {
        self.dialect = dialect;
    }

    /// Register a producer and return its handle.
    pub fn create<F>(&mut self, origin: Origin, producer: F) -> DeferredHandle
    where
        F: FnOnce(&mut Resolver<'_>) -> Result<Value, ProduceError> + 'static,
    {
        let handle = DeferredHandle(self.slots.len() as u32);
        self.slots.push(Slot {
            origin,
            state: SlotState::Pending(Box::new(producer)),
        });
        handle
    }

    /// Number of handles issued.
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Number of producers invoked so far.
    pub fn invocations(&self) -> usize {
        self.invocations
    }

    pub fn origin(&self, handle: DeferredHandle) -> Option<&Origin> {
        self.slots.get(handle.0 as usize).map(|s| &s.origin)
    }

    pub fn is_resolved(&self, handle: DeferredHandle) -> bool {
        matches!(
            self.slots.get(handle.0 as usize).map(|s| &s.state),
            Some(SlotState::Resolved { .. })
        )
    }

    fn is_known(&self, handle: DeferredHandle) -> bool {
        (handle.0 as usize) < self.slots.len()
    }

    /// Marker text for `handle`, for use inside string templates.
    pub fn to_symbolic(&self, handle: DeferredHandle) -> String {
        handle.marker()
    }

    /// Resolve a handle. The first call runs the producer; later calls
    /// return the memoized value.
    pub fn resolve(
        &mut self,
        handle: DeferredHandle,
        ctx: &ResolveContext,
    ) -> Result<Value, SynthError> {
        let idx = handle.0 as usize;
        let slot = self
            .slots
            .get_mut(idx)
            .ok_or(SynthError::UnknownHandle { id: handle.0 })?;

        let bound_scope = match &slot.state {
            SlotState::Resolved { scope, .. } => slot.origin.scope.or(*scope),
            _ => slot.origin.scope,
        };
        if let Some(scope) = bound_scope {
            if ctx.unit != Some(scope) {
                return Err(SynthError::ScopeViolation {
                    dependent: ctx.path.clone(),
                    dependency: slot.origin.path.clone(),
                });
            }
        }

        let state = std::mem::replace(&mut slot.state, SlotState::InFlight);
        let (value, scope) = match state {
            SlotState::Resolved { value, scope } => {
                self.slots[idx].state = SlotState::Resolved {
                    value: value.clone(),
                    scope,
                };
                (value, scope)
            }
            SlotState::Failed(e) => {
                self.slots[idx].state = SlotState::Failed(e.clone());
                return Err(e);
            }
            SlotState::InFlight => {
                self.slots[idx].state = SlotState::InFlight;
                let e = self.cycle_error(handle);
                self.record_failure(&e);
                return Err(e);
            }
            SlotState::Pending(producer) => {
                self.stack.push(handle);
                self.scope_frames.push(None);
                let result = self.run_producer(idx, producer, ctx);
                let inherited = self.scope_frames.pop().flatten();
                self.stack.pop();

                let value = match result {
                    Ok(value) => value,
                    Err(e) => {
                        self.record_failure(&e);
                        self.slots[idx].state = SlotState::Failed(e.clone());
                        return Err(e);
                    }
                };
                let scope = self.slots[idx].origin.scope.or(inherited);
                self.slots[idx].state = SlotState::Resolved {
                    value: value.clone(),
                    scope,
                };
                tracing::trace!(handle = handle.0, path = %self.slots[idx].origin.path, "resolved deferred value");
                (value, scope)
            }
        };

        if let (Some(scope), Some(frame)) = (scope, self.scope_frames.last_mut()) {
            frame.get_or_insert(scope);
        }
        Ok(value)
    }

    fn run_producer(
        &mut self,
        idx: usize,
        producer: Producer,
        ctx: &ResolveContext,
    ) -> Result<Value, SynthError> {
        self.invocations += 1;
        let produced = {
            let mut resolver = Resolver { engine: self, ctx };
            producer(&mut resolver)
        };
        match produced {
            Ok(value) => self.resolve_value(value, ctx),
            Err(ProduceError::Failed(message)) => Err(SynthError::Producer {
                path: self.slots[idx].origin.path.clone(),
                message,
            }),
            Err(ProduceError::Synth(e)) => Err(e),
        }
    }

    fn record_failure(&mut self, e: &SynthError) {
        if self.first_failure.is_none() {
            self.first_failure = Some(e.clone());
        }
    }

    /// First producer failure or cycle of this pass, whether or not the
    /// reading producer recovered from it.
    pub fn first_failure(&self) -> Option<&SynthError> {
        self.first_failure.as_ref()
    }

    fn cycle_error(&self, handle: DeferredHandle) -> SynthError {
        let start = self
            .stack
            .iter()
            .position(|h| *h == handle)
            .unwrap_or(0);
        let cycle = self.stack[start..]
            .iter()
            .chain(std::iter::once(&handle))
            .map(|h| self.describe(*h))
            .collect();
        SynthError::CyclicResolution { cycle }
    }

    fn describe(&self, handle: DeferredHandle) -> String {
        let path = self
            .slots
            .get(handle.0 as usize)
            .map_or("?", |s| s.origin.path.as_str());
        format!("{}{}", path, handle)
    }

    /// Resolve every handle, marker, and nested structure inside `value`.
    ///
    /// Handles and markers not issued by this engine are left in place.
    pub fn resolve_value(
        &mut self,
        value: Value,
        ctx: &ResolveContext,
    ) -> Result<Value, SynthError> {
        match value {
            Value::Deferred(h) if self.is_known(h) => self.resolve(h, ctx),
            Value::List(items) => items
                .into_iter()
                .map(|v| self.resolve_value(v, ctx))
                .collect::<Result<Vec<_>, _>>()
                .map(Value::List),
            Value::Map(m) => {
                let mut out = IndexMap::with_capacity(m.len());
                for (k, v) in m {
                    if let Some(marker) = find_markers(&k).into_iter().next() {
                        return Err(SynthError::configuration(format!(
                            "'{}' uses token {} in map key '{}'; keys must be literal",
                            ctx.path, marker, k
                        )));
                    }
                    out.insert(k, self.resolve_value(v, ctx)?);
                }
                Ok(Value::Map(out))
            }
            Value::String(s) if s.contains(MARKER_PREFIX) => self.resolve_string(s, ctx),
            other => Ok(other),
        }
    }

    /// Substitute markers in a string. Scalars are spliced in as text; any
    /// structured result turns the whole string into a join expression.
    fn resolve_string(&mut self, s: String, ctx: &ResolveContext) -> Result<Value, SynthError> {
        let matches: Vec<(usize, usize, DeferredHandle)> = MARKER_RE
            .captures_iter(&s)
            .filter_map(|c| {
                let m = c.get(0)?;
                let id = c[1].parse::<u32>().ok()?;
                Some((m.start(), m.end(), DeferredHandle(id)))
            })
            .filter(|(_, _, h)| self.is_known(*h))
            .collect();

        if let [(0, end, h)] = matches.as_slice() {
            if *end == s.len() {
                return self.resolve(*h, ctx);
            }
        }

        let mut parts = Vec::new();
        let mut literal = String::new();
        let mut last = 0;
        let mut structured = false;
        for (start, end, h) in matches {
            literal.push_str(&s[last..start]);
            last = end;
            match self.resolve(h, ctx)? {
                Value::String(v) => literal.push_str(&v),
                Value::Number(n) => literal.push_str(&n.to_string()),
                Value::Bool(b) => literal.push_str(&b.to_string()),
                Value::Null => {}
                other => {
                    if !literal.is_empty() {
                        parts.push(Value::String(std::mem::take(&mut literal)));
                    }
                    parts.push(other);
                    structured = true;
                }
            }
        }
        literal.push_str(&s[last..]);

        if !structured {
            return Ok(Value::String(literal));
        }
        if !literal.is_empty() {
            parts.push(Value::String(literal));
        }
        Ok(self.dialect.join("", parts))
    }

    /// Resolve every handle not yet resolved, each in its own scope.
    /// Returns the number of handles resolved by the sweep, or the first
    /// failure of the pass if any producer failed.
    pub fn resolve_pending(&mut self) -> Result<usize, SynthError> {
        let mut swept = 0;
        for idx in 0..self.slots.len() {
            if !matches!(self.slots[idx].state, SlotState::Pending(_)) {
                continue;
            }
            let origin = &self.slots[idx].origin;
            let ctx = ResolveContext::new(origin.scope.or(origin.unit), origin.path.clone());
            self.resolve(DeferredHandle(idx as u32), &ctx)?;
            swept += 1;
        }
        match &self.first_failure {
            Some(e) => Err(e.clone()),
            None => Ok(swept),
        }
    }
}

/// View of the engine handed to producers: they may read other handles
/// but cannot register new ones.
pub struct Resolver<'a> {
    engine: &'a mut DeferredEngine,
    ctx: &'a ResolveContext,
}

impl Resolver<'_> {
    pub fn resolve(&mut self, handle: DeferredHandle) -> Result<Value, SynthError> {
        self.engine.resolve(handle, self.ctx)
    }

    pub fn resolve_value(&mut self, value: Value) -> Result<Value, SynthError> {
        self.engine.resolve_value(value, self.ctx)
    }

    pub fn context(&self) -> &ResolveContext {
        self.ctx
    }

    pub fn dialect(&self) -> &dyn ExpressionDialect {
        self.engine.dialect()
    }
}
