//! The expression graph (C1) and its notifier core (C2).
//!
//! Expressions live in an arena ([`ExprGraph`]) keyed by [`ExprId`], the same
//! shape the teacher uses for its dataflow graph (`BindId` keys into
//! `ExecCtx::cached`/`Env` rather than expressions holding `Rc` pointers to
//! each other). That indirection is what lets an `Alias` or `Operator`
//! reference another expression "live" (spec.md section 3: "Ancestor
//! conditions ... refer to the parent's expression objects; they are not
//! cloned") without a reference-counted graph of trait objects.

pub mod listener;
pub mod op;
pub mod vars;

use crate::ids::{ExprId, ListenerId, NodeKey};
use crate::value::{Typ, Value};
use fxhash::FxHashMap;
use listener::Notifier;
use std::fmt::Debug;

/// Every expression supports this surface (spec.md section 4.1).
///
/// Methods take `&ExprGraph`/`&mut ExprGraph` explicitly rather than holding
/// a back-reference to the graph, mirroring how the teacher threads
/// `ExecCtx` through every `Update::update` call instead of giving nodes a
/// pointer to their own context.
pub trait Expression: Debug {
    fn value_type(&self) -> Typ;

    /// True unless this expression's value is presently unknown (section 3:
    /// "A Node with NO_OUTCOME reports its outcome as unknown; any other
    /// value is known" generalizes to every expression).
    fn is_known(&self, graph: &ExprGraph) -> bool;

    /// Returns `None` if the expression is not known. A type mismatch
    /// between a typed accessor and the underlying value is the caller's
    /// concern (section 4.1's "no exceptions across the boundary" failure
    /// mode); this crate exposes a single dynamically-typed accessor and
    /// lets callers check `value_type()`/pattern-match, so there is no
    /// separate typed accessor to silently fail.
    fn get_value(&self, graph: &ExprGraph) -> Option<Value>;

    fn is_constant(&self) -> bool {
        false
    }

    fn is_assignable(&self) -> bool {
        false
    }

    /// Reference-counted activation (section 4.1). The first call
    /// transitions to active and recursively activates sub-expressions;
    /// subsequent calls only bump the count. Returns the new count.
    fn activate(&mut self, graph: &mut ExprGraph) -> u32;

    /// Inverse of `activate`. Returns the new count.
    fn deactivate(&mut self, graph: &mut ExprGraph) -> u32;

    fn active(&self) -> bool;

    /// Child expressions this one reads, for activation/deactivation
    /// cascades and for `ExprGraph::propagate`'s dependency walk. Leaf
    /// expressions (constants, variables) return an empty slice.
    fn children(&self) -> &[ExprId] {
        &[]
    }

    fn as_assignable(&self) -> Option<&dyn Assignable> {
        None
    }

    fn as_assignable_mut(&mut self) -> Option<&mut dyn Assignable> {
        None
    }
}

/// The subset of expressions that support in-place write (spec.md section
/// 4.1's "Assignable expressions"). Reached through `ExprGraph::set_value`/
/// `set_unknown`, which own the id an instance doesn't keep for itself.
pub trait Assignable: Expression {
    fn set_value(&mut self, graph: &mut ExprGraph, v: Value) -> bool;
    fn set_unknown(&mut self, graph: &mut ExprGraph);

    /// The root variable of an assignable chain -- `self_id` for everything
    /// except `ArrayElementReference`, which resolves to the array it
    /// indexes into.
    fn base_variable(&self, self_id: ExprId) -> ExprId {
        self_id
    }

    fn set_initializer(&mut self, init: ExprId, owned: bool);
}

/// The expression arena plus the notifier core.
///
/// Combining C1 and C2 in one struct mirrors the teacher's `ExecCtx`, which
/// likewise bundles the expression environment (`Env`) with the piece that
/// delivers change events (the `Rt`/`Event` machinery) rather than keeping
/// them as two objects a caller has to thread separately.
pub struct ExprGraph {
    exprs: FxHashMap<ExprId, Box<dyn Expression>>,
    owned: FxHashMap<ExprId, bool>,
    notifier: Notifier,
    /// Expressions whose value may have changed this micro-step and have
    /// not yet been propagated to their listeners. Processed by
    /// `propagate`, which is idempotent within a step (section 4.1:
    /// "publishChange() is idempotent within a single scheduler
    /// micro-step").
    dirty_exprs: Vec<ExprId>,
}

impl Default for ExprGraph {
    fn default() -> Self {
        Self::new()
    }
}

impl ExprGraph {
    pub fn new() -> Self {
        ExprGraph {
            exprs: FxHashMap::default(),
            owned: FxHashMap::default(),
            notifier: Notifier::default(),
            dirty_exprs: Vec::new(),
        }
    }

    /// Insert a freshly constructed expression and return its id. `garbage`
    /// marks whether the expression should be torn down when its owner is
    /// (spec.md section 3: "Expressions owned by a node (garbage flag true)
    /// die with it; shared/aliased expressions die with their owner").
    ///
    /// Also wires `expr.children()` into the notifier graph as
    /// `ListenerId::Expr(id)` on each child, so a leaf variable's
    /// `publishChange` cascades through every operator/alias that reads it
    /// without each call site having to register that edge by hand
    /// (`propagate`'s worklist walk is exactly this listener graph, section
    /// 9: "expression listener graphs may be cyclic ... publishChange must
    /// tolerate being re-entered"). Every child referenced here must already
    /// be present in the arena -- true throughout this crate, which always
    /// builds an expression's operands before the expression itself.
    pub fn insert(&mut self, id: ExprId, expr: Box<dyn Expression>, garbage: bool) {
        let children = expr.children().to_vec();
        self.exprs.insert(id, expr);
        self.owned.insert(id, garbage);
        for child in children {
            self.notifier.add_listener(child, ListenerId::Expr(id));
        }
    }

    pub fn get(&self, id: ExprId) -> Option<&dyn Expression> {
        self.exprs.get(&id).map(|b| b.as_ref())
    }

    pub fn is_known(&self, id: ExprId) -> bool {
        self.exprs.get(&id).map(|e| e.is_known(self)).unwrap_or(false)
    }

    pub fn get_value(&self, id: ExprId) -> Option<Value> {
        self.exprs.get(&id)?.get_value(self)
    }

    pub fn value_type(&self, id: ExprId) -> Typ {
        self.exprs.get(&id).map(|e| e.value_type()).unwrap_or(Typ::Unknown)
    }

    pub fn is_owned(&self, id: ExprId) -> bool {
        self.owned.get(&id).copied().unwrap_or(false)
    }

    /// Remove an expression from the arena. Callers are responsible for
    /// only doing this for expressions they own (section 3 cleanup-order
    /// invariant: conditions before variables, ancestor wrappers before the
    /// local expressions they wrap -- [`crate::node::Node::teardown`]
    /// sequences these calls in the right order).
    pub fn remove(&mut self, id: ExprId) {
        self.exprs.remove(&id);
        self.owned.remove(&id);
        self.notifier.forget_source(id);
    }

    pub fn activate(&mut self, id: ExprId) {
        if let Some(mut expr) = self.exprs.remove(&id) {
            expr.activate(self);
            self.exprs.insert(id, expr);
        }
    }

    pub fn deactivate(&mut self, id: ExprId) {
        if let Some(mut expr) = self.exprs.remove(&id) {
            expr.deactivate(self);
            self.exprs.insert(id, expr);
        }
    }

    pub fn children_of(&self, id: ExprId) -> Vec<ExprId> {
        self.exprs.get(&id).map(|e| e.children().to_vec()).unwrap_or_default()
    }

    /// Write a new value through an assignable expression and mark it dirty
    /// on success. Returns `false` if `id` is unknown or not assignable, or
    /// if the underlying `set_value` rejects the value (e.g. a type or
    /// capacity mismatch).
    pub fn set_value(&mut self, id: ExprId, v: Value) -> bool {
        let Some(mut expr) = self.exprs.remove(&id) else { return false };
        let ok = match expr.as_assignable_mut() {
            Some(a) => a.set_value(self, v),
            None => false,
        };
        self.exprs.insert(id, expr);
        if ok {
            self.publish_change(id);
        }
        ok
    }

    pub fn set_unknown(&mut self, id: ExprId) -> bool {
        let Some(mut expr) = self.exprs.remove(&id) else { return false };
        let ok = match expr.as_assignable_mut() {
            Some(a) => {
                a.set_unknown(self);
                true
            }
            None => false,
        };
        self.exprs.insert(id, expr);
        if ok {
            self.publish_change(id);
        }
        ok
    }

    pub fn is_assignable(&self, id: ExprId) -> bool {
        self.exprs.get(&id).map(|e| e.is_assignable()).unwrap_or(false)
    }

    /// The root variable of an assignable chain (see `Assignable::base_variable`).
    pub fn base_variable_of(&self, id: ExprId) -> ExprId {
        self.exprs
            .get(&id)
            .and_then(|e| e.as_assignable())
            .map(|a| a.base_variable(id))
            .unwrap_or(id)
    }

    pub fn add_listener(&mut self, source: ExprId, listener: ListenerId) {
        self.notifier.add_listener(source, listener);
    }

    pub fn remove_listener(&mut self, source: ExprId, listener: ListenerId) {
        self.notifier.remove_listener(source, listener);
    }

    /// Mark `id` as having possibly changed value this micro-step. Safe to
    /// call redundantly: `propagate` dedups.
    pub fn publish_change(&mut self, id: ExprId) {
        self.dirty_exprs.push(id);
    }

    /// Drain the dirty-expression worklist, recomputing any operator that
    /// transitively depends on a changed leaf, and return the set of nodes
    /// whose gate conditions may now need re-evaluation (the seed for the
    /// scheduler's Q1, spec.md section 4.5).
    ///
    /// The visited-set below is what keeps this idempotent and cycle-safe
    /// per section 9's design note ("deduplicate notifications via ...
    /// visited-set in the scheduler; publishChange must tolerate being
    /// re-entered").
    pub fn propagate(&mut self) -> Vec<NodeKey> {
        // Expressions don't cache a value to compare (they are pull/demand
        // evaluated from their children, like the teacher's uncached
        // `Operator` nodes), so a source changing always cascades to its
        // listeners; the visited-set is what makes repeated or cyclic
        // publishChange calls idempotent rather than a value comparison.
        let mut visited_exprs = std::collections::HashSet::new();
        let mut dirty_nodes = std::collections::HashSet::new();
        let mut worklist: Vec<ExprId> = std::mem::take(&mut self.dirty_exprs);
        while let Some(id) = worklist.pop() {
            if !visited_exprs.insert(id) {
                continue;
            }
            let Some(listeners) = self.notifier.listeners_of(id) else { continue };
            for listener in listeners {
                match listener {
                    ListenerId::Node(n) => {
                        dirty_nodes.insert(n);
                    }
                    ListenerId::Expr(e) => {
                        if !visited_exprs.contains(&e) {
                            worklist.push(e);
                        }
                    }
                }
            }
        }
        dirty_nodes.into_iter().collect()
    }
}
