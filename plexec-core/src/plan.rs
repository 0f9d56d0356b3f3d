//! The plan-builder API (spec.md section 6.1): the surface an XML-parser
//! equivalent (or, here, the CLI demo and the test suite) uses to assemble a
//! validated `Plan` tree. Stands in for `NodeFactory.createNode`,
//! `Node.addLocalVariable`, `Node.addUserCondition`,
//! `Node.finalizeConditions`, `ListNode.addChild`,
//! `LibraryCallNode.addAlias`, and the Assignment-specific
//! `setAssignment`/`setPriority`.
//!
//! Building a plan is strictly top-down: attach a node to its parent with
//! [`PlanBuilder::add_child`] before attaching that node's own children, and
//! call [`PlanBuilder::finalize_conditions`] on a node only after every user
//! condition and every child has been added. `Node::ensure_ancestor_combinators`
//! (in `node.rs`) depends on this ordering to build the shared ancestor
//! condition wrappers correctly -- see DESIGN.md.

use crate::error::PlanError;
use crate::expr::op::{Op, Operator};
use crate::expr::vars::{Alias, ArrayVariable, Constant, UserVariable};
use crate::expr::{Assignable, Expression};
use crate::ids::{ExprId, NodeKey};
use crate::node::body::{AssignmentBody, CommandBody, ListBody, NodeBody, UpdateBody};
use crate::node::internal_vars::{AbortAckVariable, AllChildrenFinished, CommandHandleIsEnd};
use crate::node::{CommandHandle, ConditionSlot, Node, NodeType, Plan};
use crate::scope::find_variable;
use crate::value::{types_compatible, Typ, Value};
use std::cell::RefCell;
use std::rc::Rc;

/// Looks up a library plan subtree by name (spec.md section 6.1,
/// `findLibraryNode`). Out of scope per section 1 ("Library-plan catalog
/// and ID uniquifier"); this crate only needs the interface so
/// `LibraryCallNode` resolution can be tested against a trivial in-memory
/// stand-in (`MapLibrary`, below).
pub trait LibraryCatalog {
    /// Instantiate a fresh copy of the named library plan as a child of
    /// `parent` in `builder`'s plan, returning its root key. Each call must
    /// produce node ids that don't collide with the caller's tree (spec.md
    /// section 6.1's "ID uniquifier"); how that's done is left to the
    /// catalog implementation.
    fn instantiate(
        &self,
        builder: &mut PlanBuilder,
        name: &str,
        parent: NodeKey,
    ) -> Result<NodeKey, PlanError>;
}

/// A `LibraryCatalog` backed by a fixed set of builder closures, for tests
/// and the CLI demo. Each entry is called once per `LibraryNodeCall` site.
#[derive(Default)]
pub struct MapLibrary {
    entries: std::collections::HashMap<String, Box<dyn Fn(&mut PlanBuilder, NodeKey) -> Result<NodeKey, PlanError>>>,
}

impl MapLibrary {
    pub fn new() -> Self {
        MapLibrary { entries: std::collections::HashMap::new() }
    }

    pub fn register(
        &mut self,
        name: impl Into<String>,
        build: impl Fn(&mut PlanBuilder, NodeKey) -> Result<NodeKey, PlanError> + 'static,
    ) {
        self.entries.insert(name.into(), Box::new(build));
    }
}

impl LibraryCatalog for MapLibrary {
    fn instantiate(
        &self,
        builder: &mut PlanBuilder,
        name: &str,
        parent: NodeKey,
    ) -> Result<NodeKey, PlanError> {
        match self.entries.get(name) {
            Some(build) => build(builder, parent),
            None => Err(PlanError::UnknownLibraryNode(name.to_string())),
        }
    }
}

/// Wraps a `Plan` with the mutation API a parser-equivalent caller drives.
pub struct PlanBuilder {
    pub plan: Plan,
}

impl Default for PlanBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl PlanBuilder {
    pub fn new() -> Self {
        PlanBuilder { plan: Plan::new() }
    }

    /// `NodeFactory.createNode` (spec.md section 6.1 / SPEC_FULL.md
    /// "supplemented feature" #4): dispatch on `node_type` to build the
    /// right body, including whatever internal variables that body needs
    /// (an Assignment's `ack`, a Command's handle, ...), and insert the node
    /// into the arena. Does not attach it to `parent`'s children list --
    /// call `add_child` for that once the child is fully built, per this
    /// module's top-down ordering requirement.
    pub fn create_node(
        &mut self,
        node_type: NodeType,
        id: crate::ids::NodeId,
        parent: Option<NodeKey>,
    ) -> Result<NodeKey, PlanError> {
        if let Some(p) = parent {
            if let Some(pnode) = self.plan.node(p) {
                if pnode.id == id || pnode.children.iter().any(|c| self.plan.node(*c).map(|n| &n.id) == Some(&id)) {
                    return Err(PlanError::DuplicateNodeId(id));
                }
            }
        }
        let body = match node_type {
            NodeType::Empty => NodeBody::Empty,
            NodeType::Assignment => {
                let ack = self.insert_owned(Box::new(UserVariable::new(Typ::Boolean, None)));
                // dest/rhs are not known until `set_assignment` is called;
                // use a placeholder constant until then (replaced in place).
                let placeholder = self.insert_owned(Box::new(Constant::new(Value::Boolean(false))));
                NodeBody::Assignment(AssignmentBody::new(placeholder, placeholder, ack))
            }
            NodeType::Command => {
                let placeholder = self.insert_owned(Box::new(Constant::new(Value::String(String::new()))));
                let handle = Rc::new(RefCell::new(CommandHandle::SentToSystem));
                let handle_is_end =
                    self.insert_owned(Box::new(CommandHandleIsEnd::new(Rc::clone(&handle))));
                let abort_ack = Rc::new(RefCell::new(false));
                let abort_complete =
                    self.insert_owned(Box::new(AbortAckVariable::new(Rc::clone(&abort_ack))));
                NodeBody::Command(CommandBody::new(placeholder, handle, handle_is_end, abort_ack, abort_complete))
            }
            NodeType::Update => {
                let ack = self.insert_owned(Box::new(UserVariable::new(Typ::Boolean, None)));
                NodeBody::Update(UpdateBody::new(ack))
            }
            NodeType::NodeList => NodeBody::List(self.new_list_body()),
            NodeType::LibraryCall => NodeBody::LibraryCall(self.new_list_body()),
        };
        let key = NodeKey::next();
        let node = Node::new(id, node_type, parent, body);
        self.plan.insert_node(key, node);
        if self.plan.root().is_none() && parent.is_none() {
            self.plan.set_root(key);
        }
        if node_type == NodeType::Command {
            // `ActionComplete` for a Command is "the handle reached an end
            // value" -- the same predicate `finalize_conditions` wraps into
            // the implicit End condition (see `CommandBody::handle_is_end`'s
            // doc comment). Installed here, not left to `add_user_condition`,
            // since spec.md's transition table never gives a plan author a
            // way to override it.
            let (handle_is_end, abort_complete) = match self.plan.node(key).map(|n| &n.body) {
                Some(NodeBody::Command(b)) => (Some(b.handle_is_end), Some(b.abort_complete)),
                _ => (None, None),
            };
            if let (Some(id), Some(n)) = (handle_is_end, self.plan.node_mut(key)) {
                n.conditions[ConditionSlot::ActionComplete.index()] = Some(id);
                n.condition_owned[ConditionSlot::ActionComplete.index()] = true;
            }
            // AbortComplete (spec.md section 4.4's `abortHandle`): installed
            // unconditionally like ActionComplete above, not left to
            // `add_user_condition` -- only the scheduler's `AbortAck` event
            // ever has a reason to flip it (see `body::CommandBody::abort_ack`).
            if let (Some(id), Some(n)) = (abort_complete, self.plan.node_mut(key)) {
                n.conditions[ConditionSlot::AbortComplete.index()] = Some(id);
                n.condition_owned[ConditionSlot::AbortComplete.index()] = true;
            }
        }
        Ok(key)
    }

    fn new_list_body(&mut self) -> ListBody {
        let child_statuses = Rc::new(RefCell::new(Vec::new()));
        let all_children_finished =
            self.insert_owned(Box::new(AllChildrenFinished::new(Rc::clone(&child_statuses))));
        ListBody { all_children_finished, child_statuses }
    }

    fn insert_owned(&mut self, expr: Box<dyn Expression>) -> ExprId {
        self.insert_expr(expr, true)
    }

    /// Insert an arbitrary expression into the plan's arena and return its
    /// id (spec.md section 6.1). `add_local_variable`/`add_array_variable`
    /// cover a node's own named variables; this is what a parser-equivalent
    /// caller reaches for to build everything else a condition slot or an
    /// Assignment RHS needs but no node owns by name -- `Operator` trees
    /// (`And`/`Lt`/...), bare `Constant`s, and `Alias` wrappers. `garbage`
    /// is `false` only when the caller is installing a reference to an
    /// expression some other owner is already responsible for tearing down.
    pub fn insert_expr(&mut self, expr: Box<dyn Expression>, garbage: bool) -> ExprId {
        let id = ExprId::next();
        self.plan.exprs.insert(id, expr, garbage);
        id
    }

    /// `Node.addLocalVariable` (spec.md section 6.1). Fails with
    /// `DuplicateName` if `node` already has a variable/alias of that name.
    pub fn add_local_variable(
        &mut self,
        node: NodeKey,
        name: impl Into<String>,
        typ: Typ,
        initial: Option<Value>,
    ) -> Result<ExprId, PlanError> {
        let id = self.insert_owned(Box::new(UserVariable::new(typ, initial)));
        self.declare(node, name, id)?;
        Ok(id)
    }

    /// `DeclareArray` (spec.md section 6.3): fails with `ArrayTooLarge` if
    /// the initializer exceeds `max_size`.
    pub fn add_array_variable(
        &mut self,
        node: NodeKey,
        name: impl Into<String>,
        element_type: Typ,
        max_size: usize,
        initial: Option<Vec<Value>>,
    ) -> Result<ExprId, PlanError> {
        if let Some(init) = &initial {
            if init.len() > max_size {
                return Err(PlanError::ArrayTooLarge { max: max_size, got: init.len() });
            }
        }
        let id = self.insert_owned(Box::new(ArrayVariable::new(element_type, max_size, initial)));
        self.declare(node, name, id)?;
        Ok(id)
    }

    /// Declares an owned local variable/array entry into `node`'s scope.
    fn declare(&mut self, node: NodeKey, name: impl Into<String>, id: ExprId) -> Result<(), PlanError> {
        let Some(n) = self.plan.node_mut(node) else { return Ok(()) };
        n.scope.declare(name, id)
    }

    /// `LibraryCallNode.addAlias` (spec.md section 6.1): installs `expr`
    /// into `libcall`'s own scope under `name`, which is exactly what makes
    /// it visible to the instantiated callee subtree and nothing past it
    /// (`ScopeHost::blocks_ancestor_lookup` stops the walk at a
    /// `LibraryCall` node after consulting its own scope). `owned` records
    /// whether `libcall` (rather than the caller) is responsible for
    /// tearing `expr` down -- a bare reference to a caller variable is not.
    pub fn add_alias(
        &mut self,
        libcall: NodeKey,
        name: impl Into<String>,
        expr: ExprId,
        owned: bool,
    ) -> Result<(), PlanError> {
        let Some(n) = self.plan.node_mut(libcall) else { return Ok(()) };
        n.scope.declare_with_ownership(name, expr, owned)
    }

    /// `Node.addUserCondition` (spec.md section 6.1). Fails with
    /// `AlreadyFinalized` once `finalize_conditions` has run for `node`.
    pub fn add_user_condition(
        &mut self,
        node: NodeKey,
        slot: ConditionSlot,
        expr: ExprId,
        owned: bool,
    ) -> Result<(), PlanError> {
        let Some(n) = self.plan.node_mut(node) else { return Ok(()) };
        if n.finalized {
            return Err(PlanError::AlreadyFinalized(n.id.clone()));
        }
        n.conditions[slot.index()] = Some(expr);
        n.condition_owned[slot.index()] = owned;
        Ok(())
    }

    /// `ListNode.addChild` (spec.md section 6.1). Attaches `child` to
    /// `parent` (wiring its ancestor condition slots, `Node::mod.rs`) and,
    /// for List/LibraryCall parents, registers `child`'s status with the
    /// parent's `allChildrenFinished` aggregate.
    pub fn add_child(&mut self, parent: NodeKey, child: NodeKey) -> Result<(), PlanError> {
        if let (Some(p), Some(c)) = (self.plan.node(parent), self.plan.node(child)) {
            if p.id == c.id || p.children.iter().any(|k| self.plan.node(*k).map(|n| &n.id) == Some(&c.id)) {
                return Err(PlanError::DuplicateNodeId(c.id.clone()));
            }
        }
        let child_status = self.plan.node(child).map(|n| Rc::clone(&n.status));
        self.plan.add_child(parent, child);
        if let (Some(status), Some(parent_node)) = (child_status, self.plan.node(parent)) {
            match &parent_node.body {
                NodeBody::List(b) | NodeBody::LibraryCall(b) => {
                    b.child_statuses.borrow_mut().push(status);
                }
                _ => {}
            }
        }
        Ok(())
    }

    /// `setAssignment`/`setPriority` (spec.md section 6.1). Replaces the
    /// placeholder dest/rhs `create_node` installed for an Assignment body.
    pub fn set_assignment(&mut self, node: NodeKey, dest: ExprId, rhs: ExprId) -> Result<(), PlanError> {
        if !self.plan.exprs.is_assignable(dest) {
            return Err(PlanError::InOutNotAssignable("<assignment LHS>".to_string()));
        }
        let Some(n) = self.plan.node_mut(node) else { return Ok(()) };
        if let NodeBody::Assignment(body) = &mut n.body {
            body.dest = dest;
            body.rhs = rhs;
        }
        Ok(())
    }

    pub fn set_priority(&mut self, node: NodeKey, priority: i32) {
        if let Some(n) = self.plan.node_mut(node) {
            if let NodeBody::Assignment(body) = &mut n.body {
                body.priority = priority;
            }
        }
    }

    /// Replace a Command body's name/args/resources/dest, installed by
    /// `create_node` with a placeholder name. Mirrors `setAssignment` for
    /// the Command body.
    pub fn set_command(
        &mut self,
        node: NodeKey,
        name: ExprId,
        args: Vec<ExprId>,
        dest: Option<ExprId>,
    ) -> Result<(), PlanError> {
        if let Some(d) = dest {
            if !self.plan.exprs.is_assignable(d) {
                return Err(PlanError::InOutNotAssignable("<command return dest>".to_string()));
            }
        }
        let Some(n) = self.plan.node_mut(node) else { return Ok(()) };
        if let NodeBody::Command(body) = &mut n.body {
            body.name = name;
            body.args = args;
            body.dest = dest;
        }
        Ok(())
    }

    pub fn add_resource(
        &mut self,
        node: NodeKey,
        resource: crate::node::body::ResourceRequest,
    ) {
        if let Some(n) = self.plan.node_mut(node) {
            if let NodeBody::Command(body) = &mut n.body {
                body.resources.push(resource);
            }
        }
    }

    /// `Update`'s `Pair(Name, Expr)*` list (spec.md section 6.3).
    pub fn add_update_pair(&mut self, node: NodeKey, name: impl Into<String>, expr: ExprId) {
        if let Some(n) = self.plan.node_mut(node) {
            if let NodeBody::Update(body) = &mut n.body {
                body.pairs.push((name.into(), expr));
            }
        }
    }

    /// Resolve an `In` interface variable (spec.md section 4.2) against the
    /// scope chain starting at `lookup_from` (the `LibraryCall` node whose
    /// alias map provides the caller-side bindings), and declare it into
    /// `owner`'s own scope under `name` so the callee body can reference it
    /// like any local variable.
    pub fn resolve_in_variable(
        &mut self,
        owner: NodeKey,
        lookup_from: NodeKey,
        name: &str,
        typ: Typ,
        default: Option<ExprId>,
    ) -> Result<ExprId, PlanError> {
        let resolved = find_variable(&self.plan, lookup_from, name);
        let (installed, owned) = match resolved {
            Some(id) => {
                let offered = self.plan.exprs.value_type(id);
                if !types_compatible(&typ, &offered) {
                    return Err(PlanError::TypeMismatch {
                        name: name.to_string(),
                        expected: typ,
                        found: offered,
                    });
                }
                if self.plan.exprs.is_assignable(id) {
                    (self.insert_owned(Box::new(Alias::new(id, typ, false))), true)
                } else {
                    (id, false)
                }
            }
            None => match default {
                Some(id) => (id, true),
                None => return Err(PlanError::MissingInVariable(name.to_string())),
            },
        };
        let Some(n) = self.plan.node_mut(owner) else { return Ok(installed) };
        n.scope.declare_with_ownership(name, installed, owned)?;
        Ok(installed)
    }

    /// Resolve an `InOut` interface variable (spec.md section 4.2): must
    /// land on a writable expression of compatible type, or fall back to a
    /// freshly owned variable initialized from `default`.
    pub fn resolve_inout_variable(
        &mut self,
        owner: NodeKey,
        lookup_from: NodeKey,
        name: &str,
        typ: Typ,
        default: Option<ExprId>,
    ) -> Result<ExprId, PlanError> {
        let resolved = find_variable(&self.plan, lookup_from, name);
        let (installed, owned) = match resolved {
            Some(id) if self.plan.exprs.is_assignable(id) => {
                let offered = self.plan.exprs.value_type(id);
                if !types_compatible(&typ, &offered) {
                    return Err(PlanError::TypeMismatch {
                        name: name.to_string(),
                        expected: typ,
                        found: offered,
                    });
                }
                (id, false)
            }
            Some(_) => return Err(PlanError::InOutNotAssignable(name.to_string())),
            None => match default {
                Some(init) => {
                    let mut var = UserVariable::new(typ, None);
                    var.set_initializer(init, false);
                    (self.insert_owned(Box::new(var)), true)
                }
                None => return Err(PlanError::MissingInOutVariable(name.to_string())),
            },
        };
        let Some(n) = self.plan.node_mut(owner) else { return Ok(installed) };
        n.scope.declare_with_ownership(name, installed, owned)?;
        Ok(installed)
    }

    /// A reference to `target`'s own `StateVariable` (spec.md section 3),
    /// for building conditions like `EQ(NodeState(target), FINISHED)` on some
    /// other node. Returns the same id on repeated calls for the same target.
    pub fn node_state_ref(&mut self, target: NodeKey) -> Option<ExprId> {
        self.plan.ensure_state_variable(target)
    }

    /// A reference to `target`'s own `OutcomeVariable` (spec.md section 3).
    pub fn node_outcome_ref(&mut self, target: NodeKey) -> Option<ExprId> {
        self.plan.ensure_outcome_variable(target)
    }

    /// A reference to `target`'s own `FailureVariable` (spec.md section 3).
    pub fn node_failure_ref(&mut self, target: NodeKey) -> Option<ExprId> {
        self.plan.ensure_failure_variable(target)
    }

    /// A reference to `target`'s raw `CommandHandleVariable` (spec.md section
    /// 3). `None` if `target` is not a Command node.
    pub fn command_handle_ref(&mut self, target: NodeKey) -> Option<ExprId> {
        self.plan.ensure_command_handle_variable(target)
    }

    /// `Node.finalizeConditions` (spec.md section 6.1): wraps the user End
    /// condition (or the slot's `true` default if none was supplied) with
    /// the type-specific implicit contributor via `And` (section 4.3):
    /// Assignment/Update use their body's `ack`, Command uses a predicate
    /// over its handle, List/LibraryCall use `allChildrenFinished`. Empty
    /// nodes have no implicit contributor and are left as the user supplied
    /// (or the default `true`).
    pub fn finalize_conditions(&mut self, node: NodeKey) -> Result<(), PlanError> {
        let Some(n) = self.plan.node(node) else { return Ok(()) };
        if n.finalized {
            return Err(PlanError::AlreadyFinalized(n.id.clone()));
        }
        let implicit = match &n.body {
            NodeBody::Assignment(b) => Some(b.ack),
            NodeBody::Update(b) => Some(b.ack),
            NodeBody::Command(b) => Some(b.handle_is_end),
            NodeBody::List(b) | NodeBody::LibraryCall(b) => Some(b.all_children_finished),
            NodeBody::Empty => None,
        };
        if let Some(implicit_id) = implicit {
            let user_end = self.plan.node(node).and_then(|n| n.condition(ConditionSlot::End));
            let user_owned = self.plan.node(node).map(|n| n.condition_owned[ConditionSlot::End.index()]).unwrap_or(false);
            let end_lhs = user_end.unwrap_or_else(|| {
                self.insert_owned(Box::new(Constant::new(Value::Boolean(ConditionSlot::End.default_value()))))
            });
            let wrapped = self.insert_owned(Box::new(Operator::new(Op::And, Typ::Boolean, vec![end_lhs, implicit_id])));
            if let Some(n) = self.plan.node_mut(node) {
                if user_end.is_some() && user_owned {
                    n.extra_owned.push(end_lhs);
                }
                n.conditions[ConditionSlot::End.index()] = Some(wrapped);
                n.condition_owned[ConditionSlot::End.index()] = true;
            }
        }
        if let Some(n) = self.plan.node_mut(node) {
            n.finalized = true;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ids::NodeId;

    fn empty_node(b: &mut PlanBuilder, parent: Option<NodeKey>, name: &str) -> NodeKey {
        let key = b.create_node(NodeType::Empty, NodeId::from(name), parent).unwrap();
        b.finalize_conditions(key).unwrap();
        key
    }

    #[test]
    fn command_node_gets_action_complete_wired_to_handle_is_end() {
        let mut b = PlanBuilder::new();
        let cmd = b.create_node(NodeType::Command, NodeId::from("cmd"), None).unwrap();
        let action_complete = b.plan.node(cmd).unwrap().condition(ConditionSlot::ActionComplete).unwrap();
        let handle_is_end = match &b.plan.node(cmd).unwrap().body {
            NodeBody::Command(body) => body.handle_is_end,
            _ => panic!("expected a command body"),
        };
        assert_eq!(action_complete, handle_is_end);
    }

    #[test]
    fn resolve_in_variable_aliases_an_existing_assignable_without_owning_it() {
        let mut b = PlanBuilder::new();
        let root = empty_node(&mut b, None, "root");
        let caller_var = b.add_local_variable(root, "x", Typ::Integer, Some(Value::Integer(3))).unwrap();
        let libcall = b.create_node(NodeType::LibraryCall, NodeId::from("call"), Some(root)).unwrap();
        b.add_alias(libcall, "x", caller_var, false).unwrap();
        let callee = b.create_node(NodeType::Empty, NodeId::from("callee"), Some(libcall)).unwrap();

        let resolved = b.resolve_in_variable(callee, libcall, "x", Typ::Integer, None).unwrap();
        assert_ne!(resolved, caller_var, "an assignable In variable must be wrapped in a read-only Alias");
        let owned = b.plan.node(callee).unwrap().scope.owned_iter().any(|id| id == resolved);
        assert!(owned, "the Alias wrapper itself is owned by the callee even though the caller's variable is not");
    }

    #[test]
    fn resolve_in_variable_falls_back_to_an_owned_default_when_unbound() {
        let mut b = PlanBuilder::new();
        let root = empty_node(&mut b, None, "root");
        let libcall = b.create_node(NodeType::LibraryCall, NodeId::from("call"), Some(root)).unwrap();
        let callee = b.create_node(NodeType::Empty, NodeId::from("callee"), Some(libcall)).unwrap();
        let default = b.insert_owned(Box::new(Constant::new(Value::Integer(9))));

        let resolved = b.resolve_in_variable(callee, libcall, "y", Typ::Integer, Some(default)).unwrap();
        assert_eq!(resolved, default);
        let owned = b.plan.node(callee).unwrap().scope.owned_iter().any(|id| id == resolved);
        assert!(owned);
    }

    #[test]
    fn resolve_in_variable_missing_with_no_default_is_an_error() {
        let mut b = PlanBuilder::new();
        let root = empty_node(&mut b, None, "root");
        let libcall = b.create_node(NodeType::LibraryCall, NodeId::from("call"), Some(root)).unwrap();
        let callee = b.create_node(NodeType::Empty, NodeId::from("callee"), Some(libcall)).unwrap();
        let err = b.resolve_in_variable(callee, libcall, "missing", Typ::Integer, None).unwrap_err();
        assert!(matches!(err, PlanError::MissingInVariable(_)));
    }

    #[test]
    fn resolve_inout_variable_requires_an_assignable_binding() {
        let mut b = PlanBuilder::new();
        let root = empty_node(&mut b, None, "root");
        // A constant bound under this name is not assignable.
        let constant = b.insert_owned(Box::new(Constant::new(Value::Integer(1))));
        b.declare(root, "ro", constant).unwrap();
        let libcall = b.create_node(NodeType::LibraryCall, NodeId::from("call"), Some(root)).unwrap();
        b.add_alias(libcall, "ro", constant, false).unwrap();
        let callee = b.create_node(NodeType::Empty, NodeId::from("callee"), Some(libcall)).unwrap();

        let err = b.resolve_inout_variable(callee, libcall, "ro", Typ::Integer, None).unwrap_err();
        assert!(matches!(err, PlanError::InOutNotAssignable(_)));
    }

    #[test]
    fn resolve_inout_variable_unbound_creates_an_owned_variable_from_default() {
        let mut b = PlanBuilder::new();
        let root = empty_node(&mut b, None, "root");
        let libcall = b.create_node(NodeType::LibraryCall, NodeId::from("call"), Some(root)).unwrap();
        let callee = b.create_node(NodeType::Empty, NodeId::from("callee"), Some(libcall)).unwrap();
        let default = b.insert_owned(Box::new(Constant::new(Value::Integer(7))));

        let resolved = b.resolve_inout_variable(callee, libcall, "z", Typ::Integer, Some(default)).unwrap();
        assert!(b.plan.exprs.is_assignable(resolved));
        assert_ne!(resolved, default, "the default is only the initializer, not the variable itself");
        let owned = b.plan.node(callee).unwrap().scope.owned_iter().any(|id| id == resolved);
        assert!(owned);
    }

    #[test]
    fn add_child_registers_status_with_parent_aggregate() {
        let mut b = PlanBuilder::new();
        let root = b.create_node(NodeType::NodeList, NodeId::from("root"), None).unwrap();
        let child = empty_node(&mut b, Some(root), "child");
        b.add_child(root, child).unwrap();
        match &b.plan.node(root).unwrap().body {
            NodeBody::List(body) => assert_eq!(body.child_statuses.borrow().len(), 1),
            _ => panic!("expected a list body"),
        }
    }

    #[test]
    fn command_node_gets_abort_complete_wired_and_false_until_acked() {
        let mut b = PlanBuilder::new();
        let cmd = b.create_node(NodeType::Command, NodeId::from("cmd"), None).unwrap();
        let abort_complete = b.plan.node(cmd).unwrap().condition(ConditionSlot::AbortComplete).unwrap();
        let wired = match &b.plan.node(cmd).unwrap().body {
            NodeBody::Command(body) => body.abort_complete,
            _ => panic!("expected a command body"),
        };
        assert_eq!(abort_complete, wired);
        // Unlike the slot's documented `true` default, an installed
        // AbortComplete starts false: a Command only has anything to abort
        // once it actually enters Failing.
        assert_eq!(b.plan.exprs.get_value(abort_complete), Some(Value::Boolean(false)));
    }

    #[test]
    fn node_state_ref_is_cached_and_tracks_the_target() {
        let mut b = PlanBuilder::new();
        let root = empty_node(&mut b, None, "root");
        let first = b.node_state_ref(root).unwrap();
        let second = b.node_state_ref(root).unwrap();
        assert_eq!(first, second, "repeated references to the same node share one StateVariable");
        assert_eq!(b.plan.exprs.get_value(first), Some(Value::String(format!("{:?}", crate::node::NodeState::Inactive))));
    }

    #[test]
    fn node_state_ref_can_back_a_cross_node_equality_condition() {
        let mut b = PlanBuilder::new();
        let root = b.create_node(NodeType::NodeList, NodeId::from("root"), None).unwrap();
        let watched = empty_node(&mut b, Some(root), "watched");
        b.add_child(root, watched).unwrap();
        let watcher = b.create_node(NodeType::Empty, NodeId::from("watcher"), Some(root)).unwrap();

        let state_ref = b.node_state_ref(watched).unwrap();
        let target = b.insert_owned(Box::new(Constant::new(Value::String(
            format!("{:?}", crate::node::NodeState::Finished),
        ))));
        let eq = b.insert_owned(Box::new(Operator::new(Op::Eq, Typ::Boolean, vec![state_ref, target])));
        b.add_user_condition(watcher, ConditionSlot::Start, eq, true).unwrap();
        b.finalize_conditions(watcher).unwrap();

        assert_eq!(b.plan.exprs.get_value(eq), Some(Value::Boolean(false)));
    }

    #[test]
    fn command_handle_ref_reflects_the_live_handle() {
        let mut b = PlanBuilder::new();
        let cmd = b.create_node(NodeType::Command, NodeId::from("cmd"), None).unwrap();
        let handle_ref = b.command_handle_ref(cmd).unwrap();
        assert_eq!(
            b.plan.exprs.get_value(handle_ref),
            Some(Value::String(format!("{:?}", CommandHandle::SentToSystem)))
        );
    }

    #[test]
    fn command_handle_ref_is_none_for_non_command_nodes() {
        let mut b = PlanBuilder::new();
        let root = empty_node(&mut b, None, "root");
        assert!(b.command_handle_ref(root).is_none());
    }

    #[test]
    fn duplicate_node_id_among_siblings_is_rejected() {
        let mut b = PlanBuilder::new();
        let root = b.create_node(NodeType::NodeList, NodeId::from("root"), None).unwrap();
        let first = b.create_node(NodeType::Empty, NodeId::from("dup"), Some(root)).unwrap();
        b.finalize_conditions(first).unwrap();
        b.add_child(root, first).unwrap();
        let err = b.create_node(NodeType::Empty, NodeId::from("dup"), Some(root)).unwrap_err();
        assert!(matches!(err, PlanError::DuplicateNodeId(_)));
    }
}
