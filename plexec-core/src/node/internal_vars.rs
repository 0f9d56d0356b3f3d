//! Internal node-state variables: `StateVariable`, `OutcomeVariable`,
//! `FailureVariable`, `NodeTimepointValue` (spec.md section 3), plus the
//! command-handle and child-aggregation variables the body specializations
//! need for their implicit end conditions (section 4.3/4.4).
//!
//! Each reads a `Rc<RefCell<_>>` handle shared with its owning `Node`
//! instead of looking itself up in a node arena -- this is what keeps
//! `crate::expr` (and this submodule's own `Expression` impls) independent
//! of `crate::node::Plan`.

use super::{CommandHandle, NodeState, NodeStatus};
use crate::expr::{Expression, ExprGraph};
use crate::value::{Typ, Value};
use std::cell::RefCell;
use std::rc::Rc;

/// Always active, per spec.md section 4.1 ("Pure constants and the three
/// internal node variables are always active").
macro_rules! always_active {
    () => {
        fn activate(&mut self, _graph: &mut ExprGraph) -> u32 {
            1
        }
        fn deactivate(&mut self, _graph: &mut ExprGraph) -> u32 {
            1
        }
        fn active(&self) -> bool {
            true
        }
    };
}

#[derive(Debug)]
pub struct StateVariable {
    status: Rc<RefCell<NodeStatus>>,
}

impl StateVariable {
    pub fn new(status: Rc<RefCell<NodeStatus>>) -> Self {
        StateVariable { status }
    }
}

impl Expression for StateVariable {
    fn value_type(&self) -> Typ {
        Typ::String
    }

    fn is_known(&self, _graph: &ExprGraph) -> bool {
        true
    }

    fn get_value(&self, _graph: &ExprGraph) -> Option<Value> {
        Some(Value::String(format!("{:?}", self.status.borrow().state)))
    }

    always_active!();
}

#[derive(Debug)]
pub struct OutcomeVariable {
    status: Rc<RefCell<NodeStatus>>,
}

impl OutcomeVariable {
    pub fn new(status: Rc<RefCell<NodeStatus>>) -> Self {
        OutcomeVariable { status }
    }
}

impl Expression for OutcomeVariable {
    fn value_type(&self) -> Typ {
        Typ::String
    }

    /// A `NoOutcome` node reports its outcome as unknown (spec.md section 3).
    fn is_known(&self, _graph: &ExprGraph) -> bool {
        !matches!(self.status.borrow().outcome, super::NodeOutcome::NoOutcome)
    }

    fn get_value(&self, graph: &ExprGraph) -> Option<Value> {
        if !self.is_known(graph) {
            return None;
        }
        Some(Value::String(format!("{:?}", self.status.borrow().outcome)))
    }

    always_active!();
}

#[derive(Debug)]
pub struct FailureVariable {
    status: Rc<RefCell<NodeStatus>>,
}

impl FailureVariable {
    pub fn new(status: Rc<RefCell<NodeStatus>>) -> Self {
        FailureVariable { status }
    }
}

impl Expression for FailureVariable {
    fn value_type(&self) -> Typ {
        Typ::String
    }

    fn is_known(&self, _graph: &ExprGraph) -> bool {
        !matches!(self.status.borrow().failure, super::FailureType::NoFailure)
    }

    fn get_value(&self, graph: &ExprGraph) -> Option<Value> {
        if !self.is_known(graph) {
            return None;
        }
        Some(Value::String(format!("{:?}", self.status.borrow().failure)))
    }

    always_active!();
}

/// The timestamp a node most recently entered `state` (spec.md section 3,
/// "timestamp when a given node entered a given state"). Unknown until the
/// node has entered that state at least once. Built lazily by
/// `Plan::ensure_timepoint`, which caches one of these per `(node, state)`
/// pair on first reference instead of eagerly instantiating all fourteen.
#[derive(Debug)]
pub struct NodeTimepointValue {
    status: Rc<RefCell<NodeStatus>>,
    state: NodeState,
}

impl NodeTimepointValue {
    pub fn new(status: Rc<RefCell<NodeStatus>>, state: NodeState) -> Self {
        NodeTimepointValue { status, state }
    }
}

impl Expression for NodeTimepointValue {
    fn value_type(&self) -> Typ {
        Typ::Real
    }

    fn is_known(&self, _graph: &ExprGraph) -> bool {
        self.status.borrow().latest_entry(self.state).is_some()
    }

    fn get_value(&self, _graph: &ExprGraph) -> Option<Value> {
        self.status.borrow().latest_entry(self.state).map(Value::Real)
    }

    always_active!();
}

/// A command's acknowledgement handle rendered as a string value, for
/// diagnostics and for expressions that want to branch on the exact handle
/// rather than just "has it ended".
#[derive(Debug)]
pub struct CommandHandleVariable {
    handle: Rc<RefCell<CommandHandle>>,
}

impl CommandHandleVariable {
    pub fn new(handle: Rc<RefCell<CommandHandle>>) -> Self {
        CommandHandleVariable { handle }
    }
}

impl Expression for CommandHandleVariable {
    fn value_type(&self) -> Typ {
        Typ::String
    }

    fn is_known(&self, _graph: &ExprGraph) -> bool {
        true
    }

    fn get_value(&self, _graph: &ExprGraph) -> Option<Value> {
        Some(Value::String(format!("{:?}", self.handle.borrow())))
    }

    always_active!();
}

/// The `AbortComplete` condition expression (spec.md section 4.4's
/// `abortHandle`): reads the same `Rc<RefCell<bool>>` the scheduler flips
/// true on `InboundEvent::AbortAck` (`CommandBody::abort_ack`). Starts
/// false, unlike the slot's documented "true unless installed" default
/// (section 3's condition-slot table), since a Command that has actually
/// dispatched an abort must wait for it.
#[derive(Debug)]
pub struct AbortAckVariable {
    abort_ack: Rc<RefCell<bool>>,
}

impl AbortAckVariable {
    pub fn new(abort_ack: Rc<RefCell<bool>>) -> Self {
        AbortAckVariable { abort_ack }
    }
}

impl Expression for AbortAckVariable {
    fn value_type(&self) -> Typ {
        Typ::Boolean
    }

    fn is_known(&self, _graph: &ExprGraph) -> bool {
        true
    }

    fn get_value(&self, _graph: &ExprGraph) -> Option<Value> {
        Some(Value::Boolean(*self.abort_ack.borrow()))
    }

    always_active!();
}

/// The implicit contributor to a Command's end condition: true once the
/// command handle reaches any of `{SENT_TO_SYSTEM, RCVD_BY_SYSTEM, SUCCESS,
/// FAILURE, DENIED}` (spec.md section 4.3).
#[derive(Debug)]
pub struct CommandHandleIsEnd {
    handle: Rc<RefCell<CommandHandle>>,
}

impl CommandHandleIsEnd {
    pub fn new(handle: Rc<RefCell<CommandHandle>>) -> Self {
        CommandHandleIsEnd { handle }
    }
}

impl Expression for CommandHandleIsEnd {
    fn value_type(&self) -> Typ {
        Typ::Boolean
    }

    fn is_known(&self, _graph: &ExprGraph) -> bool {
        true
    }

    fn get_value(&self, _graph: &ExprGraph) -> Option<Value> {
        Some(Value::Boolean(self.handle.borrow().is_end()))
    }

    always_active!();
}

/// `allChildrenFinished`: true iff every child is in `FINISHED` (spec.md
/// section 4.4). Shares its child-status list (`Rc<RefCell<Vec<_>>>`) with
/// `NodeBody::List`/`NodeBody::LibraryCall` rather than taking a fixed
/// `Vec` at construction time: `plan::PlanBuilder::add_child` appends to the
/// same `Rc` when a child is attached, which can happen after the parent
/// node (and its `all_children_finished` expression) already exists. The
/// scheduler's transition commit publishes a change on this expression's id
/// whenever a child reaches `FINISHED`
/// (`crate::node::transition::commit_transition`), since there is no
/// `Expression::children()` edge from this to the child `Node`s -- they
/// aren't expressions.
#[derive(Debug)]
pub struct AllChildrenFinished {
    children: Rc<RefCell<Vec<Rc<RefCell<NodeStatus>>>>>,
}

impl AllChildrenFinished {
    pub fn new(children: Rc<RefCell<Vec<Rc<RefCell<NodeStatus>>>>>) -> Self {
        AllChildrenFinished { children }
    }
}

impl Expression for AllChildrenFinished {
    fn value_type(&self) -> Typ {
        Typ::Boolean
    }

    fn is_known(&self, _graph: &ExprGraph) -> bool {
        true
    }

    fn get_value(&self, _graph: &ExprGraph) -> Option<Value> {
        Some(Value::Boolean(
            self.children.borrow().iter().all(|c| c.borrow().state == NodeState::Finished),
        ))
    }

    always_active!();
}
