//! The Node state machine (C3) and the plan tree that holds every node plus
//! the shared expression arena (spec.md section 3).

pub mod body;
pub mod internal_vars;
pub mod transition;

use crate::error::PlanError;
use crate::expr::op::{Op, Operator};
use crate::expr::vars::Constant;
use crate::expr::ExprGraph;
use crate::ids::{ExprId, ListenerId, NodeId, NodeKey};
use crate::scope::{Scope, ScopeHost};
use crate::value::Value;
use body::NodeBody;
use fxhash::FxHashMap;
use std::cell::RefCell;
use std::rc::Rc;

/// The six-state lifecycle (spec.md section 3). Declared in the order the
/// spec lists them; `NodeType::max_state` compares discriminants, not a
/// meaningful total order over "progress" (FAILING/FINISHING sit after
/// FINISHED in this list purely because that's the source enumeration
/// order, not because they are "later").
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(u8)]
pub enum NodeState {
    Inactive = 0,
    Waiting = 1,
    Executing = 2,
    IterationEnded = 3,
    Finished = 4,
    Failing = 5,
    Finishing = 6,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NodeOutcome {
    NoOutcome,
    Success,
    Failure,
    Skipped,
    Interrupted,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FailureType {
    NoFailure,
    PreConditionFailed,
    PostConditionFailed,
    InvariantConditionFailed,
    ParentFailed,
    Exited,
    ParentExited,
}

/// Command acknowledgement values delivered by the external interface
/// (spec.md section 6.2).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CommandHandle {
    SentToSystem,
    RcvdBySystem,
    Success,
    Failed,
    Denied,
    Aborted,
    AbortFailed,
    InterfaceError,
}

impl CommandHandle {
    /// Command handles that count as "the command has reached an end
    /// state" for the implicit end-condition wrapping (spec.md section
    /// 4.3's "implicit end = commandHandle in {SENT_TO_SYSTEM, ...}").
    pub fn is_end(self) -> bool {
        matches!(
            self,
            CommandHandle::SentToSystem
                | CommandHandle::RcvdBySystem
                | CommandHandle::Success
                | CommandHandle::Failed
                | CommandHandle::Denied
        )
    }

    pub fn failure(self) -> Option<FailureType> {
        match self {
            CommandHandle::Success | CommandHandle::SentToSystem | CommandHandle::RcvdBySystem => None,
            _ => Some(FailureType::InvariantConditionFailed),
        }
    }
}

/// The fixed, order-material list of gate-condition slots (spec.md section
/// 3). Ancestor slots precede their local counterparts so cleanup can tear
/// down in that order (P7).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConditionSlot {
    AncestorExit,
    AncestorInvariant,
    AncestorEnd,
    Skip,
    Start,
    Pre,
    Exit,
    Invariant,
    End,
    Post,
    Repeat,
    ActionComplete,
    AbortComplete,
}

impl ConditionSlot {
    pub const COUNT: usize = 13;

    pub const ALL: [ConditionSlot; Self::COUNT] = [
        ConditionSlot::AncestorExit,
        ConditionSlot::AncestorInvariant,
        ConditionSlot::AncestorEnd,
        ConditionSlot::Skip,
        ConditionSlot::Start,
        ConditionSlot::Pre,
        ConditionSlot::Exit,
        ConditionSlot::Invariant,
        ConditionSlot::End,
        ConditionSlot::Post,
        ConditionSlot::Repeat,
        ConditionSlot::ActionComplete,
        ConditionSlot::AbortComplete,
    ];

    pub fn index(self) -> usize {
        self as usize
    }

    /// The value used when a node has no expression installed in this slot
    /// (PLEXIL's documented condition defaults).
    pub fn default_value(self) -> bool {
        match self {
            ConditionSlot::AncestorExit => false,
            ConditionSlot::AncestorInvariant => true,
            ConditionSlot::AncestorEnd => false,
            ConditionSlot::Skip => false,
            ConditionSlot::Start => true,
            ConditionSlot::Pre => true,
            ConditionSlot::Exit => false,
            ConditionSlot::Invariant => true,
            ConditionSlot::End => true,
            ConditionSlot::Post => true,
            ConditionSlot::Repeat => false,
            ConditionSlot::ActionComplete => true,
            ConditionSlot::AbortComplete => true,
        }
    }
}

impl std::str::FromStr for ConditionSlot {
    type Err = PlanError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "ancestorExit" => ConditionSlot::AncestorExit,
            "ancestorInvariant" => ConditionSlot::AncestorInvariant,
            "ancestorEnd" => ConditionSlot::AncestorEnd,
            "skip" => ConditionSlot::Skip,
            "start" => ConditionSlot::Start,
            "pre" => ConditionSlot::Pre,
            "exit" => ConditionSlot::Exit,
            "invariant" => ConditionSlot::Invariant,
            "end" => ConditionSlot::End,
            "post" => ConditionSlot::Post,
            "repeat" => ConditionSlot::Repeat,
            "actionComplete" => ConditionSlot::ActionComplete,
            "abortComplete" => ConditionSlot::AbortComplete,
            other => return Err(PlanError::UnknownConditionSlot(other.to_string())),
        })
    }
}

impl std::fmt::Display for ConditionSlot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ConditionSlot::AncestorExit => "ancestorExit",
            ConditionSlot::AncestorInvariant => "ancestorInvariant",
            ConditionSlot::AncestorEnd => "ancestorEnd",
            ConditionSlot::Skip => "skip",
            ConditionSlot::Start => "start",
            ConditionSlot::Pre => "pre",
            ConditionSlot::Exit => "exit",
            ConditionSlot::Invariant => "invariant",
            ConditionSlot::End => "end",
            ConditionSlot::Post => "post",
            ConditionSlot::Repeat => "repeat",
            ConditionSlot::ActionComplete => "actionComplete",
            ConditionSlot::AbortComplete => "abortComplete",
        };
        write!(f, "{s}")
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NodeType {
    Empty,
    Assignment,
    Command,
    Update,
    NodeList,
    LibraryCall,
}

impl NodeType {
    pub fn max_state(self) -> NodeState {
        match self {
            // Empty still passes through FAILING (an ancestor-invariant or
            // invariant violation while EXECUTING sends any node type there);
            // only FINISHING is specific to the three body kinds below that
            // wait on an external action or child subtree to settle.
            NodeType::Empty => NodeState::Failing,
            NodeType::Assignment => NodeState::Failing,
            NodeType::Command => NodeState::Finishing,
            NodeType::Update => NodeState::Failing,
            NodeType::NodeList => NodeState::Finishing,
            NodeType::LibraryCall => NodeState::Finishing,
        }
    }
}

/// One entry in a node's timepoint history: every time it entered `state`,
/// at `time`. Kept as a full log rather than a latest-only slot because
/// scenario tests (spec.md section 8, scenario 3) assert the count of
/// entries for a repeated state, not just the most recent one.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Timepoint {
    pub state: NodeState,
    pub time: f64,
}

/// The mutable core of a node's lifecycle, shared (via `Rc<RefCell<_>>`)
/// between the `Node` that owns it and the `StateVariable`/`OutcomeVariable`/
/// `FailureVariable`/`NodeTimepointValue` expressions that read it. Kept
/// separate from `Node` itself so `crate::node::internal_vars` (which
/// implements `Expression` for those four types) can depend only on this
/// small struct instead of the whole `Node`/`Plan` graph -- `crate::expr`
/// stays unaware that `crate::node` exists at all.
#[derive(Debug)]
pub struct NodeStatus {
    pub state: NodeState,
    pub outcome: NodeOutcome,
    pub failure: FailureType,
    pub timepoints: Vec<Timepoint>,
}

impl NodeStatus {
    pub fn new() -> Self {
        NodeStatus {
            state: NodeState::Inactive,
            outcome: NodeOutcome::NoOutcome,
            failure: FailureType::NoFailure,
            timepoints: Vec::new(),
        }
    }

    pub fn latest_entry(&self, state: NodeState) -> Option<f64> {
        self.timepoints.iter().rev().find(|t| t.state == state).map(|t| t.time)
    }

    pub fn count_entries(&self, state: NodeState) -> usize {
        self.timepoints.iter().filter(|t| t.state == state).count()
    }
}

impl Default for NodeStatus {
    fn default() -> Self {
        Self::new()
    }
}

/// At most one pending queue membership per queue, so the scheduler never
/// enqueues the same node twice in the same cycle (spec.md section 4.5:
/// "Each node carries a queue-status byte").
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct QueueStatus {
    pub in_check_conditions: bool,
    pub in_transition: bool,
    pub in_assignment: bool,
}

#[derive(Debug)]
pub struct Node {
    pub id: NodeId,
    pub node_type: NodeType,
    pub parent: Option<NodeKey>,
    pub children: Vec<NodeKey>,
    pub conditions: [Option<ExprId>; ConditionSlot::COUNT],
    pub condition_owned: [bool; ConditionSlot::COUNT],
    pub scope: Scope,
    pub status: Rc<RefCell<NodeStatus>>,
    pub body: NodeBody,
    pub queue_status: QueueStatus,
    pub pending_state: Option<NodeState>,
    pub pending_outcome: Option<NodeOutcome>,
    pub pending_failure: Option<FailureType>,
    pub finalized: bool,
    /// Expressions this node owns but that aren't referenced directly by a
    /// `conditions` slot or the `scope` map -- e.g. a user End condition
    /// that `PlanBuilder::finalize_conditions` wrapped in an `And` (the
    /// wrapper, not the original, is what `conditions[End]` now points at),
    /// or a caller-owned alias installed via `PlanBuilder::add_alias`.
    /// `teardown` removes these alongside the slots it already knows about.
    pub extra_owned: Vec<ExprId>,
    timepoint_cache: FxHashMap<NodeState, ExprId>,
    /// Lazily-built `StateVariable`/`OutcomeVariable`/`FailureVariable`
    /// references against this node's own `status` (spec.md section 3),
    /// built on first reference by `Plan::ensure_state_variable` and its
    /// siblings rather than eagerly at node creation -- most nodes are never
    /// referenced by another node's condition.
    state_var: Option<ExprId>,
    outcome_var: Option<ExprId>,
    failure_var: Option<ExprId>,
    /// Lazily-built `Or(exit, ancestorExit)` / `And(invariant, ancestorInvariant)` /
    /// `Or(end, ancestorEnd)` expressions, in that order, shared by every
    /// child this node has (spec.md section 4.2: "Ancestor conditions, as
    /// seen by a child, refer to the parent's expression objects; they are
    /// not cloned"). Built once on first child attachment
    /// (`Plan::add_child`), not per child -- see `Plan::ensure_ancestor_combinators`.
    ancestor_combinators: [Option<ExprId>; 3],
}

impl Node {
    pub fn new(id: NodeId, node_type: NodeType, parent: Option<NodeKey>, body: NodeBody) -> Self {
        Node {
            id,
            node_type,
            parent,
            children: Vec::new(),
            conditions: [None; ConditionSlot::COUNT],
            condition_owned: [false; ConditionSlot::COUNT],
            scope: Scope::new(),
            status: Rc::new(RefCell::new(NodeStatus::new())),
            body,
            queue_status: QueueStatus::default(),
            pending_state: None,
            pending_outcome: None,
            pending_failure: None,
            finalized: false,
            extra_owned: Vec::new(),
            timepoint_cache: FxHashMap::default(),
            state_var: None,
            outcome_var: None,
            failure_var: None,
            ancestor_combinators: [None; 3],
        }
    }

    pub fn state(&self) -> NodeState {
        self.status.borrow().state
    }

    pub fn outcome(&self) -> NodeOutcome {
        self.status.borrow().outcome
    }

    pub fn failure(&self) -> FailureType {
        self.status.borrow().failure
    }

    pub fn condition(&self, slot: ConditionSlot) -> Option<ExprId> {
        self.conditions[slot.index()]
    }
}

/// The full execution tree plus the shared expression arena. Analogous to
/// the teacher's `ExecCtx<R, E>` bundling `Env` and `Rt` in one place rather
/// than making every call site thread two objects through separately.
pub struct Plan {
    nodes: FxHashMap<NodeKey, Node>,
    pub exprs: ExprGraph,
    root: Option<NodeKey>,
}

impl Default for Plan {
    fn default() -> Self {
        Self::new()
    }
}

impl Plan {
    pub fn new() -> Self {
        Plan { nodes: FxHashMap::default(), exprs: ExprGraph::new(), root: None }
    }

    pub fn root(&self) -> Option<NodeKey> {
        self.root
    }

    pub fn set_root(&mut self, key: NodeKey) {
        self.root = Some(key);
    }

    pub fn insert_node(&mut self, key: NodeKey, node: Node) {
        self.nodes.insert(key, node);
    }

    pub fn node(&self, key: NodeKey) -> Option<&Node> {
        self.nodes.get(&key)
    }

    pub fn node_mut(&mut self, key: NodeKey) -> Option<&mut Node> {
        self.nodes.get_mut(&key)
    }

    pub fn keys(&self) -> impl Iterator<Item = NodeKey> + '_ {
        self.nodes.keys().copied()
    }

    /// Live value of a gate condition slot, falling back to the slot's
    /// documented default when the node has no expression installed there.
    pub fn condition_value(&self, key: NodeKey, slot: ConditionSlot) -> Option<bool> {
        let node = self.nodes.get(&key)?;
        match node.condition(slot) {
            Some(id) => self.exprs.get_value(id).and_then(|v| v.as_bool()),
            None => Some(slot.default_value()),
        }
    }

    pub fn children_finished(&self, key: NodeKey) -> bool {
        let Some(node) = self.nodes.get(&key) else { return true };
        node.children.iter().all(|c| {
            self.nodes.get(c).map(|n| n.state() == NodeState::Finished).unwrap_or(true)
        })
    }

    /// Tear down a node: conditions before variables, ancestor-slot wrappers
    /// before the local expressions they wrap (P7). Only expressions this
    /// node owns (`condition_owned`/the scope's declared variables, which
    /// are always owned) are removed from the arena; aliased/shared
    /// expressions are left for their real owner.
    ///
    /// This node's own `ancestor_combinators` (the `Or`/`And` wrappers built
    /// for *its* children by `ensure_ancestor_combinators`) are removed
    /// before anything else, since they read this node's own local
    /// exit/invariant/end expressions as children (P7: "ancestor-slot
    /// wrappers are released before the inner local-condition expressions
    /// they wrap").
    pub fn teardown(&mut self, key: NodeKey) {
        let Some(node) = self.nodes.remove(&key) else { return };
        for id in node.ancestor_combinators.into_iter().flatten() {
            self.exprs.remove(id);
        }
        for slot in ConditionSlot::ALL {
            let idx = slot.index();
            if let Some(id) = node.conditions[idx] {
                self.exprs.remove_listener(id, ListenerId::Node(key));
                if node.condition_owned[idx] {
                    self.exprs.remove(id);
                }
            }
        }
        for id in node.scope.owned_iter() {
            self.exprs.remove(id);
        }
        for id in node.extra_owned {
            self.exprs.remove(id);
        }
        for child in node.children {
            self.teardown(child);
        }
    }

    /// Lazily allocate and cache the expression for "this node entered
    /// `state`" (spec.md section 3, PLEXIL's `ensureTimepoint`/section
    /// `Supplemented features` #1 of SPEC_FULL.md). Returns the same id on
    /// every call for a given `(node, state)` pair.
    pub fn ensure_timepoint(&mut self, key: NodeKey, state: NodeState) -> Option<ExprId> {
        let node = self.nodes.get(&key)?;
        if let Some(id) = node.timepoint_cache.get(&state) {
            return Some(*id);
        }
        let status = Rc::clone(&node.status);
        let id = ExprId::next();
        self.exprs.insert(
            id,
            Box::new(internal_vars::NodeTimepointValue::new(status, state)),
            true,
        );
        self.nodes.get_mut(&key).unwrap().timepoint_cache.insert(state, id);
        Some(id)
    }

    /// Lazily allocate and cache the `StateVariable` reading `key`'s own
    /// status (spec.md section 3, always active per section 4.1). Returns
    /// the same id on every call for a given node, so two conditions that
    /// both reference the same node's state share one expression.
    pub fn ensure_state_variable(&mut self, key: NodeKey) -> Option<ExprId> {
        let node = self.nodes.get(&key)?;
        if let Some(id) = node.state_var {
            return Some(id);
        }
        let status = Rc::clone(&node.status);
        let id = ExprId::next();
        self.exprs.insert(id, Box::new(internal_vars::StateVariable::new(status)), true);
        self.nodes.get_mut(&key).unwrap().state_var = Some(id);
        Some(id)
    }

    /// Lazily allocate and cache the `OutcomeVariable` reading `key`'s own
    /// status (spec.md section 3).
    pub fn ensure_outcome_variable(&mut self, key: NodeKey) -> Option<ExprId> {
        let node = self.nodes.get(&key)?;
        if let Some(id) = node.outcome_var {
            return Some(id);
        }
        let status = Rc::clone(&node.status);
        let id = ExprId::next();
        self.exprs.insert(id, Box::new(internal_vars::OutcomeVariable::new(status)), true);
        self.nodes.get_mut(&key).unwrap().outcome_var = Some(id);
        Some(id)
    }

    /// Lazily allocate and cache the `FailureVariable` reading `key`'s own
    /// status (spec.md section 3).
    pub fn ensure_failure_variable(&mut self, key: NodeKey) -> Option<ExprId> {
        let node = self.nodes.get(&key)?;
        if let Some(id) = node.failure_var {
            return Some(id);
        }
        let status = Rc::clone(&node.status);
        let id = ExprId::next();
        self.exprs.insert(id, Box::new(internal_vars::FailureVariable::new(status)), true);
        self.nodes.get_mut(&key).unwrap().failure_var = Some(id);
        Some(id)
    }

    /// Lazily allocate and cache the `CommandHandleVariable` reading `key`'s
    /// raw command handle (spec.md section 3). Only meaningful for a
    /// `NodeType::Command` node; `None` for any other body.
    pub fn ensure_command_handle_variable(&mut self, key: NodeKey) -> Option<ExprId> {
        let node = self.nodes.get(&key)?;
        let NodeBody::Command(body) = &node.body else { return None };
        if let Some(id) = body.handle_var {
            return Some(id);
        }
        let handle = Rc::clone(&body.handle);
        let id = ExprId::next();
        self.exprs.insert(id, Box::new(internal_vars::CommandHandleVariable::new(handle)), true);
        let NodeBody::Command(body) = &mut self.nodes.get_mut(&key).unwrap().body else {
            unreachable!()
        };
        body.handle_var = Some(id);
        Some(id)
    }

    /// Lazily build (and cache on `parent`) the three combined-ancestor
    /// condition expressions every child attached to `parent` will share:
    /// `Or(exit, ancestorExit)`, `And(invariant, ancestorInvariant)`,
    /// `Or(end, ancestorEnd)` in that order (spec.md section 4.2/4.3).
    ///
    /// Requires `parent`'s own ancestor condition slots to already reflect
    /// its true position in the tree -- i.e. `add_child(grandparent,
    /// parent)` must have already run if `parent` itself has a parent. The
    /// plan-builder API is built top-down (attach a node to its parent
    /// before attaching that node's own children) specifically so this
    /// precondition always holds; see DESIGN.md.
    fn ensure_ancestor_combinators(&mut self, parent: NodeKey) -> [ExprId; 3] {
        if let Some([Some(a), Some(b), Some(c)]) =
            self.nodes.get(&parent).map(|n| n.ancestor_combinators)
        {
            return [a, b, c];
        }
        let wrap = |plan: &mut Plan, local: ConditionSlot, ancestor: ConditionSlot, op: Op| {
            let a = plan.local_or_default(parent, local);
            let b = plan.local_or_default(parent, ancestor);
            let id = ExprId::next();
            plan.exprs.insert(id, Box::new(Operator::new(op, crate::value::Typ::Boolean, vec![a, b])), true);
            id
        };
        let exit = wrap(self, ConditionSlot::Exit, ConditionSlot::AncestorExit, Op::Or);
        let invariant = wrap(self, ConditionSlot::Invariant, ConditionSlot::AncestorInvariant, Op::And);
        let end = wrap(self, ConditionSlot::End, ConditionSlot::AncestorEnd, Op::Or);
        self.nodes.get_mut(&parent).unwrap().ancestor_combinators = [Some(exit), Some(invariant), Some(end)];
        [exit, invariant, end]
    }

    /// `node`'s own condition expression for `slot`, or a freshly inserted
    /// constant carrying the slot's documented default if none is installed.
    fn local_or_default(&mut self, node: NodeKey, slot: ConditionSlot) -> ExprId {
        if let Some(id) = self.nodes.get(&node).and_then(|n| n.condition(slot)) {
            return id;
        }
        let id = ExprId::next();
        self.exprs.insert(id, Box::new(Constant::new(Value::Boolean(slot.default_value()))), true);
        id
    }

    /// Attach `child` to `parent`'s children and wire `child`'s three
    /// ancestor condition slots to `parent`'s (lazily built, shared)
    /// combinators (spec.md section 6.1, `ListNode.addChild`). Does not
    /// activate `child`; activation happens when `parent` itself transitions
    /// into a state that activates its children (section 4.4).
    pub fn add_child(&mut self, parent: NodeKey, child: NodeKey) {
        let [exit, invariant, end] = self.ensure_ancestor_combinators(parent);
        if let Some(node) = self.nodes.get_mut(&child) {
            node.conditions[ConditionSlot::AncestorExit.index()] = Some(exit);
            node.conditions[ConditionSlot::AncestorInvariant.index()] = Some(invariant);
            node.conditions[ConditionSlot::AncestorEnd.index()] = Some(end);
            node.condition_owned[ConditionSlot::AncestorExit.index()] = false;
            node.condition_owned[ConditionSlot::AncestorInvariant.index()] = false;
            node.condition_owned[ConditionSlot::AncestorEnd.index()] = false;
        }
        if let Some(node) = self.nodes.get_mut(&parent) {
            node.children.push(child);
        }
    }
}

impl ScopeHost for Plan {
    fn scope_of(&self, key: NodeKey) -> Option<&Scope> {
        self.nodes.get(&key).map(|n| &n.scope)
    }

    fn parent_of(&self, key: NodeKey) -> Option<NodeKey> {
        self.nodes.get(&key).and_then(|n| n.parent)
    }

    fn blocks_ancestor_lookup(&self, key: NodeKey) -> bool {
        self.nodes.get(&key).map(|n| n.node_type == NodeType::LibraryCall).unwrap_or(false)
    }
}
