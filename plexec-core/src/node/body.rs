//! Node body specializations (C4): the typed payload each node type carries
//! in addition to the common `Node` fields (spec.md section 4.4).

use super::CommandHandle;
use crate::ids::ExprId;
use std::cell::RefCell;
use std::rc::Rc;

/// Sentinel used by the scheduler when comparing priorities with "no
/// assignment seen yet" (originally `WORST_PRIORITY` in the PLEXIL source).
/// Not the declared-priority default for a fresh `AssignmentBody`, which
/// spec.md section 4.4 fixes at `0`; this is strictly a comparison base the
/// conflict-resolution pass starts from -- see `priority_of`, which is what
/// actually reads it in `plexec-rt`'s `drain_q3`.
pub const WORST_PRIORITY: i32 = i32::MIN;

/// A node's priority for assignment-conflict resolution (spec.md section
/// 4.5.1): an `AssignmentBody`'s own declared priority, or `WORST_PRIORITY`
/// for any other body so a non-Assignment node can never accidentally win a
/// conflict over a variable it has no `dest` in (SPEC_FULL.md's "supplemented
/// features" #2, `Node::getPriority`'s default in the original source).
pub fn priority_of(body: &NodeBody) -> i32 {
    match body {
        NodeBody::Assignment(b) => b.priority,
        _ => WORST_PRIORITY,
    }
}

/// `{ destExpr, rhsExpr, priority, ackVariable }` (spec.md section 4.4).
/// The source's optional `retractionExpr?` is not carried here: nothing in
/// SPEC_FULL.md's scheduler or scenario set ever retracts a committed
/// assignment, and an always-`None` field with no builder path to set it is
/// worse than no field at all -- see DESIGN.md.
#[derive(Debug)]
pub struct AssignmentBody {
    pub dest: ExprId,
    pub rhs: ExprId,
    pub priority: i32,
    pub ack: ExprId,
}

impl AssignmentBody {
    pub fn new(dest: ExprId, rhs: ExprId, ack: ExprId) -> Self {
        AssignmentBody { dest, rhs, priority: 0, ack }
    }
}

/// `{ name, priority, [lowerBound, upperBound, releaseAtTermination] }`
/// (spec.md section 4.4 / 6.3).
#[derive(Debug, Clone)]
pub struct ResourceRequest {
    pub name: ExprId,
    pub priority: i32,
    pub lower_bound: Option<ExprId>,
    pub upper_bound: Option<ExprId>,
    pub release_at_termination: bool,
}

/// `{ nameExpr, argExprs, resourceExprs, destExpr?, commandHandle, abortHandle }`
/// (spec.md section 4.4).
#[derive(Debug)]
pub struct CommandBody {
    pub name: ExprId,
    pub args: Vec<ExprId>,
    pub resources: Vec<ResourceRequest>,
    pub dest: Option<ExprId>,
    pub handle: Rc<RefCell<CommandHandle>>,
    /// The `CommandHandleIsEnd` expression reading `handle` (spec.md section
    /// 4.3: "implicit end = commandHandle in {...}"). Reused verbatim as
    /// both the implicit End-condition contributor (`finalize_conditions`)
    /// and the `ActionComplete` slot installed at node creation -- spec.md's
    /// own wording, "action-complete gates FAILING->ITERATION_ENDED", never
    /// distinguishes a second predicate, so this implementation takes that
    /// literally rather than inventing an abort-specific one (see
    /// DESIGN.md). `PlanBuilder::create_node` builds it once so the
    /// scheduler has a single id to `publishChange` on when a new
    /// `CommandHandle` arrives.
    pub handle_is_end: ExprId,
    /// Cached `CommandHandleVariable` reference, built on first use by
    /// `PlanBuilder::command_handle_ref` (spec.md section 3) -- `None` until
    /// some condition in the plan actually reads this command's raw handle.
    pub handle_var: Option<ExprId>,
    /// `abortHandle` (spec.md section 4.4): set true once the interface
    /// acknowledges an abort request dispatched on entering `Failing`.
    /// Backs the `AbortComplete` condition expression at `abort_complete`.
    pub abort_ack: Rc<RefCell<bool>>,
    /// The `AbortComplete` slot's expression, reading `abort_ack` (spec.md
    /// section 4.3's `Failing` row for Command: action-complete alone
    /// settles the handle the command was already waiting on, but a Command
    /// that entered `Failing` by way of an abort must also wait for that
    /// abort itself to be acknowledged before leaving `Failing`).
    pub abort_complete: ExprId,
}

impl CommandBody {
    pub fn new(
        name: ExprId,
        handle: Rc<RefCell<CommandHandle>>,
        handle_is_end: ExprId,
        abort_ack: Rc<RefCell<bool>>,
        abort_complete: ExprId,
    ) -> Self {
        CommandBody {
            name,
            args: Vec::new(),
            resources: Vec::new(),
            dest: None,
            handle,
            handle_is_end,
            handle_var: None,
            abort_ack,
            abort_complete,
        }
    }
}

/// `{ ackVariable, pairs }` (spec.md section 4.4).
#[derive(Debug)]
pub struct UpdateBody {
    pub ack: ExprId,
    pub pairs: Vec<(String, ExprId)>,
}

impl UpdateBody {
    pub fn new(ack: ExprId) -> Self {
        UpdateBody { ack, pairs: Vec::new() }
    }
}

/// `List`/`LibraryCall` payload: just the `allChildrenFinished` aggregate
/// expression id (spec.md section 4.4). The children themselves live in
/// `Node::children`, shared by every node type that owns children; a
/// `LibraryCall`'s alias map is just that node's `Scope` (spec.md section
/// 4.2 already treats alias resolution as ordinary scope lookup gated by
/// `ScopeHost::blocks_ancestor_lookup`).
#[derive(Debug)]
pub struct ListBody {
    pub all_children_finished: ExprId,
    /// Backing store for the `AllChildrenFinished` expression at
    /// `all_children_finished`; `PlanBuilder::add_child` pushes onto this
    /// directly when a child is attached.
    pub child_statuses: Rc<RefCell<Vec<Rc<RefCell<super::NodeStatus>>>>>,
}

/// Typed per-node payload.
#[derive(Debug)]
pub enum NodeBody {
    Empty,
    Assignment(AssignmentBody),
    Command(CommandBody),
    Update(UpdateBody),
    List(ListBody),
    LibraryCall(ListBody),
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ids::ExprId;

    #[test]
    fn priority_of_reads_assignment_priority() {
        let body = NodeBody::Assignment(AssignmentBody {
            dest: ExprId::next(),
            rhs: ExprId::next(),
            priority: 7,
            ack: ExprId::next(),
        });
        assert_eq!(priority_of(&body), 7);
    }

    #[test]
    fn priority_of_defaults_to_worst_for_non_assignment_bodies() {
        assert_eq!(priority_of(&NodeBody::Empty), WORST_PRIORITY);
        let update = NodeBody::Update(UpdateBody::new(ExprId::next()));
        assert_eq!(priority_of(&update), WORST_PRIORITY);
    }
}
