//! The per-type state transition specializations (spec.md section 4.3).
//!
//! Mirrors the shape the original PLEXIL `Node` class uses --
//! `getDestStateFrom*`/`transitionFrom*`/`transitionTo*` per current state,
//! overridden per node type for `Executing`/`Finishing`/`Failing` -- but
//! expressed as the "closed tagged-variant plus per-variant specialization
//! table" section 9's design notes recommend instead of a class hierarchy:
//! [`get_dest_state`] switches on `node.node_type` only inside the
//! `Executing`/`Failing` arms, where the specializations actually diverge.
//!
//! [`get_dest_state`] is side-effect free (P3: idempotent, no observable
//! side effects) and only ever consults condition values and the node's own
//! recorded failure; [`commit_transition`] is the only function that mutates
//! a `Node`'s status or conditions, and it is what records a [`super::Timepoint`].

use super::body::NodeBody;
use super::{ConditionSlot, FailureType, NodeOutcome, NodeState, NodeType, Plan};
use crate::ids::{ListenerId, NodeKey};

/// What `get_dest_state` proposes: a new state plus, where the transition
/// table fixes them, the outcome/failure to go with it. `None` in either
/// field means "leave the current value alone" (e.g. `Finished` reached
/// from `IterationEnded` via `repeat=false` carries forward whatever
/// outcome/failure the iteration already settled on).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DestState {
    pub state: NodeState,
    pub outcome: Option<NodeOutcome>,
    pub failure: Option<FailureType>,
}

impl DestState {
    fn new(state: NodeState) -> Self {
        DestState { state, outcome: None, failure: None }
    }

    fn with(state: NodeState, outcome: NodeOutcome, failure: FailureType) -> Self {
        DestState { state, outcome: Some(outcome), failure: Some(failure) }
    }
}

/// Read a gate condition's current value, falling back to the slot's
/// documented default when nothing is installed (spec.md section 3's
/// condition-slot table; `Plan::condition_value` already implements the
/// fallback). Returns `None` if the condition is installed but not yet
/// known -- callers propagate that with `?`, which is exactly P2's
/// "if all gate conditions are known" qualifier.
fn cond(plan: &Plan, key: NodeKey, slot: ConditionSlot) -> Option<bool> {
    plan.condition_value(key, slot)
}

/// Recompute `key`'s destination and cache it in `Node::pending_state`/
/// `pending_outcome`/`pending_failure` (spec.md section 4.3: "getDestState
/// is side-effect free and sets only the pending fields; transition commits
/// them"). Returns `true` iff a transition is now due, which is exactly
/// what Q1's drain uses to decide whether to push the node onto Q2 (section
/// 4.5 step 1). Calling this again with no intervening condition change
/// recomputes and stores the identical pending fields (P3).
pub fn get_dest_state(plan: &mut Plan, key: NodeKey) -> bool {
    let dest = compute_dest(plan, key);
    let Some(node) = plan.node_mut(key) else { return false };
    match dest {
        Some(d) => {
            node.pending_state = Some(d.state);
            node.pending_outcome = d.outcome;
            node.pending_failure = d.failure;
            true
        }
        None => {
            node.pending_state = None;
            node.pending_outcome = None;
            node.pending_failure = None;
            false
        }
    }
}

/// Side-effect-free destination computation (spec.md section 4.3's table;
/// P2, P3). Returns `None` when the node should stay put this cycle --
/// either because no gate fired, or because a needed condition is not yet
/// known.
fn compute_dest(plan: &Plan, key: NodeKey) -> Option<DestState> {
    let node = plan.node(key)?;
    let node_type = node.node_type;
    match node.state() {
        // Inactive -> Waiting is driven by the parent (root activation by
        // the scheduler, or a List/LibraryCall activating its children on
        // entering Executing), never by this node's own conditions.
        NodeState::Inactive => None,

        NodeState::Waiting => {
            let skip = cond(plan, key, ConditionSlot::Skip)?;
            let ancestor_exit = cond(plan, key, ConditionSlot::AncestorExit)?;
            let ancestor_invariant = cond(plan, key, ConditionSlot::AncestorInvariant)?;
            if skip {
                return Some(DestState::with(
                    NodeState::Finished,
                    NodeOutcome::Skipped,
                    FailureType::NoFailure,
                ));
            }
            if ancestor_exit {
                return Some(DestState::with(
                    NodeState::Finished,
                    NodeOutcome::Interrupted,
                    FailureType::ParentExited,
                ));
            }
            if !ancestor_invariant {
                return Some(DestState::with(
                    NodeState::Finished,
                    NodeOutcome::Failure,
                    FailureType::ParentFailed,
                ));
            }
            let start = cond(plan, key, ConditionSlot::Start)?;
            if !start {
                return None;
            }
            let pre = cond(plan, key, ConditionSlot::Pre)?;
            if pre {
                Some(DestState::new(NodeState::Executing))
            } else {
                Some(DestState::with(
                    NodeState::IterationEnded,
                    NodeOutcome::Failure,
                    FailureType::PreConditionFailed,
                ))
            }
        }

        NodeState::Executing => {
            // Precedence fixed by spec.md section 4.3: ancestor-exit > exit
            // > ancestor-invariant > invariant > end.
            if cond(plan, key, ConditionSlot::AncestorExit)? {
                return Some(DestState::with(
                    NodeState::Failing,
                    NodeOutcome::Interrupted,
                    FailureType::ParentExited,
                ));
            }
            if cond(plan, key, ConditionSlot::Exit)? {
                return Some(DestState::with(
                    NodeState::Failing,
                    NodeOutcome::Interrupted,
                    FailureType::Exited,
                ));
            }
            if !cond(plan, key, ConditionSlot::AncestorInvariant)? {
                return Some(DestState::with(
                    NodeState::Failing,
                    NodeOutcome::Failure,
                    FailureType::ParentFailed,
                ));
            }
            if !cond(plan, key, ConditionSlot::Invariant)? {
                return Some(DestState::with(
                    NodeState::Failing,
                    NodeOutcome::Failure,
                    FailureType::InvariantConditionFailed,
                ));
            }
            if !cond(plan, key, ConditionSlot::End)? {
                return None;
            }
            match node_type {
                NodeType::NodeList | NodeType::Command | NodeType::LibraryCall => {
                    Some(DestState::new(NodeState::Finishing))
                }
                NodeType::Empty | NodeType::Assignment | NodeType::Update => {
                    end_with_post(plan, key)
                }
            }
        }

        NodeState::Finishing => {
            if !cond(plan, key, ConditionSlot::ActionComplete)? {
                return None;
            }
            // A Command whose handle itself reports failure (e.g. COMMAND_FAILED)
            // must end FAILURE with that failure cause, not fall through to the
            // ordinary post-condition check -- spec.md section 8 scenario 5:
            // "FAILURE with failure derived from handle (COMMAND_FAILED =>
            // INVARIANT_CONDITION_FAILED)". `CommandHandle::failure` is `None`
            // for a handle that ended cleanly (Success/SentToSystem/RcvdBySystem),
            // in which case the ordinary post-condition path still applies.
            if let NodeBody::Command(b) = &node.body {
                if let Some(failure) = b.handle.borrow().failure() {
                    return Some(DestState::with(NodeState::IterationEnded, NodeOutcome::Failure, failure));
                }
            }
            end_with_post(plan, key)
        }

        NodeState::Failing => {
            if !cond(plan, key, ConditionSlot::ActionComplete)? {
                return None;
            }
            // A Command that entered Failing must also wait for its own
            // abort to be acknowledged, not just for the handle it was
            // already waiting on to settle (spec.md section 4.4's
            // `abortHandle`; see `CommandBody::abort_complete`).
            if node_type == NodeType::Command && !cond(plan, key, ConditionSlot::AbortComplete)? {
                return None;
            }
            let failure = node.failure();
            if matches!(failure, FailureType::ParentFailed | FailureType::ParentExited) {
                Some(DestState::new(NodeState::Finished))
            } else {
                Some(DestState::new(NodeState::IterationEnded))
            }
        }

        NodeState::IterationEnded => {
            let ancestor_exit = cond(plan, key, ConditionSlot::AncestorExit)?;
            let ancestor_invariant = cond(plan, key, ConditionSlot::AncestorInvariant)?;
            if ancestor_exit || !ancestor_invariant {
                return Some(DestState::new(NodeState::Finished));
            }
            let repeat = cond(plan, key, ConditionSlot::Repeat)?;
            if repeat {
                Some(DestState {
                    state: NodeState::Waiting,
                    outcome: Some(NodeOutcome::NoOutcome),
                    failure: Some(FailureType::NoFailure),
                })
            } else {
                Some(DestState::new(NodeState::Finished))
            }
        }

        // Finished is terminal until the parent resets it to Inactive
        // (section 4.3's final arrow); that reset is driven externally
        // (repeat of an enclosing List), not by this node's own conditions.
        NodeState::Finished => None,
    }
}

fn end_with_post(plan: &Plan, key: NodeKey) -> Option<DestState> {
    let post = cond(plan, key, ConditionSlot::Post)?;
    if post {
        Some(DestState::with(NodeState::IterationEnded, NodeOutcome::Success, FailureType::NoFailure))
    } else {
        Some(DestState::with(
            NodeState::IterationEnded,
            NodeOutcome::Failure,
            FailureType::PostConditionFailed,
        ))
    }
}

/// The condition slots a node listens to while sitting in a given state,
/// per node type. Driving `activate`/`deactivate` off this table (rather
/// than activating every slot all the time) is what keeps e.g. a `skip`
/// condition's listeners from firing spuriously once a node has moved past
/// `Waiting`.
///
/// This table is this implementation's resolution of the open question
/// section 9 flags about `Finishing`'s exact listened set for List vs.
/// Command: both keep listening to the exit/invariant family (so the kill
/// path still fires while children are settling, or while a command awaits
/// its handle), which is the conservative reading of "Both are modeled
/// uniformly here; do not collapse" -- see DESIGN.md.
fn active_slots_for(node_type: NodeType, state: NodeState) -> &'static [ConditionSlot] {
    use ConditionSlot::*;
    use NodeState::*;
    match state {
        Inactive => &[],
        Waiting => &[AncestorExit, AncestorInvariant, Skip, Start, Pre],
        Executing => &[AncestorExit, Exit, AncestorInvariant, Invariant, End, Post],
        Finishing => match node_type {
            NodeType::Command => {
                &[AncestorExit, Exit, AncestorInvariant, Invariant, ActionComplete, AbortComplete, Post]
            }
            _ => &[AncestorExit, Exit, AncestorInvariant, Invariant, ActionComplete, Post],
        },
        Failing => match node_type {
            NodeType::Command => &[ActionComplete, AbortComplete],
            _ => &[ActionComplete],
        },
        IterationEnded => &[AncestorExit, AncestorInvariant, Repeat],
        Finished => &[],
    }
}

/// An external effect `commit_transition` determined must be kicked off as
/// part of landing in the new state. The scheduler (`plexec-rt`) is what
/// actually owns an `ExternalInterface`; this crate only ever says *that*
/// an effect is due, never drives it itself (section 5: "executeCommand,
/// performAssignment, performUpdate MUST NOT invoke scheduler entry points
/// re-entrantly" -- keeping `plexec-core` interface-agnostic is what makes
/// that non-reentrancy trivially true rather than a discipline to maintain).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeAction {
    /// Entering `Executing`: the body should evaluate its RHS/args/pairs and
    /// call the matching `ExternalInterface` method.
    Start,
    /// Entering `Failing` on a `Command` node: `abortCommand` must be
    /// invoked (spec.md's "Supplemented features" #5; plain Assignment/
    /// Update/List have nothing to abort).
    Abort,
}

/// Everything the scheduler needs to do in response to a committed
/// transition, beyond the state/outcome/failure/timepoint bookkeeping
/// `commit_transition` already did itself.
#[derive(Debug, Default)]
pub struct CommitEffects {
    /// Children that must themselves be driven `Inactive -> Waiting` because
    /// this node just entered `Executing` as a `NodeList`/`LibraryCall`
    /// (section 4.3's per-type note; the generic table's first arrow).
    pub activate_children: Vec<NodeKey>,
    /// An external effect this node's body must now kick off.
    pub action: Option<NodeAction>,
    /// Newly enqueue-worthy listeners: every node that was listening to a
    /// condition expression that got (de)activated as a side effect, since
    /// activation can itself flip an expression's `is_known` and so its
    /// listeners need a fresh look (Q1 reseed, section 4.5 step 2 "for
    /// children activated by a parent transition, enqueue them on Q1").
    pub reenqueue: Vec<NodeKey>,
}

/// Commit whatever destination the last `get_dest_state` call cached in
/// `Node::pending_state` (section 4.5 step 2, Q2's drain). Panics if no
/// pending destination is cached -- the scheduler must only ever push a
/// node onto Q2 right after `get_dest_state` returned `true` for it.
pub fn commit_pending(plan: &mut Plan, key: NodeKey, now: f64) -> CommitEffects {
    let Some(node) = plan.node_mut(key) else { return CommitEffects::default() };
    let state = node.pending_state.take().expect("commit_pending called with no pending destination");
    let outcome = node.pending_outcome.take();
    let failure = node.pending_failure.take();
    commit_transition(plan, key, DestState { state, outcome, failure }, now)
}

/// Commit a proposed transition: record the timepoint, update state/outcome/
/// failure, and swap the set of actively-listened conditions to match the
/// new state (P7 doesn't apply here -- that's node teardown, not a regular
/// transition -- but the same "only touch what you own" discipline does:
/// shared ancestor-slot expressions get activated/deactivated like any
/// other, since activation is reference-counted and this node is one of
/// potentially several holders of that reference).
fn commit_transition(plan: &mut Plan, key: NodeKey, dest: DestState, now: f64) -> CommitEffects {
    let mut effects = CommitEffects::default();
    let Some(node) = plan.node(key) else { return effects };
    let node_type = node.node_type;
    let from_state = node.state();

    debug_assert!(
        dest.state != NodeState::Finishing || node_type.max_state() == NodeState::Finishing,
        "{node_type:?} node has no FINISHING state but {key:?} was just proposed to reach it"
    );

    for slot in active_slots_for(node_type, from_state) {
        if let Some(id) = plan.node(key).and_then(|n| n.condition(*slot)) {
            plan.exprs.deactivate(id);
        }
    }

    {
        let node = plan.node(key).expect("node present");
        let mut status = node.status.borrow_mut();
        status.state = dest.state;
        if let Some(outcome) = dest.outcome {
            status.outcome = outcome;
        }
        if let Some(failure) = dest.failure {
            status.failure = failure;
        }
        status.timepoints.push(super::Timepoint { state: dest.state, time: now });
    }

    // A `StateVariable`/`OutcomeVariable`/`FailureVariable` referencing this
    // node (spec.md section 3) has no dependency edge back to this `Node` --
    // same reasoning as the `allChildrenFinished` publish below -- so publish
    // on whichever of the three some other node's condition has actually
    // caused to be built.
    if let Some(node) = plan.node(key) {
        let (state_var, outcome_var, failure_var) = (node.state_var, node.outcome_var, node.failure_var);
        if let Some(id) = state_var {
            plan.exprs.publish_change(id);
        }
        if dest.outcome.is_some() {
            if let Some(id) = outcome_var {
                plan.exprs.publish_change(id);
            }
        }
        if dest.failure.is_some() {
            if let Some(id) = failure_var {
                plan.exprs.publish_change(id);
            }
        }
    }

    // spec.md section 7: an invariant-condition failure is fatal for the
    // node and "is logged".
    if dest.state == NodeState::Failing && dest.failure == Some(FailureType::InvariantConditionFailed) {
        if let Some(id) = plan.node(key).map(|n| n.id.clone()) {
            log::warn!(
                "{}",
                crate::error::RuntimeError::RuntimeInvariant {
                    node: id,
                    detail: "invariant condition violated while executing".to_string(),
                }
            );
        }
    }

    // spec.md section 7: "CommandFailure / CommandDenied / CommandAborted /
    // CommandInterfaceError -- surfaced as command handle values, which the
    // command-node state machine interprets". Log the specific cause once,
    // at the point the state machine actually commits to FAILURE over it.
    if node_type == NodeType::Command
        && from_state == NodeState::Finishing
        && dest.state == NodeState::IterationEnded
        && dest.outcome == Some(NodeOutcome::Failure)
    {
        if let Some(NodeBody::Command(b)) = plan.node(key).map(|n| &n.body) {
            let command = plan.exprs.get_value(b.name).map(|v| v.to_string()).unwrap_or_default();
            let node_id = plan.node(key).map(|n| n.id.clone());
            if let Some(node_id) = node_id {
                let err = match *b.handle.borrow() {
                    super::CommandHandle::Failed => {
                        Some(crate::error::RuntimeError::CommandFailure { node: node_id, command })
                    }
                    super::CommandHandle::Denied => {
                        Some(crate::error::RuntimeError::CommandDenied { node: node_id, command })
                    }
                    super::CommandHandle::Aborted | super::CommandHandle::AbortFailed => {
                        Some(crate::error::RuntimeError::CommandAborted { node: node_id, command })
                    }
                    super::CommandHandle::InterfaceError => {
                        Some(crate::error::RuntimeError::CommandInterfaceError { node: node_id, command })
                    }
                    _ => None,
                };
                if let Some(err) = err {
                    log::warn!("{err}");
                }
            }
        }
    }

    for slot in active_slots_for(node_type, dest.state) {
        if let Some(id) = plan.node(key).and_then(|n| n.condition(*slot)) {
            plan.exprs.activate(id);
            plan.exprs.add_listener(id, ListenerId::Node(key));
        }
    }

    match (node_type, dest.state) {
        (NodeType::NodeList | NodeType::LibraryCall, NodeState::Executing) => {
            if let Some(node) = plan.node(key) {
                effects.activate_children = node.children.clone();
            }
        }
        _ => {}
    }

    if dest.state == NodeState::Executing
        && matches!(node_type, NodeType::Assignment | NodeType::Command | NodeType::Update)
    {
        effects.action = Some(NodeAction::Start);
    }
    if dest.state == NodeState::Failing && node_type == NodeType::Command {
        effects.action = Some(NodeAction::Abort);
    }

    // A child reaching Finished changes its List/LibraryCall parent's
    // `allChildrenFinished` aggregate, which is a plain `Expression`
    // (`internal_vars::AllChildrenFinished`) with no dependency edge back to
    // the child `Node` -- publish on its id explicitly so `ExprGraph::propagate`
    // picks it up (see `internal_vars::AllChildrenFinished`'s doc comment).
    if dest.state == NodeState::Finished {
        let parent = plan.node(key).and_then(|n| n.parent);
        let agg = parent.and_then(|p| plan.node(p)).and_then(|p| match &p.body {
            NodeBody::List(body) | NodeBody::LibraryCall(body) => Some(body.all_children_finished),
            _ => None,
        });
        if let Some(id) = agg {
            plan.exprs.publish_change(id);
        }
    }

    effects.reenqueue.push(key);
    effects
}

/// Drive `key` straight from `Finished` back to `Inactive` (the final arrow
/// in section 4.3's table, "parent resets"). Used when an enclosing List's
/// `repeat` condition sends it back to `Waiting`: every child must restart
/// from `Inactive` so its own `Waiting` re-evaluation runs fresh rather than
/// reusing stale committed outcome/failure.
pub fn reset_to_inactive(plan: &mut Plan, key: NodeKey, now: f64) {
    let Some(node) = plan.node(key) else { return };
    debug_assert_eq!(node.state(), NodeState::Finished);
    {
        let mut status = node.status.borrow_mut();
        status.state = NodeState::Inactive;
        status.outcome = NodeOutcome::NoOutcome;
        status.failure = FailureType::NoFailure;
        status.timepoints.push(super::Timepoint { state: NodeState::Inactive, time: now });
    }
    let children: Vec<NodeKey> = node.children.clone();
    for child in children {
        reset_to_inactive(plan, child, now);
    }
}

/// Drive `key` `Inactive -> Waiting`: the scheduler calls this once for the
/// plan root on startup, and `commit_transition`'s `activate_children`
/// effect tells it to call this for every child of a List/LibraryCall that
/// just entered `Executing`. Not condition-gated -- section 4.3's top arrow
/// has no predicate.
pub fn activate(plan: &mut Plan, key: NodeKey, now: f64) -> CommitEffects {
    commit_transition(plan, key, DestState::new(NodeState::Waiting), now)
}

/// Force a committed transition the condition table itself never proposes --
/// used by the scheduler's assignment-conflict resolution (spec.md section
/// 4.5.1: a priority tie sends every tying node straight to `Failing` with
/// `InvariantConditionFailed`/`Failure`, a scheduler-level policy decision,
/// not a gate-condition outcome). Goes through `commit_transition` like any
/// other transition so the timepoint, slot activation swap, and `Finished`
/// aggregate-publish side effects stay consistent.
pub fn force_transition(
    plan: &mut Plan,
    key: NodeKey,
    state: NodeState,
    outcome: NodeOutcome,
    failure: FailureType,
    now: f64,
) -> CommitEffects {
    commit_transition(plan, key, DestState::with(state, outcome, failure), now)
}

