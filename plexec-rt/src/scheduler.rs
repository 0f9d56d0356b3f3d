//! The exec scheduler (C6, spec.md section 4.5): drains three queues to
//! quiescence each macro-step, then lets the external interface deliver
//! whatever it has queued, and repeats until nothing is pending.
//!
//! Single-threaded and cooperative, matching section 5's concurrency model
//! ("exactly one mutex protecting the inbound queue. No other locks.
//! Condition evaluation must not touch OS primitives") and this crate's
//! dependency stack, which -- unlike the teacher's tokio/netidx-based
//! `GXRt` -- carries no async runtime at all.

use crate::interface::{ExternalInterface, InboundEvent, InboundQueue, ResourceSnapshot};
use fxhash::FxHashMap;
use log::{debug, trace};
use plexec_core::ids::ExprId;
use plexec_core::node::body::{priority_of, NodeBody, WORST_PRIORITY};
use plexec_core::node::transition::{self, CommitEffects, NodeAction};
use plexec_core::node::{FailureType, NodeOutcome, NodeState, Plan};
use plexec_core::value::Value;
use plexec_core::NodeKey;
use std::collections::VecDeque;
use std::sync::Arc;

/// `Scheduler::run_to_quiescence`'s per-macro-step bookkeeping: three FIFOs
/// (Q1 check-conditions, Q2 transition, Q3 assignment) deduplicated by each
/// `Node`'s `queue_status` flags, exactly as spec.md section 4.5 describes
/// them.
pub struct Scheduler<I: ExternalInterface> {
    pub plan: Plan,
    interface: I,
    inbound: Arc<InboundQueue>,
    q1: VecDeque<NodeKey>,
    q2: VecDeque<NodeKey>,
    q3: VecDeque<NodeKey>,
    /// RHS values latched at `Executing` entry for a pending Assignment,
    /// keyed by the assigning node -- snapshotted once (section 4.4: "fix
    /// argument and resource values (snapshot)") rather than re-read at
    /// conflict-resolution time.
    pending_assignment_values: FxHashMap<NodeKey, Value>,
}

impl<I: ExternalInterface> Scheduler<I> {
    pub fn new(plan: Plan, interface: I, inbound: Arc<InboundQueue>) -> Self {
        Scheduler {
            plan,
            interface,
            inbound,
            q1: VecDeque::new(),
            q2: VecDeque::new(),
            q3: VecDeque::new(),
            pending_assignment_values: FxHashMap::default(),
        }
    }

    /// Drive the plan root `Inactive -> Waiting` and run macro-steps until
    /// the plan is quiescent: every queue empty, no inbound events pending,
    /// and the root has reached `Finished`. Returns once that holds.
    pub fn run_to_completion(&mut self) {
        if let Some(root) = self.plan.root() {
            self.activate_node(root);
        }
        self.run_to_quiescence();
    }

    /// True once the root node has reached `Finished` (spec.md section 4.3's
    /// terminal state) -- the CLI demo's exit condition.
    pub fn is_finished(&self) -> bool {
        match self.plan.root().and_then(|r| self.plan.node(r)) {
            Some(root) => root.state() == NodeState::Finished,
            None => true,
        }
    }

    fn now(&self) -> f64 {
        self.interface.current_time()
    }

    /// Section 4.5's macro-step loop: drain Q1 -> Q2 -> Q3, let the
    /// interface deliver pending inbound events, repeat until every queue
    /// is empty and the interface has nothing left to deliver.
    pub fn run_to_quiescence(&mut self) {
        loop {
            let mut did_work = false;
            did_work |= self.drain_q1();
            did_work |= self.drain_q2();
            did_work |= self.drain_q3();
            did_work |= self.drain_inbound();
            if !did_work {
                break;
            }
        }
    }

    fn enqueue_check(&mut self, key: NodeKey) {
        if let Some(node) = self.plan.node_mut(key) {
            if !node.queue_status.in_check_conditions {
                node.queue_status.in_check_conditions = true;
                self.q1.push_back(key);
            }
        }
    }

    fn enqueue_transition(&mut self, key: NodeKey) {
        if let Some(node) = self.plan.node_mut(key) {
            if !node.queue_status.in_transition {
                node.queue_status.in_transition = true;
                self.q2.push_back(key);
            }
        }
    }

    fn enqueue_assignment(&mut self, key: NodeKey) {
        if let Some(node) = self.plan.node_mut(key) {
            if !node.queue_status.in_assignment {
                node.queue_status.in_assignment = true;
                self.q3.push_back(key);
            }
        }
    }

    fn drain_q1(&mut self) -> bool {
        if self.q1.is_empty() {
            return false;
        }
        while let Some(key) = self.q1.pop_front() {
            if let Some(node) = self.plan.node_mut(key) {
                node.queue_status.in_check_conditions = false;
            }
            if transition::get_dest_state(&mut self.plan, key) {
                self.enqueue_transition(key);
            }
        }
        true
    }

    fn drain_q2(&mut self) -> bool {
        if self.q2.is_empty() {
            return false;
        }
        let now = self.now();
        while let Some(key) = self.q2.pop_front() {
            if let Some(node) = self.plan.node_mut(key) {
                node.queue_status.in_transition = false;
            }
            let from = self.plan.node(key).map(|n| n.state());
            let effects = transition::commit_pending(&mut self.plan, key, now);
            if let (Some(from), Some(node)) = (from, self.plan.node(key)) {
                debug!("{} transitioned {:?} -> {:?}", node.id, from, node.state());
            }
            self.handle_effects(key, effects);
        }
        // A child reaching Finished publishes its List/LibraryCall parent's
        // `allChildrenFinished` aggregate as dirty (`commit_transition`) but
        // never reads it back through the expression graph itself; without
        // this, the parent's End condition would only notice on whatever
        // later assignment or inbound event happens to call `propagate`
        // next, which a pure List of Empty/Command children may never
        // produce. Flushing once per Q2 drain reseeds Q1 for every node
        // whose condition depends on what just transitioned.
        let dirty = self.plan.exprs.propagate();
        for node in dirty {
            self.enqueue_check(node);
        }
        true
    }

    /// Section 4.5.1: group this round's pending assignments by destination
    /// root variable, let the strictly-highest priority win, and send every
    /// node tied for the top priority straight to `Failing` (a tie has no
    /// well-defined winner, so none of them may commit).
    fn drain_q3(&mut self) -> bool {
        if self.q3.is_empty() {
            return false;
        }
        let now = self.now();
        let queued: Vec<NodeKey> = self.q3.drain(..).collect();
        let mut by_root: FxHashMap<ExprId, Vec<(NodeKey, i32)>> = FxHashMap::default();
        for key in &queued {
            if let Some(node) = self.plan.node_mut(*key) {
                node.queue_status.in_assignment = false;
            }
            if self.plan.node(*key).map(|n| n.state()) != Some(NodeState::Executing) {
                self.pending_assignment_values.remove(key);
                continue;
            }
            let Some(dest) = self.plan.node(*key).and_then(|n| match &n.body {
                NodeBody::Assignment(b) => Some(b.dest),
                _ => None,
            }) else {
                continue;
            };
            let priority = self.plan.node(*key).map(|n| priority_of(&n.body)).unwrap_or(WORST_PRIORITY);
            let root = self.plan.exprs.base_variable_of(dest);
            by_root.entry(root).or_default().push((*key, priority));
        }

        for (_, mut group) in by_root {
            group.sort_by(|a, b| b.1.cmp(&a.1));
            let top_priority = group[0].1;
            let winners: Vec<NodeKey> = group.iter().filter(|(_, p)| *p == top_priority).map(|(k, _)| *k).collect();
            // A single strictly-highest-priority contender commits; any tie
            // at the top means nobody does (section 4.5.1's tie-break-as-
            // failure default). Either way, every contender that did not
            // just commit -- the tied top group, or a contender whose
            // priority simply wasn't the highest -- is forced to FAILING
            // with INVARIANT_CONDITION_FAILED (spec.md section 8 scenario
            // 4: "the priority-1 node is in FAILING"). Section 4.5.1's prose
            // also says a strict loser "remain[s] queued" for a possible
            // future macro-step; this scheduler has no source of new
            // gate-condition changes to make that re-examination meaningful
            // on its own (no timer, no external event pending), so queuing
            // it back up would just spin this synchronous drain-to-
            // quiescence loop forever. Failing it immediately is what keeps
            // section 8's scenario true without that divergence -- see
            // DESIGN.md.
            let committed_winner = if winners.len() == 1 {
                let winner = winners[0];
                if let Some(value) = self.pending_assignment_values.remove(&winner) {
                    self.commit_assignment(winner, value);
                }
                Some(winner)
            } else {
                debug!(
                    "assignment conflict: {} nodes tied at priority {top_priority}, failing all",
                    winners.len()
                );
                None
            };
            for (key, _) in &group {
                if Some(*key) == committed_winner {
                    continue;
                }
                self.pending_assignment_values.remove(key);
                let effects = transition::force_transition(
                    &mut self.plan,
                    *key,
                    NodeState::Failing,
                    NodeOutcome::Failure,
                    FailureType::InvariantConditionFailed,
                    now,
                );
                self.handle_effects(*key, effects);
            }
        }
        true
    }

    /// Write the winning assignment's value directly into its destination
    /// expression (section 4.5 step 3: "commit one winning assignment per
    /// destination root-variable") and tell the interface about it -- for
    /// this scheduler the write itself is always local; `perform_assignment`
    /// only acks it (see `interface.rs`'s trait doc comment).
    fn commit_assignment(&mut self, key: NodeKey, value: Value) {
        let Some((dest, ack)) = (match self.plan.node(key).map(|n| &n.body) {
            Some(NodeBody::Assignment(b)) => Some((b.dest, b.ack)),
            _ => None,
        }) else {
            return;
        };
        self.plan.exprs.set_value(dest, value.clone());
        self.plan.exprs.set_value(ack, Value::Boolean(true));
        let dirty = self.plan.exprs.propagate();
        for node in dirty {
            self.enqueue_check(node);
        }
        self.interface.perform_assignment(key, value);
    }

    fn drain_inbound(&mut self) -> bool {
        let events = self.inbound.drain();
        if events.is_empty() {
            return false;
        }
        for event in events {
            match event {
                InboundEvent::CommandHandleUpdate { node, handle } => {
                    if let Some(n) = self.plan.node(node) {
                        if let NodeBody::Command(b) = &n.body {
                            *b.handle.borrow_mut() = handle;
                            let ids = (b.handle_is_end, b.handle_var);
                            self.plan.exprs.publish_change(ids.0);
                            if let Some(id) = ids.1 {
                                self.plan.exprs.publish_change(id);
                            }
                        }
                    }
                    let dirty = self.plan.exprs.propagate();
                    for k in dirty {
                        self.enqueue_check(k);
                    }
                }
                InboundEvent::CommandReturn { node, value } => {
                    if let Some(dest) = self.plan.node(node).and_then(|n| match &n.body {
                        NodeBody::Command(b) => b.dest,
                        _ => None,
                    }) {
                        self.plan.exprs.set_value(dest, value);
                        let dirty = self.plan.exprs.propagate();
                        for k in dirty {
                            self.enqueue_check(k);
                        }
                    }
                }
                InboundEvent::AbortAck { node, .. } => {
                    // `ok` is not separately tracked: spec.md's `abortHandle`
                    // is just "has the abort been acknowledged", and an
                    // interface that cannot honor an abort still owes the
                    // scheduler an acknowledgement of that fact.
                    if let Some(n) = self.plan.node(node) {
                        if let NodeBody::Command(b) = &n.body {
                            *b.abort_ack.borrow_mut() = true;
                            let id = b.abort_complete;
                            self.plan.exprs.publish_change(id);
                        }
                    }
                    let dirty = self.plan.exprs.propagate();
                    for k in dirty {
                        self.enqueue_check(k);
                    }
                    self.enqueue_check(node);
                }
                InboundEvent::AssignmentAck { node, .. } => {
                    self.enqueue_check(node);
                }
                InboundEvent::UpdateAck { node, .. } => {
                    if let Some(ack) = self.plan.node(node).and_then(|n| match &n.body {
                        NodeBody::Update(b) => Some(b.ack),
                        _ => None,
                    }) {
                        self.plan.exprs.set_value(ack, Value::Boolean(true));
                        let dirty = self.plan.exprs.propagate();
                        for k in dirty {
                            self.enqueue_check(k);
                        }
                    }
                }
                InboundEvent::LookupChanged { .. } => {
                    // Lookup subscriptions are not wired to any expression in
                    // this crate yet (SPEC_FULL.md leaves `lookupOnChange`
                    // Non-goal-adjacent); surfaced here only so the event
                    // type round-trips through `InboundQueue`.
                }
            }
        }
        true
    }

    fn activate_node(&mut self, key: NodeKey) {
        let now = self.now();
        let effects = transition::activate(&mut self.plan, key, now);
        self.handle_effects(key, effects);
    }

    fn handle_effects(&mut self, key: NodeKey, effects: CommitEffects) {
        for child in effects.activate_children {
            // A List/LibraryCall repeating (IterationEnded -[repeat=T]-> Waiting
            // -> Executing) re-enters Executing with children still sitting in
            // whatever state they settled the previous iteration in --
            // ordinarily Finished. Section 4.3's final arrow ("FINISHED ->
            // parent resets -> INACTIVE") is exactly this case: the parent
            // must reset a child to Inactive before re-activating it to
            // Waiting, or the child would skip Inactive and carry its stale
            // outcome/failure into the new iteration. A child activated for
            // the first time is still Inactive, so this is a no-op then.
            if self.plan.node(child).map(|n| n.state()) == Some(NodeState::Finished) {
                let now = self.now();
                trace!("resetting child to Inactive for repeated iteration");
                transition::reset_to_inactive(&mut self.plan, child, now);
            }
            self.activate_node(child);
        }
        if let Some(action) = effects.action {
            self.dispatch_action(key, action);
        }
        for k in effects.reenqueue {
            self.enqueue_check(k);
        }
    }

    fn dispatch_action(&mut self, key: NodeKey, action: NodeAction) {
        match action {
            NodeAction::Start => self.start_body(key),
            NodeAction::Abort => self.interface.abort_command(key),
        }
    }

    /// Entering `Executing`: evaluate the body's RHS/args/pairs (already
    /// latched expressions by this point) and kick off the matching
    /// external effect (spec.md section 4.4).
    fn start_body(&mut self, key: NodeKey) {
        let Some(node) = self.plan.node(key) else { return };
        match &node.body {
            NodeBody::Assignment(b) => {
                let rhs = b.rhs;
                if let Some(value) = self.plan.exprs.get_value(rhs) {
                    self.pending_assignment_values.insert(key, value);
                    self.enqueue_assignment(key);
                }
            }
            NodeBody::Command(b) => {
                let name = self.plan.exprs.get_value(b.name).unwrap_or(Value::String(String::new()));
                let args: Vec<Value> =
                    b.args.iter().filter_map(|id| self.plan.exprs.get_value(*id)).collect();
                let resources: Vec<ResourceSnapshot> = b
                    .resources
                    .iter()
                    .map(|r| ResourceSnapshot {
                        name: self.plan.exprs.get_value(r.name).unwrap_or(Value::String(String::new())),
                        priority: r.priority,
                        lower_bound: r.lower_bound.and_then(|id| self.plan.exprs.get_value(id)),
                        upper_bound: r.upper_bound.and_then(|id| self.plan.exprs.get_value(id)),
                        release_at_termination: r.release_at_termination,
                    })
                    .collect();
                self.interface.execute_command(key, name, args, resources);
            }
            NodeBody::Update(b) => {
                let pairs: Vec<(String, Value)> = b
                    .pairs
                    .iter()
                    .map(|(n, id)| (n.clone(), self.plan.exprs.get_value(*id).unwrap_or(Value::Boolean(false))))
                    .collect();
                self.interface.send_planner_update(key, pairs);
            }
            _ => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::interface::TestInterface;
    use plexec_core::node::ConditionSlot;
    use plexec_core::plan::PlanBuilder;
    use plexec_core::value::Typ;

    fn single_empty_node() -> PlanBuilder {
        let mut builder = PlanBuilder::new();
        let root = builder
            .create_node(plexec_core::node::NodeType::Empty, plexec_core::ids::NodeId::from("root"), None)
            .unwrap();
        builder.finalize_conditions(root).unwrap();
        builder
    }

    #[test]
    fn empty_node_runs_to_finished() {
        let builder = single_empty_node();
        let inbound = InboundQueue::new();
        let iface = TestInterface::new(Arc::clone(&inbound));
        let mut sched = Scheduler::new(builder.plan, iface, inbound);
        sched.run_to_completion();
        assert!(sched.is_finished());
    }

    #[test]
    fn precondition_failure_skips_to_iteration_ended_then_finished() {
        let mut builder = single_empty_node_unfinalized();
        let root = builder.plan.root().unwrap();
        let false_expr =
            builder.add_local_variable(root, "pre_ok", Typ::Boolean, Some(Value::Boolean(false))).unwrap();
        builder.add_user_condition(root, ConditionSlot::Pre, false_expr, false).unwrap();
        builder.finalize_conditions(root).unwrap();

        let inbound = InboundQueue::new();
        let iface = TestInterface::new(Arc::clone(&inbound));
        let mut sched = Scheduler::new(builder.plan, iface, inbound);
        sched.run_to_completion();
        assert!(sched.is_finished());
        let root_node = sched.plan.node(root).unwrap();
        assert_eq!(root_node.failure(), plexec_core::node::FailureType::PreConditionFailed);
    }

    fn single_empty_node_unfinalized() -> PlanBuilder {
        let mut builder = PlanBuilder::new();
        builder
            .create_node(plexec_core::node::NodeType::Empty, plexec_core::ids::NodeId::from("root"), None)
            .unwrap();
        builder
    }
}
