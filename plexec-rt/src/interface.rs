//! The external-interface contract (C7, spec.md section 6.2) and the
//! inbound-result queue (section 5): the only cross-thread handoff the
//! scheduler allows.
//!
//! `ExternalInterface` mirrors the capability set spec.md gives verbatim,
//! minus the callback-closure shape: instead of `onHandle`/`onReturn`/
//! `onAbortAck` parameters, an implementation posts an [`InboundEvent`] onto
//! the [`InboundQueue`] it was constructed with, and the scheduler drains
//! that queue at the top of every macro-step (section 5: "posted into a
//! lock-protected inbound queue that the scheduler drains at the top of each
//! macro-step"). This is the same shape the teacher's `GXRt` uses for
//! `tasks: JoinSet<(BindId, Value)>` plus `updates`/`writes` mpsc channels
//! (`graphix-rt/src/rt.rs`) -- a side-channel the scheduler polls rather than
//! a callback invoked from inside someone else's stack frame.

use parking_lot::Mutex;
use plexec_core::ids::NodeKey;
use plexec_core::node::CommandHandle;
use plexec_core::value::Value;
use std::collections::VecDeque;
use std::sync::Arc;

/// A handle to an active `subscribeLookup` subscription (section 6.2),
/// opaque to the scheduler.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct LookupHandle(u64);

impl LookupHandle {
    pub fn new(id: u64) -> Self {
        LookupHandle(id)
    }
}

/// A resource request's evaluated (non-expression) form, snapshotted at
/// `executeCommand` time (spec.md section 4.4: "ResourceList entries are
/// `{ name, priority, [lowerBound, upperBound, releaseAtTermination] }`",
/// "fix argument and resource values (snapshot)").
#[derive(Debug, Clone)]
pub struct ResourceSnapshot {
    pub name: Value,
    pub priority: i32,
    pub lower_bound: Option<Value>,
    pub upper_bound: Option<Value>,
    pub release_at_termination: bool,
}

/// Something the external interface reports back to the scheduler,
/// asynchronously from its perspective (spec.md section 5: "the external
/// interface returns immediately and later publishes results via C1").
#[derive(Debug, Clone)]
pub enum InboundEvent {
    CommandHandleUpdate { node: NodeKey, handle: CommandHandle },
    CommandReturn { node: NodeKey, value: Value },
    AbortAck { node: NodeKey, ok: bool },
    AssignmentAck { node: NodeKey, ok: bool },
    UpdateAck { node: NodeKey, ok: bool },
    LookupChanged { handle: LookupHandle, value: Value },
}

/// The single mutex spec.md section 5 permits ("exactly one mutex protecting
/// the inbound queue. No other locks."). `parking_lot::Mutex` rather than
/// `std::sync::Mutex` to match the teacher's lock choice elsewhere in the
/// example pack's server-side crates.
#[derive(Default)]
pub struct InboundQueue {
    inner: Mutex<VecDeque<InboundEvent>>,
}

impl InboundQueue {
    pub fn new() -> Arc<Self> {
        Arc::new(InboundQueue::default())
    }

    pub fn push(&self, event: InboundEvent) {
        self.inner.lock().push_back(event);
    }

    /// Drain everything currently queued, in arrival order (section 5:
    /// "results delivered in the inbound queue are applied in arrival
    /// order"). Called once at the top of each macro-step.
    pub fn drain(&self) -> Vec<InboundEvent> {
        let mut guard = self.inner.lock();
        guard.drain(..).collect()
    }
}

/// Abstract boundary the scheduler calls to execute commands, perform
/// assignments, send updates, and obtain lookup values and the current time
/// (spec.md section 6.2). `executeCommand`/`abortCommand`/`sendPlannerUpdate`
/// report their results asynchronously via whatever `InboundQueue` the
/// implementation was built with; `performAssignment` for this crate's
/// scheduler is always local (the scheduler itself writes the destination
/// expression, section 4.5 step 3) so this trait's `perform_assignment` is
/// only the "tell the outside world an assignment happened, and ack it"
/// half -- see `Scheduler::commit_assignment` in `scheduler.rs`.
pub trait ExternalInterface {
    fn execute_command(
        &mut self,
        node: NodeKey,
        name: Value,
        args: Vec<Value>,
        resources: Vec<ResourceSnapshot>,
    );

    /// Invoked when a Command node enters `Failing` (spec.md section 4.3's
    /// "Supplemented features" #5: the abort-on-exit double dispatch).
    fn abort_command(&mut self, node: NodeKey);

    fn perform_assignment(&mut self, node: NodeKey, dest_value: Value);

    fn send_planner_update(&mut self, node: NodeKey, pairs: Vec<(String, Value)>);

    fn lookup_now(&mut self, state_name: &str, args: &[Value]) -> Value;

    fn subscribe_lookup(&mut self, state_name: &str, args: &[Value]) -> LookupHandle;

    fn unsubscribe_lookup(&mut self, handle: LookupHandle);

    fn current_time(&self) -> f64;
}

/// A deterministic in-process `ExternalInterface` for tests and the CLI demo
/// (SPEC_FULL.md's "deterministic in-process `ExternalInterface`
/// implementation"). Commands resolve according to a fixed table of
/// `name -> CommandHandle` installed by the caller (`stub_command`); anything
/// not in the table resolves `Success` immediately. Lookups resolve from a
/// similarly fixed table, defaulting to `Value::Unknown` equivalent (here:
/// `Value::Boolean(false)` is never returned implicitly -- callers must stub
/// every lookup they intend to use).
pub struct TestInterface {
    inbound: Arc<InboundQueue>,
    command_table: std::collections::HashMap<String, CommandHandle>,
    lookup_table: std::collections::HashMap<String, Value>,
    next_lookup_handle: u64,
    clock: f64,
}

impl TestInterface {
    pub fn new(inbound: Arc<InboundQueue>) -> Self {
        TestInterface {
            inbound,
            command_table: std::collections::HashMap::new(),
            lookup_table: std::collections::HashMap::new(),
            next_lookup_handle: 0,
            clock: 0.0,
        }
    }

    /// Fix the handle a future `execute_command` for `name` resolves to.
    /// Without an entry, `execute_command` resolves `Success`.
    pub fn stub_command(&mut self, name: impl Into<String>, handle: CommandHandle) {
        self.command_table.insert(name.into(), handle);
    }

    pub fn stub_lookup(&mut self, state_name: impl Into<String>, value: Value) {
        self.lookup_table.insert(state_name.into(), value);
    }

    /// Advance the deterministic clock `lookupNow("time", [])`/`currentTime`
    /// read from (section 5's timeout modeling: "end condition includes
    /// `time >= deadline`").
    pub fn advance_clock(&mut self, by: f64) {
        self.clock += by;
    }
}

impl ExternalInterface for TestInterface {
    fn execute_command(
        &mut self,
        node: NodeKey,
        name: Value,
        _args: Vec<Value>,
        _resources: Vec<ResourceSnapshot>,
    ) {
        let key = name.as_string().unwrap_or("");
        let handle = self.command_table.get(key).copied().unwrap_or(CommandHandle::Success);
        self.inbound.push(InboundEvent::CommandHandleUpdate { node, handle });
    }

    fn abort_command(&mut self, node: NodeKey) {
        self.inbound.push(InboundEvent::AbortAck { node, ok: true });
    }

    fn perform_assignment(&mut self, node: NodeKey, _dest_value: Value) {
        self.inbound.push(InboundEvent::AssignmentAck { node, ok: true });
    }

    fn send_planner_update(&mut self, node: NodeKey, _pairs: Vec<(String, Value)>) {
        self.inbound.push(InboundEvent::UpdateAck { node, ok: true });
    }

    fn lookup_now(&mut self, state_name: &str, _args: &[Value]) -> Value {
        self.lookup_table.get(state_name).cloned().unwrap_or(Value::Boolean(false))
    }

    fn subscribe_lookup(&mut self, _state_name: &str, _args: &[Value]) -> LookupHandle {
        let id = self.next_lookup_handle;
        self.next_lookup_handle += 1;
        LookupHandle::new(id)
    }

    fn unsubscribe_lookup(&mut self, _handle: LookupHandle) {}

    fn current_time(&self) -> f64 {
        self.clock
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unstubbed_command_resolves_success() {
        let inbound = InboundQueue::new();
        let mut iface = TestInterface::new(Arc::clone(&inbound));
        let node = NodeKey::next();
        iface.execute_command(node, Value::String("foo".into()), vec![], vec![]);
        let events = inbound.drain();
        assert_eq!(events.len(), 1);
        matches!(
            events[0],
            InboundEvent::CommandHandleUpdate { handle: CommandHandle::Success, .. }
        );
    }

    #[test]
    fn stubbed_command_resolves_to_table_entry() {
        let inbound = InboundQueue::new();
        let mut iface = TestInterface::new(Arc::clone(&inbound));
        iface.stub_command("boom", CommandHandle::Failed);
        let node = NodeKey::next();
        iface.execute_command(node, Value::String("boom".into()), vec![], vec![]);
        let events = inbound.drain();
        match events[0] {
            InboundEvent::CommandHandleUpdate { handle, .. } => {
                assert_eq!(handle, CommandHandle::Failed)
            }
            _ => panic!("expected a command handle update"),
        }
    }

    #[test]
    fn drain_is_fifo_and_empties_the_queue() {
        let inbound = InboundQueue::new();
        let n1 = NodeKey::next();
        let n2 = NodeKey::next();
        inbound.push(InboundEvent::AssignmentAck { node: n1, ok: true });
        inbound.push(InboundEvent::AssignmentAck { node: n2, ok: false });
        let events = inbound.drain();
        assert_eq!(events.len(), 2);
        assert!(inbound.drain().is_empty());
    }
}
