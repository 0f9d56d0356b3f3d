//! Demo runner for the plan execution core (spec.md section 6.3's CLI
//! surface). Builds one of a few canned plans in-process -- there is no XML
//! parser in this crate, so "loading a plan" means picking a demo by name --
//! runs it to completion against a deterministic `TestInterface`, and prints
//! a timepoint transcript.
//!
//! Exit codes (spec.md section 6.3): `0` on a clean finish, `1` if the
//! requested demo name is unknown (the parse-error equivalent), `2` if the
//! root node finishes with a non-`Success` outcome (a runtime invariant
//! violation).

use anyhow::{bail, Result};
use clap::Parser;
use log::info;
use plexec_core::ids::NodeId;
use plexec_core::node::{CommandHandle, ConditionSlot, NodeOutcome, NodeType};
use plexec_core::plan::PlanBuilder;
use plexec_core::value::{Typ, Value};
use plexec_rt::{InboundQueue, Scheduler, TestInterface};

#[derive(Parser)]
#[command(version, about = "Run a canned plan execution core demo plan to completion")]
struct Params {
    /// which canned plan to run: basic, precondition-failure, assignment-conflict
    /// (defaults to "basic")
    demo: Option<String>,
}

#[derive(Clone, Copy, Debug)]
enum Demo {
    /// two-child list: a command, then an assignment
    Basic,
    /// a failing precondition short-circuits straight to iteration-ended
    PreconditionFailure,
    /// two assignment nodes race for the same variable at different priorities
    AssignmentConflict,
}

impl Demo {
    // Kept as a plain string match rather than `clap::ValueEnum` so an
    // unknown name can exit 1 (spec.md section 6.3's "1 = plan parse
    // error"), not clap's own usage-error code -- this CLI has no XML
    // parser, so picking a demo by name stands in for loading a plan.
    fn parse(s: &str) -> Option<Demo> {
        match s {
            "basic" => Some(Demo::Basic),
            "precondition-failure" => Some(Demo::PreconditionFailure),
            "assignment-conflict" => Some(Demo::AssignmentConflict),
            _ => None,
        }
    }
}

fn main() -> Result<()> {
    env_logger::init();
    let params = Params::parse();
    let demo_name = params.demo.as_deref().unwrap_or("basic");
    let Some(demo) = Demo::parse(demo_name) else {
        eprintln!("unknown demo: {demo_name} (expected basic, precondition-failure, or assignment-conflict)");
        std::process::exit(1);
    };
    info!("running demo plan: {:?}", demo);

    let (builder, root) = match demo {
        Demo::Basic => build_basic()?,
        Demo::PreconditionFailure => build_precondition_failure()?,
        Demo::AssignmentConflict => build_assignment_conflict()?,
    };

    let inbound = InboundQueue::new();
    let mut iface = TestInterface::new(std::sync::Arc::clone(&inbound));
    iface.stub_command("print_hello", CommandHandle::Success);
    let mut scheduler = Scheduler::new(builder.plan, iface, inbound);
    scheduler.run_to_completion();

    let Some(root_node) = scheduler.plan.node(root) else {
        bail!("root node vanished during execution");
    };
    println!("root finished: state={:?} outcome={:?} failure={:?}", root_node.state(), root_node.outcome(), root_node.failure());
    for key in scheduler.plan.keys() {
        let Some(node) = scheduler.plan.node(key) else { continue };
        let status = node.status.borrow();
        println!("  {} -> state={:?} outcome={:?} failure={:?}", node.id, status.state, status.outcome, status.failure);
    }

    if root_node.outcome() != NodeOutcome::Success {
        std::process::exit(2);
    }
    Ok(())
}

fn build_basic() -> Result<(PlanBuilder, plexec_core::ids::NodeKey)> {
    let mut b = PlanBuilder::new();
    let root = b.create_node(NodeType::NodeList, NodeId::from("root"), None)?;

    let cmd = b.create_node(NodeType::Command, NodeId::from("say_hello"), Some(root))?;
    let name = b.add_local_variable(cmd, "__command_name", Typ::String, Some(Value::String("print_hello".into())))?;
    b.set_command(cmd, name, vec![], None)?;
    b.finalize_conditions(cmd)?;
    b.add_child(root, cmd)?;

    let assign = b.create_node(NodeType::Assignment, NodeId::from("set_done"), Some(root))?;
    let done = b.add_local_variable(assign, "done", Typ::Boolean, Some(Value::Boolean(false)))?;
    let literal_true = b.add_local_variable(assign, "__rhs", Typ::Boolean, Some(Value::Boolean(true)))?;
    b.set_assignment(assign, done, literal_true)?;
    b.finalize_conditions(assign)?;
    b.add_child(root, assign)?;

    b.finalize_conditions(root)?;
    Ok((b, root))
}

fn build_precondition_failure() -> Result<(PlanBuilder, plexec_core::ids::NodeKey)> {
    let mut b = PlanBuilder::new();
    let root = b.create_node(NodeType::Empty, NodeId::from("root"), None)?;
    let pre = b.add_local_variable(root, "pre_ok", Typ::Boolean, Some(Value::Boolean(false)))?;
    b.add_user_condition(root, ConditionSlot::Pre, pre, false)?;
    b.finalize_conditions(root)?;
    Ok((b, root))
}

fn build_assignment_conflict() -> Result<(PlanBuilder, plexec_core::ids::NodeKey)> {
    let mut b = PlanBuilder::new();
    let root = b.create_node(NodeType::NodeList, NodeId::from("root"), None)?;
    let shared = b.add_local_variable(root, "shared", Typ::Integer, Some(Value::Integer(0)))?;

    let low = b.create_node(NodeType::Assignment, NodeId::from("low_priority_writer"), Some(root))?;
    let low_rhs = b.add_local_variable(low, "__rhs", Typ::Integer, Some(Value::Integer(1)))?;
    b.set_assignment(low, shared, low_rhs)?;
    b.set_priority(low, 1);
    b.finalize_conditions(low)?;
    b.add_child(root, low)?;

    let high = b.create_node(NodeType::Assignment, NodeId::from("high_priority_writer"), Some(root))?;
    let high_rhs = b.add_local_variable(high, "__rhs", Typ::Integer, Some(Value::Integer(2)))?;
    b.set_assignment(high, shared, high_rhs)?;
    b.set_priority(high, 5);
    b.finalize_conditions(high)?;
    b.add_child(root, high)?;

    b.finalize_conditions(root)?;
    Ok((b, root))
}
