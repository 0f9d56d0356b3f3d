//! The runtime half of the plan execution core: the exec scheduler (C6) and
//! the external-interface boundary it drives through (C7).
//!
//! `plexec-core` owns the expression graph, node state machine, and
//! plan-builder API; this crate is what actually runs a `Plan` to
//! completion against a real or stubbed outside world.

pub mod interface;
pub mod scheduler;

pub use interface::{ExternalInterface, InboundEvent, InboundQueue, LookupHandle, ResourceSnapshot, TestInterface};
pub use scheduler::Scheduler;
