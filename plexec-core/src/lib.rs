//! Plan execution core: the expression graph (C1/C2), the Node state machine
//! and its per-type body specializations (C3/C4), and variable scoping (C5)
//! (spec.md sections 3-4). No scheduler, no external-interface boundary, no
//! I/O -- those live in `plexec-rt`.
//!
//! This crate plays the role the teacher's `graphix-compiler` plays for
//! `graphix-rt`: it owns the data model and the pure per-node transition
//! logic, and exposes a builder API (`plan::PlanBuilder`) that stands in for
//! the XML parser spec.md places out of scope (section 6.1).

pub mod error;
pub mod expr;
pub mod ids;
pub mod node;
pub mod plan;
pub mod scope;
pub mod value;

pub use error::{PlanError, RuntimeError};
pub use ids::{ExprId, ListenerId, NodeId, NodeKey};
pub use value::{Typ, Value};
