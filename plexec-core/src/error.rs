//! Error taxonomy (spec.md section 7).
//!
//! `thiserror` is not part of the teacher crate's own dependency table (it
//! leans on `anyhow::bail!`/`anyhow!` internally throughout
//! `graphix-compiler`), but this crate's public boundary needs a typed error
//! a caller can match on -- the plan-builder fails with specific variants
//! (`MissingInVariable`, `DuplicateName`, ...) that a parser-equivalent
//! caller is expected to report distinctly. `ob-workflow` and `esper_policy`
//! in the example pack both reach for `thiserror` for exactly this kind of
//! public enum, so it is carried in from there rather than invented.

use crate::ids::NodeId;
use crate::value::Typ;

/// Errors raised while a plan tree is being assembled (spec.md section 7,
/// first two bullets). These never occur once a plan has been finalized and
/// handed to the scheduler; the parser-equivalent caller unwinds on the
/// first one and discards the partially built tree (no partial mutation of
/// previously finalized nodes).
#[derive(Debug, thiserror::Error, PartialEq, Eq, Clone)]
pub enum PlanError {
    #[error("duplicate name `{0}` in node scope")]
    DuplicateName(String),

    #[error("node id `{0}` collides with a sibling or its parent")]
    DuplicateNodeId(NodeId),

    #[error("missing required In variable `{0}`")]
    MissingInVariable(String),

    #[error("missing required InOut variable `{0}`")]
    MissingInOutVariable(String),

    #[error("InOut variable `{0}` resolved to a non-assignable expression")]
    InOutNotAssignable(String),

    #[error("type mismatch for `{name}`: expected {expected}, found {found}")]
    TypeMismatch {
        name: String,
        expected: Typ,
        found: Typ,
    },

    #[error("unknown condition slot `{0}`")]
    UnknownConditionSlot(String),

    #[error("conditions already finalized for node `{0}`")]
    AlreadyFinalized(NodeId),

    #[error("array initializer exceeds declared max size {max} (got {got})")]
    ArrayTooLarge { max: usize, got: usize },

    #[error("library node `{0}` not found in catalog")]
    UnknownLibraryNode(String),
}

/// Errors surfaced once a plan is running (spec.md section 7, third bullet
/// onward). These never unwind across the scheduler boundary: they are
/// recorded on the offending node (outcome/failure) and drive it into
/// FAILING, exactly as section 7's propagation policy requires. The enum
/// exists so that a caller inspecting a terminated node, or a log line, has
/// a name for what went wrong rather than a free-floating string.
#[derive(Debug, thiserror::Error, PartialEq, Clone)]
pub enum RuntimeError {
    #[error("runtime invariant violated on node `{node}`: {detail}")]
    RuntimeInvariant { node: NodeId, detail: String },

    #[error("command `{command}` on node `{node}` failed")]
    CommandFailure { node: NodeId, command: String },

    #[error("command `{command}` on node `{node}` was denied")]
    CommandDenied { node: NodeId, command: String },

    #[error("command `{command}` on node `{node}` was aborted")]
    CommandAborted { node: NodeId, command: String },

    #[error("command `{command}` on node `{node}` hit an interface error")]
    CommandInterfaceError { node: NodeId, command: String },

    #[error("assignment conflict on variable `{variable}`: tied priority {priority}")]
    AssignmentConflict { variable: String, priority: i32 },
}
