//! Identifier types for nodes, expressions, and listeners.
//!
//! Mirrors the teacher's `atomic_id!` pattern (an atomically incrementing
//! `u64` newtype) without pulling in `netidx-core`, which owns that macro.

use arcstr::ArcStr;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

macro_rules! atomic_id {
    ($name:ident) => {
        #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
        pub struct $name(u64);

        impl $name {
            pub fn next() -> Self {
                static NEXT: AtomicU64 = AtomicU64::new(0);
                $name(NEXT.fetch_add(1, Ordering::Relaxed))
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}#{}", stringify!($name), self.0)
            }
        }
    };
}

atomic_id!(ExprId);
atomic_id!(NodeKey);

/// The plan-visible, XML-facing identifier for a node (spec.md section 3:
/// "unique among siblings and distinct from parent"). Distinct from
/// [`NodeKey`], the internal arena handle used for back-pointers and queue
/// membership.
///
/// Backed by `arcstr::ArcStr` rather than `String`: node ids get cloned into
/// every `PlanError::DuplicateNodeId`/`RuntimeError::*` variant that names a
/// node, and `ArcStr`'s clone is a refcount bump rather than a fresh
/// allocation -- the same reasoning the teacher crate applies to `ModPath`
/// and every other interned identifier it clones through `graphix-compiler`'s
/// `Env`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(pub ArcStr);

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for NodeId {
    fn from(s: &str) -> Self {
        NodeId(ArcStr::from(s))
    }
}

impl From<String> for NodeId {
    fn from(s: String) -> Self {
        NodeId(ArcStr::from(s))
    }
}

impl From<ArcStr> for NodeId {
    fn from(s: ArcStr) -> Self {
        NodeId(s)
    }
}

/// Something that can be the target of a [`crate::expr::listener::Notifier`]
/// change broadcast: either a node (its gate conditions changed) or another
/// expression (an operator depending on this one).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ListenerId {
    Node(NodeKey),
    Expr(ExprId),
}

impl fmt::Display for ListenerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ListenerId::Node(k) => write!(f, "node:{k}"),
            ListenerId::Expr(e) => write!(f, "expr:{e}"),
        }
    }
}
