//! Variable scoping (C5): an ordered per-node name->expression map plus a
//! parent-chain lookup that a `LibraryCall` node blocks (spec.md section
//! 4.2, invariant "LibraryCall children never resolve free variable
//! references through the caller's variable scope; only through the alias
//! map").

use crate::error::PlanError;
use crate::ids::{ExprId, NodeKey};
use indexmap::IndexMap;

/// A single node's local bindings, in declaration order (insertion order
/// matters for anything that enumerates a node's variables, e.g. a
/// round-trip serializer -- P8). Also doubles as a `LibraryCall` node's
/// alias map: both are "name resolves to this expression" tables, and
/// `find_variable`'s walk treats them identically, stopping the walk right
/// after consulting whichever one a node has.
/// Local variables are always owned; alias-map entries (a `LibraryCall`'s
/// own scope) may point at a caller-owned expression, which teardown must
/// not remove -- the `bool` tracks that per entry instead of assuming every
/// scope entry is owned.
#[derive(Debug, Default)]
pub struct Scope {
    vars: IndexMap<String, (ExprId, bool)>,
}

impl Scope {
    pub fn new() -> Self {
        Scope { vars: IndexMap::new() }
    }

    /// Declare an owned local variable (spec.md section 6.1,
    /// `Node.addLocalVariable`); fails with `DuplicateName` if already
    /// present.
    pub fn declare(&mut self, name: impl Into<String>, id: ExprId) -> Result<(), PlanError> {
        self.declare_with_ownership(name, id, true)
    }

    /// Declare an alias-map entry (spec.md section 6.1,
    /// `LibraryCallNode.addAlias`), recording whether this scope is the
    /// expression's owner.
    pub fn declare_with_ownership(
        &mut self,
        name: impl Into<String>,
        id: ExprId,
        owned: bool,
    ) -> Result<(), PlanError> {
        let name = name.into();
        if self.vars.contains_key(&name) {
            return Err(PlanError::DuplicateName(name));
        }
        self.vars.insert(name, (id, owned));
        Ok(())
    }

    pub fn get_local(&self, name: &str) -> Option<ExprId> {
        self.vars.get(name).map(|(id, _)| *id)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, ExprId)> {
        self.vars.iter().map(|(k, (v, _))| (k.as_str(), *v))
    }

    /// Entries this scope owns -- what `teardown` should remove from the
    /// arena. Shared alias entries are left for their real owner.
    pub fn owned_iter(&self) -> impl Iterator<Item = ExprId> + '_ {
        self.vars.values().filter(|(_, owned)| *owned).map(|(id, _)| *id)
    }

    pub fn len(&self) -> usize {
        self.vars.len()
    }

    pub fn is_empty(&self) -> bool {
        self.vars.is_empty()
    }
}

/// What `find_variable` needs from the node tree, kept as a trait rather
/// than a concrete `Plan` reference so this module never depends on
/// `crate::node` -- `crate::node::Plan` depends on `Scope`, not the reverse.
pub trait ScopeHost {
    fn scope_of(&self, key: NodeKey) -> Option<&Scope>;
    fn parent_of(&self, key: NodeKey) -> Option<NodeKey>;
    /// True if `key` is a `LibraryCall` node: its own scope (the alias map)
    /// is still consulted, but the walk must not continue past it to the
    /// true lexical parent.
    fn blocks_ancestor_lookup(&self, key: NodeKey) -> bool;
}

/// Resolve `name` starting at `start`, walking toward the root. Stops (with
/// a miss) the moment it steps past a `LibraryCall` node without having
/// found the name in that node's own scope -- spec.md P6.
pub fn find_variable<H: ScopeHost>(host: &H, start: NodeKey, name: &str) -> Option<ExprId> {
    let mut cur = Some(start);
    while let Some(key) = cur {
        if let Some(scope) = host.scope_of(key) {
            if let Some(id) = scope.get_local(name) {
                return Some(id);
            }
        }
        if host.blocks_ancestor_lookup(key) {
            return None;
        }
        cur = host.parent_of(key);
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    struct FakeHost {
        scopes: HashMap<NodeKey, Scope>,
        parents: HashMap<NodeKey, NodeKey>,
        blockers: std::collections::HashSet<NodeKey>,
    }

    impl ScopeHost for FakeHost {
        fn scope_of(&self, key: NodeKey) -> Option<&Scope> {
            self.scopes.get(&key)
        }
        fn parent_of(&self, key: NodeKey) -> Option<NodeKey> {
            self.parents.get(&key).copied()
        }
        fn blocks_ancestor_lookup(&self, key: NodeKey) -> bool {
            self.blockers.contains(&key)
        }
    }

    #[test]
    fn walks_up_to_parent_scope() {
        let parent = NodeKey::next();
        let child = NodeKey::next();
        let mut parent_scope = Scope::new();
        let id = ExprId::next();
        parent_scope.declare("x", id).unwrap();
        let mut scopes = HashMap::new();
        scopes.insert(parent, parent_scope);
        scopes.insert(child, Scope::new());
        let mut parents = HashMap::new();
        parents.insert(child, parent);
        let host = FakeHost { scopes, parents, blockers: Default::default() };
        assert_eq!(find_variable(&host, child, "x"), Some(id));
    }

    #[test]
    fn library_call_blocks_past_its_own_scope() {
        let grandparent = NodeKey::next();
        let libcall = NodeKey::next();
        let callee = NodeKey::next();
        let mut gp_scope = Scope::new();
        gp_scope.declare("caller_var", ExprId::next()).unwrap();
        let mut scopes = HashMap::new();
        scopes.insert(grandparent, gp_scope);
        scopes.insert(libcall, Scope::new());
        scopes.insert(callee, Scope::new());
        let mut parents = HashMap::new();
        parents.insert(libcall, grandparent);
        parents.insert(callee, libcall);
        let mut blockers = std::collections::HashSet::new();
        blockers.insert(libcall);
        let host = FakeHost { scopes, parents, blockers };
        assert_eq!(find_variable(&host, callee, "caller_var"), None);
    }

    #[test]
    fn library_call_alias_still_resolves() {
        let grandparent = NodeKey::next();
        let libcall = NodeKey::next();
        let callee = NodeKey::next();
        let alias_id = ExprId::next();
        let mut libcall_scope = Scope::new();
        libcall_scope.declare("defInInt", alias_id).unwrap();
        let mut scopes = HashMap::new();
        scopes.insert(grandparent, Scope::new());
        scopes.insert(libcall, libcall_scope);
        scopes.insert(callee, Scope::new());
        let mut parents = HashMap::new();
        parents.insert(libcall, grandparent);
        parents.insert(callee, libcall);
        let mut blockers = std::collections::HashSet::new();
        blockers.insert(libcall);
        let host = FakeHost { scopes, parents, blockers };
        assert_eq!(find_variable(&host, callee, "defInInt"), Some(alias_id));
    }
}
