//! Notifier/listener core (C2).
//!
//! A plain registry of "who listens to this expression", separate from
//! activation (which lives on each `Expression` instance). Kept as its own
//! small type -- rather than folded directly into `ExprGraph` -- because the
//! teacher keeps an analogous separation between `Env` (bindings) and the
//! `by_ref`/`subscribed`/`published` ref-counted listener maps that live on
//! `GXRt` (`graphix-rt/src/rt.rs`).

use crate::ids::{ExprId, ListenerId};
use fxhash::FxHashMap;
use smallvec::SmallVec;

#[derive(Default)]
pub struct Notifier {
    listeners: FxHashMap<ExprId, SmallVec<[ListenerId; 4]>>,
}

impl Notifier {
    pub fn add_listener(&mut self, source: ExprId, listener: ListenerId) {
        let entry = self.listeners.entry(source).or_default();
        if !entry.contains(&listener) {
            entry.push(listener);
        }
    }

    pub fn remove_listener(&mut self, source: ExprId, listener: ListenerId) {
        if let Some(entry) = self.listeners.get_mut(&source) {
            entry.retain(|l| *l != listener);
            if entry.is_empty() {
                self.listeners.remove(&source);
            }
        }
    }

    pub fn listeners_of(&self, source: ExprId) -> Option<SmallVec<[ListenerId; 4]>> {
        self.listeners.get(&source).cloned()
    }

    /// Called when an expression is torn down: no one should still be
    /// listed as a source for it.
    pub fn forget_source(&mut self, source: ExprId) {
        self.listeners.remove(&source);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ids::NodeKey;

    #[test]
    fn dedups_repeat_registration() {
        let mut n = Notifier::default();
        let src = ExprId::next();
        let l = ListenerId::Node(NodeKey::next());
        n.add_listener(src, l);
        n.add_listener(src, l);
        assert_eq!(n.listeners_of(src).unwrap().len(), 1);
    }

    #[test]
    fn remove_clears_empty_entry() {
        let mut n = Notifier::default();
        let src = ExprId::next();
        let l = ListenerId::Node(NodeKey::next());
        n.add_listener(src, l);
        n.remove_listener(src, l);
        assert!(n.listeners_of(src).is_none());
    }
}
