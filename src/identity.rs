//! Identity registry: union-find over per-instantiation identity tokens.
//!
//! Every rule variable in an instantiation is assigned a fresh [`Identity`].
//! While backtracing, identities that must end up as the same rule variable are
//! joined into one class. Unlike a textbook union-find, the representative of a
//! class keeps an explicit list of its members (`identity_sets`) so that a class
//! can be invalidated or re-homed on demand, and no path compression happens
//! behind the caller's back.
//!
//! Nodes live in a map keyed by identity. They are created lazily the first
//! time an identity takes part in a join or gets per-class state, marked dirty
//! whenever they change, and reset in bulk by
//! [`IdentityRegistry::clean_up_all_dirty`] at the end of each learning pass.
//! A reset node is indistinguishable from one never created, so resetting
//! drops it and the map only holds nodes touched since the last boundary.

use crate::condition::Field;
use crate::symbol::{FxMap, FxSet, SymbolId};

/// Opaque identity token. `Identity` values start at 1 and are never reused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Identity(u32);

impl Identity {
    /// Get the raw u32 value (for debugging/display).
    pub fn raw(self) -> u32 {
        self.0
    }
}

/// Where the equality test for a class lives in the rule being built.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OperationalSite {
    /// Index into the rule's condition list.
    pub condition: usize,
    pub field: Field,
}

#[derive(Debug, Clone)]
struct IdentityNode {
    /// Self for a representative, otherwise the representative.
    super_join: Identity,
    /// Immediate members; only populated on representatives.
    identity_sets: Vec<Identity>,
    dirty: bool,
    literalized: bool,
    variable: Option<SymbolId>,
    clone_identity: Option<Identity>,
    operational: Option<OperationalSite>,
}

impl IdentityNode {
    fn new(id: Identity) -> Self {
        Self {
            super_join: id,
            identity_sets: Vec::new(),
            dirty: false,
            literalized: false,
            variable: None,
            clone_identity: None,
            operational: None,
        }
    }

}

/// Union-find arena over identities, owned by one agent's chunker.
#[derive(Debug, Clone)]
pub struct IdentityRegistry {
    nodes: FxMap<Identity, IdentityNode>,
    next: u32,
    dirty: Vec<Identity>,
    pending_release: Vec<Identity>,
    /// Released since the start of the last boundary.
    released: FxSet<Identity>,
    joins: u64,
}

impl IdentityRegistry {
    pub fn new() -> Self {
        Self {
            nodes: FxMap::default(),
            next: 1,
            dirty: Vec::new(),
            pending_release: Vec::new(),
            released: FxSet::default(),
            joins: 0,
        }
    }

    /// Allocate a fresh identity token. No node is created until it is needed.
    pub fn new_identity(&mut self) -> Identity {
        let id = Identity(self.next);
        self.next += 1;
        id
    }

    fn node(&self, id: Identity) -> Option<&IdentityNode> {
        self.nodes.get(&id)
    }

    fn node_mut(&mut self, id: Identity) -> &mut IdentityNode {
        debug_assert!(!self.released.contains(&id), "identity {:?} used after release", id);
        self.nodes.entry(id).or_insert_with(|| IdentityNode::new(id))
    }

    /// Resolve an identity to the representative of its class.
    ///
    /// Identities that never took part in a join are their own representative.
    pub fn representative(&self, id: Identity) -> Identity {
        let mut current = id;
        let mut hops = 0usize;
        while let Some(node) = self.node(current) {
            if node.super_join == current {
                break;
            }
            current = node.super_join;
            hops += 1;
            debug_assert!(hops <= self.nodes.len(), "cycle in identity classes");
        }
        current
    }

    /// Whether two identities currently belong to the same class.
    pub fn same_class(&self, a: Identity, b: Identity) -> bool {
        self.representative(a) == self.representative(b)
    }

    /// Join the classes of `a` and `b`, returning the surviving representative.
    ///
    /// The representative with more recorded members absorbs the other; ties keep
    /// the representative of `a`. Joining members of one class is a no-op.
    pub fn union(&mut self, a: Identity, b: Identity) -> Identity {
        let ra = self.representative(a);
        let rb = self.representative(b);
        if ra == rb {
            return ra;
        }

        let len_a = self.node(ra).map_or(0, |n| n.identity_sets.len());
        let len_b = self.node(rb).map_or(0, |n| n.identity_sets.len());
        let (to, from) = if len_b > len_a { (rb, ra) } else { (ra, rb) };

        let (moved, from_literal, from_var, from_site) = {
            let from_node = self.node_mut(from);
            from_node.super_join = to;
            (
                std::mem::take(&mut from_node.identity_sets),
                from_node.literalized,
                from_node.variable.take(),
                from_node.operational.take(),
            )
        };
        for &child in &moved {
            self.node_mut(child).super_join = to;
            self.touch(child);
        }

        {
            let to_node = self.node_mut(to);
            to_node.identity_sets.extend(moved);
            to_node.identity_sets.push(from);
            to_node.literalized |= from_literal;
            if to_node.variable.is_none() {
                to_node.variable = from_var;
            }
            if to_node.operational.is_none() {
                to_node.operational = from_site;
            }
        }
        self.touch(to);
        self.touch(from);
        self.joins += 1;
        to
    }

    /// Mark a node dirty so the next cleanup resets it.
    pub fn touch(&mut self, id: Identity) {
        let newly_dirty = {
            let node = self.node_mut(id);
            let was = node.dirty;
            node.dirty = true;
            !was
        };
        if newly_dirty {
            self.dirty.push(id);
        }
    }

    pub fn is_dirty(&self, id: Identity) -> bool {
        self.node(id).is_some_and(|n| n.dirty)
    }

    /// Reset every node touched since the last boundary, then process queued
    /// deallocations. Called once per learning pass.
    pub fn clean_up_all_dirty(&mut self) {
        self.released.clear();
        for id in std::mem::take(&mut self.dirty) {
            self.nodes.remove(&id);
        }
        self.flush_deallocations();
    }

    /// Mark the class of `id` as tied to a literal value; it will never be
    /// turned into a variable.
    pub fn literalize(&mut self, id: Identity) {
        let rep = self.representative(id);
        self.node_mut(rep).literalized = true;
        self.touch(rep);
    }

    pub fn is_literalized(&self, id: Identity) -> bool {
        let rep = self.representative(id);
        self.node(rep).is_some_and(|n| n.literalized)
    }

    /// Variable recorded for the class of `id`, if any.
    pub fn variable(&self, id: Identity) -> Option<SymbolId> {
        self.node(self.representative(id)).and_then(|n| n.variable)
    }

    pub fn set_variable(&mut self, id: Identity, var: SymbolId) {
        let rep = self.representative(id);
        self.node_mut(rep).variable = Some(var);
        self.touch(rep);
    }

    /// Identity the class will carry in the instantiation of the learned rule.
    /// Allocated on first request and stable until the next cleanup.
    pub fn clone_identity(&mut self, id: Identity) -> Identity {
        let rep = self.representative(id);
        if let Some(existing) = self.node(rep).and_then(|n| n.clone_identity) {
            return existing;
        }
        let fresh = self.new_identity();
        self.node_mut(rep).clone_identity = Some(fresh);
        self.touch(rep);
        fresh
    }

    pub fn operational(&self, id: Identity) -> Option<OperationalSite> {
        self.node(self.representative(id)).and_then(|n| n.operational)
    }

    /// Record the first condition/field that tests the class of `id`.
    /// Later sites are ignored.
    pub fn set_operational_if_absent(&mut self, id: Identity, site: OperationalSite) {
        let rep = self.representative(id);
        if self.operational(rep).is_none() {
            self.node_mut(rep).operational = Some(site);
            self.touch(rep);
        }
    }

    /// Immediate members recorded on a representative.
    pub fn children(&self, id: Identity) -> &[Identity] {
        self.node(id)
            .map(|n| n.identity_sets.as_slice())
            .unwrap_or(&[])
    }

    /// Every identity in the class of `id`, representative first.
    pub fn class_members(&self, id: Identity) -> Vec<Identity> {
        let rep = self.representative(id);
        let mut members = vec![rep];
        members.extend_from_slice(self.children(rep));
        members
    }

    /// Release a node now.
    ///
    /// The node is unlinked from its representative's member list, and if it is
    /// itself a representative every former member becomes its own class again.
    pub fn deallocate(&mut self, id: Identity) {
        let fresh = self.released.insert(id);
        debug_assert!(fresh, "identity {:?} released twice", id);
        let Some(node) = self.nodes.remove(&id) else {
            return;
        };
        if node.super_join != id {
            if let Some(parent) = self.nodes.get_mut(&node.super_join) {
                parent.identity_sets.retain(|&member| member != id);
            }
        }
        for child in node.identity_sets {
            if let Some(child_node) = self.nodes.get_mut(&child) {
                child_node.super_join = child;
            }
        }
    }

    /// Queue a node for release at the next [`Self::clean_up_all_dirty`].
    pub fn queue_deallocation(&mut self, id: Identity) {
        self.pending_release.push(id);
    }

    pub fn flush_deallocations(&mut self) {
        for id in std::mem::take(&mut self.pending_release) {
            if !self.released.contains(&id) {
                self.deallocate(id);
            }
        }
    }

    /// Whether `id` was released at the last boundary or since.
    pub fn is_released(&self, id: Identity) -> bool {
        self.released.contains(&id)
    }

    /// Nodes currently materialized.
    pub fn live_nodes(&self) -> usize {
        self.nodes.len()
    }

    /// Total joins that changed a class since creation.
    pub fn join_count(&self) -> u64 {
        self.joins
    }

    /// Number of dirty nodes awaiting cleanup.
    pub fn dirty_count(&self) -> usize {
        self.dirty.len()
    }

    /// Drop every node. Identity numbering continues so tokens held by an
    /// existing trace stay distinct.
    pub fn reset_all(&mut self) {
        self.nodes.clear();
        self.dirty.clear();
        self.pending_release.clear();
        self.released.clear();
    }

    /// Check the structural invariants of every materialized node.
    ///
    /// Panics with a description of the first violation found.
    pub fn assert_invariants(&self) {
        for (&id, node) in &self.nodes {
            let rep = self.representative(id);
            if rep == id {
                for &member in &node.identity_sets {
                    assert_eq!(
                        self.node(member).map(|n| n.super_join),
                        Some(id),
                        "member {:?} of {:?} does not point back",
                        member,
                        id
                    );
                }
            } else {
                assert!(
                    node.identity_sets.is_empty(),
                    "non-representative {:?} holds members",
                    id
                );
                assert!(
                    self.children(rep).contains(&id),
                    "{:?} missing from representative {:?}",
                    id,
                    rep
                );
            }
        }
    }
}

impl Default for IdentityRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
#[path = "tests/identity.rs"]
mod tests;
