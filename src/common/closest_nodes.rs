use std::vec::IntoIter;

use crate::common::{Contact, Id};

/// Contacts kept sorted by XOR distance to a target, closest first, without duplicate guids.
///
/// This is the shortlist of an iterative search, and the shape of every
/// "closest nodes" answer.
#[derive(Debug, Clone)]
pub struct ClosestNodes {
    target: Id,
    nodes: Vec<Contact>,
}

impl ClosestNodes {
    pub fn new(target: Id) -> Self {
        Self {
            target,
            nodes: Vec::with_capacity(32),
        }
    }

    // === Getters ===

    pub fn target(&self) -> Id {
        self.target
    }

    pub fn nodes(&self) -> &[Contact] {
        &self.nodes
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn contains(&self, guid: &Id) -> bool {
        self.nodes.iter().any(|node| node.guid == *guid)
    }

    /// Closest contact to the target, if any.
    pub fn first(&self) -> Option<&Contact> {
        self.nodes.first()
    }

    // === Public Methods ===

    /// Insert a contact at its distance rank. Returns `false` if its guid is already present.
    pub fn add(&mut self, node: Contact) -> bool {
        if self.contains(&node.guid) {
            return false;
        }

        let seek = node.guid.xor(&self.target);

        // Distinct guids have distinct distances, so an existing entry at the same
        // distance is always the same guid, which was ruled out above.
        let pos = self
            .nodes
            .partition_point(|probe| probe.guid.xor(&self.target) <= seek);

        self.nodes.insert(pos, node);

        true
    }

    /// Add many contacts, returning how many were new.
    pub fn extend<I: IntoIterator<Item = Contact>>(&mut self, nodes: I) -> usize {
        nodes.into_iter().filter(|node| self.add(node.clone())).count()
    }

    pub fn truncate(&mut self, len: usize) {
        self.nodes.truncate(len)
    }

    pub fn to_vec(&self) -> Vec<Contact> {
        self.nodes.clone()
    }
}

impl IntoIterator for ClosestNodes {
    type Item = Contact;
    type IntoIter = IntoIter<Contact>;

    fn into_iter(self) -> Self::IntoIter {
        self.nodes.into_iter()
    }
}

impl<'a> IntoIterator for &'a ClosestNodes {
    type Item = &'a Contact;
    type IntoIter = std::slice::Iter<'a, Contact>;

    fn into_iter(self) -> Self::IntoIter {
        self.nodes.iter()
    }
}
