use crate::common::{Contact, Id};

use super::Coordinator;

/// Information and statistics about this node.
#[derive(Debug, Clone)]
pub struct Info {
    contact: Contact,
    routing_table_size: usize,
    active_peers: usize,
    active_searches: usize,
    stored_keys: usize,
}

impl Info {
    /// This Node's [Id]
    pub fn id(&self) -> &Id {
        &self.contact.guid
    }

    /// How other nodes see this node.
    pub fn contact(&self) -> &Contact {
        &self.contact
    }

    pub fn routing_table_size(&self) -> usize {
        self.routing_table_size
    }

    pub fn active_peers(&self) -> usize {
        self.active_peers
    }

    /// Searches started and not completed yet.
    pub fn active_searches(&self) -> usize {
        self.active_searches
    }

    /// Number of keys in the local store, reserved keys included.
    pub fn stored_keys(&self) -> usize {
        self.stored_keys
    }
}

impl From<&Coordinator> for Info {
    fn from(coordinator: &Coordinator) -> Self {
        Self {
            contact: coordinator.contact().clone(),
            routing_table_size: coordinator.routing_table().size(),
            active_peers: coordinator.active_peers().len(),
            active_searches: coordinator.active_searches(),
            stored_keys: coordinator.store().keys().len(),
        }
    }
}
