use tracing::{debug, trace};

use crate::common::FindNodeResponseArguments;
use crate::core::search::SearchOutcome;

use super::Coordinator;

impl Coordinator {
    /// Advance the search a `findNodeResponse` belongs to.
    ///
    /// A `foundKey` ends the search with that value. Otherwise every found node is admitted and
    /// greeted before joining the shortlist. If the shortlist grew, the new nodes are probed. If
    /// not, the search has converged and completes with its shortlist.
    pub(super) fn handle_find_node_response(&mut self, arguments: FindNodeResponseArguments) {
        let FindNodeResponseArguments {
            sender_guid: responder,
            find_id,
            found_key,
            found_nodes,
            ..
        } = arguments;

        if let Some(value) = found_key {
            match self.searches.remove(&find_id) {
                Some(session) => {
                    debug!(?find_id, key = session.key(), ?responder, "Value found");
                    self.complete(session, SearchOutcome::Value(value));
                }
                None => trace!(?find_id, "Value for a search that is gone"),
            }

            return;
        }

        if !self.searches.contains_key(&find_id) {
            // Completed or cancelled already.
            trace!(?find_id, ?responder, "Dropping response for unknown search");
            return;
        }

        let mut candidates = Vec::new();

        for node in found_nodes.unwrap_or_default() {
            if self.is_self(&node) {
                continue;
            }

            match self.add_peer(node) {
                Ok(contact) => {
                    self.greet(&contact.guid);
                    candidates.push(contact);
                }
                Err(error) => debug!(?error, "Could not admit a found node"),
            }
        }

        let Some(session) = self.searches.get_mut(&find_id) else {
            return;
        };

        let new_nodes = session.extend_shortlist(candidates);
        session.satisfy_probe(&responder);

        if session.update_closest_node() {
            trace!(?find_id, closest = ?session.previous_closest_node(), "Closer node found");
        }

        if new_nodes > 0 {
            trace!(?find_id, new_nodes, "Shortlist grew");
            self.iterate(&find_id);
        } else {
            self.converge(&find_id);
        }
    }
}
