use serde_json::Value;
use tracing::{debug, trace};

use crate::common::{
    ClosestNodes, FindNodeArguments, FindNodeResponseArguments, HelloArguments, Id, Message,
    StoreValueArguments,
};

use crate::core::index;

use super::{unix_now, Coordinator};

impl Coordinator {
    /// Answer a `findNode` with the stored value, or with the closest nodes we know.
    ///
    /// Never touches our own searches.
    pub(super) fn handle_find_node(&mut self, arguments: FindNodeArguments) {
        if arguments.sender_guid == *self.id() {
            debug!("Dropping findNode claiming to come from ourselves");
            return;
        }

        if arguments.key.is_empty() || arguments.pubkey.is_empty() {
            debug!(sender = ?arguments.sender_guid, "Dropping malformed findNode");
            return;
        }

        let Some(querier) = self.routing_table.get_contact(&arguments.sender_guid) else {
            trace!(sender = ?arguments.sender_guid, "Dropping findNode from unknown node");
            return;
        };

        let (found_key, found_nodes) = match self.store.get(&arguments.key) {
            Some(value) if arguments.find_value => {
                trace!(key = arguments.key, "Answering findValue with the stored value");
                (Some(value), None)
            }
            _ => {
                let target = Id::from_key(&arguments.key);
                let nodes =
                    self.routing_table
                        .find_close_nodes(&target, self.k, Some(&arguments.sender_guid));

                let mut closest = ClosestNodes::new(target);

                for contact in nodes {
                    if !self.is_self(&contact) {
                        closest.add(contact);
                    }
                }

                (None, Some(closest.to_vec()))
            }
        };

        let response = Message::FindNodeResponse(FindNodeResponseArguments {
            sender_guid: self.contact.guid,
            hostname: self.contact.hostname.clone(),
            port: self.contact.port,
            pubkey: self.contact.pubkey.clone(),
            sender_nick: self.contact.nickname.clone(),
            find_id: arguments.find_id,
            found_key,
            found_nodes,
        });

        self.send_to(&querier, &response);
    }

    /// Persist a value another node stored at us, merging index updates.
    pub(super) fn handle_store_value(&mut self, arguments: StoreValueArguments) {
        self.handle_store_value_at(unix_now(), arguments)
    }

    fn handle_store_value_at(&mut self, now: u64, arguments: StoreValueArguments) {
        let StoreValueArguments {
            key,
            value,
            original_publisher_id,
            age,
        } = arguments;

        if is_empty(&value) {
            debug!(key, "Dropping store of an empty value");
            return;
        }

        let existing = self.store.get(&key);

        match index::merge(value, existing) {
            Some(merged) => {
                let originally_published_at = now.saturating_sub(age);
                self.persist(now, key, merged, original_publisher_id, originally_published_at)
            }
            None => debug!(key, "Index update has nothing to apply, store ignored"),
        }
    }

    /// Admit the node introducing itself. No reply, it already knows us.
    pub(super) fn handle_hello(&mut self, arguments: HelloArguments) {
        let contact = arguments.contact();

        match self.add_peer(contact) {
            Ok(contact) => trace!(guid = ?contact.guid, version = arguments.v, "Hello"),
            Err(error) => debug!(sender = ?arguments.sender_guid, ?error, "Ignoring hello"),
        }
    }
}

fn is_empty(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::String(s) => s.is_empty(),
        Value::Array(a) => a.is_empty(),
        Value::Object(o) => o.is_empty(),
        _ => false,
    }
}
