//! Several coordinators wired through an in-process message queue.
//!
//! Every send is encoded to bytes, queued, and decoded again before the recipient handles it,
//! so these tests exercise the same path a datagram takes.
//!
//! Run with: cargo test --test simulated_network

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use bazaar_dht::messages::Message;
use bazaar_dht::transport::{PeerLink, Transport};
use bazaar_dht::{Config, Contact, Coordinator, Id, OnComplete, SearchOutcome};
use serde_json::json;

/// Queued datagrams, addressed by the recipient's guid.
#[derive(Debug, Clone, Default)]
struct Wire(Arc<Mutex<VecDeque<(Id, Vec<u8>)>>>);

impl Wire {
    fn push(&self, to: Id, bytes: Vec<u8>) {
        self.0.lock().unwrap().push_back((to, bytes));
    }

    fn pop(&self) -> Option<(Id, Vec<u8>)> {
        self.0.lock().unwrap().pop_front()
    }
}

#[derive(Debug)]
struct WireTransport(Wire);

impl Transport for WireTransport {
    fn connect(&mut self, contact: &Contact) -> std::io::Result<Box<dyn PeerLink>> {
        Ok(Box::new(WireLink {
            contact: contact.clone(),
            wire: self.0.clone(),
        }))
    }
}

#[derive(Debug)]
struct WireLink {
    contact: Contact,
    wire: Wire,
}

impl PeerLink for WireLink {
    fn contact(&self) -> &Contact {
        &self.contact
    }

    fn send_raw(&mut self, bytes: &[u8]) -> std::io::Result<()> {
        self.wire.push(self.contact.guid, bytes.to_vec());
        Ok(())
    }
}

struct Network {
    wire: Wire,
    nodes: Vec<Coordinator>,
}

impl Network {
    /// `size` nodes numbered from 1, none of them knowing each other.
    fn new(size: u8) -> Self {
        let wire = Wire::default();

        let nodes = (1..=size)
            .map(|n| {
                let contact = contact(n);

                let config = Config {
                    guid: Some(contact.guid),
                    hostname: contact.hostname,
                    port: Some(contact.port),
                    pubkey: contact.pubkey,
                    nickname: contact.nickname,
                    ..Config::default()
                };

                Coordinator::new(&config, Box::new(WireTransport(wire.clone())))
            })
            .collect();

        Self { wire, nodes }
    }

    fn node(&mut self, n: u8) -> &mut Coordinator {
        &mut self.nodes[n as usize - 1]
    }

    /// Each node introduces itself to the next one.
    fn chain(size: u8) -> Self {
        let mut network = Self::new(size);

        for n in 1..size {
            network.node(n).introduce(contact(n + 1)).unwrap();
            network.pump();
        }

        network
    }

    /// Deliver queued messages until the network is quiet.
    fn pump(&mut self) -> usize {
        let mut delivered = 0;

        while let Some((to, bytes)) = self.wire.pop() {
            delivered += 1;
            assert!(delivered < 10_000, "network never went quiet");

            let message = Message::from_bytes(&bytes).unwrap();

            if let Some(node) = self.nodes.iter_mut().find(|node| *node.id() == to) {
                node.handle_message(message);
            }
        }

        delivered
    }
}

fn guid(n: u8) -> Id {
    let mut bytes = [0; 20];
    bytes[0] = n.wrapping_mul(37);
    bytes[19] = n;

    Id(bytes)
}

fn contact(n: u8) -> Contact {
    Contact::new(
        guid(n),
        "127.0.0.1",
        8000 + n as u16,
        format!("pk-{n}"),
        format!("node-{n}"),
    )
}

/// Completion that records every outcome it receives.
fn recorder() -> (OnComplete, Arc<Mutex<Vec<SearchOutcome>>>) {
    let outcomes = Arc::new(Mutex::new(Vec::new()));
    let sink = outcomes.clone();

    let on_complete = OnComplete::Callback(Box::new(move |outcome| {
        sink.lock().unwrap().push(outcome);
    }));

    (on_complete, outcomes)
}

fn single(outcomes: &Arc<Mutex<Vec<SearchOutcome>>>) -> SearchOutcome {
    let outcomes = outcomes.lock().unwrap();
    assert_eq!(outcomes.len(), 1, "search completed {} times", outcomes.len());

    outcomes[0].clone()
}

#[test]
fn lookup_walks_a_chain() {
    let mut network = Network::chain(5);

    assert_eq!(network.node(1).active_peers(), vec![contact(2)]);

    let (on_complete, outcomes) = recorder();
    network
        .node(1)
        .iterative_find_node("lamp".to_string(), Vec::new(), Some(on_complete));

    network.pump();

    let target = Id::from_key("lamp");
    let mut expected: Vec<Id> = (2..=5).map(guid).collect();
    expected.sort_by_key(|id| id.xor(&target));

    let found: Vec<Id> = single(&outcomes)
        .nodes()
        .unwrap()
        .iter()
        .map(|contact| contact.guid)
        .collect();

    assert_eq!(found, expected);
    assert_eq!(network.node(1).active_peers().len(), 4);
    assert_eq!(network.node(1).active_searches(), 0);
}

#[test]
fn bootstrap_fills_every_routing_table() {
    let mut network = Network::new(5);

    network.node(1).bootstrap(&[]);

    for n in 2..=5 {
        network.node(n).bootstrap(&[contact(1)]);
        network.pump();
    }

    for n in 1..=5 {
        assert_eq!(
            network.node(n).routing_table().size(),
            4,
            "routing table of node {n}"
        );
        assert_eq!(network.node(n).active_searches(), 0);
    }
}

#[test]
fn stored_value_is_found_from_the_far_end() {
    let mut network = Network::chain(5);

    network
        .node(1)
        .iterative_store("lamp".to_string(), json!({"price": 12}), None, 0);
    network.pump();

    for n in 1..=5 {
        let node = network.node(n);

        assert_eq!(node.get_local("lamp"), Some(json!({"price": 12})), "node {n}");
        assert_eq!(node.store().original_publisher_id("lamp"), Some(guid(1)));
    }

    let (on_complete, outcomes) = recorder();
    network
        .node(5)
        .iterative_find_value("lamp".to_string(), Vec::new(), Some(on_complete));
    network.pump();

    assert_eq!(single(&outcomes).value(), Some(json!({"price": 12})));
}

#[test]
fn missing_value_ends_with_closest_nodes() {
    let mut network = Network::chain(4);

    let (on_complete, outcomes) = recorder();
    network
        .node(1)
        .iterative_find_value("nothing here".to_string(), Vec::new(), Some(on_complete));
    network.pump();

    let nodes = single(&outcomes).nodes().unwrap();
    assert_eq!(nodes.len(), 3);
}

#[test]
fn index_writers_are_merged_not_overwritten() {
    let mut network = Network::chain(4);

    network.node(1).iterative_store(
        "notaries".to_string(),
        json!({"notary_index_add": "A"}),
        None,
        0,
    );
    network.pump();

    network.node(3).iterative_store(
        "notaries".to_string(),
        json!({"notary_index_add": "B"}),
        None,
        0,
    );
    network.pump();

    for n in 1..=4 {
        let index = network.node(n).get_local("notaries").unwrap();
        let mut notaries: Vec<String> = serde_json::from_value(index["notaries"].clone()).unwrap();
        notaries.sort();

        assert_eq!(notaries, vec!["A", "B"], "node {n}");
    }

    network.node(2).iterative_store(
        "notaries".to_string(),
        json!({"notary_index_remove": "A"}),
        None,
        0,
    );
    network.pump();

    for n in 1..=4 {
        assert_eq!(
            network.node(n).get_local("notaries"),
            Some(json!({"notaries": ["B"]})),
            "node {n}"
        );
    }
}

#[test]
fn keyword_listings_accumulate() {
    let mut network = Network::chain(3);

    let first = json!({"guid": "seller-1", "contract_hash": "c1"});
    let second = json!({"guid": "seller-2", "contract_hash": "c2"});

    network.node(1).iterative_store(
        "lamp".to_string(),
        json!({ "keyword_index_add": first.clone() }),
        None,
        0,
    );
    network.pump();

    network.node(3).iterative_store(
        "lamp".to_string(),
        json!({ "keyword_index_add": second.clone() }),
        None,
        0,
    );
    network.pump();

    for n in 1..=3 {
        assert_eq!(
            network.node(n).get_local("lamp"),
            Some(json!({ "listings": [first.clone(), second.clone()] })),
            "node {n}"
        );
    }
}
