//! Recording transport for coordinator tests.

use std::collections::HashSet;
use std::sync::{Arc, Mutex};

use crate::common::{Contact, FindId, Id, Message};
use crate::transport::{PeerLink, Transport};

/// Guid with `n` as its last byte.
pub fn guid(n: u8) -> Id {
    let mut bytes = [0; 20];
    bytes[19] = n;

    Id(bytes)
}

/// Contact of node `n`, listening on port `7000 + n`.
pub fn node(n: u8) -> Contact {
    Contact::new(
        guid(n),
        "127.0.0.1",
        7000 + n as u16,
        format!("pk-{n}"),
        format!("node-{n}"),
    )
}

#[derive(Debug, Default)]
struct State {
    sent: Vec<(Id, Message)>,
    connects: usize,
    unreachable: HashSet<Id>,
    fail_sends: bool,
}

#[derive(Debug, Default, Clone)]
/// [Transport] that records every message instead of sending it.
pub struct MockTransport {
    state: Arc<Mutex<State>>,
}

impl MockTransport {
    /// Everything sent so far, with the guid it was sent to.
    pub fn sent(&self) -> Vec<(Id, Message)> {
        self.state.lock().unwrap().sent.clone()
    }

    pub fn connects(&self) -> usize {
        self.state.lock().unwrap().connects
    }

    /// Fail every later `connect` to `guid`.
    pub fn make_unreachable(&self, guid: Id) {
        self.state.lock().unwrap().unreachable.insert(guid);
    }

    pub fn fail_sends(&self, fail: bool) {
        self.state.lock().unwrap().fail_sends = fail;
    }

    /// Receivers of `findNode` requests carrying `find_id`, in sending order.
    pub fn find_node_recipients(&self, find_id: &FindId) -> Vec<Id> {
        self.sent()
            .into_iter()
            .filter_map(|(to, message)| match message {
                Message::FindNode(arguments) if arguments.find_id == *find_id => Some(to),
                _ => None,
            })
            .collect()
    }

    pub fn hello_recipients(&self) -> Vec<Id> {
        self.sent()
            .into_iter()
            .filter_map(|(to, message)| match message {
                Message::Hello(_) => Some(to),
                _ => None,
            })
            .collect()
    }

    /// Messages sent to `guid`.
    pub fn sent_to(&self, guid: &Id) -> Vec<Message> {
        self.sent()
            .into_iter()
            .filter(|(to, _)| to == guid)
            .map(|(_, message)| message)
            .collect()
    }
}

impl Transport for MockTransport {
    fn connect(&mut self, contact: &Contact) -> std::io::Result<Box<dyn PeerLink>> {
        let mut state = self.state.lock().unwrap();

        if state.unreachable.contains(&contact.guid) {
            return Err(std::io::Error::new(
                std::io::ErrorKind::ConnectionRefused,
                "unreachable",
            ));
        }

        state.connects += 1;

        Ok(Box::new(MockLink {
            contact: contact.clone(),
            state: self.state.clone(),
        }))
    }
}

#[derive(Debug)]
struct MockLink {
    contact: Contact,
    state: Arc<Mutex<State>>,
}

impl PeerLink for MockLink {
    fn contact(&self) -> &Contact {
        &self.contact
    }

    fn send_raw(&mut self, bytes: &[u8]) -> std::io::Result<()> {
        let mut state = self.state.lock().unwrap();

        if state.fail_sends {
            return Err(std::io::Error::new(
                std::io::ErrorKind::BrokenPipe,
                "link closed",
            ));
        }

        let message = Message::from_bytes(bytes)
            .map_err(|error| std::io::Error::new(std::io::ErrorKind::InvalidData, error))?;
        state.sent.push((self.contact.guid, message));

        Ok(())
    }
}
