//! Dht node.

use std::net::{SocketAddr, UdpSocket};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use flume::{Receiver, RecvTimeoutError, Sender, TryRecvError};
use serde_json::Value;
use tracing::{debug, info, trace};

use crate::actor::{Config, Coordinator, Info};
use crate::common::{Contact, FindId, Id, Message};
use crate::core::search::{OnComplete, SearchKind, SearchOutcome};
use crate::transport::{UdpTransport, MTU};
use crate::Error;

/// How long the actor loop waits for a datagram or a request before ticking again.
pub const TICK_INTERVAL: Duration = Duration::from_millis(50);

#[derive(Debug, Clone)]
/// DHT node handle. Cloning it is cheap, every clone talks to the same actor thread.
pub struct Dht(pub(crate) Sender<ActorMessage>);

impl Dht {
    /// Bind a UDP socket, start the actor thread, and bootstrap from [Config::bootstrap].
    pub fn new(config: Config) -> Result<Self, std::io::Error> {
        let port = config.port.unwrap_or(0);
        let socket = UdpSocket::bind(SocketAddr::from(([0, 0, 0, 0], port)))?;
        socket.set_read_timeout(Some(TICK_INTERVAL))?;

        let local_addr = socket.local_addr()?;
        let socket = Arc::new(socket);

        let config = Config {
            port: Some(local_addr.port()),
            ..config
        };

        let transport = UdpTransport::new(socket.clone());
        let mut coordinator = Coordinator::new(&config, Box::new(transport));

        info!(?local_addr, guid = ?coordinator.id(), "DHT listening");

        let (sender, receiver) = flume::unbounded();

        thread::Builder::new()
            .name("bazaar-dht".to_string())
            .spawn(move || {
                coordinator.bootstrap(&config.bootstrap);
                run(coordinator, receiver, Some(socket))
            })?;

        Ok(Dht(sender))
    }

    /// Run any [Coordinator] on the actor thread.
    ///
    /// Nothing is read from the network, inbound messages come from [Dht::deliver].
    pub fn with_coordinator(coordinator: Coordinator) -> Result<Self, std::io::Error> {
        let (sender, receiver) = flume::unbounded();

        thread::Builder::new()
            .name("bazaar-dht".to_string())
            .spawn(move || run(coordinator, receiver, None))?;

        Ok(Dht(sender))
    }

    // === Getters ===

    /// Information about this node.
    pub fn info(&self) -> Result<Info, DhtWasShutdown> {
        let (sender, receiver) = flume::bounded::<Info>(1);

        self.send(ActorMessage::Info(sender))?;

        receiver.recv().map_err(|_| DhtWasShutdown)
    }

    pub fn active_peers(&self) -> Result<Vec<Contact>, DhtWasShutdown> {
        let (sender, receiver) = flume::bounded::<Vec<Contact>>(1);

        self.send(ActorMessage::ActivePeers(sender))?;

        receiver.recv().map_err(|_| DhtWasShutdown)
    }

    /// Value held by this node under `key`, without a network lookup.
    pub fn get_local(&self, key: &str) -> Result<Option<Value>, DhtWasShutdown> {
        let (sender, receiver) = flume::bounded::<Option<Value>>(1);

        self.send(ActorMessage::GetLocal(key.to_string(), sender))?;

        receiver.recv().map_err(|_| DhtWasShutdown)
    }

    // === Peers ===

    /// Admit `contact` and send it our hello.
    pub fn add_peer(&self, contact: Contact) -> Result<Result<Contact, Error>, DhtWasShutdown> {
        let (sender, receiver) = flume::bounded::<Result<Contact, Error>>(1);

        self.send(ActorMessage::AddPeer(contact, sender))?;

        receiver.recv().map_err(|_| DhtWasShutdown)
    }

    pub fn remove_peer(&self, guid: Id) -> Result<(), DhtWasShutdown> {
        self.send(ActorMessage::RemovePeer(guid))
    }

    // === Searches ===

    /// Start a lookup for `key` without waiting for it.
    pub fn search(&self, key: &str, kind: SearchKind) -> Result<Search, DhtWasShutdown> {
        let (started_sender, started) = flume::bounded::<Option<FindId>>(1);
        let (sender, receiver) = flume::bounded::<SearchOutcome>(1);

        self.send(ActorMessage::Search(
            key.to_string(),
            kind,
            sender,
            started_sender,
        ))?;

        let find_id = started.recv().map_err(|_| DhtWasShutdown)?;

        Ok(Search { find_id, receiver })
    }

    /// Closest nodes to `key`, closest first.
    pub fn find_node(&self, key: &str) -> Result<Vec<Contact>, DhtWasShutdown> {
        Ok(self
            .search(key, SearchKind::FindNode)?
            .wait()
            .and_then(SearchOutcome::nodes)
            .unwrap_or_default())
    }

    /// Value stored under `key` at the nodes closest to it, if any of them has it.
    pub fn find_value(&self, key: &str) -> Result<Option<Value>, DhtWasShutdown> {
        Ok(self
            .search(key, SearchKind::FindValue)?
            .wait()
            .and_then(SearchOutcome::value))
    }

    /// Stop a search started with [Dht::search]. Its [Search::wait] returns `None`.
    pub fn cancel(&self, find_id: FindId) -> Result<(), DhtWasShutdown> {
        self.send(ActorMessage::Cancel(find_id))
    }

    // === Store ===

    /// Store `value` under `key`, locally and at the nodes closest to `key`, as its
    /// original publisher.
    ///
    /// Returns once the lookup for the closest nodes started.
    pub fn store(&self, key: &str, value: Value) -> Result<(), DhtWasShutdown> {
        self.send(ActorMessage::Store(key.to_string(), value))
    }

    /// Hand an inbound message to the actor, as if it came from the network.
    pub fn deliver(&self, message: Message) -> Result<(), DhtWasShutdown> {
        self.send(ActorMessage::Deliver(message))
    }

    /// Shutdown the actor thread loop.
    pub fn shutdown(&mut self) {
        let (sender, receiver) = flume::bounded::<()>(1);

        let _ = self.0.send(ActorMessage::Shutdown(sender));
        let _ = receiver.recv();
    }

    // === Private Methods ===

    fn send(&self, message: ActorMessage) -> Result<(), DhtWasShutdown> {
        self.0.send(message).map_err(|_| DhtWasShutdown)
    }
}

/// A running lookup started by [Dht::search].
#[derive(Debug)]
pub struct Search {
    find_id: Option<FindId>,
    receiver: Receiver<SearchOutcome>,
}

impl Search {
    /// `None` if the search completed immediately because nobody was known to ask.
    pub fn find_id(&self) -> Option<FindId> {
        self.find_id
    }

    /// Block until the search completes. `None` if it was cancelled or the node shut down.
    pub fn wait(self) -> Option<SearchOutcome> {
        self.receiver.recv().ok()
    }
}

fn run(
    mut coordinator: Coordinator,
    receiver: Receiver<ActorMessage>,
    socket: Option<Arc<UdpSocket>>,
) {
    let mut buf = [0_u8; MTU];

    loop {
        let flow = match &socket {
            Some(socket) => {
                let flow = drain_requests(&mut coordinator, &receiver);

                if let Flow::Continue = flow {
                    receive_datagram(&mut coordinator, socket, &mut buf);
                }

                flow
            }
            None => match receiver.recv_timeout(TICK_INTERVAL) {
                Ok(message) => handle(&mut coordinator, message),
                Err(RecvTimeoutError::Timeout) => Flow::Continue,
                Err(RecvTimeoutError::Disconnected) => Flow::Shutdown(None),
            },
        };

        if let Flow::Shutdown(sender) = flow {
            info!(guid = ?coordinator.id(), "DHT actor shutting down");

            // Pending requests are dropped with the channel, their callers get DhtWasShutdown.
            receiver.drain().for_each(drop);
            drop(receiver);

            if let Some(sender) = sender {
                let _ = sender.send(());
            }

            return;
        }

        coordinator.tick();
    }
}

enum Flow {
    Continue,
    Shutdown(Option<Sender<()>>),
}

/// Handle every queued request.
fn drain_requests(coordinator: &mut Coordinator, receiver: &Receiver<ActorMessage>) -> Flow {
    loop {
        match receiver.try_recv() {
            Ok(message) => {
                if let Flow::Shutdown(sender) = handle(coordinator, message) {
                    return Flow::Shutdown(sender);
                }
            }
            Err(TryRecvError::Empty) => return Flow::Continue,
            Err(TryRecvError::Disconnected) => {
                debug!("All Dht handles were dropped");
                return Flow::Shutdown(None);
            }
        }
    }
}

/// Read at most one datagram and hand it to the coordinator.
fn receive_datagram(coordinator: &mut Coordinator, socket: &UdpSocket, buf: &mut [u8]) {
    let (amt, from) = match socket.recv_from(buf) {
        Ok(received) => received,
        Err(error) if is_idle(&error) => return,
        Err(error) => {
            // Often an ICMP error from an earlier send, the socket stays usable.
            debug!(?error, "Failed to receive a datagram");
            return;
        }
    };

    match Message::from_bytes(&buf[..amt]) {
        Ok(message) => coordinator.handle_message(message),
        Err(error) => {
            debug!(?from, ?error, "Dropping undecodable datagram");
        }
    }
}

/// Nothing arrived within the read timeout.
fn is_idle(error: &std::io::Error) -> bool {
    matches!(
        error.kind(),
        std::io::ErrorKind::WouldBlock | std::io::ErrorKind::TimedOut
    )
}

fn handle(coordinator: &mut Coordinator, message: ActorMessage) -> Flow {
    match message {
        ActorMessage::Info(sender) => {
            let _ = sender.send(coordinator.info());
        }
        ActorMessage::ActivePeers(sender) => {
            let _ = sender.send(coordinator.active_peers());
        }
        ActorMessage::GetLocal(key, sender) => {
            let _ = sender.send(coordinator.get_local(&key));
        }
        ActorMessage::AddPeer(contact, sender) => {
            let _ = sender.send(coordinator.introduce(contact));
        }
        ActorMessage::RemovePeer(guid) => coordinator.remove_peer(&guid),
        ActorMessage::Search(key, kind, sender, started) => {
            let find_id =
                coordinator.iterative_find(key, Vec::new(), kind, Some(OnComplete::Reply(sender)));

            let _ = started.send(find_id);
        }
        ActorMessage::Cancel(find_id) => {
            coordinator.cancel_search(&find_id);
        }
        ActorMessage::Store(key, value) => {
            trace!(key, "Store requested");
            coordinator.iterative_store(key, value, None, 0);
        }
        ActorMessage::Deliver(message) => coordinator.handle_message(message),
        ActorMessage::Shutdown(sender) => return Flow::Shutdown(Some(sender)),
    }

    Flow::Continue
}

#[derive(Debug)]
pub(crate) enum ActorMessage {
    Info(Sender<Info>),
    ActivePeers(Sender<Vec<Contact>>),
    GetLocal(String, Sender<Option<Value>>),
    AddPeer(Contact, Sender<Result<Contact, Error>>),
    RemovePeer(Id),
    Search(
        String,
        SearchKind,
        Sender<SearchOutcome>,
        Sender<Option<FindId>>,
    ),
    Cancel(FindId),
    Store(String, Value),
    Deliver(Message),
    Shutdown(Sender<()>),
}

#[derive(thiserror::Error, Debug, Clone, Copy, PartialEq, Eq)]
#[error("The Dht was shutdown")]
/// The actor thread is gone, after [Dht::shutdown] or a panic.
pub struct DhtWasShutdown;

#[cfg(test)]
mod test {
    use serde_json::json;

    use crate::actor::mock::{guid, node, MockTransport};
    use crate::common::{FindNodeResponseArguments, HelloArguments, PROTOCOL_VERSION};

    use super::*;

    fn dht(transport: &MockTransport) -> Dht {
        let config = Config {
            guid: Some(guid(1)),
            port: Some(7001),
            pubkey: "pk-1".to_string(),
            ..Config::default()
        };

        Dht::with_coordinator(Coordinator::new(&config, Box::new(transport.clone()))).unwrap()
    }

    #[test]
    fn receive_survives_timeouts() {
        let transport = MockTransport::default();
        let config = Config {
            guid: Some(guid(1)),
            pubkey: "pk-1".to_string(),
            ..Config::default()
        };
        let mut coordinator = Coordinator::new(&config, Box::new(transport.clone()));

        let socket = UdpSocket::bind("127.0.0.1:0").unwrap();
        socket
            .set_read_timeout(Some(Duration::from_millis(10)))
            .unwrap();
        let mut buf = [0_u8; MTU];

        receive_datagram(&mut coordinator, &socket, &mut buf);

        let hello = Message::Hello(HelloArguments {
            pubkey: "pk-2".to_string(),
            sender_guid: guid(2),
            hostname: "127.0.0.1".to_string(),
            port: 7002,
            sender_nick: "node-2".to_string(),
            v: PROTOCOL_VERSION,
        });
        UdpSocket::bind("127.0.0.1:0")
            .unwrap()
            .send_to(&hello.to_bytes().unwrap(), socket.local_addr().unwrap())
            .unwrap();

        receive_datagram(&mut coordinator, &socket, &mut buf);

        assert_eq!(coordinator.active_peers(), vec![node(2)]);
    }

    #[test]
    fn idle_errors() {
        use std::io::{Error, ErrorKind};

        assert!(is_idle(&Error::from(ErrorKind::WouldBlock)));
        assert!(is_idle(&Error::from(ErrorKind::TimedOut)));
        assert!(!is_idle(&Error::from(ErrorKind::ConnectionReset)));
        assert!(!is_idle(&Error::from(ErrorKind::ConnectionRefused)));
    }

    #[test]
    fn shutdown() {
        let mut dht = dht(&MockTransport::default());

        let clone = dht.clone();

        dht.shutdown();

        assert_eq!(clone.info().unwrap_err(), DhtWasShutdown);
        assert!(clone.store("k", json!(1)).is_err());
    }

    #[test]
    fn add_peer_greets() {
        let transport = MockTransport::default();
        let dht = dht(&transport);

        dht.add_peer(node(2)).unwrap().unwrap();

        assert_eq!(dht.active_peers().unwrap(), vec![node(2)]);
        assert_eq!(transport.hello_recipients(), vec![guid(2)]);
        assert_eq!(dht.info().unwrap().routing_table_size(), 1);

        dht.remove_peer(guid(2)).unwrap();
        assert!(dht.active_peers().unwrap().is_empty());
    }

    #[test]
    fn find_node_through_delivered_replies() {
        let transport = MockTransport::default();
        let dht = dht(&transport);

        dht.add_peer(node(2)).unwrap().unwrap();

        let search = dht.search("deadbeef", SearchKind::FindNode).unwrap();
        let find_id = search.find_id().unwrap();

        let sender = node(2);
        dht.deliver(Message::FindNodeResponse(FindNodeResponseArguments {
            sender_guid: sender.guid,
            hostname: sender.hostname,
            port: sender.port,
            pubkey: sender.pubkey,
            sender_nick: sender.nickname,
            find_id,
            found_key: None,
            found_nodes: Some(vec![]),
        }))
        .unwrap();

        assert_eq!(
            search.wait().and_then(SearchOutcome::nodes),
            Some(vec![node(2)])
        );
    }

    #[test]
    fn cancel_search() {
        let transport = MockTransport::default();
        let dht = dht(&transport);

        dht.add_peer(node(2)).unwrap().unwrap();

        let search = dht.search("deadbeef", SearchKind::FindValue).unwrap();
        dht.cancel(search.find_id().unwrap()).unwrap();

        assert_eq!(search.wait(), None);
    }

    #[test]
    fn store_and_get_local() {
        let transport = MockTransport::default();
        let dht = dht(&transport);

        let peer = node(2);
        dht.deliver(Message::Hello(HelloArguments {
            pubkey: peer.pubkey.clone(),
            sender_guid: peer.guid,
            hostname: peer.hostname.clone(),
            port: peer.port,
            sender_nick: peer.nickname.clone(),
            v: PROTOCOL_VERSION,
        }))
        .unwrap();

        dht.store("notaries", json!({"notary_index_add": "A"})).unwrap();

        // Nobody answers, so nothing is stored until the lookup is done.
        assert_eq!(dht.get_local("notaries").unwrap(), None);
        assert_eq!(dht.info().unwrap().active_searches(), 1);
    }

    #[test]
    fn find_value_with_nobody_to_ask() {
        let dht = dht(&MockTransport::default());

        assert_eq!(dht.find_value("k").unwrap(), None);
        assert!(dht.find_node("k").unwrap().is_empty());
    }
}
