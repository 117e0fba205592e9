//! Actor implementation - I/O orchestration layer for the DHT.

pub(crate) mod config;
mod handle_request;
mod handle_response;
mod info;
#[cfg(test)]
pub(crate) mod mock;

use std::collections::HashMap;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use serde_json::Value;
use tracing::{debug, info, trace, warn};

use crate::common::{
    Contact, DataStore, FindId, FindNodeArguments, HelloArguments, Id, KademliaTable,
    MemoryStore, Message, RoutingTable, StoreValueArguments, StoredRecord, PROTOCOL_VERSION,
};
use crate::core::index;
use crate::core::replication::{plan_republish, Maintenance, ReplicationSettings};
use crate::core::search::{OnComplete, PendingStore, SearchKind, SearchOutcome, SearchSession};
use crate::transport::{PeerLink, Transport};
use crate::Error;

pub use config::{Config, ALPHA, DEFAULT_SEARCH_TIMEOUT};
pub use info::Info;

#[derive(Debug)]
/// An admitted peer and the link we talk to it over.
struct Peer {
    contact: Contact,
    link: Box<dyn PeerLink>,
}

#[derive(Debug)]
/// Single-writer DHT state machine: peers, searches, the routing table and the local store.
///
/// Nothing in here blocks on the network. Requests go out through [PeerLink]s, and replies
/// come back whenever the caller feeds them to [Coordinator::handle_message].
pub struct Coordinator {
    contact: Contact,
    market_id: String,

    k: usize,
    alpha: usize,
    search_timeout: Duration,
    replication: ReplicationSettings,

    routing_table: Box<dyn RoutingTable>,
    store: Box<dyn DataStore>,
    transport: Box<dyn Transport>,

    /// Active peers, at most one per guid.
    peers: HashMap<Id, Peer>,
    /// In-flight searches by their correlation token.
    searches: HashMap<FindId, SearchSession>,

    maintenance: Maintenance,
}

impl Coordinator {
    /// Creates a Coordinator with a [KademliaTable] and a [MemoryStore].
    pub fn new(config: &Config, transport: Box<dyn Transport>) -> Self {
        let guid = config.guid.unwrap_or_else(Id::random);

        Self::with_collaborators(
            config,
            Box::new(KademliaTable::with_refresh_interval(
                guid,
                config.refresh_interval,
            )),
            Box::new(MemoryStore::new(config.max_values)),
            transport,
        )
    }

    /// Creates a Coordinator over any collaborators. This node's guid is the routing table's id.
    pub fn with_collaborators(
        config: &Config,
        routing_table: Box<dyn RoutingTable>,
        store: Box<dyn DataStore>,
        transport: Box<dyn Transport>,
    ) -> Self {
        let guid = *routing_table.id();

        // Peers drop findNode requests without a pubkey.
        let pubkey = if config.pubkey.is_empty() {
            guid.to_string()
        } else {
            config.pubkey.clone()
        };

        let contact = Contact::new(
            guid,
            config.hostname.clone(),
            config.port.unwrap_or(0),
            pubkey,
            config.nickname.clone(),
        );

        info!(guid = ?contact.guid, hostname = %contact.hostname, port = contact.port, "DHT coordinator created");

        Self {
            contact,
            market_id: config.market_id.clone(),

            k: config.k,
            alpha: config.alpha,
            search_timeout: config.search_timeout,
            replication: ReplicationSettings {
                expire_timeout: config.expire_timeout,
                replicate_interval: config.replicate_interval,
                clock_skew_margin: config.clock_skew_margin,
            },

            routing_table,
            store,
            transport,

            peers: HashMap::new(),
            searches: HashMap::new(),

            maintenance: Maintenance::new(config.refresh_interval.min(config.replicate_interval)),
        }
    }

    // === Getters ===

    /// Returns the node's Id
    pub fn id(&self) -> &Id {
        &self.contact.guid
    }

    /// This node as other nodes see it.
    pub fn contact(&self) -> &Contact {
        &self.contact
    }

    pub fn routing_table(&self) -> &dyn RoutingTable {
        self.routing_table.as_ref()
    }

    pub fn store(&self) -> &dyn DataStore {
        self.store.as_ref()
    }

    /// Contacts of all admitted peers, in no particular order.
    pub fn active_peers(&self) -> Vec<Contact> {
        self.peers.values().map(|peer| peer.contact.clone()).collect()
    }

    /// Number of searches not completed yet.
    pub fn active_searches(&self) -> usize {
        self.searches.len()
    }

    pub fn search(&self, find_id: &FindId) -> Option<&SearchSession> {
        self.searches.get(find_id)
    }

    /// Value stored locally under `key`, without asking the network.
    pub fn get_local(&self, key: &str) -> Option<Value> {
        self.store.get(key)
    }

    /// Returns a lightweight summary of this node's state.
    pub fn info(&self) -> Info {
        Info::from(self)
    }

    // === Peers ===

    /// Admit a peer, or refresh the record of an already active one.
    ///
    /// A known guid at a new `hostname:port` gets a new link. Any change to the record is
    /// registered again in the routing table. A new guid gets a link from the transport and
    /// is registered in the routing table; if the transport fails, nothing is recorded.
    pub fn add_peer(&mut self, contact: Contact) -> Result<Contact, Error> {
        if self.is_self(&contact) {
            return Err(Error::SelfContact);
        }

        let guid = contact.guid;

        if let Some(peer) = self.peers.get_mut(&guid) {
            if !peer.contact.same_address(&contact) {
                debug!(?guid, hostname = %contact.hostname, port = contact.port, "Peer moved, opening a new link");

                peer.link = self
                    .transport
                    .connect(&contact)
                    .map_err(|source| Error::PeerCreationFailed { guid, source })?;
            }

            if peer.contact.differs_from(&contact) {
                peer.contact = contact;

                self.routing_table.remove_contact(&guid);
                self.routing_table.add_contact(peer.contact.clone());
            }

            return Ok(peer.contact.clone());
        }

        let link = self
            .transport
            .connect(&contact)
            .map_err(|source| Error::PeerCreationFailed { guid, source })?;

        self.routing_table.add_contact(contact.clone());
        self.peers.insert(
            guid,
            Peer {
                contact: contact.clone(),
                link,
            },
        );

        debug!(?guid, hostname = %contact.hostname, port = contact.port, "Added peer");

        Ok(contact)
    }

    /// [Self::add_peer], then send the peer our `hello`.
    pub fn introduce(&mut self, contact: Contact) -> Result<Contact, Error> {
        let contact = self.add_peer(contact)?;
        self.greet(&contact.guid);

        Ok(contact)
    }

    /// Forget a peer. Unknown guids are ignored.
    pub fn remove_peer(&mut self, guid: &Id) {
        if self.peers.remove(guid).is_some() {
            debug!(?guid, "Removed peer");
        }

        self.routing_table.remove_contact(guid);
    }

    /// Admit and greet `seeds`, then look up our own guid to fill the routing table.
    pub fn bootstrap(&mut self, seeds: &[Contact]) {
        let mut admitted = 0;

        for seed in seeds {
            match self.introduce(seed.clone()) {
                Ok(_) => admitted += 1,
                Err(error) => warn!(guid = ?seed.guid, ?error, "Could not add bootstrap node"),
            }
        }

        if admitted == 0 {
            debug!("No bootstrap nodes, starting a new network");
            return;
        }

        let own_key = self.id().to_string();
        self.iterative_find_node(own_key, Vec::new(), None);
    }

    // === Messages ===

    /// Handle one inbound message.
    pub fn handle_message(&mut self, message: Message) {
        trace!(kind = message.kind(), sender = ?message.sender_guid(), "Received message");

        match message {
            Message::FindNode(arguments) => self.handle_find_node(arguments),
            Message::FindNodeResponse(arguments) => self.handle_find_node_response(arguments),
            Message::StoreValue(arguments) => self.handle_store_value(arguments),
            Message::Hello(arguments) => self.handle_hello(arguments),
        }
    }

    // === Searches ===

    /// Start an iterative lookup for `key`.
    ///
    /// An empty `shortlist` is seeded from the routing table. If there is still nobody to ask,
    /// the search completes right away with no nodes and `None` is returned.
    pub fn iterative_find(
        &mut self,
        key: String,
        shortlist: Vec<Contact>,
        kind: SearchKind,
        on_complete: Option<OnComplete>,
    ) -> Option<FindId> {
        let mut session = SearchSession::new(key, kind, on_complete, self.search_timeout);
        let target = session.target();

        let shortlist = if shortlist.is_empty() {
            let seeds = self
                .routing_table
                .find_close_nodes(&target, self.alpha, Some(self.id()));
            self.routing_table.touch_kbucket(&target);

            seeds
        } else {
            shortlist
        };

        let seeds: Vec<Contact> = shortlist
            .into_iter()
            .filter(|contact| !self.is_self(contact))
            .collect();
        session.extend_shortlist(seeds);

        if session.shortlist().is_empty() {
            debug!(key = session.key(), ?kind, "Nobody to ask, search ends empty");
            self.complete(session, SearchOutcome::Nodes(Vec::new()));

            return None;
        }

        let find_id = session.find_id();
        self.searches.insert(find_id, session);

        self.iterate(&find_id);

        Some(find_id)
    }

    pub fn iterative_find_node(
        &mut self,
        key: String,
        shortlist: Vec<Contact>,
        on_complete: Option<OnComplete>,
    ) -> Option<FindId> {
        self.iterative_find(key, shortlist, SearchKind::FindNode, on_complete)
    }

    pub fn iterative_find_value(
        &mut self,
        key: String,
        shortlist: Vec<Contact>,
        on_complete: Option<OnComplete>,
    ) -> Option<FindId> {
        self.iterative_find(key, shortlist, SearchKind::FindValue, on_complete)
    }

    /// Drop a search without completing it. Returns `false` if it was not running.
    pub fn cancel_search(&mut self, find_id: &FindId) -> bool {
        let cancelled = self.searches.remove(find_id).is_some();

        if cancelled {
            debug!(?find_id, "Search cancelled");
        }

        cancelled
    }

    // === Store ===

    /// Store `value` at the nodes closest to `key`, once a node search finds them.
    ///
    /// `original_publisher` defaults to this node.
    pub fn iterative_store(
        &mut self,
        key: String,
        value: Value,
        original_publisher: Option<Id>,
        age: u64,
    ) -> Option<FindId> {
        let original_publisher = original_publisher.unwrap_or(*self.id());
        let originally_published_at = unix_now().saturating_sub(age);

        self.iterative_store_published(key, value, original_publisher, originally_published_at)
    }

    /// [Self::iterative_store] with an absolute original publish time.
    fn iterative_store_published(
        &mut self,
        key: String,
        value: Value,
        original_publisher: Id,
        originally_published_at: u64,
    ) -> Option<FindId> {
        let pending = PendingStore {
            key: key.clone(),
            value,
            original_publisher,
            originally_published_at,
        };

        self.iterative_find_node(key, Vec::new(), Some(OnComplete::Store(pending)))
    }

    /// Persist `value` locally, merging index updates, then send it to every node in `nodes`.
    pub fn store_key_value(
        &mut self,
        nodes: &[Contact],
        key: String,
        value: Value,
        original_publisher: Id,
        age: u64,
    ) {
        self.store_key_value_at(unix_now(), nodes, key, value, original_publisher, age)
    }

    fn store_key_value_at(
        &mut self,
        now: u64,
        nodes: &[Contact],
        key: String,
        value: Value,
        original_publisher: Id,
        age: u64,
    ) {
        let originally_published_at = now.saturating_sub(age);

        self.store_published(
            now,
            nodes,
            key,
            value,
            original_publisher,
            originally_published_at,
        )
    }

    /// Merge and persist locally, then send to `nodes` with the age the record has at `now`.
    fn store_published(
        &mut self,
        now: u64,
        nodes: &[Contact],
        key: String,
        value: Value,
        original_publisher: Id,
        originally_published_at: u64,
    ) {
        let existing = self.store.get(&key);

        let Some(merged) = index::merge(value.clone(), existing) else {
            debug!(key, "Index update has nothing to apply, store aborted");
            return;
        };

        self.persist(now, key.clone(), merged, original_publisher, originally_published_at);

        let age = now.saturating_sub(originally_published_at);

        let message = Message::StoreValue(StoreValueArguments {
            key,
            value,
            original_publisher_id: original_publisher,
            age,
        });

        for node in nodes {
            if self.is_self(node) {
                continue;
            }

            self.send_to(node, &message);
        }
    }

    // === Maintenance ===

    /// Expire overdue searches, and run [Self::refresh_and_republish] when it is due.
    ///
    /// Call periodically.
    pub fn tick(&mut self) {
        self.expire_searches(Instant::now());

        if self.maintenance.is_due() {
            self.refresh_and_republish();
        }
    }

    /// Refresh stale buckets, republish our own records, replicate others' records and drop
    /// the expired ones.
    pub fn refresh_and_republish(&mut self) {
        self.refresh_and_republish_at(unix_now())
    }

    fn refresh_and_republish_at(&mut self, now: u64) {
        let refresh_list = self.routing_table.refresh_list(0, false);

        if !refresh_list.is_empty() {
            debug!(buckets = refresh_list.len(), "Refreshing buckets");
        }

        for target in refresh_list {
            self.iterative_find_node(target.to_string(), Vec::new(), None);
        }

        let plan = plan_republish(self.store.as_ref(), self.id(), now, &self.replication);

        for key in plan.republish {
            if let Some(value) = self.store.get(&key) {
                debug!(key, "Republishing own record");
                self.iterative_store(key, value, None, 0);
            }
        }

        for (key, originally_published_at) in plan.replicate {
            let (Some(value), Some(publisher)) =
                (self.store.get(&key), self.store.original_publisher_id(&key))
            else {
                continue;
            };

            trace!(key, originally_published_at, "Replicating record");
            self.iterative_store_published(key, value, publisher, originally_published_at);
        }

        for key in plan.expire {
            debug!(key, "Record expired");
            self.store.delete(&key);
        }
    }

    /// Complete every search whose deadline passed, with the nodes it found so far.
    fn expire_searches(&mut self, now: Instant) {
        let expired: Vec<FindId> = self
            .searches
            .values()
            .filter(|session| session.is_expired(now))
            .map(|session| session.find_id())
            .collect();

        for find_id in expired {
            if let Some(session) = self.searches.remove(&find_id) {
                debug!(?find_id, key = session.key(), "Search timed out");

                let nodes = self.final_nodes(&session);
                self.complete(session, SearchOutcome::Nodes(nodes));
            }
        }
    }

    // === Private Methods ===

    /// Probe every shortlist node of a search that was not contacted yet.
    fn iterate(&mut self, find_id: &FindId) {
        let Some(session) = self.searches.get(find_id) else {
            // Cancelled meanwhile.
            return;
        };

        let slow_nodes = session.active_probes().len();
        let kind = session.kind();
        let key = session.key().to_string();

        let mut probes = Vec::new();

        for node in session.uncontacted() {
            if self.is_self(&node) {
                continue;
            }

            match self.resolve(&node.guid) {
                Some(contact) => probes.push(contact),
                None => debug!(guid = ?node.guid, "Shortlist node can't be resolved, skipping"),
            }
        }

        trace!(?find_id, slow_nodes, probes = probes.len(), "Search iteration");

        if let Some(session) = self.searches.get_mut(find_id) {
            for contact in &probes {
                session.probe(contact.guid);
            }
        }

        let request = Message::FindNode(FindNodeArguments {
            sender_guid: self.contact.guid,
            hostname: self.contact.hostname.clone(),
            port: self.contact.port,
            key,
            find_value: kind == SearchKind::FindValue,
            sender_nick: self.contact.nickname.clone(),
            find_id: *find_id,
            pubkey: self.contact.pubkey.clone(),
        });

        for contact in probes {
            if !self.send_to(&contact, &request) {
                if let Some(session) = self.searches.get_mut(find_id) {
                    session.satisfy_probe(&contact.guid);
                }
            }
        }

        // Nobody left to answer, no convergence check will ever come.
        let stalled = self
            .searches
            .get(find_id)
            .is_some_and(|session| session.active_probes().is_empty());

        if stalled {
            self.converge(find_id);
        }
    }

    /// Remove a search and complete it with its shortlist.
    fn converge(&mut self, find_id: &FindId) {
        if let Some(session) = self.searches.remove(find_id) {
            let nodes = self.final_nodes(&session);

            debug!(?find_id, key = session.key(), nodes = nodes.len(), "Search converged");

            self.complete(session, SearchOutcome::Nodes(nodes));
        }
    }

    fn final_nodes(&self, session: &SearchSession) -> Vec<Contact> {
        session
            .shortlist()
            .nodes()
            .iter()
            .take(self.k)
            .cloned()
            .collect()
    }

    /// Fire the completion of a search already removed from `searches`.
    fn complete(&mut self, mut session: SearchSession, outcome: SearchOutcome) {
        match session.take_on_complete() {
            Some(OnComplete::Reply(sender)) => {
                let _ = sender.send(outcome);
            }
            Some(OnComplete::Callback(callback)) => callback(outcome),
            Some(OnComplete::Store(pending)) => match outcome {
                SearchOutcome::Nodes(nodes) => self.store_published(
                    unix_now(),
                    &nodes,
                    pending.key,
                    pending.value,
                    pending.original_publisher,
                    pending.originally_published_at,
                ),
                SearchOutcome::Value(_) => {
                    debug!(key = pending.key, "Store search ended with a value, not storing")
                }
            },
            None => {}
        }
    }

    fn persist(
        &mut self,
        now: u64,
        key: String,
        value: Value,
        original_publisher: Id,
        originally_published_at: u64,
    ) {
        trace!(key, originally_published_at, ?original_publisher, "Storing value");

        self.store.set(
            key,
            StoredRecord {
                value,
                last_published: now,
                originally_published_at,
                original_publisher,
                market_id: self.market_id.clone(),
            },
        );
    }

    /// Send `message` to `contact`, opening a link first if it is not an active peer.
    ///
    /// Returns `false` if the message could not be sent.
    fn send_to(&mut self, contact: &Contact, message: &Message) -> bool {
        if !self.peers.contains_key(&contact.guid) {
            if let Err(error) = self.add_peer(contact.clone()) {
                warn!(guid = ?contact.guid, ?error, "Could not open a link");
                return false;
            }
        }

        let Some(peer) = self.peers.get_mut(&contact.guid) else {
            return false;
        };

        match peer.link.send(message) {
            Ok(()) => true,
            Err(error) => {
                warn!(guid = ?contact.guid, kind = message.kind(), ?error, "Failed to send message");
                false
            }
        }
    }

    /// Send our `hello` to an active peer.
    fn greet(&mut self, guid: &Id) {
        let hello = self.hello();

        if let Some(peer) = self.peers.get_mut(guid) {
            if let Err(error) = peer.link.start_handshake(&hello) {
                warn!(?guid, ?error, "Failed to send hello");
            }
        }
    }

    fn hello(&self) -> Message {
        Message::Hello(HelloArguments {
            pubkey: self.contact.pubkey.clone(),
            sender_guid: self.contact.guid,
            hostname: self.contact.hostname.clone(),
            port: self.contact.port,
            sender_nick: self.contact.nickname.clone(),
            v: PROTOCOL_VERSION,
        })
    }

    /// Contact to message for `guid`, from the routing table or the active peers.
    fn resolve(&self, guid: &Id) -> Option<Contact> {
        self.routing_table
            .get_contact(guid)
            .or_else(|| self.peers.get(guid).map(|peer| peer.contact.clone()))
    }

    /// Returns `true` if `contact` is this node, by guid, pubkey, or address.
    fn is_self(&self, contact: &Contact) -> bool {
        contact.guid == self.contact.guid
            || (!contact.pubkey.is_empty() && contact.pubkey == self.contact.pubkey)
            || contact.same_address(&self.contact)
    }
}

/// Seconds since the Unix epoch.
pub(crate) fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|duration| duration.as_secs())
        .unwrap_or_default()
}
