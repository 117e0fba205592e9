//! State of one iterative lookup and its correlation with asynchronous replies.

use std::collections::HashSet;
use std::fmt::{self, Debug, Formatter};
use std::time::{Duration, Instant};

use flume::Sender;
use serde_json::Value;
use tracing::trace;

use crate::common::{ClosestNodes, Contact, FindId, Id};

/// What the lookup is after.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SearchKind {
    FindNode,
    FindValue,
}

/// Terminal result of a search.
#[derive(Debug, Clone, PartialEq)]
pub enum SearchOutcome {
    /// Closest nodes to the target, closest first.
    Nodes(Vec<Contact>),
    /// A node answered a value search with the stored value.
    Value(Value),
}

impl SearchOutcome {
    pub fn nodes(self) -> Option<Vec<Contact>> {
        match self {
            SearchOutcome::Nodes(nodes) => Some(nodes),
            SearchOutcome::Value(_) => None,
        }
    }

    pub fn value(self) -> Option<Value> {
        match self {
            SearchOutcome::Value(value) => Some(value),
            SearchOutcome::Nodes(_) => None,
        }
    }
}

/// A store waiting for the closest nodes of its key.
#[derive(Debug, Clone, PartialEq)]
pub struct PendingStore {
    pub key: String,
    pub value: Value,
    pub original_publisher: Id,
    /// Unix seconds. The age sent with the value is computed from it once the nodes are found.
    pub originally_published_at: u64,
}

/// What to do with a search's [SearchOutcome], consumed exactly once.
pub enum OnComplete {
    /// Send the outcome to whoever is waiting on the channel.
    Reply(Sender<SearchOutcome>),
    /// Store a value at the nodes found.
    Store(PendingStore),
    Callback(Box<dyn FnOnce(SearchOutcome) + Send>),
}

impl Debug for OnComplete {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            OnComplete::Reply(_) => write!(f, "OnComplete::Reply"),
            OnComplete::Store(pending) => write!(f, "OnComplete::Store({:?})", pending.key),
            OnComplete::Callback(_) => write!(f, "OnComplete::Callback"),
        }
    }
}

/// One in-flight iterative lookup (node or value search).
#[derive(Debug)]
pub struct SearchSession {
    find_id: FindId,
    key: String,
    kind: SearchKind,
    shortlist: ClosestNodes,
    already_contacted: HashSet<Id>,
    active_probes: HashSet<Id>,
    on_complete: Option<OnComplete>,
    previous_closest_node: Option<Id>,
    created_at: Instant,
    deadline: Instant,
}

impl SearchSession {
    pub fn new(
        key: String,
        kind: SearchKind,
        on_complete: Option<OnComplete>,
        timeout: Duration,
    ) -> Self {
        let find_id = FindId::random();
        let target = Id::from_key(&key);
        let created_at = Instant::now();

        trace!(?find_id, ?target, ?kind, "New search");

        Self {
            find_id,
            key,
            kind,
            shortlist: ClosestNodes::new(target),
            already_contacted: HashSet::new(),
            active_probes: HashSet::new(),
            on_complete,
            previous_closest_node: None,
            created_at,
            deadline: created_at + timeout,
        }
    }

    // === Getters ===

    pub fn find_id(&self) -> FindId {
        self.find_id
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn target(&self) -> Id {
        self.shortlist.target()
    }

    pub fn kind(&self) -> SearchKind {
        self.kind
    }

    pub fn shortlist(&self) -> &ClosestNodes {
        &self.shortlist
    }

    pub fn active_probes(&self) -> &HashSet<Id> {
        &self.active_probes
    }

    pub fn already_contacted(&self, guid: &Id) -> bool {
        self.already_contacted.contains(guid)
    }

    pub fn previous_closest_node(&self) -> Option<&Id> {
        self.previous_closest_node.as_ref()
    }

    pub fn created_at(&self) -> Instant {
        self.created_at
    }

    pub fn is_expired(&self, now: Instant) -> bool {
        now >= self.deadline
    }

    // === Public Methods ===

    /// Add candidates to the shortlist, returning how many were new.
    pub fn extend_shortlist<I: IntoIterator<Item = Contact>>(&mut self, nodes: I) -> usize {
        self.shortlist.extend(nodes)
    }

    /// Shortlist nodes not contacted yet, closest first.
    pub fn uncontacted(&self) -> Vec<Contact> {
        self.shortlist
            .nodes()
            .iter()
            .filter(|node| !self.already_contacted.contains(&node.guid))
            .cloned()
            .collect()
    }

    /// Record that a probe was sent to `guid`; it is never probed again by this search.
    pub fn probe(&mut self, guid: Id) {
        self.active_probes.insert(guid);
        self.already_contacted.insert(guid);
    }

    /// Record that `guid` answered its probe.
    pub fn satisfy_probe(&mut self, guid: &Id) {
        self.active_probes.remove(guid);
        self.already_contacted.insert(*guid);
    }

    /// Remember the current closest node, returning `true` if it changed since the last call.
    pub fn update_closest_node(&mut self) -> bool {
        let closest = self.shortlist.first().map(|node| node.guid);
        let changed = closest != self.previous_closest_node;

        self.previous_closest_node = closest;

        changed
    }

    /// Take the completion handler out, leaving nothing to fire twice.
    pub fn take_on_complete(&mut self) -> Option<OnComplete> {
        self.on_complete.take()
    }
}
