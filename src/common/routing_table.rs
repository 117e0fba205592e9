//! Routing table contract and a simplified Kademlia implementation of it.

use std::collections::BTreeMap;
use std::fmt::Debug;
use std::slice::Iter;
use std::time::{Duration, Instant};

use crate::common::{ClosestNodes, Contact, Id};

/// K = the default maximum size of a k-bucket, and the size of "closest nodes" answers.
pub const MAX_BUCKET_SIZE_K: usize = 20;

/// Default age after which a bucket is returned by [RoutingTable::refresh_list].
pub const REFRESH_INTERVAL: Duration = Duration::from_secs(60 * 60);

/// What the coordinator needs from a routing table.
///
/// The coordinator treats the table as a "closest nodes" oracle; how buckets are split,
/// evicted, or refreshed is up to the implementation.
pub trait RoutingTable: Debug + Send {
    /// The [Id] of this node, where distances are measured from.
    fn id(&self) -> &Id;

    /// Resolve a guid to its contact, if known.
    fn get_contact(&self, guid: &Id) -> Option<Contact>;

    /// Insert or update a contact. Returns `true` if the table now holds it.
    fn add_contact(&mut self, contact: Contact) -> bool;

    fn remove_contact(&mut self, guid: &Id);

    /// Up to `count` known contacts closest to `target`, closest first, never including
    /// `exclude`.
    fn find_close_nodes(&self, target: &Id, count: usize, exclude: Option<&Id>) -> Vec<Contact>;

    /// XOR distance between two ids.
    fn distance(&self, a: &Id, b: &Id) -> Id {
        a.xor(b)
    }

    /// Mark the bucket covering `target` as recently looked up.
    fn touch_kbucket(&mut self, target: &Id);

    /// Random lookup targets, one per bucket (from `start_index` on) that needs a refresh,
    /// or every bucket if `force` is set.
    fn refresh_list(&mut self, start_index: usize, force: bool) -> Vec<Id>;

    /// Number of contacts in this table.
    fn size(&self) -> usize;
}

#[derive(Debug, Clone)]
/// Simplified Kademlia routing table
pub struct KademliaTable {
    id: Id,
    buckets: BTreeMap<u8, KBucket>,
    refresh_interval: Duration,
}

impl KademliaTable {
    /// Create a new [KademliaTable] with a given id, refreshing buckets every [REFRESH_INTERVAL].
    pub fn new(id: Id) -> Self {
        Self::with_refresh_interval(id, REFRESH_INTERVAL)
    }

    /// Create a new [KademliaTable] whose buckets go stale after `refresh_interval`.
    pub fn with_refresh_interval(id: Id, refresh_interval: Duration) -> Self {
        KademliaTable {
            id,
            buckets: BTreeMap::new(),
            refresh_interval,
        }
    }

    /// Returns `true` if this routing table is empty.
    pub fn is_empty(&self) -> bool {
        self.buckets.values().all(|bucket| bucket.is_empty())
    }

    /// Returns an iterator over the contacts in this routing table, nearest bucket first.
    pub fn nodes(&self) -> impl Iterator<Item = &Contact> {
        self.buckets.values().flat_map(|bucket| bucket.iter())
    }

    fn refresh_list_at(&mut self, now: Instant, start_index: usize, force: bool) -> Vec<Id> {
        let id = self.id;
        let refresh_interval = self.refresh_interval;

        self.buckets
            .iter_mut()
            .filter(|(distance, _)| **distance as usize >= start_index)
            .filter(|(_, bucket)| force || now.duration_since(bucket.last_accessed) >= refresh_interval)
            .map(|(distance, bucket)| {
                bucket.last_accessed = now;
                id.random_at_distance(*distance)
            })
            .collect()
    }

    #[cfg(test)]
    fn contains(&self, guid: &Id) -> bool {
        self.get_contact(guid).is_some()
    }
}

impl RoutingTable for KademliaTable {
    fn id(&self) -> &Id {
        &self.id
    }

    fn get_contact(&self, guid: &Id) -> Option<Contact> {
        self.buckets
            .get(&self.id.distance(guid))
            .and_then(|bucket| bucket.get(guid))
            .cloned()
    }

    fn add_contact(&mut self, contact: Contact) -> bool {
        let distance = self.id.distance(&contact.guid);

        if distance == 0 {
            // Do not add self to the routing_table
            return false;
        }

        self.buckets.entry(distance).or_default().add(contact)
    }

    fn remove_contact(&mut self, guid: &Id) {
        let distance = self.id.distance(guid);

        if let Some(bucket) = self.buckets.get_mut(&distance) {
            bucket.remove(guid)
        }
    }

    fn find_close_nodes(&self, target: &Id, count: usize, exclude: Option<&Id>) -> Vec<Contact> {
        let mut closest = ClosestNodes::new(*target);

        for node in self.nodes() {
            if Some(&node.guid) != exclude {
                closest.add(node.clone());
            }
        }

        closest.truncate(count);
        closest.to_vec()
    }

    fn touch_kbucket(&mut self, target: &Id) {
        let distance = self.id.distance(target);

        if let Some(bucket) = self.buckets.get_mut(&distance) {
            bucket.last_accessed = Instant::now();
        }
    }

    fn refresh_list(&mut self, start_index: usize, force: bool) -> Vec<Id> {
        self.refresh_list_at(Instant::now(), start_index, force)
    }

    fn size(&self) -> usize {
        self.buckets
            .values()
            .fold(0, |acc, bucket| acc + bucket.nodes.len())
    }
}

/// Contacts at one distance from this node, least recently seen first.
#[derive(Debug, Clone)]
pub struct KBucket {
    nodes: Vec<Contact>,
    last_accessed: Instant,
}

impl KBucket {
    pub fn new() -> Self {
        KBucket {
            nodes: Vec::with_capacity(MAX_BUCKET_SIZE_K),
            last_accessed: Instant::now(),
        }
    }

    /// Known guids are updated in place and moved to the most recently seen end.
    /// New contacts are only accepted while the bucket has room.
    pub fn add(&mut self, incoming: Contact) -> bool {
        if let Some(index) = self.nodes.iter().position(|n| n.guid == incoming.guid) {
            self.nodes.remove(index);
            self.nodes.push(incoming);

            true
        } else if self.nodes.len() < MAX_BUCKET_SIZE_K {
            self.nodes.push(incoming);

            true
        } else {
            false
        }
    }

    pub fn get(&self, guid: &Id) -> Option<&Contact> {
        self.nodes.iter().find(|node| node.guid == *guid)
    }

    pub fn remove(&mut self, guid: &Id) {
        self.nodes.retain(|node| node.guid != *guid);
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn iter(&self) -> Iter<'_, Contact> {
        self.nodes.iter()
    }
}

impl Default for KBucket {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod test {
    use std::str::FromStr;

    use super::*;

    #[test]
    fn add_get_remove() {
        let mut table = KademliaTable::new(Id::random());
        assert!(table.is_empty());

        let contact = Contact::random();

        assert!(table.get_contact(contact.guid()).is_none());
        assert!(table.add_contact(contact.clone()));
        assert_eq!(table.get_contact(contact.guid()), Some(contact.clone()));
        assert!(!table.is_empty());

        table.remove_contact(contact.guid());
        assert!(!table.contains(contact.guid()));
        assert_eq!(table.size(), 0);
    }

    #[test]
    fn known_guid_is_updated_in_place() {
        let mut table = KademliaTable::new(Id::random());

        let contact = Contact::random();
        let mut moved = contact.clone();
        moved.port = 1;
        moved.nickname = "moved".to_string();

        table.add_contact(contact.clone());
        table.add_contact(moved);

        assert_eq!(table.size(), 1);

        let stored = table.get_contact(contact.guid()).unwrap();
        assert_eq!((stored.port, stored.nickname.as_str()), (1, "moved"));
    }

    #[test]
    fn own_guid_is_rejected() {
        let mut table = KademliaTable::new(Id::random());
        let me = Contact::new(*table.id(), "127.0.0.1", 0, "", "");

        assert!(!table.add_contact(me));
        assert!(table.is_empty())
    }

    #[test]
    fn full_bucket_rejects_new_contacts() {
        let mut bucket = KBucket::new();

        for i in 0..MAX_BUCKET_SIZE_K {
            assert!(bucket.add(Contact::random()), "contact {i} rejected");
        }

        assert!(!bucket.add(Contact::random()));
    }

    #[test]
    fn find_close_nodes_sorts_and_excludes() {
        let own = Id::from_str("8000000000000000000000000000000000000000").unwrap();
        let mut table = KademliaTable::new(own);

        let contacts: Vec<Contact> = (1..=12_u16)
            .map(|port| Contact::new(Id::random(), "127.0.0.1", port, "", ""))
            .collect();

        for contact in &contacts {
            table.add_contact(contact.clone());
        }

        let target = Id::random();
        let excluded = contacts[0].guid;

        let mut expected: Vec<Id> = contacts
            .iter()
            .map(|contact| contact.guid)
            .filter(|guid| *guid != excluded)
            .collect();
        expected.sort_by_key(|guid| guid.xor(&target));
        expected.truncate(4);

        let found: Vec<Id> = table
            .find_close_nodes(&target, 4, Some(&excluded))
            .iter()
            .map(|contact| contact.guid)
            .collect();

        assert_eq!(found, expected);
    }

    #[test]
    fn refresh_list() {
        let mut table = KademliaTable::new(Id::random());

        for _ in 0..10 {
            table.add_contact(Contact::random());
        }

        let now = Instant::now();
        assert!(table.refresh_list_at(now, 0, false).is_empty());

        let later = now + REFRESH_INTERVAL + Duration::from_secs(1);
        let stale = table.refresh_list_at(later, 0, false);

        assert_eq!(stale.len(), table.buckets.len());
        for target in &stale {
            assert!(table.buckets.contains_key(&table.id().distance(target)));
        }

        // Returned buckets were marked as accessed.
        assert!(table.refresh_list_at(later, 0, false).is_empty());
        assert_eq!(table.refresh_list_at(later, 0, true).len(), stale.len());
    }

    #[test]
    fn refresh_interval_is_configurable() {
        let interval = Duration::from_secs(30);
        let mut table = KademliaTable::with_refresh_interval(Id::random(), interval);

        table.add_contact(Contact::random());

        let now = Instant::now();
        assert!(table.refresh_list_at(now, 0, false).is_empty());
        assert_eq!(table.refresh_list_at(now + interval, 0, false).len(), 1);
    }
}
