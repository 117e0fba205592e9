//! Struct and implementation of a known peer's contact record.
use std::hash::{Hash, Hasher};

use serde::{Deserialize, Serialize};

use crate::common::Id;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(from = "WireContact", into = "WireContact")]
/// Contact record of a peer: its guid plus how to reach it.
///
/// Two contacts are the same node if they share a guid, regardless of the other fields.
pub struct Contact {
    pub guid: Id,
    pub hostname: String,
    pub port: u16,
    pub pubkey: String,
    pub nickname: String,
}

impl Contact {
    /// Creates a new Contact.
    pub fn new(
        guid: Id,
        hostname: impl Into<String>,
        port: u16,
        pubkey: impl Into<String>,
        nickname: impl Into<String>,
    ) -> Contact {
        Contact {
            guid,
            hostname: hostname.into(),
            port,
            pubkey: pubkey.into(),
            nickname: nickname.into(),
        }
    }

    /// Creates a contact with a random guid on a localhost port, for tests and benchmarks.
    pub fn random() -> Contact {
        let guid = Id::random();

        Contact::new(guid, "127.0.0.1", 6881, guid.to_string(), "")
    }

    pub fn guid(&self) -> &Id {
        &self.guid
    }

    /// Returns `true` if both contacts point at the same `hostname:port`.
    pub fn same_address(&self, other: &Contact) -> bool {
        self.hostname == other.hostname && self.port == other.port
    }

    /// Returns `true` if any field other than the guid differs.
    pub fn differs_from(&self, other: &Contact) -> bool {
        !self.same_address(other) || self.pubkey != other.pubkey || self.nickname != other.nickname
    }
}

impl PartialEq for Contact {
    fn eq(&self, other: &Self) -> bool {
        self.guid == other.guid
    }
}

impl Eq for Contact {}

impl Hash for Contact {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.guid.hash(state)
    }
}

/// `[guid, hostname, port, pubkey, nickname]` as carried in `foundNodes`.
#[derive(Serialize, Deserialize)]
struct WireContact(Id, String, u16, String, String);

impl From<WireContact> for Contact {
    fn from(wire: WireContact) -> Self {
        let WireContact(guid, hostname, port, pubkey, nickname) = wire;

        Contact {
            guid,
            hostname,
            port,
            pubkey,
            nickname,
        }
    }
}

impl From<Contact> for WireContact {
    fn from(contact: Contact) -> Self {
        WireContact(
            contact.guid,
            contact.hostname,
            contact.port,
            contact.pubkey,
            contact.nickname,
        )
    }
}
