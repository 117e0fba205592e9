//! Serialize and deserialize DHT wire messages.
//!
//! Every message is a JSON object tagged by its `type` field. Decoding happens once at the
//! transport boundary, so the coordinator only ever sees a typed [Message].

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::common::{Contact, FindId, Id};
use crate::Error;

/// Protocol version advertised in `hello` messages.
pub const PROTOCOL_VERSION: u32 = 1;

#[derive(Debug, PartialEq, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Message {
    #[serde(rename = "findNode")]
    FindNode(FindNodeArguments),

    #[serde(rename = "findNodeResponse")]
    FindNodeResponse(FindNodeResponseArguments),

    #[serde(rename = "storeValue", alias = "proto_store")]
    StoreValue(StoreValueArguments),

    #[serde(rename = "hello")]
    Hello(HelloArguments),
}

impl Message {
    pub fn from_bytes<T: AsRef<[u8]>>(bytes: T) -> Result<Message, Error> {
        Ok(serde_json::from_slice(bytes.as_ref())?)
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>, Error> {
        Ok(serde_json::to_vec(self)?)
    }

    /// Guid of the node that sent this message, when the message carries one.
    pub fn sender_guid(&self) -> Option<&Id> {
        match self {
            Message::FindNode(args) => Some(&args.sender_guid),
            Message::FindNodeResponse(args) => Some(&args.sender_guid),
            Message::Hello(args) => Some(&args.sender_guid),
            Message::StoreValue(_) => None,
        }
    }

    /// Short name of the message type, for logs.
    pub fn kind(&self) -> &'static str {
        match self {
            Message::FindNode(_) => "findNode",
            Message::FindNodeResponse(_) => "findNodeResponse",
            Message::StoreValue(_) => "storeValue",
            Message::Hello(_) => "hello",
        }
    }
}

// === FIND_NODE ===

#[derive(Debug, PartialEq, Clone, Serialize, Deserialize)]
pub struct FindNodeArguments {
    #[serde(rename = "senderGUID")]
    pub sender_guid: Id,
    pub hostname: String,
    pub port: u16,
    pub key: String,
    #[serde(rename = "findValue", default)]
    pub find_value: bool,
    #[serde(rename = "senderNick", default)]
    pub sender_nick: String,
    #[serde(rename = "findID")]
    pub find_id: FindId,
    pub pubkey: String,
}

#[derive(Debug, PartialEq, Clone, Serialize, Deserialize)]
pub struct FindNodeResponseArguments {
    #[serde(rename = "senderGUID")]
    pub sender_guid: Id,
    pub hostname: String,
    pub port: u16,
    pub pubkey: String,
    #[serde(rename = "senderNick", default)]
    pub sender_nick: String,
    #[serde(rename = "findID")]
    pub find_id: FindId,
    #[serde(rename = "foundKey", default, skip_serializing_if = "Option::is_none")]
    pub found_key: Option<Value>,
    #[serde(rename = "foundNodes", default, skip_serializing_if = "Option::is_none")]
    pub found_nodes: Option<Vec<Contact>>,
}

// === STORE ===

#[derive(Debug, PartialEq, Clone, Serialize, Deserialize)]
pub struct StoreValueArguments {
    pub key: String,
    pub value: Value,
    #[serde(rename = "originalPublisherID")]
    pub original_publisher_id: Id,
    /// Seconds since the value was originally published.
    #[serde(default)]
    pub age: u64,
}

// === HELLO ===

#[derive(Debug, PartialEq, Clone, Serialize, Deserialize)]
pub struct HelloArguments {
    pub pubkey: String,
    #[serde(rename = "senderGUID")]
    pub sender_guid: Id,
    pub hostname: String,
    pub port: u16,
    #[serde(rename = "senderNick", default)]
    pub sender_nick: String,
    pub v: u32,
}

impl HelloArguments {
    /// The contact this hello announces.
    pub fn contact(&self) -> Contact {
        Contact::new(
            self.sender_guid,
            self.hostname.clone(),
            self.port,
            self.pubkey.clone(),
            self.sender_nick.clone(),
        )
    }
}
