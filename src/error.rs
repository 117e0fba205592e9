//! Main Crate Error

use crate::common::Id;

#[derive(thiserror::Error, Debug)]
/// bazaar-dht crate error enum.
pub enum Error {
    /// The transport could not open a link to this peer. Nothing was added.
    #[error("Failed to create a link to peer {guid}: {source}")]
    PeerCreationFailed {
        guid: Id,
        #[source]
        source: std::io::Error,
    },

    /// Tried to admit our own guid as a peer.
    #[error("Refusing to add this node as its own peer")]
    SelfContact,

    #[error("Invalid hex encoded Id: {0:?}")]
    InvalidIdEncoding(String),

    #[error("Failed to encode or decode message: {0}")]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    /// Transparent [std::io::Error]
    IO(#[from] std::io::Error),
}
