//! Links to remote peers.
//!
//! The coordinator never waits on a link: sends are fire-and-forget, and replies come back
//! later as inbound messages correlated by their `findID`.

mod udp;

use std::fmt::Debug;

use crate::common::{Contact, Message};

pub use udp::{UdpLink, UdpTransport, MTU};

/// Creates [PeerLink]s to remote nodes.
pub trait Transport: Debug + Send {
    /// Open a link to `contact`. Must not have side effects on failure.
    fn connect(&mut self, contact: &Contact) -> std::io::Result<Box<dyn PeerLink>>;
}

/// A connection to one remote node.
pub trait PeerLink: Debug + Send {
    /// The identity this link was opened for.
    fn contact(&self) -> &Contact;

    /// Send raw bytes to the remote node.
    fn send_raw(&mut self, bytes: &[u8]) -> std::io::Result<()>;

    /// Send a structured message to the remote node.
    fn send(&mut self, message: &Message) -> std::io::Result<()> {
        let bytes = message
            .to_bytes()
            .map_err(|error| std::io::Error::new(std::io::ErrorKind::InvalidData, error))?;

        self.send_raw(&bytes)
    }

    /// Introduce ourselves to the remote node.
    fn start_handshake(&mut self, hello: &Message) -> std::io::Result<()> {
        self.send(hello)
    }
}
