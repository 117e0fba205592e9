//! JSON datagrams over a shared UDP socket.

use std::net::{SocketAddr, ToSocketAddrs, UdpSocket};
use std::sync::Arc;

use tracing::trace;

use crate::common::Contact;

use super::{PeerLink, Transport};

/// Largest datagram we send or accept.
pub const MTU: usize = 8192;

#[derive(Debug, Clone)]
/// [Transport] sending every message as one UDP datagram from a shared socket.
pub struct UdpTransport {
    socket: Arc<UdpSocket>,
}

impl UdpTransport {
    pub fn new(socket: Arc<UdpSocket>) -> Self {
        Self { socket }
    }
}

impl Transport for UdpTransport {
    fn connect(&mut self, contact: &Contact) -> std::io::Result<Box<dyn PeerLink>> {
        let address = (contact.hostname.as_str(), contact.port)
            .to_socket_addrs()?
            .next()
            .ok_or_else(|| {
                std::io::Error::new(
                    std::io::ErrorKind::NotFound,
                    format!("no address for {}:{}", contact.hostname, contact.port),
                )
            })?;

        Ok(Box::new(UdpLink {
            contact: contact.clone(),
            address,
            socket: self.socket.clone(),
        }))
    }
}

#[derive(Debug)]
pub struct UdpLink {
    contact: Contact,
    address: SocketAddr,
    socket: Arc<UdpSocket>,
}

impl PeerLink for UdpLink {
    fn contact(&self) -> &Contact {
        &self.contact
    }

    fn send_raw(&mut self, bytes: &[u8]) -> std::io::Result<()> {
        if bytes.len() > MTU {
            return Err(std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                format!("datagram of {} bytes exceeds MTU", bytes.len()),
            ));
        }

        trace!(to = ?self.address, len = bytes.len(), "Sending datagram");

        self.socket.send_to(bytes, self.address).map(|_| ())
    }
}
