//! AsyncDht node.

use serde_json::Value;

use crate::{
    actor::Info,
    common::{Contact, FindId, Id, Message},
    core::search::{SearchKind, SearchOutcome},
    dht::{ActorMessage, Dht, DhtWasShutdown},
    Error,
};

impl Dht {
    /// Return an async version of the Dht client.
    pub fn as_async(self) -> AsyncDht {
        AsyncDht(self)
    }
}

#[derive(Debug, Clone)]
/// Async version of the Dht node.
pub struct AsyncDht(Dht);

impl AsyncDht {
    // === Getters ===

    /// Information about this [Dht] node.
    pub async fn info(&self) -> Result<Info, DhtWasShutdown> {
        let (sender, receiver) = flume::bounded::<Info>(1);

        self.send(ActorMessage::Info(sender))?;

        receiver.recv_async().await.map_err(|_| DhtWasShutdown)
    }

    pub async fn active_peers(&self) -> Result<Vec<Contact>, DhtWasShutdown> {
        let (sender, receiver) = flume::bounded::<Vec<Contact>>(1);

        self.send(ActorMessage::ActivePeers(sender))?;

        receiver.recv_async().await.map_err(|_| DhtWasShutdown)
    }

    pub async fn get_local(&self, key: &str) -> Result<Option<Value>, DhtWasShutdown> {
        let (sender, receiver) = flume::bounded::<Option<Value>>(1);

        self.send(ActorMessage::GetLocal(key.to_string(), sender))?;

        receiver.recv_async().await.map_err(|_| DhtWasShutdown)
    }

    // === Public Methods ===

    /// Shutdown the actor thread loop.
    pub async fn shutdown(&mut self) {
        let (sender, receiver) = flume::bounded::<()>(1);

        let _ = self.0 .0.send(ActorMessage::Shutdown(sender));
        let _ = receiver.recv_async().await;
    }

    pub async fn add_peer(&self, contact: Contact) -> Result<Result<Contact, Error>, DhtWasShutdown> {
        let (sender, receiver) = flume::bounded::<Result<Contact, Error>>(1);

        self.send(ActorMessage::AddPeer(contact, sender))?;

        receiver.recv_async().await.map_err(|_| DhtWasShutdown)
    }

    pub fn remove_peer(&self, guid: Id) -> Result<(), DhtWasShutdown> {
        self.0.remove_peer(guid)
    }

    // === Searches ===

    /// Closest nodes to `key`, closest first.
    pub async fn find_node(&self, key: &str) -> Result<Vec<Contact>, DhtWasShutdown> {
        Ok(self
            .search(key, SearchKind::FindNode)
            .await?
            .and_then(SearchOutcome::nodes)
            .unwrap_or_default())
    }

    /// Value stored under `key` at the nodes closest to it, if any of them has it.
    pub async fn find_value(&self, key: &str) -> Result<Option<Value>, DhtWasShutdown> {
        Ok(self
            .search(key, SearchKind::FindValue)
            .await?
            .and_then(SearchOutcome::value))
    }

    pub fn cancel(&self, find_id: FindId) -> Result<(), DhtWasShutdown> {
        self.0.cancel(find_id)
    }

    // === Store ===

    pub fn store(&self, key: &str, value: Value) -> Result<(), DhtWasShutdown> {
        self.0.store(key, value)
    }

    pub fn deliver(&self, message: Message) -> Result<(), DhtWasShutdown> {
        self.0.deliver(message)
    }

    // === Private Methods ===

    /// Run a search to completion. `Ok(None)` if it was cancelled.
    async fn search(
        &self,
        key: &str,
        kind: SearchKind,
    ) -> Result<Option<SearchOutcome>, DhtWasShutdown> {
        let (started_sender, started) = flume::bounded::<Option<FindId>>(1);
        let (sender, receiver) = flume::bounded::<SearchOutcome>(1);

        self.send(ActorMessage::Search(
            key.to_string(),
            kind,
            sender,
            started_sender,
        ))?;

        started.recv_async().await.map_err(|_| DhtWasShutdown)?;

        Ok(receiver.recv_async().await.ok())
    }

    fn send(&self, message: ActorMessage) -> Result<(), DhtWasShutdown> {
        self.0 .0.send(message).map_err(|_| DhtWasShutdown)
    }
}
