#![doc = include_str!("../README.md")]
//! ## Feature flags
#![doc = document_features::document_features!()]
//!

// Public modules
mod common;
mod core;
mod error;

pub mod actor;
#[cfg(feature = "async")]
pub mod async_dht;
mod dht;
pub mod transport;

pub use crate::common::{
    messages, ClosestNodes, Contact, DataStore, FindId, Id, KademliaTable, MemoryStore,
    RoutingTable, StoredRecord, MAX_BUCKET_SIZE_K, MAX_VALUES,
};
pub use crate::core::index::IndexUpdate;
pub use crate::core::replication::{
    plan_republish, ReplicationSettings, RepublishPlan, CLOCK_SKEW_MARGIN, EXPIRE_TIMEOUT,
    REPLICATE_INTERVAL, RESERVED_KEYS,
};
pub use crate::core::search::{OnComplete, PendingStore, SearchKind, SearchOutcome, SearchSession};
pub use actor::{Config, Coordinator, Info};
pub use dht::{Dht, DhtWasShutdown, Search};
pub use error::Error;
