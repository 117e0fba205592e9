//! Core DHT logic - pure computation with no direct I/O.
//!
//! Contains the search state machine (`search`), the index merge rules (`index`), and the
//! republish decisions (`replication`). All I/O orchestration lives in `actor/`, which calls
//! into this module.

pub(crate) mod index;
pub(crate) mod replication;
pub(crate) mod search;
