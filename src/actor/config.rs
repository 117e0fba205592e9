use std::time::Duration;

use crate::common::{Contact, Id, MAX_BUCKET_SIZE_K, MAX_VALUES, REFRESH_INTERVAL};
use crate::core::replication::{CLOCK_SKEW_MARGIN, EXPIRE_TIMEOUT, REPLICATE_INTERVAL};

/// Number of nodes probed in parallel when a search starts.
pub const ALPHA: usize = 3;

/// Searches still running after this long are completed with what they found so far.
pub const DEFAULT_SEARCH_TIMEOUT: Duration = Duration::from_secs(60);

#[derive(Debug, Clone)]
/// Dht Configurations
pub struct Config {
    /// This node's guid.
    ///
    /// Defaults to None, where a random [Id] is generated.
    pub guid: Option<Id>,
    /// Hostname other nodes reach us at, announced in every message we send.
    ///
    /// Defaults to `127.0.0.1`
    pub hostname: String,
    /// Explicit port to listen on.
    ///
    /// Defaults to None, where the OS picks a free port.
    pub port: Option<u16>,
    /// Public key announced to other nodes.
    ///
    /// Defaults to empty, where the hex encoded guid is announced instead.
    pub pubkey: String,
    pub nickname: String,
    /// Market this node stores records for.
    pub market_id: String,
    /// Peers admitted and greeted when the node starts, before it looks itself up.
    ///
    /// Defaults to an empty list, making this node the first of its network.
    pub bootstrap: Vec<Contact>,
    /// Size of "closest nodes" answers and results.
    ///
    /// Defaults to [MAX_BUCKET_SIZE_K]
    pub k: usize,
    /// Seeds taken from the routing table when a search starts without a shortlist.
    ///
    /// Defaults to [ALPHA]
    pub alpha: usize,
    /// Defaults to [DEFAULT_SEARCH_TIMEOUT]
    pub search_timeout: Duration,
    /// Defaults to [EXPIRE_TIMEOUT]
    pub expire_timeout: Duration,
    /// Defaults to [REPLICATE_INTERVAL]
    pub replicate_interval: Duration,
    /// How often buckets are refreshed and local records republished.
    ///
    /// Defaults to [REFRESH_INTERVAL]
    pub refresh_interval: Duration,
    /// Defaults to [CLOCK_SKEW_MARGIN]
    pub clock_skew_margin: Duration,
    /// Capacity of the default in-memory store.
    ///
    /// Defaults to [MAX_VALUES]
    pub max_values: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            guid: None,
            hostname: "127.0.0.1".to_string(),
            port: None,
            pubkey: String::new(),
            nickname: String::new(),
            market_id: String::new(),
            bootstrap: Vec::new(),
            k: MAX_BUCKET_SIZE_K,
            alpha: ALPHA,
            search_timeout: DEFAULT_SEARCH_TIMEOUT,
            expire_timeout: EXPIRE_TIMEOUT,
            replicate_interval: REPLICATE_INTERVAL,
            refresh_interval: REFRESH_INTERVAL,
            clock_skew_margin: CLOCK_SKEW_MARGIN,
            max_values: MAX_VALUES,
        }
    }
}
