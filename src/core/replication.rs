//! Republish, replicate, and expire decisions for locally held records.

use std::time::{Duration, Instant};

use crate::common::{DataStore, Id};

/// Records older than this are gone from the network unless republished.
pub const EXPIRE_TIMEOUT: Duration = Duration::from_secs(24 * 60 * 60);
/// Holders that are not the original publisher re-store their records this often.
pub const REPLICATE_INTERVAL: Duration = Duration::from_secs(60 * 60);
/// Added to a record's age so we republish slightly before remote nodes expire it.
pub const CLOCK_SKEW_MARGIN: Duration = Duration::from_secs(5);

/// Keys used internally by the node, never republished or expired.
pub const RESERVED_KEYS: [&str; 1] = ["nodeState"];

/// Timing parameters of [plan_republish].
#[derive(Debug, Clone, Copy)]
pub struct ReplicationSettings {
    pub expire_timeout: Duration,
    pub replicate_interval: Duration,
    pub clock_skew_margin: Duration,
}

impl Default for ReplicationSettings {
    fn default() -> Self {
        Self {
            expire_timeout: EXPIRE_TIMEOUT,
            replicate_interval: REPLICATE_INTERVAL,
            clock_skew_margin: CLOCK_SKEW_MARGIN,
        }
    }
}

/// Decisions for one pass over the local store.
#[derive(Debug, Default, PartialEq)]
pub struct RepublishPlan {
    /// Our own records, due for a fresh publication.
    pub republish: Vec<String>,
    /// Other publishers' records to push to the current closest nodes, with their original
    /// publish time.
    pub replicate: Vec<(String, u64)>,
    /// Other publishers' records that outlived [EXPIRE_TIMEOUT].
    pub expire: Vec<String>,
}

/// Decide what to do with every non reserved key of `store` at Unix time `now`.
///
/// Pure function, the coordinator applies the plan.
pub fn plan_republish(
    store: &dyn DataStore,
    own_id: &Id,
    now: u64,
    settings: &ReplicationSettings,
) -> RepublishPlan {
    let mut plan = RepublishPlan::default();

    let expire_timeout = settings.expire_timeout.as_secs();
    let replicate_interval = settings.replicate_interval.as_secs();
    let margin = settings.clock_skew_margin.as_secs();

    let mut keys = store.keys();
    keys.sort();

    for key in keys {
        if RESERVED_KEYS.contains(&key.as_str()) {
            continue;
        }

        let (Some(publisher), Some(published_at)) = (
            store.original_publisher_id(&key),
            store.original_publish_time(&key),
        ) else {
            continue;
        };

        let age = now.saturating_sub(published_at) + margin;

        if publisher == *own_id {
            if age >= expire_timeout {
                plan.republish.push(key);
            }
        } else if age >= expire_timeout {
            plan.expire.push(key);
        } else {
            let last_published = store.last_published(&key).unwrap_or(published_at);

            if now.saturating_sub(last_published) >= replicate_interval {
                plan.replicate.push((key, published_at));
            }
        }
    }

    plan
}

/// When the periodic refresh and republish pass is due.
#[derive(Debug)]
pub struct Maintenance {
    interval: Duration,
    last_run: Instant,
}

impl Maintenance {
    pub fn new(interval: Duration) -> Self {
        Maintenance {
            interval,
            last_run: Instant::now(),
        }
    }

    /// Returns `true` and resets the timer if the interval elapsed.
    pub fn is_due(&mut self) -> bool {
        self.is_due_at(Instant::now())
    }

    fn is_due_at(&mut self, now: Instant) -> bool {
        if now.duration_since(self.last_run) >= self.interval {
            self.last_run = now;
            return true;
        }

        false
    }
}
