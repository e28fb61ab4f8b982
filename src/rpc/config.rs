use std::time::Duration;

use crate::common::{Id, MAX_BUCKET_SIZE_K};
use crate::storage::ContentStore;

use super::MemoryNetwork;

/// Default maximum number of concurrent inflight requests per lookup.
pub const DEFAULT_ALPHA: usize = 3;
/// Default deadline of a whole lookup operation.
pub const DEFAULT_OPERATION_TIMEOUT: Duration = Duration::from_secs(10);
/// Default request timeout before abandoning an inflight request to a non-responding node.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_millis(2000); // 2 seconds
/// Default interval between republishing and refreshing stored content.
pub const DEFAULT_RESTORE_INTERVAL: Duration = Duration::from_secs(60 * 60);

#[derive(Debug)]
/// Dht Configurations
pub struct Config {
    /// Bucket size and replication factor.
    ///
    /// Defaults to [MAX_BUCKET_SIZE_K]
    pub k: usize,
    /// Maximum inflight requests per lookup.
    ///
    /// Defaults to [DEFAULT_ALPHA]
    pub alpha: usize,
    /// Deadline for a lookup to converge before failing with a routing failure.
    ///
    /// Defaults to [DEFAULT_OPERATION_TIMEOUT]
    pub operation_timeout: Duration,
    /// Request timeout duration.
    ///
    /// The longer this duration is, the longer lookups wait on unresponsive nodes.
    /// The shorter this duration is, the more responses from busy nodes we miss out on.
    ///
    /// Defaults to [DEFAULT_REQUEST_TIMEOUT]
    pub request_timeout: Duration,
    /// How old a stored entry gets before it is republished and refreshed.
    ///
    /// Defaults to [DEFAULT_RESTORE_INTERVAL]
    pub restore_interval: Duration,
    /// Run the refresh cycle on a background thread every `restore_interval`.
    ///
    /// Defaults to true
    pub background_refresh: bool,
    /// Bootstrap nodes
    ///
    /// Defaults to an empty list, where this node is the first node of a network.
    pub bootstrap: Vec<String>,
    /// Explicit port to listen on.
    ///
    /// Defaults to None, where any available port is used.
    pub port: Option<u16>,
    /// Explicit node Id.
    ///
    /// Defaults to None, where a random Id is used.
    pub id: Option<Id>,
    /// The owner (user) this node publishes content for.
    ///
    /// Freshness lookups for content owned by this owner never touch the network.
    pub owner_id: Option<String>,
    /// Backing store for payloads.
    ///
    /// Defaults to None, where a [crate::MemoryContentStore] is used.
    pub content_store: Option<Box<dyn ContentStore>>,
    /// In-process network to join instead of binding a UDP socket.
    ///
    /// Defaults to None.
    pub network: Option<MemoryNetwork>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            k: MAX_BUCKET_SIZE_K,
            alpha: DEFAULT_ALPHA,
            operation_timeout: DEFAULT_OPERATION_TIMEOUT,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            restore_interval: DEFAULT_RESTORE_INTERVAL,
            background_refresh: true,
            bootstrap: vec![],
            port: None,
            id: None,
            owner_id: None,
            content_store: None,
            network: None,
        }
    }
}
