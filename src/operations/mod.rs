//! DHT operations shared by every node.
//!
//! Contains the iterative `lookup` driver, the `store` and `refresh` operations,
//! and the `server` request handler answering other nodes.
//! Network I/O is delegated to a [Transport], storage to the [StorageEngine].

pub(crate) mod lookup;
pub(crate) mod refresh;
pub(crate) mod server;
pub(crate) mod store;

use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Duration;

use crate::common::{Id, Node, RoutingTable};
use crate::rpc::Transport;
use crate::storage::StorageEngine;

#[derive(Debug, Clone)]
/// Routing table and storage shared between lookups, the refresh task and
/// inbound request handling.
pub(crate) struct State {
    routing_table: Arc<RwLock<RoutingTable>>,
    storage: Arc<RwLock<StorageEngine>>,
}

impl State {
    pub fn new(routing_table: RoutingTable, storage: StorageEngine) -> Self {
        Self {
            routing_table: Arc::new(RwLock::new(routing_table)),
            storage: Arc::new(RwLock::new(storage)),
        }
    }

    pub fn routing_table(&self) -> RwLockReadGuard<'_, RoutingTable> {
        self.routing_table
            .read()
            .unwrap_or_else(PoisonError::into_inner)
    }

    pub fn routing_table_mut(&self) -> RwLockWriteGuard<'_, RoutingTable> {
        self.routing_table
            .write()
            .unwrap_or_else(PoisonError::into_inner)
    }

    pub fn storage(&self) -> RwLockReadGuard<'_, StorageEngine> {
        self.storage.read().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn storage_mut(&self) -> RwLockWriteGuard<'_, StorageEngine> {
        self.storage.write().unwrap_or_else(PoisonError::into_inner)
    }
}

#[derive(Debug)]
/// Everything an operation needs: settings, shared state and the transport.
pub(crate) struct Context {
    pub id: Id,
    pub owner_id: Option<String>,
    pub k: usize,
    pub alpha: usize,
    pub operation_timeout: Duration,
    pub restore_interval: Duration,
    pub state: State,
    pub transport: Box<dyn Transport>,
}

impl Context {
    /// This node as a [Node], the way other nodes see it.
    pub fn local_node(&self) -> Node {
        Node::new(self.id, self.transport.local_addr())
    }

    /// Returns true if `owner_id` is the owner this node publishes for.
    pub fn is_local_owner(&self, owner_id: &str) -> bool {
        self.owner_id.as_deref() == Some(owner_id)
    }
}
