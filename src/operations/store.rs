//! Replicate content to the k closest nodes to its key.

use tracing::debug;

use crate::common::{
    messages::{RequestSpecific, RequestTypeSpecific},
    StorageEntry,
};
use crate::Error;

use super::Context;

impl Context {
    /// Send `entry` to the current k closest nodes to its key, storing it locally
    /// too if this node is one of them.
    ///
    /// Remote stores are not acknowledged, returns the number of nodes targeted.
    pub fn store(&self, entry: StorageEntry) -> Result<usize, Error> {
        let key = entry.metadata().key;

        let closest = self.find_node(key)?;

        for node in &closest {
            if node.id() == &self.id {
                self.state
                    .storage_mut()
                    .store(entry.clone().with_flags(false, true))?;
            } else {
                self.transport.send(
                    node.address(),
                    RequestSpecific {
                        requester_id: self.id,
                        request_type: RequestTypeSpecific::Store(entry.clone()),
                    },
                );
            }
        }

        debug!(?key, targeted = closest.len(), "Stored content");

        Ok(closest.len())
    }
}
