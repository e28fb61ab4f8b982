//! Periodic republishing of stored content, and freshness refresh of cached copies.

use tracing::{debug, trace};

use crate::common::{
    messages::{RequestSpecific, RequestTypeSpecific},
    FreshGetParameter, StorageEntryMetadata,
};
use crate::error::StorageError;
use crate::Error;

use super::lookup::ContentLookupOutcome;
use super::Context;

impl Context {
    /// Run one refresh cycle over every entry not republished for `restore_interval`.
    ///
    /// Returns the number of entries refreshed.
    pub fn refresh(&self) -> Result<usize, Error> {
        let due = self
            .state
            .storage()
            .entries()
            .into_iter()
            .filter(|metadata| metadata.last_republished().elapsed() >= self.restore_interval)
            .collect::<Vec<_>>();

        trace!(due = due.len(), "Refresh cycle");

        for metadata in &due {
            self.state.storage_mut().mark_republished(metadata);

            // Cached copies of other owners' content are only kept fresh, the
            // replica owners republish them.
            if !(metadata.is_cached()
                && !metadata.is_k_node()
                && !self.is_local_owner(metadata.owner_id()))
            {
                self.republish(metadata)?;
            }

            if metadata.is_cached() {
                self.refresh_cached(metadata);
            }
        }

        Ok(due.len())
    }

    // === Private Methods ===

    /// Push an entry to the k closest nodes in the routing table, and let go of it
    /// if this node is not one of them anymore.
    fn republish(&self, metadata: &StorageEntryMetadata) -> Result<(), Error> {
        let entry = match self.state.storage().get_exact(metadata) {
            Ok(entry) => entry,
            Err(StorageError::NotFound) => return Ok(()),
            Err(error) => return Err(error.into()),
        };

        let local = self.local_node();

        let mut closest = self.state.routing_table().closest(&metadata.key, self.k);
        closest.push(local.clone());
        closest.sort_by_key(|node| node.id().xor(&metadata.key));
        closest.truncate(self.k);

        for node in closest.iter().filter(|node| node.id() != local.id()) {
            self.transport.send(
                node.address(),
                RequestSpecific {
                    requester_id: self.id,
                    request_type: RequestTypeSpecific::Store(entry.clone()),
                },
            );
        }

        if !closest.contains(&local) {
            debug!(key = ?metadata.key, "No longer among the closest nodes");

            match self.state.storage_mut().remove(metadata) {
                Ok(()) | Err(StorageError::NotFound) => {}
                Err(error) => return Err(error.into()),
            }
        }

        Ok(())
    }

    /// Replace a cached copy with a newer version from the network, if any.
    fn refresh_cached(&self, metadata: &StorageEntryMetadata) {
        match self.content_lookup_fresh(FreshGetParameter::from(metadata)) {
            Ok(ContentLookupOutcome::Found { entry, from, hops }) => {
                debug!(
                    key = ?metadata.key,
                    ?from,
                    hops,
                    last_updated = entry.metadata().last_updated(),
                    "Refreshed cached entry"
                );

                if let Err(error) = self
                    .state
                    .storage_mut()
                    .update(entry.with_flags(true, false))
                {
                    debug!(?error, key = ?metadata.key, "Failed to update cached entry");
                }
            }
            Ok(outcome) => {
                trace!(key = ?metadata.key, ?outcome, "Cached entry is fresh");
            }
            Err(error) => {
                debug!(?error, key = ?metadata.key, "Failed to refresh cached entry");
            }
        }
    }
}
