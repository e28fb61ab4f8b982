//! Local storage of content metadata and payloads.

mod content_store;

use std::collections::HashMap;
use std::io;
use std::time::Instant;

use tracing::{debug, trace};

use crate::common::{GetParameter, Id, StorageEntry, StorageEntryMetadata};
use crate::error::StorageError;

pub use content_store::{ContentStore, FsContentStore, MemoryContentStore};

#[derive(Debug)]
/// Stores at most one entry per (key, owner, type), reconciling versions on store.
///
/// Metadata is kept in memory, payloads are written to a [ContentStore].
pub struct StorageEngine {
    entries: HashMap<Id, Vec<StorageEntryMetadata>>,
    content_store: Box<dyn ContentStore>,
}

impl Default for StorageEngine {
    fn default() -> Self {
        Self::new(Box::<MemoryContentStore>::default())
    }
}

impl StorageEngine {
    pub fn new(content_store: Box<dyn ContentStore>) -> Self {
        Self {
            entries: HashMap::new(),
            content_store,
        }
    }

    // === Getters ===

    /// Number of stored entries.
    pub fn len(&self) -> usize {
        self.entries.values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Metadata of all stored entries.
    pub fn entries(&self) -> Vec<StorageEntryMetadata> {
        self.entries.values().flatten().cloned().collect()
    }

    /// Metadata of cached (non authoritative) entries.
    pub fn cached_entries(&self) -> Vec<StorageEntryMetadata> {
        self.entries
            .values()
            .flatten()
            .filter(|metadata| metadata.cached)
            .cloned()
            .collect()
    }

    /// Returns true if an entry matches the filter.
    pub fn contains(&self, parameter: &GetParameter) -> bool {
        self.find(parameter).is_some()
    }

    /// Metadata of the first entry matching the filter.
    pub fn get_metadata(&self, parameter: &GetParameter) -> Option<&StorageEntryMetadata> {
        self.find(parameter)
    }

    // === Public Methods ===

    /// Store an entry, returns `false` if an equal or newer version is already stored.
    ///
    /// Cached and k-node flags of an existing version are always merged into the
    /// retained entry.
    pub fn store(&mut self, mut entry: StorageEntry) -> Result<bool, StorageError> {
        let Some(existing) = self.find_exact_mut(&entry.metadata) else {
            return match self.insert(entry) {
                Ok(()) => Ok(true),
                Err(StorageError::AlreadyExists) => {
                    debug!("Insert raced with an existing entry");
                    Ok(false)
                }
                Err(error) => Err(error),
            };
        };

        existing.last_republished = Instant::now();

        if existing.last_updated >= entry.metadata.last_updated {
            existing.cached |= entry.metadata.cached;
            existing.k_node |= entry.metadata.k_node;

            trace!(metadata = ?existing, "Stored version is up to date");

            return Ok(false);
        }

        entry.metadata.cached |= existing.cached;
        entry.metadata.k_node |= existing.k_node;
        entry.metadata.last_republished = existing.last_republished;

        // Every version of an entry shares its storage key, so the stored
        // version stays intact until the new payload is written.
        self.content_store
            .put(&entry.metadata.storage_key(), &entry.payload)?;

        if let Some(existing) = self.find_exact_mut(&entry.metadata) {
            debug!(key = ?entry.metadata.key, last_updated = entry.metadata.last_updated, "Replaced entry");

            *existing = entry.metadata;
        }

        Ok(true)
    }

    /// Store a non authoritative copy.
    pub fn cache(&mut self, entry: StorageEntry) -> Result<bool, StorageError> {
        self.store(entry.with_flags(true, false))
    }

    /// Store a newer version of an entry that must already exist.
    pub fn update(&mut self, entry: StorageEntry) -> Result<bool, StorageError> {
        if self.find_exact_mut(&entry.metadata).is_none() {
            return Err(StorageError::NotFound);
        }

        self.store(entry)
    }

    /// Returns the first entry matching the filter.
    pub fn get(&self, parameter: &GetParameter) -> Result<StorageEntry, StorageError> {
        let metadata = self.find(parameter).ok_or(StorageError::NotFound)?;

        self.read(metadata)
    }

    /// Returns the entry with the same key, owner and type as `metadata`.
    pub fn get_exact(
        &self,
        metadata: &StorageEntryMetadata,
    ) -> Result<StorageEntry, StorageError> {
        let stored = self
            .entries
            .get(&metadata.key)
            .and_then(|list| list.iter().find(|m| *m == metadata))
            .ok_or(StorageError::NotFound)?;

        self.read(stored)
    }

    /// Remove an entry.
    ///
    /// A cached entry is only released from being a k-node, keeping its payload
    /// to serve reads. Any other entry is deleted with its payload.
    pub fn remove(&mut self, metadata: &StorageEntryMetadata) -> Result<(), StorageError> {
        let existing = self
            .find_exact_mut(metadata)
            .ok_or(StorageError::NotFound)?;

        if existing.cached {
            existing.k_node = false;
            trace!(?metadata, "Soft removed cached entry");

            return Ok(());
        }

        self.remove_hard(metadata)
    }

    /// Restore metadata from an external snapshot, ignoring already stored entries.
    ///
    /// Payloads are expected to already be in the [ContentStore].
    pub fn put_entries(&mut self, snapshot: impl IntoIterator<Item = StorageEntryMetadata>) {
        for metadata in snapshot {
            let list = self.entries.entry(metadata.key).or_default();

            if !list.contains(&metadata) {
                list.push(metadata);
            }
        }
    }

    /// Reset the republish time of an entry, returns false if it is not stored.
    pub fn mark_republished(&mut self, metadata: &StorageEntryMetadata) -> bool {
        match self.find_exact_mut(metadata) {
            Some(existing) => {
                existing.last_republished = Instant::now();
                true
            }
            None => false,
        }
    }

    // === Private Methods ===

    fn find(&self, parameter: &GetParameter) -> Option<&StorageEntryMetadata> {
        self.entries
            .get(&parameter.key)?
            .iter()
            .find(|metadata| metadata.satisfies(parameter))
    }

    fn find_exact_mut(
        &mut self,
        metadata: &StorageEntryMetadata,
    ) -> Option<&mut StorageEntryMetadata> {
        self.entries
            .get_mut(&metadata.key)?
            .iter_mut()
            .find(|m| *m == metadata)
    }

    fn insert(&mut self, entry: StorageEntry) -> Result<(), StorageError> {
        let StorageEntry { metadata, payload } = entry;

        if self
            .entries
            .get(&metadata.key)
            .is_some_and(|list| list.contains(&metadata))
        {
            return Err(StorageError::AlreadyExists);
        }

        self.content_store.put(&metadata.storage_key(), &payload)?;

        debug!(key = ?metadata.key, owner = %metadata.owner_id, last_updated = metadata.last_updated, "Stored entry");

        self.entries.entry(metadata.key).or_default().push(metadata);

        Ok(())
    }

    fn read(&self, metadata: &StorageEntryMetadata) -> Result<StorageEntry, StorageError> {
        let payload = self
            .content_store
            .get(&metadata.storage_key())?
            .ok_or_else(|| {
                io::Error::new(
                    io::ErrorKind::NotFound,
                    format!("Missing payload for {:?}", metadata.key),
                )
            })?;

        Ok(StorageEntry {
            metadata: metadata.clone(),
            payload,
        })
    }

    fn remove_hard(&mut self, metadata: &StorageEntryMetadata) -> Result<(), StorageError> {
        self.content_store.delete(&metadata.storage_key())?;

        if let Some(list) = self.entries.get_mut(&metadata.key) {
            list.retain(|m| m != metadata);

            if list.is_empty() {
                self.entries.remove(&metadata.key);
            }
        }

        trace!(?metadata, "Removed entry");

        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn entry(key: Id, last_updated: u64) -> StorageEntry {
        StorageEntry::new(key, "alice", "text", format!("v{last_updated}"))
            .with_last_updated(last_updated)
    }

    #[test]
    fn store_and_get() {
        let mut storage = StorageEngine::default();
        let key = Id::random();

        assert!(storage.store(entry(key, 1)).unwrap());

        let found = storage.get(&GetParameter::new(key)).unwrap();
        assert_eq!(found.payload(), &bytes::Bytes::from("v1"));
        assert!(storage.contains(&GetParameter::new(key).with_owner("alice")));
        assert!(matches!(
            storage.get(&GetParameter::new(key).with_owner("bob")),
            Err(StorageError::NotFound)
        ));
    }

    #[test]
    fn newer_version_replaces_and_merges_flags() {
        let mut storage = StorageEngine::default();
        let key = Id::random();

        assert!(storage.store(entry(key, 1).with_flags(true, false)).unwrap());
        assert!(storage.store(entry(key, 2).with_flags(false, true)).unwrap());
        assert!(storage.store(entry(key, 3)).unwrap());

        assert_eq!(storage.len(), 1);

        let stored = storage.get(&GetParameter::new(key)).unwrap();
        assert_eq!(stored.metadata().last_updated(), 3);
        assert!(stored.metadata().is_cached());
        assert!(stored.metadata().is_k_node());
        assert_eq!(stored.payload(), &bytes::Bytes::from("v3"));
    }

    #[test]
    fn older_version_is_not_updated() {
        let mut storage = StorageEngine::default();
        let key = Id::random();

        storage.store(entry(key, 5)).unwrap();
        let before = storage.get(&GetParameter::new(key)).unwrap();

        assert!(!storage.store(entry(key, 5).with_flags(false, true)).unwrap());
        assert!(!storage.store(entry(key, 4)).unwrap());

        let after = storage.get(&GetParameter::new(key)).unwrap();
        assert_eq!(after.payload(), before.payload());
        assert_eq!(after.metadata().last_updated(), 5);
        assert!(after.metadata().is_k_node());
        assert!(after.metadata().last_republished() >= before.metadata().last_republished());
    }

    #[test]
    fn cache_is_not_authoritative() {
        let mut storage = StorageEngine::default();
        let key = Id::random();

        storage.cache(entry(key, 1).with_flags(false, true)).unwrap();

        let stored = storage.get(&GetParameter::new(key)).unwrap();
        assert!(stored.metadata().is_cached());
        assert!(!stored.metadata().is_k_node());
        assert_eq!(storage.cached_entries().len(), 1);
    }

    #[test]
    fn remove_cached_keeps_payload() {
        let mut storage = StorageEngine::default();
        let key = Id::random();

        storage.store(entry(key, 1).with_flags(true, true)).unwrap();

        let metadata = storage.get(&GetParameter::new(key)).unwrap().metadata;
        storage.remove(&metadata).unwrap();

        let stored = storage.get(&GetParameter::new(key)).unwrap();
        assert!(!stored.metadata().is_k_node());
        assert_eq!(stored.payload(), &bytes::Bytes::from("v1"));
    }

    #[test]
    fn remove_deletes_payload() {
        let mut storage = StorageEngine::default();
        let key = Id::random();

        storage.store(entry(key, 1)).unwrap();
        let metadata = storage.get(&GetParameter::new(key)).unwrap().metadata;

        storage.remove(&metadata).unwrap();

        assert!(storage.is_empty());
        assert!(matches!(
            storage.remove(&metadata),
            Err(StorageError::NotFound)
        ));
    }

    #[test]
    fn update_requires_existing() {
        let mut storage = StorageEngine::default();
        let key = Id::random();

        assert!(matches!(
            storage.update(entry(key, 1)),
            Err(StorageError::NotFound)
        ));

        storage.store(entry(key, 1)).unwrap();
        assert!(storage.update(entry(key, 2)).unwrap());
    }

    #[test]
    fn distinct_owners_and_types_coexist() {
        let mut storage = StorageEngine::default();
        let key = Id::random();

        storage.store(entry(key, 1)).unwrap();
        storage
            .store(StorageEntry::new(key, "bob", "text", "bob").with_last_updated(1))
            .unwrap();
        storage
            .store(StorageEntry::new(key, "alice", "image", "img").with_last_updated(1))
            .unwrap();

        assert_eq!(storage.len(), 3);
        assert_eq!(
            storage
                .get(&GetParameter::new(key).with_owner("bob"))
                .unwrap()
                .payload(),
            &bytes::Bytes::from("bob")
        );
        assert_eq!(
            storage
                .get(&GetParameter::new(key).with_type("image"))
                .unwrap()
                .payload(),
            &bytes::Bytes::from("img")
        );
    }

    #[test]
    fn put_entries_restores_snapshot() {
        let dir = tempfile::tempdir().unwrap();
        let key = Id::random();

        let snapshot = {
            let mut storage =
                StorageEngine::new(Box::new(FsContentStore::new(dir.path()).unwrap()));
            storage.store(entry(key, 1)).unwrap();
            storage.entries()
        };

        let mut restored = StorageEngine::new(Box::new(FsContentStore::new(dir.path()).unwrap()));
        restored.put_entries(snapshot.clone());
        restored.put_entries(snapshot);

        assert_eq!(restored.len(), 1);
        assert_eq!(
            restored.get(&GetParameter::new(key)).unwrap().payload(),
            &bytes::Bytes::from("v1")
        );
    }

    #[derive(Debug, Default)]
    /// Accepts the first write, fails every later one.
    struct FailingStore {
        inner: MemoryContentStore,
        writes: usize,
    }

    impl ContentStore for FailingStore {
        fn put(&mut self, key: &Id, bytes: &[u8]) -> io::Result<()> {
            self.writes += 1;

            if self.writes > 1 {
                return Err(io::Error::other("disk full"));
            }

            self.inner.put(key, bytes)
        }

        fn get(&self, key: &Id) -> io::Result<Option<bytes::Bytes>> {
            self.inner.get(key)
        }

        fn delete(&mut self, key: &Id) -> io::Result<bool> {
            self.inner.delete(key)
        }
    }

    #[test]
    fn failed_write_keeps_stored_version() {
        let mut storage = StorageEngine::new(Box::<FailingStore>::default());
        let key = Id::random();

        assert!(storage.store(entry(key, 1).with_flags(false, true)).unwrap());

        assert!(matches!(
            storage.store(entry(key, 2)),
            Err(StorageError::Io(_))
        ));

        let stored = storage.get(&GetParameter::new(key)).unwrap();
        assert_eq!(stored.metadata().last_updated(), 1);
        assert!(stored.metadata().is_k_node());
        assert_eq!(stored.payload(), &bytes::Bytes::from("v1"));
    }

    #[test]
    fn missing_payload_is_io_error() {
        let mut storage = StorageEngine::default();
        let key = Id::random();

        storage.put_entries([entry(key, 1).metadata]);

        assert!(matches!(
            storage.get(&GetParameter::new(key)),
            Err(StorageError::Io(_))
        ));
    }
}
