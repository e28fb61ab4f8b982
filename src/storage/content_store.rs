//! Backing stores for content payloads, addressed by [StorageEntryMetadata::storage_key].
//!
//! [StorageEntryMetadata::storage_key]: crate::StorageEntryMetadata::storage_key

use std::collections::HashMap;
use std::fmt::Debug;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use bytes::Bytes;

use crate::common::Id;

const FILE_EXTENSION: &str = "kct";

/// A content addressed blob store holding the payloads of stored entries.
pub trait ContentStore: Debug + Send + Sync {
    /// Persist `bytes` under `key`, overwriting any previous payload.
    fn put(&mut self, key: &Id, bytes: &[u8]) -> io::Result<()>;
    /// Read the payload stored under `key`, if any.
    fn get(&self, key: &Id) -> io::Result<Option<Bytes>>;
    /// Delete the payload stored under `key`, returns `true` if it existed.
    fn delete(&mut self, key: &Id) -> io::Result<bool>;
}

#[derive(Debug, Default)]
/// In memory [ContentStore], the default.
pub struct MemoryContentStore {
    payloads: HashMap<Id, Bytes>,
}

impl MemoryContentStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl ContentStore for MemoryContentStore {
    fn put(&mut self, key: &Id, bytes: &[u8]) -> io::Result<()> {
        self.payloads.insert(*key, Bytes::copy_from_slice(bytes));
        Ok(())
    }

    fn get(&self, key: &Id) -> io::Result<Option<Bytes>> {
        Ok(self.payloads.get(key).cloned())
    }

    fn delete(&mut self, key: &Id) -> io::Result<bool> {
        Ok(self.payloads.remove(key).is_some())
    }
}

#[derive(Debug, Clone)]
/// [ContentStore] writing one file per payload, in a folder per the first
/// two hex characters of its key.
pub struct FsContentStore {
    root: PathBuf,
}

impl FsContentStore {
    /// Create a store rooted at `root`, creating the directory if needed.
    pub fn new(root: impl AsRef<Path>) -> io::Result<Self> {
        let root = root.as_ref().to_path_buf();
        fs::create_dir_all(&root)?;

        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn path(&self, key: &Id) -> PathBuf {
        let hex = key.to_string();

        self.root
            .join(&hex[..2])
            .join(format!("{hex}.{FILE_EXTENSION}"))
    }
}

impl ContentStore for FsContentStore {
    fn put(&mut self, key: &Id, bytes: &[u8]) -> io::Result<()> {
        let path = self.path(key);

        if let Some(folder) = path.parent() {
            fs::create_dir_all(folder)?;
        }

        fs::write(path, bytes)
    }

    fn get(&self, key: &Id) -> io::Result<Option<Bytes>> {
        match fs::read(self.path(key)) {
            Ok(bytes) => Ok(Some(bytes.into())),
            Err(error) if error.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(error) => Err(error),
        }
    }

    fn delete(&mut self, key: &Id) -> io::Result<bool> {
        match fs::remove_file(self.path(key)) {
            Ok(()) => Ok(true),
            Err(error) if error.kind() == io::ErrorKind::NotFound => Ok(false),
            Err(error) => Err(error),
        }
    }
}
