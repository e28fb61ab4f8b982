//! Stored content, its metadata, and the filters used to look it up.

use std::{
    hash::{Hash, Hasher},
    time::{Instant, SystemTime, UNIX_EPOCH},
};

use bytes::Bytes;

use crate::common::Id;

/// Seconds since the unix epoch.
pub fn now_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or_default()
}

#[derive(Debug, Clone)]
/// Metadata of a stored content.
///
/// Two metadata are equal if they share the same key, owner and content type,
/// regardless of their content hash or version.
pub struct StorageEntryMetadata {
    pub(crate) key: Id,
    pub(crate) owner_id: String,
    pub(crate) content_type: String,
    pub(crate) content_hash: Id,
    pub(crate) last_updated: u64,
    pub(crate) cached: bool,
    pub(crate) k_node: bool,
    pub(crate) last_republished: Instant,
}

impl StorageEntryMetadata {
    pub fn new(
        key: Id,
        owner_id: impl Into<String>,
        content_type: impl Into<String>,
        content_hash: Id,
        last_updated: u64,
    ) -> Self {
        Self {
            key,
            owner_id: owner_id.into(),
            content_type: content_type.into(),
            content_hash,
            last_updated,
            cached: false,
            k_node: false,
            last_republished: Instant::now(),
        }
    }

    // === Getters ===

    pub fn key(&self) -> &Id {
        &self.key
    }

    pub fn owner_id(&self) -> &str {
        &self.owner_id
    }

    pub fn content_type(&self) -> &str {
        &self.content_type
    }

    /// SHA-1 of the payload.
    pub fn content_hash(&self) -> &Id {
        &self.content_hash
    }

    /// Version of the content, in seconds since the unix epoch.
    pub fn last_updated(&self) -> u64 {
        self.last_updated
    }

    /// This node holds a non authoritative copy.
    pub fn is_cached(&self) -> bool {
        self.cached
    }

    /// This node is one of the K closest nodes responsible for the content.
    pub fn is_k_node(&self) -> bool {
        self.k_node
    }

    pub fn last_republished(&self) -> Instant {
        self.last_republished
    }

    /// Key of the payload in the [crate::ContentStore], derived from key, owner and type.
    pub fn storage_key(&self) -> Id {
        let mut hasher = sha1_smol::Sha1::new();

        hasher.update(self.key.as_bytes());
        hasher.update(self.owner_id.as_bytes());
        hasher.update(&[0]);
        hasher.update(self.content_type.as_bytes());

        Id::from(hasher.digest().bytes())
    }

    /// Returns true if this metadata matches every field set in the filter.
    pub fn satisfies(&self, parameter: &GetParameter) -> bool {
        if self.key != parameter.key {
            return false;
        }

        if let Some(owner_id) = &parameter.owner_id {
            if owner_id != &self.owner_id {
                return false;
            }
        }

        if let Some(content_type) = &parameter.content_type {
            if content_type != &self.content_type {
                return false;
            }
        }

        true
    }

    /// Returns true if this metadata matches the filter and is strictly newer
    /// than the version the requester holds.
    pub fn is_newer_than(&self, parameter: &FreshGetParameter) -> bool {
        self.satisfies(&parameter.parameter) && self.last_updated > parameter.last_updated
    }
}

impl PartialEq for StorageEntryMetadata {
    fn eq(&self, other: &Self) -> bool {
        self.key == other.key
            && self.owner_id == other.owner_id
            && self.content_type == other.content_type
    }
}

impl Eq for StorageEntryMetadata {}

impl Hash for StorageEntryMetadata {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.key.hash(state);
        self.owner_id.hash(state);
        self.content_type.hash(state);
    }
}

#[derive(Debug, Clone, PartialEq)]
/// A content and its metadata.
pub struct StorageEntry {
    pub(crate) metadata: StorageEntryMetadata,
    pub(crate) payload: Bytes,
}

impl StorageEntry {
    /// Create a new entry versioned with the current time.
    pub fn new(
        key: Id,
        owner_id: impl Into<String>,
        content_type: impl Into<String>,
        payload: impl Into<Bytes>,
    ) -> Self {
        let payload: Bytes = payload.into();

        Self {
            metadata: StorageEntryMetadata::new(
                key,
                owner_id,
                content_type,
                Id::hash(&payload),
                now_secs(),
            ),
            payload,
        }
    }

    /// Override the version of this entry.
    pub fn with_last_updated(mut self, last_updated: u64) -> Self {
        self.metadata.last_updated = last_updated;
        self
    }

    pub(crate) fn with_flags(mut self, cached: bool, k_node: bool) -> Self {
        self.metadata.cached = cached;
        self.metadata.k_node = k_node;
        self
    }

    // === Getters ===

    pub fn metadata(&self) -> &StorageEntryMetadata {
        &self.metadata
    }

    pub fn payload(&self) -> &Bytes {
        &self.payload
    }

    // === Public Methods ===

    /// Replace the payload, bumping the version to a strictly newer timestamp.
    pub fn update_payload(&mut self, payload: impl Into<Bytes>) {
        self.payload = payload.into();
        self.metadata.content_hash = Id::hash(&self.payload);
        self.metadata.last_updated = now_secs().max(self.metadata.last_updated.saturating_add(1));
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
/// Filter over stored content, the key is required, owner and type are optional.
pub struct GetParameter {
    pub(crate) key: Id,
    pub(crate) content_type: Option<String>,
    pub(crate) owner_id: Option<String>,
}

impl GetParameter {
    pub fn new(key: Id) -> Self {
        Self {
            key,
            content_type: None,
            owner_id: None,
        }
    }

    pub fn with_type(mut self, content_type: impl Into<String>) -> Self {
        self.content_type = Some(content_type.into());
        self
    }

    pub fn with_owner(mut self, owner_id: impl Into<String>) -> Self {
        self.owner_id = Some(owner_id.into());
        self
    }

    // === Getters ===

    pub fn key(&self) -> &Id {
        &self.key
    }

    pub fn content_type(&self) -> Option<&str> {
        self.content_type.as_deref()
    }

    pub fn owner_id(&self) -> Option<&str> {
        self.owner_id.as_deref()
    }
}

impl From<&StorageEntryMetadata> for GetParameter {
    fn from(metadata: &StorageEntryMetadata) -> Self {
        Self {
            key: metadata.key,
            content_type: Some(metadata.content_type.clone()),
            owner_id: Some(metadata.owner_id.clone()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
/// A [GetParameter] that only accepts versions strictly newer than `last_updated`.
pub struct FreshGetParameter {
    pub(crate) parameter: GetParameter,
    pub(crate) last_updated: u64,
}

impl FreshGetParameter {
    pub fn new(parameter: GetParameter, last_updated: u64) -> Self {
        Self {
            parameter,
            last_updated,
        }
    }

    // === Getters ===

    pub fn parameter(&self) -> &GetParameter {
        &self.parameter
    }

    pub fn last_updated(&self) -> u64 {
        self.last_updated
    }
}

impl From<&StorageEntryMetadata> for FreshGetParameter {
    fn from(metadata: &StorageEntryMetadata) -> Self {
        Self {
            parameter: metadata.into(),
            last_updated: metadata.last_updated,
        }
    }
}
