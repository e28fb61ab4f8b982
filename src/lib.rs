#![doc = include_str!("../README.md")]
//! ## Feature flags
#![doc = document_features::document_features!()]
//!

// Public modules
mod common;
mod error;
mod operations;

#[cfg(feature = "async")]
pub mod async_dht;
mod dht;
pub mod rpc;
pub mod storage;

pub use crate::common::{
    messages, FreshGetParameter, GetParameter, Id, KBucket, Node, RoutingTable, StorageEntry,
    StorageEntryMetadata, MAX_BUCKET_SIZE_K,
};
pub use crate::operations::lookup::ContentLookupOutcome;
pub use bytes::Bytes;
pub use dht::{Dht, DhtBuilder, Info, Testnet};
pub use error::{DecodeError, DhtWasShutdown, Error, IdError, LookupError, StorageError};
pub use storage::{ContentStore, FsContentStore, MemoryContentStore, StorageEngine};
