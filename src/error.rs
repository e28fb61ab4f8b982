//! Main Crate Error

use std::time::Duration;

use crate::common::Id;

#[derive(thiserror::Error, Debug)]
/// Kadstore crate error enum.
pub enum Error {
    #[error(transparent)]
    /// Local storage errors, including content that could not be found.
    Storage(#[from] StorageError),

    #[error(transparent)]
    /// Iterative lookup errors.
    Lookup(#[from] LookupError),

    /// A freshness lookup found no version newer than the one the caller already holds.
    #[error("Content is already up to date")]
    UpToDate,

    #[error(transparent)]
    /// The node was shutdown before or while handling the call.
    DhtWasShutdown(#[from] DhtWasShutdown),

    #[error(transparent)]
    /// Transparent [std::io::Error], from spawning the threads behind async calls.
    IO(#[from] std::io::Error),
}

#[derive(thiserror::Error, Debug)]
/// Errors returned by the [crate::StorageEngine].
pub enum StorageError {
    /// No entry matches the requested key, owner and type.
    #[error("Content not found")]
    NotFound,

    /// An entry with the same key, owner and type is already stored.
    #[error("Content already exists")]
    AlreadyExists,

    #[error(transparent)]
    /// Backing content store failure.
    Io(#[from] std::io::Error),
}

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
/// Errors returned by iterative lookups.
pub enum LookupError {
    /// The lookup did not converge before its deadline.
    #[error("Lookup for {target} did not converge in {timeout:?}")]
    RoutingFailure {
        /// Target of the lookup.
        target: Id,
        /// The operation timeout that elapsed.
        timeout: Duration,
    },
}

#[derive(thiserror::Error, Debug)]
/// Errors decoding a message received from the network.
pub enum DecodeError {
    #[error("Failed to parse packet bytes: {0}")]
    /// Invalid bencode.
    Bencode(#[from] serde_bencode::Error),

    #[error(transparent)]
    /// Invalid node or content id.
    InvalidId(#[from] IdError),

    /// Compact nodes must be a multiple of 26 bytes.
    #[error("Wrong number of bytes for nodes message ({0})")]
    InvalidNodes(usize),
}

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
/// Errors parsing an [Id].
pub enum IdError {
    #[error("Invalid Id size, expected 20, got {0}")]
    /// Invalid byte length.
    InvalidIdSize(usize),

    #[error("Invalid Id encoding: {0}")]
    /// Not a 40 characters hex string.
    InvalidIdEncoding(String),
}

#[derive(thiserror::Error, Debug, Clone, Copy, PartialEq, Eq)]
#[error("The Dht was shutdown")]
/// The Dht node was shutdown.
pub struct DhtWasShutdown;
