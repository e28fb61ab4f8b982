//! AsyncDht node.

use std::thread;

use crate::{
    common::{FreshGetParameter, GetParameter, Id, Node, StorageEntry},
    dht::{Dht, Info},
    error::DhtWasShutdown,
    operations::lookup::ContentLookupOutcome,
    Error,
};

impl Dht {
    /// Return an async version of the Dht client.
    pub fn as_async(self) -> AsyncDht {
        AsyncDht(self)
    }
}

#[derive(Debug, Clone)]
/// Async version of the Dht node.
///
/// Every call runs the blocking operation on its own thread and awaits its result.
pub struct AsyncDht(Dht);

impl AsyncDht {
    // === Getters ===

    /// Returns the blocking [Dht] behind this handle.
    pub fn as_sync(&self) -> &Dht {
        &self.0
    }

    /// Information and statistics about this [Dht] node.
    pub async fn info(&self) -> Result<Info, DhtWasShutdown> {
        self.0.info()
    }

    /// Turn this node's routing table to a list of bootstraping nodes.
    pub async fn to_bootstrap(&self) -> Result<Vec<String>, DhtWasShutdown> {
        self.0.to_bootstrap()
    }

    // === Public Methods ===

    /// Shutdown the refresh task and the transport.
    pub async fn shutdown(&mut self) {
        let _ = self.run(|dht| dht.shutdown()).await;
    }

    /// Returns true if this node knows about any other node.
    pub async fn bootstrapped(&self) -> Result<bool, Error> {
        let id = self.0.id();

        let nodes = self.find_node(id).await?;

        Ok(nodes.iter().any(|node| node.id() != &id))
    }

    pub async fn find_node(&self, target: Id) -> Result<Vec<Node>, Error> {
        self.run(move |dht| dht.find_node(target)).await?
    }

    // === Store ===

    /// Async version of [Dht::put].
    pub async fn put(&self, entry: StorageEntry) -> Result<usize, Error> {
        self.run(move |dht| dht.put(entry)).await?
    }

    /// Async version of [Dht::put_and_cache].
    pub async fn put_and_cache(&self, entry: StorageEntry) -> Result<usize, Error> {
        self.run(move |dht| dht.put_and_cache(entry)).await?
    }

    // === Get ===

    /// Async version of [Dht::get].
    pub async fn get(&self, parameter: GetParameter) -> Result<StorageEntry, Error> {
        self.run(move |dht| dht.get(&parameter)).await?
    }

    /// Async version of [Dht::get_and_cache].
    pub async fn get_and_cache(&self, parameter: GetParameter) -> Result<StorageEntry, Error> {
        self.run(move |dht| dht.get_and_cache(&parameter)).await?
    }

    /// Async version of [Dht::get_updated].
    pub async fn get_updated(&self, parameter: FreshGetParameter) -> Result<StorageEntry, Error> {
        self.run(move |dht| dht.get_updated(&parameter)).await?
    }

    /// Async version of [Dht::content_lookup].
    pub async fn content_lookup(
        &self,
        parameter: GetParameter,
    ) -> Result<ContentLookupOutcome, Error> {
        self.run(move |dht| dht.content_lookup(&parameter)).await?
    }

    /// Async version of [Dht::content_lookup_fresh].
    pub async fn content_lookup_fresh(
        &self,
        parameter: FreshGetParameter,
    ) -> Result<ContentLookupOutcome, Error> {
        self.run(move |dht| dht.content_lookup_fresh(&parameter)).await?
    }

    /// Async version of [Dht::refresh].
    pub async fn refresh(&self) -> Result<usize, Error> {
        self.run(|dht| dht.refresh()).await?
    }

    // === Private Methods ===

    /// Spawn failures surface as [Error::IO].
    async fn run<T, F>(&self, f: F) -> Result<T, Error>
    where
        T: Send + 'static,
        F: FnOnce(&Dht) -> T + Send + 'static,
    {
        let (sender, receiver) = flume::bounded::<T>(1);
        let dht = self.0.clone();

        thread::Builder::new()
            .name("kadstore-async".to_string())
            .spawn(move || {
                let _ = sender.send(f(&dht));
            })?;

        receiver
            .recv_async()
            .await
            .map_err(|_| DhtWasShutdown.into())
    }
}
