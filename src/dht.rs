//! Dht node.

use std::net::{SocketAddr, SocketAddrV4, ToSocketAddrs};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use flume::{RecvTimeoutError, Sender};
use tracing::{debug, info, trace};

use crate::common::{
    messages::{RequestSpecific, RequestTypeSpecific},
    FreshGetParameter, GetParameter, Id, Node, RoutingTable, StorageEntry,
};
use crate::error::{DhtWasShutdown, StorageError};
use crate::operations::{lookup::ContentLookupOutcome, server::Server, Context, State};
use crate::rpc::{Config, MemoryNetwork, QueryEvent, RequestHandler, Transport, UdpTransport};
use crate::storage::{ContentStore, MemoryContentStore, StorageEngine};
use crate::Error;

#[derive(Debug, Clone)]
/// Kademlia node storing and retrieving versioned content.
///
/// Cloning a [Dht] is cheap, every clone drives the same node.
pub struct Dht(Arc<DhtInner>);

#[derive(Debug)]
struct DhtInner {
    context: Arc<Context>,
    request_timeout: Duration,
    shutdown: AtomicBool,
    refresh_task: Mutex<Option<RefreshTask>>,
}

#[derive(Debug)]
struct RefreshTask {
    stop: Sender<()>,
    handle: JoinHandle<()>,
}

#[derive(Debug, Default)]
/// A builder for a [Dht] node.
pub struct DhtBuilder(Config);

impl DhtBuilder {
    /// Bucket size and replication factor.
    pub fn k(mut self, k: usize) -> Self {
        self.0.k = k;

        self
    }

    /// Maximum inflight requests per lookup.
    pub fn alpha(mut self, alpha: usize) -> Self {
        self.0.alpha = alpha;

        self
    }

    /// Deadline for a lookup to converge.
    pub fn operation_timeout(mut self, operation_timeout: Duration) -> Self {
        self.0.operation_timeout = operation_timeout;

        self
    }

    /// Timeout of a single request.
    pub fn request_timeout(mut self, request_timeout: Duration) -> Self {
        self.0.request_timeout = request_timeout;

        self
    }

    /// Age of an entry before it is republished and refreshed.
    pub fn restore_interval(mut self, restore_interval: Duration) -> Self {
        self.0.restore_interval = restore_interval;

        self
    }

    /// Run refresh cycles on a background thread, defaults to true.
    pub fn background_refresh(mut self, background_refresh: bool) -> Self {
        self.0.background_refresh = background_refresh;

        self
    }

    /// Set the port to listen on.
    pub fn port(mut self, port: u16) -> Self {
        self.0.port = Some(port);

        self
    }

    /// Set bootstrapping nodes.
    pub fn bootstrap<T: ToString>(mut self, bootstrap: &[T]) -> Self {
        self.0.bootstrap = bootstrap.iter().map(|b| b.to_string()).collect();

        self
    }

    /// Set an explicit node [Id].
    pub fn id(mut self, id: Id) -> Self {
        self.0.id = Some(id);

        self
    }

    /// Set the owner this node publishes content for.
    pub fn owner_id(mut self, owner_id: impl Into<String>) -> Self {
        self.0.owner_id = Some(owner_id.into());

        self
    }

    /// Set the backing store for payloads.
    pub fn content_store(mut self, content_store: impl ContentStore + 'static) -> Self {
        self.0.content_store = Some(Box::new(content_store));

        self
    }

    /// Join an in-process [MemoryNetwork] instead of binding a UDP socket.
    pub fn network(mut self, network: &MemoryNetwork) -> Self {
        self.0.network = Some(network.clone());

        self
    }

    /// Create a Dht node.
    pub fn build(self) -> Result<Dht, std::io::Error> {
        Dht::new(self.0)
    }
}

impl Dht {
    /// Create a new Dht node.
    ///
    /// Could return an error if it failed to bind to the specified
    /// port or other io errors while binding the udp socket.
    pub fn new(config: Config) -> Result<Self, std::io::Error> {
        let id = config.id.unwrap_or_else(Id::random);

        let content_store: Box<dyn ContentStore> = match config.content_store {
            Some(content_store) => content_store,
            None => Box::<MemoryContentStore>::default(),
        };

        let state = State::new(
            RoutingTable::with_k(id, config.k),
            StorageEngine::new(content_store),
        );

        let server: Arc<dyn RequestHandler> = Arc::new(Server::new(id, config.k, state.clone()));

        let transport: Box<dyn Transport> = match &config.network {
            Some(network) => Box::new(network.register(server, config.request_timeout)),
            None => Box::new(UdpTransport::bind(
                config.port,
                config.request_timeout,
                server,
            )?),
        };

        let context = Arc::new(Context {
            id,
            owner_id: config.owner_id,
            k: config.k.max(1),
            alpha: config.alpha.max(1),
            operation_timeout: config.operation_timeout,
            restore_interval: config.restore_interval,
            state,
            transport,
        });

        info!(?id, local_addr = ?context.transport.local_addr(), "Dht node started");

        let dht = Dht(Arc::new(DhtInner {
            context,
            request_timeout: config.request_timeout,
            shutdown: AtomicBool::new(false),
            refresh_task: Mutex::new(None),
        }));

        if !config.bootstrap.is_empty() {
            dht.0.bootstrap(&config.bootstrap);
        }

        if config.background_refresh && !config.restore_interval.is_zero() {
            dht.0.start_refresh_task(config.restore_interval)?;
        }

        Ok(dht)
    }

    /// Returns a builder to edit settings before creating a Dht node.
    pub fn builder() -> DhtBuilder {
        DhtBuilder::default()
    }

    // === Getters ===

    /// Returns the [Id] of this node.
    pub fn id(&self) -> Id {
        self.0.context.id
    }

    /// Returns the address this node is listening on.
    pub fn local_addr(&self) -> SocketAddrV4 {
        self.0.context.transport.local_addr()
    }

    /// Information and statistics about this [Dht] node.
    pub fn info(&self) -> Result<Info, DhtWasShutdown> {
        let context = self.context()?;

        Ok(Info {
            id: context.id,
            local_addr: context.transport.local_addr(),
            owner_id: context.owner_id.clone(),
            routing_table_size: context.state.routing_table().size(),
            stored_entries: context.state.storage().len(),
        })
    }

    /// Turn this node's routing table to a list of bootstrapping nodes.
    pub fn to_bootstrap(&self) -> Result<Vec<String>, DhtWasShutdown> {
        Ok(self.context()?.state.routing_table().to_bootstrap())
    }

    /// Set the preferred contact for content owned by `owner_id`.
    pub fn add_connection(
        &self,
        owner_id: impl Into<String>,
        node: Node,
    ) -> Result<(), DhtWasShutdown> {
        self.context()?
            .state
            .routing_table_mut()
            .insert_connection(owner_id, node);

        Ok(())
    }

    // === Public Methods ===

    /// Shutdown the refresh task and the transport.
    ///
    /// Calls to any clone of this node return [DhtWasShutdown] afterwards.
    pub fn shutdown(&self) {
        self.0.shutdown();
    }

    /// Join the network through the given addresses.
    ///
    /// Returns true if the routing table has any node afterwards.
    pub fn bootstrap<T: ToString>(&self, bootstrap: &[T]) -> Result<bool, DhtWasShutdown> {
        self.context()?;

        let bootstrap = bootstrap.iter().map(|b| b.to_string()).collect::<Vec<_>>();

        Ok(self.0.bootstrap(&bootstrap))
    }

    /// Find the k closest nodes to `target`, this node included.
    pub fn find_node(&self, target: Id) -> Result<Vec<Node>, Error> {
        Ok(self.context()?.find_node(target)?)
    }

    // === Store ===

    /// Replicate `entry` to the k closest nodes to its key.
    ///
    /// Returns the number of nodes the entry was sent to, this node included.
    pub fn put(&self, entry: StorageEntry) -> Result<usize, Error> {
        self.context()?.store(entry)
    }

    /// Store `entry` on this node only.
    pub fn put_locally(&self, entry: StorageEntry) -> Result<bool, Error> {
        Ok(self.context()?.state.storage_mut().store(entry)?)
    }

    /// Store a non authoritative copy of `entry` on this node.
    pub fn cache(&self, entry: StorageEntry) -> Result<bool, Error> {
        Ok(self.context()?.state.storage_mut().cache(entry)?)
    }

    /// Replicate `entry` to the network and cache it locally.
    pub fn put_and_cache(&self, entry: StorageEntry) -> Result<usize, Error> {
        let targeted = self.put(entry.clone())?;
        self.cache(entry)?;

        Ok(targeted)
    }

    // === Get ===

    /// Get content matching `parameter`.
    ///
    /// Authoritative local copies are returned right away, cached copies are
    /// refreshed from the network first, anything else is looked up on the network.
    pub fn get(&self, parameter: &GetParameter) -> Result<StorageEntry, Error> {
        let context = self.context()?;

        let local = context.state.storage().get(parameter);

        match local {
            Ok(entry) if !entry.metadata().is_cached() || entry.metadata().is_k_node() => {
                Ok(entry)
            }
            Ok(entry) => {
                let fresh = FreshGetParameter::from(entry.metadata());

                match context.content_lookup_fresh(fresh) {
                    Ok(ContentLookupOutcome::Found { entry: newer, .. }) => {
                        context
                            .state
                            .storage_mut()
                            .update(newer.clone().with_flags(true, false))?;

                        Ok(newer)
                    }
                    Ok(_) => Ok(entry),
                    Err(error) => {
                        debug!(?error, "Failed to refresh cached entry, returning local copy");

                        Ok(entry)
                    }
                }
            }
            Err(StorageError::NotFound) => match context.content_lookup(parameter.clone())? {
                ContentLookupOutcome::Found { entry, .. } => Ok(entry),
                _ => Err(StorageError::NotFound.into()),
            },
            Err(error) => Err(error.into()),
        }
    }

    /// [Dht::get] and cache the result locally.
    pub fn get_and_cache(&self, parameter: &GetParameter) -> Result<StorageEntry, Error> {
        let entry = self.get(parameter)?;

        self.cache(entry.clone())?;

        Ok(entry)
    }

    /// Get content matching `parameter` from this node only.
    pub fn get_cached(&self, parameter: &GetParameter) -> Result<StorageEntry, Error> {
        Ok(self.context()?.state.storage().get(parameter)?)
    }

    /// Get a version strictly newer than `parameter.last_updated()` from the network.
    ///
    /// Updates the local copy if there is one. Returns [Error::UpToDate] if the
    /// network has no newer version.
    pub fn get_updated(&self, parameter: &FreshGetParameter) -> Result<StorageEntry, Error> {
        let context = self.context()?;

        match context.content_lookup_fresh(parameter.clone())? {
            ContentLookupOutcome::Found { entry, .. } => {
                match context.state.storage_mut().update(entry.clone()) {
                    Ok(_) | Err(StorageError::NotFound) => {}
                    Err(error) => return Err(error.into()),
                }

                Ok(entry)
            }
            ContentLookupOutcome::UpToDate { .. } => Err(Error::UpToDate),
            ContentLookupOutcome::NotFound => Err(StorageError::NotFound.into()),
        }
    }

    /// [Dht::get_updated] for content this node already holds.
    pub fn update_locally(&self, parameter: &FreshGetParameter) -> Result<StorageEntry, Error> {
        if !self.context()?.state.storage().contains(parameter.parameter()) {
            return Err(StorageError::NotFound.into());
        }

        self.get_updated(parameter)
    }

    /// Look up content matching `parameter` on the network, ignoring local copies.
    pub fn content_lookup(&self, parameter: &GetParameter) -> Result<ContentLookupOutcome, Error> {
        Ok(self.context()?.content_lookup(parameter.clone())?)
    }

    /// Look up a version strictly newer than `parameter.last_updated()` on the network.
    pub fn content_lookup_fresh(
        &self,
        parameter: &FreshGetParameter,
    ) -> Result<ContentLookupOutcome, Error> {
        Ok(self.context()?.content_lookup_fresh(parameter.clone())?)
    }

    /// Run one refresh cycle now, returns the number of entries refreshed.
    pub fn refresh(&self) -> Result<usize, Error> {
        self.context()?.refresh()
    }

    // === Private Methods ===

    fn context(&self) -> Result<&Context, DhtWasShutdown> {
        if self.0.shutdown.load(Ordering::Relaxed) {
            return Err(DhtWasShutdown);
        }

        Ok(&self.0.context)
    }
}

impl DhtInner {
    fn bootstrap(&self, bootstrap: &[String]) -> bool {
        let context = &self.context;

        for address in bootstrap {
            let Some(address) = resolve(address) else {
                debug!(?address, "Could not resolve bootstrap address");
                continue;
            };

            let (sender, receiver) = flume::bounded(1);

            context.transport.request(
                address,
                RequestSpecific {
                    requester_id: context.id,
                    request_type: RequestTypeSpecific::Ping,
                },
                sender,
            );

            // Transports deliver exactly one event per request.
            match receiver.recv_timeout(self.request_timeout * 2) {
                Ok(QueryEvent::Reply { from, .. }) => {
                    trace!(?from, "Bootstrap node responded");

                    context.state.routing_table_mut().insert(from);
                }
                Ok(QueryEvent::Timeout { .. }) | Err(_) => {
                    debug!(?address, "Bootstrap node did not respond");
                }
            }
        }

        if let Err(error) = context.find_node(context.id) {
            debug!(?error, "Bootstrap self lookup failed");
        }

        let size = context.state.routing_table().size();

        info!(size, "Bootstrapped");

        size > 0
    }

    fn start_refresh_task(&self, interval: Duration) -> Result<(), std::io::Error> {
        let (stop, receiver) = flume::bounded::<()>(1);
        let context = self.context.clone();

        let handle = thread::Builder::new()
            .name("kadstore-refresh".to_string())
            .spawn(move || loop {
                match receiver.recv_timeout(interval) {
                    Err(RecvTimeoutError::Timeout) => match context.refresh() {
                        Ok(refreshed) => trace!(refreshed, "Refresh cycle done"),
                        Err(error) => debug!(?error, "Refresh cycle failed"),
                    },
                    _ => break,
                }
            })?;

        *self
            .refresh_task
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(RefreshTask { stop, handle });

        Ok(())
    }

    fn shutdown(&self) {
        if self.shutdown.swap(true, Ordering::Relaxed) {
            return;
        }

        let task = self
            .refresh_task
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();

        if let Some(RefreshTask { stop, handle }) = task {
            let _ = stop.send(());
            let _ = handle.join();
        }

        self.context.transport.shutdown();

        info!(id = ?self.context.id, "Dht node shutdown");
    }
}

impl Drop for DhtInner {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn resolve(address: &str) -> Option<SocketAddrV4> {
    address.to_socket_addrs().ok()?.find_map(|address| match address {
        SocketAddr::V4(address) => Some(address),
        SocketAddr::V6(_) => None,
    })
}

/// Information and statistics about this node.
#[derive(Debug, Clone)]
pub struct Info {
    id: Id,
    local_addr: SocketAddrV4,
    owner_id: Option<String>,
    routing_table_size: usize,
    stored_entries: usize,
}

impl Info {
    /// This Node's [Id]
    pub fn id(&self) -> &Id {
        &self.id
    }

    /// Address that this node is listening on.
    pub fn local_addr(&self) -> SocketAddrV4 {
        self.local_addr
    }

    /// The owner this node publishes content for.
    pub fn owner_id(&self) -> Option<&str> {
        self.owner_id.as_deref()
    }

    /// Number of nodes in the routing table.
    pub fn routing_table_size(&self) -> usize {
        self.routing_table_size
    }

    /// Number of entries stored on this node.
    pub fn stored_entries(&self) -> usize {
        self.stored_entries
    }
}

/// Create a testnet of Dht nodes on an in-process network to run tests against.
#[derive(Debug)]
pub struct Testnet {
    pub bootstrap: Vec<String>,
    pub nodes: Vec<Dht>,
    pub network: MemoryNetwork,
}

impl Testnet {
    /// Create `count` nodes with default settings, bootstrapped to each other.
    pub fn new(count: usize) -> Result<Testnet, std::io::Error> {
        Self::new_with(count, |builder| builder)
    }

    /// Create `count` nodes, each configured by `configure`, bootstrapped to each other.
    pub fn new_with(
        count: usize,
        configure: impl Fn(DhtBuilder) -> DhtBuilder,
    ) -> Result<Testnet, std::io::Error> {
        let network = MemoryNetwork::new();

        let mut nodes: Vec<Dht> = vec![];
        let mut bootstrap = vec![];

        for i in 0..count {
            let builder = configure(Dht::builder().network(&network));

            let node = if i == 0 {
                builder.build()?
            } else {
                builder.bootstrap(&bootstrap).build()?
            };

            if i == 0 {
                bootstrap.push(node.local_addr().to_string());
            }

            nodes.push(node)
        }

        // Nodes that joined early learn about the ones that joined after them.
        for node in &nodes {
            if let Err(error) = node.find_node(node.id()) {
                debug!(id = ?node.id(), ?error, "Testnet self lookup failed");
            }
        }

        Ok(Self {
            bootstrap,
            nodes,
            network,
        })
    }
}
