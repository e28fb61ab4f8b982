//! In-process network, for tests and simulations without sockets.
//!
//! Requests are delivered synchronously to the receiving node's [RequestHandler],
//! and requests to offline or unknown addresses time out after the request timeout.

use std::collections::HashMap;
use std::net::{Ipv4Addr, SocketAddrV4};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use flume::Sender;
use tracing::trace;

use crate::common::{
    messages::{RequestSpecific, ResponseSpecific},
    Node,
};

use super::{QueryEvent, RequestHandler, TransactionId, Transport};

const FIRST_PORT: u16 = 10_000;

#[derive(Debug, Clone)]
/// A shared in-process network of nodes, addressed by `127.0.0.1:<port>`.
pub struct MemoryNetwork(Arc<Mutex<State>>);

#[derive(Debug)]
struct State {
    next_port: u16,
    peers: HashMap<SocketAddrV4, Peer>,
}

#[derive(Debug)]
struct Peer {
    handler: Arc<dyn RequestHandler>,
    online: bool,
}

impl Default for MemoryNetwork {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryNetwork {
    pub fn new() -> Self {
        Self(Arc::new(Mutex::new(State {
            next_port: FIRST_PORT,
            peers: HashMap::new(),
        })))
    }

    // === Public Methods ===

    /// Join the network with a handler for incoming requests, returning a transport
    /// bound to a fresh address.
    pub fn register(
        &self,
        handler: Arc<dyn RequestHandler>,
        request_timeout: Duration,
    ) -> MemoryTransport {
        let mut state = self.lock();

        let address = SocketAddrV4::new(Ipv4Addr::LOCALHOST, state.next_port);
        state.next_port = state.next_port.wrapping_add(1);

        state.peers.insert(
            address,
            Peer {
                handler,
                online: true,
            },
        );

        MemoryTransport {
            network: self.clone(),
            local_addr: address,
            request_timeout,
            next_tid: AtomicU32::new(1),
        }
    }

    /// Take a node offline or bring it back, offline nodes never answer.
    pub fn set_online(&self, address: &SocketAddrV4, online: bool) {
        if let Some(peer) = self.lock().peers.get_mut(address) {
            peer.online = online;
        }
    }

    /// Returns true if a node is registered at this address and online.
    pub fn is_online(&self, address: &SocketAddrV4) -> bool {
        self.lock()
            .peers
            .get(address)
            .map(|peer| peer.online)
            .unwrap_or(false)
    }

    /// Number of registered nodes, online or not.
    pub fn len(&self) -> usize {
        self.lock().peers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    // === Private Methods ===

    fn lock(&self) -> MutexGuard<'_, State> {
        self.0.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn handler(&self, address: &SocketAddrV4) -> Option<Arc<dyn RequestHandler>> {
        self.lock()
            .peers
            .get(address)
            .filter(|peer| peer.online)
            .map(|peer| peer.handler.clone())
    }

    fn unregister(&self, address: &SocketAddrV4) {
        self.lock().peers.remove(address);
    }
}

#[derive(Debug)]
/// A [Transport] over a [MemoryNetwork].
pub struct MemoryTransport {
    network: MemoryNetwork,
    local_addr: SocketAddrV4,
    request_timeout: Duration,
    next_tid: AtomicU32,
}

impl MemoryTransport {
    fn deliver(&self, to: &SocketAddrV4, request: RequestSpecific) -> Option<ResponseSpecific> {
        // The network lock is released before the handler runs, so handlers can
        // send requests of their own.
        let handler = self.network.handler(to)?;

        handler.handle_request(self.local_addr, request)
    }
}

impl Transport for MemoryTransport {
    fn local_addr(&self) -> SocketAddrV4 {
        self.local_addr
    }

    fn request(
        &self,
        to: SocketAddrV4,
        request: RequestSpecific,
        events: Sender<QueryEvent>,
    ) -> TransactionId {
        let transaction_id = self.next_tid.fetch_add(1, Ordering::Relaxed);

        match self.deliver(&to, request) {
            Some(response) => {
                let _ = events.send(QueryEvent::Reply {
                    transaction_id,
                    from: Node::new(response.responder_id, to),
                    response,
                });
            }
            None => {
                trace!(?to, transaction_id, "No response, timing out");

                let timeout = self.request_timeout;
                std::thread::spawn(move || {
                    std::thread::sleep(timeout);
                    let _ = events.send(QueryEvent::Timeout { transaction_id });
                });
            }
        }

        transaction_id
    }

    fn send(&self, to: SocketAddrV4, request: RequestSpecific) {
        let _ = self.deliver(&to, request);
    }

    fn shutdown(&self) {
        self.network.unregister(&self.local_addr);
    }
}

#[cfg(test)]
mod test {
    use crate::common::messages::{RequestTypeSpecific, ResponseTypeSpecific};
    use crate::common::Id;

    use super::*;

    #[derive(Debug)]
    struct Pong(Id);

    impl RequestHandler for Pong {
        fn handle_request(
            &self,
            _from: SocketAddrV4,
            _request: RequestSpecific,
        ) -> Option<ResponseSpecific> {
            Some(ResponseSpecific {
                responder_id: self.0,
                response_type: ResponseTypeSpecific::Ping,
            })
        }
    }

    fn ping() -> RequestSpecific {
        RequestSpecific {
            requester_id: Id::random(),
            request_type: RequestTypeSpecific::Ping,
        }
    }

    #[test]
    fn reply() {
        let network = MemoryNetwork::new();
        let id = Id::random();

        let a = network.register(Arc::new(Pong(Id::random())), Duration::from_millis(10));
        let b = network.register(Arc::new(Pong(id)), Duration::from_millis(10));

        assert_ne!(a.local_addr(), b.local_addr());
        assert_eq!(network.len(), 2);

        let (tx, rx) = flume::unbounded();
        let tid = a.request(b.local_addr(), ping(), tx);

        match rx.recv_timeout(Duration::from_secs(1)).unwrap() {
            QueryEvent::Reply {
                transaction_id,
                from,
                ..
            } => {
                assert_eq!(transaction_id, tid);
                assert_eq!(from.id(), &id);
                assert_eq!(from.address(), b.local_addr());
            }
            event => panic!("unexpected event {event:?}"),
        }
    }

    #[test]
    fn offline_times_out() {
        let network = MemoryNetwork::new();

        let a = network.register(Arc::new(Pong(Id::random())), Duration::from_millis(10));
        let b = network.register(Arc::new(Pong(Id::random())), Duration::from_millis(10));

        network.set_online(&b.local_addr(), false);
        assert!(!network.is_online(&b.local_addr()));

        let (tx, rx) = flume::unbounded();
        let tid = a.request(b.local_addr(), ping(), tx);

        assert!(matches!(
            rx.recv_timeout(Duration::from_secs(1)).unwrap(),
            QueryEvent::Timeout { transaction_id } if transaction_id == tid
        ));
    }

    #[test]
    fn shutdown_unregisters() {
        let network = MemoryNetwork::new();

        let a = network.register(Arc::new(Pong(Id::random())), Duration::from_millis(10));
        a.shutdown();

        assert!(network.is_empty());
    }
}
