//! K-RPC transports, correlating requests with their replies or timeouts.

mod config;
pub mod memory;
mod socket;

use std::fmt::Debug;
use std::net::SocketAddrV4;

use flume::Sender;

use crate::common::{
    messages::{RequestSpecific, ResponseSpecific},
    Node,
};

pub use config::{
    Config, DEFAULT_ALPHA, DEFAULT_OPERATION_TIMEOUT, DEFAULT_REQUEST_TIMEOUT,
    DEFAULT_RESTORE_INTERVAL,
};
pub use memory::{MemoryNetwork, MemoryTransport};
pub use socket::UdpTransport;

/// Correlation id matching a request to its reply or timeout.
pub type TransactionId = u32;

#[derive(Debug, Clone)]
/// The outcome of a request, delivered exactly once per [Transport::request].
pub enum QueryEvent {
    Reply {
        transaction_id: TransactionId,
        from: Node,
        response: ResponseSpecific,
    },
    Timeout {
        transaction_id: TransactionId,
    },
}

impl QueryEvent {
    pub fn transaction_id(&self) -> TransactionId {
        match self {
            QueryEvent::Reply { transaction_id, .. } => *transaction_id,
            QueryEvent::Timeout { transaction_id } => *transaction_id,
        }
    }
}

/// Sends requests to other nodes.
pub trait Transport: Debug + Send + Sync {
    /// Returns the address other nodes reach this node at.
    fn local_addr(&self) -> SocketAddrV4;

    /// Send a request, and deliver exactly one [QueryEvent] for it to `events`.
    fn request(
        &self,
        to: SocketAddrV4,
        request: RequestSpecific,
        events: Sender<QueryEvent>,
    ) -> TransactionId;

    /// Send a request without waiting for any reply.
    fn send(&self, to: SocketAddrV4, request: RequestSpecific);

    /// Stop sending and receiving messages.
    fn shutdown(&self);
}

/// Answers incoming requests, the server side of a node.
pub trait RequestHandler: Debug + Send + Sync {
    /// Returns the response to send back, if any.
    fn handle_request(&self, from: SocketAddrV4, request: RequestSpecific)
        -> Option<ResponseSpecific>;
}
