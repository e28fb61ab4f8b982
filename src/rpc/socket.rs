//! UDP socket layer managing incoming/outgoing requests and responses.

mod inflight_requests;

use std::net::{SocketAddr, SocketAddrV4, UdpSocket};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use flume::Sender;
use tracing::{debug, trace};

use crate::common::messages::{Message, MessageType, RequestSpecific, ResponseSpecific};
use crate::common::Node;

use super::{QueryEvent, RequestHandler, TransactionId, Transport};
use inflight_requests::InflightRequests;

/// Largest UDP payload, content is sent in a single datagram.
const MAX_DATAGRAM_SIZE: usize = 65_507;
/// How long the receive loop blocks on an empty socket before sweeping timeouts.
const READ_TIMEOUT: Duration = Duration::from_millis(10);

#[derive(Debug)]
/// A [Transport] over a UdpSocket, answering incoming requests with a [RequestHandler].
///
/// A background thread receives datagrams, dispatches requests to the handler,
/// correlates responses with inflight requests, and expires unanswered requests.
pub struct UdpTransport {
    inner: Arc<Inner>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

#[derive(Debug)]
struct Inner {
    socket: UdpSocket,
    local_addr: SocketAddrV4,
    next_tid: AtomicU32,
    request_timeout: Duration,
    inflight_requests: Mutex<InflightRequests>,
    handler: Arc<dyn RequestHandler>,
    shutdown: AtomicBool,
}

impl UdpTransport {
    /// Bind to `0.0.0.0:port`, or any available port if `port` is None.
    pub fn bind(
        port: Option<u16>,
        request_timeout: Duration,
        handler: Arc<dyn RequestHandler>,
    ) -> Result<Self, std::io::Error> {
        let socket = UdpSocket::bind(SocketAddr::from(([0, 0, 0, 0], port.unwrap_or(0))))?;

        let local_addr = match socket.local_addr()? {
            SocketAddr::V4(addr) => addr,
            SocketAddr::V6(_) => {
                return Err(std::io::Error::new(
                    std::io::ErrorKind::Unsupported,
                    "UdpTransport does not support Ipv6",
                ))
            }
        };

        socket.set_read_timeout(Some(READ_TIMEOUT))?;

        let inner = Arc::new(Inner {
            socket,
            local_addr,
            next_tid: AtomicU32::new(1),
            request_timeout,
            inflight_requests: Mutex::new(InflightRequests::new()),
            handler,
            shutdown: AtomicBool::new(false),
        });

        let handle = thread::Builder::new()
            .name("kadstore-udp".to_string())
            .spawn({
                let inner = inner.clone();
                move || inner.run()
            })?;

        debug!(?local_addr, "UdpTransport listening");

        Ok(Self {
            inner,
            handle: Mutex::new(Some(handle)),
        })
    }
}

impl Transport for UdpTransport {
    fn local_addr(&self) -> SocketAddrV4 {
        self.inner.local_addr
    }

    fn request(
        &self,
        to: SocketAddrV4,
        request: RequestSpecific,
        events: Sender<QueryEvent>,
    ) -> TransactionId {
        let transaction_id = self.inner.tid();

        self.inner
            .inflight_requests()
            .add(transaction_id, to, events.clone());

        let message = Message {
            transaction_id,
            message_type: MessageType::Request(request),
        };

        if let Err(error) = self.inner.send(to, &message) {
            debug!(?error, ?to, "Error sending request message");

            // Report it right away instead of waiting for the timeout.
            if self
                .inner
                .inflight_requests()
                .remove(transaction_id, &to)
                .is_some()
            {
                let _ = events.send(QueryEvent::Timeout { transaction_id });
            }
        }

        transaction_id
    }

    fn send(&self, to: SocketAddrV4, request: RequestSpecific) {
        let message = Message {
            transaction_id: self.inner.tid(),
            message_type: MessageType::Request(request),
        };

        if let Err(error) = self.inner.send(to, &message) {
            debug!(?error, ?to, "Error sending request message");
        }
    }

    fn shutdown(&self) {
        self.inner.shutdown.store(true, Ordering::Relaxed);

        let handle = self
            .handle
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();

        if let Some(handle) = handle {
            let _ = handle.join();
        }
    }
}

impl Drop for UdpTransport {
    fn drop(&mut self) {
        self.shutdown()
    }
}

impl Inner {
    fn tid(&self) -> TransactionId {
        self.next_tid.fetch_add(1, Ordering::Relaxed)
    }

    fn inflight_requests(&self) -> std::sync::MutexGuard<'_, InflightRequests> {
        self.inflight_requests
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn send(&self, to: SocketAddrV4, message: &Message) -> Result<(), std::io::Error> {
        trace!(context = "socket_message_sending", ?message, ?to);

        let bytes = message
            .to_bytes()
            .map_err(|error| std::io::Error::new(std::io::ErrorKind::InvalidData, error))?;

        self.socket.send_to(&bytes, to)?;

        Ok(())
    }

    fn run(&self) {
        let mut buf = vec![0_u8; MAX_DATAGRAM_SIZE];

        while !self.shutdown.load(Ordering::Relaxed) {
            self.expire_requests();

            match self.socket.recv_from(&mut buf) {
                Ok((amt, SocketAddr::V4(from))) => {
                    if from.port() == 0 {
                        trace!(context = "socket_validation", "Message from port 0");
                        continue;
                    }

                    self.handle_datagram(&buf[..amt], from);
                }
                Ok((_, SocketAddr::V6(from))) => {
                    trace!(?from, "Ignoring Ipv6 message");
                }
                Err(error)
                    if matches!(
                        error.kind(),
                        std::io::ErrorKind::WouldBlock | std::io::ErrorKind::TimedOut
                    ) => {}
                Err(error) => {
                    debug!(?error, "Error receiving from socket");
                }
            }
        }

        debug!(local_addr = ?self.local_addr, "UdpTransport shutdown");
    }

    fn handle_datagram(&self, bytes: &[u8], from: SocketAddrV4) {
        let message = match Message::from_bytes(bytes) {
            Ok(message) => message,
            Err(error) => {
                trace!(
                    context = "socket_error",
                    ?error,
                    ?from,
                    message = ?String::from_utf8_lossy(bytes),
                    "Received invalid Bencode message."
                );
                return;
            }
        };

        trace!(context = "socket_message_receiving", ?message, ?from);

        match message.message_type {
            MessageType::Request(request) => {
                if let Some(response) = self.handler.handle_request(from, request) {
                    self.respond(from, message.transaction_id, response);
                }
            }
            MessageType::Response(response) => {
                let transaction_id = message.transaction_id;

                // Release the lock before sending on the channel.
                let inflight = self.inflight_requests().remove(transaction_id, &from);

                match inflight {
                    Some(request) => {
                        let _ = request.events.send(QueryEvent::Reply {
                            transaction_id,
                            from: Node::new(response.responder_id, from),
                            response,
                        });
                    }
                    None => {
                        trace!(
                            context = "socket_validation",
                            ?transaction_id,
                            ?from,
                            "Unexpected response"
                        );
                    }
                }
            }
        }
    }

    fn respond(&self, to: SocketAddrV4, transaction_id: TransactionId, response: ResponseSpecific) {
        let message = Message {
            transaction_id,
            message_type: MessageType::Response(response),
        };

        if let Err(error) = self.send(to, &message) {
            debug!(?error, ?to, "Error sending response message");
        }
    }

    fn expire_requests(&self) {
        let expired = self.inflight_requests().expire(self.request_timeout);

        for request in expired {
            trace!(transaction_id = request.transaction_id, to = ?request.to, "Request timed out");

            let _ = request.events.send(QueryEvent::Timeout {
                transaction_id: request.transaction_id,
            });
        }
    }
}
