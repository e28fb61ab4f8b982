use std::collections::HashMap;
use std::net::SocketAddrV4;
use std::time::{Duration, Instant};

use flume::Sender;

use crate::rpc::{QueryEvent, TransactionId};

#[derive(Debug, Clone)]
pub struct InflightRequest {
    pub transaction_id: TransactionId,
    pub to: SocketAddrV4,
    pub sent_at: Instant,
    pub events: Sender<QueryEvent>,
}

impl InflightRequest {
    pub fn does_match(&self, socket: &SocketAddrV4, tid: TransactionId) -> bool {
        if self.transaction_id != tid {
            return false;
        }

        if self.to.port() != socket.port() {
            return false;
        }

        if self.to.ip().is_unspecified() {
            return true;
        }

        self.to.ip() == socket.ip()
    }
}

#[derive(Debug, Default)]
pub struct InflightRequests {
    // Slots in insertion order, `None` marks a request that was already answered,
    // until the next cleanup compacts them away.
    requests: Vec<Option<InflightRequest>>,
    // Index into `requests` by transaction_id.
    index: HashMap<TransactionId, usize>,
}

impl InflightRequests {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a new inflight request O(1)
    pub fn add(&mut self, transaction_id: TransactionId, to: SocketAddrV4, events: Sender<QueryEvent>) {
        let pos = self.requests.len();
        self.requests.push(Some(InflightRequest {
            transaction_id,
            to,
            sent_at: Instant::now(),
            events,
        }));
        self.index.insert(transaction_id, pos);
    }

    /// Check if a transaction_id is still inflight O(1)
    pub fn contains(&self, transaction_id: TransactionId) -> bool {
        self.index.contains_key(&transaction_id)
    }

    pub fn len(&self) -> usize {
        self.index.len()
    }

    /// Remove inflight request by transaction_id if it exists and matches the address
    /// O(1) average case
    pub fn remove(
        &mut self,
        transaction_id: TransactionId,
        from: &SocketAddrV4,
    ) -> Option<InflightRequest> {
        let &pos = self.index.get(&transaction_id)?;

        let slot = self.requests.get_mut(pos)?;

        if !slot
            .as_ref()
            .is_some_and(|request| request.does_match(from, transaction_id))
        {
            return None;
        }

        self.index.remove(&transaction_id);

        slot.take()
    }

    /// Remove and return requests older than `timeout`, compacting answered slots.
    /// O(n)
    pub fn expire(&mut self, timeout: Duration) -> Vec<InflightRequest> {
        let now = Instant::now();

        let mut expired = Vec::new();
        let mut remaining = Vec::with_capacity(self.index.len());
        self.index.clear();

        for request in self.requests.drain(..).flatten() {
            if now.duration_since(request.sent_at) >= timeout {
                expired.push(request);
            } else {
                self.index.insert(request.transaction_id, remaining.len());
                remaining.push(Some(request));
            }
        }

        self.requests = remaining;

        expired
    }
}
