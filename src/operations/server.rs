//! Answers requests from other nodes.

use std::net::SocketAddrV4;

use tracing::{debug, trace};

use crate::common::{
    messages::{RequestSpecific, RequestTypeSpecific, ResponseSpecific, ResponseTypeSpecific},
    FreshGetParameter, GetParameter, Id, Node,
};
use crate::rpc::RequestHandler;

use super::State;

#[derive(Debug)]
/// A server that handles incoming requests.
///
/// Every request inserts its sender into the routing table, then:
/// - `ping` is answered with a ping.
/// - `find_node` with the k closest known nodes.
/// - `find_value` with matching content, or the k closest nodes.
/// - `find_value_fresh` with strictly newer content, `up_to_date` if a matching
///   entry is not newer, or the k closest nodes.
/// - `store` is stored as a replica, without a response.
pub(crate) struct Server {
    id: Id,
    k: usize,
    state: State,
}

impl Server {
    pub fn new(id: Id, k: usize, state: State) -> Self {
        Self { id, k, state }
    }

    // === Private Methods ===

    fn closest_nodes(&self, target: &Id) -> ResponseTypeSpecific {
        ResponseTypeSpecific::Nodes(self.state.routing_table().closest(target, self.k))
    }

    fn find_value(&self, parameter: &GetParameter) -> ResponseTypeSpecific {
        match self.state.storage().get(parameter) {
            Ok(entry) => ResponseTypeSpecific::Content(entry),
            Err(_) => self.closest_nodes(&parameter.key),
        }
    }

    fn find_value_fresh(&self, parameter: &FreshGetParameter) -> ResponseTypeSpecific {
        let storage = self.state.storage();

        let Some(metadata) = storage.get_metadata(&parameter.parameter).cloned() else {
            return self.closest_nodes(&parameter.parameter.key);
        };

        if !metadata.is_newer_than(parameter) {
            return ResponseTypeSpecific::UpToDate {
                last_updated: metadata.last_updated(),
            };
        }

        match storage.get_exact(&metadata) {
            Ok(entry) => ResponseTypeSpecific::Content(entry),
            Err(error) => {
                debug!(?error, ?metadata, "Failed to read stored entry");
                self.closest_nodes(&parameter.parameter.key)
            }
        }
    }
}

impl RequestHandler for Server {
    fn handle_request(
        &self,
        from: SocketAddrV4,
        request: RequestSpecific,
    ) -> Option<ResponseSpecific> {
        let RequestSpecific {
            requester_id,
            request_type,
        } = request;

        trace!(?from, ?requester_id, ?request_type, "Handling request");

        self.state
            .routing_table_mut()
            .insert(Node::new(requester_id, from));

        let response_type = match request_type {
            RequestTypeSpecific::Ping => ResponseTypeSpecific::Ping,
            RequestTypeSpecific::FindNode(arguments) => self.closest_nodes(&arguments.target),
            RequestTypeSpecific::FindValue(parameter) => self.find_value(&parameter),
            RequestTypeSpecific::FindValueFresh(parameter) => self.find_value_fresh(&parameter),
            RequestTypeSpecific::Store(entry) => {
                let key = entry.metadata().key;

                match self
                    .state
                    .storage_mut()
                    .store(entry.with_flags(false, true))
                {
                    Ok(updated) => trace!(?key, ?from, updated, "Stored replica"),
                    Err(error) => debug!(?error, ?key, ?from, "Failed to store replica"),
                }

                return None;
            }
        };

        Some(ResponseSpecific {
            responder_id: self.id,
            response_type,
        })
    }
}
