//! Iterative lookups toward a target, bounded by `alpha` inflight requests.

use std::collections::{BTreeMap, HashMap};
use std::time::Instant;

use flume::{Receiver, Sender};
use tracing::{debug, trace};

use crate::common::{
    messages::{FindNodeRequestArguments, RequestSpecific, RequestTypeSpecific, ResponseTypeSpecific},
    FreshGetParameter, GetParameter, Id, Node, StorageEntry,
};
use crate::error::LookupError;
use crate::rpc::{QueryEvent, TransactionId};

use super::Context;

#[derive(Debug, Clone)]
/// What a lookup asks for, and which replies end it early.
pub(crate) enum LookupStrategy {
    /// Find the closest nodes to a target.
    Plain,
    /// Stop at the first reply with content matching the filter.
    Content(GetParameter),
    /// Stop at the first reply with content strictly newer than the requester's,
    /// or the first reply saying the requester is already up to date.
    Fresh(FreshGetParameter),
}

impl LookupStrategy {
    fn request_type(&self, target: Id) -> RequestTypeSpecific {
        match self {
            LookupStrategy::Plain => RequestTypeSpecific::FindNode(FindNodeRequestArguments { target }),
            LookupStrategy::Content(parameter) => RequestTypeSpecific::FindValue(parameter.clone()),
            LookupStrategy::Fresh(parameter) => RequestTypeSpecific::FindValueFresh(parameter.clone()),
        }
    }

    fn accepts(&self, entry: &StorageEntry) -> bool {
        match self {
            LookupStrategy::Plain => false,
            LookupStrategy::Content(parameter) => entry.metadata().satisfies(parameter),
            LookupStrategy::Fresh(parameter) => entry.metadata().is_newer_than(parameter),
        }
    }

    fn accepts_up_to_date(&self) -> bool {
        matches!(self, LookupStrategy::Fresh(_))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum CandidateState {
    Unasked,
    Awaiting,
    Asked,
    Failed,
}

#[derive(Debug, Clone)]
pub(crate) struct Candidate {
    pub node: Node,
    pub state: CandidateState,
    /// Candidate expansions from the requester to this node.
    pub hops: usize,
}

#[derive(Debug, Clone, PartialEq)]
/// Outcome of a content lookup.
pub enum ContentLookupOutcome {
    /// A node replied with matching content.
    Found {
        entry: StorageEntry,
        /// The node that replied with the content.
        from: Node,
        /// Candidate expansions from this node to `from`.
        hops: usize,
    },
    /// A node holds the content, but not a version newer than ours.
    UpToDate { hops: usize },
    /// The lookup converged without finding the content.
    NotFound,
}

#[derive(Debug)]
pub(crate) struct LookupResult {
    /// The k closest nodes that answered, this node included.
    pub closest: Vec<Node>,
    pub outcome: ContentLookupOutcome,
}

/// A single iterative lookup, owned by the thread running it.
///
/// Every candidate moves from Unasked to Awaiting, then to either Asked or Failed.
/// Failed candidates are never asked again by this lookup.
#[derive(Debug)]
pub(crate) struct Lookup<'a> {
    context: &'a Context,
    target: Id,
    strategy: LookupStrategy,
    /// Candidates by their distance to the target.
    candidates: BTreeMap<Id, Candidate>,
    /// Inflight transaction id => distance of the candidate asked.
    inflight: HashMap<TransactionId, Id>,
    outcome: Option<ContentLookupOutcome>,
    sender: Sender<QueryEvent>,
    receiver: Receiver<QueryEvent>,
}

impl<'a> Lookup<'a> {
    pub fn new(context: &'a Context, target: Id, strategy: LookupStrategy) -> Self {
        trace!(?target, ?strategy, "New lookup");

        let (sender, receiver) = flume::unbounded();

        let mut lookup = Self {
            context,
            target,
            strategy,
            candidates: BTreeMap::new(),
            inflight: HashMap::new(),
            outcome: None,
            sender,
            receiver,
        };

        lookup.seed();

        lookup
    }

    // === Getters ===

    pub fn candidates(&self) -> impl Iterator<Item = &Candidate> {
        self.candidates.values()
    }

    pub fn candidate(&self, id: &Id) -> Option<&Candidate> {
        self.candidates.get(&id.xor(&self.target))
    }

    pub fn inflight(&self) -> usize {
        self.inflight.len()
    }

    // === Public Methods ===

    /// Run the lookup until it converges, a terminal reply arrives, or the
    /// operation timeout elapses.
    pub fn run(mut self) -> Result<LookupResult, LookupError> {
        let deadline = Instant::now() + self.context.operation_timeout;

        while self.outcome.is_none() {
            self.query_closest();

            if self.inflight.is_empty() {
                break;
            }

            match self.receiver.recv_deadline(deadline) {
                Ok(event) => self.handle_event(event),
                Err(_) => {
                    debug!(
                        target = ?self.target,
                        inflight = self.inflight.len(),
                        "Lookup timed out"
                    );

                    return Err(LookupError::RoutingFailure {
                        target: self.target,
                        timeout: self.context.operation_timeout,
                    });
                }
            }
        }

        let closest = self
            .candidates
            .values()
            .filter(|candidate| candidate.state == CandidateState::Asked)
            .take(self.context.k)
            .map(|candidate| candidate.node.clone())
            .collect::<Vec<_>>();

        debug!(
            target = ?self.target,
            candidates = self.candidates.len(),
            closest = closest.len(),
            outcome = ?self.outcome.as_ref().map(outcome_name),
            "Lookup done"
        );

        Ok(LookupResult {
            closest,
            outcome: self.outcome.unwrap_or(ContentLookupOutcome::NotFound),
        })
    }

    /// Ask the closest unasked candidates among the k closest non failed ones,
    /// keeping at most `alpha` requests inflight.
    pub fn query_closest(&mut self) {
        let context = self.context;

        let budget = context
            .alpha
            .max(1)
            .saturating_sub(self.inflight.len());

        if budget == 0 {
            return;
        }

        let to_ask = self
            .candidates
            .iter()
            .filter(|(_, candidate)| candidate.state != CandidateState::Failed)
            .take(context.k)
            .filter(|(_, candidate)| candidate.state == CandidateState::Unasked)
            .map(|(distance, _)| *distance)
            .take(budget)
            .collect::<Vec<_>>();

        for distance in to_ask {
            let Some(candidate) = self.candidates.get_mut(&distance) else {
                continue;
            };
            candidate.state = CandidateState::Awaiting;
            let address = candidate.node.address();

            let request = RequestSpecific {
                requester_id: context.id,
                request_type: self.strategy.request_type(self.target),
            };

            let transaction_id = context
                .transport
                .request(address, request, self.sender.clone());

            self.inflight.insert(transaction_id, distance);
        }
    }

    pub fn handle_event(&mut self, event: QueryEvent) {
        let context = self.context;

        let Some(distance) = self.inflight.remove(&event.transaction_id()) else {
            trace!(transaction_id = event.transaction_id(), "Unexpected lookup event");
            return;
        };

        match event {
            QueryEvent::Reply { from, response, .. } => {
                context.state.routing_table_mut().insert(from.clone());

                let hops = match self.candidates.get_mut(&distance) {
                    Some(candidate) => {
                        candidate.state = CandidateState::Asked;
                        candidate.hops
                    }
                    None => return,
                };

                match response.response_type {
                    ResponseTypeSpecific::Nodes(nodes) => {
                        let mut routing_table = context.state.routing_table_mut();

                        for node in nodes {
                            if node.id() == &context.id {
                                continue;
                            }

                            routing_table.insert(node.clone());
                            self.add_candidate(node, hops + 1);
                        }
                    }
                    ResponseTypeSpecific::Content(entry) => {
                        // Cached and k-node flags are the replying node's own.
                        let entry = entry.with_flags(false, false);

                        if self.strategy.accepts(&entry) {
                            trace!(target = ?self.target, ?from, hops, "Lookup found content");

                            self.outcome = Some(ContentLookupOutcome::Found { entry, from, hops });
                        }
                    }
                    ResponseTypeSpecific::UpToDate { .. } => {
                        if self.strategy.accepts_up_to_date() {
                            trace!(target = ?self.target, ?from, hops, "Lookup is up to date");

                            self.outcome = Some(ContentLookupOutcome::UpToDate { hops });
                        }
                    }
                    ResponseTypeSpecific::Ping => {}
                }
            }
            QueryEvent::Timeout { .. } => {
                if let Some(candidate) = self.candidates.get_mut(&distance) {
                    candidate.state = CandidateState::Failed;

                    trace!(node = ?candidate.node, "Lookup request timed out");

                    context.state.routing_table_mut().remove(candidate.node.id());
                }
            }
        }
    }

    // === Private Methods ===

    /// This node is the first Asked candidate, followed by every known contact,
    /// so unresponsive closest nodes can't stall the lookup.
    fn seed(&mut self) {
        let context = self.context;

        let local = context.local_node();
        self.candidates.insert(
            local.id().xor(&self.target),
            Candidate {
                node: local,
                state: CandidateState::Asked,
                hops: 0,
            },
        );

        let routing_table = context.state.routing_table();

        let mut seeds = routing_table.nodes().cloned().collect::<Vec<_>>();

        if let LookupStrategy::Fresh(parameter) = &self.strategy {
            if let Some(owner_id) = parameter.parameter().owner_id() {
                if let Some(connection) = routing_table.connection(owner_id) {
                    seeds.push(connection.clone());
                }
            }
        }

        drop(routing_table);

        for node in seeds {
            self.add_candidate(node, 1);
        }
    }

    fn add_candidate(&mut self, node: Node, hops: usize) {
        self.candidates
            .entry(node.id().xor(&self.target))
            .or_insert(Candidate {
                node,
                state: CandidateState::Unasked,
                hops,
            });
    }
}

fn outcome_name(outcome: &ContentLookupOutcome) -> &'static str {
    match outcome {
        ContentLookupOutcome::Found { .. } => "found",
        ContentLookupOutcome::UpToDate { .. } => "up_to_date",
        ContentLookupOutcome::NotFound => "not_found",
    }
}

impl Context {
    /// Find the k closest nodes to `target`, this node included.
    pub fn find_node(&self, target: Id) -> Result<Vec<Node>, LookupError> {
        Ok(Lookup::new(self, target, LookupStrategy::Plain).run()?.closest)
    }

    /// Find content matching `parameter` on the network.
    pub fn content_lookup(
        &self,
        parameter: GetParameter,
    ) -> Result<ContentLookupOutcome, LookupError> {
        let target = parameter.key;

        Ok(Lookup::new(self, target, LookupStrategy::Content(parameter))
            .run()?
            .outcome)
    }

    /// Find a version strictly newer than `parameter.last_updated` on the network.
    ///
    /// Content owned by this node's owner is always up to date, without any request.
    pub fn content_lookup_fresh(
        &self,
        parameter: FreshGetParameter,
    ) -> Result<ContentLookupOutcome, LookupError> {
        if parameter
            .parameter()
            .owner_id()
            .is_some_and(|owner_id| self.is_local_owner(owner_id))
        {
            trace!(key = ?parameter.parameter().key(), "Owner is always up to date");

            return Ok(ContentLookupOutcome::UpToDate { hops: 0 });
        }

        let target = parameter.parameter.key;

        Ok(Lookup::new(self, target, LookupStrategy::Fresh(parameter))
            .run()?
            .outcome)
    }
}
