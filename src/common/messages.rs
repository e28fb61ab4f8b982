//! Serialize and deserialize Krpc messages.

mod internal;

use std::convert::TryInto;
use std::net::{Ipv4Addr, SocketAddrV4};

use bytes::Bytes;

use crate::common::{
    FreshGetParameter, GetParameter, Id, Node, StorageEntry, StorageEntryMetadata, ID_SIZE,
};
use crate::error::DecodeError;

/// Size of a node in compact form: 20 bytes id, 4 bytes ipv4, 2 bytes port.
const COMPACT_NODE_SIZE: usize = ID_SIZE + 6;

#[derive(Debug, PartialEq, Clone)]
pub struct Message {
    pub transaction_id: u32,

    pub message_type: MessageType,
}

#[derive(Debug, PartialEq, Clone)]
pub enum MessageType {
    Request(RequestSpecific),

    Response(ResponseSpecific),
}

#[derive(Debug, PartialEq, Clone)]
pub struct RequestSpecific {
    pub requester_id: Id,
    pub request_type: RequestTypeSpecific,
}

#[derive(Debug, PartialEq, Clone)]
pub enum RequestTypeSpecific {
    Ping,
    FindNode(FindNodeRequestArguments),
    FindValue(GetParameter),
    FindValueFresh(FreshGetParameter),
    Store(StorageEntry),
}

#[derive(Debug, PartialEq, Clone)]
pub struct FindNodeRequestArguments {
    pub target: Id,
}

#[derive(Debug, PartialEq, Clone)]
pub struct ResponseSpecific {
    pub responder_id: Id,
    pub response_type: ResponseTypeSpecific,
}

#[derive(Debug, PartialEq, Clone)]
pub enum ResponseTypeSpecific {
    Ping,
    /// Closest nodes the responder knows to the requested target.
    Nodes(Vec<Node>),
    /// A stored entry matching the request.
    Content(StorageEntry),
    /// The responder holds a matching entry, that is not newer than the requester's.
    UpToDate { last_updated: u64 },
}

impl Message {
    fn into_serde_message(self) -> internal::KrpcMessage {
        internal::KrpcMessage {
            transaction_id: self.transaction_id.to_be_bytes(),
            variant: match self.message_type {
                MessageType::Request(RequestSpecific {
                    requester_id,
                    request_type,
                }) => internal::KrpcMessageVariant::Request(match request_type {
                    RequestTypeSpecific::Ping => internal::KrpcRequestSpecific::Ping {
                        arguments: internal::KrpcPingArguments {
                            id: requester_id.into(),
                        },
                    },
                    RequestTypeSpecific::FindNode(find_node_args) => {
                        internal::KrpcRequestSpecific::FindNode {
                            arguments: internal::KrpcFindNodeRequestArguments {
                                id: requester_id.into(),
                                target: find_node_args.target.into(),
                            },
                        }
                    }
                    RequestTypeSpecific::FindValue(parameter) => {
                        internal::KrpcRequestSpecific::FindValue {
                            arguments: find_value_arguments(requester_id, parameter, None),
                        }
                    }
                    RequestTypeSpecific::FindValueFresh(FreshGetParameter {
                        parameter,
                        last_updated,
                    }) => internal::KrpcRequestSpecific::FindValueFresh {
                        arguments: find_value_arguments(
                            requester_id,
                            parameter,
                            Some(timestamp_to_wire(last_updated)),
                        ),
                    },
                    RequestTypeSpecific::Store(entry) => internal::KrpcRequestSpecific::Store {
                        arguments: entry_arguments(requester_id, entry),
                    },
                }),
                MessageType::Response(ResponseSpecific {
                    responder_id,
                    response_type,
                }) => internal::KrpcMessageVariant::Response(match response_type {
                    ResponseTypeSpecific::Ping => internal::KrpcResponseSpecific::Ping {
                        arguments: internal::KrpcPingArguments {
                            id: responder_id.into(),
                        },
                    },
                    ResponseTypeSpecific::Nodes(nodes) => internal::KrpcResponseSpecific::Nodes {
                        arguments: internal::KrpcNodesResponseArguments {
                            id: responder_id.into(),
                            nodes: nodes4_to_bytes(&nodes).into(),
                        },
                    },
                    ResponseTypeSpecific::Content(entry) => {
                        internal::KrpcResponseSpecific::Content {
                            arguments: entry_arguments(responder_id, entry),
                        }
                    }
                    ResponseTypeSpecific::UpToDate { last_updated } => {
                        internal::KrpcResponseSpecific::UpToDate {
                            arguments: internal::KrpcUpToDateResponseArguments {
                                id: responder_id.into(),
                                last_updated: timestamp_to_wire(last_updated),
                            },
                        }
                    }
                }),
            },
        }
    }

    fn from_serde_message(msg: internal::KrpcMessage) -> Result<Message, DecodeError> {
        Ok(Message {
            transaction_id: u32::from_be_bytes(msg.transaction_id),
            message_type: match msg.variant {
                internal::KrpcMessageVariant::Request(req_variant) => {
                    MessageType::Request(match req_variant {
                        internal::KrpcRequestSpecific::Ping { arguments } => RequestSpecific {
                            requester_id: Id::from(arguments.id),
                            request_type: RequestTypeSpecific::Ping,
                        },
                        internal::KrpcRequestSpecific::FindNode { arguments } => RequestSpecific {
                            requester_id: Id::from(arguments.id),
                            request_type: RequestTypeSpecific::FindNode(FindNodeRequestArguments {
                                target: Id::from(arguments.target),
                            }),
                        },
                        internal::KrpcRequestSpecific::FindValue { arguments } => RequestSpecific {
                            requester_id: Id::from(arguments.id),
                            request_type: RequestTypeSpecific::FindValue(GetParameter {
                                key: Id::from(arguments.key),
                                content_type: arguments.content_type,
                                owner_id: arguments.owner,
                            }),
                        },
                        internal::KrpcRequestSpecific::FindValueFresh { arguments } => {
                            RequestSpecific {
                                requester_id: Id::from(arguments.id),
                                request_type: RequestTypeSpecific::FindValueFresh(
                                    FreshGetParameter {
                                        last_updated: timestamp_from_wire(
                                            arguments.last_updated.unwrap_or_default(),
                                        ),
                                        parameter: GetParameter {
                                            key: Id::from(arguments.key),
                                            content_type: arguments.content_type,
                                            owner_id: arguments.owner,
                                        },
                                    },
                                ),
                            }
                        }
                        internal::KrpcRequestSpecific::Store { arguments } => RequestSpecific {
                            requester_id: Id::from(arguments.id),
                            request_type: RequestTypeSpecific::Store(entry_from_arguments(
                                arguments,
                            )),
                        },
                    })
                }
                internal::KrpcMessageVariant::Response(res_variant) => {
                    MessageType::Response(match res_variant {
                        internal::KrpcResponseSpecific::Ping { arguments } => ResponseSpecific {
                            responder_id: Id::from(arguments.id),
                            response_type: ResponseTypeSpecific::Ping,
                        },
                        internal::KrpcResponseSpecific::Nodes { arguments } => ResponseSpecific {
                            responder_id: Id::from(arguments.id),
                            response_type: ResponseTypeSpecific::Nodes(bytes_to_nodes4(
                                &arguments.nodes,
                            )?),
                        },
                        internal::KrpcResponseSpecific::Content { arguments } => {
                            ResponseSpecific {
                                responder_id: Id::from(arguments.id),
                                response_type: ResponseTypeSpecific::Content(
                                    entry_from_arguments(arguments),
                                ),
                            }
                        }
                        internal::KrpcResponseSpecific::UpToDate { arguments } => {
                            ResponseSpecific {
                                responder_id: Id::from(arguments.id),
                                response_type: ResponseTypeSpecific::UpToDate {
                                    last_updated: timestamp_from_wire(arguments.last_updated),
                                },
                            }
                        }
                    })
                }
            },
        })
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>, serde_bencode::Error> {
        self.clone().into_serde_message().to_bytes()
    }

    pub fn from_bytes<T: AsRef<[u8]>>(bytes: T) -> Result<Message, DecodeError> {
        Message::from_serde_message(internal::KrpcMessage::from_bytes(bytes.as_ref())?)
    }

    /// Return the Id of the sender of the Message
    pub fn get_author_id(&self) -> Id {
        match &self.message_type {
            MessageType::Request(arguments) => arguments.requester_id,
            MessageType::Response(arguments) => arguments.responder_id,
        }
    }
}

fn find_value_arguments(
    requester_id: Id,
    parameter: GetParameter,
    last_updated: Option<i64>,
) -> internal::KrpcFindValueRequestArguments {
    internal::KrpcFindValueRequestArguments {
        id: requester_id.into(),
        key: parameter.key.into(),
        owner: parameter.owner_id,
        content_type: parameter.content_type,
        last_updated,
    }
}

fn entry_arguments(id: Id, entry: StorageEntry) -> internal::KrpcEntryArguments {
    let StorageEntry { metadata, payload } = entry;

    internal::KrpcEntryArguments {
        id: id.into(),
        key: metadata.key.into(),
        owner: metadata.owner_id,
        content_type: metadata.content_type,
        last_updated: timestamp_to_wire(metadata.last_updated),
        v: payload.to_vec().into(),
    }
}

/// Flags are local to each node, so they are never sent over the wire.
fn entry_from_arguments(arguments: internal::KrpcEntryArguments) -> StorageEntry {
    let payload = Bytes::from(arguments.v.into_vec());

    StorageEntry {
        metadata: StorageEntryMetadata::new(
            Id::from(arguments.key),
            arguments.owner,
            arguments.content_type,
            Id::hash(&payload),
            timestamp_from_wire(arguments.last_updated),
        ),
        payload,
    }
}

/// Bencode integers are signed, timestamps past [i64::MAX] saturate.
fn timestamp_to_wire(timestamp: u64) -> i64 {
    i64::try_from(timestamp).unwrap_or(i64::MAX)
}

fn timestamp_from_wire(timestamp: i64) -> u64 {
    u64::try_from(timestamp).unwrap_or_default()
}

fn nodes4_to_bytes(nodes: &[Node]) -> Vec<u8> {
    let mut vec = Vec::with_capacity(COMPACT_NODE_SIZE * nodes.len());

    for node in nodes {
        vec.extend_from_slice(node.id.as_bytes());
        vec.extend_from_slice(&node.address.ip().octets());
        vec.extend_from_slice(&node.address.port().to_be_bytes());
    }

    vec
}

fn bytes_to_nodes4<T: AsRef<[u8]>>(bytes: T) -> Result<Vec<Node>, DecodeError> {
    let bytes = bytes.as_ref();

    if bytes.len() % COMPACT_NODE_SIZE != 0 {
        return Err(DecodeError::InvalidNodes(bytes.len()));
    }

    let mut to_ret = Vec::with_capacity(bytes.len() / COMPACT_NODE_SIZE);

    for chunk in bytes.chunks_exact(COMPACT_NODE_SIZE) {
        let id = Id::from_bytes(&chunk[..ID_SIZE])?;

        let ip = Ipv4Addr::new(
            chunk[ID_SIZE],
            chunk[ID_SIZE + 1],
            chunk[ID_SIZE + 2],
            chunk[ID_SIZE + 3],
        );
        let port_bytes: [u8; 2] = chunk[ID_SIZE + 4..]
            .try_into()
            .map_err(|_| DecodeError::InvalidNodes(bytes.len()))?;

        to_ret.push(Node::new(
            id,
            SocketAddrV4::new(ip, u16::from_be_bytes(port_bytes)),
        ));
    }

    Ok(to_ret)
}
