use serde::{Deserialize, Serialize};

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct KrpcMessage {
    #[serde(rename = "t", with = "serde_bytes")]
    pub transaction_id: [u8; 4],

    #[serde(flatten)]
    pub variant: KrpcMessageVariant,
}

impl KrpcMessage {
    pub fn from_bytes(bytes: &[u8]) -> Result<KrpcMessage, serde_bencode::Error> {
        let obj = serde_bencode::from_bytes(bytes)?;
        Ok(obj)
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>, serde_bencode::Error> {
        serde_bencode::to_bytes(self)
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(tag = "y")]
pub enum KrpcMessageVariant {
    #[serde(rename = "q")]
    Request(KrpcRequestSpecific),

    #[serde(rename = "r")]
    Response(KrpcResponseSpecific),
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(tag = "q")]
pub enum KrpcRequestSpecific {
    #[serde(rename = "ping")]
    Ping {
        #[serde(rename = "a")]
        arguments: KrpcPingArguments,
    },

    #[serde(rename = "find_node")]
    FindNode {
        #[serde(rename = "a")]
        arguments: KrpcFindNodeRequestArguments,
    },

    #[serde(rename = "find_value")]
    FindValue {
        #[serde(rename = "a")]
        arguments: KrpcFindValueRequestArguments,
    },

    #[serde(rename = "find_value_fresh")]
    FindValueFresh {
        #[serde(rename = "a")]
        arguments: KrpcFindValueRequestArguments,
    },

    #[serde(rename = "store")]
    Store {
        #[serde(rename = "a")]
        arguments: KrpcEntryArguments,
    },
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(untagged)] // This means order matters! Order these from most to least detailed
pub enum KrpcResponseSpecific {
    Content {
        #[serde(rename = "r")]
        arguments: KrpcEntryArguments,
    },

    Nodes {
        #[serde(rename = "r")]
        arguments: KrpcNodesResponseArguments,
    },

    UpToDate {
        #[serde(rename = "r")]
        arguments: KrpcUpToDateResponseArguments,
    },

    Ping {
        #[serde(rename = "r")]
        arguments: KrpcPingArguments,
    },
}

// === PING ===

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct KrpcPingArguments {
    #[serde(with = "serde_bytes")]
    pub id: [u8; 20],
}

// === FIND NODE ===

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct KrpcFindNodeRequestArguments {
    #[serde(with = "serde_bytes")]
    pub id: [u8; 20],

    #[serde(with = "serde_bytes")]
    pub target: [u8; 20],
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct KrpcNodesResponseArguments {
    #[serde(with = "serde_bytes")]
    pub id: [u8; 20],

    #[serde(with = "serde_bytes")]
    pub nodes: Box<[u8]>,
}

// === FIND VALUE ===

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct KrpcFindValueRequestArguments {
    #[serde(with = "serde_bytes")]
    pub id: [u8; 20],

    #[serde(with = "serde_bytes")]
    pub key: [u8; 20],

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub owner: Option<String>,

    #[serde(default, rename = "type", skip_serializing_if = "Option::is_none")]
    pub content_type: Option<String>,

    /// Only set on `find_value_fresh`.
    #[serde(default, rename = "ts", skip_serializing_if = "Option::is_none")]
    pub last_updated: Option<i64>,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct KrpcUpToDateResponseArguments {
    #[serde(with = "serde_bytes")]
    pub id: [u8; 20],

    /// The version the responder holds.
    #[serde(rename = "ts")]
    pub last_updated: i64,
}

// === STORE / CONTENT ===

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct KrpcEntryArguments {
    #[serde(with = "serde_bytes")]
    pub id: [u8; 20],

    #[serde(with = "serde_bytes")]
    pub key: [u8; 20],

    pub owner: String,

    #[serde(rename = "type")]
    pub content_type: String,

    #[serde(rename = "ts")]
    pub last_updated: i64,

    #[serde(with = "serde_bytes")]
    pub v: Box<[u8]>,
}
