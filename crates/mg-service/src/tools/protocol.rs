//! Wire envelopes for the tool-provider subprocess protocol.
//!
//! Transport is line-delimited UTF-8 JSON over the child's stdin/stdout, one
//! envelope per line. Ids are parent-assigned and unique for the lifetime of
//! a client. A zero-length line is the graceful shutdown terminator.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Method name of the connection handshake.
pub const LIST_TOOLS_METHOD: &str = "listTools";

/// Parent → child call envelope.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RequestEnvelope {
    pub id: u64,
    pub method: String,
    pub params: Value,
}

impl RequestEnvelope {
    pub fn new(id: u64, method: &str, params: Value) -> Self {
        Self {
            id,
            method: method.to_string(),
            params,
        }
    }
}

/// Error object inside a reply envelope.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct WireError {
    pub code: i64,
    pub message: String,
}

/// Child → parent reply envelope. Exactly one of `result`/`error` is set in
/// well-formed traffic; a reply with neither is a decode error.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ResponseEnvelope {
    pub id: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<WireError>,
}

/// The advertised tool list in a handshake reply.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ToolListing {
    pub tools: Vec<ToolDescriptor>,
}

/// One advertised method.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ToolDescriptor {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}
