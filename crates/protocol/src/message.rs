//! Frame envelope: sequence-numbered requests and their replies.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::fault::Fault;

/// Result of a completed call: reply values, or the fault that ended it.
pub type CallResult = Result<Vec<Value>, Fault>;

/// Wire frame envelope.
///
/// Within one connection, requests are delivered to the peer in send order
/// and a reply always echoes the sequence number of the request it answers.
/// Sequence numbers never correlate across connections.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Frame {
    /// Invoke `method` on the receiving side.
    #[serde(rename = "request")]
    Request {
        seqno: u64,
        method: String,
        args: Vec<Value>,
    },

    /// Answer to the request carrying the same `seqno`.
    #[serde(rename = "reply")]
    Reply {
        seqno: u64,
        ok: bool,
        #[serde(default)]
        values: Vec<Value>,
        #[serde(skip_serializing_if = "Option::is_none")]
        fault: Option<Fault>,
    },
}

impl Frame {
    /// Build a successful reply for `seqno`.
    pub fn reply_ok(seqno: u64, values: Vec<Value>) -> Self {
        Frame::Reply {
            seqno,
            ok: true,
            values,
            fault: None,
        }
    }

    /// Build a fault reply for `seqno`.
    pub fn reply_fault(seqno: u64, fault: Fault) -> Self {
        Frame::Reply {
            seqno,
            ok: false,
            values: Vec::new(),
            fault: Some(fault),
        }
    }

    /// The sequence number carried by this frame.
    pub fn seqno(&self) -> u64 {
        match self {
            Frame::Request { seqno, .. } | Frame::Reply { seqno, .. } => *seqno,
        }
    }
}
