//! Wire encoding for network transport.
//!
//! # Wire Format
//!
//! ```text
//! [version: u8][tag: 8 ASCII bytes][payload: SBOR-encoded body]
//! ```
//!
//! Consensus messages reuse their protocol tags (`PREPREPA`,
//! `PREPAREM`, `COMMITMS`, `VIEWCHAN`); the remaining frames carry
//! transport-level tags. The tag decides how the payload is decoded -
//! there is no type field inside the payload itself.

use palisade_types::{CertifiedBlock, ConsensusMessage, MessageKind, NodeStatus, SeqNumber};
use thiserror::Error;

/// Current wire format version.
pub const WIRE_VERSION: u8 = 1;

const TAG_BLOCK: [u8; 8] = *b"CERTBLCK";
const TAG_PING: [u8; 8] = *b"PINGREQU";
const TAG_PONG: [u8; 8] = *b"PONGRESP";
const TAG_STATUS_REQ: [u8; 8] = *b"STATUSEX";
const TAG_STATUS_REP: [u8; 8] = *b"STATUSRP";
const TAG_GET_RANGE: [u8; 8] = *b"GETRANGE";
const TAG_RANGE: [u8; 8] = *b"RANGEBLK";

/// Errors that can occur during frame encoding/decoding.
#[derive(Debug, Error)]
pub enum CodecError {
    #[error("unknown wire version: {0}")]
    UnknownVersion(u8),

    #[error("frame too short")]
    FrameTooShort,

    #[error("unknown frame tag: {0:?}")]
    UnknownTag([u8; 8]),

    #[error("frame tag does not match payload kind")]
    TagMismatch,

    #[error("SBOR decode error: {0}")]
    SborDecode(String),

    #[error("SBOR encode error: {0}")]
    SborEncode(String),
}

/// A ping request body.
#[derive(Debug, Clone, PartialEq, Eq, sbor::prelude::BasicSbor)]
pub struct PingBody {
    /// Caller-chosen nonce, echoed in the pong.
    pub nonce: u64,
}

/// A pong response body.
#[derive(Debug, Clone, PartialEq, Eq, sbor::prelude::BasicSbor)]
pub struct PongBody {
    /// The nonce from the ping.
    pub nonce: u64,
    /// Responder's node time in milliseconds.
    pub timestamp: u64,
}

/// A block-range request body.
#[derive(Debug, Clone, PartialEq, Eq, sbor::prelude::BasicSbor)]
pub struct BlockRangeRequest {
    /// First index requested.
    pub from: SeqNumber,
    /// Maximum number of blocks.
    pub count: u32,
}

/// Everything that can travel between two validators.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WireFrame {
    /// One consensus message (fire-and-forget multicast).
    Message(ConsensusMessage),
    /// One confirmed block with its proof (fire-and-forget broadcast).
    Block(Box<CertifiedBlock>),
    /// Ping request.
    Ping(PingBody),
    /// Pong response.
    Pong(PongBody),
    /// Status exchange request, carrying the requester's digest.
    StatusRequest(Box<NodeStatus>),
    /// Status exchange response, carrying the responder's digest.
    StatusReply(Box<NodeStatus>),
    /// Sync fetch request.
    GetBlockRange(BlockRangeRequest),
    /// Sync fetch response.
    BlockRange(Vec<CertifiedBlock>),
}

fn sbor_encode<T: sbor::prelude::BasicEncode>(value: &T) -> Result<Vec<u8>, CodecError> {
    sbor::basic_encode(value).map_err(|e| CodecError::SborEncode(format!("{e:?}")))
}

fn sbor_decode<T: sbor::prelude::BasicDecode>(payload: &[u8]) -> Result<T, CodecError> {
    sbor::basic_decode(payload).map_err(|e| CodecError::SborDecode(format!("{e:?}")))
}

/// Encode a frame to wire bytes.
pub fn encode_frame(frame: &WireFrame) -> Result<Vec<u8>, CodecError> {
    let (tag, payload) = match frame {
        WireFrame::Message(message) => (message.kind.wire_tag(), sbor_encode(message)?),
        WireFrame::Block(block) => (TAG_BLOCK, sbor_encode(block.as_ref())?),
        WireFrame::Ping(body) => (TAG_PING, sbor_encode(body)?),
        WireFrame::Pong(body) => (TAG_PONG, sbor_encode(body)?),
        WireFrame::StatusRequest(status) => (TAG_STATUS_REQ, sbor_encode(status.as_ref())?),
        WireFrame::StatusReply(status) => (TAG_STATUS_REP, sbor_encode(status.as_ref())?),
        WireFrame::GetBlockRange(request) => (TAG_GET_RANGE, sbor_encode(request)?),
        WireFrame::BlockRange(blocks) => (TAG_RANGE, sbor_encode(blocks)?),
    };

    let mut bytes = Vec::with_capacity(9 + payload.len());
    bytes.push(WIRE_VERSION);
    bytes.extend_from_slice(&tag);
    bytes.extend(payload);
    Ok(bytes)
}

/// Decode a frame from wire bytes.
pub fn decode_frame(data: &[u8]) -> Result<WireFrame, CodecError> {
    if data.len() < 9 {
        return Err(CodecError::FrameTooShort);
    }
    let version = data[0];
    if version != WIRE_VERSION {
        return Err(CodecError::UnknownVersion(version));
    }
    let tag: [u8; 8] = data[1..9].try_into().expect("length checked");
    let payload = &data[9..];

    if let Some(kind) = MessageKind::from_wire_tag(&tag) {
        let message: ConsensusMessage = sbor_decode(payload)?;
        if message.kind != kind {
            return Err(CodecError::TagMismatch);
        }
        return Ok(WireFrame::Message(message));
    }

    match tag {
        TAG_BLOCK => Ok(WireFrame::Block(Box::new(sbor_decode(payload)?))),
        TAG_PING => Ok(WireFrame::Ping(sbor_decode(payload)?)),
        TAG_PONG => Ok(WireFrame::Pong(sbor_decode(payload)?)),
        TAG_STATUS_REQ => Ok(WireFrame::StatusRequest(Box::new(sbor_decode(payload)?))),
        TAG_STATUS_REP => Ok(WireFrame::StatusReply(Box::new(sbor_decode(payload)?))),
        TAG_GET_RANGE => Ok(WireFrame::GetBlockRange(sbor_decode(payload)?)),
        TAG_RANGE => Ok(WireFrame::BlockRange(sbor_decode(payload)?)),
        _ => Err(CodecError::UnknownTag(tag)),
    }
}
