//! Datagram layout of the sync protocol and runtime events.
//!
//! Every datagram starts with a 12-byte little-endian header:
//!
//! ```text
//! 0        1         2     3         4         8         12
//! +--------+---------+-----+---------+---------+---------+---------
//! | 0x4E   | selector| sub | reserved| src_id  | dst_id  | payload
//! +--------+---------+-----+---------+---------+---------+---------
//! ```
//!
//! `Hello` carries its echo flag in `dst_id` and `Err` its error code.
//! `ConnRequest` carries two NUL-terminated labels; `Evt` carries a value blob.

use strand_core::{CodecError, Value};
use thiserror::Error;

use crate::conn::{DstId, SrcId};
use crate::error::ErrorCode;

/// First header byte of every strand datagram.
pub const SUBSYSTEM: u8 = 0x4E;

/// Header size in bytes.
pub const HEADER_LEN: usize = 12;

const SEL_SYNC: u8 = 1;
const SEL_EVENT: u8 = 2;

const SUB_HELLO: u8 = 1;
const SUB_CONN_REQUEST: u8 = 2;
const SUB_REQ_DONE: u8 = 3;
const SUB_DST_ID: u8 = 4;
const SUB_DONE: u8 = 5;
const SUB_ERR: u8 = 6;
const SUB_EVT: u8 = 1;

/// Failure to decode a datagram.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum WireError {
    /// Shorter than a header.
    #[error("datagram too short: {0} bytes")]
    Truncated(usize),
    /// First byte is not [`SUBSYSTEM`].
    #[error("not a strand datagram (subsystem 0x{0:02x})")]
    BadSubsystem(u8),
    /// Selector/sub pair names no message.
    #[error("unknown message {selector}/{sub}")]
    UnknownMessage {
        /// Header selector byte.
        selector: u8,
        /// Header sub byte.
        sub: u8,
    },
    /// A label is unterminated, contains NUL, or is not UTF-8.
    #[error("malformed label in connection request")]
    InvalidLabel,
    /// The event value blob is malformed.
    #[error(transparent)]
    Value(#[from] CodecError),
}

/// One decoded datagram, borrowing its payload.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Packet<'a> {
    /// Announces the sender; `echo` asks for a reply.
    Hello {
        /// Receiver should answer.
        echo: bool,
    },
    /// Asks the receiver to bind one of its variables.
    ConnRequest {
        /// Requester's connection id.
        src_id: SrcId,
        /// Target instance label.
        inst: &'a str,
        /// Target variable label.
        var: &'a str,
    },
    /// The sender has sent every request it has for the receiver.
    ReqDone,
    /// Answer to a `ConnRequest`.
    DstId {
        /// Requester's connection id.
        src_id: SrcId,
        /// Bound id on the sender.
        dst_id: DstId,
    },
    /// The sender resolved everything it needs.
    Done,
    /// The sender hit a fatal error.
    Err(ErrorCode),
    /// Runtime value for a bound connection.
    Evt {
        /// Target connection on the receiver.
        dst_id: DstId,
        /// Serialized value.
        blob: &'a [u8],
    },
}

impl<'a> Packet<'a> {
    /// Message name for logs.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Hello { .. } => "Hello",
            Self::ConnRequest { .. } => "ConnRequest",
            Self::ReqDone => "ReqDone",
            Self::DstId { .. } => "DstId",
            Self::Done => "Done",
            Self::Err(_) => "Err",
            Self::Evt { .. } => "Evt",
        }
    }

    /// Replaces the contents of `out` with this packet.
    pub fn encode(&self, out: &mut Vec<u8>) {
        out.clear();
        match *self {
            Self::Hello { echo } => header(out, SEL_SYNC, SUB_HELLO, 0, u32::from(echo)),
            Self::ConnRequest { src_id, inst, var } => {
                header(out, SEL_SYNC, SUB_CONN_REQUEST, src_id.0, 0);
                for label in [inst, var] {
                    out.extend_from_slice(label.as_bytes());
                    out.push(0);
                }
            }
            Self::ReqDone => header(out, SEL_SYNC, SUB_REQ_DONE, 0, 0),
            Self::DstId { src_id, dst_id } => {
                header(out, SEL_SYNC, SUB_DST_ID, src_id.0, dst_id.0);
            }
            Self::Done => header(out, SEL_SYNC, SUB_DONE, 0, 0),
            Self::Err(code) => header(out, SEL_SYNC, SUB_ERR, 0, code.to_u32()),
            Self::Evt { dst_id, blob } => {
                header(out, SEL_EVENT, SUB_EVT, 0, dst_id.0);
                out.extend_from_slice(blob);
            }
        }
    }

    /// Decodes a datagram.
    pub fn decode(bytes: &'a [u8]) -> Result<Self, WireError> {
        let Some((head, payload)) = bytes.split_first_chunk::<HEADER_LEN>() else {
            return Err(WireError::Truncated(bytes.len()));
        };
        if head[0] != SUBSYSTEM {
            return Err(WireError::BadSubsystem(head[0]));
        }
        let (selector, sub) = (head[1], head[2]);
        let src_id = u32::from_le_bytes([head[4], head[5], head[6], head[7]]);
        let dst_id = u32::from_le_bytes([head[8], head[9], head[10], head[11]]);
        let packet = match (selector, sub) {
            (SEL_SYNC, SUB_HELLO) => Self::Hello { echo: dst_id != 0 },
            (SEL_SYNC, SUB_CONN_REQUEST) => {
                let (inst, rest) = label(payload)?;
                let (var, _) = label(rest)?;
                Self::ConnRequest {
                    src_id: SrcId(src_id),
                    inst,
                    var,
                }
            }
            (SEL_SYNC, SUB_REQ_DONE) => Self::ReqDone,
            (SEL_SYNC, SUB_DST_ID) => Self::DstId {
                src_id: SrcId(src_id),
                dst_id: DstId(dst_id),
            },
            (SEL_SYNC, SUB_DONE) => Self::Done,
            (SEL_SYNC, SUB_ERR) => Self::Err(ErrorCode::from_u32(dst_id)),
            (SEL_EVENT, SUB_EVT) => Self::Evt {
                dst_id: DstId(dst_id),
                blob: payload,
            },
            _ => return Err(WireError::UnknownMessage { selector, sub }),
        };
        Ok(packet)
    }
}

/// Replaces the contents of `out` with an `Evt` carrying `value`.
///
/// Avoids the intermediate blob buffer [`Packet::Evt`] would need.
pub fn encode_evt(out: &mut Vec<u8>, dst_id: DstId, value: &Value) {
    out.clear();
    header(out, SEL_EVENT, SUB_EVT, 0, dst_id.0);
    value.encode_into(out);
}

/// Returns `true` when `label` can travel in a `ConnRequest`.
pub fn is_valid_label(label: &str) -> bool {
    !label.contains('\0')
}

fn header(out: &mut Vec<u8>, selector: u8, sub: u8, src_id: u32, dst_id: u32) {
    out.extend_from_slice(&[SUBSYSTEM, selector, sub, 0]);
    out.extend_from_slice(&src_id.to_le_bytes());
    out.extend_from_slice(&dst_id.to_le_bytes());
}

fn label(bytes: &[u8]) -> Result<(&str, &[u8]), WireError> {
    let end = bytes
        .iter()
        .position(|&b| b == 0)
        .ok_or(WireError::InvalidLabel)?;
    let text = std::str::from_utf8(&bytes[..end]).map_err(|_| WireError::InvalidLabel)?;
    Ok((text, &bytes[end + 1..]))
}
