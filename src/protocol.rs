//! Length-prefixed binary wire protocol.
//!
//! Every frame, in either direction, is a little-endian `u32` length
//! followed by that many payload bytes:
//!
//! ```text
//! Request:  <len:u32> <argc:u32> (<arg_len:u32> <arg bytes>){argc}
//! Response: <len:u32> <status:u32> <payload bytes>
//!
//! Example (set x 1):
//! Request:  15000000 03000000 03000000 "set" 01000000 "x" 01000000 "1"
//! Response: 04000000 00000000
//! ```
//!
//! Decoding distinguishes "need more data" (`Ok(None)`) from a protocol
//! violation (`Err`). The former is routine on a stream socket; the latter
//! means the peer is not speaking the protocol and the connection must go.

use bytes::{Buf, BufMut, Bytes};
use std::fmt;
use thiserror::Error;

/// Size of the outer length prefix.
pub const HEADER_LEN: usize = 4;

/// Size of the argument count at the start of a request payload.
const COUNT_LEN: usize = 4;

/// Size of each argument's length prefix.
const ARG_LEN_LEN: usize = 4;

/// Size of the status code at the start of a response payload.
const STATUS_LEN: usize = 4;

/// Default cap on a frame's declared payload length (32 MiB).
pub const DEFAULT_MAX_MESSAGE_SIZE: usize = 32 << 20;

/// Default cap on the number of arguments in one request.
pub const DEFAULT_MAX_ARGS: usize = 200_000;

/// Upper bound for the argument vector pre-allocation. A declared count of
/// 200k would otherwise reserve megabytes before a single argument parsed.
const PREALLOC_CAP: usize = 1024;

/// Bounds applied while decoding and encoding frames.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameLimits {
    /// Largest payload length a frame may declare.
    pub max_message_size: usize,
    /// Largest argument count a request may declare.
    pub max_args: usize,
}

impl Default for FrameLimits {
    fn default() -> Self {
        Self {
            max_message_size: DEFAULT_MAX_MESSAGE_SIZE,
            max_args: DEFAULT_MAX_ARGS,
        }
    }
}

/// Framing violations. Any of these is fatal to the connection.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    /// The frame declares a payload longer than the configured cap.
    #[error("frame too large: {len} bytes exceeds limit of {max}")]
    FrameTooLarge { len: usize, max: usize },

    /// The request declares more arguments than the configured cap.
    #[error("too many arguments: {count} exceeds limit of {max}")]
    TooManyArgs { count: usize, max: usize },

    /// A length field or argument runs past the end of the payload.
    #[error("truncated request payload")]
    Truncated,

    /// Bytes remain in the payload after the last declared argument.
    #[error("{0} trailing bytes after last argument")]
    TrailingBytes(usize),

    /// The response carries a status code outside the known set.
    #[error("unknown response status: {0}")]
    UnknownStatus(u32),

    /// The response payload is too short to hold a status code.
    #[error("response payload shorter than status field")]
    ResponseTooShort,
}

/// Response status code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    Ok,
    Error,
    NotFound,
}

impl Status {
    /// Wire representation.
    pub fn code(self) -> u32 {
        match self {
            Status::Ok => 0,
            Status::Error => 1,
            Status::NotFound => 2,
        }
    }

    /// Parse a wire status code.
    pub fn from_code(code: u32) -> Option<Self> {
        match code {
            0 => Some(Status::Ok),
            1 => Some(Status::Error),
            2 => Some(Status::NotFound),
            _ => None,
        }
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Status::Ok => write!(f, "OK"),
            Status::Error => write!(f, "ERROR"),
            Status::NotFound => write!(f, "NOT_FOUND"),
        }
    }
}

/// A decoded request: the ordered argument list.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Request {
    args: Vec<Bytes>,
}

impl Request {
    pub fn new(args: Vec<Bytes>) -> Self {
        Self { args }
    }

    pub fn args(&self) -> &[Bytes] {
        &self.args
    }

    pub fn into_args(self) -> Vec<Bytes> {
        self.args
    }
}

impl<A: Into<Bytes>> FromIterator<A> for Request {
    fn from_iter<I: IntoIterator<Item = A>>(iter: I) -> Self {
        Self::new(iter.into_iter().map(Into::into).collect())
    }
}

/// A response ready to be encoded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
    pub status: Status,
    pub payload: Bytes,
}

impl Response {
    /// OK response carrying a payload.
    pub fn ok(payload: Bytes) -> Self {
        Self {
            status: Status::Ok,
            payload,
        }
    }

    /// Response with the given status and no payload.
    pub fn empty(status: Status) -> Self {
        Self {
            status,
            payload: Bytes::new(),
        }
    }
}

/// Check the outer header and return the payload length once the whole
/// frame is buffered.
fn frame_len(buf: &[u8], limits: &FrameLimits) -> Result<Option<usize>, ProtocolError> {
    if buf.len() < HEADER_LEN {
        return Ok(None);
    }

    let len = u32::from_le_bytes([buf[0], buf[1], buf[2], buf[3]]) as usize;
    if len > limits.max_message_size {
        return Err(ProtocolError::FrameTooLarge {
            len,
            max: limits.max_message_size,
        });
    }

    if buf.len() < HEADER_LEN + len {
        return Ok(None);
    }

    Ok(Some(len))
}

/// Decode one request frame from the front of `buf`.
///
/// Returns `Ok(Some((request, consumed)))` when a complete frame is present,
/// `Ok(None)` if more bytes are needed, or `Err` on a framing violation.
/// An oversized length is rejected as soon as the header arrives, without
/// waiting for the body.
pub fn decode_request(
    buf: &[u8],
    limits: &FrameLimits,
) -> Result<Option<(Request, usize)>, ProtocolError> {
    let len = match frame_len(buf, limits)? {
        Some(len) => len,
        None => return Ok(None),
    };

    let payload = &buf[HEADER_LEN..HEADER_LEN + len];
    let request = parse_request(payload, limits.max_args)?;
    Ok(Some((request, HEADER_LEN + len)))
}

fn parse_request(mut payload: &[u8], max_args: usize) -> Result<Request, ProtocolError> {
    let count = read_u32(&mut payload)? as usize;
    if count > max_args {
        return Err(ProtocolError::TooManyArgs {
            count,
            max: max_args,
        });
    }

    let mut args = Vec::with_capacity(count.min(PREALLOC_CAP));
    for _ in 0..count {
        let len = read_u32(&mut payload)? as usize;
        if payload.len() < len {
            return Err(ProtocolError::Truncated);
        }
        args.push(Bytes::copy_from_slice(&payload[..len]));
        payload.advance(len);
    }

    if !payload.is_empty() {
        return Err(ProtocolError::TrailingBytes(payload.len()));
    }

    Ok(Request::new(args))
}

fn read_u32(cursor: &mut &[u8]) -> Result<u32, ProtocolError> {
    if cursor.len() < 4 {
        return Err(ProtocolError::Truncated);
    }
    Ok(cursor.get_u32_le())
}

/// Append an encoded response frame to `out`.
pub fn encode_response<B: BufMut>(response: &Response, out: &mut B) {
    let len = STATUS_LEN + response.payload.len();
    debug_assert!(len <= u32::MAX as usize, "response frame overflows u32");

    out.put_u32_le(len as u32);
    out.put_u32_le(response.status.code());
    out.put_slice(&response.payload);
}

/// Append an encoded request frame to `out`.
///
/// Fails without writing anything if the frame would break `limits`.
pub fn encode_request<A: AsRef<[u8]>, B: BufMut>(
    args: &[A],
    limits: &FrameLimits,
    out: &mut B,
) -> Result<(), ProtocolError> {
    if args.len() > limits.max_args {
        return Err(ProtocolError::TooManyArgs {
            count: args.len(),
            max: limits.max_args,
        });
    }

    let len = COUNT_LEN
        + args
            .iter()
            .map(|arg| ARG_LEN_LEN + arg.as_ref().len())
            .sum::<usize>();
    if len > limits.max_message_size {
        return Err(ProtocolError::FrameTooLarge {
            len,
            max: limits.max_message_size,
        });
    }

    out.put_u32_le(len as u32);
    out.put_u32_le(args.len() as u32);
    for arg in args {
        let arg = arg.as_ref();
        out.put_u32_le(arg.len() as u32);
        out.put_slice(arg);
    }
    Ok(())
}

/// Decode one response frame from the front of `buf`.
///
/// Same contract as [`decode_request`].
pub fn decode_response(
    buf: &[u8],
    limits: &FrameLimits,
) -> Result<Option<(Response, usize)>, ProtocolError> {
    let len = match frame_len(buf, limits)? {
        Some(len) => len,
        None => return Ok(None),
    };

    let mut payload = &buf[HEADER_LEN..HEADER_LEN + len];
    if payload.len() < STATUS_LEN {
        return Err(ProtocolError::ResponseTooShort);
    }

    let code = payload.get_u32_le();
    let status = Status::from_code(code).ok_or(ProtocolError::UnknownStatus(code))?;
    let response = Response {
        status,
        payload: Bytes::copy_from_slice(payload),
    };
    Ok(Some((response, HEADER_LEN + len)))
}
