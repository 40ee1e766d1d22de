//! Connection state machine for managing TCP connections.
//!
//! The state is three intent flags rather than an enum:
//!
//! - `want_read`: waiting for request bytes (initial state)
//! - `want_write`: responses are queued and the socket must drain them
//! - `want_close`: terminate once the current I/O settles
//!
//! `want_write` and `want_close` can be set together for a moment: a protocol
//! violation after some pipelined requests still gets the earlier responses
//! flushed on a best-effort basis before the reactor drops the connection.
//!
//! Readiness from mio is edge-triggered, so each handler keeps performing
//! its single-syscall step until the kernel reports would-block or the
//! connection changes intent. Stopping after one read could leave bytes in
//! the socket with no further event to wake us up.

use crate::command::dispatch;
use crate::protocol::{decode_request, encode_response, FrameLimits, ProtocolError};
use crate::runtime::buffer::ByteBuffer;
use crate::storage::Store;
use std::io::{self, Read, Write};
use std::net::SocketAddr;
use thiserror::Error;
use tracing::trace;

/// Why a connection is being closed.
#[derive(Debug, Error)]
pub enum CloseReason {
    /// Peer closed with no partial request buffered.
    #[error("client closed")]
    ClientClosed,

    /// Peer closed in the middle of a request.
    #[error("unexpected EOF with {0} unparsed bytes")]
    UnexpectedEof(usize),

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("protocol violation: {0}")]
    Protocol(#[from] ProtocolError),

    /// The poller flagged an error condition on the socket.
    #[error("socket error reported by poll")]
    PollError,
}

/// A single client connection.
///
/// Owns the socket: dropping the connection closes it, whatever path led
/// to the close.
#[derive(Debug)]
pub struct Connection<S> {
    stream: S,
    peer: SocketAddr,
    want_read: bool,
    want_write: bool,
    want_close: bool,
    /// Bytes received but not yet parsed into a request.
    inbound: ByteBuffer,
    /// Encoded responses not yet flushed.
    outbound: ByteBuffer,
    close_reason: Option<CloseReason>,
}

impl<S: Read + Write> Connection<S> {
    /// Create a new connection in the initial reading state.
    pub fn new(stream: S, peer: SocketAddr) -> Self {
        Self {
            stream,
            peer,
            want_read: true,
            want_write: false,
            want_close: false,
            inbound: ByteBuffer::new(),
            outbound: ByteBuffer::new(),
            close_reason: None,
        }
    }

    pub fn want_read(&self) -> bool {
        self.want_read
    }

    pub fn want_write(&self) -> bool {
        self.want_write
    }

    pub fn want_close(&self) -> bool {
        self.want_close
    }

    pub fn peer(&self) -> SocketAddr {
        self.peer
    }

    pub fn stream(&self) -> &S {
        &self.stream
    }

    pub fn stream_mut(&mut self) -> &mut S {
        &mut self.stream
    }

    /// Bytes buffered towards the next request.
    pub fn pending_input(&self) -> usize {
        self.inbound.len()
    }

    /// Encoded response bytes still waiting for the socket.
    pub fn pending_output(&self) -> usize {
        self.outbound.len()
    }

    pub fn close_reason(&self) -> Option<&CloseReason> {
        self.close_reason.as_ref()
    }

    /// Mark the connection for closing. The first reason wins.
    pub fn mark_closing(&mut self, reason: CloseReason) {
        self.want_close = true;
        if self.close_reason.is_none() {
            self.close_reason = Some(reason);
        }
    }

    /// Socket is readable: pull bytes in, answer every complete request,
    /// then try to flush the answers straight away.
    ///
    /// `scratch` is the per-read landing area shared by all connections.
    pub fn handle_readable(&mut self, store: &mut Store, limits: &FrameLimits, scratch: &mut [u8]) {
        debug_assert!(!scratch.is_empty(), "read scratch buffer must not be empty");

        while self.want_read && !self.want_close {
            let n = match self.stream.read(scratch) {
                Ok(0) => {
                    let reason = if self.inbound.is_empty() {
                        CloseReason::ClientClosed
                    } else {
                        CloseReason::UnexpectedEof(self.inbound.len())
                    };
                    self.mark_closing(reason);
                    return;
                }
                Ok(n) => n,
                Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => return,
                Err(ref e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => {
                    self.mark_closing(e.into());
                    return;
                }
            };

            self.inbound.append(&scratch[..n]);
            trace!(peer = %self.peer, bytes = n, buffered = self.inbound.len(), "Read data");

            self.process_requests(store, limits);

            if !self.outbound.is_empty() {
                self.want_read = false;
                self.want_write = true;
                // Request/response: the socket is almost always writable now.
                self.handle_writable();
            }
        }
    }

    /// Socket is writable: flush as much of `outbound` as the kernel takes.
    pub fn handle_writable(&mut self) {
        while !self.outbound.is_empty() {
            match self.stream.write(self.outbound.as_slice()) {
                Ok(0) => {
                    self.mark_closing(io::Error::from(io::ErrorKind::WriteZero).into());
                    return;
                }
                Ok(n) => {
                    self.outbound.consume(n);
                    trace!(peer = %self.peer, bytes = n, remaining = self.outbound.len(), "Wrote data");
                }
                Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => return,
                Err(ref e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => {
                    self.mark_closing(e.into());
                    return;
                }
            }
        }

        self.want_read = true;
        self.want_write = false;
    }

    /// Decode, dispatch and encode every complete frame in `inbound`, in
    /// arrival order.
    fn process_requests(&mut self, store: &mut Store, limits: &FrameLimits) {
        loop {
            match decode_request(self.inbound.as_slice(), limits) {
                Ok(Some((request, consumed))) => {
                    let response = dispatch(request, store);
                    encode_response(&response, self.outbound.buf_mut());
                    self.inbound.consume(consumed);
                }
                Ok(None) => break,
                Err(e) => {
                    self.mark_closing(e.into());
                    break;
                }
            }
        }
    }
}
