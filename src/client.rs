//! Blocking client.
//!
//! Sends request frames and reads responses over a plain `TcpStream`.
//! Requests may be pipelined: call [`Client::send`] several times and then
//! [`Client::recv`] once per request; responses come back in order.

use crate::protocol::{
    decode_response, encode_request, FrameLimits, ProtocolError, Response, Status, HEADER_LEN,
};
use std::io::{self, Read, Write};
use std::net::{TcpStream, ToSocketAddrs};
use thiserror::Error;

/// Client-side failures.
#[derive(Debug, Error)]
pub enum ClientError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// The server announced a response longer than the configured cap.
    #[error("response too large: {len} bytes exceeds limit of {max}")]
    ResponseTooLarge { len: usize, max: usize },
}

pub struct Client {
    stream: TcpStream,
    limits: FrameLimits,
    frame: Vec<u8>,
}

impl Client {
    /// Connect with the default frame limits.
    pub fn connect<A: ToSocketAddrs>(addr: A) -> Result<Self, ClientError> {
        Self::with_limits(addr, FrameLimits::default())
    }

    pub fn with_limits<A: ToSocketAddrs>(addr: A, limits: FrameLimits) -> Result<Self, ClientError> {
        let stream = TcpStream::connect(addr)?;
        stream.set_nodelay(true)?;
        Ok(Self {
            stream,
            limits,
            frame: Vec::new(),
        })
    }

    /// The underlying socket, e.g. for setting timeouts.
    pub fn stream(&self) -> &TcpStream {
        &self.stream
    }

    /// Encode and write one request without waiting for the answer.
    pub fn send<A: AsRef<[u8]>>(&mut self, args: &[A]) -> Result<(), ClientError> {
        let mut out = Vec::new();
        encode_request(args, &self.limits, &mut out)?;
        self.stream.write_all(&out)?;
        Ok(())
    }

    /// Block until one complete response arrives.
    pub fn recv(&mut self) -> Result<Response, ClientError> {
        self.frame.clear();
        self.frame.resize(HEADER_LEN, 0);
        self.stream.read_exact(&mut self.frame)?;

        let len = u32::from_le_bytes([self.frame[0], self.frame[1], self.frame[2], self.frame[3]])
            as usize;
        if len > self.limits.max_message_size {
            return Err(ClientError::ResponseTooLarge {
                len,
                max: self.limits.max_message_size,
            });
        }

        self.frame.resize(HEADER_LEN + len, 0);
        self.stream.read_exact(&mut self.frame[HEADER_LEN..])?;

        match decode_response(&self.frame, &self.limits)? {
            Some((response, _)) => Ok(response),
            // The whole frame is buffered, so the decoder cannot ask for more.
            None => Err(ProtocolError::Truncated.into()),
        }
    }

    /// Send one request and wait for its response.
    pub fn query<A: AsRef<[u8]>>(&mut self, args: &[A]) -> Result<Response, ClientError> {
        self.send(args)?;
        self.recv()
    }

    pub fn get(&mut self, key: impl AsRef<[u8]>) -> Result<Response, ClientError> {
        self.query(&[&b"get"[..], key.as_ref()])
    }

    pub fn set(
        &mut self,
        key: impl AsRef<[u8]>,
        value: impl AsRef<[u8]>,
    ) -> Result<Response, ClientError> {
        self.query(&[&b"set"[..], key.as_ref(), value.as_ref()])
    }

    pub fn del(&mut self, key: impl AsRef<[u8]>) -> Result<Response, ClientError> {
        self.query(&[&b"del"[..], key.as_ref()])
    }
}

/// Render a response the way the command-line client prints it.
pub fn format_response(response: &Response) -> String {
    match response.status {
        Status::Ok if response.payload.is_empty() => "(ok)".to_string(),
        Status::Ok => format!("(ok) {}", String::from_utf8_lossy(&response.payload)),
        Status::NotFound => "(nil)".to_string(),
        Status::Error => "(error)".to_string(),
    }
}
