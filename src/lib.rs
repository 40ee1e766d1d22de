//! framekv: a single-threaded key-value server.
//!
//! Clients speak a length-prefixed binary protocol over TCP and issue
//! `get`, `set` and `del` commands against an in-memory map. One mio event
//! loop multiplexes every connection.
//!
//! - [`protocol`]: frame encoding and decoding
//! - [`command`]: request validation and execution
//! - [`storage`]: the key-value map
//! - [`runtime`]: buffers, the connection state machine and the reactor
//! - [`config`]: CLI and TOML configuration
//! - [`client`]: a blocking client

pub mod client;
pub mod command;
pub mod config;
pub mod protocol;
pub mod runtime;
pub mod storage;
