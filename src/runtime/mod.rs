//! Networking runtime.
//!
//! - `ByteBuffer`: growable FIFO byte queue for inbound and outbound data
//! - `Connection`: per-client read/write/close state machine
//! - `Reactor`: mio event loop (epoll on Linux, kqueue on macOS)

mod buffer;
mod connection;
mod event_loop;

pub use buffer::ByteBuffer;
pub use connection::{CloseReason, Connection};
pub use event_loop::{bind_listener, Reactor};

use crate::config::Config;
use crate::storage::Store;

/// Bind the configured address and serve forever.
pub fn run(config: &Config) -> std::io::Result<()> {
    let listener = bind_listener(config.listen, config.backlog)?;
    let mut reactor = Reactor::new(listener, Store::new(), config)?;
    reactor.run()
}
