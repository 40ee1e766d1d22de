//! mio event loop implementation.
//!
//! Readiness-based model: poll tells us when sockets are ready,
//! then the connection performs non-blocking read/write syscalls.
//! Uses epoll on Linux, kqueue on macOS.
//!
//! Everything runs on one thread. The store is owned by the reactor and
//! lent to each connection's handlers, so dispatch is serialized without
//! any locking.

use crate::config::Config;
use crate::protocol::FrameLimits;
use crate::runtime::connection::{CloseReason, Connection};
use crate::storage::Store;
use mio::event::Event;
use mio::net::{TcpListener, TcpStream};
use mio::{Events, Interest, Poll, Token};
use slab::Slab;
use std::io;
use std::net::SocketAddr;
use std::os::unix::io::AsRawFd;
use std::time::Duration;
use tracing::{debug, error, info, warn};

const LISTENER_TOKEN: Token = Token(usize::MAX);

/// A live connection plus the interest currently registered for it.
struct Client {
    conn: Connection<TcpStream>,
    interest: Interest,
}

/// Single-threaded reactor: owns the listener, every live connection and
/// the store.
pub struct Reactor {
    poll: Poll,
    events: Events,
    listener: TcpListener,
    connections: Slab<Client>,
    store: Store,
    limits: FrameLimits,
    max_connections: usize,
    /// Landing area for socket reads, shared by all connections.
    scratch: Vec<u8>,
    /// The last accept attempt stopped on an error with clients possibly
    /// still queued. Readiness is edge-triggered, so no new event will
    /// arrive for them; accepting is retried at the end of every turn.
    accept_backlogged: bool,
}

impl Reactor {
    /// Build a reactor around an already bound and listening socket.
    pub fn new(listener: std::net::TcpListener, store: Store, config: &Config) -> io::Result<Self> {
        listener.set_nonblocking(true)?;
        let mut listener = TcpListener::from_std(listener);

        let poll = Poll::new()?;
        poll.registry()
            .register(&mut listener, LISTENER_TOKEN, Interest::READABLE)?;

        Ok(Self {
            poll,
            events: Events::with_capacity(config.event_capacity),
            listener,
            connections: Slab::with_capacity(config.max_connections),
            store,
            limits: config.frame_limits(),
            max_connections: config.max_connections,
            scratch: vec![0u8; config.read_buffer_size],
            accept_backlogged: false,
        })
    }

    /// Address the listener is bound to.
    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    pub fn store(&self) -> &Store {
        &self.store
    }

    /// Number of live connections.
    pub fn connection_count(&self) -> usize {
        self.connections.len()
    }

    /// Serve until the poller itself fails.
    pub fn run(&mut self) -> io::Result<()> {
        info!(
            addr = %self.local_addr()?,
            max_connections = self.max_connections,
            max_message_size = self.limits.max_message_size,
            max_args = self.limits.max_args,
            "Event loop started"
        );

        loop {
            self.poll_once(None)?;
        }
    }

    /// Run a single iteration: wait for readiness (up to `timeout`), accept
    /// pending connections, and service every ready connection.
    ///
    /// An interrupted wait returns `Ok(())` with nothing handled.
    pub fn poll_once(&mut self, timeout: Option<Duration>) -> io::Result<()> {
        let Reactor {
            poll,
            events,
            listener,
            connections,
            store,
            limits,
            max_connections,
            scratch,
            accept_backlogged,
        } = self;

        match poll.poll(events, timeout) {
            Ok(()) => {}
            Err(ref e) if e.kind() == io::ErrorKind::Interrupted => return Ok(()),
            Err(e) => return Err(e),
        }

        for event in events.iter() {
            match event.token() {
                LISTENER_TOKEN => {
                    *accept_backlogged =
                        accept_connections(listener, poll, connections, *max_connections);
                }
                Token(conn_id) => {
                    handle_connection_event(
                        conn_id,
                        event,
                        poll,
                        connections,
                        store,
                        limits,
                        scratch,
                    );
                }
            }
        }

        // Closing connections this turn may have freed descriptors.
        if *accept_backlogged {
            *accept_backlogged =
                accept_connections(listener, poll, connections, *max_connections);
        }

        Ok(())
    }
}

/// Accept until the queue is empty. Returns `true` if accepting stopped on
/// an error that may have left clients in the queue.
fn accept_connections(
    listener: &TcpListener,
    poll: &Poll,
    connections: &mut Slab<Client>,
    max_connections: usize,
) -> bool {
    loop {
        match listener.accept() {
            Ok((mut stream, peer)) => {
                if connections.len() >= max_connections {
                    warn!(peer = %peer, max_connections, "Connection limit reached, rejecting");
                    continue;
                }

                let entry = connections.vacant_entry();
                let conn_id = entry.key();
                if let Err(e) =
                    poll.registry()
                        .register(&mut stream, Token(conn_id), Interest::READABLE)
                {
                    warn!(peer = %peer, error = %e, "Failed to register connection");
                    continue;
                }

                debug!(conn_id, fd = stream.as_raw_fd(), peer = %peer, "Accepted connection");

                entry.insert(Client {
                    conn: Connection::new(stream, peer),
                    interest: Interest::READABLE,
                });
            }
            Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => return false,
            Err(ref e) if e.kind() == io::ErrorKind::Interrupted => continue,
            // The queued client went away before we got to it.
            Err(ref e)
                if matches!(
                    e.kind(),
                    io::ErrorKind::ConnectionAborted | io::ErrorKind::ConnectionReset
                ) =>
            {
                debug!(error = %e, "Queued connection aborted");
                continue;
            }
            // e.g. EMFILE: retrying now would fail the same way.
            Err(e) => {
                error!(error = %e, "Accept error, will retry");
                return true;
            }
        }
    }
}

fn handle_connection_event(
    conn_id: usize,
    event: &Event,
    poll: &Poll,
    connections: &mut Slab<Client>,
    store: &mut Store,
    limits: &FrameLimits,
    scratch: &mut [u8],
) {
    let client = match connections.get_mut(conn_id) {
        Some(client) => client,
        None => return,
    };

    if event.is_readable() {
        client.conn.handle_readable(store, limits, scratch);
    }

    if event.is_writable() && !client.conn.want_close() {
        client.conn.handle_writable();
    }

    if event.is_error() {
        client.conn.mark_closing(CloseReason::PollError);
    }

    if !client.conn.want_close() {
        if let Some(interest) = interest_for(&client.conn) {
            if interest == client.interest {
                return;
            }
            match poll
                .registry()
                .reregister(client.conn.stream_mut(), Token(conn_id), interest)
            {
                Ok(()) => {
                    client.interest = interest;
                    return;
                }
                Err(e) => client.conn.mark_closing(e.into()),
            }
        }
    }

    close_connection(poll, connections, store, conn_id);
}

/// Readiness interest matching the connection's intent flags.
fn interest_for(conn: &Connection<TcpStream>) -> Option<Interest> {
    match (conn.want_read(), conn.want_write()) {
        (true, true) => Some(Interest::READABLE | Interest::WRITABLE),
        (true, false) => Some(Interest::READABLE),
        (false, true) => Some(Interest::WRITABLE),
        (false, false) => None,
    }
}

fn close_connection(poll: &Poll, connections: &mut Slab<Client>, store: &Store, conn_id: usize) {
    if let Some(mut client) = connections.try_remove(conn_id) {
        let _ = poll.registry().deregister(client.conn.stream_mut());
        let peer = client.conn.peer();

        match client.conn.close_reason() {
            None | Some(CloseReason::ClientClosed) => {
                debug!(conn_id, peer = %peer, "Client closed");
            }
            Some(reason)
                if matches!(
                    reason,
                    CloseReason::UnexpectedEof(_) | CloseReason::Protocol(_)
                ) =>
            {
                warn!(conn_id, peer = %peer, reason = %reason, "Connection closed");
            }
            Some(reason) => {
                debug!(conn_id, peer = %peer, reason = %reason, "Connection closed");
            }
        }

        let stats = store.stats();
        debug!(
            live_connections = connections.len(),
            items = stats.item_count,
            data_bytes = stats.data_bytes,
            "Server state after close"
        );
        // Dropping the client closes the socket.
    }
}

/// Create a non-blocking TCP listener with `SO_REUSEADDR`.
pub fn bind_listener(addr: SocketAddr, backlog: i32) -> io::Result<std::net::TcpListener> {
    let socket = socket2::Socket::new(
        match addr {
            SocketAddr::V4(_) => socket2::Domain::IPV4,
            SocketAddr::V6(_) => socket2::Domain::IPV6,
        },
        socket2::Type::STREAM,
        Some(socket2::Protocol::TCP),
    )?;

    socket.set_reuse_address(true)?;
    socket.set_nonblocking(true)?;
    socket.bind(&addr.into())?;
    socket.listen(backlog)?;

    Ok(socket.into())
}
