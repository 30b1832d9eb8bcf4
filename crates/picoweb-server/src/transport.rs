//! The transport adapter seam.
//!
//! An adapter owns the network stack. It implements [`Transport`] for the
//! outbound primitives and reports events by calling the matching
//! [`Server`](crate::Server) callback:
//!
//! | Event | Callback |
//! |-------|----------|
//! | connection accepted | `on_accept(conn)` |
//! | bytes received | `on_receive(conn, bytes)` |
//! | peer closed its side | `on_remote_close(conn)` |
//! | bytes acknowledged | `on_sent(conn, count)` |
//! | idle-poll tick | `on_poll(conn)` or `poll()` |
//! | connection failed | `on_error(conn)` |
//!
//! Callbacks for one connection must be delivered in order and never
//! concurrently. Writes are non-blocking: the adapter accepts what fits in
//! its send window and the engine retries the remainder later.

use std::fmt::Debug;
use std::hash::Hash;

use crate::error::TransportError;
use crate::lock::TransportLock;

pub trait Transport {
    /// The adapter's own identity for a connection.
    type ConnId: Copy + Eq + Hash + Debug;

    /// Start accepting connections on `port`.
    fn listen(&mut self, port: u16) -> Result<(), TransportError>;

    /// Stop accepting new connections. Existing ones are unaffected.
    fn stop_listening(&mut self);

    /// Bytes the send window can take right now.
    fn send_capacity(&self, conn: Self::ConnId) -> usize;

    /// Queue bytes for sending. Returns how many were accepted, which may
    /// be fewer than offered.
    fn write(&mut self, conn: Self::ConnId, data: &[u8]) -> Result<usize, TransportError>;

    /// Close the connection. No further callbacks arrive for it.
    fn close(&mut self, conn: Self::ConnId) -> Result<(), TransportError>;

    /// The lock serializing foreground access to the driver.
    fn lock(&self) -> &TransportLock;
}
