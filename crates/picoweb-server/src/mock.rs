//! Scripted in-memory transport.
//!
//! Records everything written per connection and emulates a send window:
//! written bytes stay unacknowledged until the test releases them with
//! [`MockTransport::take_unacked`] and reports them through
//! [`Server::on_sent`](crate::Server::on_sent).

use std::collections::HashMap;

use crate::error::TransportError;
use crate::lock::TransportLock;
use crate::transport::Transport;

#[derive(Debug, Default)]
struct MockConn {
    written: Vec<u8>,
    unacked: usize,
    writes: usize,
    closes: usize,
}

#[derive(Debug)]
pub struct MockTransport {
    lock: TransportLock,
    window: usize,
    listening: Option<u16>,
    conns: HashMap<u32, MockConn>,
    fail_writes: usize,
}

impl Default for MockTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl MockTransport {
    /// A transport with an 8-segment send window.
    pub fn new() -> Self {
        Self::with_window(8 * 1460)
    }

    pub fn with_window(window: usize) -> Self {
        Self {
            lock: TransportLock::new(),
            window,
            listening: None,
            conns: HashMap::new(),
            fail_writes: 0,
        }
    }

    /// Everything written to `conn` so far.
    pub fn written(&self, conn: u32) -> &[u8] {
        self.conns.get(&conn).map(|c| c.written.as_slice()).unwrap_or_default()
    }

    /// Drain the record of written bytes.
    pub fn take_written(&mut self, conn: u32) -> Vec<u8> {
        self.conns
            .get_mut(&conn)
            .map(|c| std::mem::take(&mut c.written))
            .unwrap_or_default()
    }

    /// Bytes written but not yet acknowledged.
    pub fn unacked(&self, conn: u32) -> usize {
        self.conns.get(&conn).map_or(0, |c| c.unacked)
    }

    /// Acknowledge everything in flight and return the count, to be passed
    /// to `Server::on_sent`.
    pub fn take_unacked(&mut self, conn: u32) -> usize {
        self.conns
            .get_mut(&conn)
            .map_or(0, |c| std::mem::take(&mut c.unacked))
    }

    /// Reject the next `count` writes with `WouldBlock`.
    pub fn fail_next_writes(&mut self, count: usize) {
        self.fail_writes = count;
    }

    pub fn write_count(&self, conn: u32) -> usize {
        self.conns.get(&conn).map_or(0, |c| c.writes)
    }

    pub fn close_count(&self, conn: u32) -> usize {
        self.conns.get(&conn).map_or(0, |c| c.closes)
    }

    pub fn is_closed(&self, conn: u32) -> bool {
        self.close_count(conn) > 0
    }

    pub fn listening_port(&self) -> Option<u16> {
        self.listening
    }
}

impl Transport for MockTransport {
    type ConnId = u32;

    fn listen(&mut self, port: u16) -> Result<(), TransportError> {
        self.listening = Some(port);
        Ok(())
    }

    fn stop_listening(&mut self) {
        self.listening = None;
    }

    fn send_capacity(&self, conn: u32) -> usize {
        self.window.saturating_sub(self.unacked(conn))
    }

    fn write(&mut self, conn: u32, data: &[u8]) -> Result<usize, TransportError> {
        if self.fail_writes > 0 {
            self.fail_writes -= 1;
            return Err(TransportError::WouldBlock);
        }
        let capacity = self.send_capacity(conn);
        if capacity == 0 {
            return Err(TransportError::WouldBlock);
        }
        let accepted = data.len().min(capacity);
        let entry = self.conns.entry(conn).or_default();
        entry.written.extend_from_slice(&data[..accepted]);
        entry.unacked += accepted;
        entry.writes += 1;
        Ok(accepted)
    }

    fn close(&mut self, conn: u32) -> Result<(), TransportError> {
        self.conns.entry(conn).or_default().closes += 1;
        Ok(())
    }

    fn lock(&self) -> &TransportLock {
        &self.lock
    }
}
