//! Per-connection state.

use bytes::BytesMut;
use picoweb_core::{OutboundQueue, ProtocolMode, SessionHandle};
use picoweb_protocol::OpCode;

/// A WebSocket message whose first frame had FIN clear.
#[derive(Debug)]
pub(crate) struct Fragment {
    pub opcode: OpCode,
    pub data: Vec<u8>,
}

/// Server-side state for one accepted connection.
///
/// Sessions are owned by the [`ConnectionRegistry`](crate::ConnectionRegistry)
/// and addressed by handle; nothing else keeps a reference to them.
#[derive(Debug)]
pub struct Session<C> {
    pub(crate) handle: SessionHandle,
    pub(crate) conn: C,
    /// Received bytes not yet parsed into a complete message.
    pub(crate) inbound: BytesMut,
    pub(crate) mode: ProtocolMode,
    pub(crate) outbound: OutboundQueue,
    /// Clock reading of the last receive or acknowledge.
    pub(crate) last_activity: u64,
    /// Close requested; the transport is closed once the queue drains.
    pub(crate) closing: bool,
    /// The transport connection is gone.
    pub(crate) closed: bool,
    /// Our CLOSE frame has been queued.
    pub(crate) ws_close_sent: bool,
    pub(crate) fragment: Option<Fragment>,
}

impl<C: Copy> Session<C> {
    pub(crate) fn new(handle: SessionHandle, conn: C, now: u64) -> Self {
        Self {
            handle,
            conn,
            inbound: BytesMut::new(),
            mode: ProtocolMode::Http,
            outbound: OutboundQueue::new(),
            last_activity: now,
            closing: false,
            closed: false,
            ws_close_sent: false,
            fragment: None,
        }
    }

    pub fn handle(&self) -> SessionHandle {
        self.handle
    }

    pub fn conn(&self) -> C {
        self.conn
    }

    pub fn mode(&self) -> ProtocolMode {
        self.mode
    }

    pub fn is_closing(&self) -> bool {
        self.closing
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    pub fn ws_close_sent(&self) -> bool {
        self.ws_close_sent
    }

    pub fn last_activity(&self) -> u64 {
        self.last_activity
    }

    pub fn outbound(&self) -> &OutboundQueue {
        &self.outbound
    }

    /// Bytes received but not yet consumed by a complete message.
    pub fn pending_inbound(&self) -> usize {
        self.inbound.len()
    }

    /// Whether application output may still be queued.
    pub fn accepts_output(&self) -> bool {
        !self.closing && !self.closed && !self.ws_close_sent
    }

    /// Record peer activity. Once a close has begun the close-wait interval
    /// runs from that moment, so activity no longer counts.
    pub(crate) fn touch(&mut self, now: u64) {
        if !self.ws_close_sent && !self.closing {
            self.last_activity = now;
        }
    }

    /// Record that the transport acknowledged output. A closing session that
    /// is still draining its queue keeps its close-wait interval fresh; after
    /// our WebSocket CLOSE nothing does.
    pub(crate) fn touch_sent(&mut self, now: u64) {
        if !self.ws_close_sent {
            self.last_activity = now;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_session_is_http() {
        let session = Session::new(SessionHandle::FIRST, 7u32, 42);
        assert_eq!(session.mode(), ProtocolMode::Http);
        assert_eq!(session.conn(), 7);
        assert_eq!(session.last_activity(), 42);
        assert!(session.accepts_output());
        assert_eq!(session.pending_inbound(), 0);
    }

    #[test]
    fn test_touch_frozen_after_close_sent() {
        let mut session = Session::new(SessionHandle::FIRST, 1u32, 0);
        session.touch(10);
        assert_eq!(session.last_activity(), 10);

        session.ws_close_sent = true;
        session.touch(20);
        session.touch_sent(20);
        assert_eq!(session.last_activity(), 10);
        assert!(!session.accepts_output());
    }

    #[test]
    fn test_only_acknowledgements_count_while_closing() {
        let mut session = Session::new(SessionHandle::FIRST, 1u32, 0);
        session.closing = true;
        session.touch(10);
        assert_eq!(session.last_activity(), 0);

        session.touch_sent(15);
        assert_eq!(session.last_activity(), 15);
    }
}
