//! Session lifecycle: idle detection and close sequencing.
//!
//! - An idle HTTP session is closed outright.
//! - An idle WebSocket gets a CLOSE frame; if the peer has not answered
//!   within the close-wait interval the transport is closed.
//! - A close requested while output is queued is deferred until the queue
//!   drains, bounded by the same close-wait interval.
//!
//! Timestamps are clock milliseconds. The decision is a pure function so
//! it can be checked without a transport.

use picoweb_core::{BufferSource, ProtocolMode, ServerConfig, SessionHandle, SessionNotice};
use picoweb_protocol::frame::{close_code, close_payload, encode_frame, OpCode};
use std::time::Duration;
use tracing::{debug, warn};

use crate::server::Server;
use crate::session::Session;
use crate::transport::Transport;

/// What the poll tick should do with a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdleAction {
    None,
    /// Start the WebSocket close handshake.
    SendClose,
    /// Close the transport now.
    ForceClose,
}

fn exceeded(elapsed: u64, limit: Option<Duration>) -> bool {
    limit.is_some_and(|limit| elapsed > limit.as_millis() as u64)
}

/// Decide what an idle-poll tick at `now` should do with `session`.
pub fn idle_action<C>(session: &Session<C>, config: &ServerConfig, now: u64) -> IdleAction {
    let elapsed = now.saturating_sub(session.last_activity);

    if session.ws_close_sent || session.closing {
        return if exceeded(elapsed, config.ws_close_wait()) {
            IdleAction::ForceClose
        } else {
            IdleAction::None
        };
    }

    match session.mode {
        ProtocolMode::Http if exceeded(elapsed, config.http_idle_timeout()) => IdleAction::ForceClose,
        ProtocolMode::WebSocket if exceeded(elapsed, config.ws_idle_timeout()) => {
            IdleAction::SendClose
        }
        _ => IdleAction::None,
    }
}

impl<T: Transport> Server<T> {
    /// One poll tick: push pending output, apply idle policy, finish a
    /// deferred close.
    pub(crate) fn poll_session(&mut self, handle: SessionHandle) {
        self.write_pending(handle);

        let now = self.now();
        let Some(session) = self.registry.get(handle) else {
            return;
        };
        let first_detection = !session.ws_close_sent && !session.closing;
        match idle_action(session, &self.config, now) {
            IdleAction::None => {}
            IdleAction::SendClose => {
                debug!(%handle, "WebSocket idle, sending CLOSE");
                self.notify(handle, SessionNotice::Idle);
                self.send_close_frame(handle, close_code::GOING_AWAY, "idle");
            }
            IdleAction::ForceClose => {
                if first_detection {
                    debug!(%handle, "HTTP connection idle, closing");
                    self.notify(handle, SessionNotice::Idle);
                } else {
                    debug!(%handle, "Close wait expired, closing");
                }
                self.force_close(handle);
                return;
            }
        }

        self.try_finish_close(handle);
    }

    /// Queue a CLOSE frame and start the close-wait interval.
    pub(crate) fn send_close_frame(&mut self, handle: SessionHandle, code: u16, reason: &str) {
        let now = self.now();
        let Some(session) = self.registry.get_mut(handle) else {
            return;
        };
        if session.ws_close_sent {
            return;
        }
        let frame = encode_frame(OpCode::Close, &close_payload(code, reason), false);
        if let Err(e) = session.outbound.enqueue(BufferSource::Transferred(frame)) {
            warn!(%handle, "Failed to queue CLOSE: {}", e);
            return;
        }
        session.ws_close_sent = true;
        session.last_activity = now;
        self.write_pending(handle);
    }

    /// Send a CLOSE frame (if not already sent) and close once it drains,
    /// without waiting for the peer.
    pub(crate) fn fail_websocket(&mut self, handle: SessionHandle, code: u16, reason: &str) {
        warn!(%handle, code, reason, "Closing WebSocket");
        self.send_close_frame(handle, code, reason);
        self.begin_close(handle);
    }

    /// Queue a canned response and close once it drains.
    pub(crate) fn reply_and_close(&mut self, handle: SessionHandle, response: &'static [u8]) {
        self.queue_internal(handle, BufferSource::Static(response));
        self.begin_close(handle);
    }

    /// Mark the session closing; the transport is closed once all queued
    /// output has been acknowledged.
    pub(crate) fn begin_close(&mut self, handle: SessionHandle) {
        let now = self.now();
        let Some(session) = self.registry.get_mut(handle) else {
            return;
        };
        if !session.closing {
            debug!(%handle, queued = session.outbound.len(), "Closing session");
            session.closing = true;
            session.inbound.clear();
            if !session.ws_close_sent {
                session.last_activity = now;
            }
        }
        self.write_pending(handle);
        self.try_finish_close(handle);
    }

    /// Close a closing session whose queue has drained.
    pub(crate) fn try_finish_close(&mut self, handle: SessionHandle) {
        let ready = self
            .registry
            .get(handle)
            .is_some_and(|s| s.closing && !s.outbound.has_pending());
        if ready {
            self.force_close(handle);
        }
    }

    /// Close the transport and retire the session, dropping queued output.
    pub(crate) fn force_close(&mut self, handle: SessionHandle) {
        let Some(session) = self.registry.get(handle) else {
            return;
        };
        let conn = session.conn;
        if let Err(e) = self.transport.close(conn) {
            warn!(%handle, "Transport close failed: {}", e);
        }
        self.retire(handle);
    }

    /// Remove the session from the registry without touching the transport.
    pub(crate) fn retire(&mut self, handle: SessionHandle) {
        let Some(mut session) = self.registry.remove_handle(handle) else {
            return;
        };
        session.closed = true;
        let dropped = session.outbound.clear();
        debug!(%handle, mode = %session.mode, dropped, "Session closed");
        self.notify(handle, SessionNotice::Closed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MINUTE: u64 = 60_000;

    fn session(mode: ProtocolMode) -> Session<u32> {
        let mut session = Session::new(SessionHandle::FIRST, 1, 0);
        session.mode = mode;
        session
    }

    #[test]
    fn test_http_idle_forces_close() {
        let config = ServerConfig::default();
        let s = session(ProtocolMode::Http);
        assert_eq!(idle_action(&s, &config, 10 * MINUTE), IdleAction::None);
        assert_eq!(idle_action(&s, &config, 10 * MINUTE + 1), IdleAction::ForceClose);
    }

    #[test]
    fn test_websocket_idle_disabled_by_default() {
        let config = ServerConfig::default();
        let s = session(ProtocolMode::WebSocket);
        assert_eq!(idle_action(&s, &config, 1000 * MINUTE), IdleAction::None);
    }

    #[test]
    fn test_websocket_idle_sends_close_then_forces() {
        let config = ServerConfig {
            ws_idle_minutes: 5,
            ..Default::default()
        };
        let mut s = session(ProtocolMode::WebSocket);
        assert_eq!(idle_action(&s, &config, 5 * MINUTE + 1), IdleAction::SendClose);

        s.ws_close_sent = true;
        s.last_activity = 5 * MINUTE + 1;
        assert_eq!(idle_action(&s, &config, 7 * MINUTE), IdleAction::None);
        assert_eq!(idle_action(&s, &config, 7 * MINUTE + 2), IdleAction::ForceClose);
    }

    #[test]
    fn test_close_wait_applies_without_ws_idle() {
        let config = ServerConfig::default();
        let mut s = session(ProtocolMode::WebSocket);
        s.ws_close_sent = true;
        assert_eq!(idle_action(&s, &config, 2 * MINUTE + 1), IdleAction::ForceClose);
    }

    #[test]
    fn test_closing_http_bounded_by_close_wait() {
        let config = ServerConfig::default();
        let mut s = session(ProtocolMode::Http);
        s.closing = true;
        assert_eq!(idle_action(&s, &config, MINUTE), IdleAction::None);
        assert_eq!(idle_action(&s, &config, 2 * MINUTE + 1), IdleAction::ForceClose);
    }

    #[test]
    fn test_disabled_timeouts_never_fire() {
        let config = ServerConfig {
            http_idle_minutes: 0,
            ws_close_wait_minutes: 0,
            ..Default::default()
        };
        let mut s = session(ProtocolMode::Http);
        assert_eq!(idle_action(&s, &config, u64::MAX), IdleAction::None);
        s.closing = true;
        assert_eq!(idle_action(&s, &config, u64::MAX), IdleAction::None);
    }
}
