//! The server engine.
//!
//! [`Server`] owns the configuration, the transport adapter, the connection
//! registry and the application handlers. Adapters drive it through the
//! `on_*` callbacks; application code uses the send/close API, addressed by
//! [`SessionHandle`].
//!
//! Handlers receive `&mut Server` so they can respond immediately, send to
//! other sessions, or close connections from inside a callback.

use std::sync::Arc;

use picoweb_core::{
    BufferSource, Clock, MonotonicClock, ProtocolMode, ServerConfig, SessionHandle, SessionNotice,
};
use picoweb_protocol::frame::{close_code, encode_frame, OpCode};
use picoweb_protocol::HttpRequest;
use tracing::{debug, info, trace, warn};

use crate::error::ServerError;
use crate::registry::ConnectionRegistry;
use crate::session::Session;
use crate::transport::Transport;

/// Handles a complete HTTP request.
///
/// Returns `true` if it produced a response. Setting the `bool` argument
/// keeps the connection open afterwards; by default it is closed once the
/// response has been sent.
pub type HttpHandler<T> =
    Box<dyn FnMut(&mut Server<T>, SessionHandle, &HttpRequest, &mut bool) -> bool + Send>;

/// Handles a complete WebSocket TEXT message.
pub type MessageHandler<T> = Box<dyn FnMut(&mut Server<T>, SessionHandle, &str) + Send>;

/// Handles a complete WebSocket BINARY message.
pub type BinaryHandler<T> = Box<dyn FnMut(&mut Server<T>, SessionHandle, &[u8]) + Send>;

/// Observes session state transitions.
pub type NoticeHandler = Box<dyn FnMut(SessionHandle, SessionNotice) + Send>;

pub(crate) struct Handlers<T: Transport> {
    pub http: Option<HttpHandler<T>>,
    pub message: Option<MessageHandler<T>>,
    pub binary: Option<BinaryHandler<T>>,
    pub notice: Option<NoticeHandler>,
}

impl<T: Transport> Default for Handlers<T> {
    fn default() -> Self {
        Self {
            http: None,
            message: None,
            binary: None,
            notice: None,
        }
    }
}

/// HTTP and WebSocket server engine over a transport adapter.
pub struct Server<T: Transport> {
    pub(crate) config: ServerConfig,
    pub(crate) transport: T,
    pub(crate) registry: ConnectionRegistry<T::ConnId>,
    pub(crate) clock: Arc<dyn Clock>,
    pub(crate) handlers: Handlers<T>,
    listening: bool,
}

impl<T: Transport> Server<T> {
    /// Create a server using the monotonic system clock.
    pub fn new(config: ServerConfig, transport: T) -> Self {
        Self::with_clock(config, transport, Arc::new(MonotonicClock::new()))
    }

    /// Create a server with an explicit clock.
    pub fn with_clock(config: ServerConfig, transport: T, clock: Arc<dyn Clock>) -> Self {
        let registry = ConnectionRegistry::new(config.max_sessions);
        Self {
            config,
            transport,
            registry,
            clock,
            handlers: Handlers::default(),
            listening: false,
        }
    }

    // ------------------------------------------------------------------
    // Setup
    // ------------------------------------------------------------------

    pub fn set_http_handler<F>(&mut self, handler: F)
    where
        F: FnMut(&mut Server<T>, SessionHandle, &HttpRequest, &mut bool) -> bool + Send + 'static,
    {
        self.handlers.http = Some(Box::new(handler));
    }

    pub fn set_message_handler<F>(&mut self, handler: F)
    where
        F: FnMut(&mut Server<T>, SessionHandle, &str) + Send + 'static,
    {
        self.handlers.message = Some(Box::new(handler));
    }

    pub fn set_binary_handler<F>(&mut self, handler: F)
    where
        F: FnMut(&mut Server<T>, SessionHandle, &[u8]) + Send + 'static,
    {
        self.handlers.binary = Some(Box::new(handler));
    }

    pub fn set_notice_handler<F>(&mut self, handler: F)
    where
        F: FnMut(SessionHandle, SessionNotice) + Send + 'static,
    {
        self.handlers.notice = Some(Box::new(handler));
    }

    /// Start listening on the configured port.
    pub fn start(&mut self) -> Result<(), ServerError> {
        let lock = self.transport.lock().clone();
        let _guard = lock.acquire();

        self.transport.listen(self.config.port)?;
        self.listening = true;
        info!("HTTP server listening on port {}", self.config.port);
        Ok(())
    }

    /// Stop listening and close every session.
    pub fn stop(&mut self) {
        let lock = self.transport.lock().clone();
        let _guard = lock.acquire();

        if self.listening {
            self.transport.stop_listening();
            self.listening = false;
        }
        for handle in self.registry.handles() {
            self.force_close(handle);
        }
        info!("HTTP server stopped");
    }

    pub fn is_listening(&self) -> bool {
        self.listening
    }

    // ------------------------------------------------------------------
    // Transport callbacks
    // ------------------------------------------------------------------

    /// A connection was accepted. Returns `None` if it was refused; the
    /// adapter should then close it.
    pub fn on_accept(&mut self, conn: T::ConnId) -> Option<SessionHandle> {
        let now = self.now();
        match self.registry.create(conn, now) {
            Ok(handle) => {
                debug!(%handle, ?conn, "Connection opened");
                self.notify(handle, SessionNotice::Opened);
                Some(handle)
            }
            Err(e) => {
                warn!(?conn, "Refusing connection: {}", e);
                None
            }
        }
    }

    /// Bytes arrived. Every complete message is dispatched before this
    /// returns; the return value is the count the adapter may report as
    /// consumed.
    pub fn on_receive(&mut self, conn: T::ConnId, data: &[u8]) -> usize {
        let now = self.now();
        let Some(session) = self.registry.by_conn_mut(conn) else {
            debug!(?conn, len = data.len(), "Data for unknown connection dropped");
            return 0;
        };
        if session.closing {
            trace!(handle = %session.handle, len = data.len(), "Closing, received data dropped");
            return data.len();
        }
        trace!(handle = %session.handle, len = data.len(), "Received");
        session.inbound.extend_from_slice(data);
        session.touch(now);

        let handle = session.handle;
        self.process_inbound(handle);
        data.len()
    }

    /// The transport acknowledged `count` bytes.
    pub fn on_sent(&mut self, conn: T::ConnId, count: usize) {
        let now = self.now();
        let Some(session) = self.registry.by_conn_mut(conn) else {
            return;
        };
        session.outbound.acknowledge(count);
        session.touch_sent(now);

        let handle = session.handle;
        self.write_pending(handle);
        self.try_finish_close(handle);
    }

    /// The peer closed its side of the connection.
    pub fn on_remote_close(&mut self, conn: T::ConnId) {
        if let Some(handle) = self.registry.handle_of(conn) {
            debug!(%handle, "Peer closed connection");
            self.force_close(handle);
        }
    }

    /// The transport failed and has already discarded the connection.
    pub fn on_error(&mut self, conn: T::ConnId) {
        if let Some(handle) = self.registry.handle_of(conn) {
            warn!(%handle, "Transport error, dropping session");
            self.retire(handle);
        }
    }

    /// Idle-poll tick for one connection.
    pub fn on_poll(&mut self, conn: T::ConnId) {
        if let Some(handle) = self.registry.handle_of(conn) {
            self.poll_session(handle);
        }
    }

    /// Idle-poll tick for every connection.
    pub fn poll(&mut self) {
        for handle in self.registry.handles() {
            self.poll_session(handle);
        }
    }

    // ------------------------------------------------------------------
    // Application API
    // ------------------------------------------------------------------

    /// Queue a copy of `data`.
    pub fn send_data(&mut self, handle: SessionHandle, data: &[u8]) -> Result<(), ServerError> {
        self.send_source(handle, BufferSource::copy_of(data))
    }

    /// Queue `data` without copying; it is dropped once acknowledged.
    pub fn send_owned(&mut self, handle: SessionHandle, data: Vec<u8>) -> Result<(), ServerError> {
        self.send_source(handle, BufferSource::Transferred(data))
    }

    /// Queue program-lifetime bytes without copying.
    pub fn send_static(
        &mut self,
        handle: SessionHandle,
        data: &'static [u8],
    ) -> Result<(), ServerError> {
        self.send_source(handle, BufferSource::Static(data))
    }

    /// Send a WebSocket TEXT message.
    pub fn send_message(&mut self, handle: SessionHandle, text: &str) -> Result<(), ServerError> {
        self.send_frame(handle, OpCode::Text, text.as_bytes())
    }

    /// Send a WebSocket BINARY message.
    pub fn send_binary(&mut self, handle: SessionHandle, data: &[u8]) -> Result<(), ServerError> {
        self.send_frame(handle, OpCode::Binary, data)
    }

    /// Send a TEXT message to every open WebSocket session. Returns how
    /// many sessions it was queued on.
    pub fn broadcast_message(&mut self, text: &str) -> usize {
        let targets: Vec<_> = self
            .registry
            .sessions()
            .filter(|s| s.mode == ProtocolMode::WebSocket && s.accepts_output())
            .map(|s| s.handle)
            .collect();

        let mut sent = 0;
        for handle in targets {
            match self.send_message(handle, text) {
                Ok(()) => sent += 1,
                Err(e) => debug!(%handle, "Broadcast skipped: {}", e),
            }
        }
        sent
    }

    /// Close a session gracefully.
    ///
    /// A WebSocket gets a CLOSE frame and the connection closes when the
    /// peer answers or the close-wait interval expires. An HTTP connection
    /// closes once its queued output has been acknowledged.
    pub fn close(&mut self, handle: SessionHandle) -> Result<(), ServerError> {
        let lock = self.transport.lock().clone();
        let _guard = lock.acquire();

        let (mode, handshake_started) = self
            .registry
            .get(handle)
            .map(|s| (s.mode, s.ws_close_sent || s.closing))
            .ok_or(ServerError::HandleNotFound(handle))?;
        match mode {
            ProtocolMode::WebSocket if !handshake_started => {
                self.send_close_frame(handle, close_code::NORMAL, "");
            }
            ProtocolMode::WebSocket => {}
            ProtocolMode::Http => self.begin_close(handle),
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // Queries
    // ------------------------------------------------------------------

    /// Whether `handle` names a live session that is not closing.
    pub fn is_open(&self, handle: SessionHandle) -> bool {
        self.registry.get(handle).is_some_and(|s| !s.closing)
    }

    pub fn session(&self, handle: SessionHandle) -> Option<&Session<T::ConnId>> {
        self.registry.get(handle)
    }

    pub fn session_mode(&self, handle: SessionHandle) -> Option<ProtocolMode> {
        self.registry.get(handle).map(|s| s.mode)
    }

    pub fn handle_of(&self, conn: T::ConnId) -> Option<SessionHandle> {
        self.registry.handle_of(conn)
    }

    pub fn session_count(&self) -> usize {
        self.registry.len()
    }

    /// Live session handles in ascending order.
    pub fn connections(&self) -> Vec<SessionHandle> {
        self.registry.handles()
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }

    // ------------------------------------------------------------------
    // Internals
    // ------------------------------------------------------------------

    pub(crate) fn now(&self) -> u64 {
        self.clock.now_millis()
    }

    fn send_source(&mut self, handle: SessionHandle, source: BufferSource) -> Result<(), ServerError> {
        let lock = self.transport.lock().clone();
        let _guard = lock.acquire();

        let session = self
            .registry
            .get_mut(handle)
            .ok_or(ServerError::HandleNotFound(handle))?;
        if !session.accepts_output() {
            return Err(ServerError::SessionClosing(handle));
        }
        session.outbound.enqueue(source)?;
        self.write_pending(handle);
        Ok(())
    }

    fn send_frame(
        &mut self,
        handle: SessionHandle,
        opcode: OpCode,
        payload: &[u8],
    ) -> Result<(), ServerError> {
        match self.session_mode(handle) {
            None => Err(ServerError::HandleNotFound(handle)),
            Some(ProtocolMode::Http) => Err(ServerError::NotWebSocket(handle)),
            Some(ProtocolMode::WebSocket) => self.send_source(
                handle,
                BufferSource::Transferred(encode_frame(opcode, payload, false)),
            ),
        }
    }

    /// Queue bytes produced by the engine itself (responses, control
    /// frames). Unlike the application API this works on closing sessions.
    pub(crate) fn queue_internal(&mut self, handle: SessionHandle, source: BufferSource) {
        let Some(session) = self.registry.get_mut(handle) else {
            return;
        };
        if let Err(e) = session.outbound.enqueue(source) {
            warn!(%handle, "Dropping internal output: {}", e);
        }
    }

    /// Hand queued bytes to the transport until the queue or the send
    /// window is exhausted.
    pub(crate) fn write_pending(&mut self, handle: SessionHandle) {
        let Some(session) = self.registry.get_mut(handle) else {
            return;
        };
        let conn = session.conn;
        loop {
            let window = self
                .transport
                .send_capacity(conn)
                .min(self.config.max_segment_size);
            if window == 0 {
                break;
            }
            let Some(chunk) = session.outbound.next_chunk(window) else {
                break;
            };

            let rejected = match self.transport.write(conn, chunk) {
                Ok(written) if written >= chunk.len() => None,
                Ok(written) => Some(chunk[written..].to_vec()),
                Err(e) => {
                    warn!(%handle, len = chunk.len(), "Write failed, requeueing: {}", e);
                    Some(chunk.to_vec())
                }
            };
            if let Some(rest) = rejected {
                if let Err(e) = session.outbound.requeue(&rest) {
                    warn!(%handle, "Requeue refused: {}", e);
                }
                break;
            }
        }
    }

    pub(crate) fn notify(&mut self, handle: SessionHandle, notice: SessionNotice) {
        if let Some(handler) = self.handlers.notice.as_mut() {
            handler(handle, notice);
        }
    }
}
