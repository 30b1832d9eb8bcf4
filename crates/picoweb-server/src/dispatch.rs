//! Protocol dispatch.
//!
//! Pulls complete messages out of a session's inbound buffer and routes
//! them: HTTP requests go to the upgrade handshake or the HTTP handler,
//! WebSocket frames to control handling or the message handlers. Bytes of
//! an incomplete message stay buffered for the next receive.

use bytes::Bytes;
use picoweb_core::{BufferSource, ProtocolMode, SessionHandle, SessionNotice};
use picoweb_protocol::frame::{close_code, parse_close_code, FrameHeader};
use picoweb_protocol::response::{BAD_REQUEST, NOT_FOUND, PAYLOAD_TOO_LARGE};
use picoweb_protocol::{
    decode_frame, encode_frame, handshake, parse_head_limited, HttpError, HttpRequest, OpCode,
    ParseStatus,
};
use tracing::{debug, trace, warn};

use crate::server::Server;
use crate::session::Fragment;
use crate::transport::Transport;

impl<T: Transport> Server<T> {
    /// Dispatch every complete message buffered for `handle`.
    pub(crate) fn process_inbound(&mut self, handle: SessionHandle) {
        loop {
            let Some(session) = self.registry.get(handle) else {
                return;
            };
            if session.closing || session.inbound.is_empty() {
                return;
            }
            let mode = session.mode;
            let progressed = match mode {
                ProtocolMode::Http => self.next_request(handle),
                ProtocolMode::WebSocket => self.next_frame(handle),
            };
            if !progressed {
                return;
            }
        }
    }

    fn next_request(&mut self, handle: SessionHandle) -> bool {
        let max = self.config.max_request_bytes;
        let Some(session) = self.registry.get_mut(handle) else {
            return false;
        };

        let head = match parse_head_limited(&session.inbound, max) {
            Ok(ParseStatus::Ready(head)) => head,
            Ok(ParseStatus::NotYet) => {
                if session.inbound.len() > max {
                    warn!(%handle, buffered = session.inbound.len(), "Request exceeds limit");
                    session.inbound.clear();
                    self.reply_and_close(handle, PAYLOAD_TOO_LARGE);
                }
                return false;
            }
            Err(e @ HttpError::TooLarge { .. }) => {
                warn!(%handle, "Request refused: {}", e);
                session.inbound.clear();
                self.reply_and_close(handle, PAYLOAD_TOO_LARGE);
                return false;
            }
            Err(e) => {
                warn!(%handle, "Bad request: {}", e);
                session.inbound.clear();
                self.reply_and_close(handle, BAD_REQUEST);
                return false;
            }
        };

        let raw = session.inbound.split_to(head.total_len()).freeze();
        let request = HttpRequest::from_head(raw, head);
        debug!(%handle, method = request.method(), url = request.url(), "HTTP request");
        trace!(%handle, "{}", String::from_utf8_lossy(request.raw()));

        if request.is_websocket_upgrade() {
            self.upgrade(handle, &request);
        } else {
            self.dispatch_http(handle, &request);
        }
        true
    }

    /// Complete the WebSocket handshake. The mode switches only after the
    /// 101 response is queued, so any frames pipelined behind the request
    /// are parsed as WebSocket.
    fn upgrade(&mut self, handle: SessionHandle, request: &HttpRequest) {
        let response = match handshake::upgrade_response(request) {
            Ok(response) => response,
            Err(e) => {
                warn!(%handle, "WebSocket upgrade refused: {}", e);
                self.reply_and_close(handle, BAD_REQUEST);
                return;
            }
        };

        let Some(session) = self.registry.get_mut(handle) else {
            return;
        };
        if let Err(e) = session.outbound.enqueue(BufferSource::Transferred(response)) {
            warn!(%handle, "Failed to queue upgrade response: {}", e);
            return;
        }
        session.mode = ProtocolMode::WebSocket;
        debug!(%handle, path = request.path(), "Upgraded to WebSocket");

        self.notify(handle, SessionNotice::Upgraded);
        self.write_pending(handle);
    }

    fn dispatch_http(&mut self, handle: SessionHandle, request: &HttpRequest) {
        let mut keep_open = false;
        let handled = match self.handlers.http.take() {
            Some(mut handler) => {
                let handled = handler(self, handle, request, &mut keep_open);
                if self.handlers.http.is_none() {
                    self.handlers.http = Some(handler);
                }
                handled
            }
            None => false,
        };

        // The handler may have closed the session.
        let Some(session) = self.registry.get(handle) else {
            debug!(%handle, "Session gone after HTTP handler");
            return;
        };

        if !handled {
            if session.closing {
                return;
            }
            debug!(%handle, url = request.url(), "No handler, sending 404");
            self.reply_and_close(handle, NOT_FOUND);
            return;
        }

        if keep_open {
            self.write_pending(handle);
        } else {
            self.begin_close(handle);
        }
    }

    fn next_frame(&mut self, handle: SessionHandle) -> bool {
        let max = self.config.max_request_bytes;
        let Some(session) = self.registry.get_mut(handle) else {
            return false;
        };

        let header = match decode_frame(&mut session.inbound[..], max) {
            Ok(ParseStatus::Ready(header)) => header,
            Ok(ParseStatus::NotYet) => return false,
            Err(e) => {
                session.inbound.clear();
                self.fail_websocket(handle, close_code::MESSAGE_TOO_BIG, &e.to_string());
                return false;
            }
        };

        let frame = session.inbound.split_to(header.frame_len()).freeze();
        let payload = frame.slice(header.payload_range());
        trace!(%handle, opcode = ?header.opcode, fin = header.fin, len = header.payload_len, "Frame");
        self.dispatch_frame(handle, header, payload);
        true
    }

    fn dispatch_frame(&mut self, handle: SessionHandle, header: FrameHeader, payload: Bytes) {
        if header.rsv != 0 {
            self.fail_websocket(handle, close_code::PROTOCOL_ERROR, "reserved bits set");
            return;
        }

        match header.opcode {
            OpCode::Text | OpCode::Binary => {
                let in_progress = self
                    .registry
                    .get(handle)
                    .is_some_and(|s| s.fragment.is_some());
                if in_progress {
                    self.fail_websocket(handle, close_code::PROTOCOL_ERROR, "expected continuation");
                } else if header.fin {
                    self.deliver(handle, header.opcode, &payload);
                } else if let Some(session) = self.registry.get_mut(handle) {
                    session.fragment = Some(Fragment {
                        opcode: header.opcode,
                        data: payload.to_vec(),
                    });
                }
            }
            OpCode::Continuation => self.continue_fragment(handle, header.fin, &payload),
            OpCode::Ping => {
                let accepts = self.registry.get(handle).is_some_and(|s| s.accepts_output());
                if accepts {
                    let pong = encode_frame(OpCode::Pong, &payload, false);
                    self.queue_internal(handle, BufferSource::Transferred(pong));
                    self.write_pending(handle);
                }
            }
            OpCode::Pong => trace!(%handle, "Pong received"),
            OpCode::Close => {
                let code = parse_close_code(&payload);
                debug!(%handle, ?code, "Peer sent CLOSE");
                self.send_close_frame(handle, code.unwrap_or(close_code::NORMAL), "");
                self.begin_close(handle);
            }
            OpCode::Reserved(op) => {
                debug!(%handle, op, "Reserved opcode");
                self.fail_websocket(handle, close_code::PROTOCOL_ERROR, "reserved opcode");
            }
        }
    }

    fn continue_fragment(&mut self, handle: SessionHandle, fin: bool, payload: &[u8]) {
        let max = self.config.max_request_bytes;
        let Some(session) = self.registry.get_mut(handle) else {
            return;
        };
        let Some(fragment) = session.fragment.as_mut() else {
            self.fail_websocket(handle, close_code::PROTOCOL_ERROR, "unexpected continuation");
            return;
        };

        if fragment.data.len() + payload.len() > max {
            session.fragment = None;
            self.fail_websocket(handle, close_code::MESSAGE_TOO_BIG, "message too big");
            return;
        }
        fragment.data.extend_from_slice(payload);

        if fin {
            if let Some(message) = session.fragment.take() {
                self.deliver(handle, message.opcode, &message.data);
            }
        }
    }

    /// Hand a complete TEXT or BINARY message to its handler.
    fn deliver(&mut self, handle: SessionHandle, opcode: OpCode, data: &[u8]) {
        match opcode {
            OpCode::Text => {
                let Ok(text) = std::str::from_utf8(data) else {
                    self.fail_websocket(handle, close_code::INVALID_PAYLOAD, "invalid UTF-8");
                    return;
                };
                match self.handlers.message.take() {
                    Some(mut handler) => {
                        handler(self, handle, text);
                        if self.handlers.message.is_none() {
                            self.handlers.message = Some(handler);
                        }
                    }
                    None => debug!(%handle, "No message handler, TEXT dropped"),
                }
            }
            _ => match self.handlers.binary.take() {
                Some(mut handler) => {
                    handler(self, handle, data);
                    if self.handlers.binary.is_none() {
                        self.handlers.binary = Some(handler);
                    }
                }
                None => debug!(%handle, "No binary handler, BINARY dropped"),
            },
        }
    }
}
