//! Error types for the server engine.

use picoweb_core::{OutboundError, SessionHandle};
use thiserror::Error;

/// Failures reported by a [`Transport`](crate::Transport).
#[derive(Debug, Error)]
pub enum TransportError {
    /// The send window is full; retry after the next acknowledge or poll.
    #[error("Transport send buffer is full")]
    WouldBlock,

    #[error("Connection is not known to the transport")]
    UnknownConnection,

    #[error("Failed to listen on port {port}: {source}")]
    Listen {
        port: u16,
        #[source]
        source: std::io::Error,
    },

    #[error("Transport I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Failures creating a session.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegistryError {
    /// The transport reported a connection identity that is already mapped.
    #[error("Connection {0} is already registered")]
    DuplicateConnection(String),

    #[error("Session table full ({max} sessions)")]
    Full { max: usize },

    #[error("No session handle available")]
    HandlesExhausted,
}

/// Errors returned by the application-facing [`Server`](crate::Server) API.
#[derive(Debug, Error)]
pub enum ServerError {
    /// The handle does not name a live session. Usually the session closed.
    #[error("Session {0} not found")]
    HandleNotFound(SessionHandle),

    /// The session is closing and accepts no more output.
    #[error("Session {0} is closing")]
    SessionClosing(SessionHandle),

    #[error("Session {0} is not a WebSocket")]
    NotWebSocket(SessionHandle),

    #[error("Registry error: {0}")]
    Registry(#[from] RegistryError),

    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("Outbound queue error: {0}")]
    Outbound(#[from] OutboundError),
}
