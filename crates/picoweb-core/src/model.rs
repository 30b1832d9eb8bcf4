//! Session model types shared by the protocol and server crates.

use serde::{Deserialize, Serialize};

/// Opaque identifier for a session, handed to application code.
///
/// Handles are issued monotonically starting at [`SessionHandle::FIRST`],
/// skip the reserved range below it on wraparound, and are never equal to
/// [`SessionHandle::INVALID`]. A handle is only a lookup key: holding one
/// says nothing about whether the session is still alive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionHandle(u32);

impl SessionHandle {
    /// Sentinel that never identifies a live session.
    pub const INVALID: SessionHandle = SessionHandle(0);

    /// First handle issued; values below it are reserved.
    pub const FIRST: SessionHandle = SessionHandle(1000);

    /// Wrap a raw value.
    pub const fn from_raw(raw: u32) -> Self {
        Self(raw)
    }

    /// Get the raw value.
    pub const fn as_u32(&self) -> u32 {
        self.0
    }

    /// True if the value lies outside the reserved range.
    pub const fn is_valid(&self) -> bool {
        self.0 >= Self::FIRST.0
    }
}

impl std::fmt::Display for SessionHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Application protocol currently spoken on a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProtocolMode {
    /// Plain HTTP request/response.
    Http,
    /// Upgraded to WebSocket framing.
    WebSocket,
}

impl ProtocolMode {
    /// Short label used in log lines.
    pub fn label(&self) -> &'static str {
        match self {
            ProtocolMode::Http => "http",
            ProtocolMode::WebSocket => "ws",
        }
    }
}

impl std::fmt::Display for ProtocolMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}

/// Session state transitions reported to the notice handler.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum SessionNotice {
    /// A connection was accepted and registered.
    Opened,
    /// The session completed the WebSocket upgrade.
    Upgraded,
    /// The session exceeded its idle timeout and is being closed.
    Idle,
    /// The session was retired from the registry.
    Closed,
}
