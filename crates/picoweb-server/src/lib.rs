//! # picoweb-server
//!
//! Callback-driven HTTP and WebSocket server engine.
//!
//! The engine never performs I/O itself. A transport adapter owns the
//! sockets, implements [`Transport`] for writes and closes, and feeds
//! events into the [`Server`] callbacks (`on_accept`, `on_receive`,
//! `on_sent`, `on_poll`, `on_remote_close`, `on_error`). Everything the
//! engine does happens synchronously inside one of those calls.
//!
//! Enable features based on target platform:
//! - `tokio-runtime` (default) - Tokio adapter and driver loop for Linux/desktop
//!
//! [`MockTransport`] is a scripted adapter for tests.

mod dispatch;
pub mod error;
pub mod files;
pub mod lifecycle;
pub mod lock;
pub mod mock;
pub mod registry;
pub mod server;
pub mod session;
pub mod transport;

#[cfg(feature = "tokio-runtime")]
pub mod tokio_runtime;

pub use error::{RegistryError, ServerError, TransportError};
pub use files::{StaticFile, StaticFiles};
pub use lifecycle::{idle_action, IdleAction};
pub use lock::TransportLock;
pub use mock::MockTransport;
pub use registry::ConnectionRegistry;
pub use server::Server;
pub use session::Session;
pub use transport::Transport;

#[cfg(feature = "tokio-runtime")]
pub use tokio_runtime::{ServerHandle, TokioDriver, TokioTransport};

pub use picoweb_core::{ProtocolMode, ServerConfig, SessionHandle, SessionNotice};
pub use picoweb_protocol::HttpRequest;
