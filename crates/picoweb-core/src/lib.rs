//! # picoweb-core
//!
//! Core building blocks for the picoweb server engine.
//!
//! This crate provides:
//! - Session model types (handles, protocol mode, lifecycle notices)
//! - Server configuration and validation
//! - A monotonic clock abstraction for idle tracking
//! - The outbound send queue with sent/acknowledged bookkeeping
//!
//! This crate is intentionally runtime-agnostic and contains no async code,
//! making it usable both on a host (tokio) and on a microcontroller whose
//! network stack drives everything through callbacks.

pub mod clock;
pub mod config;
pub mod model;
pub mod outbound;

pub use clock::{Clock, ManualClock, MonotonicClock};
pub use config::{load_config, ConfigError, ServerConfig, ValidationError};
pub use model::*;
pub use outbound::{BufferSource, OutboundError, OutboundQueue};
