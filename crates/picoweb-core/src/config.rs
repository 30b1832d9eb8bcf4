//! Server configuration.
//!
//! Configuration is a plain serde structure so it can be loaded from the
//! JSON settings file the application already keeps, or built in code.
//! Every field has a default, so a minimal file such as `{"port": 8080}`
//! is valid.

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

/// Errors that can occur while loading configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The configuration file could not be read.
    #[error("Failed to read configuration: {0}")]
    Io(#[from] std::io::Error),

    /// The configuration file is not valid JSON for this schema.
    #[error("Failed to parse configuration: {0}")]
    Parse(#[from] serde_json::Error),

    /// The configuration parsed but contains unusable values.
    #[error("Invalid configuration: {}", join_errors(.0))]
    Validation(Vec<ValidationError>),
}

/// A single semantic problem found by [`ServerConfig::validate`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{field}: {message}")]
pub struct ValidationError {
    pub field: &'static str,
    pub message: String,
}

fn join_errors(errors: &[ValidationError]) -> String {
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}

/// Configuration for the server engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// TCP port to listen on.
    pub port: u16,

    /// Minutes an HTTP connection may sit idle before it is closed (0 disables).
    pub http_idle_minutes: u32,

    /// Minutes a WebSocket may sit idle before the close handshake starts (0 disables).
    pub ws_idle_minutes: u32,

    /// Minutes to wait for the peer's CLOSE after ours, and for a closing
    /// session's queue to drain, before the transport is closed outright.
    pub ws_close_wait_minutes: u32,

    /// Interval between idle-poll ticks, in milliseconds.
    pub poll_interval_ms: u64,

    /// Maximum number of concurrent sessions.
    pub max_sessions: usize,

    /// Largest chunk handed to one transport write (TCP MSS).
    pub max_segment_size: usize,

    /// Per-connection send buffer of host transports.
    pub send_buffer_size: usize,

    /// Cap on unparsed inbound bytes and on a reassembled WebSocket message.
    pub max_request_bytes: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: 80,
            http_idle_minutes: 10,
            ws_idle_minutes: 0,
            ws_close_wait_minutes: 2,
            poll_interval_ms: 1000,
            max_sessions: 8,
            max_segment_size: 1460,
            send_buffer_size: 8 * 1460,
            max_request_bytes: 16 * 1024,
        }
    }
}

fn minutes(value: u32) -> Option<Duration> {
    (value > 0).then(|| Duration::from_secs(u64::from(value) * 60))
}

impl ServerConfig {
    /// Parse configuration from a JSON string and validate it.
    pub fn from_json(text: &str) -> Result<Self, ConfigError> {
        let config: ServerConfig = serde_json::from_str(text)?;
        config.validate().map_err(ConfigError::Validation)?;
        Ok(config)
    }

    /// Check value ranges. Returns every problem found, not just the first.
    pub fn validate(&self) -> Result<(), Vec<ValidationError>> {
        let mut errors = Vec::new();

        if self.poll_interval_ms == 0 {
            errors.push(ValidationError {
                field: "poll_interval_ms",
                message: "must be greater than zero".to_string(),
            });
        }
        if self.max_sessions == 0 {
            errors.push(ValidationError {
                field: "max_sessions",
                message: "must allow at least one session".to_string(),
            });
        }
        if self.max_segment_size == 0 {
            errors.push(ValidationError {
                field: "max_segment_size",
                message: "must be greater than zero".to_string(),
            });
        }
        if self.send_buffer_size < self.max_segment_size {
            errors.push(ValidationError {
                field: "send_buffer_size",
                message: format!("must be at least max_segment_size ({})", self.max_segment_size),
            });
        }
        if self.max_request_bytes < 512 {
            errors.push(ValidationError {
                field: "max_request_bytes",
                message: "must be at least 512".to_string(),
            });
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }

    /// HTTP idle timeout, or `None` when disabled.
    pub fn http_idle_timeout(&self) -> Option<Duration> {
        minutes(self.http_idle_minutes)
    }

    /// WebSocket idle timeout, or `None` when disabled.
    pub fn ws_idle_timeout(&self) -> Option<Duration> {
        minutes(self.ws_idle_minutes)
    }

    /// Close-wait interval, or `None` when disabled.
    pub fn ws_close_wait(&self) -> Option<Duration> {
        minutes(self.ws_close_wait_minutes)
    }

    /// Idle-poll tick interval.
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

/// Load and validate configuration from a JSON file.
pub fn load_config(path: &Path) -> Result<ServerConfig, ConfigError> {
    let content = std::fs::read_to_string(path)?;
    ServerConfig::from_json(&content)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_defaults() {
        let config = ServerConfig::default();
        assert_eq!(config.http_idle_timeout(), Some(Duration::from_secs(600)));
        assert_eq!(config.ws_idle_timeout(), None);
        assert_eq!(config.ws_close_wait(), Some(Duration::from_secs(120)));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let config = ServerConfig::from_json(r#"{"port": 8080, "ws_idle_minutes": 5}"#).unwrap();
        assert_eq!(
            config,
            ServerConfig {
                port: 8080,
                ws_idle_minutes: 5,
                ..Default::default()
            }
        );
    }

    #[test]
    fn test_validation_reports_all_errors() {
        let config = ServerConfig {
            poll_interval_ms: 0,
            max_sessions: 0,
            max_request_bytes: 10,
            ..Default::default()
        };
        let errors = config.validate().unwrap_err();
        let fields: Vec<_> = errors.iter().map(|e| e.field).collect();
        assert_eq!(fields, vec!["poll_interval_ms", "max_sessions", "max_request_bytes"]);
    }

    #[test]
    fn test_invalid_json_is_parse_error() {
        let err = ServerConfig::from_json("{port:").unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }

    #[test]
    fn test_invalid_values_rejected_on_load() {
        let err = ServerConfig::from_json(r#"{"max_sessions": 0}"#).unwrap_err();
        assert!(err.to_string().contains("max_sessions"));
    }

    #[test]
    fn test_load_missing_file() {
        let err = load_config(Path::new("/nonexistent/picoweb.json")).unwrap_err();
        assert!(matches!(err, ConfigError::Io(_)));
    }
}
