//! # picoweb-protocol
//!
//! Wire protocols spoken by the picoweb server engine.
//!
//! Both parsers work on an accumulation buffer that grows in arbitrary
//! chunks as the transport delivers data. They either report a complete
//! message (without consuming anything) or report that more bytes are
//! needed. Truncated input is never an error.

pub mod form;
pub mod frame;
pub mod handshake;
pub mod http;
pub mod response;

pub use form::{FieldValue, FormData, FormField};
pub use frame::{
    apply_mask, decode_frame, encode_frame, encode_frame_with_key, FrameError, FrameHeader, OpCode,
};
pub use handshake::{accept_key, HandshakeError};
pub use http::{parse_head, parse_head_limited, uri_decode, HttpError, HttpRequest, RequestHead};

/// Outcome of an incremental parse attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParseStatus<T> {
    /// A complete message is present in the buffer.
    Ready(T),
    /// More bytes are needed; nothing was consumed.
    NotYet,
}

impl<T> ParseStatus<T> {
    pub fn is_ready(&self) -> bool {
        matches!(self, ParseStatus::Ready(_))
    }

    /// Convert into an `Option`, dropping the distinction.
    pub fn ready(self) -> Option<T> {
        match self {
            ParseStatus::Ready(value) => Some(value),
            ParseStatus::NotYet => None,
        }
    }
}

/// Position of `needle` in `haystack` at or after `from`.
pub(crate) fn find_bytes(haystack: &[u8], needle: &[u8], from: usize) -> Option<usize> {
    if needle.is_empty() || from > haystack.len() {
        return None;
    }
    haystack[from..]
        .windows(needle.len())
        .position(|w| w == needle)
        .map(|p| p + from)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_find_bytes() {
        assert_eq!(find_bytes(b"abc\r\n\r\nxyz", b"\r\n\r\n", 0), Some(3));
        assert_eq!(find_bytes(b"abcabc", b"abc", 1), Some(3));
        assert_eq!(find_bytes(b"abc", b"abcd", 0), None);
        assert_eq!(find_bytes(b"abc", b"", 0), None);
        assert_eq!(find_bytes(b"abc", b"c", 4), None);
    }
}
