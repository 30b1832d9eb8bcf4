//! HTTP response helpers.
//!
//! Responses are plain byte buffers queued on a session, so these helpers
//! operate on `Vec<u8>` rather than a response type.

use crate::find_bytes;

/// Sent when no handler claims a request.
pub static NOT_FOUND: &[u8] = b"HTTP/1.0 404 Not Found\r\n\r\n";

/// Sent when a request head cannot be parsed.
pub static BAD_REQUEST: &[u8] = b"HTTP/1.0 400 Bad Request\r\n\r\n";

/// Sent when a request outgrows the inbound buffer limit.
pub static PAYLOAD_TOO_LARGE: &[u8] = b"HTTP/1.0 413 Payload Too Large\r\n\r\n";

/// Header block used by [`html_page`].
pub const DEFAULT_HEADER: &str = "HTTP/1.1 200 OK\r\nContent-Type: text/html; charset=utf-8";

const HEAD_TERMINATOR: &[u8] = b"\r\n\r\n";

/// Insert or correct the `Content-Length` header of a complete response.
///
/// The length is computed from whatever follows the blank line. Returns
/// `false` when the message has no header terminator.
pub fn set_html_length_header(message: &mut Vec<u8>) -> bool {
    let Some(head_end) = find_bytes(message, HEAD_TERMINATOR, 0) else {
        return false;
    };
    let body_len = message.len() - head_end - HEAD_TERMINATOR.len();

    let head = String::from_utf8_lossy(&message[..head_end]).into_owned();
    let mut rebuilt: Vec<&str> = head
        .split("\r\n")
        .filter(|line| {
            !line
                .split_once(':')
                .is_some_and(|(name, _)| name.trim().eq_ignore_ascii_case("Content-Length"))
        })
        .collect();
    let length_line = format!("Content-Length: {body_len}");
    rebuilt.push(&length_line);

    message.splice(..head_end, rebuilt.join("\r\n").into_bytes());
    true
}

/// Replace everything before the blank line with `header`.
///
/// A message without a header block gets one prepended.
pub fn replace_header(message: &mut Vec<u8>, header: &str) {
    let header = header.trim_end_matches("\r\n");
    match find_bytes(message, HEAD_TERMINATOR, 0) {
        Some(head_end) => {
            message.splice(..head_end, header.bytes());
        }
        None => {
            let mut prefix = header.as_bytes().to_vec();
            prefix.extend_from_slice(HEAD_TERMINATOR);
            message.splice(..0, prefix);
        }
    }
}

/// Build a complete response with a `Content-Length` header.
pub fn build_response(status: &str, content_type: &str, body: &[u8]) -> Vec<u8> {
    let mut message = format!(
        "HTTP/1.1 {status}\r\nContent-Type: {content_type}\r\nContent-Length: {}\r\n\r\n",
        body.len()
    )
    .into_bytes();
    message.extend_from_slice(body);
    message
}

/// A `200 OK` HTML page.
pub fn html_page(body: &str) -> Vec<u8> {
    let mut message = Vec::with_capacity(DEFAULT_HEADER.len() + body.len() + 32);
    message.extend_from_slice(DEFAULT_HEADER.as_bytes());
    message.extend_from_slice(HEAD_TERMINATOR);
    message.extend_from_slice(body.as_bytes());
    set_html_length_header(&mut message);
    message
}

/// Content type for a file extension.
pub fn content_type_for(filetype: &str) -> &'static str {
    match filetype.to_ascii_lowercase().as_str() {
        "html" | "htm" => "text/html; charset=utf-8",
        "css" => "text/css",
        "js" => "text/javascript",
        "json" => "application/json",
        "txt" => "text/plain; charset=utf-8",
        "svg" => "image/svg+xml",
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "gif" => "image/gif",
        "ico" => "image/x-icon",
        "wasm" => "application/wasm",
        _ => "application/octet-stream",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn text(bytes: &[u8]) -> &str {
        std::str::from_utf8(bytes).unwrap()
    }

    #[test]
    fn test_canned_status_lines() {
        assert!(NOT_FOUND.starts_with(b"HTTP/1.0 404 Not Found\r\n"));
        assert!(BAD_REQUEST.starts_with(b"HTTP/1.0 400 Bad Request\r\n"));
        assert!(PAYLOAD_TOO_LARGE.starts_with(b"HTTP/1.0 413 Payload Too Large\r\n"));
    }

    #[test]
    fn test_set_length_header_inserts() {
        let mut msg = b"HTTP/1.1 200 OK\r\nContent-Type: text/html\r\n\r\n<p>hi</p>".to_vec();
        assert!(set_html_length_header(&mut msg));
        assert_eq!(
            text(&msg),
            "HTTP/1.1 200 OK\r\nContent-Type: text/html\r\nContent-Length: 9\r\n\r\n<p>hi</p>"
        );
    }

    #[test]
    fn test_set_length_header_replaces_stale_value() {
        let mut msg = b"HTTP/1.1 200 OK\r\ncontent-length: 999\r\nX-A: 1\r\n\r\nabc".to_vec();
        assert!(set_html_length_header(&mut msg));
        assert_eq!(text(&msg), "HTTP/1.1 200 OK\r\nX-A: 1\r\nContent-Length: 3\r\n\r\nabc");
    }

    #[test]
    fn test_set_length_header_without_terminator() {
        let mut msg = b"just a body".to_vec();
        assert!(!set_html_length_header(&mut msg));
        assert_eq!(msg, b"just a body");
    }

    #[test]
    fn test_replace_header() {
        let mut msg = b"HTTP/1.1 200 OK\r\nX-Old: 1\r\n\r\nbody".to_vec();
        replace_header(&mut msg, "HTTP/1.1 302 Found\r\nLocation: /\r\n");
        assert_eq!(text(&msg), "HTTP/1.1 302 Found\r\nLocation: /\r\n\r\nbody");

        let mut bare = b"body".to_vec();
        replace_header(&mut bare, "HTTP/1.1 200 OK");
        assert_eq!(text(&bare), "HTTP/1.1 200 OK\r\n\r\nbody");
    }

    #[test]
    fn test_html_page() {
        let page = html_page("<h1>ok</h1>");
        assert!(text(&page).starts_with("HTTP/1.1 200 OK\r\n"));
        assert!(text(&page).contains("Content-Length: 11\r\n\r\n<h1>ok</h1>"));
    }

    #[test]
    fn test_build_response() {
        let msg = build_response("201 Created", "application/json", b"{}");
        assert_eq!(
            text(&msg),
            "HTTP/1.1 201 Created\r\nContent-Type: application/json\r\nContent-Length: 2\r\n\r\n{}"
        );
    }

    #[test]
    fn test_content_types() {
        assert_eq!(content_type_for("JS"), "text/javascript");
        assert_eq!(content_type_for("bin"), "application/octet-stream");
    }
}
