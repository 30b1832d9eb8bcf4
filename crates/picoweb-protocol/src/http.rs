//! HTTP/1.x request parsing.
//!
//! [`parse_head`] decides whether an accumulation buffer holds a complete
//! request and where its body ends. It does not consume bytes, so the
//! caller can keep appending and asking again. Once a request is complete
//! the caller splits those bytes off and wraps them in an [`HttpRequest`],
//! which gives cheap access to the request line, headers, cookies, query
//! parameters and POST fields.
//!
//! The body length comes from `Content-Length`. Without it, a
//! `multipart/form-data` request ends at its closing boundary. Anything else
//! has no body.

use crate::form::{self, FormData};
use crate::{find_bytes, ParseStatus};
use bytes::Bytes;
use percent_encoding::percent_decode_str;
use std::cell::OnceCell;
use std::ops::Range;
use thiserror::Error;
use tracing::trace;

/// Errors raised while parsing a request head.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum HttpError {
    #[error("Malformed request line: {0:?}")]
    MalformedRequestLine(String),

    #[error("Request head is not valid UTF-8")]
    NonUtf8Head,

    #[error("Invalid Content-Length: {0:?}")]
    InvalidContentLength(String),

    #[error("Request of {len} bytes exceeds the {max} byte limit")]
    TooLarge { len: usize, max: usize },
}

const HEAD_TERMINATOR: &[u8] = b"\r\n\r\n";

/// The parsed request line and headers, plus where the body sits in the
/// buffer the head was parsed from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestHead {
    pub method: String,
    pub url: String,
    pub version: String,
    pub headers: Vec<(String, String)>,
    /// Offset of the first body byte (just past the blank line).
    pub body_offset: usize,
    pub body_len: usize,
}

impl RequestHead {
    /// Total number of buffer bytes the request occupies.
    pub fn total_len(&self) -> usize {
        self.body_offset.saturating_add(self.body_len)
    }

    /// First header with the given name (case-insensitive).
    pub fn header(&self, name: &str) -> Option<&str> {
        find_header(&self.headers, name, 0).map(|i| self.headers[i].1.as_str())
    }
}

fn find_header(headers: &[(String, String)], name: &str, from: usize) -> Option<usize> {
    headers
        .iter()
        .enumerate()
        .skip(from)
        .find(|(_, (n, _))| n.eq_ignore_ascii_case(name))
        .map(|(i, _)| i)
}

/// Decide whether `buf` starts with a complete request.
///
/// Leading blank lines are tolerated; they count towards `body_offset` so
/// the caller can discard them together with the request.
pub fn parse_head(buf: &[u8]) -> Result<ParseStatus<RequestHead>, HttpError> {
    parse_head_limited(buf, usize::MAX)
}

/// [`parse_head`] that fails with [`HttpError::TooLarge`] as soon as the
/// declared request size exceeds `max_len`, without waiting for the body.
pub fn parse_head_limited(
    buf: &[u8],
    max_len: usize,
) -> Result<ParseStatus<RequestHead>, HttpError> {
    let mut start = 0;
    while buf[start..].starts_with(b"\r\n") {
        start += 2;
    }

    let head_end = match find_bytes(buf, HEAD_TERMINATOR, start) {
        Some(end) => end,
        None => return Ok(ParseStatus::NotYet),
    };
    let text = std::str::from_utf8(&buf[start..head_end]).map_err(|_| HttpError::NonUtf8Head)?;

    let mut lines = text.split("\r\n");
    let request_line = lines.next().unwrap_or_default();
    let mut parts = request_line.split_whitespace();
    let (method, url, version) = match (parts.next(), parts.next(), parts.next(), parts.next()) {
        (Some(m), Some(u), Some(v), None) if v.starts_with("HTTP/") => (m, u, v),
        _ => return Err(HttpError::MalformedRequestLine(request_line.to_string())),
    };

    let mut headers = Vec::new();
    for line in lines {
        match line.split_once(':') {
            Some((name, value)) => headers.push((name.trim().to_string(), value.trim().to_string())),
            None => trace!(line, "Skipping header line without a colon"),
        }
    }

    let body_offset = head_end + HEAD_TERMINATOR.len();
    let mut head = RequestHead {
        method: method.to_string(),
        url: url.to_string(),
        version: version.to_string(),
        headers,
        body_offset,
        body_len: 0,
    };

    if let Some(value) = head.header("Content-Length") {
        head.body_len = value
            .parse()
            .ok()
            .filter(|len: &usize| body_offset.checked_add(*len).is_some())
            .ok_or_else(|| HttpError::InvalidContentLength(value.to_string()))?;
    } else if let Some(boundary) = head.header("Content-Type").and_then(form::multipart_boundary) {
        match multipart_end(&buf[body_offset..], &boundary) {
            Some(len) => head.body_len = len,
            None => return Ok(ParseStatus::NotYet),
        }
    }

    if head.total_len() > max_len {
        return Err(HttpError::TooLarge {
            len: head.total_len(),
            max: max_len,
        });
    }
    if buf.len() < head.total_len() {
        return Ok(ParseStatus::NotYet);
    }
    Ok(ParseStatus::Ready(head))
}

/// Length of a multipart body, up to and including its closing delimiter.
fn multipart_end(body: &[u8], boundary: &str) -> Option<usize> {
    let closing = format!("--{boundary}--");
    let pos = find_bytes(body, closing.as_bytes(), 0)?;
    let mut end = pos + closing.len();
    if body[end..].starts_with(b"\r\n") {
        end += 2;
    }
    Some(end)
}

/// Percent-decode a URI component, treating `+` as a space.
pub fn uri_decode(input: &str) -> String {
    let spaced = input.replace('+', " ");
    percent_decode_str(&spaced).decode_utf8_lossy().into_owned()
}

/// A complete request, holding its own bytes.
///
/// Header, cookie and query accessors return borrowed data. POST fields are
/// parsed on first use and multipart values borrow from the body.
#[derive(Debug)]
pub struct HttpRequest {
    raw: Bytes,
    method: String,
    url: String,
    version: String,
    headers: Vec<(String, String)>,
    cookies: Vec<(String, String)>,
    body: Range<usize>,
    form: OnceCell<FormData>,
    user_data: Option<String>,
}

impl HttpRequest {
    /// Build a request from the bytes `head` was parsed from.
    ///
    /// `raw` must contain at least `head.total_len()` bytes.
    pub fn from_head(raw: Bytes, head: RequestHead) -> Self {
        let body_end = head.total_len().min(raw.len());
        let body = head.body_offset.min(body_end)..body_end;
        let cookies = parse_cookies(&head.headers);
        Self {
            raw,
            method: head.method,
            url: head.url,
            version: head.version,
            headers: head.headers,
            cookies,
            body,
            form: OnceCell::new(),
            user_data: None,
        }
    }

    /// Parse a complete request from a standalone buffer. Trailing bytes
    /// beyond the request are ignored.
    pub fn parse(raw: Bytes) -> Result<ParseStatus<Self>, HttpError> {
        match parse_head(&raw)? {
            ParseStatus::Ready(head) => Ok(ParseStatus::Ready(Self::from_head(raw, head))),
            ParseStatus::NotYet => Ok(ParseStatus::NotYet),
        }
    }

    pub fn method(&self) -> &str {
        &self.method
    }

    /// The request target exactly as sent.
    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn version(&self) -> &str {
        &self.version
    }

    /// The URL without its query string or fragment.
    pub fn path(&self) -> &str {
        let end = self.url.find(['?', '#']).unwrap_or(self.url.len());
        &self.url[..end]
    }

    /// The path up to its file extension.
    pub fn root(&self) -> &str {
        let path = self.path();
        match path.rfind('.') {
            Some(dot) if !path[dot..].contains('/') => &path[..dot],
            _ => path,
        }
    }

    /// The file extension of the path, or `"html"` when there is none.
    pub fn filetype(&self) -> &str {
        let path = self.path();
        match path.rfind('.') {
            Some(dot) if !path[dot..].contains('/') => &path[dot + 1..],
            _ => "html",
        }
    }

    /// Decoded value of a query-string parameter.
    pub fn query(&self, key: &str) -> Option<String> {
        let (_, query) = self.url.split_once('?')?;
        let query = query.split('#').next().unwrap_or_default();
        query
            .split('&')
            .map(|pair| pair.split_once('=').unwrap_or((pair, "")))
            .find(|(k, _)| uri_decode(k) == key)
            .map(|(_, v)| uri_decode(v))
    }

    /// First header with the given name (case-insensitive).
    pub fn header(&self, name: &str) -> Option<&str> {
        self.header_index(name, 0).map(|i| self.headers[i].1.as_str())
    }

    /// Index of the next header named `name` at or after `from`, for
    /// walking repeated headers.
    pub fn header_index(&self, name: &str, from: usize) -> Option<usize> {
        find_header(&self.headers, name, from)
    }

    /// Name and value of the header at `index`.
    pub fn header_at(&self, index: usize) -> Option<(&str, &str)> {
        self.headers
            .get(index)
            .map(|(n, v)| (n.as_str(), v.as_str()))
    }

    pub fn headers(&self) -> impl Iterator<Item = (&str, &str)> {
        self.headers.iter().map(|(n, v)| (n.as_str(), v.as_str()))
    }

    pub fn header_count(&self) -> usize {
        self.headers.len()
    }

    pub fn cookie(&self, name: &str) -> Option<&str> {
        self.cookies
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, v)| v.as_str())
    }

    pub fn body(&self) -> &[u8] {
        &self.raw[self.body.clone()]
    }

    pub fn body_offset(&self) -> usize {
        self.body.start
    }

    pub fn body_len(&self) -> usize {
        self.body.len()
    }

    /// Size of the whole request in bytes.
    pub fn size(&self) -> usize {
        self.body.end
    }

    /// The raw request bytes.
    pub fn raw(&self) -> &[u8] {
        &self.raw[..self.body.end]
    }

    /// POST fields, parsed on first use.
    pub fn form(&self) -> &FormData {
        self.form.get_or_init(|| {
            let content_type = self.header("Content-Type").unwrap_or_default();
            form::parse(content_type, self.body(), self.body.start)
        })
    }

    /// First POST value for `name`.
    pub fn post_value(&self, name: &str) -> Option<&[u8]> {
        self.form()
            .get(name)
            .map(|field| field.value.resolve(&self.raw))
    }

    /// First POST value for `name`, if it is valid UTF-8.
    pub fn post_str(&self, name: &str) -> Option<&str> {
        self.post_value(name)
            .and_then(|v| std::str::from_utf8(v).ok())
    }

    /// Every POST value for `name`, in order.
    pub fn post_values(&self, name: &str) -> Vec<&[u8]> {
        self.form()
            .get_all(name)
            .map(|field| field.value.resolve(&self.raw))
            .collect()
    }

    /// Whether the request asks to switch to the WebSocket protocol.
    pub fn is_websocket_upgrade(&self) -> bool {
        self.header("Upgrade")
            .is_some_and(|v| v.eq_ignore_ascii_case("websocket"))
    }

    /// Application data attached while handling the request.
    pub fn user_data(&self) -> Option<&str> {
        self.user_data.as_deref()
    }

    pub fn set_user_data(&mut self, data: impl Into<String>) {
        self.user_data = Some(data.into());
    }
}

fn parse_cookies(headers: &[(String, String)]) -> Vec<(String, String)> {
    headers
        .iter()
        .filter(|(n, _)| n.eq_ignore_ascii_case("Cookie"))
        .flat_map(|(_, v)| v.split(';'))
        .filter_map(|item| {
            let item = item.trim();
            if item.is_empty() {
                return None;
            }
            let (name, value) = item.split_once('=').unwrap_or((item, ""));
            Some((name.trim().to_string(), value.trim().to_string()))
        })
        .collect()
}
