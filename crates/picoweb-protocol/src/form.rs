//! POST form decoding.
//!
//! Two encodings are understood:
//!
//! - `application/x-www-form-urlencoded`: values are decoded into owned
//!   buffers (`+` becomes a space, then percent escapes are resolved).
//! - `multipart/form-data`: values stay in the request body and are
//!   recorded as byte ranges, so uploads are never copied.
//!
//! A body whose structure breaks part way through yields the fields that
//! were complete before the damage.

use crate::find_bytes;
use percent_encoding::percent_decode;
use std::ops::Range;
use tracing::debug;

/// Where a field's value lives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FieldValue {
    /// Decoded bytes owned by the form.
    Decoded(Vec<u8>),
    /// A range of the request's raw bytes.
    Slice(Range<usize>),
}

impl FieldValue {
    /// The value's bytes, given the raw request it was parsed from.
    pub fn resolve<'a>(&'a self, raw: &'a [u8]) -> &'a [u8] {
        match self {
            FieldValue::Decoded(bytes) => bytes,
            FieldValue::Slice(range) => raw.get(range.clone()).unwrap_or_default(),
        }
    }
}

/// One named form field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FormField {
    pub name: String,
    /// Set for multipart file uploads.
    pub filename: Option<String>,
    /// Content type of a multipart part, when it declares one.
    pub content_type: Option<String>,
    pub value: FieldValue,
}

/// An ordered multimap of form fields.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FormData {
    fields: Vec<FormField>,
}

impl FormData {
    /// First field named `name`.
    pub fn get(&self, name: &str) -> Option<&FormField> {
        self.fields.iter().find(|f| f.name == name)
    }

    /// Every field named `name`, in body order.
    pub fn get_all<'a, 'n>(&'a self, name: &'n str) -> impl Iterator<Item = &'a FormField> + 'n
    where
        'a: 'n,
    {
        self.fields.iter().filter(move |f| f.name == name)
    }

    pub fn fields(&self) -> &[FormField] {
        &self.fields
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }
}

/// Decode a request body according to its `Content-Type`.
///
/// `base` is the offset of `body` within the raw request; multipart ranges
/// are expressed relative to the raw request.
pub fn parse(content_type: &str, body: &[u8], base: usize) -> FormData {
    if let Some(boundary) = multipart_boundary(content_type) {
        parse_multipart(body, &boundary, base)
    } else if media_type(content_type).eq_ignore_ascii_case("application/x-www-form-urlencoded") {
        parse_urlencoded(body)
    } else {
        FormData::default()
    }
}

fn media_type(content_type: &str) -> &str {
    content_type.split(';').next().unwrap_or_default().trim()
}

/// The boundary parameter of a `multipart/form-data` content type.
pub fn multipart_boundary(content_type: &str) -> Option<String> {
    if !media_type(content_type).eq_ignore_ascii_case("multipart/form-data") {
        return None;
    }
    let (_, params) = content_type.split_once(';')?;
    parse_params(params)
        .into_iter()
        .find(|(name, _)| name.eq_ignore_ascii_case("boundary"))
        .map(|(_, value)| value)
        .filter(|b| !b.is_empty())
}

fn decode_component(bytes: &[u8]) -> Vec<u8> {
    let spaced: Vec<u8> = bytes
        .iter()
        .map(|&b| if b == b'+' { b' ' } else { b })
        .collect();
    percent_decode(&spaced).collect()
}

/// Decode `name=value&name=value` pairs.
pub fn parse_urlencoded(body: &[u8]) -> FormData {
    let fields = body
        .split(|&b| b == b'&')
        .filter(|pair| !pair.is_empty())
        .map(|pair| {
            let (name, value) = match pair.iter().position(|&b| b == b'=') {
                Some(eq) => (&pair[..eq], &pair[eq + 1..]),
                None => (pair, &[][..]),
            };
            FormField {
                name: String::from_utf8_lossy(&decode_component(name)).into_owned(),
                filename: None,
                content_type: None,
                value: FieldValue::Decoded(decode_component(value)),
            }
        })
        .collect();
    FormData { fields }
}

/// Split a multipart body into fields.
pub fn parse_multipart(body: &[u8], boundary: &str, base: usize) -> FormData {
    let delimiter = format!("--{boundary}");
    let delimiter = delimiter.as_bytes();
    let mut fields = Vec::new();

    let mut pos = match find_bytes(body, delimiter, 0) {
        Some(p) => p + delimiter.len(),
        None => return FormData { fields },
    };

    loop {
        if body[pos..].starts_with(b"--") {
            break;
        }
        if !body[pos..].starts_with(b"\r\n") {
            debug!(offset = pos, "Multipart delimiter not followed by CRLF");
            break;
        }
        pos += 2;

        let Some(headers_end) = find_bytes(body, b"\r\n\r\n", pos) else {
            debug!(offset = pos, "Multipart part headers never end");
            break;
        };
        let headers = String::from_utf8_lossy(&body[pos..headers_end]);
        let value_start = headers_end + 4;

        let mut next_delimiter = Vec::with_capacity(delimiter.len() + 2);
        next_delimiter.extend_from_slice(b"\r\n");
        next_delimiter.extend_from_slice(delimiter);
        let Some(value_end) = find_bytes(body, &next_delimiter, value_start) else {
            debug!(offset = value_start, "Multipart part has no closing delimiter");
            break;
        };

        let mut name = None;
        let mut filename = None;
        let mut content_type = None;
        for line in headers.split("\r\n") {
            let Some((header, value)) = line.split_once(':') else {
                continue;
            };
            if header.trim().eq_ignore_ascii_case("Content-Disposition") {
                let params = value.split_once(';').map(|(_, p)| p).unwrap_or_default();
                for (key, val) in parse_params(params) {
                    if key.eq_ignore_ascii_case("name") {
                        name = Some(val);
                    } else if key.eq_ignore_ascii_case("filename") {
                        filename = Some(val);
                    }
                }
            } else if header.trim().eq_ignore_ascii_case("Content-Type") {
                content_type = Some(value.trim().to_string());
            }
        }

        match name {
            Some(name) => fields.push(FormField {
                name,
                filename,
                content_type,
                value: FieldValue::Slice(base + value_start..base + value_end),
            }),
            None => debug!("Skipping multipart part without a name"),
        }

        pos = value_end + next_delimiter.len();
    }

    FormData { fields }
}

/// Parse `; key=value; key="quoted \"value\""` parameter lists.
///
/// Separators inside quoted strings are literal and a backslash escapes the
/// following character.
fn parse_params(input: &str) -> Vec<(String, String)> {
    let mut params = Vec::new();
    let mut chars = input.chars().peekable();

    loop {
        while chars.peek().is_some_and(|c| *c == ';' || c.is_whitespace()) {
            chars.next();
        }
        if chars.peek().is_none() {
            break;
        }

        let mut key = String::new();
        while let Some(&c) = chars.peek() {
            if c == '=' || c == ';' {
                break;
            }
            key.push(c);
            chars.next();
        }

        let mut value = String::new();
        if chars.peek() == Some(&'=') {
            chars.next();
            while chars.peek().is_some_and(|c| c.is_whitespace()) {
                chars.next();
            }
            if chars.peek() == Some(&'"') {
                chars.next();
                while let Some(c) = chars.next() {
                    match c {
                        '\\' => {
                            if let Some(escaped) = chars.next() {
                                value.push(escaped);
                            }
                        }
                        '"' => break,
                        other => value.push(other),
                    }
                }
            } else {
                while let Some(&c) = chars.peek() {
                    if c == ';' {
                        break;
                    }
                    value.push(c);
                    chars.next();
                }
                value = value.trim_end().to_string();
            }
        }

        params.push((key.trim().to_string(), value));
    }

    params
}
