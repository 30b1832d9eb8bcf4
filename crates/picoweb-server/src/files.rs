//! Static file table.
//!
//! Embedded web assets are compiled into the binary; they are queued with
//! the static ownership mode, so serving a file never copies its body.

use std::collections::HashMap;

use picoweb_core::SessionHandle;
use picoweb_protocol::response::content_type_for;
use picoweb_protocol::HttpRequest;
use tracing::debug;

use crate::error::ServerError;
use crate::server::Server;
use crate::transport::Transport;

/// One embedded file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StaticFile {
    pub name: &'static str,
    pub content_type: &'static str,
    pub body: &'static [u8],
}

/// Name to file lookup, with `index.html` served for `/`.
#[derive(Debug, Clone, Default)]
pub struct StaticFiles {
    files: HashMap<&'static str, StaticFile>,
}

impl StaticFiles {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a file, deriving its content type from the extension.
    pub fn add(&mut self, name: &'static str, body: &'static [u8]) -> &mut Self {
        let extension = name.rsplit_once('.').map(|(_, ext)| ext).unwrap_or("html");
        self.add_typed(name, content_type_for(extension), body)
    }

    pub fn add_typed(
        &mut self,
        name: &'static str,
        content_type: &'static str,
        body: &'static [u8],
    ) -> &mut Self {
        self.files.insert(
            name,
            StaticFile {
                name,
                content_type,
                body,
            },
        );
        self
    }

    /// Look up a request path. Leading slashes are ignored.
    pub fn get(&self, path: &str) -> Option<&StaticFile> {
        let name = path.trim_start_matches('/');
        let name = if name.is_empty() { "index.html" } else { name };
        self.files.get(name)
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    /// Queue the file matching the request path, if any. Returns whether a
    /// response was queued, matching the HTTP handler convention.
    pub fn serve<T: Transport>(
        &self,
        server: &mut Server<T>,
        handle: SessionHandle,
        request: &HttpRequest,
    ) -> Result<bool, ServerError> {
        let Some(file) = self.get(request.path()) else {
            return Ok(false);
        };
        debug!(%handle, file = file.name, len = file.body.len(), "Serving static file");

        let header = format!(
            "HTTP/1.1 200 OK\r\nContent-Type: {}\r\nContent-Length: {}\r\n\r\n",
            file.content_type,
            file.body.len()
        );
        server.send_owned(handle, header.into_bytes())?;
        if !file.body.is_empty() {
            server.send_static(handle, file.body)?;
        }
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lookup() {
        let mut files = StaticFiles::new();
        files
            .add("index.html", b"<h1>home</h1>")
            .add("app.js", b"console.log(1)")
            .add_typed("data", "application/json", b"{}");

        assert_eq!(files.len(), 3);
        assert_eq!(files.get("/").unwrap().name, "index.html");
        assert_eq!(files.get("/app.js").unwrap().content_type, "text/javascript");
        assert_eq!(files.get("data").unwrap().content_type, "application/json");
        assert!(files.get("/missing.css").is_none());
    }
}
