//! The parsed-request data shape the core consumes
//!
//! The parser itself is an external collaborator (§1): something upstream
//! turns bytes off the wire into a [`Request`]. This module only defines the
//! shape that collaborator hands to the task engine.

use std::collections::BTreeMap;
use std::io::Read;

use crate::http::types::Version;

/// A request header name in the parser's `UPPER_SNAKE` form, with
/// `CONTENT_LENGTH`/`CONTENT_TYPE` left unprefixed and every other header
/// keeping its original name upper-snake-cased (§3).
pub type HeaderName = String;

/// Request headers as handed to the core: `CONTENT_LENGTH`/`CONTENT_TYPE`
/// unprefixed, everything else verbatim in upper-snake form. Lookups are
/// case-sensitive on this already-normalised form; the parser is
/// responsible for the comma-join policy on repeated headers (§3).
#[derive(Debug, Clone, Default)]
pub struct HeaderMap {
    entries: BTreeMap<HeaderName, String>,
}

impl HeaderMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, name: impl Into<HeaderName>, value: impl Into<String>) {
        self.entries.insert(name.into(), value.into());
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.entries.get(name).map(String::as_str)
    }

    /// Lower-cased lookup convenience for the `Connection` header, the one
    /// request header the core itself branches on (§4.3, §4.5).
    pub fn connection_lower(&self) -> Option<String> {
        self.get("CONNECTION").map(|v| v.trim().to_ascii_lowercase())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }
}

/// A malformed-request report from the parser (§3), driving [`crate::server::task::ErrorTask`].
#[derive(Debug, Clone)]
pub struct RequestError {
    pub code: u16,
    pub reason: String,
    pub body: String,
}

/// A fully parsed request, read-only to the core (§3).
pub struct Request {
    pub version: Version,
    pub command: String,
    pub path: String,
    pub query: String,
    pub url_scheme: String,
    pub headers: HeaderMap,
    pub error: Option<RequestError>,
    body: Box<dyn Read + Send>,
}

impl Request {
    pub fn new(
        version: Version,
        command: impl Into<String>,
        path: impl Into<String>,
        query: impl Into<String>,
        url_scheme: impl Into<String>,
        headers: HeaderMap,
        body: Box<dyn Read + Send>,
    ) -> Self {
        Self {
            version,
            command: command.into(),
            path: path.into(),
            query: query.into(),
            url_scheme: url_scheme.into(),
            headers,
            error: None,
            body,
        }
    }

    pub fn with_error(mut self, error: RequestError) -> Self {
        self.error = Some(error);
        self
    }

    /// The EOF-terminated request body stream (§3, §4.6 `wsgi.input`).
    pub fn get_body_stream(&mut self) -> &mut (dyn Read + Send) {
        &mut *self.body
    }

    pub fn is_head(&self) -> bool {
        self.command.eq_ignore_ascii_case("HEAD")
    }
}

impl std::fmt::Debug for Request {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Request")
            .field("version", &self.version)
            .field("command", &self.command)
            .field("path", &self.path)
            .field("query", &self.query)
            .field("url_scheme", &self.url_scheme)
            .field("error", &self.error)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::empty;

    #[test]
    fn connection_lower_trims_and_lowercases() {
        let mut headers = HeaderMap::new();
        headers.insert("CONNECTION", " Keep-Alive ");
        let req = Request::new(
            Version::Http11,
            "GET",
            "/",
            "",
            "http",
            headers,
            Box::new(empty()),
        );
        assert_eq!(req.headers.connection_lower().as_deref(), Some("keep-alive"));
    }
}
