//! Core HTTP protocol types shared by the request model and response builder

use crate::errors::ProgrammerError;

/// HTTP protocol version as reported on the request line (§3, §4.3).
///
/// Only the two versions the core's lifecycle table (§4.3) branches on are
/// represented; a parser reporting anything else surfaces it through
/// [`Request::version_raw`](crate::http::request::Request::version_raw) and
/// the core treats it as HTTP/1.0 for lifecycle purposes, matching the
/// original's fallback.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum Version {
    /// [RFC 1945](https://tools.ietf.org/html/rfc1945)
    Http10,
    /// [RFC 7230](https://tools.ietf.org/html/rfc7230) and related
    Http11,
}

impl Version {
    pub fn as_str(self) -> &'static str {
        match self {
            Version::Http10 => "1.0",
            Version::Http11 => "1.1",
        }
    }

    /// Parses the version token as carried in `Request::version` (e.g. `"1.1"`).
    /// Anything other than `"1.1"` is treated as 1.0, per the original's
    /// `version in ("1.0", "1.1")` guard defaulting unknown versions to 1.0.
    pub fn from_token(token: &str) -> Self {
        if token == "1.1" {
            Version::Http11
        } else {
            Version::Http10
        }
    }
}

/// Capitalises each `-`-separated segment of a header name, e.g.
/// `content-length` → `Content-Length` (§4.3 canonicalisation).
///
/// Comparisons against the hop-by-hop set, `content-length`, and
/// `connection` must use the lower-cased incoming form (§9); this function
/// is only for serialisation.
pub fn canonicalize_header_name(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    for (i, segment) in name.split('-').enumerate() {
        if i > 0 {
            out.push('-');
        }
        let mut chars = segment.chars();
        if let Some(first) = chars.next() {
            out.extend(first.to_uppercase());
            out.push_str(&chars.as_str().to_ascii_lowercase());
        }
    }
    out
}

/// Hop-by-hop header names an application is forbidden from supplying
/// (§4.4, GLOSSARY). Compared against the lower-cased incoming name.
pub const HOP_BY_HOP_HEADERS: &[&str] = &[
    "connection",
    "keep-alive",
    "proxy-authenticate",
    "proxy-authorization",
    "te",
    "trailers",
    "transfer-encoding",
    "upgrade",
];

pub fn is_hop_by_hop(lower_name: &str) -> bool {
    HOP_BY_HOP_HEADERS.contains(&lower_name)
}

/// Rejects header/status text containing CR or LF (§4.4, §7).
pub fn reject_crlf(text: &str) -> Result<(), ()> {
    if text.bytes().any(|b| b == b'\r' || b == b'\n') {
        Err(())
    } else {
        Ok(())
    }
}

pub fn validate_status_line(status: &str) -> Result<(), ProgrammerError> {
    reject_crlf(status).map_err(|_| ProgrammerError::InvalidStatusLine)
}

pub fn validate_header_text(name: &str, value: &str) -> Result<(), ProgrammerError> {
    reject_crlf(name)
        .and(reject_crlf(value))
        .map_err(|_| ProgrammerError::InvalidHeaderText(name.to_string()))
}

/// "Status permits a body" ⇔ the status line does not start with `1`, `204`,
/// or `304` (§4.2).
pub fn status_permits_body(status: &str) -> bool {
    !(status.starts_with('1') || status.starts_with("204") || status.starts_with("304"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn canonicalizes_multi_segment_names() {
        assert_eq!(canonicalize_header_name("content-length"), "Content-Length");
        assert_eq!(canonicalize_header_name("x-forwarded-for"), "X-Forwarded-For");
        assert_eq!(canonicalize_header_name("ETAG"), "Etag");
    }

    #[test]
    fn body_permission_matches_status_family() {
        assert!(!status_permits_body("100 Continue"));
        assert!(!status_permits_body("204 No Content"));
        assert!(!status_permits_body("304 Not Modified"));
        assert!(status_permits_body("200 OK"));
        assert!(status_permits_body("404 Not Found"));
    }

    #[test]
    fn hop_by_hop_is_case_sensitive_on_the_lowered_form() {
        assert!(is_hop_by_hop("transfer-encoding"));
        assert!(!is_hop_by_hop("content-type"));
    }
}
