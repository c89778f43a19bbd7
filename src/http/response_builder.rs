//! Pure serialisation of a task's response prologue and connection-lifecycle
//! decision (§4.3)
//!
//! [`decide_policy`] is the lifecycle decision table; [`serialize`] turns a
//! decided, header-complete response into wire bytes. They are split so
//! `ErrorTask` (§4.5) can call `serialize` directly with its own,
//! asymmetric close decision instead of going through the general table.

use httpdate::fmt_http_date;
use std::time::{Duration, UNIX_EPOCH};

use crate::http::types::{canonicalize_header_name, Version};

/// One (name, value) pair as the application supplied it; order is
/// significant (§3, §8 invariant 4).
pub type HeaderPair = (String, String);

/// The connection-lifecycle outcome of [`decide_policy`] (§4.3 table).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Policy {
    pub close_on_finish: bool,
    pub chunked_response: bool,
}

/// Everything [`decide_policy`]/[`serialize`] need from the task and request
/// that isn't already the response header list.
pub struct ResponseContext<'a> {
    pub version: Version,
    pub request_connection: Option<&'a str>,
    pub status: &'a str,
    pub content_length: Option<u64>,
    pub has_body: bool,
    pub server_ident: &'a str,
    pub start_time: u64,
}

/// Implements the §4.3 lifecycle decision table. Does not touch the header
/// list; callers append the resulting `Connection`/`Transfer-Encoding`
/// headers themselves via [`serialize`].
pub fn decide_policy(ctx: &ResponseContext) -> (Policy, Option<(&'static str, &'static str)>) {
    let keep_alive_requested = ctx.request_connection == Some("keep-alive");
    let close_requested = ctx.request_connection == Some("close");
    let has_length = ctx.content_length.is_some();

    match ctx.version {
        Version::Http10 => {
            if keep_alive_requested && has_length {
                (
                    Policy {
                        close_on_finish: false,
                        chunked_response: false,
                    },
                    Some(("Connection", "Keep-Alive")),
                )
            } else {
                (
                    Policy {
                        close_on_finish: true,
                        chunked_response: false,
                    },
                    Some(("Connection", "close")),
                )
            }
        }
        Version::Http11 => {
            if close_requested {
                (
                    Policy {
                        close_on_finish: true,
                        chunked_response: false,
                    },
                    Some(("Connection", "close")),
                )
            } else if has_length {
                (
                    Policy {
                        close_on_finish: false,
                        chunked_response: false,
                    },
                    None,
                )
            } else if ctx.has_body {
                (
                    Policy {
                        close_on_finish: false,
                        chunked_response: true,
                    },
                    Some(("Transfer-Encoding", "chunked")),
                )
            } else {
                (
                    Policy {
                        close_on_finish: true,
                        chunked_response: false,
                    },
                    Some(("Connection", "close")),
                )
            }
        }
    }
}

/// Serialises the status line and header block (§4.3), given the header
/// list already including whatever `decide_policy` (or `ErrorTask`)
/// decided to append. Performs the remaining fill-ins this section
/// describes: `Content-Length` synthesis, `Server`/`Via`, `Date`, and the
/// stable name sort.
pub fn serialize(
    version: Version,
    status: &str,
    mut headers: Vec<HeaderPair>,
    content_length: Option<u64>,
    has_body: bool,
    server_ident: &str,
    start_time: u64,
) -> Vec<u8> {
    let has = |headers: &[HeaderPair], name: &str| {
        headers.iter().any(|(n, _)| n.eq_ignore_ascii_case(name))
    };

    // Content-Length is meaningless (and misleading) on a bodyless status.
    if !has_body {
        headers.retain(|(n, _)| !n.eq_ignore_ascii_case("content-length"));
    }

    if !has(&headers, "content-length") {
        if let Some(len) = content_length {
            if has_body {
                headers.push(("Content-Length".to_string(), len.to_string()));
            }
        }
    }

    if has(&headers, "server") {
        let via = if server_ident.is_empty() {
            "waitress".to_string()
        } else {
            server_ident.to_string()
        };
        headers.push(("Via".to_string(), via));
    } else if !server_ident.is_empty() {
        headers.push(("Server".to_string(), server_ident.to_string()));
    }

    if !has(&headers, "date") {
        let date = fmt_http_date(UNIX_EPOCH + Duration::from_secs(start_time));
        headers.push(("Date".to_string(), date));
    }

    // Stable sort keyed only on the canonical name: duplicates keep the
    // application's relative order (RFC 7230 §3.2.2, §8 invariant 4).
    headers.sort_by(|a, b| {
        canonicalize_header_name(&a.0.to_ascii_lowercase())
            .cmp(&canonicalize_header_name(&b.0.to_ascii_lowercase()))
    });

    let mut out = Vec::with_capacity(64 + headers.len() * 32);
    out.extend_from_slice(format!("HTTP/{} {}\r\n", version.as_str(), status).as_bytes());
    for (name, value) in &headers {
        out.extend_from_slice(canonicalize_header_name(name).as_bytes());
        out.extend_from_slice(b": ");
        out.extend_from_slice(value.as_bytes());
        out.extend_from_slice(b"\r\n");
    }
    out.extend_from_slice(b"\r\n");
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn http10_keepalive_with_length_stays_open() {
        let ctx = ResponseContext {
            version: Version::Http10,
            request_connection: Some("keep-alive"),
            status: "200 OK",
            content_length: Some(2),
            has_body: true,
            server_ident: "waitress",
            start_time: 0,
        };
        let (policy, header) = decide_policy(&ctx);
        assert!(!policy.close_on_finish);
        assert_eq!(header, Some(("Connection", "Keep-Alive")));
    }

    #[test]
    fn http11_unknown_length_chunks() {
        let ctx = ResponseContext {
            version: Version::Http11,
            request_connection: None,
            status: "200 OK",
            content_length: None,
            has_body: true,
            server_ident: "waitress",
            start_time: 0,
        };
        let (policy, header) = decide_policy(&ctx);
        assert!(policy.chunked_response);
        assert!(!policy.close_on_finish);
        assert_eq!(header, Some(("Transfer-Encoding", "chunked")));
    }

    #[test]
    fn http11_close_requested_closes() {
        let ctx = ResponseContext {
            version: Version::Http11,
            request_connection: Some("close"),
            status: "200 OK",
            content_length: Some(2),
            has_body: true,
            server_ident: "waitress",
            start_time: 0,
        };
        let (policy, header) = decide_policy(&ctx);
        assert!(policy.close_on_finish);
        assert_eq!(header, Some(("Connection", "close")));
    }
}
