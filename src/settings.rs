//! Server-wide tunables consumed read-only by the task engine
//!
//! [`Settings`] is built once, at server construction, and never mutated
//! afterwards — the dispatcher, task state machine, and environment builder
//! all treat it as `&Settings`. There is no file or environment-variable
//! loader here; wiring a config format onto [`Settings`] is left to the
//! embedding binary.
//!
//! # Memory Consumption
//!
//! `outbuf_overflow` and `inbuf_overflow` bound how much unflushed data a
//! channel may buffer before applying backpressure; they do not bound the
//! task engine's own allocations, which are O(1) per task plus the
//! response header list.

use std::net::IpAddr;

/// Tunables shared by every task and worker in a server (§3, §6).
#[derive(Debug, Clone)]
pub struct Settings {
    /// Bind host. On Windows the sentinel `localhost` is rewritten to the
    /// empty string (`INADDR_ANY`) by [`Settings::new`]; see [`Self::host`].
    pub host: String,
    /// Bind port (default: `8080`).
    pub port: u16,
    /// Number of worker threads the dispatcher maintains (default: `4`).
    pub threads: usize,
    /// Scheme reported to the application absent proxy rewriting (default: `http`).
    pub url_scheme: String,
    /// Server identity string used for the `Server:`/`Via:` response header
    /// (default: `waitress`).
    pub ident: String,
    /// TCP listen backlog (default: `1024`).
    pub backlog: i32,
    /// Per-`recv` read size in bytes (default: `8192`).
    pub recv_bytes: usize,
    /// Per-`send` write size in bytes (default: `9000`).
    pub send_bytes: usize,
    /// Output buffer high-water mark in bytes before a channel applies
    /// backpressure (default: `1 MiB`).
    pub outbuf_overflow: usize,
    /// Input buffer high-water mark in bytes (default: `512 KiB`).
    pub inbuf_overflow: usize,
    /// Maximum number of concurrently open channels (default: `1000`).
    pub connection_limit: usize,
    /// Idle-channel reap interval in seconds (default: `30`).
    pub cleanup_interval: u64,
    /// Per-channel inactivity timeout in seconds (default: `60`).
    pub channel_timeout: u64,
    /// Whether socket write failures are re-raised through `service()` for
    /// the dispatcher to log (default: `true`).
    pub log_socket_errors: bool,
    /// Maximum bytes of request-header data the parser accepts (default: `512 KiB`).
    pub max_request_header_size: usize,
    /// Maximum request body size in bytes (default: `1 GiB`).
    pub max_request_body_size: usize,
    /// `(level, option, value)` triples applied to accepted sockets
    /// (default: `[(IPPROTO_TCP, TCP_NODELAY, 1)]`).
    pub socket_options: Vec<SocketOption>,
    /// A peer address whose `Forwarded`/`X-Forwarded-*` headers are trusted
    /// as authoritative for client identity (§4.6, §9 open question).
    pub trusted_proxy: Option<IpAddr>,
    /// Path prefix stripped from `PATH_INFO` into `SCRIPT_NAME`; empty or
    /// `/`-prefixed with no trailing slash.
    pub url_prefix: String,

    #[doc(hidden)]
    #[allow(dead_code)]
    pub _priv: (),
}

/// A `setsockopt`-style tunable applied to each accepted socket.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SocketOption {
    pub level: i32,
    pub name: i32,
    pub value: i32,
}

impl Default for Settings {
    fn default() -> Self {
        Self::new("127.0.0.1", 8080)
    }
}

impl Settings {
    /// Builds settings with the default `host`/`port` (§6), applying the
    /// Windows `localhost` → `INADDR_ANY` rewrite.
    pub fn new(host: &str, port: u16) -> Self {
        Self {
            host: rewrite_localhost(host),
            port,
            threads: 4,
            url_scheme: "http".to_string(),
            ident: "waitress".to_string(),
            backlog: 1024,
            recv_bytes: 8192,
            send_bytes: 9000,
            outbuf_overflow: 1024 * 1024,
            inbuf_overflow: 512 * 1024,
            connection_limit: 1000,
            cleanup_interval: 30,
            channel_timeout: 60,
            log_socket_errors: true,
            max_request_header_size: 512 * 1024,
            max_request_body_size: 1024 * 1024 * 1024,
            socket_options: vec![SocketOption {
                level: libc_tcp_nodelay::IPPROTO_TCP,
                name: libc_tcp_nodelay::TCP_NODELAY,
                value: 1,
            }],
            trusted_proxy: None,
            url_prefix: String::new(),
            _priv: (),
        }
    }
}

#[cfg(target_os = "windows")]
fn rewrite_localhost(host: &str) -> String {
    if host.eq_ignore_ascii_case("localhost") {
        String::new()
    } else {
        host.to_string()
    }
}

#[cfg(not(target_os = "windows"))]
fn rewrite_localhost(host: &str) -> String {
    host.to_string()
}

/// Avoids a hard dependency on the `libc` crate for two well-known
/// constants; values match `<netinet/in.h>`/`<netinet/tcp.h>` on every
/// platform `socket2` supports.
mod libc_tcp_nodelay {
    pub const IPPROTO_TCP: i32 = 6;
    pub const TCP_NODELAY: i32 = 1;
}

/// Parses a loosely-typed boolean the way the original `adjustments.py`
/// `asbool` does (§6, §8 invariant 9): true iff the lower-cased, trimmed
/// text is one of `t`, `true`, `y`, `yes`, `on`, `1`.
pub fn asbool(value: &str) -> bool {
    matches!(
        value.trim().to_ascii_lowercase().as_str(),
        "t" | "true" | "y" | "yes" | "on" | "1"
    )
}
