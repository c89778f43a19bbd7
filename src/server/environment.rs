//! Building the per-request application environment (§4.6)

use std::collections::BTreeMap;
use std::net::SocketAddr;

use crate::http::request::Request;
use crate::http::types::Version;
use crate::server::channel::Channel;
use crate::server::proxy::ProxyHeaderResolver;
use crate::settings::Settings;

/// The immutable per-request application environment (§3, §4.6, §6).
///
/// Modelled as a typed struct rather than a loosely-typed string map: every
/// key §4.6 names has a fixed shape, and a struct lets callers reach
/// `environ.path_info` instead of stringly-typed lookups. `headers` carries
/// everything the generic `HTTP_*`/preserved-name rule produces.
#[derive(Debug, Clone)]
pub struct Environment {
    pub request_method: String,
    pub server_port: String,
    pub server_name: String,
    pub server_software: String,
    pub server_protocol: String,
    pub script_name: String,
    pub path_info: String,
    pub query_string: String,
    pub remote_addr: String,
    pub remote_host: String,
    pub remote_port: Option<String>,
    /// `HTTP_*`-prefixed and the two preserved names (`CONTENT_LENGTH`,
    /// `CONTENT_TYPE`), first occurrence wins, values trimmed (§4.6).
    pub headers: BTreeMap<String, String>,
    pub url_scheme: String,
    pub multithread: bool,
    pub multiprocess: bool,
    pub run_once: bool,
    pub input_terminated: bool,
}

const PRESERVED_NAMES: &[&str] = &["CONTENT_LENGTH", "CONTENT_TYPE"];

/// Builds an [`Environment`] from a parsed request plus server/channel
/// context (§4.6).
pub struct EnvironmentBuilder<'a> {
    pub settings: &'a Settings,
    pub server_name: &'a str,
    pub effective_port: u16,
    pub server_trusted_proxy: bool,
}

impl<'a> EnvironmentBuilder<'a> {
    /// Normalises `path` against `url_prefix` per §4.6 paragraph 1: collapse
    /// leading slash runs to one, then split into (SCRIPT_NAME, PATH_INFO).
    fn split_script_path(&self, path: &str) -> (String, String) {
        let collapsed = if path.starts_with('/') {
            let trimmed = path.trim_start_matches('/');
            format!("/{trimmed}")
        } else {
            path.to_string()
        };

        let prefix = self.settings.url_prefix.as_str();
        if prefix.is_empty() {
            return (String::new(), collapsed);
        }
        if collapsed == prefix {
            (prefix.to_string(), String::new())
        } else if let Some(rest) = collapsed.strip_prefix(prefix) {
            if rest.starts_with('/') {
                (prefix.to_string(), rest.to_string())
            } else {
                (String::new(), collapsed)
            }
        } else {
            (String::new(), collapsed)
        }
    }

    pub fn build(&self, request: &Request, channel: &dyn Channel) -> Environment {
        let (script_name, path_info) = self.split_script_path(&request.path);

        let mut headers = BTreeMap::new();
        for (name, value) in request.headers.iter() {
            let key = if PRESERVED_NAMES.contains(&name) {
                name.to_string()
            } else {
                format!("HTTP_{name}")
            };
            headers.entry(key).or_insert_with(|| value.trim().to_string());
        }

        let peer = channel.peer_addr();
        let mut env = Environment {
            request_method: request.command.to_ascii_uppercase(),
            server_port: self.effective_port.to_string(),
            server_name: self.server_name.to_string(),
            server_software: self.settings.ident.clone(),
            server_protocol: format!("HTTP/{}", request.version.as_str()),
            script_name,
            path_info,
            query_string: request.query.clone(),
            remote_addr: peer.ip().to_string(),
            remote_host: peer.ip().to_string(),
            remote_port: None,
            headers,
            url_scheme: request.url_scheme.clone(),
            multithread: true,
            multiprocess: false,
            run_once: false,
            input_terminated: true,
        };

        let trusted = self.server_trusted_proxy
            || self
                .settings
                .trusted_proxy
                .map(|trusted_ip| trusted_ip == peer.ip())
                .unwrap_or(false);

        if trusted {
            let mut headers_copy = env.headers.clone();
            let resolver = ProxyHeaderResolver::new(&headers_copy);
            if let Ok(resolved) = resolver.resolve() {
                resolved.apply(&mut env);
            }
            headers_copy.clear();
        } else {
            env.remote_port = Some(peer.port().to_string());
        }

        env
    }
}

/// Mirrors the version tuple §4.6 says every environment carries
/// (`(1, 0)` historically; kept literal to match the original's hard-coded
/// WSGI version regardless of the negotiated HTTP version).
pub const WSGI_VERSION: (u32, u32) = (1, 0);

pub fn socket_addr_port(addr: SocketAddr) -> u16 {
    addr.port()
}
