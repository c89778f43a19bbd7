//! Trusted-proxy header interpretation (§4.7)
//!
//! Rewrites scheme, host, port, and peer address for the application
//! environment from `Forwarded` or `X-Forwarded-*` headers. Grounded on
//! `examples/original_source/waitress/task.py`'s `parse_proxy_headers`;
//! the `for=` per-hop handling here intentionally differs from the
//! original, which is suspected to re-use the whole parameter string for
//! every hop instead of each hop's own value (§9 open question) — this
//! resolver parses each hop independently and must not be "fixed" to match
//! that behaviour.

use std::collections::BTreeMap;

use crate::errors::ProxyHeaderError;
use crate::server::environment::Environment;

/// A resolved proxy rewrite, applied to an [`Environment`] via [`Self::apply`].
#[derive(Debug, Clone, Default)]
pub struct ResolvedProxyHeaders {
    pub remote_addr: Option<String>,
    pub remote_port: Option<String>,
    pub url_scheme: Option<String>,
    pub server_name: Option<String>,
    pub server_port: Option<String>,
    pub http_host: Option<String>,
}

impl ResolvedProxyHeaders {
    pub fn apply(self, env: &mut Environment) {
        if let Some(addr) = self.remote_addr {
            env.remote_addr = addr.clone();
            env.remote_host = addr;
        }
        if self.remote_port.is_some() {
            env.remote_port = self.remote_port;
        }
        if let Some(scheme) = self.url_scheme {
            env.url_scheme = scheme;
        }
        if let Some(name) = self.server_name {
            env.server_name = name;
        }
        if let Some(port) = self.server_port {
            env.server_port = port;
        }
        if let Some(host) = self.http_host {
            env.headers.insert("HTTP_HOST".to_string(), host);
        }
    }
}

/// Reads `X_FORWARDED_*`/`FORWARDED` from an already-`HTTP_`-prefixed
/// header map (the same map [`crate::server::environment::Environment`]
/// carries) and produces a [`ResolvedProxyHeaders`] (§4.7).
pub struct ProxyHeaderResolver<'a> {
    headers: &'a BTreeMap<String, String>,
}

impl<'a> ProxyHeaderResolver<'a> {
    pub fn new(headers: &'a BTreeMap<String, String>) -> Self {
        Self { headers }
    }

    fn get(&self, key: &str) -> Option<&str> {
        self.headers.get(key).map(String::as_str)
    }

    pub fn resolve(&self) -> Result<ResolvedProxyHeaders, ProxyHeaderError> {
        let forwarded = self.get("HTTP_FORWARDED");
        let has_x_forwarded = ["HTTP_X_FORWARDED_FOR", "HTTP_X_FORWARDED_HOST",
            "HTTP_X_FORWARDED_PROTO", "HTTP_X_FORWARDED_PORT", "HTTP_X_FORWARDED_BY"]
            .iter()
            .any(|k| self.get(k).is_some());

        if let Some(forwarded) = forwarded {
            if has_x_forwarded {
                log::warn!(
                    target: "waitress::proxy",
                    "both Forwarded and X-Forwarded-* headers present; preferring Forwarded"
                );
            }
            self.resolve_forwarded(forwarded)
        } else {
            Ok(self.resolve_x_forwarded())
        }
    }

    fn resolve_x_forwarded(&self) -> ResolvedProxyHeaders {
        let mut out = ResolvedProxyHeaders::default();

        if let Some(raw) = self.get("HTTP_X_FORWARDED_FOR") {
            let mut hops = raw.split(',').map(str::trim).filter(|h| !h.is_empty());
            if let Some(client) = hops.next() {
                let (addr, port) = split_host_port(client);
                out.remote_addr = Some(addr);
                if port.is_some() {
                    out.remote_port = port;
                }
            }
        }
        if let Some(proto) = self.get("HTTP_X_FORWARDED_PROTO") {
            out.url_scheme = Some(proto.to_ascii_lowercase());
        }
        if let Some(port) = self.get("HTTP_X_FORWARDED_PORT") {
            out.server_port = Some(port.trim().to_string());
        } else if let Some(scheme) = out.url_scheme.as_deref() {
            out.server_port = Some(default_port_for(scheme).to_string());
        }
        if let Some(host) = self.get("HTTP_X_FORWARDED_HOST") {
            let (name, port) = split_host_port(host);
            out.server_name = Some(name);
            out.http_host = Some(host.to_string());
            if port.is_some() {
                out.server_port = port;
            }
        }

        out
    }

    fn resolve_forwarded(&self, raw: &str) -> Result<ResolvedProxyHeaders, ProxyHeaderError> {
        let mut out = ResolvedProxyHeaders::default();
        let mut client_addr: Option<String> = None;
        let mut proto: Option<String> = None;
        let mut host: Option<String> = None;

        for param in raw.split(';') {
            let param = param.trim();
            if param.is_empty() {
                continue;
            }
            let Some((key, value)) = param.split_once('=') else {
                continue;
            };
            let key = key.trim().to_ascii_lowercase();
            let value = value.trim();

            match key.as_str() {
                "for" => {
                    for hop in value.split(',') {
                        let hop = unquote(hop.trim());
                        if client_addr.is_none() {
                            client_addr = Some(hop);
                        }
                    }
                }
                "proto" => proto = Some(unquote(value).to_ascii_lowercase()),
                "host" => host = Some(unquote(value)),
                "by" => {}
                _ => {}
            }
        }

        let client_addr = client_addr.ok_or_else(|| {
            ProxyHeaderError::InvalidForwardedFor(raw.to_string())
        })?;
        let (addr, port) = split_host_port(&client_addr);
        out.remote_addr = Some(addr);
        out.remote_port = port;

        if let Some(proto) = proto {
            if proto != "http" && proto != "https" {
                return Err(ProxyHeaderError::InvalidProto(proto));
            }
            if out.server_port.is_none() {
                out.server_port = Some(default_port_for(&proto).to_string());
            }
            out.url_scheme = Some(proto);
        }

        if let Some(host) = host {
            let (name, port) = split_host_port(&host);
            out.server_name = Some(name);
            out.http_host = Some(host);
            if port.is_some() {
                out.server_port = port;
            }
        }

        Ok(out)
    }
}

/// Strips surrounding double quotes from a `Forwarded` parameter value.
fn unquote(value: &str) -> String {
    value
        .strip_prefix('"')
        .and_then(|v| v.strip_suffix('"'))
        .unwrap_or(value)
        .to_string()
}

/// Splits `host:port` / `addr:port`, treating a trailing `:digits` as a
/// port only when the value isn't a bracketed IPv6 literal (§4.7
/// "heuristic: contains `:` and does not end with `]`").
fn split_host_port(value: &str) -> (String, Option<String>) {
    if value.contains(':') && !value.ends_with(']') {
        if let Some(idx) = value.rfind(':') {
            let (host, port) = value.split_at(idx);
            return (host.to_string(), Some(port[1..].to_string()));
        }
    }
    (value.to_string(), None)
}

fn default_port_for(scheme: &str) -> u16 {
    if scheme == "https" {
        443
    } else {
        80
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn headers(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn resolves_forwarded_with_ipv6_and_port() {
        let h = headers(&[(
            "HTTP_FORWARDED",
            r#"for="[2001:db8::1]:4711";proto=https;host=api.example:8443"#,
        )]);
        let resolved = ProxyHeaderResolver::new(&h).resolve().unwrap();
        assert_eq!(resolved.remote_addr.as_deref(), Some("[2001:db8::1]"));
        assert_eq!(resolved.remote_port.as_deref(), Some("4711"));
        assert_eq!(resolved.url_scheme.as_deref(), Some("https"));
        assert_eq!(resolved.server_name.as_deref(), Some("api.example"));
        assert_eq!(resolved.server_port.as_deref(), Some("8443"));
    }

    #[test]
    fn multi_hop_for_takes_first_as_client() {
        let h = headers(&[("HTTP_FORWARDED", "for=192.0.2.1, for=198.51.100.2")]);
        let resolved = ProxyHeaderResolver::new(&h).resolve().unwrap();
        assert_eq!(resolved.remote_addr.as_deref(), Some("192.0.2.1"));
    }

    #[test]
    fn rejects_invalid_proto() {
        let h = headers(&[("HTTP_FORWARDED", "for=192.0.2.1;proto=ftp")]);
        let err = ProxyHeaderResolver::new(&h).resolve().unwrap_err();
        assert_eq!(err, ProxyHeaderError::InvalidProto("ftp".to_string()));
    }

    #[test]
    fn x_forwarded_for_first_hop_is_client() {
        let h = headers(&[("HTTP_X_FORWARDED_FOR", " 203.0.113.9 , 10.0.0.1")]);
        let resolved = ProxyHeaderResolver::new(&h).resolve().unwrap();
        assert_eq!(resolved.remote_addr.as_deref(), Some("203.0.113.9"));
    }

    #[test]
    fn forwarded_wins_over_x_forwarded() {
        let h = headers(&[
            ("HTTP_FORWARDED", "for=192.0.2.1"),
            ("HTTP_X_FORWARDED_FOR", "10.0.0.9"),
        ]);
        let resolved = ProxyHeaderResolver::new(&h).resolve().unwrap();
        assert_eq!(resolved.remote_addr.as_deref(), Some("192.0.2.1"));
    }
}
