//! Proxy selection for outgoing requests.
//!
//! A [`ProxyResolver`] picks the proxy for one target URI. The handler only
//! consults it when `use_proxy` is enabled; a `None` answer means a direct
//! connection.

use std::net::IpAddr;

use url::Url;

pub trait ProxyResolver: Send + Sync {
    fn proxy_for(&self, target: &Url) -> Option<Url>;
}

/// Always connect directly.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoProxy;

impl ProxyResolver for NoProxy {
    fn proxy_for(&self, _target: &Url) -> Option<Url> {
        None
    }
}

/// One proxy for every target outside a bypass list.
#[derive(Debug, Clone)]
pub struct StaticProxy {
    proxy: Url,
    bypass: Vec<String>,
}

impl StaticProxy {
    pub fn new(proxy: Url) -> Self {
        Self {
            proxy,
            bypass: Vec::new(),
        }
    }

    /// Comma-separated hosts that skip the proxy. `*.example.com` and
    /// `.example.com` match every subdomain; `*` matches everything.
    pub fn with_bypass(mut self, hosts: &str) -> Self {
        self.bypass = hosts
            .split(',')
            .map(|host| host.trim().trim_start_matches('*').to_ascii_lowercase())
            .filter(|host| !host.is_empty() || hosts.trim() == "*")
            .collect();
        self
    }

    fn bypasses(&self, host: &str) -> bool {
        let host = host.to_ascii_lowercase();
        let ip = host
            .trim_matches(|c| c == '[' || c == ']')
            .parse::<IpAddr>()
            .ok();

        self.bypass.iter().any(|rule| {
            if rule.is_empty() {
                return true;
            }
            if let Some(ip) = ip {
                return rule.trim_matches(|c| c == '[' || c == ']').parse::<IpAddr>() == Ok(ip);
            }
            match rule.strip_prefix('.') {
                Some(suffix) => host == suffix || host.ends_with(rule.as_str()),
                None => host == *rule,
            }
        })
    }
}

impl ProxyResolver for StaticProxy {
    fn proxy_for(&self, target: &Url) -> Option<Url> {
        match target.host_str() {
            Some(host) if self.bypasses(host) => None,
            _ => Some(self.proxy.clone()),
        }
    }
}
